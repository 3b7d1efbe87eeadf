//! Label sets and ordered label-selector conditions.
//!
//! Matching is subset containment by exact value: every key of a selector
//! must be present on the series with the identical value, and the series may
//! carry any number of extra labels. Selectors are never regular expressions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Labels of one series, ordered by name.
pub type LabelSet = BTreeMap<String, String>;

/// Copy of `labels` without the given label names.
#[must_use]
pub fn strip_labels(labels: &LabelSet, names: &[&str]) -> LabelSet {
    labels
        .iter()
        .filter(|(name, _)| !names.contains(&name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Render labels as a PromQL selector, e.g. `{namespace="x", severity="warning"}`.
#[must_use]
pub fn labels_as_selector(labels: &LabelSet) -> String {
    let pairs: Vec<String> = labels
        .iter()
        .map(|(name, value)| format!("{name}={value:?}"))
        .collect();
    format!("{{{}}}", pairs.join(", "))
}

/// A label selector paired with the reason it is tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricCondition {
    /// Required labels
    pub selector: LabelSet,
    /// Explanation, usually a tracking-bug link
    pub text: String,
}

impl MetricCondition {
    /// Build a condition from `(name, value)` pairs.
    pub fn new<'a>(
        selector: impl IntoIterator<Item = (&'a str, &'a str)>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            selector: selector
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            text: text.into(),
        }
    }

    /// True if every selector label is present on `labels` with the same value.
    #[must_use]
    pub fn matches(&self, labels: &LabelSet) -> bool {
        self.selector
            .iter()
            .all(|(name, value)| labels.get(name) == Some(value))
    }
}

/// Ordered list of conditions; the first match wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricConditions(Vec<MetricCondition>);

impl MetricConditions {
    #[must_use]
    pub fn new(conditions: Vec<MetricCondition>) -> Self {
        Self(conditions)
    }

    /// First condition matching `labels`, in list order.
    #[must_use]
    pub fn matches(&self, labels: &LabelSet) -> Option<&MetricCondition> {
        self.0.iter().find(|condition| condition.matches(labels))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<MetricCondition> for MetricConditions {
    fn from_iter<I: IntoIterator<Item = MetricCondition>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_extra_series_labels_are_ignored() {
        let condition = MetricCondition::new([("alertname", "X")], "bug");
        assert!(condition.matches(&labels(&[("alertname", "X"), ("severity", "warning")])));
        assert!(!condition.matches(&labels(&[("alertname", "Y")])));
    }

    #[test]
    fn test_all_selector_keys_required() {
        let condition = MetricCondition::new(
            [("alertname", "AggregatedAPIDown"), ("name", "v1alpha1.wardle.example.com")],
            "bug",
        );
        assert!(!condition.matches(&labels(&[("alertname", "AggregatedAPIDown")])));
        assert!(condition.matches(&labels(&[
            ("alertname", "AggregatedAPIDown"),
            ("name", "v1alpha1.wardle.example.com"),
            ("namespace", "default"),
        ])));
    }

    #[test]
    fn test_values_are_not_regex() {
        let condition = MetricCondition::new([("alertname", "Kube.*")], "bug");
        assert!(!condition.matches(&labels(&[("alertname", "KubePodCrashLooping")])));
    }

    #[test]
    fn test_first_match_wins() {
        let conditions: MetricConditions = [
            MetricCondition::new([("alertname", "X"), ("namespace", "a")], "first"),
            MetricCondition::new([("alertname", "X")], "second"),
        ]
        .into_iter()
        .collect();

        let series = labels(&[("alertname", "X"), ("namespace", "a")]);
        assert_eq!(conditions.matches(&series).unwrap().text, "first");

        let series = labels(&[("alertname", "X"), ("namespace", "b")]);
        assert_eq!(conditions.matches(&series).unwrap().text, "second");

        assert!(conditions.matches(&labels(&[("alertname", "Z")])).is_none());
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let condition = MetricCondition::new([], "catch-all");
        assert!(condition.matches(&LabelSet::new()));
    }

    #[test]
    fn test_strip_and_render() {
        let series = labels(&[
            ("alertname", "KubeJobFailed"),
            ("alertstate", "firing"),
            ("prometheus", "openshift-monitoring/k8s"),
            ("severity", "warning"),
            ("namespace", "openshift-marketplace"),
        ]);
        let stripped = strip_labels(&series, &["alertname", "alertstate", "prometheus"]);
        assert_eq!(
            labels_as_selector(&stripped),
            r#"{namespace="openshift-marketplace", severity="warning"}"#
        );
    }
}
