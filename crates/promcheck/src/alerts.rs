//! Alert assertions over the test window.
//!
//! Three invariants are checked, each feeding the same [`Violations`]
//! accumulator:
//! - the Watchdog alert fired continuously (see [`crate::continuity`])
//! - no non-info alert fired apart from the always-on ones
//! - no non-info alert is pending after the run
//!
//! Firing series are Known when they match a tracked bug and Unexpected
//! otherwise. Pending series are AllowedPending on the allow-list, Known on
//! a tracked bug and Flaky otherwise.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::continuity::{self, WATCHDOG_GAP_VIOLATION, WATCHDOG_SELECTOR};
use crate::error::Result;
use crate::labels::{labels_as_selector, strip_labels, MetricCondition, MetricConditions};
use crate::prometheus::{PrometheusClient, Sample};
use crate::violations::{Classification, Verdict, Violations};
use crate::window::TestWindow;

/// Alerts that fire by design and are excluded from the firing/pending checks
pub const ALWAYS_FIRING_ALERTS: &str = "Watchdog|AlertmanagerReceiversNotConfigured";

/// Labels dropped before rendering a violation
pub const STRIPPED_LABELS: &[&str] = &["alertname", "alertstate", "prometheus"];

/// Environment variable whose non-empty value disables the alert checks
/// (skewed component versions trigger many alerts on their own)
pub const VERSION_SKEW_ENV: &str = "TEST_UNSUPPORTED_ALLOW_VERSION_SKEW";

/// Reason reported when the alert checks are skipped for version skew
pub const VERSION_SKEW_REASON: &str =
    "alert checks are disabled while cluster components run skewed versions";

/// Upper bound on points per range query in local continuity mode
const MAX_POINTS_PER_QUERY: i64 = 10_000;

/// Ordered conditions used to classify alert series
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertPolicy {
    /// Firing alerts with a tracked bug
    #[serde(default)]
    pub firing_with_bugs: MetricConditions,
    /// Pending alerts with a tracked bug
    #[serde(default)]
    pub pending_with_bugs: MetricConditions,
    /// Pending alerts that are normal during a run
    #[serde(default)]
    pub allowed_pending: MetricConditions,
    /// Count Watchdog transitions client side instead of with a subquery
    #[serde(default)]
    pub local_continuity: bool,
    /// When set, evaluation issues no queries and yields `Skipped`
    #[serde(skip)]
    pub skip_reason: Option<String>,
}

impl AlertPolicy {
    /// Policy used for OpenShift e2e runs.
    #[must_use]
    pub fn openshift() -> Self {
        Self {
            firing_with_bugs: [MetricCondition::new(
                [
                    ("alertname", "AggregatedAPIDown"),
                    ("name", "v1alpha1.wardle.example.com"),
                ],
                "https://bugzilla.redhat.com/show_bug.cgi?id=1933144",
            )]
            .into_iter()
            .collect(),
            pending_with_bugs: MetricConditions::default(),
            allowed_pending: [MetricCondition::new(
                [("alertname", "HighOverallControlPlaneCPU")],
                "high CPU utilization during e2e runs is normal",
            )]
            .into_iter()
            .collect(),
            local_continuity: false,
            skip_reason: None,
        }
    }

    /// Classify a series returned by the firing query.
    #[must_use]
    pub fn classify_firing(&self, sample: &Sample) -> (String, Classification) {
        let violation = describe(sample, "fired");
        let classification = match self.firing_with_bugs.matches(&sample.metric) {
            Some(cause) => Classification::Known {
                cause: cause.text.clone(),
            },
            None => Classification::Unexpected,
        };
        (violation, classification)
    }

    /// Classify a series returned by the pending query.
    #[must_use]
    pub fn classify_pending(&self, sample: &Sample) -> (String, Classification) {
        let violation = describe(sample, "pending");
        if let Some(allowed) = self.allowed_pending.matches(&sample.metric) {
            return (
                violation,
                Classification::AllowedPending {
                    reason: allowed.text.clone(),
                },
            );
        }
        // pending alerts are still being scoped, report them as flakes
        let classification = match self.pending_with_bugs.matches(&sample.metric) {
            Some(cause) => Classification::Known {
                cause: cause.text.clone(),
            },
            None => Classification::Flaky,
        };
        (violation, classification)
    }
}

/// `alert <name> <verb> for <value> seconds with labels: {...}`
fn describe(sample: &Sample, verb: &str) -> String {
    let labels = strip_labels(&sample.metric, STRIPPED_LABELS);
    format!(
        "alert {} {verb} for {} seconds with labels: {}",
        sample.label("alertname"),
        sample.value_str(),
        labels_as_selector(&labels)
    )
}

/// Query for non-info alerts firing at any point in `window`.
#[must_use]
pub fn firing_query(window: &str) -> String {
    format!(
        r#"sort_desc(count_over_time(ALERTS{{alertstate="firing",severity!="info",alertname!~"{ALWAYS_FIRING_ALERTS}"}}[{window}:1s])) > 0"#
    )
}

/// Query for non-info alerts currently pending.
#[must_use]
pub fn pending_query() -> String {
    format!(
        r#"ALERTS{{alertname!~"{ALWAYS_FIRING_ALERTS}",alertstate="pending",severity!="info"}}"#
    )
}

/// Runs the alert invariants against one backend.
#[derive(Debug)]
pub struct AlertEvaluator<'a> {
    client: &'a PrometheusClient,
    policy: AlertPolicy,
}

impl<'a> AlertEvaluator<'a> {
    #[must_use]
    pub fn new(client: &'a PrometheusClient, policy: AlertPolicy) -> Self {
        Self { client, policy }
    }

    /// Evaluate all alert invariants over `window`.
    ///
    /// Query failures abort with an error; violations never do. All
    /// violations are collected before the verdict is computed.
    pub async fn evaluate(&self, window: &TestWindow) -> Result<Verdict> {
        if let Some(reason) = &self.policy.skip_reason {
            info!("{reason}");
            return Ok(Verdict::Skipped {
                reason: reason.clone(),
            });
        }

        let violations = Violations::new();
        let violations = self.check_watchdog(window, violations).await?;
        let violations = self.check_firing(window, violations).await?;
        let violations = self.check_pending(violations).await?;
        debug!(
            known = violations.known().count(),
            unexpected = violations.unexpected().count(),
            flaky = violations.flaky().count(),
            allowed = violations.allowed().count(),
            "Classified alert series"
        );
        Ok(violations.into_verdict())
    }

    /// Watchdog must have fired for the whole window.
    pub async fn check_watchdog(
        &self,
        window: &TestWindow,
        mut violations: Violations,
    ) -> Result<Violations> {
        let gap = if self.policy.local_continuity {
            self.watchdog_gap_local(window).await?
        } else {
            let query = continuity::gap_query(WATCHDOG_SELECTOR, &window.promql_duration());
            !self.client.run_query(&query).await?.series().is_empty()
        };

        if gap {
            violations.record(WATCHDOG_GAP_VIOLATION, Classification::Unexpected);
        }
        Ok(violations)
    }

    /// Fetch the indicator at 1s resolution in slices and count transitions
    /// over the concatenated samples.
    async fn watchdog_gap_local(&self, window: &TestWindow) -> Result<bool> {
        let expr = continuity::indicator_expr(WATCHDOG_SELECTOR);
        let end = Utc::now();
        let mut start = window.started_at();
        let mut samples = Vec::new();

        while start < end {
            let slice_end = (start + Duration::seconds(MAX_POINTS_PER_QUERY - 1)).min(end);
            let response = self
                .client
                .query_range(&expr, start, slice_end, "1s")
                .await?;
            for series in response.series() {
                samples.extend(series.range_values());
            }
            start = slice_end + Duration::seconds(1);
        }

        debug!(
            samples = samples.len(),
            transitions = continuity::count_transitions(&samples),
            "Counted Watchdog indicator transitions"
        );
        Ok(continuity::has_gap(&samples))
    }

    /// No non-info alert should have fired during the window.
    pub async fn check_firing(
        &self,
        window: &TestWindow,
        mut violations: Violations,
    ) -> Result<Violations> {
        let query = firing_query(&window.promql_duration());
        let response = self.client.run_query(&query).await?;
        for series in response.series() {
            let (violation, classification) = self.policy.classify_firing(series);
            violations.record(violation, classification);
        }
        Ok(violations)
    }

    /// No non-info alert should be pending after the run.
    pub async fn check_pending(&self, mut violations: Violations) -> Result<Violations> {
        let response = self.client.run_query(&pending_query()).await?;
        for series in response.series() {
            let (violation, classification) = self.policy.classify_pending(series);
            violations.record(violation, classification);
        }
        Ok(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(pairs: &[(&str, &str)], value: &str) -> Sample {
        Sample {
            metric: pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            value: Some((1_700_000_000.0, value.to_string())),
            values: None,
        }
    }

    #[test]
    fn test_unmatched_firing_is_unexpected() {
        let policy = AlertPolicy::openshift();
        let (violation, class) = policy.classify_firing(&sample(
            &[
                ("alertname", "KubePodCrashLooping"),
                ("alertstate", "firing"),
                ("namespace", "e2e-test"),
                ("severity", "warning"),
            ],
            "17",
        ));
        assert_eq!(
            violation,
            r#"alert KubePodCrashLooping fired for 17 seconds with labels: {namespace="e2e-test", severity="warning"}"#
        );
        assert_eq!(class, Classification::Unexpected);
    }

    #[test]
    fn test_tracked_firing_is_known() {
        let policy = AlertPolicy::openshift();
        let (_, class) = policy.classify_firing(&sample(
            &[
                ("alertname", "AggregatedAPIDown"),
                ("name", "v1alpha1.wardle.example.com"),
                ("severity", "warning"),
            ],
            "60",
        ));
        assert_eq!(
            class,
            Classification::Known {
                cause: "https://bugzilla.redhat.com/show_bug.cgi?id=1933144".into()
            }
        );
    }

    #[test]
    fn test_allowed_pending() {
        let policy = AlertPolicy::openshift();
        let (violation, class) = policy.classify_pending(&sample(
            &[("alertname", "HighOverallControlPlaneCPU"), ("severity", "warning")],
            "1",
        ));
        assert!(violation.contains("pending for 1 seconds"));
        assert!(matches!(class, Classification::AllowedPending { .. }));
    }

    #[test]
    fn test_allow_list_checked_before_bugs() {
        let condition = MetricCondition::new([("alertname", "X")], "tracked");
        let policy = AlertPolicy {
            pending_with_bugs: [condition.clone()].into_iter().collect(),
            allowed_pending: [condition].into_iter().collect(),
            ..AlertPolicy::default()
        };
        let (_, class) = policy.classify_pending(&sample(&[("alertname", "X")], "1"));
        assert!(matches!(class, Classification::AllowedPending { .. }));
    }

    #[test]
    fn test_unmatched_pending_is_flaky() {
        let policy = AlertPolicy::openshift();
        let (_, class) = policy.classify_pending(&sample(&[("alertname", "etcdHighFsyncDurations")], "1"));
        assert_eq!(class, Classification::Flaky);
    }

    #[test]
    fn test_queries() {
        assert_eq!(
            firing_query("120s"),
            r#"sort_desc(count_over_time(ALERTS{alertstate="firing",severity!="info",alertname!~"Watchdog|AlertmanagerReceiversNotConfigured"}[120s:1s])) > 0"#
        );
        assert_eq!(
            pending_query(),
            r#"ALERTS{alertname!~"Watchdog|AlertmanagerReceiversNotConfigured",alertstate="pending",severity!="info"}"#
        );
    }
}
