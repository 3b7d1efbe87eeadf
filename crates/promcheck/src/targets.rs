//! Scrape target expectations against `/api/v1/targets`.

use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::info;

use crate::error::{PromCheckError, Result};
use crate::labels::{labels_as_selector, LabelSet, MetricCondition};
use crate::poll::{poll_immediate, Attempt};
use crate::prometheus::PrometheusClient;

/// `/api/v1/targets` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetsResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub data: TargetsData,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetsData {
    #[serde(default)]
    pub active_targets: Vec<Target>,
}

/// One active scrape target
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
    #[serde(default)]
    pub labels: LabelSet,
    /// "up", "down" or "unknown"
    #[serde(default)]
    pub health: String,
    #[serde(default)]
    pub scrape_url: String,
}

/// A target the deployment must have
#[derive(Debug, Clone)]
pub struct TargetExpectation {
    pub selector: LabelSet,
    pub health: String,
    pub scrape_url_pattern: String,
}

impl TargetExpectation {
    /// Expect an `up` target with the given labels and scrape URL pattern.
    pub fn up<'a>(
        selector: impl IntoIterator<Item = (&'a str, &'a str)>,
        scrape_url_pattern: &str,
    ) -> Self {
        Self {
            selector: MetricCondition::new(selector, "").selector,
            health: "up".to_string(),
            scrape_url_pattern: scrape_url_pattern.to_string(),
        }
    }
}

impl TargetsResponse {
    /// Decode a targets response body.
    pub fn parse(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|source| PromCheckError::Decode {
            context: "/api/v1/targets".to_string(),
            source,
        })
    }

    /// Succeeds when any active target carries the selector labels, has the
    /// given health and a scrape URL matching the pattern.
    pub fn expect(&self, expectation: &TargetExpectation) -> Result<std::result::Result<(), String>> {
        let pattern = Regex::new(&expectation.scrape_url_pattern)?;
        let selector = MetricCondition {
            selector: expectation.selector.clone(),
            text: String::new(),
        };

        let found = self.data.active_targets.iter().any(|target| {
            selector.matches(&target.labels)
                && target.health == expectation.health
                && pattern.is_match(&target.scrape_url)
        });

        if found {
            Ok(Ok(()))
        } else {
            Ok(Err(format!(
                "no match for {} with health {} and scrape URL {}",
                labels_as_selector(&expectation.selector),
                expectation.health,
                expectation.scrape_url_pattern
            )))
        }
    }

    /// Misses among `expectations`, in order.
    pub fn missing(&self, expectations: &[TargetExpectation]) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for expectation in expectations {
            if let Err(miss) = self.expect(expectation)? {
                missing.push(miss);
            }
        }
        Ok(missing)
    }

    /// Jobs scraped over plain HTTP, skipping `exclude_jobs`.
    #[must_use]
    pub fn insecure_targets(&self, exclude_jobs: &[&str]) -> Vec<String> {
        self.data
            .active_targets
            .iter()
            .filter(|t| {
                let job = t.labels.get("job").map_or("", String::as_str);
                !exclude_jobs.contains(&job) && !t.scrape_url.starts_with("https://")
            })
            .map(|t| {
                format!(
                    "following target does not secure metrics endpoint: {}",
                    t.labels.get("job").map_or("", String::as_str)
                )
            })
            .collect()
    }
}

/// Fetch the active targets of the Prometheus at `prometheus_url`.
pub async fn fetch_targets(client: &PrometheusClient) -> Result<TargetsResponse> {
    let url = format!(
        "{}/api/v1/targets",
        client.config().prometheus_url.trim_end_matches('/')
    );
    let body = client.fetch(&url).await?;
    TargetsResponse::parse(&body)
}

/// Poll until every expectation has a matching target, for at most the
/// configured poll timeout.
///
/// On timeout the misses of the last poll are reported.
pub async fn wait_for_targets(
    client: &PrometheusClient,
    expectations: &[TargetExpectation],
) -> Result<()> {
    wait_for_targets_within(client, expectations, client.config().poll_timeout).await
}

/// Like [`wait_for_targets`], with an explicit timeout.
pub async fn wait_for_targets_within(
    client: &PrometheusClient,
    expectations: &[TargetExpectation],
    timeout: Duration,
) -> Result<()> {
    poll_immediate(
        client.config().poll_interval,
        timeout,
        "expected scrape targets",
        || async move {
            let targets = fetch_targets(client).await?;
            let missing = targets.missing(expectations)?;
            if missing.is_empty() {
                Ok(Attempt::Done(()))
            } else {
                info!("missing some targets: {missing:?}");
                Ok(Attempt::Retry(missing.join("; ")))
            }
        },
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGETS: &str = r#"{
        "status": "success",
        "data": {
            "activeTargets": [
                {
                    "labels": {"job": "apiserver", "namespace": "default"},
                    "health": "up",
                    "scrapeUrl": "https://10.0.0.1:6443/metrics"
                },
                {
                    "labels": {"job": "kubelet"},
                    "health": "up",
                    "scrapeUrl": "https://10.0.0.2:10250/metrics/cadvisor"
                },
                {
                    "labels": {"job": "crio"},
                    "health": "up",
                    "scrapeUrl": "http://10.0.0.2:9537/metrics"
                },
                {
                    "labels": {"job": "node-exporter"},
                    "health": "down",
                    "scrapeUrl": "https://10.0.0.3:9100/metrics"
                },
                {
                    "labels": {"job": "legacy"},
                    "health": "up",
                    "scrapeUrl": "http://10.0.0.4:8080/metrics"
                }
            ]
        }
    }"#;

    #[test]
    fn test_expect_matches_subset_health_and_url() {
        let targets = TargetsResponse::parse(TARGETS).unwrap();
        let ok = TargetExpectation::up([("job", "apiserver")], "^https://.*/metrics$");
        assert!(targets.expect(&ok).unwrap().is_ok());

        let cadvisor = TargetExpectation::up([("job", "kubelet")], "^https://.*/metrics/cadvisor$");
        assert!(targets.expect(&cadvisor).unwrap().is_ok());
    }

    #[test]
    fn test_expect_reports_unhealthy_target() {
        let targets = TargetsResponse::parse(TARGETS).unwrap();
        let down = TargetExpectation::up([("job", "node-exporter")], "^https://.*/metrics$");
        let miss = targets.expect(&down).unwrap().unwrap_err();
        assert_eq!(
            miss,
            r#"no match for {job="node-exporter"} with health up and scrape URL ^https://.*/metrics$"#
        );
    }

    #[test]
    fn test_missing_collects_all_misses() {
        let targets = TargetsResponse::parse(TARGETS).unwrap();
        let missing = targets
            .missing(&[
                TargetExpectation::up([("job", "apiserver")], "^https://.*/metrics$"),
                TargetExpectation::up([("job", "scheduler")], "^https://.*/metrics$"),
                TargetExpectation::up([("job", "crio")], "^https://.*/metrics$"),
            ])
            .unwrap();
        assert_eq!(missing.len(), 2);
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let targets = TargetsResponse::parse(TARGETS).unwrap();
        let bad = TargetExpectation::up([("job", "apiserver")], "^https://(");
        assert!(matches!(targets.expect(&bad), Err(PromCheckError::Regex(_))));
    }

    #[test]
    fn test_insecure_targets_honours_exclusions() {
        let targets = TargetsResponse::parse(TARGETS).unwrap();
        let insecure = targets.insecure_targets(&["crio"]);
        assert_eq!(
            insecure,
            vec!["following target does not secure metrics endpoint: legacy".to_string()]
        );
    }
}
