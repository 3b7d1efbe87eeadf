//! Prometheus HTTP API client.
//!
//! Provides:
//! - instant and range queries, decoded into [`QueryResponse`]
//! - `run_query`: one instant query, non-success status is an error
//! - `run_queries`: a `query -> expected outcome` map, retried for a bounded
//!   number of passes and reported as one aggregated error

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PromCheckConfig;
use crate::error::{PromCheckError, Result};
use crate::labels::LabelSet;
use crate::transport::{HttpTransport, Transport};

/// Prometheus query response envelope
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueryResponse {
    /// "success" or "error"
    pub status: String,
    #[serde(default)]
    pub data: QueryData,
    #[serde(rename = "errorType", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// Result series of the response.
    #[must_use]
    pub fn series(&self) -> &[Sample] {
        &self.data.result
    }
}

/// Vector or matrix result of a query.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QueryData {
    #[serde(rename = "resultType", default)]
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<Sample>,
}

/// One result series
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Sample {
    /// Labels identifying the series
    #[serde(default)]
    pub metric: LabelSet,
    /// Instant value as `[timestamp, "value"]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<(f64, String)>,
    /// Range values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<(f64, String)>>,
}

impl Sample {
    /// Value of a label, or "" when absent.
    #[must_use]
    pub fn label(&self, name: &str) -> &str {
        self.metric.get(name).map_or("", String::as_str)
    }

    /// Instant value exactly as the backend rendered it.
    #[must_use]
    pub fn value_str(&self) -> &str {
        self.value.as_ref().map_or("", |(_, v)| v.as_str())
    }

    /// Range values parsed as floats; unparseable points are skipped.
    #[must_use]
    pub fn range_values(&self) -> Vec<f64> {
        self.values
            .iter()
            .flatten()
            .filter_map(|(_, v)| v.parse().ok())
            .collect()
    }
}

/// Prometheus client over an arbitrary [`Transport`]
#[derive(Clone)]
pub struct PrometheusClient {
    config: PromCheckConfig,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for PrometheusClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusClient")
            .field("base_url", &self.config.base_url)
            .field("prometheus_url", &self.config.prometheus_url)
            .finish_non_exhaustive()
    }
}

impl PrometheusClient {
    /// Create a client that sends requests through `transport`.
    #[must_use]
    pub fn new(config: PromCheckConfig, transport: Arc<dyn Transport>) -> Self {
        Self { config, transport }
    }

    /// Create a client using direct HTTP.
    pub fn with_config(config: PromCheckConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::new(config, Arc::new(transport)))
    }

    #[must_use]
    pub fn config(&self) -> &PromCheckConfig {
        &self.config
    }

    fn bearer(&self) -> Option<&str> {
        let token = self.config.bearer_token.as_str();
        (!token.is_empty()).then_some(token)
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    /// Fetch an arbitrary URL with the configured bearer token.
    pub async fn fetch(&self, url: &str) -> Result<String> {
        self.transport.get(url, self.bearer()).await
    }

    /// Fetch a URL without credentials.
    pub async fn fetch_anonymous(&self, url: &str) -> Result<String> {
        self.transport.get(url, None).await
    }

    /// HTTP status of a GET, optionally authenticated.
    pub async fn status_code(&self, url: &str, authenticated: bool) -> Result<u16> {
        let bearer = if authenticated { self.bearer() } else { None };
        self.transport.status_code(url, bearer).await
    }

    /// Execute an instant query and decode the envelope without judging it.
    ///
    /// Transport and decode failures are returned as errors; a `status` of
    /// "error" is returned as a response.
    pub async fn query(&self, query: &str) -> Result<QueryResponse> {
        let url = format!(
            "{}?query={}",
            self.api_url("/api/v1/query"),
            urlencoding::encode(query)
        );

        debug!(query = %query, "Executing Prometheus query");

        let body = self
            .fetch(&url)
            .await
            .map_err(|e| PromCheckError::Transport {
                query: query.to_string(),
                message: e.to_string(),
            })?;
        decode(query, &body)
    }

    /// Execute one instant query; a non-success status is an error.
    pub async fn run_query(&self, query: &str) -> Result<QueryResponse> {
        let response = self.query(query).await?;
        ensure_success(query, response)
    }

    /// Execute a range query.
    pub async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: &str,
    ) -> Result<QueryResponse> {
        let url = format!(
            "{}?query={}&start={}&end={}&step={}",
            self.api_url("/api/v1/query_range"),
            urlencoding::encode(query),
            start.timestamp(),
            end.timestamp(),
            urlencoding::encode(step),
        );

        debug!(
            query = %query,
            start = %start,
            end = %end,
            step = %step,
            "Executing Prometheus range query"
        );

        let body = self
            .fetch(&url)
            .await
            .map_err(|e| PromCheckError::Transport {
                query: query.to_string(),
                message: e.to_string(),
            })?;
        ensure_success(query, decode(query, &body)?)
    }

    /// Assert that every query returns results (`true`) or none (`false`).
    ///
    /// Each pass re-issues only the queries that have not passed yet; up to
    /// `max_attempts` passes are made, `retry_interval` apart. Mismatches are
    /// collected rather than failing fast, and the last observed mismatch of
    /// every query still failing is returned in one
    /// [`PromCheckError::Mismatch`]. Transport and decode failures abort.
    pub async fn run_queries(&self, queries: &BTreeMap<String, bool>) -> Result<()> {
        let mut errors: BTreeMap<&str, String> = BTreeMap::new();
        let mut passed: BTreeSet<&str> = BTreeSet::new();
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            for (query, &expected) in queries {
                if passed.contains(query.as_str()) {
                    continue;
                }

                info!(query = %query, "perform prometheus metric query");
                let response = self.query(query).await?;
                let series = response.series();

                if !response.is_success() || series.is_empty() == expected {
                    let msg = unexpected_results(query, series);
                    if errors.get(query.as_str()) != Some(&msg) {
                        info!("{msg}");
                    }
                    errors.insert(query.as_str(), msg);
                    continue;
                }

                passed.insert(query.as_str());
                errors.remove(query.as_str());
            }

            if errors.is_empty() {
                return Ok(());
            }
            if attempt < max_attempts {
                debug!(
                    "{} queries still failing (attempt {attempt}/{max_attempts}). Retrying in {:?}...",
                    errors.len(),
                    self.config.retry_interval
                );
                tokio::time::sleep(self.config.retry_interval).await;
            }
        }

        Err(PromCheckError::Mismatch {
            failures: errors
                .into_iter()
                .map(|(query, msg)| format!("query failed: {query}: {msg}"))
                .collect(),
        })
    }
}

fn decode(query: &str, body: &str) -> Result<QueryResponse> {
    serde_json::from_str(body).map_err(|source| PromCheckError::Decode {
        context: query.to_string(),
        source,
    })
}

fn ensure_success(query: &str, response: QueryResponse) -> Result<QueryResponse> {
    if response.is_success() {
        return Ok(response);
    }
    Err(PromCheckError::BackendStatus {
        query: query.to_string(),
        data: series_json(response.series()),
    })
}

fn unexpected_results(query: &str, series: &[Sample]) -> String {
    format!(
        "promQL query returned unexpected results:\n{query}\n{}",
        series_json(series)
    )
}

fn series_json(series: &[Sample]) -> String {
    serde_json::to_string(series).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VECTOR: &str = r#"{
        "status": "success",
        "data": {
            "resultType": "vector",
            "result": [
                {
                    "metric": {"alertname": "KubeJobFailed", "severity": "warning"},
                    "value": [1700000000.123, "42"]
                }
            ]
        }
    }"#;

    #[test]
    fn test_decode_vector() {
        let response = decode("q", VECTOR).unwrap();
        assert!(response.is_success());
        let sample = &response.series()[0];
        assert_eq!(sample.label("alertname"), "KubeJobFailed");
        assert_eq!(sample.label("missing"), "");
        assert_eq!(sample.value_str(), "42");
    }

    #[test]
    fn test_decode_error_envelope() {
        let body = r#"{"status":"error","errorType":"bad_data","error":"parse error"}"#;
        let response = decode("q", body).unwrap();
        assert!(!response.is_success());
        assert!(response.series().is_empty());
        assert_eq!(response.error.as_deref(), Some("parse error"));
        assert!(matches!(
            ensure_success("q", response),
            Err(PromCheckError::BackendStatus { .. })
        ));
    }

    #[test]
    fn test_decode_garbage_is_decode_error() {
        let err = decode("q", "<html>403 Forbidden</html>").unwrap_err();
        assert!(matches!(err, PromCheckError::Decode { .. }));
        assert!(!err.is_violation());
    }

    #[test]
    fn test_range_values() {
        let sample = Sample {
            values: Some(vec![
                (1.0, "0".into()),
                (2.0, "1".into()),
                (3.0, "NaN?".into()),
            ]),
            ..Sample::default()
        };
        assert_eq!(sample.range_values(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_unexpected_results_message() {
        let msg = unexpected_results("up == 0", &[]);
        assert_eq!(msg, "promQL query returned unexpected results:\nup == 0\n[]");
    }

    #[test]
    fn test_client_creation() {
        let client = PrometheusClient::with_config(PromCheckConfig::default()).unwrap();
        assert!(!client.config().base_url.is_empty());
    }
}
