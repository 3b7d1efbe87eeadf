//! Runtime configuration and the YAML suite-file format.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::alerts::AlertPolicy;
use crate::error::{PromCheckError, Result};
use crate::window::TestWindow;

/// Default querier URL (aggregates all Prometheus replicas)
pub const DEFAULT_QUERIER_URL: &str = "https://thanos-querier.openshift-monitoring.svc:9091";

/// Default URL of a single Prometheus replica (targets, self-metrics)
pub const DEFAULT_PROMETHEUS_URL: &str = "https://prometheus-k8s.openshift-monitoring.svc:9091";

/// Placeholder substituted with the test window in suite queries
pub const WINDOW_PLACEHOLDER: &str = "{window}";

/// Configuration for a verification run
#[derive(Debug, Clone)]
pub struct PromCheckConfig {
    /// Base URL used for PromQL queries
    pub base_url: String,
    /// Base URL of a single Prometheus, for `/api/v1/targets` and `/metrics`
    pub prometheus_url: String,
    /// Bearer credential, passed through untouched
    pub bearer_token: String,
    /// Per-request timeout in seconds (direct HTTP transport only)
    pub timeout_secs: u64,
    /// Skip TLS verification (in-cluster service certificates)
    pub insecure: bool,
    /// Passes over a query map before giving up
    pub max_attempts: u32,
    /// Sleep between passes over a query map
    pub retry_interval: Duration,
    /// Interval of bounded polling loops
    pub poll_interval: Duration,
    /// Upper bound of bounded polling loops
    pub poll_timeout: Duration,
}

impl Default for PromCheckConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("PROMETHEUS_URL")
                .unwrap_or_else(|_| DEFAULT_QUERIER_URL.to_string()),
            prometheus_url: std::env::var("PROMETHEUS_DIRECT_URL")
                .unwrap_or_else(|_| DEFAULT_PROMETHEUS_URL.to_string()),
            bearer_token: std::env::var("PROMCHECK_TOKEN").unwrap_or_default(),
            timeout_secs: 30,
            insecure: true,
            max_attempts: 5,
            retry_interval: Duration::from_secs(10),
            poll_interval: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(120),
        }
    }
}

impl PromCheckConfig {
    /// Check the configuration before any request goes out.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(PromCheckError::Config("query URL is empty".into()));
        }
        if self.max_attempts == 0 {
            return Err(PromCheckError::Config(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(PromCheckError::Config(
                "poll_interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// One entry of a suite file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryCheck {
    /// PromQL expression, may contain `{window}`
    pub query: String,
    /// `true` if the query must return at least one series
    pub expect: bool,
}

/// A declarative suite loaded from YAML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteFile {
    /// Plain query assertions
    #[serde(default)]
    pub queries: Vec<QueryCheck>,
    /// Alert classification policy; the alert evaluation runs when present
    #[serde(default)]
    pub alerts: Option<AlertPolicy>,
}

impl SuiteFile {
    /// Load a suite from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let suite = Self::from_yaml(&content)?;
        debug!(
            path = %path.display(),
            queries = suite.queries.len(),
            alerts = suite.alerts.is_some(),
            "Loaded suite file"
        );
        Ok(suite)
    }

    /// Parse a suite from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Render the query map, substituting the test window.
    #[must_use]
    pub fn render(&self, window: &TestWindow) -> BTreeMap<String, bool> {
        let duration = window.promql_duration();
        self.queries
            .iter()
            .map(|check| {
                (
                    check.query.replace(WINDOW_PLACEHOLDER, &duration),
                    check.expect,
                )
            })
            .collect()
    }
}
