//! Alerting and metrics-exposure assertions against a running Prometheus.
//!
//! `promcheck` issues PromQL queries against a Prometheus (or Thanos querier)
//! and asserts on the shape of the result:
//!
//! - declarative `query -> expected outcome` maps, retried for a bounded
//!   number of passes ([`prometheus::PrometheusClient::run_queries`])
//! - alert series classified against ordered known-bug and allow-list
//!   conditions ([`alerts::AlertEvaluator`])
//! - Watchdog continuity over the test window ([`continuity`])
//! - scrape target expectations ([`targets`]) and Prometheus self-metrics
//!   ([`exposition`])
//!
//! How a request physically reaches the backend is hidden behind
//! [`transport::Transport`]: either a direct HTTP client or a `kubectl exec`
//! relay through a pod on the cluster network.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::collections::BTreeMap;
//! use promcheck::{PrometheusClient, PromCheckConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = PrometheusClient::with_config(PromCheckConfig::default())?;
//!
//!     let mut checks = BTreeMap::new();
//!     checks.insert(r#"up{job="apiserver"} == 1"#.to_string(), true);
//!     client.run_queries(&checks).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod alerts;
pub mod config;
pub mod continuity;
pub mod error;
pub mod exposition;
pub mod labels;
pub mod poll;
pub mod prometheus;
pub mod suites;
pub mod targets;
pub mod transport;
pub mod violations;
pub mod window;

pub use alerts::{AlertEvaluator, AlertPolicy};
pub use config::{PromCheckConfig, SuiteFile};
pub use error::{PromCheckError, Result};
pub use labels::{LabelSet, MetricCondition, MetricConditions};
pub use prometheus::{PrometheusClient, QueryResponse, Sample};
pub use transport::{ExecTransport, HttpTransport, Transport};
pub use violations::{Classification, Verdict, Violations};
pub use window::TestWindow;
