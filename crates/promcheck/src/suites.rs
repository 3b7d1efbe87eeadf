//! Built-in declarative query suites for OpenShift monitoring.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::PromCheckError;
use crate::targets::TargetExpectation;
use crate::window::TestWindow;

/// Named query suites
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinSuite {
    /// Series sent via telemetry stay below the limit
    TelemetrySeriesLimit,
    /// Telemetry client federates and sends
    TelemetryReporting,
    /// AlertmanagerReceiversNotConfigured fires on a fresh cluster
    ReceiversNotConfigured,
    /// Platform topology metrics exist
    TopologyMetrics,
    /// Non-pod cAdvisor metrics exist
    Cadvisor,
    /// No rule evaluation failures over the window
    RuleEvaluation,
    /// Nothing fires early apart from the always-on alerts
    EarlyFiringAlerts,
    /// Router exposes its metrics
    IngressMetrics,
    /// openshift-sdn exposes OVS flow metrics
    SdnOvsFlows,
}

impl BuiltinSuite {
    pub const ALL: [Self; 9] = [
        Self::TelemetrySeriesLimit,
        Self::TelemetryReporting,
        Self::ReceiversNotConfigured,
        Self::TopologyMetrics,
        Self::Cadvisor,
        Self::RuleEvaluation,
        Self::EarlyFiringAlerts,
        Self::IngressMetrics,
        Self::SdnOvsFlows,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::TelemetrySeriesLimit => "telemetry-series-limit",
            Self::TelemetryReporting => "telemetry-reporting",
            Self::ReceiversNotConfigured => "receivers-not-configured",
            Self::TopologyMetrics => "topology-metrics",
            Self::Cadvisor => "cadvisor",
            Self::RuleEvaluation => "rule-evaluation",
            Self::EarlyFiringAlerts => "early-firing-alerts",
            Self::IngressMetrics => "ingress-metrics",
            Self::SdnOvsFlows => "sdn-ovs-flows",
        }
    }

    /// Query map of the suite, rendered for `window`.
    #[must_use]
    pub fn queries(self, window: &TestWindow) -> BTreeMap<String, bool> {
        let w = window.promql_duration();
        let entries: Vec<(String, bool)> = match self {
            Self::TelemetrySeriesLimit => vec![
                (
                    format!("avg_over_time(cluster:telemetry_selected_series:count[{w}]) >= 600"),
                    false,
                ),
                (
                    format!("max_over_time(cluster:telemetry_selected_series:count[{w}]) >= 1200"),
                    false,
                ),
            ],
            Self::TelemetryReporting => vec![
                (
                    r#"metricsclient_request_send{client="federate_to",job="telemeter-client",status_code="200"} >= 1"#.into(),
                    true,
                ),
                (r#"federate_samples{job="telemeter-client"} >= 10"#.into(), true),
            ],
            Self::ReceiversNotConfigured => vec![(
                r#"ALERTS{alertstate=~"firing|pending",alertname="AlertmanagerReceiversNotConfigured"} == 1"#.into(),
                true,
            )],
            Self::TopologyMetrics => vec![
                (r#"cluster_infrastructure_provider{type!=""}"#.into(), true),
                ("cluster_feature_set".into(), true),
                (r#"cluster_installer{type!="",invoker!=""}"#.into(), true),
                ("instance:etcd_object_counts:sum > 0".into(), true),
                (
                    r#"sum(node_role_os_version_machine:cpu_capacity_cores:sum{label_kubernetes_io_arch!="",label_node_role_kubernetes_io_master!=""}) > 0"#.into(),
                    true,
                ),
                (
                    r#"sum(node_role_os_version_machine:cpu_capacity_sockets:sum{label_kubernetes_io_arch!="",label_node_hyperthread_enabled!="",label_node_role_kubernetes_io_master!=""}) > 0"#.into(),
                    true,
                ),
            ],
            Self::Cadvisor => vec![(
                r#"container_cpu_usage_seconds_total{id!~"/kubepods.slice/.*"} >= 1"#.into(),
                true,
            )],
            Self::RuleEvaluation => vec![(
                format!("increase(prometheus_rule_evaluation_failures_total[{w}]) >= 1"),
                false,
            )],
            Self::EarlyFiringAlerts => vec![(
                r#"ALERTS{alertname!~"Watchdog|AlertmanagerReceiversNotConfigured|PrometheusRemoteWriteDesiredShards",alertstate="firing",severity!="info"} >= 1"#.into(),
                false,
            )],
            Self::IngressMetrics => vec![
                (
                    r#"template_router_reload_seconds_count{job="router-internal-default"} >= 1"#.into(),
                    true,
                ),
                (r#"haproxy_server_up{job="router-internal-default"} >= 1"#.into(), true),
            ],
            Self::SdnOvsFlows => vec![("openshift_sdn_ovs_flows >= 1".into(), true)],
        };
        entries.into_iter().collect()
    }

    /// How long to wait for [`Self::required_targets`]. The router can take
    /// several minutes to be scraped after an ingress rollout.
    #[must_use]
    pub fn required_targets_timeout(self) -> Duration {
        match self {
            Self::IngressMetrics => Duration::from_secs(240),
            _ => Duration::from_secs(120),
        }
    }

    /// Scrape targets that must be up before the queries run.
    #[must_use]
    pub fn required_targets(self) -> Vec<TargetExpectation> {
        match self {
            Self::IngressMetrics => vec![TargetExpectation::up(
                [("job", "router-internal-default")],
                "^https://.*/metrics$",
            )],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for BuiltinSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BuiltinSuite {
    type Err = PromCheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|suite| suite.name() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|s| s.name()).collect();
                PromCheckError::Config(format!(
                    "unknown suite {s:?}, expected one of: {}",
                    known.join(", ")
                ))
            })
    }
}

/// Control plane and platform targets every cluster must expose securely.
#[must_use]
pub fn control_plane_targets() -> Vec<TargetExpectation> {
    const METRICS: &str = "^https://.*/metrics$";
    vec![
        TargetExpectation::up([("job", "api")], METRICS),
        TargetExpectation::up([("job", "controller-manager")], METRICS),
        TargetExpectation::up([("job", "apiserver")], METRICS),
        TargetExpectation::up([("job", "kube-controller-manager")], METRICS),
        TargetExpectation::up([("job", "scheduler")], METRICS),
        TargetExpectation::up([("job", "kube-state-metrics")], METRICS),
        TargetExpectation::up([("job", "cluster-version-operator")], METRICS),
    ]
}

/// Monitoring stack targets, present on every platform.
#[must_use]
pub fn monitoring_targets() -> Vec<TargetExpectation> {
    const METRICS: &str = "^https://.*/metrics$";
    vec![
        TargetExpectation::up(
            [
                ("job", "prometheus-k8s"),
                ("namespace", "openshift-monitoring"),
                ("pod", "prometheus-k8s-0"),
            ],
            METRICS,
        ),
        TargetExpectation::up([("job", "kubelet")], METRICS),
        TargetExpectation::up([("job", "kubelet")], "^https://.*/metrics/cadvisor$"),
        TargetExpectation::up([("job", "node-exporter")], METRICS),
        TargetExpectation::up([("job", "prometheus-operator")], METRICS),
        TargetExpectation::up([("job", "alertmanager-main")], METRICS),
        TargetExpectation::up([("job", "crio")], "^http://.*/metrics$"),
    ]
}

/// Jobs known to expose metrics without TLS.
pub const INSECURE_JOB_EXCLUSIONS: &[&str] = &["crio", "ovnkube-master", "ovnkube-node"];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for suite in BuiltinSuite::ALL {
            assert_eq!(suite.name().parse::<BuiltinSuite>().unwrap(), suite);
        }
    }

    #[test]
    fn test_unknown_suite() {
        let err = "nope".parse::<BuiltinSuite>().unwrap_err();
        assert!(err.to_string().contains("telemetry-series-limit"));
    }

    #[test]
    fn test_windowed_suite_is_rendered() {
        let window = TestWindow::last(chrono::Duration::seconds(300));
        let queries = BuiltinSuite::RuleEvaluation.queries(&window);
        let (query, expected) = queries.iter().next().unwrap();
        assert!(query.starts_with("increase(prometheus_rule_evaluation_failures_total[30"));
        assert!(!query.contains("{window}"));
        assert!(!expected);
    }

    #[test]
    fn test_every_suite_has_queries() {
        let window = TestWindow::last(chrono::Duration::seconds(60));
        for suite in BuiltinSuite::ALL {
            assert!(!suite.queries(&window).is_empty(), "{suite} is empty");
        }
    }

    #[test]
    fn test_ingress_requires_router_target() {
        assert_eq!(BuiltinSuite::IngressMetrics.required_targets().len(), 1);
        assert!(BuiltinSuite::Cadvisor.required_targets().is_empty());
        assert_eq!(
            BuiltinSuite::IngressMetrics.required_targets_timeout(),
            Duration::from_secs(240)
        );
    }
}
