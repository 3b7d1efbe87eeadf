//! promcheck CLI
//!
//! Runs alerting and metrics-exposure assertions against a Prometheus
//! deployment, either directly or relayed through a pod with `kubectl exec`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use promcheck::alerts::{AlertEvaluator, AlertPolicy, VERSION_SKEW_ENV, VERSION_SKEW_REASON};
use promcheck::config::{PromCheckConfig, SuiteFile, DEFAULT_PROMETHEUS_URL, DEFAULT_QUERIER_URL};
use promcheck::suites::{self, BuiltinSuite, INSECURE_JOB_EXCLUSIONS};
use promcheck::{exposition, targets};
use promcheck::{ExecTransport, HttpTransport, PrometheusClient, TestWindow, Transport, Verdict};

/// Exit code when a check could not be carried out at all
const EXIT_UNABLE_TO_VERIFY: i32 = 3;

/// Alerting and metrics-exposure assertions against a running Prometheus
#[derive(Parser)]
#[command(name = "promcheck")]
#[command(about = "Alerting and metrics-exposure assertions against a running Prometheus")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Querier URL used for PromQL queries
    #[arg(long, env = "PROMETHEUS_URL", default_value = DEFAULT_QUERIER_URL, global = true)]
    url: String,

    /// URL of a single Prometheus (targets, /metrics)
    #[arg(long, env = "PROMETHEUS_DIRECT_URL", default_value = DEFAULT_PROMETHEUS_URL, global = true)]
    prometheus_url: String,

    /// Bearer token sent with every authenticated request
    #[arg(long, env = "PROMCHECK_TOKEN", default_value = "", hide_env_values = true, global = true)]
    token: String,

    /// Namespace of the pod used to relay requests
    #[arg(long, default_value = "default", global = true)]
    exec_namespace: String,

    /// Relay requests through `kubectl exec` into this pod
    #[arg(long, global = true)]
    exec_pod: Option<String>,

    /// kubectl-compatible binary used for the relay
    #[arg(long, default_value = "kubectl", global = true)]
    kubectl: String,

    /// Verify TLS certificates (direct transport only)
    #[arg(long, global = true)]
    verify_tls: bool,

    /// Start of the run under test: RFC 3339 timestamp or 90s/45m/2h
    #[arg(long, default_value = "1h", global = true)]
    since: String,

    /// Passes over a query map before giving up
    #[arg(long, default_value = "5", global = true)]
    max_attempts: u32,

    /// Seconds between passes over a query map
    #[arg(long, default_value = "10", global = true)]
    retry_interval: u64,

    /// Upper bound in seconds for target and self-metric polling
    #[arg(long, default_value = "120", global = true)]
    poll_timeout: u64,

    /// Exit non-zero on flakes
    #[arg(long, global = true)]
    strict_flakes: bool,

    /// Skip the alert checks; set when cluster components run skewed versions
    #[arg(long, env = VERSION_SKEW_ENV, hide = true, global = true)]
    allow_version_skew: Option<String>,

    /// Output format (json or text)
    #[arg(long, default_value = "text", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    Json,
    #[default]
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// No unexpected alerts fired or pending, and no gaps in Watchdog
    Alerts {
        /// YAML file whose `alerts` section replaces the built-in policy
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Count Watchdog transitions client side (no subquery support)
        #[arg(long)]
        local_continuity: bool,
    },
    /// Run the queries (and optional alert policy) of a suite file
    Queries {
        /// Path to the suite YAML
        #[arg(long)]
        file: PathBuf,
    },
    /// Run a built-in suite
    Suite {
        /// Suite name (see `list-suites`)
        name: String,
    },
    /// List built-in suites
    ListSuites,
    /// Expected scrape targets are up and scraped over TLS
    Targets {
        /// Skip control plane targets (hosted control planes)
        #[arg(long)]
        skip_control_plane: bool,
    },
    /// Prometheus reports appended samples on its own /metrics
    SelfMetrics,
    /// The proxy rejects anonymous requests and accepts the bearer token
    SecuredProxy,
}

/// Result of one check
#[derive(Debug, Serialize)]
struct Report {
    check: String,
    #[serde(flatten)]
    verdict: Verdict,
}

/// Emitted instead of a [`Report`] when a check could not be carried out
#[derive(Serialize)]
struct ErrorReport {
    check: String,
    verdict: &'static str,
    message: String,
}

impl ErrorReport {
    fn new(check: String, error: &anyhow::Error) -> Self {
        Self {
            check,
            verdict: "error",
            message: format!("{error:#}"),
        }
    }
}

impl Commands {
    /// Name of the check, as shown in reports.
    fn check_name(&self) -> String {
        match self {
            Self::Alerts { .. } => "alerts".into(),
            Self::Queries { file } => file.display().to_string(),
            Self::Suite { name } => name.clone(),
            Self::ListSuites => "list-suites".into(),
            Self::Targets { .. } => "targets".into(),
            Self::SelfMetrics => "self-metrics".into(),
            Self::SecuredProxy => "secured-proxy".into(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("promcheck=debug")
        } else {
            EnvFilter::new("promcheck=info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if matches!(cli.command, Commands::ListSuites) {
        for suite in BuiltinSuite::ALL {
            println!("{suite}");
        }
        return Ok(());
    }

    let report = match run(&cli).await {
        Ok(report) => report,
        Err(e) => {
            output_error(&ErrorReport::new(cli.command.check_name(), &e), cli.format)?;
            std::process::exit(EXIT_UNABLE_TO_VERIFY);
        }
    };

    output_report(&report, cli.format)?;

    let code = match &report.verdict {
        Verdict::Fail { .. } => 1,
        Verdict::Flake { .. } if cli.strict_flakes => 2,
        _ => 0,
    };
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Build the client and run the selected check. Any error means the check
/// could not be carried out.
async fn run(cli: &Cli) -> Result<Report> {
    let config = PromCheckConfig {
        base_url: cli.url.clone(),
        prometheus_url: cli.prometheus_url.clone(),
        bearer_token: cli.token.clone(),
        insecure: !cli.verify_tls,
        max_attempts: cli.max_attempts,
        retry_interval: Duration::from_secs(cli.retry_interval),
        poll_timeout: Duration::from_secs(cli.poll_timeout),
        ..PromCheckConfig::default()
    };
    config.validate().context("Invalid configuration")?;

    let transport: Arc<dyn Transport> = match &cli.exec_pod {
        Some(pod) => Arc::new(
            ExecTransport::new(&cli.exec_namespace, pod).with_kubectl(&cli.kubectl),
        ),
        None => Arc::new(HttpTransport::new(&config).context("Failed to create HTTP client")?),
    };
    let client = PrometheusClient::new(config, transport);
    let window = TestWindow::parse(&cli.since).context("Invalid --since")?;

    let skip_reason = cli
        .allow_version_skew
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(|_| VERSION_SKEW_REASON.to_string());

    match &cli.command {
        Commands::Alerts {
            policy,
            local_continuity,
        } => {
            run_alerts(
                &client,
                &window,
                policy.as_deref(),
                *local_continuity,
                skip_reason,
            )
            .await
        }
        Commands::Queries { file } => run_suite_file(&client, &window, file, skip_reason).await,
        Commands::Suite { name } => run_builtin(&client, &window, name).await,
        Commands::Targets { skip_control_plane } => run_targets(&client, *skip_control_plane).await,
        Commands::SelfMetrics => run_self_metrics(&client).await,
        Commands::SecuredProxy => run_secured_proxy(&client).await,
        Commands::ListSuites => Ok(Report {
            check: cli.command.check_name(),
            verdict: Verdict::Pass,
        }),
    }
}

/// Turn a library result into a verdict; failing properties become
/// `Fail`, anything else stays an error.
fn verdict_of(result: promcheck::Result<()>) -> Result<Verdict> {
    match result {
        Ok(()) => Ok(Verdict::Pass),
        Err(e) if e.is_violation() => Ok(Verdict::Fail {
            message: e.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

async fn run_alerts(
    client: &PrometheusClient,
    window: &TestWindow,
    policy_file: Option<&std::path::Path>,
    local_continuity: bool,
    skip_reason: Option<String>,
) -> Result<Report> {
    let mut policy = match policy_file {
        Some(path) => SuiteFile::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?
            .alerts
            .unwrap_or_default(),
        None => AlertPolicy::openshift(),
    };
    policy.local_continuity |= local_continuity;
    policy.skip_reason = skip_reason;

    let verdict = AlertEvaluator::new(client, policy)
        .evaluate(window)
        .await
        .context("unable to check alerts over test window")?;
    Ok(Report {
        check: "alerts".into(),
        verdict,
    })
}

async fn run_suite_file(
    client: &PrometheusClient,
    window: &TestWindow,
    path: &std::path::Path,
    skip_reason: Option<String>,
) -> Result<Report> {
    let suite = SuiteFile::load(path).with_context(|| format!("Failed to load {}", path.display()))?;

    let mut verdict = verdict_of(client.run_queries(&suite.render(window)).await)?;
    if let Some(mut policy) = suite.alerts {
        policy.skip_reason = skip_reason;
        let alerts = AlertEvaluator::new(client, policy)
            .evaluate(window)
            .await
            .context("unable to check alerts over test window")?;
        verdict = verdict.and(alerts);
    }

    Ok(Report {
        check: path.display().to_string(),
        verdict,
    })
}

async fn run_builtin(client: &PrometheusClient, window: &TestWindow, name: &str) -> Result<Report> {
    let suite: BuiltinSuite = name.parse()?;

    let required = suite.required_targets();
    let verdict = if required.is_empty() {
        Verdict::Pass
    } else {
        let timeout = suite.required_targets_timeout();
        verdict_of(targets::wait_for_targets_within(client, &required, timeout).await)?
    };

    let verdict = if verdict.is_failure() {
        verdict
    } else {
        verdict_of(client.run_queries(&suite.queries(window)).await)?
    };

    Ok(Report {
        check: suite.to_string(),
        verdict,
    })
}

async fn run_targets(client: &PrometheusClient, skip_control_plane: bool) -> Result<Report> {
    let mut expected = suites::monitoring_targets();
    if !skip_control_plane {
        expected.extend(suites::control_plane_targets());
    }

    let mut verdict = verdict_of(targets::wait_for_targets(client, &expected).await)?;
    if !verdict.is_failure() {
        let insecure = targets::fetch_targets(client)
            .await?
            .insecure_targets(INSECURE_JOB_EXCLUSIONS);
        if !insecure.is_empty() {
            verdict = Verdict::Fail {
                message: format!(
                    "some services expose metrics over insecure channel:\n{}",
                    insecure.join("\n")
                ),
            };
        }
    }

    Ok(Report {
        check: "targets".into(),
        verdict,
    })
}

async fn run_self_metrics(client: &PrometheusClient) -> Result<Report> {
    let verdict = verdict_of(exposition::wait_for_samples_appended(client).await)?;
    Ok(Report {
        check: "self-metrics".into(),
        verdict,
    })
}

async fn run_secured_proxy(client: &PrometheusClient) -> Result<Report> {
    let base = client.config().base_url.trim_end_matches('/').to_string();
    let mut failures = Vec::new();

    let anonymous = client.status_code(&base, false).await?;
    if anonymous != 403 {
        failures.push(format!("last response from server was not 403: {anonymous}"));
    }

    let graph = format!("{base}/graph");
    let authenticated = client.status_code(&graph, true).await?;
    if authenticated != 200 {
        failures.push(format!("last response from server was not 200: {authenticated}"));
    }

    let verdict = if failures.is_empty() {
        Verdict::Pass
    } else {
        Verdict::Fail {
            message: failures.join("\n"),
        }
    };
    Ok(Report {
        check: "secured-proxy".into(),
        verdict,
    })
}

/// Output result in requested format
fn output_report(report: &Report, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(report)?;
            println!("{json}");
        }
        OutputFormat::Text => match &report.verdict {
            Verdict::Pass => println!("{} {}", "✓".green(), report.check),
            Verdict::Skipped { reason } => {
                println!("{} {} skipped: {reason}", "-".dimmed(), report.check);
            }
            Verdict::Flake { message } => {
                println!("{} {} flaked", "⚠️ ".yellow(), report.check);
                println!("{message}");
            }
            Verdict::Fail { message } => {
                println!("{} {} failed", "✗".red().bold(), report.check);
                println!("{message}");
            }
        },
    }
    Ok(())
}

/// Output a setup failure in the requested format
fn output_error(report: &ErrorReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(report)?;
            println!("{json}");
        }
        OutputFormat::Text => {
            eprintln!(
                "{} {}: {}",
                "unable to verify".red().bold(),
                report.check,
                report.message
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_report_json_shape() {
        let error = anyhow::anyhow!("connection refused").context("unable to check alerts over test window");
        let report = ErrorReport::new("alerts".into(), &error);
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["check"], "alerts");
        assert_eq!(value["verdict"], "error");
        assert_eq!(
            value["message"],
            "unable to check alerts over test window: connection refused"
        );
    }

    #[test]
    fn test_report_json_shape_matches() {
        let report = Report {
            check: "alerts".into(),
            verdict: Verdict::Fail {
                message: "boom".into(),
            },
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["check"], "alerts");
        assert_eq!(value["verdict"], "fail");
        assert_eq!(value["message"], "boom");
    }

    #[tokio::test]
    async fn test_out_of_range_since_is_unable_to_verify() {
        let cli = Cli::try_parse_from([
            "promcheck",
            "--url",
            "http://127.0.0.1:1",
            "--since",
            "9999999999999999h",
            "alerts",
        ])
        .unwrap();
        let err = run(&cli).await.unwrap_err();
        assert!(format!("{err:#}").contains("invalid --since value"));
    }

    #[test]
    fn test_version_skew_flag_parses() {
        let cli = Cli::try_parse_from(["promcheck", "--allow-version-skew", "1", "alerts"]).unwrap();
        assert_eq!(cli.allow_version_skew.as_deref(), Some("1"));
        assert_eq!(cli.command.check_name(), "alerts");
    }
}
