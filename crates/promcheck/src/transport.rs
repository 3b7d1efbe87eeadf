//! How a GET physically reaches the monitoring backend.
//!
//! The query client only ever sees the raw response body. Outside the
//! cluster that is a plain HTTPS request; from CI it is usually a `curl`
//! relayed through `kubectl exec` into a pod on the cluster network, since
//! the monitoring services are not exposed.

use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::config::PromCheckConfig;
use crate::error::{PromCheckError, Result};

/// Fetches URLs on behalf of the query client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` and return the response body, whatever the status code.
    async fn get(&self, url: &str, bearer: Option<&str>) -> Result<String>;

    /// GET `url` and return only the HTTP status code.
    async fn status_code(&self, url: &str, bearer: Option<&str>) -> Result<u16>;
}

/// Direct HTTP(S) transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport honouring the timeout and TLS settings of `config`.
    /// Redirects are never followed.
    pub fn new(config: &PromCheckConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.insecure)
            // report the status of the URL asked for, as curl without -L does
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client })
    }

    fn request(&self, url: &str, bearer: Option<&str>) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match bearer {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, bearer: Option<&str>) -> Result<String> {
        debug!(url = %url, "GET");
        let response = self.request(url, bearer).send().await?;
        Ok(response.text().await?)
    }

    async fn status_code(&self, url: &str, bearer: Option<&str>) -> Result<u16> {
        let response = self.request(url, bearer).send().await?;
        Ok(response.status().as_u16())
    }
}

/// Relays requests as `curl` inside a pod via `kubectl exec`.
#[derive(Debug, Clone)]
pub struct ExecTransport {
    namespace: String,
    pod: String,
    kubectl: String,
}

impl ExecTransport {
    #[must_use]
    pub fn new(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod: pod.into(),
            kubectl: "kubectl".to_string(),
        }
    }

    /// Use a different `kubectl` binary (e.g. `oc`).
    #[must_use]
    pub fn with_kubectl(mut self, kubectl: impl Into<String>) -> Self {
        self.kubectl = kubectl.into();
        self
    }

    /// The shell command run inside the pod for a body fetch.
    #[must_use]
    pub fn curl_command(url: &str, bearer: Option<&str>) -> String {
        match bearer {
            Some(token) => format!(
                "curl -s -k -H {} {}",
                shell_quote(&format!("Authorization: Bearer {token}")),
                shell_quote(url)
            ),
            None => format!("curl -s -k {}", shell_quote(url)),
        }
    }

    /// The shell command run inside the pod for a status-code probe.
    #[must_use]
    pub fn status_command(url: &str, bearer: Option<&str>) -> String {
        let auth = bearer
            .map(|token| {
                format!(
                    "-H {} ",
                    shell_quote(&format!("Authorization: Bearer {token}"))
                )
            })
            .unwrap_or_default();
        format!(
            "curl -k -s {auth}-o /dev/null -w '%{{http_code}}' {}",
            shell_quote(url)
        )
    }

    async fn run(&self, cmd: &str) -> Result<String> {
        debug!(namespace = %self.namespace, pod = %self.pod, "Running host command");

        let output = Command::new(&self.kubectl)
            .args([
                "exec",
                "--namespace",
                &self.namespace,
                &self.pod,
                "--",
                "/bin/sh",
                "-c",
                cmd,
            ])
            .output()
            .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PromCheckError::Exec {
                message: output.status.to_string(),
                output: format!("{stdout}{stderr}"),
            });
        }
        Ok(stdout)
    }
}

#[async_trait]
impl Transport for ExecTransport {
    async fn get(&self, url: &str, bearer: Option<&str>) -> Result<String> {
        self.run(&Self::curl_command(url, bearer)).await
    }

    async fn status_code(&self, url: &str, bearer: Option<&str>) -> Result<u16> {
        let output = self.run(&Self::status_command(url, bearer)).await?;
        output.trim().parse().map_err(|_| PromCheckError::Exec {
            message: "curl did not print a status code".into(),
            output,
        })
    }
}

/// Single-quote `value` for `/bin/sh`.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curl_command_with_bearer() {
        let cmd = ExecTransport::curl_command(
            "https://thanos-querier.openshift-monitoring.svc:9091/api/v1/query?query=up",
            Some("abc"),
        );
        assert_eq!(
            cmd,
            "curl -s -k -H 'Authorization: Bearer abc' 'https://thanos-querier.openshift-monitoring.svc:9091/api/v1/query?query=up'"
        );
    }

    #[test]
    fn test_status_command_without_bearer() {
        let cmd = ExecTransport::status_command("https://prometheus:9091", None);
        assert_eq!(
            cmd,
            "curl -k -s -o /dev/null -w '%{http_code}' 'https://prometheus:9091'"
        );
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_http_transport_builds() {
        assert!(HttpTransport::new(&PromCheckConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn test_missing_kubectl_is_setup_failure() {
        let transport = ExecTransport::new("ns", "execpod").with_kubectl("/nonexistent/kubectl");
        let err = transport.get("http://x", None).await.unwrap_err();
        assert!(matches!(err, PromCheckError::Io(_)));
        assert!(!err.is_violation());
    }
}
