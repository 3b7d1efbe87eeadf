//! Error types for promcheck.
//!
//! Transport and decode failures mean the property could not be verified at
//! all. They are kept apart from [`PromCheckError::Mismatch`], which is the
//! only variant describing a failing property.

use thiserror::Error;

/// Errors that can occur while verifying a Prometheus deployment.
#[derive(Debug, Error)]
pub enum PromCheckError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The relay command used to reach the backend failed.
    #[error("host command failed: {message}\n{output}")]
    Exec { message: String, output: String },

    /// The backend answered, but not with something we can use.
    #[error("unable to execute query {query}: {message}")]
    Transport { query: String, message: String },

    /// Response body was not the expected JSON shape.
    #[error("unable to parse response for {context}: {source}")]
    Decode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    /// Backend returned a non-success status envelope.
    #[error("promQL query returned unexpected results:\n{query}\n{data}")]
    BackendStatus { query: String, data: String },

    /// Malformed line in a text exposition body.
    #[error("invalid exposition line {line}: {reason}")]
    Exposition { line: usize, reason: String },

    /// One or more queries did not match their expected outcome.
    #[error("{}", failures.join("\n"))]
    Mismatch { failures: Vec<String> },

    /// A bounded poll ran out of time.
    #[error("timed out after {secs}s waiting for {what}")]
    Timeout { what: String, secs: u64 },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Suite file could not be parsed.
    #[error("Suite file error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Scrape URL pattern is not a valid regular expression.
    #[error("Invalid pattern: {0}")]
    Regex(#[from] regex::Error),

    /// Local I/O failure (suite files, spawning the relay).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PromCheckError {
    /// Whether this error describes a failing property rather than an
    /// inability to check it.
    #[must_use]
    pub fn is_violation(&self) -> bool {
        matches!(self, Self::Mismatch { .. } | Self::Timeout { .. })
    }
}

/// Result type for promcheck operations.
pub type Result<T> = std::result::Result<T, PromCheckError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_joins_failures() {
        let err = PromCheckError::Mismatch {
            failures: vec!["query failed: a: x".into(), "query failed: b: y".into()],
        };
        assert_eq!(err.to_string(), "query failed: a: x\nquery failed: b: y");
        assert!(err.is_violation());
    }

    #[test]
    fn test_setup_failures_are_not_violations() {
        let err = PromCheckError::Exec {
            message: "exit status 7".into(),
            output: "curl: (7) Failed to connect".into(),
        };
        assert!(!err.is_violation());
        assert!(err.to_string().starts_with("host command failed"));
    }
}
