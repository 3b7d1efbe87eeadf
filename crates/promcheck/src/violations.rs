//! Violation classification and the verdict of a run.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::{info, warn};

/// Where a non-conforming series ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Matched a tracked issue; reported as context
    Known { cause: String },
    /// Matched nothing; fails the run
    Unexpected,
    /// Reported but does not fail the run
    Flaky,
    /// Pending alert on the allow-list; logged only
    AllowedPending { reason: String },
}

/// Accumulator for one evaluation.
///
/// Each class is a set keyed by the violation text, so identical series
/// collapse into one line and reports come out sorted. A text lives in
/// exactly one class; when the same text is recorded twice, `Unexpected`
/// beats `Flaky`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Violations {
    known: BTreeSet<String>,
    unexpected: BTreeSet<String>,
    flaky: BTreeSet<String>,
    allowed: BTreeSet<String>,
}

impl Violations {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one violation under its classification.
    pub fn record(&mut self, violation: impl Into<String>, classification: Classification) {
        let violation = violation.into();
        match classification {
            Classification::Known { cause } => {
                self.known.insert(format!("{violation} (open bug: {cause})"));
            }
            Classification::AllowedPending { reason } => {
                self.allowed.insert(format!("{violation} (allowed: {reason})"));
            }
            Classification::Unexpected => {
                self.flaky.remove(&violation);
                self.unexpected.insert(violation);
            }
            Classification::Flaky => {
                if !self.unexpected.contains(&violation) {
                    self.flaky.insert(violation);
                }
            }
        }
    }

    pub fn known(&self) -> impl Iterator<Item = &str> {
        self.known.iter().map(String::as_str)
    }

    pub fn unexpected(&self) -> impl Iterator<Item = &str> {
        self.unexpected.iter().map(String::as_str)
    }

    pub fn flaky(&self) -> impl Iterator<Item = &str> {
        self.flaky.iter().map(String::as_str)
    }

    pub fn allowed(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(String::as_str)
    }

    /// Consume the accumulator into the verdict of the run.
    #[must_use]
    pub fn into_verdict(self) -> Verdict {
        if !self.allowed.is_empty() {
            info!(
                "Alerts were detected during test run which are allowed:\n\n{}",
                join(&self.allowed)
            );
        }

        if !self.unexpected.is_empty() {
            return Verdict::Fail {
                message: format!(
                    "Unexpected alerts fired or pending after the test run:\n\n{}",
                    join(&self.unexpected)
                ),
            };
        }

        let flakes: BTreeSet<&String> = self
            .known
            .iter()
            .chain(&self.unexpected)
            .chain(&self.flaky)
            .collect();
        if !flakes.is_empty() {
            let lines: Vec<&str> = flakes.into_iter().map(String::as_str).collect();
            let message = format!("Unexpected alert behavior during test:\n\n{}", lines.join("\n"));
            warn!("{message}");
            return Verdict::Flake { message };
        }

        info!("No alerts fired during test run");
        Verdict::Pass
    }
}

fn join(set: &BTreeSet<String>) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
}

/// Outcome of a verification run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    /// The check did not apply to this environment
    Skipped { reason: String },
    /// Visible but non-blocking
    Flake { message: String },
    Fail { message: String },
}

impl Verdict {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Fail { .. })
    }

    #[must_use]
    pub fn is_flake(&self) -> bool {
        matches!(self, Self::Flake { .. })
    }

    /// Combine two verdicts, keeping the most severe.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        match (self, other) {
            (Self::Fail { message: a }, Self::Fail { message: b }) => Self::Fail {
                message: format!("{a}\n\n{b}"),
            },
            (fail @ Self::Fail { .. }, _) | (_, fail @ Self::Fail { .. }) => fail,
            (Self::Flake { message: a }, Self::Flake { message: b }) => Self::Flake {
                message: format!("{a}\n\n{b}"),
            },
            (flake @ Self::Flake { .. }, _) | (_, flake @ Self::Flake { .. }) => flake,
            (Self::Pass, _) | (_, Self::Pass) => Self::Pass,
            (skipped @ Self::Skipped { .. }, Self::Skipped { .. }) => skipped,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Skipped { reason } => write!(f, "skipped: {reason}"),
            Self::Flake { message } => write!(f, "flake: {message}"),
            Self::Fail { message } => write!(f, "fail: {message}"),
        }
    }
}
