//! The time window a verification run looks back over.

use chrono::{DateTime, Duration, Utc};

use crate::error::{PromCheckError, Result};

/// Start of the run under test; queries only consider samples since then.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestWindow {
    started_at: DateTime<Utc>,
}

impl TestWindow {
    /// Window starting at the given instant.
    #[must_use]
    pub fn starting_at(started_at: DateTime<Utc>) -> Self {
        Self { started_at }
    }

    /// Window covering the last `duration`.
    #[must_use]
    pub fn last(duration: Duration) -> Self {
        Self::starting_at(Utc::now() - duration)
    }

    /// Parse `--since`: an RFC 3339 timestamp or a relative duration such as
    /// `90s`, `45m` or `2h`.
    pub fn parse(since: &str) -> Result<Self> {
        let since = since.trim();
        if let Ok(ts) = DateTime::parse_from_rfc3339(since) {
            return Ok(Self::starting_at(ts.with_timezone(&Utc)));
        }

        let invalid = || PromCheckError::Config(format!("invalid --since value: {since}"));
        let (split, _) = since.char_indices().last().ok_or_else(invalid)?;
        let (amount, unit) = since.split_at(split);
        let amount: i64 = amount.parse().map_err(|_| invalid())?;
        let duration = match unit {
            "s" => Duration::try_seconds(amount),
            "m" => Duration::try_minutes(amount),
            "h" => Duration::try_hours(amount),
            _ => return Err(invalid()),
        }
        .ok_or_else(invalid)?;
        let started_at = Utc::now()
            .checked_sub_signed(duration)
            .ok_or_else(invalid)?;
        Ok(Self::starting_at(started_at))
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whole seconds elapsed since the start, never less than one.
    #[must_use]
    pub fn elapsed_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds().max(1)
    }

    /// Elapsed time as a PromQL range duration, e.g. `3723s`.
    #[must_use]
    pub fn promql_duration(&self) -> String {
        format!("{}s", self.elapsed_secs())
    }
}
