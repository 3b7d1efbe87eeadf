//! Gap detection for an always-firing alert.
//!
//! The indicator is `1` while the alert series exists and `0` while it is
//! absent (`absent(...) * 0`), so a continuous series exists across gaps and
//! every appearance or disappearance is one transition. Zero transitions
//! means data was kept for the whole window; one transition is tolerated
//! because history may be lost exactly at the window start. Two or more
//! transitions mean the alert disappeared and came back.

/// Transitions tolerated over one window.
pub const TOLERATED_TRANSITIONS: usize = 1;

/// Selector of the Watchdog alert while firing.
pub const WATCHDOG_SELECTOR: &str =
    r#"ALERTS{alertstate="firing",alertname="Watchdog",severity="none"}"#;

/// Violation reported when the Watchdog series has gaps.
pub const WATCHDOG_GAP_VIOLATION: &str = "Watchdog alert had missing intervals during the run, \
which may be a sign of a Prometheus outage in violation of the prometheus query SLO of 100% \
uptime during normal execution";

/// Indicator expression: 1 while `selector` is present, 0 while absent.
#[must_use]
pub fn indicator_expr(selector: &str) -> String {
    format!("max(({selector}) or (absent({selector})*0))")
}

/// Server-side check: returns a series only when the indicator changed more
/// often than tolerated over `window`, evaluated at 1s resolution.
#[must_use]
pub fn gap_query(selector: &str, window: &str) -> String {
    format!(
        "changes(({})[{window}:1s]) > {TOLERATED_TRANSITIONS}",
        indicator_expr(selector)
    )
}

/// Number of value changes between consecutive samples. NaN to NaN is not
/// a change.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn count_transitions(samples: &[f64]) -> usize {
    samples
        .windows(2)
        .filter(|pair| {
            let (prev, cur) = (pair[0], pair[1]);
            prev != cur && !(prev.is_nan() && cur.is_nan())
        })
        .count()
}

/// True when the indicator shows more transitions than tolerated.
#[must_use]
pub fn has_gap(samples: &[f64]) -> bool {
    count_transitions(samples) > TOLERATED_TRANSITIONS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_transitions_no_gap() {
        let samples = vec![1.0; 600];
        assert_eq!(count_transitions(&samples), 0);
        assert!(!has_gap(&samples));
    }

    #[test]
    fn test_single_transition_tolerated() {
        let mut samples = vec![0.0; 10];
        samples.extend(vec![1.0; 590]);
        assert_eq!(count_transitions(&samples), 1);
        assert!(!has_gap(&samples));
    }

    #[test]
    fn test_two_transitions_is_a_gap() {
        let mut samples = vec![1.0; 100];
        samples.extend(vec![0.0; 30]);
        samples.extend(vec![1.0; 100]);
        assert_eq!(count_transitions(&samples), 2);
        assert!(has_gap(&samples));
    }

    #[test]
    fn test_empty_and_single_sample() {
        assert!(!has_gap(&[]));
        assert!(!has_gap(&[1.0]));
    }

    #[test]
    fn test_nan_runs_are_not_transitions() {
        assert_eq!(count_transitions(&[f64::NAN, f64::NAN, 1.0]), 1);
    }

    #[test]
    fn test_gap_query_shape() {
        assert_eq!(
            gap_query(WATCHDOG_SELECTOR, "3600s"),
            r#"changes((max((ALERTS{alertstate="firing",alertname="Watchdog",severity="none"}) or (absent(ALERTS{alertstate="firing",alertname="Watchdog",severity="none"})*0)))[3600s:1s]) > 1"#
        );
    }
}
