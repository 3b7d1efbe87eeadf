//! Minimal parser for the Prometheus text exposition format.
//!
//! Only what the self-metrics check needs: `# TYPE` lines and samples with
//! optional labels and an optional timestamp. `# HELP` and other comments
//! are skipped.

use std::collections::BTreeMap;

use tracing::info;

use crate::error::{PromCheckError, Result};
use crate::labels::{LabelSet, MetricCondition};
use crate::poll::{poll_immediate, Attempt};
use crate::prometheus::PrometheusClient;

/// Counter names used across Prometheus 2.x for appended samples
pub const SAMPLES_APPENDED_COUNTERS: &[&str] = &[
    "tsdb_samples_appended_total",
    "tsdb_head_samples_appended_total",
    "prometheus_tsdb_head_samples_appended_total",
];

/// A metric family and its samples, in exposition order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    /// Declared `# TYPE`, if any
    pub kind: Option<String>,
    pub samples: Vec<ExpositionSample>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpositionSample {
    pub labels: LabelSet,
    pub value: f64,
}

/// Metric families keyed by sample name
pub type Families = BTreeMap<String, MetricFamily>;

/// Parse an exposition body.
pub fn parse(text: &str) -> Result<Families> {
    let mut families = Families::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        let line_no = idx + 1;
        if line.is_empty() {
            continue;
        }

        if let Some(comment) = line.strip_prefix('#') {
            let mut parts = comment.split_whitespace();
            if parts.next() == Some("TYPE") {
                if let (Some(name), Some(kind)) = (parts.next(), parts.next()) {
                    family(&mut families, name).kind = Some(kind.to_string());
                }
            }
            continue;
        }

        let (name, labels, rest) = split_sample(line).map_err(|reason| {
            PromCheckError::Exposition {
                line: line_no,
                reason,
            }
        })?;
        let value_str = rest.split_whitespace().next().ok_or_else(|| {
            PromCheckError::Exposition {
                line: line_no,
                reason: "missing value".into(),
            }
        })?;
        let value = parse_value(value_str).ok_or_else(|| PromCheckError::Exposition {
            line: line_no,
            reason: format!("invalid value {value_str:?}"),
        })?;

        family(&mut families, name)
            .samples
            .push(ExpositionSample { labels, value });
    }

    Ok(families)
}

fn family<'a>(families: &'a mut Families, name: &str) -> &'a mut MetricFamily {
    families
        .entry(name.to_string())
        .or_insert_with(|| MetricFamily {
            name: name.to_string(),
            ..MetricFamily::default()
        })
}

fn parse_value(value: &str) -> Option<f64> {
    match value {
        "+Inf" => Some(f64::INFINITY),
        "-Inf" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        other => other.parse().ok(),
    }
}

/// Split `name{labels} rest` into its parts.
fn split_sample(line: &str) -> std::result::Result<(&str, LabelSet, &str), String> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_whitespace())
        .ok_or_else(|| "missing value".to_string())?;
    let name = &line[..name_end];
    if name.is_empty() {
        return Err("missing metric name".into());
    }

    let rest = &line[name_end..];
    let Some(body) = rest.strip_prefix('{') else {
        return Ok((name, LabelSet::new(), rest));
    };

    let (labels, consumed) = parse_labels(body)?;
    Ok((name, labels, &body[consumed..]))
}

/// Parse `a="x",b="y"}` and return the labels plus bytes consumed,
/// including the closing brace.
fn parse_labels(body: &str) -> std::result::Result<(LabelSet, usize), String> {
    let mut labels = LabelSet::new();
    let mut chars = body.char_indices().peekable();

    loop {
        while chars.peek().is_some_and(|(_, c)| c.is_whitespace() || *c == ',') {
            chars.next();
        }
        match chars.peek() {
            Some((i, '}')) => return Ok((labels, i + 1)),
            None => return Err("unterminated label set".into()),
            _ => {}
        }

        let mut name = String::new();
        while let Some((_, c)) = chars.next_if(|(_, c)| *c != '=') {
            name.push(c);
        }
        if chars.next().is_none() {
            return Err("unterminated label set".into());
        }
        if chars.next().map(|(_, c)| c) != Some('"') {
            return Err(format!("label {} value is not quoted", name.trim()));
        }

        let mut value = String::new();
        loop {
            match chars.next() {
                Some((_, '"')) => break,
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, c)) => value.push(c),
                    None => return Err("unterminated label value".into()),
                },
                Some((_, c)) => value.push(c),
                None => return Err("unterminated label value".into()),
            }
        }
        labels.insert(name.trim().to_string(), value);
    }
}

/// Values of samples in `family` that carry every label in `selector`.
#[must_use]
pub fn values_with_labels(families: &Families, family: &str, selector: &LabelSet) -> Vec<f64> {
    let condition = MetricCondition {
        selector: selector.clone(),
        text: String::new(),
    };
    families
        .get(family)
        .map(|f| {
            f.samples
                .iter()
                .filter(|s| condition.matches(&s.labels))
                .map(|s| s.value)
                .collect()
        })
        .unwrap_or_default()
}

/// True if any known "samples appended" counter has a positive first value.
#[must_use]
pub fn samples_appended(families: &Families) -> bool {
    SAMPLES_APPENDED_COUNTERS.iter().any(|name| {
        values_with_labels(families, name, &LabelSet::new())
            .first()
            .is_some_and(|v| *v > 0.0)
    })
}

/// Poll `<prometheus_url>/metrics` until Prometheus reports appended samples.
pub async fn wait_for_samples_appended(client: &PrometheusClient) -> Result<()> {
    let config = client.config();
    let url = format!("{}/metrics", config.prometheus_url.trim_end_matches('/'));
    poll_immediate(
        config.poll_interval,
        config.poll_timeout,
        "appended samples counter",
        || {
            let url = url.clone();
            async move {
                let body = match client.fetch_anonymous(&url).await {
                    Ok(body) => body,
                    Err(e) => {
                        info!("unable to get metrics: {e}");
                        return Ok(Attempt::Retry(e.to_string()));
                    }
                };
                if samples_appended(&parse(&body)?) {
                    Ok(Attempt::Done(()))
                } else {
                    Ok(Attempt::Retry(format!(
                        "none of {} is above zero",
                        SAMPLES_APPENDED_COUNTERS.join(", ")
                    )))
                }
            }
        },
    )
    .await
}
