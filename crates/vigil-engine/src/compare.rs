use vigil_common::types::{Comparison, MetricValue, Severity, ValueType};

/// A threshold as the evaluator needs it: one comparison against one
/// typed value, with the severity an incident would carry.
#[derive(Debug, Clone)]
pub struct ThresholdSpec {
    pub comparison: Comparison,
    pub value: MetricValue,
    pub severity: Severity,
}

/// Outcome of classifying a single observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The threshold matched: the subject is in a bad state.
    Critical,
    /// The threshold did not match.
    Normal,
    /// Not decidable: no threshold, NaN, type drift, or an operator that
    /// is undefined for the value type. Never opens an incident.
    Unknown,
    /// Alerting is paused or disabled by the operator. Forces UNKNOWN and
    /// resolves any open incident.
    Suppressed,
}

/// Compares a sample value against a threshold value.
///
/// Returns `None` when the comparison is undefined (NaN on either side,
/// mismatched types, or an operator the type does not support) so the
/// caller maps it to UNKNOWN instead of a false NORMAL or CRITICAL.
pub fn compare_value(
    comparison: Comparison,
    expected: ValueType,
    sample: &MetricValue,
    threshold: &MetricValue,
) -> Option<bool> {
    match expected {
        ValueType::Number => {
            let left = coerce_number(sample)?;
            let right = coerce_number(threshold)?;
            if left.is_nan() || right.is_nan() {
                return None;
            }
            Some(match comparison {
                Comparison::Gt => left > right,
                Comparison::Lt => left < right,
                Comparison::Ge => left >= right,
                Comparison::Le => left <= right,
                Comparison::Eq => left == right,
                Comparison::Ne => left != right,
                Comparison::Contains => return None,
            })
        }
        ValueType::Bool => {
            let left = sample.as_bool()?;
            let right = threshold.as_bool()?;
            Some(match comparison {
                Comparison::Eq => left == right,
                Comparison::Ne => left != right,
                _ => return None,
            })
        }
        ValueType::String => {
            let left = sample.as_text()?;
            let right = threshold.as_text()?;
            Some(match comparison {
                Comparison::Eq => left == right,
                Comparison::Ne => left != right,
                Comparison::Contains => left.contains(right),
                _ => return None,
            })
        }
    }
}

/// Numbers may arrive as strings from legacy agents; parse rather than
/// reject, but never coerce booleans.
fn coerce_number(value: &MetricValue) -> Option<f64> {
    match value {
        MetricValue::Number(n) => Some(*n),
        MetricValue::Text(s) => s.trim().parse::<f64>().ok(),
        MetricValue::Bool(_) => None,
    }
}

/// Classifies one observation for a subject.
///
/// Suppression (paused or alerting disabled) takes precedence over the
/// threshold lookup; a missing threshold means UNKNOWN-for-alerting.
pub fn classify(
    threshold: Option<&ThresholdSpec>,
    expected: ValueType,
    value: &MetricValue,
    alert_enabled: bool,
    paused: bool,
) -> Verdict {
    if paused || !alert_enabled {
        return Verdict::Suppressed;
    }
    let Some(spec) = threshold else {
        return Verdict::Unknown;
    };
    match compare_value(spec.comparison, expected, value, &spec.value) {
        Some(true) => Verdict::Critical,
        Some(false) => Verdict::Normal,
        None => Verdict::Unknown,
    }
}
