use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type tag pinned on a [`crate::types::MetricValue`] by its definition.
///
/// A metric definition fixes the type on first appearance; later batches
/// carrying a different type for the same name are rejected wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Number,
    Bool,
    String,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::Number => write!(f, "number"),
            ValueType::Bool => write!(f, "bool"),
            ValueType::String => write!(f, "string"),
        }
    }
}

impl std::str::FromStr for ValueType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "number" | "numeric" | "float" | "integer" => Ok(ValueType::Number),
            "bool" | "boolean" => Ok(ValueType::Bool),
            "string" | "str" | "text" => Ok(ValueType::String),
            _ => Err(format!("unknown value type: {s}")),
        }
    }
}

/// A dynamically typed metric value as it appears on the wire.
///
/// Serialized untagged, so agents send plain JSON scalars:
/// `0.42`, `true`, `"mounted"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl MetricValue {
    pub fn kind(&self) -> ValueType {
        match self {
            MetricValue::Number(_) => ValueType::Number,
            MetricValue::Bool(_) => ValueType::Bool,
            MetricValue::Text(_) => ValueType::String,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetricValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetricValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Number(n) => write!(f, "{n}"),
            MetricValue::Bool(b) => write!(f, "{b}"),
            MetricValue::Text(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Only warning and above produce outbound notifications.
    pub fn is_notifiable(&self) -> bool {
        *self >= Severity::Warning
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// The closed comparison set for thresholds.
///
/// Numbers accept the six relational operators, booleans and strings
/// accept eq/ne, and strings additionally accept contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Comparison {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
    Contains,
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Comparison::Gt => "gt",
            Comparison::Lt => "lt",
            Comparison::Ge => "ge",
            Comparison::Le => "le",
            Comparison::Eq => "eq",
            Comparison::Ne => "ne",
            Comparison::Contains => "contains",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Comparison {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gt" | ">" => Ok(Comparison::Gt),
            "lt" | "<" => Ok(Comparison::Lt),
            "ge" | ">=" => Ok(Comparison::Ge),
            "le" | "<=" => Ok(Comparison::Le),
            "eq" | "==" => Ok(Comparison::Eq),
            "ne" | "!=" => Ok(Comparison::Ne),
            "contains" => Ok(Comparison::Contains),
            _ => Err(format!("unknown comparison: {s}")),
        }
    }
}

/// Evaluator-owned state of a monitored subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MetricState {
    Unknown,
    Normal,
    Critical,
}

impl std::fmt::Display for MetricState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricState::Unknown => write!(f, "UNKNOWN"),
            MetricState::Normal => write!(f, "NORMAL"),
            MetricState::Critical => write!(f, "CRITICAL"),
        }
    }
}

impl std::str::FromStr for MetricState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "UNKNOWN" => Ok(MetricState::Unknown),
            "NORMAL" => Ok(MetricState::Normal),
            "CRITICAL" => Ok(MetricState::Critical),
            _ => Err(format!("unknown metric state: {s}")),
        }
    }
}

/// The keyed target of an incident. At most one OPEN incident exists per
/// subject at any time; that invariant is enforced by partial unique
/// indexes in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Subject {
    HttpTarget {
        client_id: String,
        target_id: String,
    },
    MetricInstance {
        client_id: String,
        instance_id: String,
    },
}

impl Subject {
    pub fn client_id(&self) -> &str {
        match self {
            Subject::HttpTarget { client_id, .. } => client_id,
            Subject::MetricInstance { client_id, .. } => client_id,
        }
    }

    /// Stable key used to partition per-subject work onto a single worker.
    pub fn partition_key(&self) -> String {
        match self {
            Subject::HttpTarget { client_id, target_id } => {
                format!("http:{client_id}:{target_id}")
            }
            Subject::MetricInstance { client_id, instance_id } => {
                format!("metric:{client_id}:{instance_id}")
            }
        }
    }
}

/// Record of one HTTP probe: transport failures are normalized to
/// status 0, and `ok` is computed against the target's accepted set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub client_id: String,
    pub target_id: String,
    pub ok: bool,
    pub status: u16,
    pub latency_ms: i64,
    pub ts: DateTime<Utc>,
    pub error: Option<String>,
}

/// Why a notification is going out for an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Open,
    Reminder,
    Resolve,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::Open => write!(f, "open"),
            NotificationKind::Reminder => write!(f, "reminder"),
            NotificationKind::Resolve => write!(f, "resolve"),
        }
    }
}

impl std::str::FromStr for NotificationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "open" => Ok(NotificationKind::Open),
            "reminder" => Ok(NotificationKind::Reminder),
            "resolve" => Ok(NotificationKind::Resolve),
            _ => Err(format!("unknown notification kind: {s}")),
        }
    }
}

// Agent ingest wire format.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestMachine {
    pub hostname: String,
    #[serde(default)]
    pub os: Option<String>,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestMetric {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    pub value: MetricValue,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub sent_at: DateTime<Utc>,
    pub machine: IngestMachine,
    pub metrics: Vec<IngestMetric>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_value_roundtrips_untagged() {
        let n: MetricValue = serde_json::from_str("0.42").unwrap();
        assert_eq!(n, MetricValue::Number(0.42));
        let b: MetricValue = serde_json::from_str("true").unwrap();
        assert_eq!(b, MetricValue::Bool(true));
        let s: MetricValue = serde_json::from_str("\"mounted\"").unwrap();
        assert_eq!(s, MetricValue::Text("mounted".to_string()));
        assert_eq!(serde_json::to_string(&b).unwrap(), "true");
    }

    #[test]
    fn severity_ordering_gates_notifications() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(!Severity::Info.is_notifiable());
        assert!(Severity::Warning.is_notifiable());
    }

    #[test]
    fn comparison_parses_symbols_and_names() {
        assert_eq!(">".parse::<Comparison>().unwrap(), Comparison::Gt);
        assert_eq!("contains".parse::<Comparison>().unwrap(), Comparison::Contains);
        assert!("regex".parse::<Comparison>().is_err());
    }

    #[test]
    fn subject_partition_keys_are_distinct_per_kind() {
        let a = Subject::HttpTarget {
            client_id: "c1".into(),
            target_id: "x".into(),
        };
        let b = Subject::MetricInstance {
            client_id: "c1".into(),
            instance_id: "x".into(),
        };
        assert_ne!(a.partition_key(), b.partition_key());
    }
}
