use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// Free-form, user-facing tags attached to rules, samples and alerts.
pub type Labels = BTreeMap<String, String>;

/// Alert severity level, ordered from lowest to highest.
///
/// Rules only carry `Low` through `Critical`; [`AlertRule::validate`]
/// rejects `Info`, which is kept for informational notifications.
///
/// # Examples
///
/// ```
/// use oxpulse_common::types::Severity;
///
/// let sev: Severity = "high".parse().unwrap();
/// assert_eq!(sev, Severity::High);
/// assert_eq!(sev.to_string(), "high");
/// assert!(Severity::Critical > Severity::Low);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// Comparison operator of a threshold rule.
///
/// Serialized as its symbolic form (`">"`, `">="`, ...). Parsing also
/// accepts the word aliases `gt`, `gte`, `lt`, `lte`, `eq`, `ne`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CompareOp {
    GreaterThan,
    GreaterEqual,
    LessThan,
    LessEqual,
    Equal,
    NotEqual,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::GreaterThan => ">",
            Self::GreaterEqual => ">=",
            Self::LessThan => "<",
            Self::LessEqual => "<=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
        }
    }

    /// Evaluates `value <op> threshold`.
    ///
    /// `==` and `!=` use exact IEEE-754 equality with no epsilon, so a metric
    /// of `0.1 + 0.2` does NOT equal a threshold of `0.3`. Use
    /// [`CompareOp::check_with_tolerance`] when a tolerance is configured.
    pub fn check(&self, value: f64, threshold: f64) -> bool {
        self.check_with_tolerance(value, threshold, None)
    }

    /// Like [`CompareOp::check`], but `==`/`!=` treat values within the
    /// absolute `tolerance` as equal. Ordering operators ignore the tolerance.
    pub fn check_with_tolerance(&self, value: f64, threshold: f64, tolerance: Option<f64>) -> bool {
        #[allow(clippy::float_cmp)]
        let equal = match tolerance {
            Some(tol) => (value - threshold).abs() <= tol,
            None => value == threshold,
        };
        match self {
            Self::GreaterThan => value > threshold,
            Self::GreaterEqual => value >= threshold,
            Self::LessThan => value < threshold,
            Self::LessEqual => value <= threshold,
            Self::Equal => equal,
            Self::NotEqual => !equal,
        }
    }

    /// Human-readable phrase used in alert messages.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::GreaterThan => "above",
            Self::GreaterEqual => "at or above",
            Self::LessThan => "below",
            Self::LessEqual => "at or below",
            Self::Equal => "equal to",
            Self::NotEqual => "not equal to",
        }
    }
}

impl FromStr for CompareOp {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" | "gt" | "greater_than" => Ok(Self::GreaterThan),
            ">=" | "gte" | "greater_equal" => Ok(Self::GreaterEqual),
            "<" | "lt" | "less_than" => Ok(Self::LessThan),
            "<=" | "lte" | "less_equal" => Ok(Self::LessEqual),
            "==" | "eq" | "equal" => Ok(Self::Equal),
            "!=" | "ne" | "not_equal" => Ok(Self::NotEqual),
            _ => Err(format!("unknown compare operator: {s}")),
        }
    }
}

impl TryFrom<String> for CompareOp {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CompareOp> for String {
    fn from(op: CompareOp) -> Self {
        op.symbol().to_string()
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Lifecycle state of an [`Alert`].
///
/// Legal edges: `firing -> acknowledged`, `acknowledged -> resolved`,
/// `firing -> resolved`. `resolved` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Firing => "firing",
            Self::Acknowledged => "acknowledged",
            Self::Resolved => "resolved",
        }
    }

    /// Firing and acknowledged alerts are "open": at most one open alert
    /// exists per fingerprint.
    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Resolved)
    }

    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        matches!(
            (self, next),
            (Self::Firing, Self::Acknowledged)
                | (Self::Firing, Self::Resolved)
                | (Self::Acknowledged, Self::Resolved)
        )
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "firing" => Ok(Self::Firing),
            "acknowledged" => Ok(Self::Acknowledged),
            "resolved" => Ok(Self::Resolved),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

/// Which targets a rule applies to.
///
/// An empty or `"*"` `target_type` matches every type; a `None` `target_id`
/// matches every target of the selected type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSelector {
    #[serde(default)]
    pub target_type: String,
    #[serde(default)]
    pub target_id: Option<String>,
}

impl TargetSelector {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, target_type: &str, target_id: &str) -> bool {
        let type_ok =
            self.target_type.is_empty() || self.target_type == "*" || self.target_type == target_type;
        let id_ok = self
            .target_id
            .as_deref()
            .map_or(true, |id| id.is_empty() || id == target_id);
        type_ok && id_ok
    }
}

/// A single metric observation handed to the evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub target_type: String,
    pub target_id: String,
    pub metric_name: String,
    pub value: f64,
    #[serde(default)]
    pub labels: Labels,
    pub timestamp: DateTime<Utc>,
}

/// A user-defined threshold alert rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub target: TargetSelector,
    pub metric: String,
    pub operator: CompareOp,
    pub threshold: f64,
    /// Minimum seconds the condition must hold before the alert fires.
    #[serde(default)]
    pub duration_secs: u64,
    pub severity: Severity,
    pub enabled: bool,
    #[serde(default)]
    pub labels: Labels,
    /// Names of the notification channels to fan out to.
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertRule {
    /// Checks the invariants enforced before a rule is saved.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::MissingField("name"));
        }
        if self.metric.trim().is_empty() {
            return Err(ValidationError::MissingField("metric"));
        }
        if !self.threshold.is_finite() {
            return Err(ValidationError::invalid("threshold", "must be a finite number"));
        }
        if self.severity == Severity::Info {
            return Err(ValidationError::invalid(
                "severity",
                "must be one of low, medium, high, critical",
            ));
        }
        if self.channels.iter().any(|c| c.trim().is_empty()) {
            return Err(ValidationError::invalid("channels", "channel names must not be empty"));
        }
        Ok(())
    }

    pub fn matches(&self, sample: &MetricSample) -> bool {
        self.enabled
            && self.metric == sample.metric_name
            && self.target.matches(&sample.target_type, &sample.target_id)
    }
}

/// An alert instance: one per (rule, target) while open.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub fingerprint: String,
    pub target_type: String,
    pub target_id: String,
    pub metric_name: String,
    pub severity: Severity,
    pub status: AlertStatus,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub labels: Labels,
    pub started_at: DateTime<Utc>,
    /// Timestamp of the most recent breaching sample.
    pub last_seen_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Deterministic identity of an alert instance.
///
/// Hex-encoded SHA-256 over the rule id, target id and metric name, joined
/// with the ASCII unit separator so that `("a", "bc")` and `("ab", "c")`
/// never collide.
///
/// # Examples
///
/// ```
/// use oxpulse_common::types::fingerprint;
///
/// let a = fingerprint("rule-1", "host-1", "cpu");
/// assert_eq!(a, fingerprint("rule-1", "host-1", "cpu"));
/// assert_ne!(a, fingerprint("rule-1", "host-2", "cpu"));
/// assert_eq!(a.len(), 64);
/// ```
pub fn fingerprint(rule_id: &str, target_id: &str, metric_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rule_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(target_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(metric_name.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Pending,
    Sent,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for AttemptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown attempt status: {s}")),
        }
    }
}

/// One delivery attempt of one notification through one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAttempt {
    pub id: String,
    pub alert_id: Option<String>,
    pub channel: String,
    pub channel_type: String,
    pub status: AttemptStatus,
    pub error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Snapshot of the alert context an analysis was produced from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInput {
    pub metric_name: String,
    pub value: f64,
    pub threshold: f64,
    #[serde(default)]
    pub labels: Labels,
}

/// Append-only analysis output for an alert: `narrative`, `anomaly` or `trend`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: String,
    pub analysis_type: String,
    pub alert_id: Option<String>,
    pub target_type: String,
    pub target_id: String,
    pub input: AnalysisInput,
    pub narrative: String,
    pub root_cause: String,
    pub recommendations: Vec<String>,
    pub severity_assessment: String,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Format labels into a stable, human-readable `k=v, k=v` string.
///
/// # Examples
///
/// ```
/// use oxpulse_common::types::{format_labels, Labels};
///
/// let mut labels = Labels::new();
/// labels.insert("mount".to_string(), "/data".to_string());
/// labels.insert("device".to_string(), "sda1".to_string());
/// assert_eq!(format_labels(&labels), "device=sda1, mount=/data");
/// ```
pub fn format_labels(labels: &Labels) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_op_parses_symbols_and_words() {
        assert_eq!(">".parse::<CompareOp>().unwrap(), CompareOp::GreaterThan);
        assert_eq!("gte".parse::<CompareOp>().unwrap(), CompareOp::GreaterEqual);
        assert_eq!("!=".parse::<CompareOp>().unwrap(), CompareOp::NotEqual);
        assert!("~=".parse::<CompareOp>().is_err());
    }

    #[test]
    fn compare_op_serializes_as_symbol() {
        let json = serde_json::to_string(&CompareOp::LessEqual).unwrap();
        assert_eq!(json, "\"<=\"");
        let op: CompareOp = serde_json::from_str("\"lt\"").unwrap();
        assert_eq!(op, CompareOp::LessThan);
    }

    #[test]
    fn ordering_operators() {
        assert!(CompareOp::GreaterThan.check(95.0, 90.0));
        assert!(!CompareOp::GreaterThan.check(90.0, 90.0));
        assert!(CompareOp::GreaterEqual.check(90.0, 90.0));
        assert!(CompareOp::LessThan.check(1.0, 2.0));
        assert!(CompareOp::LessEqual.check(2.0, 2.0));
    }

    // Equality is exact by default: real-valued metrics that are "equal" in
    // decimal notation may not compare equal. The tolerance variant exists
    // for deployments that opt in.
    #[test]
    fn equality_is_exact_without_tolerance() {
        let sum = 0.1 + 0.2;
        assert!(!CompareOp::Equal.check(sum, 0.3));
        assert!(CompareOp::NotEqual.check(sum, 0.3));
        assert!(CompareOp::Equal.check(42.0, 42.0));
    }

    #[test]
    fn equality_with_tolerance() {
        let sum = 0.1 + 0.2;
        assert!(CompareOp::Equal.check_with_tolerance(sum, 0.3, Some(1e-9)));
        assert!(!CompareOp::NotEqual.check_with_tolerance(sum, 0.3, Some(1e-9)));
        // Ordering operators ignore the tolerance.
        assert!(!CompareOp::GreaterThan.check_with_tolerance(0.3, sum, Some(1.0)));
    }

    #[test]
    fn status_transitions() {
        use AlertStatus::*;
        assert!(Firing.can_transition_to(Acknowledged));
        assert!(Firing.can_transition_to(Resolved));
        assert!(Acknowledged.can_transition_to(Resolved));
        assert!(!Acknowledged.can_transition_to(Firing));
        assert!(!Resolved.can_transition_to(Firing));
        assert!(!Resolved.can_transition_to(Resolved));
        assert!(!Firing.can_transition_to(Firing));
    }

    #[test]
    fn target_selector_matching() {
        let any = TargetSelector::any();
        assert!(any.matches("host", "host-1"));

        let hosts = TargetSelector {
            target_type: "host".into(),
            target_id: None,
        };
        assert!(hosts.matches("host", "host-9"));
        assert!(!hosts.matches("container", "host-9"));

        let one = TargetSelector {
            target_type: "host".into(),
            target_id: Some("host-1".into()),
        };
        assert!(one.matches("host", "host-1"));
        assert!(!one.matches("host", "host-2"));
    }

    #[test]
    fn fingerprint_separates_fields() {
        assert_ne!(fingerprint("a", "bc", "m"), fingerprint("ab", "c", "m"));
    }
}
