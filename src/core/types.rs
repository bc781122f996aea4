use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::error::PanelError;

/// Placeholder shown for any field the API left out.
pub const PLACEHOLDER: &str = "—";

/// Identifier of one provisioned environment. Always user supplied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    pub fn parse(raw: &str) -> Result<Self, PanelError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PanelError::InvalidNamespace(
                "namespace must not be empty".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status as last reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum LifecycleStatus {
    Starting,
    Running,
    Finished,
    Terminated,
    Error,
    /// Anything else the server sends, kept verbatim for display.
    Unknown(String),
}

impl Default for LifecycleStatus {
    fn default() -> Self {
        LifecycleStatus::Unknown(String::new())
    }
}

impl From<&str> for LifecycleStatus {
    fn from(raw: &str) -> Self {
        match raw {
            "starting" => LifecycleStatus::Starting,
            "running" => LifecycleStatus::Running,
            "finished" => LifecycleStatus::Finished,
            "terminated" => LifecycleStatus::Terminated,
            "error" => LifecycleStatus::Error,
            other => LifecycleStatus::Unknown(other.to_string()),
        }
    }
}

impl From<String> for LifecycleStatus {
    fn from(raw: String) -> Self {
        LifecycleStatus::from(raw.as_str())
    }
}

/// `null` from a server that has not reported yet reads as unknown.
impl From<Option<String>> for LifecycleStatus {
    fn from(raw: Option<String>) -> Self {
        raw.map(LifecycleStatus::from).unwrap_or_default()
    }
}

impl From<LifecycleStatus> for String {
    fn from(status: LifecycleStatus) -> Self {
        status.to_string()
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleStatus::Starting => write!(f, "starting"),
            LifecycleStatus::Running => write!(f, "running"),
            LifecycleStatus::Finished => write!(f, "finished"),
            LifecycleStatus::Terminated => write!(f, "terminated"),
            LifecycleStatus::Error => write!(f, "error"),
            LifecycleStatus::Unknown(raw) if raw.is_empty() => write!(f, "unknown"),
            LifecycleStatus::Unknown(raw) => write!(f, "{}", raw),
        }
    }
}

impl LifecycleStatus {
    pub fn pill(&self) -> StatusPill {
        StatusPill::for_status(&self.to_string())
    }
}

/// Visual class of the status pill in the environment table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusPill {
    Positive,
    Warning,
    Neutral,
    Negative,
}

impl StatusPill {
    /// Total over every string; anything unrecognised is neutral.
    pub fn for_status(status: &str) -> Self {
        match status {
            "running" => StatusPill::Positive,
            "starting" => StatusPill::Warning,
            "finished" | "terminated" => StatusPill::Neutral,
            "error" => StatusPill::Negative,
            _ => StatusPill::Neutral,
        }
    }
}

/// One row of `GET /environments`. Replaced wholesale on every refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentRecord {
    pub namespace: String,
    #[serde(default)]
    pub last_status: LifecycleStatus,
    #[serde(default)]
    pub last_pid: Option<i64>,
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub memory: Option<u64>,
    #[serde(default)]
    pub unit_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Body of `GET /resources`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    #[serde(default)]
    pub cpu_available: Option<f64>,
    #[serde(default)]
    pub memory_available: Option<u64>,
}

/// Body of `GET /status/{namespace}`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "cpu")]
    pub cpu_requested: Option<f64>,
    #[serde(default, alias = "memory")]
    pub memory_requested: Option<u64>,
    #[serde(default, alias = "unit_name")]
    pub unit: Option<String>,
    #[serde(default, alias = "main_pid")]
    pub pid: Option<i64>,
    /// Full payload as received, for the raw view.
    #[serde(skip)]
    pub raw: serde_json::Value,
}

impl StatusReport {
    pub fn lifecycle(&self) -> LifecycleStatus {
        self.status
            .as_deref()
            .map(LifecycleStatus::from)
            .unwrap_or_default()
    }
}

/// Renders an optional field, substituting [`PLACEHOLDER`] when absent.
pub fn or_placeholder<T: fmt::Display>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| PLACEHOLDER.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unreachable,
}

/// The client's belief about API reachability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
    pub status: HealthStatus,
    pub reason: String,
}

impl HealthState {
    pub fn unknown() -> Self {
        Self {
            status: HealthStatus::Unknown,
            reason: "checking API…".to_string(),
        }
    }

    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            reason: "API online".to_string(),
        }
    }

    pub fn unreachable(cause: &str) -> Self {
        Self {
            status: HealthStatus::Unreachable,
            reason: format!("API offline: {}", cause),
        }
    }
}

/// Body of `POST /create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub namespace: Namespace,
    pub cpu: f64,
    pub memory: u64,
    pub io: u32,
    #[serde(default)]
    pub command: String,
}

/// Body of `POST /execute`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub namespace: Namespace,
    pub command: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteAck {
    #[serde(default)]
    pub unit: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use test_case::test_case;

    #[test_case("running", StatusPill::Positive)]
    #[test_case("starting", StatusPill::Warning)]
    #[test_case("finished", StatusPill::Neutral)]
    #[test_case("terminated", StatusPill::Neutral)]
    #[test_case("error", StatusPill::Negative)]
    #[test_case("created", StatusPill::Neutral)]
    #[test_case("", StatusPill::Neutral)]
    #[test_case("RUNNING", StatusPill::Neutral)]
    fn test_status_pill_mapping(status: &str, expected: StatusPill) {
        assert_eq!(StatusPill::for_status(status), expected);
        assert_eq!(LifecycleStatus::from(status).pill(), expected);
    }

    #[test]
    fn test_namespace_is_trimmed_and_non_empty() {
        assert_eq!(Namespace::parse("  job-1 ").unwrap().as_str(), "job-1");
        assert!(Namespace::parse("   ").is_err());
    }

    #[test]
    fn test_environment_record_tolerates_missing_fields() {
        let record: EnvironmentRecord = serde_json::from_value(json!({
            "namespace": "abc",
            "last_status": "running",
            "cpu": 2,
        }))
        .unwrap();

        assert_eq!(record.last_status, LifecycleStatus::Running);
        assert_eq!(record.cpu, Some(2.0));
        assert_eq!(record.last_pid, None);
        assert_eq!(record.unit_name, None);
    }

    #[test]
    fn test_null_status_reads_as_unknown() {
        let records: Vec<EnvironmentRecord> =
            serde_json::from_str(r#"[{"namespace":"a","last_status":null},{"namespace":"b","last_status":"running"}]"#)
                .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].last_status, LifecycleStatus::default());
        assert_eq!(records[0].last_status.to_string(), "unknown");
        assert_eq!(records[1].last_status, LifecycleStatus::Running);
    }

    #[test]
    fn test_unknown_status_kept_verbatim() {
        let status = LifecycleStatus::from("created");
        assert_eq!(status.to_string(), "created");
        assert_eq!(LifecycleStatus::default().to_string(), "unknown");
    }

    #[test]
    fn test_status_report_accepts_short_field_names() {
        let report: StatusReport = serde_json::from_value(json!({
            "status": "finished",
            "cpu": 1.5,
            "memory": 256,
        }))
        .unwrap();

        assert_eq!(report.cpu_requested, Some(1.5));
        assert_eq!(report.memory_requested, Some(256));
        assert_eq!(or_placeholder(report.unit.as_deref()), PLACEHOLDER);
        assert_eq!(report.lifecycle(), LifecycleStatus::Finished);
    }
}
