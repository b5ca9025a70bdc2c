use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditUser {
    pub name: String,
    pub role: String,
}

impl Default for AuditUser {
    fn default() -> Self {
        Self { name: "사용자".to_string(), role: "연구원".to_string() }
    }
}

/// One append-only audit event, serialized as a JSONL line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub event: String,
    #[serde(default)]
    pub ts: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    pub sql: String,
    /// success | warning | error
    pub status: String,
    pub rows_returned: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_cap: Option<i64>,
    pub duration_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    pub user: AuditUser,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub applied_terms: Vec<Value>,
    #[serde(default)]
    pub applied_metrics: Vec<Value>,
}

impl AuditEvent {
    pub fn new(event: &str) -> Self {
        Self {
            event_type: "audit".to_string(),
            event: event.to_string(),
            ts: 0,
            qid: None,
            question: None,
            sql: String::new(),
            status: "success".to_string(),
            rows_returned: 0,
            row_cap: None,
            duration_ms: 0,
            mode: None,
            user: AuditUser::default(),
            error: None,
            applied_terms: Vec::new(),
            applied_metrics: Vec::new(),
        }
    }
}

/// Formatted audit row for the dashboard listing.
#[derive(Debug, Clone, Serialize)]
pub struct AuditLogRow {
    pub id: String,
    pub timestamp: String,
    pub ts: i64,
    pub user: AuditUser,
    pub query: AuditQuery,
    #[serde(rename = "appliedTerms")]
    pub applied_terms: Vec<Value>,
    #[serde(rename = "appliedMetrics")]
    pub applied_metrics: Vec<Value>,
    pub execution: AuditExecution,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditQuery {
    pub original: String,
    pub sql: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditExecution {
    pub duration: String,
    #[serde(rename = "rowsReturned")]
    pub rows_returned: i64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditStats {
    pub total: usize,
    pub today: usize,
    pub active_users: usize,
    pub success_rate: f64,
}
