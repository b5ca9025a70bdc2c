use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::rag::CandidateContext;

/// Token usage as reported by the LLM provider.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub completion_tokens: i64,
    #[serde(default)]
    pub total_tokens: i64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Heuristic risk classification of the incoming question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskInfo {
    pub intent: String,
    pub complexity: i32,
    pub risk: i32,
}

/// JSON contract shared by the engineer, expert, and repair agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlAgentPayload {
    #[serde(default)]
    pub final_sql: String,
    #[serde(default)]
    pub used_tables: Vec<String>,
    #[serde(default)]
    pub risk_score: i32,
    #[serde(default)]
    pub usage: TokenUsage,
    /// Rule tags applied by the post-processor, when any fired.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub postprocess: Vec<String>,
    /// Intent-alignment issues that remained after enforcement.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alignment_warnings: Vec<String>,
}

/// Planner agent output: structured intent plus stated assumptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlannerPayload {
    #[serde(default)]
    pub intent: serde_json::Map<String, Value>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub usage: TokenUsage,
}

/// Clarifier agent output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClarifierPayload {
    #[serde(default)]
    pub need_clarification: bool,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub clarification_question: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub example_inputs: Vec<String>,
    #[serde(default)]
    pub refined_question: String,
    #[serde(default)]
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

/// Result of one oneshot pipeline run, stored per QID until executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OneshotPayload {
    Demo {
        question: String,
        result: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        matched: Option<String>,
    },
    Advanced {
        question: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        question_en: Option<String>,
        risk: RiskInfo,
        context: CandidateContext,
        #[serde(skip_serializing_if = "Option::is_none")]
        planner: Option<PlannerPayload>,
        draft: SqlAgentPayload,
        #[serde(rename = "final")]
        final_payload: SqlAgentPayload,
    },
    Clarification {
        question: String,
        clarifier: ClarifierPayload,
    },
}

impl OneshotPayload {
    /// SQL the run endpoint would execute for this record.
    pub fn final_sql(&self) -> Option<&str> {
        match self {
            OneshotPayload::Advanced { final_payload, draft, .. } => {
                if !final_payload.final_sql.is_empty() {
                    Some(final_payload.final_sql.as_str())
                } else if !draft.final_sql.is_empty() {
                    Some(draft.final_sql.as_str())
                } else {
                    None
                }
            },
            _ => None,
        }
    }

    pub fn question(&self) -> &str {
        match self {
            OneshotPayload::Demo { question, .. }
            | OneshotPayload::Advanced { question, .. }
            | OneshotPayload::Clarification { question, .. } => question,
        }
    }
}

/// One policy check result surfaced to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyCheck {
    pub name: String,
    pub passed: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyReport {
    pub passed: bool,
    pub checks: Vec<PolicyCheck>,
}

/// Oracle execution result, row-capped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub row_cap: u64,
}
