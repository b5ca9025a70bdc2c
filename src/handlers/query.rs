//! Text-to-SQL HTTP boundary: oneshot, run, stored-payload lookup, and the
//! demo question listing. Handlers only deserialize, delegate, and audit.

use std::time::Instant;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::audit::{AuditEvent, AuditUser};
use crate::models::query::{ConversationTurn, OneshotPayload};
use crate::services::orchestrator::OneshotRequest;
use crate::utils::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct OneshotBody {
    pub question: String,
    #[serde(default)]
    pub translate: Option<bool>,
    #[serde(default)]
    pub rag_multi: Option<bool>,
    #[serde(default)]
    pub conversation: Vec<ConversationTurn>,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RunBody {
    #[serde(default)]
    pub qid: Option<String>,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub user_ack: bool,
    #[serde(default)]
    pub user_name: Option<String>,
    #[serde(default)]
    pub user_role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GetParams {
    pub qid: String,
}

fn audit_user(name: &Option<String>, role: &Option<String>) -> AuditUser {
    let mut user = AuditUser::default();
    if let Some(name) = name {
        if !name.trim().is_empty() {
            user.name = name.trim().to_string();
        }
    }
    if let Some(role) = role {
        if !role.trim().is_empty() {
            user.role = role.trim().to_string();
        }
    }
    user
}

fn payload_sql(payload: &OneshotPayload) -> String {
    match payload {
        OneshotPayload::Demo { result, .. } => result
            .get("sql")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        other => other.final_sql().unwrap_or_default().to_string(),
    }
}

fn payload_mode(payload: &OneshotPayload) -> &'static str {
    match payload {
        OneshotPayload::Demo { .. } => "demo",
        OneshotPayload::Advanced { .. } => "advanced",
        OneshotPayload::Clarification { .. } => "clarification",
    }
}

pub async fn oneshot(
    State(state): State<AppState>,
    Json(body): Json<OneshotBody>,
) -> ApiResult<Json<Value>> {
    state.cost.ensure_budget_ok()?;
    let start = Instant::now();
    let request = OneshotRequest {
        question: body.question.clone(),
        translate: body.translate,
        rag_multi: body.rag_multi,
        conversation: body.conversation,
    };

    let outcome = state.orchestrator.run_oneshot(&request).await;
    let duration_ms = start.elapsed().as_millis() as i64;

    let mut event = AuditEvent::new("query_oneshot");
    event.question = Some(body.question.clone());
    event.user = audit_user(&body.user_name, &body.user_role);
    event.duration_ms = duration_ms;

    match outcome {
        Ok(payload) => {
            event.sql = payload_sql(&payload);
            event.mode = Some(payload_mode(&payload).to_string());
            if let OneshotPayload::Demo { result, .. } = &payload {
                event.rows_returned = result
                    .get("preview")
                    .and_then(|preview| preview.get("row_count"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
            }
            state.audit.append(event);

            let qid = state.orchestrator.store_payload(payload.clone());
            Ok(Json(json!({ "qid": qid, "payload": payload })))
        },
        Err(err) => {
            event.status = "error".to_string();
            event.error = Some(err.detail());
            state.audit.append(event);
            Err(err)
        },
    }
}

pub async fn run(
    State(state): State<AppState>,
    Json(body): Json<RunBody>,
) -> ApiResult<Json<Value>> {
    state.cost.ensure_budget_ok()?;
    if !body.user_ack {
        return Err(ApiError::invalid_input("user_ack is required"));
    }

    let start = Instant::now();
    let question = body
        .qid
        .as_deref()
        .and_then(|qid| state.orchestrator.get_payload(qid))
        .map(|payload| payload.question().to_string());

    let outcome = state
        .orchestrator
        .run_sql(body.qid.as_deref(), body.sql.as_deref())
        .await;
    let duration_ms = start.elapsed().as_millis() as i64;

    let mut event = AuditEvent::new("query_run");
    event.qid = body.qid.clone();
    event.question = question;
    event.user = audit_user(&body.user_name, &body.user_role);
    event.duration_ms = duration_ms;

    match outcome {
        Ok((sql, result, policy)) => {
            event.sql = sql.clone();
            event.rows_returned = result.row_count as i64;
            event.row_cap = Some(result.row_cap as i64);
            if result.row_count as u64 >= result.row_cap {
                event.status = "warning".to_string();
            }
            state.audit.append(event);
            Ok(Json(json!({ "sql": sql, "result": result, "policy": policy })))
        },
        Err(err) => {
            event.sql = body.sql.clone().unwrap_or_default();
            event.status = "error".to_string();
            event.error = Some(err.detail());
            state.audit.append(event);
            Err(err)
        },
    }
}

pub async fn get_query(
    State(state): State<AppState>,
    Query(params): Query<GetParams>,
) -> ApiResult<Json<Value>> {
    match state.orchestrator.get_payload(&params.qid) {
        Some(payload) => Ok(Json(json!({ "qid": params.qid, "payload": payload }))),
        None => Err(ApiError::not_found("Query not found")),
    }
}

pub async fn demo_questions(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "questions": state.orchestrator.demo_questions() }))
}

/// Rebuild the RAG index from the metadata directory.
pub async fn reindex_metadata(State(state): State<AppState>) -> Json<Value> {
    let counts = state.indexer.reindex(&state.config.paths.metadata_dir);
    Json(json!({ "ok": true, "counts": counts }))
}
