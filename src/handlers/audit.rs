//! Audit log HTTP boundary.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LogsParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    200
}

pub async fn logs(State(state): State<AppState>, Query(params): Query<LogsParams>) -> Json<Value> {
    let limit = params.limit.clamp(1, 2000);
    let (logs, stats) = state.audit.logs(limit);
    Json(json!({ "logs": logs, "stats": stats }))
}
