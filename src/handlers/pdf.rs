//! PDF cohort HTTP boundary: raw document bytes in, compiled cohort out.

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde_json::Value;

use crate::utils::{ApiError, ApiResult};
use crate::AppState;

pub async fn analyze(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<Value>> {
    if body.is_empty() {
        return Err(ApiError::invalid_input("Empty PDF upload"));
    }
    state.cost.ensure_budget_ok()?;
    let response = state.pdf_service.analyze(&body).await?;
    Ok(Json(serde_json::to_value(response)?))
}
