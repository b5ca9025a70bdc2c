//! Cohort simulation HTTP boundary.

use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::models::cohort::CohortParams;
use crate::utils::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SimulationBody {
    #[serde(default)]
    pub params: CohortParams,
    #[serde(default = "default_true")]
    pub include_baseline: bool,
}

#[derive(Debug, Deserialize)]
pub struct CohortSqlBody {
    #[serde(default)]
    pub params: CohortParams,
}

#[derive(Debug, Deserialize)]
pub struct SaveCohortBody {
    pub name: String,
    #[serde(default)]
    pub params: CohortParams,
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_true() -> bool {
    true
}

fn default_status() -> String {
    "active".to_string()
}

pub async fn simulate(
    State(state): State<AppState>,
    Json(body): Json<SimulationBody>,
) -> ApiResult<Json<Value>> {
    let response = state
        .cohort_engine
        .simulate(body.params, body.include_baseline)
        .await?;
    Ok(Json(serde_json::to_value(response)?))
}

pub async fn cohort_sql(
    State(state): State<AppState>,
    Json(body): Json<CohortSqlBody>,
) -> ApiResult<Json<Value>> {
    body.params
        .check()
        .map_err(crate::utils::ApiError::validation_error)?;
    let bundle = state.cohort_engine.sql_bundle(&body.params);
    Ok(Json(json!({
        "params": body.params,
        "sample_rows": state.cohort_engine.sample_rows(),
        "sql": bundle,
    })))
}

pub async fn list_saved(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "cohorts": state.cohort_engine.list_saved().await }))
}

pub async fn save(
    State(state): State<AppState>,
    Json(body): Json<SaveCohortBody>,
) -> ApiResult<Json<Value>> {
    let cohort = state
        .cohort_engine
        .save_cohort(&body.name, body.params, &body.status)
        .await?;
    Ok(Json(json!({ "ok": true, "cohort": cohort })))
}

pub async fn delete_saved(
    State(state): State<AppState>,
    Path(cohort_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let count = state.cohort_engine.delete_saved(&cohort_id).await?;
    Ok(Json(json!({ "ok": true, "count": count })))
}
