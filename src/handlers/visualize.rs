//! Visualization HTTP boundary: question + SQL + result rows in, ranked
//! chart recommendations out.

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::models::chart::VisualizationResponse;
use crate::services::viz::frame_from_rows;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct VisualizeBody {
    pub user_query: String,
    #[serde(default)]
    pub sql: String,
    #[serde(default)]
    pub rows: Vec<Value>,
}

pub async fn visualize(
    State(state): State<AppState>,
    Json(body): Json<VisualizeBody>,
) -> Json<VisualizationResponse> {
    let df = frame_from_rows(&body.rows);
    let response = state
        .visualization
        .analyze_and_visualize(&body.user_query, &body.sql, df)
        .await;
    Json(response)
}
