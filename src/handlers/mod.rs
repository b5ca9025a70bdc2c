//! Thin HTTP boundary. The HTTP surface itself is a collaborator contract:
//! handlers deserialize, delegate to services, and map `ApiError` to status
//! codes; no business logic lives here.

pub mod audit;
pub mod cohort;
pub mod pdf;
pub mod query;
pub mod visualize;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/query/oneshot", post(query::oneshot))
        .route("/query/run", post(query::run))
        .route("/query/get", get(query::get_query))
        .route("/query/demo/questions", get(query::demo_questions))
        .route("/admin/metadata/reindex", post(query::reindex_metadata))
        .route("/visualize", post(visualize::visualize))
        .route("/cohort/simulate", post(cohort::simulate))
        .route("/cohort/sql", post(cohort::cohort_sql))
        .route("/cohort/saved", get(cohort::list_saved).post(cohort::save))
        .route("/cohort/saved/:cohort_id", delete(cohort::delete_saved))
        .route("/pdf/analyze", post(pdf::analyze))
        .route("/audit/logs", get(audit::logs))
        .with_state(state)
}
