//! End-to-end API tests over the axum router with scripted collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::util::ServiceExt;

use clinquery::config::Config;
use clinquery::services::llm::{ChatMessage, ChatResponse, LlmClient};
use clinquery::services::oracle::driver::{DriverRows, OracleDriver};
use clinquery::services::pdf::{PdfContent, PdfExtractor};
use clinquery::utils::{ApiError, ApiResult};
use clinquery::{handlers, AppState, Collaborators};

struct ScriptedLlm;

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        _model: &str,
        _max_tokens: u32,
    ) -> ApiResult<ChatResponse> {
        let system = &messages[0].content;
        let content = if system.contains("query planner") {
            r#"{"intent": {"metric": "count"}, "assumptions": []}"#.to_string()
        } else if system.contains("SQL engineer") {
            r#"{"final_sql": "SELECT ADMISSION_TYPE, COUNT(*) AS CNT FROM ADMISSIONS WHERE ADMISSION_TYPE IS NOT NULL GROUP BY ADMISSION_TYPE", "used_tables": ["ADMISSIONS"], "risk_score": 1}"#
                .to_string()
        } else {
            r#"{"final_sql": "SELECT 1 FROM DUAL WHERE 1=1", "used_tables": [], "risk_score": 0}"#
                .to_string()
        };
        Ok(ChatResponse { content, usage: Default::default() })
    }
}

struct FixtureDriver;

#[async_trait]
impl OracleDriver for FixtureDriver {
    async fn query(
        &self,
        _sql: &str,
        _bind_row_cap: Option<u64>,
        _timeout_sec: u64,
    ) -> ApiResult<DriverRows> {
        Ok(DriverRows {
            columns: vec!["ADMISSION_TYPE".to_string(), "CNT".to_string()],
            rows: vec![
                vec![json!("EW EMER."), json!(812)],
                vec![json!("ELECTIVE"), json!(341)],
            ],
        })
    }

    async fn execute_session(&self, _sql: &str) -> ApiResult<()> {
        Ok(())
    }

    async fn reset_pool(&self) -> ApiResult<()> {
        Ok(())
    }
}

struct NoPdf;

#[async_trait]
impl PdfExtractor for NoPdf {
    async fn extract(&self, _file_content: &[u8]) -> ApiResult<PdfContent> {
        Err(ApiError::invalid_input("no extractor in tests"))
    }
}

fn app(dir: &tempfile::TempDir) -> axum::Router {
    let base = dir.path().to_str().unwrap().to_string();
    let mut config = Config::default();
    config.query.demo_mode = false;
    config.query.translate_ko_to_en = false;
    config.rag.multi_query = false;
    config.rag.persist_dir = format!("{}/rag", base);
    config.paths.metadata_dir = format!("{}/metadata", base);
    config.paths.events_log = format!("{}/logs/events.jsonl", base);
    config.paths.cost_state = format!("{}/logs/cost_state.json", base);
    config.paths.demo_cache = format!("{}/cache/demo_cache.json", base);

    let state = AppState::build(config, Collaborators {
        oracle_driver: Arc::new(FixtureDriver),
        llm_client: Arc::new(ScriptedLlm),
        document_store: None,
        pdf_extractor: Arc::new(NoPdf),
    });
    handlers::router(state)
}

async fn post_json(app: &axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get_json(app: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn oneshot_then_run_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);

    let (status, body) = post_json(
        &app,
        "/query/oneshot",
        json!({ "question": "How many admissions per admission type?" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payload"]["mode"], "advanced");
    let qid = body["qid"].as_str().unwrap().to_string();
    let final_sql = body["payload"]["final"]["final_sql"].as_str().unwrap();
    assert!(final_sql.contains("ADMISSION_TYPE"));

    // The stored payload is retrievable.
    let (status, body) = get_json(&app, &format!("/query/get?qid={}", qid)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["qid"], qid.as_str());

    // Running without the ack is rejected.
    let (status, _) = post_json(&app, "/query/run", json!({ "qid": qid })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // With the ack the stored SQL executes under the row cap.
    let (status, body) =
        post_json(&app, "/query/run", json!({ "qid": qid, "user_ack": true })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["policy"]["passed"], true);
    let row_count = body["result"]["row_count"].as_u64().unwrap();
    let row_cap = body["result"]["row_cap"].as_u64().unwrap();
    assert!(row_count <= row_cap);
    assert_eq!(row_count, 2);
}

#[tokio::test]
async fn write_statements_are_refused_by_policy() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);

    let (status, body) = post_json(
        &app,
        "/query/run",
        json!({ "sql": "DELETE FROM PATIENTS", "user_ack": true }),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Write operations are not allowed");
}

#[tokio::test]
async fn unknown_qid_is_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);
    let (status, _) = get_json(&app, "/query/get?qid=missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn audit_log_collects_run_events() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(&dir);

    post_json(
        &app,
        "/query/run",
        json!({
            "sql": "SELECT COUNT(*) AS CNT FROM ADMISSIONS WHERE 1=1",
            "user_ack": true,
            "user_name": "김연구",
            "user_role": "연구원"
        }),
    )
    .await;

    let (status, body) = get_json(&app, "/audit/logs?limit=10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["total"].as_u64().unwrap(), 1);
    assert_eq!(body["logs"][0]["user"]["name"], "김연구");
    assert_eq!(body["logs"][0]["execution"]["status"], "success");
}

#[tokio::test]
async fn demo_questions_lists_cache_labels() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("cache")).unwrap();
    std::fs::write(
        dir.path().join("cache/demo_cache.json"),
        json!({ "환자 수가 가장 많은 입원 유형은?": { "sql": "SELECT 1 FROM DUAL" } }).to_string(),
    )
    .unwrap();
    let app = app(&dir);

    let (status, body) = get_json(&app, "/query/demo/questions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["questions"][0], "환자 수가 가장 많은 입원 유형은?");
}
