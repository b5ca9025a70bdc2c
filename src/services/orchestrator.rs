//! Text-to-SQL orchestrator.
//!
//! Pipeline: demo lookup -> clarifier -> translate -> retrieve -> plan ->
//! engineer -> expert? -> postprocess -> align -> policy, with a bounded
//! retry loop and cost accounting around every agent call. Execution runs
//! separately with error-template repair and one LLM repair pass.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use serde_json::Value;

use crate::config::{OracleConfig, PathsConfig, QueryConfig, RagConfig};
use crate::models::query::{
    ConversationTurn, OneshotPayload, PolicyReport, QueryResult,
};
use crate::services::cost::CostTracker;
use crate::services::llm::{contains_korean, Agents};
use crate::services::metadata::SettingsStore;
use crate::services::oracle::OracleExecutor;
use crate::services::rag::Retriever;
use crate::services::sql::{
    apply_sql_error_templates, enforce_intent_alignment, classify, postprocess_sql, precheck_sql,
};
use crate::utils::{ApiError, ApiResult};

const QUERY_STORE_CAPACITY: usize = 256;

pub struct OneshotRequest {
    pub question: String,
    pub translate: Option<bool>,
    pub rag_multi: Option<bool>,
    pub conversation: Vec<ConversationTurn>,
}

pub struct Orchestrator {
    agents: Arc<Agents>,
    retriever: Arc<Retriever>,
    executor: Arc<OracleExecutor>,
    cost: Arc<CostTracker>,
    settings: SettingsStore,
    query_config: QueryConfig,
    oracle_config: OracleConfig,
    rag_config: RagConfig,
    demo_cache_path: PathBuf,
    query_store: Mutex<LruCache<String, OneshotPayload>>,
}

fn normalize_question(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { ' ' })
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agents: Arc<Agents>,
        retriever: Arc<Retriever>,
        executor: Arc<OracleExecutor>,
        cost: Arc<CostTracker>,
        settings: SettingsStore,
        query_config: QueryConfig,
        oracle_config: OracleConfig,
        rag_config: RagConfig,
        paths: &PathsConfig,
    ) -> Self {
        Self {
            agents,
            retriever,
            executor,
            cost,
            settings,
            query_config,
            oracle_config,
            rag_config,
            demo_cache_path: PathBuf::from(&paths.demo_cache),
            query_store: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_STORE_CAPACITY).expect("nonzero capacity"),
            )),
        }
    }

    // ------------------------------------------------------------------
    // Demo cache
    // ------------------------------------------------------------------

    fn load_demo_cache(&self) -> serde_json::Map<String, Value> {
        let Ok(raw) = std::fs::read_to_string(&self.demo_cache_path) else {
            return serde_json::Map::new();
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }

    fn demo_lookup(&self, question: &str) -> Option<OneshotPayload> {
        let cache = self.load_demo_cache();
        if cache.is_empty() {
            return None;
        }
        if let Some(result) = cache.get(question) {
            if question != "_aliases" {
                return Some(OneshotPayload::Demo {
                    question: question.to_string(),
                    result: result.clone(),
                    matched: None,
                });
            }
        }
        let normalized = normalize_question(question);
        if normalized.is_empty() {
            return None;
        }
        for (key, result) in &cache {
            if key == "_aliases" {
                continue;
            }
            if normalize_question(key) == normalized {
                return Some(OneshotPayload::Demo {
                    question: question.to_string(),
                    result: result.clone(),
                    matched: Some(key.clone()),
                });
            }
        }
        None
    }

    /// Canonical demo question labels for the UI.
    pub fn demo_questions(&self) -> Vec<String> {
        let cache = self.load_demo_cache();
        if let Some(Value::Object(aliases)) = cache.get("_aliases") {
            if !aliases.is_empty() {
                return aliases.keys().cloned().collect();
            }
        }
        cache.keys().filter(|key| *key != "_aliases").cloned().collect()
    }

    // ------------------------------------------------------------------
    // Oneshot pipeline
    // ------------------------------------------------------------------

    async fn run_advanced(
        &self,
        question: &str,
        question_en: Option<String>,
        rag_multi: bool,
    ) -> ApiResult<OneshotPayload> {
        let risk = classify(question);

        let context = if rag_multi {
            let mut questions = vec![question.to_string()];
            if let Some(en) = &question_en {
                questions.push(en.clone());
            }
            self.retriever.build_candidate_context_multi(&questions).await
        } else {
            self.retriever.build_candidate_context(question).await
        };

        self.cost.ensure_budget_ok()?;
        let planner = match self
            .agents
            .plan_query_intent(question, &context, question_en.as_deref())
            .await
        {
            Ok(payload) => {
                self.cost.add_llm_usage(&payload.usage, "planner");
                Some(payload)
            },
            Err(err) => {
                tracing::warn!("Planner failed, continuing without intent: {}", err.detail());
                None
            },
        };
        let planner_intent = planner.as_ref().map(|p| &p.intent);

        self.cost.ensure_budget_ok()?;
        let draft = self.agents.generate_sql(question, &context).await?;
        self.cost.add_llm_usage(&draft.usage, "engineer");

        let mut final_payload = draft.clone();
        if self.query_config.expert_trigger_mode == "score"
            && risk.risk >= self.query_config.expert_score_threshold
        {
            self.cost.ensure_budget_ok()?;
            let expert = self
                .agents
                .review_sql(question, &context, &draft, question_en.as_deref(), planner_intent)
                .await?;
            self.cost.add_llm_usage(&expert.usage, "expert");
            final_payload = expert;
        }

        if !final_payload.final_sql.is_empty() {
            let (rewritten, rules) = postprocess_sql(
                question,
                &final_payload.final_sql,
                self.oracle_config.row_cap,
            );
            if !rules.is_empty() {
                final_payload.final_sql = rewritten;
                final_payload.postprocess = rules;
            }

            let (aligned, align_rules, remaining) = enforce_intent_alignment(
                question,
                &final_payload.final_sql,
                planner_intent,
                self.oracle_config.row_cap,
            );
            if !align_rules.is_empty() {
                final_payload.final_sql = aligned;
                final_payload.postprocess.extend(align_rules);
            }
            if !remaining.is_empty() {
                // Dataset mismatches are logged, never raised.
                tracing::warn!("Intent alignment issues remain: {:?}", remaining);
                final_payload.alignment_warnings = remaining;
            }

            let scope = self.settings.table_scope().await;
            let policy_question = question_en.as_deref().unwrap_or(question);
            precheck_sql(
                &final_payload.final_sql,
                Some(policy_question),
                self.oracle_config.max_db_joins,
                &scope,
            )?;
        }

        Ok(OneshotPayload::Advanced {
            question: question.to_string(),
            question_en,
            risk,
            context,
            planner,
            draft,
            final_payload,
        })
    }

    /// Full oneshot run. Deterministic failures (policy, budget) surface
    /// directly; agent failures retry up to the configured attempt count.
    pub async fn run_oneshot(&self, request: &OneshotRequest) -> ApiResult<OneshotPayload> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(ApiError::invalid_input("Question must not be empty"));
        }

        if self.query_config.demo_mode {
            if let Some(hit) = self.demo_lookup(question) {
                tracing::info!("Demo cache hit for question");
                return Ok(hit);
            }
        }

        // Multi-turn questions go through the clarifier first.
        let mut effective_question = question.to_string();
        if !request.conversation.is_empty() {
            self.cost.ensure_budget_ok()?;
            match self
                .agents
                .evaluate_question_clarity(question, &request.conversation)
                .await
            {
                Ok(clarifier) => {
                    self.cost.add_llm_usage(&clarifier.usage, "clarifier");
                    if clarifier.need_clarification {
                        return Ok(OneshotPayload::Clarification {
                            question: question.to_string(),
                            clarifier,
                        });
                    }
                    if !clarifier.refined_question.trim().is_empty() {
                        effective_question = clarifier.refined_question.trim().to_string();
                    }
                },
                Err(err) => {
                    tracing::warn!("Clarifier failed, continuing: {}", err.detail());
                },
            }
        }

        let translate_enabled =
            request.translate.unwrap_or(self.query_config.translate_ko_to_en);
        let question_en = if translate_enabled && contains_korean(&effective_question) {
            self.cost.ensure_budget_ok()?;
            match self.agents.translate_to_english(&effective_question).await {
                Ok((translated, usage)) => {
                    self.cost.add_llm_usage(&usage, "translator");
                    Some(translated)
                },
                Err(err) => {
                    tracing::warn!("Translation failed, continuing with original: {}", err.detail());
                    None
                },
            }
        } else {
            None
        };

        let rag_multi = request.rag_multi.unwrap_or(self.rag_config.multi_query);

        let mut attempt = 0u32;
        let mut last_error: Option<ApiError> = None;
        while attempt <= self.query_config.max_retry_attempts {
            attempt += 1;
            match self
                .run_advanced(&effective_question, question_en.clone(), rag_multi)
                .await
            {
                Ok(payload) => return Ok(payload),
                Err(err) => {
                    // Policy and budget failures are deterministic; retrying
                    // the agents cannot fix them.
                    if matches!(
                        err,
                        ApiError::PolicyViolation(_)
                            | ApiError::Unsupported(_)
                            | ApiError::TableScope(_)
                            | ApiError::BudgetExceeded(_)
                    ) {
                        return Err(err);
                    }
                    tracing::warn!("Oneshot attempt {} failed: {}", attempt, err.detail());
                    last_error = Some(err);
                },
            }
        }
        Err(last_error.unwrap_or_else(|| ApiError::internal_error("Oneshot failed")))
    }

    // ------------------------------------------------------------------
    // Query record store
    // ------------------------------------------------------------------

    pub fn store_payload(&self, payload: OneshotPayload) -> String {
        let qid = uuid::Uuid::new_v4().to_string();
        self.query_store
            .lock()
            .expect("query store poisoned")
            .put(qid.clone(), payload);
        qid
    }

    pub fn get_payload(&self, qid: &str) -> Option<OneshotPayload> {
        self.query_store.lock().expect("query store poisoned").get(qid).cloned()
    }

    // ------------------------------------------------------------------
    // Execution with repair
    // ------------------------------------------------------------------

    /// Execute a stored or provided SQL after policy, repairing on Oracle
    /// errors: templates first, the LLM repair agent when templates change
    /// nothing, capped by the attempt count.
    pub async fn run_sql(
        &self,
        qid: Option<&str>,
        sql: Option<&str>,
    ) -> ApiResult<(String, QueryResult, PolicyReport)> {
        let stored = qid.and_then(|qid| self.get_payload(qid));
        let sql = match sql {
            Some(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => stored
                .as_ref()
                .and_then(OneshotPayload::final_sql)
                .map(str::to_string)
                .ok_or_else(|| ApiError::invalid_input("SQL not provided"))?,
        };
        let question = stored.as_ref().map(|payload| payload.question().to_string());

        let scope = self.settings.table_scope().await;
        let policy = precheck_sql(
            &sql,
            question.as_deref(),
            self.oracle_config.max_db_joins,
            &scope,
        )?;

        let mut current_sql = sql.clone();
        let mut attempt = 0u32;
        loop {
            match self.executor.execute_sql(&current_sql).await {
                Ok(result) => {
                    self.cost.add_sql_run_cost();
                    return Ok((current_sql, result, policy));
                },
                Err(err) => {
                    if attempt >= self.query_config.max_retry_attempts {
                        return Err(err);
                    }
                    attempt += 1;
                    let message = err.detail();
                    let question_text = question.clone().unwrap_or_default();
                    let (repaired, rules) = apply_sql_error_templates(
                        &question_text,
                        &current_sql,
                        &message,
                        self.oracle_config.row_cap,
                    );
                    if !rules.is_empty() && repaired != current_sql {
                        tracing::info!("SQL repaired via error templates: {:?}", rules);
                        current_sql = repaired;
                        continue;
                    }

                    // Templates changed nothing: ask the repair agent once per
                    // attempt.
                    self.cost.ensure_budget_ok()?;
                    let context = self
                        .retriever
                        .build_candidate_context(&question_text)
                        .await;
                    let repair = self
                        .agents
                        .repair_sql_after_error(
                            &question_text,
                            &context,
                            &current_sql,
                            &message,
                            None,
                            None,
                        )
                        .await?;
                    self.cost.add_llm_usage(&repair.usage, "repair");
                    if repair.final_sql.trim().is_empty()
                        || repair.final_sql.trim() == current_sql
                    {
                        return Err(err);
                    }
                    current_sql = repair.final_sql.trim().to_string();
                    tracing::info!("SQL repaired via LLM agent");
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::query::TokenUsage;
    use crate::services::cost::CostTracker;
    use crate::services::embedding::HashedEmbedder;
    use crate::services::llm::{ChatMessage, ChatResponse, LlmClient};
    use crate::services::metadata::{
        ColumnValueStore, ConceptMapStore, LabelIntentStore, SchemaCatalogStore,
    };
    use crate::services::oracle::driver::{DriverRows, OracleDriver};
    use crate::services::store::StateStore;
    use crate::services::vector_store::SimpleVectorStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

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
                r#"{"intent": {"metric": "count", "comparison": "admission type"}, "assumptions": []}"#
            } else if system.contains("SQL engineer") {
                r#"{"final_sql": "SELECT ADMISSION_TYPE, COUNT(*) AS CNT FROM ADMISSIONS WHERE ADMISSION_TYPE IS NOT NULL GROUP BY ADMISSION_TYPE", "used_tables": ["ADMISSIONS"], "risk_score": 1}"#
            } else if system.contains("Translate Korean") {
                "Which admission type has the most patients?"
            } else {
                r#"{"final_sql": "SELECT 1 FROM DUAL WHERE 1=1", "used_tables": [], "risk_score": 0}"#
            };
            Ok(ChatResponse {
                content: content.to_string(),
                usage: TokenUsage { prompt_tokens: 50, completion_tokens: 20, total_tokens: 70 },
            })
        }
    }

    struct CountingDriver {
        calls: AtomicUsize,
        fail_first_with: Option<String>,
    }

    #[async_trait]
    impl OracleDriver for CountingDriver {
        async fn query(
            &self,
            _sql: &str,
            _bind_row_cap: Option<u64>,
            _timeout_sec: u64,
        ) -> ApiResult<DriverRows> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == 0 {
                if let Some(message) = &self.fail_first_with {
                    return Err(ApiError::execution_failed(message.clone()));
                }
            }
            Ok(DriverRows {
                columns: vec!["ADMISSION_TYPE".into(), "CNT".into()],
                rows: vec![vec![json!("EW EMER."), json!(120)]],
            })
        }

        async fn execute_session(&self, _sql: &str) -> ApiResult<()> {
            Ok(())
        }

        async fn reset_pool(&self) -> ApiResult<()> {
            Ok(())
        }
    }

    fn orchestrator(
        dir: &tempfile::TempDir,
        demo_mode: bool,
        fail_first_with: Option<&str>,
    ) -> Orchestrator {
        let meta_dir = dir.path().to_str().unwrap().to_string();
        let store = Arc::new(SimpleVectorStore::new(
            dir.path().join("rag/simple_store.json"),
            Arc::new(HashedEmbedder::new(64)),
        ));
        let state = StateStore::local(dir.path().join("state.json"));
        let settings = SettingsStore::new(state, &meta_dir);
        let retriever = Arc::new(Retriever::new(
            RagConfig::default(),
            store,
            Arc::new(ConceptMapStore::new(dir.path().join("diagnosis_icd_map.jsonl"))),
            Arc::new(ConceptMapStore::new(dir.path().join("procedure_icd_map.jsonl"))),
            Arc::new(ColumnValueStore::new(dir.path().join("column_value_docs.jsonl"))),
            Arc::new(LabelIntentStore::new(dir.path().join("label_intent_profiles.jsonl"))),
            Arc::new(SchemaCatalogStore::new(dir.path().join("schema_catalog.json"))),
            settings.clone(),
        ));
        let executor = Arc::new(OracleExecutor::new(
            Arc::new(CountingDriver {
                calls: AtomicUsize::new(0),
                fail_first_with: fail_first_with.map(str::to_string),
            }),
            OracleConfig::default(),
        ));
        let cost = Arc::new(CostTracker::new(
            crate::config::BudgetConfig::default(),
            dir.path().join("cost_state.json"),
        ));
        let agents =
            Arc::new(Agents::new(Arc::new(ScriptedLlm), crate::config::LlmConfig::default()));
        let paths = PathsConfig {
            demo_cache: dir.path().join("demo_cache.json").to_str().unwrap().to_string(),
            ..PathsConfig::default()
        };
        Orchestrator::new(
            agents,
            retriever,
            executor,
            cost,
            SettingsStore::new(StateStore::local(dir.path().join("state2.json")), &meta_dir),
            QueryConfig { demo_mode, ..QueryConfig::default() },
            OracleConfig::default(),
            RagConfig { multi_query: false, ..RagConfig::default() },
            &paths,
        )
    }

    fn oneshot(question: &str) -> OneshotRequest {
        OneshotRequest {
            question: question.to_string(),
            translate: None,
            rag_multi: None,
            conversation: Vec::new(),
        }
    }

    #[tokio::test]
    async fn demo_cache_hits_exact_and_normalized_keys() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(&dir, true, None);
        std::fs::write(
            dir.path().join("demo_cache.json"),
            json!({
                "How many patients?": {"sql": "SELECT COUNT(*) FROM PATIENTS", "preview": {"row_count": 1}},
                "_aliases": {"How many patients?": "patients"}
            })
            .to_string(),
        )
        .unwrap();

        let hit = orchestrator.run_oneshot(&oneshot("How many patients?")).await.unwrap();
        assert!(matches!(hit, OneshotPayload::Demo { matched: None, .. }));

        let normalized = orchestrator
            .run_oneshot(&oneshot("how many   PATIENTS"))
            .await
            .unwrap();
        match normalized {
            OneshotPayload::Demo { matched, .. } => {
                assert_eq!(matched.as_deref(), Some("How many patients?"));
            },
            other => panic!("expected demo hit, got {:?}", serde_json::to_string(&other)),
        }

        assert_eq!(orchestrator.demo_questions(), vec!["How many patients?"]);
    }

    #[tokio::test]
    async fn korean_question_translates_and_passes_policy() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(&dir, false, None);
        let payload = orchestrator
            .run_oneshot(&oneshot("환자 수가 가장 많은 입원 유형은?"))
            .await
            .unwrap();
        match payload {
            OneshotPayload::Advanced { question_en, final_payload, .. } => {
                assert!(question_en.unwrap().contains("admission type"));
                assert!(final_payload.final_sql.contains("ADMISSION_TYPE"));
                assert!(final_payload.final_sql.to_uppercase().contains("GROUP BY"));
            },
            other => panic!("expected advanced payload, got {:?}", serde_json::to_string(&other)),
        }
    }

    #[tokio::test]
    async fn stored_payload_executes_with_row_data() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(&dir, false, None);
        let payload = orchestrator
            .run_oneshot(&oneshot("환자 수가 가장 많은 입원 유형은?"))
            .await
            .unwrap();
        let qid = orchestrator.store_payload(payload);

        let (sql, result, policy) = orchestrator.run_sql(Some(&qid), None).await.unwrap();
        assert!(sql.contains("ADMISSION_TYPE"));
        assert!(policy.passed);
        assert_eq!(result.row_count, 1);
        assert!(result.row_count as u64 <= result.row_cap);
    }

    #[tokio::test]
    async fn error_templates_repair_before_llm() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(
            &dir,
            false,
            Some("ORA-00904: \"P\".\"MEDICATION\": invalid identifier"),
        );
        let sql = "SELECT p.MEDICATION, COUNT(*) AS CNT FROM PRESCRIPTIONS p WHERE p.MEDICATION IS NOT NULL GROUP BY p.MEDICATION";
        let (final_sql, result, _) = orchestrator.run_sql(None, Some(sql)).await.unwrap();
        assert!(final_sql.contains("p.DRUG"));
        assert_eq!(result.row_count, 1);
    }

    #[tokio::test]
    async fn missing_sql_and_qid_is_input_error() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(&dir, false, None);
        let err = orchestrator.run_sql(None, None).await.unwrap_err();
        assert_eq!(err.error_code(), 4001);
    }
}
