//! PDF cohort pipeline: extract -> conditions -> intent DSL -> compiled CTE
//! cascade -> schema verification -> execution -> patient-level repair, with
//! a canonical-text content-addressed cache.

use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::config::LlmConfig;
use crate::models::query::QueryResult;
use crate::services::llm::{extract_json, ChatMessage, LlmClient};
use crate::services::metadata::SchemaCatalogStore;
use crate::services::oracle::OracleExecutor;
use crate::services::sql::error_templates::apply_sql_error_templates;
use crate::services::store::StateStore;
use crate::utils::{ApiError, ApiResult};

use super::compiler::{compile_oracle_sql, CohortIntent, CompiledCohort};
use super::extract::{PdfContent, PdfExtractor};
use super::signals::SignalMap;

const PDF_CACHE_KEY: &str = "pdf_extraction::cache";
const COHORT_TABLES: &[&str] = &[
    "PATIENTS",
    "ADMISSIONS",
    "DIAGNOSES_ICD",
    "ICUSTAYS",
    "D_ICD_DIAGNOSES",
    "D_ICD_PROCEDURES",
    "PROCEDURES_ICD",
    "LABEVENTS",
    "D_LABITEMS",
    "PRESCRIPTIONS",
    "TRANSFERS",
];

static PAGE_MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[page \d+, block \d+\]|=== page \d+ ===").unwrap());
static NON_TEXT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9가-힣]+").unwrap());
static QUALIFIED_COLUMN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:SSO\.)?([A-Za-z_][A-Za-z0-9_]*)\.([A-Za-z_][A-Za-z0-9_]*)\b").unwrap()
});

const CONDITIONS_SYSTEM_PROMPT: &str = concat!(
    "You are a clinical study methods reader for MIMIC-IV cohort replication. ",
    "From the paper text and asset summaries, extract the cohort definition. ",
    "Return JSON only with keys: population, inclusion_criteria, exclusion_criteria, variables. ",
    "population is one sentence describing the study population. ",
    "inclusion_criteria and exclusion_criteria are lists of short criteria strings. ",
    "variables is a list of {name, unit, threshold} objects for measured signals. ",
    "Keep criteria atomic - one threshold per entry. Do not invent criteria."
);

const INTENT_SYSTEM_PROMPT: &str = concat!(
    "You convert a cohort definition into an executable step list for MIMIC-IV. ",
    "Return JSON only with key steps: a list of ",
    "{type, params, window, is_exclusion, name} objects applied in order. ",
    "type is one of: diagnosis, icu_stay, prescription, vital, derived, age, gender. ",
    "diagnosis params: {codes: [ICD codes]}. icu_stay params: {min_los: days}. ",
    "vital params: {signal, operator, value}. derived params: {name}. ",
    "age params: {min, max}. gender params: {gender}. ",
    "prescription params: {drug}. ",
    "window is one of icu_first_24h, admission_first_24h, icu_discharge_last_24h or null. ",
    "is_exclusion=true turns the step into NOT EXISTS. ",
    "Only emit steps the definition supports."
);

const PATIENT_LEVEL_REPAIR_PROMPT: &str = concat!(
    "You repair MIMIC-IV cohort SQL that returned aggregate-only or empty results. ",
    "Return JSON only with key final_sql. ",
    "The statement must project patient identifiers (SUBJECT_ID, HADM_ID, STAY_ID) ",
    "at the top level and keep the original WITH cascade semantics. ",
    "Oracle syntax only."
);

/// Canonical text form driving the content-addressed cache.
pub fn canonicalize_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped = PAGE_MARKER_RE.replace_all(&lowered, "");
    let collapsed = NON_TEXT_RE.replace_all(&stripped, " ");
    collapsed.trim().to_string()
}

#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct PdfCohortResponse {
    pub conditions: Value,
    pub intent: Value,
    pub cohort_sql: String,
    pub count_sql: String,
    pub debug_count_sql: String,
    pub step_labels: Vec<String>,
    pub patient_count: i64,
    pub funnel: Vec<Value>,
    pub preview: Vec<serde_json::Map<String, Value>>,
    pub warnings: Vec<String>,
    pub cached: bool,
}

pub struct PdfCohortService {
    extractor: Arc<dyn PdfExtractor>,
    client: Arc<dyn LlmClient>,
    config: LlmConfig,
    executor: Arc<OracleExecutor>,
    schema_catalog: Arc<SchemaCatalogStore>,
    state: StateStore,
    signals: SignalMap,
}

fn value_to_count(result: &QueryResult) -> i64 {
    result
        .rows
        .first()
        .and_then(|row| row.first())
        .and_then(|value| match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .unwrap_or(0)
}

fn has_identifier_columns(columns: &[String]) -> bool {
    columns.iter().any(|col| {
        matches!(col.to_uppercase().as_str(), "SUBJECT_ID" | "HADM_ID" | "STAY_ID")
    })
}

impl PdfCohortService {
    pub fn new(
        extractor: Arc<dyn PdfExtractor>,
        client: Arc<dyn LlmClient>,
        config: LlmConfig,
        executor: Arc<OracleExecutor>,
        schema_catalog: Arc<SchemaCatalogStore>,
        state: StateStore,
        metadata_dir: &str,
    ) -> Self {
        let mut signals = SignalMap::with_defaults();
        signals.merge_metadata_file(
            &PathBuf::from(metadata_dir).join("mimic_rag_metadata_full.json"),
        );
        Self { extractor, client, config, executor, schema_catalog, state, signals }
    }

    fn cache_hash(&self, canonical_text: &str, deterministic: bool) -> String {
        let digest = Sha256::digest(
            format!("{}::deterministic={}", canonical_text, deterministic).as_bytes(),
        );
        format!("{:x}", digest)
    }

    async fn cached_response(&self, hash: &str) -> Option<PdfCohortResponse> {
        let cache = self.state.get(PDF_CACHE_KEY).await?;
        let entry = cache.get(hash)?.clone();
        let mut response: PdfCohortResponse = serde_json::from_value(entry).ok()?;
        response.cached = true;
        Some(response)
    }

    async fn store_cache(&self, hash: &str, response: &PdfCohortResponse) {
        let mut cache = self
            .state
            .get(PDF_CACHE_KEY)
            .await
            .and_then(|value| value.as_object().cloned())
            .unwrap_or_default();
        if let Ok(value) = serde_json::to_value(response) {
            cache.insert(hash.to_string(), value);
            self.state.set(PDF_CACHE_KEY, Value::Object(cache)).await;
        }
    }

    fn schema_for_prompt(&self) -> String {
        let catalog = self.schema_catalog.load();
        let mut lines = Vec::new();
        for table in COHORT_TABLES {
            if let Some(entry) = catalog.tables.get(*table) {
                lines.push(SchemaCatalogStore::table_text(table, entry));
            }
        }
        if lines.is_empty() {
            // Keep prompting functional without the catalog file.
            lines.push(
                "Tables: PATIENTS(SUBJECT_ID, GENDER, ANCHOR_AGE), ADMISSIONS(HADM_ID, \
                 SUBJECT_ID, ADMITTIME, DISCHTIME, HOSPITAL_EXPIRE_FLAG), ICUSTAYS(STAY_ID, \
                 HADM_ID, INTIME, OUTTIME, LOS), DIAGNOSES_ICD(HADM_ID, ICD_CODE, ICD_VERSION)"
                    .to_string(),
            );
        }
        lines.join("\n")
    }

    async fn chat_json(&self, system: &str, user: String) -> ApiResult<Value> {
        let response = self
            .client
            .chat(
                vec![ChatMessage::system(system), ChatMessage::user(user)],
                &self.config.engineer_model,
                self.config.max_output_tokens,
            )
            .await?;
        extract_json(&response.content)
    }

    async fn extract_conditions(&self, content: &PdfContent) -> ApiResult<Value> {
        let assets = content.assets_summary();
        let user = format!(
            "Paper text:\n{}\n\nAssets:\n{}\n\nSchema:\n{}",
            content.full_text,
            assets,
            self.schema_for_prompt()
        );
        self.chat_json(CONDITIONS_SYSTEM_PROMPT, user).await
    }

    async fn extract_intent(&self, conditions: &Value) -> ApiResult<(Value, CohortIntent)> {
        let user = format!("Cohort definition JSON:\n{}", conditions);
        let value = self.chat_json(INTENT_SYSTEM_PROMPT, user).await?;
        let intent: CohortIntent = serde_json::from_value(value.clone())
            .map_err(|e| ApiError::upstream(format!("Cohort intent contract violated: {}", e)))?;
        Ok((value, intent))
    }

    /// Verify qualified column references against the catalog. Unknown
    /// columns are reported as warnings; fixing is left to the repair path.
    fn verify_sql(&self, sql: &str) -> (String, Vec<String>) {
        let valid = self.schema_catalog.valid_columns();
        if valid.is_empty() {
            return (sql.to_string(), Vec::new());
        }
        let mut warnings = Vec::new();
        let fixed = QUALIFIED_COLUMN_RE
            .replace_all(sql, |caps: &regex::Captures| {
                let table = caps[1].to_uppercase();
                let column = caps[2].to_uppercase();
                let Some(columns) = valid.get(&table) else {
                    return caps[0].to_string();
                };
                if columns.contains(&column) {
                    return caps[0].to_string();
                }
                let warning = format!("Unknown column {}.{}", table, column);
                if !warnings.contains(&warning) {
                    warnings.push(warning);
                }
                caps[0].to_string()
            })
            .into_owned();
        (fixed, warnings)
    }

    async fn execute_with_repair(&self, sql: &str, question: &str) -> ApiResult<QueryResult> {
        match self.executor.execute_sql(sql).await {
            Ok(result) => Ok(result),
            Err(err) => {
                let message = err.detail();
                let (repaired, rules) = apply_sql_error_templates(
                    question,
                    sql,
                    &message,
                    self.executor.row_cap(),
                );
                if !rules.is_empty() && repaired != sql {
                    tracing::info!("PDF cohort SQL repaired via templates: {:?}", rules);
                    return self.executor.execute_sql(&repaired).await;
                }
                // Templates changed nothing: one LLM repair attempt.
                let user = json!({
                    "failed_sql": sql,
                    "error_message": message,
                    "schema": self.schema_for_prompt(),
                })
                .to_string();
                let value = self.chat_json(PATIENT_LEVEL_REPAIR_PROMPT, user).await?;
                let repaired_sql = value
                    .get("final_sql")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ApiError::upstream("Repair agent returned no final_sql"))?;
                self.executor.execute_sql(repaired_sql).await
            },
        }
    }

    /// Rewrite to patient level when the cohort result is aggregate-only or
    /// empty.
    async fn patient_level_rewrite(&self, sql: &str, reason: &str) -> ApiResult<String> {
        let user = json!({
            "sql": sql,
            "problem": reason,
            "schema": self.schema_for_prompt(),
        })
        .to_string();
        let value = self.chat_json(PATIENT_LEVEL_REPAIR_PROMPT, user).await?;
        value
            .get("final_sql")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::upstream("Patient-level rewrite returned no final_sql"))
    }

    fn funnel_rows(result: &QueryResult) -> Vec<Value> {
        result
            .rows
            .iter()
            .filter(|row| row.len() >= 2)
            .map(|row| {
                json!({
                    "step_name": row[0].clone(),
                    "cnt": row[1].clone(),
                })
            })
            .collect()
    }

    /// Full pipeline for one uploaded paper.
    pub async fn analyze(&self, file_content: &[u8]) -> ApiResult<PdfCohortResponse> {
        let content = self.extractor.extract(file_content).await?;
        if content.full_text.trim().is_empty() {
            return Err(ApiError::invalid_input("PDF produced no extractable text"));
        }

        let canonical = canonicalize_text(&content.full_text);
        let hash = self.cache_hash(&canonical, true);
        if let Some(cached) = self.cached_response(&hash).await {
            tracing::info!("PDF cohort cache hit: {}", &hash[..12]);
            return Ok(cached);
        }

        let conditions = self.extract_conditions(&content).await?;
        let (intent_value, intent) = self.extract_intent(&conditions).await?;

        let CompiledCohort { cohort_sql, count_sql, debug_count_sql, step_labels } =
            compile_oracle_sql(&intent, &self.signals);

        let (cohort_sql, mut warnings) = self.verify_sql(&cohort_sql);
        let (count_sql, count_warnings) = self.verify_sql(&count_sql);
        for warning in count_warnings {
            if !warnings.contains(&warning) {
                warnings.push(warning);
            }
        }

        let count_result = self.execute_with_repair(&count_sql, "cohort count").await?;
        let patient_count = value_to_count(&count_result);

        let mut cohort_result = self.execute_with_repair(&cohort_sql, "cohort rows").await?;
        let aggregate_only = !has_identifier_columns(&cohort_result.columns);
        if cohort_result.rows.is_empty() || aggregate_only {
            let reason = if cohort_result.rows.is_empty() {
                "zero_rows"
            } else {
                "aggregate_only_output"
            };
            warnings.push(format!("patient_level_rewrite: {}", reason));
            match self.patient_level_rewrite(&cohort_sql, reason).await {
                Ok(rewritten) => match self.executor.execute_sql(&rewritten).await {
                    Ok(result) => cohort_result = result,
                    Err(err) => warnings.push(format!("rewrite_failed: {}", err.detail())),
                },
                Err(err) => warnings.push(format!("rewrite_failed: {}", err.detail())),
            }
        }

        let funnel = match self.execute_with_repair(&debug_count_sql, "cohort funnel").await {
            Ok(result) => Self::funnel_rows(&result),
            Err(err) => {
                warnings.push(format!("funnel_failed: {}", err.detail()));
                Vec::new()
            },
        };

        let preview: Vec<serde_json::Map<String, Value>> = cohort_result
            .rows
            .iter()
            .take(20)
            .map(|row| {
                cohort_result
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| (col.clone(), row.get(idx).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect();

        let response = PdfCohortResponse {
            conditions,
            intent: intent_value,
            cohort_sql,
            count_sql,
            debug_count_sql,
            step_labels,
            patient_count,
            funnel,
            preview,
            warnings,
            cached: false,
        };
        self.store_cache(&hash, &response).await;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OracleConfig;
    use crate::models::query::TokenUsage;
    use crate::services::llm::ChatResponse;
    use crate::services::oracle::driver::{DriverRows, OracleDriver};
    use async_trait::async_trait;

    struct StaticExtractor(String);

    #[async_trait]
    impl PdfExtractor for StaticExtractor {
        async fn extract(&self, _file_content: &[u8]) -> ApiResult<PdfContent> {
            Ok(PdfContent { full_text: self.0.clone(), tables: vec![], figure_summaries: vec![] })
        }
    }

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
            let content = if system.contains("methods reader") {
                r#"{"population": "adult sepsis ICU patients", "inclusion_criteria": ["sepsis diagnosis"], "exclusion_criteria": ["ICU stay under 2 days"], "variables": []}"#
            } else if system.contains("step list") {
                r#"{"steps": [{"type": "diagnosis", "params": {"codes": ["A419"]}, "name": "Sepsis"}]}"#
            } else {
                r#"{"final_sql": "SELECT SUBJECT_ID, HADM_ID FROM ADMISSIONS WHERE ROWNUM <= 10"}"#
            };
            Ok(ChatResponse { content: content.to_string(), usage: TokenUsage::default() })
        }
    }

    struct CohortDriver;

    #[async_trait]
    impl OracleDriver for CohortDriver {
        async fn query(
            &self,
            sql: &str,
            _bind_row_cap: Option<u64>,
            _timeout_sec: u64,
        ) -> ApiResult<DriverRows> {
            if sql.contains("patient_count") {
                return Ok(DriverRows {
                    columns: vec!["PATIENT_COUNT".into()],
                    rows: vec![vec![serde_json::json!(42)]],
                });
            }
            if sql.contains("step_name") {
                return Ok(DriverRows {
                    columns: vec!["STEP_NAME".into(), "CNT".into()],
                    rows: vec![
                        vec![serde_json::json!("Initial Population (First ICU Stay & >24h)"), serde_json::json!(100)],
                        vec![serde_json::json!("Sepsis"), serde_json::json!(42)],
                        vec![serde_json::json!("Final Cohort"), serde_json::json!(42)],
                    ],
                });
            }
            Ok(DriverRows {
                columns: vec!["SUBJECT_ID".into(), "HADM_ID".into(), "STAY_ID".into()],
                rows: vec![vec![
                    serde_json::json!(1),
                    serde_json::json!(100),
                    serde_json::json!(1000),
                ]],
            })
        }

        async fn execute_session(&self, _sql: &str) -> ApiResult<()> {
            Ok(())
        }

        async fn reset_pool(&self) -> ApiResult<()> {
            Ok(())
        }
    }

    fn service(dir: &tempfile::TempDir) -> PdfCohortService {
        PdfCohortService::new(
            Arc::new(StaticExtractor(
                "=== PAGE 1 ===\n[Page 1, Block 0] Eligibility criteria: adult sepsis ICU patients"
                    .to_string(),
            )),
            Arc::new(ScriptedLlm),
            LlmConfig::default(),
            Arc::new(OracleExecutor::new(Arc::new(CohortDriver), OracleConfig::default())),
            Arc::new(SchemaCatalogStore::new(dir.path().join("schema_catalog.json"))),
            StateStore::local(dir.path().join("state.json")),
            dir.path().to_str().unwrap(),
        )
    }

    #[test]
    fn canonical_text_is_marker_and_symbol_free() {
        let canonical =
            canonicalize_text("=== PAGE 1 ===\n[Page 1, Block 2] Sepsis-3 criteria!  Adult.");
        assert_eq!(canonical, "sepsis 3 criteria adult");
    }

    #[tokio::test]
    async fn pipeline_compiles_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let service = service(&dir);

        let first = service.analyze(b"pdf-bytes").await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.patient_count, 42);
        assert!(first.cohort_sql.contains("step_1_diagnosis"));
        assert_eq!(first.funnel.len(), 3);

        let second = service.analyze(b"pdf-bytes").await.unwrap();
        assert!(second.cached);
        assert_eq!(second.patient_count, 42);
    }
}
