//! Analysis-intent extraction: LLM first, glossary-term mapping from the
//! retrieved context, and a keyword fallback when the model is unavailable.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;

use crate::config::LlmConfig;
use crate::models::chart::IntentInfo;
use crate::services::llm::{extract_json, ChatMessage, LlmClient};

use super::frame::SchemaSummary;

static GLOSSARY_INTENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Term:\s*(.+?)\nIntent:\s*(\w+)").unwrap());

const INTENT_SYSTEM_PROMPT: &str = concat!(
    "너는 데이터 분석 어시스턴트다. 사용자 질문과 데이터 스키마를 보고 ",
    "분석 의도(추세/분포/비율/비교/상관관계/요약), 축, 그룹, 집계, 차트 타입을 ",
    "결정해 JSON으로만 답한다. ",
    "다음 필드를 가진 JSON으로만 답해라: ",
    "{analysis_intent, x, y, group_by, agg, recommended_chart} ",
    "analysis_intent 후보: trend, distribution, proportion, comparison, correlation, summary"
);

fn normalize_intent(intent: &str) -> String {
    if intent == "time_trend" { "trend".to_string() } else { intent.to_string() }
}

fn infer_intent(user_query: &str) -> &'static str {
    let q = user_query.to_lowercase();
    if ["추세", "trend", "변화", "over time", "시간"].iter().any(|k| q.contains(k)) {
        return "trend";
    }
    if ["분포", "distribution", "hist", "히스토"].iter().any(|k| q.contains(k)) {
        return "distribution";
    }
    if ["비교", "compare", "difference", "vs"].iter().any(|k| q.contains(k)) {
        return "comparison";
    }
    if ["비율", "proportion", "ratio", "share"].iter().any(|k| q.contains(k)) {
        return "proportion";
    }
    if ["상관", "correlation", "관계"].iter().any(|k| q.contains(k)) {
        return "correlation";
    }
    "overview"
}

fn infer_intent_from_glossary(user_query: &str, retrieved_context: Option<&str>) -> Option<String> {
    let context = retrieved_context?;
    let q = user_query.to_lowercase();
    for caps in GLOSSARY_INTENT_RE.captures_iter(context) {
        let term = caps[1].trim().to_lowercase();
        if !term.is_empty() && q.contains(&term) {
            return Some(caps[2].to_string());
        }
    }
    None
}

fn find_column_in_query(user_query: &str, columns: &[String]) -> Option<String> {
    let q = user_query.to_lowercase();
    columns.iter().find(|col| q.contains(&col.to_lowercase())).cloned()
}

fn pick_numeric_column(schema: &SchemaSummary) -> Option<String> {
    if let Some(col) = schema.column_roles.get("numeric").and_then(|cols| cols.first()) {
        return Some(col.clone());
    }
    schema
        .columns
        .iter()
        .find(|col| {
            schema
                .dtypes
                .get(*col)
                .map(|dtype| dtype.contains("number") || dtype.contains("int") || dtype.contains("float"))
                .unwrap_or(false)
        })
        .cloned()
}

fn pick_time_column(schema: &SchemaSummary) -> Option<String> {
    if let Some(col) = schema.column_roles.get("time").and_then(|cols| cols.first()) {
        return Some(col.clone());
    }
    let hints = ["date", "time", "day", "month", "year"];
    schema
        .columns
        .iter()
        .find(|col| {
            let lower = col.to_lowercase();
            hints.iter().any(|hint| lower.contains(hint))
        })
        .cloned()
}

fn pick_categorical_column(schema: &SchemaSummary) -> Option<String> {
    schema.column_roles.get("categorical").and_then(|cols| cols.first()).cloned()
}

pub struct IntentExtractor {
    client: Arc<dyn LlmClient>,
    config: LlmConfig,
}

impl IntentExtractor {
    pub fn new(client: Arc<dyn LlmClient>, config: LlmConfig) -> Self {
        Self { client, config }
    }

    async fn llm_extract(
        &self,
        user_query: &str,
        schema: &SchemaSummary,
        retrieved_context: Option<&str>,
    ) -> Result<IntentInfo, crate::utils::ApiError> {
        let mut user_prompt = format!(
            "사용자 질문과 데이터 스키마는 아래와 같다.\n- 질문: {}\n- 스키마: {}\n",
            user_query,
            json!({
                "columns": schema.columns,
                "dtypes": schema.dtypes,
                "column_roles": schema.column_roles,
            })
        );
        if let Some(context) = retrieved_context {
            if !context.is_empty() {
                user_prompt.push_str(&format!("\n참고 컨텍스트:\n{}\n", context));
            }
        }
        let response = self
            .client
            .chat(
                vec![ChatMessage::system(INTENT_SYSTEM_PROMPT), ChatMessage::user(user_prompt)],
                &self.config.intent_model,
                self.config.max_output_tokens,
            )
            .await?;
        let parsed = extract_json(&response.content)?;
        let string_of = |key: &str| {
            parsed
                .get(key)
                .and_then(serde_json::Value::as_str)
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        };

        let analysis_intent =
            normalize_intent(&string_of("analysis_intent").unwrap_or_else(|| "overview".into()));
        let x = string_of("x");
        let y = string_of("y");
        let primary_outcome = y.clone().or_else(|| x.clone()).or_else(|| pick_numeric_column(schema));
        let time_var = if analysis_intent == "trend" { x } else { None };

        Ok(IntentInfo {
            analysis_intent,
            primary_outcome,
            time_var,
            group_var: string_of("group_by"),
            agg: string_of("agg"),
            recommended_chart: string_of("recommended_chart"),
            user_query: user_query.to_string(),
        })
    }

    fn fallback(
        user_query: &str,
        schema: &SchemaSummary,
        glossary_intent: Option<String>,
    ) -> IntentInfo {
        let analysis_intent =
            glossary_intent.unwrap_or_else(|| infer_intent(user_query).to_string());
        let primary_outcome = find_column_in_query(user_query, &schema.columns)
            .or_else(|| pick_numeric_column(schema));
        let time_var =
            if analysis_intent == "trend" { pick_time_column(schema) } else { None };

        let q = user_query.to_lowercase();
        let group_var = if q.contains('별') || q.contains("by ") {
            find_column_in_query(user_query, &schema.columns)
                .or_else(|| pick_categorical_column(schema))
        } else {
            None
        };

        IntentInfo {
            analysis_intent,
            primary_outcome,
            time_var,
            group_var,
            agg: None,
            recommended_chart: None,
            user_query: user_query.to_string(),
        }
    }

    /// Extract intent, preferring the LLM and degrading to rules on failure.
    pub async fn extract(
        &self,
        user_query: &str,
        schema: &SchemaSummary,
        retrieved_context: Option<&str>,
    ) -> IntentInfo {
        let glossary_intent = infer_intent_from_glossary(user_query, retrieved_context);
        match self.llm_extract(user_query, schema, retrieved_context).await {
            Ok(mut info) => {
                if matches!(info.analysis_intent.as_str(), "summary" | "overview") {
                    if let Some(glossary) = glossary_intent {
                        info.analysis_intent = glossary;
                    }
                }
                tracing::debug!("Intent via LLM: {:?}", info.analysis_intent);
                info
            },
            Err(err) => {
                tracing::warn!("Intent LLM failed, using fallback rules: {}", err);
                Self::fallback(user_query, schema, glossary_intent)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::query::TokenUsage;
    use crate::services::llm::ChatResponse;
    use crate::services::viz::frame::DataFrame;
    use crate::utils::{ApiError, ApiResult};
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingClient;

    #[async_trait]
    impl LlmClient for FailingClient {
        async fn chat(
            &self,
            _messages: Vec<ChatMessage>,
            _model: &str,
            _max_tokens: u32,
        ) -> ApiResult<ChatResponse> {
            Err(ApiError::upstream("no model"))
        }
    }

    struct ScriptedClient(String);

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn chat(
            &self,
            _messages: Vec<ChatMessage>,
            _model: &str,
            _max_tokens: u32,
        ) -> ApiResult<ChatResponse> {
            Ok(ChatResponse { content: self.0.clone(), usage: TokenUsage::default() })
        }
    }

    fn schema() -> SchemaSummary {
        DataFrame::new(
            vec!["icu_admit_month".into(), "mortality_rate".into(), "gender".into()],
            (0..20)
                .map(|i| {
                    vec![
                        json!(format!("2130-{:02}-01", (i % 12) + 1)),
                        json!(0.1 * i as f64),
                        json!(if i % 2 == 0 { "M" } else { "F" }),
                    ]
                })
                .collect(),
        )
        .summarize_schema()
    }

    #[tokio::test]
    async fn llm_result_is_used_when_valid() {
        let extractor = IntentExtractor::new(
            Arc::new(ScriptedClient(
                r#"{"analysis_intent": "time_trend", "x": "icu_admit_month", "y": "mortality_rate"}"#
                    .into(),
            )),
            LlmConfig::default(),
        );
        let info = extractor.extract("월별 사망률 추세", &schema(), None).await;
        assert_eq!(info.analysis_intent, "trend");
        assert_eq!(info.primary_outcome.as_deref(), Some("mortality_rate"));
        assert_eq!(info.time_var.as_deref(), Some("icu_admit_month"));
    }

    #[tokio::test]
    async fn fallback_detects_trend_keywords() {
        let extractor = IntentExtractor::new(Arc::new(FailingClient), LlmConfig::default());
        let info = extractor.extract("mortality rate trend over time", &schema(), None).await;
        assert_eq!(info.analysis_intent, "trend");
        assert!(info.primary_outcome.is_some());
        assert!(info.time_var.is_some());
    }

    #[tokio::test]
    async fn glossary_intent_rescues_overview() {
        let extractor = IntentExtractor::new(
            Arc::new(ScriptedClient(r#"{"analysis_intent": "summary"}"#.into())),
            LlmConfig::default(),
        );
        let context = "Term: 변화\nIntent: trend";
        let info = extractor.extract("수치 변화 보여줘", &schema(), Some(context)).await;
        assert_eq!(info.analysis_intent, "trend");
    }
}
