//! The six SQL agents: engineer, expert, planner, clarifier, translator, and
//! error repair. Each is a JSON-only contract over the chat client; any
//! contract deviation surfaces as an upstream error.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

use crate::config::LlmConfig;
use crate::models::query::{
    ClarifierPayload, ConversationTurn, PlannerPayload, SqlAgentPayload, TokenUsage,
};
use crate::models::rag::CandidateContext;
use crate::utils::{ApiError, ApiResult};

use super::client::{ChatMessage, LlmClient};
use super::prompts;

static HANGUL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\u{AC00}-\u{D7A3}]").unwrap());

pub fn contains_korean(text: &str) -> bool {
    HANGUL_RE.is_match(text)
}

/// Extract a JSON object from a free-form response: whole-body parse first,
/// then the span from the first `{` to the last `}`.
pub fn extract_json(text: &str) -> ApiResult<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        if value.is_object() {
            return Ok(value);
        }
    }
    let start = text.find('{');
    let end = text.rfind('}');
    if let (Some(start), Some(end)) = (start, end) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<Value>(&text[start..=end]) {
                if value.is_object() {
                    return Ok(value);
                }
            }
        }
    }
    Err(ApiError::upstream("LLM response is not valid JSON"))
}

pub struct Agents {
    client: Arc<dyn LlmClient>,
    config: LlmConfig,
}

impl Agents {
    pub fn new(client: Arc<dyn LlmClient>, config: LlmConfig) -> Self {
        Self { client, config }
    }

    fn context_payload(context: &CandidateContext) -> Value {
        json!({
            "schemas": context.schemas,
            "examples": context.examples,
            "templates": context.templates,
            "glossary": context.glossary,
        })
    }

    async fn chat_json(
        &self,
        system_prompt: &str,
        user_payload: Value,
        model: &str,
    ) -> ApiResult<(Value, TokenUsage)> {
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_payload.to_string()),
        ];
        let response = self
            .client
            .chat(messages, model, self.config.max_output_tokens)
            .await?;
        let parsed = extract_json(&response.content)?;
        Ok((parsed, response.usage))
    }

    fn sql_payload_from(value: Value, usage: TokenUsage) -> ApiResult<SqlAgentPayload> {
        let mut payload: SqlAgentPayload = serde_json::from_value(value)
            .map_err(|e| ApiError::upstream(format!("SQL agent contract violated: {}", e)))?;
        payload.usage = usage;
        Ok(payload)
    }

    /// Engineer: question + context -> draft SQL.
    pub async fn generate_sql(
        &self,
        question: &str,
        context: &CandidateContext,
    ) -> ApiResult<SqlAgentPayload> {
        let user = json!({ "question": question, "context": Self::context_payload(context) });
        let (value, usage) = self
            .chat_json(prompts::ENGINEER_SYSTEM_PROMPT, user, &self.config.engineer_model)
            .await?;
        Self::sql_payload_from(value, usage)
    }

    /// Expert: reviews a draft when the risk gate fires.
    pub async fn review_sql(
        &self,
        question: &str,
        context: &CandidateContext,
        draft: &SqlAgentPayload,
        question_en: Option<&str>,
        planner_intent: Option<&serde_json::Map<String, Value>>,
    ) -> ApiResult<SqlAgentPayload> {
        let mut user = json!({
            "question": question,
            "context": Self::context_payload(context),
            "draft": draft,
        });
        attach_optional(&mut user, question, question_en, planner_intent);
        let (value, usage) = self
            .chat_json(prompts::EXPERT_SYSTEM_PROMPT, user, &self.config.expert_model)
            .await?;
        Self::sql_payload_from(value, usage)
    }

    /// Repair: called only after execution failed and the error templates
    /// changed nothing.
    pub async fn repair_sql_after_error(
        &self,
        question: &str,
        context: &CandidateContext,
        failed_sql: &str,
        error_message: &str,
        question_en: Option<&str>,
        planner_intent: Option<&serde_json::Map<String, Value>>,
    ) -> ApiResult<SqlAgentPayload> {
        let mut user = json!({
            "question": question,
            "context": Self::context_payload(context),
            "failed_sql": failed_sql,
            "error_message": error_message,
        });
        attach_optional(&mut user, question, question_en, planner_intent);
        let (value, usage) = self
            .chat_json(prompts::ERROR_REPAIR_SYSTEM_PROMPT, user, &self.config.expert_model)
            .await?;
        Self::sql_payload_from(value, usage)
    }

    /// Planner: structured intent forwarded to the engineer.
    pub async fn plan_query_intent(
        &self,
        question: &str,
        context: &CandidateContext,
        question_en: Option<&str>,
    ) -> ApiResult<PlannerPayload> {
        let mut user = json!({ "question": question, "context": Self::context_payload(context) });
        attach_optional(&mut user, question, question_en, None);
        let (value, usage) = self
            .chat_json(prompts::PLANNER_SYSTEM_PROMPT, user, &self.config.intent_model)
            .await?;
        let mut payload = PlannerPayload::default();
        if let Some(intent) = value.get("intent").and_then(Value::as_object) {
            payload.intent = intent.clone();
        }
        if let Some(assumptions) = value.get("assumptions").and_then(Value::as_array) {
            payload.assumptions = assumptions
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect();
        }
        payload.usage = usage;
        Ok(payload)
    }

    /// Clarifier: decides whether to ask one narrowing question first.
    pub async fn evaluate_question_clarity(
        &self,
        question: &str,
        conversation: &[ConversationTurn],
    ) -> ApiResult<ClarifierPayload> {
        let normalized: Vec<Value> = conversation
            .iter()
            .rev()
            .take(10)
            .rev()
            .filter(|turn| {
                matches!(turn.role.trim().to_lowercase().as_str(), "user" | "assistant")
                    && !turn.content.trim().is_empty()
            })
            .map(|turn| {
                let content: String = turn.content.trim().chars().take(2000).collect();
                json!({ "role": turn.role.trim().to_lowercase(), "content": content })
            })
            .collect();
        let user = json!({ "latest_question": question, "conversation": normalized });
        let (value, usage) = self
            .chat_json(prompts::CLARIFIER_SYSTEM_PROMPT, user, &self.config.expert_model)
            .await?;
        let mut payload: ClarifierPayload = serde_json::from_value(value)
            .map_err(|e| ApiError::upstream(format!("Clarifier contract violated: {}", e)))?;
        payload.usage = usage;
        Ok(payload)
    }

    /// Translator: Korean question to concise English.
    pub async fn translate_to_english(&self, text: &str) -> ApiResult<(String, TokenUsage)> {
        let messages = vec![
            ChatMessage::system(prompts::TRANSLATE_SYSTEM_PROMPT),
            ChatMessage::user(text),
        ];
        let response = self
            .client
            .chat(messages, &self.config.expert_model, self.config.max_output_tokens.min(256))
            .await?;
        let mut translated = response.content.trim().to_string();
        if translated.starts_with('"') && translated.ends_with('"') && translated.len() >= 2 {
            translated = translated[1..translated.len() - 1].trim().to_string();
        }
        Ok((translated, response.usage))
    }
}

fn attach_optional(
    user: &mut Value,
    question: &str,
    question_en: Option<&str>,
    planner_intent: Option<&serde_json::Map<String, Value>>,
) {
    let Some(map) = user.as_object_mut() else { return };
    if let Some(question_en) = question_en {
        let trimmed = question_en.trim();
        if !trimmed.is_empty() && trimmed != question.trim() {
            map.insert("question_en".to_string(), Value::String(trimmed.to_string()));
        }
    }
    if let Some(intent) = planner_intent {
        if !intent.is_empty() {
            map.insert("planner_intent".to_string(), Value::Object(intent.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use super::super::ChatResponse;

    struct ScriptedClient {
        responses: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn chat(
            &self,
            _messages: Vec<ChatMessage>,
            _model: &str,
            _max_tokens: u32,
        ) -> ApiResult<ChatResponse> {
            let mut responses = self.responses.lock().unwrap();
            let content = responses.remove(0);
            Ok(ChatResponse {
                content,
                usage: TokenUsage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 },
            })
        }
    }

    fn agents(responses: Vec<&str>) -> Agents {
        Agents::new(
            Arc::new(ScriptedClient {
                responses: Mutex::new(responses.into_iter().map(str::to_string).collect()),
            }),
            LlmConfig::default(),
        )
    }

    #[test]
    fn extract_json_handles_surrounding_prose() {
        let value =
            extract_json("Sure, here you go:\n{\"final_sql\": \"SELECT 1 FROM DUAL\"}\nThanks!")
                .unwrap();
        assert_eq!(value["final_sql"], "SELECT 1 FROM DUAL");
    }

    #[test]
    fn extract_json_rejects_non_objects() {
        assert!(extract_json("no json here").is_err());
        assert!(extract_json("[1, 2, 3]").is_err());
    }

    #[tokio::test]
    async fn engineer_payload_is_typed() {
        let agents = agents(vec![
            r#"{"final_sql": "SELECT COUNT(*) AS CNT FROM PATIENTS WHERE 1=1", "used_tables": ["PATIENTS"], "risk_score": 1}"#,
        ]);
        let payload = agents
            .generate_sql("how many patients", &CandidateContext::default())
            .await
            .unwrap();
        assert_eq!(payload.used_tables, vec!["PATIENTS"]);
        assert_eq!(payload.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn translator_strips_wrapping_quotes() {
        let agents = agents(vec!["\"How many ICU patients?\""]);
        let (text, usage) = agents.translate_to_english("ICU 환자 수는?").await.unwrap();
        assert_eq!(text, "How many ICU patients?");
        assert_eq!(usage.total_tokens, 15);
    }

    #[test]
    fn hangul_detection() {
        assert!(contains_korean("환자 수"));
        assert!(!contains_korean("patient count"));
    }
}
