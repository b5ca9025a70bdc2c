//! Visualization agent: question + result table -> schema summary -> RAG
//! context -> intent -> plans -> figures -> insight, with a relaxed retry
//! pass and a statistical fallback insight when everything else fails.

use std::sync::Arc;

use serde_json::json;

use crate::config::LlmConfig;
use crate::models::chart::{AnalysisCard, AnalysisPlan, VisualizationResponse};
use crate::services::llm::{ChatMessage, LlmClient};

use super::codegen::generate_chart;
use super::frame::DataFrame;
use super::intent::IntentExtractor;
use super::retrieval::VizRetriever;
use super::rules::plan_analyses;

const TABLE_PREVIEW_ROWS: usize = 20;

pub struct VisualizationAgent {
    intent_extractor: IntentExtractor,
    retriever: VizRetriever,
    client: Arc<dyn LlmClient>,
    config: LlmConfig,
}

fn record_failure(failure_reasons: &mut Vec<String>, reason: &str) {
    let normalized = reason.trim().to_string();
    if !normalized.is_empty() && !failure_reasons.contains(&normalized) {
        failure_reasons.push(normalized);
    }
}

fn has_renderable_chart(analyses: &[AnalysisCard]) -> bool {
    analyses.iter().any(|card| card.figure_json.is_some())
}

fn build_analyses_from_plans(
    plans: &[AnalysisPlan],
    df: &DataFrame,
    failure_reasons: &mut Vec<String>,
    pass_label: &str,
) -> Vec<AnalysisCard> {
    if plans.is_empty() {
        record_failure(failure_reasons, &format!("{}: no_plans", pass_label));
        return Vec::new();
    }

    let mut analyses = Vec::new();
    for plan in plans {
        let chart_type = plan.chart_spec.chart_type.clone();
        let result = generate_chart(&plan.chart_spec, df);
        if result.figure_json.is_none() {
            record_failure(
                failure_reasons,
                &format!("{}: empty_figure({})", pass_label, chart_type),
            );
        } else {
            tracing::debug!("Chart rendered: pass={} type={}", pass_label, chart_type);
        }
        analyses.push(AnalysisCard {
            chart_spec: plan.chart_spec.clone(),
            reason: Some(plan.reason.clone()),
            figure_json: result.figure_json,
            code: result.code,
            summary: None,
        });
    }

    if !analyses.is_empty() && !has_renderable_chart(&analyses) {
        record_failure(failure_reasons, &format!("{}: all_figures_empty", pass_label));
    }
    analyses
}

fn fallback_insight(user_query: &str, df: &DataFrame, analyses: &[AnalysisCard]) -> String {
    let row_count = df.len();
    let col_count = df.columns.len();
    let chart_hint = match analyses.first() {
        Some(first) => {
            let mut hint = format!("주요 추천 차트는 {} 입니다.", first.chart_spec.chart_type);
            if let Some(reason) = &first.reason {
                hint = format!("{} {}", hint, reason);
            }
            hint
        },
        None => "차트 추천이 생성되지 않았습니다.".to_string(),
    };
    let stats = df.stats_snapshot(8);
    let stats_hint = stats
        .iter()
        .max_by(|a, b| {
            let range_a = a.1.max - a.1.min;
            let range_b = b.1.max - b.1.min;
            range_a.partial_cmp(&range_b).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(col, s)| {
            format!(
                "통계표 기준 '{}'의 범위가 가장 큽니다 (min {:.3}, max {:.3}).",
                col, s.min, s.max
            )
        })
        .unwrap_or_else(|| "수치형 통계 요약 대상이 부족합니다.".to_string());
    format!(
        "질문 '{}' 기준으로 결과 {}행, {}개 컬럼을 분석했습니다. {} {} 쿼리 결과, 차트, 통계표를 함께 보고 해석하세요.",
        user_query, row_count, col_count, chart_hint, stats_hint
    )
}

impl VisualizationAgent {
    pub fn new(
        client: Arc<dyn LlmClient>,
        config: LlmConfig,
        retriever: VizRetriever,
    ) -> Self {
        Self {
            intent_extractor: IntentExtractor::new(client.clone(), config.clone()),
            retriever,
            client,
            config,
        }
    }

    async fn llm_insight(
        &self,
        user_query: &str,
        sql: &str,
        df: &DataFrame,
        analyses: &[AnalysisCard],
        schema: &super::frame::SchemaSummary,
    ) -> Result<String, crate::utils::ApiError> {
        let briefs: Vec<serde_json::Value> = analyses
            .iter()
            .take(3)
            .map(|card| {
                json!({
                    "chart_type": card.chart_spec.chart_type,
                    "x": card.chart_spec.x,
                    "y": card.chart_spec.y,
                    "reason": card.reason,
                    "summary": card.summary,
                })
            })
            .collect();
        let stats = df.stats_snapshot(8);

        let mut last_error: Option<crate::utils::ApiError> = None;
        for max_rows in [20usize, 8] {
            let sample_rows = df.head_records(max_rows);
            let prompt = format!(
                "다음 정보를 바탕으로 한국어 데이터 분석 인사이트를 작성하라.\n\
                 - 사용자 질문, SQL, 쿼리 결과 샘플, 통계요약, 차트추천 정보를 종합할 것\n\
                 - 출력은 4~6문장, 실행 가능한 인사이트 중심으로 작성\n\
                 - 단순 나열 금지, 핵심 패턴/이상치/해석/주의사항 포함\n\
                 - SQL 핵심, 결과 요약, 차트 해석, 주의사항을 한 번에 포함할 것\n\n\
                 질문: {}\nSQL: {}\n스키마 요약: {}\n통계 요약: {}\n차트 추천: {}\n결과 샘플(최대 {}행): {}\n",
                user_query,
                sql,
                json!({ "columns": schema.columns, "rows": schema.rows }),
                serde_json::to_string(&stats).unwrap_or_default(),
                serde_json::to_string(&briefs).unwrap_or_default(),
                max_rows,
                serde_json::to_string(&sample_rows).unwrap_or_default(),
            );
            match self
                .client
                .chat(
                    vec![
                        ChatMessage::system("너는 임상 데이터 분석 인사이트 작성 도우미다."),
                        ChatMessage::user(prompt),
                    ],
                    &self.config.intent_model,
                    self.config.max_output_tokens,
                )
                .await
            {
                Ok(response) => {
                    let text = response.content.trim().to_string();
                    if !text.is_empty() {
                        return Ok(text);
                    }
                    last_error =
                        Some(crate::utils::ApiError::upstream("LLM insight response was empty"));
                },
                Err(err) => last_error = Some(err),
            }
        }
        Err(last_error.unwrap_or_else(|| crate::utils::ApiError::upstream("LLM insight failed")))
    }

    /// Full visualization pipeline for one question and result table.
    pub async fn analyze_and_visualize(
        &self,
        user_query: &str,
        sql: &str,
        mut df: DataFrame,
    ) -> VisualizationResponse {
        tracing::debug!("Visualization start: {}", user_query);
        let mut failure_reasons: Vec<String> = Vec::new();
        let mut fallback_used = false;
        let mut fallback_stage: Option<String> = None;
        let mut attempt_count: u32 = 1;

        // 0) Derive elapsed-time columns where the inputs allow it.
        df.add_elapsed_columns();

        // 1) Schema summary.
        let schema = df.summarize_schema();

        // 2) RAG context.
        let rag = self.retriever.retrieve(user_query, &schema);
        let rag_context =
            if rag.context_text.is_empty() { None } else { Some(rag.context_text.as_str()) };

        // 3) Intent extraction.
        let intent_info = self.intent_extractor.extract(user_query, &schema, rag_context).await;

        // 4) Normal pass.
        let plans = plan_analyses(&intent_info, &df, rag_context, "normal", &mut failure_reasons);
        tracing::debug!("Normal pass produced {} plans", plans.len());
        let mut analyses = build_analyses_from_plans(&plans, &df, &mut failure_reasons, "normal");

        // 5) Relaxed retry with the group variable cleared.
        if !has_renderable_chart(&analyses) {
            fallback_used = true;
            fallback_stage = Some("retry_relaxed".to_string());
            attempt_count = 2;
            record_failure(&mut failure_reasons, "normal: no_renderable_chart");

            let mut relaxed_intent = intent_info.clone();
            relaxed_intent.group_var = None;
            let relaxed_plans =
                plan_analyses(&relaxed_intent, &df, rag_context, "relaxed", &mut failure_reasons);
            tracing::debug!("Relaxed pass produced {} plans", relaxed_plans.len());
            let relaxed_analyses =
                build_analyses_from_plans(&relaxed_plans, &df, &mut failure_reasons, "relaxed");
            if !relaxed_analyses.is_empty() {
                analyses = relaxed_analyses;
            }
        }

        // 6) Insight: LLM first, statistical fallback otherwise.
        let insight = match self
            .llm_insight(user_query, sql, &df, &analyses, &schema)
            .await
        {
            Ok(text) => text,
            Err(err) => {
                record_failure(&mut failure_reasons, &format!("insight: {}", err.detail()));
                if fallback_stage.is_none() {
                    fallback_stage = Some("insight_fallback".to_string());
                }
                fallback_used = fallback_used || !has_renderable_chart(&analyses);
                fallback_insight(user_query, &df, &analyses)
            },
        };

        VisualizationResponse {
            sql: sql.to_string(),
            table_preview: df.head_records(TABLE_PREVIEW_ROWS),
            analyses,
            insight,
            fallback_used,
            fallback_stage,
            failure_reasons,
            attempt_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::query::TokenUsage;
    use crate::services::llm::ChatResponse;
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
            Err(ApiError::upstream("offline"))
        }
    }

    struct TrendClient;

    #[async_trait]
    impl LlmClient for TrendClient {
        async fn chat(
            &self,
            messages: Vec<ChatMessage>,
            _model: &str,
            _max_tokens: u32,
        ) -> ApiResult<ChatResponse> {
            let is_intent = messages
                .iter()
                .any(|message| message.content.contains("analysis_intent"));
            let content = if is_intent {
                r#"{"analysis_intent": "trend", "x": "icu_admit_month", "y": "mortality_rate"}"#
                    .to_string()
            } else {
                "월별 사망률이 꾸준히 상승하는 추세입니다.".to_string()
            };
            Ok(ChatResponse { content, usage: TokenUsage::default() })
        }
    }

    fn agent(client: Arc<dyn LlmClient>) -> VisualizationAgent {
        VisualizationAgent::new(client, LlmConfig::default(), VizRetriever::new(None, None))
    }

    fn trend_frame() -> DataFrame {
        DataFrame::new(
            vec!["icu_admit_month".into(), "mortality_rate".into()],
            (0..12)
                .map(|i| {
                    vec![json!(format!("2130-{:02}-01", i + 1)), json!(0.04 + 0.01 * i as f64)]
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn trend_frame_renders_without_fallback() {
        let response = agent(Arc::new(TrendClient))
            .analyze_and_visualize("월별 사망률 추세", "SELECT ...", trend_frame())
            .await;
        assert!(!response.fallback_used);
        assert!(response.analyses.iter().any(|card| card.figure_json.is_some()));
        assert!(response
            .analyses
            .iter()
            .any(|card| matches!(card.chart_spec.chart_type.as_str(), "line" | "bar" | "box")));
        assert_eq!(response.attempt_count, 1);
    }

    #[tokio::test]
    async fn empty_frame_reports_fallback_reason() {
        let response = agent(Arc::new(FailingClient))
            .analyze_and_visualize("아무거나", "SELECT 1", DataFrame::default())
            .await;
        assert!(response.fallback_used);
        assert!(response
            .failure_reasons
            .iter()
            .any(|reason| reason == "normal: no_renderable_chart"));
        assert!(!response.insight.is_empty());
        assert_eq!(response.attempt_count, 2);
    }

    #[tokio::test]
    async fn offline_llm_still_produces_statistical_insight() {
        let response = agent(Arc::new(FailingClient))
            .analyze_and_visualize("월별 사망률 추세", "SELECT ...", trend_frame())
            .await;
        // Charts still render from the heuristic fallback intent.
        assert!(response.analyses.iter().any(|card| card.figure_json.is_some()));
        assert!(response.insight.contains("기준으로 결과"));
    }
}
