use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Chart specification produced by the planning rule engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    /// line, line_scatter, bar, pie, hist, scatter, dynamic_scatter, box,
    /// pyramid, nested_pie
    pub chart_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animation_frame: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bar_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_categories: Option<usize>,
}

impl ChartSpec {
    pub fn new(chart_type: &str) -> Self {
        Self { chart_type: chart_type.to_string(), ..Default::default() }
    }
}

/// One analysis plan: a chart spec plus the reason it was proposed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisPlan {
    pub chart_spec: ChartSpec,
    pub reason: String,
}

/// A rendered analysis card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisCard {
    pub chart_spec: ChartSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub figure_json: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Full response of the visualization planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualizationResponse {
    pub sql: String,
    pub table_preview: Vec<serde_json::Map<String, Value>>,
    pub analyses: Vec<AnalysisCard>,
    pub insight: String,
    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_stage: Option<String>,
    pub failure_reasons: Vec<String>,
    pub attempt_count: u32,
}

/// Extracted analysis intent for a question + result table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntentInfo {
    /// trend, distribution, comparison, proportion, correlation, overview
    pub analysis_intent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_var: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_var: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommended_chart: Option<String>,
    pub user_query: String,
}
