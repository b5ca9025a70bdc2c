//! Visualization planner (question + result table -> ranked chart
//! recommendations): frame model, intent extraction, clinical rule engine,
//! deterministic codegen, and the orchestrating agent.

pub mod agent;
pub mod codegen;
pub mod frame;
pub mod intent;
pub mod retrieval;
pub mod rules;

pub use agent::VisualizationAgent;
pub use codegen::generate_chart;
pub use frame::{ColumnRole, DataFrame};
pub use intent::IntentExtractor;
pub use retrieval::VizRetriever;
pub use rules::{frame_from_rows, plan_analyses};
