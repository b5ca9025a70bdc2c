pub mod audit;
pub mod chart;
pub mod cohort;
pub mod query;
pub mod rag;

pub use audit::{AuditEvent, AuditUser};
pub use chart::{AnalysisCard, AnalysisPlan, ChartSpec, IntentInfo, VisualizationResponse};
pub use cohort::{CohortMetrics, CohortParams, CohortSqlBundle, CohortStats, SavedCohort};
pub use query::{
    ClarifierPayload, ConversationTurn, OneshotPayload, PlannerPayload, PolicyCheck, PolicyReport,
    QueryResult, RiskInfo, SqlAgentPayload, TokenUsage,
};
pub use rag::{CandidateContext, DocMetadata, DocType, RagDocument, ScoredDocument};
