pub mod audit;
pub mod cohort;
pub mod cost;
pub mod embedding;
pub mod llm;
pub mod metadata;
pub mod oracle;
pub mod orchestrator;
pub mod pdf;
pub mod rag;
pub mod sql;
pub mod store;
pub mod vector_store;
pub mod viz;

pub use audit::AuditLogService;
pub use cohort::CohortEngine;
pub use cost::CostTracker;
pub use embedding::{Embedder, HashedEmbedder};
pub use llm::{Agents, HttpLlmClient, LlmClient};
pub use oracle::{OracleDriver, OracleExecutor};
pub use orchestrator::{OneshotRequest, Orchestrator};
pub use pdf::{PdfCohortService, PdfExtractor};
pub use rag::{Indexer, Retriever};
pub use store::{DocumentStore, StateStore};
pub use vector_store::{SimpleVectorStore, VectorIndex};
pub use viz::VisualizationAgent;
