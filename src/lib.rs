//! clinquery library
//!
//! Core modules for the clinical text-to-SQL and visualization backend.

use std::path::PathBuf;
use std::sync::Arc;

pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
use services::llm::Agents;
use services::metadata::{
    ColumnValueStore, ComorbidityStore, ConceptMapStore, LabelIntentStore, SchemaCatalogStore,
    SettingsStore,
};
use services::viz::VizRetriever;
use services::{
    AuditLogService, CohortEngine, CostTracker, DocumentStore, HashedEmbedder, Indexer, LlmClient,
    OracleDriver, OracleExecutor, Orchestrator, PdfCohortService, PdfExtractor, Retriever,
    SimpleVectorStore, StateStore, VisualizationAgent,
};

/// Application shared state
///
/// Design Philosophy: Keep it simple - Rust's type system IS our DI container.
/// All services are wrapped in Arc for cheap cloning and thread safety.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,

    pub orchestrator: Arc<Orchestrator>,
    pub cohort_engine: Arc<CohortEngine>,
    pub visualization: Arc<VisualizationAgent>,
    pub pdf_service: Arc<PdfCohortService>,

    pub audit: Arc<AuditLogService>,
    pub cost: Arc<CostTracker>,
    pub indexer: Arc<Indexer>,
}

/// External collaborators injected by the hosting process: the Oracle driver,
/// the LLM provider client, the optional remote document store, and the PDF
/// extractor.
pub struct Collaborators {
    pub oracle_driver: Arc<dyn OracleDriver>,
    pub llm_client: Arc<dyn LlmClient>,
    pub document_store: Option<Arc<dyn DocumentStore>>,
    pub pdf_extractor: Arc<dyn PdfExtractor>,
}

impl AppState {
    /// Wire every service from the config and the injected collaborators.
    pub fn build(config: Config, collaborators: Collaborators) -> Self {
        let metadata_dir = PathBuf::from(&config.paths.metadata_dir);

        let state_store = StateStore::new(
            collaborators.document_store,
            metadata_dir.join("state_store.json"),
        );
        let settings = SettingsStore::new(state_store.clone(), &config.paths.metadata_dir);

        let embedder = Arc::new(HashedEmbedder::new(config.rag.embedding_dim));
        let vector_store = Arc::new(SimpleVectorStore::new(
            PathBuf::from(&config.rag.persist_dir).join("simple_store.json"),
            embedder,
        ));

        let schema_catalog =
            Arc::new(SchemaCatalogStore::new(metadata_dir.join("schema_catalog.json")));
        let diagnosis_map =
            Arc::new(ConceptMapStore::new(metadata_dir.join("diagnosis_icd_map.jsonl")));
        let procedure_map =
            Arc::new(ConceptMapStore::new(metadata_dir.join("procedure_icd_map.jsonl")));
        let column_values =
            Arc::new(ColumnValueStore::new(metadata_dir.join("column_value_docs.jsonl")));
        let label_intents =
            Arc::new(LabelIntentStore::new(metadata_dir.join("label_intent_profiles.jsonl")));
        let comorbidity =
            Arc::new(ComorbidityStore::new(metadata_dir.join("cohort_comorbidity_specs.json")));

        let indexer = Arc::new(Indexer::new(
            vector_store.clone(),
            schema_catalog.clone(),
            column_values.clone(),
        ));

        let retriever = Arc::new(Retriever::new(
            config.rag.clone(),
            vector_store.clone(),
            diagnosis_map.clone(),
            procedure_map,
            column_values,
            label_intents,
            schema_catalog.clone(),
            settings.clone(),
        ));

        let executor = Arc::new(OracleExecutor::new(
            collaborators.oracle_driver,
            config.oracle.clone(),
        ));
        let cost = Arc::new(CostTracker::new(config.budget.clone(), &config.paths.cost_state));
        let audit = Arc::new(AuditLogService::new(&config.paths.events_log));

        let agents = Arc::new(Agents::new(collaborators.llm_client.clone(), config.llm.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            agents,
            retriever,
            executor.clone(),
            cost.clone(),
            settings,
            config.query.clone(),
            config.oracle.clone(),
            config.rag.clone(),
            &config.paths,
        ));

        let cohort_engine = Arc::new(CohortEngine::new(
            executor.clone(),
            comorbidity,
            diagnosis_map,
            state_store.clone(),
            config.cohort.clone(),
        ));

        let viz_index: Arc<dyn services::VectorIndex> = vector_store.clone();
        let visualization = Arc::new(VisualizationAgent::new(
            collaborators.llm_client.clone(),
            config.llm.clone(),
            VizRetriever::new(Some(viz_index), Some(metadata_dir.clone())),
        ));

        let pdf_service = Arc::new(PdfCohortService::new(
            collaborators.pdf_extractor,
            collaborators.llm_client,
            config.llm.clone(),
            executor,
            schema_catalog,
            state_store,
            &config.paths.metadata_dir,
        ));

        Self {
            config,
            orchestrator,
            cohort_engine,
            visualization,
            pdf_service,
            audit,
            cost,
            indexer,
        }
    }
}
