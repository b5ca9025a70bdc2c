use std::sync::Arc;

use async_trait::async_trait;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use clinquery::config::Config;
use clinquery::services::oracle::driver::{DriverRows, OracleDriver};
use clinquery::services::pdf::{PdfContent, PdfExtractor};
use clinquery::services::HttpLlmClient;
use clinquery::utils::{ApiError, ApiResult};
use clinquery::{handlers, AppState, Collaborators};

/// Driver placeholder until the hosting deployment wires a real Oracle
/// driver. Every call surfaces as 503 so the rest of the API stays usable.
struct UnconfiguredOracleDriver;

#[async_trait]
impl OracleDriver for UnconfiguredOracleDriver {
    async fn query(
        &self,
        _sql: &str,
        _bind_row_cap: Option<u64>,
        _timeout_sec: u64,
    ) -> ApiResult<DriverRows> {
        Err(ApiError::driver_unavailable("Oracle driver is not configured for this deployment"))
    }

    async fn execute_session(&self, _sql: &str) -> ApiResult<()> {
        Err(ApiError::driver_unavailable("Oracle driver is not configured for this deployment"))
    }

    async fn reset_pool(&self) -> ApiResult<()> {
        Ok(())
    }
}

/// Extractor placeholder: PDF parsing runs in the hosting process.
struct UnconfiguredPdfExtractor;

#[async_trait]
impl PdfExtractor for UnconfiguredPdfExtractor {
    async fn extract(&self, _file_content: &[u8]) -> ApiResult<PdfContent> {
        Err(ApiError::invalid_input("PDF extraction is not configured for this deployment"))
    }
}

fn init_tracing(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    if let Some(file) = &config.logging.file {
        let path = std::path::Path::new(file);
        let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let file_name = path.file_name().map(|name| name.to_string_lossy().to_string());
        if let Some(file_name) = file_name {
            let appender = tracing_appender::rolling::daily(directory, file_name);
            registry
                .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(appender))
                .init();
            return;
        }
    }
    registry.init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_tracing(&config);

    tracing::info!("Starting clinquery on {}:{}", config.server.host, config.server.port);

    let collaborators = Collaborators {
        oracle_driver: Arc::new(UnconfiguredOracleDriver),
        llm_client: Arc::new(HttpLlmClient::new(config.llm.clone())),
        document_store: None,
        pdf_extractor: Arc::new(UnconfiguredPdfExtractor),
    };
    let state = AppState::build(config.clone(), collaborators);

    // Populate the RAG index from the metadata corpora at startup.
    let counts = state.indexer.reindex(&state.config.paths.metadata_dir);
    tracing::info!("RAG index ready: {:?}", counts);

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
