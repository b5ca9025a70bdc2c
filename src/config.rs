use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub llm: LlmConfig,
    pub oracle: OracleConfig,
    pub rag: RagConfig,
    pub query: QueryConfig,
    pub budget: BudgetConfig,
    pub cohort: CohortConfig,
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

/// LLM provider settings. The provider is an OpenAI-compatible HTTP endpoint;
/// credentials come from the environment, never from config files.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_base: String,
    pub api_key: String,
    pub organization: String,
    pub engineer_model: String,
    pub expert_model: String,
    pub intent_model: String,
    pub max_output_tokens: u32,
    pub timeout_sec: u64,
    pub temperature: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub dsn: String,
    pub user: String,
    pub password: String,
    pub default_schema: String,
    pub pool_min: u32,
    pub pool_max: u32,
    pub pool_inc: u32,
    pub pool_timeout_sec: u64,
    pub db_timeout_sec: u64,
    pub row_cap: u64,
    pub max_db_joins: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub persist_dir: String,
    pub top_k: usize,
    pub embedding_dim: usize,
    pub multi_query: bool,
    pub hybrid_enabled: bool,
    pub hybrid_candidates: usize,
    pub bm25_max_docs: usize,
    pub context_token_budget: usize,
    pub examples_per_query: usize,
    pub templates_per_query: usize,
    pub mongo_uri: String,
    pub mongo_db: String,
    pub mongo_collection: String,
    pub mongo_vector_index: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub demo_mode: bool,
    pub demo_cache_always: bool,
    pub translate_ko_to_en: bool,
    pub max_retry_attempts: u32,
    /// "off" disables the expert gate; "score" triggers it at the threshold.
    pub expert_trigger_mode: String,
    pub expert_score_threshold: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub limit_krw: i64,
    pub alert_threshold_krw: i64,
    pub llm_cost_per_1k_tokens_krw: i64,
    pub sql_run_cost_krw: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CohortConfig {
    pub sample_rows: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub metadata_dir: String,
    pub events_log: String,
    pub cost_state: String,
    pub demo_cache: String,
}

/// Command line arguments for configuration overrides
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "clinquery")]
#[command(version, about = "clinquery - Clinical Text-to-SQL & Visualization Backend")]
pub struct CommandLineArgs {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Server host (overrides config file)
    #[arg(long, value_name = "HOST")]
    pub server_host: Option<String>,

    /// Server port (overrides config file)
    #[arg(long, value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Logging level (overrides config file, e.g., "info,clinquery=debug")
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Enable/disable the demo cache short-circuit
    #[arg(long, value_name = "BOOL")]
    pub demo_mode: Option<bool>,

    /// Row cap applied by the executor (overrides config file)
    #[arg(long, value_name = "ROWS")]
    pub row_cap: Option<u64>,

    /// Hard budget limit in KRW (overrides config file)
    #[arg(long, value_name = "KRW")]
    pub budget_limit: Option<i64>,

    /// Oracle DSN (overrides config file)
    #[arg(long, value_name = "DSN")]
    pub oracle_dsn: Option<String>,
}

impl Config {
    /// Load configuration with command line, environment variable, and file support
    ///
    /// Loading order (priority from highest to lowest):
    /// 1. Command line arguments
    /// 2. Environment variables (prefixed with APP_)
    /// 3. Configuration file (config.toml)
    /// 4. Default values
    pub fn load() -> Result<Self, anyhow::Error> {
        let cli_args = CommandLineArgs::parse();
        Self::load_with_args(&cli_args)
    }

    pub fn load_with_args(cli_args: &CommandLineArgs) -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let config_path = cli_args.config.clone().or_else(Self::find_config_file);
        let mut config = if let Some(config_path) = config_path {
            Self::from_toml(&config_path)?
        } else {
            tracing::warn!("Configuration file not found, using defaults");
            Config::default()
        };

        config.apply_env_overrides();
        config.apply_cli_overrides(cli_args);
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - APP_SERVER_HOST / APP_SERVER_PORT
    /// - APP_LOG_LEVEL
    /// - APP_DEMO_MODE, APP_TRANSLATE_KO_TO_EN
    /// - APP_BUDGET_LIMIT_KRW, APP_LLM_COST_PER_1K_TOKENS_KRW
    /// - APP_ROW_CAP, APP_MAX_DB_JOINS, APP_DB_TIMEOUT_SEC
    /// - APP_ORACLE_DSN, APP_ORACLE_USER, APP_ORACLE_PASSWORD, APP_ORACLE_DEFAULT_SCHEMA
    /// - APP_RAG_TOP_K, APP_RAG_HYBRID_ENABLED, APP_MONGO_URI
    /// - APP_LLM_API_KEY, APP_LLM_API_BASE
    /// - APP_COHORT_SAMPLE_ROWS
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("APP_SERVER_HOST") {
            self.server.host = host;
            tracing::info!("Override server.host from env: {}", self.server.host);
        }
        if let Ok(port) = std::env::var("APP_SERVER_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
                tracing::info!("Override server.port from env: {}", self.server.port);
            }
        }
        if let Ok(level) = std::env::var("APP_LOG_LEVEL") {
            self.logging.level = level;
            tracing::info!("Override logging.level from env: {}", self.logging.level);
        }
        if let Ok(value) = std::env::var("APP_DEMO_MODE") {
            if let Ok(value) = value.parse() {
                self.query.demo_mode = value;
                tracing::info!("Override query.demo_mode from env: {}", self.query.demo_mode);
            }
        }
        if let Ok(value) = std::env::var("APP_TRANSLATE_KO_TO_EN") {
            if let Ok(value) = value.parse() {
                self.query.translate_ko_to_en = value;
            }
        }
        if let Ok(value) = std::env::var("APP_BUDGET_LIMIT_KRW") {
            if let Ok(value) = value.parse() {
                self.budget.limit_krw = value;
                tracing::info!("Override budget.limit_krw from env: {}", self.budget.limit_krw);
            }
        }
        if let Ok(value) = std::env::var("APP_LLM_COST_PER_1K_TOKENS_KRW") {
            if let Ok(value) = value.parse() {
                self.budget.llm_cost_per_1k_tokens_krw = value;
            }
        }
        if let Ok(value) = std::env::var("APP_ROW_CAP") {
            if let Ok(value) = value.parse() {
                self.oracle.row_cap = value;
                tracing::info!("Override oracle.row_cap from env: {}", self.oracle.row_cap);
            }
        }
        if let Ok(value) = std::env::var("APP_MAX_DB_JOINS") {
            if let Ok(value) = value.parse() {
                self.oracle.max_db_joins = value;
            }
        }
        if let Ok(value) = std::env::var("APP_DB_TIMEOUT_SEC") {
            if let Ok(value) = value.parse() {
                self.oracle.db_timeout_sec = value;
            }
        }
        if let Ok(dsn) = std::env::var("APP_ORACLE_DSN") {
            self.oracle.dsn = dsn;
            tracing::info!("Override oracle.dsn from env");
        }
        if let Ok(user) = std::env::var("APP_ORACLE_USER") {
            self.oracle.user = user;
        }
        if let Ok(password) = std::env::var("APP_ORACLE_PASSWORD") {
            self.oracle.password = password;
        }
        if let Ok(schema) = std::env::var("APP_ORACLE_DEFAULT_SCHEMA") {
            self.oracle.default_schema = schema;
        }
        if let Ok(value) = std::env::var("APP_RAG_TOP_K") {
            if let Ok(value) = value.parse() {
                self.rag.top_k = value;
            }
        }
        if let Ok(value) = std::env::var("APP_RAG_HYBRID_ENABLED") {
            if let Ok(value) = value.parse() {
                self.rag.hybrid_enabled = value;
            }
        }
        if let Ok(uri) = std::env::var("APP_MONGO_URI") {
            self.rag.mongo_uri = uri;
            tracing::info!("Override rag.mongo_uri from env");
        }
        if let Ok(key) = std::env::var("APP_LLM_API_KEY") {
            self.llm.api_key = key;
            tracing::info!("Override llm.api_key from env");
        }
        if let Ok(base) = std::env::var("APP_LLM_API_BASE") {
            self.llm.api_base = base;
        }
        if let Ok(value) = std::env::var("APP_COHORT_SAMPLE_ROWS") {
            if let Ok(value) = value.parse() {
                self.cohort.sample_rows = value;
            }
        }
    }

    /// Apply command line argument overrides (highest priority)
    fn apply_cli_overrides(&mut self, args: &CommandLineArgs) {
        if let Some(host) = &args.server_host {
            self.server.host = host.clone();
            tracing::info!("Override server.host from CLI: {}", self.server.host);
        }
        if let Some(port) = args.server_port {
            self.server.port = port;
            tracing::info!("Override server.port from CLI: {}", self.server.port);
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
            tracing::info!("Override logging.level from CLI: {}", self.logging.level);
        }
        if let Some(demo) = args.demo_mode {
            self.query.demo_mode = demo;
            tracing::info!("Override query.demo_mode from CLI: {}", self.query.demo_mode);
        }
        if let Some(cap) = args.row_cap {
            self.oracle.row_cap = cap;
            tracing::info!("Override oracle.row_cap from CLI: {}", self.oracle.row_cap);
        }
        if let Some(limit) = args.budget_limit {
            self.budget.limit_krw = limit;
            tracing::info!("Override budget.limit_krw from CLI: {}", self.budget.limit_krw);
        }
        if let Some(dsn) = &args.oracle_dsn {
            self.oracle.dsn = dsn.clone();
            tracing::info!("Override oracle.dsn from CLI");
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.server.port == 0 {
            anyhow::bail!("Server port cannot be 0");
        }
        if self.oracle.row_cap == 0 {
            anyhow::bail!("oracle.row_cap must be > 0");
        }
        if self.oracle.max_db_joins == 0 {
            anyhow::bail!("oracle.max_db_joins must be > 0");
        }
        if self.rag.embedding_dim == 0 {
            anyhow::bail!("rag.embedding_dim must be > 0");
        }
        if self.budget.limit_krw < 0 {
            anyhow::bail!("budget.limit_krw must be >= 0");
        }
        if !matches!(self.query.expert_trigger_mode.as_str(), "off" | "score") {
            anyhow::bail!(
                "query.expert_trigger_mode must be 'off' or 'score', got '{}'",
                self.query.expert_trigger_mode
            );
        }
        if self.llm.api_key.is_empty() {
            tracing::warn!("LLM API key is not configured; agent calls will fail upstream");
        }
        Ok(())
    }

    fn find_config_file() -> Option<String> {
        let possible_paths =
            ["conf/config.toml", "config.toml", "./conf/config.toml", "./config.toml"];

        for path in &possible_paths {
            if Path::new(path).exists() {
                return Some(path.to_string());
            }
        }
        None
    }

    fn from_toml(path: &str) -> Result<Self, anyhow::Error> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info,clinquery=debug".to_string(),
            file: Some("logs/clinquery.log".to_string()),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            organization: String::new(),
            engineer_model: "gpt-4o".to_string(),
            expert_model: "gpt-4o-mini".to_string(),
            intent_model: "gpt-4o-mini".to_string(),
            max_output_tokens: 500,
            timeout_sec: 30,
            temperature: 0.0,
        }
    }
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            user: String::new(),
            password: String::new(),
            default_schema: String::new(),
            pool_min: 1,
            pool_max: 4,
            pool_inc: 1,
            pool_timeout_sec: 10,
            db_timeout_sec: 15,
            row_cap: 5000,
            max_db_joins: 3,
        }
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            persist_dir: "var/rag".to_string(),
            top_k: 5,
            embedding_dim: 128,
            multi_query: true,
            hybrid_enabled: true,
            hybrid_candidates: 20,
            bm25_max_docs: 2000,
            context_token_budget: 2000,
            examples_per_query: 2,
            templates_per_query: 1,
            mongo_uri: String::new(),
            mongo_db: "text_to_sql".to_string(),
            mongo_collection: "rag_docs".to_string(),
            mongo_vector_index: String::new(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            demo_mode: true,
            demo_cache_always: false,
            translate_ko_to_en: true,
            max_retry_attempts: 1,
            expert_trigger_mode: "score".to_string(),
            expert_score_threshold: 3,
        }
    }
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            limit_krw: 10_000,
            alert_threshold_krw: 8_000,
            llm_cost_per_1k_tokens_krw: 1,
            sql_run_cost_krw: 1,
        }
    }
}

impl Default for CohortConfig {
    fn default() -> Self {
        Self { sample_rows: 50_000 }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            metadata_dir: "var/metadata".to_string(),
            events_log: "var/logs/events.jsonl".to_string(),
            cost_state: "var/logs/cost_state.json".to_string(),
            demo_cache: "var/cache/demo_cache.json".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn bad_expert_mode_is_rejected() {
        let mut config = Config::default();
        config.query.expert_trigger_mode = "always".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_sections_are_optional() {
        let config: Config = toml::from_str("[server]\nport = 9090\n").unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.oracle.row_cap, 5000);
    }
}
