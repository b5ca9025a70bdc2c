//! Row-capped SELECT execution with session schema and recoverable-pool
//! retry. The executor never emits DDL or DML.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::OracleConfig;
use crate::models::query::QueryResult;
use crate::utils::sqltext::ci;
use crate::utils::{ApiError, ApiResult};

use super::driver::OracleDriver;

static STATEMENT_RE: Lazy<Regex> = Lazy::new(|| ci(r"^\s*(select|with)\b"));
static WITH_RE: Lazy<Regex> = Lazy::new(|| ci(r"^\s*with\b"));
static SELECT_RE: Lazy<Regex> = Lazy::new(|| ci(r"\bselect\b"));
static SCHEMA_IDENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_$#]+$").unwrap());

/// Error markers that indicate a stale or disconnected pool worth one reset.
const RECOVERABLE_MARKERS: &[&str] = &[
    "DPY-4011",
    "DPY-6005",
    "DPI-1080",
    "CONNECTION WAS CLOSED",
    "CONNECTION RESET",
    "EOF OCCURRED",
];

pub struct OracleExecutor {
    driver: Arc<dyn OracleDriver>,
    config: OracleConfig,
}

fn sanitize_sql(sql: &str) -> String {
    sql.trim().trim_end_matches(';').to_string()
}

fn apply_row_cap(sql: &str) -> String {
    format!("SELECT * FROM ({}) WHERE ROWNUM <= :row_cap", sql)
}

fn is_recoverable(message: &str) -> bool {
    let upper = message.to_uppercase();
    RECOVERABLE_MARKERS.iter().any(|marker| upper.contains(marker))
}

impl OracleExecutor {
    pub fn new(driver: Arc<dyn OracleDriver>, config: OracleConfig) -> Self {
        Self { driver, config }
    }

    pub fn row_cap(&self) -> u64 {
        self.config.row_cap
    }

    async fn set_session_schema(&self) -> ApiResult<()> {
        let schema = self.config.default_schema.trim();
        if schema.is_empty() {
            return Ok(());
        }
        if !SCHEMA_IDENT_RE.is_match(schema) {
            tracing::warn!("Ignoring non-identifier default schema '{}'", schema);
            return Ok(());
        }
        self.driver
            .execute_session(&format!("ALTER SESSION SET CURRENT_SCHEMA = {}", schema))
            .await
    }

    /// Execute a read-only statement under the configured row cap and
    /// per-statement timeout.
    pub async fn execute_sql(&self, sql: &str) -> ApiResult<QueryResult> {
        let text = sanitize_sql(sql);
        // Keep executor policy aligned with the policy gate: plain SELECT and
        // CTE-based read-only queries only.
        if !STATEMENT_RE.is_match(&text) {
            return Err(ApiError::unsupported("Only SELECT queries are allowed"));
        }
        if WITH_RE.is_match(&text) && !SELECT_RE.is_match(&text) {
            return Err(ApiError::unsupported("CTE query must include SELECT"));
        }

        self.set_session_schema().await?;

        let capped = apply_row_cap(&text);
        let row_cap = self.config.row_cap;
        let timeout = self.config.db_timeout_sec;

        let result = match self.driver.query(&capped, Some(row_cap), timeout).await {
            Ok(rows) => rows,
            Err(err) => {
                let message = err.detail();
                if !is_recoverable(&message) {
                    return Err(err);
                }
                // Recover stale/disconnected pools once before failing.
                tracing::warn!("Recoverable driver error, resetting pool: {}", message);
                self.driver.reset_pool().await?;
                self.driver.query(&capped, Some(row_cap), timeout).await.map_err(|retry| {
                    ApiError::driver_unavailable(format!("Oracle pool unavailable: {}", retry.detail()))
                })?
            },
        };

        let mut rows = result.rows;
        rows.truncate(row_cap as usize);
        let row_count = rows.len();
        tracing::debug!("Query returned {} rows (cap {})", row_count, row_cap);

        Ok(QueryResult { columns: result.columns, rows, row_count, row_cap })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::oracle::driver::DriverRows;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedDriver {
        session_sql: Mutex<Vec<String>>,
        queries: Mutex<Vec<String>>,
        fail_first_with: Mutex<Option<String>>,
        resets: AtomicUsize,
        rows: Mutex<DriverRows>,
    }

    #[async_trait]
    impl OracleDriver for ScriptedDriver {
        async fn query(
            &self,
            sql: &str,
            _bind_row_cap: Option<u64>,
            _timeout_sec: u64,
        ) -> ApiResult<DriverRows> {
            self.queries.lock().unwrap().push(sql.to_string());
            if let Some(message) = self.fail_first_with.lock().unwrap().take() {
                return Err(ApiError::execution_failed(message));
            }
            Ok(self.rows.lock().unwrap().clone())
        }

        async fn execute_session(&self, sql: &str) -> ApiResult<()> {
            self.session_sql.lock().unwrap().push(sql.to_string());
            Ok(())
        }

        async fn reset_pool(&self) -> ApiResult<()> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(schema: &str, row_cap: u64) -> OracleConfig {
        OracleConfig {
            default_schema: schema.to_string(),
            row_cap,
            ..OracleConfig::default()
        }
    }

    #[tokio::test]
    async fn non_select_is_rejected() {
        let executor = OracleExecutor::new(Arc::new(ScriptedDriver::default()), config("", 100));
        let err = executor.execute_sql("DELETE FROM PATIENTS").await.unwrap_err();
        assert_eq!(err.detail(), "Only SELECT queries are allowed");
    }

    #[tokio::test]
    async fn statement_is_wrapped_with_row_cap_bind() {
        let driver = Arc::new(ScriptedDriver::default());
        let executor = OracleExecutor::new(driver.clone(), config("SSO", 100));
        executor.execute_sql("SELECT 1 FROM DUAL;").await.unwrap();

        let queries = driver.queries.lock().unwrap();
        assert_eq!(queries[0], "SELECT * FROM (SELECT 1 FROM DUAL) WHERE ROWNUM <= :row_cap");
        let sessions = driver.session_sql.lock().unwrap();
        assert_eq!(sessions[0], "ALTER SESSION SET CURRENT_SCHEMA = SSO");
    }

    #[tokio::test]
    async fn rows_are_truncated_to_cap() {
        let driver = Arc::new(ScriptedDriver::default());
        *driver.rows.lock().unwrap() = DriverRows {
            columns: vec!["X".to_string()],
            rows: (0..10).map(|i| vec![json!(i)]).collect(),
        };
        let executor = OracleExecutor::new(driver, config("", 3));
        let result = executor.execute_sql("SELECT X FROM T").await.unwrap();
        assert_eq!(result.row_count, 3);
        assert_eq!(result.rows.len(), 3);
        assert_eq!(result.row_cap, 3);
    }

    #[tokio::test]
    async fn recoverable_error_resets_pool_once() {
        let driver = Arc::new(ScriptedDriver::default());
        *driver.fail_first_with.lock().unwrap() = Some("DPY-4011: connection was closed".into());
        let executor = OracleExecutor::new(driver.clone(), config("", 100));
        let result = executor.execute_sql("SELECT 1 FROM DUAL").await;
        assert!(result.is_ok());
        assert_eq!(driver.resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_recoverable_error_propagates() {
        let driver = Arc::new(ScriptedDriver::default());
        *driver.fail_first_with.lock().unwrap() =
            Some("ORA-00904: invalid identifier".into());
        let executor = OracleExecutor::new(driver.clone(), config("", 100));
        let err = executor.execute_sql("SELECT 1 FROM DUAL").await.unwrap_err();
        assert!(err.detail().contains("ORA-00904"));
        assert_eq!(driver.resets.load(Ordering::SeqCst), 0);
    }
}
