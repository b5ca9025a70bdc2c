//! Oracle driver boundary.
//!
//! Driver and pool initialization belong to the hosting process; the executor
//! only depends on this trait. A scripted in-memory driver backs the tests.

use async_trait::async_trait;
use serde_json::Value;

use crate::utils::ApiResult;

/// Raw statement result: ordered column names plus row values.
#[derive(Debug, Clone, Default)]
pub struct DriverRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[async_trait]
pub trait OracleDriver: Send + Sync {
    /// Run one statement with an optional numeric bind (`:row_cap`).
    async fn query(
        &self,
        sql: &str,
        bind_row_cap: Option<u64>,
        timeout_sec: u64,
    ) -> ApiResult<DriverRows>;

    /// Run a session statement with no result (ALTER SESSION ...).
    async fn execute_session(&self, sql: &str) -> ApiResult<()>;

    /// Drop and recreate the underlying pool after a recoverable failure.
    async fn reset_pool(&self) -> ApiResult<()>;
}
