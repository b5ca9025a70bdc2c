//! Cumulative cost tracking with a hard budget gate.
//!
//! The total is a read-modify-write under one mutex so the "never exceed
//! limit" invariant holds across parallel requests. State persists to a JSON
//! file on every change.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::BudgetConfig;
use crate::models::query::TokenUsage;
use crate::utils::{ApiError, ApiResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostState {
    pub total_krw: i64,
    #[serde(default)]
    pub window_events: Vec<CostEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEvent {
    pub ts: i64,
    pub amount_krw: i64,
    #[serde(default)]
    pub meta: Value,
}

const WINDOW_EVENT_CAP: usize = 200;

pub struct CostTracker {
    config: BudgetConfig,
    path: PathBuf,
    state: Mutex<CostState>,
}

impl CostTracker {
    pub fn new(config: BudgetConfig, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = Self::load(&path);
        Self { config, path, state: Mutex::new(state) }
    }

    fn load(path: &PathBuf) -> CostState {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return CostState::default();
        };
        serde_json::from_str(&raw).unwrap_or_default()
    }

    fn persist(&self, state: &CostState) {
        if let Some(parent) = self.path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return;
            }
        }
        if let Ok(payload) = serde_json::to_string(state) {
            if let Err(err) = std::fs::write(&self.path, payload) {
                tracing::warn!("Cost state persist failed: {}", err);
            }
        }
    }

    pub fn total_krw(&self) -> i64 {
        self.state.lock().expect("cost state poisoned").total_krw
    }

    /// Reject new work once the cumulative cost reached the budget limit.
    pub fn ensure_budget_ok(&self) -> ApiResult<()> {
        let state = self.state.lock().expect("cost state poisoned");
        if self.config.limit_krw > 0 && state.total_krw >= self.config.limit_krw {
            return Err(ApiError::budget_exceeded(format!(
                "budget limit {} KRW reached (spent {} KRW)",
                self.config.limit_krw, state.total_krw
            )));
        }
        if self.config.alert_threshold_krw > 0 && state.total_krw >= self.config.alert_threshold_krw
        {
            tracing::warn!(
                "Cost {} KRW passed alert threshold {} KRW",
                state.total_krw,
                self.config.alert_threshold_krw
            );
        }
        Ok(())
    }

    /// Record an absolute cost.
    pub fn add_cost(&self, amount_krw: i64, meta: Value) {
        if amount_krw <= 0 {
            return;
        }
        let mut state = self.state.lock().expect("cost state poisoned");
        state.total_krw += amount_krw;
        state.window_events.push(CostEvent {
            ts: chrono::Utc::now().timestamp(),
            amount_krw,
            meta,
        });
        if state.window_events.len() > WINDOW_EVENT_CAP {
            let drop = state.window_events.len() - WINDOW_EVENT_CAP;
            state.window_events.drain(..drop);
        }
        self.persist(&state);
    }

    /// Record the cost of one LLM call from its reported token usage:
    /// ceil(total_tokens / 1000 * cost_per_1k).
    pub fn add_llm_usage(&self, usage: &TokenUsage, stage: &str) {
        if self.config.llm_cost_per_1k_tokens_krw <= 0 || usage.total_tokens <= 0 {
            return;
        }
        let cost = ((usage.total_tokens as f64 / 1000.0)
            * self.config.llm_cost_per_1k_tokens_krw as f64)
            .ceil() as i64;
        self.add_cost(
            cost,
            serde_json::json!({
                "stage": stage,
                "source": "llm",
                "usage": usage,
            }),
        );
    }

    /// Flat per-run cost of one SQL execution.
    pub fn add_sql_run_cost(&self) {
        if self.config.sql_run_cost_krw > 0 {
            self.add_cost(self.config.sql_run_cost_krw, serde_json::json!({"stage": "run"}));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(limit: i64, dir: &tempfile::TempDir) -> CostTracker {
        CostTracker::new(
            BudgetConfig { limit_krw: limit, alert_threshold_krw: 0, llm_cost_per_1k_tokens_krw: 1, sql_run_cost_krw: 1 },
            dir.path().join("cost_state.json"),
        )
    }

    #[test]
    fn budget_gate_rejects_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(10, &dir);
        assert!(tracker.ensure_budget_ok().is_ok());
        tracker.add_cost(10, Value::Null);
        let err = tracker.ensure_budget_ok().unwrap_err();
        assert_eq!(err.error_code(), 6001);
    }

    #[test]
    fn llm_usage_cost_rounds_up() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker(1000, &dir);
        tracker.add_llm_usage(
            &TokenUsage { prompt_tokens: 100, completion_tokens: 401, total_tokens: 501 },
            "oneshot",
        );
        assert_eq!(tracker.total_krw(), 1);
        tracker.add_llm_usage(
            &TokenUsage { prompt_tokens: 1000, completion_tokens: 500, total_tokens: 1500 },
            "oneshot",
        );
        assert_eq!(tracker.total_krw(), 3);
    }

    #[test]
    fn state_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let tracker = tracker(1000, &dir);
            tracker.add_cost(42, Value::Null);
        }
        let tracker = tracker(1000, &dir);
        assert_eq!(tracker.total_krw(), 42);
    }
}
