//! Runtime-adjustable settings resolved through the state store: the table
//! scope the policy gate enforces and the connection overrides the executor
//! applies. Both fall back to files under the metadata directory.

use std::path::PathBuf;

use serde_json::Value;

use crate::services::store::StateStore;

#[derive(Clone)]
pub struct SettingsStore {
    state: StateStore,
    table_scope_path: PathBuf,
    connection_path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionOverrides {
    pub host: String,
    pub port: String,
    pub database: String,
    pub ssl_mode: String,
    pub dsn: String,
    pub username: String,
    pub password: String,
}

fn load_json_file(path: &PathBuf) -> Option<Value> {
    let raw = std::fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

impl SettingsStore {
    pub fn new(state: StateStore, metadata_dir: &str) -> Self {
        let base = PathBuf::from(metadata_dir);
        Self {
            state,
            table_scope_path: base.join("table_scope.json"),
            connection_path: base.join("connection_settings.json"),
        }
    }

    /// Table names the policy gate allows. Empty means no restriction.
    pub async fn table_scope(&self) -> Vec<String> {
        let data = match self.state.get("table_scope").await {
            Some(value) if value.is_object() => value,
            _ => load_json_file(&self.table_scope_path).unwrap_or(Value::Null),
        };
        data.get("selected_ids")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Value::String(s) if !s.is_empty() => Some(s.clone()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn save_table_scope(&self, selected_ids: Vec<String>) -> bool {
        self.state
            .set("table_scope", serde_json::json!({ "selected_ids": selected_ids }))
            .await
    }

    /// Connection overrides for the Oracle executor DSN.
    pub async fn connection_overrides(&self) -> ConnectionOverrides {
        let data = match self.state.get("connection_settings").await {
            Some(value) if value.is_object() => value,
            _ => load_json_file(&self.connection_path).unwrap_or(Value::Null),
        };
        let field = |key: &str| {
            data.get(key).and_then(Value::as_str).unwrap_or("").trim().to_string()
        };
        ConnectionOverrides {
            host: field("host"),
            port: field("port"),
            database: field("database"),
            ssl_mode: field("sslMode").to_lowercase(),
            dsn: field("dsn"),
            username: field("username"),
            password: field("password"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn table_scope_reads_file_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("table_scope.json"),
            r#"{"selected_ids": ["patients", "admissions"]}"#,
        )
        .unwrap();
        let state = StateStore::local(dir.path().join("state.json"));
        let store = SettingsStore::new(state, dir.path().to_str().unwrap());
        assert_eq!(store.table_scope().await, vec!["patients", "admissions"]);
    }

    #[tokio::test]
    async fn state_store_value_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("table_scope.json"), r#"{"selected_ids": ["old"]}"#)
            .unwrap();
        let state = StateStore::local(dir.path().join("state.json"));
        let store = SettingsStore::new(state, dir.path().to_str().unwrap());
        store.save_table_scope(vec!["patients".to_string()]).await;
        assert_eq!(store.table_scope().await, vec!["patients"]);
    }
}
