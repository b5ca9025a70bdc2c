//! Schema catalog: the MIMIC-IV table/column inventory the agents and the
//! PDF verifier work against.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use super::MtimeCache;

#[derive(Debug, Clone, Deserialize)]
pub struct SchemaColumn {
    pub name: String,
    #[serde(rename = "type", default)]
    pub col_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaTable {
    #[serde(default)]
    pub columns: Vec<SchemaColumn>,
    #[serde(default)]
    pub primary_keys: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchemaCatalog {
    #[serde(default)]
    pub tables: BTreeMap<String, SchemaTable>,
}

pub struct SchemaCatalogStore {
    path: PathBuf,
    cache: MtimeCache<SchemaCatalog>,
}

impl SchemaCatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), cache: MtimeCache::default() }
    }

    pub fn load(&self) -> Arc<SchemaCatalog> {
        self.cache.load(&self.path, || {
            let Ok(raw) = std::fs::read_to_string(&self.path) else {
                return SchemaCatalog::default();
            };
            match serde_json::from_str(&raw) {
                Ok(catalog) => catalog,
                Err(err) => {
                    tracing::warn!("Schema catalog parse failed: {}", err);
                    SchemaCatalog::default()
                },
            }
        })
    }

    /// One-line text rendering of a table, used as RAG document text.
    pub fn table_text(name: &str, table: &SchemaTable) -> String {
        let col_text = table
            .columns
            .iter()
            .map(|col| format!("{}:{}", col.name, col.col_type))
            .collect::<Vec<_>>()
            .join(", ");
        let pk_text = table.primary_keys.join(", ");
        format!("Table {}. Columns: {}. Primary keys: {}.", name, col_text, pk_text)
    }

    /// Valid column sets per (upper-cased) table, for SQL verification.
    pub fn valid_columns(&self) -> BTreeMap<String, std::collections::BTreeSet<String>> {
        let catalog = self.load();
        catalog
            .tables
            .iter()
            .map(|(name, table)| {
                (
                    name.to_uppercase(),
                    table.columns.iter().map(|col| col.name.to_uppercase()).collect(),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_text_includes_columns_and_keys() {
        let table = SchemaTable {
            columns: vec![
                SchemaColumn { name: "SUBJECT_ID".into(), col_type: "NUMBER".into() },
                SchemaColumn { name: "GENDER".into(), col_type: "VARCHAR2".into() },
            ],
            primary_keys: vec!["SUBJECT_ID".into()],
        };
        let text = SchemaCatalogStore::table_text("PATIENTS", &table);
        assert!(text.contains("Table PATIENTS"));
        assert!(text.contains("SUBJECT_ID:NUMBER"));
        assert!(text.contains("Primary keys: SUBJECT_ID"));
    }

    #[test]
    fn missing_catalog_is_empty() {
        let store = SchemaCatalogStore::new("/nonexistent/schema_catalog.json");
        assert!(store.load().tables.is_empty());
    }
}
