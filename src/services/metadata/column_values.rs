//! Column-value hints: known values of low-cardinality columns with their
//! meanings, used to steer exact-value filtering.

use std::path::PathBuf;
use std::sync::Arc;

use super::{load_jsonl_objects, normalize_match_text, string_field, MtimeCache};

#[derive(Debug, Clone)]
pub struct ColumnValueRow {
    pub sheet: String,
    pub table: String,
    pub column: String,
    pub value: String,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct MatchedColumnValue {
    pub row: ColumnValueRow,
    pub score: f64,
}

pub struct ColumnValueStore {
    path: PathBuf,
    cache: MtimeCache<Vec<ColumnValueRow>>,
}

impl ColumnValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), cache: MtimeCache::default() }
    }

    pub fn load(&self) -> Arc<Vec<ColumnValueRow>> {
        self.cache.load(&self.path, || {
            let mut rows = Vec::new();
            let mut seen = std::collections::HashSet::new();
            for item in load_jsonl_objects(&self.path) {
                let table = string_field(&item, "table").to_uppercase();
                let column = string_field(&item, "column").to_uppercase();
                let value = string_field(&item, "value");
                if table.is_empty() || column.is_empty() || value.is_empty() {
                    continue;
                }
                let key = (table.clone(), column.clone(), value.clone());
                if !seen.insert(key) {
                    continue;
                }
                rows.push(ColumnValueRow {
                    sheet: string_field(&item, "sheet"),
                    table,
                    column,
                    value,
                    description: string_field(&item, "description"),
                });
            }
            rows
        })
    }

    /// Rows whose value or description keywords appear in the question,
    /// scored by matched keyword length (value matches weigh double).
    pub fn match_question(&self, question: &str, k: usize) -> Vec<MatchedColumnValue> {
        let normalized = normalize_match_text(question);
        if normalized.is_empty() || k == 0 {
            return Vec::new();
        }
        let mut matched = Vec::new();
        for row in self.load().iter() {
            let mut score = 0.0f64;
            let value_key = normalize_match_text(&row.value);
            if value_key.len() >= 2 && normalized.contains(&value_key) {
                score += (row.value.len() * 2) as f64;
            }
            if !row.description.is_empty() {
                let desc_key = normalize_match_text(&row.description);
                if desc_key.len() >= 2 && normalized.contains(&desc_key) {
                    score += row.description.len() as f64;
                }
            }
            if score > 0.0 {
                matched.push(MatchedColumnValue { row: row.clone(), score });
            }
        }
        matched.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matched.truncate(k);
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn duplicate_rows_are_deduped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("column_value_docs.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        for _ in 0..2 {
            writeln!(
                file,
                r#"{{"table": "admissions", "column": "admission_type", "value": "EW EMER.", "description": "응급"}}"#
            )
            .unwrap();
        }
        let store = ColumnValueStore::new(&path);
        assert_eq!(store.load().len(), 1);
        assert_eq!(store.load()[0].table, "ADMISSIONS");
    }

    #[test]
    fn value_containment_matches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("column_value_docs.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"{{"table": "ADMISSIONS", "column": "ADMISSION_TYPE", "value": "URGENT", "description": ""}}"#
        )
        .unwrap();
        let store = ColumnValueStore::new(&path);
        let matched = store.match_question("how many urgent admissions", 8);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].row.value, "URGENT");
    }
}
