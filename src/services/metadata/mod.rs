//! Metadata corpora: load-from-disk with mtime cache invalidation plus
//! deterministic question matching. These stores feed both the RAG indexer
//! (as documents) and rule branches (ICD prefix substitution, comorbidity
//! groups).

mod comorbidity;
mod concept_map;
mod column_values;
mod label_intents;
mod schema_catalog;
mod settings;

pub use comorbidity::{ComorbiditySpec, ComorbidityStore};
pub use concept_map::{ConceptEntry, ConceptMapStore};
pub use column_values::{ColumnValueRow, ColumnValueStore};
pub use label_intents::{LabelIntentProfile, LabelIntentStore};
pub use schema_catalog::{SchemaCatalogStore, SchemaTable};
pub use settings::SettingsStore;

use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;

use once_cell::sync::Lazy;
use regex::Regex;

static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Whitespace-stripped lowercase form used for keyword containment matching.
/// Works for both Korean (no spaces between particles) and English.
pub fn normalize_match_text(text: &str) -> String {
    WS_RE.replace_all(&text.to_lowercase(), "").into_owned()
}

/// Parse a JSONL file into objects, skipping blank and malformed lines.
pub fn load_jsonl_objects(path: &Path) -> Vec<serde_json::Map<String, serde_json::Value>> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut items = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(serde_json::Value::Object(map)) => items.push(map),
            Ok(_) => {},
            Err(err) => {
                tracing::debug!("Skipping malformed JSONL line in {}: {}", path.display(), err);
            },
        }
    }
    items
}

/// Cache of a parsed file keyed by its mtime. `load` re-parses only when the
/// file changed on disk; a missing file clears the cache.
pub struct MtimeCache<T> {
    state: Mutex<Option<(SystemTime, std::sync::Arc<T>)>>,
}

impl<T> Default for MtimeCache<T> {
    fn default() -> Self {
        Self { state: Mutex::new(None) }
    }
}

impl<T> MtimeCache<T> {
    pub fn load(&self, path: &Path, parse: impl FnOnce() -> T) -> std::sync::Arc<T>
    where
        T: Default,
    {
        let mtime = std::fs::metadata(path).and_then(|meta| meta.modified()).ok();
        let mut state = self.state.lock().expect("mtime cache poisoned");
        let Some(mtime) = mtime else {
            *state = None;
            return std::sync::Arc::new(T::default());
        };
        if let Some((cached_mtime, cached)) = state.as_ref() {
            if *cached_mtime == mtime {
                return cached.clone();
            }
        }
        let parsed = std::sync::Arc::new(parse());
        *state = Some((mtime, parsed.clone()));
        parsed
    }
}

pub(crate) fn string_list(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let text = match item {
                        serde_json::Value::String(s) => s.trim().to_string(),
                        other => other.to_string(),
                    };
                    if text.is_empty() { None } else { Some(text) }
                })
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn string_field(
    map: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> String {
    map.get(key).and_then(|v| v.as_str()).unwrap_or("").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_spaces_and_case() {
        assert_eq!(normalize_match_text("Heart  Failure"), "heartfailure");
        assert_eq!(normalize_match_text("심부전 환자"), "심부전환자");
    }
}
