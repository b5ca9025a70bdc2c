//! Comorbidity subgroup specs for the cohort engine.
//!
//! Each spec names a diagnosis group, the flag column it becomes in the
//! dx_flags CTE, the terms to resolve through the diagnosis map, and fixed
//! fallback prefixes used when the mapping resolves nothing. When the spec
//! file itself is missing, a built-in default group list applies.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use super::{string_field, string_list, MtimeCache};

#[derive(Debug, Clone)]
pub struct ComorbiditySpec {
    pub group_key: String,
    pub group_label: String,
    pub flag_col: String,
    pub sort_order: i64,
    pub map_terms: Vec<String>,
    pub fallback_prefixes: Vec<String>,
}

pub struct ComorbidityStore {
    path: PathBuf,
    cache: MtimeCache<Vec<ComorbiditySpec>>,
}

fn default_specs() -> Vec<ComorbiditySpec> {
    let spec = |key: &str, label: &str, flag: &str, order: i64, terms: &[&str], prefixes: &[&str]| {
        ComorbiditySpec {
            group_key: key.to_string(),
            group_label: label.to_string(),
            flag_col: flag.to_string(),
            sort_order: order,
            map_terms: terms.iter().map(|t| t.to_string()).collect(),
            fallback_prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        }
    };
    vec![
        spec("diabetes", "당뇨", "HAS_DIABETES", 1, &["diabetes"], &["E10", "E11", "250"]),
        spec(
            "hypertension",
            "고혈압",
            "HAS_HYPERTENSION",
            2,
            &["hypertension"],
            &["I10", "I11", "I12", "I13", "401", "402", "403", "404", "405"],
        ),
        spec(
            "heart_failure",
            "심부전",
            "HAS_HEART_FAILURE",
            3,
            &["heart failure"],
            &["I50", "428"],
        ),
        spec(
            "ckd",
            "만성신질환",
            "HAS_CKD",
            4,
            &["chronic kidney disease"],
            &["N18", "585"],
        ),
        spec("copd", "만성폐쇄성폐질환", "HAS_COPD", 5, &["copd"], &["J44", "496"]),
    ]
}

impl ComorbidityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), cache: MtimeCache::default() }
    }

    /// Specs from disk, or the built-in default groups when the file is
    /// missing or unusable.
    pub fn load(&self) -> Arc<Vec<ComorbiditySpec>> {
        if !self.path.exists() {
            return Arc::new(default_specs());
        }
        let loaded = self.cache.load(&self.path, || {
            let Ok(raw) = std::fs::read_to_string(&self.path) else {
                return Vec::new();
            };
            let Ok(Value::Array(items)) = serde_json::from_str::<Value>(&raw) else {
                return Vec::new();
            };
            let mut specs = Vec::new();
            for item in items {
                let Value::Object(map) = item else { continue };
                let group_key = string_field(&map, "group_key");
                let group_label = string_field(&map, "group_label");
                let flag_col = string_field(&map, "flag_col");
                if group_key.is_empty() || group_label.is_empty() || flag_col.is_empty() {
                    continue;
                }
                let sort_order = map
                    .get("sort_order")
                    .and_then(Value::as_i64)
                    .unwrap_or(specs.len() as i64 + 1);
                specs.push(ComorbiditySpec {
                    group_key,
                    group_label,
                    flag_col,
                    sort_order,
                    map_terms: string_list(map.get("map_terms")),
                    fallback_prefixes: string_list(map.get("fallback_prefixes"))
                        .into_iter()
                        .map(|p| p.to_uppercase())
                        .collect(),
                });
            }
            specs
        });
        if loaded.is_empty() {
            Arc::new(default_specs())
        } else {
            loaded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let store = ComorbidityStore::new("/nonexistent/cohort_comorbidity_specs.json");
        let specs = store.load();
        assert!(!specs.is_empty());
        assert!(specs.iter().any(|s| s.group_key == "diabetes"));
        assert!(specs.iter().all(|s| !s.fallback_prefixes.is_empty()));
    }

    #[test]
    fn file_specs_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cohort_comorbidity_specs.json");
        std::fs::write(
            &path,
            r#"[{"group_key": "stroke", "group_label": "뇌졸중", "flag_col": "HAS_STROKE",
                "sort_order": 1, "map_terms": ["stroke"], "fallback_prefixes": ["i63"]}]"#,
        )
        .unwrap();
        let store = ComorbidityStore::new(&path);
        let specs = store.load();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].group_key, "stroke");
        assert_eq!(specs[0].fallback_prefixes, vec!["I63".to_string()]);
    }
}
