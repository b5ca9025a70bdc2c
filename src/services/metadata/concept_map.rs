//! Diagnosis / procedure concept maps: clinical terms and aliases mapped to
//! ICD code prefixes.

use std::path::PathBuf;
use std::sync::Arc;

use super::{load_jsonl_objects, normalize_match_text, string_field, string_list, MtimeCache};

#[derive(Debug, Clone)]
pub struct ConceptEntry {
    pub term: String,
    pub aliases: Vec<String>,
    pub icd_prefixes: Vec<String>,
}

/// A matched entry carries the length of the longest matched keyword as its
/// score, so more specific terms rank first.
#[derive(Debug, Clone)]
pub struct MatchedConcept {
    pub entry: ConceptEntry,
    pub score: usize,
}

pub struct ConceptMapStore {
    path: PathBuf,
    cache: MtimeCache<Vec<ConceptEntry>>,
}

impl ConceptMapStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), cache: MtimeCache::default() }
    }

    pub fn load(&self) -> Arc<Vec<ConceptEntry>> {
        self.cache.load(&self.path, || {
            let mut entries = Vec::new();
            for item in load_jsonl_objects(&self.path) {
                let term = string_field(&item, "term");
                if term.is_empty() {
                    continue;
                }
                let aliases = string_list(item.get("aliases"));
                let raw_prefixes = {
                    let primary = string_list(item.get("icd_prefixes"));
                    if primary.is_empty() { string_list(item.get("prefixes")) } else { primary }
                };
                let mut prefixes: Vec<String> = Vec::new();
                for prefix in raw_prefixes {
                    let value = prefix.to_uppercase().replace('.', "");
                    if !value.is_empty() && !prefixes.contains(&value) {
                        prefixes.push(value);
                    }
                }
                if prefixes.is_empty() {
                    continue;
                }
                entries.push(ConceptEntry { term, aliases, icd_prefixes: prefixes });
            }
            entries
        })
    }

    /// All entries whose term or any alias appears in the question (normalized
    /// containment), ranked by longest matched keyword.
    pub fn match_question(&self, question: &str) -> Vec<MatchedConcept> {
        let normalized = normalize_match_text(question);
        if normalized.is_empty() {
            return Vec::new();
        }
        let mut matched = Vec::new();
        for entry in self.load().iter() {
            let mut candidates = vec![entry.term.clone()];
            candidates.extend(entry.aliases.iter().cloned());
            let score = candidates
                .iter()
                .filter(|candidate| {
                    let key = normalize_match_text(candidate);
                    !key.is_empty() && normalized.contains(&key)
                })
                .map(|candidate| candidate.len())
                .max();
            if let Some(score) = score {
                matched.push(MatchedConcept { entry: entry.clone(), score });
            }
        }
        matched.sort_by(|a, b| b.score.cmp(&a.score));
        matched
    }

    /// ICD prefixes for a set of already-known terms (comorbidity mapping).
    pub fn prefixes_for_terms(&self, terms: &[String]) -> Vec<String> {
        let normalized_terms: Vec<String> = terms
            .iter()
            .map(|term| normalize_match_text(term))
            .filter(|term| !term.is_empty())
            .collect();
        if normalized_terms.is_empty() {
            return Vec::new();
        }
        let mut prefixes: Vec<String> = Vec::new();
        for entry in self.load().iter() {
            let mut candidates = vec![entry.term.clone()];
            candidates.extend(entry.aliases.iter().cloned());
            let hit = candidates
                .iter()
                .any(|candidate| normalized_terms.contains(&normalize_match_text(candidate)));
            if !hit {
                continue;
            }
            for prefix in &entry.icd_prefixes {
                if !prefixes.contains(prefix) {
                    prefixes.push(prefix.clone());
                }
            }
        }
        prefixes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_map(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("diagnosis_icd_map.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"{{"term": "heart failure", "aliases": ["심부전", "HF"], "icd_prefixes": ["I50", "i11.0"]}}"#
        )
        .unwrap();
        writeln!(
            file,
            r#"{{"term": "sepsis", "aliases": ["패혈증"], "icd_prefixes": ["A41"]}}"#
        )
        .unwrap();
        path
    }

    #[test]
    fn prefixes_are_uppercased_and_dot_stripped() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConceptMapStore::new(write_map(&dir));
        let entries = store.load();
        assert_eq!(entries[0].icd_prefixes, vec!["I50".to_string(), "I110".to_string()]);
    }

    #[test]
    fn korean_alias_matches_spaceless() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConceptMapStore::new(write_map(&dir));
        let matched = store.match_question("심부전 환자의 재입원율은?");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].entry.term, "heart failure");
    }

    #[test]
    fn longer_match_ranks_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConceptMapStore::new(write_map(&dir));
        let matched = store.match_question("heart failure with sepsis");
        assert_eq!(matched[0].entry.term, "heart failure");
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn missing_file_yields_empty_map() {
        let store = ConceptMapStore::new("/nonexistent/diagnosis_map.jsonl");
        assert!(store.load().is_empty());
        assert!(store.match_question("sepsis").is_empty());
    }
}
