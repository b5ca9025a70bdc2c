//! Label-intent profiles: concept filters expressed over dimension LABELs
//! (catheters, dialysis, device insertions) rather than ICD codes.

use std::path::PathBuf;
use std::sync::Arc;

use super::{load_jsonl_objects, normalize_match_text, string_field, string_list, MtimeCache};

#[derive(Debug, Clone)]
pub struct LabelIntentProfile {
    pub name: String,
    pub table: String,
    pub event_table: String,
    pub question_any: Vec<String>,
    pub anchor_terms: Vec<String>,
    pub required_terms_with_anchor: Vec<String>,
    pub exclude_terms_with_anchor: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MatchedLabelIntent {
    pub profile: LabelIntentProfile,
    pub score: f64,
}

pub struct LabelIntentStore {
    path: PathBuf,
    cache: MtimeCache<Vec<LabelIntentProfile>>,
}

impl LabelIntentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), cache: MtimeCache::default() }
    }

    pub fn load(&self) -> Arc<Vec<LabelIntentProfile>> {
        self.cache.load(&self.path, || {
            let mut profiles = Vec::new();
            for item in load_jsonl_objects(&self.path) {
                let name = {
                    let name = string_field(&item, "name");
                    if name.is_empty() { string_field(&item, "id") } else { name }
                };
                if name.is_empty() {
                    continue;
                }
                let table = {
                    let table = string_field(&item, "table").to_uppercase();
                    if table.is_empty() { "D_ITEMS".to_string() } else { table }
                };
                let event_table = {
                    let table = string_field(&item, "event_table").to_uppercase();
                    if table.is_empty() { "PROCEDUREEVENTS".to_string() } else { table }
                };
                let anchor_terms: Vec<String> = string_list(item.get("anchor_terms"))
                    .into_iter()
                    .map(|term| term.to_uppercase())
                    .collect();
                if anchor_terms.is_empty() {
                    continue;
                }
                profiles.push(LabelIntentProfile {
                    name,
                    table,
                    event_table,
                    question_any: string_list(item.get("question_any")),
                    anchor_terms,
                    required_terms_with_anchor: string_list(item.get("required_terms_with_anchor"))
                        .into_iter()
                        .map(|term| term.to_uppercase())
                        .collect(),
                    exclude_terms_with_anchor: string_list(item.get("exclude_terms_with_anchor"))
                        .into_iter()
                        .map(|term| term.to_uppercase())
                        .collect(),
                });
            }
            profiles
        })
    }

    /// Profiles whose question cues appear in the question, scored by the
    /// longest matched cue.
    pub fn match_question(&self, question: &str, k: usize) -> Vec<MatchedLabelIntent> {
        let normalized = normalize_match_text(question);
        if normalized.is_empty() || k == 0 {
            return Vec::new();
        }
        let mut matched = Vec::new();
        for profile in self.load().iter() {
            let score = profile
                .question_any
                .iter()
                .filter(|cue| {
                    let key = normalize_match_text(cue);
                    !key.is_empty() && normalized.contains(&key)
                })
                .map(|cue| cue.len())
                .max();
            if let Some(score) = score {
                matched.push(MatchedLabelIntent { profile: profile.clone(), score: score as f64 });
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
    fn defaults_fill_table_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("label_intent_profiles.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"{{"name": "dialysis", "question_any": ["dialysis", "투석"], "anchor_terms": ["dialysis"]}}"#
        )
        .unwrap();
        let store = LabelIntentStore::new(&path);
        let profiles = store.load();
        assert_eq!(profiles[0].table, "D_ITEMS");
        assert_eq!(profiles[0].event_table, "PROCEDUREEVENTS");
        assert_eq!(profiles[0].anchor_terms, vec!["DIALYSIS".to_string()]);

        let matched = store.match_question("혈액 투석 환자 수", 5);
        assert_eq!(matched.len(), 1);
    }
}
