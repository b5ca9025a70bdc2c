//! Lightweight context retrieval for the visualization planner: vector
//! search with a minimum score and a character-capped context, degrading to
//! token-overlap search over local seed documents.

use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::services::vector_store::VectorIndex;

use super::frame::SchemaSummary;

const CONTEXT_MAX_CHARS: usize = 4000;
const MIN_SCORE: f64 = 0.05;
const TOP_K: usize = 5;

static TOKEN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z0-9_]+").unwrap());

#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub snippets: Vec<String>,
    pub context_text: String,
    pub scores: Vec<f64>,
}

fn tokenize(text: &str) -> Vec<String> {
    TOKEN_RE
        .find_iter(text)
        .map(|token| token.as_str().to_lowercase())
        .filter(|token| token.len() >= 2)
        .collect()
}

fn cap_chars(text: &mut String, max_bytes: usize) {
    if text.len() <= max_bytes {
        return;
    }
    let mut idx = max_bytes;
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    text.truncate(idx);
}

fn build_query_text(user_query: &str, schema: &SchemaSummary) -> String {
    format!(
        "User query:\n{}\n\nDataFrame schema summary:\n- columns: {:?}\n- dtypes: {:?}\n",
        user_query, schema.columns, schema.dtypes
    )
}

pub struct VizRetriever {
    index: Option<Arc<dyn VectorIndex>>,
    seed_dir: Option<PathBuf>,
}

impl VizRetriever {
    pub fn new(index: Option<Arc<dyn VectorIndex>>, seed_dir: Option<PathBuf>) -> Self {
        Self { index, seed_dir }
    }

    fn load_seed_docs(&self) -> Vec<String> {
        let Some(dir) = &self.seed_dir else {
            return Vec::new();
        };
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().map(|ext| ext == "jsonl").unwrap_or(false))
            .collect();
        paths.sort();
        let mut docs = Vec::new();
        for path in paths {
            let Ok(raw) = std::fs::read_to_string(&path) else { continue };
            for line in raw.lines() {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else { continue };
                let text = value
                    .get("text")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| value.to_string());
                docs.push(text);
            }
        }
        docs
    }

    fn local_search(&self, query_text: &str, k: usize) -> Vec<String> {
        let docs = self.load_seed_docs();
        if docs.is_empty() {
            return Vec::new();
        }
        let q_tokens: std::collections::HashSet<String> =
            tokenize(query_text).into_iter().collect();
        if q_tokens.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(f64, String)> = docs
            .into_iter()
            .filter_map(|text| {
                let d_tokens: std::collections::HashSet<String> =
                    tokenize(&text).into_iter().collect();
                if d_tokens.is_empty() {
                    return None;
                }
                let overlap = q_tokens.intersection(&d_tokens).count();
                if overlap == 0 {
                    return None;
                }
                Some((overlap as f64 / q_tokens.len() as f64, text))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(k.max(1)).map(|(_, text)| text).collect()
    }

    pub fn retrieve(&self, user_query: &str, schema: &SchemaSummary) -> RetrievedContext {
        let query_text = build_query_text(user_query, schema);

        if let Some(index) = &self.index {
            let hits = index.search(&query_text, TOP_K, None);
            let mut snippets = Vec::new();
            let mut scores = Vec::new();
            for hit in hits {
                if hit.score < MIN_SCORE || hit.text.is_empty() {
                    continue;
                }
                snippets.push(hit.text);
                scores.push(hit.score);
            }
            if !snippets.is_empty() {
                let mut context_text = snippets.join("\n\n");
                cap_chars(&mut context_text, CONTEXT_MAX_CHARS);
                tracing::debug!("Viz RAG returned {} snippets", snippets.len());
                return RetrievedContext { snippets, context_text, scores };
            }
        }

        let local = self.local_search(&query_text, TOP_K);
        let mut context_text = local.join("\n\n");
        cap_chars(&mut context_text, CONTEXT_MAX_CHARS);
        RetrievedContext { snippets: local, context_text, scores: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::viz::frame::DataFrame;
    use std::io::Write;

    #[test]
    fn local_fallback_scores_by_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("seed.jsonl")).unwrap();
        writeln!(file, r#"{{"text": "mortality rate trend by month"}}"#).unwrap();
        writeln!(file, r#"{{"text": "antibiotic resistance profile"}}"#).unwrap();

        let retriever = VizRetriever::new(None, Some(dir.path().to_path_buf()));
        let schema = DataFrame::new(vec!["mortality_rate".into()], vec![]).summarize_schema();
        let context = retriever.retrieve("mortality trend", &schema);
        assert!(!context.snippets.is_empty());
        assert!(context.snippets[0].contains("mortality"));
    }

    #[test]
    fn missing_sources_yield_empty_context() {
        let retriever = VizRetriever::new(None, None);
        let schema = DataFrame::default().summarize_schema();
        let context = retriever.retrieve("anything", &schema);
        assert!(context.context_text.is_empty());
    }
}
