//! Okapi BM25 over the type-filtered document slice. Ranks with k1=1.2,
//! b=0.75 against term frequencies computed on the shared tokenizer.

use std::collections::{HashMap, HashSet};

use crate::models::rag::{RagDocument, ScoredDocument};

use super::tokenize::tokenize;

const K1: f64 = 1.2;
const B: f64 = 0.75;

/// Rank `docs` against `query`, returning the top `k` positive-scoring hits.
pub fn rank(query: &str, docs: &[RagDocument], k: usize) -> Vec<ScoredDocument> {
    if docs.is_empty() || k == 0 {
        return Vec::new();
    }
    let query_terms: HashSet<String> = tokenize(query).into_iter().collect();
    if query_terms.is_empty() {
        return Vec::new();
    }

    struct Tokenized<'a> {
        doc: &'a RagDocument,
        tf: HashMap<String, f64>,
        len: usize,
    }

    let mut tokenized: Vec<Tokenized> = Vec::new();
    let mut df: HashMap<String, f64> = HashMap::new();
    let mut total_len = 0usize;
    for doc in docs {
        if doc.id.is_empty() || doc.text.is_empty() {
            continue;
        }
        let tokens = tokenize(&doc.text);
        if tokens.is_empty() {
            continue;
        }
        let mut tf: HashMap<String, f64> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.clone()).or_insert(0.0) += 1.0;
        }
        for term in tf.keys() {
            *df.entry(term.clone()).or_insert(0.0) += 1.0;
        }
        total_len += tokens.len();
        tokenized.push(Tokenized { doc, tf, len: tokens.len() });
    }
    if tokenized.is_empty() {
        return Vec::new();
    }

    let n_docs = tokenized.len() as f64;
    let avg_len = total_len as f64 / n_docs;

    let mut ranked: Vec<ScoredDocument> = Vec::new();
    for entry in &tokenized {
        let mut score = 0.0;
        for term in &query_terms {
            let f = entry.tf.get(term).copied().unwrap_or(0.0);
            if f <= 0.0 {
                continue;
            }
            let n_q = df.get(term).copied().unwrap_or(0.0);
            let idf = (1.0 + ((n_docs - n_q + 0.5) / (n_q + 0.5))).ln();
            let denom = f + K1 * (1.0 - B + B * (entry.len as f64 / avg_len.max(1e-9)));
            score += idf * ((f * (K1 + 1.0)) / denom.max(1e-9));
        }
        if score > 0.0 {
            ranked.push(ScoredDocument {
                id: entry.doc.id.clone(),
                text: entry.doc.text.clone(),
                metadata: entry.doc.metadata.clone(),
                score,
            });
        }
    }
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rag::{DocMetadata, DocType};

    fn doc(id: &str, text: &str) -> RagDocument {
        RagDocument {
            id: id.to_string(),
            text: text.to_string(),
            metadata: DocMetadata::of(DocType::Glossary),
        }
    }

    #[test]
    fn rare_term_outranks_common_term() {
        let docs = vec![
            doc("a", "admission admission admission common"),
            doc("b", "dialysis catheter insertion common"),
            doc("c", "common words only here"),
        ];
        let hits = rank("dialysis", &docs, 3);
        assert_eq!(hits[0].id, "b");
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn zero_score_docs_are_dropped() {
        let docs = vec![doc("a", "nothing relevant"), doc("b", "also nothing")];
        assert!(rank("sepsis", &docs, 5).is_empty());
    }

    #[test]
    fn korean_query_matches_korean_docs() {
        let docs = vec![doc("ko", "재입원율 지표 설명"), doc("en", "readmission rate metric")];
        let hits = rank("재입원율", &docs, 2);
        assert_eq!(hits[0].id, "ko");
    }
}
