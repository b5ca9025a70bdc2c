//! Code-point-aware tokenization shared by the BM25 ranker and the lexical
//! overlap scorer. Tokens are ASCII alphanumeric/underscore runs and CJK
//! runs; everything else separates. This is what makes BM25 behave on Korean
//! questions, where whitespace is an unreliable token boundary.

use std::collections::HashSet;

fn is_ascii_token_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

fn is_cjk(ch: char) -> bool {
    matches!(ch,
        '\u{AC00}'..='\u{D7A3}'   // Hangul syllables
        | '\u{1100}'..='\u{11FF}' // Hangul jamo
        | '\u{3040}'..='\u{30FF}' // Hiragana / Katakana
        | '\u{4E00}'..='\u{9FFF}' // CJK unified ideographs
    )
}

/// Lowercased token list, in order, with duplicates kept.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_cjk = false;

    let mut flush = |buf: &mut String| {
        if !buf.is_empty() {
            tokens.push(std::mem::take(buf));
        }
    };

    for ch in text.to_lowercase().chars() {
        if is_ascii_token_char(ch) {
            if current_cjk {
                flush(&mut current);
            }
            current_cjk = false;
            current.push(ch);
        } else if is_cjk(ch) {
            if !current_cjk {
                flush(&mut current);
            }
            current_cjk = true;
            current.push(ch);
        } else {
            flush(&mut current);
            current_cjk = false;
        }
    }
    flush(&mut current);
    tokens
}

/// Token set for overlap computations.
pub fn token_set(text: &str) -> HashSet<String> {
    tokenize(text).into_iter().collect()
}

/// |query_tokens ∩ doc_tokens| / |query_tokens|
pub fn lexical_overlap(query: &str, text: &str) -> f64 {
    let q_tokens = token_set(query);
    let d_tokens = token_set(text);
    if q_tokens.is_empty() || d_tokens.is_empty() {
        return 0.0;
    }
    let shared = q_tokens.intersection(&d_tokens).count();
    shared as f64 / q_tokens.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_script_splits_on_boundaries() {
        assert_eq!(tokenize("ICU 입원 환자 count"), vec!["icu", "입원", "환자", "count"]);
    }

    #[test]
    fn identifiers_keep_underscores() {
        assert_eq!(tokenize("GROUP BY admission_type!"), vec!["group", "by", "admission_type"]);
    }

    #[test]
    fn hangul_runs_are_single_tokens() {
        assert_eq!(tokenize("재입원율은?"), vec!["재입원율은"]);
    }

    #[test]
    fn overlap_is_fraction_of_query_tokens() {
        // "admission" and "type" hit, "count" does not: 2/3.
        let overlap = lexical_overlap("admission type count", "Table ADMISSIONS admission type");
        assert!((overlap - 2.0 / 3.0).abs() < 1e-9);
    }
}
