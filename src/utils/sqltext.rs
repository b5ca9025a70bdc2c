//! Shared SQL text helpers for the rewrite pipeline.
//!
//! All helpers are plain string scanners: SQL arriving here is generated or
//! user-typed text, not an AST, and the rewrite rules need to stay robust on
//! partially malformed statements.

use once_cell::sync::Lazy;
use regex::Regex;

/// Compile a case-insensitive regex. Panics only on programmer-error patterns,
/// so callers keep static rule tables readable.
pub fn ci(pattern: &str) -> Regex {
    Regex::new(&format!("(?i){}", pattern)).expect("invalid rule regex")
}

/// Oracle identifier character set ([A-Za-z0-9_$#]).
pub fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '_' | '$' | '#')
}

static FROM_BASE_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"\bfrom\s+([A-Za-z0-9_]+)(?:\s+([A-Za-z0-9_]+))?"));

/// Clause keywords that a bare alias capture must never swallow.
fn is_clause_keyword(word: &str) -> bool {
    matches!(
        word.to_ascii_uppercase().as_str(),
        "WHERE" | "JOIN" | "GROUP" | "ORDER" | "HAVING" | "ON" | "LEFT" | "INNER" | "UNION"
    )
}

/// Find the base `FROM table [alias]` pair of a (sub)query.
pub fn find_from_table(text: &str) -> Option<(String, Option<String>)> {
    let caps = FROM_BASE_RE.captures(text)?;
    let table = caps.get(1)?.as_str().to_string();
    let alias = caps
        .get(2)
        .map(|m| m.as_str().to_string())
        .filter(|alias| !is_clause_keyword(alias));
    Some((table, alias))
}

/// Find the effective alias for `table` after a FROM/JOIN keyword.
/// Returns the table name itself when no alias was written.
pub fn find_table_alias(text: &str, table: &str) -> Option<String> {
    let pattern = ci(&format!(
        r"\b(from|join)\s+{}(?:\s+([A-Za-z0-9_]+))?",
        regex::escape(table)
    ));
    let caps = pattern.captures(text)?;
    match caps.get(2) {
        Some(alias) if !is_clause_keyword(alias.as_str()) => Some(alias.as_str().to_string()),
        _ => Some(table.to_string()),
    }
}

static WHERE_RE: Lazy<Regex> = Lazy::new(|| ci(r"\bwhere\b"));
static GROUP_BY_RE: Lazy<Regex> = Lazy::new(|| ci(r"\bgroup\s+by\b"));
static ORDER_BY_RE: Lazy<Regex> = Lazy::new(|| ci(r"\border\s+by\b"));

/// Insert a JOIN clause before WHERE / GROUP BY / ORDER BY, or append it.
pub fn insert_join(text: &str, join_clause: &str) -> String {
    if WHERE_RE.is_match(text) {
        return WHERE_RE
            .replace(text, format!("{} WHERE", join_clause))
            .into_owned();
    }
    if GROUP_BY_RE.is_match(text) {
        return GROUP_BY_RE
            .replace(text, format!("{} GROUP BY", join_clause))
            .into_owned();
    }
    if ORDER_BY_RE.is_match(text) {
        return ORDER_BY_RE
            .replace(text, format!("{} ORDER BY", join_clause))
            .into_owned();
    }
    format!("{}{}", text.trim_end_matches(';'), join_clause)
}

/// Insert a WHERE predicate at the clause-correct position (before GROUP BY /
/// ORDER BY), AND-ing it into an existing WHERE.
pub fn insert_predicate(text: &str, predicate: &str) -> String {
    if WHERE_RE.is_match(text) {
        return WHERE_RE
            .replace(text, format!("WHERE {} AND", predicate))
            .into_owned();
    }
    if GROUP_BY_RE.is_match(text) {
        return GROUP_BY_RE
            .replace(text, format!("WHERE {} GROUP BY", predicate))
            .into_owned();
    }
    if ORDER_BY_RE.is_match(text) {
        return ORDER_BY_RE
            .replace(text, format!("WHERE {} ORDER BY", predicate))
            .into_owned();
    }
    format!("{} WHERE {}", text.trim_end_matches(';'), predicate)
}

/// Wrap a statement with the Oracle top-N idiom.
pub fn wrap_with_rownum(sql: &str, n: u64) -> String {
    let core = sql.trim().trim_end_matches(';');
    format!("SELECT * FROM ({}) WHERE ROWNUM <= {}", core, n)
}

/// Replace every unqualified occurrence of `col` (no leading `.`) with
/// `replacement`, case-insensitively and only on identifier boundaries.
pub fn replace_unqualified(text: &str, col: &str, replacement: &str) -> String {
    let pattern = ci(&format!(r"(^|[^.\w$#])({})\b", regex::escape(col)));
    pattern
        .replace_all(text, |caps: &regex::Captures| {
            format!("{}{}", &caps[1], replacement)
        })
        .into_owned()
}

/// Word-boundary containment test, case-insensitive.
pub fn contains_word(text: &str, word: &str) -> bool {
    ci(&format!(r"\b{}\b", regex::escape(word))).is_match(text)
}

/// Check whether `token` starts at char index `idx` of `chars` on identifier
/// boundaries. `chars` must already be upper-cased.
fn token_at(chars: &[char], idx: usize, token: &str) -> bool {
    let token_chars: Vec<char> = token.chars().collect();
    if idx + token_chars.len() > chars.len() {
        return false;
    }
    if chars[idx..idx + token_chars.len()] != token_chars[..] {
        return false;
    }
    let prev_ok = idx == 0 || !is_ident_char(chars[idx - 1]);
    let next_ok = idx + token_chars.len() >= chars.len()
        || !is_ident_char(chars[idx + token_chars.len()]);
    prev_ok && next_ok
}

/// Extract the projection list of the outermost (last top-level) SELECT,
/// skipping string literals and parenthesized subqueries.
pub fn find_final_select_clause(sql: &str) -> String {
    let core = sql.trim().trim_end_matches(';');
    if core.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = core.chars().collect();
    let upper: Vec<char> = core.to_uppercase().chars().collect();
    if upper.len() != chars.len() {
        // Uppercasing changed the char count (exotic input); bail out rather
        // than risk a misaligned slice.
        return String::new();
    }

    let mut depth = 0usize;
    let mut in_single = false;
    let mut last_select: Option<usize> = None;
    let mut i = 0usize;
    while i < upper.len() {
        let ch = upper[i];
        if in_single {
            if ch == '\'' {
                if i + 1 < upper.len() && upper[i + 1] == '\'' {
                    i += 2;
                    continue;
                }
                in_single = false;
            }
            i += 1;
            continue;
        }
        match ch {
            '\'' => in_single = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ => {
                if depth == 0 && token_at(&upper, i, "SELECT") {
                    last_select = Some(i);
                    i += "SELECT".len();
                    continue;
                }
            },
        }
        i += 1;
    }

    let Some(select_at) = last_select else {
        return String::new();
    };

    let mut depth = 0usize;
    let mut in_single = false;
    let mut i = select_at + "SELECT".len();
    while i < upper.len() {
        let ch = upper[i];
        if in_single {
            if ch == '\'' {
                if i + 1 < upper.len() && upper[i + 1] == '\'' {
                    i += 2;
                    continue;
                }
                in_single = false;
            }
            i += 1;
            continue;
        }
        match ch {
            '\'' => in_single = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ => {
                if depth == 0 && token_at(&upper, i, "FROM") {
                    let clause: String =
                        chars[select_at + "SELECT".len()..i].iter().collect();
                    return clause.trim().to_string();
                }
            },
        }
        i += 1;
    }
    String::new()
}

/// Drop the top-level ORDER BY tail of a statement. Returns the rewritten
/// statement and whether anything was removed.
pub fn strip_top_level_order_by(sql: &str) -> (String, bool) {
    let core = sql.trim().trim_end_matches(';');
    if core.is_empty() {
        return (core.to_string(), false);
    }
    let chars: Vec<char> = core.chars().collect();
    let upper: Vec<char> = core.to_uppercase().chars().collect();
    if upper.len() != chars.len() {
        return (core.to_string(), false);
    }

    let order_token: Vec<char> = "ORDER BY".chars().collect();
    let mut depth = 0usize;
    let mut in_single = false;
    let mut order_pos: Option<usize> = None;
    let mut i = 0usize;
    while i < upper.len() {
        let ch = upper[i];
        if in_single {
            if ch == '\'' {
                if i + 1 < upper.len() && upper[i + 1] == '\'' {
                    i += 2;
                    continue;
                }
                in_single = false;
            }
            i += 1;
            continue;
        }
        match ch {
            '\'' => in_single = true,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ => {
                if depth == 0
                    && i + order_token.len() <= upper.len()
                    && upper[i..i + order_token.len()] == order_token[..]
                {
                    let prev_ok = i == 0 || !is_ident_char(upper[i - 1]);
                    if prev_ok {
                        order_pos = Some(i);
                    }
                }
            },
        }
        i += 1;
    }

    match order_pos {
        Some(pos) => {
            let head: String = chars[..pos].iter().collect();
            (head.trim_end().to_string(), true)
        },
        None => (core.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alias_skips_clause_keywords() {
        assert_eq!(
            find_table_alias("SELECT * FROM ADMISSIONS WHERE 1=1", "ADMISSIONS"),
            Some("ADMISSIONS".to_string())
        );
        assert_eq!(
            find_table_alias("SELECT * FROM ADMISSIONS a WHERE 1=1", "ADMISSIONS"),
            Some("a".to_string())
        );
    }

    #[test]
    fn join_inserted_before_where() {
        let out = insert_join(
            "SELECT * FROM CHARTEVENTS c WHERE c.ITEMID = 1",
            " JOIN D_ITEMS d ON c.ITEMID = d.ITEMID",
        );
        assert_eq!(
            out,
            "SELECT * FROM CHARTEVENTS c JOIN D_ITEMS d ON c.ITEMID = d.ITEMID WHERE c.ITEMID = 1"
        );
    }

    #[test]
    fn unqualified_replace_skips_qualified() {
        let out = replace_unqualified("SELECT LABEL, d.LABEL FROM X", "LABEL", "d.LABEL");
        assert_eq!(out, "SELECT d.LABEL, d.LABEL FROM X");
    }

    #[test]
    fn final_select_ignores_subqueries() {
        let sql = "SELECT * FROM (SELECT GENDER, COUNT(*) AS CNT FROM PATIENTS GROUP BY GENDER) WHERE ROWNUM <= 10";
        // The outermost select is `*`; the inner projection must not leak.
        assert_eq!(find_final_select_clause(sql), "*");
    }

    #[test]
    fn strip_order_by_keeps_inner_order() {
        let sql = "SELECT * FROM (SELECT X FROM T ORDER BY X) ORDER BY 1";
        let (out, changed) = strip_top_level_order_by(sql);
        assert!(changed);
        assert_eq!(out, "SELECT * FROM (SELECT X FROM T ORDER BY X)");
    }

    #[test]
    fn strip_order_by_ignores_quoted_text() {
        let sql = "SELECT 'ORDER BY' FROM DUAL";
        let (out, changed) = strip_top_level_order_by(sql);
        assert!(!changed);
        assert_eq!(out, sql);
    }
}
