//! Oracle dialect pass: boolean literals, INTERVAL literal forms, row
//! limiting idioms, and lock hints that Oracle rejects.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::utils::sqltext::{ci, wrap_with_rownum};

static WHERE_TRUE_RE: Lazy<Regex> = Lazy::new(|| ci(r"\bwhere\s+true\b"));
static AND_TRUE_RE: Lazy<Regex> = Lazy::new(|| ci(r"\band\s+true\b"));
static INTERVAL_YEAR_RE: Lazy<Regex> = Lazy::new(|| ci(r"interval\s+'(\d+)\s*year[s]?'"));
static INTERVAL_MONTH_RE: Lazy<Regex> = Lazy::new(|| ci(r"interval\s+'(\d+)\s*month[s]?'"));
static INTERVAL_DAY_RE: Lazy<Regex> = Lazy::new(|| ci(r"interval\s+'(\d+)\s*day[s]?'"));
static LIMIT_RE: Lazy<Regex> = Lazy::new(|| ci(r"\blimit\s+(\d+)\s*;?\s*$"));
static FETCH_RE: Lazy<Regex> = Lazy::new(|| ci(r"\bfetch\s+first\s+(\d+)\s+rows\s+only\s*;?\s*$"));
static TOP_RE: Lazy<Regex> = Lazy::new(|| ci(r"^\s*select\s+top\s+(\d+)\s+"));
static FOR_UPDATE_RE: Lazy<Regex> = Lazy::new(|| ci(r"\bFOR\s+UPDATE\b(?:\s+SKIP\s+LOCKED)?"));

/// WHERE TRUE / AND TRUE, INTERVAL literal normalization, and LIMIT / FETCH
/// FIRST / TOP -> ROWNUM wrapper.
pub fn rewrite_oracle_syntax(sql: &str) -> (String, Vec<String>) {
    let mut rules = Vec::new();
    let mut text = sql.to_string();

    if WHERE_TRUE_RE.is_match(&text) {
        text = WHERE_TRUE_RE.replace_all(&text, "WHERE 1=1").into_owned();
        rules.push("where_true_to_1eq1".to_string());
    }
    if AND_TRUE_RE.is_match(&text) {
        text = AND_TRUE_RE.replace_all(&text, "AND 1=1").into_owned();
        rules.push("and_true_to_1eq1".to_string());
    }
    if !text.to_uppercase().contains("WHERE") && ci(r"\b1=1\b").is_match(&text) {
        text = ci(r"\b1=1\b").replace(&text, "WHERE 1=1").into_owned();
        rules.push("insert_where_for_1eq1".to_string());
    }

    if INTERVAL_YEAR_RE.is_match(&text) {
        let replaced = INTERVAL_YEAR_RE.replace_all(&text, "INTERVAL '$1' YEAR").into_owned();
        if replaced != text {
            text = replaced;
            rules.push("interval_year_normalized".to_string());
        }
    }
    if INTERVAL_MONTH_RE.is_match(&text) {
        let replaced = INTERVAL_MONTH_RE.replace_all(&text, "INTERVAL '$1' MONTH").into_owned();
        if replaced != text {
            text = replaced;
            rules.push("interval_month_normalized".to_string());
        }
    }
    if INTERVAL_DAY_RE.is_match(&text) {
        let replaced = INTERVAL_DAY_RE.replace_all(&text, "INTERVAL '$1' DAY").into_owned();
        if replaced != text {
            text = replaced;
            rules.push("interval_day_normalized".to_string());
        }
    }

    if let Some(caps) = LIMIT_RE.captures(&text) {
        let n: u64 = caps[1].parse().unwrap_or(0);
        text = LIMIT_RE.replace(&text, "").trim_end().to_string();
        if !text.to_uppercase().contains("ROWNUM") {
            text = wrap_with_rownum(&text, n);
            rules.push("limit_to_rownum".to_string());
        }
    }
    if let Some(caps) = FETCH_RE.captures(&text) {
        let n: u64 = caps[1].parse().unwrap_or(0);
        text = FETCH_RE.replace(&text, "").trim_end().to_string();
        if !text.to_uppercase().contains("ROWNUM") {
            text = wrap_with_rownum(&text, n);
            rules.push("fetch_first_to_rownum".to_string());
        }
    }
    if let Some(caps) = TOP_RE.captures(&text) {
        let n: u64 = caps[1].parse().unwrap_or(0);
        text = TOP_RE.replace(&text, "SELECT ").into_owned();
        if !text.to_uppercase().contains("ROWNUM") {
            text = wrap_with_rownum(&text, n);
            rules.push("top_to_rownum".to_string());
        }
    }

    (text, rules)
}

/// FOR UPDATE [SKIP LOCKED] never belongs on a read-only path.
pub fn strip_for_update(sql: &str) -> (String, Vec<String>) {
    if !FOR_UPDATE_RE.is_match(sql) {
        return (sql.to_string(), Vec::new());
    }
    let text = FOR_UPDATE_RE.replace_all(sql, "").into_owned();
    (text, vec!["strip_for_update".to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn where_true_becomes_1eq1() {
        let (sql, rules) = rewrite_oracle_syntax("SELECT 1 FROM DUAL WHERE TRUE");
        assert_eq!(sql, "SELECT 1 FROM DUAL WHERE 1=1");
        assert_eq!(rules, vec!["where_true_to_1eq1"]);
    }

    #[test]
    fn limit_becomes_rownum_wrapper() {
        let (sql, rules) =
            rewrite_oracle_syntax("SELECT GENDER FROM PATIENTS WHERE 1=1 LIMIT 10");
        assert_eq!(sql, "SELECT * FROM (SELECT GENDER FROM PATIENTS WHERE 1=1) WHERE ROWNUM <= 10");
        assert_eq!(rules, vec!["limit_to_rownum"]);
    }

    #[test]
    fn fetch_first_becomes_rownum_wrapper() {
        let (sql, _) =
            rewrite_oracle_syntax("SELECT GENDER FROM PATIENTS WHERE 1=1 FETCH FIRST 5 ROWS ONLY");
        assert!(sql.ends_with("WHERE ROWNUM <= 5"));
    }

    #[test]
    fn interval_literal_is_normalized() {
        let (sql, rules) = rewrite_oracle_syntax(
            "SELECT 1 FROM ADMISSIONS WHERE ADMITTIME >= SYSDATE - INTERVAL '30 days'",
        );
        assert!(sql.contains("INTERVAL '30' DAY"));
        assert!(rules.contains(&"interval_day_normalized".to_string()));
    }

    #[test]
    fn for_update_is_stripped() {
        let (sql, rules) = strip_for_update("SELECT 1 FROM PATIENTS WHERE 1=1 FOR UPDATE SKIP LOCKED");
        assert!(!sql.to_uppercase().contains("FOR UPDATE"));
        assert_eq!(rules, vec!["strip_for_update"]);
    }

    #[test]
    fn already_normalized_interval_is_untouched() {
        let input = "SELECT 1 FROM ADMISSIONS WHERE ADMITTIME >= SYSDATE - INTERVAL '30' DAY";
        let (sql, rules) = rewrite_oracle_syntax(input);
        assert_eq!(sql, input);
        assert!(rules.is_empty());
    }
}
