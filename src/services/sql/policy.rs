//! Static policy gate: read-only, statement type, join cap, WHERE policy,
//! and table scope. Failures carry stable reason strings.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::query::{PolicyCheck, PolicyReport};
use crate::utils::sqltext::ci;
use crate::utils::{ApiError, ApiResult};

static WRITE_KEYWORDS_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"\b(delete|update|insert|merge|drop|alter|truncate)\b"));
static STATEMENT_RE: Lazy<Regex> = Lazy::new(|| ci(r"^\s*(select|with)\b"));
static WITH_RE: Lazy<Regex> = Lazy::new(|| ci(r"^\s*with\b"));
static SELECT_RE: Lazy<Regex> = Lazy::new(|| ci(r"\bselect\b"));
static JOIN_RE: Lazy<Regex> = Lazy::new(|| ci(r"\bjoin\b"));
static WHERE_RE: Lazy<Regex> = Lazy::new(|| ci(r"\bwhere\b"));
static TABLE_REF_RE: Lazy<Regex> = Lazy::new(|| ci(r#"\b(from|join)\s+([A-Za-z0-9_.$#"]+)"#));
static CTE_REF_RE: Lazy<Regex> = Lazy::new(|| ci(r"(?:with|,)\s*([A-Za-z0-9_]+)\s+as\s*\("));
static AGG_FN_RE: Lazy<Regex> = Lazy::new(|| ci(r"\b(count|avg|sum|min|max)\s*\("));
static GROUP_BY_RE: Lazy<Regex> = Lazy::new(|| ci(r"\bgroup\s+by\b"));

const WHERE_OPTIONAL_QUESTION_HINTS: &[&str] = &[
    "count",
    "how many",
    "number of",
    "distribution",
    "trend",
    "compare",
    "comparison",
    "average",
    "mean",
    "median",
    "ratio",
    "rate",
    "top",
    "most",
    "least",
    "summary",
    "aggregate",
    "분포",
    "추이",
    "비교",
    "평균",
    "중앙",
    "비율",
    "건수",
    "통계",
    "요약",
    "상위",
    "하위",
    "몇 명",
    "몇건",
    "트렌드",
];

fn check(name: &str, passed: bool, message: impl Into<String>) -> PolicyCheck {
    PolicyCheck { name: name.to_string(), passed, message: message.into() }
}

fn extract_table_names(sql: &str) -> Vec<String> {
    let mut tables = Vec::new();
    for caps in TABLE_REF_RE.captures_iter(sql) {
        let raw = caps[2].trim().trim_matches('"').trim();
        let name = raw.replace(['(', ')', ','], "");
        let name = match name.rsplit_once('.') {
            Some((_, short)) => short.to_string(),
            None => name,
        };
        if !name.is_empty() {
            tables.push(name);
        }
    }
    tables
}

fn can_skip_where(question: Option<&str>, sql: &str) -> bool {
    let Some(question) = question else {
        return false;
    };
    let q = question.to_lowercase();
    if !WHERE_OPTIONAL_QUESTION_HINTS.iter().any(|hint| q.contains(hint)) {
        return false;
    }
    AGG_FN_RE.is_match(sql) || GROUP_BY_RE.is_match(sql)
}

/// Validate SQL against the static policy. `allowed_tables` is the configured
/// table scope (empty = unrestricted). Returns the check report on success.
pub fn precheck_sql(
    sql: &str,
    question: Option<&str>,
    max_db_joins: usize,
    allowed_tables: &[String],
) -> ApiResult<PolicyReport> {
    let text = sql.trim();
    if text.is_empty() {
        return Err(ApiError::invalid_input("Empty SQL"));
    }
    let mut checks: Vec<PolicyCheck> = Vec::new();

    if WRITE_KEYWORDS_RE.is_match(text) {
        checks.push(check("Read-only", false, "Write keyword detected"));
        return Err(ApiError::policy_violation("Write operations are not allowed"));
    }
    checks.push(check("Read-only", true, "No write keyword detected"));

    // Allow SELECT and CTE-based read-only queries (WITH ... SELECT ...).
    let statement_ok = STATEMENT_RE.is_match(text);
    checks.push(check("Statement type", statement_ok, "SELECT/CTE only"));
    if !statement_ok {
        return Err(ApiError::unsupported("Only SELECT queries are allowed"));
    }
    if WITH_RE.is_match(text) {
        let cte_has_select = SELECT_RE.is_match(text);
        checks.push(check("CTE", cte_has_select, "WITH clause includes SELECT"));
        if !cte_has_select {
            return Err(ApiError::unsupported("CTE query must include SELECT"));
        }
    }

    let join_count = JOIN_RE.find_iter(text).count();
    let join_ok = join_count <= max_db_joins;
    checks.push(check("Join limit", join_ok, format!("{}/{} joins", join_count, max_db_joins)));
    if !join_ok {
        return Err(ApiError::unsupported("Join limit exceeded"));
    }

    let has_where = WHERE_RE.is_match(text);
    let where_optional = can_skip_where(question, text);
    let where_ok = has_where || where_optional;
    let where_message =
        if has_where { "WHERE clause present" } else { "Aggregate question: WHERE optional" };
    checks.push(check("WHERE rule", where_ok, where_message));
    if !where_ok {
        return Err(ApiError::policy_violation("WHERE clause required"));
    }

    let allowed: std::collections::HashSet<String> = allowed_tables
        .iter()
        .filter(|name| !name.is_empty())
        .map(|name| name.to_lowercase())
        .collect();
    if !allowed.is_empty() {
        let cte_names: std::collections::HashSet<String> = CTE_REF_RE
            .captures_iter(text)
            .map(|caps| caps[1].to_lowercase())
            .collect();
        let found_tables: Vec<String> = extract_table_names(text)
            .into_iter()
            .filter(|table| !cte_names.contains(&table.to_lowercase()))
            .collect();
        let mut disallowed: Vec<String> = found_tables
            .iter()
            .filter(|table| !allowed.contains(&table.to_lowercase()))
            .cloned()
            .collect();
        disallowed.sort();
        disallowed.dedup();
        if disallowed.is_empty() {
            checks.push(check(
                "Table scope",
                true,
                format!("{} table references allowed", found_tables.len()),
            ));
        } else {
            let list = disallowed.join(", ");
            checks.push(check("Table scope", false, format!("Disallowed: {}", list)));
            return Err(ApiError::table_scope(list));
        }
    } else {
        checks.push(check("Table scope", true, "No table scope restriction"));
    }

    Ok(PolicyReport { passed: true, checks })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_scope() -> Vec<String> {
        Vec::new()
    }

    #[test]
    fn write_statements_are_rejected() {
        for sql in [
            "DELETE FROM PATIENTS",
            "update ADMISSIONS set X = 1",
            "SELECT 1 FROM T WHERE 1=1; DROP TABLE PATIENTS",
        ] {
            let err = precheck_sql(sql, None, 3, &no_scope()).unwrap_err();
            assert_eq!(err.detail(), "Write operations are not allowed");
        }
    }

    #[test]
    fn only_select_or_cte_is_allowed() {
        let err = precheck_sql("EXPLAIN PLAN FOR SELECT 1", None, 3, &no_scope()).unwrap_err();
        assert_eq!(err.detail(), "Only SELECT queries are allowed");

        assert!(precheck_sql(
            "WITH c AS (SELECT 1 AS X FROM DUAL) SELECT X FROM c WHERE X = 1",
            None,
            3,
            &no_scope()
        )
        .is_ok());
    }

    #[test]
    fn join_cap_is_enforced() {
        let sql = "SELECT 1 FROM A JOIN B ON 1=1 JOIN C ON 1=1 JOIN D ON 1=1 JOIN E ON 1=1 WHERE 1=1";
        let err = precheck_sql(sql, None, 3, &no_scope()).unwrap_err();
        assert_eq!(err.detail(), "Join limit exceeded");
        assert!(precheck_sql(sql, None, 4, &no_scope()).is_ok());
    }

    #[test]
    fn missing_where_requires_aggregate_hint() {
        let sql = "SELECT GENDER, COUNT(*) FROM PATIENTS GROUP BY GENDER";
        let err = precheck_sql(sql, None, 3, &no_scope()).unwrap_err();
        assert_eq!(err.detail(), "WHERE clause required");

        assert!(precheck_sql(sql, Some("how many patients per gender"), 3, &no_scope()).is_ok());

        // Hint without aggregate shape still fails.
        let err = precheck_sql("SELECT GENDER FROM PATIENTS", Some("patient count"), 3, &no_scope())
            .unwrap_err();
        assert_eq!(err.detail(), "WHERE clause required");
    }

    #[test]
    fn table_scope_blocks_unknown_tables() {
        let scope = vec!["patients".to_string(), "admissions".to_string()];
        let err = precheck_sql(
            "SELECT 1 FROM ICUSTAYS WHERE 1=1",
            None,
            3,
            &scope,
        )
        .unwrap_err();
        assert_eq!(err.detail(), "Table not allowed: ICUSTAYS");

        assert!(precheck_sql("SELECT 1 FROM PATIENTS WHERE 1=1", None, 3, &scope).is_ok());
    }

    #[test]
    fn cte_names_are_exempt_from_scope() {
        let scope = vec!["admissions".to_string()];
        let sql = "WITH cohort AS (SELECT HADM_ID FROM ADMISSIONS WHERE 1=1) \
                   SELECT COUNT(*) FROM cohort WHERE 1=1";
        assert!(precheck_sql(sql, None, 3, &scope).is_ok());
    }

    #[test]
    fn report_lists_named_checks() {
        let report =
            precheck_sql("SELECT 1 FROM PATIENTS WHERE 1=1", None, 3, &no_scope()).unwrap();
        let names: Vec<&str> = report.checks.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&"Read-only"));
        assert!(names.contains(&"Join limit"));
        assert!(names.contains(&"WHERE rule"));
        assert!(names.contains(&"Table scope"));
    }
}
