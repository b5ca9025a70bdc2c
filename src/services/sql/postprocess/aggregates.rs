//! Aggregation hygiene and intent-driven canonical rewrites: stable COUNT
//! aliasing, NULL guards for grouped/averaged columns, ranking order, and
//! whole-SELECT canonical forms for a handful of recurring question shapes.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::utils::sqltext::{ci, contains_word, insert_predicate};

static COUNT_ALIAS_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"(COUNT\s*\([^)]*\)\s*(?:AS\s+)?)([A-Za-z_][A-Za-z0-9_$#]*)"));

const CLAUSE_KEYWORDS: &[&str] =
    &["FROM", "WHERE", "GROUP", "ORDER", "HAVING", "JOIN", "UNION", "LIMIT", "FETCH"];

/// Rename COUNT aliases to CNT and retarget ORDER BY references.
pub fn normalize_count_aliases(sql: &str) -> (String, Vec<String>) {
    let mut renamed: Vec<String> = Vec::new();
    let text = COUNT_ALIAS_RE
        .replace_all(sql, |caps: &regex::Captures| {
            let alias = caps[2].to_string();
            let upper = alias.to_uppercase();
            if upper == "CNT" || CLAUSE_KEYWORDS.contains(&upper.as_str()) {
                return caps[0].to_string();
            }
            renamed.push(alias);
            format!("{}CNT", &caps[1])
        })
        .into_owned();

    if renamed.is_empty() {
        return (sql.to_string(), Vec::new());
    }

    let order_re = ci(r"\border\s+by\b[^;]*");
    let text = order_re
        .replace(&text, |caps: &regex::Captures| {
            let mut clause = caps[0].to_string();
            for old in &renamed {
                clause = ci(&format!(r"\b{}\b", regex::escape(old)))
                    .replace_all(&clause, "CNT")
                    .into_owned();
            }
            clause
        })
        .into_owned();
    (text, vec!["count_alias_to_cnt".to_string()])
}

static AVG_COUNT_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"\bAVG\s*\(\s*(diagnosis_count|procedure_count|num_diagnoses|num_procedures|[A-Za-z0-9_]*_count)\s*\)")
});

/// AVG over a renamed count alias averages CNT.
pub fn rewrite_avg_count_alias(sql: &str) -> (String, Vec<String>) {
    if !AVG_COUNT_RE.is_match(sql) {
        return (sql.to_string(), Vec::new());
    }
    let text = AVG_COUNT_RE.replace_all(sql, "AVG(CNT)").into_owned();
    (text, vec!["avg_count_alias_to_cnt".to_string()])
}

/// Canonical aliases for common AVG targets.
pub fn normalize_avg_aliases(sql: &str) -> (String, Vec<String>) {
    let mut rules = Vec::new();
    let mut text = sql.to_string();
    let alias_map: [(&str, &str); 3] =
        [("DOSES_PER_24_HRS", "avg_doses"), ("AMOUNT", "avg_amount"), ("VALUE", "avg_value")];
    for (col, alias) in alias_map {
        let pattern = ci(&format!(r"AVG\(\s*([A-Za-z0-9_\.]*{})\s*\)\s+AS\s+[A-Za-z0-9_]+", col));
        let replaced = pattern
            .replace_all(&text, |caps: &regex::Captures| format!("AVG({}) AS {}", &caps[1], alias))
            .into_owned();
        if replaced != text {
            text = replaced;
            rules.push(format!("avg_alias_{}", col.to_lowercase()));
        }
    }
    (text, rules)
}

static ORDER_BY_BAD_COUNT_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"\border\s+by\s+(?:count\(\*\)\s+)?(?:label_count|test_count|organism_count|transition_count|event_count|admission_count|patient_count|transfer_count|count)\b")
});

/// ORDER BY over never-defined count aliases becomes ORDER BY CNT.
pub fn fix_order_by_bad_alias(sql: &str) -> (String, Vec<String>) {
    let mut rules = Vec::new();
    let mut text = sql.to_string();
    if ORDER_BY_BAD_COUNT_RE.is_match(&text) {
        text = ORDER_BY_BAD_COUNT_RE.replace_all(&text, "ORDER BY CNT").into_owned();
        rules.push("order_by_bad_alias_to_cnt".to_string());
    }
    let cnt_star_re = ci(r"\bORDER\s+BY\s+CNT\s*\(\s*\*\s*\)\s+CNT\b");
    if cnt_star_re.is_match(&text) {
        text = cnt_star_re.replace_all(&text, "ORDER BY CNT").into_owned();
        rules.push("order_by_cnt_star".to_string());
    }
    let count_cnt_re = ci(r"\bORDER\s+BY\s+COUNT\(\*\)\s+CNT\b");
    if count_cnt_re.is_match(&text) {
        text = count_cnt_re.replace_all(&text, "ORDER BY CNT").into_owned();
        rules.push("order_by_count_cnt".to_string());
    }
    (text, rules)
}

static ORDER_BY_ALIAS_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"\bORDER\s+BY\s+([A-Za-z0-9_]+)(\s+DESC|\s+ASC)?\b"));

/// ORDER BY some `_count` alias when the projection says CNT.
pub fn fix_order_by_count_suffix(sql: &str) -> (String, Vec<String>) {
    if !ci(r"\bORDER\s+BY\b").is_match(sql) || !contains_word(sql, "CNT") {
        return (sql.to_string(), Vec::new());
    }
    let Some(caps) = ORDER_BY_ALIAS_RE.captures(sql) else {
        return (sql.to_string(), Vec::new());
    };
    let alias = caps[1].to_uppercase();
    let direction = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
    if alias != "CNT" && alias.ends_with("_COUNT") {
        let text = ORDER_BY_ALIAS_RE
            .replace(sql, |_: &regex::Captures| format!("ORDER BY CNT{}", direction))
            .into_owned();
        return (text, vec!["order_by_count_suffix_to_cnt".to_string()]);
    }
    (sql.to_string(), Vec::new())
}

/// AVG targets that can be NULL get an IS NOT NULL guard.
pub fn ensure_avg_not_null(sql: &str) -> (String, Vec<String>) {
    let targets = ["DOSES_PER_24_HRS", "AMOUNT", "VALUE"];
    let avg_re = ci(r"AVG\s*\(\s*([A-Za-z0-9_\.]+)\s*\)");
    let mut exprs: Vec<String> = Vec::new();
    for caps in avg_re.captures_iter(sql) {
        let expr = caps[1].to_string();
        let col = expr.rsplit('.').next().unwrap_or(&expr).to_uppercase();
        if targets.contains(&col.as_str()) && !exprs.contains(&expr) {
            exprs.push(expr);
        }
    }
    if exprs.is_empty() {
        return (sql.to_string(), Vec::new());
    }

    let mut rules = Vec::new();
    let mut text = sql.to_string();
    for expr in exprs {
        let col = expr.rsplit('.').next().unwrap_or(&expr).to_string();
        let guarded_full =
            ci(&format!(r"\b{}\b\s+IS\s+NOT\s+NULL", regex::escape(&expr))).is_match(&text);
        let guarded_bare = ci(&format!(r"(^|[^.\w$#]){}\b\s+IS\s+NOT\s+NULL", regex::escape(&col)))
            .is_match(&text);
        if guarded_full || guarded_bare {
            continue;
        }
        text = insert_predicate(&text, &format!("{} IS NOT NULL", expr));
        rules.push(format!("avg_not_null_{}", col.to_lowercase()));
    }
    (text, rules)
}

static GROUP_CLAUSE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)\bgroup\s+by\b\s+(.+?)(?:\border\s+by\b|$)").unwrap());
static SIMPLE_COL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_$#\.]*$").unwrap());

/// GROUP BY columns get IS NOT NULL guards so NULL buckets do not pollute
/// grouped answers.
pub fn ensure_group_by_not_null(question: &str, sql: &str) -> (String, Vec<String>) {
    if !sql.to_uppercase().contains("GROUP BY") {
        return (sql.to_string(), Vec::new());
    }
    let q = question.to_lowercase();
    if !q.contains("by") && !q.contains("count") {
        return (sql.to_string(), Vec::new());
    }
    let Some(caps) = GROUP_CLAUSE_RE.captures(sql) else {
        return (sql.to_string(), Vec::new());
    };
    let cols: Vec<String> = caps[1]
        .split(',')
        .map(str::trim)
        .filter(|col| !col.is_empty() && SIMPLE_COL_RE.is_match(col))
        .map(str::to_string)
        .collect();
    if cols.is_empty() {
        return (sql.to_string(), Vec::new());
    }

    let mut filters: Vec<String> = Vec::new();
    for col in cols {
        let guarded =
            ci(&format!(r"\b{}\b\s+IS\s+NOT\s+NULL", regex::escape(&col))).is_match(sql);
        if !guarded {
            filters.push(format!("{} IS NOT NULL", col));
        }
    }
    if filters.is_empty() {
        return (sql.to_string(), Vec::new());
    }
    let text = insert_predicate(sql, &filters.join(" AND "));
    (text, vec!["group_by_not_null".to_string()])
}

/// Grouped counting questions imply a ranked answer.
pub fn ensure_order_by_count(question: &str, sql: &str) -> (String, Vec<String>) {
    let upper = sql.to_uppercase();
    if !upper.contains("GROUP BY") || !upper.contains("COUNT(") {
        return (sql.to_string(), Vec::new());
    }
    if ci(r"\border\s+by\b").is_match(sql) {
        return (sql.to_string(), Vec::new());
    }
    let q = question.to_lowercase();
    if !q.contains("by")
        && !q.contains("top")
        && !q.contains("count")
        && !q.contains("most")
        && !q.contains("highest")
    {
        return (sql.to_string(), Vec::new());
    }
    let order_expr = if contains_word(sql, "CNT") { "CNT" } else { "COUNT(*)" };
    let text = format!("{} ORDER BY {} DESC", sql.trim_end_matches(';'), order_expr);
    (text, vec!["order_by_count_desc".to_string()])
}

/// A bare `BY col` after an aggregate is a mangled GROUP BY.
pub fn fix_orphan_by(sql: &str) -> (String, Vec<String>) {
    if sql.to_uppercase().contains("GROUP BY") {
        return (sql.to_string(), Vec::new());
    }
    if !ci(r"\b(COUNT|AVG|SUM|MIN|MAX)\s*\(").is_match(sql) {
        return (sql.to_string(), Vec::new());
    }
    let by_re = ci(r"\bBY\b");
    for found in by_re.find_iter(sql) {
        let prefix = sql[..found.start()].to_uppercase();
        if prefix.ends_with("ORDER ") {
            continue;
        }
        let text = format!("{}GROUP BY{}", &sql[..found.start()], &sql[found.end()..]);
        return (text, vec!["orphan_by_to_group_by".to_string()]);
    }
    (sql.to_string(), Vec::new())
}

/// HAVING WHERE / HAVING 1=1 artifacts.
pub fn fix_having_where(sql: &str) -> (String, Vec<String>) {
    let mut rules = Vec::new();
    let mut text = sql.to_string();
    let having_where_re = ci(r"\bHAVING\s+WHERE\b");
    if having_where_re.is_match(&text) {
        text = having_where_re.replace_all(&text, "HAVING").into_owned();
        rules.push("fix_having_where".to_string());
    }
    let having_true_re = ci(r"\bHAVING\s+1\s*=\s*1\b");
    let replaced = having_true_re.replace_all(&text, "").into_owned();
    if replaced != text {
        text = replaced;
        rules.push("drop_having_true".to_string());
    }
    (text, rules)
}

static COUNT_FIRST_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"^\s*SELECT\s+COUNT\(\*\)\s+AS\s+CNT\s*,\s*([A-Za-z0-9_\.]+)\s+FROM"));

/// `SELECT COUNT(*) AS CNT, col` reads better (and charts better) as
/// `SELECT col, COUNT(*) AS CNT`.
pub fn reorder_count_select(sql: &str) -> (String, Vec<String>) {
    let Some(caps) = COUNT_FIRST_RE.captures(sql) else {
        return (sql.to_string(), Vec::new());
    };
    let col = caps[1].to_string();
    let text = COUNT_FIRST_RE
        .replace(sql, |_: &regex::Captures| format!("SELECT {}, COUNT(*) AS CNT FROM", col))
        .into_owned();
    (text, vec!["reorder_count_select".to_string()])
}

static AVG_FIRST_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"^\s*SELECT\s+AVG\(\s*([A-Za-z0-9_\.]+)\s*\)\s+AS\s+([A-Za-z0-9_]+)\s*,\s*([A-Za-z0-9_\.]+)\s+FROM")
});

pub fn reorder_avg_select(sql: &str) -> (String, Vec<String>) {
    let Some(caps) = AVG_FIRST_RE.captures(sql) else {
        return (sql.to_string(), Vec::new());
    };
    let avg_expr = caps[1].to_string();
    let avg_alias = caps[2].to_string();
    let col = caps[3].to_string();
    let text = AVG_FIRST_RE
        .replace(sql, |_: &regex::Captures| {
            format!("SELECT {}, AVG({}) AS {} FROM", col, avg_expr, avg_alias)
        })
        .into_owned();
    (text, vec!["reorder_avg_select".to_string()])
}

// ============================================================================
// Intent-driven canonical SELECTs
// ============================================================================

pub fn rewrite_admissions_with_icd(question: &str, sql: &str) -> (String, Vec<String>) {
    let q = question.to_lowercase();
    if !q.contains("admission") || !q.contains("code") {
        return (sql.to_string(), Vec::new());
    }
    let target = if q.contains("diagnos") {
        "DIAGNOSES_ICD"
    } else if q.contains("procedur") {
        "PROCEDURES_ICD"
    } else {
        return (sql.to_string(), Vec::new());
    };
    if contains_word(sql, "ADMISSIONS") && contains_word(sql, target) {
        return (sql.to_string(), Vec::new());
    }
    let text = format!(
        "SELECT COUNT(DISTINCT a.HADM_ID) AS cnt FROM ADMISSIONS a JOIN {} d \
         ON a.SUBJECT_ID = d.SUBJECT_ID AND a.HADM_ID = d.HADM_ID WHERE d.ICD_CODE IS NOT NULL",
        target
    );
    (text, vec!["admissions_with_icd_join".to_string()])
}

pub fn rewrite_gender_by_icd(question: &str, sql: &str) -> (String, Vec<String>) {
    let q = question.to_lowercase();
    if !q.contains("gender") {
        return (sql.to_string(), Vec::new());
    }
    if q.contains("diagnos") {
        let text = "SELECT p.GENDER, COUNT(*) AS cnt \
                    FROM DIAGNOSES_ICD d JOIN PATIENTS p ON d.SUBJECT_ID = p.SUBJECT_ID \
                    WHERE p.GENDER IS NOT NULL GROUP BY p.GENDER ORDER BY cnt DESC"
            .to_string();
        return (text, vec!["diagnoses_by_gender_canonical".to_string()]);
    }
    if q.contains("procedur") {
        let text = "SELECT p.GENDER, COUNT(*) AS cnt \
                    FROM PROCEDURES_ICD pr JOIN PATIENTS p ON pr.SUBJECT_ID = p.SUBJECT_ID \
                    WHERE p.GENDER IS NOT NULL GROUP BY p.GENDER ORDER BY cnt DESC"
            .to_string();
        return (text, vec!["procedures_by_gender_canonical".to_string()]);
    }
    (sql.to_string(), Vec::new())
}

pub fn rewrite_anchor_age_by_admission_type(question: &str, sql: &str) -> (String, Vec<String>) {
    let q = question.to_lowercase();
    if !q.contains("anchor age") {
        return (sql.to_string(), Vec::new());
    }
    if !q.contains("admission type") && !q.contains("admission") {
        return (sql.to_string(), Vec::new());
    }
    let text = "SELECT a.ADMISSION_TYPE, AVG(p.ANCHOR_AGE) AS avg_age \
                FROM ADMISSIONS a JOIN PATIENTS p ON a.SUBJECT_ID = p.SUBJECT_ID \
                WHERE a.ADMISSION_TYPE IS NOT NULL AND p.ANCHOR_AGE IS NOT NULL \
                GROUP BY a.ADMISSION_TYPE"
        .to_string();
    (text, vec!["anchor_age_by_admission_type_canonical".to_string()])
}

pub fn rewrite_icu_stays_by_gender(question: &str, sql: &str) -> (String, Vec<String>) {
    let q = question.to_lowercase();
    if !q.contains("gender") || !q.contains("icu") {
        return (sql.to_string(), Vec::new());
    }
    let text = "SELECT p.GENDER, COUNT(*) AS cnt \
                FROM ICUSTAYS i JOIN PATIENTS p ON i.SUBJECT_ID = p.SUBJECT_ID \
                WHERE p.GENDER IS NOT NULL GROUP BY p.GENDER ORDER BY cnt DESC"
        .to_string();
    (text, vec!["icu_stays_by_gender_canonical".to_string()])
}

pub fn rewrite_services_by_gender(question: &str, sql: &str) -> (String, Vec<String>) {
    let q = question.to_lowercase();
    if !q.contains("gender") || !q.contains("service") {
        return (sql.to_string(), Vec::new());
    }
    let text = "SELECT p.GENDER, COUNT(*) AS cnt \
                FROM SERVICES s JOIN PATIENTS p ON s.SUBJECT_ID = p.SUBJECT_ID \
                WHERE p.GENDER IS NOT NULL GROUP BY p.GENDER ORDER BY cnt DESC"
        .to_string();
    (text, vec!["services_by_gender_canonical".to_string()])
}

pub fn rewrite_avg_per_admission(question: &str, sql: &str) -> (String, Vec<String>) {
    let q = question.to_lowercase();
    if !q.contains("average") || !q.contains("per admission") {
        return (sql.to_string(), Vec::new());
    }
    if q.contains("diagnos") {
        let text = "SELECT AVG(diag_cnt) AS avg_diag \
                    FROM (SELECT HADM_ID, COUNT(*) AS diag_cnt FROM DIAGNOSES_ICD \
                    WHERE HADM_ID IS NOT NULL GROUP BY HADM_ID) \
                    WHERE diag_cnt IS NOT NULL"
            .to_string();
        return (text, vec!["avg_diagnoses_per_admission_canonical".to_string()]);
    }
    if q.contains("procedur") {
        let text = "SELECT AVG(proc_cnt) AS avg_proc \
                    FROM (SELECT HADM_ID, COUNT(*) AS proc_cnt FROM PROCEDURES_ICD \
                    WHERE HADM_ID IS NOT NULL GROUP BY HADM_ID) \
                    WHERE proc_cnt IS NOT NULL"
            .to_string();
        return (text, vec!["avg_procedures_per_admission_canonical".to_string()]);
    }
    (sql.to_string(), Vec::new())
}

static FROM_ICUSTAYS_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"\bfrom\s+ICUSTAYS\b(?:\s+([A-Za-z0-9_]+))?"));

/// Admission+ICU questions drafted on ICUSTAYS alone get the ADMISSIONS join.
pub fn rewrite_admissions_with_icu(question: &str, sql: &str) -> (String, Vec<String>) {
    let q = question.to_lowercase();
    if !q.contains("admission") || !q.contains("icu") {
        return (sql.to_string(), Vec::new());
    }
    if contains_word(sql, "ADMISSIONS") && contains_word(sql, "ICUSTAYS") {
        return (sql.to_string(), Vec::new());
    }
    if !contains_word(sql, "ICUSTAYS") {
        return (sql.to_string(), Vec::new());
    }

    let mut text = sql.to_string();
    if let Some(caps) = FROM_ICUSTAYS_RE.captures(&text) {
        let raw_alias = caps.get(1).map(|m| m.as_str().to_string());
        let is_keyword = raw_alias
            .as_deref()
            .map(|word| {
                matches!(
                    word.to_uppercase().as_str(),
                    "WHERE" | "JOIN" | "GROUP" | "ORDER" | "HAVING"
                )
            })
            .unwrap_or(false);
        let (icu_alias, trailing) = match raw_alias {
            Some(word) if is_keyword => ("i".to_string(), Some(word)),
            Some(word) => (word, None),
            None => ("i".to_string(), None),
        };
        let mut replacement = format!(
            "FROM ADMISSIONS a JOIN ICUSTAYS {} ON a.SUBJECT_ID = {}.SUBJECT_ID AND a.HADM_ID = {}.HADM_ID",
            icu_alias, icu_alias, icu_alias
        );
        if let Some(word) = trailing {
            replacement.push(' ');
            replacement.push_str(&word);
        }
        text = FROM_ICUSTAYS_RE.replace(&text, |_: &regex::Captures| replacement.clone()).into_owned();
        text = ci(r"\bWHERE\s+HADM_ID\b").replace_all(&text, "WHERE a.HADM_ID").into_owned();
    }
    text = ci(r"COUNT\(DISTINCT\s+HADM_ID\)").replace_all(&text, "COUNT(*)").into_owned();
    (text, vec!["admissions_with_icu_join".to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_alias_renamed_and_order_by_follows() {
        let (sql, rules) = normalize_count_aliases(
            "SELECT GENDER, COUNT(*) AS total_patients FROM PATIENTS GROUP BY GENDER ORDER BY total_patients DESC",
        );
        assert!(sql.contains("COUNT(*) AS CNT"));
        assert!(sql.contains("ORDER BY CNT DESC"));
        assert_eq!(rules, vec!["count_alias_to_cnt"]);
    }

    #[test]
    fn count_from_is_not_an_alias() {
        let sql = "SELECT COUNT(*) FROM PATIENTS WHERE 1=1";
        let (out, rules) = normalize_count_aliases(sql);
        assert_eq!(out, sql);
        assert!(rules.is_empty());
    }

    #[test]
    fn group_by_columns_get_null_guard() {
        let (sql, rules) = ensure_group_by_not_null(
            "patients by gender",
            "SELECT GENDER, COUNT(*) AS CNT FROM PATIENTS GROUP BY GENDER",
        );
        assert!(sql.contains("WHERE GENDER IS NOT NULL GROUP BY"));
        assert_eq!(rules, vec!["group_by_not_null"]);
    }

    #[test]
    fn guard_is_not_duplicated() {
        let sql = "SELECT GENDER, COUNT(*) AS CNT FROM PATIENTS WHERE GENDER IS NOT NULL GROUP BY GENDER";
        let (out, rules) = ensure_group_by_not_null("patients by gender", sql);
        assert_eq!(out, sql);
        assert!(rules.is_empty());
    }

    #[test]
    fn ranking_question_appends_order_by() {
        let (sql, rules) = ensure_order_by_count(
            "most common admission type",
            "SELECT ADMISSION_TYPE, COUNT(*) AS CNT FROM ADMISSIONS WHERE ADMISSION_TYPE IS NOT NULL GROUP BY ADMISSION_TYPE",
        );
        assert!(sql.ends_with("ORDER BY CNT DESC"));
        assert_eq!(rules, vec!["order_by_count_desc"]);
    }

    #[test]
    fn orphan_by_becomes_group_by() {
        let (sql, rules) =
            fix_orphan_by("SELECT GENDER, COUNT(*) FROM PATIENTS BY GENDER");
        assert!(sql.contains("GROUP BY GENDER"));
        assert_eq!(rules, vec!["orphan_by_to_group_by"]);
    }

    #[test]
    fn count_first_select_is_reordered() {
        let (sql, rules) = reorder_count_select(
            "SELECT COUNT(*) AS CNT, ADMISSION_TYPE FROM ADMISSIONS GROUP BY ADMISSION_TYPE",
        );
        assert!(sql.starts_with("SELECT ADMISSION_TYPE, COUNT(*) AS CNT FROM"));
        assert_eq!(rules, vec!["reorder_count_select"]);
    }

    #[test]
    fn gender_by_diagnosis_goes_canonical() {
        let (sql, rules) = rewrite_gender_by_icd(
            "diagnosis counts by gender",
            "SELECT GENDER FROM DIAGNOSES_ICD",
        );
        assert!(sql.contains("JOIN PATIENTS p ON d.SUBJECT_ID = p.SUBJECT_ID"));
        assert_eq!(rules, vec!["diagnoses_by_gender_canonical"]);
    }

    #[test]
    fn admissions_with_icu_joins_admissions() {
        let (sql, rules) = rewrite_admissions_with_icu(
            "admissions with icu stay",
            "SELECT COUNT(DISTINCT HADM_ID) FROM ICUSTAYS WHERE HADM_ID IS NOT NULL",
        );
        assert!(sql.contains("FROM ADMISSIONS a JOIN ICUSTAYS"));
        assert!(sql.contains("COUNT(*)"));
        assert_eq!(rules, vec!["admissions_with_icu_join"]);
    }

    #[test]
    fn avg_value_gets_null_guard() {
        let (sql, rules) = ensure_avg_not_null(
            "SELECT ITEMID, AVG(VALUENUM) AS avg_v, AVG(VALUE) AS raw FROM LABEVENTS GROUP BY ITEMID",
        );
        assert!(sql.contains("VALUE IS NOT NULL"));
        assert_eq!(rules, vec!["avg_not_null_value"]);
    }
}
