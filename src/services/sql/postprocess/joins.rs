//! Join insertion: dimension joins for labels and ICD titles, demographic
//! joins for patients-only and admissions-only columns, and cleanup of
//! structurally wrong dimension joins.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::utils::sqltext::{
    ci, contains_word, find_from_table, find_table_alias, insert_join, replace_unqualified,
};

use super::rowcap::{outer_rownum_parts, rebuild_outer_rownum};
use super::schema_map::{ADMISSIONS_ONLY_COLS, PATIENTS_ONLY_COLS, TABLES_WITH_SUBJECT_ID};

fn has_unqualified(sql: &str, col: &str) -> bool {
    ci(&format!(r"(^|[^.\w$#])({})\b", regex::escape(col))).is_match(sql)
}

/// Inject a join into the inner SELECT of an outer ROWNUM wrapper, also
/// applying the column qualification rewrite inside.
fn inject_join_in_outer(
    sql: &str,
    base_table: &str,
    join_clause_for: &dyn Fn(&str) -> String,
    replace_col: &str,
    replace_to: &str,
) -> Option<(String, Vec<String>)> {
    let (inner, limit) = outer_rownum_parts(sql)?;
    let pattern = ci(&format!(r"\bfrom\s+{}(?:\s+([A-Za-z0-9_]+))?", regex::escape(base_table)));
    let caps = pattern.captures(&inner)?;
    // The optional capture greedily swallows a following clause keyword; it
    // must be re-emitted after the join clause.
    let (alias, trailing_keyword) = match caps.get(1) {
        Some(word)
            if matches!(
                word.as_str().to_uppercase().as_str(),
                "WHERE" | "JOIN" | "GROUP" | "ORDER"
            ) =>
        {
            (base_table.to_string(), Some(word.as_str().to_string()))
        },
        Some(word) => (word.as_str().to_string(), None),
        None => (base_table.to_string(), None),
    };
    let base_clause = if alias == base_table {
        format!("FROM {}", base_table)
    } else {
        format!("FROM {} {}", base_table, alias)
    };
    let join_clause = join_clause_for(&alias);
    let mut replacement = format!("{}{}", base_clause, join_clause);
    if let Some(keyword) = trailing_keyword {
        replacement.push(' ');
        replacement.push_str(&keyword);
    }
    let mut inner = pattern.replace(&inner, |_: &regex::Captures| replacement.clone()).into_owned();
    inner = replace_unqualified(&inner, replace_col, replace_to);
    Some((
        rebuild_outer_rownum(&inner, limit),
        vec!["inject_join_in_outer".to_string()],
    ))
}

/// Insert the PATIENTS join when patients-only columns appear unqualified.
pub fn ensure_patients_join(sql: &str) -> (String, Vec<String>) {
    if contains_word(sql, "PATIENTS") {
        return (sql.to_string(), Vec::new());
    }
    let needed: Vec<&str> = PATIENTS_ONLY_COLS
        .iter()
        .copied()
        .filter(|col| has_unqualified(sql, col))
        .collect();
    if needed.is_empty() {
        return (sql.to_string(), Vec::new());
    }
    let Some((base_table, alias)) = find_from_table(sql) else {
        return (sql.to_string(), Vec::new());
    };
    if !TABLES_WITH_SUBJECT_ID.contains(&base_table.to_uppercase().as_str()) {
        return (sql.to_string(), Vec::new());
    }
    let base_alias = alias.unwrap_or_else(|| base_table.clone());

    let join_clause = format!(" JOIN PATIENTS p ON {}.SUBJECT_ID = p.SUBJECT_ID", base_alias);
    let mut text = insert_join(sql, &join_clause);
    for col in needed {
        text = replace_unqualified(&text, col, &format!("p.{}", col));
    }
    (text, vec!["join_patients_for_demographics".to_string()])
}

/// PATIENTS has no ID column; alias.ID means SUBJECT_ID.
pub fn rewrite_patients_id(sql: &str) -> (String, Vec<String>) {
    let Some(alias) = find_table_alias(sql, "PATIENTS") else {
        return (sql.to_string(), Vec::new());
    };
    let pattern = ci(&format!(r"\b{}\s*\.\s*ID\b", regex::escape(&alias)));
    if !pattern.is_match(sql) {
        return (sql.to_string(), Vec::new());
    }
    let text = pattern
        .replace_all(sql, |_: &regex::Captures| format!("{}.SUBJECT_ID", alias))
        .into_owned();
    (text, vec!["patients_id_to_subject_id".to_string()])
}

/// Insert the ADMISSIONS join when admission-only columns appear unqualified.
pub fn ensure_admissions_join(sql: &str) -> (String, Vec<String>) {
    if contains_word(sql, "ADMISSIONS") {
        return (sql.to_string(), Vec::new());
    }
    let needed: Vec<&str> = ADMISSIONS_ONLY_COLS
        .iter()
        .copied()
        .filter(|col| has_unqualified(sql, col))
        .collect();
    if needed.is_empty() {
        return (sql.to_string(), Vec::new());
    }
    let Some((base_table, alias)) = find_from_table(sql) else {
        return (sql.to_string(), Vec::new());
    };
    if !TABLES_WITH_SUBJECT_ID.contains(&base_table.to_uppercase().as_str()) {
        return (sql.to_string(), Vec::new());
    }
    let base_alias = alias.unwrap_or_else(|| base_table.clone());

    let join_clause = if contains_word(sql, "HADM_ID") {
        format!(
            " JOIN ADMISSIONS a ON {}.SUBJECT_ID = a.SUBJECT_ID AND {}.HADM_ID = a.HADM_ID",
            base_alias, base_alias
        )
    } else {
        format!(" JOIN ADMISSIONS a ON {}.SUBJECT_ID = a.SUBJECT_ID", base_alias)
    };
    let mut text = insert_join(sql, &join_clause);
    for col in needed {
        text = replace_unqualified(&text, col, &format!("a.{}", col));
    }
    (text, vec!["join_admissions_for_admission_fields".to_string()])
}

/// Bare ICD_CODE references get the diagnoses/procedures fact join.
pub fn ensure_icd_join(question: &str, sql: &str) -> (String, Vec<String>) {
    if !has_unqualified(sql, "ICD_CODE") {
        return (sql.to_string(), Vec::new());
    }
    let q = question.to_lowercase();
    let target = if q.contains("procedure") { "PROCEDURES_ICD" } else { "DIAGNOSES_ICD" };
    if contains_word(sql, target) {
        return (sql.to_string(), Vec::new());
    }
    let Some((base_table, alias)) = find_from_table(sql) else {
        return (sql.to_string(), Vec::new());
    };
    if !TABLES_WITH_SUBJECT_ID.contains(&base_table.to_uppercase().as_str()) {
        return (sql.to_string(), Vec::new());
    }
    let base_alias = alias.unwrap_or_else(|| base_table.clone());

    let join_clause = if contains_word(sql, "HADM_ID") {
        format!(
            " JOIN {} d ON {}.SUBJECT_ID = d.SUBJECT_ID AND {}.HADM_ID = d.HADM_ID",
            target, base_alias, base_alias
        )
    } else {
        format!(" JOIN {} d ON {}.SUBJECT_ID = d.SUBJECT_ID", target, base_alias)
    };
    let mut text = insert_join(sql, &join_clause);
    text = replace_unqualified(&text, "ICD_CODE", "d.ICD_CODE");
    (text, vec![format!("join_{}_for_icd_code", target.to_lowercase())])
}

/// LABEL references need the D_ITEMS (chart) or D_LABITEMS (lab) dimension.
pub fn ensure_label_join(sql: &str) -> (String, Vec<String>) {
    if !has_unqualified(sql, "LABEL") {
        return (sql.to_string(), Vec::new());
    }
    if contains_word(sql, "D_ITEMS") || contains_word(sql, "D_LABITEMS") {
        return (sql.to_string(), Vec::new());
    }

    if let Some((text, mut rules)) = inject_join_in_outer(
        sql,
        "CHARTEVENTS",
        &|alias| format!(" JOIN D_ITEMS d ON {}.ITEMID = d.ITEMID", alias),
        "LABEL",
        "d.LABEL",
    ) {
        rules.push("join_d_items_for_label".to_string());
        return (text, rules);
    }
    if contains_word(sql, "CHARTEVENTS") {
        let alias =
            find_table_alias(sql, "CHARTEVENTS").unwrap_or_else(|| "CHARTEVENTS".to_string());
        let join_clause = format!(" JOIN D_ITEMS d ON {}.ITEMID = d.ITEMID", alias);
        let mut text = insert_join(sql, &join_clause);
        text = replace_unqualified(&text, "LABEL", "d.LABEL");
        return (text, vec!["join_d_items_for_label".to_string()]);
    }

    if let Some((text, mut rules)) = inject_join_in_outer(
        sql,
        "LABEVENTS",
        &|alias| format!(" JOIN D_LABITEMS d ON {}.ITEMID = d.ITEMID", alias),
        "LABEL",
        "d.LABEL",
    ) {
        rules.push("join_d_labitems_for_label".to_string());
        return (text, rules);
    }
    if contains_word(sql, "LABEVENTS") {
        let alias = find_table_alias(sql, "LABEVENTS").unwrap_or_else(|| "LABEVENTS".to_string());
        let join_clause = format!(" JOIN D_LABITEMS d ON {}.ITEMID = d.ITEMID", alias);
        let mut text = insert_join(sql, &join_clause);
        text = replace_unqualified(&text, "LABEL", "d.LABEL");
        return (text, vec!["join_d_labitems_for_label".to_string()]);
    }

    (sql.to_string(), Vec::new())
}

/// LONG_TITLE references need the ICD title dimension join.
pub fn ensure_long_title_join(sql: &str) -> (String, Vec<String>) {
    if !has_unqualified(sql, "LONG_TITLE") {
        return (sql.to_string(), Vec::new());
    }
    if contains_word(sql, "D_ICD_DIAGNOSES") || contains_word(sql, "D_ICD_PROCEDURES") {
        return (sql.to_string(), Vec::new());
    }

    if let Some((text, mut rules)) = inject_join_in_outer(
        sql,
        "DIAGNOSES_ICD",
        &|alias| {
            format!(
                " JOIN D_ICD_DIAGNOSES d ON {}.ICD_CODE = d.ICD_CODE AND {}.ICD_VERSION = d.ICD_VERSION",
                alias, alias
            )
        },
        "LONG_TITLE",
        "d.LONG_TITLE",
    ) {
        rules.push("join_d_icd_diagnoses_for_long_title".to_string());
        return (text, rules);
    }
    if contains_word(sql, "DIAGNOSES_ICD") {
        let alias = find_table_alias(sql, "DIAGNOSES_ICD")
            .unwrap_or_else(|| "DIAGNOSES_ICD".to_string());
        let join_clause = format!(
            " JOIN D_ICD_DIAGNOSES d ON {}.ICD_CODE = d.ICD_CODE AND {}.ICD_VERSION = d.ICD_VERSION",
            alias, alias
        );
        let mut text = insert_join(sql, &join_clause);
        text = replace_unqualified(&text, "LONG_TITLE", "d.LONG_TITLE");
        return (text, vec!["join_d_icd_diagnoses_for_long_title".to_string()]);
    }

    if let Some((text, mut rules)) = inject_join_in_outer(
        sql,
        "PROCEDURES_ICD",
        &|alias| {
            format!(
                " JOIN D_ICD_PROCEDURES d ON {}.ICD_CODE = d.ICD_CODE AND {}.ICD_VERSION = d.ICD_VERSION",
                alias, alias
            )
        },
        "LONG_TITLE",
        "d.LONG_TITLE",
    ) {
        rules.push("join_d_icd_procedures_for_long_title".to_string());
        return (text, rules);
    }
    if contains_word(sql, "PROCEDURES_ICD") {
        let alias = find_table_alias(sql, "PROCEDURES_ICD")
            .unwrap_or_else(|| "PROCEDURES_ICD".to_string());
        let join_clause = format!(
            " JOIN D_ICD_PROCEDURES d ON {}.ICD_CODE = d.ICD_CODE AND {}.ICD_VERSION = d.ICD_VERSION",
            alias, alias
        );
        let mut text = insert_join(sql, &join_clause);
        text = replace_unqualified(&text, "LONG_TITLE", "d.LONG_TITLE");
        return (text, vec!["join_d_icd_procedures_for_long_title".to_string()]);
    }

    (sql.to_string(), Vec::new())
}

/// Diagnosis-title questions drafted directly on the dimension get the fact
/// table joined in.
pub fn ensure_diagnosis_title_join(question: &str, sql: &str) -> (String, Vec<String>) {
    let q = question.to_lowercase();
    if !q.contains("diagnos") || !q.contains("title") {
        return (sql.to_string(), Vec::new());
    }
    if contains_word(sql, "DIAGNOSES_ICD") || !contains_word(sql, "D_ICD_DIAGNOSES") {
        return (sql.to_string(), Vec::new());
    }
    let pattern = ci(r"\bfrom\s+D_ICD_DIAGNOSES\b(?:\s+[A-Za-z0-9_]+)?");
    let replacement = "FROM DIAGNOSES_ICD dx JOIN D_ICD_DIAGNOSES d \
                       ON dx.ICD_CODE = d.ICD_CODE AND dx.ICD_VERSION = d.ICD_VERSION";
    let mut text = pattern.replace(sql, replacement).into_owned();
    text = replace_unqualified(&text, "LONG_TITLE", "d.LONG_TITLE");
    (text, vec!["diagnosis_title_join".to_string()])
}

pub fn ensure_procedure_title_join(question: &str, sql: &str) -> (String, Vec<String>) {
    let q = question.to_lowercase();
    if !q.contains("procedur") || !q.contains("title") {
        return (sql.to_string(), Vec::new());
    }
    if contains_word(sql, "PROCEDURES_ICD") {
        return (sql.to_string(), Vec::new());
    }
    let pattern = ci(r"\bfrom\s+[A-Za-z0-9_]+(?:\s+[A-Za-z0-9_]+)?");
    let replacement = "FROM PROCEDURES_ICD p JOIN D_ICD_PROCEDURES d \
                       ON p.ICD_CODE = d.ICD_CODE AND p.ICD_VERSION = d.ICD_VERSION";
    let mut text = pattern.replace(sql, replacement).into_owned();
    text = replace_unqualified(&text, "LONG_TITLE", "d.LONG_TITLE");
    (text, vec!["procedure_title_join".to_string()])
}

static PROC_JOIN_RE: Lazy<Regex> = Lazy::new(|| ci(r"\bJOIN\s+D_ICD_PROCEDURES\b"));
static SEGMENT_END_RE: Lazy<Regex> = Lazy::new(|| ci(r"\bJOIN\b|\bWHERE\b|\bGROUP\b|\bORDER\b"));

/// Drop D_ICD_PROCEDURES joins written against ITEMID/TO_NUMBER: those join
/// conditions can never be valid against the ICD dimension.
pub fn cleanup_procedure_title_joins(sql: &str) -> (String, Vec<String>) {
    if !contains_word(sql, "D_ICD_PROCEDURES") {
        return (sql.to_string(), Vec::new());
    }
    if !ci(r"\b(ITEMID|TO_NUMBER)\b").is_match(sql) {
        return (sql.to_string(), Vec::new());
    }

    let mut rules = Vec::new();
    let mut text = sql.to_string();
    let mut pos = 0usize;
    while let Some(found) = PROC_JOIN_RE.find_at(&text, pos) {
        let start = found.start();
        let tail = &text[found.end()..];
        let end = found.end()
            + SEGMENT_END_RE.find(tail).map(|m| m.start()).unwrap_or(tail.len());
        let segment = &text[start..end];
        if ci(r"\bITEMID\b|\bTO_NUMBER\b").is_match(segment) {
            text = format!("{} {}", &text[..start], &text[end..]);
            rules.push("drop_bad_d_icd_procedures_join".to_string());
            pos = start;
        } else {
            pos = end;
        }
    }
    (text, rules)
}

/// Chart-label questions: ensure CHARTEVENTS carries its D_ITEMS join.
pub fn ensure_chart_label(question: &str, sql: &str) -> (String, Vec<String>) {
    let q = question.to_lowercase();
    if !q.contains("label") || !q.contains("chart") {
        return (sql.to_string(), Vec::new());
    }
    if contains_word(sql, "D_ITEMS") || !contains_word(sql, "CHARTEVENTS") {
        return (sql.to_string(), Vec::new());
    }
    let alias = find_table_alias(sql, "CHARTEVENTS").unwrap_or_else(|| "CHARTEVENTS".to_string());
    let join_clause = format!(" JOIN D_ITEMS d ON {}.ITEMID = d.ITEMID", alias);
    let mut text = insert_join(sql, &join_clause);
    text = replace_unqualified(&text, "LABEL", "d.LABEL");
    (text, vec!["force_chart_label".to_string()])
}

/// Lab-label questions: ensure LABEVENTS carries its D_LABITEMS join.
pub fn ensure_lab_label(question: &str, sql: &str) -> (String, Vec<String>) {
    let q = question.to_lowercase();
    if !q.contains("label") || !q.contains("lab") {
        return (sql.to_string(), Vec::new());
    }
    if contains_word(sql, "D_LABITEMS") || !contains_word(sql, "LABEVENTS") {
        return (sql.to_string(), Vec::new());
    }
    let alias = find_table_alias(sql, "LABEVENTS").unwrap_or_else(|| "LABEVENTS".to_string());
    let join_clause = format!(" JOIN D_LABITEMS d ON {}.ITEMID = d.ITEMID", alias);
    let mut text = insert_join(sql, &join_clause);
    text = replace_unqualified(&text, "LABEL", "d.LABEL");
    (text, vec!["force_lab_label".to_string()])
}

/// `FROM t t` / `JOIN t t` degenerate aliases collapse to the bare table.
pub fn dedupe_table_alias(sql: &str) -> (String, Vec<String>) {
    let pattern = ci(r"\b(from|join)\s+([A-Za-z0-9_]+)\s+([A-Za-z0-9_]+)\b");
    let text = pattern
        .replace_all(sql, |caps: &regex::Captures| {
            if caps[2].eq_ignore_ascii_case(&caps[3]) {
                format!("{} {}", &caps[1], &caps[2])
            } else {
                caps[0].to_string()
            }
        })
        .into_owned();
    if text != sql {
        (text, vec!["dedupe_table_alias".to_string()])
    } else {
        (sql.to_string(), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patients_join_added_and_columns_qualified() {
        let (sql, rules) = ensure_patients_join(
            "SELECT GENDER, COUNT(*) AS CNT FROM ADMISSIONS a WHERE 1=1 GROUP BY GENDER",
        );
        assert!(sql.contains("JOIN PATIENTS p ON a.SUBJECT_ID = p.SUBJECT_ID"));
        assert!(sql.contains("p.GENDER"));
        assert_eq!(rules, vec!["join_patients_for_demographics"]);
    }

    #[test]
    fn patients_join_skipped_when_already_present() {
        let sql = "SELECT p.GENDER FROM PATIENTS p WHERE 1=1";
        let (out, rules) = ensure_patients_join(sql);
        assert_eq!(out, sql);
        assert!(rules.is_empty());
    }

    #[test]
    fn admissions_join_uses_hadm_when_present() {
        let (sql, _) = ensure_admissions_join(
            "SELECT ADMISSION_TYPE, COUNT(*) FROM ICUSTAYS i WHERE i.HADM_ID IS NOT NULL GROUP BY ADMISSION_TYPE",
        );
        assert!(sql.contains("JOIN ADMISSIONS a ON i.SUBJECT_ID = a.SUBJECT_ID AND i.HADM_ID = a.HADM_ID"));
        assert!(sql.contains("a.ADMISSION_TYPE"));
    }

    #[test]
    fn label_join_injected_inside_rownum_wrapper() {
        let sql = "SELECT * FROM (SELECT LABEL, COUNT(*) AS CNT FROM CHARTEVENTS c GROUP BY LABEL ORDER BY CNT DESC) WHERE ROWNUM <= 10";
        let (out, rules) = ensure_label_join(sql);
        assert!(out.contains("JOIN D_ITEMS d ON c.ITEMID = d.ITEMID"));
        assert!(out.contains("d.LABEL"));
        assert!(rules.contains(&"join_d_items_for_label".to_string()));
        assert!(out.ends_with("WHERE ROWNUM <= 10"));
    }

    #[test]
    fn long_title_gets_diagnosis_dimension() {
        let (out, rules) = ensure_long_title_join(
            "SELECT LONG_TITLE, COUNT(*) AS CNT FROM DIAGNOSES_ICD GROUP BY LONG_TITLE",
        );
        assert!(out.contains("JOIN D_ICD_DIAGNOSES d"));
        assert!(out.contains("d.LONG_TITLE"));
        assert_eq!(rules, vec!["join_d_icd_diagnoses_for_long_title"]);
    }

    #[test]
    fn bad_procedure_dimension_join_is_dropped() {
        let sql = "SELECT COUNT(*) FROM PROCEDUREEVENTS pe JOIN D_ICD_PROCEDURES d ON pe.ITEMID = d.ICD_CODE WHERE 1=1";
        let (out, rules) = cleanup_procedure_title_joins(sql);
        assert!(!out.contains("D_ICD_PROCEDURES"));
        assert_eq!(rules, vec!["drop_bad_d_icd_procedures_join"]);
    }

    #[test]
    fn duplicate_alias_collapses() {
        let (out, rules) = dedupe_table_alias("SELECT 1 FROM PATIENTS PATIENTS WHERE 1=1");
        assert_eq!(out, "SELECT 1 FROM PATIENTS WHERE 1=1");
        assert_eq!(rules, vec!["dedupe_table_alias"]);
    }
}
