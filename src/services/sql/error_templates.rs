//! Error-template repair: targeted rewrites keyed off the Oracle error code,
//! applied before any LLM repair attempt.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::utils::sqltext::{ci, strip_top_level_order_by};

const TIMEOUT_MARKERS: &[&str] = &["DPY-4024", "DPI-1067", "ORA-03156", "TIMEOUT"];
const INVALID_IDENTIFIER_MARKERS: &[&str] = &["ORA-00904", "INVALID IDENTIFIER"];
const INVALID_NUMBER_MARKERS: &[&str] = &["ORA-01722", "INVALID NUMBER"];

static ERR_IDENT_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r#"ORA-00904:\s*"(?:(?P<alias>[A-Za-z0-9_]+)"\.)?"(?P<column>[A-Za-z0-9_]+)""#)
});
static TABLE_ALIAS_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"\b(?:FROM|JOIN)\s+(?P<table>[A-Za-z_][A-Za-z0-9_$#]*)(?:\s+(?:AS\s+)?(?P<alias>[A-Za-z_][A-Za-z0-9_$#]*))?")
});

fn contains_any(text: &str, markers: &[&str]) -> bool {
    let upper = text.to_uppercase();
    markers.iter().any(|marker| upper.contains(marker))
}

fn find_aliases(sql: &str, table_name: &str) -> Vec<String> {
    let target = table_name.to_uppercase();
    let mut aliases = Vec::new();
    for caps in TABLE_ALIAS_RE.captures_iter(sql) {
        let table = caps.name("table").map(|m| m.as_str().to_uppercase()).unwrap_or_default();
        if table != target {
            continue;
        }
        if let Some(alias) = caps.name("alias") {
            let alias = alias.as_str().to_string();
            if !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
    }
    if !aliases.contains(&target) {
        aliases.push(target);
    }
    aliases
}

fn replace_alias_col(sql: &str, aliases: &[String], source_col: &str, target_col: &str) -> String {
    let mut text = sql.to_string();
    for alias in aliases {
        let pattern = ci(&format!(
            r"\b{}\.{}\b",
            regex::escape(alias),
            regex::escape(source_col)
        ));
        text = pattern
            .replace_all(&text, |_: &regex::Captures| format!("{}.{}", alias, target_col))
            .into_owned();
    }
    text
}

fn replace_unqualified(sql: &str, col: &str, target: &str) -> String {
    ci(&format!(r"(^|[^.\w$#])({})\b", regex::escape(col)))
        .replace_all(sql, |caps: &regex::Captures| format!("{}{}", &caps[1], target))
        .into_owned()
}

fn repair_invalid_identifier(sql: &str, error_message: &str) -> (String, Vec<String>) {
    let mut rules = Vec::new();
    let mut text = sql.to_string();
    let upper = text.to_uppercase();
    let err_upper = error_message.to_uppercase();

    // 1) PRESCRIPTIONS.MEDICATION -> PRESCRIPTIONS.DRUG
    if err_upper.contains("MEDICATION") && upper.contains("PRESCRIPTIONS") {
        let aliases = find_aliases(&text, "PRESCRIPTIONS");
        let mut rewritten = replace_alias_col(&text, &aliases, "MEDICATION", "DRUG");
        rewritten = replace_unqualified(&rewritten, "MEDICATION", "DRUG");
        if rewritten != text {
            text = rewritten;
            rules.push("template_00904_prescriptions_medication_to_drug".to_string());
        }
    }

    // 2) ORDERCATEGORYNAME -> ORDERCATEGORYDESCRIPTION
    if err_upper.contains("ORDERCATEGORYNAME") {
        let rewritten = ci(r"\bORDERCATEGORYNAME\b")
            .replace_all(&text, "ORDERCATEGORYDESCRIPTION")
            .into_owned();
        if rewritten != text {
            text = rewritten;
            rules.push("template_00904_ordercategoryname_to_description".to_string());
        }
    }

    // 3) TRANSFERS FIRST/LAST_CAREUNIT -> CAREUNIT
    if (err_upper.contains("FIRST_CAREUNIT") || err_upper.contains("LAST_CAREUNIT"))
        && text.to_uppercase().contains("TRANSFERS")
    {
        let aliases = find_aliases(&text, "TRANSFERS");
        let mut rewritten = replace_alias_col(&text, &aliases, "FIRST_CAREUNIT", "CAREUNIT");
        rewritten = replace_alias_col(&rewritten, &aliases, "LAST_CAREUNIT", "CAREUNIT");
        rewritten = replace_unqualified(&rewritten, "FIRST_CAREUNIT", "CAREUNIT");
        rewritten = replace_unqualified(&rewritten, "LAST_CAREUNIT", "CAREUNIT");
        if rewritten != text {
            text = rewritten;
            rules.push("template_00904_transfers_careunit_fix".to_string());
        }
    }

    // 4) D_ITEMS/D_LABITEMS LONG_TITLE -> LABEL
    if err_upper.contains("LONG_TITLE")
        && (text.to_uppercase().contains("D_ITEMS") || text.to_uppercase().contains("D_LABITEMS"))
    {
        let rewritten = ci(r"\bLONG_TITLE\b").replace_all(&text, "LABEL").into_owned();
        if rewritten != text {
            text = rewritten;
            rules.push("template_00904_long_title_to_label".to_string());
        }
    }

    // 5) ITEMID/ICD_CODE mismatch on item dimensions
    if err_upper.contains("ICD_CODE")
        && (text.to_uppercase().contains("D_ITEMS") || text.to_uppercase().contains("D_LABITEMS"))
    {
        let rewritten = ci(r"\b([A-Za-z_][A-Za-z0-9_$#]*)\.ICD_CODE\b")
            .replace_all(&text, |caps: &regex::Captures| format!("{}.ITEMID", &caps[1]))
            .into_owned();
        if rewritten != text {
            text = rewritten;
            rules.push("template_00904_itemid_icd_code_mismatch_fix".to_string());
        }
    }

    // 6) projection alias fallback: INSERTIONS -> CNT
    if err_upper.contains("INSERTIONS") && ci(r"\bAS\s+CNT\b").is_match(&text) {
        let rewritten = ci(r"\bINSERTIONS\b").replace_all(&text, "CNT").into_owned();
        if rewritten != text {
            text = rewritten;
            rules.push("template_00904_projection_alias_to_cnt".to_string());
        }
    }

    // 7) generic identifier fallback from the error payload
    if let Some(caps) = ERR_IDENT_RE.captures(error_message) {
        let err_col = caps.name("column").map(|m| m.as_str().to_uppercase()).unwrap_or_default();
        if err_col == "MEDICATION"
            && text.to_uppercase().contains("PRESCRIPTIONS")
            && !rules.iter().any(|r| r == "template_00904_prescriptions_medication_to_drug")
        {
            let rewritten = ci(r"\bMEDICATION\b").replace_all(&text, "DRUG").into_owned();
            if rewritten != text {
                text = rewritten;
                rules.push("template_00904_generic_medication_to_drug".to_string());
            }
        }
    }

    (text, rules)
}

fn repair_invalid_number(sql: &str, error_message: &str) -> (String, Vec<String>) {
    let mut rules = Vec::new();
    let mut text = sql.to_string();
    let upper = text.to_uppercase();
    let event_joined = ci(r"\bPROCEDUREEVENTS\b").is_match(&upper) || ci(r"\bCHARTEVENTS\b").is_match(&upper);

    if upper.contains("D_ICD_DIAGNOSES") && event_joined {
        let mut rewritten = ci(r"\bD_ICD_DIAGNOSES\b").replace_all(&text, "D_ITEMS").into_owned();
        rewritten = ci(r"\b([A-Za-z_][A-Za-z0-9_$#]*)\.ICD_CODE\b")
            .replace_all(&rewritten, |caps: &regex::Captures| format!("{}.ITEMID", &caps[1]))
            .into_owned();
        if rewritten != text {
            text = rewritten;
            rules.push("template_01722_event_to_items_join_fix".to_string());
        }
    }

    if text.to_uppercase().contains("D_ICD_PROCEDURES") && event_joined {
        let mut rewritten = ci(r"\bD_ICD_PROCEDURES\b").replace_all(&text, "D_ITEMS").into_owned();
        rewritten = ci(r"\b([A-Za-z_][A-Za-z0-9_$#]*)\.ICD_CODE\b")
            .replace_all(&rewritten, |caps: &regex::Captures| format!("{}.ITEMID", &caps[1]))
            .into_owned();
        if rewritten != text {
            text = rewritten;
            rules.push("template_01722_event_to_items_proc_fix".to_string());
        }
    }

    if error_message.to_uppercase().contains("INVALID NUMBER") {
        let rewritten = ci(r"TO_NUMBER\s*\(\s*([A-Za-z_][A-Za-z0-9_$#]*\.[A-Za-z_][A-Za-z0-9_$#]*)\s*\)")
            .replace_all(&text, "$1")
            .into_owned();
        if rewritten != text {
            text = rewritten;
            rules.push("template_01722_strip_unnecessary_to_number".to_string());
        }
    }

    (text, rules)
}

fn repair_timeout(question: &str, sql: &str, row_cap: u64) -> (String, Vec<String>) {
    let mut rules = Vec::new();
    let mut text = sql.trim().trim_end_matches(';').to_string();
    if text.is_empty() {
        return (text, rules);
    }

    let topn_intent = ci(r"\btop\s+\d+\b|상위\s*\d+|탑\s*\d+").is_match(question);
    if !topn_intent {
        let (stripped, changed) = strip_top_level_order_by(&text);
        if changed {
            text = stripped;
            rules.push("template_timeout_strip_order_by".to_string());
        }
    }

    let has_agg = ci(r"\bGROUP\s+BY\b|\bCOUNT\s*\(|\bAVG\s*\(|\bSUM\s*\(|\bMIN\s*\(|\bMAX\s*\(")
        .is_match(&text);
    let has_rownum = ci(r"\bROWNUM\s*<=\s*\d+").is_match(&text);
    if !has_agg && !has_rownum {
        let cap = row_cap.max(1000).min(5000);
        text = format!("SELECT * FROM ({}) WHERE ROWNUM <= {}", text, cap);
        rules.push(format!("template_timeout_apply_rownum_cap:{}", cap));
    }

    (text, rules)
}

/// Apply every template matching the error markers. An unchanged statement
/// signals the caller to fall through to the LLM repair agent.
pub fn apply_sql_error_templates(
    question: &str,
    sql: &str,
    error_message: &str,
    row_cap: u64,
) -> (String, Vec<String>) {
    let text = sql.trim().to_string();
    if text.is_empty() {
        return (text, Vec::new());
    }

    let mut rules = Vec::new();
    let mut text = text;
    if contains_any(error_message, TIMEOUT_MARKERS) {
        let (repaired, timeout_rules) = repair_timeout(question, &text, row_cap);
        text = repaired;
        rules.extend(timeout_rules);
    }
    if contains_any(error_message, INVALID_IDENTIFIER_MARKERS) {
        let (repaired, ident_rules) = repair_invalid_identifier(&text, error_message);
        text = repaired;
        rules.extend(ident_rules);
    }
    if contains_any(error_message, INVALID_NUMBER_MARKERS) {
        let (repaired, number_rules) = repair_invalid_number(&text, error_message);
        text = repaired;
        rules.extend(number_rules);
    }

    (text, rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn medication_column_repaired_on_00904() {
        let (sql, rules) = apply_sql_error_templates(
            "most prescribed medication",
            "SELECT p.MEDICATION, COUNT(*) AS CNT FROM PRESCRIPTIONS p GROUP BY p.MEDICATION",
            "ORA-00904: \"P\".\"MEDICATION\": invalid identifier",
            5000,
        );
        assert!(sql.contains("p.DRUG"));
        assert!(!sql.to_uppercase().contains("MEDICATION"));
        assert!(rules.contains(&"template_00904_prescriptions_medication_to_drug".to_string()));
    }

    #[test]
    fn transfers_careunit_repaired() {
        let (sql, rules) = apply_sql_error_templates(
            "transfers by care unit",
            "SELECT t.FIRST_CAREUNIT, COUNT(*) AS CNT FROM TRANSFERS t GROUP BY t.FIRST_CAREUNIT",
            "ORA-00904: \"T\".\"FIRST_CAREUNIT\": invalid identifier",
            5000,
        );
        assert!(sql.contains("t.CAREUNIT"));
        assert!(rules.contains(&"template_00904_transfers_careunit_fix".to_string()));
    }

    #[test]
    fn event_dimension_join_repaired_on_01722() {
        let (sql, rules) = apply_sql_error_templates(
            "procedure events by label",
            "SELECT d.LABEL FROM PROCEDUREEVENTS pe JOIN D_ICD_DIAGNOSES d ON pe.ITEMID = d.ICD_CODE WHERE 1=1",
            "ORA-01722: invalid number",
            5000,
        );
        assert!(sql.contains("D_ITEMS"));
        assert!(sql.contains("d.ITEMID"));
        assert!(rules.contains(&"template_01722_event_to_items_join_fix".to_string()));
    }

    #[test]
    fn timeout_strips_order_by_unless_topn() {
        let (sql, rules) = apply_sql_error_templates(
            "list admissions",
            "SELECT HADM_ID FROM ADMISSIONS WHERE 1=1 ORDER BY ADMITTIME",
            "DPY-4024: call timeout exceeded",
            5000,
        );
        assert!(!sql.to_uppercase().contains("ORDER BY"));
        assert!(rules.contains(&"template_timeout_strip_order_by".to_string()));
        assert!(rules.iter().any(|r| r.starts_with("template_timeout_apply_rownum_cap:")));

        let (sql, rules) = apply_sql_error_templates(
            "top 5 admissions by time",
            "SELECT * FROM (SELECT HADM_ID FROM ADMISSIONS ORDER BY ADMITTIME) WHERE ROWNUM <= 5",
            "DPY-4024: call timeout exceeded",
            5000,
        );
        assert!(sql.to_uppercase().contains("ORDER BY"));
        assert!(rules.is_empty());
    }

    #[test]
    fn unrelated_error_leaves_sql_alone() {
        let input = "SELECT 1 FROM DUAL";
        let (sql, rules) =
            apply_sql_error_templates("q", input, "ORA-00942: table or view does not exist", 5000);
        assert_eq!(sql, input);
        assert!(rules.is_empty());
    }
}
