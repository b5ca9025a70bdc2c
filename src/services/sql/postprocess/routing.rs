//! Table routing and field rewrites driven by the question: when the draft
//! chose the wrong base table or a column that does not exist on the routed
//! table, force the correct one.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::utils::sqltext::{ci, contains_word, find_table_alias, replace_unqualified};

use super::schema_map::MICRO_ONLY_COLS;

static FROM_ANY_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"\bfrom\s+([A-Za-z0-9_]+)(?:\s+([A-Za-z0-9_]+))?"));

/// Replace the first `FROM table [alias]` with `FROM target [alias]`,
/// preserving whatever word followed the table name.
fn force_from_table(text: &str, target: &str) -> Option<String> {
    let caps = FROM_ANY_RE.captures(text)?;
    let replacement = match caps.get(2) {
        Some(alias) => format!("FROM {} {}", target, alias.as_str()),
        None => format!("FROM {}", target),
    };
    Some(FROM_ANY_RE.replace(text, |_: &regex::Captures| replacement.clone()).into_owned())
}

/// Microbiology-only columns force MICROBIOLOGYEVENTS as the base table.
pub fn ensure_microbiology_table(sql: &str) -> (String, Vec<String>) {
    if contains_word(sql, "MICROBIOLOGYEVENTS") {
        return (sql.to_string(), Vec::new());
    }
    let needed = MICRO_ONLY_COLS.iter().any(|col| {
        ci(&format!(r"(^|[^.\w$#])({})\b", regex::escape(col))).is_match(sql)
    });
    if !needed {
        return (sql.to_string(), Vec::new());
    }
    match force_from_table(sql, "MICROBIOLOGYEVENTS") {
        Some(text) => (text, vec!["force_microbiology_table".to_string()]),
        None => (sql.to_string(), Vec::new()),
    }
}

pub fn ensure_microbiology_by_question(question: &str, sql: &str) -> (String, Vec<String>) {
    if contains_word(sql, "MICROBIOLOGYEVENTS") {
        return (sql.to_string(), Vec::new());
    }
    let q = question.to_lowercase();
    let triggered = ["micro", "microbiology", "organism", "antibiotic", "culture", "specimen"]
        .iter()
        .any(|token| q.contains(token));
    if !triggered {
        return (sql.to_string(), Vec::new());
    }
    match force_from_table(sql, "MICROBIOLOGYEVENTS") {
        Some(text) => (text, vec!["force_microbiology_by_question".to_string()]),
        None => (sql.to_string(), Vec::new()),
    }
}

pub fn ensure_icustays_table(question: &str, sql: &str) -> (String, Vec<String>) {
    if contains_word(sql, "ICUSTAYS") {
        return (sql.to_string(), Vec::new());
    }
    let q = question.to_lowercase();
    let mut icu_only =
        q.contains("icu stay") || q.contains("icu stays") || (q.contains("icu") && q.contains("los"));
    if q.contains("admission") || q.contains("admissions") || q.contains("patient") || q.contains("patients")
    {
        icu_only = false;
    }
    let icu_cols = ["FIRST_CAREUNIT", "LAST_CAREUNIT", "LOS", "STAY_ID", "INTIME", "OUTTIME"];
    let has_icu_cols = icu_cols
        .iter()
        .any(|col| ci(&format!(r"(^|[^.\w$#])({})\b", col)).is_match(sql));
    if !icu_only && !has_icu_cols {
        return (sql.to_string(), Vec::new());
    }
    match force_from_table(sql, "ICUSTAYS") {
        Some(text) => (text, vec!["force_icustays_table".to_string()]),
        None => (sql.to_string(), Vec::new()),
    }
}

pub fn ensure_chartevents_table(question: &str, sql: &str) -> (String, Vec<String>) {
    if contains_word(sql, "CHARTEVENTS") {
        return (sql.to_string(), Vec::new());
    }
    let q = question.to_lowercase();
    if !q.contains("chart event") && !q.contains("chart events") && !q.contains("chart") {
        return (sql.to_string(), Vec::new());
    }
    match force_from_table(sql, "CHARTEVENTS") {
        Some(text) => (text, vec!["force_chartevents_table".to_string()]),
        None => (sql.to_string(), Vec::new()),
    }
}

pub fn ensure_labevents_table(question: &str, sql: &str) -> (String, Vec<String>) {
    if contains_word(sql, "LABEVENTS") {
        return (sql.to_string(), Vec::new());
    }
    let q = question.to_lowercase();
    if !q.contains("lab") && !q.contains("laboratory") {
        return (sql.to_string(), Vec::new());
    }
    if q.contains("micro") || q.contains("microbiology") {
        return (sql.to_string(), Vec::new());
    }
    match force_from_table(sql, "LABEVENTS") {
        Some(text) => (text, vec!["force_labevents_table".to_string()]),
        None => (sql.to_string(), Vec::new()),
    }
}

pub fn ensure_services_table(question: &str, sql: &str) -> (String, Vec<String>) {
    if contains_word(sql, "SERVICES") {
        return (sql.to_string(), Vec::new());
    }
    let q = question.to_lowercase();
    if !q.contains("service") || q.contains("order") || q.contains("poe") {
        return (sql.to_string(), Vec::new());
    }
    let has_service_cols = ci(r"\b(CURR_SERVICE|PREV_SERVICE)\b").is_match(sql);
    if !has_service_cols && !q.contains("current service") {
        return (sql.to_string(), Vec::new());
    }
    match force_from_table(sql, "SERVICES") {
        Some(text) => (text, vec!["force_services_table".to_string()]),
        None => (sql.to_string(), Vec::new()),
    }
}

pub fn ensure_prescriptions_table(question: &str, sql: &str) -> (String, Vec<String>) {
    if contains_word(sql, "PRESCRIPTIONS") {
        return (sql.to_string(), Vec::new());
    }
    let q = question.to_lowercase();
    if q.contains("emar") || q.contains("ingredient") {
        return (sql.to_string(), Vec::new());
    }
    let triggered = ["prescription", "drug", "medication", "doses", "formulation"]
        .iter()
        .any(|token| q.contains(token));
    if !triggered {
        return (sql.to_string(), Vec::new());
    }
    match force_from_table(sql, "PRESCRIPTIONS") {
        Some(text) => (text, vec!["force_prescriptions_table".to_string()]),
        None => (sql.to_string(), Vec::new()),
    }
}

pub fn ensure_inputevents_table(question: &str, sql: &str) -> (String, Vec<String>) {
    if contains_word(sql, "INPUTEVENTS") {
        return (sql.to_string(), Vec::new());
    }
    let q = question.to_lowercase();
    if !q.contains("input event") && !q.contains("input events") && !q.contains("input amount") {
        return (sql.to_string(), Vec::new());
    }
    if q.contains("ingredient") {
        return (sql.to_string(), Vec::new());
    }
    match force_from_table(sql, "INPUTEVENTS") {
        Some(text) => (text, vec!["force_inputevents_table".to_string()]),
        None => (sql.to_string(), Vec::new()),
    }
}

pub fn ensure_outputevents_table(question: &str, sql: &str) -> (String, Vec<String>) {
    if contains_word(sql, "OUTPUTEVENTS") {
        return (sql.to_string(), Vec::new());
    }
    let q = question.to_lowercase();
    if !q.contains("output event") && !q.contains("output events") && !q.contains("output value") {
        return (sql.to_string(), Vec::new());
    }
    match force_from_table(sql, "OUTPUTEVENTS") {
        Some(text) => (text, vec!["force_outputevents_table".to_string()]),
        None => (sql.to_string(), Vec::new()),
    }
}

pub fn ensure_emar_table(question: &str, sql: &str) -> (String, Vec<String>) {
    let q = question.to_lowercase();
    if !q.contains("emar") {
        return (sql.to_string(), Vec::new());
    }
    let target =
        if q.contains("detail") || q.contains("administration type") { "EMAR_DETAIL" } else { "EMAR" };
    if contains_word(sql, target) {
        return (sql.to_string(), Vec::new());
    }
    match force_from_table(sql, target) {
        Some(text) => (text, vec![format!("force_{}_table", target.to_lowercase())]),
        None => (sql.to_string(), Vec::new()),
    }
}

pub fn ensure_diagnoses_icd_table(question: &str, sql: &str) -> (String, Vec<String>) {
    let q = question.to_lowercase();
    if !q.contains("diagnos") || q.contains("title") {
        return (sql.to_string(), Vec::new());
    }
    if contains_word(sql, "DIAGNOSES_ICD") {
        return (sql.to_string(), Vec::new());
    }
    match force_from_table(sql, "DIAGNOSES_ICD") {
        Some(text) => (text, vec!["force_diagnoses_icd_table".to_string()]),
        None => (sql.to_string(), Vec::new()),
    }
}

pub fn ensure_procedures_icd_table(question: &str, sql: &str) -> (String, Vec<String>) {
    let q = question.to_lowercase();
    if !q.contains("procedur") || q.contains("title") {
        return (sql.to_string(), Vec::new());
    }
    if q.contains("procedure event") || q.contains("procedureevents") {
        return (sql.to_string(), Vec::new());
    }
    if contains_word(sql, "PROCEDURES_ICD") {
        return (sql.to_string(), Vec::new());
    }
    match force_from_table(sql, "PROCEDURES_ICD") {
        Some(text) => (text, vec!["force_procedures_icd_table".to_string()]),
        None => (sql.to_string(), Vec::new()),
    }
}

/// TRANSFERS questions about event types: reroute SERVICES drafts and map
/// service columns to EVENTTYPE.
pub fn ensure_transfers_eventtype(question: &str, sql: &str) -> (String, Vec<String>) {
    let mut rules = Vec::new();
    let mut text = sql.to_string();
    let q = question.to_lowercase();
    if !q.contains("transfer") {
        return (text, rules);
    }
    if !q.contains("event type") && !q.contains("eventtype") {
        return (text, rules);
    }

    if contains_word(&text, "SERVICES")
        || ci(r"\b(CURR_SERVICE|PREV_SERVICE|ORDER_TYPE)\b").is_match(&text)
    {
        if let Some(rewritten) = force_from_table(&text, "TRANSFERS") {
            text = rewritten;
            rules.push("force_transfers_table".to_string());
        }
    }

    let pattern = ci(r"(^|[^.\w$#])(CURR_SERVICE|PREV_SERVICE|ORDER_TYPE)\b");
    if pattern.is_match(&text) {
        text = pattern
            .replace_all(&text, |caps: &regex::Captures| format!("{}EVENTTYPE", &caps[1]))
            .into_owned();
        rules.push("eventtype_from_transfers".to_string());
    }
    (text, rules)
}

pub fn rewrite_services_order_type(question: &str, sql: &str) -> (String, Vec<String>) {
    if !contains_word(sql, "SERVICES") {
        return (sql.to_string(), Vec::new());
    }
    let pattern = ci(r"(^|[^.\w$#])(ORDER_TYPE)\b");
    if !pattern.is_match(sql) {
        return (sql.to_string(), Vec::new());
    }
    let q = question.to_lowercase();
    let target = if q.contains("previous service") || q.contains("prev service") || q.contains("prior service")
    {
        "PREV_SERVICE"
    } else {
        "CURR_SERVICE"
    };
    let text = pattern
        .replace_all(sql, |caps: &regex::Captures| format!("{}{}", &caps[1], target))
        .into_owned();
    (text, vec!["services_order_type_to_curr_prev".to_string()])
}

pub fn rewrite_prescriptions_drug_field(question: &str, sql: &str) -> (String, Vec<String>) {
    if !contains_word(sql, "PRESCRIPTIONS") {
        return (sql.to_string(), Vec::new());
    }
    let q = question.to_lowercase();
    if !q.contains("drug") && !q.contains("medication") {
        return (sql.to_string(), Vec::new());
    }
    let rewritten = replace_unqualified(sql, "ITEMID", "DRUG");
    if rewritten != sql {
        (rewritten, vec!["prescriptions_itemid_to_drug".to_string()])
    } else {
        (sql.to_string(), Vec::new())
    }
}

pub fn rewrite_icd_code_field(question: &str, sql: &str) -> (String, Vec<String>) {
    let q = question.to_lowercase();
    if !q.contains("code") {
        return (sql.to_string(), Vec::new());
    }
    if q.contains("diagnos") && contains_word(sql, "DIAGNOSES_ICD") {
        let rewritten = replace_unqualified(sql, "ITEMID", "ICD_CODE");
        if rewritten != sql {
            return (rewritten, vec!["diagnoses_itemid_to_icd_code".to_string()]);
        }
        return (sql.to_string(), Vec::new());
    }
    if q.contains("procedur") && contains_word(sql, "PROCEDURES_ICD") {
        let rewritten = replace_unqualified(sql, "ITEMID", "ICD_CODE");
        if rewritten != sql {
            return (rewritten, vec!["procedures_itemid_to_icd_code".to_string()]);
        }
    }
    (sql.to_string(), Vec::new())
}

/// ICD fact tables never carry ITEMID; both bare and qualified references
/// become ICD_CODE.
pub fn rewrite_itemid_in_icd_tables(sql: &str) -> (String, Vec<String>) {
    if !contains_word(sql, "DIAGNOSES_ICD") && !contains_word(sql, "PROCEDURES_ICD") {
        return (sql.to_string(), Vec::new());
    }
    if !contains_word(sql, "ITEMID") {
        return (sql.to_string(), Vec::new());
    }
    let mut text = replace_unqualified(sql, "ITEMID", "ICD_CODE");
    let qualified = ci(r"\b([A-Za-z0-9_]+)\.ITEMID\b");
    text = qualified
        .replace_all(&text, |caps: &regex::Captures| format!("{}.ICD_CODE", &caps[1]))
        .into_owned();
    (text, vec!["icd_tables_itemid_to_icd_code".to_string()])
}

pub fn rewrite_emar_medication_field(question: &str, sql: &str) -> (String, Vec<String>) {
    if !contains_word(sql, "EMAR") {
        return (sql.to_string(), Vec::new());
    }
    let q = question.to_lowercase();
    if !q.contains("medication") && !q.contains("drug") {
        return (sql.to_string(), Vec::new());
    }
    let rewritten = replace_unqualified(sql, "ITEMID", "MEDICATION");
    if rewritten != sql {
        (rewritten, vec!["emar_itemid_to_medication".to_string()])
    } else {
        (sql.to_string(), Vec::new())
    }
}

pub fn rewrite_icustays_careunit(question: &str, sql: &str) -> (String, Vec<String>) {
    if !contains_word(sql, "ICUSTAYS") || !contains_word(sql, "CAREUNIT") {
        return (sql.to_string(), Vec::new());
    }
    let q = question.to_lowercase();
    let target = if q.contains("last careunit") || q.contains("last care unit") {
        "LAST_CAREUNIT"
    } else {
        "FIRST_CAREUNIT"
    };
    let mut text = replace_unqualified(sql, "CAREUNIT", target);
    let qualified = ci(r"\b([A-Za-z0-9_]+)\.CAREUNIT\b");
    text = qualified
        .replace_all(&text, |caps: &regex::Captures| format!("{}.{}", &caps[1], target))
        .into_owned();
    if text != sql {
        (text, vec!["icustays_careunit_to_first_last".to_string()])
    } else {
        (sql.to_string(), Vec::new())
    }
}

pub fn rewrite_warning_flag(question: &str, sql: &str) -> (String, Vec<String>) {
    if !question.to_lowercase().contains("warning") {
        return (sql.to_string(), Vec::new());
    }
    if !contains_word(sql, "CHARTEVENTS") {
        return (sql.to_string(), Vec::new());
    }
    let rewritten = replace_unqualified(sql, "STATUSDESCRIPTION", "WARNING");
    if rewritten != sql {
        (rewritten, vec!["warning_flag_from_chartevents".to_string()])
    } else {
        (sql.to_string(), Vec::new())
    }
}

pub fn rewrite_lab_priority(question: &str, sql: &str) -> (String, Vec<String>) {
    if !question.to_lowercase().contains("priority") {
        return (sql.to_string(), Vec::new());
    }
    if !contains_word(sql, "LABEVENTS") {
        return (sql.to_string(), Vec::new());
    }
    if ci(r"(^|[^.\w$#])(PRIORITY)\b").is_match(sql) {
        return (sql.to_string(), Vec::new());
    }
    let rewritten = replace_unqualified(sql, "SPEC_TYPE_DESC", "PRIORITY");
    if rewritten != sql {
        (rewritten, vec!["lab_priority_from_labevents".to_string()])
    } else {
        (sql.to_string(), Vec::new())
    }
}

/// Microbiology counting questions asked on generic id columns count the
/// named entity instead (antibiotic, organism, test).
pub fn rewrite_micro_count_field(question: &str, sql: &str) -> (String, Vec<String>) {
    if !contains_word(sql, "MICROBIOLOGYEVENTS") {
        return (sql.to_string(), Vec::new());
    }
    let q = question.to_lowercase();
    let target = if q.contains("antibiotic") {
        "AB_NAME"
    } else if q.contains("organism") {
        "ORG_NAME"
    } else if q.contains("test") {
        "TEST_NAME"
    } else {
        return (sql.to_string(), Vec::new());
    };

    let pattern =
        ci(r"(^|[^.\w$#])(MICROEVENT_ID|MICRO_SPECIMEN_ID|ITEMID|TEST_ITEMID|ORG_ITEMID|AB_ITEMID)\b");
    let rewritten = pattern
        .replace_all(sql, |caps: &regex::Captures| format!("{}{}", &caps[1], target))
        .into_owned();
    if rewritten != sql {
        (rewritten, vec!["micro_count_field_to_name".to_string()])
    } else {
        (sql.to_string(), Vec::new())
    }
}

/// Label questions projecting ITEMID get the dimension LABEL instead, once
/// the dimension join exists.
pub fn rewrite_label_field(question: &str, sql: &str) -> (String, Vec<String>) {
    let q = question.to_lowercase();
    if !q.contains("label") {
        return (sql.to_string(), Vec::new());
    }

    if q.contains("chart") && !q.contains("lab") {
        if let Some(alias) = find_table_alias(sql, "D_ITEMS") {
            let mut text = replace_unqualified(sql, "ITEMID", &format!("{}.LABEL", alias));
            text = replace_unqualified(&text, "LABEL", &format!("{}.LABEL", alias));
            if text != sql {
                return (text, vec!["chart_label_itemid_to_label".to_string()]);
            }
        }
        return (sql.to_string(), Vec::new());
    }

    if q.contains("lab") || q.contains("laboratory") {
        if let Some(alias) = find_table_alias(sql, "D_LABITEMS") {
            let mut text = replace_unqualified(sql, "ITEMID", &format!("{}.LABEL", alias));
            text = replace_unqualified(&text, "LABEL", &format!("{}.LABEL", alias));
            if text != sql {
                return (text, vec!["lab_label_itemid_to_label".to_string()]);
            }
        }
    }
    (sql.to_string(), Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn micro_columns_force_micro_table() {
        let (sql, rules) =
            ensure_microbiology_table("SELECT ORG_NAME, COUNT(*) FROM LABEVENTS GROUP BY ORG_NAME");
        assert!(sql.contains("FROM MICROBIOLOGYEVENTS"));
        assert_eq!(rules, vec!["force_microbiology_table"]);
    }

    #[test]
    fn force_table_preserves_alias_and_where() {
        let (sql, _) = ensure_microbiology_by_question(
            "top organisms by culture count",
            "SELECT ORG FROM LABEVENTS l WHERE 1=1",
        );
        assert!(sql.starts_with("SELECT ORG FROM MICROBIOLOGYEVENTS l WHERE 1=1"));
    }

    #[test]
    fn icu_routing_suppressed_for_admission_questions() {
        let (sql, rules) = ensure_icustays_table(
            "admissions with icu los",
            "SELECT HADM_ID FROM ADMISSIONS WHERE 1=1",
        );
        assert_eq!(sql, "SELECT HADM_ID FROM ADMISSIONS WHERE 1=1");
        assert!(rules.is_empty());
    }

    #[test]
    fn icd_tables_drop_itemid() {
        let (sql, rules) = rewrite_itemid_in_icd_tables(
            "SELECT d.ITEMID, COUNT(*) FROM DIAGNOSES_ICD d GROUP BY d.ITEMID",
        );
        assert!(sql.contains("d.ICD_CODE"));
        assert!(!sql.to_uppercase().contains("ITEMID"));
        assert_eq!(rules, vec!["icd_tables_itemid_to_icd_code"]);
    }

    #[test]
    fn emar_detail_routed_for_detail_questions() {
        let (sql, rules) = ensure_emar_table(
            "emar detail administration counts",
            "SELECT COUNT(*) FROM EMAR WHERE 1=1",
        );
        assert!(sql.contains("FROM EMAR_DETAIL"));
        assert_eq!(rules, vec!["force_emar_detail_table"]);
    }

    #[test]
    fn careunit_resolves_first_or_last() {
        let (sql, _) = rewrite_icustays_careunit(
            "patients per last care unit",
            "SELECT CAREUNIT, COUNT(*) FROM ICUSTAYS GROUP BY CAREUNIT",
        );
        assert!(sql.contains("LAST_CAREUNIT"));
    }
}
