//! Clinical-semantics rewrites: ICU-stay pseudo-flags, mortality flags, age
//! expressions, and timestamp arithmetic normalized to what the MIMIC-IV
//! schema actually stores.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::utils::sqltext::{ci, contains_word, find_from_table, find_table_alias};

use super::schema_map::{is_timestamp_col, TABLES_WITH_HADM_ID};

static HAS_ICU_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"\bHAS_ICU_STAY\b\s*=\s*(?:'Y'|1|TRUE)"));
static ICU_STAY_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"\bICU_STAY\b\s*=\s*(?:'Y'|'YES'|1|TRUE)"));
static ICUSTAYS_FLAG_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"\bICUSTAYS\b\s*=\s*(?:'Y'|'YES'|1|TRUE)"));
static ICUSTAYS_NOT_NULL_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"\bICUSTAYS\b\s+IS\s+NOT\s+NULL"));
static HOSPITAL_EXPIRE_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"\bHOSPITAL_EXPIRE_FLAG\s+IS\s+NOT\s+NULL\b"));

const ICU_SUBSELECT: &str = "HADM_ID IN (SELECT HADM_ID FROM ICUSTAYS)";

fn hadm_alias_for_flag(sql: &str) -> Option<String> {
    if let Some(alias) = find_table_alias(sql, "ADMISSIONS") {
        return Some(alias);
    }
    let (base_table, alias) = find_from_table(sql)?;
    if TABLES_WITH_HADM_ID.contains(&base_table.to_uppercase().as_str()) {
        Some(alias.unwrap_or(base_table))
    } else {
        None
    }
}

/// HAS_ICU_STAY = 'Y' is not a column; it means membership in ICUSTAYS.
pub fn rewrite_has_icu_stay(sql: &str) -> (String, Vec<String>) {
    if !HAS_ICU_RE.is_match(sql) {
        return (sql.to_string(), Vec::new());
    }
    let Some(alias) = find_table_alias(sql, "ADMISSIONS") else {
        return (sql.to_string(), Vec::new());
    };
    let replacement = format!("{}.{}", alias, ICU_SUBSELECT);
    let text = HAS_ICU_RE.replace_all(sql, |_: &regex::Captures| replacement.clone()).into_owned();
    (text, vec!["has_icu_stay_to_icustays".to_string()])
}

pub fn rewrite_icu_stay(sql: &str) -> (String, Vec<String>) {
    if !ICU_STAY_RE.is_match(sql) {
        return (sql.to_string(), Vec::new());
    }
    let Some(alias) = find_table_alias(sql, "ADMISSIONS") else {
        return (sql.to_string(), Vec::new());
    };
    let replacement = format!("{}.{}", alias, ICU_SUBSELECT);
    let text = ICU_STAY_RE.replace_all(sql, |_: &regex::Captures| replacement.clone()).into_owned();
    (text, vec!["icu_stay_to_icustays".to_string()])
}

pub fn rewrite_icustays_flag(sql: &str) -> (String, Vec<String>) {
    if !ICUSTAYS_FLAG_RE.is_match(sql) {
        return (sql.to_string(), Vec::new());
    }
    let replacement = match hadm_alias_for_flag(sql) {
        Some(alias) => format!("{}.{}", alias, ICU_SUBSELECT),
        None => ICU_SUBSELECT.to_string(),
    };
    let text =
        ICUSTAYS_FLAG_RE.replace_all(sql, |_: &regex::Captures| replacement.clone()).into_owned();
    (text, vec!["icustays_flag_to_icustays".to_string()])
}

pub fn rewrite_icustays_not_null(sql: &str) -> (String, Vec<String>) {
    if !ICUSTAYS_NOT_NULL_RE.is_match(sql) {
        return (sql.to_string(), Vec::new());
    }
    let replacement = match hadm_alias_for_flag(sql) {
        Some(alias) => format!("{}.{}", alias, ICU_SUBSELECT),
        None => ICU_SUBSELECT.to_string(),
    };
    let text = ICUSTAYS_NOT_NULL_RE
        .replace_all(sql, |_: &regex::Captures| replacement.clone())
        .into_owned();
    (text, vec!["icustays_not_null_to_icustays".to_string()])
}

/// HOSPITAL_EXPIRE_FLAG is 0/1, never NULL-for-survivors; IS NOT NULL means
/// died.
pub fn rewrite_hospital_expire_flag(sql: &str) -> (String, Vec<String>) {
    if !HOSPITAL_EXPIRE_RE.is_match(sql) {
        return (sql.to_string(), Vec::new());
    }
    let text = HOSPITAL_EXPIRE_RE.replace_all(sql, "HOSPITAL_EXPIRE_FLAG = 1").into_owned();
    (text, vec!["hospital_expire_flag_to_one".to_string()])
}

/// ADMISSION_LENGTH / ADMISSION_DAYS are derived, not stored.
pub fn rewrite_admission_length(sql: &str) -> (String, Vec<String>) {
    let pattern = ci(r"(^|[^.\w$#])(ADMISSION_LENGTH|ADMISSION_DAYS)\b");
    if !pattern.is_match(sql) {
        return (sql.to_string(), Vec::new());
    }
    let alias = find_table_alias(sql, "ADMISSIONS").unwrap_or_else(|| "ADMISSIONS".to_string());
    let replacement =
        format!("CAST({}.DISCHTIME AS DATE) - CAST({}.ADMITTIME AS DATE)", alias, alias);
    let text = pattern
        .replace_all(sql, |caps: &regex::Captures| format!("{}{}", &caps[1], replacement))
        .into_owned();
    (text, vec!["admission_length_to_date_diff".to_string()])
}

/// DURATION / DURATION_DAYS on transfers are OUTTIME - INTIME.
pub fn rewrite_duration(sql: &str) -> (String, Vec<String>) {
    let pattern = ci(r"(^|[^.\w$#])(DURATION_DAYS|DURATION)\b");
    if !pattern.is_match(sql) {
        return (sql.to_string(), Vec::new());
    }
    let alias = find_table_alias(sql, "TRANSFERS").unwrap_or_else(|| "TRANSFERS".to_string());
    let replacement = format!("CAST({}.OUTTIME AS DATE) - CAST({}.INTIME AS DATE)", alias, alias);
    let text = pattern
        .replace_all(sql, |caps: &regex::Captures| format!("{}{}", &caps[1], replacement))
        .into_owned();
    (text, vec!["duration_to_date_diff".to_string()])
}

static TO_DATE_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"TO_DATE\s*\(\s*([A-Za-z0-9_\.]+)\s*,\s*'[^']+'\s*\)"));

/// TO_DATE on a timestamp column is a type error in Oracle; cast instead.
pub fn rewrite_to_date_cast(sql: &str) -> (String, Vec<String>) {
    let mut changed = false;
    let text = TO_DATE_RE
        .replace_all(sql, |caps: &regex::Captures| {
            let col = &caps[1];
            let col_name = col.rsplit('.').next().unwrap_or(col);
            if is_timestamp_col(col_name) {
                changed = true;
                format!("CAST({} AS DATE)", col)
            } else {
                caps[0].to_string()
            }
        })
        .into_owned();
    if changed {
        (text, vec!["to_date_on_timestamp_to_cast".to_string()])
    } else {
        (sql.to_string(), Vec::new())
    }
}

static EXTRACT_DAY_RE: Lazy<Regex> = Lazy::new(|| ci(r"EXTRACT\s*\(\s*DAY\s+FROM\s+([^)]+)\)"));

/// EXTRACT(DAY FROM a - b) is redundant: the date difference already is days.
pub fn rewrite_extract_day_diff(sql: &str) -> (String, Vec<String>) {
    let mut changed = false;
    let text = EXTRACT_DAY_RE
        .replace_all(sql, |caps: &regex::Captures| {
            let expr = caps[1].trim().to_string();
            if expr.contains('-') {
                changed = true;
                expr
            } else {
                caps[0].to_string()
            }
        })
        .into_owned();
    if changed {
        (text, vec!["extract_day_to_date_diff".to_string()])
    } else {
        (sql.to_string(), Vec::new())
    }
}

static TS_DIFF_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"TIMESTAMPDIFF\s*\(\s*DAY\s*,\s*([A-Za-z0-9_\.]+)\s*,\s*([A-Za-z0-9_\.]+)\s*\)")
});

/// TIMESTAMPDIFF is MySQL; Oracle subtracts DATE casts.
pub fn rewrite_timestampdiff(sql: &str) -> (String, Vec<String>) {
    if !TS_DIFF_RE.is_match(sql) {
        return (sql.to_string(), Vec::new());
    }
    let text = TS_DIFF_RE
        .replace_all(sql, |caps: &regex::Captures| {
            format!("CAST({} AS DATE) - CAST({} AS DATE)", &caps[2], &caps[1])
        })
        .into_owned();
    (text, vec!["timestampdiff_day_to_date_diff".to_string()])
}

static EXTRACT_YEAR_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"EXTRACT\s*\(\s*YEAR\s+FROM\s+([A-Za-z0-9_\.]+)\s*\)"));

/// ANCHOR_YEAR / ANCHOR_YEAR_GROUP already are year values.
pub fn rewrite_extract_year(sql: &str) -> (String, Vec<String>) {
    let mut changed = false;
    let text = EXTRACT_YEAR_RE
        .replace_all(sql, |caps: &regex::Captures| {
            let expr = caps[1].to_string();
            let col = expr.rsplit('.').next().unwrap_or(&expr).to_uppercase();
            if col == "ANCHOR_YEAR" || col == "ANCHOR_YEAR_GROUP" {
                changed = true;
                expr
            } else {
                caps[0].to_string()
            }
        })
        .into_owned();
    if changed {
        (text, vec!["extract_year_on_anchor_year".to_string()])
    } else {
        (sql.to_string(), Vec::new())
    }
}

static AGE_FROM_ANCHOR_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"EXTRACT\s*\(\s*YEAR\s+FROM\s+(?:CURRENT_DATE|SYSDATE)\s*\)\s*-\s*([A-Za-z0-9_\.]*ANCHOR_YEAR)")
});

/// Age is ANCHOR_AGE; deriving it from the shifted ANCHOR_YEAR is wrong.
pub fn rewrite_age_from_anchor(sql: &str) -> (String, Vec<String>) {
    if !AGE_FROM_ANCHOR_RE.is_match(sql) {
        return (sql.to_string(), Vec::new());
    }
    let text = AGE_FROM_ANCHOR_RE
        .replace_all(sql, |caps: &regex::Captures| {
            let expr = &caps[1];
            match expr.split_once('.') {
                Some((alias, _)) => format!("{}.ANCHOR_AGE", alias),
                None => "ANCHOR_AGE".to_string(),
            }
        })
        .into_owned();
    (text, vec!["anchor_year_to_anchor_age".to_string()])
}

static AGE_FROM_BIRTHDATE_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"EXTRACT\s*\(\s*YEAR\s+FROM\s+(?:CURRENT_DATE|SYSDATE)\s*\)\s*-\s*EXTRACT\s*\(\s*YEAR\s+FROM\s+([A-Za-z0-9_\.]*BIRTHDATE)\s*\)")
});

pub fn rewrite_age_from_birthdate(sql: &str) -> (String, Vec<String>) {
    if !AGE_FROM_BIRTHDATE_RE.is_match(sql) {
        return (sql.to_string(), Vec::new());
    }
    let text = AGE_FROM_BIRTHDATE_RE
        .replace_all(sql, |caps: &regex::Captures| {
            let expr = &caps[1];
            match expr.split_once('.') {
                Some((alias, _)) => format!("{}.ANCHOR_AGE", alias),
                None => "ANCHOR_AGE".to_string(),
            }
        })
        .into_owned();
    (text, vec!["birthdate_to_anchor_age".to_string()])
}

/// Leftover BIRTHDATE / DOB columns map to ANCHOR_AGE.
pub fn rewrite_birthdate_to_anchor_age(sql: &str) -> (String, Vec<String>) {
    let mut rules = Vec::new();
    let mut text = sql.to_string();
    let birthdate_re = ci(r"\bBIRTHDATE\b");
    if birthdate_re.is_match(&text) {
        text = birthdate_re.replace_all(&text, "ANCHOR_AGE").into_owned();
        rules.push("birthdate_col_to_anchor_age".to_string());
    }
    let dob_re = ci(r"\bDOB\b");
    if dob_re.is_match(&text) {
        text = dob_re.replace_all(&text, "ANCHOR_AGE").into_owned();
        rules.push("dob_col_to_anchor_age".to_string());
    }
    (text, rules)
}

static BIRTH_YEAR_DIFF_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"([A-Za-z0-9_\.]*ANCHOR_YEAR)\s*-\s*([A-Za-z0-9_\.]*BIRTH_YEAR)"));
static BIRTH_YEAR_RE: Lazy<Regex> = Lazy::new(|| ci(r"\bBIRTH_YEAR\b"));

pub fn rewrite_birth_year_age(sql: &str) -> (String, Vec<String>) {
    let mut rules = Vec::new();
    let mut text = sql.to_string();
    let replaced = BIRTH_YEAR_DIFF_RE.replace_all(&text, "ANCHOR_AGE").into_owned();
    if replaced != text {
        text = replaced;
        rules.push("birth_year_diff_to_anchor_age".to_string());
    }
    if BIRTH_YEAR_RE.is_match(&text) {
        text = BIRTH_YEAR_RE.replace_all(&text, "ANCHOR_YEAR").into_owned();
        rules.push("birth_year_to_anchor_year".to_string());
    }
    (text, rules)
}

static ICU_LOS_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"CAST\(([^)]*OUTTIME[^)]*)\s+AS\s+DATE\)\s*-\s*CAST\(([^)]*INTIME[^)]*)\s+AS\s+DATE\)")
});
static ICU_LOS_REV_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"CAST\(([^)]*INTIME[^)]*)\s+AS\s+DATE\)\s*-\s*CAST\(([^)]*OUTTIME[^)]*)\s+AS\s+DATE\)")
});

/// ICUSTAYS stores LOS; computing it from the timestamps is redundant.
pub fn rewrite_icustays_los(sql: &str) -> (String, Vec<String>) {
    if !contains_word(sql, "ICUSTAYS") {
        return (sql.to_string(), Vec::new());
    }
    let replaced = ICU_LOS_RE.replace_all(sql, "LOS").into_owned();
    if replaced != sql {
        return (replaced, vec!["icustays_diff_to_los".to_string()]);
    }
    let replaced = ICU_LOS_REV_RE.replace_all(sql, "LOS").into_owned();
    if replaced != sql {
        return (replaced, vec!["icustays_diff_to_los".to_string()]);
    }
    (sql.to_string(), Vec::new())
}

static DIFF_RE: Lazy<Regex> = Lazy::new(|| ci(r"([A-Za-z0-9_\.]+)\s*-\s*([A-Za-z0-9_\.]+)"));

/// Bare timestamp subtraction gets DATE casts on both sides so the result is
/// a day count.
pub fn normalize_timestamp_diffs(sql: &str) -> (String, Vec<String>) {
    let mut changed = false;
    let text = DIFF_RE
        .replace_all(sql, |caps: &regex::Captures| {
            let a = &caps[1];
            let b = &caps[2];
            let a_col = a.rsplit('.').next().unwrap_or(a);
            let b_col = b.rsplit('.').next().unwrap_or(b);
            if is_timestamp_col(a_col) && is_timestamp_col(b_col) {
                changed = true;
                format!("CAST({} AS DATE) - CAST({} AS DATE)", a, b)
            } else {
                caps[0].to_string()
            }
        })
        .into_owned();
    if changed {
        (text, vec!["timestamp_diff_cast_to_date".to_string()])
    } else {
        (sql.to_string(), Vec::new())
    }
}

static TIME_WINDOW_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"\b([A-Za-z0-9_\.]*TIME)\b\s*(>=|>)\s*(SYSDATE|CURRENT_DATE)(?:\s*-\s*INTERVAL\s*'[^']+'\s*(DAY|MONTH|YEAR))?(?:\s+AND\s+[A-Za-z0-9_\.]*TIME\b\s*<=\s*(SYSDATE|CURRENT_DATE)(?:\s*-\s*INTERVAL\s*'[^']+'\s*(DAY|MONTH|YEAR))?)?")
});

const TIME_KEYWORDS: &[&str] = &[
    "last", "past", "recent", "today", "yesterday", "week", "month", "year", "since", "before",
    "after", "between",
];

/// Drop hallucinated relative time windows when the question never asked for
/// one. MIMIC timestamps are date-shifted, so SYSDATE windows silently return
/// nothing.
pub fn strip_time_window_if_absent(question: &str, sql: &str) -> (String, Vec<String>) {
    let q = question.to_lowercase();
    if TIME_KEYWORDS.iter().any(|keyword| q.contains(keyword)) {
        return (sql.to_string(), Vec::new());
    }
    if !TIME_WINDOW_RE.is_match(sql) {
        return (sql.to_string(), Vec::new());
    }
    let mut text = TIME_WINDOW_RE.replace_all(sql, "").into_owned();
    text = ci(r"\bWHERE\s+AND\b").replace_all(&text, "WHERE").into_owned();
    text = ci(r"\bAND\s+AND\b").replace_all(&text, "AND").into_owned();
    text = ci(r"\bWHERE\s*(GROUP|ORDER)\b").replace_all(&text, "$1").into_owned();
    text = ci(r"\bWHERE\s*$").replace_all(&text, "").into_owned();
    (text, vec!["strip_time_window".to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icu_flag_becomes_subselect() {
        let (sql, rules) =
            rewrite_has_icu_stay("SELECT COUNT(*) FROM ADMISSIONS a WHERE HAS_ICU_STAY = 'Y'");
        assert!(sql.contains("a.HADM_ID IN (SELECT HADM_ID FROM ICUSTAYS)"));
        assert_eq!(rules, vec!["has_icu_stay_to_icustays"]);
    }

    #[test]
    fn hospital_expire_not_null_becomes_one() {
        let (sql, _) = rewrite_hospital_expire_flag(
            "SELECT COUNT(*) FROM ADMISSIONS WHERE HOSPITAL_EXPIRE_FLAG IS NOT NULL",
        );
        assert!(sql.contains("HOSPITAL_EXPIRE_FLAG = 1"));
    }

    #[test]
    fn timestamp_diff_gets_date_casts() {
        let (sql, rules) =
            normalize_timestamp_diffs("SELECT DISCHTIME - ADMITTIME FROM ADMISSIONS WHERE 1=1");
        assert!(sql.contains("CAST(DISCHTIME AS DATE) - CAST(ADMITTIME AS DATE)"));
        assert_eq!(rules, vec!["timestamp_diff_cast_to_date"]);
    }

    #[test]
    fn cast_diff_is_not_double_wrapped() {
        let sql = "SELECT CAST(DISCHTIME AS DATE) - CAST(ADMITTIME AS DATE) FROM ADMISSIONS WHERE 1=1";
        let (out, rules) = normalize_timestamp_diffs(sql);
        assert_eq!(out, sql);
        assert!(rules.is_empty());
    }

    #[test]
    fn icustays_cast_diff_becomes_los() {
        let (sql, rules) = rewrite_icustays_los(
            "SELECT AVG(CAST(i.OUTTIME AS DATE) - CAST(i.INTIME AS DATE)) FROM ICUSTAYS i WHERE 1=1",
        );
        assert!(sql.contains("AVG(LOS)"));
        assert_eq!(rules, vec!["icustays_diff_to_los"]);
    }

    #[test]
    fn anchor_year_age_math_becomes_anchor_age() {
        let (sql, _) = rewrite_age_from_anchor(
            "SELECT EXTRACT(YEAR FROM SYSDATE) - p.ANCHOR_YEAR FROM PATIENTS p WHERE 1=1",
        );
        assert!(sql.contains("p.ANCHOR_AGE"));
    }

    #[test]
    fn timestampdiff_rewritten_to_cast_diff() {
        let (sql, _) = rewrite_timestampdiff(
            "SELECT TIMESTAMPDIFF(DAY, ADMITTIME, DISCHTIME) FROM ADMISSIONS WHERE 1=1",
        );
        assert!(sql.contains("CAST(DISCHTIME AS DATE) - CAST(ADMITTIME AS DATE)"));
    }

    #[test]
    fn unrequested_time_window_is_stripped() {
        let (sql, rules) = strip_time_window_if_absent(
            "count lab events",
            "SELECT COUNT(*) FROM LABEVENTS WHERE CHARTTIME >= SYSDATE - INTERVAL '30' DAY",
        );
        assert!(!sql.to_uppercase().contains("SYSDATE"));
        assert_eq!(rules, vec!["strip_time_window"]);
    }

    #[test]
    fn requested_time_window_is_kept() {
        let input = "SELECT COUNT(*) FROM LABEVENTS WHERE CHARTTIME >= SYSDATE - INTERVAL '30' DAY";
        let (sql, rules) = strip_time_window_if_absent("lab events in the last 30 days", input);
        assert_eq!(sql, input);
        assert!(rules.is_empty());
    }
}
