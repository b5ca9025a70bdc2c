//! Intent alignment: detect SQL that fails to reflect the question's intent,
//! and accept a post-processor rewrite only when it strictly reduces the
//! detected issue set without introducing new ones.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::utils::sqltext::{ci, find_final_select_clause};

use super::postprocess::postprocess_sql;

static INTENT_RATIO_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"(비율|비중|율|퍼센트|백분율|ratio|rate|proportion|percentage|pct)"));
static INTENT_STRATIFY_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"(연도별|월별|주별|일별|분기별|별로|에\s*따른|비교|대비|vs|versus|according\s+to|stratif|subgroup|\bby\s+(year|month|week|day|gender|sex|age|group|quartile|q[1-4]|service|department|diagnosis|procedure)\b)")
});
static INTENT_YEARLY_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"(연도별|년\s*별|yearly|by\s+year|annual)"));
static INTENT_MONTHLY_RE: Lazy<Regex> = Lazy::new(|| ci(r"(월별|monthly|by\s+month)"));
static INTENT_QUARTILE_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"(사분위|quartile|q1\s*[-–~]\s*q4|q1|q2|q3|q4)"));
static WINDOW_INTENT_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"(\d+\s*(일|주|개월|월|년)\s*(이내|후)|within\s+\d+\s*(day|week|month|year)|after\s+\d+\s*(day|week|month|year))")
});
static YEAR_BUCKET_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"EXTRACT\s*\(\s*YEAR\s+FROM|TO_CHAR\s*\([^)]*,\s*'YYYY'\s*\)"));
static MONTH_BUCKET_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"TO_CHAR\s*\([^)]*,\s*'YYYY[-/]MM'\s*\)|TO_CHAR\s*\([^)]*,\s*'MM'\s*\)|EXTRACT\s*\(\s*MONTH\s+FROM")
});
static WINDOW_SQL_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"(INTERVAL|ADD_MONTHS|\+\s*\d+\s*(/|$)|BETWEEN\s+.+\s+AND\s+.+)"));
static AGE_SEMANTIC_INTENT_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"(연령대|나이대|연령|나이|나잇대|세\b|aged?\b|age\s*(group|band|range)?\b)"));
static YEAR_SEMANTIC_INTENT_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"(연도|년도|연도별|년별|year|yearly|annual|anchor[_\s]*year|anchor[_\s]*year[_\s]*group)")
});
static AGE_GROUP_INTENT_RE: Lazy<Regex> =
    Lazy::new(|| ci(r"(연령대|나이대|age\s*(group|band|range)|연령\s*구간)"));
static GENDER_INTENT_RE: Lazy<Regex> = Lazy::new(|| ci(r"(성별|남성|여성|\bgender\b|\bsex\b)"));
static EXTREMA_INTENT_RE: Lazy<Regex> = Lazy::new(|| {
    ci(r"(가장\s*(많|적)|최대|최소|최고|최저|most|least|highest|lowest|max|min|top\s*1|bottom\s*1)")
});

fn intent_text_from_planner(planner_intent: Option<&serde_json::Map<String, Value>>) -> String {
    let Some(intent) = planner_intent else {
        return String::new();
    };
    let mut parts: Vec<String> = Vec::new();
    for key in ["cohort", "metric", "time", "grain", "comparison", "output_shape", "intent_summary"]
    {
        match intent.get(key) {
            Some(Value::String(text)) => {
                let text = text.trim();
                if !text.is_empty() {
                    parts.push(text.to_string());
                }
            },
            Some(Value::Array(items)) => {
                for item in items {
                    let text = match item {
                        Value::String(s) => s.trim().to_string(),
                        other => other.to_string(),
                    };
                    if !text.is_empty() {
                        parts.push(text);
                    }
                }
            },
            _ => {},
        }
    }
    if let Some(Value::Array(filters)) = intent.get("filters") {
        for item in filters {
            let text = match item {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            };
            if !text.is_empty() {
                parts.push(text);
            }
        }
    }
    parts.join(" ")
}

fn prefer_anchor_age_semantics(intent_text: &str) -> bool {
    let text = intent_text.trim();
    if text.is_empty() {
        return false;
    }
    AGE_SEMANTIC_INTENT_RE.is_match(text) && !YEAR_SEMANTIC_INTENT_RE.is_match(text)
}

/// Detect the alignment issues of the final SQL against the question (and
/// planner intent when available). Each issue is a stable tag.
pub fn detect_intent_alignment_issues(
    question: &str,
    sql: &str,
    planner_intent: Option<&serde_json::Map<String, Value>>,
) -> Vec<String> {
    let q = question.trim();
    let text = sql.trim();
    if q.is_empty() || text.is_empty() {
        return Vec::new();
    }

    let upper = text.to_uppercase();
    let mut issues = Vec::new();
    let planner_text = intent_text_from_planner(planner_intent);
    let intent_text = if planner_text.is_empty() {
        q.to_string()
    } else {
        format!("{} {}", q, planner_text)
    };

    if INTENT_RATIO_RE.is_match(&intent_text) {
        let has_ratio_expr = upper.contains('/')
            || ci(r"\bAVG\s*\(").is_match(&upper)
            || ci(r"\bRATE\b|\bRATIO\b|\bPCT\b").is_match(&upper);
        if !has_ratio_expr {
            issues.push("ratio_intent_without_ratio_expression".to_string());
        }
    }

    if INTENT_QUARTILE_RE.is_match(&intent_text) {
        let has_quartile_logic = upper.contains("NTILE(") || ci(r"\bQ[1-4]\b").is_match(&upper);
        if !has_quartile_logic {
            issues.push("quartile_intent_without_ntile".to_string());
        }
    }

    if INTENT_STRATIFY_RE.is_match(&intent_text)
        && !upper.contains("GROUP BY")
        && !upper.contains("PARTITION BY")
    {
        issues.push("stratified_intent_without_grouping".to_string());
    }

    if INTENT_YEARLY_RE.is_match(&intent_text) && !YEAR_BUCKET_RE.is_match(text) {
        issues.push("yearly_intent_without_year_bucket".to_string());
    }

    if INTENT_MONTHLY_RE.is_match(&intent_text) && !MONTH_BUCKET_RE.is_match(text) {
        issues.push("monthly_intent_without_month_bucket".to_string());
    }

    if WINDOW_INTENT_RE.is_match(&intent_text) && !WINDOW_SQL_RE.is_match(text) {
        issues.push("window_intent_without_time_window_predicate".to_string());
    }

    if prefer_anchor_age_semantics(&intent_text) {
        let has_anchor_year_group = ci(r"\bANCHOR_YEAR_GROUP\b").is_match(&upper);
        let has_anchor_age = ci(r"\bANCHOR_AGE\b").is_match(&upper);
        if has_anchor_year_group && !has_anchor_age {
            issues.push("age_intent_mapped_to_anchor_year_group".to_string());
        }
    }

    let age_gender_extrema = AGE_GROUP_INTENT_RE.is_match(&intent_text)
        && GENDER_INTENT_RE.is_match(&intent_text)
        && EXTREMA_INTENT_RE.is_match(&intent_text);
    if age_gender_extrema {
        let final_select = find_final_select_clause(text);
        let has_age_projection = ci(r"\bAGE_GROUP\b|\bANCHOR_AGE\b").is_match(&final_select)
            || ci(r"\bCASE\b[\s\S]{0,300}\bANCHOR_AGE\b").is_match(&final_select);
        if !has_age_projection {
            issues.push("age_group_extrema_missing_age_projection".to_string());
        }
    }

    issues
}

/// Re-run the post-processor and accept its rewrite only when the issue set
/// strictly shrinks with no new members. Returns (sql, applied rules,
/// remaining issues).
pub fn enforce_intent_alignment(
    question: &str,
    sql: &str,
    planner_intent: Option<&serde_json::Map<String, Value>>,
    row_cap: u64,
) -> (String, Vec<String>, Vec<String>) {
    let before = detect_intent_alignment_issues(question, sql, planner_intent);
    if before.is_empty() {
        return (sql.to_string(), Vec::new(), Vec::new());
    }

    let (rewritten, rules) = postprocess_sql(question, sql, row_cap);
    let after = detect_intent_alignment_issues(question, &rewritten, planner_intent);

    let before_set: std::collections::HashSet<&String> = before.iter().collect();
    let after_set: std::collections::HashSet<&String> = after.iter().collect();
    let improved = after.len() < before.len();
    let no_regression = after_set.is_subset(&before_set);

    if rewritten.trim() != sql.trim() && improved && no_regression {
        (rewritten, rules, after)
    } else {
        (sql.to_string(), Vec::new(), before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_intent_flags_plain_count() {
        let issues = detect_intent_alignment_issues(
            "재입원 비율은?",
            "SELECT COUNT(*) FROM ADMISSIONS WHERE 1=1",
            None,
        );
        assert!(issues.contains(&"ratio_intent_without_ratio_expression".to_string()));
    }

    #[test]
    fn ratio_satisfied_by_avg() {
        let issues = detect_intent_alignment_issues(
            "readmission rate",
            "SELECT AVG(CASE WHEN X=1 THEN 1 ELSE 0 END) FROM ADMISSIONS WHERE 1=1",
            None,
        );
        assert!(issues.is_empty());
    }

    #[test]
    fn yearly_intent_needs_year_bucket() {
        let issues = detect_intent_alignment_issues(
            "연도별 입원 건수",
            "SELECT COUNT(*) AS CNT FROM ADMISSIONS GROUP BY ADMISSION_TYPE",
            None,
        );
        assert!(issues.contains(&"yearly_intent_without_year_bucket".to_string()));

        let issues = detect_intent_alignment_issues(
            "연도별 입원 건수",
            "SELECT EXTRACT(YEAR FROM ADMITTIME) AS Y, COUNT(*) FROM ADMISSIONS GROUP BY EXTRACT(YEAR FROM ADMITTIME)",
            None,
        );
        assert!(!issues.contains(&"yearly_intent_without_year_bucket".to_string()));
    }

    #[test]
    fn stratified_intent_needs_grouping() {
        let issues = detect_intent_alignment_issues(
            "admissions by gender",
            "SELECT COUNT(*) FROM ADMISSIONS WHERE 1=1",
            None,
        );
        assert!(issues.contains(&"stratified_intent_without_grouping".to_string()));
    }

    #[test]
    fn age_intent_on_anchor_year_group_is_flagged() {
        let issues = detect_intent_alignment_issues(
            "평균 나이가 가장 높은 그룹",
            "SELECT ANCHOR_YEAR_GROUP, COUNT(*) FROM PATIENTS GROUP BY ANCHOR_YEAR_GROUP",
            None,
        );
        assert!(issues.contains(&"age_intent_mapped_to_anchor_year_group".to_string()));
    }

    #[test]
    fn enforcement_never_increases_issues() {
        let question = "admissions by gender";
        let sql = "SELECT COUNT(*) FROM ADMISSIONS WHERE 1=1";
        let before = detect_intent_alignment_issues(question, sql, None);
        let (out, _, remaining) = enforce_intent_alignment(question, sql, None, 5000);
        assert!(remaining.len() <= before.len());
        let after = detect_intent_alignment_issues(question, &out, None);
        let before_set: std::collections::HashSet<_> = before.iter().collect();
        assert!(after.iter().all(|issue| before_set.contains(issue)));
    }

    #[test]
    fn planner_intent_contributes_to_detection() {
        let mut intent = serde_json::Map::new();
        intent.insert("grain".to_string(), serde_json::json!("monthly"));
        let issues = detect_intent_alignment_issues(
            "admission trend",
            "SELECT COUNT(*) FROM ADMISSIONS WHERE 1=1",
            Some(&intent),
        );
        assert!(issues.contains(&"monthly_intent_without_month_bucket".to_string()));
    }
}
