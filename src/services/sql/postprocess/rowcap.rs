//! Row-cap management: inject ROWNUM caps for heavy tables, strip caps that
//! would corrupt top-k aggregates, and push outer predicates down into the
//! inner SELECT of a ROWNUM wrapper.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::utils::sqltext::ci;

use super::schema_map::HEAVY_TABLES;

/// `SELECT * FROM (inner) WHERE ROWNUM <= n`
static OUTER_ROWNUM_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*SELECT\s+\*\s+FROM\s*\((SELECT .*?)\)\s*WHERE\s+ROWNUM\s*<=\s*(\d+)\s*;?\s*$")
        .expect("invalid rule regex")
});

/// Split an outer ROWNUM wrapper into (inner SQL, limit).
pub fn outer_rownum_parts(sql: &str) -> Option<(String, u64)> {
    let caps = OUTER_ROWNUM_RE.captures(sql)?;
    let inner = caps.get(1)?.as_str().to_string();
    let limit = caps.get(2)?.as_str().parse().ok()?;
    Some((inner, limit))
}

pub fn rebuild_outer_rownum(inner: &str, limit: u64) -> String {
    format!("SELECT * FROM ({}) WHERE ROWNUM <= {}", inner.trim(), limit)
}

fn references_heavy_table(sql: &str) -> bool {
    HEAVY_TABLES.iter().any(|table| ci(&format!(r"\b{}\b", table)).is_match(sql))
}

fn inject_cap(inner_sql: &str, cap: u64) -> String {
    let where_re = ci(r"\bwhere\b");
    if where_re.is_match(inner_sql) {
        return where_re
            .replace(inner_sql, format!("WHERE ROWNUM <= {} AND", cap))
            .into_owned();
    }
    let group_re = ci(r"\bgroup\s+by\b");
    if group_re.is_match(inner_sql) {
        return group_re
            .replace(inner_sql, format!("WHERE ROWNUM <= {} GROUP BY", cap))
            .into_owned();
    }
    let order_re = ci(r"\border\s+by\b");
    if order_re.is_match(inner_sql) {
        return order_re
            .replace(inner_sql, format!("WHERE ROWNUM <= {} ORDER BY", cap))
            .into_owned();
    }
    format!("{} WHERE ROWNUM <= {}", inner_sql.trim_end_matches(';'), cap)
}

/// Cap heavy-table scans with `ROWNUM <= cap`, placing the predicate at the
/// clause-correct position. Statements that already carry ROWNUM only get an
/// inner cap when they are an uncapped wrapper over a heavy table.
pub fn apply_rownum_cap(sql: &str, cap: u64) -> (String, Vec<String>) {
    let mut rules = Vec::new();
    let text = sql.to_string();

    if text.to_uppercase().contains("ROWNUM") {
        if let Some((inner, limit)) = outer_rownum_parts(&text) {
            if !inner.to_uppercase().contains("ROWNUM") && references_heavy_table(&inner) {
                let inner = inject_cap(&inner, cap);
                rules.push(format!("rownum_cap_inner_{}", cap));
                return (rebuild_outer_rownum(&inner, limit), rules);
            }
        }
        return (text, rules);
    }

    if !references_heavy_table(&text) {
        return (text, rules);
    }
    let capped = inject_cap(&text, cap);
    rules.push(format!("rownum_cap_{}", cap));
    (capped, rules)
}

/// Microbiology top-k queries lose the inner sampling cap: counting organisms
/// on a sampled slice corrupts the ranking.
pub fn strip_rownum_cap_for_micro_topk(sql: &str) -> (String, Vec<String>) {
    let Some((inner, limit)) = outer_rownum_parts(sql) else {
        return (sql.to_string(), Vec::new());
    };
    if !ci(r"\bMICROBIOLOGYEVENTS\b").is_match(&inner) {
        return (sql.to_string(), Vec::new());
    }

    let mut new_inner = ci(r"\bWHERE\s+ROWNUM\s*<=\s*\d+\s+AND\s+")
        .replace_all(&inner, "WHERE ")
        .into_owned();
    new_inner = ci(r"\bWHERE\s+ROWNUM\s*<=\s*\d+\s+GROUP\s+BY\b")
        .replace_all(&new_inner, "GROUP BY")
        .into_owned();
    new_inner = ci(r"\bWHERE\s+ROWNUM\s*<=\s*\d+\s+ORDER\s+BY\b")
        .replace_all(&new_inner, "ORDER BY")
        .into_owned();
    new_inner = ci(r"\bWHERE\s+ROWNUM\s*<=\s*\d+\b").replace_all(&new_inner, "").into_owned();

    if new_inner != inner {
        (
            rebuild_outer_rownum(&new_inner, limit),
            vec!["strip_rownum_cap_for_micro_topk".to_string()],
        )
    } else {
        (sql.to_string(), Vec::new())
    }
}

/// Grouped queries over prescriptions/input/output drop large sampling caps
/// (>= 1000 rows) that would bias the aggregate.
pub fn strip_rownum_cap_for_grouped_tables(sql: &str) -> (String, Vec<String>) {
    let upper = sql.to_uppercase();
    if !upper.contains("GROUP BY") {
        return (sql.to_string(), Vec::new());
    }
    if !ci(r"\b(PRESCRIPTIONS|INPUTEVENTS|OUTPUTEVENTS)\b").is_match(&upper) {
        return (sql.to_string(), Vec::new());
    }

    let mut changed = false;
    let mut text = sql.to_string();
    let variants: [(&str, &str); 4] = [
        (r"\bWHERE\s+ROWNUM\s*<=\s*(\d+)\s+AND\s+", "WHERE "),
        (r"\bWHERE\s+ROWNUM\s*<=\s*(\d+)\s+GROUP\s+BY\b", "GROUP BY"),
        (r"\bWHERE\s+ROWNUM\s*<=\s*(\d+)\s+ORDER\s+BY\b", "ORDER BY"),
        (r"\bWHERE\s+ROWNUM\s*<=\s*(\d+)\b", ""),
    ];
    for (pattern, replacement) in variants {
        let re = ci(pattern);
        text = re
            .replace_all(&text, |caps: &regex::Captures| {
                let limit: u64 = caps[1].parse().unwrap_or(0);
                if limit < 1000 {
                    caps[0].to_string()
                } else {
                    changed = true;
                    replacement.to_string()
                }
            })
            .into_owned();
    }

    if changed {
        (text, vec!["strip_rownum_cap_for_grouped_tables".to_string()])
    } else {
        (sql.to_string(), Vec::new())
    }
}

static OUTER_WHERE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)^\s*SELECT\s+\*\s+FROM\s*\((SELECT .*?)\)\s*WHERE\s+(.+?)\s*;?\s*$")
        .expect("invalid rule regex")
});

/// When the outer ROWNUM wrapper carries extra predicates, push them into the
/// inner SELECT so the cap applies after filtering.
pub fn pushdown_outer_predicates(sql: &str) -> (String, Vec<String>) {
    let Some(caps) = OUTER_WHERE_RE.captures(sql) else {
        return (sql.to_string(), Vec::new());
    };
    let inner = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
    let where_clause = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();

    let limit_re = ci(r"\bROWNUM\s*<=\s*(\d+)\b");
    let Some(limit_caps) = limit_re.captures(&where_clause) else {
        return (sql.to_string(), Vec::new());
    };
    let limit: u64 = limit_caps[1].parse().unwrap_or(0);

    let mut pred = limit_re.replace_all(&where_clause, "").into_owned();
    pred = ci(r"\bAND\b\s*(\bAND\b)?").replace_all(&pred, "AND").into_owned();
    pred = pred.trim().to_string();
    pred = ci(r"^(AND|OR)\s+").replace(&pred, "").into_owned();
    pred = ci(r"\s+(AND|OR)$").replace(&pred, "").into_owned();
    let pred = pred.trim().to_string();
    if pred.is_empty() {
        return (sql.to_string(), Vec::new());
    }

    let where_re = ci(r"\bwhere\b");
    let group_re = ci(r"\bgroup\s+by\b");
    let order_re = ci(r"\border\s+by\b");
    let inner = if where_re.is_match(&inner) {
        where_re.replace(&inner, format!("WHERE {} AND", pred)).into_owned()
    } else if group_re.is_match(&inner) {
        group_re.replace(&inner, format!("WHERE {} GROUP BY", pred)).into_owned()
    } else if order_re.is_match(&inner) {
        order_re.replace(&inner, format!("WHERE {} ORDER BY", pred)).into_owned()
    } else {
        format!("{} WHERE {}", inner.trim_end_matches(';'), pred)
    };

    (rebuild_outer_rownum(&inner, limit), vec!["pushdown_outer_predicate".to_string()])
}

/// Repair a predicate stranded before GROUP BY with no WHERE keyword (a
/// common LLM slip after join insertion).
pub fn fix_missing_where_predicate(sql: &str) -> (String, Vec<String>) {
    let predicate_re = ci(
        r"\b([A-Za-z0-9_\.]+(?:\s+IS\s+NOT\s+NULL|\s+IS\s+NULL)(?:\s+AND\s+[A-Za-z0-9_\.]+(?:\s+IS\s+NOT\s+NULL|\s+IS\s+NULL))*)\s+GROUP\s+BY\b",
    );
    let where_re = ci(r"\bwhere\b");

    let fix_segment = |segment: &str| -> Option<String> {
        if where_re.is_match(segment) {
            return None;
        }
        let caps = predicate_re.captures(segment)?;
        let predicate = caps.get(1)?.as_str();
        let target = format!("{} GROUP BY", predicate);
        let replacement = format!("WHERE {} GROUP BY", predicate);
        Some(segment.replacen(&target, &replacement, 1))
    };

    if let Some((inner, limit)) = outer_rownum_parts(sql) {
        if let Some(fixed) = fix_segment(&inner) {
            return (
                rebuild_outer_rownum(&fixed, limit),
                vec!["insert_missing_where_predicate".to_string()],
            );
        }
        return (sql.to_string(), Vec::new());
    }

    match fix_segment(sql) {
        Some(fixed) => (fixed, vec!["insert_missing_where_predicate".to_string()]),
        None => (sql.to_string(), Vec::new()),
    }
}

/// Ranking questions without any limiter get a ROWNUM wrapper (question "top
/// N" wins, otherwise 10).
pub fn wrap_top_n(question: &str, sql: &str) -> (String, Vec<String>) {
    if ci(r"\bROWNUM\b").is_match(sql)
        || ci(r"\blimit\s+(\d+)\s*;?\s*$").is_match(sql)
        || ci(r"\bfetch\s+first\s+(\d+)\s+rows\s+only\s*;?\s*$").is_match(sql)
    {
        return (sql.to_string(), Vec::new());
    }
    let q = question.to_lowercase();
    let top_re = ci(r"\btop\s+(\d+)\b");
    let explicit = top_re.captures(&q).and_then(|caps| caps[1].parse::<u64>().ok());
    if explicit.is_none() && !["top", "most", "highest"].iter().any(|k| q.contains(k)) {
        return (sql.to_string(), Vec::new());
    }
    let n = explicit.unwrap_or(10);
    if n == 0 {
        return (sql.to_string(), Vec::new());
    }
    (
        crate::utils::sqltext::wrap_with_rownum(sql, n),
        vec![format!("wrap_top_{}_rownum", n)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heavy_table_without_cap_gets_capped() {
        let (sql, rules) =
            apply_rownum_cap("SELECT ITEMID FROM LABEVENTS WHERE VALUENUM IS NOT NULL", 5000);
        assert_eq!(
            sql,
            "SELECT ITEMID FROM LABEVENTS WHERE ROWNUM <= 5000 AND VALUENUM IS NOT NULL"
        );
        assert_eq!(rules, vec!["rownum_cap_5000"]);
    }

    #[test]
    fn light_table_stays_uncapped() {
        let (sql, rules) = apply_rownum_cap("SELECT COUNT(*) FROM PATIENTS WHERE 1=1", 5000);
        assert_eq!(sql, "SELECT COUNT(*) FROM PATIENTS WHERE 1=1");
        assert!(rules.is_empty());
    }

    #[test]
    fn wrapper_over_heavy_table_caps_inner() {
        let sql = "SELECT * FROM (SELECT ITEMID, COUNT(*) AS CNT FROM CHARTEVENTS GROUP BY ITEMID ORDER BY CNT DESC) WHERE ROWNUM <= 10";
        let (capped, rules) = apply_rownum_cap(sql, 5000);
        assert!(capped.contains("WHERE ROWNUM <= 5000 GROUP BY"));
        assert!(capped.ends_with("WHERE ROWNUM <= 10"));
        assert_eq!(rules, vec!["rownum_cap_inner_5000"]);
    }

    #[test]
    fn micro_topk_cap_is_stripped() {
        let sql = "SELECT * FROM (SELECT ORG_NAME, COUNT(*) AS CNT FROM MICROBIOLOGYEVENTS WHERE ROWNUM <= 5000 GROUP BY ORG_NAME ORDER BY CNT DESC) WHERE ROWNUM <= 10";
        let (out, rules) = strip_rownum_cap_for_micro_topk(sql);
        assert!(!out.contains("ROWNUM <= 5000"));
        assert!(out.ends_with("WHERE ROWNUM <= 10"));
        assert_eq!(rules, vec!["strip_rownum_cap_for_micro_topk"]);
    }

    #[test]
    fn grouped_cap_strip_respects_small_limits() {
        let sql = "SELECT DRUG, COUNT(*) FROM PRESCRIPTIONS WHERE ROWNUM <= 100 GROUP BY DRUG";
        let (out, rules) = strip_rownum_cap_for_grouped_tables(sql);
        assert_eq!(out, sql);
        assert!(rules.is_empty());

        let sql = "SELECT DRUG, COUNT(*) FROM PRESCRIPTIONS WHERE ROWNUM <= 5000 GROUP BY DRUG";
        let (out, rules) = strip_rownum_cap_for_grouped_tables(sql);
        assert!(!out.contains("ROWNUM"));
        assert_eq!(rules, vec!["strip_rownum_cap_for_grouped_tables"]);
    }

    #[test]
    fn outer_predicates_are_pushed_down() {
        let sql = "SELECT * FROM (SELECT SUBJECT_ID, GENDER FROM PATIENTS) WHERE ROWNUM <= 100 AND GENDER = 'F'";
        let (out, rules) = pushdown_outer_predicates(sql);
        assert_eq!(
            out,
            "SELECT * FROM (SELECT SUBJECT_ID, GENDER FROM PATIENTS WHERE GENDER = 'F') WHERE ROWNUM <= 100"
        );
        assert_eq!(rules, vec!["pushdown_outer_predicate"]);
    }

    #[test]
    fn stranded_predicate_gains_where() {
        let sql = "SELECT GENDER, COUNT(*) FROM PATIENTS GENDER IS NOT NULL GROUP BY GENDER";
        let (out, rules) = fix_missing_where_predicate(sql);
        assert!(out.contains("WHERE GENDER IS NOT NULL GROUP BY"));
        assert_eq!(rules, vec!["insert_missing_where_predicate"]);
    }

    #[test]
    fn top_n_question_wraps() {
        let (out, rules) =
            wrap_top_n("top 5 drugs", "SELECT DRUG, COUNT(*) AS CNT FROM PRESCRIPTIONS GROUP BY DRUG ORDER BY CNT DESC");
        assert!(out.starts_with("SELECT * FROM ("));
        assert!(out.ends_with("WHERE ROWNUM <= 5"));
        assert_eq!(rules, vec!["wrap_top_5_rownum"]);
    }
}
