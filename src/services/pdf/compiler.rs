//! Deterministic CTE-cascade compiler: cohort-intent JSON -> Oracle SQL.
//!
//! The population CTE is the first ICU stay per subject with more than 24
//! hours in the unit; each step narrows it through EXISTS / NOT EXISTS with
//! a dynamically resolved join key and an optional time-window predicate.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::signals::{
    normalize_signal_name, render_template, window_template, SignalMap, SignalParams,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CohortIntent {
    #[serde(default)]
    pub steps: Vec<CohortStep>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CohortStep {
    #[serde(rename = "type")]
    pub step_type: String,
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
    #[serde(default)]
    pub window: Option<String>,
    #[serde(default)]
    pub is_exclusion: bool,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CompiledCohort {
    pub cohort_sql: String,
    pub count_sql: String,
    pub debug_count_sql: String,
    pub step_labels: Vec<String>,
}

const POPULATION_CTE: &str = "population AS (
    SELECT subject_id, hadm_id, stay_id, intime, outtime, admittime
    FROM (
        SELECT a.subject_id, a.hadm_id, i.stay_id, i.intime, i.outtime, a.admittime,
               ROW_NUMBER() OVER (PARTITION BY a.subject_id ORDER BY i.intime) as rn
        FROM SSO.ADMISSIONS a
        JOIN SSO.ICUSTAYS i ON a.hadm_id = i.hadm_id
        WHERE (CAST(i.outtime AS DATE) - CAST(i.intime AS DATE)) >= 1
    )
    WHERE rn = 1
)";

static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9_]+").unwrap());
static SELECT_LIST_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)^\s*SELECT\s+(.*?)\s+FROM\b").unwrap());

fn sanitize_step_slug(value: &str) -> String {
    let slug = SLUG_RE.replace_all(&value.to_lowercase(), "_").into_owned();
    let slug = slug.trim_matches('_').to_string();
    if slug.is_empty() { "step".to_string() } else { slug }
}

fn f64_param(params: &serde_json::Map<String, Value>, key: &str, default: f64) -> f64 {
    match params.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn str_param(params: &serde_json::Map<String, Value>, key: &str, default: &str) -> String {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default.to_string())
}

fn signal_params(params: &serde_json::Map<String, Value>) -> SignalParams {
    let mut out = SignalParams::defaults();
    out.min = f64_param(params, "min", out.min);
    out.max = f64_param(params, "max", out.max);
    out.operator = str_param(params, "operator", &out.operator);
    out.value = f64_param(params, "value", out.value);
    out.min_los = f64_param(params, "min_los", out.min_los);
    out.drug = str_param(params, "drug", "");
    out.gender = str_param(params, "gender", "all");
    out
}

/// Clean diagnosis codes into a quoted IN-list; empty lists abort the step so
/// we never emit `IN ()`.
fn diagnosis_code_list(params: &serde_json::Map<String, Value>) -> Option<String> {
    let raw = params.get("codes");
    let candidates: Vec<String> = match raw {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(text)) => {
            if text.contains(',') {
                text.split(',').map(str::to_string).collect()
            } else {
                vec![text.clone()]
            }
        },
        _ => Vec::new(),
    };
    let mut cleaned: Vec<String> = Vec::new();
    for code in candidates {
        let normalized: String = code
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .collect::<String>()
            .to_uppercase();
        if !normalized.is_empty() && !cleaned.contains(&normalized) {
            cleaned.push(normalized);
        }
    }
    if cleaned.is_empty() {
        return None;
    }
    Some(cleaned.iter().map(|code| format!("'{}'", code)).collect::<Vec<_>>().join(", "))
}

/// Identifier keys the signal SQL actually projects.
fn extract_select_keys(sql: &str) -> Vec<String> {
    let Some(caps) = SELECT_LIST_RE.captures(sql) else {
        return Vec::new();
    };
    let mut keys = Vec::new();
    for item in caps[1].split(',') {
        let item = item.trim().to_lowercase();
        // Take the alias if present, else the bare column.
        let name = item
            .rsplit(" as ")
            .next()
            .unwrap_or(&item)
            .rsplit('.')
            .next()
            .unwrap_or(&item)
            .trim()
            .to_string();
        if ["subject_id", "hadm_id", "stay_id"].contains(&name.as_str()) && !keys.contains(&name) {
            keys.push(name);
        }
    }
    keys
}

fn best_join_key(step_type: &str) -> &'static str {
    match normalize_signal_name(step_type).as_str() {
        "icu_stay" | "vital" | "derived" => "stay_id",
        _ => "hadm_id",
    }
}

fn resolve_join_key(preferred: &str, signal_sql: &str) -> Option<String> {
    let keys = extract_select_keys(signal_sql);
    if keys.iter().any(|key| key == preferred) {
        return Some(preferred.to_string());
    }
    for fallback in ["stay_id", "hadm_id", "subject_id"] {
        if keys.iter().any(|key| key == fallback) {
            return Some(fallback.to_string());
        }
    }
    None
}

/// Compile the intent into the cohort / count / funnel SQL triple.
pub fn compile_oracle_sql(intent: &CohortIntent, signals: &SignalMap) -> CompiledCohort {
    let mut ctes: Vec<String> = vec![POPULATION_CTE.to_string()];
    let mut step_labels: Vec<String> = vec!["Initial Population (First ICU Stay & >24h)".to_string()];
    let mut step_refs: Vec<String> = vec!["population".to_string()];
    let mut current_prev = "population".to_string();

    for (idx, step) in intent.steps.iter().enumerate() {
        let step_type = step.step_type.as_str();
        let step_name = format!("step_{}_{}", idx + 1, sanitize_step_slug(step_type));
        let mut params = signal_params(&step.params);

        let signal_sql = if normalize_signal_name(step_type) == "vital" {
            let signal = str_param(&step.params, "signal", "");
            match signals.get(&signal) {
                Some(template) => render_template(template, &params),
                None => {
                    tracing::warn!("Step '{}': unknown vital signal '{}'", step_name, signal);
                    continue;
                },
            }
        } else if normalize_signal_name(step_type) == "derived" {
            let name = str_param(&step.params, "name", "");
            match signals.get(&name) {
                Some(template) => render_template(template, &params),
                None => {
                    // Unknown derived scores fall back to ICUSTAYS so the
                    // cascade never references a missing table.
                    tracing::warn!(
                        "Step '{}': unknown derived signal '{}', falling back to ICUSTAYS",
                        step_name,
                        name
                    );
                    "SELECT stay_id, intime as charttime FROM SSO.ICUSTAYS WHERE stay_id IS NOT NULL"
                        .to_string()
                },
            }
        } else if let Some(template) = signals.get(step_type) {
            match normalize_signal_name(step_type).as_str() {
                "icu_stay" => {
                    let mut min_los = params.min_los;
                    // Exclusion with los<=0 degenerates to "exclude everyone";
                    // default the threshold to 24h.
                    if step.is_exclusion && min_los <= 0.0 {
                        min_los = 1.0;
                        tracing::warn!(
                            "Step '{}': exclusion icu_stay min_los invalid, defaulting to 1 day",
                            step_name
                        );
                    }
                    if step.is_exclusion {
                        format!(
                            "SELECT stay_id, hadm_id, intime as charttime FROM SSO.ICUSTAYS WHERE los < {}",
                            min_los
                        )
                    } else {
                        params.min_los = min_los;
                        render_template(template, &params)
                    }
                },
                "diagnosis" => {
                    let Some(codes) = diagnosis_code_list(&step.params) else {
                        tracing::warn!(
                            "Step '{}': diagnosis codes are empty, skipping step",
                            step_name
                        );
                        continue;
                    };
                    params.codes = codes;
                    render_template(template, &params)
                },
                _ => render_template(template, &params),
            }
        } else {
            continue;
        };

        let preferred_key = best_join_key(step_type);
        let Some(join_key) = resolve_join_key(preferred_key, &signal_sql) else {
            tracing::warn!(
                "Step '{}': no identifier key in SELECT list, skipping step",
                step_name
            );
            continue;
        };
        if join_key != preferred_key {
            tracing::debug!(
                "Step '{}': join key adjusted from '{}' to '{}'",
                step_name,
                preferred_key,
                join_key
            );
        }

        let operator = if step.is_exclusion { "NOT EXISTS" } else { "EXISTS" };

        let mut conditions = vec![format!("s.{} = p.{}", join_key, join_key)];
        if let Some(window_key) = step.window.as_deref() {
            if let Some(template) = window_template(window_key) {
                if signal_sql.to_lowercase().contains("charttime") {
                    conditions.push(template.to_string());
                } else {
                    tracing::debug!(
                        "Step '{}' skipped window filter: no charttime in signal SQL",
                        step_name
                    );
                }
            }
        }
        let where_clause = conditions.join(" AND ");

        let cte_query = format!(
            "SELECT p.* \nFROM {} p\nWHERE {} (\n    SELECT 1 FROM ({}) s\n    WHERE {}\n)",
            current_prev, operator, signal_sql, where_clause
        );
        ctes.push(format!("{} AS ({})", step_name, cte_query));
        step_labels.push(step.name.clone().unwrap_or_else(|| step_name.clone()));
        step_refs.push(step_name.clone());
        current_prev = step_name;
    }

    let cte_str = ctes.join(",\n");
    let cohort_sql =
        format!("WITH {}\nSELECT * FROM {} FETCH FIRST 100 ROWS ONLY", cte_str, current_prev);
    let count_sql =
        format!("WITH {}\nSELECT count(*) as patient_count FROM {}", cte_str, current_prev);

    let mut funnel_parts: Vec<String> = step_labels
        .iter()
        .zip(step_refs.iter())
        .map(|(label, cte_ref)| {
            let safe_label = label.replace('\'', "''");
            format!("SELECT '{}' as step_name, count(*) as cnt FROM {}", safe_label, cte_ref)
        })
        .collect();
    funnel_parts.push(format!(
        "SELECT 'Final Cohort' as step_name, count(*) as cnt FROM {}",
        current_prev
    ));
    let debug_count_sql = format!("WITH {}\n{}", cte_str, funnel_parts.join(" UNION ALL "));

    CompiledCohort { cohort_sql, count_sql, debug_count_sql, step_labels }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn intent(steps: Value) -> CohortIntent {
        serde_json::from_value(json!({ "steps": steps })).unwrap()
    }

    #[test]
    fn empty_intent_compiles_population_only() {
        let compiled = compile_oracle_sql(&CohortIntent::default(), &SignalMap::with_defaults());
        assert!(compiled.cohort_sql.starts_with("WITH population AS"));
        assert!(compiled.cohort_sql.ends_with("SELECT * FROM population FETCH FIRST 100 ROWS ONLY"));
        assert_eq!(compiled.step_labels.len(), 1);
    }

    #[test]
    fn inclusion_and_exclusion_steps_chain() {
        let compiled = compile_oracle_sql(
            &intent(json!([
                {"type": "diagnosis", "params": {"codes": ["A41.9", "a419"]}, "name": "Sepsis"},
                {"type": "icu_stay", "params": {"min_los": 2}, "is_exclusion": true}
            ])),
            &SignalMap::with_defaults(),
        );
        assert!(compiled.cohort_sql.contains("step_1_diagnosis AS"));
        assert!(compiled.cohort_sql.contains("step_2_icu_stay AS"));
        assert!(compiled.cohort_sql.contains("NOT EXISTS"));
        // Codes dedupe after punctuation strip.
        assert_eq!(compiled.cohort_sql.matches("'A419'").count(), 1);
        // The final select reads the last step.
        assert!(compiled.cohort_sql.contains("SELECT * FROM step_2_icu_stay"));
        assert_eq!(compiled.step_labels[1], "Sepsis");
    }

    #[test]
    fn empty_diagnosis_codes_skip_the_step() {
        let compiled = compile_oracle_sql(
            &intent(json!([{ "type": "diagnosis", "params": {"codes": []} }])),
            &SignalMap::with_defaults(),
        );
        assert!(!compiled.cohort_sql.contains("step_1"));
    }

    #[test]
    fn window_applies_only_with_charttime() {
        let compiled = compile_oracle_sql(
            &intent(json!([
                {"type": "vital", "params": {"signal": "body_temperature", "operator": ">", "value": 38},
                 "window": "icu_first_24h"},
                {"type": "diagnosis", "params": {"codes": ["I50"]}, "window": "icu_first_24h"}
            ])),
            &SignalMap::with_defaults(),
        );
        // The vital projects charttime, so the window predicate applies.
        assert!(compiled.cohort_sql.contains("s.charttime BETWEEN p.intime"));
        // The diagnosis template has no charttime; its step must not carry
        // the window predicate.
        let diagnosis_cte = compiled
            .cohort_sql
            .split("step_2_diagnosis AS")
            .nth(1)
            .unwrap();
        assert!(!diagnosis_cte
            .split("SELECT * FROM")
            .next()
            .unwrap()
            .contains("BETWEEN p.intime"));
    }

    #[test]
    fn join_key_adjusts_to_projected_columns() {
        // bun projects hadm_id; a "vital" step prefers stay_id but must fall
        // back to hadm_id.
        let compiled = compile_oracle_sql(
            &intent(json!([
                {"type": "vital", "params": {"signal": "bun", "operator": ">", "value": 30}}
            ])),
            &SignalMap::with_defaults(),
        );
        assert!(compiled.cohort_sql.contains("s.hadm_id = p.hadm_id"));
    }

    #[test]
    fn funnel_counts_every_step() {
        let compiled = compile_oracle_sql(
            &intent(json!([{ "type": "diagnosis", "params": {"codes": ["I50"]} }])),
            &SignalMap::with_defaults(),
        );
        assert!(compiled.debug_count_sql.contains("'Initial Population (First ICU Stay & >24h)'"));
        assert!(compiled.debug_count_sql.contains("'Final Cohort'"));
        assert_eq!(compiled.debug_count_sql.matches("UNION ALL").count(), 2);
    }
}
