//! Chart-plan rule engine.
//!
//! Builds analysis plans from the extracted intent and the result table under
//! clinical unit-of-analysis constraints. Premise: ADMISSIONS / ICUSTAYS are
//! the anchor tables and events hang off HADM_ID / STAY_ID; PATIENTS is an
//! attribute table, never an analysis axis.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::models::chart::{AnalysisPlan, ChartSpec, IntentInfo};

use super::frame::{ColumnRole, DataFrame};

const FORBIDDEN_TRAJECTORY: &[&str] = &["subject_id", "patient_id"];
const ALLOWED_TRAJECTORY: &[&str] = &["stay_id", "hadm_id"];
const IDENTIFIER_COLS: &[&str] = &["subject_id", "hadm_id", "stay_id", "patient_id"];
const FORBIDDEN_GROUP_COLS: &[&str] = &[
    "subject_id",
    "hadm_id",
    "stay_id",
    "seq_num",
    "transfer_id",
    "orderid",
    "linkorderid",
    "order_provider_id",
    "caregiver_id",
    "pharmacy_id",
    "icd_code",
    "itemid",
    "emar_id",
    "poe_id",
];
const ALLOWED_GROUP_COLS: &[&str] = &[
    "gender",
    "anchor_year_group",
    "admission_type",
    "insurance",
    "language",
    "race",
    "marital_status",
    "first_careunit",
    "last_careunit",
    "curr_service",
    "careunit",
];
const CLINICAL_HINTS: &[&str] = &[
    "subject_id",
    "hadm_id",
    "stay_id",
    "icd",
    "drg",
    "diagnosis",
    "admission",
    "discharge",
    "mortality",
    "los",
    "length_of_stay",
    "careunit",
    "icu",
    "ward",
    "charttime",
    "lab",
    "vital",
];
const TIME_CANDIDATES: &[&str] = &[
    "charttime",
    "admittime",
    "dischtime",
    "intime",
    "outtime",
    "starttime",
    "endtime",
    "storetime",
    "storedate",
    "edregtime",
    "edouttime",
    "ordertime",
    "transfertime",
    "chartdate",
];
const MAX_GROUPS: usize = 30;

/// Derived-time axis metadata for a plan.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeInfo {
    /// "elapsed" or "calendar"
    pub kind: String,
    /// Column to plot, when one exists in the frame.
    pub expr: Option<String>,
    /// The expression a SQL layer would need to derive when `expr` is None.
    pub source: Option<String>,
    pub unit: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContextFlags {
    pub icu_context: bool,
    pub admit_context: bool,
    pub post_days: bool,
}

static POST_DAYS_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bafter\s+\d+\s*(day|days|hour|hours|d|h)\b",
        r"\b\d+\s*(day|days|hour|hours|d|h)\s+after\b",
        r"후\s*\d+\s*(일|시간)",
        r"\d+\s*(일|시간)\s*후",
        r"n일\s*후",
    ]
    .iter()
    .map(|pattern| Regex::new(&format!("(?i){}", pattern)).unwrap())
    .collect()
});

pub fn is_identifier_col(col: &str) -> bool {
    let lower = col.to_lowercase();
    IDENTIFIER_COLS.iter().any(|token| *token == lower || lower.contains(token))
}

fn is_low_cardinality(df: &DataFrame, col: &str, max_groups: usize) -> bool {
    df.nunique(col) <= max_groups
}

fn first_matching_col(columns: &[String], candidates: &[&str]) -> Option<String> {
    for candidate in candidates {
        if let Some(col) = columns.iter().find(|col| col.to_lowercase() == *candidate) {
            return Some(col.clone());
        }
    }
    None
}

fn find_elapsed_column(columns: &[String], context: &str) -> Option<String> {
    let candidates: &[&str] = if context == "icu" {
        &["elapsed_icu_days", "icu_elapsed_days", "days_since_intime", "hours_since_intime", "icu_day"]
    } else {
        &[
            "elapsed_admit_days",
            "admit_elapsed_days",
            "days_since_admittime",
            "hours_since_admittime",
            "admit_day",
        ]
    };
    first_matching_col(columns, candidates)
}

/// Conservative ICU / admission / post-N-days context inference from the
/// question and the available columns.
pub fn infer_context_flags(user_query: Option<&str>, columns: &[String]) -> ContextFlags {
    let q = user_query.unwrap_or("").to_lowercase();
    let cols: std::collections::HashSet<String> =
        columns.iter().map(|col| col.to_lowercase()).collect();

    let icu_kw = ["icu", "중환자실", "입실"].iter().any(|k| q.contains(k));
    let admit_kw = ["입원", "admission", "admit"].iter().any(|k| q.contains(k));
    // A bare "후" is too noisy; only number + unit patterns count.
    let post_days = POST_DAYS_RES.iter().any(|re| re.is_match(&q));

    let icu_context = icu_kw || (cols.contains("stay_id") && cols.contains("intime"));
    let admit_context = admit_kw || (cols.contains("hadm_id") && cols.contains("admittime"));

    ContextFlags {
        icu_context,
        admit_context: admit_context && !icu_context,
        post_days,
    }
}

/// Group selection: ICU context prefers STAY_ID then HADM_ID; trend demands a
/// trajectory column; everything else is restricted to the low-cardinality
/// whitelist.
pub fn choose_group_var(
    intent: Option<&str>,
    flags: &ContextFlags,
    columns: &[String],
) -> Option<String> {
    let lower: Vec<String> = columns.iter().map(|col| col.to_lowercase()).collect();

    if flags.icu_context {
        if lower.contains(&"stay_id".to_string()) {
            return Some("stay_id".to_string());
        }
        if lower.contains(&"hadm_id".to_string()) {
            return Some("hadm_id".to_string());
        }
        return None;
    }

    if intent == Some("trend") {
        if lower.contains(&"stay_id".to_string()) {
            return Some("stay_id".to_string());
        }
        if lower.contains(&"hadm_id".to_string()) {
            return Some("hadm_id".to_string());
        }
        return None;
    }

    let group = first_matching_col(columns, ALLOWED_GROUP_COLS)?;
    if FORBIDDEN_GROUP_COLS.contains(&group.to_lowercase().as_str()) {
        return None;
    }
    Some(group)
}

/// Time derivation: elapsed axes are mandatory in ICU / admission contexts;
/// the calendar fallback picks the first available time column.
pub fn derive_time_var(
    intent: Option<&str>,
    flags: &ContextFlags,
    columns: &[String],
) -> Option<TimeInfo> {
    if intent != Some("trend") {
        return None;
    }

    if flags.icu_context {
        let expr = find_elapsed_column(columns, "icu");
        return Some(TimeInfo {
            kind: "elapsed".to_string(),
            expr,
            source: Some("charttime - intime".to_string()),
            unit: "day".to_string(),
        });
    }
    if flags.admit_context {
        let expr = find_elapsed_column(columns, "admit");
        return Some(TimeInfo {
            kind: "elapsed".to_string(),
            expr,
            source: Some("charttime - admittime".to_string()),
            unit: "day".to_string(),
        });
    }

    let chart_col = first_matching_col(columns, &["charttime", "chart_time", "charttimestamp"])
        .or_else(|| first_matching_col(columns, TIME_CANDIDATES));
    chart_col.map(|col| TimeInfo {
        kind: "calendar".to_string(),
        expr: Some(col),
        source: None,
        unit: "day".to_string(),
    })
}

/// Fatal clinical validations. A violation drops the plan.
pub fn validate_plan(
    intent: Option<&str>,
    group_var: Option<&str>,
    time_info: Option<&TimeInfo>,
    columns: &[String],
    flags: &ContextFlags,
) -> Result<(), String> {
    let cols_lower: std::collections::HashSet<String> =
        columns.iter().map(|col| col.to_lowercase()).collect();
    let group_lower = group_var.unwrap_or("").to_lowercase();

    // 1) ICU trend needs the ICU unit of analysis: STAY_ID + INTIME + a time
    //    column, and an elapsed-time axis. Calendar time is forbidden here.
    if intent == Some("trend") && flags.icu_context {
        if !cols_lower.contains("stay_id") {
            return Err("ICU/입실 후 trend는 stay_id 없이 생성할 수 없습니다.".to_string());
        }
        if !cols_lower.contains("intime") {
            return Err("ICU/입실 후 trend는 ICUSTAYS.INTIME 조인이 필요합니다.".to_string());
        }
        if !TIME_CANDIDATES.iter().any(|t| cols_lower.contains(*t)) {
            return Err(
                "ICU/입실 후 trend는 시간 컬럼(chart/start/end/out/store time)이 필요합니다."
                    .to_string(),
            );
        }
        if FORBIDDEN_TRAJECTORY.contains(&group_lower.as_str()) {
            return Err(
                "ICU/입실 후 trend에서 subject_id/patient_id trajectory는 금지입니다.".to_string()
            );
        }
        match time_info {
            Some(info) if info.kind == "elapsed" => {
                if info.expr.is_none() {
                    return Err("ICU/입실 후 trend는 경과시간 파생 컬럼이 필요합니다.".to_string());
                }
            },
            _ => return Err("ICU/입실 후 trend는 경과시간 축만 허용됩니다.".to_string()),
        }
    }

    // 2) Trend lines are per-trajectory only.
    if intent == Some("trend") && !group_lower.is_empty() {
        if FORBIDDEN_TRAJECTORY.contains(&group_lower.as_str()) {
            return Err("trend의 group_var로 subject_id/patient_id는 금지입니다.".to_string());
        }
        if !ALLOWED_TRAJECTORY.contains(&group_lower.as_str()) {
            return Err("trend의 group_var는 stay_id/hadm_id만 허용됩니다.".to_string());
        }
    }

    // 3) Identifier groups make comparison/distribution uninterpretable.
    if matches!(intent, Some("comparison") | Some("distribution")) && !group_lower.is_empty() {
        if IDENTIFIER_COLS.iter().any(|token| group_lower.contains(token)) {
            return Err("comparison/distribution에서 식별자 그룹은 금지입니다.".to_string());
        }
    }

    // 4) Correlation with an identifier is statistically meaningless.
    if intent == Some("correlation")
        && IDENTIFIER_COLS.iter().any(|token| group_lower.contains(token))
    {
        return Err("correlation에서 식별자 group은 금지입니다.".to_string());
    }

    // 5) "N days after" questions cannot be answered without an elapsed axis.
    if intent == Some("trend") && flags.post_days {
        let ok = matches!(time_info, Some(info) if info.kind == "elapsed" && info.expr.is_some());
        if !ok {
            return Err("'후 N일' 맥락은 경과시간 파생 컬럼이 필요합니다.".to_string());
        }
    }

    // 6) Admission-anchored trend requires ADMITTIME.
    if intent == Some("trend") && flags.admit_context {
        if !cols_lower.contains("admittime") {
            return Err("입원 기준 trend는 ADMISSIONS.ADMITTIME 조인이 필요합니다.".to_string());
        }
        if !TIME_CANDIDATES.iter().any(|t| cols_lower.contains(*t)) {
            return Err(
                "입원 기준 trend는 시간 컬럼(chart/start/end/out/store time)이 필요합니다."
                    .to_string(),
            );
        }
    }

    // 7) Rate/amount trends are meaningless without time binning.
    if intent == Some("trend") {
        let has_rate_amount =
            cols_lower.iter().any(|col| col.contains("rate") || col.contains("amount"));
        let unbinned = match time_info {
            None => true,
            Some(info) => match info.expr.as_deref() {
                None => true,
                Some("charttime") => true,
                Some(_) => false,
            },
        };
        if has_rate_amount && unbinned {
            return Err("rate/amount trend는 시간 binning(경과시간 포함)이 필요합니다.".to_string());
        }
    }

    Ok(())
}

fn pick_patient_group(df: &DataFrame) -> Option<String> {
    df.columns
        .iter()
        .find(|col| {
            let lower = col.to_lowercase();
            ALLOWED_TRAJECTORY.iter().any(|p| *p == lower || lower.contains(p))
        })
        .cloned()
}

fn pick_safe_group(df: &DataFrame) -> Option<String> {
    let deny = [
        "name", "patient", "subject_id", "hadm_id", "stay_id", "icd", "drg", "diagnosis", "mrn",
        "ssn", "itemid", "emar_id", "poe_id",
    ];
    df.columns
        .iter()
        .find(|col| {
            let lower = col.to_lowercase();
            if deny.iter().any(|d| lower.contains(d)) {
                return false;
            }
            if !ALLOWED_GROUP_COLS.iter().any(|a| lower.contains(a)) {
                return false;
            }
            if !matches!(df.column_role(col), ColumnRole::Categorical | ColumnRole::Text) {
                return false;
            }
            is_low_cardinality(df, col, MAX_GROUPS)
        })
        .cloned()
}

fn pick_clinical_group(df: &DataFrame) -> Option<String> {
    let preferred = [
        "careunit", "icu", "ward", "admission_type", "admission", "discharge", "service",
        "diagnosis", "icd", "drg",
    ];
    df.columns
        .iter()
        .find(|col| {
            let lower = col.to_lowercase();
            preferred.iter().any(|p| lower.contains(p)) && is_low_cardinality(df, col, MAX_GROUPS)
        })
        .cloned()
}

fn has_column_hint(df: &DataFrame, hints: &[&str]) -> bool {
    df.columns.iter().any(|col| {
        let lower = col.to_lowercase();
        hints.iter().any(|hint| lower.contains(hint))
    })
}

static CHART_SPEC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"chart_spec:\s*(\{.*?\})").unwrap());

/// A retrieved example may carry a ready-made chart_spec; use it only when
/// its columns exist in the frame.
fn extract_chart_spec_from_context(
    retrieved_context: Option<&str>,
    df: &DataFrame,
) -> Option<AnalysisPlan> {
    let context = retrieved_context?;
    let caps = CHART_SPEC_RE.captures(context)?;
    let spec: ChartSpec = serde_json::from_str(caps.get(1)?.as_str()).ok()?;
    for col in [&spec.x, &spec.y, &spec.group] {
        if let Some(col) = col {
            if df.column_index(col).is_none() {
                return None;
            }
        }
    }
    Some(AnalysisPlan { chart_spec: spec, reason: "RAG 예시 기반 추천 플랜입니다.".to_string() })
}

const PREFERRED_NUMERIC_Y: &[&str] = &[
    "valuenum",
    "value",
    "amount",
    "rate",
    "los",
    "diagnosis_count",
    "count",
    "anchor_age",
    "doses_per_24_hrs",
];

/// Column-only inference when no intent signal helps.
fn infer_chart_from_columns(df: &DataFrame) -> Option<AnalysisPlan> {
    let lower: std::collections::HashMap<String, String> =
        df.columns.iter().map(|col| (col.to_lowercase(), col.clone())).collect();

    // Alias-based hints from SQL templates.
    if let (Some(x), Some(y)) = (lower.get("x_time"), lower.get("y_value")) {
        let mut spec = ChartSpec::new("line");
        spec.x = Some(x.clone());
        spec.y = Some(y.clone());
        return Some(AnalysisPlan {
            chart_spec: spec,
            reason: "Result aliases indicate a time-series aggregate.".to_string(),
        });
    }
    if let (Some(x), Some(y)) = (lower.get("x_group"), lower.get("y_value")) {
        let mut spec = ChartSpec::new("bar");
        spec.x = Some(x.clone());
        spec.y = Some(y.clone());
        return Some(AnalysisPlan {
            chart_spec: spec,
            reason: "Result aliases indicate a grouped aggregate.".to_string(),
        });
    }

    let time_hints = ["time", "date", "day", "month", "year"];
    let mut time_cols: Vec<String> = df
        .columns
        .iter()
        .filter(|col| {
            let lower = col.to_lowercase();
            time_hints.iter().any(|hint| lower.contains(hint))
        })
        .cloned()
        .collect();
    time_cols.sort_by_key(|col| {
        TIME_CANDIDATES
            .iter()
            .position(|candidate| *candidate == col.to_lowercase())
            .unwrap_or(999)
    });

    let mut numeric_cols: Vec<String> = df
        .columns
        .iter()
        .filter(|col| {
            df.is_numeric(col) && !is_identifier_col(col) && !col.to_lowercase().contains("code")
        })
        .cloned()
        .collect();
    numeric_cols.sort_by_key(|col| {
        let lower = col.to_lowercase();
        PREFERRED_NUMERIC_Y
            .iter()
            .position(|token| lower.contains(token))
            .unwrap_or(999)
    });

    let categorical_cols: Vec<String> = df
        .columns
        .iter()
        .filter(|col| {
            matches!(df.column_role(col), ColumnRole::Categorical | ColumnRole::Text)
        })
        .cloned()
        .collect();

    if let (Some(time), Some(numeric)) = (time_cols.first(), numeric_cols.first()) {
        let mut spec = ChartSpec::new("line");
        spec.x = Some(time.clone());
        spec.y = Some(numeric.clone());
        return Some(AnalysisPlan {
            chart_spec: spec,
            reason: "Detected time-like and numeric columns for a trend chart.".to_string(),
        });
    }
    if numeric_cols.len() >= 2 {
        let mut spec = ChartSpec::new("scatter");
        spec.x = Some(numeric_cols[0].clone());
        spec.y = Some(numeric_cols[1].clone());
        return Some(AnalysisPlan {
            chart_spec: spec,
            reason: "Detected multiple numeric columns for correlation.".to_string(),
        });
    }
    if let (Some(cat), Some(numeric)) = (categorical_cols.first(), numeric_cols.first()) {
        let mut spec = ChartSpec::new("bar");
        spec.x = Some(cat.clone());
        spec.y = Some(numeric.clone());
        return Some(AnalysisPlan {
            chart_spec: spec,
            reason: "Detected category + numeric for comparison.".to_string(),
        });
    }
    if numeric_cols.len() == 1 {
        let mut spec = ChartSpec::new("hist");
        spec.x = Some(numeric_cols[0].clone());
        return Some(AnalysisPlan {
            chart_spec: spec,
            reason: "Detected a single numeric column for distribution.".to_string(),
        });
    }
    None
}

fn dedupe_plans(plans: Vec<AnalysisPlan>) -> Vec<AnalysisPlan> {
    let mut unique = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for plan in plans {
        let key = format!(
            "{}|{:?}|{:?}|{:?}|{:?}",
            plan.chart_spec.chart_type,
            plan.chart_spec.x,
            plan.chart_spec.y,
            plan.chart_spec.group,
            plan.chart_spec.agg
        );
        if seen.insert(key) {
            unique.push(plan);
        }
    }
    unique
}

fn record_failure(failure_reasons: &mut Vec<String>, reason: String) {
    let normalized = reason.trim().to_string();
    if !normalized.is_empty() && !failure_reasons.contains(&normalized) {
        failure_reasons.push(normalized);
    }
}

fn plan(chart_type: &str, x: Option<&str>, y: Option<&str>, group: Option<&str>, reason: &str) -> AnalysisPlan {
    let mut spec = ChartSpec::new(chart_type);
    spec.x = x.map(str::to_string);
    spec.y = y.map(str::to_string);
    spec.group = group.map(str::to_string);
    AnalysisPlan { chart_spec: spec, reason: reason.to_string() }
}

/// Produce candidate plans for the intent and frame. `retry_mode` "relaxed"
/// is the second pass with the group variable cleared.
pub fn plan_analyses(
    intent_info: &IntentInfo,
    df: &DataFrame,
    retrieved_context: Option<&str>,
    retry_mode: &str,
    failure_reasons: &mut Vec<String>,
) -> Vec<AnalysisPlan> {
    let intent = Some(intent_info.analysis_intent.as_str()).filter(|s| !s.is_empty());
    let primary = intent_info.primary_outcome.clone().filter(|col| df.column_index(col).is_some());
    let user_query = Some(intent_info.user_query.as_str()).filter(|s| !s.is_empty());

    let suggested_plan = extract_chart_spec_from_context(retrieved_context, df);
    let column_only_plan = infer_chart_from_columns(df);
    let flags = infer_context_flags(user_query, &df.columns);

    let time_info = derive_time_var(intent, &flags, &df.columns);
    let mut group_var = intent_info
        .group_var
        .clone()
        .or_else(|| choose_group_var(intent, &flags, &df.columns));
    let time_var = time_info
        .as_ref()
        .and_then(|info| info.expr.clone())
        .or_else(|| intent_info.time_var.clone());

    // Cardinality and per-intent group policy, even for whitelist columns.
    if let Some(group) = group_var.clone() {
        if df.column_index(&group).is_some() && !is_low_cardinality(df, &group, MAX_GROUPS) {
            group_var = None;
        }
    }
    if let Some(group) = group_var.clone() {
        let lower = group.to_lowercase();
        if intent != Some("trend") && FORBIDDEN_GROUP_COLS.contains(&lower.as_str()) {
            group_var = None;
        } else if intent == Some("trend") && !ALLOWED_TRAJECTORY.contains(&lower.as_str()) {
            group_var = None;
        } else if matches!(intent, Some("distribution") | Some("comparison"))
            && is_identifier_col(&group)
        {
            group_var = None;
        }
    }

    tracing::debug!(
        "Rule engine start: intent={:?} primary={:?} time={:?} group={:?} mode={}",
        intent,
        primary,
        time_var,
        group_var,
        retry_mode
    );

    let mut plans: Vec<AnalysisPlan> = Vec::new();

    if let Some(suggested) = suggested_plan {
        if intent == Some("trend") {
            let spec_x = suggested.chart_spec.x.clone();
            let aligned = matches!(
                (time_info.as_ref(), spec_x.as_deref()),
                (Some(info), Some(x)) if info.expr.as_deref() == Some(x)
            );
            if aligned {
                match validate_plan(
                    intent,
                    suggested.chart_spec.group.as_deref(),
                    time_info.as_ref(),
                    &df.columns,
                    &flags,
                ) {
                    Ok(()) => plans.push(suggested),
                    Err(reason) => {
                        record_failure(failure_reasons, format!("{}: rag_plan_blocked - {}", retry_mode, reason));
                    },
                }
            }
        } else {
            plans.push(suggested);
        }
    } else if let Some(column_plan) = column_only_plan {
        // Column-only line inference must still honor the ICU axis rule:
        // calendar time never carries an ICU-anchored trend.
        let icu_calendar_line = intent == Some("trend")
            && flags.icu_context
            && column_plan.chart_spec.chart_type == "line"
            && time_info
                .as_ref()
                .map_or(true, |info| info.expr.as_deref() != column_plan.chart_spec.x.as_deref());
        if icu_calendar_line {
            record_failure(
                failure_reasons,
                format!("{}: column_plan_blocked - ICU 맥락에서 calendar 시간축 line은 금지입니다.", retry_mode),
            );
        } else {
            plans.push(column_plan);
        }
    }

    match intent {
        Some("trend") if time_var.is_some() && primary.is_some() => {
            let primary = primary.clone().expect("checked above");
            match validate_plan(intent, group_var.as_deref(), time_info.as_ref(), &df.columns, &flags)
            {
                Err(reason) => {
                    // Clinical meaning wins over chart coverage: no trend plan.
                    record_failure(failure_reasons, format!("{}: trend_blocked - {}", retry_mode, reason));
                },
                Ok(()) => {
                    let time_var = time_var.clone().expect("checked above");
                    let patient_group = pick_patient_group(df);
                    let line_group = patient_group.or_else(|| group_var.clone());
                    // No trajectory column, no line chart.
                    if let Some(line_group) = line_group {
                        plans.push(plan(
                            "line",
                            Some(&time_var),
                            Some(&primary),
                            Some(&line_group),
                            "환자별 변화(trajectory)를 직접 확인할 수 있습니다.",
                        ));
                    }
                    plans.push(plan(
                        "box",
                        Some(&time_var),
                        Some(&primary),
                        None,
                        "시간 구간별 분포와 이상치를 함께 확인할 수 있습니다.",
                    ));
                    if let Some(group) = group_var.clone() {
                        plans.push(plan(
                            "box",
                            Some(&group),
                            Some(&primary),
                            None,
                            "그룹별 분포 차이와 이상치를 추가로 비교할 수 있습니다.",
                        ));
                    }
                },
            }
        },
        Some("distribution") if primary.is_some() => {
            let primary = primary.clone().expect("checked above");
            plans.push(plan("hist", Some(&primary), None, None, "전체 분포를 확인하기에 적합합니다."));
            if let Some(group) = group_var.clone() {
                plans.push(plan(
                    "box",
                    Some(&group),
                    Some(&primary),
                    None,
                    "그룹별 분포 차이를 비교할 수 있습니다.",
                ));
            }
        },
        Some("comparison") if primary.is_some() => {
            if let Some(group) = group_var.clone() {
                let primary = primary.clone().expect("checked above");
                plans.push(plan(
                    "box",
                    Some(&group),
                    Some(&primary),
                    None,
                    "그룹별 분포 차이와 이상치를 비교하기 좋습니다.",
                ));
            }
        },
        Some("proportion") if primary.is_some() => {
            let primary = primary.clone().expect("checked above");
            if let Some(time_var) = time_var.clone() {
                plans.push(plan(
                    "line",
                    Some(&time_var),
                    Some(&primary),
                    group_var.as_deref(),
                    "시간에 따른 비율 변화를 확인할 수 있습니다.",
                ));
            } else if let Some(group) = group_var.clone() {
                plans.push(plan(
                    "bar",
                    Some(&group),
                    Some(&primary),
                    None,
                    "그룹별 비율 차이를 확인할 수 있습니다.",
                ));
            }
        },
        Some("correlation") if primary.is_some() => {
            let primary = primary.clone().expect("checked above");
            if !is_identifier_col(&primary) {
                let other = df.columns.iter().find(|col| {
                    *col != &primary && df.is_numeric(col) && !is_identifier_col(col)
                });
                if let Some(other) = other {
                    plans.push(plan(
                        "scatter",
                        Some(other),
                        Some(&primary),
                        None,
                        "두 변수의 상관관계를 시각화합니다.",
                    ));
                }
            }
        },
        _ => {
            if let Some(primary) = primary.clone() {
                plans.push(plan("hist", Some(&primary), None, None, "기본 분포를 확인하기 위한 플랜입니다."));
            }
        },
    }

    // Clinical-hint bonus plan, never for distribution/comparison intents.
    if has_column_hint(df, CLINICAL_HINTS)
        && !matches!(intent, Some("distribution") | Some("comparison"))
    {
        let clinical_group = pick_clinical_group(df).or_else(|| pick_safe_group(df));
        if let (Some(primary), Some(group)) = (primary, clinical_group) {
            plans.push(plan(
                "box",
                Some(&group),
                Some(&primary),
                None,
                "임상 의사결정에 유용한 그룹별 분포를 확인합니다.",
            ));
        }
    }

    let plans = dedupe_plans(plans);
    tracing::debug!("Rule engine produced {} plans", plans.len());
    plans
}

/// Normalize arbitrary JSON rows into the frame for planning.
pub fn frame_from_rows(rows: &[Value]) -> DataFrame {
    let records: Vec<serde_json::Map<String, Value>> = rows
        .iter()
        .filter_map(|row| row.as_object().cloned())
        .collect();
    DataFrame::from_records(&records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn icu_frame() -> DataFrame {
        DataFrame::new(
            vec![
                "stay_id".into(),
                "intime".into(),
                "charttime".into(),
                "elapsed_icu_days".into(),
                "valuenum".into(),
            ],
            (0..10)
                .map(|i| {
                    vec![
                        json!(i % 3),
                        json!("2130-01-01 00:00:00"),
                        json!("2130-01-02 00:00:00"),
                        json!(i as f64 * 0.5),
                        json!(90.0 + i as f64),
                    ]
                })
                .collect(),
        )
    }

    fn intent(kind: &str, primary: &str, query: &str) -> IntentInfo {
        IntentInfo {
            analysis_intent: kind.to_string(),
            primary_outcome: Some(primary.to_string()),
            time_var: None,
            group_var: None,
            agg: None,
            recommended_chart: None,
            user_query: query.to_string(),
        }
    }

    #[test]
    fn icu_trend_uses_elapsed_axis_and_stay_id() {
        let df = icu_frame();
        let mut failures = Vec::new();
        let plans = plan_analyses(
            &intent("trend", "valuenum", "ICU 입실 후 심박수 추세"),
            &df,
            None,
            "normal",
            &mut failures,
        );
        assert!(plans.iter().any(|p| {
            p.chart_spec.chart_type == "line"
                && p.chart_spec.x.as_deref() == Some("elapsed_icu_days")
                && p.chart_spec.group.as_deref() == Some("stay_id")
        }));
    }

    #[test]
    fn icu_trend_without_stay_id_is_blocked() {
        let df = DataFrame::new(
            vec!["subject_id".into(), "charttime".into(), "valuenum".into()],
            vec![vec![json!(1), json!("2130-01-01 00:00:00"), json!(1.0)]],
        );
        let mut failures = Vec::new();
        let plans = plan_analyses(
            &intent("trend", "valuenum", "icu 입실 후 수치 추세"),
            &df,
            None,
            "normal",
            &mut failures,
        );
        assert!(plans.iter().all(|p| p.chart_spec.chart_type != "line"));
        assert!(failures.iter().any(|f| f.contains("blocked")));
    }

    #[test]
    fn distribution_never_groups_by_identifier() {
        let mut df = icu_frame();
        df.columns.push("subject_id".into());
        for row in &mut df.rows {
            row.push(json!(1));
        }
        let mut failures = Vec::new();
        let mut info = intent("distribution", "valuenum", "수치 분포");
        info.group_var = Some("subject_id".to_string());
        let plans = plan_analyses(&info, &df, None, "normal", &mut failures);
        for plan in &plans {
            assert_ne!(plan.chart_spec.group.as_deref(), Some("subject_id"));
            if plan.chart_spec.chart_type == "box" {
                assert_ne!(plan.chart_spec.x.as_deref(), Some("subject_id"));
            }
        }
    }

    #[test]
    fn trend_with_monthly_aggregate_frame_yields_line_or_box() {
        let df = DataFrame::new(
            vec!["icu_admit_month".into(), "mortality_rate".into(), "hadm_id".into()],
            (0..12)
                .map(|i| {
                    vec![
                        json!(format!("2130-{:02}-01", i + 1)),
                        json!(0.05 + 0.01 * i as f64),
                        json!(i),
                    ]
                })
                .collect(),
        );
        let mut failures = Vec::new();
        let plans = plan_analyses(
            &intent("trend", "mortality_rate", "monthly mortality trend"),
            &df,
            None,
            "normal",
            &mut failures,
        );
        assert!(plans
            .iter()
            .any(|p| matches!(p.chart_spec.chart_type.as_str(), "line" | "bar" | "box")));
    }

    #[test]
    fn rag_chart_spec_used_when_columns_exist() {
        let df = icu_frame();
        let context = r#"chart_spec: {"chart_type": "box", "x": "stay_id", "y": "valuenum"}"#;
        let mut failures = Vec::new();
        let plans = plan_analyses(
            &intent("distribution", "valuenum", "분포"),
            &df,
            Some(context),
            "normal",
            &mut failures,
        );
        assert!(plans.iter().any(|p| p.reason.contains("RAG")));
    }

    #[test]
    fn correlation_excludes_identifiers() {
        let df = icu_frame();
        let mut failures = Vec::new();
        let plans = plan_analyses(
            &intent("correlation", "valuenum", "상관 관계"),
            &df,
            None,
            "normal",
            &mut failures,
        );
        for plan in plans.iter().filter(|p| p.chart_spec.chart_type == "scatter") {
            assert!(!is_identifier_col(plan.chart_spec.x.as_deref().unwrap_or("")));
            assert!(!is_identifier_col(plan.chart_spec.y.as_deref().unwrap_or("")));
        }
    }
}
