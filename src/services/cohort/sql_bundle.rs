//! CohortParams -> SQL bundle compiler. Every bundle entry shares the exact
//! same cohort CTE text for one parameter set.

use crate::models::cohort::{CohortParams, CohortSqlBundle};
use crate::services::metadata::{ComorbiditySpec, ComorbidityStore, ConceptMapStore};

const ER_LOCATION_CASE: &str = "CASE WHEN UPPER(NVL(c.ADMISSION_LOCATION, '')) LIKE '%EMERGENCY%' \
     OR UPPER(NVL(c.ADMISSION_LOCATION, '')) LIKE '%ER%' \
     OR UPPER(NVL(c.ADMISSION_LOCATION, '')) LIKE '%ED%' \
     THEN 1 ELSE 0 END";

/// The shared cohort CTE: an admissions sample with the next admission time
/// per subject, filtered by the age / LOS / gender / ICU / entry / outcome
/// parameters.
pub fn cohort_cte(params: &CohortParams, sample_rows: u64) -> String {
    let age = params.age_threshold;
    let los = params.los_threshold;
    let gender = params.gender.to_uppercase();
    let gender_clause = if gender == "M" || gender == "F" {
        format!("AND UPPER(TRIM(p.GENDER)) = '{}' ", gender)
    } else {
        String::new()
    };
    let icu_clause = if params.icu_only {
        "AND EXISTS (SELECT 1 FROM ICUSTAYS i WHERE i.HADM_ID = a.HADM_ID) ".to_string()
    } else {
        String::new()
    };
    let entry_clause = match params.entry_filter.as_str() {
        "er" => "AND (UPPER(NVL(a.ADMISSION_LOCATION, '')) LIKE '%EMERGENCY%' \
                 OR UPPER(NVL(a.ADMISSION_LOCATION, '')) LIKE '%ER%' \
                 OR UPPER(NVL(a.ADMISSION_LOCATION, '')) LIKE '%ED%') "
            .to_string(),
        "non_er" => "AND (UPPER(NVL(a.ADMISSION_LOCATION, '')) NOT LIKE '%EMERGENCY%' \
                     AND UPPER(NVL(a.ADMISSION_LOCATION, '')) NOT LIKE '%ER%' \
                     AND UPPER(NVL(a.ADMISSION_LOCATION, '')) NOT LIKE '%ED%') "
            .to_string(),
        _ => String::new(),
    };
    let outcome_clause = match params.outcome_filter.as_str() {
        "expired" => "AND a.HOSPITAL_EXPIRE_FLAG = 1 ".to_string(),
        "survived" => "AND NVL(a.HOSPITAL_EXPIRE_FLAG, 0) = 0 ".to_string(),
        _ => String::new(),
    };
    let sample_clause =
        if sample_rows > 0 { format!("AND ROWNUM <= {} ", sample_rows) } else { String::new() };

    format!(
        "WITH admissions_sample AS ( \
         SELECT b.HADM_ID, b.SUBJECT_ID, b.ADMITTIME, b.DISCHTIME, b.HOSPITAL_EXPIRE_FLAG, b.ADMISSION_LOCATION, \
         LEAD(b.ADMITTIME) OVER (PARTITION BY b.SUBJECT_ID ORDER BY b.ADMITTIME) AS NEXT_ADMITTIME \
         FROM ( \
         SELECT a.HADM_ID, a.SUBJECT_ID, a.ADMITTIME, a.DISCHTIME, a.HOSPITAL_EXPIRE_FLAG, a.ADMISSION_LOCATION \
         FROM ADMISSIONS a \
         WHERE a.ADMITTIME IS NOT NULL \
         AND a.DISCHTIME IS NOT NULL \
         {sample_clause}\
         ) b \
         ), cohort AS ( \
         SELECT a.HADM_ID, a.SUBJECT_ID, a.ADMITTIME, a.DISCHTIME, a.HOSPITAL_EXPIRE_FLAG, a.ADMISSION_LOCATION, \
         a.NEXT_ADMITTIME, UPPER(TRIM(p.GENDER)) AS GENDER, p.ANCHOR_AGE \
         FROM admissions_sample a \
         JOIN PATIENTS p ON p.SUBJECT_ID = a.SUBJECT_ID \
         WHERE p.ANCHOR_AGE IS NOT NULL \
         AND p.ANCHOR_AGE >= {age} \
         AND (CAST(a.DISCHTIME AS DATE) - CAST(a.ADMITTIME AS DATE)) >= {los} \
         {gender_clause}{icu_clause}{entry_clause}{outcome_clause}) "
    )
}

fn icd_prefix_condition(dx_code_expr: &str, prefixes: &[String]) -> String {
    let parts: Vec<String> = prefixes
        .iter()
        .filter(|prefix| !prefix.is_empty())
        .map(|prefix| format!("{} LIKE '{}%'", dx_code_expr, prefix))
        .collect();
    if parts.is_empty() {
        "1 = 0".to_string()
    } else {
        format!("({})", parts.join(" OR "))
    }
}

struct ResolvedComorbidity {
    spec: ComorbiditySpec,
    condition_sql: String,
}

fn resolve_comorbidity_specs(
    dx_code_expr: &str,
    comorbidity: &ComorbidityStore,
    diagnosis_map: &ConceptMapStore,
) -> Vec<ResolvedComorbidity> {
    comorbidity
        .load()
        .iter()
        .filter_map(|spec| {
            let mapped = diagnosis_map.prefixes_for_terms(&spec.map_terms);
            let prefixes = if mapped.is_empty() { spec.fallback_prefixes.clone() } else { mapped };
            if prefixes.is_empty() {
                return None;
            }
            Some(ResolvedComorbidity {
                spec: spec.clone(),
                condition_sql: icd_prefix_condition(dx_code_expr, &prefixes),
            })
        })
        .collect()
}

/// Compile the full SQL bundle for one parameter set.
pub fn build_bundle(
    params: &CohortParams,
    sample_rows: u64,
    comorbidity: &ComorbidityStore,
    diagnosis_map: &ConceptMapStore,
) -> CohortSqlBundle {
    let cte = cohort_cte(params, sample_rows);
    let readmit_days = params.readmit_days;
    let los_expr = "(CAST(c.DISCHTIME AS DATE) - CAST(c.ADMITTIME AS DATE))";
    let readmit_30_case = format!(
        "CASE WHEN c.NEXT_ADMITTIME IS NOT NULL \
         AND c.NEXT_ADMITTIME > c.DISCHTIME \
         AND c.NEXT_ADMITTIME <= c.DISCHTIME + {} \
         THEN 1 ELSE 0 END",
        readmit_days
    );
    let readmit_7_case = "CASE WHEN c.NEXT_ADMITTIME IS NOT NULL \
         AND c.NEXT_ADMITTIME > c.DISCHTIME \
         AND c.NEXT_ADMITTIME <= c.DISCHTIME + 7 \
         THEN 1 ELSE 0 END";
    let death_case = "CASE WHEN c.HOSPITAL_EXPIRE_FLAG = 1 THEN 1 ELSE 0 END";
    let long_stay_case = format!("CASE WHEN {} >= 14 THEN 1 ELSE 0 END", los_expr);
    let icu_case = "CASE WHEN icu.HADM_ID IS NOT NULL THEN 1 ELSE 0 END";

    let age_band_key = "CASE \
         WHEN c.ANCHOR_AGE < 40 THEN '18_39' \
         WHEN c.ANCHOR_AGE < 50 THEN '40_49' \
         WHEN c.ANCHOR_AGE < 60 THEN '50_59' \
         WHEN c.ANCHOR_AGE < 70 THEN '60_69' \
         WHEN c.ANCHOR_AGE < 80 THEN '70_79' \
         ELSE '80_PLUS' END";
    let age_band_label = "CASE \
         WHEN c.ANCHOR_AGE < 40 THEN '18-39세' \
         WHEN c.ANCHOR_AGE < 50 THEN '40-49세' \
         WHEN c.ANCHOR_AGE < 60 THEN '50-59세' \
         WHEN c.ANCHOR_AGE < 70 THEN '60-69세' \
         WHEN c.ANCHOR_AGE < 80 THEN '70-79세' \
         ELSE '80세 이상' END";
    let gender_key = "CASE \
         WHEN c.GENDER = 'M' THEN 'M' \
         WHEN c.GENDER = 'F' THEN 'F' \
         ELSE 'UNKNOWN' END";
    let gender_label = "CASE \
         WHEN c.GENDER = 'M' THEN '남성' \
         WHEN c.GENDER = 'F' THEN '여성' \
         ELSE '미상' END";

    let subgroup_metric_cols = format!(
        "COUNT(*) AS ADMISSION_CNT, \
         COUNT(DISTINCT c.SUBJECT_ID) AS PATIENT_CNT, \
         ROUND(100 * AVG({r30}), 2) AS READMIT_RATE_PCT, \
         ROUND(100 * AVG({death}), 2) AS MORTALITY_RATE_PCT, \
         ROUND(AVG({los}), 2) AS AVG_LOS_DAYS ",
        r30 = readmit_30_case,
        death = death_case,
        los = los_expr
    );

    let age_subgroup_sql = format!(
        "{cte}SELECT {key} AS GROUP_KEY, {label} AS GROUP_LABEL, {cols}FROM cohort c \
         GROUP BY {key}, {label} ORDER BY GROUP_KEY",
        cte = cte,
        key = age_band_key,
        label = age_band_label,
        cols = subgroup_metric_cols
    );
    let gender_subgroup_sql = format!(
        "{cte}SELECT {key} AS GROUP_KEY, {label} AS GROUP_LABEL, {cols}FROM cohort c \
         GROUP BY {key}, {label} ORDER BY CASE \
         WHEN GROUP_KEY = 'M' THEN 1 \
         WHEN GROUP_KEY = 'F' THEN 2 \
         ELSE 3 END",
        cte = cte,
        key = gender_key,
        label = gender_label,
        cols = subgroup_metric_cols
    );

    let dx_code_expr = "UPPER(REPLACE(NVL(d.ICD_CODE, ''), '.', ''))";
    let comorbidity_specs = resolve_comorbidity_specs(dx_code_expr, comorbidity, diagnosis_map);
    let comorbidity_subgroup_sql = if comorbidity_specs.is_empty() {
        format!(
            "{cte}SELECT \
             CAST(NULL AS VARCHAR2(64)) AS GROUP_KEY, \
             CAST(NULL AS VARCHAR2(128)) AS GROUP_LABEL, \
             CAST(NULL AS NUMBER) AS ADMISSION_CNT, \
             CAST(NULL AS NUMBER) AS PATIENT_CNT, \
             CAST(NULL AS NUMBER) AS READMIT_RATE_PCT, \
             CAST(NULL AS NUMBER) AS MORTALITY_RATE_PCT, \
             CAST(NULL AS NUMBER) AS AVG_LOS_DAYS \
             FROM cohort c WHERE 1 = 0",
            cte = cte
        )
    } else {
        let flag_columns = comorbidity_specs
            .iter()
            .map(|resolved| {
                format!(
                    "MAX(CASE WHEN {} THEN 1 ELSE 0 END) AS {}",
                    resolved.condition_sql, resolved.spec.flag_col
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        let dx_flags_cte = format!(
            ", dx_flags AS ( \
             SELECT d.HADM_ID, {} \
             FROM DIAGNOSES_ICD d \
             JOIN (SELECT DISTINCT HADM_ID FROM cohort) ch ON ch.HADM_ID = d.HADM_ID \
             GROUP BY d.HADM_ID ) ",
            flag_columns
        );
        let union_sql = comorbidity_specs
            .iter()
            .map(|resolved| {
                format!(
                    "SELECT '{key}' AS GROUP_KEY, '{label}' AS GROUP_LABEL, \
                     COUNT(*) AS ADMISSION_CNT, \
                     COUNT(DISTINCT c.SUBJECT_ID) AS PATIENT_CNT, \
                     ROUND(100 * AVG({r30}), 2) AS READMIT_RATE_PCT, \
                     ROUND(100 * AVG({death}), 2) AS MORTALITY_RATE_PCT, \
                     ROUND(AVG({los}), 2) AS AVG_LOS_DAYS, \
                     {ord} AS SORT_ORD \
                     FROM cohort c \
                     JOIN dx_flags f ON f.HADM_ID = c.HADM_ID \
                     WHERE f.{flag} = 1",
                    key = resolved.spec.group_key,
                    label = resolved.spec.group_label,
                    r30 = readmit_30_case,
                    death = death_case,
                    los = los_expr,
                    ord = resolved.spec.sort_order,
                    flag = resolved.spec.flag_col
                )
            })
            .collect::<Vec<_>>()
            .join(" UNION ALL ");
        format!(
            "{cte}{dx}SELECT GROUP_KEY, GROUP_LABEL, ADMISSION_CNT, PATIENT_CNT, \
             READMIT_RATE_PCT, MORTALITY_RATE_PCT, AVG_LOS_DAYS FROM ({union}) ORDER BY SORT_ORD",
            cte = cte,
            dx = dx_flags_cte,
            union = union_sql
        )
    };

    let metrics_sql = format!(
        "{cte}SELECT \
         COUNT(DISTINCT c.SUBJECT_ID) AS PATIENT_CNT, \
         ROUND(100 * AVG({r30}), 2) AS READMIT_RATE_PCT, \
         ROUND(100 * AVG({death}), 2) AS MORTALITY_RATE_PCT, \
         ROUND(AVG({los}), 2) AS AVG_LOS_DAYS, \
         ROUND(PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY {los}), 2) AS MEDIAN_LOS_DAYS, \
         ROUND(100 * AVG({r7}), 2) AS READMIT_7D_RATE_PCT, \
         ROUND(100 * AVG({long_stay}), 2) AS LONG_STAY_RATE_PCT, \
         ROUND(100 * AVG({icu}), 2) AS ICU_ADMISSION_RATE_PCT, \
         ROUND(100 * AVG({er}), 2) AS ER_ADMISSION_RATE_PCT, \
         COUNT(*) AS ADMISSION_CNT, \
         SUM({r30}) AS READMIT_30_CNT, \
         SUM({death}) AS DEATH_CNT, \
         ROUND(NVL(STDDEV({los}), 0), 6) AS LOS_STDDEV_DAYS, \
         SUM({icu}) AS ICU_ADMISSION_CNT, \
         SUM({er}) AS ER_ADMISSION_CNT, \
         SUM({r7}) AS READMIT_7_CNT, \
         SUM({long_stay}) AS LONG_STAY_CNT \
         FROM cohort c \
         LEFT JOIN (SELECT DISTINCT HADM_ID FROM ICUSTAYS) icu ON icu.HADM_ID = c.HADM_ID",
        cte = cte,
        r30 = readmit_30_case,
        r7 = readmit_7_case,
        death = death_case,
        los = los_expr,
        long_stay = long_stay_case,
        icu = icu_case,
        er = ER_LOCATION_CASE
    );

    let life_table_sql = format!(
        "{cte}SELECT \
         FLOOR(CAST(c.DISCHTIME AS DATE) - CAST(c.ADMITTIME AS DATE)) AS LOS_DAY, \
         SUM(CASE WHEN c.HOSPITAL_EXPIRE_FLAG = 1 THEN 1 ELSE 0 END) AS EVENT_CNT, \
         SUM(CASE WHEN c.HOSPITAL_EXPIRE_FLAG = 1 THEN 0 ELSE 1 END) AS CENSOR_CNT \
         FROM cohort c \
         WHERE c.ADMITTIME IS NOT NULL AND c.DISCHTIME IS NOT NULL \
         AND (CAST(c.DISCHTIME AS DATE) - CAST(c.ADMITTIME AS DATE)) >= 0 \
         GROUP BY FLOOR(CAST(c.DISCHTIME AS DATE) - CAST(c.ADMITTIME AS DATE)) \
         ORDER BY LOS_DAY",
        cte = cte
    );

    CohortSqlBundle {
        cohort_cte: cte.clone(),
        metrics_sql,
        age_subgroup_sql,
        gender_subgroup_sql,
        comorbidity_subgroup_sql,
        patient_count_sql: format!(
            "{}SELECT COUNT(DISTINCT c.SUBJECT_ID) AS PATIENT_CNT FROM cohort c",
            cte
        ),
        readmission_rate_sql: format!(
            "{}SELECT ROUND(100 * AVG({}), 2) AS READMIT_RATE_PCT FROM cohort c",
            cte, readmit_30_case
        ),
        mortality_rate_sql: format!(
            "{}SELECT ROUND(100 * AVG({}), 2) AS MORTALITY_RATE_PCT FROM cohort c",
            cte, death_case
        ),
        avg_los_sql: format!(
            "{}SELECT ROUND(AVG({}), 2) AS AVG_LOS_DAYS FROM cohort c",
            cte, los_expr
        ),
        median_los_sql: format!(
            "{}SELECT ROUND(PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY {}), 2) AS MEDIAN_LOS_DAYS FROM cohort c",
            cte, los_expr
        ),
        readmission_7d_rate_sql: format!(
            "{}SELECT ROUND(100 * AVG({}), 2) AS READMIT_7D_RATE_PCT FROM cohort c",
            cte, readmit_7_case
        ),
        long_stay_rate_sql: format!(
            "{}SELECT ROUND(100 * AVG({}), 2) AS LONG_STAY_RATE_PCT FROM cohort c",
            cte, long_stay_case
        ),
        icu_admission_rate_sql: format!(
            "{}SELECT ROUND(100 * AVG(CASE \
             WHEN EXISTS (SELECT 1 FROM ICUSTAYS i WHERE i.HADM_ID = c.HADM_ID) THEN 1 \
             ELSE 0 END), 2) AS ICU_ADMISSION_RATE_PCT FROM cohort c",
            cte
        ),
        er_admission_rate_sql: format!(
            "{}SELECT ROUND(100 * AVG({}), 2) AS ER_ADMISSION_RATE_PCT FROM cohort c",
            cte, ER_LOCATION_CASE
        ),
        life_table_sql,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stores(dir: &tempfile::TempDir) -> (ComorbidityStore, ConceptMapStore) {
        (
            ComorbidityStore::new(dir.path().join("cohort_comorbidity_specs.json")),
            ConceptMapStore::new(dir.path().join("diagnosis_icd_map.jsonl")),
        )
    }

    #[test]
    fn every_bundle_entry_shares_the_cte() {
        let dir = tempfile::tempdir().unwrap();
        let (comorbidity, diagnosis) = stores(&dir);
        let params = CohortParams::default();
        let bundle = build_bundle(&params, 50_000, &comorbidity, &diagnosis);
        for sql in [
            &bundle.metrics_sql,
            &bundle.age_subgroup_sql,
            &bundle.gender_subgroup_sql,
            &bundle.comorbidity_subgroup_sql,
            &bundle.patient_count_sql,
            &bundle.readmission_rate_sql,
            &bundle.mortality_rate_sql,
            &bundle.avg_los_sql,
            &bundle.median_los_sql,
            &bundle.readmission_7d_rate_sql,
            &bundle.long_stay_rate_sql,
            &bundle.icu_admission_rate_sql,
            &bundle.er_admission_rate_sql,
            &bundle.life_table_sql,
        ] {
            assert!(sql.starts_with(&bundle.cohort_cte), "entry does not share the CTE");
        }
    }

    #[test]
    fn filters_materialize_in_the_cte() {
        let dir = tempfile::tempdir().unwrap();
        let (comorbidity, diagnosis) = stores(&dir);
        let params = CohortParams {
            gender: "F".to_string(),
            icu_only: true,
            entry_filter: "er".to_string(),
            outcome_filter: "expired".to_string(),
            ..Default::default()
        };
        let cte = cohort_cte(&params, 1000);
        assert!(cte.contains("UPPER(TRIM(p.GENDER)) = 'F'"));
        assert!(cte.contains("EXISTS (SELECT 1 FROM ICUSTAYS"));
        assert!(cte.contains("LIKE '%EMERGENCY%'"));
        assert!(cte.contains("a.HOSPITAL_EXPIRE_FLAG = 1"));
        assert!(cte.contains("ROWNUM <= 1000"));
    }

    #[test]
    fn readmit_window_flows_into_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let (comorbidity, diagnosis) = stores(&dir);
        let params = CohortParams { readmit_days: 45, ..Default::default() };
        let bundle = build_bundle(&params, 0, &comorbidity, &diagnosis);
        assert!(bundle.metrics_sql.contains("c.DISCHTIME + 45"));
        assert!(bundle.readmission_rate_sql.contains("c.DISCHTIME + 45"));
        // The 7-day window stays fixed.
        assert!(bundle.readmission_7d_rate_sql.contains("c.DISCHTIME + 7"));
    }

    #[test]
    fn default_comorbidity_groups_produce_union() {
        let dir = tempfile::tempdir().unwrap();
        let (comorbidity, diagnosis) = stores(&dir);
        let bundle = build_bundle(&CohortParams::default(), 0, &comorbidity, &diagnosis);
        // The built-in fallback groups resolve through their fixed prefixes.
        assert!(bundle.comorbidity_subgroup_sql.contains("UNION ALL"));
        assert!(bundle.comorbidity_subgroup_sql.contains("HAS_DIABETES"));
        assert!(bundle.comorbidity_subgroup_sql.contains("LIKE 'E11%'"));
    }
}
