use serde::{Deserialize, Serialize};
use validator::Validate;

/// Cohort simulation parameters. Bounds mirror the admission-cohort domain:
/// readmission windows of 7-90 days, adult ages, plausible LOS thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct CohortParams {
    #[validate(range(min = 7, max = 90))]
    pub readmit_days: i64,
    #[validate(range(min = 18, max = 95))]
    pub age_threshold: i64,
    #[validate(range(min = 1, max = 30))]
    pub los_threshold: i64,
    /// all | M | F
    pub gender: String,
    pub icu_only: bool,
    /// all | er | non_er
    pub entry_filter: String,
    /// all | survived | expired
    pub outcome_filter: String,
}

impl Default for CohortParams {
    fn default() -> Self {
        Self {
            readmit_days: 30,
            age_threshold: 65,
            los_threshold: 7,
            gender: "all".to_string(),
            icu_only: false,
            entry_filter: "all".to_string(),
            outcome_filter: "all".to_string(),
        }
    }
}

impl CohortParams {
    /// Enum-like field validation on top of the numeric ranges.
    pub fn check(&self) -> Result<(), String> {
        if let Err(err) = self.validate() {
            return Err(err.to_string());
        }
        if !matches!(self.gender.as_str(), "all" | "M" | "F") {
            return Err(format!("gender must be all|M|F, got '{}'", self.gender));
        }
        if !matches!(self.entry_filter.as_str(), "all" | "er" | "non_er") {
            return Err(format!("entry_filter must be all|er|non_er, got '{}'", self.entry_filter));
        }
        if !matches!(self.outcome_filter.as_str(), "all" | "survived" | "expired") {
            return Err(format!(
                "outcome_filter must be all|survived|expired, got '{}'",
                self.outcome_filter
            ));
        }
        Ok(())
    }
}

/// Named SQL strings compiled from one CohortParams. Every entry shares the
/// same cohort CTE text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortSqlBundle {
    pub cohort_cte: String,
    pub metrics_sql: String,
    pub age_subgroup_sql: String,
    pub gender_subgroup_sql: String,
    pub comorbidity_subgroup_sql: String,
    pub patient_count_sql: String,
    pub readmission_rate_sql: String,
    pub mortality_rate_sql: String,
    pub avg_los_sql: String,
    pub median_los_sql: String,
    pub readmission_7d_rate_sql: String,
    pub long_stay_rate_sql: String,
    pub icu_admission_rate_sql: String,
    pub er_admission_rate_sql: String,
    pub life_table_sql: String,
}

/// Headline metric snapshot for one parameter set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortMetrics {
    pub patient_count: f64,
    pub readmission_rate: f64,
    pub mortality_rate: f64,
    pub avg_los_days: f64,
    pub median_los_days: f64,
    pub readmission_7d_rate: f64,
    pub long_stay_rate: f64,
    pub icu_admission_rate: f64,
    pub er_admission_rate: f64,
}

/// Raw counts backing the confidence statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CohortStats {
    pub n_admissions: f64,
    pub readmit_30_cnt: f64,
    pub death_cnt: f64,
    pub los_stddev_days: f64,
    pub icu_admission_cnt: f64,
    pub er_admission_cnt: f64,
    pub readmit_7_cnt: f64,
    pub long_stay_cnt: f64,
}

/// One subgroup row (age band, gender, comorbidity group).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubgroupRow {
    pub key: String,
    pub label: String,
    pub admission_count: i64,
    pub patient_count: i64,
    pub readmission_rate: f64,
    pub mortality_rate: f64,
    pub avg_los_days: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubgroupSnapshot {
    pub age: Vec<SubgroupRow>,
    pub gender: Vec<SubgroupRow>,
    pub comorbidity: Vec<SubgroupRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgroupMetrics {
    pub admission_count: i64,
    pub patient_count: i64,
    pub readmission_rate: f64,
    pub mortality_rate: f64,
    pub avg_los_days: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubgroupComparisonRow {
    pub key: String,
    pub label: String,
    pub current: SubgroupMetrics,
    pub simulated: SubgroupMetrics,
    pub delta: SubgroupMetrics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubgroupComparison {
    pub age: Vec<SubgroupComparisonRow>,
    pub gender: Vec<SubgroupComparisonRow>,
    pub comorbidity: Vec<SubgroupComparisonRow>,
}

/// One confidence entry: Wald CI, normal-approximation p-value, effect size,
/// and a parametric bootstrap interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceMetric {
    pub metric: String,
    pub label: String,
    pub unit: String,
    pub current: f64,
    pub simulated: f64,
    pub difference: f64,
    pub ci: [f64; 2],
    pub p_value: f64,
    pub effect_size: f64,
    pub effect_size_type: String,
    pub bootstrap_ci: [f64; 2],
    pub significant: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidencePayload {
    pub method: String,
    pub alpha: f64,
    pub bootstrap_iterations: u32,
    pub n_current: i64,
    pub n_simulated: i64,
    pub metrics: Vec<ConfidenceMetric>,
}

/// One survival curve point (life-table KM, percent surviving).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurvivalPoint {
    pub time: f64,
    pub current: f64,
    pub simulated: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResponse {
    pub params: CohortParams,
    pub baseline_params: CohortParams,
    pub current: CohortMetrics,
    pub simulated: CohortMetrics,
    pub survival: Vec<SurvivalPoint>,
    pub confidence: ConfidencePayload,
    pub subgroups: SubgroupComparison,
}

/// A saved, named cohort definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedCohort {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub status: String,
    pub params: CohortParams,
    pub metrics: CohortMetrics,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_are_valid() {
        assert!(CohortParams::default().check().is_ok());
    }

    #[test]
    fn out_of_range_readmit_days_rejected() {
        let params = CohortParams { readmit_days: 120, ..Default::default() };
        assert!(params.check().is_err());
    }

    #[test]
    fn bad_gender_rejected() {
        let params = CohortParams { gender: "X".to_string(), ..Default::default() };
        assert!(params.check().is_err());
    }
}
