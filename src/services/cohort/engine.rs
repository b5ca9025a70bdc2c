//! Cohort simulation engine: run the SQL bundle, assemble the metric,
//! confidence, survival, and subgroup payloads, and manage saved cohorts.

use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::config::CohortConfig;
use crate::models::cohort::{
    CohortMetrics, CohortParams, CohortSqlBundle, CohortStats, ConfidenceMetric,
    ConfidencePayload, SavedCohort, SimulationResponse, SubgroupComparison,
    SubgroupComparisonRow, SubgroupMetrics, SubgroupRow, SubgroupSnapshot,
};
use crate::services::metadata::{ComorbidityStore, ConceptMapStore};
use crate::services::oracle::OracleExecutor;
use crate::services::store::StateStore;
use crate::utils::{ApiError, ApiResult};

use super::sql_bundle::build_bundle;
use super::stats::{
    bootstrap_mean_diff, bootstrap_prop_diff, cohen_d, cohen_h, round_to, seeded_rng,
    two_sided_p_from_z, ALPHA, BOOTSTRAP_ITERATIONS, Z_CRITICAL,
};
use super::survival::{km_curve_from_life_table, survival_points, LifeTableRow, SURVIVAL_TIME_POINTS};

const SAVED_COHORTS_KEY: &str = "cohort::saved";

fn to_f64(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn to_i64(value: Option<&Value>) -> i64 {
    to_f64(value).round() as i64
}

fn pct(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

pub struct CohortEngine {
    executor: Arc<OracleExecutor>,
    comorbidity: Arc<ComorbidityStore>,
    diagnosis_map: Arc<ConceptMapStore>,
    state: StateStore,
    config: CohortConfig,
    // In-process fallback when the state store cannot persist.
    fallback_saved: Mutex<Vec<SavedCohort>>,
}

impl CohortEngine {
    pub fn new(
        executor: Arc<OracleExecutor>,
        comorbidity: Arc<ComorbidityStore>,
        diagnosis_map: Arc<ConceptMapStore>,
        state: StateStore,
        config: CohortConfig,
    ) -> Self {
        Self {
            executor,
            comorbidity,
            diagnosis_map,
            state,
            config,
            fallback_saved: Mutex::new(Vec::new()),
        }
    }

    pub fn sample_rows(&self) -> u64 {
        self.config.sample_rows
    }

    pub fn sql_bundle(&self, params: &CohortParams) -> CohortSqlBundle {
        build_bundle(params, self.config.sample_rows, &self.comorbidity, &self.diagnosis_map)
    }

    async fn metrics_and_stats(
        &self,
        params: &CohortParams,
    ) -> ApiResult<(CohortMetrics, CohortStats)> {
        let bundle = self.sql_bundle(params);
        let result = self.executor.execute_sql(&bundle.metrics_sql).await?;
        let Some(row) = result.rows.first() else {
            return Ok((CohortMetrics::default(), CohortStats::default()));
        };
        if row.is_empty() {
            return Ok((CohortMetrics::default(), CohortStats::default()));
        }

        let metrics = CohortMetrics {
            patient_count: to_f64(row.first()).max(0.0).round(),
            readmission_rate: round_to(pct(to_f64(row.get(1))), 2),
            mortality_rate: round_to(pct(to_f64(row.get(2))), 2),
            avg_los_days: round_to(to_f64(row.get(3)).max(0.0), 2),
            median_los_days: round_to(to_f64(row.get(4)).max(0.0), 2),
            readmission_7d_rate: round_to(pct(to_f64(row.get(5))), 2),
            long_stay_rate: round_to(pct(to_f64(row.get(6))), 2),
            icu_admission_rate: round_to(pct(to_f64(row.get(7))), 2),
            er_admission_rate: round_to(pct(to_f64(row.get(8))), 2),
        };
        let stats = CohortStats {
            n_admissions: to_i64(row.get(9)).max(0) as f64,
            readmit_30_cnt: to_i64(row.get(10)).max(0) as f64,
            death_cnt: to_i64(row.get(11)).max(0) as f64,
            los_stddev_days: to_f64(row.get(12)).max(0.0),
            icu_admission_cnt: to_i64(row.get(13)).max(0) as f64,
            er_admission_cnt: to_i64(row.get(14)).max(0) as f64,
            readmit_7_cnt: to_i64(row.get(15)).max(0) as f64,
            long_stay_cnt: to_i64(row.get(16)).max(0) as f64,
        };
        Ok((metrics, stats))
    }

    fn parse_subgroup_rows(rows: &[Vec<Value>]) -> Vec<SubgroupRow> {
        rows.iter()
            .filter(|row| row.len() >= 7)
            .map(|row| SubgroupRow {
                key: row
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                label: row.get(1).and_then(Value::as_str).unwrap_or_default().to_string(),
                admission_count: to_i64(row.get(2)).max(0),
                patient_count: to_i64(row.get(3)).max(0),
                readmission_rate: pct(to_f64(row.get(4))),
                mortality_rate: pct(to_f64(row.get(5))),
                avg_los_days: to_f64(row.get(6)).max(0.0),
            })
            .collect()
    }

    async fn subgroups(&self, params: &CohortParams) -> ApiResult<SubgroupSnapshot> {
        let bundle = self.sql_bundle(params);
        let age = self.executor.execute_sql(&bundle.age_subgroup_sql).await?;
        let gender = self.executor.execute_sql(&bundle.gender_subgroup_sql).await?;
        let comorbidity = self.executor.execute_sql(&bundle.comorbidity_subgroup_sql).await?;
        Ok(SubgroupSnapshot {
            age: Self::parse_subgroup_rows(&age.rows),
            gender: Self::parse_subgroup_rows(&gender.rows),
            comorbidity: Self::parse_subgroup_rows(&comorbidity.rows),
        })
    }

    fn metrics_of(row: Option<&SubgroupRow>) -> SubgroupMetrics {
        match row {
            Some(row) => SubgroupMetrics {
                admission_count: row.admission_count,
                patient_count: row.patient_count,
                readmission_rate: round_to(row.readmission_rate, 2),
                mortality_rate: round_to(row.mortality_rate, 2),
                avg_los_days: round_to(row.avg_los_days, 2),
            },
            None => SubgroupMetrics {
                admission_count: 0,
                patient_count: 0,
                readmission_rate: 0.0,
                mortality_rate: 0.0,
                avg_los_days: 0.0,
            },
        }
    }

    fn merge_section(current: &[SubgroupRow], simulated: &[SubgroupRow]) -> Vec<SubgroupComparisonRow> {
        let mut ordered_keys: Vec<String> = current.iter().map(|row| row.key.clone()).collect();
        for row in simulated {
            if !ordered_keys.contains(&row.key) {
                ordered_keys.push(row.key.clone());
            }
        }

        ordered_keys
            .into_iter()
            .map(|key| {
                let current_row = current.iter().find(|row| row.key == key);
                let simulated_row = simulated.iter().find(|row| row.key == key);
                let current_metrics = Self::metrics_of(current_row);
                let simulated_metrics = Self::metrics_of(simulated_row);
                let label = current_row
                    .map(|row| row.label.clone())
                    .or_else(|| simulated_row.map(|row| row.label.clone()))
                    .filter(|label| !label.is_empty())
                    .unwrap_or_else(|| key.clone());
                let delta = SubgroupMetrics {
                    admission_count: simulated_metrics.admission_count
                        - current_metrics.admission_count,
                    patient_count: simulated_metrics.patient_count - current_metrics.patient_count,
                    readmission_rate: round_to(
                        simulated_metrics.readmission_rate - current_metrics.readmission_rate,
                        2,
                    ),
                    mortality_rate: round_to(
                        simulated_metrics.mortality_rate - current_metrics.mortality_rate,
                        2,
                    ),
                    avg_los_days: round_to(
                        simulated_metrics.avg_los_days - current_metrics.avg_los_days,
                        2,
                    ),
                };
                SubgroupComparisonRow {
                    key,
                    label,
                    current: current_metrics,
                    simulated: simulated_metrics,
                    delta,
                }
            })
            .collect()
    }

    fn build_subgroup_comparison(
        current: &SubgroupSnapshot,
        simulated: &SubgroupSnapshot,
    ) -> SubgroupComparison {
        SubgroupComparison {
            age: Self::merge_section(&current.age, &simulated.age),
            gender: Self::merge_section(&current.gender, &simulated.gender),
            comorbidity: Self::merge_section(&current.comorbidity, &simulated.comorbidity),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_confidence_payload(
        current_metrics: &CohortMetrics,
        current_stats: &CohortStats,
        simulated_metrics: &CohortMetrics,
        simulated_stats: &CohortStats,
        baseline_params: &CohortParams,
        simulated_params: &CohortParams,
    ) -> ConfidencePayload {
        let mut rng = seeded_rng(baseline_params, simulated_params);
        let n1 = current_stats.n_admissions.max(0.0);
        let n2 = simulated_stats.n_admissions.max(0.0);

        let prop_item = |rng: &mut rand::rngs::StdRng,
                         metric_key: &str,
                         label: &str,
                         current_rate: f64,
                         simulated_rate: f64,
                         c1: f64,
                         c2: f64|
         -> ConfidenceMetric {
            let c1 = c1.max(0.0);
            let c2 = c2.max(0.0);
            let p1 = if n1 > 0.0 { c1 / n1 } else { 0.0 };
            let p2 = if n2 > 0.0 { c2 / n2 } else { 0.0 };
            let diff = (p2 - p1) * 100.0;
            let se = ((p1 * (1.0 - p1) / n1.max(1.0)) + (p2 * (1.0 - p2) / n2.max(1.0)))
                .max(0.0)
                .sqrt();
            let ci_low = diff - Z_CRITICAL * se * 100.0;
            let ci_high = diff + Z_CRITICAL * se * 100.0;
            let pooled = if n1 + n2 > 0.0 { (c1 + c2) / (n1 + n2) } else { 0.0 };
            let se_pooled = (pooled * (1.0 - pooled) * (1.0 / n1.max(1.0) + 1.0 / n2.max(1.0)))
                .max(0.0)
                .sqrt();
            let z = if se_pooled > 0.0 { (p2 - p1) / se_pooled } else { 0.0 };
            let p_value = two_sided_p_from_z(z);
            let effect_size = cohen_h(p1, p2);
            let (boot_low, boot_high) =
                bootstrap_prop_diff(rng, c1, n1, c2, n2, BOOTSTRAP_ITERATIONS);
            ConfidenceMetric {
                metric: metric_key.to_string(),
                label: label.to_string(),
                unit: "%".to_string(),
                current: round_to(current_rate, 2),
                simulated: round_to(simulated_rate, 2),
                difference: round_to(diff, 2),
                ci: [round_to(ci_low, 2), round_to(ci_high, 2)],
                p_value: round_to(p_value, 6),
                effect_size: round_to(effect_size, 4),
                effect_size_type: "cohen_h".to_string(),
                bootstrap_ci: [round_to(boot_low, 2), round_to(boot_high, 2)],
                significant: p_value < ALPHA,
            }
        };

        let mean_item = |rng: &mut rand::rngs::StdRng| -> ConfidenceMetric {
            let mean1 = current_metrics.avg_los_days;
            let mean2 = simulated_metrics.avg_los_days;
            let sd1 = current_stats.los_stddev_days.max(0.0);
            let sd2 = simulated_stats.los_stddev_days.max(0.0);
            let diff = mean2 - mean1;
            let se = ((sd1.powi(2) / n1.max(1.0)) + (sd2.powi(2) / n2.max(1.0))).max(0.0).sqrt();
            let ci_low = diff - Z_CRITICAL * se;
            let ci_high = diff + Z_CRITICAL * se;
            let z = if se > 0.0 { diff / se } else { 0.0 };
            let p_value = two_sided_p_from_z(z);
            let effect_size = cohen_d(mean1, mean2, sd1, sd2, n1, n2);
            let (boot_low, boot_high) =
                bootstrap_mean_diff(rng, mean1, sd1, n1, mean2, sd2, n2, BOOTSTRAP_ITERATIONS);
            ConfidenceMetric {
                metric: "avg_los_days".to_string(),
                label: "평균 재원일수".to_string(),
                unit: "days".to_string(),
                current: round_to(mean1, 2),
                simulated: round_to(mean2, 2),
                difference: round_to(diff, 2),
                ci: [round_to(ci_low, 2), round_to(ci_high, 2)],
                p_value: round_to(p_value, 6),
                effect_size: round_to(effect_size, 4),
                effect_size_type: "cohen_d".to_string(),
                bootstrap_ci: [round_to(boot_low, 2), round_to(boot_high, 2)],
                significant: p_value < ALPHA,
            }
        };

        let metrics = vec![
            prop_item(
                &mut rng,
                "readmission_rate",
                "재입원율(30일)",
                current_metrics.readmission_rate,
                simulated_metrics.readmission_rate,
                current_stats.readmit_30_cnt,
                simulated_stats.readmit_30_cnt,
            ),
            prop_item(
                &mut rng,
                "readmission_7d_rate",
                "재입원율(7일)",
                current_metrics.readmission_7d_rate,
                simulated_metrics.readmission_7d_rate,
                current_stats.readmit_7_cnt,
                simulated_stats.readmit_7_cnt,
            ),
            prop_item(
                &mut rng,
                "mortality_rate",
                "사망률",
                current_metrics.mortality_rate,
                simulated_metrics.mortality_rate,
                current_stats.death_cnt,
                simulated_stats.death_cnt,
            ),
            prop_item(
                &mut rng,
                "long_stay_rate",
                "장기재원 비율(14일+)",
                current_metrics.long_stay_rate,
                simulated_metrics.long_stay_rate,
                current_stats.long_stay_cnt,
                simulated_stats.long_stay_cnt,
            ),
            prop_item(
                &mut rng,
                "icu_admission_rate",
                "ICU 입실 비율",
                current_metrics.icu_admission_rate,
                simulated_metrics.icu_admission_rate,
                current_stats.icu_admission_cnt,
                simulated_stats.icu_admission_cnt,
            ),
            prop_item(
                &mut rng,
                "er_admission_rate",
                "응급실 입원 비율",
                current_metrics.er_admission_rate,
                simulated_metrics.er_admission_rate,
                current_stats.er_admission_cnt,
                simulated_stats.er_admission_cnt,
            ),
            mean_item(&mut rng),
        ];

        ConfidencePayload {
            method: "Wald CI + normal approximation p-value + effect size + parametric bootstrap"
                .to_string(),
            alpha: ALPHA,
            bootstrap_iterations: BOOTSTRAP_ITERATIONS,
            n_current: n1.round() as i64,
            n_simulated: n2.round() as i64,
            metrics,
        }
    }

    async fn life_table(&self, params: &CohortParams) -> ApiResult<Vec<LifeTableRow>> {
        let bundle = self.sql_bundle(params);
        let result = self.executor.execute_sql(&bundle.life_table_sql).await?;
        let mut table: Vec<LifeTableRow> = result
            .rows
            .iter()
            .filter(|row| row.len() >= 3)
            .map(|row| {
                (
                    to_f64(row.first()),
                    to_f64(row.get(1)).max(0.0),
                    to_f64(row.get(2)).max(0.0),
                )
            })
            .collect();
        table.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(table)
    }

    async fn survival_payload(
        &self,
        baseline: &CohortParams,
        simulated: &CohortParams,
    ) -> ApiResult<Vec<crate::models::cohort::SurvivalPoint>> {
        let points = SURVIVAL_TIME_POINTS;
        // Identical params must produce bit-identical arrays: evaluate once.
        if baseline == simulated {
            let current = km_curve_from_life_table(&self.life_table(baseline).await?, &points);
            let simulated_curve = current.clone();
            return Ok(survival_points(&current, &simulated_curve, &points));
        }
        let current = km_curve_from_life_table(&self.life_table(baseline).await?, &points);
        let simulated_curve =
            km_curve_from_life_table(&self.life_table(simulated).await?, &points);
        Ok(survival_points(&current, &simulated_curve, &points))
    }

    /// Full simulation: simulated metrics, baseline comparison, confidence,
    /// survival, subgroups.
    pub async fn simulate(
        &self,
        simulated_params: CohortParams,
        include_baseline: bool,
    ) -> ApiResult<SimulationResponse> {
        simulated_params.check().map_err(ApiError::validation_error)?;

        let (simulated_metrics, simulated_stats) =
            self.metrics_and_stats(&simulated_params).await?;
        let simulated_subgroups = self.subgroups(&simulated_params).await?;

        let (baseline_params, current_metrics, current_stats, current_subgroups) =
            if include_baseline {
                let baseline = CohortParams::default();
                let (metrics, stats) = self.metrics_and_stats(&baseline).await?;
                let subgroups = self.subgroups(&baseline).await?;
                (baseline, metrics, stats, subgroups)
            } else {
                (
                    simulated_params.clone(),
                    simulated_metrics.clone(),
                    simulated_stats.clone(),
                    simulated_subgroups.clone(),
                )
            };

        let survival = self.survival_payload(&baseline_params, &simulated_params).await?;
        let confidence = Self::build_confidence_payload(
            &current_metrics,
            &current_stats,
            &simulated_metrics,
            &simulated_stats,
            &baseline_params,
            &simulated_params,
        );
        let subgroups = Self::build_subgroup_comparison(&current_subgroups, &simulated_subgroups);

        Ok(SimulationResponse {
            params: simulated_params,
            baseline_params,
            current: current_metrics,
            simulated: simulated_metrics,
            survival,
            confidence,
            subgroups,
        })
    }

    // ------------------------------------------------------------------
    // Saved cohorts
    // ------------------------------------------------------------------

    async fn load_saved(&self) -> Vec<SavedCohort> {
        if let Some(payload) = self.state.get(SAVED_COHORTS_KEY).await {
            if let Some(cohorts) = payload.get("cohorts") {
                if let Ok(parsed) = serde_json::from_value::<Vec<SavedCohort>>(cohorts.clone()) {
                    return parsed;
                }
            }
        }
        self.fallback_saved.lock().expect("saved cohorts poisoned").clone()
    }

    async fn store_saved(&self, cohorts: Vec<SavedCohort>) -> ApiResult<()> {
        let payload = serde_json::json!({ "cohorts": cohorts });
        if self.state.set(SAVED_COHORTS_KEY, payload).await {
            return Ok(());
        }
        // Persistence failed: keep the process-local copy so the session
        // still sees its own saves.
        let mut fallback = self.fallback_saved.lock().expect("saved cohorts poisoned");
        *fallback = cohorts;
        Ok(())
    }

    pub async fn list_saved(&self) -> Vec<SavedCohort> {
        let mut cohorts = self.load_saved().await;
        cohorts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        cohorts
    }

    pub async fn save_cohort(
        &self,
        name: &str,
        params: CohortParams,
        status: &str,
    ) -> ApiResult<SavedCohort> {
        params.check().map_err(ApiError::validation_error)?;
        let name = name.trim();
        if name.is_empty() || name.len() > 120 {
            return Err(ApiError::invalid_input("Cohort name must be 1-120 characters"));
        }
        if !matches!(status, "active" | "archived") {
            return Err(ApiError::invalid_input("Cohort status must be active|archived"));
        }

        let (metrics, _) = self.metrics_and_stats(&params).await?;
        let cohort = SavedCohort {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            created_at: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            status: status.to_string(),
            params,
            metrics,
        };
        let mut cohorts = self.load_saved().await;
        cohorts.push(cohort.clone());
        self.store_saved(cohorts).await?;
        Ok(cohort)
    }

    pub async fn delete_saved(&self, cohort_id: &str) -> ApiResult<usize> {
        let cohorts = self.load_saved().await;
        let before = cohorts.len();
        let next: Vec<SavedCohort> =
            cohorts.into_iter().filter(|cohort| cohort.id != cohort_id).collect();
        let remaining = next.len();
        if remaining == before {
            return Err(ApiError::not_found("Cohort not found"));
        }
        self.store_saved(next).await?;
        Ok(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OracleConfig;
    use crate::services::oracle::driver::{DriverRows, OracleDriver};
    use async_trait::async_trait;
    use serde_json::json;

    /// Driver that answers metric/life-table/subgroup SQL with fixed rows.
    struct FixtureDriver {
        metrics_row: Vec<Value>,
        life_table: Vec<Vec<Value>>,
    }

    #[async_trait]
    impl OracleDriver for FixtureDriver {
        async fn query(
            &self,
            sql: &str,
            _bind_row_cap: Option<u64>,
            _timeout_sec: u64,
        ) -> ApiResult<DriverRows> {
            if sql.contains("EVENT_CNT") {
                return Ok(DriverRows {
                    columns: vec!["LOS_DAY".into(), "EVENT_CNT".into(), "CENSOR_CNT".into()],
                    rows: self.life_table.clone(),
                });
            }
            if sql.contains("GROUP_KEY") {
                return Ok(DriverRows { columns: vec![], rows: vec![] });
            }
            Ok(DriverRows { columns: vec![], rows: vec![self.metrics_row.clone()] })
        }

        async fn execute_session(&self, _sql: &str) -> ApiResult<()> {
            Ok(())
        }

        async fn reset_pool(&self) -> ApiResult<()> {
            Ok(())
        }
    }

    fn engine(dir: &tempfile::TempDir) -> CohortEngine {
        let driver = Arc::new(FixtureDriver {
            metrics_row: vec![
                json!(1200), // PATIENT_CNT
                json!(12.5), // READMIT_RATE_PCT
                json!(8.0),  // MORTALITY_RATE_PCT
                json!(9.4),  // AVG_LOS_DAYS
                json!(8.0),  // MEDIAN_LOS_DAYS
                json!(4.0),  // READMIT_7D_RATE_PCT
                json!(20.0), // LONG_STAY_RATE_PCT
                json!(30.0), // ICU_ADMISSION_RATE_PCT
                json!(40.0), // ER_ADMISSION_RATE_PCT
                json!(1500), // ADMISSION_CNT
                json!(188),  // READMIT_30_CNT
                json!(120),  // DEATH_CNT
                json!(3.2),  // LOS_STDDEV_DAYS
                json!(450),  // ICU_ADMISSION_CNT
                json!(600),  // ER_ADMISSION_CNT
                json!(60),   // READMIT_7_CNT
                json!(300),  // LONG_STAY_CNT
            ],
            life_table: vec![
                vec![json!(7), json!(0), json!(100)],
                vec![json!(14), json!(50), json!(100)],
            ],
        });
        let executor = Arc::new(OracleExecutor::new(
            driver,
            OracleConfig { row_cap: 5000, ..OracleConfig::default() },
        ));
        CohortEngine::new(
            executor,
            Arc::new(ComorbidityStore::new(dir.path().join("specs.json"))),
            Arc::new(ConceptMapStore::new(dir.path().join("diagnosis_icd_map.jsonl"))),
            StateStore::local(dir.path().join("state.json")),
            CohortConfig::default(),
        )
    }

    #[tokio::test]
    async fn default_params_simulation_is_self_consistent() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        let response = engine.simulate(CohortParams::default(), true).await.unwrap();

        assert!(response.simulated.patient_count > 0.0);
        // Baseline equals simulated params, so survival arrays match and
        // day zero (before any life-table day) is 100%.
        assert_eq!(response.survival[0].current, 100.0);
        assert!(response.survival.iter().all(|p| p.current == p.simulated));
        // Identical cohorts: nothing is significant.
        assert!(response.confidence.metrics.iter().all(|m| !m.significant));
    }

    #[tokio::test]
    async fn confidence_payload_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        let params = CohortParams { age_threshold: 70, ..Default::default() };
        let a = engine.simulate(params.clone(), true).await.unwrap();
        let b = engine.simulate(params, true).await.unwrap();
        let a_json = serde_json::to_string(&a.confidence).unwrap();
        let b_json = serde_json::to_string(&b.confidence).unwrap();
        assert_eq!(a_json, b_json);
    }

    #[tokio::test]
    async fn invalid_params_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        let params = CohortParams { readmit_days: 5, ..Default::default() };
        assert!(engine.simulate(params, true).await.is_err());
    }

    #[tokio::test]
    async fn saved_cohorts_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine(&dir);
        let saved = engine
            .save_cohort("65세 이상 고위험군", CohortParams::default(), "active")
            .await
            .unwrap();
        let listed = engine.list_saved().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, saved.id);

        let remaining = engine.delete_saved(&saved.id).await.unwrap();
        assert_eq!(remaining, 0);
        assert!(engine.delete_saved(&saved.id).await.is_err());
    }
}
