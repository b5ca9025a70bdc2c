//! Life-table Kaplan-Meier approximation evaluated at fixed day cut-points.

use crate::models::cohort::SurvivalPoint;

/// Day cut-points the survival payload is evaluated at.
pub const SURVIVAL_TIME_POINTS: [i64; 12] = [0, 7, 14, 21, 30, 45, 60, 75, 90, 120, 150, 180];

/// One life-table row: (day, event count, censor count).
pub type LifeTableRow = (f64, f64, f64);

/// Evaluate the KM survival percentage at each time point from an ascending
/// life table. At each cut-point t, all rows with day <= t are consumed:
/// survival multiplies by (1 - events / at-risk), then the at-risk set loses
/// the day's events and censors.
pub fn km_curve_from_life_table(life_table: &[LifeTableRow], time_points: &[i64]) -> Vec<f64> {
    let total: f64 = life_table.iter().map(|(_, events, censors)| events + censors).sum();
    if total <= 0.0 {
        return time_points.iter().map(|_| 0.0).collect();
    }

    let mut n_risk = total;
    let mut survival = 1.0f64;
    let mut idx = 0usize;
    let mut values = Vec::with_capacity(time_points.len());

    for &t in time_points {
        while idx < life_table.len() && life_table[idx].0 <= t as f64 {
            let (_, events, censors) = life_table[idx];
            if n_risk > 0.0 && events > 0.0 {
                let step = (1.0 - events / n_risk).max(0.0);
                survival *= step;
            }
            n_risk = (n_risk - events - censors).max(0.0);
            idx += 1;
        }
        let pct = (survival * 100.0).clamp(0.0, 100.0);
        values.push((pct * 10.0).round() / 10.0);
    }
    values
}

/// Zip baseline and simulated curves into the survival payload.
pub fn survival_points(current: &[f64], simulated: &[f64], time_points: &[i64]) -> Vec<SurvivalPoint> {
    time_points
        .iter()
        .enumerate()
        .map(|(idx, &day)| SurvivalPoint {
            time: day as f64,
            current: current.get(idx).copied().unwrap_or(0.0),
            simulated: simulated.get(idx).copied().unwrap_or(0.0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_is_all_zero() {
        let curve = km_curve_from_life_table(&[], &SURVIVAL_TIME_POINTS);
        assert!(curve.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn no_events_means_full_survival() {
        // Only censoring: survival stays at 100.
        let table = vec![(1.0, 0.0, 10.0), (5.0, 0.0, 10.0)];
        let curve = km_curve_from_life_table(&table, &SURVIVAL_TIME_POINTS);
        assert!(curve.iter().all(|v| (*v - 100.0).abs() < 1e-9));
    }

    #[test]
    fn day_zero_event_free_start_is_100() {
        let table = vec![(3.0, 5.0, 5.0), (10.0, 5.0, 5.0)];
        let curve = km_curve_from_life_table(&table, &SURVIVAL_TIME_POINTS);
        // Cut-point 0 precedes the first life-table day.
        assert_eq!(curve[0], 100.0);
        // Later cut-points decline monotonically.
        for pair in curve.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
    }

    #[test]
    fn half_events_halve_survival() {
        let table = vec![(1.0, 50.0, 0.0), (200.0, 0.0, 50.0)];
        let curve = km_curve_from_life_table(&table, &[0, 7]);
        assert_eq!(curve[0], 100.0);
        assert_eq!(curve[1], 50.0);
    }

    #[test]
    fn identical_curves_zip_identically() {
        let curve = vec![100.0, 98.0, 95.0];
        let points = survival_points(&curve, &curve, &[0, 7, 14]);
        assert!(points.iter().all(|p| p.current == p.simulated));
    }
}
