//! Tabular result model for the visualization planner: an ordered,
//! column-major view over JSON rows, with role inference, elapsed-time
//! derivation, and a numeric stats snapshot.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataFrame {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Inferred role of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Time,
    Numeric,
    Categorical,
    Boolean,
    Text,
    Other,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaSummary {
    pub source: String,
    pub columns: Vec<String>,
    pub dtypes: BTreeMap<String, String>,
    pub rows: usize,
    pub unique_counts: BTreeMap<String, usize>,
    pub null_counts: BTreeMap<String, usize>,
    pub examples: BTreeMap<String, Vec<Value>>,
    pub inferred_types: BTreeMap<String, ColumnRole>,
    pub column_roles: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NumericStats {
    pub min: f64,
    pub q1: f64,
    pub median: f64,
    pub q3: f64,
    pub max: f64,
    pub mean: f64,
}

const TIME_NAME_HINTS: &[&str] = &["date", "time", "day", "month", "year", "dt", "timestamp"];

pub fn parse_datetime(value: &Value) -> Option<NaiveDateTime> {
    let text = value.as_str()?.trim();
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%d"] {
        if format == "%Y-%m-%d" {
            if let Ok(date) = chrono::NaiveDate::parse_from_str(text, format) {
                return date.and_hms_opt(0, 0, 0);
            }
        } else if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    None
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl DataFrame {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    /// Build from row objects, preserving first-seen column order.
    pub fn from_records(records: &[serde_json::Map<String, Value>]) -> Self {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            for key in record.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|col| record.get(col).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Self { columns, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col == name)
    }

    /// Case-insensitive column lookup returning the real column name.
    pub fn find_column(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|col| col.eq_ignore_ascii_case(name))
            .map(String::as_str)
    }

    pub fn values(&self, name: &str) -> Vec<&Value> {
        match self.column_index(name) {
            Some(idx) => self.rows.iter().filter_map(|row| row.get(idx)).collect(),
            None => Vec::new(),
        }
    }

    pub fn non_null_values(&self, name: &str) -> Vec<&Value> {
        self.values(name).into_iter().filter(|value| !value.is_null()).collect()
    }

    pub fn numeric_values(&self, name: &str) -> Vec<f64> {
        self.non_null_values(name).into_iter().filter_map(as_number).collect()
    }

    pub fn nunique(&self, name: &str) -> usize {
        let mut seen = std::collections::HashSet::new();
        for value in self.non_null_values(name) {
            seen.insert(value.to_string());
        }
        seen.len()
    }

    pub fn null_count(&self, name: &str) -> usize {
        self.values(name).into_iter().filter(|value| value.is_null()).count()
    }

    fn infer_time_by_name(name: &str) -> bool {
        let lower = name.to_lowercase();
        TIME_NAME_HINTS.iter().any(|hint| lower.contains(hint))
    }

    fn infer_time_by_sample(&self, name: &str) -> bool {
        self.non_null_values(name)
            .into_iter()
            .take(20)
            .any(|value| parse_datetime(value).is_some())
    }

    fn categorical_threshold(row_count: usize) -> usize {
        if row_count == 0 {
            return 0;
        }
        ((row_count as f64 * 0.2) as usize).clamp(10, 50)
    }

    pub fn column_role(&self, name: &str) -> ColumnRole {
        let values = self.non_null_values(name);
        if values.is_empty() {
            return ColumnRole::Other;
        }
        if Self::infer_time_by_name(name) && self.infer_time_by_sample(name) {
            return ColumnRole::Time;
        }
        if values.iter().all(|value| value.is_boolean()) {
            return ColumnRole::Boolean;
        }
        if values.iter().all(|value| as_number(value).is_some()) {
            return ColumnRole::Numeric;
        }
        let unique = self.nunique(name);
        if unique <= Self::categorical_threshold(self.len()) {
            ColumnRole::Categorical
        } else {
            ColumnRole::Text
        }
    }

    pub fn is_numeric(&self, name: &str) -> bool {
        matches!(self.column_role(name), ColumnRole::Numeric)
    }

    /// Conditionally derive elapsed-time columns:
    /// `elapsed_icu_days` = charttime-like - intime, and
    /// `elapsed_admit_days` = charttime-like - admittime, both in days.
    pub fn add_elapsed_columns(&mut self) {
        let chart_col = [
            "charttime",
            "chart_time",
            "charttimestamp",
            "starttime",
            "endtime",
            "storetime",
            "outtime",
            "dischtime",
            "transfertime",
            "ordertime",
        ]
        .iter()
        .find_map(|name| self.find_column(name).map(str::to_string));
        let intime_col = ["intime", "in_time", "icu_intime"]
            .iter()
            .find_map(|name| self.find_column(name).map(str::to_string));
        let admit_col = ["admittime", "admit_time"]
            .iter()
            .find_map(|name| self.find_column(name).map(str::to_string));

        if let (Some(chart), Some(intime)) = (chart_col.clone(), intime_col) {
            self.derive_elapsed("elapsed_icu_days", &chart, &intime);
        }
        if let (Some(chart), Some(admit)) = (chart_col, admit_col) {
            self.derive_elapsed("elapsed_admit_days", &chart, &admit);
        }
    }

    fn derive_elapsed(&mut self, new_col: &str, end_col: &str, start_col: &str) {
        if self.find_column(new_col).is_some() {
            return;
        }
        let end_idx = match self.column_index(end_col) {
            Some(idx) => idx,
            None => return,
        };
        let start_idx = match self.column_index(start_col) {
            Some(idx) => idx,
            None => return,
        };
        self.columns.push(new_col.to_string());
        for row in &mut self.rows {
            let elapsed = match (row.get(end_idx), row.get(start_idx)) {
                (Some(end), Some(start)) => {
                    match (parse_datetime(end), parse_datetime(start)) {
                        (Some(end), Some(start)) => {
                            let seconds = (end - start).num_seconds() as f64;
                            serde_json::Number::from_f64(seconds / 86_400.0)
                                .map(Value::Number)
                                .unwrap_or(Value::Null)
                        },
                        _ => Value::Null,
                    }
                },
                _ => Value::Null,
            };
            row.push(elapsed);
        }
    }

    /// Schema summary used by the intent extractor and insight prompts.
    pub fn summarize_schema(&self) -> SchemaSummary {
        let mut dtypes = BTreeMap::new();
        let mut unique_counts = BTreeMap::new();
        let mut null_counts = BTreeMap::new();
        let mut examples = BTreeMap::new();
        let mut inferred_types = BTreeMap::new();
        let mut column_roles: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for role in ["time", "numeric", "categorical", "boolean", "text", "other"] {
            column_roles.insert(role.to_string(), Vec::new());
        }

        for col in &self.columns {
            let role = self.column_role(col);
            let dtype = match role {
                ColumnRole::Numeric => "number",
                ColumnRole::Boolean => "bool",
                ColumnRole::Time => "datetime",
                _ => "object",
            };
            dtypes.insert(col.clone(), dtype.to_string());
            unique_counts.insert(col.clone(), self.nunique(col));
            null_counts.insert(col.clone(), self.null_count(col));
            examples.insert(
                col.clone(),
                self.non_null_values(col).into_iter().take(3).cloned().collect(),
            );
            inferred_types.insert(col.clone(), role);
            let bucket = match role {
                ColumnRole::Time => "time",
                ColumnRole::Numeric => "numeric",
                ColumnRole::Categorical => "categorical",
                ColumnRole::Boolean => "boolean",
                ColumnRole::Text => "text",
                ColumnRole::Other => "other",
            };
            column_roles.get_mut(bucket).expect("bucket exists").push(col.clone());
        }

        SchemaSummary {
            source: "dataframe".to_string(),
            columns: self.columns.clone(),
            dtypes,
            rows: self.len(),
            unique_counts,
            null_counts,
            examples,
            inferred_types,
            column_roles,
        }
    }

    /// Five-number summary + mean for the first numeric columns.
    pub fn stats_snapshot(&self, max_columns: usize) -> BTreeMap<String, NumericStats> {
        let mut stats = BTreeMap::new();
        if self.is_empty() {
            return stats;
        }
        let numeric_cols: Vec<String> = self
            .columns
            .iter()
            .filter(|col| self.is_numeric(col))
            .take(max_columns)
            .cloned()
            .collect();
        for col in numeric_cols {
            let mut values = self.numeric_values(&col);
            if values.is_empty() {
                continue;
            }
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let quantile = |q: f64| -> f64 {
                let pos = (values.len() - 1) as f64 * q;
                let lo = pos.floor() as usize;
                let hi = pos.ceil() as usize;
                if lo == hi {
                    values[lo]
                } else {
                    values[lo] * (1.0 - (pos - lo as f64)) + values[hi] * (pos - lo as f64)
                }
            };
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            stats.insert(
                col,
                NumericStats {
                    min: values[0],
                    q1: quantile(0.25),
                    median: quantile(0.5),
                    q3: quantile(0.75),
                    max: values[values.len() - 1],
                    mean,
                },
            );
        }
        stats
    }

    /// First rows as JSON objects (table preview).
    pub fn head_records(&self, n: usize) -> Vec<serde_json::Map<String, Value>> {
        self.rows
            .iter()
            .take(n)
            .map(|row| {
                self.columns
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| (col.clone(), row.get(idx).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame() -> DataFrame {
        DataFrame::new(
            vec!["stay_id".into(), "charttime".into(), "intime".into(), "valuenum".into()],
            vec![
                vec![json!(1), json!("2130-01-02 12:00:00"), json!("2130-01-01 12:00:00"), json!(7.1)],
                vec![json!(1), json!("2130-01-03 12:00:00"), json!("2130-01-01 12:00:00"), json!(7.4)],
                vec![json!(2), json!("2130-02-05 00:00:00"), json!("2130-02-04 00:00:00"), json!(6.9)],
            ],
        )
    }

    #[test]
    fn elapsed_icu_days_derives_from_charttime_minus_intime() {
        let mut df = frame();
        df.add_elapsed_columns();
        assert!(df.find_column("elapsed_icu_days").is_some());
        let values = df.numeric_values("elapsed_icu_days");
        assert!((values[0] - 1.0).abs() < 1e-9);
        assert!((values[1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn roles_cover_time_numeric_and_categorical() {
        let df = DataFrame::new(
            vec!["admittime".into(), "los".into(), "gender".into()],
            (0..30)
                .map(|i| {
                    vec![
                        json!("2130-01-01 00:00:00"),
                        json!(i as f64),
                        json!(if i % 2 == 0 { "M" } else { "F" }),
                    ]
                })
                .collect(),
        );
        assert_eq!(df.column_role("admittime"), ColumnRole::Time);
        assert_eq!(df.column_role("los"), ColumnRole::Numeric);
        assert_eq!(df.column_role("gender"), ColumnRole::Categorical);
    }

    #[test]
    fn schema_summary_buckets_roles() {
        let summary = frame().summarize_schema();
        assert_eq!(summary.rows, 3);
        assert!(summary.column_roles["time"].contains(&"charttime".to_string()));
        assert!(summary.column_roles["numeric"].contains(&"valuenum".to_string()));
    }

    #[test]
    fn stats_snapshot_reports_five_numbers() {
        let stats = frame().stats_snapshot(8);
        let value_stats = &stats["valuenum"];
        assert!((value_stats.min - 6.9).abs() < 1e-9);
        assert!((value_stats.max - 7.4).abs() < 1e-9);
        assert!(value_stats.q1 <= value_stats.median && value_stats.median <= value_stats.q3);
    }
}
