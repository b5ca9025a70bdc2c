//! Deterministic chart generation: ChartSpec + frame -> plotly-schema figure
//! JSON. Rendering happens in the UI; this layer only builds the document.
//!
//! Two safety caps apply to bars: a maximum category count (overflow rolls up
//! into a "기타" bucket when the aggregate allows it) and an automatic switch
//! to horizontal orientation when labels are many or long.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::models::chart::ChartSpec;

use super::frame::DataFrame;

const BAR_MAX_CATEGORIES: usize = 30;
const BAR_OTHER_LABEL: &str = "기타";
const BAR_LONG_LABEL_LEN: usize = 14;
const BAR_DENSE_COUNT: usize = 12;

#[derive(Debug, Clone)]
pub struct ChartResult {
    pub figure_json: Option<Value>,
    pub code: Option<String>,
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn build_code(spec: &ChartSpec) -> String {
    format!(
        "# figure spec\n# chart_type={}, x={:?}, y={:?}, group={:?}, agg={:?}, mode={:?}, bar_mode={:?}, orientation={:?}, max_categories={:?}\n",
        spec.chart_type,
        spec.x,
        spec.y,
        spec.group,
        spec.agg,
        spec.mode,
        spec.bar_mode,
        spec.orientation,
        spec.max_categories
    )
}

/// (x, optional group, y) triples with nulls dropped.
fn triples(df: &DataFrame, x: &str, y: Option<&str>, group: Option<&str>) -> Vec<(String, Option<String>, f64)> {
    let Some(x_idx) = df.column_index(x) else { return Vec::new() };
    let y_idx = y.and_then(|col| df.column_index(col));
    let group_idx = group.and_then(|col| df.column_index(col));
    let mut out = Vec::new();
    for row in &df.rows {
        let Some(x_value) = row.get(x_idx) else { continue };
        if x_value.is_null() {
            continue;
        }
        let y_value = match y_idx {
            Some(idx) => match row.get(idx).and_then(number) {
                Some(value) => value,
                None => continue,
            },
            None => 1.0,
        };
        let group_value = group_idx
            .and_then(|idx| row.get(idx))
            .filter(|value| !value.is_null())
            .map(display);
        out.push((display(x_value), group_value, y_value));
    }
    out
}

fn agg_fn(agg: Option<&str>) -> Option<fn(&[f64]) -> f64> {
    fn mean(values: &[f64]) -> f64 {
        values.iter().sum::<f64>() / values.len() as f64
    }
    fn sum(values: &[f64]) -> f64 {
        values.iter().sum()
    }
    fn min(values: &[f64]) -> f64 {
        values.iter().cloned().fold(f64::INFINITY, f64::min)
    }
    fn max(values: &[f64]) -> f64 {
        values.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
    }
    fn count(values: &[f64]) -> f64 {
        values.len() as f64
    }
    fn median(values: &[f64]) -> f64 {
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 { (sorted[mid - 1] + sorted[mid]) / 2.0 } else { sorted[mid] }
    }
    match agg.map(str::to_lowercase).as_deref() {
        Some("avg") | Some("mean") => Some(mean),
        Some("sum") => Some(sum),
        Some("min") => Some(min),
        Some("max") => Some(max),
        Some("count") => Some(count),
        Some("median") => Some(median),
        _ => None,
    }
}

/// Group rows by (x, group) and reduce y when an aggregate is requested.
fn aggregate_triples(
    triples: Vec<(String, Option<String>, f64)>,
    agg: Option<&str>,
) -> Vec<(String, Option<String>, f64)> {
    let Some(reduce) = agg_fn(agg) else {
        return triples;
    };
    let mut buckets: BTreeMap<(String, Option<String>), Vec<f64>> = BTreeMap::new();
    let mut order: Vec<(String, Option<String>)> = Vec::new();
    for (x, group, y) in triples {
        let key = (x, group);
        if !buckets.contains_key(&key) {
            order.push(key.clone());
        }
        buckets.entry(key).or_default().push(y);
    }
    order
        .into_iter()
        .map(|key| {
            let values = buckets.get(&key).expect("bucket exists");
            let reduced = reduce(values);
            (key.0, key.1, reduced)
        })
        .collect()
}

fn should_use_horizontal_bar(labels: &[String]) -> bool {
    if labels.is_empty() {
        return false;
    }
    let max_len = labels.iter().map(|label| label.chars().count()).max().unwrap_or(0);
    labels.len() >= BAR_DENSE_COUNT || max_len >= BAR_LONG_LABEL_LEN
}

/// Cap bar categories to the top-N by absolute contribution; the remainder
/// rolls up into one "기타" bucket when the aggregate is additive.
fn limit_bar_categories(
    triples: Vec<(String, Option<String>, f64)>,
    top_n: usize,
    agg: Option<&str>,
) -> Vec<(String, Option<String>, f64)> {
    if top_n == 0 {
        return triples;
    }
    let mut totals: BTreeMap<String, f64> = BTreeMap::new();
    for (x, _, y) in &triples {
        *totals.entry(x.clone()).or_insert(0.0) += y.abs();
    }
    if totals.len() <= top_n {
        return triples;
    }

    let mut ranked: Vec<(String, f64)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let top: std::collections::HashSet<String> =
        ranked.iter().take(top_n).map(|(name, _)| name.clone()).collect();

    let agg_norm = agg.map(str::to_lowercase).unwrap_or_default();
    let can_rollup = matches!(agg_norm.as_str(), "" | "sum" | "count");

    let mut kept: Vec<(String, Option<String>, f64)> = Vec::new();
    let mut other: BTreeMap<Option<String>, f64> = BTreeMap::new();
    let mut dropped = 0usize;
    for (x, group, y) in triples {
        if top.contains(&x) {
            kept.push((x, group, y));
        } else if can_rollup {
            *other.entry(group).or_insert(0.0) += y;
        } else {
            dropped += 1;
        }
    }
    if can_rollup {
        for (group, value) in other {
            kept.push((BAR_OTHER_LABEL.to_string(), group, value));
        }
    } else if dropped > 0 {
        tracing::debug!("Bar category cap dropped {} non-additive rows", dropped);
    }
    kept
}

fn unique_in_order(values: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for value in values {
        if seen.insert(value.clone()) {
            out.push(value);
        }
    }
    out
}

fn layout(spec: &ChartSpec) -> Value {
    let mut layout = serde_json::Map::new();
    if let Some(title) = &spec.title {
        layout.insert("title".to_string(), json!({ "text": title }));
    }
    if let Some(x) = &spec.x {
        layout.insert("xaxis".to_string(), json!({ "title": { "text": x } }));
    }
    if let Some(y) = &spec.y {
        layout.insert("yaxis".to_string(), json!({ "title": { "text": y } }));
    }
    if let Some(bar_mode) = &spec.bar_mode {
        layout.insert("barmode".to_string(), json!(bar_mode));
    }
    Value::Object(layout)
}

fn figure(data: Vec<Value>, spec: &ChartSpec) -> Option<Value> {
    if data.is_empty() {
        return None;
    }
    Some(json!({ "data": data, "layout": layout(spec) }))
}

fn line_traces(
    triples: Vec<(String, Option<String>, f64)>,
    mode: &str,
) -> Vec<Value> {
    let groups = unique_in_order(
        triples
            .iter()
            .map(|(_, group, _)| group.clone().unwrap_or_default()),
    );
    groups
        .into_iter()
        .filter_map(|group| {
            let points: Vec<&(String, Option<String>, f64)> = triples
                .iter()
                .filter(|(_, g, _)| g.clone().unwrap_or_default() == group)
                .collect();
            if points.is_empty() {
                return None;
            }
            let xs: Vec<String> = points.iter().map(|(x, _, _)| x.clone()).collect();
            let ys: Vec<f64> = points.iter().map(|(_, _, y)| *y).collect();
            let mut trace = json!({
                "type": "scatter",
                "mode": mode,
                "x": xs,
                "y": ys,
            });
            if !group.is_empty() {
                trace["name"] = json!(group);
            }
            Some(trace)
        })
        .collect()
}

fn bar_traces(
    triples: Vec<(String, Option<String>, f64)>,
    horizontal: bool,
) -> Vec<Value> {
    let groups = unique_in_order(
        triples
            .iter()
            .map(|(_, group, _)| group.clone().unwrap_or_default()),
    );
    groups
        .into_iter()
        .filter_map(|group| {
            let points: Vec<&(String, Option<String>, f64)> = triples
                .iter()
                .filter(|(_, g, _)| g.clone().unwrap_or_default() == group)
                .collect();
            if points.is_empty() {
                return None;
            }
            let cats: Vec<String> = points.iter().map(|(x, _, _)| x.clone()).collect();
            let values: Vec<f64> = points.iter().map(|(_, _, y)| *y).collect();
            let mut trace = if horizontal {
                json!({ "type": "bar", "orientation": "h", "x": values, "y": cats })
            } else {
                json!({ "type": "bar", "x": cats, "y": values })
            };
            if !group.is_empty() {
                trace["name"] = json!(group);
            }
            Some(trace)
        })
        .collect()
}

/// Build the figure for one chart spec. Missing columns or empty data produce
/// `figure_json: None` so the caller can record the failure and fall back.
pub fn generate_chart(spec: &ChartSpec, df: &DataFrame) -> ChartResult {
    let code = Some(build_code(spec));
    let max_categories = spec.max_categories.unwrap_or(BAR_MAX_CATEGORIES);

    let figure_json = match spec.chart_type.as_str() {
        "line" | "line_scatter" => {
            let (Some(x), Some(y)) = (spec.x.as_deref(), spec.y.as_deref()) else {
                return ChartResult { figure_json: None, code };
            };
            let mode = if spec.chart_type == "line_scatter" {
                "lines+markers"
            } else {
                match spec.mode.as_deref() {
                    Some("markers") => "markers",
                    Some("lines+markers") => "lines+markers",
                    _ => "lines",
                }
            };
            let data = aggregate_triples(
                triples(df, x, Some(y), spec.group.as_deref()),
                spec.agg.as_deref(),
            );
            figure(line_traces(data, mode), spec)
        },
        "bar" => {
            let (Some(x), Some(y)) = (spec.x.as_deref(), spec.y.as_deref()) else {
                return ChartResult { figure_json: None, code };
            };
            let data = aggregate_triples(
                triples(df, x, Some(y), spec.group.as_deref()),
                spec.agg.as_deref(),
            );
            let data = limit_bar_categories(data, max_categories, spec.agg.as_deref());
            let labels = unique_in_order(data.iter().map(|(x, _, _)| x.clone()));
            let horizontal = match spec.orientation.as_deref() {
                Some("h") => true,
                Some("v") => false,
                _ => should_use_horizontal_bar(&labels),
            };
            figure(bar_traces(data, horizontal), spec)
        },
        "pie" => {
            let Some(x) = spec.x.as_deref() else {
                return ChartResult { figure_json: None, code };
            };
            let data = aggregate_triples(
                triples(df, x, spec.y.as_deref(), None),
                Some(spec.agg.as_deref().unwrap_or("sum")),
            );
            if data.is_empty() {
                None
            } else {
                let labels: Vec<String> = data.iter().map(|(x, _, _)| x.clone()).collect();
                let values: Vec<f64> = data.iter().map(|(_, _, y)| *y).collect();
                figure(vec![json!({ "type": "pie", "labels": labels, "values": values })], spec)
            }
        },
        "hist" => {
            let Some(x) = spec.x.as_deref() else {
                return ChartResult { figure_json: None, code };
            };
            let values = df.numeric_values(x);
            if values.is_empty() {
                // Fall back to categorical frequencies.
                let cats: Vec<String> =
                    df.non_null_values(x).into_iter().map(display).collect();
                if cats.is_empty() {
                    None
                } else {
                    figure(vec![json!({ "type": "histogram", "x": cats })], spec)
                }
            } else {
                figure(vec![json!({ "type": "histogram", "x": values })], spec)
            }
        },
        "scatter" | "dynamic_scatter" => {
            let (Some(x), Some(y)) = (spec.x.as_deref(), spec.y.as_deref()) else {
                return ChartResult { figure_json: None, code };
            };
            let (Some(x_idx), Some(y_idx)) = (df.column_index(x), df.column_index(y)) else {
                return ChartResult { figure_json: None, code };
            };
            let size_idx = spec.size.as_deref().and_then(|col| df.column_index(col));
            let group_idx = spec.group.as_deref().and_then(|col| df.column_index(col));
            let mut xs = Vec::new();
            let mut ys = Vec::new();
            let mut sizes = Vec::new();
            let mut groups = Vec::new();
            for row in &df.rows {
                let (Some(x_value), Some(y_value)) = (
                    row.get(x_idx).and_then(number),
                    row.get(y_idx).and_then(number),
                ) else {
                    continue;
                };
                xs.push(x_value);
                ys.push(y_value);
                if let Some(idx) = size_idx {
                    sizes.push(row.get(idx).and_then(number).unwrap_or(1.0));
                }
                if let Some(idx) = group_idx {
                    groups.push(row.get(idx).map(display).unwrap_or_default());
                }
            }
            if xs.is_empty() {
                None
            } else {
                let mut trace = json!({ "type": "scatter", "mode": "markers", "x": xs, "y": ys });
                if !sizes.is_empty() {
                    trace["marker"] = json!({ "size": sizes });
                }
                if !groups.is_empty() {
                    trace["text"] = json!(groups);
                }
                figure(vec![trace], spec)
            }
        },
        "box" => {
            let Some(y) = spec.y.as_deref().or(spec.x.as_deref()) else {
                return ChartResult { figure_json: None, code };
            };
            // With both axes, x slices the distribution into categories.
            if let (Some(x), Some(y)) = (spec.x.as_deref(), spec.y.as_deref()) {
                let data = triples(df, x, Some(y), None);
                if data.is_empty() {
                    None
                } else {
                    let xs: Vec<String> = data.iter().map(|(x, _, _)| x.clone()).collect();
                    let ys: Vec<f64> = data.iter().map(|(_, _, y)| *y).collect();
                    figure(vec![json!({ "type": "box", "x": xs, "y": ys })], spec)
                }
            } else {
                let values = df.numeric_values(y);
                if values.is_empty() {
                    None
                } else {
                    figure(vec![json!({ "type": "box", "y": values })], spec)
                }
            }
        },
        "pyramid" => {
            let (Some(x), Some(y), Some(group)) =
                (spec.x.as_deref(), spec.y.as_deref(), spec.group.as_deref())
            else {
                return ChartResult { figure_json: None, code };
            };
            let data = aggregate_triples(
                triples(df, x, Some(y), Some(group)),
                Some(spec.agg.as_deref().unwrap_or("sum")),
            );
            let groups = unique_in_order(
                data.iter()
                    .filter_map(|(_, group, _)| group.clone()),
            );
            if groups.len() != 2 {
                None
            } else {
                let traces: Vec<Value> = groups
                    .iter()
                    .enumerate()
                    .map(|(idx, group)| {
                        let points: Vec<&(String, Option<String>, f64)> = data
                            .iter()
                            .filter(|(_, g, _)| g.as_deref() == Some(group.as_str()))
                            .collect();
                        let cats: Vec<String> =
                            points.iter().map(|(x, _, _)| x.clone()).collect();
                        let sign = if idx == 0 { -1.0 } else { 1.0 };
                        let values: Vec<f64> =
                            points.iter().map(|(_, _, y)| y * sign).collect();
                        json!({
                            "type": "bar",
                            "orientation": "h",
                            "name": group,
                            "y": cats,
                            "x": values,
                        })
                    })
                    .collect();
                let mut fig = figure(traces, spec);
                if let Some(Value::Object(map)) = fig.as_mut() {
                    if let Some(Value::Object(layout)) = map.get_mut("layout") {
                        layout.insert("barmode".to_string(), json!("relative"));
                    }
                }
                fig
            }
        },
        "nested_pie" | "sunburst" => {
            let (Some(x), Some(group)) = (spec.x.as_deref(), spec.group.as_deref()) else {
                return ChartResult { figure_json: None, code };
            };
            let data = aggregate_triples(
                triples(df, x, spec.y.as_deref(), Some(group)),
                Some(spec.agg.as_deref().unwrap_or("sum")),
            );
            if data.is_empty() {
                None
            } else {
                let mut labels = Vec::new();
                let mut parents = Vec::new();
                let mut values = Vec::new();
                let mut parent_totals: BTreeMap<String, f64> = BTreeMap::new();
                for (x, _, y) in &data {
                    *parent_totals.entry(x.clone()).or_insert(0.0) += y;
                }
                for (parent, total) in &parent_totals {
                    labels.push(parent.clone());
                    parents.push(String::new());
                    values.push(*total);
                }
                for (x, group, y) in &data {
                    let child = group.clone().unwrap_or_default();
                    labels.push(format!("{} / {}", x, child));
                    parents.push(x.clone());
                    values.push(*y);
                }
                figure(
                    vec![json!({
                        "type": "sunburst",
                        "labels": labels,
                        "parents": parents,
                        "values": values,
                        "branchvalues": "total",
                    })],
                    spec,
                )
            }
        },
        _ => None,
    };

    ChartResult { figure_json, code }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bar_spec(x: &str, y: &str, agg: Option<&str>) -> ChartSpec {
        let mut spec = ChartSpec::new("bar");
        spec.x = Some(x.to_string());
        spec.y = Some(y.to_string());
        spec.agg = agg.map(str::to_string);
        spec
    }

    #[test]
    fn bar_chart_builds_single_trace() {
        let df = DataFrame::new(
            vec!["admission_type".into(), "cnt".into()],
            vec![
                vec![json!("EMERGENCY"), json!(120)],
                vec![json!("ELECTIVE"), json!(45)],
            ],
        );
        let result = generate_chart(&bar_spec("admission_type", "cnt", None), &df);
        let figure = result.figure_json.unwrap();
        assert_eq!(figure["data"][0]["type"], "bar");
        assert_eq!(figure["data"][0]["x"][0], "EMERGENCY");
    }

    #[test]
    fn bar_categories_roll_up_into_other_bucket() {
        let rows: Vec<Vec<Value>> = (0..40)
            .map(|i| vec![json!(format!("drug_{}", i)), json!(40 - i)])
            .collect();
        let df = DataFrame::new(vec!["drug".into(), "cnt".into()], rows);
        let mut spec = bar_spec("drug", "cnt", Some("sum"));
        spec.max_categories = Some(10);
        let figure = generate_chart(&spec, &df).figure_json.unwrap();
        // 10 kept categories + the rollup bucket, on whichever axis carries
        // the labels for the chosen orientation.
        let trace = &figure["data"][0];
        let label_axis = if trace["orientation"] == "h" { &trace["y"] } else { &trace["x"] };
        assert_eq!(label_axis.as_array().unwrap().len(), 11);
        assert!(figure.to_string().contains(BAR_OTHER_LABEL));
    }

    #[test]
    fn dense_labels_switch_to_horizontal() {
        let rows: Vec<Vec<Value>> = (0..15)
            .map(|i| vec![json!(format!("careunit_{}", i)), json!(i)])
            .collect();
        let df = DataFrame::new(vec!["careunit".into(), "cnt".into()], rows);
        let figure = generate_chart(&bar_spec("careunit", "cnt", None), &df).figure_json.unwrap();
        assert_eq!(figure["data"][0]["orientation"], "h");
    }

    #[test]
    fn line_with_group_builds_one_trace_per_group() {
        let df = DataFrame::new(
            vec!["elapsed_icu_days".into(), "valuenum".into(), "stay_id".into()],
            vec![
                vec![json!(0.0), json!(90.0), json!(1)],
                vec![json!(1.0), json!(95.0), json!(1)],
                vec![json!(0.0), json!(85.0), json!(2)],
            ],
        );
        let mut spec = ChartSpec::new("line");
        spec.x = Some("elapsed_icu_days".into());
        spec.y = Some("valuenum".into());
        spec.group = Some("stay_id".into());
        let figure = generate_chart(&spec, &df).figure_json.unwrap();
        assert_eq!(figure["data"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn missing_columns_produce_no_figure() {
        let df = DataFrame::new(vec!["a".into()], vec![vec![json!(1)]]);
        let mut spec = ChartSpec::new("line");
        spec.x = Some("missing".into());
        spec.y = Some("a".into());
        let result = generate_chart(&spec, &df);
        assert!(result.figure_json.is_none());
        assert!(result.code.is_some());
    }

    #[test]
    fn mean_aggregation_reduces_duplicates() {
        let df = DataFrame::new(
            vec!["gender".into(), "los".into()],
            vec![
                vec![json!("M"), json!(2.0)],
                vec![json!("M"), json!(4.0)],
                vec![json!("F"), json!(6.0)],
            ],
        );
        let figure = generate_chart(&bar_spec("gender", "los", Some("avg")), &df)
            .figure_json
            .unwrap();
        let ys = figure["data"][0]["y"].as_array().unwrap();
        assert_eq!(ys.len(), 2);
        assert_eq!(ys[0], json!(3.0));
    }

    #[test]
    fn sunburst_links_children_to_parents() {
        let df = DataFrame::new(
            vec!["careunit".into(), "cnt".into(), "gender".into()],
            vec![
                vec![json!("MICU"), json!(10), json!("M")],
                vec![json!("MICU"), json!(5), json!("F")],
            ],
        );
        let mut spec = ChartSpec::new("nested_pie");
        spec.x = Some("careunit".into());
        spec.y = Some("cnt".into());
        spec.group = Some("gender".into());
        let figure = generate_chart(&spec, &df).figure_json.unwrap();
        assert_eq!(figure["data"][0]["type"], "sunburst");
        let parents = figure["data"][0]["parents"].as_array().unwrap();
        assert!(parents.iter().any(|p| p == "MICU"));
    }
}
