//! Signal map for the PDF cohort compiler: cohort-step types and clinical
//! signals mapped to their SQL templates, merged with an optional metadata
//! file that contributes item-level signals and synonyms.

use std::collections::BTreeMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

static NORMALIZE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Lowercase, punctuation-collapsed signal key.
pub fn normalize_signal_name(value: &str) -> String {
    let lowered = value.trim().to_lowercase();
    NORMALIZE_RE.replace_all(&lowered, "_").trim_matches('_').to_string()
}

/// Template parameters substituted into a signal SQL template.
#[derive(Debug, Clone, Default)]
pub struct SignalParams {
    pub min: f64,
    pub max: f64,
    pub operator: String,
    pub value: f64,
    pub min_los: f64,
    pub drug: String,
    pub gender: String,
    pub codes: String,
}

impl SignalParams {
    pub fn defaults() -> Self {
        Self {
            min: 0.0,
            max: 150.0,
            operator: "=".to_string(),
            value: 0.0,
            min_los: 0.0,
            drug: String::new(),
            gender: "all".to_string(),
            codes: "''".to_string(),
        }
    }
}

fn fmt_num(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Substitute `{placeholder}` parameters into a template.
pub fn render_template(template: &str, params: &SignalParams) -> String {
    template
        .replace("{min}", &fmt_num(params.min))
        .replace("{max}", &fmt_num(params.max))
        .replace("{operator}", &params.operator)
        .replace("{value}", &fmt_num(params.value))
        .replace("{min_los}", &fmt_num(params.min_los))
        .replace("{drug}", &params.drug)
        .replace("{gender}", &params.gender)
        .replace("{codes}", &params.codes)
}

const SIGNAL_NAME_ALIASES: &[(&str, &str)] = &[
    ("temp", "body_temperature"),
    ("temperature", "body_temperature"),
    ("body_temp", "body_temperature"),
    ("bodytemperature", "body_temperature"),
    ("bun_level", "bun"),
    ("blood_urea_nitrogen", "bun"),
    ("blood_urea_nitrogen_level", "bun"),
    ("urea_nitrogen", "bun"),
    ("serum_bun", "bun"),
    ("cr", "creatinine"),
    ("creat", "creatinine"),
    ("serum_creatinine", "creatinine"),
    ("po2", "pao2"),
    ("pa_o2", "pao2"),
    ("partial_pressure_o2", "pao2"),
    ("arterial_o2_tension", "pao2"),
    ("blood_ph", "ph"),
    ("arterial_ph", "ph"),
    ("ph_value", "ph"),
    ("anion_gap_level", "anion_gap"),
    ("uop", "urine_output"),
    ("uo", "urine_output"),
    ("urine", "urine_output"),
    ("urine_out", "urine_output"),
    ("urine_volume", "urine_output"),
    ("sex", "gender"),
    ("hospital_length_of_stay", "hospital_los"),
    ("length_of_hospital_stay", "hospital_los"),
    ("hospital_los_days", "hospital_los"),
    ("hosp_los", "hospital_los"),
    ("icu_length_of_stay", "icu_los"),
    ("length_of_icu_stay", "icu_los"),
    ("icu_stay_length", "icu_los"),
    ("icu_los_days", "icu_los"),
    ("in_hospital_death", "in_hospital_mortality"),
    ("inhospital_mortality", "in_hospital_mortality"),
    ("hospital_expire_flag", "in_hospital_mortality"),
];

fn default_core_signals() -> BTreeMap<String, String> {
    let entries: &[(&str, &str)] = &[
        ("age", "SELECT a.hadm_id FROM SSO.PATIENTS p JOIN SSO.ADMISSIONS a ON p.subject_id = a.subject_id WHERE p.anchor_age >= {min} AND p.anchor_age <= {max}"),
        ("gender", "SELECT a.hadm_id FROM SSO.PATIENTS p JOIN SSO.ADMISSIONS a ON p.subject_id = a.subject_id WHERE p.gender = '{gender}'"),
        ("sex", "SELECT a.hadm_id FROM SSO.PATIENTS p JOIN SSO.ADMISSIONS a ON p.subject_id = a.subject_id WHERE p.gender = '{gender}'"),
        ("diagnosis", "SELECT HADM_ID FROM SSO.DIAGNOSES_ICD WHERE trim(icd_code) IN ({codes})"),
        ("icu_stay", "SELECT stay_id, hadm_id, intime as charttime FROM SSO.ICUSTAYS WHERE los >= {min_los}"),
        ("prescription", "SELECT hadm_id, starttime as charttime FROM SSO.PRESCRIPTIONS WHERE lower(drug) LIKE '%{drug}%'"),
        ("sofa", "SELECT stay_id, charttime FROM SSO.CHARTEVENTS WHERE (itemid IN (220052, 220181, 225312) AND valuenum < 65) OR (itemid IN (223900, 223901) AND valuenum < 15)"),
        ("rox", "SELECT stay_id, charttime FROM SSO.CHARTEVENTS WHERE (itemid IN (220277) AND valuenum < 90) OR (itemid IN (220210, 224690) AND valuenum > 25)"),
        ("oasis", "SELECT stay_id, charttime FROM SSO.CHARTEVENTS WHERE itemid IN (223900, 223901) AND valuenum < 13"),
        ("fio2", "SELECT stay_id, charttime FROM SSO.CHARTEVENTS WHERE itemid IN (223835) AND (CASE WHEN valuenum > 1 AND valuenum <= 100 THEN valuenum/100 WHEN valuenum > 0 AND valuenum <= 1 THEN valuenum ELSE NULL END) {operator} {value}"),
        ("body_temperature", "SELECT stay_id, charttime FROM SSO.CHARTEVENTS WHERE itemid IN (223761, 223762) AND valuenum {operator} {value} AND valuenum IS NOT NULL"),
        ("bun", "SELECT hadm_id, charttime FROM SSO.LABEVENTS WHERE itemid IN (51006) AND valuenum {operator} {value} AND valuenum IS NOT NULL"),
        ("creatinine", "SELECT hadm_id, charttime FROM SSO.LABEVENTS WHERE itemid IN (50912) AND valuenum {operator} {value} AND valuenum IS NOT NULL"),
        ("pao2", "SELECT hadm_id, charttime FROM SSO.LABEVENTS WHERE itemid IN (50821) AND valuenum {operator} {value} AND valuenum IS NOT NULL"),
        ("ph", "SELECT hadm_id, charttime FROM SSO.LABEVENTS WHERE itemid IN (50820) AND valuenum {operator} {value} AND valuenum IS NOT NULL"),
        ("anion_gap", "SELECT hadm_id, charttime FROM SSO.LABEVENTS WHERE itemid IN (50868) AND valuenum {operator} {value} AND valuenum IS NOT NULL"),
        ("urine_output", "SELECT stay_id, charttime FROM SSO.OUTPUTEVENTS WHERE itemid IN (226559, 226560, 226561, 226563, 226564, 226565, 226567, 226557, 226558, 226584, 227488) AND value {operator} {value}"),
    ];
    entries.iter().map(|(name, sql)| (name.to_string(), sql.to_string())).collect()
}

/// Time-window predicates a step may request. Applied only when the signal
/// SQL projects a charttime.
pub const WINDOW_TEMPLATES: &[(&str, &str)] = &[
    ("icu_first_24h", "s.charttime BETWEEN p.intime AND p.intime + INTERVAL '24' HOUR"),
    ("admission_first_24h", "s.charttime BETWEEN p.admittime AND p.admittime + INTERVAL '24' HOUR"),
    ("icu_discharge_last_24h", "s.charttime BETWEEN p.outtime - INTERVAL '24' HOUR AND p.outtime"),
];

pub fn window_template(key: &str) -> Option<&'static str> {
    WINDOW_TEMPLATES
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, template)| *template)
}

pub struct SignalMap {
    map: BTreeMap<String, String>,
}

impl SignalMap {
    /// Core signals plus alias keys.
    pub fn with_defaults() -> Self {
        let mut map = default_core_signals();
        for (alias, canonical) in SIGNAL_NAME_ALIASES {
            if let Some(sql) = map.get(*canonical).cloned() {
                map.entry(alias.to_string()).or_insert(sql);
            }
        }
        Self { map }
    }

    /// Merge item-level signals from a metadata file: entries of
    /// `{signal_name, synonyms, mapping: {itemid, target_table}}` become
    /// CHARTEVENTS / LABEVENTS templates. Core signals are never overwritten.
    pub fn merge_metadata_file(&mut self, path: &Path) {
        let Ok(raw) = std::fs::read_to_string(path) else {
            tracing::warn!("Signal metadata file {} missing; defaults only", path.display());
            return;
        };
        let Ok(serde_json::Value::Array(items)) = serde_json::from_str::<serde_json::Value>(&raw)
        else {
            tracing::warn!("Signal metadata file {} unusable; defaults only", path.display());
            return;
        };
        for item in items {
            let name = normalize_signal_name(
                item.get("signal_name").and_then(serde_json::Value::as_str).unwrap_or(""),
            );
            if name.is_empty() {
                continue;
            }
            let mapping = item.get("mapping");
            let itemid = mapping
                .and_then(|m| m.get("itemid"))
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_default();
            let table = mapping
                .and_then(|m| m.get("target_table"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or("")
                .to_uppercase();
            if itemid.is_empty() || table.is_empty() {
                continue;
            }
            let sql = match table.as_str() {
                "CHARTEVENTS" => format!(
                    "SELECT stay_id, charttime FROM SSO.CHARTEVENTS WHERE itemid IN ({}) AND valuenum {{operator}} {{value}} AND valuenum IS NOT NULL",
                    itemid
                ),
                "LABEVENTS" => format!(
                    "SELECT hadm_id, charttime FROM SSO.LABEVENTS WHERE itemid IN ({}) AND valuenum {{operator}} {{value}} AND valuenum IS NOT NULL",
                    itemid
                ),
                _ => continue,
            };
            self.map.entry(name).or_insert_with(|| sql.clone());
            if let Some(serde_json::Value::Array(synonyms)) = item.get("synonyms") {
                for synonym in synonyms {
                    let key = normalize_signal_name(
                        synonym.as_str().unwrap_or(""),
                    );
                    if !key.is_empty() {
                        self.map.entry(key).or_insert_with(|| sql.clone());
                    }
                }
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(&normalize_signal_name(name)).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_resolve_to_canonical_templates() {
        let map = SignalMap::with_defaults();
        assert_eq!(map.get("temp"), map.get("body_temperature"));
        assert_eq!(map.get("Serum Creatinine"), map.get("creatinine"));
    }

    #[test]
    fn template_renders_operator_and_value() {
        let map = SignalMap::with_defaults();
        let mut params = SignalParams::defaults();
        params.operator = "<".to_string();
        params.value = 7.25;
        let sql = render_template(map.get("ph").unwrap(), &params);
        assert!(sql.contains("valuenum < 7.25"));
    }

    #[test]
    fn metadata_file_adds_synonyms_without_overriding_core() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mimic_rag_metadata_full.json");
        std::fs::write(
            &path,
            r#"[{"signal_name": "Lactate", "synonyms": ["serum lactate"],
                 "mapping": {"itemid": 50813, "target_table": "LABEVENTS"}},
                {"signal_name": "creatinine", "synonyms": [],
                 "mapping": {"itemid": 99999, "target_table": "LABEVENTS"}}]"#,
        )
        .unwrap();
        let mut map = SignalMap::with_defaults();
        map.merge_metadata_file(&path);
        assert!(map.get("lactate").unwrap().contains("50813"));
        assert!(map.get("serum_lactate").unwrap().contains("50813"));
        // Core creatinine keeps its itemid.
        assert!(map.get("creatinine").unwrap().contains("50912"));
    }
}
