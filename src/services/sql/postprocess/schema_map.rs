//! Schema alias mapping: informal table and column names rewritten to the
//! canonical MIMIC-IV identifiers, plus the column/table inventories the
//! later passes key on.

use crate::utils::sqltext::ci;

/// Informal table name -> canonical table.
pub const TABLE_ALIASES: &[(&str, &str)] = &[
    ("admissions_table", "ADMISSIONS"),
    ("anchors", "PATIENTS"),
    ("hospital_admissions", "ADMISSIONS"),
    ("icu_stays", "ICUSTAYS"),
    ("icustay_table", "ICUSTAYS"),
    ("icu_patients", "ICUSTAYS"),
    ("icu_patient", "ICUSTAYS"),
    ("icu_icustays", "ICUSTAYS"),
    ("icu_stay", "ICUSTAYS"),
    ("transfer_data", "TRANSFERS"),
    ("chart_events", "CHARTEVENTS"),
    ("chart_event", "CHARTEVENTS"),
    ("chart", "CHARTEVENTS"),
    ("chart_items", "D_ITEMS"),
    ("d_items", "D_ITEMS"),
    ("lab_events", "LABEVENTS"),
    ("lab_event", "LABEVENTS"),
    ("lab_event_table", "LABEVENTS"),
    ("labresults", "LABEVENTS"),
    ("lab_results", "LABEVENTS"),
    ("lab", "LABEVENTS"),
    ("lab_table", "LABEVENTS"),
    ("lab_items", "D_LABITEMS"),
    ("labitems", "D_LABITEMS"),
    ("d_labitems", "D_LABITEMS"),
    ("labevents", "LABEVENTS"),
    ("chartitems", "D_ITEMS"),
    ("diagnoses", "DIAGNOSES_ICD"),
    ("diagnosis", "DIAGNOSES_ICD"),
    ("diagnosis_table", "DIAGNOSES_ICD"),
    ("procedures", "PROCEDURES_ICD"),
    ("procedure_table", "PROCEDURES_ICD"),
    ("medical_procedures", "PROCEDURES_ICD"),
    ("prescription", "PRESCRIPTIONS"),
    ("medication_data", "PRESCRIPTIONS"),
    ("patient_admissions", "ADMISSIONS"),
    ("admission", "ADMISSIONS"),
    ("patient", "PATIENTS"),
    ("patient_table", "PATIENTS"),
    ("patients_table", "PATIENTS"),
    ("microbiology", "MICROBIOLOGYEVENTS"),
    ("microbiology_events", "MICROBIOLOGYEVENTS"),
    ("microbiology_event", "MICROBIOLOGYEVENTS"),
    ("microbiology_table", "MICROBIOLOGYEVENTS"),
    ("microbiology_results", "MICROBIOLOGYEVENTS"),
    ("micro_events", "MICROBIOLOGYEVENTS"),
    ("microbiology_tests", "MICROBIOLOGYEVENTS"),
    ("organisms_table", "MICROBIOLOGYEVENTS"),
    ("organism_table", "MICROBIOLOGYEVENTS"),
    ("organisms", "MICROBIOLOGYEVENTS"),
    ("antibiotics_usage", "MICROBIOLOGYEVENTS"),
    ("antibiotics", "MICROBIOLOGYEVENTS"),
    ("antibiotic", "MICROBIOLOGYEVENTS"),
    ("drugs", "PRESCRIPTIONS"),
    ("service_transitions", "SERVICES"),
    ("transitions", "SERVICES"),
    ("emar_details", "EMAR_DETAIL"),
    ("emar_events", "EMAR"),
    ("medication_records", "EMAR"),
    ("procedures_table", "PROCEDURES_ICD"),
    ("events", "CHARTEVENTS"),
    ("input_events", "INPUTEVENTS"),
    ("inputs", "INPUTEVENTS"),
    ("output_events", "OUTPUTEVENTS"),
    ("production_data", "OUTPUTEVENTS"),
];

/// Informal column name -> canonical column.
pub const COLUMN_ALIASES: &[(&str, &str)] = &[
    ("admission_date", "ADMITTIME"),
    ("admission_datetime", "ADMITTIME"),
    ("admission_location", "ADMISSION_LOCATION"),
    ("admission_time", "ADMITTIME"),
    ("admitted_date", "ADMITTIME"),
    ("admitted_time", "ADMITTIME"),
    ("admitted_datetime", "ADMITTIME"),
    ("admit_date", "ADMITTIME"),
    ("discharge_date", "DISCHTIME"),
    ("discharge_datetime", "DISCHTIME"),
    ("discharge_location", "DISCHARGE_LOCATION"),
    ("discharge_time", "DISCHTIME"),
    ("death_datetime", "DEATHTIME"),
    ("ed_registration_time", "EDREGTIME"),
    ("ed_reg_time", "EDREGTIME"),
    ("ed_arrival_time", "EDREGTIME"),
    ("ed_out_time", "EDOUTTIME"),
    ("ed_discharge_time", "EDOUTTIME"),
    ("ed_departure_time", "EDOUTTIME"),
    ("ed_departure_datetime", "EDOUTTIME"),
    ("admit_time", "ADMITTIME"),
    ("death_time", "DEATHTIME"),
    ("icu_stay_id", "STAY_ID"),
    ("icustay_id", "STAY_ID"),
    ("event_type", "EVENTTYPE"),
    ("warning_flag", "WARNING"),
    ("drug_name", "DRUG"),
    ("formulation", "FORM_RX"),
    ("medication_name", "MEDICATION"),
    ("medication_id", "MEDICATION"),
    ("event_text", "EVENT_TXT"),
    ("antibiotic_name", "AB_NAME"),
    ("organism", "ORG_NAME"),
    ("organism_name", "ORG_NAME"),
    ("test", "TEST_NAME"),
    ("test_name", "TEST_NAME"),
    ("specimen_type", "SPEC_TYPE_DESC"),
    ("diagnosis_code", "ICD_CODE"),
    ("procedure_code", "ICD_CODE"),
    ("diagnosis_id", "ICD_CODE"),
    ("procedure_id", "ICD_CODE"),
    ("proc_code", "ICD_CODE"),
    ("diagnosis_title", "LONG_TITLE"),
    ("procedure_title", "LONG_TITLE"),
    ("title", "LONG_TITLE"),
    ("insurance_id", "INSURANCE"),
    ("insurance_type", "INSURANCE"),
    ("insurance_provider", "INSURANCE"),
    ("primary_insurance", "INSURANCE"),
    ("admitting_location", "ADMISSION_LOCATION"),
    ("admit_location", "ADMISSION_LOCATION"),
    ("discharge_loc", "DISCHARGE_LOCATION"),
    ("ethnicity", "RACE"),
    ("dob", "ANCHOR_AGE"),
    ("birthdate", "ANCHOR_AGE"),
    ("primary_language", "LANGUAGE"),
    ("hospital_death_flag", "HOSPITAL_EXPIRE_FLAG"),
    ("expired_in_hospital", "HOSPITAL_EXPIRE_FLAG"),
    ("hospital_expire_flag", "HOSPITAL_EXPIRE_FLAG"),
    ("admission_type", "ADMISSION_TYPE"),
    ("admission_days", "ADMISSION_LENGTH"),
    ("icu_los", "LOS"),
    ("icu_admission_date", "INTIME"),
    ("icu_admission_time", "INTIME"),
    ("icu_discharge_date", "OUTTIME"),
    ("icu_discharge_time", "OUTTIME"),
    ("icu_in_time", "INTIME"),
    ("icu_out_time", "OUTTIME"),
    ("current_service", "CURR_SERVICE"),
    ("previous_service", "PREV_SERVICE"),
    ("service_transition", "CURR_SERVICE"),
    ("event_label", "LABEL"),
    ("item_label", "LABEL"),
    ("lab_item_label", "LABEL"),
    ("chart_item_label", "LABEL"),
    ("lab_item_id", "ITEMID"),
    ("lab_itemid", "ITEMID"),
    ("lab_category", "CATEGORY"),
    ("lab_fluid", "FLUID"),
    ("age", "ANCHOR_AGE"),
    ("age_years", "ANCHOR_AGE"),
    ("anchor_age_years", "ANCHOR_AGE"),
    ("patient_age", "ANCHOR_AGE"),
    ("sex", "GENDER"),
    ("patient_gender", "GENDER"),
    ("patient_sex", "GENDER"),
    ("date_of_death", "DOD"),
    ("death_date", "DOD"),
    ("anchor_year_range", "ANCHOR_YEAR_GROUP"),
    ("anchor_year_bin", "ANCHOR_YEAR_GROUP"),
    ("anchor_date", "ANCHOR_YEAR"),
    ("patient_id", "SUBJECT_ID"),
    ("admission_id", "HADM_ID"),
    ("hospital_admission_id", "HADM_ID"),
    ("event_time", "CHARTTIME"),
    ("chart_time", "CHARTTIME"),
    ("store_time", "STORETIME"),
    ("order_time", "ORDERTIME"),
    ("start_time", "STARTTIME"),
    ("stop_time", "STOPTIME"),
    ("end_time", "ENDTIME"),
    ("transfer_time", "TRANSFERTIME"),
    ("transfer_start_date", "INTIME"),
    ("transfer_end_date", "OUTTIME"),
    ("transfer_start", "INTIME"),
    ("transfer_end", "OUTTIME"),
    ("duration", "DURATION_DAYS"),
    ("service_id", "CURR_SERVICE"),
    ("service_transition_id", "CURR_SERVICE"),
    ("care_unit", "CAREUNIT"),
    ("first_care_unit", "FIRST_CAREUNIT"),
    ("last_care_unit", "LAST_CAREUNIT"),
    ("stay_id", "STAY_ID"),
    ("hadm_id", "HADM_ID"),
    ("subject_id", "SUBJECT_ID"),
    ("lab_specimen_id", "SPECIMEN_ID"),
    ("value_num", "VALUENUM"),
    ("numeric_value", "VALUENUM"),
    ("numericvalue", "VALUENUM"),
    ("result_value", "VALUE"),
    ("result_value_num", "VALUENUM"),
    ("lab_value", "VALUE"),
    ("value_uom", "VALUEUOM"),
    ("value_unit", "VALUEUOM"),
    ("lab_value_unit", "VALUEUOM"),
    ("lab_flag", "FLAG"),
    ("reference_range_low", "REF_RANGE_LOWER"),
    ("reference_range_high", "REF_RANGE_UPPER"),
    ("abnormal_flag", "FLAG"),
    ("lab_priority", "PRIORITY"),
    ("lab_comment", "COMMENTS"),
    ("lab_comments", "COMMENTS"),
    ("doses_per_day", "DOSES_PER_24_HRS"),
    ("output_value", "VALUE"),
    ("micro_specimen_id", "MICRO_SPECIMEN_ID"),
    ("micro_event_id", "MICROEVENT_ID"),
    ("specimen_item_id", "SPEC_ITEMID"),
    ("specimen_type_desc", "SPEC_TYPE_DESC"),
    ("test_item_id", "TEST_ITEMID"),
    ("organism_item_id", "ORG_ITEMID"),
    ("antibiotic_item_id", "AB_ITEMID"),
];

pub const PATIENTS_ONLY_COLS: &[&str] =
    &["GENDER", "ANCHOR_AGE", "ANCHOR_YEAR", "ANCHOR_YEAR_GROUP", "DOD"];

pub const ADMISSIONS_ONLY_COLS: &[&str] = &[
    "ADMISSION_TYPE",
    "ADMISSION_LOCATION",
    "DISCHARGE_LOCATION",
    "INSURANCE",
    "MARITAL_STATUS",
    "RACE",
    "EDREGTIME",
    "EDOUTTIME",
    "HOSPITAL_EXPIRE_FLAG",
    "ADMITTIME",
    "DISCHTIME",
];

pub const TABLES_WITH_SUBJECT_ID: &[&str] = &[
    "ADMISSIONS",
    "ICUSTAYS",
    "CHARTEVENTS",
    "DATETIMEEVENTS",
    "LABEVENTS",
    "MICROBIOLOGYEVENTS",
    "PRESCRIPTIONS",
    "DIAGNOSES_ICD",
    "PROCEDURES_ICD",
    "SERVICES",
    "TRANSFERS",
    "PATIENTS",
    "EMAR",
    "EMAR_DETAIL",
    "INPUTEVENTS",
    "OUTPUTEVENTS",
    "INGREDIENTEVENTS",
    "PROCEDUREEVENTS",
    "POE",
];

pub const TABLES_WITH_HADM_ID: &[&str] = &[
    "ADMISSIONS",
    "ICUSTAYS",
    "CHARTEVENTS",
    "DATETIMEEVENTS",
    "LABEVENTS",
    "MICROBIOLOGYEVENTS",
    "PRESCRIPTIONS",
    "DIAGNOSES_ICD",
    "PROCEDURES_ICD",
    "SERVICES",
    "TRANSFERS",
    "EMAR",
    "EMAR_DETAIL",
    "INPUTEVENTS",
    "OUTPUTEVENTS",
    "INGREDIENTEVENTS",
    "PROCEDUREEVENTS",
    "POE",
];

pub const MICRO_ONLY_COLS: &[&str] = &[
    "MICRO_SPECIMEN_ID",
    "MICROEVENT_ID",
    "SPEC_ITEMID",
    "SPEC_TYPE_DESC",
    "TEST_ITEMID",
    "TEST_NAME",
    "ORG_ITEMID",
    "ORG_NAME",
    "AB_ITEMID",
    "AB_NAME",
    "ISOLATE_NUM",
    "QUANTITY",
    "DILUTION_TEXT",
    "DILUTION_COMPARISON",
    "DILUTION_VALUE",
    "INTERPRETATION",
];

pub const TIMESTAMP_COLS: &[&str] = &[
    "ADMITTIME",
    "DISCHTIME",
    "DEATHTIME",
    "EDREGTIME",
    "EDOUTTIME",
    "INTIME",
    "OUTTIME",
    "STARTTIME",
    "STOPTIME",
    "ENDTIME",
    "CHARTTIME",
    "STORETIME",
    "TRANSFERTIME",
    "CHARTDATE",
];

pub const HEAVY_TABLES: &[&str] = &[
    "LABEVENTS",
    "CHARTEVENTS",
    "MICROBIOLOGYEVENTS",
    "INPUTEVENTS",
    "OUTPUTEVENTS",
    "EMAR",
    "PRESCRIPTIONS",
];

pub fn is_timestamp_col(name: &str) -> bool {
    TIMESTAMP_COLS.contains(&name.to_uppercase().as_str())
}

/// Rewrite every known table/column alias to its canonical identifier, on
/// identifier boundaries only. Replacements already in canonical form do not
/// fire, which keeps the pass idempotent.
pub fn apply_schema_mappings(sql: &str) -> (String, Vec<String>) {
    let mut rules = Vec::new();
    let mut text = sql.to_string();

    for (src, dest) in TABLE_ALIASES {
        let pattern = ci(&format!(r"\b{}\b", regex::escape(src)));
        let replaced = pattern.replace_all(&text, *dest).into_owned();
        if replaced != text {
            text = replaced;
            rules.push(format!("table:{}->{}", src, dest));
        }
    }
    for (src, dest) in COLUMN_ALIASES {
        let pattern = ci(&format!(r"\b{}\b", regex::escape(src)));
        let replaced = pattern.replace_all(&text, *dest).into_owned();
        if replaced != text {
            text = replaced;
            rules.push(format!("column:{}->{}", src, dest));
        }
    }

    (text, rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_and_column_aliases_rewrite() {
        let (sql, rules) =
            apply_schema_mappings("SELECT patient_id, sex FROM hospital_admissions");
        assert_eq!(sql, "SELECT SUBJECT_ID, GENDER FROM ADMISSIONS");
        assert!(rules.iter().any(|r| r == "table:hospital_admissions->ADMISSIONS"));
        assert!(rules.iter().any(|r| r == "column:sex->GENDER"));
    }

    #[test]
    fn canonical_names_are_untouched() {
        let (sql, rules) = apply_schema_mappings("SELECT SUBJECT_ID FROM ADMISSIONS");
        assert_eq!(sql, "SELECT SUBJECT_ID FROM ADMISSIONS");
        assert!(rules.is_empty());
    }

    #[test]
    fn aliases_do_not_fire_inside_longer_identifiers() {
        // "chart" must not rewrite inside "chartevents_backup".
        let (sql, _) = apply_schema_mappings("SELECT 1 FROM chartevents_backup");
        assert_eq!(sql, "SELECT 1 FROM chartevents_backup");
    }
}
