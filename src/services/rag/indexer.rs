//! Builds RAG documents from the metadata corpora and upserts them into the
//! vector index. Document ids are derived from the source record so a
//! reindex replaces rather than duplicates.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::models::rag::{DocMetadata, DocType, RagDocument};
use crate::services::metadata::{
    load_jsonl_objects, ColumnValueStore, SchemaCatalogStore,
};
use crate::services::vector_store::VectorIndex;

pub struct Indexer {
    index: Arc<dyn VectorIndex>,
    schema_catalog: Arc<SchemaCatalogStore>,
    column_values: Arc<ColumnValueStore>,
}

fn field(map: &serde_json::Map<String, serde_json::Value>, keys: &[&str]) -> String {
    for key in keys {
        if let Some(value) = map.get(*key).and_then(|v| v.as_str()) {
            let value = value.trim();
            if !value.is_empty() {
                return value.to_string();
            }
        }
    }
    String::new()
}

fn list_field(map: &serde_json::Map<String, serde_json::Value>, keys: &[&str]) -> Vec<String> {
    for key in keys {
        if let Some(items) = map.get(*key).and_then(|v| v.as_array()) {
            let values: Vec<String> = items
                .iter()
                .filter_map(|item| item.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !values.is_empty() {
                return values;
            }
        }
    }
    Vec::new()
}

impl Indexer {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        schema_catalog: Arc<SchemaCatalogStore>,
        column_values: Arc<ColumnValueStore>,
    ) -> Self {
        Self { index, schema_catalog, column_values }
    }

    fn schema_docs(&self) -> Vec<RagDocument> {
        let catalog = self.schema_catalog.load();
        catalog
            .tables
            .iter()
            .map(|(name, table)| {
                let mut meta = DocMetadata::of(DocType::Schema);
                meta.table = Some(name.clone());
                RagDocument {
                    id: format!("schema::{}", name),
                    text: SchemaCatalogStore::table_text(name, table),
                    metadata: meta,
                }
            })
            .collect()
    }

    fn glossary_docs(path: &Path) -> Vec<RagDocument> {
        load_jsonl_objects(path)
            .into_iter()
            .enumerate()
            .map(|(idx, item)| {
                let term = field(&item, &["term", "key", "name"]);
                let desc = field(&item, &["desc", "definition", "value"]);
                let mut meta = DocMetadata::of(DocType::Glossary);
                meta.term = Some(term.clone());
                RagDocument {
                    id: format!("glossary::{}", idx),
                    text: format!("Glossary: {} = {}", term, desc).trim().to_string(),
                    metadata: meta,
                }
            })
            .collect()
    }

    fn example_docs(path: &Path) -> Vec<RagDocument> {
        load_jsonl_objects(path)
            .into_iter()
            .enumerate()
            .map(|(idx, item)| {
                let question = field(&item, &["question"]);
                let sql = field(&item, &["sql"]);
                RagDocument {
                    id: format!("example::{}", idx),
                    text: format!("Question: {}\nSQL: {}", question, sql).trim().to_string(),
                    metadata: DocMetadata::of(DocType::Example),
                }
            })
            .collect()
    }

    fn template_docs(path: &Path, kind: &str, offset: usize) -> Vec<RagDocument> {
        load_jsonl_objects(path)
            .into_iter()
            .enumerate()
            .map(|(idx, item)| {
                let name = {
                    let name = field(&item, &["name"]);
                    if name.is_empty() { format!("template_{}", offset + idx) } else { name }
                };
                let sql = field(&item, &["sql"]);
                let mut meta = DocMetadata::of(DocType::Template);
                meta.name = Some(name.clone());
                meta.kind = Some(kind.to_string());
                RagDocument {
                    id: format!("template::{}::{}", kind, idx),
                    text: format!("Template: {}\nSQL: {}", name, sql).trim().to_string(),
                    metadata: meta,
                }
            })
            .collect()
    }

    fn concept_map_docs(path: &Path, doc_type: DocType, label: &str, table: &str) -> Vec<RagDocument> {
        load_jsonl_objects(path)
            .into_iter()
            .enumerate()
            .filter_map(|(idx, item)| {
                let term = field(&item, &["term"]);
                if term.is_empty() {
                    return None;
                }
                let aliases = list_field(&item, &["aliases"]);
                let prefixes: Vec<String> = list_field(&item, &["icd_prefixes", "prefixes"])
                    .into_iter()
                    .map(|p| p.to_uppercase())
                    .collect();
                if prefixes.is_empty() {
                    return None;
                }
                let alias_text = if aliases.is_empty() { "-".to_string() } else { aliases.join(", ") };
                let prefix_text = prefixes
                    .iter()
                    .map(|prefix| format!("{}%", prefix))
                    .collect::<Vec<_>>()
                    .join(", ");
                let text = format!(
                    "{} mapping: {}. Aliases: {}. ICD_CODE prefixes: {}. \
                     Use {}.ICD_CODE LIKE '<prefix>%'. \
                     If prefixes mix alphabetic and numeric forms, pair with ICD_VERSION \
                     (10 for alphabetic prefixes, 9 for numeric prefixes).",
                    label, term, alias_text, prefix_text, table
                );
                let mut meta = DocMetadata::of(doc_type);
                meta.term = Some(term);
                Some(RagDocument { id: format!("{}::{}", doc_type.as_str(), idx), text, metadata: meta })
            })
            .collect()
    }

    fn label_intent_docs(path: &Path) -> Vec<RagDocument> {
        load_jsonl_objects(path)
            .into_iter()
            .enumerate()
            .filter_map(|(idx, item)| {
                let name = {
                    let name = field(&item, &["name", "id"]);
                    if name.is_empty() { format!("label_intent_{}", idx) } else { name }
                };
                let table = {
                    let table = field(&item, &["table"]).to_uppercase();
                    if table.is_empty() { "D_ITEMS".to_string() } else { table }
                };
                let event_table = {
                    let table = field(&item, &["event_table"]).to_uppercase();
                    if table.is_empty() { "PROCEDUREEVENTS".to_string() } else { table }
                };
                let question_any = list_field(&item, &["question_any"]);
                let anchor_terms: Vec<String> = list_field(&item, &["anchor_terms"])
                    .into_iter()
                    .map(|t| t.to_uppercase())
                    .collect();
                if anchor_terms.is_empty() {
                    return None;
                }
                let required: Vec<String> = list_field(&item, &["required_terms_with_anchor"])
                    .into_iter()
                    .map(|t| t.to_uppercase())
                    .collect();
                let exclude: Vec<String> = list_field(&item, &["exclude_terms_with_anchor"])
                    .into_iter()
                    .map(|t| t.to_uppercase())
                    .collect();
                let text = format!(
                    "Label intent profile: {}. Question cues: {}. \
                     Use {} joined with {} for LABEL-based filtering. \
                     Anchor LABEL keywords: {}. Required-with-anchor keywords: {}. Exclude keywords: {}.",
                    name,
                    if question_any.is_empty() { "-".to_string() } else { question_any.join(", ") },
                    event_table,
                    table,
                    anchor_terms.join(", "),
                    if required.is_empty() { "-".to_string() } else { required.join(", ") },
                    if exclude.is_empty() { "-".to_string() } else { exclude.join(", ") },
                );
                let mut meta = DocMetadata::of(DocType::LabelIntent);
                meta.name = Some(name);
                meta.table = Some(table);
                meta.event_table = Some(event_table);
                Some(RagDocument { id: format!("label_intent::{}", idx), text, metadata: meta })
            })
            .collect()
    }

    fn column_value_docs(&self) -> Vec<RagDocument> {
        self.column_values
            .load()
            .iter()
            .enumerate()
            .map(|(idx, row)| {
                let text = if row.description.is_empty() {
                    format!(
                        "Column value hint: {}.{} includes '{}'. \
                         Prefer exact value filtering when this concept appears in user intent.",
                        row.table, row.column, row.value
                    )
                } else {
                    format!(
                        "Column value hint: {}.{} includes '{}'. Meaning: {}. \
                         Prefer exact value filtering when this concept appears in user intent.",
                        row.table, row.column, row.value, row.description
                    )
                };
                let mut meta = DocMetadata::of(DocType::ColumnValue);
                meta.table = Some(row.table.clone());
                meta.column = Some(row.column.clone());
                meta.value = Some(row.value.clone());
                meta.sheet = if row.sheet.is_empty() { None } else { Some(row.sheet.clone()) };
                RagDocument { id: format!("column_value::{}", idx), text, metadata: meta }
            })
            .collect()
    }

    /// Rebuild the whole index from the metadata directory. Returns per-corpus
    /// document counts.
    pub fn reindex(&self, metadata_dir: &str) -> BTreeMap<String, usize> {
        let base = Path::new(metadata_dir);
        let schema_docs = self.schema_docs();
        let glossary_docs = Self::glossary_docs(&base.join("glossary_docs.jsonl"));
        let diagnosis_docs = Self::concept_map_docs(
            &base.join("diagnosis_icd_map.jsonl"),
            DocType::DiagnosisMap,
            "Diagnosis",
            "DIAGNOSES_ICD",
        );
        let procedure_docs = Self::concept_map_docs(
            &base.join("procedure_icd_map.jsonl"),
            DocType::ProcedureMap,
            "Procedure",
            "PROCEDURES_ICD",
        );
        let label_docs = Self::label_intent_docs(&base.join("label_intent_profiles.jsonl"));
        let column_docs = self.column_value_docs();
        let example_docs = Self::example_docs(&base.join("sql_examples.jsonl"));
        let join_templates = Self::template_docs(&base.join("join_templates.jsonl"), "join", 0);
        let sql_templates =
            Self::template_docs(&base.join("sql_templates.jsonl"), "sql", join_templates.len());

        let mut counts = BTreeMap::new();
        counts.insert("schema_docs".to_string(), schema_docs.len());
        counts.insert("glossary_docs".to_string(), glossary_docs.len());
        counts.insert("diagnosis_map_docs".to_string(), diagnosis_docs.len());
        counts.insert("procedure_map_docs".to_string(), procedure_docs.len());
        counts.insert("label_intent_docs".to_string(), label_docs.len());
        counts.insert("column_value_docs".to_string(), column_docs.len());
        counts.insert("sql_examples_docs".to_string(), example_docs.len());
        counts.insert(
            "template_docs".to_string(),
            join_templates.len() + sql_templates.len(),
        );

        let mut docs = Vec::new();
        docs.extend(schema_docs);
        docs.extend(glossary_docs);
        docs.extend(diagnosis_docs);
        docs.extend(procedure_docs);
        docs.extend(label_docs);
        docs.extend(column_docs);
        docs.extend(example_docs);
        docs.extend(join_templates);
        docs.extend(sql_templates);

        self.index.upsert(&docs);
        tracing::info!("Reindexed {} RAG documents from {}", docs.len(), metadata_dir);
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::embedding::HashedEmbedder;
    use crate::services::vector_store::SimpleVectorStore;
    use std::io::Write;

    #[test]
    fn reindex_builds_typed_docs_with_stable_ids() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("schema_catalog.json"),
            r#"{"tables": {"PATIENTS": {"columns": [{"name": "SUBJECT_ID", "type": "NUMBER"}], "primary_keys": ["SUBJECT_ID"]}}}"#,
        )
        .unwrap();
        let mut file = std::fs::File::create(dir.path().join("sql_examples.jsonl")).unwrap();
        writeln!(file, r#"{{"question": "patient count", "sql": "SELECT COUNT(*) FROM PATIENTS WHERE ROWNUM <= 10"}}"#).unwrap();

        let store = Arc::new(SimpleVectorStore::new(
            dir.path().join("rag/simple_store.json"),
            Arc::new(HashedEmbedder::new(64)),
        ));
        let indexer = Indexer::new(
            store.clone(),
            Arc::new(SchemaCatalogStore::new(dir.path().join("schema_catalog.json"))),
            Arc::new(ColumnValueStore::new(dir.path().join("column_value_docs.jsonl"))),
        );
        let counts = indexer.reindex(dir.path().to_str().unwrap());
        assert_eq!(counts["schema_docs"], 1);
        assert_eq!(counts["sql_examples_docs"], 1);

        // Re-running replaces by id rather than duplicating.
        indexer.reindex(dir.path().to_str().unwrap());
        assert_eq!(store.len(), 2);
    }
}
