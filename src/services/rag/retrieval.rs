//! Hybrid retrieval: dense similarity + BM25 + lexical-overlap rerank, with
//! concept-intent routing and per-type hit filtering.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::RagConfig;
use crate::models::rag::{CandidateContext, DocMetadata, DocType, ScoredDocument};
use crate::services::metadata::{
    ColumnValueStore, ConceptMapStore, LabelIntentStore, SchemaCatalogStore, SettingsStore,
};
use crate::services::vector_store::VectorIndex;

use super::bm25;
use super::context::trim_context_to_budget;
use super::tokenize::lexical_overlap;

/// Which specialized corpora the question should consult.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchIntent {
    pub diagnosis: bool,
    pub procedure: bool,
    pub column_value: bool,
    pub label_intent: bool,
}

const DIAGNOSIS_TOKENS: &[&str] =
    &["diagnosis", "diagnos", "disease", "icd", "질환", "진단", "병명", "코드"];
const PROCEDURE_TOKENS: &[&str] = &[
    "procedure", "surgery", "surgical", "operation", "post-op", "postop", "cabg", "pci", "수술",
    "시술",
];
const COLUMN_VALUE_TOKENS: &[&str] = &[
    "admission type", "admission_type", "status", "category", "type", "value", "gender", "유형",
    "종류", "구분", "값", "성별", "입원유형", "입원 유형",
];
const LABEL_INTENT_TOKENS: &[&str] = &[
    "catheter", "dialysis", "hemodialysis", "device", "insert", "insertion", "placement", "카테터",
    "투석", "혈액투석", "장치", "삽입", "거치",
];

fn has_token(question: &str, tokens: &[&str]) -> bool {
    let lowered = question.to_lowercase();
    let compact: String = lowered.chars().filter(|ch| !ch.is_whitespace()).collect();
    tokens.iter().any(|token| lowered.contains(token) || compact.contains(token))
}

pub fn detect_search_intent(question: &str) -> SearchIntent {
    SearchIntent {
        diagnosis: has_token(question, DIAGNOSIS_TOKENS),
        procedure: has_token(question, PROCEDURE_TOKENS),
        column_value: has_token(question, COLUMN_VALUE_TOKENS),
        label_intent: has_token(question, LABEL_INTENT_TOKENS),
    }
}

struct HitFilter<'a> {
    max_items: usize,
    min_abs_score: f64,
    relative_ratio: Option<f64>,
    query: &'a str,
    min_lexical_overlap: f64,
    allow_fallback: bool,
}

fn filter_hits(hits: Vec<ScoredDocument>, filter: &HitFilter) -> Vec<ScoredDocument> {
    if hits.is_empty() || filter.max_items == 0 {
        return Vec::new();
    }
    let mut ranked = hits;
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    let top = ranked[0].score;
    let mut threshold = filter.min_abs_score;
    if let Some(ratio) = filter.relative_ratio {
        if top > 0.0 {
            threshold = threshold.max(top * ratio);
        }
    }
    let mut filtered: Vec<ScoredDocument> =
        ranked.iter().filter(|hit| hit.score >= threshold).cloned().collect();
    if !filter.query.is_empty() && filter.min_lexical_overlap > 0.0 {
        filtered.retain(|hit| {
            lexical_overlap(filter.query, &hit.text) >= filter.min_lexical_overlap
        });
    }
    if filtered.is_empty() {
        if filter.allow_fallback {
            filtered = ranked.into_iter().take(1).collect();
        } else {
            return Vec::new();
        }
    }
    filtered.truncate(filter.max_items);
    filtered
}

/// Merge hit lists by id, keeping the best score per id, then rank.
fn merge_hits(hit_lists: Vec<Vec<ScoredDocument>>, k: usize) -> Vec<ScoredDocument> {
    let mut combined: HashMap<String, (usize, ScoredDocument)> = HashMap::new();
    let mut order = 0usize;
    for hits in hit_lists {
        for hit in hits {
            match combined.entry(hit.id.clone()) {
                std::collections::hash_map::Entry::Occupied(mut entry) => {
                    if hit.score > entry.get().1.score {
                        let first_order = entry.get().0;
                        entry.insert((first_order, hit));
                    }
                },
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert((order, hit));
                },
            }
            order += 1;
        }
    }
    let mut merged: Vec<(usize, ScoredDocument)> = combined.into_values().collect();
    merged.sort_by(|a, b| {
        b.1.score
            .partial_cmp(&a.1.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    merged.into_iter().take(k).map(|(_, hit)| hit).collect()
}

fn normalize_scores(scores: &HashMap<String, f64>) -> HashMap<String, f64> {
    let max = scores.values().cloned().fold(0.0f64, f64::max);
    if max <= 0.0 {
        return scores.keys().map(|key| (key.clone(), 0.0)).collect();
    }
    scores.iter().map(|(key, value)| (key.clone(), value / max)).collect()
}

pub struct Retriever {
    config: RagConfig,
    index: Arc<dyn VectorIndex>,
    diagnosis_map: Arc<ConceptMapStore>,
    procedure_map: Arc<ConceptMapStore>,
    column_values: Arc<ColumnValueStore>,
    label_intents: Arc<LabelIntentStore>,
    schema_catalog: Arc<SchemaCatalogStore>,
    settings: SettingsStore,
}

impl Retriever {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: RagConfig,
        index: Arc<dyn VectorIndex>,
        diagnosis_map: Arc<ConceptMapStore>,
        procedure_map: Arc<ConceptMapStore>,
        column_values: Arc<ColumnValueStore>,
        label_intents: Arc<LabelIntentStore>,
        schema_catalog: Arc<SchemaCatalogStore>,
        settings: SettingsStore,
    ) -> Self {
        Self {
            config,
            index,
            diagnosis_map,
            procedure_map,
            column_values,
            label_intents,
            schema_catalog,
            settings,
        }
    }

    /// Dense + BM25 + overlap rerank over one typed corpus.
    pub fn hybrid_search(&self, query: &str, k: usize, doc_type: DocType) -> Vec<ScoredDocument> {
        if k == 0 {
            return Vec::new();
        }
        if !self.config.hybrid_enabled {
            return self.index.search(query, k, Some(doc_type));
        }

        let candidate_k = k.max(self.config.hybrid_candidates.max(k));
        let vector_hits = self.index.search(query, candidate_k, Some(doc_type));
        let lexical_docs = self
            .index
            .list(Some(doc_type), (candidate_k * 5).max(self.config.bm25_max_docs));
        let bm25_hits = bm25::rank(query, &lexical_docs, candidate_k);

        let mut vec_by_id: HashMap<String, ScoredDocument> = HashMap::new();
        let mut bm25_by_id: HashMap<String, ScoredDocument> = HashMap::new();
        for hit in vector_hits {
            vec_by_id.insert(hit.id.clone(), hit);
        }
        for hit in bm25_hits {
            bm25_by_id.insert(hit.id.clone(), hit);
        }
        if vec_by_id.is_empty() && bm25_by_id.is_empty() {
            return Vec::new();
        }

        let vec_scores = normalize_scores(
            &vec_by_id.iter().map(|(id, hit)| (id.clone(), hit.score)).collect(),
        );
        let bm25_scores = normalize_scores(
            &bm25_by_id.iter().map(|(id, hit)| (id.clone(), hit.score)).collect(),
        );

        let (w_vec, w_bm25, w_overlap) = if doc_type.is_concept_tagged() {
            (0.45, 0.45, 0.10)
        } else {
            (0.60, 0.30, 0.10)
        };

        let merged_ids: HashSet<String> =
            vec_by_id.keys().chain(bm25_by_id.keys()).cloned().collect();
        let mut reranked: Vec<ScoredDocument> = merged_ids
            .into_iter()
            .map(|id| {
                let base = vec_by_id.get(&id).or_else(|| bm25_by_id.get(&id)).cloned().expect(
                    "merged id must exist in one side",
                );
                let overlap = lexical_overlap(query, &base.text);
                let score = w_vec * vec_scores.get(&id).copied().unwrap_or(0.0)
                    + w_bm25 * bm25_scores.get(&id).copied().unwrap_or(0.0)
                    + w_overlap * overlap;
                ScoredDocument { id, text: base.text, metadata: base.metadata, score }
            })
            .collect();
        reranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        reranked.truncate(k);
        reranked
    }

    fn build_diagnosis_map_hits(&self, question: &str, k: usize) -> Vec<ScoredDocument> {
        let mut hits: Vec<ScoredDocument> = self
            .diagnosis_map
            .match_question(question)
            .into_iter()
            .map(|matched| {
                let prefix_text = matched
                    .entry
                    .icd_prefixes
                    .iter()
                    .map(|prefix| format!("{}%", prefix))
                    .collect::<Vec<_>>()
                    .join(", ");
                let text = format!(
                    "Diagnosis mapping: {} -> ICD_CODE prefixes {}. \
                     Prefer DIAGNOSES_ICD.ICD_CODE LIKE '<prefix>%', not LONG_TITLE keyword matching. \
                     Use ICD_VERSION=10 for alphabetic prefixes and ICD_VERSION=9 for numeric prefixes.",
                    matched.entry.term, prefix_text
                );
                let mut meta = DocMetadata::of(DocType::DiagnosisMap);
                meta.term = Some(matched.entry.term.clone());
                ScoredDocument {
                    id: format!("diagnosis_map::{}", matched.entry.term),
                    text,
                    metadata: meta,
                    score: matched.score as f64,
                }
            })
            .collect();
        hits.truncate(k);
        hits
    }

    fn build_procedure_map_hits(&self, question: &str, k: usize) -> Vec<ScoredDocument> {
        let mut hits: Vec<ScoredDocument> = self
            .procedure_map
            .match_question(question)
            .into_iter()
            .map(|matched| {
                let prefix_text = matched
                    .entry
                    .icd_prefixes
                    .iter()
                    .map(|prefix| format!("{}%", prefix))
                    .collect::<Vec<_>>()
                    .join(", ");
                let text = format!(
                    "Procedure mapping: {} -> ICD_CODE prefixes {}. \
                     Prefer PROCEDURES_ICD.ICD_CODE LIKE '<prefix>%', not LONG_TITLE keyword matching. \
                     Use ICD_VERSION=10 for alphabetic prefixes and ICD_VERSION=9 for numeric prefixes.",
                    matched.entry.term, prefix_text
                );
                let mut meta = DocMetadata::of(DocType::ProcedureMap);
                meta.term = Some(matched.entry.term.clone());
                ScoredDocument {
                    id: format!("procedure_map::{}", matched.entry.term),
                    text,
                    metadata: meta,
                    score: matched.score as f64,
                }
            })
            .collect();
        hits.truncate(k);
        hits
    }

    fn build_column_value_hits(&self, question: &str, k: usize) -> Vec<ScoredDocument> {
        let matches = self.column_values.match_question(question, k.max(8));
        let mut hits: Vec<ScoredDocument> = matches
            .into_iter()
            .enumerate()
            .map(|(idx, matched)| {
                let row = matched.row;
                let text = if row.description.is_empty() {
                    format!("Column value hint: {}.{} can be '{}'.", row.table, row.column, row.value)
                } else {
                    format!(
                        "Column value hint: {}.{} can be '{}' ({}).",
                        row.table, row.column, row.value, row.description
                    )
                };
                let mut meta = DocMetadata::of(DocType::ColumnValue);
                meta.table = Some(row.table.clone());
                meta.column = Some(row.column.clone());
                meta.value = Some(row.value.clone());
                ScoredDocument {
                    id: format!("column_value::{}.{}::{}", row.table, row.column, idx),
                    text,
                    metadata: meta,
                    score: matched.score,
                }
            })
            .collect();
        hits.truncate(k);
        hits
    }

    fn build_label_intent_hits(&self, question: &str, k: usize) -> Vec<ScoredDocument> {
        let matches = self.label_intents.match_question(question, k.max(8));
        let mut hits: Vec<ScoredDocument> = matches
            .into_iter()
            .map(|matched| {
                let profile = matched.profile;
                let mut text = format!(
                    "Label intent profile: {}. Use {} JOIN {} for label concept filtering. \
                     Anchor labels: {}.",
                    profile.name,
                    profile.event_table,
                    profile.table,
                    profile.anchor_terms.join(", ")
                );
                if !profile.required_terms_with_anchor.is_empty() {
                    text.push_str(&format!(
                        " Require with anchor: {}.",
                        profile.required_terms_with_anchor.join(", ")
                    ));
                }
                let mut meta = DocMetadata::of(DocType::LabelIntent);
                meta.name = Some(profile.name.clone());
                meta.table = Some(profile.table.clone());
                meta.event_table = Some(profile.event_table.clone());
                ScoredDocument {
                    id: format!("label_intent::{}", profile.name),
                    text,
                    metadata: meta,
                    score: matched.score,
                }
            })
            .collect();
        hits.truncate(k);
        hits
    }

    /// Merge specialized concept hits and general glossary entries into the
    /// glossary slot, type by type, with the per-type thresholds.
    #[allow(clippy::too_many_arguments)]
    fn compose_glossary_hits(
        &self,
        question: &str,
        general: Vec<ScoredDocument>,
        diagnosis: Vec<ScoredDocument>,
        procedure: Vec<ScoredDocument>,
        column_value: Vec<ScoredDocument>,
        label_intent: Vec<ScoredDocument>,
        local_diag: Vec<ScoredDocument>,
        local_proc: Vec<ScoredDocument>,
        local_column: Vec<ScoredDocument>,
        local_label: Vec<ScoredDocument>,
    ) -> Vec<ScoredDocument> {
        let top_k = self.config.top_k;
        let intent = detect_search_intent(question);
        let merge_k = top_k.max(3);

        let has_local_diag = !local_diag.is_empty();
        let has_local_proc = !local_proc.is_empty();
        let has_local_column = !local_column.is_empty();
        let has_local_label = !local_label.is_empty();

        let diag_hits = merge_hits(vec![local_diag, diagnosis], merge_k);
        let proc_hits = merge_hits(vec![local_proc, procedure], merge_k);
        let col_hits = merge_hits(vec![local_column, column_value], merge_k);
        let label_hits = merge_hits(vec![local_label, label_intent], merge_k);

        let diag_hits = if !has_local_diag && !intent.diagnosis {
            Vec::new()
        } else {
            filter_hits(diag_hits, &HitFilter {
                max_items: 2,
                min_abs_score: 0.08,
                relative_ratio: Some(0.70),
                query: question,
                min_lexical_overlap: 0.06,
                allow_fallback: has_local_diag || intent.diagnosis,
            })
        };
        let proc_hits = if !has_local_proc && !intent.procedure {
            Vec::new()
        } else {
            filter_hits(proc_hits, &HitFilter {
                max_items: 2,
                min_abs_score: 0.08,
                relative_ratio: Some(0.70),
                query: question,
                min_lexical_overlap: 0.06,
                allow_fallback: has_local_proc || intent.procedure,
            })
        };
        let col_hits = if !has_local_column && !intent.column_value {
            Vec::new()
        } else {
            filter_hits(col_hits, &HitFilter {
                max_items: 2,
                min_abs_score: 0.08,
                relative_ratio: Some(0.70),
                query: question,
                min_lexical_overlap: 0.05,
                allow_fallback: has_local_column || intent.column_value,
            })
        };
        let label_hits = if !has_local_label && !intent.label_intent {
            Vec::new()
        } else {
            filter_hits(label_hits, &HitFilter {
                max_items: 2,
                min_abs_score: 0.08,
                relative_ratio: Some(0.65),
                query: question,
                min_lexical_overlap: 0.05,
                allow_fallback: has_local_label || intent.label_intent,
            })
        };

        let specialized_count =
            diag_hits.len() + proc_hits.len() + label_hits.len() + col_hits.len();
        let general_max_items =
            if specialized_count > 0 { 1 } else { 2usize.max(top_k.min(3)) };
        let general_hits = filter_hits(general, &HitFilter {
            max_items: general_max_items,
            min_abs_score: if specialized_count > 0 { 0.06 } else { 0.03 },
            relative_ratio: Some(if specialized_count > 0 { 0.75 } else { 0.60 }),
            query: question,
            min_lexical_overlap: if specialized_count > 0 { 0.10 } else { 0.05 },
            allow_fallback: specialized_count == 0,
        });

        let total = specialized_count + general_hits.len();
        if total == 0 {
            return Vec::new();
        }
        let target_k = top_k.min(total);
        merge_hits(vec![diag_hits, proc_hits, label_hits, col_hits, general_hits], target_k)
    }

    /// Restrict schema hits to the configured table scope, backfilling scoped
    /// tables that retrieval missed so an empty intent still sees schema.
    async fn apply_table_scope(&self, schema_hits: Vec<ScoredDocument>) -> Vec<ScoredDocument> {
        let selected: HashSet<String> = self
            .settings
            .table_scope()
            .await
            .into_iter()
            .map(|name| name.to_lowercase())
            .collect();
        if selected.is_empty() {
            return schema_hits;
        }
        let filtered: Vec<ScoredDocument> = schema_hits
            .iter()
            .filter(|hit| {
                hit.metadata
                    .table
                    .as_deref()
                    .map(|table| selected.contains(&table.to_lowercase()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        let existing: HashSet<String> = filtered
            .iter()
            .filter_map(|hit| hit.metadata.table.as_deref().map(str::to_lowercase))
            .collect();

        let catalog = self.schema_catalog.load();
        let mut extras: Vec<ScoredDocument> = Vec::new();
        for (name, table) in &catalog.tables {
            let lower = name.to_lowercase();
            if !selected.contains(&lower) || existing.contains(&lower) {
                continue;
            }
            let mut meta = DocMetadata::of(DocType::Schema);
            meta.table = Some(name.clone());
            extras.push(ScoredDocument {
                id: format!("schema::{}", name),
                text: SchemaCatalogStore::table_text(name, table),
                metadata: meta,
                score: 0.0,
            });
        }
        if filtered.is_empty() && extras.is_empty() {
            schema_hits
        } else {
            let mut combined = filtered;
            combined.extend(extras);
            combined
        }
    }

    /// Assemble the candidate context for one question.
    pub async fn build_candidate_context(&self, question: &str) -> CandidateContext {
        let top_k = self.config.top_k;
        let schema_hits = self.hybrid_search(question, top_k, DocType::Schema);
        let schema_hits = self.apply_table_scope(schema_hits).await;
        let example_hits =
            self.hybrid_search(question, self.config.examples_per_query, DocType::Example);
        let template_hits =
            self.hybrid_search(question, self.config.templates_per_query, DocType::Template);
        let glossary = self.compose_glossary_hits(
            question,
            self.hybrid_search(question, top_k, DocType::Glossary),
            self.hybrid_search(question, top_k, DocType::DiagnosisMap),
            self.hybrid_search(question, top_k, DocType::ProcedureMap),
            self.hybrid_search(question, top_k, DocType::ColumnValue),
            self.hybrid_search(question, top_k, DocType::LabelIntent),
            self.build_diagnosis_map_hits(question, top_k),
            self.build_procedure_map_hits(question, top_k),
            self.build_column_value_hits(question, top_k),
            self.build_label_intent_hits(question, top_k),
        );

        let context = CandidateContext {
            schemas: schema_hits,
            examples: example_hits,
            templates: template_hits,
            glossary,
        };
        trim_context_to_budget(context, self.config.context_token_budget)
    }

    /// Multi-question variant: split each slot's k across the deduped
    /// questions and merge the per-question hits.
    pub async fn build_candidate_context_multi(&self, questions: &[String]) -> CandidateContext {
        let mut deduped: Vec<String> = Vec::new();
        for question in questions {
            let text = question.trim().to_string();
            if !text.is_empty() && !deduped.contains(&text) {
                deduped.push(text);
            }
        }
        if deduped.is_empty() {
            deduped.push(String::new());
        }
        if deduped.len() == 1 {
            return self.build_candidate_context(&deduped[0]).await;
        }

        let per_query_k = |total: usize| ((total + deduped.len() - 1) / deduped.len()).max(1);
        let top_k = self.config.top_k;

        let search_all = |k: usize, doc_type: DocType| -> Vec<ScoredDocument> {
            merge_hits(
                deduped
                    .iter()
                    .map(|question| self.hybrid_search(question, per_query_k(k), doc_type))
                    .collect(),
                k,
            )
        };

        let schema_hits = self.apply_table_scope(search_all(top_k, DocType::Schema)).await;
        let example_hits = search_all(self.config.examples_per_query, DocType::Example);
        let template_hits = search_all(self.config.templates_per_query, DocType::Template);

        let local_all = |builder: &dyn Fn(&str, usize) -> Vec<ScoredDocument>| {
            merge_hits(
                deduped.iter().map(|question| builder(question, per_query_k(top_k))).collect(),
                top_k,
            )
        };
        let joined = deduped.join(" ");
        let glossary = self.compose_glossary_hits(
            &joined,
            search_all(top_k, DocType::Glossary),
            search_all(top_k, DocType::DiagnosisMap),
            search_all(top_k, DocType::ProcedureMap),
            search_all(top_k, DocType::ColumnValue),
            search_all(top_k, DocType::LabelIntent),
            local_all(&|q, k| self.build_diagnosis_map_hits(q, k)),
            local_all(&|q, k| self.build_procedure_map_hits(q, k)),
            local_all(&|q, k| self.build_column_value_hits(q, k)),
            local_all(&|q, k| self.build_label_intent_hits(q, k)),
        );

        let context = CandidateContext {
            schemas: schema_hits,
            examples: example_hits,
            templates: template_hits,
            glossary,
        };
        trim_context_to_budget(context, self.config.context_token_budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rag::RagDocument;
    use crate::services::embedding::HashedEmbedder;
    use crate::services::store::StateStore;
    use crate::services::vector_store::SimpleVectorStore;

    fn doc(id: &str, text: &str, doc_type: DocType) -> RagDocument {
        RagDocument {
            id: id.to_string(),
            text: text.to_string(),
            metadata: DocMetadata::of(doc_type),
        }
    }

    fn retriever(dir: &tempfile::TempDir, docs: Vec<RagDocument>) -> Retriever {
        let store = Arc::new(SimpleVectorStore::new(
            dir.path().join("simple_store.json"),
            Arc::new(HashedEmbedder::new(64)),
        ));
        store.upsert(&docs);
        let meta_dir = dir.path().to_str().unwrap().to_string();
        Retriever::new(
            RagConfig::default(),
            store,
            Arc::new(ConceptMapStore::new(dir.path().join("diagnosis_icd_map.jsonl"))),
            Arc::new(ConceptMapStore::new(dir.path().join("procedure_icd_map.jsonl"))),
            Arc::new(ColumnValueStore::new(dir.path().join("column_value_docs.jsonl"))),
            Arc::new(LabelIntentStore::new(dir.path().join("label_intent_profiles.jsonl"))),
            Arc::new(SchemaCatalogStore::new(dir.path().join("schema_catalog.json"))),
            SettingsStore::new(StateStore::local(dir.path().join("state.json")), &meta_dir),
        )
    }

    #[test]
    fn unique_term_document_ranks_first() {
        let dir = tempfile::tempdir().unwrap();
        let retriever = retriever(
            &dir,
            vec![
                doc("g1", "Glossary: LOS = ICU length of stay in days", DocType::Glossary),
                doc("g2", "Glossary: HADM_ID = hospital admission identifier", DocType::Glossary),
                doc("g3", "Glossary: vancomycin trough measurement", DocType::Glossary),
            ],
        );
        let hits = retriever.hybrid_search("vancomycin", 3, DocType::Glossary);
        assert_eq!(hits[0].id, "g3");
    }

    #[test]
    fn intent_detection_matches_korean_and_english() {
        let intent = detect_search_intent("심부전 진단 코드 환자 수");
        assert!(intent.diagnosis);
        let intent = detect_search_intent("dialysis catheter insertions last year");
        assert!(intent.label_intent);
        let intent = detect_search_intent("patients per admission type");
        assert!(intent.column_value);
    }

    #[tokio::test]
    async fn context_fills_all_slots() {
        let dir = tempfile::tempdir().unwrap();
        let retriever = retriever(
            &dir,
            vec![
                doc("schema::PATIENTS", "Table PATIENTS. Columns: SUBJECT_ID, GENDER", DocType::Schema),
                doc("example::0", "Question: patient count SQL: SELECT COUNT(*) FROM PATIENTS", DocType::Example),
                doc("template::0", "Template: count_by SQL: SELECT x, COUNT(*) FROM t GROUP BY x", DocType::Template),
                doc("glossary::0", "Glossary: patient = a person in PATIENTS", DocType::Glossary),
            ],
        );
        let context = retriever.build_candidate_context("patient count").await;
        assert!(!context.schemas.is_empty());
        assert!(!context.examples.is_empty());
        assert!(!context.templates.is_empty());
    }

    #[test]
    fn merge_prefers_best_score_per_id() {
        let mk = |id: &str, score: f64| ScoredDocument {
            id: id.to_string(),
            text: id.to_string(),
            metadata: DocMetadata::of(DocType::Glossary),
            score,
        };
        let merged = merge_hits(vec![vec![mk("a", 0.2), mk("b", 0.9)], vec![mk("a", 0.8)]], 5);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "b");
        assert!((merged[1].score - 0.8).abs() < 1e-9);
    }
}
