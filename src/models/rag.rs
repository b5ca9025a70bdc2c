use serde::{Deserialize, Serialize};
use std::fmt;

/// Document corpus type. Drives type-filtered retrieval and the rerank
/// weighting profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    Schema,
    Example,
    Template,
    Glossary,
    DiagnosisMap,
    ProcedureMap,
    ColumnValue,
    LabelIntent,
}

impl DocType {
    /// Concept-tagged corpora get the balanced dense/lexical weighting.
    pub fn is_concept_tagged(self) -> bool {
        matches!(
            self,
            DocType::DiagnosisMap | DocType::ProcedureMap | DocType::ColumnValue | DocType::LabelIntent
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DocType::Schema => "schema",
            DocType::Example => "example",
            DocType::Template => "template",
            DocType::Glossary => "glossary",
            DocType::DiagnosisMap => "diagnosis_map",
            DocType::ProcedureMap => "procedure_map",
            DocType::ColumnValue => "column_value",
            DocType::LabelIntent => "label_intent",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One indexed document. `id` is derived from the source record so reindexing
/// replaces rather than duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagDocument {
    pub id: String,
    pub text: String,
    pub metadata: DocMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocMetadata {
    #[serde(rename = "type")]
    pub doc_type: DocType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_table: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
}

impl DocMetadata {
    pub fn of(doc_type: DocType) -> Self {
        Self {
            doc_type,
            table: None,
            column: None,
            value: None,
            term: None,
            name: None,
            event_table: None,
            kind: None,
            sheet: None,
        }
    }
}

/// A retrieval hit: a document plus its (stage-dependent) score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub id: String,
    pub text: String,
    pub metadata: DocMetadata,
    pub score: f64,
}

/// Candidate context assembled for the SQL agents, trimmed to a token budget.
/// Trimming order is examples -> templates -> schemas -> glossary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CandidateContext {
    pub schemas: Vec<ScoredDocument>,
    pub examples: Vec<ScoredDocument>,
    pub templates: Vec<ScoredDocument>,
    pub glossary: Vec<ScoredDocument>,
}

impl CandidateContext {
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
            && self.examples.is_empty()
            && self.templates.is_empty()
            && self.glossary.is_empty()
    }
}
