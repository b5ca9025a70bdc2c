//! Vector index over RAG documents.
//!
//! `SimpleVectorStore` is the in-process fallback: documents and their
//! embeddings live in memory and persist to a single JSON file. A remote
//! vector search service (Mongo `$vectorSearch`, Qdrant) implements the same
//! trait on the hosting side.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::models::rag::{DocType, RagDocument, ScoredDocument};
use crate::services::embedding::{cosine, Embedder};

pub trait VectorIndex: Send + Sync {
    /// Replace-by-id upsert of the given documents.
    fn upsert(&self, docs: &[RagDocument]);
    /// Cosine top-k over the (optionally type-filtered) corpus.
    fn search(&self, query: &str, k: usize, doc_type: Option<DocType>) -> Vec<ScoredDocument>;
    /// All documents of a type, capped at `limit` (0 = unlimited). Used by
    /// the lexical side of the hybrid retriever.
    fn list(&self, doc_type: Option<DocType>, limit: usize) -> Vec<RagDocument>;
}

#[derive(Serialize, Deserialize)]
struct StoredDoc {
    text: String,
    meta: crate::models::rag::DocMetadata,
    vec: Vec<f64>,
}

#[derive(Default, Serialize, Deserialize)]
struct StoreFile {
    docs: BTreeMap<String, StoredDoc>,
}

pub struct SimpleVectorStore {
    path: PathBuf,
    embedder: Arc<dyn Embedder>,
    docs: RwLock<BTreeMap<String, StoredDoc>>,
}

impl SimpleVectorStore {
    pub fn new(path: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Self {
        let path = path.into();
        let docs = Self::load(&path);
        Self { path, embedder, docs: RwLock::new(docs) }
    }

    fn load(path: &Path) -> BTreeMap<String, StoredDoc> {
        let Ok(raw) = std::fs::read_to_string(path) else {
            return BTreeMap::new();
        };
        match serde_json::from_str::<StoreFile>(&raw) {
            Ok(file) => file.docs,
            Err(err) => {
                tracing::warn!("Vector store file {} is corrupt: {}", path.display(), err);
                BTreeMap::new()
            },
        }
    }

    fn persist(&self) {
        let payload = {
            let docs = self.docs.read().expect("vector store poisoned");
            let file = StoreFile {
                docs: docs
                    .iter()
                    .map(|(id, doc)| {
                        (
                            id.clone(),
                            StoredDoc {
                                text: doc.text.clone(),
                                meta: doc.meta.clone(),
                                vec: doc.vec.clone(),
                            },
                        )
                    })
                    .collect(),
            };
            serde_json::to_string(&file)
        };
        let Ok(payload) = payload else {
            return;
        };
        if let Some(parent) = self.path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                tracing::warn!("Vector store mkdir failed: {}", err);
                return;
            }
        }
        if let Err(err) = std::fs::write(&self.path, payload) {
            tracing::warn!("Vector store persist to {} failed: {}", self.path.display(), err);
        }
    }

    pub fn len(&self) -> usize {
        self.docs.read().expect("vector store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VectorIndex for SimpleVectorStore {
    fn upsert(&self, docs: &[RagDocument]) {
        {
            let mut map = self.docs.write().expect("vector store poisoned");
            for doc in docs {
                let vec = self.embedder.embed(&doc.text);
                map.insert(
                    doc.id.clone(),
                    StoredDoc { text: doc.text.clone(), meta: doc.metadata.clone(), vec },
                );
            }
        }
        self.persist();
        tracing::debug!("Vector store upserted {} docs", docs.len());
    }

    fn search(&self, query: &str, k: usize, doc_type: Option<DocType>) -> Vec<ScoredDocument> {
        if k == 0 {
            return Vec::new();
        }
        let query_vec = self.embedder.embed(query);
        let docs = self.docs.read().expect("vector store poisoned");
        let mut scored: Vec<ScoredDocument> = docs
            .iter()
            .filter(|(_, doc)| doc_type.map_or(true, |t| doc.meta.doc_type == t))
            .map(|(id, doc)| ScoredDocument {
                id: id.clone(),
                text: doc.text.clone(),
                metadata: doc.meta.clone(),
                score: cosine(&query_vec, &doc.vec),
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    fn list(&self, doc_type: Option<DocType>, limit: usize) -> Vec<RagDocument> {
        let docs = self.docs.read().expect("vector store poisoned");
        let mut out = Vec::new();
        for (id, doc) in docs.iter() {
            if doc_type.map_or(true, |t| doc.meta.doc_type == t) {
                out.push(RagDocument {
                    id: id.clone(),
                    text: doc.text.clone(),
                    metadata: doc.meta.clone(),
                });
                if limit > 0 && out.len() >= limit {
                    break;
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rag::DocMetadata;
    use crate::services::embedding::HashedEmbedder;

    fn doc(id: &str, text: &str, doc_type: DocType) -> RagDocument {
        RagDocument { id: id.to_string(), text: text.to_string(), metadata: DocMetadata::of(doc_type) }
    }

    #[test]
    fn upsert_replaces_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = SimpleVectorStore::new(
            dir.path().join("simple_store.json"),
            Arc::new(HashedEmbedder::new(64)),
        );
        store.upsert(&[doc("schema::PATIENTS", "Table PATIENTS old", DocType::Schema)]);
        store.upsert(&[doc("schema::PATIENTS", "Table PATIENTS new", DocType::Schema)]);
        assert_eq!(store.len(), 1);
        let hits = store.search("patients", 5, Some(DocType::Schema));
        assert_eq!(hits[0].text, "Table PATIENTS new");
    }

    #[test]
    fn search_respects_type_filter() {
        let dir = tempfile::tempdir().unwrap();
        let store = SimpleVectorStore::new(
            dir.path().join("simple_store.json"),
            Arc::new(HashedEmbedder::new(64)),
        );
        store.upsert(&[
            doc("schema::ADMISSIONS", "Table ADMISSIONS admission rows", DocType::Schema),
            doc("example::1", "Question about admission counts", DocType::Example),
        ]);
        let hits = store.search("admission", 5, Some(DocType::Example));
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "example::1");
    }

    #[test]
    fn persisted_store_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("simple_store.json");
        {
            let store =
                SimpleVectorStore::new(&path, Arc::new(HashedEmbedder::new(64)));
            store.upsert(&[doc("glossary::0", "Glossary: LOS = length of stay", DocType::Glossary)]);
        }
        let reloaded = SimpleVectorStore::new(&path, Arc::new(HashedEmbedder::new(64)));
        assert_eq!(reloaded.len(), 1);
    }
}
