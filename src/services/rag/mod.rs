//! Retrieval-augmented context: tokenizer, BM25, hybrid retrieval, indexing,
//! and token-budget trimming.

pub mod bm25;
pub mod context;
pub mod indexer;
pub mod retrieval;
pub mod tokenize;

pub use context::trim_context_to_budget;
pub use indexer::Indexer;
pub use retrieval::{detect_search_intent, Retriever, SearchIntent};
