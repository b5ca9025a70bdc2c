//! Process-wide state persistence.
//!
//! Two backends behind one handle: a remote document store (Mongo-like,
//! provided by an external collaborator) and a local JSON-file fallback that
//! persists on every change. Consumers never branch on the backend.

mod state_store;

pub use state_store::{DocumentStore, StateStore};
