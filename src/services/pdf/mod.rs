//! PDF cohort pipeline: extraction boundary, signal map, deterministic CTE
//! compiler, and the orchestrating service with its content-addressed cache.

pub mod compiler;
pub mod extract;
pub mod service;
pub mod signals;

pub use compiler::{compile_oracle_sql, CohortIntent, CohortStep, CompiledCohort};
pub use extract::{PdfContent, PdfExtractor};
pub use service::{canonicalize_text, PdfCohortResponse, PdfCohortService};
pub use signals::SignalMap;
