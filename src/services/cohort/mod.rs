//! Cohort simulation: parameter-driven SQL bundles, bootstrap confidence
//! statistics, life-table survival curves, and subgroup comparison.

pub mod engine;
pub mod sql_bundle;
pub mod stats;
pub mod survival;

pub use engine::CohortEngine;
pub use sql_bundle::{build_bundle, cohort_cte};
pub use survival::SURVIVAL_TIME_POINTS;
