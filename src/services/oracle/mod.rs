//! Oracle access: the driver boundary and the row-capped executor.

pub mod driver;
pub mod executor;

pub use driver::{DriverRows, OracleDriver};
pub use executor::OracleExecutor;
