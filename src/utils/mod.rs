pub mod error;
pub mod sqltext;

pub use error::{ApiError, ApiResult};
