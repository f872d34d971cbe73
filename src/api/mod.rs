// src/api/mod.rs
// HTTP surface of the interview engine

pub mod error;
pub mod handlers;
pub mod router;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use router::build_router;
