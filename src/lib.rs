// src/lib.rs
// Adaptive interview orchestration engine

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod analysis;
pub mod api;
pub mod budget;
pub mod clock;
pub mod config;
pub mod error;
pub mod generation;
pub mod orchestrator;
pub mod policy;
pub mod pool;
pub mod session;
pub mod state;
pub mod telemetry;

pub use error::{InterviewError, Result};
pub use orchestrator::Orchestrator;
