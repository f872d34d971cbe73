// src/config/mod.rs
// Configuration: environment first, then an optional TOML file

pub mod env;
pub mod file;

pub use env::{BudgetSettings, ConfigValidation, EnvConfig, LlmSettings, SessionSettings};
pub use file::FileConfig;
