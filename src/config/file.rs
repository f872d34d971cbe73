// src/config/file.rs
// File-based configuration (--config path), layered over the environment

use serde::Deserialize;
use std::path::Path;
use tracing::debug;

use super::env::EnvConfig;
use crate::error::{InterviewError, Result};

/// Top-level config structure. Every key is optional; present keys win
/// over environment values.
#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub budget: BudgetSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub generation: GenerationSection,
}

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BudgetSection {
    pub daily_limit: Option<f64>,
    pub monthly_limit: Option<f64>,
    pub alert_threshold: Option<f64>,
    pub input_rate_per_1k: Option<f64>,
    pub output_rate_per_1k: Option<f64>,
    pub estimated_input_tokens: Option<u64>,
    pub estimated_output_tokens: Option<u64>,
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SessionSection {
    pub max_follow_ups: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GenerationSection {
    pub timeout_secs: Option<u64>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub question_bank: Option<String>,
}

impl FileConfig {
    /// Load an explicitly requested file. Unlike env vars, a missing or
    /// malformed file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            InterviewError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&contents)?;
        debug!(path = %path.display(), "Loaded config from file");
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Overlay every present key onto `config`
    pub fn apply(&self, config: &mut EnvConfig) {
        let b = &self.budget;
        let budget = &mut config.budget;
        set(&mut budget.daily_limit, b.daily_limit);
        set(&mut budget.monthly_limit, b.monthly_limit);
        set(&mut budget.alert_threshold_percent, b.alert_threshold);
        set(&mut budget.input_rate_per_1k, b.input_rate_per_1k);
        set(&mut budget.output_rate_per_1k, b.output_rate_per_1k);
        set(&mut budget.estimated_input_tokens, b.estimated_input_tokens);
        set(&mut budget.estimated_output_tokens, b.estimated_output_tokens);
        set(&mut budget.utc_offset_minutes, b.utc_offset_minutes);

        let s = &self.session;
        set(&mut config.session.max_follow_ups, s.max_follow_ups);
        set(&mut config.session.timeout_secs, s.timeout_secs);
        set(&mut config.session.sweep_interval_secs, s.sweep_interval_secs);

        let g = &self.generation;
        set(&mut config.generation_timeout_secs, g.timeout_secs);
        set(&mut config.llm.base_url, g.base_url.clone());
        set(&mut config.llm.model, g.model.clone());
        if let Some(bank) = &g.question_bank {
            config.question_bank = Some(bank.into());
        }
    }
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}
