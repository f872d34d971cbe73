// src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use chrono::FixedOffset;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::budget::{BudgetLimits, Environment, Pricing};
use crate::orchestrator::OrchestratorSettings;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o-mini";

/// Largest UTC offset chrono accepts, in minutes (exclusive)
const MAX_OFFSET_MINUTES: i32 = 24 * 60;

/// Text-generation provider settings
#[derive(Debug, Clone)]
pub struct LlmSettings {
    /// INTERVIEW_LLM_API_KEY
    pub api_key: Option<String>,
    /// INTERVIEW_LLM_BASE_URL
    pub base_url: String,
    /// INTERVIEW_LLM_MODEL
    pub model: String,
    /// INTERVIEW_DISABLE_LLM
    pub disabled: bool,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            disabled: false,
        }
    }
}

impl LlmSettings {
    /// Whether follow-ups can be generated at all
    pub fn has_provider(&self) -> bool {
        !self.disabled && self.api_key.is_some()
    }
}

/// Spend caps, rates and the per-follow-up estimate
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetSettings {
    pub daily_limit: f64,
    pub monthly_limit: f64,
    pub alert_threshold_percent: f64,
    pub input_rate_per_1k: f64,
    pub output_rate_per_1k: f64,
    pub estimated_input_tokens: u64,
    pub estimated_output_tokens: u64,
    /// Calendar boundary for today / this-month aggregation
    pub utc_offset_minutes: i32,
}

impl Default for BudgetSettings {
    fn default() -> Self {
        let limits = BudgetLimits::default();
        let pricing = Pricing::default();
        Self {
            daily_limit: limits.daily_limit,
            monthly_limit: limits.monthly_limit,
            alert_threshold_percent: limits.alert_threshold_percent,
            input_rate_per_1k: pricing.input_per_1k,
            output_rate_per_1k: pricing.output_per_1k,
            estimated_input_tokens: 800,
            estimated_output_tokens: 200,
            utc_offset_minutes: 0,
        }
    }
}

impl BudgetSettings {
    pub fn limits(&self) -> BudgetLimits {
        BudgetLimits {
            daily_limit: self.daily_limit,
            monthly_limit: self.monthly_limit,
            alert_threshold_percent: self.alert_threshold_percent,
        }
    }

    pub fn pricing(&self) -> Pricing {
        Pricing {
            input_per_1k: self.input_rate_per_1k,
            output_per_1k: self.output_rate_per_1k,
        }
    }

    /// None if the offset is out of range
    pub fn ledger_offset(&self) -> Option<FixedOffset> {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    pub max_follow_ups: u32,
    pub timeout_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_follow_ups: 3,
            timeout_secs: 30 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl SessionSettings {
    pub fn timeout(&self) -> chrono::Duration {
        let secs = i64::try_from(self.timeout_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1000);
        chrono::Duration::seconds(secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Environment configuration - all env vars in one place
#[derive(Debug, Clone)]
pub struct EnvConfig {
    /// INTERVIEW_HOST
    pub host: String,
    /// INTERVIEW_PORT
    pub port: u16,
    /// INTERVIEW_LOG_LEVEL, used when RUST_LOG is unset
    pub log_level: String,
    /// INTERVIEW_ENVIRONMENT
    pub environment: Environment,
    /// INTERVIEW_QUESTION_BANK; the built-in bank is used when unset
    pub question_bank: Option<PathBuf>,
    /// INTERVIEW_GENERATION_TIMEOUT_SECS
    pub generation_timeout_secs: u64,
    pub budget: BudgetSettings,
    pub session: SessionSettings,
    pub llm: LlmSettings,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            log_level: "info".to_string(),
            environment: Environment::Production,
            question_bank: None,
            generation_timeout_secs: 15,
            budget: BudgetSettings::default(),
            session: SessionSettings::default(),
            llm: LlmSettings::default(),
        }
    }
}

impl EnvConfig {
    /// Load all environment configuration (call once at startup)
    pub fn load() -> Self {
        info!("Loading environment configuration");
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Unset, empty or unparsable values fall
    /// back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let env = Lookup(&lookup);
        let defaults = Self::default();

        let disabled = env.flag("INTERVIEW_DISABLE_LLM").unwrap_or(false);
        if disabled {
            info!("INTERVIEW_DISABLE_LLM is set, follow-ups will come from the question pool");
        }
        let llm = LlmSettings {
            api_key: if disabled {
                None
            } else {
                env.string("INTERVIEW_LLM_API_KEY")
            },
            base_url: env
                .string("INTERVIEW_LLM_BASE_URL")
                .unwrap_or(defaults.llm.base_url),
            model: env
                .string("INTERVIEW_LLM_MODEL")
                .unwrap_or(defaults.llm.model),
            disabled,
        };

        let budget = BudgetSettings {
            daily_limit: env.parse("INTERVIEW_DAILY_LIMIT", defaults.budget.daily_limit),
            monthly_limit: env.parse("INTERVIEW_MONTHLY_LIMIT", defaults.budget.monthly_limit),
            alert_threshold_percent: env.parse(
                "INTERVIEW_ALERT_THRESHOLD",
                defaults.budget.alert_threshold_percent,
            ),
            input_rate_per_1k: env.parse(
                "INTERVIEW_INPUT_RATE_PER_1K",
                defaults.budget.input_rate_per_1k,
            ),
            output_rate_per_1k: env.parse(
                "INTERVIEW_OUTPUT_RATE_PER_1K",
                defaults.budget.output_rate_per_1k,
            ),
            estimated_input_tokens: env.parse(
                "INTERVIEW_ESTIMATED_INPUT_TOKENS",
                defaults.budget.estimated_input_tokens,
            ),
            estimated_output_tokens: env.parse(
                "INTERVIEW_ESTIMATED_OUTPUT_TOKENS",
                defaults.budget.estimated_output_tokens,
            ),
            utc_offset_minutes: env.parse(
                "INTERVIEW_LEDGER_UTC_OFFSET_MINUTES",
                defaults.budget.utc_offset_minutes,
            ),
        };

        let session = SessionSettings {
            max_follow_ups: env.parse("INTERVIEW_MAX_FOLLOW_UPS", defaults.session.max_follow_ups),
            timeout_secs: env.parse(
                "INTERVIEW_SESSION_TIMEOUT_SECS",
                defaults.session.timeout_secs,
            ),
            sweep_interval_secs: env.parse(
                "INTERVIEW_SWEEP_INTERVAL_SECS",
                defaults.session.sweep_interval_secs,
            ),
        };

        let config = Self {
            host: env.string("INTERVIEW_HOST").unwrap_or(defaults.host),
            port: env.parse("INTERVIEW_PORT", defaults.port),
            log_level: env
                .string("INTERVIEW_LOG_LEVEL")
                .unwrap_or(defaults.log_level),
            environment: env.parse("INTERVIEW_ENVIRONMENT", defaults.environment),
            question_bank: env.string("INTERVIEW_QUESTION_BANK").map(PathBuf::from),
            generation_timeout_secs: env.parse(
                "INTERVIEW_GENERATION_TIMEOUT_SECS",
                defaults.generation_timeout_secs,
            ),
            budget,
            session,
            llm,
        };
        config.log_status();
        config
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            generation_timeout: self.generation_timeout(),
            environment: self.environment,
            estimated_input_tokens: self.budget.estimated_input_tokens,
            estimated_output_tokens: self.budget.estimated_output_tokens,
        }
    }

    /// Log which provider is configured (without exposing the key)
    fn log_status(&self) {
        if self.llm.has_provider() {
            debug!(
                base_url = %self.llm.base_url,
                model = %self.llm.model,
                "LLM provider configured"
            );
        } else if !self.llm.disabled {
            warn!("No LLM API key configured - follow-ups will come from the question pool");
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigValidation {
        let mut validation = ConfigValidation::new();
        let budget = &self.budget;

        if budget.daily_limit <= 0.0 {
            validation.add_error(format!(
                "Daily limit must be positive, got {}",
                budget.daily_limit
            ));
        }
        if budget.monthly_limit <= 0.0 {
            validation.add_error(format!(
                "Monthly limit must be positive, got {}",
                budget.monthly_limit
            ));
        }
        if budget.daily_limit > budget.monthly_limit {
            validation.add_warning(format!(
                "Daily limit {:.2} exceeds monthly limit {:.2}",
                budget.daily_limit, budget.monthly_limit
            ));
        }
        if !(budget.alert_threshold_percent > 0.0 && budget.alert_threshold_percent <= 100.0) {
            validation.add_error(format!(
                "Alert threshold must be in (0, 100], got {}",
                budget.alert_threshold_percent
            ));
        }
        if budget.input_rate_per_1k < 0.0 || budget.output_rate_per_1k < 0.0 {
            validation.add_error("Token rates must not be negative");
        }
        if budget.utc_offset_minutes.abs() >= MAX_OFFSET_MINUTES {
            validation.add_error(format!(
                "Ledger UTC offset must be within +/-{} minutes, got {}",
                MAX_OFFSET_MINUTES - 1,
                budget.utc_offset_minutes
            ));
        }

        if self.session.timeout_secs == 0 {
            validation.add_error("Session timeout must be greater than zero");
        }
        if self.session.sweep_interval_secs == 0 {
            validation.add_error("Sweep interval must be greater than zero");
        }
        if self.session.max_follow_ups == 0 {
            validation.add_warning("INTERVIEW_MAX_FOLLOW_UPS is 0 - dynamic follow-ups are off");
        }
        if self.generation_timeout_secs == 0 {
            validation.add_error("Generation timeout must be greater than zero");
        }

        if !self.llm.has_provider() && !self.llm.disabled {
            validation.add_warning(
                "No LLM API key configured. Set INTERVIEW_LLM_API_KEY to enable dynamic follow-ups.",
            );
        }

        validation
    }
}

/// Configuration validation result
#[derive(Debug, Default)]
pub struct ConfigValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Format as a human-readable report
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        if !self.errors.is_empty() {
            lines.push("Errors:".to_string());
            for err in &self.errors {
                lines.push(format!("  - {}", err));
            }
        }

        if !self.warnings.is_empty() {
            lines.push("Warnings:".to_string());
            for warning in &self.warnings {
                lines.push(format!("  - {}", warning));
            }
        }

        if lines.is_empty() {
            "Configuration OK".to_string()
        } else {
            lines.join("\n")
        }
    }
}

struct Lookup<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Lookup<'_, F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T: std::str::FromStr>(&self, name: &str, default: T) -> T {
        match self.string(name) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(name, value = %raw, "Invalid value, using default");
                default
            }),
            None => default,
        }
    }

    fn flag(&self, name: &str) -> Option<bool> {
        parse_bool(&self.string(name)?)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> EnvConfig {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 8080);
        assert_eq!(config.budget.daily_limit, 5.0);
        assert_eq!(config.budget.monthly_limit, 100.0);
        assert_eq!(config.budget.alert_threshold_percent, 80.0);
        assert_eq!(config.session.max_follow_ups, 3);
        assert_eq!(config.session.timeout(), chrono::Duration::minutes(30));
        assert_eq!(config.generation_timeout(), Duration::from_secs(15));
        assert_eq!(config.environment, Environment::Production);
        assert!(config.question_bank.is_none());
        assert!(!config.llm.has_provider());
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("INTERVIEW_PORT", "9000"),
            ("INTERVIEW_DAILY_LIMIT", "2.50"),
            ("INTERVIEW_MAX_FOLLOW_UPS", "5"),
            ("INTERVIEW_ENVIRONMENT", "test"),
            ("INTERVIEW_LLM_API_KEY", "sk-test"),
            ("INTERVIEW_LEDGER_UTC_OFFSET_MINUTES", "-180"),
            ("INTERVIEW_QUESTION_BANK", "/etc/interview/questions.toml"),
        ]);
        assert_eq!(config.port, 9000);
        assert_eq!(config.budget.daily_limit, 2.5);
        assert_eq!(config.session.max_follow_ups, 5);
        assert_eq!(config.environment, Environment::Test);
        assert!(config.llm.has_provider());
        assert_eq!(
            config.budget.ledger_offset(),
            FixedOffset::west_opt(3 * 3600)
        );
        assert_eq!(
            config.question_bank,
            Some(PathBuf::from("/etc/interview/questions.toml"))
        );
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = config(&[("INTERVIEW_PORT", "eighty"), ("INTERVIEW_DAILY_LIMIT", "")]);
        assert_eq!(config.port, 8080);
        assert_eq!(config.budget.daily_limit, 5.0);
    }

    #[test]
    fn test_disable_llm_drops_key() {
        let config = config(&[
            ("INTERVIEW_LLM_API_KEY", "sk-test"),
            ("INTERVIEW_DISABLE_LLM", "1"),
        ]);
        assert!(config.llm.api_key.is_none());
        assert!(!config.llm.has_provider());
        // disabling on purpose is not worth a warning
        assert!(config.validate().warnings.is_empty());
    }

    #[test]
    fn test_validation_defaults_only_warn() {
        let validation = config(&[]).validate();
        assert!(validation.is_valid());
        assert_eq!(validation.warnings.len(), 1);
        assert!(validation.report().contains("INTERVIEW_LLM_API_KEY"));
    }

    #[test]
    fn test_validation_errors() {
        let validation = config(&[
            ("INTERVIEW_DAILY_LIMIT", "0"),
            ("INTERVIEW_ALERT_THRESHOLD", "120"),
            ("INTERVIEW_SESSION_TIMEOUT_SECS", "0"),
            ("INTERVIEW_LEDGER_UTC_OFFSET_MINUTES", "1440"),
            ("INTERVIEW_LLM_API_KEY", "k"),
        ])
        .validate();
        assert!(!validation.is_valid());
        assert_eq!(validation.errors.len(), 4);
        assert!(validation.report().starts_with("Errors:"));
    }

    #[test]
    fn test_offset_out_of_range() {
        let budget = BudgetSettings {
            utc_offset_minutes: 1440,
            ..BudgetSettings::default()
        };
        assert!(budget.ledger_offset().is_none());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_empty_report() {
        assert_eq!(ConfigValidation::new().report(), "Configuration OK");
    }
}
