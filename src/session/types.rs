// src/session/types.rs
// Per-session conversation state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::analysis::UncertaintyTracker;

/// Respondent's assumed role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Persona {
    BoardExecutive,
    FinanceOps,
    #[default]
    ProductBusiness,
    EngineeringTech,
    ItDevops,
}

impl Persona {
    pub const ALL: [Persona; 5] = [
        Self::BoardExecutive,
        Self::FinanceOps,
        Self::ProductBusiness,
        Self::EngineeringTech,
        Self::ItDevops,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BoardExecutive => "board-executive",
            Self::FinanceOps => "finance-ops",
            Self::ProductBusiness => "product-business",
            Self::EngineeringTech => "engineering-tech",
            Self::ItDevops => "it-devops",
        }
    }
}

impl fmt::Display for Persona {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Persona {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| format!("unknown persona '{}'", s))
    }
}

/// Interview phase, in progression order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Block {
    #[default]
    Discovery,
    Expertise,
    DeepDive,
    RiskScan,
    Completion,
}

impl Block {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Expertise => "expertise",
            Self::DeepDive => "deep-dive",
            Self::RiskScan => "risk-scan",
            Self::Completion => "completion",
        }
    }

    /// Next block. Completion is terminal.
    pub fn next(&self) -> Self {
        match self {
            Self::Discovery => Self::Expertise,
            Self::Expertise => Self::DeepDive,
            Self::DeepDive => Self::RiskScan,
            Self::RiskScan => Self::Completion,
            Self::Completion => Self::Completion,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completion)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Block {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "discovery" => Ok(Self::Discovery),
            "expertise" => Ok(Self::Expertise),
            "deep-dive" | "deepdive" => Ok(Self::DeepDive),
            "risk-scan" | "riskscan" => Ok(Self::RiskScan),
            "completion" => Ok(Self::Completion),
            other => Err(format!("unknown block '{}'", other)),
        }
    }
}

/// A value in the extracted-data map
///
/// Variant order matters for untagged deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    /// Empty text and empty lists never overwrite existing data
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Flag(_) | Self::Number(_) => false,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

/// The aggregate root for one assessment run.
///
/// Fields are read-only to callers; all mutation goes through
/// [`SessionPatch`](super::SessionPatch) applied by the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationContext {
    pub(crate) session_id: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) last_updated: DateTime<Utc>,
    pub(crate) persona: Persona,
    pub(crate) persona_confidence: f64,
    pub(crate) questions_asked: u32,
    pub(crate) questions_answered: u32,
    pub(crate) dynamic_follow_ups_used: u32,
    pub(crate) max_follow_ups: u32,
    pub(crate) extracted_data: BTreeMap<String, FieldValue>,
    pub(crate) topics_covered: BTreeSet<String>,
    pub(crate) current_block: Block,
    pub(crate) uncertainty: UncertaintyTracker,
    pub(crate) asked_question_ids: Vec<String>,
    /// Text of dynamically generated questions, by id
    pub(crate) dynamic_questions: BTreeMap<String, String>,
    pub(crate) mismatch_reported: bool,
}

impl ConversationContext {
    pub(crate) fn new(
        session_id: String,
        now: DateTime<Utc>,
        persona: Persona,
        persona_confidence: f64,
        max_follow_ups: u32,
    ) -> Self {
        Self {
            session_id,
            created_at: now,
            last_updated: now,
            persona,
            persona_confidence: persona_confidence.clamp(0.0, 1.0),
            questions_asked: 0,
            questions_answered: 0,
            dynamic_follow_ups_used: 0,
            max_follow_ups,
            extracted_data: BTreeMap::new(),
            topics_covered: BTreeSet::new(),
            current_block: Block::Discovery,
            uncertainty: UncertaintyTracker::new(),
            asked_question_ids: Vec::new(),
            dynamic_questions: BTreeMap::new(),
            mismatch_reported: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    pub fn persona(&self) -> Persona {
        self.persona
    }

    pub fn persona_confidence(&self) -> f64 {
        self.persona_confidence
    }

    pub fn questions_asked(&self) -> u32 {
        self.questions_asked
    }

    pub fn questions_answered(&self) -> u32 {
        self.questions_answered
    }

    pub fn dynamic_follow_ups_used(&self) -> u32 {
        self.dynamic_follow_ups_used
    }

    pub fn max_follow_ups(&self) -> u32 {
        self.max_follow_ups
    }

    pub fn follow_ups_remaining(&self) -> u32 {
        self.max_follow_ups.saturating_sub(self.dynamic_follow_ups_used)
    }

    pub fn extracted_data(&self) -> &BTreeMap<String, FieldValue> {
        &self.extracted_data
    }

    pub fn topics_covered(&self) -> &BTreeSet<String> {
        &self.topics_covered
    }

    pub fn current_block(&self) -> Block {
        self.current_block
    }

    pub fn uncertainty(&self) -> &UncertaintyTracker {
        &self.uncertainty
    }

    pub fn asked_question_ids(&self) -> &[String] {
        &self.asked_question_ids
    }

    pub fn has_asked(&self, question_id: &str) -> bool {
        self.asked_question_ids.iter().any(|q| q == question_id)
    }

    pub fn dynamic_question(&self, question_id: &str) -> Option<&str> {
        self.dynamic_questions.get(question_id).map(String::as_str)
    }

    pub fn mismatch_reported(&self) -> bool {
        self.mismatch_reported
    }

    /// Idle for at least `timeout` as of `now`
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        now - self.last_updated >= timeout
    }
}
