// src/policy.rs
// Follow-up decision policy: ask a generated follow-up or fall back to the pool
//
// Gates run cheapest first. The ledger check is the only one that reads shared
// state, and the generation call itself happens only after every gate passed.

use std::fmt;
use std::sync::Arc;

use crate::analysis::{SignalCategory, SignalResult};
use crate::budget::{Affordability, CostLedger};

/// Answers shorter than this (trimmed, in characters) are never substantive
pub const MIN_SUBSTANTIVE_CHARS: usize = 20;
/// Minimum signal confidence to justify a follow-up
pub const MIN_SIGNAL_CONFIDENCE: f64 = 0.6;

/// One-word answers that never justify a follow-up
const STOPLIST: &[&str] = &[
    "yes", "no", "maybe", "ok", "okay", "sure", "n/a", "none", "idk", "sim", "não", "nao",
    "talvez", "nenhum", "nada",
];

/// Why a follow-up was not generated
#[derive(Debug, Clone, PartialEq)]
pub enum DenyReason {
    FollowUpsExhausted { used: u32, max: u32 },
    NoSignal,
    NotSubstantive { length: usize },
    LowConfidence { confidence: f64 },
    /// Ledger denial, verbatim
    Budget(String),
    /// Generation errored or timed out after approval
    GenerationFailed(String),
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FollowUpsExhausted { used, max } => {
                write!(f, "budget of follow-ups exhausted ({}/{})", used, max)
            }
            Self::NoSignal => f.write_str("no interesting signal"),
            Self::NotSubstantive { length } => {
                write!(f, "answer not substantive ({} chars)", length)
            }
            Self::LowConfidence { confidence } => write!(
                f,
                "signal confidence {:.2} below {:.2}",
                confidence, MIN_SIGNAL_CONFIDENCE
            ),
            Self::Budget(reason) => f.write_str(reason),
            Self::GenerationFailed(error) => write!(f, "generation failed: {}", error),
        }
    }
}

/// Outcome of evaluating one answered turn
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    AskFollowUp { estimated_cost: f64 },
    UsePoolQuestion { reason: DenyReason },
}

impl Decision {
    pub fn is_follow_up(&self) -> bool {
        matches!(self, Self::AskFollowUp { .. })
    }
}

/// Inputs the policy reads for one turn
#[derive(Debug, Clone, Copy)]
pub struct TurnFacts<'a> {
    pub follow_ups_used: u32,
    pub max_follow_ups: u32,
    pub answer: &'a str,
    pub signal: &'a SignalResult,
}

pub struct FollowUpPolicy {
    ledger: Arc<CostLedger>,
    estimated_cost: f64,
}

impl FollowUpPolicy {
    /// `estimated_input_tokens` and `estimated_output_tokens` price one
    /// follow-up before it is requested.
    pub fn new(
        ledger: Arc<CostLedger>,
        estimated_input_tokens: u64,
        estimated_output_tokens: u64,
    ) -> Self {
        let estimated_cost = ledger.calculate_cost(estimated_input_tokens, estimated_output_tokens);
        Self {
            ledger,
            estimated_cost,
        }
    }

    pub fn estimated_cost(&self) -> f64 {
        self.estimated_cost
    }

    pub fn evaluate(&self, facts: TurnFacts<'_>) -> Decision {
        if facts.follow_ups_used >= facts.max_follow_ups {
            return deny(DenyReason::FollowUpsExhausted {
                used: facts.follow_ups_used,
                max: facts.max_follow_ups,
            });
        }

        if !facts.signal.has_signals || facts.signal.category == SignalCategory::NoSignal {
            return deny(DenyReason::NoSignal);
        }

        if !is_substantive(facts.answer) {
            return deny(DenyReason::NotSubstantive {
                length: facts.answer.trim().chars().count(),
            });
        }

        if facts.signal.confidence < MIN_SIGNAL_CONFIDENCE {
            return deny(DenyReason::LowConfidence {
                confidence: facts.signal.confidence,
            });
        }

        match self.ledger.can_afford(self.estimated_cost) {
            Affordability::Allowed => Decision::AskFollowUp {
                estimated_cost: self.estimated_cost,
            },
            Affordability::Denied { reason } => deny(DenyReason::Budget(reason)),
        }
    }
}

fn deny(reason: DenyReason) -> Decision {
    Decision::UsePoolQuestion { reason }
}

/// At least 20 trimmed characters and not a stoplisted one-word answer
pub fn is_substantive(answer: &str) -> bool {
    let trimmed = answer.trim();
    if trimmed.chars().count() < MIN_SUBSTANTIVE_CHARS {
        return false;
    }
    let word = trimmed
        .trim_end_matches(['.', '!', '?', ','])
        .to_lowercase();
    !STOPLIST.contains(&word.as_str())
}
