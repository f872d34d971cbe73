// src/analysis/signal.rs
// Keyword-based signal detection for free-text answers
//
// Deliberately simple: lowercase, then literal substring matches against a
// fixed keyword list per category. No stemming, no tokenizing.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::budget::round_to;

/// Maximum number of matched keywords reported as evidence
const MAX_EVIDENCE: usize = 3;

/// Thematic category of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalCategory {
    Innovation,
    Competition,
    PainQuantified,
    Urgency,
    Growth,
    Cost,
    Quality,
    /// Nothing matched
    #[serde(rename = "none")]
    NoSignal,
}

impl SignalCategory {
    /// Categories in tie-break priority order. On equal counts the earlier
    /// category wins.
    pub const PRIORITY: [SignalCategory; 7] = [
        Self::Innovation,
        Self::Competition,
        Self::PainQuantified,
        Self::Urgency,
        Self::Growth,
        Self::Cost,
        Self::Quality,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Innovation => "innovation",
            Self::Competition => "competition",
            Self::PainQuantified => "pain_quantified",
            Self::Urgency => "urgency",
            Self::Growth => "growth",
            Self::Cost => "cost",
            Self::Quality => "quality",
            Self::NoSignal => "none",
        }
    }

    /// Lowercase literal keywords (Portuguese and English)
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Innovation => &[
                "inovação",
                "inovar",
                "innovation",
                "inteligência artificial",
                "artificial intelligence",
                "machine learning",
                "llm",
                "copilot",
                "genai",
                "generativ",
                "automação",
                "automation",
                "protótipo",
                "prototype",
                "experimento",
                "experiment",
            ],
            Self::Competition => &[
                "concorrente",
                "concorrência",
                "competitor",
                "competition",
                "market share",
                "participação de mercado",
                "rival",
                "perdendo clientes",
                "losing customers",
                "atrás do mercado",
                "behind the market",
                "benchmark",
            ],
            Self::PainQuantified => &[
                "horas por semana",
                "hours per week",
                "hours a week",
                "por mês",
                "per month",
                "por cento",
                "percent",
                "%",
                "r$",
                "us$",
                "dias de atraso",
                "days late",
                "vezes mais",
                "times slower",
            ],
            Self::Urgency => &[
                "urgente",
                "urgent",
                "imediatamente",
                "immediately",
                "asap",
                "prazo",
                "deadline",
                "este trimestre",
                "this quarter",
                "crítico",
                "critical",
                "pressão",
                "pressure",
            ],
            Self::Growth => &[
                "crescimento",
                "growth",
                "escalar",
                "scale",
                "expansão",
                "expand",
                "contratar",
                "hiring",
                "novo mercado",
                "new market",
                "receita",
                "revenue",
            ],
            Self::Cost => &[
                "custos",
                "alto custo",
                "custo alto",
                "cost",
                "caro",
                "expensive",
                "orçamento",
                "budget",
                "gasto",
                "spend",
                "overhead",
                "economia",
                "savings",
            ],
            Self::Quality => &[
                "bug",
                "defeito",
                "defect",
                "incidente",
                "incident",
                "retrabalho",
                "rework",
                "outage",
                "qualidade",
                "quality",
                "regressão",
                "regression",
            ],
            Self::NoSignal => &[],
        }
    }

    /// One-sentence explanation for a detected category
    fn reasoning(&self) -> &'static str {
        match self {
            Self::Innovation => {
                "The answer shows appetite for new technology; a follow-up can probe concrete adoption plans."
            }
            Self::Competition => {
                "The answer mentions competitive pressure; a follow-up can quantify the gap to competitors."
            }
            Self::PainQuantified => {
                "The answer quantifies a pain point; a follow-up can turn it into a measurable baseline."
            }
            Self::Urgency => {
                "The answer signals time pressure; a follow-up can clarify the deadline and what is at stake."
            }
            Self::Growth => {
                "The answer points at growth goals; a follow-up can explore where capacity limits growth."
            }
            Self::Cost => {
                "The answer raises cost concerns; a follow-up can locate the largest cost drivers."
            }
            Self::Quality => {
                "The answer reports quality problems; a follow-up can estimate their frequency and impact."
            }
            Self::NoSignal => "No category-specific keywords were found in the answer.",
        }
    }
}

impl fmt::Display for SignalCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-turn detection result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalResult {
    pub has_signals: bool,
    pub category: SignalCategory,
    /// Up to three matched keywords
    pub evidence: Vec<String>,
    pub match_count: usize,
    pub confidence: f64,
    pub reasoning: String,
}

impl SignalResult {
    fn none() -> Self {
        Self {
            has_signals: false,
            category: SignalCategory::NoSignal,
            evidence: Vec::new(),
            match_count: 0,
            confidence: 0.0,
            reasoning: SignalCategory::NoSignal.reasoning().to_string(),
        }
    }
}

/// Scores answers against the category keyword lists
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalDetector;

impl SignalDetector {
    pub fn new() -> Self {
        Self
    }

    pub fn detect(&self, answer: &str) -> SignalResult {
        if answer.trim().is_empty() {
            return SignalResult::none();
        }
        let text = answer.to_lowercase();

        let mut best: Option<(SignalCategory, Vec<&'static str>)> = None;
        for category in SignalCategory::PRIORITY {
            let matched: Vec<&'static str> = category
                .keywords()
                .iter()
                .copied()
                .filter(|kw| text.contains(kw))
                .collect();
            let matched = drop_nested(matched);
            let beats = match &best {
                Some((_, current)) => matched.len() > current.len(),
                None => !matched.is_empty(),
            };
            if beats {
                best = Some((category, matched));
            }
        }

        let Some((category, matched)) = best else {
            return SignalResult::none();
        };

        SignalResult {
            has_signals: true,
            category,
            evidence: matched
                .iter()
                .take(MAX_EVIDENCE)
                .map(|kw| kw.to_string())
                .collect(),
            match_count: matched.len(),
            confidence: confidence_for(matched.len()),
            reasoning: category.reasoning().to_string(),
        }
    }
}

/// Drop keywords contained in another matched keyword, so "incidente"
/// does not also count as "incident".
fn drop_nested(matched: Vec<&'static str>) -> Vec<&'static str> {
    matched
        .iter()
        .copied()
        .filter(|kw| !matched.iter().any(|other| other != kw && other.contains(kw)))
        .collect()
}

/// min(0.9, 0.3 + 0.2 per match): one match 0.5, two 0.7, three or more 0.9
pub fn confidence_for(match_count: usize) -> f64 {
    if match_count == 0 {
        return 0.0;
    }
    round_to((0.3 + match_count as f64 * 0.2).min(0.9), 2)
}
