// src/analysis/uncertainty.rs
// Detects "I don't know", deflecting and vague answers, and tracks them per
// session to spot respondents who were routed to the wrong persona.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::budget::round_to;

const EXPLICIT_CONFIDENCE: f64 = 0.95;
const DEFLECTION_CONFIDENCE: f64 = 0.85;
const VAGUE_PER_MATCH: f64 = 0.3;
const VAGUE_CAP: f64 = 0.7;
/// Answers shorter than this (in characters) with no digit look evasive
const TERSE_LENGTH: usize = 10;
const TERSE_CONFIDENCE: f64 = 0.5;

const EXPLICIT_PHRASES: &[&str] = &[
    "não sei",
    "nao sei",
    "não faço ideia",
    "nao faco ideia",
    "não tenho visibilidade",
    "nao tenho visibilidade",
    "sem visibilidade",
    "não saberia dizer",
    "não posso dizer",
    "desconheço",
    "i don't know",
    "i do not know",
    "don't know",
    "no idea",
    "no visibility",
    "can't say",
    "cannot say",
];

const DEFLECTION_PHRASES: &[&str] = &[
    "não é minha área",
    "nao e minha area",
    "não é comigo",
    "pergunte ao",
    "pergunte à",
    "pergunte para",
    "melhor perguntar",
    "outra área",
    "outro time",
    "that's not my area",
    "not my area",
    "not my department",
    "ask the",
    "ask my",
    "someone else",
    "another team",
];

const VAGUE_PHRASES: &[&str] = &[
    "mais ou menos",
    "talvez",
    "depende",
    "difícil dizer",
    "dificil dizer",
    "acho que",
    "não tenho certeza",
    "kind of",
    "sort of",
    "maybe",
    "hard to say",
    "depends",
    "probably",
    "not sure",
    "i guess",
];

/// Kind of uncertainty, in detection priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncertaintyCategory {
    Explicit,
    Deflection,
    Vague,
    #[serde(rename = "none")]
    NoUncertainty,
}

impl fmt::Display for UncertaintyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Explicit => "explicit",
            Self::Deflection => "deflection",
            Self::Vague => "vague",
            Self::NoUncertainty => "none",
        };
        f.write_str(s)
    }
}

/// Per-answer detection result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UncertaintyResult {
    pub has_uncertainty: bool,
    pub confidence: f64,
    pub category: UncertaintyCategory,
    pub matched_phrases: Vec<String>,
}

impl UncertaintyResult {
    fn none() -> Self {
        Self {
            has_uncertainty: false,
            confidence: 0.0,
            category: UncertaintyCategory::NoUncertainty,
            matched_phrases: Vec::new(),
        }
    }

    fn flagged(category: UncertaintyCategory, confidence: f64, matched: Vec<&str>) -> Self {
        Self {
            has_uncertainty: true,
            confidence,
            category,
            matched_phrases: matched.into_iter().map(str::to_string).collect(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UncertaintyDetector;

impl UncertaintyDetector {
    pub fn new() -> Self {
        Self
    }

    /// Tiers are checked in order and the first hit wins; categories never blend.
    pub fn detect(&self, answer: &str) -> UncertaintyResult {
        let trimmed = answer.trim();
        if trimmed.is_empty() {
            return UncertaintyResult::none();
        }
        let text = normalize(trimmed);

        let explicit = matches(&text, EXPLICIT_PHRASES);
        if !explicit.is_empty() {
            return UncertaintyResult::flagged(
                UncertaintyCategory::Explicit,
                EXPLICIT_CONFIDENCE,
                explicit,
            );
        }

        let deflection = matches(&text, DEFLECTION_PHRASES);
        if !deflection.is_empty() {
            return UncertaintyResult::flagged(
                UncertaintyCategory::Deflection,
                DEFLECTION_CONFIDENCE,
                deflection,
            );
        }

        let vague = matches(&text, VAGUE_PHRASES);
        if !vague.is_empty() {
            let confidence = round_to((vague.len() as f64 * VAGUE_PER_MATCH).min(VAGUE_CAP), 2);
            return UncertaintyResult::flagged(UncertaintyCategory::Vague, confidence, vague);
        }

        if trimmed.chars().count() < TERSE_LENGTH && !trimmed.chars().any(|c| c.is_ascii_digit()) {
            return UncertaintyResult::flagged(UncertaintyCategory::Vague, TERSE_CONFIDENCE, Vec::new());
        }

        UncertaintyResult::none()
    }
}

/// Lowercase and fold typographic apostrophes so "don’t" matches "don't"
fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

fn matches<'a>(text: &str, phrases: &[&'a str]) -> Vec<&'a str> {
    phrases.iter().copied().filter(|p| text.contains(p)).collect()
}

// ============================================================================
// Per-session tracking
// ============================================================================

/// One answer that was flagged as uncertain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UncertaintyEntry {
    pub question_id: String,
    pub question_text: String,
    pub category: UncertaintyCategory,
    pub confidence: f64,
}

/// Diagnostic about a likely persona/question mismatch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaMismatch {
    pub has_mismatch: bool,
    pub confidence: f64,
    pub reason: String,
    pub suggested_action: Option<String>,
    /// Mean confidence of the recorded uncertain answers
    pub average_confidence: f64,
    pub uncertain_answers: usize,
}

/// Ordered history of uncertain answers for one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyTracker {
    entries: Vec<UncertaintyEntry>,
}

impl UncertaintyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detect uncertainty in an answer and keep it if flagged
    pub fn add_answer(
        &mut self,
        question_id: &str,
        question_text: &str,
        answer_text: &str,
    ) -> UncertaintyResult {
        let result = UncertaintyDetector::new().detect(answer_text);
        if result.has_uncertainty {
            self.record(UncertaintyEntry {
                question_id: question_id.to_string(),
                question_text: question_text.to_string(),
                category: result.category,
                confidence: result.confidence,
            });
        }
        result
    }

    /// Append an already-detected entry
    pub fn record(&mut self, entry: UncertaintyEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[UncertaintyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    pub fn detect_persona_mismatch(&self) -> PersonaMismatch {
        let total = self.entries.len();
        let average = if total > 0 {
            round_to(
                self.entries.iter().map(|e| e.confidence).sum::<f64>() / total as f64,
                2,
            )
        } else {
            0.0
        };

        if total < 2 {
            return PersonaMismatch {
                has_mismatch: false,
                confidence: 0.0,
                reason: format!("only {} uncertain answer(s) recorded", total),
                suggested_action: None,
                average_confidence: average,
                uncertain_answers: total,
            };
        }

        let explicit = self
            .entries
            .iter()
            .filter(|e| e.category == UncertaintyCategory::Explicit)
            .count();
        if explicit >= 2 {
            return PersonaMismatch {
                has_mismatch: true,
                confidence: 0.9,
                reason: format!(
                    "{} answers explicitly stated a lack of knowledge",
                    explicit
                ),
                suggested_action: Some(
                    "Confirm the respondent's role and route to questions for a better-matching persona"
                        .to_string(),
                ),
                average_confidence: average,
                uncertain_answers: total,
            };
        }

        if total >= 3 && average >= 0.6 {
            return PersonaMismatch {
                has_mismatch: true,
                confidence: 0.7,
                reason: format!(
                    "{} uncertain answers with average confidence {:.2}",
                    total, average
                ),
                suggested_action: Some(
                    "Simplify upcoming questions or offer a skip option".to_string(),
                ),
                average_confidence: average,
                uncertain_answers: total,
            };
        }

        PersonaMismatch {
            has_mismatch: false,
            confidence: 0.0,
            reason: format!(
                "{} uncertain answers, average confidence {:.2} below mismatch thresholds",
                total, average
            ),
            suggested_action: None,
            average_confidence: average,
            uncertain_answers: total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(text: &str) -> UncertaintyResult {
        UncertaintyDetector::new().detect(text)
    }

    // ============================================================================
    // Detector
    // ============================================================================

    #[test]
    fn test_nao_sei_is_explicit() {
        let result = detect("não sei");
        assert!(result.has_uncertainty);
        assert_eq!(result.confidence, 0.95);
        assert_eq!(result.category, UncertaintyCategory::Explicit);
        assert_eq!(result.matched_phrases, vec!["não sei".to_string()]);
    }

    #[test]
    fn test_english_explicit_with_curly_apostrophe() {
        let result = detect("Honestly I don’t know how long releases take");
        assert_eq!(result.category, UncertaintyCategory::Explicit);
        assert_eq!(result.confidence, 0.95);
    }

    #[test]
    fn test_explicit_beats_vague() {
        let result = detect("maybe, but really I have no visibility into that");
        assert_eq!(result.category, UncertaintyCategory::Explicit);
    }

    #[test]
    fn test_deflection() {
        let result = detect("That's not my area, ask the engineering lead");
        assert_eq!(result.category, UncertaintyCategory::Deflection);
        assert_eq!(result.confidence, 0.85);
        assert!(result.matched_phrases.contains(&"not my area".to_string()));
    }

    #[test]
    fn test_vague_confidence_scales_and_caps() {
        assert_eq!(detect("maybe once a month or so").confidence, 0.3);
        assert_eq!(detect("it depends, maybe twice a week").confidence, 0.6);
        let capped = detect("kind of, maybe, it depends, hard to say");
        assert_eq!(capped.category, UncertaintyCategory::Vague);
        assert_eq!(capped.confidence, 0.7);
    }

    #[test]
    fn test_terse_answer_without_digit_is_vague() {
        let result = detect("ok");
        assert_eq!(result.category, UncertaintyCategory::Vague);
        assert_eq!(result.confidence, 0.5);
        assert!(result.matched_phrases.is_empty());
    }

    #[test]
    fn test_terse_answer_with_digit_is_fine() {
        assert!(!detect("40%").has_uncertainty);
        assert!(!detect("3 teams").has_uncertainty);
    }

    #[test]
    fn test_confident_answer() {
        let result = detect("We deploy twice a day through a fully automated pipeline");
        assert!(!result.has_uncertainty);
        assert_eq!(result.category, UncertaintyCategory::NoUncertainty);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_empty_answer() {
        assert!(!detect("   ").has_uncertainty);
    }

    // ============================================================================
    // Tracker
    // ============================================================================

    #[test]
    fn test_tracker_only_records_uncertain_answers() {
        let mut tracker = UncertaintyTracker::new();
        tracker.add_answer("q1", "How often do you deploy?", "Every day at 10am");
        assert!(tracker.is_empty());
        tracker.add_answer("q2", "What is your MTTR?", "não sei");
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.entries()[0].question_id, "q2");
        assert_eq!(tracker.entries()[0].category, UncertaintyCategory::Explicit);
    }

    #[test]
    fn test_fewer_than_two_entries_is_no_mismatch() {
        let mut tracker = UncertaintyTracker::new();
        tracker.add_answer("q1", "Q", "não sei");
        let mismatch = tracker.detect_persona_mismatch();
        assert!(!mismatch.has_mismatch);
        assert_eq!(mismatch.uncertain_answers, 1);
    }

    #[test]
    fn test_two_explicit_entries_trigger_mismatch() {
        let mut tracker = UncertaintyTracker::new();
        tracker.add_answer("q1", "Q1", "não sei");
        tracker.add_answer("q2", "Q2", "I don't know");
        let mismatch = tracker.detect_persona_mismatch();
        assert!(mismatch.has_mismatch);
        assert_eq!(mismatch.confidence, 0.9);
        assert!(mismatch.reason.contains('2'));
        assert!(mismatch.suggested_action.is_some());
    }

    #[test]
    fn test_sessions_tracked_independently() {
        let mut a = UncertaintyTracker::new();
        let mut b = UncertaintyTracker::new();
        a.add_answer("q1", "Q1", "não sei");
        b.add_answer("q1", "Q1", "não sei");
        assert!(!a.detect_persona_mismatch().has_mismatch);
        assert!(!b.detect_persona_mismatch().has_mismatch);

        a.add_answer("q2", "Q2", "não sei");
        let mismatch = a.detect_persona_mismatch();
        assert!(mismatch.has_mismatch);
        assert_eq!(mismatch.confidence, 0.9);
        assert!(!b.detect_persona_mismatch().has_mismatch);
    }

    #[test]
    fn test_many_confident_uncertain_answers_trigger_mismatch() {
        let mut tracker = UncertaintyTracker::new();
        tracker.add_answer("q1", "Q1", "not my area, ask the CTO"); // 0.85
        tracker.add_answer("q2", "Q2", "it depends, maybe"); // 0.6
        tracker.add_answer("q3", "Q3", "someone else owns that"); // 0.85
        let mismatch = tracker.detect_persona_mismatch();
        assert!(mismatch.has_mismatch);
        assert_eq!(mismatch.confidence, 0.7);
    }

    #[test]
    fn test_low_average_reports_observed_confidence() {
        let mut tracker = UncertaintyTracker::new();
        tracker.add_answer("q1", "Q1", "maybe once a month or so"); // 0.3
        tracker.add_answer("q2", "Q2", "probably weekly releases"); // 0.3
        tracker.add_answer("q3", "Q3", "ok"); // 0.5
        let mismatch = tracker.detect_persona_mismatch();
        assert!(!mismatch.has_mismatch);
        assert_eq!(mismatch.average_confidence, 0.37);
        assert!(mismatch.reason.contains("0.37"));
    }

    #[test]
    fn test_reset_clears_history() {
        let mut tracker = UncertaintyTracker::new();
        tracker.add_answer("q1", "Q1", "não sei");
        tracker.add_answer("q2", "Q2", "não sei");
        tracker.reset();
        assert!(tracker.is_empty());
        assert!(!tracker.detect_persona_mismatch().has_mismatch);
    }
}
