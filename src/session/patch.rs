// src/session/patch.rs
// Typed, validated mutations for a ConversationContext

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use super::types::{Block, ConversationContext, FieldValue, Persona};
use crate::analysis::UncertaintyEntry;
use crate::error::{InterviewError, Result};

/// A set of changes applied atomically to one session.
///
/// Merge rules:
/// - list fields are unioned, keeping first-seen order
/// - scalar fields take the latest non-empty value
/// - topic and asked-question sets are unioned
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    persona: Option<Persona>,
    persona_confidence: Option<f64>,
    block: Option<Block>,
    data: BTreeMap<String, FieldValue>,
    topics: BTreeSet<String>,
    asked: Vec<String>,
    answered: u32,
    uncertainty: Vec<UncertaintyEntry>,
    follow_up: Option<(String, String)>,
    mismatch_reported: bool,
}

impl SessionPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persona(mut self, persona: Persona) -> Self {
        self.persona = Some(persona);
        self
    }

    /// Clamped to [0, 1] on apply
    pub fn persona_confidence(mut self, confidence: f64) -> Self {
        self.persona_confidence = Some(confidence);
        self
    }

    pub fn block(mut self, block: Block) -> Self {
        self.block = Some(block);
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.data.remove(&key) {
            Some(existing) => {
                let mut merged = existing;
                merge_value(&mut merged, value);
                self.data.insert(key, merged);
            }
            None => {
                self.data.insert(key, value);
            }
        }
        self
    }

    pub fn fields(mut self, data: impl IntoIterator<Item = (String, FieldValue)>) -> Self {
        for (key, value) in data {
            self = self.field(key, value);
        }
        self
    }

    pub fn topics(mut self, topics: impl IntoIterator<Item = String>) -> Self {
        self.topics.extend(topics);
        self
    }

    /// Mark a question as asked. Counted once per distinct id.
    pub fn asked(mut self, question_id: impl Into<String>) -> Self {
        self.asked.push(question_id.into());
        self
    }

    /// Count one answered question
    pub fn answered(mut self) -> Self {
        self.answered += 1;
        self
    }

    pub fn uncertainty(mut self, entry: UncertaintyEntry) -> Self {
        self.uncertainty.push(entry);
        self
    }

    /// Consume one dynamic follow-up and register its generated question.
    /// The whole patch is rejected if the allowance is already spent.
    pub fn follow_up(mut self, question_id: impl Into<String>, text: impl Into<String>) -> Self {
        let id = question_id.into();
        self.asked.push(id.clone());
        self.follow_up = Some((id, text.into()));
        self
    }

    pub fn mismatch_reported(mut self) -> Self {
        self.mismatch_reported = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply to a context. Validation happens before any field is touched,
    /// so a rejected patch leaves the context unchanged.
    pub(crate) fn apply(self, ctx: &mut ConversationContext, now: DateTime<Utc>) -> Result<()> {
        if self.follow_up.is_some() && ctx.dynamic_follow_ups_used >= ctx.max_follow_ups {
            return Err(InterviewError::FollowUpLimit {
                used: ctx.dynamic_follow_ups_used,
                max: ctx.max_follow_ups,
            });
        }
        if let Some(confidence) = self.persona_confidence {
            if confidence.is_nan() {
                return Err(InterviewError::validation("persona confidence is NaN"));
            }
        }

        if let Some(persona) = self.persona {
            ctx.persona = persona;
        }
        if let Some(confidence) = self.persona_confidence {
            ctx.persona_confidence = confidence.clamp(0.0, 1.0);
        }
        if let Some(block) = self.block {
            ctx.current_block = block;
        }

        for (key, value) in self.data {
            match ctx.extracted_data.get_mut(&key) {
                Some(existing) => merge_value(existing, value),
                None if !value.is_empty() => {
                    ctx.extracted_data.insert(key, value);
                }
                None => {}
            }
        }

        ctx.topics_covered.extend(
            self.topics
                .into_iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty()),
        );

        for id in self.asked {
            if !ctx.has_asked(&id) {
                ctx.asked_question_ids.push(id);
                ctx.questions_asked += 1;
            }
        }
        ctx.questions_answered += self.answered;

        for entry in self.uncertainty {
            ctx.uncertainty.record(entry);
        }

        if let Some((id, text)) = self.follow_up {
            ctx.dynamic_follow_ups_used += 1;
            ctx.dynamic_questions.insert(id, text);
        }

        if self.mismatch_reported {
            ctx.mismatch_reported = true;
        }

        ctx.last_updated = now.max(ctx.created_at);
        Ok(())
    }
}

/// Merge `incoming` into `existing`
fn merge_value(existing: &mut FieldValue, incoming: FieldValue) {
    match (existing, incoming) {
        (FieldValue::List(current), FieldValue::List(new_items)) => {
            for item in new_items {
                if !current.contains(&item) {
                    current.push(item);
                }
            }
        }
        (FieldValue::List(current), FieldValue::Text(item)) => {
            if !item.trim().is_empty() && !current.contains(&item) {
                current.push(item);
            }
        }
        (_, incoming) if incoming.is_empty() => {}
        (slot, incoming) => *slot = incoming,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::UncertaintyCategory;
    use chrono::{Duration, TimeZone};

    fn context(max_follow_ups: u32) -> (ConversationContext, DateTime<Utc>) {
        let now = Utc.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap();
        (
            ConversationContext::new("s1".into(), now, Persona::default(), 0.5, max_follow_ups),
            now,
        )
    }

    fn list(items: &[&str]) -> FieldValue {
        FieldValue::List(items.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_lists_are_unioned() {
        let (mut ctx, now) = context(3);
        SessionPatch::new()
            .field("tools", list(&["copilot", "jira"]))
            .apply(&mut ctx, now)
            .unwrap();
        SessionPatch::new()
            .field("tools", list(&["jira", "github"]))
            .apply(&mut ctx, now)
            .unwrap();

        assert_eq!(
            ctx.extracted_data()["tools"],
            list(&["copilot", "jira", "github"])
        );
    }

    #[test]
    fn test_scalars_take_latest_non_empty() {
        let (mut ctx, now) = context(3);
        SessionPatch::new()
            .field("team_size", FieldValue::Number(12.0))
            .field("role", "CTO")
            .apply(&mut ctx, now)
            .unwrap();
        SessionPatch::new()
            .field("team_size", FieldValue::Number(15.0))
            .field("role", "   ")
            .apply(&mut ctx, now)
            .unwrap();

        assert_eq!(ctx.extracted_data()["team_size"], FieldValue::Number(15.0));
        assert_eq!(ctx.extracted_data()["role"], FieldValue::Text("CTO".into()));
    }

    #[test]
    fn test_empty_value_not_inserted() {
        let (mut ctx, now) = context(3);
        SessionPatch::new().field("role", "").apply(&mut ctx, now).unwrap();
        assert!(!ctx.extracted_data().contains_key("role"));
    }

    #[test]
    fn test_topics_union_and_normalized() {
        let (mut ctx, now) = context(3);
        SessionPatch::new()
            .topics(["velocity".to_string(), " Cost ".to_string()])
            .apply(&mut ctx, now)
            .unwrap();
        SessionPatch::new()
            .topics(["cost".to_string()])
            .apply(&mut ctx, now)
            .unwrap();
        let topics: Vec<&str> = ctx.topics_covered().iter().map(String::as_str).collect();
        assert_eq!(topics, vec!["cost", "velocity"]);
    }

    #[test]
    fn test_asked_counted_once_per_id() {
        let (mut ctx, now) = context(3);
        SessionPatch::new().asked("q1").apply(&mut ctx, now).unwrap();
        SessionPatch::new().asked("q1").asked("q2").apply(&mut ctx, now).unwrap();
        assert_eq!(ctx.questions_asked(), 2);
        assert_eq!(ctx.asked_question_ids(), &["q1".to_string(), "q2".to_string()]);
    }

    #[test]
    fn test_follow_up_increments_until_limit() {
        let (mut ctx, now) = context(2);
        for i in 0..2 {
            SessionPatch::new()
                .follow_up(format!("dyn-{i}"), "Why?")
                .apply(&mut ctx, now)
                .unwrap();
        }
        assert_eq!(ctx.dynamic_follow_ups_used(), 2);
        assert_eq!(ctx.dynamic_question("dyn-1"), Some("Why?"));

        let err = SessionPatch::new()
            .answered()
            .follow_up("dyn-2", "And?")
            .apply(&mut ctx, now)
            .unwrap_err();
        assert!(matches!(err, InterviewError::FollowUpLimit { used: 2, max: 2 }));
        // rejected patch left everything untouched
        assert_eq!(ctx.dynamic_follow_ups_used(), 2);
        assert_eq!(ctx.questions_answered(), 0);
        assert!(!ctx.has_asked("dyn-2"));
    }

    #[test]
    fn test_persona_confidence_clamped_on_apply() {
        let (mut ctx, now) = context(3);
        SessionPatch::new()
            .persona(Persona::FinanceOps)
            .persona_confidence(-0.4)
            .apply(&mut ctx, now)
            .unwrap();
        assert_eq!(ctx.persona(), Persona::FinanceOps);
        assert_eq!(ctx.persona_confidence(), 0.0);

        let err = SessionPatch::new()
            .persona_confidence(f64::NAN)
            .apply(&mut ctx, now)
            .unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_last_updated_never_before_created() {
        let (mut ctx, now) = context(3);
        SessionPatch::new()
            .answered()
            .apply(&mut ctx, now - Duration::minutes(5))
            .unwrap();
        assert_eq!(ctx.last_updated(), ctx.created_at());

        SessionPatch::new()
            .answered()
            .apply(&mut ctx, now + Duration::minutes(5))
            .unwrap();
        assert_eq!(ctx.last_updated(), now + Duration::minutes(5));
        assert_eq!(ctx.questions_answered(), 2);
    }

    #[test]
    fn test_uncertainty_appended_in_order() {
        let (mut ctx, now) = context(3);
        for qid in ["q1", "q2"] {
            SessionPatch::new()
                .uncertainty(UncertaintyEntry {
                    question_id: qid.into(),
                    question_text: "?".into(),
                    category: UncertaintyCategory::Explicit,
                    confidence: 0.95,
                })
                .apply(&mut ctx, now)
                .unwrap();
        }
        let ids: Vec<&str> = ctx
            .uncertainty()
            .entries()
            .iter()
            .map(|e| e.question_id.as_str())
            .collect();
        assert_eq!(ids, vec!["q1", "q2"]);
        assert!(ctx.uncertainty().detect_persona_mismatch().has_mismatch);
    }

    #[test]
    fn test_builder_merges_repeated_field() {
        let patch = SessionPatch::new()
            .field("tools", list(&["a"]))
            .field("tools", list(&["b", "a"]));
        let (mut ctx, now) = context(3);
        patch.apply(&mut ctx, now).unwrap();
        assert_eq!(ctx.extracted_data()["tools"], list(&["a", "b"]));
        assert!(SessionPatch::new().is_empty());
    }
}
