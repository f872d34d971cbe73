// src/orchestrator.rs
// Drives one interview turn at a time: detect, merge, decide, ask

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analysis::{
    PersonaMismatch, SignalDetector, SignalResult, TopicCoverage, TopicTracker,
    UncertaintyDetector, UncertaintyEntry, UncertaintyResult,
};
use crate::budget::{BudgetSummary, CostLedger, Environment, round_to};
use crate::error::{InterviewError, Result};
use crate::generation::{Generation, GenerationError, PromptContext, TextGenerator};
use crate::policy::{Decision, DenyReason, FollowUpPolicy, TurnFacts};
use crate::pool::{Question, QuestionPool};
use crate::session::{Block, ConversationContext, FieldValue, Persona, SessionPatch, SessionStore};
use crate::telemetry::{EngineEvent, EventSink};

/// Prefix of generated question ids. Reserved; the pool may not use it.
pub const DYNAMIC_ID_PREFIX: &str = "dyn-";
/// Service tag on ledger entries for follow-up generation
pub const FOLLOW_UP_SERVICE: &str = "follow-up";

/// Tunables that are not owned by a component
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub generation_timeout: Duration,
    pub environment: Environment,
    pub estimated_input_tokens: u64,
    pub estimated_output_tokens: u64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            generation_timeout: Duration::from_secs(15),
            environment: Environment::Production,
            estimated_input_tokens: 800,
            estimated_output_tokens: 200,
        }
    }
}

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    AskNext,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionSource {
    Pool,
    Dynamic,
}

/// A question as shown to the respondent
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextQuestion {
    pub id: String,
    pub text: String,
    pub block: Block,
    pub source: QuestionSource,
}

impl NextQuestion {
    fn from_pool(question: &Question) -> Self {
        Self {
            id: question.id.clone(),
            text: question.text.clone(),
            block: question.block,
            source: QuestionSource::Pool,
        }
    }
}

/// Progress snapshot returned with every turn
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: String,
    pub persona: Persona,
    pub persona_confidence: f64,
    pub current_block: Block,
    pub questions_asked: u32,
    pub questions_answered: u32,
    pub dynamic_follow_ups_used: u32,
    pub follow_ups_remaining: u32,
    pub coverage: TopicCoverage,
    pub persona_mismatch: PersonaMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOutcome {
    pub session_id: String,
    pub first_question: Option<NextQuestion>,
    pub session_status: SessionStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOutcome {
    pub action: NextAction,
    pub next_question: Option<NextQuestion>,
    pub session_status: SessionStatus,
    pub signal: SignalResult,
    pub uncertainty: UncertaintyResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSummary {
    pub session_id: String,
    pub persona: Persona,
    pub questions_asked: u32,
    pub questions_answered: u32,
    pub dynamic_follow_ups_used: u32,
    pub coverage: TopicCoverage,
    pub topics_covered: Vec<String>,
    pub uncertain_answers: usize,
    pub persona_mismatch: PersonaMismatch,
    pub duration_secs: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOutcome {
    pub final_data: BTreeMap<String, FieldValue>,
    pub summary: CompletionSummary,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct Orchestrator {
    store: Arc<SessionStore>,
    ledger: Arc<CostLedger>,
    pool: Arc<dyn QuestionPool>,
    generator: Arc<dyn TextGenerator>,
    sink: Arc<dyn EventSink>,
    policy: FollowUpPolicy,
    signals: SignalDetector,
    uncertainty: UncertaintyDetector,
    topics: TopicTracker,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        ledger: Arc<CostLedger>,
        pool: Arc<dyn QuestionPool>,
        generator: Arc<dyn TextGenerator>,
        sink: Arc<dyn EventSink>,
        settings: OrchestratorSettings,
    ) -> Self {
        let policy = FollowUpPolicy::new(
            ledger.clone(),
            settings.estimated_input_tokens,
            settings.estimated_output_tokens,
        );
        Self {
            store,
            ledger,
            pool,
            generator,
            sink,
            policy,
            signals: SignalDetector::new(),
            uncertainty: UncertaintyDetector::new(),
            topics: TopicTracker::new(),
            settings,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn ledger(&self) -> &Arc<CostLedger> {
        &self.ledger
    }

    pub fn budget(&self) -> BudgetSummary {
        self.ledger.summarize()
    }

    /// Open a session and pick its first question
    pub fn start(
        &self,
        persona: Option<Persona>,
        seed: BTreeMap<String, FieldValue>,
    ) -> Result<StartOutcome> {
        let ctx = self.store.create(persona, seed)?;
        let session_id = ctx.session_id().to_string();
        let (first, ctx) = self.advance_to_pool_question(&ctx)?;

        info!(
            session_id = %session_id,
            persona = %ctx.persona(),
            first_question = ?first.as_ref().map(|q| q.id.as_str()),
            "Interview started"
        );

        Ok(StartOutcome {
            session_id,
            first_question: first,
            session_status: self.status_of(&ctx),
        })
    }

    /// Process one answer and decide what to ask next
    pub async fn answer(
        &self,
        session_id: &str,
        question_id: &str,
        answer: &str,
    ) -> Result<AnswerOutcome> {
        if session_id.trim().is_empty() {
            return Err(InterviewError::validation("sessionId is required"));
        }
        if question_id.trim().is_empty() {
            return Err(InterviewError::validation("questionId is required"));
        }
        if answer.trim().is_empty() {
            return Err(InterviewError::validation("answer is required"));
        }

        let ctx = self.store.get(session_id)?;
        let (question_text, answer_key) = self.resolve_question(&ctx, question_id)?;

        // Detection is pure; run it before touching the session
        let signal = self.signals.detect(answer);
        let uncertainty = self.uncertainty.detect(answer);
        let detected_topics = self.topics.detect_topics(answer);

        let mut patch = SessionPatch::new()
            .asked(question_id)
            .answered()
            .field(answer_key, answer.trim())
            .topics(detected_topics);
        if uncertainty.has_uncertainty {
            patch = patch.uncertainty(UncertaintyEntry {
                question_id: question_id.to_string(),
                question_text: question_text.clone(),
                category: uncertainty.category,
                confidence: uncertainty.confidence,
            });
        }
        let ctx = self.store.update(session_id, patch)?;
        let ctx = self.report_mismatch(ctx)?;

        // The interview is over; keep the answer but never pay for a follow-up
        if ctx.current_block().is_terminal() {
            debug!(session_id = %session_id, "Answer after completion, nothing left to ask");
            return Ok(AnswerOutcome {
                action: NextAction::End,
                next_question: None,
                session_status: self.status_of(&ctx),
                signal,
                uncertainty,
            });
        }

        let decision = self.policy.evaluate(TurnFacts {
            follow_ups_used: ctx.dynamic_follow_ups_used(),
            max_follow_ups: ctx.max_follow_ups(),
            answer,
            signal: &signal,
        });

        let reason = match decision {
            Decision::AskFollowUp { .. } => {
                match self.follow_up(&ctx, &question_text, answer, &signal).await {
                    Ok((question, ctx)) => {
                        return Ok(AnswerOutcome {
                            action: NextAction::AskNext,
                            next_question: Some(question),
                            session_status: self.status_of(&ctx),
                            signal,
                            uncertainty,
                        });
                    }
                    Err(reason) => reason,
                }
            }
            Decision::UsePoolQuestion { reason } => reason,
        };

        debug!(
            session_id = %session_id,
            reason = %reason,
            "Using pool question"
        );
        // re-read so a racing turn's block change is not overwritten
        let ctx = self.store.get(session_id)?;
        let (next, ctx) = self.advance_to_pool_question(&ctx)?;
        let action = if next.is_some() {
            NextAction::AskNext
        } else {
            NextAction::End
        };

        Ok(AnswerOutcome {
            action,
            next_question: next,
            session_status: self.status_of(&ctx),
            signal,
            uncertainty,
        })
    }

    /// Current progress of a session
    pub fn status(&self, session_id: &str) -> Result<SessionStatus> {
        if session_id.trim().is_empty() {
            return Err(InterviewError::validation("sessionId is required"));
        }
        let ctx = self.store.get(session_id)?;
        Ok(self.status_of(&ctx))
    }

    /// Finish a session: return its data and remove it from the store
    pub fn complete(&self, session_id: &str) -> Result<CompletionOutcome> {
        if session_id.trim().is_empty() {
            return Err(InterviewError::validation("sessionId is required"));
        }
        let ctx = self.store.get(session_id)?;
        let coverage = self.topics.coverage(ctx.topics_covered());

        let summary = CompletionSummary {
            session_id: ctx.session_id().to_string(),
            persona: ctx.persona(),
            questions_asked: ctx.questions_asked(),
            questions_answered: ctx.questions_answered(),
            dynamic_follow_ups_used: ctx.dynamic_follow_ups_used(),
            coverage,
            topics_covered: ctx.topics_covered().iter().cloned().collect(),
            uncertain_answers: ctx.uncertainty().len(),
            persona_mismatch: ctx.uncertainty().detect_persona_mismatch(),
            duration_secs: (ctx.last_updated() - ctx.created_at()).num_seconds(),
        };

        self.store.delete(session_id);
        self.sink.emit(EngineEvent::SessionCompleted {
            session_id: session_id.to_string(),
        });

        Ok(CompletionOutcome {
            final_data: ctx.extracted_data().clone(),
            summary,
        })
    }

    // ------------------------------------------------------------------------
    // Turn steps
    // ------------------------------------------------------------------------

    /// Question text and the extracted-data key its answer is stored under
    fn resolve_question(
        &self,
        ctx: &ConversationContext,
        question_id: &str,
    ) -> Result<(String, String)> {
        if question_id.starts_with(DYNAMIC_ID_PREFIX) {
            return ctx
                .dynamic_question(question_id)
                .map(|text| (text.to_string(), question_id.to_string()))
                .ok_or_else(|| {
                    InterviewError::validation(format!("unknown question id '{}'", question_id))
                });
        }
        self.pool
            .lookup(question_id)
            .map(|q| (q.text.clone(), q.answer_key().to_string()))
            .ok_or_else(|| {
                InterviewError::validation(format!("unknown question id '{}'", question_id))
            })
    }

    /// Emit a persona mismatch once per session and lower persona confidence
    fn report_mismatch(&self, ctx: ConversationContext) -> Result<ConversationContext> {
        if ctx.mismatch_reported() {
            return Ok(ctx);
        }
        let mismatch = ctx.uncertainty().detect_persona_mismatch();
        if !mismatch.has_mismatch {
            return Ok(ctx);
        }

        warn!(
            session_id = %ctx.session_id(),
            persona = %ctx.persona(),
            confidence = mismatch.confidence,
            "Persona mismatch detected"
        );
        self.sink.emit(EngineEvent::PersonaMismatch {
            session_id: ctx.session_id().to_string(),
            confidence: mismatch.confidence,
            reason: mismatch.reason.clone(),
        });

        let lowered = ctx
            .persona_confidence()
            .min(round_to(1.0 - mismatch.confidence, 2));
        self.store.update(
            ctx.session_id(),
            SessionPatch::new()
                .mismatch_reported()
                .persona_confidence(lowered),
        )
    }

    /// Generate, price and register a follow-up question.
    ///
    /// Any failure comes back as the reason to fall back to the pool.
    async fn follow_up(
        &self,
        ctx: &ConversationContext,
        question_text: &str,
        answer: &str,
        signal: &SignalResult,
    ) -> std::result::Result<(NextQuestion, ConversationContext), DenyReason> {
        let coverage = self.topics.coverage(ctx.topics_covered());
        let prompt = PromptContext {
            persona: ctx.persona(),
            block: ctx.current_block(),
            question_text: question_text.to_string(),
            answer_text: answer.to_string(),
            signal: signal.clone(),
            covered_topics: ctx.topics_covered().iter().cloned().collect(),
            missing_topics: coverage.missing,
        };

        let generation = match self.generate(&prompt).await {
            Ok(generation) => generation,
            Err(e) => {
                if let Some((input_tokens, output_tokens)) = e.billed_usage() {
                    self.ledger.record(
                        FOLLOW_UP_SERVICE,
                        input_tokens,
                        output_tokens,
                        self.settings.environment,
                        None,
                    );
                }
                warn!(
                    session_id = %ctx.session_id(),
                    generator = %self.generator.name(),
                    error = %e,
                    "Follow-up generation failed, falling back to pool"
                );
                self.sink.emit(EngineEvent::GenerationFailed {
                    session_id: ctx.session_id().to_string(),
                    error: e.to_string(),
                });
                return Err(DenyReason::GenerationFailed(e.to_string()));
            }
        };

        // Money is spent once the provider answered; record before anything
        // else can fail.
        let question_id = format!("{}{}", DYNAMIC_ID_PREFIX, Uuid::new_v4());
        self.ledger.record(
            FOLLOW_UP_SERVICE,
            generation.input_tokens,
            generation.output_tokens,
            self.settings.environment,
            Some(&question_id),
        );

        let ctx = match self.store.update(
            ctx.session_id(),
            SessionPatch::new().follow_up(question_id.clone(), generation.text.clone()),
        ) {
            Ok(ctx) => ctx,
            Err(e) => {
                // A racing turn used the last follow-up, or the session is gone
                debug!(session_id = %ctx.session_id(), error = %e, "Discarding generated follow-up");
                return Err(DenyReason::FollowUpsExhausted {
                    used: ctx.max_follow_ups(),
                    max: ctx.max_follow_ups(),
                });
            }
        };

        info!(
            session_id = %ctx.session_id(),
            question_id = %question_id,
            follow_ups_used = ctx.dynamic_follow_ups_used(),
            "Asking dynamic follow-up"
        );

        Ok((
            NextQuestion {
                id: question_id,
                text: generation.text,
                block: ctx.current_block(),
                source: QuestionSource::Dynamic,
            },
            ctx,
        ))
    }

    async fn generate(&self, prompt: &PromptContext) -> std::result::Result<Generation, GenerationError> {
        let timeout = self.settings.generation_timeout;
        match tokio::time::timeout(timeout, self.generator.generate(prompt)).await {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(timeout)),
        }
    }

    /// Pick the next unasked pool question, moving through blocks as each one
    /// runs out. Returns `None` once the interview reaches completion.
    fn advance_to_pool_question(
        &self,
        ctx: &ConversationContext,
    ) -> Result<(Option<NextQuestion>, ConversationContext)> {
        let mut block = ctx.current_block();
        let next = loop {
            if block.is_terminal() {
                break None;
            }
            if let Some(question) =
                self.pool
                    .next_for_persona(block, ctx.persona(), ctx.asked_question_ids())
            {
                break Some(question);
            }
            block = block.next();
        };

        let mut patch = SessionPatch::new();
        if block != ctx.current_block() {
            debug!(session_id = %ctx.session_id(), block = %block, "Advancing block");
            patch = patch.block(block);
        }
        if let Some(question) = &next {
            patch = patch.asked(question.id.clone());
        }

        let ctx = if patch.is_empty() {
            ctx.clone()
        } else {
            self.store.update(ctx.session_id(), patch)?
        };
        Ok((next.as_ref().map(NextQuestion::from_pool), ctx))
    }

    fn status_of(&self, ctx: &ConversationContext) -> SessionStatus {
        SessionStatus {
            session_id: ctx.session_id().to_string(),
            persona: ctx.persona(),
            persona_confidence: ctx.persona_confidence(),
            current_block: ctx.current_block(),
            questions_asked: ctx.questions_asked(),
            questions_answered: ctx.questions_answered(),
            dynamic_follow_ups_used: ctx.dynamic_follow_ups_used(),
            follow_ups_remaining: ctx.follow_ups_remaining(),
            coverage: self.topics.coverage(ctx.topics_covered()),
            persona_mismatch: ctx.uncertainty().detect_persona_mismatch(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{BudgetLimits, Pricing};
    use crate::clock::ManualClock;
    use crate::pool::StaticQuestionPool;
    use crate::telemetry::MemorySink;
    use async_trait::async_trait;
    use chrono::{FixedOffset, TimeZone, Utc};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays queued replies; answers with a fixed question once empty
    #[derive(Default)]
    struct ScriptedGenerator {
        replies: Mutex<VecDeque<std::result::Result<Generation, GenerationError>>>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn failing_once() -> Self {
            let gen_ = Self::default();
            gen_.replies
                .lock()
                .push_back(Err(GenerationError::Provider("boom".into())));
            gen_
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            _context: &PromptContext,
        ) -> std::result::Result<Generation, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let next = self.replies.lock().pop_front();
            next.unwrap_or_else(|| {
                Ok(Generation {
                    text: "How often does that happen?".into(),
                    input_tokens: 1000,
                    output_tokens: 100,
                })
            })
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        generator: Arc<ScriptedGenerator>,
        sink: Arc<MemorySink>,
        clock: Arc<ManualClock>,
    }

    fn question(id: &str, block: Block, field: Option<&str>) -> Question {
        Question {
            id: id.into(),
            block,
            text: format!("Question {id}?"),
            field: field.map(str::to_string),
            personas: vec![],
        }
    }

    fn pool() -> StaticQuestionPool {
        StaticQuestionPool::new(vec![
            question("d1", Block::Discovery, Some("role")),
            question("d2", Block::Discovery, None),
            question("x1", Block::Expertise, None),
            question("r1", Block::RiskScan, Some("concerns")),
        ])
        .unwrap()
    }

    fn harness_with(generator: ScriptedGenerator, daily_limit: f64) -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 9, 2, 10, 0, 0).unwrap(),
        ));
        let sink = Arc::new(MemorySink::new());
        let ledger = Arc::new(CostLedger::new(
            Pricing::default(),
            BudgetLimits {
                daily_limit,
                ..BudgetLimits::default()
            },
            FixedOffset::east_opt(0).unwrap(),
            clock.clone(),
            sink.clone(),
        ));
        let store = Arc::new(SessionStore::new(
            chrono::Duration::minutes(30),
            3,
            clock.clone(),
            sink.clone(),
        ));
        let generator = Arc::new(generator);
        let orchestrator = Orchestrator::new(
            store,
            ledger,
            Arc::new(pool()),
            generator.clone(),
            sink.clone(),
            OrchestratorSettings {
                generation_timeout: Duration::from_millis(200),
                environment: Environment::Test,
                ..OrchestratorSettings::default()
            },
        );
        Harness {
            orchestrator,
            generator,
            sink,
            clock,
        }
    }

    fn harness() -> Harness {
        harness_with(ScriptedGenerator::default(), 5.0)
    }

    /// Three quality keywords: signal confidence 0.9
    const STRONG: &str = "Bugs, rework and an outage every single sprint";
    const PLAIN: &str = "We have about forty engineers in two offices";

    // ========================================================================
    // Start
    // ========================================================================

    #[test]
    fn test_start_asks_first_discovery_question() {
        let h = harness();
        let outcome = h.orchestrator.start(None, BTreeMap::new()).unwrap();
        let first = outcome.first_question.unwrap();
        assert_eq!(first.id, "d1");
        assert_eq!(first.source, QuestionSource::Pool);
        assert_eq!(outcome.session_status.questions_asked, 1);
        assert_eq!(outcome.session_status.current_block, Block::Discovery);
        assert_eq!(outcome.session_status.follow_ups_remaining, 3);
    }

    #[test]
    fn test_start_with_empty_pool_goes_to_completion() {
        let h = harness();
        let orchestrator = Orchestrator::new(
            h.orchestrator.store().clone(),
            h.orchestrator.ledger().clone(),
            Arc::new(StaticQuestionPool::default()),
            h.generator.clone(),
            h.sink.clone(),
            OrchestratorSettings::default(),
        );
        let outcome = orchestrator.start(Some(Persona::FinanceOps), BTreeMap::new()).unwrap();
        assert!(outcome.first_question.is_none());
        assert_eq!(outcome.session_status.current_block, Block::Completion);
    }

    // ========================================================================
    // Answer turns
    // ========================================================================

    #[tokio::test]
    async fn test_strong_signal_gets_dynamic_follow_up() {
        let h = harness();
        let sid = h.orchestrator.start(None, BTreeMap::new()).unwrap().session_id;

        let outcome = h.orchestrator.answer(&sid, "d1", STRONG).await.unwrap();
        assert_eq!(outcome.action, NextAction::AskNext);
        let next = outcome.next_question.unwrap();
        assert!(next.id.starts_with(DYNAMIC_ID_PREFIX));
        assert_eq!(next.source, QuestionSource::Dynamic);
        assert_eq!(next.text, "How often does that happen?");
        assert_eq!(outcome.session_status.dynamic_follow_ups_used, 1);
        assert_eq!(outcome.session_status.follow_ups_remaining, 2);

        // 1000 in * 0.003/1k + 100 out * 0.015/1k = 0.0045 -> 0.00
        let entries = h.orchestrator.ledger().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].service, FOLLOW_UP_SERVICE);
        assert_eq!(entries[0].request_id.as_deref(), Some(next.id.as_str()));
        assert_eq!(entries[0].environment, Environment::Test);
    }

    #[tokio::test]
    async fn test_answer_to_dynamic_question_resolves_text() {
        let h = harness();
        let sid = h.orchestrator.start(None, BTreeMap::new()).unwrap().session_id;
        let dyn_id = h
            .orchestrator
            .answer(&sid, "d1", STRONG)
            .await
            .unwrap()
            .next_question
            .unwrap()
            .id;

        let outcome = h.orchestrator.answer(&sid, &dyn_id, PLAIN).await.unwrap();
        assert_eq!(outcome.next_question.unwrap().id, "d2");

        let done = h.orchestrator.complete(&sid).unwrap();
        assert_eq!(done.final_data[&dyn_id], FieldValue::Text(PLAIN.into()));
        assert_eq!(done.final_data["role"], FieldValue::Text(STRONG.into()));
    }

    #[tokio::test]
    async fn test_follow_ups_never_exceed_max() {
        let h = harness();
        let sid = h.orchestrator.start(None, BTreeMap::new()).unwrap().session_id;

        let mut qid = "d1".to_string();
        for _ in 0..5 {
            let outcome = h.orchestrator.answer(&sid, &qid, STRONG).await.unwrap();
            assert!(outcome.session_status.dynamic_follow_ups_used <= 3);
            qid = outcome.next_question.unwrap().id;
        }
        let status = h.orchestrator.status(&sid).unwrap();
        assert_eq!(status.dynamic_follow_ups_used, 3);
        assert_eq!(status.follow_ups_remaining, 0);
        assert_eq!(h.generator.calls(), 3);
    }

    #[tokio::test]
    async fn test_generation_failure_falls_back_without_consuming_follow_up() {
        let h = harness_with(ScriptedGenerator::failing_once(), 5.0);
        let sid = h.orchestrator.start(None, BTreeMap::new()).unwrap().session_id;

        let outcome = h.orchestrator.answer(&sid, "d1", STRONG).await.unwrap();
        assert_eq!(outcome.action, NextAction::AskNext);
        assert_eq!(outcome.next_question.unwrap().id, "d2");
        assert_eq!(outcome.session_status.dynamic_follow_ups_used, 0);
        assert!(h.orchestrator.ledger().is_empty());
        assert_eq!(
            h.sink.count(|e| matches!(e, EngineEvent::GenerationFailed { .. })),
            1
        );
    }

    #[tokio::test]
    async fn test_generation_timeout_falls_back() {
        let h = harness_with(ScriptedGenerator::slow(Duration::from_secs(5)), 5.0);
        let sid = h.orchestrator.start(None, BTreeMap::new()).unwrap().session_id;

        let outcome = h.orchestrator.answer(&sid, "d1", STRONG).await.unwrap();
        assert_eq!(outcome.next_question.unwrap().source, QuestionSource::Pool);
        assert_eq!(outcome.session_status.dynamic_follow_ups_used, 0);
        let failures = h.sink.events();
        assert!(failures.iter().any(|e| matches!(
            e,
            EngineEvent::GenerationFailed { error, .. } if error.contains("timed out")
        )));
    }

    #[tokio::test]
    async fn test_budget_denial_skips_generation() {
        let h = harness_with(ScriptedGenerator::default(), 0.0);
        let sid = h.orchestrator.start(None, BTreeMap::new()).unwrap().session_id;

        let outcome = h.orchestrator.answer(&sid, "d1", STRONG).await.unwrap();
        assert_eq!(outcome.next_question.unwrap().id, "d2");
        assert_eq!(h.generator.calls(), 0);
        assert_eq!(
            h.sink.count(|e| matches!(e, EngineEvent::BudgetDenied { .. })),
            1
        );
    }

    #[tokio::test]
    async fn test_blocks_progress_to_end() {
        let h = harness();
        let sid = h.orchestrator.start(None, BTreeMap::new()).unwrap().session_id;

        let mut seen = vec!["d1".to_string()];
        let mut qid = "d1".to_string();
        let last = loop {
            let outcome = h.orchestrator.answer(&sid, &qid, PLAIN).await.unwrap();
            match outcome.next_question {
                Some(q) => {
                    qid = q.id.clone();
                    seen.push(q.id);
                }
                None => break outcome,
            }
        };
        assert_eq!(seen, vec!["d1", "d2", "x1", "r1"]);
        assert_eq!(last.action, NextAction::End);
        assert_eq!(last.session_status.current_block, Block::Completion);
        assert_eq!(last.session_status.questions_answered, 4);
    }

    #[tokio::test]
    async fn test_answer_after_end_skips_follow_up() {
        let h = harness();
        let sid = h.orchestrator.start(None, BTreeMap::new()).unwrap().session_id;

        let mut qid = "d1".to_string();
        while let Some(q) = h
            .orchestrator
            .answer(&sid, &qid, PLAIN)
            .await
            .unwrap()
            .next_question
        {
            qid = q.id;
        }

        let outcome = h.orchestrator.answer(&sid, "r1", STRONG).await.unwrap();
        assert_eq!(outcome.action, NextAction::End);
        assert!(outcome.next_question.is_none());
        assert!(outcome.signal.has_signals);
        assert_eq!(outcome.session_status.questions_answered, 5);
        assert_eq!(outcome.session_status.dynamic_follow_ups_used, 0);
        assert_eq!(h.generator.calls(), 0);
        assert!(h.orchestrator.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_empty_completion_is_still_billed() {
        let generator = ScriptedGenerator::default();
        generator
            .replies
            .lock()
            .push_back(Err(GenerationError::EmptyCompletion {
                input_tokens: 800,
                output_tokens: 200,
            }));
        let h = harness_with(generator, 5.0);
        let sid = h.orchestrator.start(None, BTreeMap::new()).unwrap().session_id;

        let outcome = h.orchestrator.answer(&sid, "d1", STRONG).await.unwrap();
        assert_eq!(outcome.next_question.unwrap().id, "d2");
        assert_eq!(outcome.session_status.dynamic_follow_ups_used, 0);

        let entries = h.orchestrator.ledger().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].input_tokens, 800);
        assert_eq!(entries[0].output_tokens, 200);
        assert_eq!(h.orchestrator.budget().today, 0.01);
    }

    #[tokio::test]
    async fn test_topics_accumulate_across_turns() {
        let h = harness();
        let sid = h.orchestrator.start(None, BTreeMap::new()).unwrap().session_id;
        h.orchestrator
            .answer(&sid, "d1", "Our lead time is long")
            .await
            .unwrap();
        let outcome = h
            .orchestrator
            .answer(&sid, "d2", "Governance and compliance slow us down")
            .await
            .unwrap();
        let coverage = outcome.session_status.coverage;
        assert_eq!(coverage.covered, vec!["velocity", "governance"]);
        assert_eq!(coverage.percentage, 40);
    }

    // ========================================================================
    // Persona mismatch
    // ========================================================================

    #[tokio::test]
    async fn test_persona_mismatch_reported_once() {
        let h = harness();
        let sid = h
            .orchestrator
            .start(Some(Persona::BoardExecutive), BTreeMap::new())
            .unwrap()
            .session_id;

        let first = h.orchestrator.answer(&sid, "d1", "não sei").await.unwrap();
        assert!(first.uncertainty.has_uncertainty);
        assert!(!first.session_status.persona_mismatch.has_mismatch);

        let second = h.orchestrator.answer(&sid, "d2", "I don't know").await.unwrap();
        assert!(second.session_status.persona_mismatch.has_mismatch);
        assert_eq!(second.session_status.persona_mismatch.confidence, 0.9);
        assert_eq!(second.session_status.persona_confidence, 0.1);

        h.orchestrator.answer(&sid, "x1", "no idea").await.unwrap();
        assert_eq!(
            h.sink.count(|e| matches!(e, EngineEvent::PersonaMismatch { .. })),
            1
        );
    }

    // ========================================================================
    // Errors
    // ========================================================================

    #[tokio::test]
    async fn test_validation_errors() {
        let h = harness();
        let sid = h.orchestrator.start(None, BTreeMap::new()).unwrap().session_id;

        for (s, q, a) in [("", "d1", PLAIN), (sid.as_str(), " ", PLAIN), (sid.as_str(), "d1", "  ")] {
            let err = h.orchestrator.answer(s, q, a).await.unwrap_err();
            assert!(matches!(err, InterviewError::Validation(_)), "{err}");
        }

        let err = h.orchestrator.answer(&sid, "nope", PLAIN).await.unwrap_err();
        assert!(err.to_string().contains("unknown question id 'nope'"));
        let err = h.orchestrator.answer(&sid, "dyn-forged", PLAIN).await.unwrap_err();
        assert!(matches!(err, InterviewError::Validation(_)));
    }

    #[tokio::test]
    async fn test_unknown_and_expired_sessions() {
        let h = harness();
        let err = h.orchestrator.answer("missing", "d1", PLAIN).await.unwrap_err();
        assert!(matches!(err, InterviewError::SessionNotFound(_)));

        let sid = h.orchestrator.start(None, BTreeMap::new()).unwrap().session_id;
        h.clock.advance(chrono::Duration::minutes(31));
        assert!(matches!(
            h.orchestrator.status(&sid),
            Err(InterviewError::SessionNotFound(_))
        ));
    }

    // ========================================================================
    // Completion
    // ========================================================================

    #[tokio::test]
    async fn test_complete_returns_data_and_deletes_session() {
        let h = harness();
        let mut seed = BTreeMap::new();
        seed.insert("company".to_string(), FieldValue::from("Acme"));
        let sid = h.orchestrator.start(None, seed).unwrap().session_id;
        h.orchestrator.answer(&sid, "d1", "Head of platform").await.unwrap();
        h.clock.advance(chrono::Duration::minutes(4));
        h.orchestrator.answer(&sid, "d2", "maybe").await.unwrap();

        let done = h.orchestrator.complete(&sid).unwrap();
        assert_eq!(done.final_data["company"], FieldValue::from("Acme"));
        assert_eq!(done.final_data["role"], FieldValue::from("Head of platform"));
        assert_eq!(done.final_data["d2"], FieldValue::from("maybe"));
        assert_eq!(done.summary.questions_answered, 2);
        assert_eq!(done.summary.uncertain_answers, 1);
        assert_eq!(done.summary.duration_secs, 240);

        assert!(matches!(
            h.orchestrator.status(&sid),
            Err(InterviewError::SessionNotFound(_))
        ));
        assert!(matches!(
            h.orchestrator.complete(&sid),
            Err(InterviewError::SessionNotFound(_))
        ));
        assert_eq!(
            h.sink.count(|e| matches!(e, EngineEvent::SessionCompleted { .. })),
            1
        );
    }

    #[tokio::test]
    async fn test_concurrent_turns_on_one_session_are_not_lost() {
        let h = Arc::new(harness());
        let sid = h.orchestrator.start(None, BTreeMap::new()).unwrap().session_id;

        let mut tasks = Vec::new();
        for i in 0..10 {
            let h = h.clone();
            let sid = sid.clone();
            tasks.push(tokio::spawn(async move {
                let answer = if i % 2 == 0 {
                    "Our lead time keeps growing"
                } else {
                    "Incidents hit customers weekly"
                };
                h.orchestrator.answer(&sid, "d1", answer).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let status = h.orchestrator.status(&sid).unwrap();
        assert_eq!(status.questions_answered, 10);
        assert_eq!(status.coverage.covered, vec!["velocity", "quality"]);
    }
}
