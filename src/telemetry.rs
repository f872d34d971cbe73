// src/telemetry.rs
// Observability port for budget alerts and session lifecycle events

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::budget::BudgetPeriod;

/// Structured events emitted by the engine's components
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A recorded cost pushed usage past the alert threshold
    BudgetAlert {
        period: BudgetPeriod,
        percent_used: f64,
        spent: f64,
        limit: f64,
    },
    /// `can_afford` refused a request
    BudgetDenied { reason: String },
    CostRecorded {
        service: String,
        cost: f64,
        request_id: Option<String>,
    },
    SessionCreated { session_id: String },
    SessionExpired { session_id: String },
    SessionsSwept { removed: usize },
    SessionCompleted { session_id: String },
    GenerationFailed { session_id: String, error: String },
    PersonaMismatch {
        session_id: String,
        confidence: f64,
        reason: String,
    },
}

/// Sink for engine events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Writes events as structured tracing records
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: EngineEvent) {
        match event {
            EngineEvent::BudgetAlert {
                period,
                percent_used,
                spent,
                limit,
            } => warn!(
                period = %period,
                percent_used,
                spent,
                limit,
                "Budget alert threshold crossed"
            ),
            EngineEvent::BudgetDenied { reason } => {
                warn!(reason = %reason, "Budget denied LLM request")
            }
            EngineEvent::CostRecorded {
                service,
                cost,
                request_id,
            } => debug!(service = %service, cost, request_id = ?request_id, "Cost recorded"),
            EngineEvent::SessionCreated { session_id } => {
                info!(session_id = %session_id, "Session created")
            }
            EngineEvent::SessionExpired { session_id } => {
                info!(session_id = %session_id, "Session expired")
            }
            EngineEvent::SessionsSwept { removed } => {
                info!(removed, "Swept idle sessions")
            }
            EngineEvent::SessionCompleted { session_id } => {
                info!(session_id = %session_id, "Session completed")
            }
            EngineEvent::GenerationFailed { session_id, error } => warn!(
                session_id = %session_id,
                error = %error,
                "Follow-up generation failed, falling back to pool"
            ),
            EngineEvent::PersonaMismatch {
                session_id,
                confidence,
                reason,
            } => warn!(
                session_id = %session_id,
                confidence,
                reason = %reason,
                "Persona mismatch detected"
            ),
        }
    }
}

/// Keeps every event in memory. Used by tests to assert on alerting.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<EngineEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    /// Count events matching a predicate
    pub fn count(&self, pred: impl Fn(&EngineEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().push(event);
    }
}
