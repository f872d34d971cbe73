// src/session/store.rs
// In-memory session store with idle expiry

use chrono::Duration;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::patch::SessionPatch;
use super::types::{ConversationContext, FieldValue, Persona};
use crate::clock::Clock;
use crate::error::{InterviewError, Result};
use crate::telemetry::{EngineEvent, EventSink};

/// Confidence assigned when the caller names the persona at start
const DECLARED_PERSONA_CONFIDENCE: f64 = 1.0;
/// Confidence of the fallback persona when none was declared
const DEFAULT_PERSONA_CONFIDENCE: f64 = 0.5;

type Slot = Arc<Mutex<ConversationContext>>;

/// Keyed store of live sessions.
///
/// Each session sits behind its own lock so turns on different sessions
/// never contend. The map lock is only held to look up, insert or remove
/// slots; it is always taken before a session lock, never after.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Slot>>,
    timeout: Duration,
    max_follow_ups: u32,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
}

impl SessionStore {
    pub fn new(
        timeout: Duration,
        max_follow_ups: u32,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            timeout,
            max_follow_ups,
            clock,
            sink,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create a session with a fresh unique id
    pub fn create(
        &self,
        persona: Option<Persona>,
        seed: impl IntoIterator<Item = (String, FieldValue)>,
    ) -> Result<ConversationContext> {
        let now = self.clock.now();
        let confidence = if persona.is_some() {
            DECLARED_PERSONA_CONFIDENCE
        } else {
            DEFAULT_PERSONA_CONFIDENCE
        };

        let mut sessions = self.sessions.write();
        let mut id = Uuid::new_v4().to_string();
        while sessions.contains_key(&id) {
            id = Uuid::new_v4().to_string();
        }

        let mut ctx = ConversationContext::new(
            id.clone(),
            now,
            persona.unwrap_or_default(),
            confidence,
            self.max_follow_ups,
        );
        SessionPatch::new().fields(seed).apply(&mut ctx, now)?;

        sessions.insert(id.clone(), Arc::new(Mutex::new(ctx.clone())));
        drop(sessions);

        self.sink.emit(EngineEvent::SessionCreated { session_id: id });
        Ok(ctx)
    }

    /// Snapshot of a live session. Expired sessions are evicted on access.
    pub fn get(&self, session_id: &str) -> Result<ConversationContext> {
        let slot = self.live_slot(session_id)?;
        let ctx = slot.lock();
        if ctx.is_expired(self.clock.now(), self.timeout) {
            drop(ctx);
            self.evict(session_id, &slot);
            return Err(InterviewError::SessionNotFound(session_id.to_string()));
        }
        Ok(ctx.clone())
    }

    /// Apply a patch atomically and refresh `last_updated`.
    ///
    /// Returns the updated snapshot. A rejected patch leaves the session
    /// unchanged.
    pub fn update(&self, session_id: &str, patch: SessionPatch) -> Result<ConversationContext> {
        let slot = self.live_slot(session_id)?;
        let mut ctx = slot.lock();
        let now = self.clock.now();
        if ctx.is_expired(now, self.timeout) {
            drop(ctx);
            self.evict(session_id, &slot);
            return Err(InterviewError::SessionNotFound(session_id.to_string()));
        }
        patch.apply(&mut ctx, now)?;
        Ok(ctx.clone())
    }

    /// Remove a session. Idempotent; returns whether anything was removed.
    pub fn delete(&self, session_id: &str) -> bool {
        self.sessions.write().remove(session_id).is_some()
    }

    /// Remove every expired session and return how many were removed
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let candidates: Vec<String> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, slot)| slot.lock().is_expired(now, self.timeout))
            .map(|(id, _)| id.clone())
            .collect();

        if candidates.is_empty() {
            return 0;
        }

        let removed: Vec<String> = {
            let mut sessions = self.sessions.write();
            candidates
                .into_iter()
                .filter(|id| {
                    // A turn may have refreshed the session since the scan
                    let still_expired = sessions
                        .get(id)
                        .is_some_and(|slot| slot.lock().is_expired(now, self.timeout));
                    still_expired && sessions.remove(id).is_some()
                })
                .collect()
        };

        for session_id in &removed {
            self.sink.emit(EngineEvent::SessionExpired {
                session_id: session_id.clone(),
            });
        }
        if !removed.is_empty() {
            self.sink.emit(EngineEvent::SessionsSwept {
                removed: removed.len(),
            });
        }
        removed.len()
    }

    /// Drop every session. Used at shutdown.
    pub fn drain(&self) -> usize {
        let mut sessions = self.sessions.write();
        let count = sessions.len();
        sessions.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn live_slot(&self, session_id: &str) -> Result<Slot> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| InterviewError::SessionNotFound(session_id.to_string()))
    }

    /// Remove `slot` if it is still the one registered under `session_id`
    fn evict(&self, session_id: &str, slot: &Slot) {
        let removed = {
            let mut sessions = self.sessions.write();
            match sessions.get(session_id) {
                Some(current) if Arc::ptr_eq(current, slot) => {
                    sessions.remove(session_id);
                    true
                }
                _ => false,
            }
        };
        if removed {
            debug!(session_id = %session_id, "Evicted expired session on access");
            self.sink.emit(EngineEvent::SessionExpired {
                session_id: session_id.to_string(),
            });
        }
    }
}
