//! Audit sink implementations.
//!
//! The engine records one event per request lifecycle transition and per
//! management action when a sink is attached.

use std::collections::VecDeque;

use uuid::Uuid;

use crate::util::clock::now_ms;

/// Audit event structure.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related request token, or resource name for management actions.
    pub subject: String,
    /// Client or operator that caused the event.
    pub actor: String,
    /// Action taken (submit, activate, cancel, fail, evict, add, remove, release).
    pub action: String,
    /// Timestamp milliseconds.
    pub created_at_ms: u64,
    /// Additional context.
    pub payload: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: VecDeque<AuditEvent>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    pub fn new(max_events: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(max_events),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.iter().cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        if self.max_events == 0 {
            return;
        }
        if self.events.len() >= self.max_events {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }
}

/// Sink that forwards events to `tracing` at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&mut self, event: AuditEvent) {
        tracing::info!(
            target: "qrm::audit",
            event_id = %event.event_id,
            subject = %event.subject,
            actor = %event.actor,
            action = %event.action,
            payload = event.payload.as_deref().unwrap_or(""),
            "audit"
        );
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    subject: impl Into<String>,
    actor: impl Into<String>,
    action: impl Into<String>,
    payload: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: Uuid::new_v4().to_string(),
        subject: subject.into(),
        actor: actor.into(),
        action: action.into(),
        created_at_ms: now_ms(),
        payload,
    }
}
