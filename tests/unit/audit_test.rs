//! Tests for audit sink

use qrm_broker::core::{build_audit_event, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);

    let event = build_audit_event("tok1", "tester", "submit", Some("payload".to_string()));
    sink.record(event);
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].subject, "tok1");
    assert_eq!(events[0].actor, "tester");
    assert_eq!(events[0].action, "submit");
    assert_eq!(events[0].payload.as_deref(), Some("payload"));
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event("tok1", "a", "submit", None));
    sink.record(build_audit_event("tok2", "a", "submit", None));
    sink.record(build_audit_event("tok3", "a", "submit", None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].subject, "tok2"); // First one popped
    assert_eq!(events[1].subject, "tok3");
}

#[test]
fn test_zero_capacity_sink_drops_everything() {
    let mut sink = InMemoryAuditSink::new(0);
    sink.record(build_audit_event("tok1", "a", "cancel", None));
    assert!(sink.events().is_empty());
}

#[test]
fn test_build_audit_event() {
    let event = build_audit_event("res1", "management", "release", Some("tok".to_string()));
    assert_eq!(event.subject, "res1");
    assert_eq!(event.action, "release");
    assert!(event.created_at_ms > 0);
}

#[test]
fn test_event_ids_are_unique_within_a_millisecond() {
    let events: Vec<_> = (0..64)
        .map(|_| build_audit_event("res1", "management", "release", None))
        .collect();
    let ids: std::collections::HashSet<_> = events.iter().map(|e| e.event_id.as_str()).collect();
    assert_eq!(ids.len(), events.len());
}
