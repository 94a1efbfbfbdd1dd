//! Tests for audit sink

use taskfleet::core::{build_audit_event, AuditAction, AuditSink, InMemoryAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);

    let event = build_audit_event(
        7,
        Some("track1".into()),
        Some(2),
        AuditAction::Dispatch,
        Some("payload".to_string()),
    );

    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].event_id, event.event_id);
    assert_eq!(events[0].task_id, 7);
    assert_eq!(events[0].area, Some(2));
    assert_eq!(events[0].action, AuditAction::Dispatch);
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);
    sink.record(build_audit_event(1, None, None, AuditAction::Fire, None));
    sink.record(build_audit_event(2, None, None, AuditAction::Fire, None));
    sink.record(build_audit_event(3, None, None, AuditAction::Fire, None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task_id, 2);
    assert_eq!(events[1].task_id, 3);
}

#[test]
fn test_events_filtered_by_task() {
    let mut sink = InMemoryAuditSink::new(10);
    sink.record(build_audit_event(1, None, None, AuditAction::Fire, None));
    sink.record(build_audit_event(2, None, None, AuditAction::Cancel, None));
    sink.record(build_audit_event(1, None, None, AuditAction::Expire, None));

    let actions: Vec<_> = sink.for_task(1).iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::Fire, AuditAction::Expire]);
}

#[test]
fn test_event_ids_are_unique() {
    let a = build_audit_event(1, None, None, AuditAction::Ack, None);
    let b = build_audit_event(1, None, None, AuditAction::Ack, None);
    assert_ne!(a.event_id, b.event_id);
}
