use fleetwatch_devkit::fixtures::now_millis;
use fleetwatch_devkit::{SystemBuilder, TestHarness, TreeBuilder};
use fleetwatch_kernel::audit::{action, AuditRecorder};
use fleetwatch_kernel::projections::{query_audit_log, AuditQuery};
use serde_json::json;

#[test]
fn audit_view_is_newest_first() {
    let tree = TreeBuilder::new()
        .audit("k1", 100, "a@x", action::CREATE_JOB)
        .audit("k2", 300, "b@x", action::UPDATE_JOB)
        .audit("k3", 200, "c@x", action::DELETE_JOB)
        .build();
    let harness = TestHarness::new(tree).start().unwrap();

    harness.assert_audit_timestamps(&[300, 200, 100]).unwrap();
    assert_eq!(harness.audit()[0].user, "b@x");
}

#[test]
fn recorded_entries_reach_the_view_through_the_subscription() {
    let harness = TestHarness::new(json!({})).start().unwrap();
    let recorder = AuditRecorder::new(harness.gateway.clone());

    let before = now_millis();
    let key = recorder
        .record("ops@x", action::REFRESH_FLEET, "fleet", json!({ "reason": "manual" }))
        .unwrap();

    let entries = harness.audit();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].details["reason"], "manual");
    assert!(entries[0].timestamp >= before);
    assert!(harness.state().audit_logs.contains_key(&key));
}

#[test]
fn failed_audit_write_is_not_surfaced() {
    let harness = TestHarness::new(json!({})).start().unwrap();
    harness.gateway.set_fail_writes(true);

    let recorder = AuditRecorder::new(harness.gateway.clone());
    assert!(recorder.record("ops@x", action::DELETE_JOB, "S", "").is_none());
    assert!(harness.audit().is_empty());
    assert_eq!(harness.state().error, None);
}

#[test]
fn commands_leave_an_audit_trail() {
    let tree = TreeBuilder::new()
        .system(
            "pc-1",
            SystemBuilder::new().hostname("Verification-Node").nickname("Old"),
        )
        .build();
    let harness = TestHarness::new(tree).start().unwrap();

    harness.commands.set_nickname("ops@x", "pc-1", "New").unwrap();
    harness
        .commands
        .upsert_job("ops@x", "pc-1", "daily", json!({ "source_path": "D:\\Data" }))
        .unwrap();
    harness.commands.remove_job("ops@x", "pc-1", "daily").unwrap();

    let entries = harness.audit();
    assert_eq!(entries.len(), 3);
    let mut actions: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();
    actions.sort();
    assert_eq!(actions, vec!["CREATE_JOB", "DELETE_JOB", "UPDATE_NICKNAME"]);

    let nickname = entries.iter().find(|e| e.action == "UPDATE_NICKNAME").unwrap();
    assert_eq!(nickname.target, "Old");
    assert_eq!(nickname.details, json!("Changed from Old to New"));
}

#[test]
fn query_filters_and_pages() {
    let tree = TreeBuilder::new()
        .audit("k1", 100, "a@x", action::CREATE_JOB)
        .audit("k2", 200, "b@x", action::CREATE_JOB)
        .audit("k3", 300, "a@x", action::DELETE_JOB)
        .audit("k4", 400, "a@x", action::CREATE_JOB)
        .build();
    let harness = TestHarness::new(tree).start().unwrap();
    let state = harness.state();

    let by_user = query_audit_log(
        &state,
        &AuditQuery {
            user: Some("a@x".into()),
            ..AuditQuery::default()
        },
    );
    let stamps: Vec<i64> = by_user.iter().map(|e| e.timestamp).collect();
    assert_eq!(stamps, vec![400, 300, 100]);

    let page = query_audit_log(
        &state,
        &AuditQuery {
            action: Some(action::CREATE_JOB.into()),
            limit: Some(1),
            offset: Some(1),
            ..AuditQuery::default()
        },
    );
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].timestamp, 200);
}
