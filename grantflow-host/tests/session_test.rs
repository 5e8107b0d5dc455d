//! End-to-end tests for grant sessions

use std::sync::Arc;

use tokio::sync::mpsc;

use grantflow_host::audit::{AuditDetails, AuditEventType, MemoryAuditSink};
use grantflow_host::config::FlowConfig;
use grantflow_host::policy::FixedPolicy;
use grantflow_host::presenter::{ChannelPresenter, GroupPrompt, PromptDecision};
use grantflow_host::session::GrantSession;
use grantflow_host::store::{
    FilePermissionStore, MemoryPermissionStore, PermissionGroup, PermissionStore,
};
use grantflow_host::{GrantRequest, GrantStatus, Requester, SplitRule, SplitRules};

fn declared_groups() -> Vec<PermissionGroup> {
    vec![
        PermissionGroup::new("contacts")
            .label("Contacts")
            .permission("contacts.read")
            .permission("contacts.write"),
        PermissionGroup::new("camera")
            .label("Camera")
            .permission("camera.capture"),
        PermissionGroup::new("storage")
            .label("Storage")
            .permission("storage.read")
            .permission("storage.read_media")
            .permission("storage.read_documents"),
    ]
}

fn seeded_store() -> Arc<MemoryPermissionStore> {
    let store = MemoryPermissionStore::for_requester("com.example.notes");
    for group in declared_groups() {
        store.add_group(group);
    }
    Arc::new(store)
}

fn requester() -> Requester {
    Requester::new("com.example.notes", 10_123, 29)
}

fn channel_config(
    store: Arc<dyn PermissionStore>,
    audit: Arc<MemoryAuditSink>,
    splits: SplitRules,
) -> (FlowConfig, mpsc::Receiver<GroupPrompt>) {
    let (presenter, prompts) = ChannelPresenter::pair(4);
    let config = FlowConfig {
        store,
        policy: Arc::new(FixedPolicy::prompt()),
        presenter: Arc::new(presenter),
        audit,
        splits: Arc::new(splits),
    };
    (config, prompts)
}

#[tokio::test]
async fn test_deny_do_not_ask_excludes_group_from_later_requests() {
    let store = seeded_store();
    let audit = Arc::new(MemoryAuditSink::new());
    let (config, mut prompts) = channel_config(store.clone(), audit, SplitRules::new());

    let request = GrantRequest::new(requester()).permission("contacts.read");
    let session = GrantSession::spawn(config, request.clone(), None);

    let prompt = prompts.recv().await.expect("expected a contacts prompt");
    assert_eq!(prompt.group, "contacts");
    assert_eq!((prompt.index, prompt.total), (0, 1));

    session
        .decide(&prompt.group, PromptDecision::DeniedDoNotAsk)
        .await
        .expect("session should accept the decision");

    let result = session.wait().await.expect("session should finish");
    assert_eq!(result.permissions, vec!["contacts.read"]);
    assert_eq!(result.status_of("contacts.read"), Some(GrantStatus::Denied));
    assert_eq!(result.codes(), vec![-1]);

    // The group is user-fixed now; an independent request later never
    // prompts and reports the denial straight from the store.
    let audit = Arc::new(MemoryAuditSink::new());
    let (config, mut prompts) = channel_config(store, audit, SplitRules::new());
    let session = GrantSession::spawn(config, request, None);

    let result = session.wait().await.expect("session should finish");
    assert_eq!(result.status_of("contacts.read"), Some(GrantStatus::Denied));
    assert!(prompts.recv().await.is_none(), "no prompt should be shown");
}

#[tokio::test]
async fn test_result_statuses_parallel_the_requested_order() {
    let store = seeded_store();
    let audit = Arc::new(MemoryAuditSink::new());
    let (config, mut prompts) = channel_config(store, audit, SplitRules::new());

    let request = GrantRequest::new(requester())
        .permission("camera.capture")
        .permission("contacts.read");
    let session = GrantSession::spawn(config, request, None);

    let first = prompts.recv().await.expect("expected the camera prompt");
    assert_eq!(first.group, "camera");
    session
        .decide(&first.group, PromptDecision::Allowed)
        .await
        .expect("session should accept the decision");

    let second = prompts.recv().await.expect("expected the contacts prompt");
    assert_eq!(second.group, "contacts");
    session
        .decide(&second.group, PromptDecision::Denied)
        .await
        .expect("session should accept the decision");

    let result = session.wait().await.expect("session should finish");
    assert_eq!(result.permissions, vec!["camera.capture", "contacts.read"]);
    assert_eq!(result.codes(), vec![0, -1]);
}

#[tokio::test]
async fn test_one_prompt_covers_all_requested_permissions_of_a_group() {
    let store = seeded_store();
    let audit = Arc::new(MemoryAuditSink::new());
    let (config, mut prompts) = channel_config(store, Arc::clone(&audit), SplitRules::new());

    let request = GrantRequest::new(requester())
        .permission("contacts.read")
        .permission("contacts.write");
    let session = GrantSession::spawn(config, request, None);

    // Both permissions share a group: the user is asked exactly once.
    let prompt = prompts.recv().await.expect("expected a contacts prompt");
    assert_eq!(prompt.group, "contacts");
    assert_eq!((prompt.index, prompt.total), (0, 1));

    session
        .decide(&prompt.group, PromptDecision::Denied)
        .await
        .expect("session should accept the decision");

    let result = session.wait().await.expect("session should finish");
    assert_eq!(result.permissions, vec!["contacts.read", "contacts.write"]);
    assert_eq!(result.codes(), vec![-1, -1]);
    assert!(prompts.recv().await.is_none(), "no further prompt expected");

    // One denial event per requested name, both in the contacts group.
    let denials: Vec<_> = audit
        .events()
        .into_iter()
        .filter(|e| e.event_type == AuditEventType::PermissionDenied)
        .collect();
    assert_eq!(denials.len(), 2);
    assert!(denials.iter().all(|e| e.group.as_deref() == Some("contacts")));
}

#[tokio::test]
async fn test_group_count_is_stable_across_suspension() {
    let store = seeded_store();
    let audit = Arc::new(MemoryAuditSink::new());
    let (config, mut prompts) = channel_config(store.clone(), audit, SplitRules::new());

    let request = GrantRequest::new(requester())
        .permission("contacts.read")
        .permission("camera.capture")
        .permission("storage.read");
    let session = GrantSession::spawn(config, request.clone(), None);

    let first = prompts.recv().await.expect("expected the contacts prompt");
    assert_eq!((first.index, first.total), (0, 3));
    session
        .decide(&first.group, PromptDecision::Denied)
        .await
        .expect("session should accept the decision");

    let before = prompts.recv().await.expect("expected the camera prompt");
    assert_eq!(before.group, "camera");
    assert_eq!((before.index, before.total), (1, 3));

    let snapshot = session.suspend().await.expect("session should suspend");

    let audit = Arc::new(MemoryAuditSink::new());
    let (config, mut prompts) = channel_config(store, audit, SplitRules::new());
    let session = GrantSession::spawn(config, request, Some(snapshot));

    // Same group, same position, same count as before the suspension.
    let after = prompts.recv().await.expect("expected the camera prompt");
    assert_eq!(after.group, before.group);
    assert_eq!((after.index, after.total), (1, 3));

    session
        .decide(&after.group, PromptDecision::Allowed)
        .await
        .expect("session should accept the decision");
    let third = prompts.recv().await.expect("expected the storage prompt");
    assert_eq!((third.index, third.total), (2, 3));
    session
        .decide(&third.group, PromptDecision::Allowed)
        .await
        .expect("session should accept the decision");

    let result = session.wait().await.expect("session should finish");
    assert_eq!(result.codes(), vec![-1, 0, 0]);
}

#[tokio::test]
async fn test_external_grant_finishes_request_without_decision() {
    let store = seeded_store();
    let audit = Arc::new(MemoryAuditSink::new());
    let (config, mut prompts) = channel_config(store.clone(), audit, SplitRules::new());

    let request = GrantRequest::new(requester()).permission("contacts.read");
    let session = GrantSession::spawn(config, request, None);

    let prompt = prompts.recv().await.expect("expected a contacts prompt");
    assert_eq!(prompt.group, "contacts");

    // Granted by another actor while the prompt idles.
    store.pre_grant("contacts.read");
    session
        .permissions_changed(10_123)
        .await
        .expect("session should accept the event");

    let result = session.wait().await.expect("session should finish");
    assert_eq!(
        result.status_of("contacts.read"),
        Some(GrantStatus::Granted)
    );
}

#[tokio::test]
async fn test_split_rules_expand_through_the_session() {
    let store = seeded_store();
    let audit = Arc::new(MemoryAuditSink::new());
    let splits = SplitRules::new().rule(
        SplitRule::new("storage.read", 29)
            .split("storage.read_media")
            .split("storage.read_documents"),
    );
    let (config, mut prompts) = channel_config(store.clone(), audit, splits);

    // Target 28 predates the split at 29, so the request pulls in the
    // split-off permissions.
    let below_split = Requester::new("com.example.notes", 10_123, 28);
    let request = GrantRequest::new(below_split).permission("storage.read");
    let session = GrantSession::spawn(config, request, None);

    let prompt = prompts.recv().await.expect("expected the storage prompt");
    assert_eq!(prompt.group, "storage");
    session
        .decide(&prompt.group, PromptDecision::Allowed)
        .await
        .expect("session should accept the decision");

    let result = session.wait().await.expect("session should finish");
    assert_eq!(result.status_of("storage.read"), Some(GrantStatus::Granted));
    assert!(store.is_granted("storage.read_media").unwrap());
    assert!(store.is_granted("storage.read_documents").unwrap());
}

#[tokio::test]
async fn test_audit_trail_of_a_denied_request() {
    let store = seeded_store();
    let audit = Arc::new(MemoryAuditSink::new());
    let (config, mut prompts) = channel_config(store, Arc::clone(&audit), SplitRules::new());

    let request = GrantRequest::new(requester()).permission("contacts.read");
    let session = GrantSession::spawn(config, request, None);

    let prompt = prompts.recv().await.expect("expected a contacts prompt");
    session
        .decide(&prompt.group, PromptDecision::Denied)
        .await
        .expect("session should accept the decision");
    session.wait().await.expect("session should finish");

    let events = audit.events();
    let types: Vec<_> = events.iter().map(|e| e.event_type.clone()).collect();
    assert_eq!(
        types,
        vec![
            AuditEventType::PermissionRequested,
            AuditEventType::PermissionDenied,
            AuditEventType::RequestCompleted,
        ]
    );
    assert!(events.iter().all(|e| e.package == "com.example.notes"));

    match &events[2].details {
        AuditDetails::Request { groups } => assert_eq!(groups, &["contacts"]),
        other => panic!("unexpected completion details: {:?}", other),
    }
}

#[tokio::test]
async fn test_do_not_ask_survives_store_reload() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("grants.json");

    let store = FilePermissionStore::new(&path, "com.example.notes", declared_groups())
        .expect("store should open");
    let audit = Arc::new(MemoryAuditSink::new());
    let (config, mut prompts) = channel_config(Arc::new(store), audit, SplitRules::new());

    let request = GrantRequest::new(requester()).permission("camera.capture");
    let session = GrantSession::spawn(config, request.clone(), None);

    let prompt = prompts.recv().await.expect("expected the camera prompt");
    session
        .decide(&prompt.group, PromptDecision::DeniedDoNotAsk)
        .await
        .expect("session should accept the decision");
    session.wait().await.expect("session should finish");

    // A fresh process opening the same file sees the pinned group.
    let store = FilePermissionStore::new(&path, "com.example.notes", declared_groups())
        .expect("store should reopen");
    let audit = Arc::new(MemoryAuditSink::new());
    let (config, mut prompts) = channel_config(Arc::new(store), audit, SplitRules::new());

    let session = GrantSession::spawn(config, request, None);
    let result = session.wait().await.expect("session should finish");

    assert_eq!(
        result.status_of("camera.capture"),
        Some(GrantStatus::Denied)
    );
    assert!(prompts.recv().await.is_none(), "no prompt should be shown");
}
