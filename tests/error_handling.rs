//! Error handling tests: isolation, fail-closed filters, rejected inputs.

use chatsync::{
    schema, CacheKey, CacheStore, CacheValue, ClientConfig, ConnectionId, Entity, Event, EventBus,
    EventHub, Group, GroupId, Message, MutationReconciler, Outbound, RegistryConfig,
    SubscriptionFilter, SubscriptionRegistry, SyncClient, SyncError, Topic, User, UserId,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// --- Bus ---

#[test]
fn test_failing_handlers_do_not_block_others() {
    init_tracing();
    let bus = EventBus::new();
    let seen = Arc::new(AtomicUsize::new(0));

    bus.subscribe(Topic::MessageAdded, |_| Err("handler refused".into()));
    bus.subscribe(Topic::MessageAdded, |_| panic!("handler crashed"));
    let counter = Arc::clone(&seen);
    bus.subscribe(Topic::MessageAdded, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let report = bus.publish(
        Topic::MessageAdded,
        Message::new(1, GroupId(1), UserId(1), "x").into(),
    );
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    // The bus stays usable after a handler panicked.
    bus.publish(
        Topic::MessageAdded,
        Message::new(2, GroupId(1), UserId(1), "y").into(),
    );
    assert_eq!(seen.load(Ordering::SeqCst), 2);
}

// --- Registry ---

#[test]
fn test_filter_error_counts_as_no_match() {
    init_tracing();
    let registry = SubscriptionRegistry::new();
    let conn = registry.connect(ConnectionId(1));
    registry
        .register_filter(ConnectionId(1), SubscriptionFilter::group_ids([GroupId(1)]))
        .unwrap();
    registry
        .register_filter(ConnectionId(1), SubscriptionFilter::group_ids([GroupId(2)]))
        .unwrap();

    // A group payload on the message topic cannot be evaluated.
    let report = registry.dispatch(&Event::new(
        Topic::MessageAdded,
        Group::new(1, "g", [UserId(1)]),
    ));
    assert_eq!(report.evaluated, 2);
    assert_eq!(report.filter_errors, 2);
    assert_eq!(report.delivered, 0);
    assert!(conn.drain().is_empty());

    // The registry keeps dispatching afterwards.
    let report = registry.dispatch(&Event::new(
        Topic::MessageAdded,
        Message::new(1, GroupId(2), UserId(1), "x"),
    ));
    assert_eq!(report.delivered, 1);
}

#[test]
fn test_slow_connection_is_dropped() {
    init_tracing();
    let hub = EventHub::new(RegistryConfig {
        outbound_buffer_size: 2,
    });
    let conn = hub.registry().connect(ConnectionId(1));
    hub.registry()
        .register_filter(ConnectionId(1), SubscriptionFilter::group_ids([GroupId(1)]))
        .unwrap();

    for id in 0..3 {
        hub.message_added(Message::new(id, GroupId(1), UserId(1), "m"))
            .unwrap();
    }

    assert_eq!(hub.registry().connection_count(), 0);
    assert_eq!(hub.registry().registration_count(), 0);
    let delivered = conn.drain();
    assert_eq!(delivered.len(), 2);
    assert!(delivered.iter().all(|d| matches!(d, Outbound::Data { .. })));
}

#[test]
fn test_register_on_unknown_connection() {
    let registry = SubscriptionRegistry::new();
    let result = registry.register(
        ConnectionId(9),
        "subscription { groupAdded(userId: 1) { id } }",
        &json!({}),
    );
    assert!(matches!(result, Err(SyncError::ConnectionNotFound(ConnectionId(9)))));
}

#[test]
fn test_bad_arguments_are_parse_errors() {
    let registry = SubscriptionRegistry::new();
    let _conn = registry.connect(ConnectionId(1));
    for (document, variables) in [
        ("subscription { groupAdded(userId: \"one\") { id } }", json!({})),
        ("subscription { groupAdded(userId: -1) { id } }", json!({})),
        ("subscription { unknownTopic { id } }", json!({})),
        ("query { groupAdded(userId: 1) { id } }", json!({})),
        (
            "subscription($ids: [Int]) { messageAdded(groupIds: $ids) { id } }",
            json!({ "ids": ["x"] }),
        ),
    ] {
        let result = registry.register(ConnectionId(1), document, &variables);
        assert!(
            matches!(result, Err(SyncError::Parse { .. })),
            "expected parse error for {}",
            document
        );
    }
    assert_eq!(registry.registration_count(), 0);
}

// --- Client ---

#[test]
fn test_unconfirmed_push_is_rejected() {
    let client = SyncClient::with_config(&ClientConfig::default());
    let key = schema::group_query(GroupId(1));
    client.hydrate(key.clone(), Entity::from(Group::new(1, "g", [UserId(1)])));

    let result = client.apply_push(&[key], Message::draft(GroupId(1), UserId(1), "x").into());
    assert!(matches!(result, Err(SyncError::InvalidEntity(_))));
}

#[test]
fn test_confirmation_without_id_keeps_placeholder_tracked_state_clean() {
    let client = SyncClient::with_config(&ClientConfig::default());
    let key = schema::group_query(GroupId(1));
    client.hydrate(key.clone(), Entity::from(Group::new(1, "g", [UserId(1)])));
    let before = client.store().read(&key);

    let handle = client
        .create_message(Message::draft(GroupId(1), UserId(1), "x"))
        .unwrap();
    let result = client.confirm(handle, Message::draft(GroupId(1), UserId(1), "x").into());
    assert!(matches!(result, Err(SyncError::InvalidEntity(_))));

    // The mutation is still pending and times out cleanly.
    let errors = client
        .reconciler()
        .expire_overdue_at(Instant::now() + Duration::from_secs(60));
    assert_eq!(errors.len(), 1);
    assert_eq!(client.store().read(&key), before);
}

#[test]
fn test_page_into_entity_without_list() {
    let store = CacheStore::new();
    let key = schema::user_query(UserId(1));
    store.write(key.clone(), CacheValue::Entity(User::new(1, "ann").into()));

    let result = store.merge_page(&key, Some(vec![Message::new(1, GroupId(1), UserId(1), "m").into()]));
    assert!(matches!(result, Err(SyncError::InvalidEntity(_))));
}

#[test]
fn test_page_with_foreign_group_message() {
    let store = CacheStore::new();
    let key = schema::group_query(GroupId(1));
    store.write(key.clone(), CacheValue::Entity(Group::new(1, "g", [UserId(1)]).into()));
    let before = store.read(&key);

    let page = vec![
        Message::new(1, GroupId(1), UserId(1), "ours").into(),
        Message::new(2, GroupId(2), UserId(1), "theirs").into(),
    ];
    assert!(store.merge_page(&key, Some(page)).is_err());
    assert_eq!(store.read(&key), before);
}

#[test]
fn test_undeclared_mutation() {
    let reconciler = MutationReconciler::new(Arc::new(CacheStore::new()), Duration::from_secs(1));
    let result = reconciler.issue(
        "renameGroup",
        &json!({}),
        Group::draft("x", [UserId(1)]).into(),
    );
    assert!(matches!(result, Err(SyncError::UndeclaredMutation(ref m)) if m == "renameGroup"));
}

#[test]
fn test_config_load_missing_file() {
    let dir = tempfile::TempDir::new().unwrap();
    let result = ClientConfig::load(dir.path().join("absent.json"));
    assert!(matches!(result, Err(SyncError::Io(_))));
}

#[test]
fn test_cache_key_variables_are_canonical() {
    let a = CacheKey::new("group", &json!({ "groupId": 1, "offset": 0 }));
    let b = CacheKey::new("group", &json!({ "offset": 0, "groupId": 1 }));
    assert_eq!(a, b);
    assert_eq!(a.variables().unwrap(), json!({ "groupId": 1, "offset": 0 }));
}
