//! End-to-end tests: server hub publishing into client caches.

use chatsync::{
    schema, CacheNotification, CacheValue, ClientConfig, ConnectionHandle, ConnectionId, Entity,
    EventHub, Group, GroupId, Identified, MergeOutcome, Message, Outbound, SyncClient, SyncError,
    UserId,
};
use serde_json::json;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn group_messages(client: &SyncClient, group: u64) -> Vec<Message> {
    match client.store().read(&schema::group_query(GroupId(group))).unwrap().value {
        CacheValue::Entity(Entity::Group(g)) => g.messages,
        other => panic!("unexpected value {:?}", other),
    }
}

fn message_ids(messages: &[Message]) -> Vec<u64> {
    messages.iter().filter_map(|m| m.key()).map(|k| k.0).collect()
}

fn subscribe_messages(hub: &EventHub, conn: u64, groups: &[u64]) -> chatsync::RegistrationId {
    hub.registry()
        .register(
            ConnectionId(conn),
            "subscription OnMessage($groupIds: [Int]) { messageAdded(groupIds: $groupIds) { id text } }",
            &json!({ "groupIds": groups }),
        )
        .unwrap()
}

fn pump(conn: &ConnectionHandle, client: &SyncClient) -> Vec<MergeOutcome> {
    conn.drain()
        .iter()
        .flat_map(|delivery| client.apply_outbound(delivery).unwrap())
        .collect()
}

// --- Distribution ---

#[test]
fn test_message_reaches_only_matching_registration() {
    init_tracing();
    let hub = EventHub::default();
    let first = hub.registry().connect(ConnectionId(1));
    let second = hub.registry().connect(ConnectionId(2));
    subscribe_messages(&hub, 1, &[5]);
    subscribe_messages(&hub, 2, &[6]);

    let report = hub
        .message_added(Message::new(101, GroupId(5), UserId(1), "hi"))
        .unwrap();
    assert_eq!(report.failed, 0);

    let delivered = first.drain();
    assert_eq!(delivered.len(), 1);
    match &delivered[0] {
        Outbound::Data { entity, .. } => match entity.as_ref() {
            Entity::Message(m) => {
                assert_eq!(m.key().map(|k| k.0), Some(101));
                assert_eq!(m.text, "hi");
            }
            other => panic!("unexpected entity {:?}", other),
        },
        other => panic!("unexpected delivery {:?}", other),
    }
    assert!(second.drain().is_empty());
}

#[test]
fn test_group_added_follows_membership() {
    init_tracing();
    let hub = EventHub::default();
    let conn = hub.registry().connect(ConnectionId(1));
    hub.registry()
        .register(
            ConnectionId(1),
            "subscription { groupAdded(userId: 3) { id name } }",
            &json!({}),
        )
        .unwrap();

    hub.group_added(Group::new(1, "with", [UserId(3), UserId(4)])).unwrap();
    hub.group_added(Group::new(2, "without", [UserId(4)])).unwrap();

    assert_eq!(conn.drain().len(), 1);
}

#[test]
fn test_disconnect_discards_registrations() {
    init_tracing();
    let hub = EventHub::default();
    let conn = hub.registry().connect(ConnectionId(1));
    subscribe_messages(&hub, 1, &[5]);
    subscribe_messages(&hub, 1, &[5, 6]);

    assert_eq!(hub.registry().disconnect(ConnectionId(1)), 2);
    assert_eq!(hub.registry().registration_count(), 0);

    hub.message_added(Message::new(1, GroupId(5), UserId(1), "gone"))
        .unwrap();
    assert!(conn
        .drain()
        .iter()
        .all(|d| matches!(d, Outbound::Dropped { .. })));
}

#[test]
fn test_malformed_document_registers_nothing() {
    let hub = EventHub::default();
    let _conn = hub.registry().connect(ConnectionId(1));
    let result = hub.registry().register(
        ConnectionId(1),
        "subscription { messageAdded(groupIds: [5] { id }",
        &json!({}),
    );
    assert!(matches!(result, Err(SyncError::Parse { .. })));
    assert_eq!(hub.registry().registration_count(), 0);
}

// --- Client reconciliation ---

#[test]
fn test_push_racing_ahead_of_confirmation_yields_one_entry() {
    init_tracing();
    let hub = EventHub::default();
    let conn = hub.registry().connect(ConnectionId(1));
    let registration = subscribe_messages(&hub, 1, &[5]);

    let client = SyncClient::with_config(&ClientConfig::default());
    let key = schema::group_query(GroupId(5));
    client.hydrate(key.clone(), Entity::from(Group::new(5, "g", [UserId(1)])));
    client.route(registration, vec![key]);

    let handle = client
        .create_message(Message::draft(GroupId(5), UserId(1), "hello"))
        .unwrap();
    assert_eq!(group_messages(&client, 5).len(), 1);

    let confirmed = Message::new(77, GroupId(5), UserId(1), "hello");
    hub.message_added(confirmed.clone()).unwrap();
    assert_eq!(pump(&conn, &client), vec![MergeOutcome::Inserted]);

    let outcomes = client.confirm(handle, confirmed.into()).unwrap();
    assert_eq!(outcomes, vec![MergeOutcome::Duplicate]);

    let messages = group_messages(&client, 5);
    assert_eq!(message_ids(&messages), vec![77]);
    assert_eq!(messages.len(), 1);
}

#[test]
fn test_confirmation_then_push_yields_one_entry() {
    init_tracing();
    let hub = EventHub::default();
    let conn = hub.registry().connect(ConnectionId(1));
    let registration = subscribe_messages(&hub, 1, &[5]);

    let client = SyncClient::with_config(&ClientConfig::default());
    let key = schema::group_query(GroupId(5));
    client.hydrate(key.clone(), Entity::from(Group::new(5, "g", [UserId(1)])));
    client.route(registration, vec![key]);

    let handle = client
        .create_message(Message::draft(GroupId(5), UserId(1), "hello"))
        .unwrap();
    let confirmed = Message::new(77, GroupId(5), UserId(1), "hello");
    assert_eq!(
        client.confirm(handle, confirmed.clone().into()).unwrap(),
        vec![MergeOutcome::Replaced]
    );

    hub.message_added(confirmed).unwrap();
    assert_eq!(pump(&conn, &client), vec![MergeOutcome::Duplicate]);
    assert_eq!(message_ids(&group_messages(&client, 5)), vec![77]);
}

#[test]
fn test_failure_restores_pre_issue_state() {
    init_tracing();
    let client = SyncClient::with_config(&ClientConfig::default());
    let key = schema::group_query(GroupId(5));
    client.hydrate(
        key.clone(),
        Entity::from(
            Group::new(5, "g", [UserId(1)])
                .with_messages(vec![Message::new(1, GroupId(5), UserId(1), "old")]),
        ),
    );
    let before = client.store().read(&key).unwrap();

    let handle = client
        .create_message(Message::draft(GroupId(5), UserId(1), "hello"))
        .unwrap();
    assert!(client.store().read(&key).unwrap().pending);

    let err = client.reject(handle, "permission denied");
    assert!(matches!(err, SyncError::MutationFailure { .. }));
    assert_eq!(client.store().read(&key).unwrap(), before);
}

#[test]
fn test_three_pages_accumulate_in_fetch_order() {
    let client = SyncClient::with_config(&ClientConfig::default());
    let key = schema::group_query(GroupId(5));
    client.hydrate(key.clone(), Entity::from(Group::new(5, "g", [UserId(1)])));

    for page in 0..3u64 {
        assert_eq!(client.next_offset(&key), (page * 10) as usize);
        let entries = (page * 10..page * 10 + 10)
            .map(|id| Message::new(id, GroupId(5), UserId(1), format!("m{}", id)).into())
            .collect();
        assert_eq!(client.fetch_more(&key, Some(entries)).unwrap(), 10);
    }
    // Terminal page.
    assert_eq!(client.fetch_more(&key, None).unwrap(), 0);

    let ids = message_ids(&group_messages(&client, 5));
    assert_eq!(ids, (0..30).collect::<Vec<_>>());
}

#[test]
fn test_group_list_preview_receives_pushed_messages() {
    init_tracing();
    let hub = EventHub::default();
    let conn = hub.registry().connect(ConnectionId(1));
    let registration = subscribe_messages(&hub, 1, &[5, 6]);

    let client = SyncClient::with_config(&ClientConfig::default());
    let key = chatsync::CacheKey::new("groups", &json!({}));
    client.hydrate(
        key.clone(),
        CacheValue::Collection(vec![
            Group::new(5, "a", [UserId(1)]).into(),
            Group::new(6, "b", [UserId(1)]).into(),
        ]),
    );
    client.route(registration, vec![key.clone()]);
    let observer = client.store().observe(&key);

    hub.message_added(Message::new(1, GroupId(6), UserId(2), "hey"))
        .unwrap();
    pump(&conn, &client);

    let CacheValue::Collection(items) = client.store().read(&key).unwrap().value else {
        panic!("expected a collection");
    };
    assert_eq!(items.len(), 2);
    let Entity::Group(second) = &items[1] else { panic!() };
    assert_eq!(message_ids(&second.messages), vec![1]);
    assert!(matches!(observer.drain().as_slice(), [CacheNotification::Updated(_)]));
}

#[test]
fn test_unregister_drops_route() {
    let hub = EventHub::default();
    let conn = hub.registry().connect(ConnectionId(1));
    let registration = subscribe_messages(&hub, 1, &[5]);

    let client = SyncClient::with_config(&ClientConfig::default());
    client.route(registration, vec![schema::group_query(GroupId(5))]);

    assert!(hub.registry().unregister(registration));
    pump(&conn, &client);
    assert!(!client.unroute(registration));
}

// --- Multi-key mutations ---

fn user_groups(client: &SyncClient, user: u64) -> Vec<Entity> {
    match client.store().read(&schema::user_groups_query(UserId(user))).unwrap().value {
        CacheValue::Collection(items) => items,
        other => panic!("unexpected value {:?}", other),
    }
}

fn two_member_client() -> SyncClient {
    let client = SyncClient::with_config(&ClientConfig::default());
    for user in [1, 2] {
        client.hydrate(
            schema::user_query(UserId(user)),
            Entity::from(chatsync::User::new(user, "member")),
        );
        client.hydrate(
            schema::user_groups_query(UserId(user)),
            vec![Entity::from(Group::new(3, "old", [UserId(1), UserId(2)]))],
        );
    }
    client
}

fn snapshot(client: &SyncClient) -> Vec<Option<chatsync::CacheEntry>> {
    [1, 2]
        .into_iter()
        .flat_map(|user| [schema::user_query(UserId(user)), schema::user_groups_query(UserId(user))])
        .map(|key| client.store().read(&key))
        .collect()
}

#[test]
fn test_group_creation_visible_and_confirmed_in_every_key() {
    init_tracing();
    let client = two_member_client();

    let handle = client
        .create_group(Group::draft("new", [UserId(1), UserId(2)]))
        .unwrap();
    for user in [1, 2] {
        let groups = user_groups(&client, user);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].pending(), Some(handle.id));
    }

    let outcomes = client
        .confirm(handle, Group::new(9, "new", [UserId(1), UserId(2)]).into())
        .unwrap();
    assert_eq!(
        outcomes,
        vec![
            MergeOutcome::Inserted,
            MergeOutcome::Replaced,
            MergeOutcome::Inserted,
            MergeOutcome::Replaced,
        ]
    );
    for user in [1, 2] {
        let groups = user_groups(&client, user);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[1].key(), Some(chatsync::EntityKey::Group(GroupId(9))));
        assert!(!client.store().read(&schema::user_groups_query(UserId(user))).unwrap().pending);
    }
}

#[test]
fn test_group_creation_rolls_back_every_key() {
    init_tracing();
    let client = two_member_client();
    let before = snapshot(&client);

    let handle = client
        .create_group(Group::draft("new", [UserId(1), UserId(2)]))
        .unwrap();
    assert_ne!(snapshot(&client), before);

    let err = client.reject(handle, "name taken");
    assert!(matches!(err, SyncError::MutationFailure { .. }));
    assert_eq!(snapshot(&client), before);
}

#[test]
fn test_failed_confirmation_commits_no_key() {
    init_tracing();
    let client = two_member_client();
    // A corrupt list for the second member: the confirmed id appears twice.
    client.hydrate(
        schema::user_groups_query(UserId(2)),
        vec![
            Entity::from(Group::new(9, "dup", [UserId(2)])),
            Entity::from(Group::new(9, "dup", [UserId(2)])),
        ],
    );
    let before = snapshot(&client);

    let handle = client
        .create_group(Group::draft("new", [UserId(1), UserId(2)]))
        .unwrap();
    let result = client.confirm(handle, Group::new(9, "new", [UserId(1), UserId(2)]).into());

    assert!(matches!(result, Err(SyncError::MergeInvariantViolation { .. })));
    assert_eq!(snapshot(&client), before);
    assert_eq!(client.reconciler().pending_count(), 0);
}

#[test]
fn test_rollback_keeps_interleaved_push() {
    init_tracing();
    let client = SyncClient::with_config(&ClientConfig::default());
    let key = schema::group_query(GroupId(5));
    client.hydrate(
        key.clone(),
        Entity::from(
            Group::new(5, "g", [UserId(1)])
                .with_messages(vec![Message::new(1, GroupId(5), UserId(1), "old")]),
        ),
    );

    let handle = client
        .create_message(Message::draft(GroupId(5), UserId(1), "mine"))
        .unwrap();
    client
        .apply_push(&[key.clone()], Message::new(50, GroupId(5), UserId(2), "theirs").into())
        .unwrap();
    let _ = client.reject(handle, "rejected");

    assert_eq!(message_ids(&group_messages(&client, 5)), vec![50, 1]);
    assert!(!client.store().read(&key).unwrap().pending);
}

#[test]
fn test_empty_group_list_stays_groups_only() {
    init_tracing();
    let hub = EventHub::default();
    let conn = hub.registry().connect(ConnectionId(1));
    let messages = subscribe_messages(&hub, 1, &[2]);
    let groups = hub
        .registry()
        .register(
            ConnectionId(1),
            "subscription { groupAdded(userId: 1) { id name } }",
            &json!({}),
        )
        .unwrap();

    let client = SyncClient::with_config(&ClientConfig::default());
    let key = schema::user_groups_query(UserId(1));
    client.hydrate(key.clone(), Vec::<Entity>::new());
    client.route(messages, vec![key.clone()]);
    client.route(groups, vec![key.clone()]);

    hub.message_added(Message::new(10, GroupId(2), UserId(3), "early"))
        .unwrap();
    assert_eq!(pump(&conn, &client), vec![MergeOutcome::NotApplicable]);

    hub.group_added(Group::new(2, "b", [UserId(1)])).unwrap();
    hub.message_added(Message::new(11, GroupId(2), UserId(3), "later"))
        .unwrap();
    pump(&conn, &client);

    let items = user_groups(&client, 1);
    assert_eq!(items.len(), 1);
    let Entity::Group(group) = &items[0] else {
        panic!("expected only groups, got {:?}", items);
    };
    assert_eq!(message_ids(&group.messages), vec![11]);
}
