//! Property tests for merge, pagination, rollback and filtering.

use chatsync::merge::{self, InsertPolicy};
use chatsync::{
    schema, ClientConfig, ConnectionId, Entity, EventHub, Group, GroupId, Identified, Message,
    SubscriptionFilter, SyncClient, UserId,
};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn msg(id: u64) -> Message {
    Message::new(id, GroupId(1), UserId(1), format!("m{}", id))
}

fn list(ids: &BTreeSet<u64>) -> Vec<Message> {
    ids.iter().copied().map(msg).collect()
}

fn id_set(list: &[Message]) -> BTreeSet<u64> {
    list.iter().filter_map(|m| m.key()).map(|k| k.0).collect()
}

fn policy() -> impl Strategy<Value = InsertPolicy> {
    prop_oneof![Just(InsertPolicy::Prepend), Just(InsertPolicy::Append)]
}

proptest! {
    #[test]
    fn merge_is_idempotent(ids in prop::collection::btree_set(0u64..500, 0..30), e in 0u64..600, policy in policy()) {
        let mut once = list(&ids);
        merge::merge(&mut once, msg(e), policy).unwrap();

        let mut twice = once.clone();
        let outcome = merge::merge(&mut twice, msg(e), policy).unwrap();

        prop_assert!(!outcome.changed());
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn merge_order_does_not_change_membership(
        ids in prop::collection::btree_set(0u64..500, 0..30),
        a in 500u64..550,
        b in 550u64..600,
        policy in policy(),
    ) {
        let mut ab = list(&ids);
        merge::merge(&mut ab, msg(a), policy).unwrap();
        merge::merge(&mut ab, msg(b), policy).unwrap();

        let mut ba = list(&ids);
        merge::merge(&mut ba, msg(b), policy).unwrap();
        merge::merge(&mut ba, msg(a), policy).unwrap();

        let mut expected = ids.clone();
        expected.extend([a, b]);
        prop_assert_eq!(ab.len(), expected.len());
        prop_assert_eq!(id_set(&ab), expected.clone());
        prop_assert_eq!(id_set(&ba), expected);
    }

    #[test]
    fn pages_merge_associatively(
        ids in prop::collection::vec(0u64..1000, 0..60),
        split_a in 0usize..60,
        split_b in 0usize..60,
    ) {
        // Distinct ids, split into an existing list and two disjoint pages.
        let mut seen = BTreeSet::new();
        let ids: Vec<u64> = ids.into_iter().filter(|id| seen.insert(*id)).collect();
        let first = split_a.min(ids.len());
        let second = split_b.clamp(first, ids.len());
        let existing: Vec<Message> = ids[..first].iter().copied().map(msg).collect();
        let a: Vec<Message> = ids[first..second].iter().copied().map(msg).collect();
        let b: Vec<Message> = ids[second..].iter().copied().map(msg).collect();

        let mut stepwise = existing.clone();
        merge::merge_page(&mut stepwise, Some(a.clone()));
        merge::merge_page(&mut stepwise, Some(b.clone()));

        let mut combined = existing;
        merge::merge_page(&mut combined, Some([a, b].concat()));

        prop_assert_eq!(stepwise, combined);
    }

    #[test]
    fn rejected_mutation_restores_snapshot(
        ids in prop::collection::btree_set(0u64..500, 0..30),
        text in "[a-z ]{0,16}",
    ) {
        let client = SyncClient::with_config(&ClientConfig::default());
        let key = schema::group_query(GroupId(1));
        let group = Group::new(1, "g", [UserId(1)]).with_messages(list(&ids));
        client.hydrate(key.clone(), Entity::from(group));
        let before = client.store().read(&key);

        let handle = client
            .create_message(Message::draft(GroupId(1), UserId(1), text))
            .unwrap();
        let _ = client.reject(handle, "rejected");

        prop_assert_eq!(client.store().read(&key), before);
        prop_assert_eq!(client.reconciler().pending_count(), 0);
    }

    #[test]
    fn group_id_filter_delivers_exactly_matches(
        groups in prop::collection::btree_set(0u64..20, 0..5),
        published in prop::collection::vec(0u64..20, 1..20),
    ) {
        let hub = EventHub::default();
        let conn = hub.registry().connect(ConnectionId(1));
        hub.registry()
            .register_filter(
                ConnectionId(1),
                SubscriptionFilter::group_ids(groups.iter().copied().map(GroupId)),
            )
            .unwrap();

        for (i, group) in published.iter().enumerate() {
            hub.message_added(Message::new(i as u64, GroupId(*group), UserId(1), "m"))
                .unwrap();
        }

        let expected = published.iter().filter(|g| groups.contains(g)).count();
        prop_assert_eq!(conn.drain().len(), expected);
    }
}
