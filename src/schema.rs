//! The fixed chat schema: subscription arguments, query keys and which
//! queries each mutation touches.

use crate::bus::Topic;
use crate::cache::CacheKey;
use crate::reconciler::MutationReconciler;
use crate::types::{GroupId, UserId};
use serde_json::{json, Value};

/// Declared type of a subscription argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgType {
    Int,
    IntList,
}

/// Arguments each subscription field declares.
pub fn subscription_arguments(topic: Topic) -> &'static [(&'static str, ArgType)] {
    match topic {
        Topic::MessageAdded => &[("groupIds", ArgType::IntList)],
        Topic::GroupAdded => &[("userId", ArgType::Int)],
    }
}

pub const GROUP_QUERY: &str = "group";
pub const USER_QUERY: &str = "user";
pub const USER_GROUPS_QUERY: &str = "userGroups";

pub const CREATE_MESSAGE: &str = "createMessage";
pub const CREATE_GROUP: &str = "createGroup";
pub const DELETE_GROUP: &str = "deleteGroup";
pub const LEAVE_GROUP: &str = "leaveGroup";

/// Key of the `group(groupId)` query: a group with its paginated messages.
pub fn group_query(id: GroupId) -> CacheKey {
    CacheKey::new(GROUP_QUERY, &json!({ "groupId": id.0 }))
}

/// Key of the `user(id)` query: a user with their groups.
pub fn user_query(id: UserId) -> CacheKey {
    CacheKey::new(USER_QUERY, &json!({ "id": id.0 }))
}

/// Key of the `userGroups(userId)` query: the user's group list, in
/// insertion order, each with its latest-message preview.
pub fn user_groups_query(id: UserId) -> CacheKey {
    CacheKey::new(USER_GROUPS_QUERY, &json!({ "userId": id.0 }))
}

/// Every cached view of `user`'s groups.
fn user_views(id: UserId) -> [CacheKey; 2] {
    [user_query(id), user_groups_query(id)]
}

fn ids(value: &Value) -> impl Iterator<Item = u64> + '_ {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Value::as_u64)
}

/// Declare the chat mutations on `reconciler`.
///
/// - `createMessage(groupId, text)` affects the group's query
/// - `createGroup(name, userIds)` affects each member's user and
///   group-list queries
/// - `deleteGroup(id, userId)` and `leaveGroup(id, userId)` affect the
///   acting user's user and group-list queries; `userId` is supplied by
///   the caller
pub fn declare_chat_mutations(reconciler: &MutationReconciler) {
    reconciler.declare(CREATE_MESSAGE, |vars| {
        vars["groupId"]
            .as_u64()
            .map(|id| vec![group_query(GroupId(id))])
            .unwrap_or_default()
    });
    reconciler.declare(CREATE_GROUP, |vars| {
        ids(&vars["userIds"])
            .flat_map(|id| user_views(UserId(id)))
            .collect()
    });
    for mutation in [DELETE_GROUP, LEAVE_GROUP] {
        reconciler.declare(mutation, |vars| {
            vars["userId"]
                .as_u64()
                .map(|id| user_views(UserId(id)).to_vec())
                .unwrap_or_default()
        });
    }
}
