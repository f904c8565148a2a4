//! Subscription filters.
//!
//! A filter is a small tagged description built from a subscription's
//! coerced arguments. Evaluation is a pure function of the filter and the
//! event payload.

use super::document::SubscriptionRequest;
use crate::bus::Topic;
use crate::error::{FilterEvaluationError, Result, SyncError};
use crate::types::{Entity, GroupId, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Filter criteria for one registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum SubscriptionFilter {
    /// `groupAdded(userId)`: the user is a member of the added group.
    GroupMembership { user_id: Option<UserId> },
    /// `messageAdded(groupIds)`: the message belongs to one of the groups.
    GroupIdSet { group_ids: BTreeSet<GroupId> },
}

impl SubscriptionFilter {
    /// Match groups that `user_id` belongs to.
    pub fn group_membership(user_id: UserId) -> Self {
        SubscriptionFilter::GroupMembership {
            user_id: Some(user_id),
        }
    }

    /// Match messages posted to any of `group_ids`.
    pub fn group_ids(group_ids: impl IntoIterator<Item = GroupId>) -> Self {
        SubscriptionFilter::GroupIdSet {
            group_ids: group_ids.into_iter().collect(),
        }
    }

    /// Build the filter for a parsed subscription request.
    pub fn from_request(request: &SubscriptionRequest) -> Result<Self> {
        let arg = |name: &str| request.arguments.get(name).cloned().unwrap_or(Value::Null);

        match request.topic {
            Topic::GroupAdded => Ok(SubscriptionFilter::GroupMembership {
                user_id: arg("userId").as_u64().map(UserId),
            }),
            Topic::MessageAdded => {
                let group_ids = match arg("groupIds") {
                    Value::Null => BTreeSet::new(),
                    Value::Array(items) => items
                        .into_iter()
                        .map(|v| {
                            v.as_u64()
                                .map(GroupId)
                                .ok_or_else(|| SyncError::parse(0, "groupIds must be Ints"))
                        })
                        .collect::<Result<_>>()?,
                    _ => return Err(SyncError::parse(0, "groupIds must be a list")),
                };
                Ok(SubscriptionFilter::GroupIdSet { group_ids })
            }
        }
    }

    /// Topic this filter applies to.
    pub fn topic(&self) -> Topic {
        match self {
            SubscriptionFilter::GroupMembership { .. } => Topic::GroupAdded,
            SubscriptionFilter::GroupIdSet { .. } => Topic::MessageAdded,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            SubscriptionFilter::GroupMembership { .. } => "group membership",
            SubscriptionFilter::GroupIdSet { .. } => "group id set",
        }
    }

    /// Evaluate the filter against an event payload.
    pub fn evaluate(&self, entity: &Entity) -> std::result::Result<bool, FilterEvaluationError> {
        match (self, entity) {
            (SubscriptionFilter::GroupMembership { user_id }, Entity::Group(group)) => {
                Ok(user_id.is_some_and(|id| group.members.contains(&id)))
            }
            (SubscriptionFilter::GroupIdSet { group_ids }, Entity::Message(message)) => {
                Ok(group_ids.contains(&message.group_id))
            }
            (filter, entity) => Err(FilterEvaluationError {
                filter: filter.name(),
                payload: entity.kind(),
            }),
        }
    }
}
