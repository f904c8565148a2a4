//! Routing entities into the list a cached value keeps them in.

use super::types::CacheValue;
use crate::error::{Result, SyncError};
use crate::merge::{self, InsertPolicy, MergeOutcome};
use crate::types::{Entity, EntityKey, GroupId, Identified, Message, PendingId};
use std::collections::BTreeSet;

/// The list inside a value that an incoming entity belongs to.
enum Slot<'a> {
    /// A group's newest-first message list.
    Messages(&'a mut Vec<Message>),
    /// The latest-message preview of a group inside a group list.
    Preview(&'a mut Vec<Message>),
    /// A plain collection of entities.
    Entities(&'a mut Vec<Entity>),
    /// A user's group memberships.
    UserGroups(&'a mut BTreeSet<GroupId>),
    None,
}

fn group_messages(items: &mut [Entity], group_id: GroupId) -> Option<&mut Vec<Message>> {
    items.iter_mut().find_map(|item| match item {
        Entity::Group(g) if g.id.confirmed() == Some(group_id) => Some(&mut g.messages),
        _ => None,
    })
}

fn add_membership(set: &mut BTreeSet<GroupId>, group: Option<GroupId>) -> MergeOutcome {
    match group {
        Some(id) if set.insert(id) => MergeOutcome::Inserted,
        Some(_) => MergeOutcome::Duplicate,
        // Memberships only hold confirmed groups.
        None => MergeOutcome::NotApplicable,
    }
}

/// A preview holds only the newest message.
fn trim_preview(preview: &mut Vec<Message>, outcome: MergeOutcome) -> MergeOutcome {
    preview.truncate(1);
    outcome
}

impl CacheValue {
    fn slot_for<'a>(&'a mut self, incoming: &Entity) -> Slot<'a> {
        match self {
            CacheValue::Entity(Entity::Group(g)) => match incoming {
                Entity::Message(m) if g.id.confirmed() == Some(m.group_id) => {
                    Slot::Messages(&mut g.messages)
                }
                _ => Slot::None,
            },
            CacheValue::Entity(Entity::User(u)) => match incoming {
                Entity::Group(_) => Slot::UserGroups(&mut u.groups),
                _ => Slot::None,
            },
            CacheValue::Entity(_) => Slot::None,
            CacheValue::Collection(items) => {
                // Messages never join a collection themselves; inside a group
                // list they update the matching group's preview.
                if let Entity::Message(m) = incoming {
                    return match group_messages(items, m.group_id) {
                        Some(preview) => Slot::Preview(preview),
                        None => Slot::None,
                    };
                }
                Slot::Entities(items)
            }
        }
    }

    /// Merge an incoming entity into this value.
    pub fn merge_entity(&mut self, incoming: Entity) -> Result<MergeOutcome> {
        let policy = InsertPolicy::for_entity(&incoming);
        match (self.slot_for(&incoming), incoming) {
            (Slot::Messages(list), Entity::Message(m)) => merge::merge(list, m, policy),
            (Slot::Preview(list), Entity::Message(m)) => {
                let outcome = merge::merge(list, m, policy)?;
                Ok(trim_preview(list, outcome))
            }
            (Slot::Entities(list), entity) => merge::merge(list, entity, policy),
            (Slot::UserGroups(set), Entity::Group(g)) => Ok(add_membership(set, g.key())),
            _ => Ok(MergeOutcome::NotApplicable),
        }
    }

    /// Reconcile the placeholder `tag` with its confirmed form.
    pub fn replace_pending(&mut self, tag: PendingId, confirmed: Entity) -> Result<MergeOutcome> {
        if confirmed.key().is_none() {
            return Err(SyncError::InvalidEntity(format!(
                "confirmed {} carries no id",
                confirmed.kind()
            )));
        }

        let policy = InsertPolicy::for_entity(&confirmed);
        match (self.slot_for(&confirmed), confirmed) {
            (Slot::Messages(list), Entity::Message(m)) => merge::replace_pending(list, tag, m, policy),
            (Slot::Preview(list), Entity::Message(m)) => {
                let outcome = merge::replace_pending(list, tag, m, policy)?;
                Ok(trim_preview(list, outcome))
            }
            (Slot::Entities(list), entity) => merge::replace_pending(list, tag, entity, policy),
            (Slot::UserGroups(set), Entity::Group(g)) => Ok(add_membership(set, g.key())),
            _ => Ok(MergeOutcome::NotApplicable),
        }
    }

    /// Remove the placeholder `tag` wherever it sits.
    pub fn remove_pending(&mut self, tag: PendingId) -> bool {
        match self {
            CacheValue::Entity(Entity::Group(g)) => merge::remove_pending(&mut g.messages, tag),
            CacheValue::Entity(_) => false,
            CacheValue::Collection(items) => {
                let mut removed = merge::remove_pending(items, tag);
                for item in items.iter_mut() {
                    if let Entity::Group(g) = item {
                        removed |= merge::remove_pending(&mut g.messages, tag);
                    }
                }
                removed
            }
        }
    }

    /// Remove a confirmed entity, e.g. after a group was deleted or left.
    pub fn remove_entity(&mut self, key: EntityKey) -> bool {
        match (self, key) {
            (CacheValue::Entity(Entity::Group(g)), EntityKey::Message(id)) => {
                merge::remove_by_key(&mut g.messages, id)
            }
            (CacheValue::Entity(Entity::User(u)), EntityKey::Group(id)) => u.groups.remove(&id),
            (CacheValue::Entity(Entity::User(u)), EntityKey::User(id)) => u.friends.remove(&id),
            (CacheValue::Entity(_), _) => false,
            (CacheValue::Collection(items), key) => {
                let mut removed = merge::remove_by_key(items, key);
                if let EntityKey::Message(id) = key {
                    for item in items.iter_mut() {
                        if let Entity::Group(g) = item {
                            removed |= merge::remove_by_key(&mut g.messages, id);
                        }
                    }
                }
                removed
            }
        }
    }

    /// Extend the value's paginated list with a fetched page.
    pub fn merge_page(&mut self, page: Option<Vec<Entity>>) -> Result<usize> {
        match self {
            CacheValue::Entity(Entity::Group(g)) => {
                let page = page
                    .map(|entries| {
                        entries
                            .into_iter()
                            .map(|entry| match entry {
                                Entity::Message(m) if g.id.confirmed() == Some(m.group_id) => Ok(m),
                                other => Err(SyncError::InvalidEntity(format!(
                                    "{} does not belong to this group's messages",
                                    other.kind()
                                ))),
                            })
                            .collect::<Result<Vec<_>>>()
                    })
                    .transpose()?;
                Ok(merge::merge_page(&mut g.messages, page))
            }
            CacheValue::Collection(items) => {
                if let Some(m) = page.iter().flatten().find(|e| matches!(e, Entity::Message(_))) {
                    return Err(SyncError::InvalidEntity(format!(
                        "a {} page cannot extend a collection",
                        m.kind()
                    )));
                }
                Ok(merge::merge_page(items, page))
            }
            CacheValue::Entity(other) => Err(SyncError::InvalidEntity(format!(
                "a cached {} has no paginated list",
                other.kind()
            ))),
        }
    }

    /// Offset of the next page of the value's paginated list.
    pub fn next_offset(&self) -> usize {
        match self {
            CacheValue::Entity(Entity::Group(g)) => merge::next_offset(&g.messages),
            CacheValue::Collection(items) => merge::next_offset(items),
            CacheValue::Entity(_) => 0,
        }
    }
}
