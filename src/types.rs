//! Core entity and identifier types.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of a message confirmed by the authoritative source.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageId(pub u64);

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.0)
    }
}

/// Identifier of a group.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u64);

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self.0)
    }
}

/// Identifier of a user.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub u64);

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

/// Tag of an optimistic placeholder, allocated per issued mutation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PendingId(pub u64);

impl fmt::Debug for PendingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PendingId({})", self.0)
    }
}

/// Identifier of a live transport connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one subscription registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationId(pub u64);

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Identity of an entity: either assigned by the authoritative source, or
/// a local placeholder awaiting confirmation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ident<T> {
    Confirmed(T),
    Pending(PendingId),
}

impl<T: Copy> Ident<T> {
    pub fn confirmed(&self) -> Option<T> {
        match self {
            Ident::Confirmed(id) => Some(*id),
            Ident::Pending(_) => None,
        }
    }

    pub fn pending(&self) -> Option<PendingId> {
        match self {
            Ident::Confirmed(_) => None,
            Ident::Pending(tag) => Some(*tag),
        }
    }
}

/// A chat message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Ident<MessageId>,
    pub group_id: GroupId,
    pub sender_id: UserId,
    pub text: String,
    pub created_at: Timestamp,
}

impl Message {
    /// A confirmed message.
    pub fn new(id: u64, group_id: GroupId, sender_id: UserId, text: impl Into<String>) -> Self {
        Self {
            id: Ident::Confirmed(MessageId(id)),
            group_id,
            sender_id,
            text: text.into(),
            created_at: Timestamp::now(),
        }
    }

    /// An optimistic message; the reconciler assigns its pending tag.
    pub fn draft(group_id: GroupId, sender_id: UserId, text: impl Into<String>) -> Self {
        Self {
            id: Ident::Pending(PendingId(0)),
            group_id,
            sender_id,
            text: text.into(),
            created_at: Timestamp::now(),
        }
    }
}

/// A conversation group. `messages` is newest-first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: Ident<GroupId>,
    pub name: String,
    pub members: BTreeSet<UserId>,
    pub messages: Vec<Message>,
}

impl Group {
    pub fn new(id: u64, name: impl Into<String>, members: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            id: Ident::Confirmed(GroupId(id)),
            name: name.into(),
            members: members.into_iter().collect(),
            messages: Vec::new(),
        }
    }

    pub fn draft(name: impl Into<String>, members: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            id: Ident::Pending(PendingId(0)),
            name: name.into(),
            members: members.into_iter().collect(),
            messages: Vec::new(),
        }
    }

    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }
}

/// A user with the ids of their groups and friends.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub groups: BTreeSet<GroupId>,
    pub friends: BTreeSet<UserId>,
}

impl User {
    pub fn new(id: u64, username: impl Into<String>) -> Self {
        Self {
            id: UserId(id),
            username: username.into(),
            groups: BTreeSet::new(),
            friends: BTreeSet::new(),
        }
    }
}

/// Confirmed identity of any entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityKey {
    Message(MessageId),
    Group(GroupId),
    User(UserId),
}

impl From<MessageId> for EntityKey {
    fn from(id: MessageId) -> Self {
        EntityKey::Message(id)
    }
}

impl From<GroupId> for EntityKey {
    fn from(id: GroupId) -> Self {
        EntityKey::Group(id)
    }
}

impl From<UserId> for EntityKey {
    fn from(id: UserId) -> Self {
        EntityKey::User(id)
    }
}

/// Any domain entity carried by events, query results and mutations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Entity {
    Message(Message),
    Group(Group),
    User(User),
}

impl Entity {
    pub fn kind(&self) -> &'static str {
        match self {
            Entity::Message(_) => "message",
            Entity::Group(_) => "group",
            Entity::User(_) => "user",
        }
    }

    /// Re-tag an unconfirmed entity as the placeholder `tag`.
    ///
    /// Users have no pending form and confirmed entities cannot be
    /// turned back into placeholders.
    pub fn into_pending(self, tag: PendingId) -> Result<Self, Self> {
        match self {
            Entity::Message(mut m) if m.id.confirmed().is_none() => {
                m.id = Ident::Pending(tag);
                Ok(Entity::Message(m))
            }
            Entity::Group(mut g) if g.id.confirmed().is_none() => {
                g.id = Ident::Pending(tag);
                Ok(Entity::Group(g))
            }
            other => Err(other),
        }
    }
}

impl From<Message> for Entity {
    fn from(m: Message) -> Self {
        Entity::Message(m)
    }
}

impl From<Group> for Entity {
    fn from(g: Group) -> Self {
        Entity::Group(g)
    }
}

impl From<User> for Entity {
    fn from(u: User) -> Self {
        Entity::User(u)
    }
}

/// Access to the identity used for deduplication.
pub trait Identified {
    type Key: Copy + Eq + std::hash::Hash + fmt::Debug + Into<EntityKey>;

    /// Confirmed identity, `None` for placeholders.
    fn key(&self) -> Option<Self::Key>;

    /// Placeholder tag, `None` for confirmed entities.
    fn pending(&self) -> Option<PendingId>;
}

impl Identified for Message {
    type Key = MessageId;

    fn key(&self) -> Option<MessageId> {
        self.id.confirmed()
    }

    fn pending(&self) -> Option<PendingId> {
        self.id.pending()
    }
}

impl Identified for Group {
    type Key = GroupId;

    fn key(&self) -> Option<GroupId> {
        self.id.confirmed()
    }

    fn pending(&self) -> Option<PendingId> {
        self.id.pending()
    }
}

impl Identified for User {
    type Key = UserId;

    fn key(&self) -> Option<UserId> {
        Some(self.id)
    }

    fn pending(&self) -> Option<PendingId> {
        None
    }
}

impl Identified for Entity {
    type Key = EntityKey;

    fn key(&self) -> Option<EntityKey> {
        match self {
            Entity::Message(m) => m.key().map(EntityKey::from),
            Entity::Group(g) => g.key().map(EntityKey::from),
            Entity::User(u) => u.key().map(EntityKey::from),
        }
    }

    fn pending(&self) -> Option<PendingId> {
        match self {
            Entity::Message(m) => m.pending(),
            Entity::Group(g) => g.pending(),
            Entity::User(u) => u.pending(),
        }
    }
}
