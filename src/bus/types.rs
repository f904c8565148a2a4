//! Event bus types.

use crate::error::SyncError;
use crate::types::Entity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A class of domain event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Topic {
    MessageAdded,
    GroupAdded,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::MessageAdded, Topic::GroupAdded];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::MessageAdded => "messageAdded",
            Topic::GroupAdded => "groupAdded",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| SyncError::parse(0, format!("unknown subscription field `{}`", s)))
    }
}

/// A published event. The payload is shared and never mutated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub topic: Topic,
    pub entity: Arc<Entity>,
}

impl Event {
    pub fn new(topic: Topic, entity: impl Into<Entity>) -> Self {
        Self {
            topic,
            entity: Arc::new(entity.into()),
        }
    }
}

/// Error a handler may return; it is logged and counted, never propagated.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by bus handlers.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Handle for one bus subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId {
    pub topic: Topic,
    pub(crate) id: u64,
}

/// Outcome of a single publish.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Handlers that returned successfully.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}
