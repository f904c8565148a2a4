//! Subscription registry types.

use super::filter::SubscriptionFilter;
use crate::bus::Topic;
use crate::types::{ConnectionId, Entity, RegistrationId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Registry configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Max buffered outbound events per connection before the connection
    /// is dropped.
    /// Default: 1000
    pub outbound_buffer_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            outbound_buffer_size: 1000,
        }
    }
}

/// A live registration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub id: RegistrationId,
    pub connection: ConnectionId,
    pub topic: Topic,
    pub filter: SubscriptionFilter,
}

/// Messages written to a connection's outbound channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// An event matched the registration's filter.
    Data {
        registration: RegistrationId,
        topic: Topic,
        entity: Arc<Entity>,
    },

    /// The registration was removed.
    Dropped {
        registration: RegistrationId,
        reason: DropReason,
    },
}

/// Why a registration was removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Outbound buffer overflowed (slow consumer).
    BufferOverflow,
    /// Connection went away.
    Disconnected,
    /// Explicitly unregistered.
    Unregistered,
}

/// Outcome of dispatching one event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Registrations whose filter was evaluated.
    pub evaluated: usize,
    /// Registrations the event was forwarded to.
    pub delivered: usize,
    /// Filters that failed to evaluate (counted as no match).
    pub filter_errors: usize,
    /// Connections dropped because they could not accept the event.
    pub dropped_connections: usize,
}

/// Receiving end of a connection's outbound channel.
pub struct ConnectionHandle {
    pub id: ConnectionId,
    /// Channel to receive outbound messages.
    pub receiver: crossbeam_channel::Receiver<Outbound>,
}

impl ConnectionHandle {
    /// Receive the next message (blocking).
    pub fn recv(&self) -> Result<Outbound, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message (non-blocking).
    pub fn try_recv(&self) -> Result<Outbound, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<Outbound, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<Outbound> {
        self.receiver.try_iter().collect()
    }
}
