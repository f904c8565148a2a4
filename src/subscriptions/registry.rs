//! Subscription registry: per-connection filtered fan-out.

use crate::bus::{Event, EventBus, HandlerId, Topic};
use crate::error::{Result, SyncError};
use crate::types::{ConnectionId, RegistrationId};
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::document::parse_subscription;
use super::filter::SubscriptionFilter;
use super::types::{
    ConnectionHandle, DispatchReport, DropReason, Outbound, Registration, RegistryConfig,
};

/// Internal registration state.
struct Entry {
    registration: Registration,
    sender: Sender<Outbound>,
}

impl Entry {
    /// Try to queue a message, reporting why the connection can't take it.
    fn try_send(&self, message: Outbound) -> std::result::Result<(), DropReason> {
        match self.sender.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DropReason::BufferOverflow),
            Err(TrySendError::Disconnected(_)) => Err(DropReason::Disconnected),
        }
    }
}

/// Tracks live registrations and forwards matching events to connections.
///
/// Lock order is `registrations` before `connections`.
pub struct SubscriptionRegistry {
    /// Active registrations by ID.
    registrations: RwLock<HashMap<RegistrationId, Entry>>,
    /// Outbound channel of every open connection.
    connections: RwLock<HashMap<ConnectionId, Sender<Outbound>>>,
    /// Counter for generating registration IDs.
    next_id: AtomicU64,
    config: RegistryConfig,
}

impl SubscriptionRegistry {
    /// Create a registry with default configuration.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            registrations: RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            config,
        }
    }

    /// Subscribe the registry to every topic on `bus`.
    pub fn attach(self: &Arc<Self>, bus: &EventBus) -> Vec<HandlerId> {
        Topic::ALL
            .into_iter()
            .map(|topic| {
                let registry = Arc::clone(self);
                bus.subscribe(topic, move |event| {
                    registry.dispatch(event);
                    Ok(())
                })
            })
            .collect()
    }

    // --- Connections ---

    /// Open a connection's outbound channel.
    ///
    /// Reopening an id replaces the old channel and discards its
    /// registrations; nothing missed in between is replayed.
    pub fn connect(&self, id: ConnectionId) -> ConnectionHandle {
        let (sender, receiver) = bounded(self.config.outbound_buffer_size.max(1));

        let mut regs = self.registrations.write();
        regs.retain(|_, entry| entry.registration.connection != id);
        self.connections.write().insert(id, sender);
        debug!(connection = %id, "connection opened");

        ConnectionHandle { id, receiver }
    }

    /// Drop a connection and discard its registrations.
    ///
    /// Returns the number of registrations discarded.
    pub fn disconnect(&self, id: ConnectionId) -> usize {
        let removed = self.remove_connection(id, DropReason::Disconnected, None);
        debug!(connection = %id, removed, "connection closed");
        removed
    }

    /// Remove a connection. With `channel` set, only registrations bound to
    /// that channel are removed, so a connection reopened in the meantime
    /// survives.
    fn remove_connection(
        &self,
        id: ConnectionId,
        reason: DropReason,
        channel: Option<&Sender<Outbound>>,
    ) -> usize {
        let same = |sender: &Sender<Outbound>| channel.map_or(true, |c| c.same_channel(sender));

        let mut regs = self.registrations.write();
        let mut removed = 0;
        regs.retain(|_, entry| {
            if entry.registration.connection != id || !same(&entry.sender) {
                return true;
            }
            // Best effort; the channel may be full or closed.
            if let Err(send_error) = entry.try_send(Outbound::Dropped {
                registration: entry.registration.id,
                reason: reason.clone(),
            }) {
                debug!(
                    registration = entry.registration.id.0,
                    ?send_error,
                    "drop notice not delivered"
                );
            }
            removed += 1;
            false
        });
        let mut connections = self.connections.write();
        if connections.get(&id).is_some_and(same) {
            connections.remove(&id);
        }
        removed
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    // --- Registrations ---

    /// Parse a subscription document and register its filter for `connection`.
    ///
    /// Nothing is registered if parsing or coercion fails.
    pub fn register(
        &self,
        connection: ConnectionId,
        document: &str,
        variables: &Value,
    ) -> Result<RegistrationId> {
        let request = parse_subscription(document, variables).inspect_err(|e| {
            debug!(connection = %connection, error = %e, "subscription rejected");
        })?;
        let filter = SubscriptionFilter::from_request(&request)?;
        self.register_filter(connection, filter)
    }

    /// Register an already-built filter for `connection`.
    pub fn register_filter(
        &self,
        connection: ConnectionId,
        filter: SubscriptionFilter,
    ) -> Result<RegistrationId> {
        let mut regs = self.registrations.write();
        let sender = self
            .connections
            .read()
            .get(&connection)
            .cloned()
            .ok_or(SyncError::ConnectionNotFound(connection))?;

        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let registration = Registration {
            id,
            connection,
            topic: filter.topic(),
            filter,
        };
        debug!(
            connection = %connection,
            registration = id.0,
            topic = %registration.topic,
            "subscription registered"
        );
        regs.insert(id, Entry { registration, sender });

        Ok(id)
    }

    /// Remove a registration. Once this returns no further event is
    /// forwarded for it; messages already queued may still drain.
    pub fn unregister(&self, id: RegistrationId) -> bool {
        let mut regs = self.registrations.write();
        if let Some(entry) = regs.remove(&id) {
            if let Err(send_error) = entry.try_send(Outbound::Dropped {
                registration: id,
                reason: DropReason::Unregistered,
            }) {
                debug!(
                    registration = id.0,
                    connection = %entry.registration.connection,
                    ?send_error,
                    "unregister notice not delivered"
                );
            }
            true
        } else {
            false
        }
    }

    /// Look up a registration.
    pub fn registration(&self, id: RegistrationId) -> Option<Registration> {
        self.registrations
            .read()
            .get(&id)
            .map(|entry| entry.registration.clone())
    }

    /// Get registration count.
    pub fn registration_count(&self) -> usize {
        self.registrations.read().len()
    }

    // --- Dispatch ---

    /// Evaluate every registration for the event's topic and forward
    /// matches. Connections that cannot take a message are dropped.
    pub fn dispatch(&self, event: &Event) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut failed: Vec<(ConnectionId, DropReason, Sender<Outbound>)> = Vec::new();

        {
            let regs = self.registrations.read();
            for entry in regs.values() {
                let registration = &entry.registration;
                if registration.topic != event.topic
                    || failed.iter().any(|(c, _, _)| *c == registration.connection)
                {
                    continue;
                }
                report.evaluated += 1;

                match registration.filter.evaluate(&event.entity) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        warn!(
                            registration = registration.id.0,
                            topic = %event.topic,
                            error = %e,
                            "filter evaluation failed, treating as no match"
                        );
                        report.filter_errors += 1;
                        continue;
                    }
                }

                let message = Outbound::Data {
                    registration: registration.id,
                    topic: event.topic,
                    entity: Arc::clone(&event.entity),
                };
                match entry.try_send(message) {
                    Ok(()) => report.delivered += 1,
                    Err(reason) => {
                        failed.push((registration.connection, reason, entry.sender.clone()))
                    }
                }
            }
        }

        for (connection, reason, channel) in failed {
            warn!(connection = %connection, ?reason, "dropping connection");
            self.remove_connection(connection, reason, Some(&channel));
            report.dropped_connections += 1;
        }

        report
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
