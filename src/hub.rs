//! Server-side wiring of the event bus and the subscription registry.

use crate::bus::{EventBus, HandlerId, PublishReport, Topic};
use crate::error::{Result, SyncError};
use crate::subscriptions::{RegistryConfig, SubscriptionRegistry};
use crate::types::{Entity, Group, Identified, Message};
use std::sync::Arc;

/// Publishes domain events and fans them out to matching registrations.
///
/// The registry is fully built before it is attached to the bus, so no
/// event can reach a half-initialized registry.
pub struct EventHub {
    bus: Arc<EventBus>,
    registry: Arc<SubscriptionRegistry>,
    handlers: Vec<HandlerId>,
}

impl EventHub {
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_bus(Arc::new(EventBus::new()), config)
    }

    /// Attach a new registry to an existing bus.
    pub fn with_bus(bus: Arc<EventBus>, config: RegistryConfig) -> Self {
        let registry = Arc::new(SubscriptionRegistry::with_config(config));
        let handlers = registry.attach(&bus);
        Self {
            bus,
            registry,
            handlers,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Publish a confirmed message on `messageAdded`.
    pub fn message_added(&self, message: Message) -> Result<PublishReport> {
        self.publish(Topic::MessageAdded, message.into())
    }

    /// Publish a confirmed group on `groupAdded`.
    pub fn group_added(&self, group: Group) -> Result<PublishReport> {
        self.publish(Topic::GroupAdded, group.into())
    }

    fn publish(&self, topic: Topic, entity: Entity) -> Result<PublishReport> {
        if entity.key().is_none() {
            return Err(SyncError::InvalidEntity(format!(
                "only confirmed entities are published, got a pending {}",
                entity.kind()
            )));
        }
        Ok(self.bus.publish(topic, entity))
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl Drop for EventHub {
    fn drop(&mut self) {
        for handler in self.handlers.drain(..) {
            self.bus.unsubscribe(handler);
        }
    }
}
