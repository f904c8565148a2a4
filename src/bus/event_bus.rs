//! In-process event bus.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{Event, HandlerId, HandlerResult, PublishReport, Topic};
use crate::types::Entity;

type Handler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// Handlers registered for one topic.
///
/// The slot lock is held for the whole of a delivery, which serializes
/// publishes on the topic and makes unsubscribe wait out in-flight
/// deliveries.
#[derive(Default)]
struct TopicSlot {
    handlers: Vec<(u64, Handler)>,
}

/// Topic-keyed publish/subscribe primitive.
///
/// Handlers must not subscribe, unsubscribe or publish on the topic they
/// are currently handling.
pub struct EventBus {
    topics: HashMap<Topic, Mutex<TopicSlot>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create a bus with an empty slot for every topic.
    pub fn new() -> Self {
        Self {
            topics: Topic::ALL
                .into_iter()
                .map(|topic| (topic, Mutex::new(TopicSlot::default())))
                .collect(),
            next_id: AtomicU64::new(1),
        }
    }

    fn slot(&self, topic: Topic) -> &Mutex<TopicSlot> {
        // Every topic has a slot from construction.
        &self.topics[&topic]
    }

    /// Register a handler for `topic`.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> HandlerId
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.slot(topic).lock().handlers.push((id, Arc::new(handler)));
        debug!(%topic, handler = id, "bus handler subscribed");
        HandlerId { topic, id }
    }

    /// Remove a handler. Once this returns the handler receives nothing more.
    pub fn unsubscribe(&self, handle: HandlerId) -> bool {
        let mut slot = self.slot(handle.topic).lock();
        let before = slot.handlers.len();
        slot.handlers.retain(|(id, _)| *id != handle.id);
        before != slot.handlers.len()
    }

    /// Number of handlers on a topic.
    pub fn handler_count(&self, topic: Topic) -> usize {
        self.slot(topic).lock().handlers.len()
    }

    /// Publish an entity on a topic.
    pub fn publish(&self, topic: Topic, entity: Entity) -> PublishReport {
        self.publish_event(&Event::new(topic, entity))
    }

    /// Deliver an event to every handler of its topic.
    pub fn publish_event(&self, event: &Event) -> PublishReport {
        let slot = self.slot(event.topic).lock();
        let mut report = PublishReport::default();

        for (id, handler) in slot.handlers.iter() {
            match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    warn!(topic = %event.topic, handler = id, error = %e, "bus handler failed");
                    report.failed += 1;
                }
                Err(_) => {
                    warn!(topic = %event.topic, handler = id, "bus handler panicked");
                    report.failed += 1;
                }
            }
        }

        report
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
