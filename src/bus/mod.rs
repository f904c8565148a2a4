//! Topic-keyed publish/subscribe.
//!
//! The bus carries no business logic: every handler registered for a
//! topic sees every event published on it, in publish order.
//!
//! - Handler failures (errors or panics) are isolated and reported
//! - Unsubscribe is synchronous with respect to delivery
//!
//! # Example
//!
//! ```ignore
//! let bus = EventBus::new();
//! let id = bus.subscribe(Topic::MessageAdded, |event| {
//!     println!("got {:?}", event.entity);
//!     Ok(())
//! });
//! bus.publish(Topic::MessageAdded, message.into());
//! bus.unsubscribe(id);
//! ```

mod event_bus;
mod types;

pub use event_bus::EventBus;
pub use types::{Event, HandlerError, HandlerId, HandlerResult, PublishReport, Topic};
