//! Subscription registry for filtered event delivery.
//!
//! This module turns subscription requests into live registrations:
//! - Parsing subscription documents and coercing their arguments
//! - Building a tagged filter per registration
//! - Evaluating filters on publish and forwarding matches to the
//!   owning connection's outbound channel
//!
//! Registrations support:
//! - Synchronous unregister
//! - Per-connection bounded buffers with slow-consumer dropping
//! - Discarding orphaned registrations on disconnect
//!
//! # Example
//!
//! ```ignore
//! let registry = Arc::new(SubscriptionRegistry::new());
//! registry.attach(&bus);
//!
//! let conn = registry.connect(ConnectionId(1));
//! registry.register(
//!     ConnectionId(1),
//!     "subscription($ids: [Int]) { messageAdded(groupIds: $ids) { id text } }",
//!     &json!({ "ids": [5] }),
//! )?;
//!
//! loop {
//!     match conn.recv() {
//!         Ok(Outbound::Data { entity, .. }) => println!("Got {:?}", entity),
//!         Ok(Outbound::Dropped { reason, .. }) => break,
//!         Err(_) => break,
//!     }
//! }
//! ```

mod document;
mod filter;
mod registry;
mod types;

pub use document::{parse_subscription, SubscriptionRequest};
pub use filter::SubscriptionFilter;
pub use registry::SubscriptionRegistry;
pub use types::{
    ConnectionHandle, DispatchReport, DropReason, Outbound, Registration, RegistryConfig,
};
