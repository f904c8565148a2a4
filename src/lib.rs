//! # Chat Sync
//!
//! Real-time event distribution for a group-chat backend paired with a
//! client-side normalized cache that merges query results, pushed events
//! and optimistic mutations into one consistent view.
//!
//! ## Core Concepts
//!
//! - **Bus**: In-process topic publish/subscribe
//! - **Subscriptions**: Per-connection registrations with filter predicates
//! - **Cache**: Query results keyed by operation and variables
//! - **Merge**: Identity-based deduplication of pushes and pages
//! - **Reconciler**: Optimistic mutations replaced or rolled back atomically
//!
//! ## Example
//!
//! ```ignore
//! use chatsync::{ClientConfig, EventHub, Message, SyncClient, schema};
//!
//! let hub = EventHub::default();
//! let conn = hub.registry().connect(ConnectionId(1));
//! let registration = hub.registry().register(
//!     ConnectionId(1),
//!     "subscription($ids: [Int]) { messageAdded(groupIds: $ids) { id text } }",
//!     &json!({ "ids": [5] }),
//! )?;
//!
//! let client = SyncClient::with_config(&ClientConfig::default());
//! client.hydrate(schema::group_query(GroupId(5)), group);
//! client.route(registration, vec![schema::group_query(GroupId(5))]);
//!
//! hub.message_added(Message::new(1, GroupId(5), UserId(1), "hi"))?;
//! for delivery in conn.drain() {
//!     client.apply_outbound(&delivery)?;
//! }
//! ```

pub mod bus;
pub mod cache;
pub mod client;
pub mod error;
pub mod hub;
pub mod merge;
pub mod reconciler;
pub mod schema;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use bus::{Event, EventBus, HandlerError, HandlerId, HandlerResult, PublishReport, Topic};
pub use cache::{CacheEntry, CacheKey, CacheNotification, CacheObserver, CacheStore, CacheValue};
pub use client::{ClientConfig, SyncClient};
pub use error::{FilterEvaluationError, Result, SyncError};
pub use hub::EventHub;
pub use merge::{InsertPolicy, MergeOutcome};
pub use reconciler::{MutationReconciler, PendingHandle};
pub use subscriptions::{
    parse_subscription, ConnectionHandle, DispatchReport, DropReason, Outbound, Registration,
    RegistryConfig, SubscriptionFilter, SubscriptionRegistry, SubscriptionRequest,
};
pub use types::*;
