//! Topic-based subscriptions for change events
//!
//! Topics have the form `<collection>:<operation>`:
//! - `orders:insert` - inserts into `orders`
//! - `orders:*` - every operation on `orders`
//! - `*:delete` - deletes in any collection
//! - `*:*` - everything
pub mod registry;
pub mod topic;

pub use registry::{Callback, DispatchOutcome, RegistryStats, SubscriptionRegistry, callback};
pub use topic::{Segment, TOPIC_DELIMITER, TopicPattern, WILDCARD};
