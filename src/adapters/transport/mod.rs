//! Channel transport adapters.

mod backoff;
mod in_memory;
mod reconnecting;

pub use backoff::BackoffPolicy;
pub use in_memory::{InMemoryChannelConnector, InMemoryChannelHub};
pub use reconnecting::ReconnectingChannel;
