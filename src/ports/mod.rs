//! Ports - Interfaces for external collaborators.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the realtime core and the outside world. Adapters implement them.
//!
//! - `ChannelConnector` / `ChannelPublisher` - topic-scoped pub/sub
//!   against the channel provider, with validated tagged events
//! - `RoomDirectory` - durable storage for messages and members

mod channel;
mod room_directory;

pub use channel::{
    ChannelConnection, ChannelConnector, ChannelEvent, ChannelPublisher, ConnectionState,
};
pub use room_directory::RoomDirectory;
