//! Room directory adapters.

mod in_memory;

pub use in_memory::InMemoryRoomDirectory;
