//! Session domain: room session lifecycle.

mod state;

pub use state::SessionState;
