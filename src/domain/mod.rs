//! Domain layer - pure state and rules, no I/O.

pub mod foundation;
pub mod message;
pub mod presence;
pub mod session;
