//! StudyHall Realtime - Room Synchronization Core
//!
//! This crate implements the realtime subsystem of the StudyHall learning
//! platform: logical rooms where participants see each other's presence,
//! live typing indicators, and an ordered, deduplicated message log, all of
//! which survive channel drops and resubscription without losing or
//! duplicating state.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
