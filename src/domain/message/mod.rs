//! Message domain: durable rows and the optimistic local log.

mod log;
mod message;

pub use log::MessageLog;
pub use message::{AttachmentRef, DeliveryState, Message, StoredMessage};
