//! The core set of traits and types used by roost consumers.
//!
//! This crate aims to provide better version stability over the primary batteries-included
//! `roost` crate. Top-level applications should typically use `roost`, while crates that define
//! message types should use `roost_core`

mod id;
mod queue;
pub use id::MessageId;
pub use queue::Queue;
pub mod message;

/// Custom headers associated with a message.
pub type Headers = std::collections::BTreeMap<String, String>;

/// A validated message.
pub type ValidatedMessage = message::ValidatedMessage<bytes::Bytes>;
