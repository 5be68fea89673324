//! Deskline Shared Types and Contracts
//!
//! This crate contains the chat data model, wire event types, and the
//! collaborator contracts shared across the Deskline platform.

pub mod backend;
pub mod error;
pub mod events;
pub mod types;

pub use backend::{ChatBackend, ChatStreamHandle, GlobalStreamHandle};
pub use error::TransportError;
pub use events::{ChatLifecycleEvent, ChatStreamEvent, GlobalEvent};
pub use types::*;
