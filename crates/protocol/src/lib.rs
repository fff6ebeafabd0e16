//! CrewDeck Protocol
//!
//! Shared types for communication between the CrewDeck console, the backend
//! event stream, and console clients. These types are serialized as JSON.

use uuid::Uuid;

// Re-exports
pub mod event;
pub mod reply;
pub mod types;
pub mod update;

pub use event::{BackendEvent, IssuedCommand};
pub use reply::CommandReply;
pub use types::*;
pub use update::ConsoleUpdate;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
