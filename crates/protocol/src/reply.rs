//! Console → Backend replies
//!
//! The backend consumes approval outcomes as bracket-tagged free text over
//! the same channel it sends events on. The tag convention is a wire
//! compatibility layer: inside the console a reply is always this typed
//! variant, and the string form is produced only at the boundary.

use serde::{Deserialize, Serialize};

/// Outcome of a resolved command, ready to send back to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum CommandReply {
    ToolExecuted { tool_name: String, value: String },
    ToolDenied { tool_name: String },
    ConfigResponse { config_key: String, value: String },
    ConfigDenied { config_key: String },
    MemoryShown { memory_id: String },
    MemoryDenied { memory_id: String },
}

impl CommandReply {
    /// Render the bracket-tagged wire form the backend parses.
    pub fn to_wire(&self) -> String {
        match self {
            CommandReply::ToolExecuted { tool_name, value } => {
                format!("[TOOL_EXECUTED] {} - {}", tool_name, value)
            }
            CommandReply::ToolDenied { tool_name } => format!("[TOOL_DENIED] {}", tool_name),
            CommandReply::ConfigResponse { config_key, value } => {
                format!("[CONFIG_RESPONSE] {}: {}", config_key, value)
            }
            CommandReply::ConfigDenied { config_key } => {
                format!("[CONFIG_DENIED] {}", config_key)
            }
            CommandReply::MemoryShown { memory_id } => format!("[MEMORY_SHOWN] {}", memory_id),
            CommandReply::MemoryDenied { memory_id } => format!("[MEMORY_DENIED] {}", memory_id),
        }
    }
}
