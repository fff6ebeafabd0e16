//! Backend → Console events
//!
//! The inbound stream is ordered per connection but not globally
//! deduplicated: reconnects and overlapping batches can replay events the
//! console has already seen. `complete_message` and `message_chunk` carry a
//! stable `id` for exactly that reason; `status_update` carries none and is
//! never deduplicated.

use serde::{Deserialize, Serialize};

/// One event on the backend stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendEvent {
    /// A finished agent utterance; `id` is globally stable for this message
    CompleteMessage {
        id: String,
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        issued_command: Option<IssuedCommand>,
    },

    /// One fragment of a streaming utterance; all chunks sharing `id`
    /// belong to one message
    MessageChunk {
        id: String,
        content_chunk: String,
        is_final: bool,
    },

    /// Transport-level or agent-level status; no stable id
    StatusUpdate {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },
}

/// A structured command the backend embeds in a `complete_message` to drive
/// the console. Surfaced to the operator at most once per message id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum IssuedCommand {
    /// Resolved silently: activate (or create) the named project and its chat
    CreateProjectChat {
        project_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        project_id: Option<String>,
    },

    /// Open a stored memory record; requires approval
    ShowMemoryPage { memory_id: String },

    /// Ask the operator for a configuration value; requires approval
    PromptForConfig { config_key: String },

    /// Execute a named tool; requires approval
    ExecuteTool {
        tool_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
    },

    /// Show the agent crew panel; resolved silently
    CrewList {
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },
}
