//! Core types shared across the protocol

use serde::{Deserialize, Serialize};

use crate::event::IssuedCommand;

/// Who authored a transcript message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Assistant,
}

/// Agent status - what an agent is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Thinking,
    Executing,
    Offline,
}

/// A message in the transcript.
///
/// Immutable once created. The transcript is an append-only sequence keyed
/// by `id` with first-write-wins semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub id: String,
    pub sender: Sender,
    pub content: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    /// Completed and Failed are terminal; no further transitions are applied.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Severity/kind of a job log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Plan,
    Tool,
    Memory,
}

/// One entry in a job's append-only log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

/// A tracked background execution spawned by an approved tool command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub agent_id: String,
    pub name: String,
    pub status: JobStatus,
    pub progress: u8,
    pub logs: Vec<LogEntry>,
    pub started_at: String,
}

/// A project record in the local directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
}

/// The operator's decision on a surfaced command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Denied,
}

/// A backend-issued command awaiting operator approval.
///
/// `message_id` is the id of the originating `complete_message`, needed to
/// correlate the eventual reply. `decision` holds the short-lived visual
/// acknowledgement that auto-clears after resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCommand {
    pub message_id: String,
    pub command: IssuedCommand,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
}
