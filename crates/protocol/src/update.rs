//! Console → UI updates
//!
//! Fan-out messages the view layer subscribes to. The view layer itself is
//! out of scope here; these are the delta notifications it renders from.

use serde::{Deserialize, Serialize};

use crate::types::{
    AgentStatus, Decision, Job, JobStatus, LogEntry, PendingCommand, Project, TranscriptMessage,
};

/// Messages pushed from the console core to subscribed views
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsoleUpdate {
    /// A message was appended to the transcript
    MessageAppended { message: TranscriptMessage },

    /// An agent's status changed
    AgentStatusChanged {
        agent_id: String,
        status: AgentStatus,
    },

    /// A command now awaits operator approval
    CommandSurfaced { pending: PendingCommand },

    /// A pending command was resolved
    CommandResolved {
        message_id: String,
        decision: Decision,
    },

    /// The resolution acknowledgement expired and should stop rendering
    DecisionCleared { message_id: String },

    /// The backend asked for the crew panel
    CrewListRequested {
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
    },

    /// A background job was created
    JobStarted { job: Job },

    /// A job's status or progress changed
    JobUpdated {
        job_id: String,
        status: JobStatus,
        progress: u8,
    },

    /// A log entry was appended to a job
    JobLogAppended { job_id: String, entry: LogEntry },

    /// The active session changed; transcript state was reset
    SessionSwitched { session_id: String },

    /// A project became the active project
    ProjectActivated { project: Project },

    /// The backend connection came up or went down
    ConnectionChanged { connected: bool },
}
