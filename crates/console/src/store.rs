//! Lock-free UI-visible state
//!
//! The console loop owns all mutable state; views never lock it. After each
//! processed command the loop publishes an immutable snapshot through
//! `ArcSwap`, and readers load it wait-free.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crewdeck_protocol::{
    AgentStatus, Decision, Job, PendingCommand, Project, TranscriptMessage,
};

/// Immutable view of the console state at one point in time.
#[derive(Debug, Clone, Default)]
pub struct ConsoleSnapshot {
    pub session_id: String,
    pub connected: bool,
    pub transcript: Vec<TranscriptMessage>,
    pub agent_statuses: HashMap<String, AgentStatus>,
    pub pending_command: Option<PendingCommand>,
    pub recent_decision: Option<(String, Decision)>,
    pub jobs: Vec<Job>,
    pub projects: Vec<Project>,
    pub active_project: Option<Project>,
}

/// Snapshot publisher/reader pair (cheap to clone).
#[derive(Clone, Default)]
pub struct ConsoleStore {
    inner: Arc<ArcSwap<ConsoleSnapshot>>,
}

impl ConsoleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: ConsoleSnapshot) {
        self.inner.store(Arc::new(snapshot));
    }

    pub fn load(&self) -> Arc<ConsoleSnapshot> {
        self.inner.load_full()
    }
}
