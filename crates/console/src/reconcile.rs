//! Pure reconciliation fold
//!
//! All business logic for folding backend events into the transcript and
//! agent-status model lives here as a pure, synchronous function:
//! `reconcile(state, event, now) -> (state, effects)`.
//! No IO, no async, no locking - fully unit-testable, and replayable over
//! overlapping event batches without duplicating state.

use std::collections::{HashMap, HashSet};

use crewdeck_protocol::{
    new_id, AgentStatus, BackendEvent, ConsoleUpdate, IssuedCommand, Sender, TranscriptMessage,
};

use crate::chunks::ChunkAccumulator;

/// Agent key used when an event does not name its agent.
pub const DEFAULT_AGENT_ID: &str = "primary";

// ---------------------------------------------------------------------------
// ReconcilerState - session-scoped fold state
// ---------------------------------------------------------------------------

/// All state the fold owns for the active session.
#[derive(Debug, Default)]
pub struct ReconcilerState {
    /// Ordered, deduplicated transcript
    pub transcript: Vec<TranscriptMessage>,
    /// Ids that already produced a transcript message this session
    seen_ids: HashSet<String>,
    /// One status per agent id
    pub statuses: HashMap<String, AgentStatus>,
    /// Partial streamed messages, keyed by message id
    pub chunks: ChunkAccumulator,
}

impl ReconcilerState {
    pub fn new() -> Self {
        Self {
            transcript: Vec::new(),
            seen_ids: HashSet::new(),
            statuses: HashMap::new(),
            chunks: ChunkAccumulator::new(),
        }
    }

    /// Append a message to the transcript sink.
    ///
    /// First-write-wins by id: returns false (and drops the message) when
    /// the id is already present. This is the second dedupe layer,
    /// independent of the per-event seen-id check, so re-running
    /// reconciliation over overlapping batches cannot duplicate entries.
    pub fn append(&mut self, message: TranscriptMessage) -> bool {
        if self.transcript.iter().any(|m| m.id == message.id) {
            return false;
        }
        self.transcript.push(message);
        true
    }

    /// Set an agent's status. Returns true when the value changed.
    pub fn set_status(&mut self, agent_id: &str, status: AgentStatus) -> bool {
        match self.statuses.insert(agent_id.to_string(), status) {
            Some(previous) => previous != status,
            None => true,
        }
    }

    /// Tear down session-scoped state: transcript, seen ids, and partial
    /// chunk buffers. Agent statuses are not session-scoped and survive.
    pub fn reset(&mut self) {
        self.transcript.clear();
        self.seen_ids.clear();
        self.chunks.clear();
    }
}

// ---------------------------------------------------------------------------
// Effects - describe side effects to be executed by the caller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Effect {
    /// Push an update to subscribed views
    Emit(Box<ConsoleUpdate>),

    /// A completed message carried a backend-issued command; hand it to the
    /// dispatch path (which gates it through the handled-command index)
    Surface {
        message_id: String,
        command: IssuedCommand,
    },
}

// ---------------------------------------------------------------------------
// reconcile() - the fold
// ---------------------------------------------------------------------------

/// Fold one backend event into the state.
///
/// Consumes events strictly in delivery order and never reorders. An
/// id-bearing event whose id already produced a transcript message is a
/// no-op; `status_update` events are never deduplicated.
pub fn reconcile(
    mut state: ReconcilerState,
    event: BackendEvent,
    now: &str,
) -> (ReconcilerState, Vec<Effect>) {
    let mut effects: Vec<Effect> = Vec::new();

    match event {
        BackendEvent::CompleteMessage {
            id,
            content,
            agent_id,
            issued_command,
        } => {
            if state.seen_ids.contains(&id) {
                return (state, effects);
            }
            state.seen_ids.insert(id.clone());

            let agent = agent_id
                .clone()
                .unwrap_or_else(|| DEFAULT_AGENT_ID.to_string());
            let message = TranscriptMessage {
                id: id.clone(),
                sender: Sender::Assistant,
                content,
                timestamp: now.to_string(),
                agent_id: agent_id.clone(),
            };
            if state.append(message.clone()) {
                effects.push(Effect::Emit(Box::new(ConsoleUpdate::MessageAppended {
                    message,
                })));
            }

            if state.set_status(&agent, AgentStatus::Idle) {
                effects.push(Effect::Emit(Box::new(ConsoleUpdate::AgentStatusChanged {
                    agent_id: agent,
                    status: AgentStatus::Idle,
                })));
            }

            if let Some(command) = issued_command {
                effects.push(Effect::Surface {
                    message_id: id,
                    command,
                });
            }
        }

        BackendEvent::MessageChunk {
            id,
            content_chunk,
            is_final,
        } => {
            let completed = state.chunks.absorb(&id, &content_chunk, is_final);
            if let Some(content) = completed {
                // Chunk-derived completions are deduplicated like any other
                // id-bearing event. They carry no command and, unlike
                // complete_message, do not touch agent status.
                if state.seen_ids.contains(&id) {
                    return (state, effects);
                }
                state.seen_ids.insert(id.clone());

                let message = TranscriptMessage {
                    id,
                    sender: Sender::Assistant,
                    content,
                    timestamp: now.to_string(),
                    agent_id: None,
                };
                if state.append(message.clone()) {
                    effects.push(Effect::Emit(Box::new(ConsoleUpdate::MessageAppended {
                        message,
                    })));
                }
            }
        }

        BackendEvent::StatusUpdate {
            status,
            details,
            agent_id,
        } => {
            // "ready" is transport noise, not operator-relevant.
            if status.eq_ignore_ascii_case("ready") {
                return (state, effects);
            }

            let message = TranscriptMessage {
                id: new_id(),
                sender: Sender::Assistant,
                content: details.unwrap_or_else(|| status.clone()),
                timestamp: now.to_string(),
                agent_id: agent_id.clone(),
            };
            if state.append(message.clone()) {
                effects.push(Effect::Emit(Box::new(ConsoleUpdate::MessageAppended {
                    message,
                })));
            }

            if status.eq_ignore_ascii_case("busy") {
                let agent = agent_id.unwrap_or_else(|| DEFAULT_AGENT_ID.to_string());
                if state.set_status(&agent, AgentStatus::Thinking) {
                    effects.push(Effect::Emit(Box::new(ConsoleUpdate::AgentStatusChanged {
                        agent_id: agent,
                        status: AgentStatus::Thinking,
                    })));
                }
            }
        }
    }

    (state, effects)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
