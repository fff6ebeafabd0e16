//! The console actor - single consumer of the event stream.
//!
//! Exactly one task owns the reconciler state, dispatcher, job tracker,
//! and session manager. Transport events, operator actions, job reports,
//! and timer expirations all funnel into this loop and are processed to
//! completion one at a time, so none of that state needs locking. Views
//! read through lock-free snapshots and subscribed update channels.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crewdeck_protocol::{new_id, AgentStatus, ConsoleUpdate, Sender, TranscriptMessage};
use crewdeck_transport::{TransportEvent, TransportHandle};

use crate::clock::now_iso8601;
use crate::dispatch::{CommandDispatcher, DispatchEffect};
use crate::jobs::{spawn_runner, JobReport, JobTracker};
use crate::reconcile::{reconcile, Effect, ReconcilerState, DEFAULT_AGENT_ID};
use crate::session::SessionManager;
use crate::store::{ConsoleSnapshot, ConsoleStore};

/// How long a resolution acknowledgement stays visible.
const DECISION_CLEAR_AFTER: Duration = Duration::from_secs(2);

/// Operator actions and internal wakeups processed by the console loop.
#[allow(dead_code)] // operator variants arrive from the (out-of-scope) view layer
pub enum ConsoleCommand {
    /// Operator submitted a message to the active agent
    Submit {
        content: String,
        agent_id: Option<String>,
    },

    /// Operator approved the pending command with a free-text value
    Approve { value: String },

    /// Operator denied the pending command
    Deny,

    /// Operator switched to a different session
    SwitchSession { session_id: String },

    /// Operator selected a project (resumes or creates its session)
    SelectProject { project_id: String },

    /// Subscribe a view to update notifications
    Subscribe { tx: mpsc::Sender<ConsoleUpdate> },

    /// The acknowledgement auto-clear timer fired
    DecisionExpired { message_id: String },
}

/// Handle to a running console (cheap to clone).
#[derive(Clone)]
pub struct ConsoleHandle {
    command_tx: mpsc::Sender<ConsoleCommand>,
    store: ConsoleStore,
}

#[allow(dead_code)] // consumed by the (out-of-scope) view layer
impl ConsoleHandle {
    /// Send a command to the console (fire-and-forget).
    pub async fn send(&self, cmd: ConsoleCommand) {
        if self.command_tx.send(cmd).await.is_err() {
            warn!(
                component = "console",
                event = "console.command.dropped",
                "Console loop gone, command dropped"
            );
        }
    }

    /// Lock-free snapshot read.
    pub fn snapshot(&self) -> Arc<ConsoleSnapshot> {
        self.store.load()
    }
}

/// The single consumer. Owns every piece of mutable console state.
pub struct Console {
    state: ReconcilerState,
    dispatcher: CommandDispatcher,
    jobs: JobTracker,
    sessions: SessionManager,
    transport: TransportHandle,
    connected: bool,
    subscribers: Vec<mpsc::Sender<ConsoleUpdate>>,
    store: ConsoleStore,
    command_tx: mpsc::Sender<ConsoleCommand>,
    report_tx: mpsc::Sender<JobReport>,
}

impl Console {
    /// Spawn the console loop, returning its handle.
    pub fn spawn(
        sessions: SessionManager,
        transport: TransportHandle,
        transport_rx: mpsc::Receiver<TransportEvent>,
    ) -> ConsoleHandle {
        let (command_tx, command_rx) = mpsc::channel(256);
        let (report_tx, report_rx) = mpsc::channel(256);
        let store = ConsoleStore::new();

        let console = Console {
            state: ReconcilerState::new(),
            dispatcher: CommandDispatcher::new(),
            jobs: JobTracker::new(),
            sessions,
            transport,
            connected: false,
            subscribers: Vec::new(),
            store: store.clone(),
            command_tx: command_tx.clone(),
            report_tx,
        };

        let handle = ConsoleHandle { command_tx, store };
        tokio::spawn(console.run(command_rx, transport_rx, report_rx));
        handle
    }

    async fn run(
        mut self,
        mut command_rx: mpsc::Receiver<ConsoleCommand>,
        mut transport_rx: mpsc::Receiver<TransportEvent>,
        mut report_rx: mpsc::Receiver<JobReport>,
    ) {
        self.refresh_snapshot();

        loop {
            tokio::select! {
                Some(cmd) = command_rx.recv() => self.handle_command(cmd).await,
                Some(event) = transport_rx.recv() => self.handle_transport(event).await,
                Some(report) = report_rx.recv() => self.handle_report(report).await,
                else => break,
            }
            self.refresh_snapshot();
        }

        info!(
            component = "console",
            event = "console.stopped",
            session_id = %self.sessions.active_session(),
        );
    }

    // -- Transport events ---------------------------------------------------

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.connected = true;
                self.broadcast(ConsoleUpdate::ConnectionChanged { connected: true })
                    .await;
            }

            TransportEvent::Disconnected { reason } => {
                self.connected = false;
                self.broadcast(ConsoleUpdate::ConnectionChanged { connected: false })
                    .await;
                // Surfaced as a transcript entry, never as an exception
                self.append_local(
                    Sender::Assistant,
                    format!("Connection to backend lost: {}", reason),
                    None,
                )
                .await;
            }

            TransportEvent::Event(event) => {
                let now = now_iso8601();
                let state = std::mem::take(&mut self.state);
                let (state, effects) = reconcile(state, event, &now);
                self.state = state;

                for effect in effects {
                    match effect {
                        Effect::Emit(update) => self.broadcast(*update).await,
                        Effect::Surface {
                            message_id,
                            command,
                        } => {
                            if self.sessions.mark_handled(&message_id) {
                                let effects = self.dispatcher.surface(
                                    message_id,
                                    command,
                                    &mut self.sessions,
                                );
                                self.apply_dispatch_effects(effects).await;
                            } else {
                                debug!(
                                    component = "console",
                                    event = "console.command.already_handled",
                                    message_id = %message_id,
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    // -- Operator actions ---------------------------------------------------

    async fn handle_command(&mut self, cmd: ConsoleCommand) {
        match cmd {
            ConsoleCommand::Submit { content, agent_id } => {
                let agent = agent_id
                    .clone()
                    .unwrap_or_else(|| DEFAULT_AGENT_ID.to_string());

                self.append_local(Sender::User, content.clone(), agent_id)
                    .await;

                if self.state.set_status(&agent, AgentStatus::Thinking) {
                    self.broadcast(ConsoleUpdate::AgentStatusChanged {
                        agent_id: agent,
                        status: AgentStatus::Thinking,
                    })
                    .await;
                }

                self.send_to_backend(content).await;
            }

            ConsoleCommand::Approve { value } => {
                let effects = self.dispatcher.approve(&value);
                self.apply_dispatch_effects(effects).await;
            }

            ConsoleCommand::Deny => {
                let effects = self.dispatcher.deny();
                self.apply_dispatch_effects(effects).await;
            }

            ConsoleCommand::SwitchSession { session_id } => {
                self.switch_session(session_id).await;
            }

            ConsoleCommand::SelectProject { project_id } => {
                match self.sessions.activate_project(&project_id) {
                    Some((project, session_id)) => {
                        self.broadcast(ConsoleUpdate::ProjectActivated { project })
                            .await;
                        if session_id != self.sessions.active_session() {
                            self.switch_session(session_id).await;
                        }
                    }
                    None => {
                        warn!(
                            component = "console",
                            event = "console.project.unknown",
                            project_id = %project_id,
                        );
                    }
                }
            }

            ConsoleCommand::Subscribe { tx } => {
                self.subscribers.push(tx);
            }

            ConsoleCommand::DecisionExpired { message_id } => {
                if self.dispatcher.clear_decision(&message_id) {
                    self.broadcast(ConsoleUpdate::DecisionCleared { message_id })
                        .await;
                }
            }
        }
    }

    // -- Job reports --------------------------------------------------------

    async fn handle_report(&mut self, report: JobReport) {
        let now = now_iso8601();
        let (updates, completed) = self.jobs.apply_report(report, &now);
        for update in updates {
            self.broadcast(update).await;
        }

        if let Some(job) = completed {
            // Completion summary flows through the same append path the
            // reconciler uses, preserving the single-writer invariant.
            self.append_local(
                Sender::Assistant,
                format!("Job {} completed", job.name),
                Some(job.agent_id.clone()),
            )
            .await;
        }
    }

    // -- Dispatch effects ---------------------------------------------------

    async fn apply_dispatch_effects(&mut self, effects: Vec<DispatchEffect>) {
        for effect in effects {
            match effect {
                DispatchEffect::Emit(update) => self.broadcast(*update).await,

                DispatchEffect::Reply(reply) => {
                    self.send_to_backend(reply.to_wire()).await;
                }

                DispatchEffect::SpawnJob { name } => {
                    let now = now_iso8601();
                    let job = self.jobs.create(DEFAULT_AGENT_ID, &name, &now);
                    spawn_runner(job.id.clone(), self.report_tx.clone());
                    self.broadcast(ConsoleUpdate::JobStarted { job }).await;
                }

                DispatchEffect::SwitchSession { session_id } => {
                    self.switch_session(session_id).await;
                }

                DispatchEffect::ArmDecisionTimer { message_id } => {
                    let command_tx = self.command_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(DECISION_CLEAR_AFTER).await;
                        let _ = command_tx
                            .send(ConsoleCommand::DecisionExpired { message_id })
                            .await;
                    });
                }
            }
        }
    }

    // -- Shared plumbing ----------------------------------------------------

    /// Switch sessions: reset the handled-command index and tear down
    /// transcript, seen ids, and partial chunk buffers in one turn of the
    /// loop. Jobs are not session-scoped and keep running.
    async fn switch_session(&mut self, session_id: String) {
        let dropped = self.state.chunks.pending();
        if dropped > 0 {
            debug!(
                component = "console",
                event = "console.chunks.dropped",
                count = dropped,
                "Dropping partial chunk buffers with the old session"
            );
        }
        self.sessions.switch(session_id.clone());
        self.state.reset();
        self.broadcast(ConsoleUpdate::SessionSwitched { session_id })
            .await;
    }

    /// Append a locally created message through the same sink the
    /// reconciler writes to (first-write-wins by id).
    async fn append_local(&mut self, sender: Sender, content: String, agent_id: Option<String>) {
        let message = TranscriptMessage {
            id: new_id(),
            sender,
            content,
            timestamp: now_iso8601(),
            agent_id,
        };
        if self.state.append(message.clone()) {
            self.broadcast(ConsoleUpdate::MessageAppended { message })
                .await;
        }
    }

    /// Send free text to the backend; skipped entirely while disconnected.
    async fn send_to_backend(&self, payload: String) {
        if !self.connected {
            debug!(
                component = "console",
                event = "console.send.skipped",
                "Not connected, outbound payload skipped"
            );
            return;
        }
        self.transport.send_text(payload).await;
    }

    async fn broadcast(&mut self, update: ConsoleUpdate) {
        self.subscribers.retain(|tx| !tx.is_closed());
        for tx in &self.subscribers {
            let _ = tx.send(update.clone()).await;
        }
    }

    fn refresh_snapshot(&self) {
        let snapshot = ConsoleSnapshot {
            session_id: self.sessions.active_session().to_string(),
            connected: self.connected,
            transcript: self.state.transcript.clone(),
            agent_statuses: self.state.statuses.clone(),
            pending_command: self.dispatcher.pending().cloned(),
            recent_decision: self
                .dispatcher
                .last_decision()
                .map(|(id, decision)| (id.to_string(), decision)),
            jobs: self.jobs.jobs(),
            projects: self.sessions.projects().to_vec(),
            active_project: self.sessions.active_project().cloned(),
        };
        self.store.publish(snapshot);
    }
}
