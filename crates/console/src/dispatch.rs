//! Command dispatch
//!
//! Backend-issued commands embedded in completed messages pass through a
//! per-command state machine: `none → surfaced → {approved | denied} →
//! none`. Exactly one command is surfaced at a time; commands arriving
//! while one is outstanding queue FIFO and surface after resolution.
//! `create_project_chat` and `crew_list` never occupy the pending slot -
//! they resolve silently at surfacing time.
//!
//! The dispatcher mutates no transcript or status state. It returns effects
//! for the console loop to execute: transport replies, job spawns, session
//! switches, and view updates.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crewdeck_protocol::{
    CommandReply, ConsoleUpdate, Decision, IssuedCommand, PendingCommand,
};

use crate::session::SessionManager;

/// Operational verbs that route an approved tool execution into a tracked
/// background job.
const JOB_TRIGGER_KEYWORDS: &[&str] = &[
    "scan", "deploy", "install", "monitor", "backup", "migrate", "audit", "exec",
];

/// Case-insensitive substring match over tool name and arguments.
pub fn matches_job_trigger(tool_name: &str, arguments: Option<&str>) -> bool {
    let haystack = format!("{} {}", tool_name, arguments.unwrap_or_default()).to_lowercase();
    JOB_TRIGGER_KEYWORDS.iter().any(|k| haystack.contains(k))
}

/// Side effects for the console loop to execute
#[derive(Debug, Clone)]
pub enum DispatchEffect {
    /// Push an update to subscribed views
    Emit(Box<ConsoleUpdate>),

    /// Send a typed reply to the backend (wire-encoded at the boundary)
    Reply(CommandReply),

    /// Start a tracked background job for an approved tool
    SpawnJob { name: String },

    /// Activate a different session (project chat resolution)
    SwitchSession { session_id: String },

    /// Start the one-shot acknowledgement auto-clear timer
    ArmDecisionTimer { message_id: String },
}

/// The human-in-the-loop approval state machine.
#[derive(Debug, Default)]
pub struct CommandDispatcher {
    pending: Option<PendingCommand>,
    queue: VecDeque<PendingCommand>,
    /// The last resolved command, kept (with its decision) while the visual
    /// acknowledgement is showing.
    resolved: Option<PendingCommand>,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// The command currently awaiting the operator, if any.
    pub fn pending(&self) -> Option<&PendingCommand> {
        self.pending.as_ref()
    }

    /// The most recent resolution still showing its acknowledgement.
    pub fn last_decision(&self) -> Option<(&str, Decision)> {
        let resolved = self.resolved.as_ref()?;
        resolved.decision.map(|d| (resolved.message_id.as_str(), d))
    }

    /// Surface a command the reconciler extracted from a completed message.
    ///
    /// The caller has already gated `message_id` through the
    /// handled-command index, so this is invoked at most once per message
    /// id per session.
    pub fn surface(
        &mut self,
        message_id: String,
        command: IssuedCommand,
        sessions: &mut SessionManager,
    ) -> Vec<DispatchEffect> {
        let mut effects: Vec<DispatchEffect> = Vec::new();

        match command {
            IssuedCommand::CreateProjectChat {
                project_name,
                project_id,
            } => {
                let resolution =
                    sessions.resolve_project_chat(&project_name, project_id.as_deref());
                debug!(
                    component = "dispatch",
                    event = "dispatch.project_chat.resolved",
                    project = %resolution.project.name,
                    created_project = resolution.created_project,
                    created_session = resolution.created_session,
                );

                effects.push(DispatchEffect::Emit(Box::new(
                    ConsoleUpdate::ProjectActivated {
                        project: resolution.project,
                    },
                )));
                if resolution.session_id != sessions.active_session() {
                    effects.push(DispatchEffect::SwitchSession {
                        session_id: resolution.session_id,
                    });
                }
            }

            IssuedCommand::CrewList { agent_id } => {
                effects.push(DispatchEffect::Emit(Box::new(
                    ConsoleUpdate::CrewListRequested { agent_id },
                )));
            }

            command @ (IssuedCommand::ShowMemoryPage { .. }
            | IssuedCommand::PromptForConfig { .. }
            | IssuedCommand::ExecuteTool { .. }) => {
                let pending = PendingCommand {
                    message_id,
                    command,
                    decision: None,
                };

                if self.pending.is_some() {
                    debug!(
                        component = "dispatch",
                        event = "dispatch.command.queued",
                        message_id = %pending.message_id,
                        depth = self.queue.len() + 1,
                    );
                    self.queue.push_back(pending);
                } else {
                    self.pending = Some(pending.clone());
                    effects.push(DispatchEffect::Emit(Box::new(
                        ConsoleUpdate::CommandSurfaced { pending },
                    )));
                }
            }
        }

        effects
    }

    /// Operator approved the pending command with a free-text value.
    pub fn approve(&mut self, value: &str) -> Vec<DispatchEffect> {
        let Some(pending) = self.pending.take() else {
            warn!(
                component = "dispatch",
                event = "dispatch.approve.no_pending",
                "Approval received with no pending command"
            );
            return Vec::new();
        };

        let mut effects: Vec<DispatchEffect> = Vec::new();

        match &pending.command {
            IssuedCommand::ExecuteTool {
                tool_name,
                arguments,
            } => {
                effects.push(DispatchEffect::Reply(CommandReply::ToolExecuted {
                    tool_name: tool_name.clone(),
                    value: value.to_string(),
                }));
                if matches_job_trigger(tool_name, arguments.as_deref()) {
                    effects.push(DispatchEffect::SpawnJob {
                        name: tool_name.clone(),
                    });
                }
            }
            IssuedCommand::PromptForConfig { config_key } => {
                effects.push(DispatchEffect::Reply(CommandReply::ConfigResponse {
                    config_key: config_key.clone(),
                    value: value.to_string(),
                }));
            }
            IssuedCommand::ShowMemoryPage { memory_id } => {
                effects.push(DispatchEffect::Reply(CommandReply::MemoryShown {
                    memory_id: memory_id.clone(),
                }));
            }
            other => {
                // Never surfaced as pending; nothing to acknowledge.
                warn!(
                    component = "dispatch",
                    event = "dispatch.approve.unexpected_kind",
                    command = ?other,
                );
            }
        }

        effects.extend(self.resolve(pending, Decision::Approved));
        effects
    }

    /// Operator denied the pending command.
    pub fn deny(&mut self) -> Vec<DispatchEffect> {
        let Some(pending) = self.pending.take() else {
            warn!(
                component = "dispatch",
                event = "dispatch.deny.no_pending",
                "Denial received with no pending command"
            );
            return Vec::new();
        };

        let mut effects: Vec<DispatchEffect> = Vec::new();

        match &pending.command {
            IssuedCommand::ExecuteTool { tool_name, .. } => {
                effects.push(DispatchEffect::Reply(CommandReply::ToolDenied {
                    tool_name: tool_name.clone(),
                }));
            }
            IssuedCommand::PromptForConfig { config_key } => {
                effects.push(DispatchEffect::Reply(CommandReply::ConfigDenied {
                    config_key: config_key.clone(),
                }));
            }
            IssuedCommand::ShowMemoryPage { memory_id } => {
                effects.push(DispatchEffect::Reply(CommandReply::MemoryDenied {
                    memory_id: memory_id.clone(),
                }));
            }
            other => {
                warn!(
                    component = "dispatch",
                    event = "dispatch.deny.unexpected_kind",
                    command = ?other,
                );
            }
        }

        effects.extend(self.resolve(pending, Decision::Denied));
        effects
    }

    /// Shared tail of approve/deny: record the decision trace, arm its
    /// auto-clear, and surface the next queued command if any.
    fn resolve(&mut self, mut pending: PendingCommand, decision: Decision) -> Vec<DispatchEffect> {
        let mut effects: Vec<DispatchEffect> = Vec::new();

        let message_id = pending.message_id.clone();
        pending.decision = Some(decision);
        self.resolved = Some(pending);

        effects.push(DispatchEffect::Emit(Box::new(
            ConsoleUpdate::CommandResolved {
                message_id: message_id.clone(),
                decision,
            },
        )));
        effects.push(DispatchEffect::ArmDecisionTimer { message_id });

        if let Some(next) = self.queue.pop_front() {
            self.pending = Some(next.clone());
            effects.push(DispatchEffect::Emit(Box::new(
                ConsoleUpdate::CommandSurfaced { pending: next },
            )));
        }

        effects
    }

    /// One-shot acknowledgement expiry. Clears the trace only when it still
    /// belongs to `message_id` - a late timer must not wipe a newer
    /// decision.
    pub fn clear_decision(&mut self, message_id: &str) -> bool {
        match &self.resolved {
            Some(resolved) if resolved.message_id == message_id => {
                self.resolved = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::create_persistence_channel;
    use crate::session::SessionManager;

    fn sessions() -> SessionManager {
        // No writer in unit tests; cache writes are best-effort and dropped
        let (tx, _rx) = create_persistence_channel();
        SessionManager::new(Default::default(), tx)
    }

    fn execute_tool(tool: &str, args: Option<&str>) -> IssuedCommand {
        IssuedCommand::ExecuteTool {
            tool_name: tool.to_string(),
            arguments: args.map(str::to_string),
        }
    }

    fn replies(effects: &[DispatchEffect]) -> Vec<String> {
        effects
            .iter()
            .filter_map(|e| match e {
                DispatchEffect::Reply(reply) => Some(reply.to_wire()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn trigger_matches_are_case_insensitive_substrings() {
        assert!(matches_job_trigger("scan_network", None));
        assert!(matches_job_trigger("Network_SCAN", None));
        assert!(matches_job_trigger("run_command", Some("deploy the build")));
        assert!(!matches_job_trigger("read_file", Some("/tmp/notes.txt")));
    }

    #[test]
    fn approving_tool_sends_ack_and_spawns_job() {
        let mut sessions = sessions();
        let mut dispatcher = CommandDispatcher::new();

        let effects = dispatcher.surface(
            "msg-1".to_string(),
            execute_tool("scan_network", Some("10.0.0.0/24")),
            &mut sessions,
        );
        assert!(matches!(
            effects.as_slice(),
            [DispatchEffect::Emit(update)]
                if matches!(**update, ConsoleUpdate::CommandSurfaced { .. })
        ));

        let effects = dispatcher.approve("started");
        assert_eq!(replies(&effects), vec!["[TOOL_EXECUTED] scan_network - started"]);
        assert!(effects
            .iter()
            .any(|e| matches!(e, DispatchEffect::SpawnJob { name } if name == "scan_network")));
        assert!(dispatcher.pending().is_none());
        assert_eq!(
            dispatcher.last_decision(),
            Some(("msg-1", Decision::Approved))
        );
    }

    #[test]
    fn approving_non_trigger_tool_spawns_no_job() {
        let mut sessions = sessions();
        let mut dispatcher = CommandDispatcher::new();

        dispatcher.surface(
            "msg-1".to_string(),
            execute_tool("read_file", Some("/etc/hosts")),
            &mut sessions,
        );
        let effects = dispatcher.approve("ok");

        assert!(!effects
            .iter()
            .any(|e| matches!(e, DispatchEffect::SpawnJob { .. })));
    }

    #[test]
    fn denying_config_prompt_sends_denial_and_clears() {
        let mut sessions = sessions();
        let mut dispatcher = CommandDispatcher::new();

        dispatcher.surface(
            "msg-1".to_string(),
            IssuedCommand::PromptForConfig {
                config_key: "llm_provider".to_string(),
            },
            &mut sessions,
        );
        let effects = dispatcher.deny();

        assert_eq!(replies(&effects), vec!["[CONFIG_DENIED] llm_provider"]);
        assert!(!effects
            .iter()
            .any(|e| matches!(e, DispatchEffect::SpawnJob { .. })));
        assert!(dispatcher.pending().is_none());
    }

    #[test]
    fn resolution_without_pending_is_a_noop() {
        let mut dispatcher = CommandDispatcher::new();
        assert!(dispatcher.approve("anything").is_empty());
        assert!(dispatcher.deny().is_empty());
    }

    #[test]
    fn second_command_queues_until_first_resolves() {
        let mut sessions = sessions();
        let mut dispatcher = CommandDispatcher::new();

        dispatcher.surface(
            "msg-1".to_string(),
            execute_tool("read_file", None),
            &mut sessions,
        );
        let effects = dispatcher.surface(
            "msg-2".to_string(),
            IssuedCommand::ShowMemoryPage {
                memory_id: "mem-1".to_string(),
            },
            &mut sessions,
        );

        // Still the first command; the second produced no surfacing yet
        assert!(effects.is_empty());
        assert_eq!(dispatcher.pending().unwrap().message_id, "msg-1");

        let effects = dispatcher.deny();
        // The queued command surfaces as part of resolution
        assert!(effects.iter().any(|e| matches!(
            e,
            DispatchEffect::Emit(update)
                if matches!(&**update, ConsoleUpdate::CommandSurfaced { pending }
                    if pending.message_id == "msg-2")
        )));
        assert_eq!(dispatcher.pending().unwrap().message_id, "msg-2");

        let effects = dispatcher.approve("shown");
        assert_eq!(replies(&effects), vec!["[MEMORY_SHOWN] mem-1"]);
    }

    #[test]
    fn create_project_chat_resolves_silently() {
        let mut sessions = sessions();
        let mut dispatcher = CommandDispatcher::new();

        let effects = dispatcher.surface(
            "msg-1".to_string(),
            IssuedCommand::CreateProjectChat {
                project_name: "Acme".to_string(),
                project_id: None,
            },
            &mut sessions,
        );

        // Never enters the approval state
        assert!(dispatcher.pending().is_none());
        assert!(effects.iter().any(|e| matches!(
            e,
            DispatchEffect::Emit(update)
                if matches!(&**update, ConsoleUpdate::ProjectActivated { project }
                    if project.name == "Acme")
        )));
        assert!(effects
            .iter()
            .any(|e| matches!(e, DispatchEffect::SwitchSession { .. })));
    }

    #[test]
    fn crew_list_resolves_silently() {
        let mut sessions = sessions();
        let mut dispatcher = CommandDispatcher::new();

        let effects = dispatcher.surface(
            "msg-1".to_string(),
            IssuedCommand::CrewList {
                agent_id: Some("twin-7".to_string()),
            },
            &mut sessions,
        );

        assert!(dispatcher.pending().is_none());
        assert!(matches!(
            effects.as_slice(),
            [DispatchEffect::Emit(update)]
                if matches!(**update, ConsoleUpdate::CrewListRequested { .. })
        ));
    }

    #[test]
    fn decision_clear_is_keyed_by_message_id() {
        let mut sessions = sessions();
        let mut dispatcher = CommandDispatcher::new();

        dispatcher.surface(
            "msg-1".to_string(),
            execute_tool("read_file", None),
            &mut sessions,
        );
        dispatcher.approve("ok");

        // A stale timer for some other id leaves the trace alone
        assert!(!dispatcher.clear_decision("msg-0"));
        assert!(dispatcher.last_decision().is_some());

        assert!(dispatcher.clear_decision("msg-1"));
        assert!(dispatcher.last_decision().is_none());

        // Already cleared: the one-shot does not fire twice
        assert!(!dispatcher.clear_decision("msg-1"));
    }
}
