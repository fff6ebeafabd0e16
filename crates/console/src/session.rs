//! Session management
//!
//! Owns the active session id, the handled-command index, and the project
//! directory with its persisted project→session map. Cache writes go
//! through the persistence channel best-effort; a full or closed channel
//! loses the write, never the in-memory state.

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crewdeck_protocol::{new_id, Project};

use crate::persistence::{PersistCommand, PersistedState};

/// Set of message ids whose embedded command has already been surfaced.
///
/// Exists so re-scanning an overlapping event batch cannot re-show a
/// command the operator already saw. Exposed only as an idempotent
/// check-and-set.
#[derive(Debug, Default)]
pub struct HandledCommandIndex {
    seen: HashSet<String>,
}

impl HandledCommandIndex {
    /// Returns true only the first time an id is marked.
    pub fn mark_handled(&mut self, message_id: &str) -> bool {
        self.seen.insert(message_id.to_string())
    }

    pub fn reset(&mut self) {
        self.seen.clear();
    }
}

/// Outcome of resolving a `create_project_chat` command
#[derive(Debug)]
pub struct ProjectChatResolution {
    pub project: Project,
    pub session_id: String,
    pub created_project: bool,
    pub created_session: bool,
}

/// Owns session identity and the project directory.
pub struct SessionManager {
    active_session: String,
    handled: HandledCommandIndex,
    projects: Vec<Project>,
    active_project: Option<String>,
    project_sessions: HashMap<String, String>,
    persist_tx: mpsc::Sender<PersistCommand>,
}

impl SessionManager {
    /// Build from cached state. Resumes the active project's session when a
    /// mapping exists; otherwise starts a fresh session.
    pub fn new(persisted: PersistedState, persist_tx: mpsc::Sender<PersistCommand>) -> Self {
        let active_session = persisted
            .active_project
            .as_ref()
            .and_then(|p| persisted.project_sessions.get(p))
            .cloned()
            .unwrap_or_else(new_id);

        Self {
            active_session,
            handled: HandledCommandIndex::default(),
            projects: persisted.projects,
            active_project: persisted.active_project,
            project_sessions: persisted.project_sessions,
            persist_tx,
        }
    }

    pub fn active_session(&self) -> &str {
        &self.active_session
    }

    pub fn active_project(&self) -> Option<&Project> {
        let id = self.active_project.as_deref()?;
        self.projects.iter().find(|p| p.id == id)
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    /// Idempotent check-and-set on the handled-command index.
    pub fn mark_handled(&mut self, message_id: &str) -> bool {
        self.handled.mark_handled(message_id)
    }

    /// Make `session_id` the active session and reset the handled-command
    /// index. The caller resets reconciler state in the same turn of the
    /// event loop, so the pair is atomic as far as any observer can tell.
    /// Job state is not session-scoped and is left alone.
    pub fn switch(&mut self, session_id: String) {
        debug!(
            component = "session",
            event = "session.switched",
            from = %self.active_session,
            to = %session_id,
        );
        self.active_session = session_id;
        self.handled.reset();
    }

    /// Resolve a `create_project_chat` command: look up-or-create the
    /// project (by id hint, then case-insensitive name), make it active,
    /// and obtain-or-create its session.
    pub fn resolve_project_chat(
        &mut self,
        project_name: &str,
        project_id: Option<&str>,
    ) -> ProjectChatResolution {
        let existing = self
            .projects
            .iter()
            .find(|p| {
                project_id.is_some_and(|id| p.id == id)
                    || p.name.eq_ignore_ascii_case(project_name)
            })
            .cloned();

        let (project, created_project) = match existing {
            Some(p) => (p, false),
            None => {
                let project = Project {
                    id: project_id.map(str::to_string).unwrap_or_else(new_id),
                    name: project_name.to_string(),
                };
                self.projects.push(project.clone());
                self.persist(PersistCommand::ProjectUpsert {
                    id: project.id.clone(),
                    name: project.name.clone(),
                });
                (project, true)
            }
        };

        self.active_project = Some(project.id.clone());
        self.persist(PersistCommand::ActiveProjectSet {
            id: project.id.clone(),
        });

        let (session_id, created_session) = self.session_for_project(&project.id);

        ProjectChatResolution {
            project,
            session_id,
            created_project,
            created_session,
        }
    }

    /// Operator-side project selection: activate an existing project and
    /// return it with its (resumed or new) session id. None for unknown ids.
    pub fn activate_project(&mut self, project_id: &str) -> Option<(Project, String)> {
        let project = self.projects.iter().find(|p| p.id == project_id)?.clone();

        self.active_project = Some(project.id.clone());
        self.persist(PersistCommand::ActiveProjectSet {
            id: project.id.clone(),
        });

        let (session_id, _) = self.session_for_project(&project.id);
        Some((project, session_id))
    }

    /// Look up the session bound to a project, creating one as fallback.
    fn session_for_project(&mut self, project_id: &str) -> (String, bool) {
        if let Some(session_id) = self.project_sessions.get(project_id) {
            return (session_id.clone(), false);
        }

        let session_id = new_id();
        self.project_sessions
            .insert(project_id.to_string(), session_id.clone());
        self.persist(PersistCommand::ProjectSessionSet {
            project_id: project_id.to_string(),
            session_id: session_id.clone(),
        });
        (session_id, true)
    }

    /// Best-effort cache write; failures are logged and swallowed.
    fn persist(&self, cmd: PersistCommand) {
        if self.persist_tx.try_send(cmd).is_err() {
            warn!(
                component = "session",
                event = "session.persist.dropped",
                "Persistence channel full or closed, cache write dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::create_persistence_channel;

    fn manager() -> (SessionManager, mpsc::Receiver<PersistCommand>) {
        let (tx, rx) = create_persistence_channel();
        (SessionManager::new(PersistedState::default(), tx), rx)
    }

    #[test]
    fn mark_handled_is_idempotent_check_and_set() {
        let (mut sessions, _rx) = manager();
        assert!(sessions.mark_handled("msg-1"));
        assert!(!sessions.mark_handled("msg-1"));
        assert!(sessions.mark_handled("msg-2"));
    }

    #[test]
    fn switch_resets_handled_index() {
        let (mut sessions, _rx) = manager();
        assert!(sessions.mark_handled("msg-1"));

        sessions.switch("sess-b".to_string());

        assert_eq!(sessions.active_session(), "sess-b");
        // The same message id can surface again in the new session
        assert!(sessions.mark_handled("msg-1"));
    }

    #[test]
    fn resolve_creates_project_and_session() {
        let (mut sessions, mut rx) = manager();

        let resolution = sessions.resolve_project_chat("Acme", None);
        assert!(resolution.created_project);
        assert!(resolution.created_session);
        assert_eq!(resolution.project.name, "Acme");
        assert_eq!(
            sessions.active_project().map(|p| p.name.as_str()),
            Some("Acme")
        );

        // ProjectUpsert, ActiveProjectSet, ProjectSessionSet
        let mut kinds = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            kinds.push(match cmd {
                PersistCommand::ProjectUpsert { .. } => "upsert",
                PersistCommand::ActiveProjectSet { .. } => "active",
                PersistCommand::ProjectSessionSet { .. } => "session",
            });
        }
        assert_eq!(kinds, vec!["upsert", "active", "session"]);
    }

    #[test]
    fn resolve_matches_name_case_insensitively_and_resumes_session() {
        let (mut sessions, _rx) = manager();

        let first = sessions.resolve_project_chat("Acme", None);
        let second = sessions.resolve_project_chat("acme", None);

        assert!(!second.created_project);
        assert!(!second.created_session);
        assert_eq!(first.project.id, second.project.id);
        assert_eq!(first.session_id, second.session_id);
    }

    #[test]
    fn resolve_prefers_explicit_id_hint() {
        let (mut sessions, _rx) = manager();

        let first = sessions.resolve_project_chat("Acme", Some("proj-77"));
        assert_eq!(first.project.id, "proj-77");

        // Same id, different display name: still the same project
        let second = sessions.resolve_project_chat("Acme Corp", Some("proj-77"));
        assert!(!second.created_project);
        assert_eq!(second.project.id, "proj-77");
    }

    #[test]
    fn activate_project_resumes_mapped_session() {
        let (tx, _rx) = create_persistence_channel();
        let mut persisted = PersistedState::default();
        persisted.projects.push(Project {
            id: "proj-1".to_string(),
            name: "Acme".to_string(),
        });
        persisted
            .project_sessions
            .insert("proj-1".to_string(), "sess-1".to_string());

        let mut sessions = SessionManager::new(persisted, tx);
        let (project, session_id) = sessions.activate_project("proj-1").expect("known project");
        assert_eq!(project.name, "Acme");
        assert_eq!(session_id, "sess-1");

        assert!(sessions.activate_project("nope").is_none());
    }

    #[test]
    fn startup_resumes_active_project_session() {
        let (tx, _rx) = create_persistence_channel();
        let mut persisted = PersistedState::default();
        persisted.projects.push(Project {
            id: "proj-1".to_string(),
            name: "Acme".to_string(),
        });
        persisted.active_project = Some("proj-1".to_string());
        persisted
            .project_sessions
            .insert("proj-1".to_string(), "sess-1".to_string());

        let sessions = SessionManager::new(persisted, tx);
        assert_eq!(sessions.active_session(), "sess-1");
    }

    #[test]
    fn persist_failures_are_swallowed() {
        let (tx, rx) = create_persistence_channel();
        drop(rx);
        let mut sessions = SessionManager::new(PersistedState::default(), tx);

        // Channel closed: resolution still succeeds in memory
        let resolution = sessions.resolve_project_chat("Acme", None);
        assert!(resolution.created_project);
    }
}
