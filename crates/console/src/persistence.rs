//! Persistence layer - batched SQLite writes
//!
//! The local database is a convenience cache, not a source of truth: reads
//! fall back to defaults on malformed or missing data, and writes are
//! best-effort. Uses `spawn_blocking` for async-safe SQLite access and
//! batches writes under event volume.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use rusqlite::{params, Connection};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crewdeck_protocol::Project;

/// Commands that can be persisted
#[derive(Debug, Clone)]
pub enum PersistCommand {
    /// Create or rename a project record
    ProjectUpsert { id: String, name: String },

    /// Mark a project as the active one
    ActiveProjectSet { id: String },

    /// Bind a project to its resumable session
    ProjectSessionSet {
        project_id: String,
        session_id: String,
    },
}

/// Create the channel used to feed the persistence writer
pub fn create_persistence_channel() -> (mpsc::Sender<PersistCommand>, mpsc::Receiver<PersistCommand>)
{
    mpsc::channel(256)
}

/// Persistence writer that batches SQLite writes
pub struct PersistenceWriter {
    rx: mpsc::Receiver<PersistCommand>,
    db_path: PathBuf,
    batch: Vec<PersistCommand>,
    batch_size: usize,
    flush_interval: Duration,
}

impl PersistenceWriter {
    pub fn new(rx: mpsc::Receiver<PersistCommand>, db_path: PathBuf) -> Self {
        Self {
            rx,
            db_path,
            batch: Vec::with_capacity(100),
            batch_size: 50,
            flush_interval: Duration::from_millis(100),
        }
    }

    /// Run the persistence writer (call from tokio::spawn)
    pub async fn run(mut self) {
        debug!(
            component = "persistence",
            event = "persistence.started",
            db = %self.db_path.display(),
        );

        let mut interval = tokio::time::interval(self.flush_interval);

        loop {
            tokio::select! {
                cmd = self.rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            self.batch.push(cmd);
                            if self.batch.len() >= self.batch_size {
                                self.flush().await;
                            }
                        }
                        None => {
                            // Channel closed: final flush, then stop
                            self.flush().await;
                            return;
                        }
                    }
                }

                _ = interval.tick() => {
                    if !self.batch.is_empty() {
                        self.flush().await;
                    }
                }
            }
        }
    }

    /// Flush the batch to SQLite
    async fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        let batch = std::mem::take(&mut self.batch);
        let db_path = self.db_path.clone();

        let result = tokio::task::spawn_blocking(move || flush_batch(&db_path, batch)).await;

        match result {
            Ok(Ok(count)) => {
                debug!(
                    component = "persistence",
                    event = "persistence.flushed",
                    count = count,
                );
            }
            Ok(Err(e)) => {
                error!(
                    component = "persistence",
                    event = "persistence.flush_failed",
                    error = %e,
                );
            }
            Err(e) => {
                error!(
                    component = "persistence",
                    event = "persistence.flush_panicked",
                    error = %e,
                );
            }
        }
    }
}

/// Flush a batch of commands to SQLite (runs in blocking thread)
fn flush_batch(db_path: &PathBuf, batch: Vec<PersistCommand>) -> Result<usize, rusqlite::Error> {
    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;

    ensure_schema(&conn)?;

    let count = batch.len();
    let tx = conn.unchecked_transaction()?;

    for cmd in batch {
        if let Err(e) = execute_command(&tx, cmd) {
            warn!(
                component = "persistence",
                event = "persistence.command_failed",
                error = %e,
            );
            // Continue with other commands
        }
    }

    tx.commit()?;

    Ok(count)
}

fn ensure_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS projects (
           id TEXT PRIMARY KEY,
           name TEXT NOT NULL,
           created_at TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS project_sessions (
           project_id TEXT PRIMARY KEY,
           session_id TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS console_state (
           key TEXT PRIMARY KEY,
           value TEXT NOT NULL
         );",
    )
}

/// Execute a single persist command
fn execute_command(conn: &Connection, cmd: PersistCommand) -> Result<(), rusqlite::Error> {
    match cmd {
        PersistCommand::ProjectUpsert { id, name } => {
            let now = crate::clock::now_iso8601();
            conn.execute(
                "INSERT INTO projects (id, name, created_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET name = ?2",
                params![id, name, now],
            )?;
        }

        PersistCommand::ActiveProjectSet { id } => {
            conn.execute(
                "INSERT INTO console_state (key, value) VALUES ('active_project', ?1)
                 ON CONFLICT(key) DO UPDATE SET value = ?1",
                params![id],
            )?;
        }

        PersistCommand::ProjectSessionSet {
            project_id,
            session_id,
        } => {
            conn.execute(
                "INSERT INTO project_sessions (project_id, session_id) VALUES (?1, ?2)
                 ON CONFLICT(project_id) DO UPDATE SET session_id = ?2",
                params![project_id, session_id],
            )?;
        }
    }

    Ok(())
}

/// State restored from the local cache on startup
#[derive(Debug, Default)]
pub struct PersistedState {
    pub projects: Vec<Project>,
    pub active_project: Option<String>,
    pub project_sessions: HashMap<String, String>,
}

/// Load the cached console state.
///
/// Any failure - missing file, corrupt database, unexpected schema - yields
/// defaults. The cache is never allowed to take the console down.
pub async fn load_state(db_path: PathBuf) -> PersistedState {
    let result = tokio::task::spawn_blocking(move || -> Result<PersistedState, rusqlite::Error> {
        if !db_path.exists() {
            return Ok(PersistedState::default());
        }

        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        ensure_schema(&conn)?;

        let mut state = PersistedState::default();

        let mut stmt = conn.prepare("SELECT id, name FROM projects ORDER BY created_at")?;
        let rows = stmt.query_map([], |row| {
            Ok(Project {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?;
        for row in rows.flatten() {
            state.projects.push(row);
        }

        let mut stmt = conn.prepare("SELECT project_id, session_id FROM project_sessions")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for (project_id, session_id) in rows.flatten() {
            state.project_sessions.insert(project_id, session_id);
        }

        let mut stmt =
            conn.prepare("SELECT value FROM console_state WHERE key = 'active_project'")?;
        let mut rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        if let Some(Ok(active)) = rows.next() {
            state.active_project = Some(active);
        }

        Ok(state)
    })
    .await;

    match result {
        Ok(Ok(state)) => state,
        Ok(Err(e)) => {
            warn!(
                component = "persistence",
                event = "persistence.load_failed",
                error = %e,
                "Falling back to default state"
            );
            PersistedState::default()
        }
        Err(e) => {
            warn!(
                component = "persistence",
                event = "persistence.load_panicked",
                error = %e,
                "Falling back to default state"
            );
            PersistedState::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("crewdeck.db");
        (dir, path)
    }

    #[tokio::test]
    async fn writes_roundtrip_through_load_state() {
        let (_dir, db_path) = temp_db();

        let batch = vec![
            PersistCommand::ProjectUpsert {
                id: "proj-1".to_string(),
                name: "Acme".to_string(),
            },
            PersistCommand::ActiveProjectSet {
                id: "proj-1".to_string(),
            },
            PersistCommand::ProjectSessionSet {
                project_id: "proj-1".to_string(),
                session_id: "sess-1".to_string(),
            },
        ];
        flush_batch(&db_path, batch).expect("flush");

        let state = load_state(db_path).await;
        assert_eq!(state.projects.len(), 1);
        assert_eq!(state.projects[0].name, "Acme");
        assert_eq!(state.active_project.as_deref(), Some("proj-1"));
        assert_eq!(
            state.project_sessions.get("proj-1").map(String::as_str),
            Some("sess-1")
        );
    }

    #[tokio::test]
    async fn upsert_replaces_project_name_and_session() {
        let (_dir, db_path) = temp_db();

        flush_batch(
            &db_path,
            vec![
                PersistCommand::ProjectUpsert {
                    id: "proj-1".to_string(),
                    name: "Old".to_string(),
                },
                PersistCommand::ProjectSessionSet {
                    project_id: "proj-1".to_string(),
                    session_id: "sess-1".to_string(),
                },
            ],
        )
        .expect("first flush");

        flush_batch(
            &db_path,
            vec![
                PersistCommand::ProjectUpsert {
                    id: "proj-1".to_string(),
                    name: "New".to_string(),
                },
                PersistCommand::ProjectSessionSet {
                    project_id: "proj-1".to_string(),
                    session_id: "sess-2".to_string(),
                },
            ],
        )
        .expect("second flush");

        let state = load_state(db_path).await;
        assert_eq!(state.projects.len(), 1);
        assert_eq!(state.projects[0].name, "New");
        assert_eq!(
            state.project_sessions.get("proj-1").map(String::as_str),
            Some("sess-2")
        );
    }

    #[tokio::test]
    async fn missing_database_yields_defaults() {
        let (_dir, db_path) = temp_db();
        let state = load_state(db_path).await;
        assert!(state.projects.is_empty());
        assert!(state.active_project.is_none());
        assert!(state.project_sessions.is_empty());
    }

    #[tokio::test]
    async fn corrupt_database_yields_defaults() {
        let (_dir, db_path) = temp_db();
        std::fs::write(&db_path, b"this is not a sqlite file").expect("write garbage");

        let state = load_state(db_path).await;
        assert!(state.projects.is_empty());
        assert!(state.active_project.is_none());
    }
}
