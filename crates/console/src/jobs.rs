//! Job lifecycle tracking
//!
//! One state machine per job: `Pending → Active → {Completed | Failed}`.
//! Jobs are not session-scoped and share no mutable state with each other.
//! All mutation funnels through the tracker's single updater, keyed by job
//! id, so overlapping asynchronous completions cannot lose writes. Runners
//! report back over a channel into the console's single-consumer loop.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crewdeck_protocol::{new_id, ConsoleUpdate, Job, JobStatus, LogEntry, LogLevel};

/// Progress reported by a job runner
#[derive(Debug, Clone)]
pub enum JobReport {
    Started {
        job_id: String,
    },
    Progress {
        job_id: String,
        progress: u8,
        note: Option<String>,
    },
    Completed {
        job_id: String,
    },
    Failed {
        job_id: String,
        reason: String,
    },
}

/// Registry of background jobs, keyed by id.
#[derive(Debug, Default)]
pub struct JobTracker {
    jobs: HashMap<String, Job>,
    order: Vec<String>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs in creation order, for snapshots.
    pub fn jobs(&self) -> Vec<Job> {
        self.order
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .cloned()
            .collect()
    }

    #[allow(dead_code)]
    pub fn get(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// Create a job in `Pending` with its two seeded log entries.
    pub fn create(&mut self, agent_id: &str, name: &str, now: &str) -> Job {
        let job = Job {
            id: new_id(),
            agent_id: agent_id.to_string(),
            name: name.to_string(),
            status: JobStatus::Pending,
            progress: 0,
            logs: vec![
                log_entry(now, LogLevel::Info, format!("Command received: {}", name)),
                log_entry(now, LogLevel::Plan, format!("Routing to agent {}", agent_id)),
            ],
            started_at: now.to_string(),
        };

        self.order.push(job.id.clone());
        self.jobs.insert(job.id.clone(), job.clone());
        job
    }

    /// The single centralized mutator. Every change to a job record goes
    /// through here; returns the updated job, or None for unknown ids.
    fn update<F>(&mut self, id: &str, f: F) -> Option<Job>
    where
        F: FnOnce(&mut Job),
    {
        let job = self.jobs.get_mut(id)?;
        f(job);
        Some(job.clone())
    }

    /// Fold one runner report into the registry.
    ///
    /// Returns updates for subscribed views, plus the finished job when the
    /// report completed it (the caller derives the transcript summary).
    pub fn apply_report(&mut self, report: JobReport, now: &str) -> (Vec<ConsoleUpdate>, Option<Job>) {
        let mut updates: Vec<ConsoleUpdate> = Vec::new();

        let job_id = match &report {
            JobReport::Started { job_id }
            | JobReport::Progress { job_id, .. }
            | JobReport::Completed { job_id }
            | JobReport::Failed { job_id, .. } => job_id.clone(),
        };

        let Some(current) = self.jobs.get(&job_id) else {
            warn!(
                component = "jobs",
                event = "jobs.report.unknown_id",
                job_id = %job_id,
            );
            return (updates, None);
        };

        if current.status.is_terminal() {
            debug!(
                component = "jobs",
                event = "jobs.report.after_terminal",
                job_id = %job_id,
            );
            return (updates, None);
        }

        let mut completed = None;
        let mut logged = true;

        let updated = match report {
            JobReport::Started { .. } => self.update(&job_id, |job| {
                job.status = JobStatus::Active;
                job.logs.push(log_entry(
                    now,
                    LogLevel::Info,
                    "Execution started".to_string(),
                ));
            }),

            JobReport::Progress { progress, note, .. } => {
                logged = note.is_some();
                self.update(&job_id, |job| {
                    job.progress = progress.min(100);
                    if let Some(note) = note {
                        job.logs.push(log_entry(now, LogLevel::Tool, note));
                    }
                })
            }

            JobReport::Completed { .. } => self.update(&job_id, |job| {
                job.status = JobStatus::Completed;
                job.progress = 100;
                job.logs
                    .push(log_entry(now, LogLevel::Info, "Job completed".to_string()));
            }),

            JobReport::Failed { reason, .. } => self.update(&job_id, |job| {
                job.status = JobStatus::Failed;
                job.logs.push(log_entry(now, LogLevel::Error, reason));
            }),
        };

        if let Some(job) = updated {
            if logged {
                if let Some(entry) = job.logs.last() {
                    updates.push(ConsoleUpdate::JobLogAppended {
                        job_id: job.id.clone(),
                        entry: entry.clone(),
                    });
                }
            }
            updates.push(job_delta(&job));
            if job.status == JobStatus::Completed {
                completed = Some(job);
            }
        }

        (updates, completed)
    }
}

fn job_delta(job: &Job) -> ConsoleUpdate {
    ConsoleUpdate::JobUpdated {
        job_id: job.id.clone(),
        status: job.status,
        progress: job.progress,
    }
}

fn log_entry(now: &str, level: LogLevel, message: String) -> LogEntry {
    LogEntry {
        id: new_id(),
        timestamp: now.to_string(),
        level,
        message,
    }
}

/// Stand-in for the external tool execution: walks a job through a fixed
/// progression and reports back over the console channel.
pub fn spawn_runner(job_id: String, report_tx: mpsc::Sender<JobReport>) {
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        if report_tx
            .send(JobReport::Started {
                job_id: job_id.clone(),
            })
            .await
            .is_err()
        {
            return;
        }

        for (progress, note) in [
            (30, "Dispatching to worker crew"),
            (60, "Tool execution in progress"),
            (90, "Collecting results"),
        ] {
            tokio::time::sleep(Duration::from_millis(200)).await;
            if report_tx
                .send(JobReport::Progress {
                    job_id: job_id.clone(),
                    progress,
                    note: Some(note.to_string()),
                })
                .await
                .is_err()
            {
                return;
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = report_tx.send(JobReport::Completed { job_id }).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: &str = "2026-01-01T00:00:00Z";

    #[test]
    fn create_seeds_pending_job_with_two_log_entries() {
        let mut tracker = JobTracker::new();
        let job = tracker.create("twin-1", "scan_network", NOW);

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(job.logs.len(), 2);
        assert!(job.logs[0].message.contains("scan_network"));
        assert!(job.logs[1].message.contains("twin-1"));
    }

    #[test]
    fn reports_walk_the_lifecycle() {
        let mut tracker = JobTracker::new();
        let job = tracker.create("twin-1", "scan_network", NOW);

        let (updates, completed) = tracker.apply_report(
            JobReport::Started {
                job_id: job.id.clone(),
            },
            NOW,
        );
        assert!(completed.is_none());
        assert!(!updates.is_empty());
        assert_eq!(tracker.get(&job.id).unwrap().status, JobStatus::Active);

        let (_, completed) = tracker.apply_report(
            JobReport::Progress {
                job_id: job.id.clone(),
                progress: 60,
                note: Some("halfway".to_string()),
            },
            NOW,
        );
        assert!(completed.is_none());
        assert_eq!(tracker.get(&job.id).unwrap().progress, 60);

        let (_, completed) = tracker.apply_report(
            JobReport::Completed {
                job_id: job.id.clone(),
            },
            NOW,
        );
        let finished = completed.expect("completion returns the job");
        assert_eq!(finished.status, JobStatus::Completed);
        assert_eq!(finished.progress, 100);
    }

    #[test]
    fn reports_after_terminal_state_are_ignored() {
        let mut tracker = JobTracker::new();
        let job = tracker.create("twin-1", "deploy_service", NOW);

        tracker.apply_report(
            JobReport::Failed {
                job_id: job.id.clone(),
                reason: "worker unreachable".to_string(),
            },
            NOW,
        );
        assert_eq!(tracker.get(&job.id).unwrap().status, JobStatus::Failed);

        // A late completion from an overlapping runner must not resurrect it
        let (updates, completed) = tracker.apply_report(
            JobReport::Completed {
                job_id: job.id.clone(),
            },
            NOW,
        );
        assert!(updates.is_empty());
        assert!(completed.is_none());
        assert_eq!(tracker.get(&job.id).unwrap().status, JobStatus::Failed);
    }

    #[test]
    fn failure_appends_error_log_entry() {
        let mut tracker = JobTracker::new();
        let job = tracker.create("twin-1", "backup_volume", NOW);

        tracker.apply_report(
            JobReport::Failed {
                job_id: job.id.clone(),
                reason: "disk full".to_string(),
            },
            NOW,
        );

        let job = tracker.get(&job.id).unwrap();
        let last = job.logs.last().unwrap();
        assert_eq!(last.level, LogLevel::Error);
        assert_eq!(last.message, "disk full");
    }

    #[test]
    fn unknown_job_id_is_tolerated() {
        let mut tracker = JobTracker::new();
        let (updates, completed) = tracker.apply_report(
            JobReport::Completed {
                job_id: "nope".to_string(),
            },
            NOW,
        );
        assert!(updates.is_empty());
        assert!(completed.is_none());
    }

    #[test]
    fn concurrent_jobs_do_not_share_state() {
        let mut tracker = JobTracker::new();
        let a = tracker.create("twin-1", "scan_network", NOW);
        let b = tracker.create("twin-2", "audit_access", NOW);

        tracker.apply_report(
            JobReport::Completed {
                job_id: a.id.clone(),
            },
            NOW,
        );

        assert_eq!(tracker.get(&a.id).unwrap().status, JobStatus::Completed);
        assert_eq!(tracker.get(&b.id).unwrap().status, JobStatus::Pending);
        assert_eq!(tracker.jobs().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn runner_reports_through_to_completion() {
        let mut tracker = JobTracker::new();
        let job = tracker.create("twin-1", "scan_network", NOW);

        let (tx, mut rx) = mpsc::channel(16);
        spawn_runner(job.id.clone(), tx);

        let mut saw_completed = false;
        while let Some(report) = rx.recv().await {
            let (_, completed) = tracker.apply_report(report, NOW);
            if completed.is_some() {
                saw_completed = true;
                break;
            }
        }

        assert!(saw_completed);
        assert_eq!(tracker.get(&job.id).unwrap().status, JobStatus::Completed);
    }
}
