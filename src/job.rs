use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use std::panic::AssertUnwindSafe;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::SqlStore;
use crate::error::{GitOpsError, Result};

/// Maximum size for job output before truncation (64KB)
pub const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Represents the status of a background job
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "queued" => JobStatus::Queued,
            "running" => JobStatus::Running,
            "success" => JobStatus::Success,
            _ => JobStatus::Failed,
        }
    }
}

/// A deferred piece of webhook work, such as creating a release after a merge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: String,
    pub project_id: String,
    pub pr_url: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub output_truncated: bool,
    pub error: Option<String>,
}

impl Job {
    pub fn new_release(project_id: String, pr_url: String) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            kind: "release".to_string(),
            project_id,
            pr_url,
            status: JobStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            output: None,
            output_truncated: false,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark job as successful with output (truncates if too large)
    pub fn mark_success(&mut self, mut output: String) {
        self.status = JobStatus::Success;
        self.completed_at = Some(Utc::now());

        if output.len() > MAX_OUTPUT_SIZE {
            let mut cut = MAX_OUTPUT_SIZE;
            while !output.is_char_boundary(cut) {
                cut -= 1;
            }
            output.truncate(cut);
            output.push_str("\n... (output truncated)");
            self.output_truncated = true;
        }

        self.output = Some(output);
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn duration_ms(&self) -> Option<i64> {
        Some((self.completed_at? - self.started_at?).num_milliseconds())
    }
}

pub type JobTask = BoxFuture<'static, Result<String>>;

struct QueuedJob {
    job: Job,
    task: JobTask,
}

/// Bounded queue of background jobs, executed by at most `workers` tasks at once.
///
/// Every job is recorded in the store before it is accepted, so its outcome can be
/// inspected through the jobs API after the webhook request has returned.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::Sender<QueuedJob>,
    store: SqlStore,
}

impl JobQueue {
    /// Spawns the dispatcher loop. Must be called inside a tokio runtime.
    pub fn start(store: SqlStore, workers: usize, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<QueuedJob>(capacity.max(1));
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let worker_store = store.clone();

        tokio::spawn(async move {
            info!("Job queue started with {} workers", workers.max(1));
            while let Some(queued) = receiver.recv().await {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let store = worker_store.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    run_job(store, queued).await;
                });
            }
            info!("Job queue stopped");
        });

        Self { sender, store }
    }

    /// Records `job` and schedules `task`. Returns the job id.
    pub async fn submit(&self, job: Job, task: JobTask) -> Result<String> {
        self.store.create_job(&job).await?;
        let id = job.id.clone();

        if let Err(e) = self.sender.try_send(QueuedJob { job, task }) {
            let (reason, queued) = match e {
                mpsc::error::TrySendError::Full(queued) => ("job queue is full", queued),
                mpsc::error::TrySendError::Closed(queued) => ("job queue is closed", queued),
            };
            let mut rejected = queued.job;
            rejected.mark_failed(reason.to_string());
            if let Err(e) = self.store.complete_job(&rejected).await {
                warn!(job = %id, "Failed to record rejected job: {}", e);
            }
            return Err(GitOpsError::ServiceError(reason.to_string()));
        }

        info!(job = %id, "Job queued");
        Ok(id)
    }

    pub fn store(&self) -> &SqlStore {
        &self.store
    }
}

async fn run_job(store: SqlStore, queued: QueuedJob) {
    let QueuedJob { mut job, task } = queued;

    job.mark_running();
    if let Err(e) = store.update_job_status(&job.id, job.status).await {
        warn!(job = %job.id, "Failed to mark job running: {}", e);
    }

    match AssertUnwindSafe(task).catch_unwind().await {
        Ok(Ok(output)) => {
            info!(job = %job.id, pr = %job.pr_url, "{}", output);
            job.mark_success(output);
        }
        Ok(Err(e)) => {
            error!(job = %job.id, pr = %job.pr_url, "Job failed: {}", e);
            job.mark_failed(e.to_string());
        }
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            error!(job = %job.id, pr = %job.pr_url, "Job panicked: {}", reason);
            job.mark_failed(format!("job panicked: {}", reason));
        }
    }

    if let Err(e) = store.complete_job(&job).await {
        error!(job = %job.id, "Failed to record job result: {}", e);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_large_output() {
        let mut job = Job::new_release("hr".into(), "https://host/pr/1".into());
        job.mark_running();
        job.mark_success("é".repeat(MAX_OUTPUT_SIZE));
        assert!(job.output_truncated);
        assert!(job.output.as_deref().unwrap().ends_with("(output truncated)"));
        assert!(job.duration_ms().is_some());
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Success,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), status);
        }
        assert_eq!(JobStatus::parse("bogus"), JobStatus::Failed);
    }

    #[tokio::test]
    async fn runs_submitted_jobs_and_records_outcome() {
        let store = SqlStore::new(crate::db::init_memory_db().await.unwrap());
        let queue = JobQueue::start(store.clone(), 1, 4);

        let ok = queue
            .submit(
                Job::new_release("hr".into(), "pr/1".into()),
                Box::pin(async { Ok::<_, GitOpsError>("created release".to_string()) }),
            )
            .await
            .unwrap();
        let failed = queue
            .submit(
                Job::new_release("hr".into(), "pr/2".into()),
                Box::pin(async { Err::<String, _>(GitOpsError::ServiceError("boom".into())) }),
            )
            .await
            .unwrap();

        let mut done = false;
        for _ in 0..50 {
            let a = store.get_job(&ok).await.unwrap().unwrap();
            let b = store.get_job(&failed).await.unwrap().unwrap();
            if a.status == JobStatus::Success && b.status == JobStatus::Failed {
                assert_eq!(a.output.as_deref(), Some("created release"));
                assert!(b.error.unwrap().contains("boom"));
                done = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(done, "jobs did not finish");
    }

    async fn exploding_release() -> Result<String> {
        panic!("release exploded")
    }

    #[tokio::test]
    async fn panicking_job_is_recorded_as_failed() {
        let store = SqlStore::new(crate::db::init_memory_db().await.unwrap());
        let queue = JobQueue::start(store.clone(), 1, 4);

        let id = queue
            .submit(
                Job::new_release("hr".into(), "pr/3".into()),
                Box::pin(exploding_release()),
            )
            .await
            .unwrap();

        let mut job = store.get_job(&id).await.unwrap().unwrap();
        for _ in 0..50 {
            if job.status == JobStatus::Failed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            job = store.get_job(&id).await.unwrap().unwrap();
        }
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("job panicked: release exploded"));
        assert!(job.completed_at.is_some());

        let next = queue
            .submit(
                Job::new_release("hr".into(), "pr/4".into()),
                Box::pin(async { Ok::<_, GitOpsError>("still running".to_string()) }),
            )
            .await
            .unwrap();
        for _ in 0..50 {
            if store.get_job(&next).await.unwrap().unwrap().status == JobStatus::Success {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("queue stopped after a panicking job");
    }
}
