use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::renderer::FetchResult;
use crate::core::sink::IngestOutcome;
use crate::error::AutomationError;

const JOB_RETENTION: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// One asynchronous retrieval job. Status only ever moves forward, and only
/// the job's own background task mutates it.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vehicle_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingest: Option<IngestOutcome>,
}

/// The work a job runs. The orchestrator implements this; tests substitute
/// a stub.
#[async_trait]
pub trait VehicleFetcher: Send + Sync {
    async fn fetch(&self, cancel: CancellationToken) -> Result<FetchResult, AutomationError>;
}

/// In-memory job table plus the background tasks that drive it. Jobs are
/// reaped unconditionally a fixed interval after completion.
pub struct JobManager {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
    fetcher: Arc<dyn VehicleFetcher>,
    retention: Duration,
    shutdown: CancellationToken,
}

impl JobManager {
    pub fn new(fetcher: Arc<dyn VehicleFetcher>, shutdown: CancellationToken) -> Self {
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            fetcher,
            retention: JOB_RETENTION,
            shutdown,
        }
    }

    #[cfg(test)]
    fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Registers a Pending job, spawns its background run, and returns the
    /// id immediately.
    pub async fn create_job(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let job = Job {
            id: id.clone(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            vehicle_count: None,
            ingest: None,
        };
        self.jobs.write().await.insert(id.clone(), job);
        info!(job_id = %id, "Job created");

        let jobs = self.jobs.clone();
        let fetcher = self.fetcher.clone();
        let retention = self.retention;
        let cancel = self.shutdown.child_token();
        let job_id = id.clone();
        tokio::spawn(async move {
            Self::run_job(jobs, fetcher, job_id, retention, cancel).await;
        });
        id
    }

    async fn run_job(
        jobs: Arc<RwLock<HashMap<String, Job>>>,
        fetcher: Arc<dyn VehicleFetcher>,
        job_id: String,
        retention: Duration,
        cancel: CancellationToken,
    ) {
        if let Some(job) = jobs.write().await.get_mut(&job_id) {
            job.status = JobStatus::Running;
        }

        let result = fetcher.fetch(cancel).await;
        let now = Utc::now();
        {
            let mut table = jobs.write().await;
            if let Some(job) = table.get_mut(&job_id) {
                job.completed_at = Some(now);
                match result {
                    Ok(summary) => {
                        job.status = JobStatus::Completed;
                        job.vehicle_count = Some(summary.records.len());
                        job.ingest = Some(summary.ingest);
                        info!(
                            job_id = %job_id,
                            vehicle_count = summary.records.len(),
                            "Job completed"
                        );
                    }
                    Err(e) => {
                        job.status = JobStatus::Failed;
                        job.error = Some(e.to_string());
                        warn!(job_id = %job_id, "Job failed: {}", e);
                    }
                }
            }
        }

        tokio::time::sleep(retention).await;
        jobs.write().await.remove(&job_id);
        debug!(job_id = %job_id, "Job reaped");
    }

    pub async fn get_job(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    pub async fn list_jobs(&self) -> Vec<Job> {
        self.jobs.read().await.values().cloned().collect()
    }
}
