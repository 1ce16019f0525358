//! Service facade exposed to the transport layer.
//!
//! Submission, status, cancellation, listings, and the health signal live
//! here; the HTTP surface itself is an external collaborator.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::{QueueConfig, RetryConfig};
use crate::detector::Detector;
use crate::error::{Result, ScanGateError};
use crate::job::{
    InfectedReport, Job, JobId, JobStage, JobStatus, NewJob, ScanResultRecord,
};
use crate::queue::{DispatchQueue, EnqueueOptions, QueueStats};
use crate::storage::FileStorage;
use crate::store::JobStore;

/// Submission input from the upload boundary. The file itself is already
/// persisted by the storage layer; this carries its coordinates.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub original_name: String,
    pub stored_ref: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub checksum: Option<String>,
    pub priority: Option<i64>,
}

/// Point-in-time view of a job for status queries.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobStatusReport {
    pub job: Job,
    pub stage: JobStage,
    /// Entries ahead in the queue; present only while pending, and only
    /// best-effort under concurrent mutation.
    pub queue_position: Option<u64>,
    pub result: Option<ScanResultRecord>,
}

/// Component reachability snapshot. The pipeline is healthy when store
/// and queue respond; detector reachability is reported but not required.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Health {
    pub store: bool,
    pub queue: bool,
    pub detector: bool,
    pub healthy: bool,
}

/// Facade wiring the store, queue, storage, and detector together.
pub struct ScanService {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn DispatchQueue>,
    storage: Arc<dyn FileStorage>,
    detector: Arc<dyn Detector>,
    queue_config: QueueConfig,
    retry_config: RetryConfig,
}

impl std::fmt::Debug for ScanService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanService")
            .field("queue_config", &self.queue_config)
            .field("retry_config", &self.retry_config)
            .finish()
    }
}

impl ScanService {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn DispatchQueue>,
        storage: Arc<dyn FileStorage>,
        detector: Arc<dyn Detector>,
        queue_config: QueueConfig,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            store,
            queue,
            storage,
            detector,
            queue_config,
            retry_config,
        }
    }

    /// Create a job and hand it to the queue as one logical operation.
    /// When the queue refuses the entry the job is marked failed rather
    /// than left observable as an orphaned `pending` row.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Job> {
        let priority = request
            .priority
            .unwrap_or_else(|| i64::from(self.queue_config.default_priority));

        let job = self
            .store
            .create_job(NewJob {
                original_name: request.original_name,
                stored_ref: request.stored_ref,
                size_bytes: request.size_bytes,
                content_type: request.content_type,
                checksum: request.checksum,
                priority,
                max_attempts: self.retry_config.max_attempts,
            })
            .await?;

        let options = EnqueueOptions {
            priority,
            delay: None,
        };
        match self.queue.enqueue(job.id, &job.stored_ref, options).await {
            Ok(entry_id) => {
                info!(job = %job.id, entry = %entry_id, "job submitted");
                Ok(job)
            }
            Err(err) => {
                warn!(job = %job.id, error = %err, "enqueue failed, rolling job back");
                if let Err(rollback_err) = self
                    .store
                    .transition(
                        job.id,
                        JobStatus::Failed,
                        Some(format!("enqueue failed: {err}")),
                    )
                    .await
                {
                    warn!(job = %job.id, error = %rollback_err, "rollback transition failed");
                }
                Err(err)
            }
        }
    }

    /// Latest known state of a job, including its result once completed.
    pub async fn status(&self, job_id: JobId) -> Result<JobStatusReport> {
        let job = self.store.job(job_id).await?;
        let stage = JobStage::from(job.status);

        let queue_position = if job.status == JobStatus::Pending {
            self.queue.position(job_id).await.unwrap_or_default()
        } else {
            None
        };

        let result = if job.status == JobStatus::Completed {
            self.store.scan_result(job_id).await?
        } else {
            None
        };

        Ok(JobStatusReport {
            job,
            stage,
            queue_position,
            result,
        })
    }

    /// Cancel a pending or in-flight job. Pending entries are removed
    /// from the queue; an in-flight scan is not interrupted, but the
    /// fenced terminal transition discards its result.
    pub async fn cancel(&self, job_id: JobId) -> Result<Job> {
        let job = self.store.job(job_id).await?;
        match job.status {
            JobStatus::Pending => {
                let cancelled = self
                    .store
                    .transition(job_id, JobStatus::Cancelled, None)
                    .await?;
                if self.queue.cancel_entry(job_id).await? {
                    info!(job = %job_id, "queued entry removed on cancel");
                }
                Ok(cancelled)
            }
            JobStatus::Processing => {
                let cancelled = self
                    .store
                    .transition(job_id, JobStatus::Cancelled, None)
                    .await?;
                info!(job = %job_id, "in-flight job cancelled, scan result will be discarded");
                Ok(cancelled)
            }
            from => Err(ScanGateError::InvalidTransition {
                from,
                to: JobStatus::Cancelled,
            }),
        }
    }

    pub async fn list_infected(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<(Vec<InfectedReport>, u64)> {
        self.store.list_infected(page, page_size).await
    }

    pub async fn queue_stats(&self) -> Result<QueueStats> {
        self.queue.stats().await
    }

    pub async fn health(&self) -> Health {
        let store = self.store.ping().await;
        let queue = self.queue.ping().await;
        let detector = self.detector.ping().await;
        Health {
            store,
            queue,
            detector,
            healthy: store && queue,
        }
    }

    /// Storage handle for boundary callers that persist uploads before
    /// submitting them.
    pub fn storage(&self) -> Arc<dyn FileStorage> {
        Arc::clone(&self.storage)
    }
}
