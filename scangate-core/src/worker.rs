//! Worker pool: bounded executors pulling from the dispatch queue.
//!
//! Each worker loops lease -> load -> scan -> settle. Attempt outcomes
//! are explicit values inspected by the loop; the queue's redelivery
//! decision is made from the outcome kind, never from an unwound panic
//! or error crossing the task boundary.

use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{LeaseConfig, WorkerConfig};
use crate::detector::{Detector, Inspection};
use crate::error::ScanGateError;
use crate::job::{JobStatus, ScanOutcome, ScanVerdict, ThreatReport};
use crate::queue::{DispatchQueue, QueueLease};
use crate::storage::FileStorage;
use crate::store::JobStore;

/// Outcome of one delivery attempt, reported back to the queue.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WorkAttempt {
    /// Entry is consumed: scan settled, or the job no longer wants one.
    Settled,
    /// Failed in a way redelivery can fix; queue backoff governs when.
    Retry { error: String },
    /// Failed terminally; the entry moves to the dead set.
    Discard { error: Option<String> },
}

impl WorkAttempt {
    /// Infrastructure and content failures consume an attempt and go back
    /// through the queue; bad references and illegal transitions do not.
    fn from_error(err: &ScanGateError) -> WorkAttempt {
        match err {
            ScanGateError::Validation(_)
            | ScanGateError::NotFound(_)
            | ScanGateError::InvalidTransition { .. } => WorkAttempt::Discard {
                error: Some(err.to_string()),
            },
            _ => WorkAttempt::Retry {
                error: err.to_string(),
            },
        }
    }
}

struct WorkerContext {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn DispatchQueue>,
    storage: Arc<dyn FileStorage>,
    detector: Arc<dyn Detector>,
    lease_config: LeaseConfig,
}

/// Fixed-size pool of scan executors plus a lease housekeeper.
pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
    worker_config: WorkerConfig,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("concurrency", &self.worker_config.concurrency)
            .field("leases_per_second", &self.worker_config.leases_per_second)
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn DispatchQueue>,
        storage: Arc<dyn FileStorage>,
        detector: Arc<dyn Detector>,
        worker_config: WorkerConfig,
        lease_config: LeaseConfig,
    ) -> Self {
        Self {
            ctx: Arc::new(WorkerContext {
                store,
                queue,
                storage,
                detector,
                lease_config,
            }),
            worker_config,
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub async fn start(&self) {
        let group = format!("scan-{}", std::process::id());
        let mut handles = self.handles.lock().await;

        for index in 0..self.worker_config.concurrency {
            let worker_id = format!("{group}-w{index}");
            handles.push(self.spawn_worker(worker_id));
        }
        handles.push(self.spawn_housekeeper());

        info!(
            workers = self.worker_config.concurrency,
            "worker pool started"
        );
    }

    pub async fn shutdown(&self) {
        info!("initiating worker pool shutdown");
        self.shutdown.cancel();

        let handles = {
            let mut guard = self.handles.lock().await;
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            match tokio::time::timeout(Duration::from_secs(30), handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!("worker task failed: {err:?}"),
                Err(_) => warn!("worker task timed out during shutdown"),
            }
        }
        info!("worker pool shutdown complete");
    }

    fn spawn_worker(&self, worker_id: String) -> JoinHandle<()> {
        let ctx = Arc::clone(&self.ctx);
        let shutdown = self.shutdown.clone();
        let config = self.worker_config;

        tokio::spawn(async move {
            let lease_ttl = Duration::from_secs(ctx.lease_config.lease_ttl_secs.max(1) as u64);
            let idle_poll = Duration::from_millis(config.idle_poll_ms.max(1));
            // Throttle lease acquisition independently of concurrency so
            // the external daemon sees a bounded request rate.
            let min_interval = (config.leases_per_second > 0)
                .then(|| Duration::from_secs_f64(1.0 / f64::from(config.leases_per_second)));
            let mut last_attempt: Option<tokio::time::Instant> = None;

            loop {
                if shutdown.is_cancelled() {
                    info!(worker = %worker_id, "worker shutting down");
                    break;
                }

                if let (Some(interval), Some(last)) = (min_interval, last_attempt) {
                    let elapsed = last.elapsed();
                    if elapsed < interval {
                        tokio::select! {
                            _ = tokio::time::sleep(interval - elapsed) => {}
                            _ = shutdown.cancelled() => continue,
                        }
                    }
                }
                last_attempt = Some(tokio::time::Instant::now());

                match ctx.queue.lease(&worker_id, lease_ttl).await {
                    Ok(Some(lease)) => {
                        Self::process_lease(&ctx, &worker_id, lease).await;
                    }
                    Ok(None) => {
                        tokio::select! {
                            _ = tokio::time::sleep(idle_poll) => {}
                            _ = shutdown.cancelled() => {}
                        }
                    }
                    Err(err) => {
                        error!(worker = %worker_id, error = %err, "lease acquisition failed");
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_millis(250)) => {}
                            _ = shutdown.cancelled() => {}
                        }
                    }
                }
            }
        })
    }

    fn spawn_housekeeper(&self) -> JoinHandle<()> {
        let ctx = Arc::clone(&self.ctx);
        let shutdown = self.shutdown.clone();
        let interval = Duration::from_millis(ctx.lease_config.housekeeper_interval_ms.max(1));

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("housekeeper shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        match ctx.queue.reap_expired().await {
                            Ok(0) => {}
                            Ok(resurrected) => {
                                debug!(resurrected, "housekeeper returned stalled entries");
                            }
                            Err(err) => warn!(error = %err, "lease reaping failed"),
                        }
                    }
                }
            }
        })
    }

    async fn process_lease(ctx: &Arc<WorkerContext>, worker_id: &str, lease: QueueLease) {
        debug!(
            worker = worker_id,
            job = %lease.job_id,
            delivery = lease.deliveries,
            "processing delivery"
        );

        // Heartbeat task keeps the lease alive while the scan runs.
        let (cancel_tx, mut cancel_rx) = tokio::sync::mpsc::channel::<()>(1);
        let renew_handle = {
            let queue = Arc::clone(&ctx.queue);
            let lease_id = lease.lease_id;
            let ttl = Duration::from_secs(ctx.lease_config.lease_ttl_secs.max(1) as u64);
            let renew_fraction = ctx.lease_config.renew_at_fraction.clamp(0.0, 1.0);
            let renew_margin = Duration::from_millis(ctx.lease_config.renew_min_margin_ms);
            let mut local_expires_at = lease.expires_at;

            tokio::spawn(async move {
                loop {
                    let now = Utc::now();
                    let mut sleep_dur = Duration::from_millis(500);
                    if local_expires_at > now {
                        let target = ttl.mul_f32(1.0 - renew_fraction);
                        let remaining = (local_expires_at - now).to_std().unwrap_or_default();
                        sleep_dur = if remaining > target {
                            remaining - target
                        } else if remaining > renew_margin {
                            remaining - renew_margin
                        } else {
                            Duration::ZERO
                        };
                    }

                    tokio::select! {
                        _ = tokio::time::sleep(sleep_dur) => {}
                        _ = cancel_rx.recv() => break,
                    }

                    match queue.renew(lease_id, ttl).await {
                        Ok(expires_at) => {
                            local_expires_at = expires_at;
                        }
                        Err(ScanGateError::NotFound(_)) => {
                            // Settled or reaped; nothing left to keep alive.
                            break;
                        }
                        Err(err) => {
                            warn!(lease = %lease_id, error = %err, "lease renewal failed");
                            tokio::select! {
                                _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                                _ = cancel_rx.recv() => break,
                            }
                        }
                    }
                }
            })
        };

        let attempt = Self::run_attempt(ctx, &lease).await;

        let _ = cancel_tx.try_send(());
        let _ = renew_handle.await;

        match attempt {
            WorkAttempt::Settled => {
                if let Err(err) = ctx.queue.complete(lease.lease_id).await {
                    error!(job = %lease.job_id, error = %err, "queue completion failed");
                }
            }
            WorkAttempt::Retry { error } => {
                if let Err(err) = ctx.queue.fail(lease.lease_id, true, Some(error)).await {
                    error!(job = %lease.job_id, error = %err, "queue failure report failed");
                }
            }
            WorkAttempt::Discard { error } => {
                if let Err(err) = ctx.queue.fail(lease.lease_id, false, error).await {
                    error!(job = %lease.job_id, error = %err, "queue dead-letter report failed");
                }
            }
        }
    }

    async fn run_attempt(ctx: &Arc<WorkerContext>, lease: &QueueLease) -> WorkAttempt {
        let job = match ctx.store.find_job(lease.job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                return WorkAttempt::Discard {
                    error: Some(format!("job {} no longer exists", lease.job_id)),
                };
            }
            Err(err) => return WorkAttempt::from_error(&err),
        };

        // Entries for jobs that no longer want a scan are consumed silently.
        if matches!(job.status, JobStatus::Cancelled | JobStatus::Completed) {
            debug!(job = %job.id, status = %job.status, "skipping settled job");
            return WorkAttempt::Settled;
        }

        if job.status == JobStatus::Processing {
            // Stale `processing` from an interrupted delivery: this lease is
            // now the sole owner, and that delivery's attempt was already
            // counted, so resume without a second increment.
            debug!(job = %job.id, "resuming interrupted delivery");
        } else if let Err(err) = ctx
            .store
            .transition(lease.job_id, JobStatus::Processing, None)
            .await
        {
            return match err {
                ScanGateError::InvalidTransition {
                    from: JobStatus::Cancelled,
                    ..
                } => WorkAttempt::Settled,
                other => WorkAttempt::from_error(&other),
            };
        }

        let exists = match ctx.storage.exists(&lease.stored_ref).await {
            Ok(exists) => exists,
            Err(err) => return Self::fail_attempt(ctx, lease, err).await,
        };
        if !exists {
            let err = ScanGateError::FileMissing(lease.stored_ref.clone());
            return Self::fail_attempt(ctx, lease, err).await;
        }

        let data = match ctx.storage.read(&lease.stored_ref).await {
            Ok(data) => data,
            Err(err) => return Self::fail_attempt(ctx, lease, err).await,
        };

        match ctx.detector.inspect(&data).await {
            Ok(inspection) => {
                let outcome = Self::build_outcome(ctx, inspection).await;
                match ctx.store.complete_with_result(lease.job_id, outcome).await {
                    Ok(_) => WorkAttempt::Settled,
                    Err(err) => {
                        warn!(job = %lease.job_id, error = %err, "result persistence failed");
                        WorkAttempt::from_error(&err)
                    }
                }
            }
            Err(err) => Self::fail_attempt(ctx, lease, err).await,
        }
    }

    /// Record the failed attempt on the job, then hand the redelivery
    /// decision to the queue via the returned outcome.
    async fn fail_attempt(
        ctx: &Arc<WorkerContext>,
        lease: &QueueLease,
        err: ScanGateError,
    ) -> WorkAttempt {
        let attempt = WorkAttempt::from_error(&err);
        let message = err.to_string();

        match ctx
            .store
            .transition(lease.job_id, JobStatus::Failed, Some(message.clone()))
            .await
        {
            Ok(job) => {
                warn!(
                    job = %job.id,
                    attempts = job.attempts,
                    max_attempts = job.max_attempts,
                    error = %message,
                    "scan attempt failed"
                );
            }
            Err(ScanGateError::InvalidTransition {
                from: JobStatus::Cancelled,
                ..
            }) => return WorkAttempt::Settled,
            Err(record_err) => {
                warn!(job = %lease.job_id, error = %record_err, "failed to record attempt failure");
            }
        }

        attempt
    }

    async fn build_outcome(ctx: &Arc<WorkerContext>, inspection: Inspection) -> ScanOutcome {
        let (engine_version, signature_version) = match ctx.detector.version().await {
            Some(raw) => {
                let mut parts = raw.splitn(3, '/');
                let engine = parts.next().map(|s| s.trim().to_string());
                let signatures = parts.next().map(|s| s.trim().to_string());
                (engine, signatures)
            }
            None => (None, None),
        };

        let duration_ms = inspection.duration.as_millis().min(i64::MAX as u128) as i64;
        let threat = inspection.infected.then(|| {
            let name = inspection
                .threats
                .first()
                .cloned()
                .unwrap_or_else(|| "Unknown".to_string());
            let description = (inspection.threats.len() > 1)
                .then(|| inspection.threats.join(", "));
            ThreatReport {
                name,
                category: None,
                description,
            }
        });

        ScanOutcome {
            verdict: if inspection.infected {
                ScanVerdict::Infected
            } else {
                ScanVerdict::Clean
            },
            threat,
            engine_version,
            signature_version,
            scan_duration_ms: duration_ms,
        }
    }
}
