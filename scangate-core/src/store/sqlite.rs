//! SQLite-backed job store.
//!
//! All status mutations are single guarded UPDATEs: the WHERE clause
//! encodes the legal source states, so concurrent writers race on
//! `rows_affected` rather than on read-then-write interleavings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::error::{Result, ScanGateError};
use crate::job::{
    InfectedReport, Job, JobId, JobStatus, NewJob, ScanOutcome, ScanResultRecord, ScanVerdict,
};
use crate::store::{CompletionStatus, JobStore};

const JOB_COLUMNS: &str = "id, original_name, stored_ref, size_bytes, content_type, checksum, \
     status, priority, attempts, max_attempts, last_error, \
     created_at, updated_at, started_at, completed_at";

#[derive(Clone, Debug)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: String,
    original_name: String,
    stored_ref: String,
    size_bytes: i64,
    content_type: String,
    checksum: Option<String>,
    status: String,
    priority: i64,
    attempts: i64,
    max_attempts: i64,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl JobRow {
    fn into_job(self) -> Result<Job> {
        Ok(Job {
            id: JobId::parse(&self.id)?,
            original_name: self.original_name,
            stored_ref: self.stored_ref,
            size_bytes: self.size_bytes,
            content_type: self.content_type,
            checksum: self.checksum,
            status: JobStatus::parse(&self.status)?,
            priority: self.priority.clamp(0, i64::from(u8::MAX)) as u8,
            attempts: self.attempts.max(0) as u32,
            max_attempts: self.max_attempts.max(0) as u32,
            last_error: self.last_error,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    job_id: String,
    verdict: String,
    infected: i64,
    threat_name: Option<String>,
    threat_category: Option<String>,
    threat_description: Option<String>,
    engine_version: Option<String>,
    signature_version: Option<String>,
    scan_duration_ms: i64,
    scanned_at: DateTime<Utc>,
}

impl ResultRow {
    fn into_record(self) -> Result<ScanResultRecord> {
        Ok(ScanResultRecord {
            job_id: JobId::parse(&self.job_id)?,
            verdict: ScanVerdict::parse(&self.verdict)?,
            infected: self.infected != 0,
            threat_name: self.threat_name,
            threat_category: self.threat_category,
            threat_description: self.threat_description,
            engine_version: self.engine_version,
            signature_version: self.signature_version,
            scan_duration_ms: self.scan_duration_ms,
            scanned_at: self.scanned_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InfectedRow {
    job_id: String,
    original_name: String,
    stored_ref: String,
    size_bytes: i64,
    threat_name: Option<String>,
    threat_category: Option<String>,
    scanned_at: DateTime<Utc>,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_job(&self, id: JobId) -> Result<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM scan_jobs WHERE id = ?");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(JobRow::into_job).transpose()
    }

    /// Build the transition error after a guarded update matched nothing.
    async fn transition_conflict(&self, id: JobId, to: JobStatus) -> ScanGateError {
        match self.fetch_job(id).await {
            Ok(Some(job)) => ScanGateError::InvalidTransition {
                from: job.status,
                to,
            },
            Ok(None) => ScanGateError::NotFound(format!("job {id}")),
            Err(err) => err,
        }
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create_job(&self, new_job: NewJob) -> Result<Job> {
        if new_job.original_name.trim().is_empty() {
            return Err(ScanGateError::Validation("original name is required".into()));
        }
        if new_job.stored_ref.trim().is_empty() {
            return Err(ScanGateError::Validation("stored reference is required".into()));
        }
        if new_job.content_type.trim().is_empty() {
            return Err(ScanGateError::Validation("content type is required".into()));
        }
        if new_job.size_bytes < 0 {
            return Err(ScanGateError::Validation("size must be non-negative".into()));
        }
        if new_job.max_attempts == 0 {
            return Err(ScanGateError::Validation("max attempts must be at least 1".into()));
        }

        let id = JobId::new();
        let now = Utc::now();
        let priority = new_job.clamped_priority();

        sqlx::query(
            "INSERT INTO scan_jobs (\
                 id, original_name, stored_ref, size_bytes, content_type, checksum, \
                 status, priority, attempts, max_attempts, last_error, \
                 created_at, updated_at, started_at, completed_at\
             ) VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, 0, ?, NULL, ?, ?, NULL, NULL)",
        )
        .bind(id.to_string())
        .bind(&new_job.original_name)
        .bind(&new_job.stored_ref)
        .bind(new_job.size_bytes)
        .bind(&new_job.content_type)
        .bind(&new_job.checksum)
        .bind(i64::from(priority))
        .bind(i64::from(new_job.max_attempts))
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(job = %id, priority, "job created");
        self.job(id).await
    }

    async fn job(&self, id: JobId) -> Result<Job> {
        self.fetch_job(id)
            .await?
            .ok_or_else(|| ScanGateError::NotFound(format!("job {id}")))
    }

    async fn find_job(&self, id: JobId) -> Result<Option<Job>> {
        self.fetch_job(id).await
    }

    async fn transition(
        &self,
        id: JobId,
        to: JobStatus,
        error: Option<String>,
    ) -> Result<Job> {
        let now = Utc::now();

        let updated = match to {
            JobStatus::Processing => {
                // The attempts guard keeps `attempts <= max_attempts` an
                // invariant rather than a convention, and the status guard
                // makes a duplicate pickup within one lease a no-op.
                sqlx::query(
                    "UPDATE scan_jobs \
                     SET status = 'processing', \
                         attempts = attempts + 1, \
                         started_at = COALESCE(started_at, ?), \
                         updated_at = ? \
                     WHERE id = ? \
                       AND status IN ('pending', 'failed') \
                       AND attempts < max_attempts",
                )
                .bind(now)
                .bind(now)
                .bind(id.to_string())
                .execute(&self.pool)
                .await?
            }
            JobStatus::Completed => {
                sqlx::query(
                    "UPDATE scan_jobs \
                     SET status = 'completed', \
                         last_error = NULL, \
                         completed_at = ?, \
                         updated_at = ? \
                     WHERE id = ? AND status = 'processing'",
                )
                .bind(now)
                .bind(now)
                .bind(id.to_string())
                .execute(&self.pool)
                .await?
            }
            JobStatus::Failed => {
                // `completed_at` marks the job terminal only once the
                // attempt budget is spent; otherwise it stays redeliverable.
                sqlx::query(
                    "UPDATE scan_jobs \
                     SET status = 'failed', \
                         last_error = ?, \
                         completed_at = CASE \
                             WHEN attempts >= max_attempts THEN ? \
                             ELSE completed_at \
                         END, \
                         updated_at = ? \
                     WHERE id = ? AND status IN ('pending', 'processing')",
                )
                .bind(&error)
                .bind(now)
                .bind(now)
                .bind(id.to_string())
                .execute(&self.pool)
                .await?
            }
            JobStatus::Cancelled => {
                sqlx::query(
                    "UPDATE scan_jobs \
                     SET status = 'cancelled', \
                         completed_at = ?, \
                         updated_at = ? \
                     WHERE id = ? AND status IN ('pending', 'processing')",
                )
                .bind(now)
                .bind(now)
                .bind(id.to_string())
                .execute(&self.pool)
                .await?
            }
            JobStatus::Pending => {
                return Err(self.transition_conflict(id, to).await);
            }
        };

        if updated.rows_affected() == 0 {
            return Err(self.transition_conflict(id, to).await);
        }

        let job = self.job(id).await?;
        debug!(job = %id, status = %job.status, attempts = job.attempts, "job transitioned");
        Ok(job)
    }

    async fn complete_with_result(
        &self,
        id: JobId,
        outcome: ScanOutcome,
    ) -> Result<CompletionStatus> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // Fence: only the delivery that flips processing -> completed may
        // write the result row. Anything else settles without effect.
        let flipped = sqlx::query(
            "UPDATE scan_jobs \
             SET status = 'completed', \
                 last_error = NULL, \
                 completed_at = ?, \
                 updated_at = ? \
             WHERE id = ? AND status = 'processing'",
        )
        .bind(now)
        .bind(now)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        if flipped.rows_affected() == 0 {
            let status = sqlx::query_scalar::<_, String>(
                "SELECT status FROM scan_jobs WHERE id = ?",
            )
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
            drop(tx);

            return match status {
                None => Err(ScanGateError::NotFound(format!("job {id}"))),
                Some(raw) => {
                    let from = JobStatus::parse(&raw)?;
                    if from == JobStatus::Completed || from == JobStatus::Cancelled {
                        warn!(job = %id, status = %from, "duplicate settle attempt ignored");
                        Ok(CompletionStatus::AlreadySettled)
                    } else {
                        Err(ScanGateError::InvalidTransition {
                            from,
                            to: JobStatus::Completed,
                        })
                    }
                }
            };
        }

        let (threat_name, threat_category, threat_description) = match &outcome.threat {
            Some(threat) => (
                Some(threat.name.clone()),
                threat.category.clone(),
                threat.description.clone(),
            ),
            None => (None, None, None),
        };

        sqlx::query(
            "INSERT INTO scan_results (\
                 job_id, verdict, infected, threat_name, threat_category, \
                 threat_description, engine_version, signature_version, \
                 scan_duration_ms, scanned_at\
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(outcome.verdict.as_str())
        .bind(i64::from(outcome.is_infected()))
        .bind(threat_name)
        .bind(threat_category)
        .bind(threat_description)
        .bind(&outcome.engine_version)
        .bind(&outcome.signature_version)
        .bind(outcome.scan_duration_ms)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(job = %id, verdict = outcome.verdict.as_str(), "job completed with result");
        Ok(CompletionStatus::Completed)
    }

    async fn scan_result(&self, id: JobId) -> Result<Option<ScanResultRecord>> {
        let row = sqlx::query_as::<_, ResultRow>(
            "SELECT job_id, verdict, infected, threat_name, threat_category, \
                    threat_description, engine_version, signature_version, \
                    scan_duration_ms, scanned_at \
             FROM scan_results WHERE job_id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(ResultRow::into_record).transpose()
    }

    async fn list_pending(&self, limit: u32) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM scan_jobs \
             WHERE status = 'pending' \
             ORDER BY priority DESC, created_at ASC, id ASC \
             LIMIT ?"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn list_retryable(&self, limit: u32) -> Result<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM scan_jobs \
             WHERE status = 'failed' AND attempts < max_attempts \
             ORDER BY updated_at ASC, id ASC \
             LIMIT ?"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn list_infected(&self, page: u32, page_size: u32) -> Result<(Vec<InfectedReport>, u64)> {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let offset = i64::from(page - 1) * i64::from(page_size);

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM scan_results WHERE infected = 1",
        )
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, InfectedRow>(
            "SELECT j.id AS job_id, j.original_name, j.stored_ref, j.size_bytes, \
                    r.threat_name, r.threat_category, r.scanned_at \
             FROM scan_results r \
             JOIN scan_jobs j ON j.id = r.job_id \
             WHERE r.infected = 1 \
             ORDER BY r.scanned_at DESC, j.id DESC \
             LIMIT ? OFFSET ?",
        )
        .bind(i64::from(page_size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let reports = rows
            .into_iter()
            .map(|row| {
                Ok(InfectedReport {
                    job_id: JobId::parse(&row.job_id)?,
                    original_name: row.original_name,
                    stored_ref: row.stored_ref,
                    size_bytes: row.size_bytes,
                    threat_name: row.threat_name,
                    threat_category: row.threat_category,
                    scanned_at: row.scanned_at,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((reports, total.max(0) as u64))
    }

    async fn ping(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ThreatReport;

    fn sample_job(priority: i64) -> NewJob {
        NewJob {
            original_name: "invoice.pdf".into(),
            stored_ref: "ab".repeat(32),
            size_bytes: 10,
            content_type: "application/pdf".into(),
            checksum: Some("abc123".into()),
            priority,
            max_attempts: 3,
        }
    }

    #[sqlx::test]
    async fn create_assigns_pending_and_clamps_priority(pool: SqlitePool) {
        let store = SqliteJobStore::new(pool);
        let job = store.create_job(sample_job(42)).await.unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.priority, 10);
        assert_eq!(job.attempts, 0);
        assert!(job.started_at.is_none());
        assert!(job.completed_at.is_none());
    }

    #[sqlx::test]
    async fn create_rejects_missing_fields(pool: SqlitePool) {
        let store = SqliteJobStore::new(pool);

        let mut bad = sample_job(0);
        bad.original_name = "  ".into();
        assert!(matches!(
            store.create_job(bad).await,
            Err(ScanGateError::Validation(_))
        ));

        let mut bad = sample_job(0);
        bad.stored_ref = String::new();
        assert!(matches!(
            store.create_job(bad).await,
            Err(ScanGateError::Validation(_))
        ));

        let mut bad = sample_job(0);
        bad.max_attempts = 0;
        assert!(matches!(
            store.create_job(bad).await,
            Err(ScanGateError::Validation(_))
        ));
    }

    #[sqlx::test]
    async fn unknown_job_is_not_found(pool: SqlitePool) {
        let store = SqliteJobStore::new(pool);
        let missing = JobId::new();

        assert!(matches!(
            store.job(missing).await,
            Err(ScanGateError::NotFound(_))
        ));
        assert!(matches!(
            store.transition(missing, JobStatus::Processing, None).await,
            Err(ScanGateError::NotFound(_))
        ));
    }

    #[sqlx::test]
    async fn processing_increments_attempts_and_stamps_started_once(pool: SqlitePool) {
        let store = SqliteJobStore::new(pool);
        let job = store.create_job(sample_job(0)).await.unwrap();

        let job = store
            .transition(job.id, JobStatus::Processing, None)
            .await
            .unwrap();
        assert_eq!(job.attempts, 1);
        let first_started = job.started_at.expect("started_at set on first pickup");

        // Duplicate pickup for the same delivery must not double-increment.
        assert!(matches!(
            store.transition(job.id, JobStatus::Processing, None).await,
            Err(ScanGateError::InvalidTransition {
                from: JobStatus::Processing,
                to: JobStatus::Processing,
            })
        ));

        let job = store
            .transition(job.id, JobStatus::Failed, Some("boom".into()))
            .await
            .unwrap();
        assert_eq!(job.attempts, 1);
        assert_eq!(job.last_error.as_deref(), Some("boom"));
        assert!(job.completed_at.is_none(), "attempts not exhausted yet");

        let job = store
            .transition(job.id, JobStatus::Processing, None)
            .await
            .unwrap();
        assert_eq!(job.attempts, 2);
        assert_eq!(job.started_at, Some(first_started));
    }

    #[sqlx::test]
    async fn attempts_never_exceed_max(pool: SqlitePool) {
        let store = SqliteJobStore::new(pool);
        let job = store.create_job(sample_job(0)).await.unwrap();

        for attempt in 1..=3u32 {
            let picked = store
                .transition(job.id, JobStatus::Processing, None)
                .await
                .unwrap();
            assert_eq!(picked.attempts, attempt);
            assert!(picked.attempts <= picked.max_attempts);
            store
                .transition(job.id, JobStatus::Failed, Some("detector down".into()))
                .await
                .unwrap();
        }

        // Budget spent: the pickup guard refuses a fourth attempt.
        assert!(matches!(
            store.transition(job.id, JobStatus::Processing, None).await,
            Err(ScanGateError::InvalidTransition { .. })
        ));

        let job = store.job(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempts, job.max_attempts);
        assert!(job.completed_at.is_some(), "exhausted failure is terminal");
    }

    #[sqlx::test]
    async fn complete_with_result_is_atomic_and_idempotent(pool: SqlitePool) {
        let store = SqliteJobStore::new(pool.clone());
        let job = store.create_job(sample_job(0)).await.unwrap();
        store
            .transition(job.id, JobStatus::Processing, None)
            .await
            .unwrap();

        let outcome = ScanOutcome::infected(
            ThreatReport {
                name: "EICAR-Test".into(),
                category: Some("test-signature".into()),
                description: None,
            },
            12,
        );

        let first = store
            .complete_with_result(job.id, outcome.clone())
            .await
            .unwrap();
        assert_eq!(first, CompletionStatus::Completed);

        // A duplicate delivery settles without a second result row.
        let second = store.complete_with_result(job.id, outcome).await.unwrap();
        assert_eq!(second, CompletionStatus::AlreadySettled);

        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM scan_results WHERE job_id = ?",
        )
        .bind(job.id.to_string())
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);

        let result = store.scan_result(job.id).await.unwrap().unwrap();
        assert!(result.infected);
        assert_eq!(result.threat_name.as_deref(), Some("EICAR-Test"));

        let job = store.job(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.completed_at.is_some());
    }

    #[sqlx::test]
    async fn completing_a_pending_job_is_rejected_without_result(pool: SqlitePool) {
        let store = SqliteJobStore::new(pool);
        let job = store.create_job(sample_job(0)).await.unwrap();

        assert!(matches!(
            store.complete_with_result(job.id, ScanOutcome::clean(1)).await,
            Err(ScanGateError::InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Completed,
            })
        ));
        assert!(store.scan_result(job.id).await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn cancelled_job_ignores_late_result(pool: SqlitePool) {
        let store = SqliteJobStore::new(pool);
        let job = store.create_job(sample_job(0)).await.unwrap();
        store
            .transition(job.id, JobStatus::Processing, None)
            .await
            .unwrap();
        store
            .transition(job.id, JobStatus::Cancelled, None)
            .await
            .unwrap();

        // Worker finishes its scan after the cancel arrived.
        let settled = store
            .complete_with_result(job.id, ScanOutcome::clean(5))
            .await
            .unwrap();
        assert_eq!(settled, CompletionStatus::AlreadySettled);

        let job = store.job(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(store.scan_result(job.id).await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn pending_listing_orders_by_priority_then_age(pool: SqlitePool) {
        let store = SqliteJobStore::new(pool);

        let low_first = store.create_job(sample_job(1)).await.unwrap();
        let high = store.create_job(sample_job(5)).await.unwrap();
        let low_second = store.create_job(sample_job(1)).await.unwrap();

        let pending = store.list_pending(10).await.unwrap();
        let ids: Vec<JobId> = pending.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![high.id, low_first.id, low_second.id]);
    }

    #[sqlx::test]
    async fn retryable_listing_excludes_exhausted_jobs(pool: SqlitePool) {
        let store = SqliteJobStore::new(pool);

        let retryable = store.create_job(sample_job(0)).await.unwrap();
        store
            .transition(retryable.id, JobStatus::Processing, None)
            .await
            .unwrap();
        store
            .transition(retryable.id, JobStatus::Failed, Some("transient".into()))
            .await
            .unwrap();

        let exhausted = {
            let mut new_job = sample_job(0);
            new_job.max_attempts = 1;
            store.create_job(new_job).await.unwrap()
        };
        store
            .transition(exhausted.id, JobStatus::Processing, None)
            .await
            .unwrap();
        store
            .transition(exhausted.id, JobStatus::Failed, Some("fatal".into()))
            .await
            .unwrap();

        let listed = store.list_retryable(10).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, retryable.id);
    }

    #[sqlx::test]
    async fn infected_listing_paginates_newest_first(pool: SqlitePool) {
        let store = SqliteJobStore::new(pool);

        let mut infected_ids = Vec::new();
        for i in 0..3 {
            let job = store.create_job(sample_job(0)).await.unwrap();
            store
                .transition(job.id, JobStatus::Processing, None)
                .await
                .unwrap();
            let outcome = ScanOutcome::infected(
                ThreatReport {
                    name: format!("Threat-{i}"),
                    category: None,
                    description: None,
                },
                1,
            );
            store.complete_with_result(job.id, outcome).await.unwrap();
            infected_ids.push(job.id);
            // Distinct scanned_at timestamps for a stable order.
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        // One clean job that must not show up.
        let clean = store.create_job(sample_job(0)).await.unwrap();
        store
            .transition(clean.id, JobStatus::Processing, None)
            .await
            .unwrap();
        store
            .complete_with_result(clean.id, ScanOutcome::clean(1))
            .await
            .unwrap();

        let (page_one, total) = store.list_infected(1, 2).await.unwrap();
        assert_eq!(total, 3);
        assert_eq!(page_one.len(), 2);
        assert_eq!(page_one[0].job_id, infected_ids[2]);
        assert_eq!(page_one[1].job_id, infected_ids[1]);

        let (page_two, _) = store.list_infected(2, 2).await.unwrap();
        assert_eq!(page_two.len(), 1);
        assert_eq!(page_two[0].job_id, infected_ids[0]);
    }

    #[sqlx::test]
    async fn enqueue_rollback_edge_marks_pending_job_failed(pool: SqlitePool) {
        let store = SqliteJobStore::new(pool);
        let job = store.create_job(sample_job(0)).await.unwrap();

        let failed = store
            .transition(job.id, JobStatus::Failed, Some("enqueue failed".into()))
            .await
            .unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.attempts, 0);
        assert_eq!(failed.last_error.as_deref(), Some("enqueue failed"));
    }

    #[sqlx::test]
    async fn ping_reports_reachability(pool: SqlitePool) {
        let store = SqliteJobStore::new(pool);
        assert!(store.ping().await);
    }
}
