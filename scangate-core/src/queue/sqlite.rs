//! SQLite-backed durable dispatch queue.
//!
//! The claim statement is a single `UPDATE ... RETURNING` over a
//! subselect, so concurrent workers serialize on SQLite's writer lock and
//! an entry is handed to at most one lease holder at a time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{QueueConfig, RetryConfig};
use crate::error::{Result, ScanGateError};
use crate::job::{JobId, MAX_PRIORITY, MIN_PRIORITY};
use crate::queue::{
    CleanTarget, DispatchQueue, EnqueueOptions, LeaseId, QueueEntryId, QueueLease, QueueStats,
};

#[derive(Debug)]
pub struct SqliteDispatchQueue {
    pool: SqlitePool,
    queue_config: QueueConfig,
    retry_config: RetryConfig,
    paused: AtomicBool,
}

#[derive(sqlx::FromRow)]
struct ClaimedRow {
    id: String,
    job_id: String,
    stored_ref: String,
    deliveries: i64,
}

#[derive(sqlx::FromRow)]
struct ExpiredRow {
    id: String,
    deliveries: i64,
    max_deliveries: i64,
}

impl SqliteDispatchQueue {
    pub fn new(pool: SqlitePool, queue_config: QueueConfig, retry_config: RetryConfig) -> Self {
        Self {
            pool,
            queue_config,
            retry_config,
            paused: AtomicBool::new(false),
        }
    }

    fn base_delay_ms(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        let exp = attempt.saturating_sub(1).min(31) as i32;
        let scaled = (self.retry_config.backoff_base_ms as f64) * 2f64.powi(exp);
        let capped = scaled.min(self.retry_config.backoff_max_ms as f64);
        capped.max(0.0) as u64
    }

    /// Capped exponential backoff with bounded deterministic jitter so
    /// redeliveries of distinct entries spread out without shared state.
    fn backoff_delay_ms(&self, entry_id: &str, attempt: u32) -> u64 {
        let anchor = self.base_delay_ms(attempt);
        if anchor == 0 {
            return 0;
        }

        let jitter_ratio = f64::from(self.retry_config.jitter_ratio.max(0.0));
        let jitter_span = ((anchor as f64) * jitter_ratio)
            .max(self.retry_config.jitter_min_ms as f64)
            .min(self.retry_config.backoff_max_ms as f64);

        let lower = 0f64.max(anchor as f64 - jitter_span);
        let upper = (anchor as f64 + jitter_span).min(self.retry_config.backoff_max_ms as f64);
        if upper <= lower {
            return lower.round() as u64;
        }

        let unit = Self::deterministic_unit(entry_id, attempt);
        (lower + (upper - lower) * unit).round() as u64
    }

    fn deterministic_unit(entry_id: &str, attempt: u32) -> f64 {
        let mut hasher = DefaultHasher::default();
        entry_id.hash(&mut hasher);
        attempt.hash(&mut hasher);
        (hasher.finish() as f64) / (u64::MAX as f64)
    }

    fn chrono_ms(duration: Duration) -> chrono::Duration {
        chrono::Duration::milliseconds(duration.as_millis().min(i64::MAX as u128) as i64)
    }
}

#[async_trait]
impl DispatchQueue for SqliteDispatchQueue {
    async fn enqueue(
        &self,
        job_id: JobId,
        stored_ref: &str,
        options: EnqueueOptions,
    ) -> Result<QueueEntryId> {
        if stored_ref.trim().is_empty() {
            return Err(ScanGateError::Queue("stored reference is required".into()));
        }

        let entry_id = QueueEntryId::new();
        let now = Utc::now();
        let available_at = match options.delay {
            Some(delay) => now + Self::chrono_ms(delay),
            None => now,
        };
        let priority = options
            .priority
            .clamp(i64::from(MIN_PRIORITY), i64::from(MAX_PRIORITY));

        sqlx::query(
            "INSERT INTO queue_entries (\
                 id, job_id, stored_ref, state, priority, deliveries, max_deliveries, \
                 available_at, lease_id, lease_owner, lease_expires_at, last_error, \
                 created_at, updated_at\
             ) VALUES (?, ?, ?, 'ready', ?, 0, ?, ?, NULL, NULL, NULL, NULL, ?, ?)",
        )
        .bind(entry_id.to_string())
        .bind(job_id.to_string())
        .bind(stored_ref)
        .bind(priority)
        .bind(i64::from(self.queue_config.max_deliveries))
        .bind(available_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(entry = %entry_id, job = %job_id, priority, "entry enqueued");
        Ok(entry_id)
    }

    async fn lease(&self, worker_id: &str, ttl: Duration) -> Result<Option<QueueLease>> {
        if self.is_paused() {
            return Ok(None);
        }

        let now = Utc::now();
        let lease_id = LeaseId::new();
        let expires_at = now + Self::chrono_ms(ttl);

        let claimed = sqlx::query_as::<_, ClaimedRow>(
            "UPDATE queue_entries \
             SET state = 'leased', \
                 lease_id = ?, \
                 lease_owner = ?, \
                 lease_expires_at = ?, \
                 deliveries = deliveries + 1, \
                 updated_at = ? \
             WHERE id = (\
                 SELECT id FROM queue_entries \
                 WHERE state = 'ready' AND available_at <= ? \
                 ORDER BY priority DESC, created_at ASC, id ASC \
                 LIMIT 1\
             ) \
             RETURNING id, job_id, stored_ref, deliveries",
        )
        .bind(lease_id.to_string())
        .bind(worker_id)
        .bind(expires_at)
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = claimed else {
            return Ok(None);
        };

        let lease = QueueLease {
            lease_id,
            entry_id: QueueEntryId(
                uuid::Uuid::parse_str(&row.id)
                    .map_err(|e| ScanGateError::Queue(format!("malformed entry id: {e}")))?,
            ),
            job_id: JobId::parse(&row.job_id)?,
            stored_ref: row.stored_ref,
            deliveries: row.deliveries.max(0) as u32,
            expires_at,
        };

        debug!(
            entry = %lease.entry_id,
            job = %lease.job_id,
            worker = worker_id,
            delivery = lease.deliveries,
            "entry leased"
        );
        Ok(Some(lease))
    }

    async fn renew(&self, lease_id: LeaseId, extend_by: Duration) -> Result<DateTime<Utc>> {
        let now = Utc::now();
        let expires_at = now + Self::chrono_ms(extend_by);

        let renewed = sqlx::query(
            "UPDATE queue_entries \
             SET lease_expires_at = ?, updated_at = ? \
             WHERE lease_id = ? AND state = 'leased' AND lease_expires_at > ?",
        )
        .bind(expires_at)
        .bind(now)
        .bind(lease_id.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;

        if renewed.rows_affected() == 0 {
            return Err(ScanGateError::NotFound(format!(
                "lease {lease_id} expired or reassigned"
            )));
        }
        Ok(expires_at)
    }

    async fn complete(&self, lease_id: LeaseId) -> Result<()> {
        let settled = sqlx::query(
            "UPDATE queue_entries \
             SET state = 'completed', \
                 lease_id = NULL, \
                 lease_owner = NULL, \
                 lease_expires_at = NULL, \
                 updated_at = ? \
             WHERE lease_id = ? AND state = 'leased'",
        )
        .bind(Utc::now())
        .bind(lease_id.to_string())
        .execute(&self.pool)
        .await?;

        if settled.rows_affected() > 0 {
            debug!(lease = %lease_id, "entry completed");
        }
        Ok(())
    }

    async fn fail(&self, lease_id: LeaseId, retryable: bool, error: Option<String>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ExpiredRow>(
            "SELECT id, deliveries, max_deliveries FROM queue_entries \
             WHERE lease_id = ? AND state = 'leased'",
        )
        .bind(lease_id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            // Lease already reaped or settled; nothing to report against.
            drop(tx);
            return Ok(());
        };

        let deliveries = row.deliveries.max(0) as u32;
        let now = Utc::now();

        if retryable && i64::from(deliveries) < row.max_deliveries {
            let delay_ms = self.backoff_delay_ms(&row.id, deliveries);
            let available_at = now + chrono::Duration::milliseconds(delay_ms as i64);

            sqlx::query(
                "UPDATE queue_entries \
                 SET state = 'ready', \
                     lease_id = NULL, \
                     lease_owner = NULL, \
                     lease_expires_at = NULL, \
                     last_error = ?, \
                     available_at = ?, \
                     updated_at = ? \
                 WHERE id = ?",
            )
            .bind(&error)
            .bind(available_at)
            .bind(now)
            .bind(&row.id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            warn!(
                entry = %row.id,
                delivery = deliveries,
                delay_ms,
                "delivery failed, rescheduled with backoff"
            );
        } else {
            sqlx::query(
                "UPDATE queue_entries \
                 SET state = 'dead', \
                     lease_id = NULL, \
                     lease_owner = NULL, \
                     lease_expires_at = NULL, \
                     last_error = ?, \
                     updated_at = ? \
                 WHERE id = ?",
            )
            .bind(&error)
            .bind(now)
            .bind(&row.id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            warn!(
                entry = %row.id,
                delivery = deliveries,
                retryable,
                "delivery failed terminally, entry moved to dead set"
            );
        }
        Ok(())
    }

    async fn cancel_entry(&self, job_id: JobId) -> Result<bool> {
        let removed = sqlx::query(
            "DELETE FROM queue_entries WHERE job_id = ? AND state = 'ready'",
        )
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(removed.rows_affected() > 0)
    }

    async fn position(&self, job_id: JobId) -> Result<Option<u64>> {
        let entry = sqlx::query_as::<_, (String, i64, DateTime<Utc>)>(
            "SELECT id, priority, created_at FROM queue_entries \
             WHERE job_id = ? AND state = 'ready' \
             ORDER BY created_at ASC LIMIT 1",
        )
        .bind(job_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some((entry_id, priority, created_at)) = entry else {
            return Ok(None);
        };

        let now = Utc::now();
        let ahead = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM queue_entries \
             WHERE state = 'ready' AND available_at <= ? \
               AND (priority > ? \
                    OR (priority = ? AND (created_at < ? \
                        OR (created_at = ? AND id < ?))))",
        )
        .bind(now)
        .bind(priority)
        .bind(priority)
        .bind(created_at)
        .bind(created_at)
        .bind(entry_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(ahead.max(0) as u64))
    }

    async fn stats(&self) -> Result<QueueStats> {
        let now = Utc::now();
        let row = sqlx::query_as::<
            _,
            (Option<i64>, Option<i64>, Option<i64>, Option<i64>, Option<i64>),
        >(
            "SELECT \
                 SUM(CASE WHEN state = 'ready' AND available_at <= ? THEN 1 ELSE 0 END), \
                 SUM(CASE WHEN state = 'ready' AND available_at > ? THEN 1 ELSE 0 END), \
                 SUM(CASE WHEN state = 'leased' THEN 1 ELSE 0 END), \
                 SUM(CASE WHEN state = 'completed' THEN 1 ELSE 0 END), \
                 SUM(CASE WHEN state = 'dead' THEN 1 ELSE 0 END) \
             FROM queue_entries",
        )
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            waiting: row.0.unwrap_or(0).max(0) as u64,
            delayed: row.1.unwrap_or(0).max(0) as u64,
            active: row.2.unwrap_or(0).max(0) as u64,
            completed: row.3.unwrap_or(0).max(0) as u64,
            failed: row.4.unwrap_or(0).max(0) as u64,
        })
    }

    async fn reap_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let expired = sqlx::query_as::<_, ExpiredRow>(
            "SELECT id, deliveries, max_deliveries FROM queue_entries \
             WHERE state = 'leased' AND lease_expires_at IS NOT NULL AND lease_expires_at < ?",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut resurrected = 0u64;
        for row in expired {
            let deliveries = row.deliveries.max(0) as u32;
            if i64::from(deliveries) < row.max_deliveries {
                let delay_ms = self.backoff_delay_ms(&row.id, deliveries);
                let available_at = now + chrono::Duration::milliseconds(delay_ms as i64);

                sqlx::query(
                    "UPDATE queue_entries \
                     SET state = 'ready', \
                         lease_id = NULL, \
                         lease_owner = NULL, \
                         lease_expires_at = NULL, \
                         last_error = COALESCE(last_error, 'lease expired'), \
                         available_at = ?, \
                         updated_at = ? \
                     WHERE id = ? AND state = 'leased'",
                )
                .bind(available_at)
                .bind(now)
                .bind(&row.id)
                .execute(&self.pool)
                .await?;
                resurrected += 1;
            } else {
                sqlx::query(
                    "UPDATE queue_entries \
                     SET state = 'dead', \
                         lease_id = NULL, \
                         lease_owner = NULL, \
                         lease_expires_at = NULL, \
                         last_error = COALESCE(last_error, 'lease expired (max deliveries)'), \
                         updated_at = ? \
                     WHERE id = ? AND state = 'leased'",
                )
                .bind(now)
                .bind(&row.id)
                .execute(&self.pool)
                .await?;
                warn!(entry = %row.id, "expired lease had no deliveries left, entry moved to dead set");
            }
        }

        if resurrected > 0 {
            debug!(resurrected, "expired leases returned to the waiting set");
        }
        Ok(resurrected)
    }

    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn clean(&self, target: CleanTarget, max_age: Duration) -> Result<u64> {
        let cutoff = Utc::now() - Self::chrono_ms(max_age);
        let pruned = sqlx::query(
            "DELETE FROM queue_entries WHERE state = ? AND updated_at < ?",
        )
        .bind(target.as_state())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(pruned.rows_affected())
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
    use std::time::Duration;
    use tokio::time::sleep;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            backoff_base_ms: 10,
            backoff_max_ms: 40,
            jitter_ratio: 0.0,
            jitter_min_ms: 0,
        }
    }

    fn queue(pool: SqlitePool) -> SqliteDispatchQueue {
        SqliteDispatchQueue::new(pool, QueueConfig::default(), fast_retry())
    }

    const TTL: Duration = Duration::from_secs(30);

    #[sqlx::test]
    async fn priority_wins_over_insertion_order(pool: SqlitePool) {
        let q = queue(pool);
        let low = JobId::new();
        let high = JobId::new();

        q.enqueue(low, "ref-low", EnqueueOptions { priority: 1, delay: None })
            .await
            .unwrap();
        q.enqueue(high, "ref-high", EnqueueOptions { priority: 5, delay: None })
            .await
            .unwrap();

        let first = q.lease("w1", TTL).await.unwrap().unwrap();
        assert_eq!(first.job_id, high);
        let second = q.lease("w1", TTL).await.unwrap().unwrap();
        assert_eq!(second.job_id, low);
    }

    #[sqlx::test]
    async fn fifo_within_a_priority_band(pool: SqlitePool) {
        let q = queue(pool);
        let first = JobId::new();
        let second = JobId::new();

        q.enqueue(first, "ref-1", EnqueueOptions { priority: 3, delay: None })
            .await
            .unwrap();
        q.enqueue(second, "ref-2", EnqueueOptions { priority: 3, delay: None })
            .await
            .unwrap();

        assert_eq!(q.lease("w1", TTL).await.unwrap().unwrap().job_id, first);
        assert_eq!(q.lease("w1", TTL).await.unwrap().unwrap().job_id, second);
    }

    #[sqlx::test]
    async fn delayed_entries_are_withheld_until_eligible(pool: SqlitePool) {
        let q = queue(pool);
        let job = JobId::new();

        q.enqueue(
            job,
            "ref",
            EnqueueOptions {
                priority: 0,
                delay: Some(Duration::from_millis(150)),
            },
        )
        .await
        .unwrap();

        assert!(q.lease("w1", TTL).await.unwrap().is_none());
        let stats = q.stats().await.unwrap();
        assert_eq!(stats.delayed, 1);
        assert_eq!(stats.waiting, 0);

        sleep(Duration::from_millis(200)).await;
        let lease = q.lease("w1", TTL).await.unwrap().unwrap();
        assert_eq!(lease.job_id, job);
    }

    #[sqlx::test]
    async fn a_leased_entry_is_not_delivered_twice(pool: SqlitePool) {
        let q = queue(pool);
        q.enqueue(JobId::new(), "ref", EnqueueOptions::default())
            .await
            .unwrap();

        let lease = q.lease("w1", TTL).await.unwrap().unwrap();
        assert_eq!(lease.deliveries, 1);
        assert!(q.lease("w2", TTL).await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn renew_extends_and_rejects_unknown_leases(pool: SqlitePool) {
        let q = queue(pool);
        q.enqueue(JobId::new(), "ref", EnqueueOptions::default())
            .await
            .unwrap();

        let lease = q.lease("w1", TTL).await.unwrap().unwrap();
        let extended = q
            .renew(lease.lease_id, Duration::from_secs(60))
            .await
            .unwrap();
        assert!(extended > lease.expires_at);

        assert!(matches!(
            q.renew(LeaseId::new(), Duration::from_secs(60)).await,
            Err(ScanGateError::NotFound(_))
        ));
    }

    #[sqlx::test]
    async fn retryable_failure_is_redelivered_after_backoff(pool: SqlitePool) {
        let q = queue(pool);
        let job = JobId::new();
        q.enqueue(job, "ref", EnqueueOptions::default()).await.unwrap();

        let lease = q.lease("w1", TTL).await.unwrap().unwrap();
        q.fail(lease.lease_id, true, Some("detector down".into()))
            .await
            .unwrap();

        // base 10ms backoff for the first redelivery
        sleep(Duration::from_millis(50)).await;
        let redelivered = q.lease("w1", TTL).await.unwrap().unwrap();
        assert_eq!(redelivered.job_id, job);
        assert_eq!(redelivered.deliveries, 2);
    }

    #[sqlx::test]
    async fn exhausted_entries_move_to_the_dead_set(pool: SqlitePool) {
        let q = SqliteDispatchQueue::new(
            pool,
            QueueConfig {
                max_deliveries: 2,
                default_priority: 0,
            },
            fast_retry(),
        );
        q.enqueue(JobId::new(), "ref", EnqueueOptions::default())
            .await
            .unwrap();

        for _ in 0..2 {
            sleep(Duration::from_millis(50)).await;
            let lease = q.lease("w1", TTL).await.unwrap().unwrap();
            q.fail(lease.lease_id, true, Some("still down".into()))
                .await
                .unwrap();
        }

        sleep(Duration::from_millis(100)).await;
        assert!(q.lease("w1", TTL).await.unwrap().is_none(), "dead entries never redeliver");
        let stats = q.stats().await.unwrap();
        assert_eq!(stats.failed, 1);
    }

    #[sqlx::test]
    async fn non_retryable_failure_is_dead_lettered_immediately(pool: SqlitePool) {
        let q = queue(pool);
        q.enqueue(JobId::new(), "ref", EnqueueOptions::default())
            .await
            .unwrap();

        let lease = q.lease("w1", TTL).await.unwrap().unwrap();
        q.fail(lease.lease_id, false, Some("job vanished".into()))
            .await
            .unwrap();

        assert!(q.lease("w1", TTL).await.unwrap().is_none());
        assert_eq!(q.stats().await.unwrap().failed, 1);
    }

    #[sqlx::test]
    async fn expired_leases_are_reaped_and_redelivered(pool: SqlitePool) {
        let q = queue(pool);
        let job = JobId::new();
        q.enqueue(job, "ref", EnqueueOptions::default()).await.unwrap();

        let stalled = q
            .lease("w1", Duration::from_millis(30))
            .await
            .unwrap()
            .unwrap();
        sleep(Duration::from_millis(60)).await;

        let resurrected = q.reap_expired().await.unwrap();
        assert_eq!(resurrected, 1);

        // Renewal against the reaped lease must fail.
        assert!(q.renew(stalled.lease_id, TTL).await.is_err());

        sleep(Duration::from_millis(50)).await;
        let redelivered = q.lease("w2", TTL).await.unwrap().unwrap();
        assert_eq!(redelivered.job_id, job);
        assert_eq!(redelivered.deliveries, 2);
    }

    #[sqlx::test]
    async fn cancel_removes_waiting_entries_only(pool: SqlitePool) {
        let q = queue(pool);
        let waiting = JobId::new();
        let leased = JobId::new();

        q.enqueue(leased, "ref-leased", EnqueueOptions { priority: 5, delay: None })
            .await
            .unwrap();
        q.enqueue(waiting, "ref-waiting", EnqueueOptions::default())
            .await
            .unwrap();

        let lease = q.lease("w1", TTL).await.unwrap().unwrap();
        assert_eq!(lease.job_id, leased);

        assert!(q.cancel_entry(waiting).await.unwrap());
        assert!(!q.cancel_entry(leased).await.unwrap(), "leased entries stay");
        assert!(q.lease("w1", TTL).await.unwrap().is_none());
    }

    #[sqlx::test]
    async fn position_counts_entries_ahead(pool: SqlitePool) {
        let q = queue(pool);
        let front = JobId::new();
        let back = JobId::new();

        q.enqueue(front, "ref-a", EnqueueOptions { priority: 5, delay: None })
            .await
            .unwrap();
        q.enqueue(back, "ref-b", EnqueueOptions { priority: 1, delay: None })
            .await
            .unwrap();

        assert_eq!(q.position(front).await.unwrap(), Some(0));
        assert_eq!(q.position(back).await.unwrap(), Some(1));
        assert_eq!(q.position(JobId::new()).await.unwrap(), None);

        let lease = q.lease("w1", TTL).await.unwrap().unwrap();
        assert_eq!(lease.job_id, front);
        assert_eq!(q.position(back).await.unwrap(), Some(0));
    }

    #[sqlx::test]
    async fn pause_gates_delivery_without_dropping_entries(pool: SqlitePool) {
        let q = queue(pool);
        q.enqueue(JobId::new(), "ref", EnqueueOptions::default())
            .await
            .unwrap();

        q.pause();
        assert!(q.is_paused());
        assert!(q.lease("w1", TTL).await.unwrap().is_none());
        assert_eq!(q.stats().await.unwrap().waiting, 1);

        q.resume();
        assert!(q.lease("w1", TTL).await.unwrap().is_some());
    }

    #[sqlx::test]
    async fn clean_prunes_only_old_settled_entries(pool: SqlitePool) {
        let q = queue(pool);

        // Settled entry.
        q.enqueue(JobId::new(), "ref-done", EnqueueOptions::default())
            .await
            .unwrap();
        let lease = q.lease("w1", TTL).await.unwrap().unwrap();
        q.complete(lease.lease_id).await.unwrap();

        // Waiting entry that must survive any clean.
        q.enqueue(JobId::new(), "ref-waiting", EnqueueOptions::default())
            .await
            .unwrap();

        // Too young to prune.
        assert_eq!(
            q.clean(CleanTarget::Completed, Duration::from_secs(3600))
                .await
                .unwrap(),
            0
        );

        sleep(Duration::from_millis(30)).await;
        assert_eq!(
            q.clean(CleanTarget::Completed, Duration::from_millis(1))
                .await
                .unwrap(),
            1
        );

        // The waiting entry is untouched regardless of age.
        assert_eq!(
            q.clean(CleanTarget::Dead, Duration::from_millis(0))
                .await
                .unwrap(),
            0
        );
        assert_eq!(q.stats().await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn backoff_doubles_and_caps() {
        let q_cfg = QueueConfig::default();
        let retry = RetryConfig {
            max_attempts: 5,
            backoff_base_ms: 100,
            backoff_max_ms: 350,
            jitter_ratio: 0.0,
            jitter_min_ms: 0,
        };
        // Pool is not touched by the arithmetic helpers.
        let q = SqliteDispatchQueue {
            pool: SqlitePool::connect_lazy("sqlite::memory:").unwrap(),
            queue_config: q_cfg,
            retry_config: retry,
            paused: AtomicBool::new(false),
        };

        assert_eq!(q.base_delay_ms(0), 0);
        assert_eq!(q.base_delay_ms(1), 100);
        assert_eq!(q.base_delay_ms(2), 200);
        assert_eq!(q.base_delay_ms(3), 350, "capped at backoff_max_ms");
    }

    #[tokio::test]
    async fn jitter_is_deterministic_and_bounded() {
        let retry = RetryConfig {
            max_attempts: 5,
            backoff_base_ms: 100,
            backoff_max_ms: 10_000,
            jitter_ratio: 0.25,
            jitter_min_ms: 10,
        };
        let q = SqliteDispatchQueue {
            pool: SqlitePool::connect_lazy("sqlite::memory:").unwrap(),
            queue_config: QueueConfig::default(),
            retry_config: retry,
            paused: AtomicBool::new(false),
        };

        let a = q.backoff_delay_ms("entry-1", 2);
        let b = q.backoff_delay_ms("entry-1", 2);
        assert_eq!(a, b, "same entry and attempt produce the same delay");

        let anchor = 200u64;
        let span = 50u64; // 25% of anchor
        assert!(a >= anchor - span && a <= anchor + span, "delay {a} outside jitter window");
    }
}
