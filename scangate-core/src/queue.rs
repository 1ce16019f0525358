//! Durable dispatch queue decoupling job creation from job execution.
//!
//! Delivery is at-least-once: a leased entry that is neither settled nor
//! renewed before its lease expires is considered stalled and redelivered.
//! Consumers compensate with the store's fenced transitions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::job::JobId;

pub mod sqlite;

pub use sqlite::SqliteDispatchQueue;

/// Unique identifier for queue entries.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct QueueEntryId(pub Uuid);

impl Default for QueueEntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueEntryId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for QueueEntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier minted per delivery; the lease table is the sole arbiter of
/// entry ownership.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct LeaseId(pub Uuid);

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaseId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Options supplied on enqueue.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct EnqueueOptions {
    /// Higher priorities are served first; clamped to the job band.
    pub priority: i64,
    /// Entry is not eligible for delivery before `now + delay`.
    pub delay: Option<Duration>,
}

/// Lease metadata returned when a worker claims an entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueLease {
    pub lease_id: LeaseId,
    pub entry_id: QueueEntryId,
    pub job_id: JobId,
    pub stored_ref: String,
    /// Delivery attempt number, 1-based, counted at claim time.
    pub deliveries: u32,
    pub expires_at: DateTime<Utc>,
}

/// Aggregate entry counts for observability and the exposed stats call.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
    pub delayed: u64,
}

/// Entry states eligible for housekeeping pruning. Waiting and leased
/// entries are never prunable.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanTarget {
    Completed,
    Dead,
}

impl CleanTarget {
    pub fn as_state(&self) -> &'static str {
        match self {
            CleanTarget::Completed => "completed",
            CleanTarget::Dead => "dead",
        }
    }
}

/// Abstraction over the durable queue backend consumed by producers and
/// the worker pool.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Insert a delivery reference for a job. Entries survive restarts.
    async fn enqueue(
        &self,
        job_id: JobId,
        stored_ref: &str,
        options: EnqueueOptions,
    ) -> Result<QueueEntryId>;

    /// Claim the next eligible entry: highest priority first, FIFO within
    /// a band, honoring per-entry availability. Returns `None` when
    /// nothing is eligible or delivery is paused.
    async fn lease(&self, worker_id: &str, ttl: Duration) -> Result<Option<QueueLease>>;

    /// Heartbeat for long-running work; returns the new expiry. Fails
    /// with `NotFound` once the lease has expired or been reassigned.
    async fn renew(&self, lease_id: LeaseId, extend_by: Duration) -> Result<DateTime<Utc>>;

    /// Settle a delivered entry successfully.
    async fn complete(&self, lease_id: LeaseId) -> Result<()>;

    /// Report a failed delivery. Retryable failures with deliveries left
    /// are rescheduled with exponential backoff; everything else moves to
    /// the dead set and is never redelivered.
    async fn fail(&self, lease_id: LeaseId, retryable: bool, error: Option<String>) -> Result<()>;

    /// Remove a job's waiting entry, if any. Leased entries are left for
    /// their worker to settle.
    async fn cancel_entry(&self, job_id: JobId) -> Result<bool>;

    /// Best-effort count of waiting entries ahead of the job's entry.
    /// Not authoritative under concurrent mutation.
    async fn position(&self, job_id: JobId) -> Result<Option<u64>>;

    async fn stats(&self) -> Result<QueueStats>;

    /// Housekeeping: return expired leases to the waiting set (or the
    /// dead set once deliveries are spent). Returns resurrected count.
    async fn reap_expired(&self) -> Result<u64>;

    /// Stop handing out leases. Entries are retained.
    fn pause(&self);

    /// Resume delivery.
    fn resume(&self);

    fn is_paused(&self) -> bool;

    /// Prune settled entries older than `max_age`. Waiting and leased
    /// entries are never touched.
    async fn clean(&self, target: CleanTarget, max_age: Duration) -> Result<u64>;

    /// Cheap reachability probe; never errors.
    async fn ping(&self) -> bool;
}
