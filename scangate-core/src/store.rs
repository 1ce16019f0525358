//! Durable job storage: source of truth for job status and scan results.

use async_trait::async_trait;

use crate::error::Result;
use crate::job::{
    InfectedReport, Job, JobId, JobStatus, NewJob, ScanOutcome, ScanResultRecord,
};

pub mod sqlite;

pub use sqlite::SqliteJobStore;

/// Outcome of the fenced terminal transition.
///
/// `AlreadySettled` means another delivery (or a cancellation) won the
/// fence first; the caller's work is discarded without side effects.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompletionStatus {
    Completed,
    AlreadySettled,
}

/// Repository abstraction for durable job storage.
///
/// Status is never written directly: every mutation goes through
/// [`JobStore::transition`] or [`JobStore::complete_with_result`], whose
/// guarded updates enforce the lifecycle edges and the
/// `attempts <= max_attempts` invariant.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job in `pending` status. Fails with
    /// `ScanGateError::Validation` when required fields are missing.
    async fn create_job(&self, new_job: NewJob) -> Result<Job>;

    /// Fetch a job, failing with `NotFound` when the id is unknown.
    async fn job(&self, id: JobId) -> Result<Job>;

    async fn find_job(&self, id: JobId) -> Result<Option<Job>>;

    /// Apply one lifecycle transition. Entering `processing` atomically
    /// increments `attempts` (fenced so a duplicate delivery within one
    /// lease cannot double-increment) and sets `started_at` once.
    /// Entering a terminal state stamps `completed_at`; for `failed` the
    /// stamp is applied only when attempts are exhausted, leaving the job
    /// eligible for redelivery otherwise.
    async fn transition(
        &self,
        id: JobId,
        to: JobStatus,
        error: Option<String>,
    ) -> Result<Job>;

    /// Persist the scan result and transition the job to `completed` in
    /// one transaction. The conditional status flip decides the single
    /// writer of the result row; losers observe `AlreadySettled`.
    async fn complete_with_result(
        &self,
        id: JobId,
        outcome: ScanOutcome,
    ) -> Result<CompletionStatus>;

    async fn scan_result(&self, id: JobId) -> Result<Option<ScanResultRecord>>;

    /// Pending jobs, highest priority first, FIFO within a band.
    async fn list_pending(&self, limit: u32) -> Result<Vec<Job>>;

    /// Failed jobs with attempts left, oldest update first.
    async fn list_retryable(&self, limit: u32) -> Result<Vec<Job>>;

    /// Paginated infected results, newest scan first. Returns the page
    /// rows plus the total infected count.
    async fn list_infected(&self, page: u32, page_size: u32) -> Result<(Vec<InfectedReport>, u64)>;

    /// Cheap reachability probe; never errors.
    async fn ping(&self) -> bool;
}
