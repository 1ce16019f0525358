//! Job lifecycle model: identifiers, status machine, and scan outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Result, ScanGateError};

/// Priority values accepted from producers are clamped into this band.
pub const MIN_PRIORITY: u8 = 0;
pub const MAX_PRIORITY: u8 = 10;

/// Unique identifier for scan jobs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|e| ScanGateError::Internal(format!("malformed job id {raw}: {e}")))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states. Status is mutated only through the store's guarded
/// transitions; the enum encodes which edges exist.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(ScanGateError::Internal(format!(
                "unknown job status value {other}"
            ))),
        }
    }

    /// `failed` is terminal only once attempts are exhausted, which the
    /// store tracks per row; everything else here is unconditional.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Cancelled)
    }

    /// Transition table enforced jointly by producer and consumer.
    /// `Pending -> Failed` exists for enqueue rollback: a job whose queue
    /// handoff failed must never be left observable as `pending`.
    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        matches!(
            (from, to),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Pending, JobStatus::Cancelled)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Cancelled)
                | (JobStatus::Failed, JobStatus::Processing)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse progress stage derived from status for status reporting.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Queued,
    Scanning,
    Complete,
}

impl From<JobStatus> for JobStage {
    fn from(status: JobStatus) -> Self {
        match status {
            JobStatus::Pending => JobStage::Queued,
            JobStatus::Processing => JobStage::Scanning,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => JobStage::Complete,
        }
    }
}

/// Durable job record. Source of truth for status lives in the store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub original_name: String,
    pub stored_ref: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub checksum: Option<String>,
    pub status: JobStatus,
    pub priority: u8,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// A failed job with attempts left is eligible for redelivery.
    pub fn is_retryable(&self) -> bool {
        self.status == JobStatus::Failed && self.attempts < self.max_attempts
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Producer-side input for job creation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NewJob {
    pub original_name: String,
    pub stored_ref: String,
    pub size_bytes: i64,
    pub content_type: String,
    pub checksum: Option<String>,
    pub priority: i64,
    pub max_attempts: u32,
}

impl NewJob {
    pub fn clamped_priority(&self) -> u8 {
        self.priority.clamp(i64::from(MIN_PRIORITY), i64::from(MAX_PRIORITY)) as u8
    }
}

/// Classification of a finished detector pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanVerdict {
    Clean,
    Infected,
    Error,
}

impl ScanVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanVerdict::Clean => "clean",
            ScanVerdict::Infected => "infected",
            ScanVerdict::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "clean" => Ok(ScanVerdict::Clean),
            "infected" => Ok(ScanVerdict::Infected),
            "error" => Ok(ScanVerdict::Error),
            other => Err(ScanGateError::Internal(format!(
                "unknown scan verdict value {other}"
            ))),
        }
    }
}

/// Threat details attached to an infected outcome.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreatReport {
    pub name: String,
    pub category: Option<String>,
    pub description: Option<String>,
}

/// What a worker persists when a scan finishes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub verdict: ScanVerdict,
    pub threat: Option<ThreatReport>,
    pub engine_version: Option<String>,
    pub signature_version: Option<String>,
    pub scan_duration_ms: i64,
}

impl ScanOutcome {
    pub fn clean(duration_ms: i64) -> Self {
        Self {
            verdict: ScanVerdict::Clean,
            threat: None,
            engine_version: None,
            signature_version: None,
            scan_duration_ms: duration_ms,
        }
    }

    pub fn infected(threat: ThreatReport, duration_ms: i64) -> Self {
        Self {
            verdict: ScanVerdict::Infected,
            threat: Some(threat),
            engine_version: None,
            signature_version: None,
            scan_duration_ms: duration_ms,
        }
    }

    pub fn is_infected(&self) -> bool {
        self.verdict == ScanVerdict::Infected
    }
}

/// Persisted scan result row; exists iff the owning job completed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScanResultRecord {
    pub job_id: JobId,
    pub verdict: ScanVerdict,
    pub infected: bool,
    pub threat_name: Option<String>,
    pub threat_category: Option<String>,
    pub threat_description: Option<String>,
    pub engine_version: Option<String>,
    pub signature_version: Option<String>,
    pub scan_duration_ms: i64,
    pub scanned_at: DateTime<Utc>,
}

/// Join row returned by the infected listing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InfectedReport {
    pub job_id: JobId,
    pub original_name: String,
    pub stored_ref: String,
    pub size_bytes: i64,
    pub threat_name: Option<String>,
    pub threat_category: Option<String>,
    pub scanned_at: DateTime<Utc>,
}
