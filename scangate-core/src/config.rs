//! Tuning knobs for the scanning pipeline.
//!
//! All sections carry defaults so deployments can adopt individual knobs
//! without supplying a full configuration payload.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration consumed by the daemon.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScanGateConfig {
    /// Database location and pool sizing.
    pub database: DatabaseConfig,
    /// On-disk file storage root.
    pub storage: StorageConfig,
    /// Detector daemon endpoint and limits.
    pub detector: DetectorConfig,
    /// Queue delivery limits.
    pub queue: QueueConfig,
    /// Retry/backoff policy shared by queue redelivery.
    pub retry: RetryConfig,
    /// Lease defaults (TTL, renewal thresholds, housekeeping cadence).
    pub lease: LeaseConfig,
    /// Worker pool sizing and throughput caps.
    pub worker: WorkerConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path of the SQLite database file.
    pub path: PathBuf,
    /// Maximum pooled connections.
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("scangate.db"),
            max_connections: 8,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for content-addressed file storage.
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("uploads"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Path to the clamd Unix socket. Ignored when `tcp_addr` is set.
    pub socket_path: Option<PathBuf>,
    /// TCP endpoint (host:port) of the clamd daemon.
    pub tcp_addr: Option<String>,
    /// Connection establishment timeout (ms).
    pub connect_timeout_ms: u64,
    /// Per-scan timeout (ms). Must stay well under the queue lease TTL.
    pub scan_timeout_ms: u64,
    /// Maximum file size handed to the detector, in bytes.
    pub max_file_size: u64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            socket_path: Some(PathBuf::from("/var/run/clamav/clamd.sock")),
            tcp_addr: None,
            connect_timeout_ms: 10_000,
            scan_timeout_ms: 120_000,
            max_file_size: 100 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Delivery attempts per entry before it is moved to the dead set.
    pub max_deliveries: u32,
    /// Priority assigned when a producer does not supply one.
    pub default_priority: u8,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_deliveries: 3,
            default_priority: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Default attempt budget stamped onto new jobs.
    pub max_attempts: u32,
    /// First redelivery delay; doubles per attempt.
    pub backoff_base_ms: u64,
    /// Ceiling for any computed delay.
    pub backoff_max_ms: u64,
    /// Percentage-based jitter to spread out retries.
    pub jitter_ratio: f32,
    /// Minimum jitter in milliseconds so short delays still spread a bit.
    pub jitter_min_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 2_000,
            backoff_max_ms: 5 * 60 * 1_000,
            jitter_ratio: 0.25,
            jitter_min_ms: 250,
        }
    }
}

/// Lease/heartbeat tuning for worker tasks.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Default TTL for queue leases (seconds). Must exceed the worst-case
    /// scan duration or renewal has to carry the difference.
    pub lease_ttl_secs: i64,
    /// Renew when remaining TTL drops below this fraction of the original TTL.
    pub renew_at_fraction: f32,
    /// Minimum margin before expiry to trigger a renewal regardless of fraction (ms).
    pub renew_min_margin_ms: u64,
    /// Housekeeping cadence for reclaiming expired leases (ms).
    pub housekeeper_interval_ms: u64,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_ttl_secs: 60,
            renew_at_fraction: 0.5,
            renew_min_margin_ms: 2_000,
            housekeeper_interval_ms: 15_000,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Concurrent worker tasks pulling from the queue.
    pub concurrency: usize,
    /// Per-worker cap on lease acquisitions per second; bounds detector
    /// load independently of concurrency. Zero disables the throttle.
    pub leases_per_second: u32,
    /// Sleep between polls when the queue is empty (ms).
    pub idle_poll_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            leases_per_second: 10,
            idle_poll_ms: 250,
        }
    }
}
