//! Detector adapter boundary.
//!
//! The underlying virus-detection capability is a black box reachable
//! through [`Detector`]: one idempotent inspect operation plus a health
//! probe. Connection-level failures (`DetectorUnavailable`) are kept
//! distinct from content-level scan failures (`DetectorError`) so the
//! retry policy can tell infrastructure from input problems.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

pub mod clamd;
pub mod mock;

pub use clamd::ClamdDetector;
pub use mock::{MockDetector, MockOutcome};

/// Result of a single detector pass over one file.
#[derive(Clone, Debug)]
pub struct Inspection {
    pub infected: bool,
    pub threats: Vec<String>,
    pub duration: Duration,
}

impl Inspection {
    pub fn clean(duration: Duration) -> Self {
        Self {
            infected: false,
            threats: Vec::new(),
            duration,
        }
    }

    pub fn infected(threats: Vec<String>, duration: Duration) -> Self {
        Self {
            infected: true,
            threats,
            duration,
        }
    }
}

/// External malware-detection capability.
///
/// Implementations must be safe to call concurrently from multiple
/// workers: no scan session state may leak between calls.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Stable engine identifier, e.g. "clamd".
    fn name(&self) -> &str;

    /// Inspect file content. Idempotent: inspecting the same bytes twice
    /// yields the same verdict.
    async fn inspect(&self, data: &[u8]) -> Result<Inspection>;

    /// Health probe. Never errors; a `false` result resets any cached
    /// connection state so the next call starts fresh.
    async fn ping(&self) -> bool;

    /// Engine/signature version string when the backend exposes one.
    async fn version(&self) -> Option<String>;
}
