//! Configurable mock detector for tests.
//!
//! Simulates scan outcomes without a running daemon: a default outcome,
//! an optional scripted sequence consumed one call at a time (for
//! fail-then-recover scenarios), simulated latency, and call counters.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::detector::{Detector, Inspection};
use crate::error::{Result, ScanGateError};

/// Outcome the mock produces for one inspect call.
#[derive(Clone, Debug)]
pub enum MockOutcome {
    Clean,
    Infected(Vec<String>),
    Unavailable,
    ScanError(String),
}

#[derive(Debug)]
pub struct MockDetector {
    name: String,
    default_outcome: MockOutcome,
    script: Mutex<VecDeque<MockOutcome>>,
    latency: Option<Duration>,
    healthy: AtomicBool,
    inspections: AtomicU64,
}

impl Default for MockDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDetector {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            default_outcome: MockOutcome::Clean,
            script: Mutex::new(VecDeque::new()),
            latency: None,
            healthy: AtomicBool::new(true),
            inspections: AtomicU64::new(0),
        }
    }

    /// Mock that reports every file clean.
    pub fn clean() -> Self {
        Self::new()
    }

    /// Mock that reports every file infected with the given threats.
    pub fn infected(threats: Vec<String>) -> Self {
        Self {
            default_outcome: MockOutcome::Infected(threats),
            ..Self::new()
        }
    }

    pub fn with_default_outcome(mut self, outcome: MockOutcome) -> Self {
        self.default_outcome = outcome;
        self
    }

    /// Queue outcomes consumed in order before falling back to the
    /// default, e.g. two `Unavailable` followed by the default `Clean`.
    pub fn with_script(self, outcomes: Vec<MockOutcome>) -> Self {
        {
            let mut script = self.script.lock().unwrap();
            script.extend(outcomes);
        }
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Number of inspect calls performed.
    pub fn inspections(&self) -> u64 {
        self.inspections.load(Ordering::SeqCst)
    }

    fn next_outcome(&self) -> MockOutcome {
        let mut script = self.script.lock().unwrap();
        script
            .pop_front()
            .unwrap_or_else(|| self.default_outcome.clone())
    }
}

#[async_trait]
impl Detector for MockDetector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn inspect(&self, _data: &[u8]) -> Result<Inspection> {
        self.inspections.fetch_add(1, Ordering::SeqCst);
        let start = Instant::now();

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match self.next_outcome() {
            MockOutcome::Clean => Ok(Inspection::clean(start.elapsed())),
            MockOutcome::Infected(threats) => Ok(Inspection::infected(threats, start.elapsed())),
            MockOutcome::Unavailable => Err(ScanGateError::DetectorUnavailable(
                "mock daemon refused connection".into(),
            )),
            MockOutcome::ScanError(reason) => Err(ScanGateError::DetectorError(reason)),
        }
    }

    async fn ping(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }

    async fn version(&self) -> Option<String> {
        Some("MockEngine 0.1".to_string())
    }
}
