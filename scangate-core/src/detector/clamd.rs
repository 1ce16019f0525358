//! clamd scanning backend.
//!
//! Speaks the clamd socket protocol (Unix socket or TCP): `zINSTREAM\0`
//! for content scanning, `zPING\0`/`zVERSION\0` for health and version.
//! Each scan runs over its own stream; the cached piece is the
//! initialized session state, which is invalidated whenever the daemon
//! stops answering and transparently re-established once before
//! unavailability is surfaced to the caller.

use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::DetectorConfig;
use crate::detector::{Detector, Inspection};
use crate::error::{Result, ScanGateError};

const INSTREAM_CHUNK: usize = 8192;

#[derive(Clone, Debug)]
struct Session {
    version: Option<String>,
}

/// Detector adapter for a running clamd daemon.
#[derive(Debug)]
pub struct ClamdDetector {
    config: DetectorConfig,
    session: Mutex<Option<Session>>,
}

enum ClamdStream {
    #[cfg(unix)]
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl ClamdStream {
    async fn write_all(&mut self, data: &[u8]) -> std::io::Result<()> {
        match self {
            #[cfg(unix)]
            ClamdStream::Unix(stream) => stream.write_all(data).await,
            ClamdStream::Tcp(stream) => stream.write_all(data).await,
        }
    }

    async fn read_to_string(&mut self) -> std::io::Result<String> {
        let mut response = String::new();
        match self {
            #[cfg(unix)]
            ClamdStream::Unix(stream) => {
                stream.read_to_string(&mut response).await?;
            }
            ClamdStream::Tcp(stream) => {
                stream.read_to_string(&mut response).await?;
            }
        }
        Ok(response)
    }
}

impl ClamdDetector {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        if config.socket_path.is_none() && config.tcp_addr.is_none() {
            return Err(ScanGateError::Validation(
                "detector needs either socket_path or tcp_addr".into(),
            ));
        }
        Ok(Self {
            config,
            session: Mutex::new(None),
        })
    }

    async fn connect(&self) -> Result<ClamdStream> {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);

        if let Some(addr) = &self.config.tcp_addr {
            let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| {
                    ScanGateError::DetectorUnavailable(format!("connect to {addr} timed out"))
                })?
                .map_err(|e| {
                    ScanGateError::DetectorUnavailable(format!("connect to {addr} failed: {e}"))
                })?;
            return Ok(ClamdStream::Tcp(stream));
        }

        #[cfg(unix)]
        if let Some(path) = &self.config.socket_path {
            let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
                .await
                .map_err(|_| {
                    ScanGateError::DetectorUnavailable(format!(
                        "connect to {} timed out",
                        path.display()
                    ))
                })?
                .map_err(|e| {
                    ScanGateError::DetectorUnavailable(format!(
                        "connect to {} failed: {e}",
                        path.display()
                    ))
                })?;
            return Ok(ClamdStream::Unix(stream));
        }

        Err(ScanGateError::DetectorUnavailable(
            "no usable detector endpoint on this platform".into(),
        ))
    }

    /// Run one command over a fresh stream and collect the full reply.
    async fn command(&self, command: &[u8]) -> Result<String> {
        let mut stream = self.connect().await?;
        let io = async {
            stream.write_all(command).await?;
            stream.read_to_string().await
        };
        tokio::time::timeout(Duration::from_millis(self.config.scan_timeout_ms), io)
            .await
            .map_err(|_| ScanGateError::DetectorUnavailable("detector command timed out".into()))?
            .map_err(|e| ScanGateError::DetectorUnavailable(format!("detector io failed: {e}")))
    }

    /// Stream file content through INSTREAM: length-prefixed chunks,
    /// terminated by a zero-length chunk.
    async fn instream(&self, data: &[u8]) -> Result<String> {
        let mut stream = self.connect().await?;
        let io = async {
            stream.write_all(b"zINSTREAM\0").await?;
            for chunk in data.chunks(INSTREAM_CHUNK) {
                stream.write_all(&(chunk.len() as u32).to_be_bytes()).await?;
                stream.write_all(chunk).await?;
            }
            stream.write_all(&0u32.to_be_bytes()).await?;
            stream.read_to_string().await
        };
        tokio::time::timeout(Duration::from_millis(self.config.scan_timeout_ms), io)
            .await
            .map_err(|_| ScanGateError::DetectorUnavailable("detector scan timed out".into()))?
            .map_err(|e| ScanGateError::DetectorUnavailable(format!("detector io failed: {e}")))
    }

    /// Lazily establish the cached session, verifying the daemon answers.
    async fn ensure_session(&self) -> Result<()> {
        let mut guard = self.session.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let reply = self.command(b"zPING\0").await?;
        if reply.trim_end_matches('\0').trim() != "PONG" {
            return Err(ScanGateError::DetectorUnavailable(format!(
                "unexpected ping reply: {}",
                reply.trim()
            )));
        }

        let version = match self.command(b"zVERSION\0").await {
            Ok(raw) => {
                let v = raw.trim_end_matches('\0').trim().to_string();
                (!v.is_empty()).then_some(v)
            }
            Err(_) => None,
        };

        debug!(version = version.as_deref().unwrap_or("unknown"), "detector session established");
        *guard = Some(Session { version });
        Ok(())
    }

    async fn invalidate_session(&self) {
        let mut guard = self.session.lock().await;
        *guard = None;
    }

    /// Map a raw clamd reply to a verdict. Content-level failures become
    /// `DetectorError`; only transport problems count as unavailability.
    fn parse_response(response: &str) -> Result<(bool, Vec<String>)> {
        let response = response.trim_end_matches('\0').trim();

        if response.ends_with("OK") {
            return Ok((false, Vec::new()));
        }

        if response.contains("FOUND") {
            let threats: Vec<String> = response
                .lines()
                .filter(|line| line.contains("FOUND"))
                .filter_map(|line| {
                    line.split(':')
                        .nth(1)
                        .and_then(|s| s.trim().strip_suffix("FOUND"))
                        .map(|s| s.trim().to_string())
                })
                .filter(|name| !name.is_empty())
                .collect();
            if threats.is_empty() {
                return Ok((true, vec!["Unknown".to_string()]));
            }
            return Ok((true, threats));
        }

        if response.contains("ERROR") {
            return Err(ScanGateError::DetectorError(response.to_string()));
        }

        Err(ScanGateError::DetectorError(format!(
            "unexpected detector response: {response}"
        )))
    }
}

#[async_trait]
impl Detector for ClamdDetector {
    fn name(&self) -> &str {
        "clamd"
    }

    async fn inspect(&self, data: &[u8]) -> Result<Inspection> {
        if data.len() as u64 > self.config.max_file_size {
            return Err(ScanGateError::DetectorError(format!(
                "file size {} exceeds detector limit {}",
                data.len(),
                self.config.max_file_size
            )));
        }

        let start = Instant::now();
        let mut last_unavailable = None;

        // One transparent re-initialization before unavailability surfaces.
        for attempt in 0..2 {
            match self.ensure_session().await {
                Ok(()) => {}
                Err(err @ ScanGateError::DetectorUnavailable(_)) => {
                    self.invalidate_session().await;
                    last_unavailable = Some(err);
                    continue;
                }
                Err(err) => return Err(err),
            }

            match self.instream(data).await {
                Ok(reply) => {
                    let (infected, threats) = Self::parse_response(&reply)?;
                    return Ok(Inspection {
                        infected,
                        threats,
                        duration: start.elapsed(),
                    });
                }
                Err(err @ ScanGateError::DetectorUnavailable(_)) => {
                    warn!(attempt, error = %err, "detector connection lost, re-initializing");
                    self.invalidate_session().await;
                    last_unavailable = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_unavailable
            .unwrap_or_else(|| ScanGateError::DetectorUnavailable("detector unreachable".into())))
    }

    async fn ping(&self) -> bool {
        match self.command(b"zPING\0").await {
            Ok(reply) if reply.trim_end_matches('\0').trim() == "PONG" => true,
            _ => {
                // Failed probes reset cached state so the next inspect
                // starts from a fresh connection.
                self.invalidate_session().await;
                false
            }
        }
    }

    async fn version(&self) -> Option<String> {
        if let Some(session) = self.session.lock().await.as_ref() {
            if session.version.is_some() {
                return session.version.clone();
            }
        }
        match self.command(b"zVERSION\0").await {
            Ok(raw) => {
                let v = raw.trim_end_matches('\0').trim().to_string();
                (!v.is_empty()).then_some(v)
            }
            Err(_) => None,
        }
    }
}
