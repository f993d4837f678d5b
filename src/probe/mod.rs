//! Probe module for network monitoring.
//!
//! Supports TCP connect and HTTP GET probes. The probe kind is picked from
//! the shape of the target address.

mod http;
mod status;
mod tcp;

pub use http::*;
pub use status::*;
pub use tcp::*;

use crate::db::ProbeResult;

use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Hard upper bound on a single probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Connection timeout")]
    ConnectTimeout,
    #[error("Request timeout")]
    RequestTimeout,
    #[error("{0}")]
    Network(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// How a target is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Tcp,
    Http,
}

static HOST_PORT_PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();

fn host_port_patterns() -> &'static [Regex] {
    HOST_PORT_PATTERNS.get_or_init(|| {
        [
            r"^[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}:[0-9]+$",
            r"^localhost:[0-9]+$",
            r"^[A-Za-z0-9_.\-]+:[0-9]+$",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

impl ProbeKind {
    /// Classify a target address.
    ///
    /// Bare `host:port` strings are probed over TCP; anything else is treated
    /// as an HTTP(S) URL. Never touches the network.
    pub fn classify(address: &str) -> Self {
        let address = address.trim();
        if host_port_patterns().iter().any(|re| re.is_match(address)) {
            ProbeKind::Tcp
        } else {
            ProbeKind::Http
        }
    }
}

/// Probe configuration, resolved once when a target is scheduled.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub kind: ProbeKind,
    pub address: String,
    pub timeout: Duration,
}

impl ProbeConfig {
    pub fn new(address: &str) -> Self {
        let address = address.trim();
        Self {
            kind: ProbeKind::classify(address),
            address: address.to_string(),
            timeout: PROBE_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Raw measurement of one probe: elapsed time plus an optional failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl ProbeOutcome {
    /// Classify the outcome and stamp it with the completion time.
    pub fn into_result(self) -> ProbeResult {
        ProbeResult {
            status: classify_status(self.latency_ms, self.error.is_some()),
            latency_ms: self.latency_ms,
            timestamp: Utc::now(),
            error: self.error,
        }
    }
}

/// Runs probes. Holds the shared HTTP client.
#[derive(Clone)]
pub struct Prober {
    client: reqwest::Client,
}

impl Prober {
    pub fn new() -> Result<Self, ProbeError> {
        Ok(Self {
            client: build_http_client()?,
        })
    }

    /// Run a probe with the given configuration.
    ///
    /// Failures are folded into the outcome; this never returns an error.
    pub async fn run(&self, config: &ProbeConfig) -> ProbeOutcome {
        let start = Instant::now();

        let result = match config.kind {
            ProbeKind::Tcp => run_tcp_probe(&config.address, config.timeout).await,
            ProbeKind::Http => run_http_probe(&self.client, &config.address, config.timeout).await,
        };

        settle(&config.address, result, start)
    }
}

/// Fold a probe result into an outcome. Failures report the time spent
/// since `start`.
fn settle(address: &str, result: Result<Duration, ProbeError>, start: Instant) -> ProbeOutcome {
    match result {
        Ok(latency) => ProbeOutcome {
            latency_ms: millis(latency),
            error: None,
        },
        Err(e) => {
            tracing::debug!("Probe failed for {}: {}", address, e);
            ProbeOutcome {
                latency_ms: millis(start.elapsed()),
                error: Some(e.to_string()),
            }
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
