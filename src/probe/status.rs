//! Latency-based status classification.

use crate::db::Status;

/// Successful probes slower than this are reported as slow.
pub const SLOW_THRESHOLD_MS: u64 = 1000;

/// Map a probe's latency and failure flag to a status.
pub fn classify_status(latency_ms: u64, has_error: bool) -> Status {
    if has_error {
        Status::Down
    } else if latency_ms > SLOW_THRESHOLD_MS {
        Status::Slow
    } else {
        Status::Healthy
    }
}
