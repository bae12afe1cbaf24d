//! Wall-clock source for throttle timestamps

use std::time::{SystemTime, UNIX_EPOCH};

/// Millisecond clock used to stamp and expire throttles
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Milliseconds since the UNIX epoch
    fn now_millis(&self) -> u64;
}

/// Clock backed by `SystemTime`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "System clock is before UNIX epoch; using 0 for throttle timestamps"
                );
                0
            }
        }
    }
}
