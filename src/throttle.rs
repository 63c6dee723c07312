/// The sensor needs about two seconds between conversions; stay a bit above that.
pub const DEFAULT_MIN_INTERVAL_MS: u64 = 2500;

/// Keeps callers from polling the sensor faster than it can convert.
///
/// The decoder itself never refuses a read; this lives on the caller's side.
#[derive(Debug, Clone)]
pub struct ReadThrottle {
    min_interval_ms: u64,
    last: Option<u64>,
}

impl Default for ReadThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL_MS)
    }
}

impl ReadThrottle {
    pub const fn new(min_interval_ms: u64) -> Self {
        ReadThrottle {
            min_interval_ms,
            last: None,
        }
    }

    /// Returns `true` and records `now_ms` when a read is due.
    pub fn poll(&mut self, now_ms: u64) -> bool {
        if self.remaining(now_ms) > 0 {
            return false;
        }
        self.last = Some(now_ms);
        true
    }

    /// Milliseconds until the next read is due, zero if it is due now.
    pub fn remaining(&self, now_ms: u64) -> u64 {
        match self.last {
            None => 0,
            Some(last) => self
                .min_interval_ms
                .saturating_sub(now_ms.wrapping_sub(last)),
        }
    }
}
