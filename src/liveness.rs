use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// Zero marks "never recorded"; a real publish can't land on the epoch.
const NEVER: u64 = 0;

/// Health of the bridge as seen from the last successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessStatus {
    Uninitialized,
    Healthy { age: Duration },
    Stale { age: Duration },
}

impl LivenessStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, LivenessStatus::Healthy { .. })
    }
}

/// Thread-safe record of when the poll loop last published successfully.
///
/// The poll loop is the only writer; the health endpoint only reads. The time
/// is stored as epoch milliseconds in a single atomic so neither side ever
/// waits on the other.
#[derive(Debug, Default)]
pub struct LivenessTracker {
    last_success_millis: AtomicU64,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, now: SystemTime) {
        let millis = epoch_millis(now).max(1);
        self.last_success_millis.store(millis, Ordering::Release);
    }

    pub fn last_success(&self) -> Option<SystemTime> {
        match self.last_success_millis.load(Ordering::Acquire) {
            NEVER => None,
            millis => Some(UNIX_EPOCH + Duration::from_millis(millis)),
        }
    }

    pub fn status(&self, now: SystemTime, threshold: Duration) -> LivenessStatus {
        let Some(last_success) = self.last_success() else {
            return LivenessStatus::Uninitialized;
        };

        // A wall clock stepping backwards counts as "just now"
        let age = now.duration_since(last_success).unwrap_or_default();
        if age <= threshold {
            LivenessStatus::Healthy { age }
        } else {
            LivenessStatus::Stale { age }
        }
    }
}

/// Staleness threshold actually enforced for a given poll interval.
///
/// Polling slower than the nominal threshold would make every gap between two
/// cycles look like an outage, so the threshold then widens to three intervals.
pub fn effective_threshold(nominal: Duration, poll_interval: Duration) -> Duration {
    if poll_interval > nominal {
        poll_interval * 3
    } else {
        nominal
    }
}

fn epoch_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(NEVER)
}
