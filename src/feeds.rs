//! Feed adapters
//!
//! Each adapter owns one external source, runs as its own task, and pushes
//! decoded messages onto the shared bounded intake channel. Per-message
//! failures are counted and logged, never propagated.

pub mod aggregator;
pub mod radio;
pub mod stream;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::models::RawAisMessage;

pub use aggregator::AggregatorFeed;
pub use radio::RadioFeed;
pub use stream::StreamFeed;

/// Producer side of the intake channel
pub type IntakeSender = mpsc::Sender<RawAisMessage>;

/// Consecutive connection failures logged at `warn` before dropping to `debug`
const LOUD_RETRY_ATTEMPTS: u32 = 3;

/// Accepted and dropped input counters for one adapter
#[derive(Debug, Default)]
pub struct FeedStats {
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl FeedStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl fmt::Display for FeedStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "accepted={} dropped={}", self.accepted(), self.dropped())
    }
}

/// A running adapter task
pub struct FeedHandle {
    pub name: &'static str,
    pub stats: Arc<FeedStats>,
    pub task: JoinHandle<()>,
}

/// Log a failed connection attempt, quieter once it keeps failing
pub(crate) fn log_connection_failure(feed: &str, attempt: u32, error: &dyn fmt::Display) {
    if attempt <= LOUD_RETRY_ATTEMPTS {
        warn!(feed, attempt, "Feed connection failed: {}", error);
    } else {
        debug!(feed, attempt, "Feed connection failed: {}", error);
    }
}
