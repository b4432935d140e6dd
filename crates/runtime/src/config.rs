//! Runtime tuning knobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Log ingestion buffer settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Delay between the first enqueue and the batched write.
    pub flush_interval_ms: u64,
    /// Maximum unflushed records; the oldest are dropped beyond this.
    pub queue_capacity: usize,
    /// Maximum persisted records after a flush.
    pub max_retained: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 500,
            queue_capacity: 500,
            max_retained: storage::MAX_LOGS,
        }
    }
}

impl BufferConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Propagation channel settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// How long the enforcement side waits for a snapshot before asking again.
    pub resync_timeout_ms: u64,
    /// Upper bound on sync requests sent while unsynced.
    pub max_resync_attempts: u32,
    /// Capacity of the outbound decision event broadcast.
    pub events_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            resync_timeout_ms: 750,
            max_resync_attempts: 5,
            events_capacity: 256,
        }
    }
}

impl ChannelConfig {
    pub fn resync_timeout(&self) -> Duration {
        Duration::from_millis(self.resync_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub buffer: BufferConfig,
    pub channel: ChannelConfig,
}
