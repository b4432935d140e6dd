//! Batched persistence of decision logs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use storage::{LogRecord, Store};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::config::BufferConfig;

/// Destination of flushed batches.
pub trait LogSink: Send + Sync {
    /// Persist `records` (oldest first) and keep at most `retain` in total.
    /// Returns how many older records were evicted.
    fn write_batch(&self, records: &[LogRecord], retain: usize) -> storage::Result<usize>;
}

impl LogSink for Store {
    fn write_batch(&self, records: &[LogRecord], retain: usize) -> storage::Result<usize> {
        self.append_logs(records, retain)
    }
}

/// Bounded in-memory queue in front of a [`LogSink`].
///
/// The first enqueue arms a single flush timer; the flush writes the whole
/// queue as one batch. When the queue is full the oldest entry is dropped.
/// Sink failures are logged and the batch is lost.
#[derive(Clone)]
pub struct LogBuffer {
    inner: Arc<Inner>,
}

struct Inner {
    sink: Arc<dyn LogSink>,
    config: BufferConfig,
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    queue: VecDeque<LogRecord>,
    timer: Option<JoinHandle<()>>,
    dropped: u64,
}

impl LogBuffer {
    pub fn new(sink: Arc<dyn LogSink>, config: BufferConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink,
                config,
                state: Mutex::new(State::default()),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn capacity(&self) -> usize {
        self.inner.config.queue_capacity.max(1)
    }

    pub fn enqueue(&self, record: LogRecord) {
        let mut state = self.state();
        if state.queue.len() >= self.capacity() {
            state.queue.pop_front();
            state.dropped += 1;
            tracing::debug!(dropped = state.dropped, "log queue full, dropped oldest record");
        }
        state.queue.push_back(record);

        if state.timer.is_some() {
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                let buffer = self.clone();
                let interval = self.inner.config.flush_interval();
                state.timer = Some(handle.spawn(async move {
                    tokio::time::sleep(interval).await;
                    buffer.flush(false);
                }));
            }
            Err(_) => {
                drop(state);
                self.flush(true);
            }
        }
    }

    /// Write everything queued now and disarm the timer. Returns the number
    /// of records handed to the sink.
    pub fn flush_now(&self) -> usize {
        self.flush(true)
    }

    fn flush(&self, cancel_timer: bool) -> usize {
        let (batch, timer) = {
            let mut state = self.state();
            let batch: Vec<LogRecord> = state.queue.drain(..).collect();
            (batch, state.timer.take())
        };
        if cancel_timer {
            if let Some(timer) = timer {
                timer.abort();
            }
        }
        if batch.is_empty() {
            return 0;
        }

        match self
            .inner
            .sink
            .write_batch(&batch, self.inner.config.max_retained)
        {
            Ok(evicted) => {
                tracing::debug!(written = batch.len(), evicted, "flushed decision logs");
            }
            Err(e) => {
                tracing::warn!(error = %e, lost = batch.len(), "failed to persist decision logs");
            }
        }
        batch.len()
    }

    pub fn pending(&self) -> usize {
        self.state().queue.len()
    }

    /// Records dropped from a full queue since creation.
    pub fn dropped(&self) -> u64 {
        self.state().dropped
    }

    pub fn is_armed(&self) -> bool {
        self.state().timer.is_some()
    }
}
