//! Wires the controller, relay, receiver and log buffer together in one
//! process.

use std::sync::Arc;

use policy::PresetCatalog;
use storage::{LogRecord, Store};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::buffer::LogBuffer;
use crate::cache::PolicyCache;
use crate::channel::{Envelope, Mailbox, PolicyReceiver, Relay};
use crate::config::RuntimeConfig;
use crate::controller::Controller;
use crate::engine::Enforcer;
use crate::Result;

/// A running ScriptGuard instance. Must be started inside a tokio runtime.
pub struct Host {
    controller: Arc<Controller>,
    cache: PolicyCache,
    relay_tx: mpsc::UnboundedSender<Envelope>,
    buffer: LogBuffer,
    events: broadcast::Sender<LogRecord>,
    stop_relay: oneshot::Sender<()>,
    relay_task: JoinHandle<()>,
    receiver_task: JoinHandle<()>,
}

impl Host {
    pub fn start(store: Arc<Store>, config: &RuntimeConfig, presets: PresetCatalog) -> Result<Self> {
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();
        let (content_tx, content_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.channel.events_capacity.max(1));

        let controller = Arc::new(Controller::open(
            store.clone(),
            Arc::new(relay_tx.clone()),
            presets,
        )?);
        let buffer = LogBuffer::new(store, config.buffer.clone());
        let relay = Relay::new(
            controller.clone(),
            Arc::new(content_tx),
            buffer.clone(),
            events.clone(),
        );

        let cache = PolicyCache::new();
        let receiver = PolicyReceiver::new(
            cache.clone(),
            Arc::new(relay_tx.clone()),
            config.channel.clone(),
        );

        let (stop_relay, stop_rx) = oneshot::channel();
        let relay_task = relay.spawn_until(relay_rx, stop_rx);
        let receiver_task = receiver.spawn(content_rx);
        tracing::info!("scriptguard host started");

        Ok(Self {
            controller,
            cache,
            relay_tx,
            buffer,
            events,
            stop_relay,
            relay_task,
            receiver_task,
        })
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    pub fn cache(&self) -> &PolicyCache {
        &self.cache
    }

    /// A decision point for `origin`, posting its logs through the relay.
    pub fn enforcer(&self, origin: &str) -> Enforcer {
        let mailbox: Arc<dyn Mailbox> = Arc::new(self.relay_tx.clone());
        Enforcer::new(origin, self.cache.clone(), mailbox)
    }

    /// Outbound decision events. Display only; slow subscribers lag.
    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.events.subscribe()
    }

    pub fn buffer(&self) -> &LogBuffer {
        &self.buffer
    }

    /// Wait until the enforcement cache holds at least `version`.
    pub async fn wait_for_version(&self, version: u64) {
        let mut rx = self.cache.subscribe();
        // The sender lives in the cache we hold, so this only ends on success.
        let _ = rx.wait_for(|applied| *applied >= version).await;
    }

    /// Wait for the first snapshot to reach the enforcement side.
    pub async fn synced(&self) {
        self.wait_for_version(1).await;
    }

    /// Stop the background tasks and persist every decision made so far.
    ///
    /// The relay routes whatever is still in its inbox before stopping, so
    /// logs posted by enforcers before this call reach the buffer, which is
    /// then flushed. Later posts fail with [`ChannelError::Closed`].
    ///
    /// [`ChannelError::Closed`]: crate::ChannelError::Closed
    pub async fn shutdown(self) {
        let _ = self.stop_relay.send(());
        if let Err(e) = self.relay_task.await {
            tracing::warn!(error = %e, "relay task failed");
        }
        self.receiver_task.abort();
        let written = self.buffer.flush_now();
        tracing::info!(flushed = written, "scriptguard host stopped");
    }
}
