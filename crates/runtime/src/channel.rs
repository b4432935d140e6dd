//! Message passing between the privileged context, the relay and the
//! enforcement context.
//!
//! ```text
//! Controller ──policySync──▶ Relay ──policySync──▶ PolicyReceiver ─▶ PolicyCache
//!                 ▲            │ ▲                        │
//!                 └─snapshot───┘ └──syncRequest / log─────┘ (Enforcer)
//!                              │
//!                              └─▶ LogBuffer, decision events
//! ```
//!
//! Delivery is best-effort and at-most-once. A receiver that misses a push
//! recovers by asking for a snapshot.

use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use storage::LogRecord;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::buffer::LogBuffer;
use crate::cache::{PolicyCache, PolicySnapshot};
use crate::config::ChannelConfig;

/// A message on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum Envelope {
    PolicySync(PolicySnapshot),
    SyncRequest,
    Log(LogRecord),
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChannelError {
    /// The other end has gone away.
    #[error("channel closed")]
    Closed,
}

/// Non-blocking, fire-and-forget delivery.
pub trait Mailbox: Send + Sync {
    fn post(&self, envelope: Envelope) -> Result<(), ChannelError>;
}

impl Mailbox for mpsc::UnboundedSender<Envelope> {
    fn post(&self, envelope: Envelope) -> Result<(), ChannelError> {
        self.send(envelope).map_err(|_| ChannelError::Closed)
    }
}

/// Produces the current full snapshot on request.
pub trait SnapshotSource: Send + Sync {
    fn snapshot(&self) -> PolicySnapshot;
}

/// The intermediary between the two contexts.
pub struct Relay {
    source: Arc<dyn SnapshotSource>,
    content: Arc<dyn Mailbox>,
    buffer: LogBuffer,
    events: broadcast::Sender<LogRecord>,
}

impl Relay {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        content: Arc<dyn Mailbox>,
        buffer: LogBuffer,
        events: broadcast::Sender<LogRecord>,
    ) -> Self {
        Self {
            source,
            content,
            buffer,
            events,
        }
    }

    pub fn route(&self, envelope: Envelope) {
        match envelope {
            Envelope::PolicySync(snapshot) => self.forward(snapshot),
            Envelope::SyncRequest => {
                tracing::debug!("answering sync request");
                self.forward(self.source.snapshot());
            }
            Envelope::Log(record) => {
                self.buffer.enqueue(record.clone());
                // No subscribers is fine; events are display only.
                let _ = self.events.send(record);
            }
        }
    }

    fn forward(&self, snapshot: PolicySnapshot) {
        let version = snapshot.version;
        if let Err(e) = self.content.post(Envelope::PolicySync(snapshot)) {
            tracing::warn!(error = %e, version, "policy sync not delivered");
        }
    }

    /// Route messages until every sender is dropped or `stop` completes.
    /// Messages already queued when `stop` completes are still routed.
    pub async fn run(
        self,
        mut inbox: mpsc::UnboundedReceiver<Envelope>,
        stop: impl Future<Output = ()>,
    ) {
        tokio::pin!(stop);
        loop {
            tokio::select! {
                envelope = inbox.recv() => match envelope {
                    Some(envelope) => self.route(envelope),
                    None => break,
                },
                () = &mut stop => {
                    inbox.close();
                    let mut drained = 0usize;
                    while let Some(envelope) = inbox.recv().await {
                        self.route(envelope);
                        drained += 1;
                    }
                    tracing::debug!(drained, "relay inbox drained");
                    break;
                }
            }
        }
        tracing::info!("relay stopped");
    }

    pub fn spawn(self, inbox: mpsc::UnboundedReceiver<Envelope>) -> JoinHandle<()> {
        tokio::spawn(self.run(inbox, std::future::pending()))
    }

    /// Like [`Relay::spawn`], but stops once `stop` fires or its sender is
    /// dropped.
    pub fn spawn_until(
        self,
        inbox: mpsc::UnboundedReceiver<Envelope>,
        stop: oneshot::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(inbox, async {
            let _ = stop.await;
        }))
    }
}

/// Enforcement-side end of the channel. Keeps a [`PolicyCache`] current.
pub struct PolicyReceiver {
    cache: PolicyCache,
    upstream: Arc<dyn Mailbox>,
    config: ChannelConfig,
}

impl PolicyReceiver {
    pub fn new(cache: PolicyCache, upstream: Arc<dyn Mailbox>, config: ChannelConfig) -> Self {
        Self {
            cache,
            upstream,
            config,
        }
    }

    pub fn cache(&self) -> &PolicyCache {
        &self.cache
    }

    /// Apply one inbound message. Returns whether the cache changed.
    pub fn receive(&self, envelope: Envelope) -> bool {
        match envelope {
            Envelope::PolicySync(snapshot) => {
                let version = snapshot.version;
                let applied = self.cache.apply(snapshot);
                if applied {
                    tracing::debug!(version, "policy snapshot applied");
                }
                applied
            }
            other => {
                tracing::debug!(?other, "ignoring unexpected message");
                false
            }
        }
    }

    fn request_sync(&self) {
        if let Err(e) = self.upstream.post(Envelope::SyncRequest) {
            tracing::warn!(error = %e, "sync request not delivered");
        }
    }

    /// Ask for a snapshot, then apply pushes until the inbox closes. While
    /// nothing has been applied the request is repeated every
    /// `resync_timeout`, at most `max_resync_attempts` more times.
    pub async fn run(self, mut inbox: mpsc::UnboundedReceiver<Envelope>) {
        self.request_sync();
        let mut retries = 0;
        loop {
            let waiting = !self.cache.is_synced() && retries < self.config.max_resync_attempts;
            let next = if waiting {
                tokio::select! {
                    envelope = inbox.recv() => envelope,
                    _ = tokio::time::sleep(self.config.resync_timeout()) => {
                        retries += 1;
                        tracing::warn!(attempt = retries, "no policy snapshot yet, asking again");
                        self.request_sync();
                        continue;
                    }
                }
            } else {
                inbox.recv().await
            };
            match next {
                Some(envelope) => {
                    self.receive(envelope);
                }
                None => break,
            }
        }
        tracing::info!("policy receiver stopped");
    }

    pub fn spawn(self, inbox: mpsc::UnboundedReceiver<Envelope>) -> JoinHandle<()> {
        tokio::spawn(self.run(inbox))
    }
}
