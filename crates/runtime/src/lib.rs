//! ScriptGuard runtime: capability enforcement, policy propagation and log
//! ingestion.
//!
//! # Overview
//!
//! The runtime is organized around three contexts:
//!
//! - **Controller** (privileged): owns the policy record, presets, blocked
//!   artifacts and action history; answers [`Command`]s and pushes a
//!   [`PolicySnapshot`] after every mutation.
//! - **Relay**: forwards snapshots, answers sync requests and routes decision
//!   logs into the [`LogBuffer`] and the decision-event broadcast.
//! - **Enforcer** (page side): decides each [`CapabilityCall`] against the
//!   locally cached policy without awaiting, and reports one [`LogRecord`]
//!   per decision.
//!
//! [`Host`] wires all three inside one tokio runtime.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use runtime::{CapabilityCall, Host, RuntimeConfig};
//! use storage::Store;
//! use policy::PresetCatalog;
//!
//! # async fn example() -> runtime::Result<()> {
//! let store = Arc::new(Store::open("scriptguard.db")?);
//! let host = Host::start(store, &RuntimeConfig::default(), PresetCatalog::empty())?;
//! host.synced().await;
//!
//! let enforcer = host.enforcer("https://example.test");
//! let verdict = enforcer.check(CapabilityCall::Geolocation { watch: false });
//! println!("{} {:?}", verdict.decision, verdict.surface);
//!
//! host.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! [`LogRecord`]: storage::LogRecord

mod buffer;
mod cache;
mod call;
mod channel;
mod command;
mod config;
mod controller;
mod engine;
mod error;
mod host;

pub use buffer::{LogBuffer, LogSink};
pub use cache::{PolicyCache, PolicySnapshot};
pub use call::{CapabilityCall, SanitizedCall, StorageArea, cookie_name};
pub use channel::{ChannelError, Envelope, Mailbox, PolicyReceiver, Relay, SnapshotSource};
pub use command::{Command, CommandError, ErrorCode, Reply, Request, RequestId, Response};
pub use config::{BufferConfig, ChannelConfig, RuntimeConfig};
pub use controller::Controller;
pub use engine::{BypassScope, CallContext, DenialSurface, Enforcer, Reason, Verdict, evaluate};
pub use error::{Error, Result};
pub use host::Host;
