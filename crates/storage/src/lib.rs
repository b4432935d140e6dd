//! SQLite-backed persistence for ScriptGuard.
//!
//! This crate is the store of record for everything the privileged context
//! owns: the policy record, the preset catalog, the blocked-artifact list,
//! the artifact action history, and the capped decision log.
//!
//! # Overview
//!
//! Two kinds of data live here:
//!
//! 1. **Keyed records**: JSON documents addressed by a fixed key
//!    ([`POLICIES_KEY`], [`PRESETS_KEY`], [`BLOCKED_KEY`], [`HISTORY_KEY`]).
//!    The store does not know their shape; callers read and write them with
//!    [`Store::get`] and [`Store::put`].
//!
//! 2. **Decision log**: [`LogRecord`]s appended in batches and returned
//!    newest first, trimmed to a retention cap ([`MAX_LOGS`] by default).
//!
//! # Example
//!
//! ```no_run
//! use storage::{Decision, LogRecord, Store, MAX_LOGS};
//!
//! let store = Store::open("scriptguard.db")?;
//!
//! let record = LogRecord::new("geolocation", Decision::Blocked, "https://example.test");
//! store.append_logs(&[record], MAX_LOGS)?;
//!
//! for record in store.load_logs(Some(20), None)? {
//!     println!("{} {} {}", record.timestamp, record.capability, record.decision);
//! }
//! # Ok::<(), storage::Error>(())
//! ```

mod error;
mod record;
mod store;

pub use error::{Error, Result};
pub use record::{Decision, LogRecord, MAX_STACK_CHARS, MAX_STACK_LINES, truncate_stack};
pub use store::{BLOCKED_KEY, HISTORY_KEY, MAX_LOGS, POLICIES_KEY, PRESETS_KEY, Store};
