//! Enforcement-side copy of the policy state.

use chrono::{DateTime, Utc};
use policy::{BlockedArtifacts, EffectivePolicy, PolicySet};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::watch;

/// Everything the enforcement context needs, as pushed by the privileged
/// context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySnapshot {
    /// Monotonic counter bumped on every mutation.
    pub version: u64,
    pub policies: PolicySet,
    #[serde(default)]
    pub blocked: BlockedArtifacts,
}

/// Cloneable handle to the cached snapshot.
///
/// Decisions read it without awaiting. Before the first snapshot arrives
/// every origin resolves against the built-in default.
#[derive(Clone)]
pub struct PolicyCache {
    inner: Arc<RwLock<Option<PolicySnapshot>>>,
    version: watch::Sender<u64>,
}

impl Default for PolicyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyCache {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(None)),
            version,
        }
    }

    /// Replace the cached snapshot. Snapshots older than the cached one are
    /// discarded; returns whether the snapshot was applied.
    pub fn apply(&self, snapshot: PolicySnapshot) -> bool {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = guard.as_ref() {
            if snapshot.version < current.version {
                tracing::debug!(
                    stale = snapshot.version,
                    current = current.version,
                    "discarding stale policy snapshot"
                );
                return false;
            }
        }
        let version = snapshot.version;
        *guard = Some(snapshot);
        drop(guard);
        self.version.send_replace(version);
        true
    }

    pub fn is_synced(&self) -> bool {
        self.read(|snapshot| snapshot.is_some())
    }

    pub fn version(&self) -> Option<u64> {
        self.read(|snapshot| snapshot.map(|s| s.version))
    }

    /// Watch the applied version; useful to wait for a push to land.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn resolve(&self, origin: &str, now: DateTime<Utc>) -> EffectivePolicy {
        self.read(|snapshot| match snapshot {
            Some(s) => s.policies.resolve(origin, now),
            None => PolicySet::default().resolve(origin, now),
        })
    }

    pub fn blocked_names(&self, origin: &str) -> Vec<String> {
        self.read(|snapshot| {
            snapshot
                .map(|s| s.blocked.names(origin))
                .unwrap_or_default()
        })
    }

    fn read<T>(&self, f: impl FnOnce(Option<&PolicySnapshot>) -> T) -> T {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(guard.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policy::{Capability, PolicyStore};

    fn snapshot(version: u64, store: &PolicyStore) -> PolicySnapshot {
        PolicySnapshot {
            version,
            policies: store.policies().clone(),
            blocked: BlockedArtifacts::new(),
        }
    }

    #[test]
    fn unsynced_cache_uses_builtin_default() {
        let cache = PolicyCache::new();
        assert!(!cache.is_synced());
        let effective = cache.resolve("a.test", Utc::now());
        assert!(effective.allows(Capability::Fetch));
        assert!(!effective.allows(Capability::Camera));
        assert!(cache.blocked_names("a.test").is_empty());
    }

    #[test]
    fn applies_newer_and_rejects_older() {
        let cache = PolicyCache::new();
        let mut store = PolicyStore::with_builtin_presets();
        store.apply_preset("a.test", "permissive").unwrap();
        assert!(cache.apply(snapshot(3, &store)));

        let stale = PolicyStore::with_builtin_presets();
        assert!(!cache.apply(snapshot(2, &stale)));
        assert_eq!(cache.version(), Some(3));
        assert!(cache.resolve("a.test", Utc::now()).allows(Capability::Camera));
    }

    #[test]
    fn clones_share_state() {
        let cache = PolicyCache::new();
        let other = cache.clone();
        let rx = cache.subscribe();
        other.apply(snapshot(1, &PolicyStore::with_builtin_presets()));
        assert!(cache.is_synced());
        assert_eq!(*rx.borrow(), 1);
    }
}
