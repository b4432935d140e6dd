//! The privileged context: owner of the policy record, the preset catalog,
//! the blocked-artifact list and the action history.
//!
//! Every mutation rewrites the affected records in the [`Store`] and pushes a
//! full [`PolicySnapshot`] to the relay. A failed write is logged and picked
//! up by the next mutation, which rewrites the whole record again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use policy::{
    ActionHistory, ActionKind, Artifact, ArtifactAction, BlockedArtifacts, ClassifiedArtifact,
    EffectivePolicy, PolicyDocument, PolicySet, PolicyStore, Preset, PresetCatalog,
    TemporaryOverride, classify,
};
use serde::de::DeserializeOwned;
use storage::{BLOCKED_KEY, HISTORY_KEY, LogRecord, POLICIES_KEY, PRESETS_KEY, Store};

use crate::cache::PolicySnapshot;
use crate::channel::{Envelope, Mailbox, SnapshotSource};
use crate::command::{Command, Reply, Request, Response};
use crate::{Error, Result};

pub struct Controller {
    state: Mutex<State>,
    store: Arc<Store>,
    mailbox: Arc<dyn Mailbox>,
}

struct State {
    policies: PolicyStore,
    history: ActionHistory,
    blocked: BlockedArtifacts,
    version: u64,
}

impl Controller {
    /// Load persisted state, falling back to built-in defaults for anything
    /// missing or unreadable. `extra` presets are added to the catalog.
    pub fn open(store: Arc<Store>, mailbox: Arc<dyn Mailbox>, extra: PresetCatalog) -> Result<Self> {
        let policies: PolicySet = load_or_default(&store, POLICIES_KEY);
        let history: ActionHistory = load_or_default(&store, HISTORY_KEY);
        let blocked: BlockedArtifacts = load_or_default(&store, BLOCKED_KEY);

        let mut presets = PresetCatalog::builtin();
        let saved: PresetCatalog = load_or_default(&store, PRESETS_KEY);
        for preset in saved {
            let id = preset.id.clone();
            if let Err(e) = presets.register(preset) {
                tracing::warn!(preset = %id, error = %e, "ignoring invalid persisted preset");
            }
        }
        presets.extend(extra)?;
        if let Err(e) = store.put(PRESETS_KEY, &presets) {
            tracing::warn!(error = %e, "failed to persist preset catalog");
        }

        tracing::info!(
            origins = policies.origins.len(),
            presets = presets.len(),
            history = history.len(),
            "policy controller ready"
        );

        Ok(Self {
            state: Mutex::new(State {
                policies: PolicyStore::new(policies, presets),
                history,
                blocked,
                version: 1,
            }),
            store,
            mailbox,
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist, bump the version and push the new snapshot.
    fn commit(&self, state: &mut State) {
        persist(&self.store, POLICIES_KEY, state.policies.policies());
        persist(&self.store, BLOCKED_KEY, &state.blocked);
        persist(&self.store, HISTORY_KEY, &state.history);

        state.version += 1;
        let snapshot = snapshot_of(state);
        if let Err(e) = self.mailbox.post(Envelope::PolicySync(snapshot)) {
            tracing::warn!(error = %e, version = state.version, "policy push not delivered");
        }
    }

    pub fn handle(&self, command: Command) -> Result<Reply> {
        match command {
            Command::GetLogs { limit, capability } => {
                self.logs(limit, capability.as_deref()).map(Reply::Logs)
            }
            Command::ClearLogs => self.clear_logs().map(|removed| Reply::Cleared { removed }),
            Command::ApplyPreset { origin, preset } => {
                self.apply_preset(&origin, &preset)?;
                Ok(Reply::Done)
            }
            Command::SetTemporaryOverride { origin, minutes } => self
                .set_temporary_override(&origin, minutes)
                .map(Reply::TemporaryOverride),
            Command::ClearTemporaryOverride { origin } => {
                self.clear_temporary_override(&origin);
                Ok(Reply::Done)
            }
            Command::RecordArtifactAction {
                action,
                artifact_name,
                origin,
            } => {
                self.record_artifact_action(action, &artifact_name, &origin)?;
                Ok(Reply::Done)
            }
            Command::UndoArtifactAction => Ok(Reply::Action(self.undo_artifact_action())),
            Command::ResolvePolicy { origin } => Ok(Reply::Policy(self.resolve(&origin))),
            Command::ListPresets => Ok(Reply::Presets(self.presets())),
            Command::ClassifyArtifacts { origin, artifacts } => {
                Ok(Reply::Classified(self.classify(&origin, &artifacts, Utc::now())))
            }
        }
    }

    pub fn handle_request(&self, request: Request) -> Response {
        let Request { id, command } = request;
        let result = self.handle(command);
        if let Err(e) = &result {
            tracing::debug!(error = %e, "command failed");
        }
        Response::from_result(id, result)
    }

    pub fn logs(&self, limit: Option<usize>, capability: Option<&str>) -> Result<Vec<LogRecord>> {
        Ok(self.store.load_logs(limit, capability)?)
    }

    pub fn clear_logs(&self) -> Result<usize> {
        let removed = self.store.clear_logs()?;
        tracing::info!(removed, "cleared decision logs");
        Ok(removed)
    }

    pub fn apply_preset(&self, origin: &str, preset: &str) -> Result<()> {
        let mut state = self.state();
        state.policies.apply_preset(origin, preset)?;
        tracing::info!(origin, preset, "applied preset");
        self.commit(&mut state);
        Ok(())
    }

    pub fn set_temporary_override(&self, origin: &str, minutes: u32) -> Result<TemporaryOverride> {
        self.set_temporary_override_at(origin, minutes, Utc::now())
    }

    pub fn set_temporary_override_at(
        &self,
        origin: &str,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> Result<TemporaryOverride> {
        let mut state = self.state();
        let grant = state.policies.set_temporary_override(origin, minutes, now);
        tracing::info!(origin, minutes, expires_at = %grant.expires_at, "temporary override granted");
        self.commit(&mut state);
        Ok(grant)
    }

    pub fn clear_temporary_override(&self, origin: &str) -> bool {
        let mut state = self.state();
        let cleared = state.policies.clear_temporary_override(origin);
        if cleared {
            self.commit(&mut state);
        }
        cleared
    }

    /// Replace an origin's document wholesale.
    pub fn set_override(&self, origin: &str, document: PolicyDocument) {
        let mut state = self.state();
        state.policies.set_override(origin, document);
        tracing::info!(origin, "origin policy replaced");
        self.commit(&mut state);
    }

    pub fn set_default(&self, document: PolicyDocument) {
        let mut state = self.state();
        state.policies.set_default(document);
        tracing::info!("default policy replaced");
        self.commit(&mut state);
    }

    /// Give a newly visited origin its own copy of the default.
    pub fn ensure_origin(&self, origin: &str) -> bool {
        let mut state = self.state();
        let created = state.policies.ensure_origin(origin);
        if created {
            tracing::debug!(origin, "created origin policy from default");
            self.commit(&mut state);
        }
        created
    }

    /// Record a user action and apply its effect on the blocked list.
    pub fn record_artifact_action(
        &self,
        action: ActionKind,
        artifact_name: &str,
        origin: &str,
    ) -> Result<ArtifactAction> {
        if artifact_name.trim().is_empty() {
            return Err(Error::InvalidRequest("artifact name is empty".to_string()));
        }
        let mut entry = ArtifactAction::new(action, artifact_name, origin);
        let mut state = self.state();
        state.blocked.apply(&mut entry);
        state.history.record(entry.clone());
        tracing::info!(
            action = ?entry.action,
            artifact = %entry.artifact_name,
            origin = %entry.origin,
            "recorded artifact action"
        );
        self.commit(&mut state);
        Ok(entry)
    }

    /// Pop the most recent action and reverse its effect. `None` when there
    /// is nothing to undo.
    pub fn undo_artifact_action(&self) -> Option<ArtifactAction> {
        let mut state = self.state();
        let entry = state.history.undo_last()?;
        let reverted = state.blocked.revert(&entry);
        tracing::info!(
            action = ?entry.action,
            artifact = %entry.artifact_name,
            reverted,
            "undid artifact action"
        );
        self.commit(&mut state);
        Some(entry)
    }

    pub fn resolve(&self, origin: &str) -> EffectivePolicy {
        self.resolve_at(origin, Utc::now())
    }

    pub fn resolve_at(&self, origin: &str, now: DateTime<Utc>) -> EffectivePolicy {
        self.state().policies.resolve(origin, now)
    }

    pub fn presets(&self) -> Vec<Preset> {
        self.state().policies.presets().iter().cloned().collect()
    }

    pub fn blocked(&self, origin: &str) -> Vec<String> {
        self.state().blocked.names(origin)
    }

    /// Action history, oldest first.
    pub fn history(&self) -> Vec<ArtifactAction> {
        self.state().history.iter().cloned().collect()
    }

    /// Classify artifacts as seen from `origin`, highest score first.
    pub fn classify(
        &self,
        origin: &str,
        artifacts: &[Artifact],
        now: DateTime<Utc>,
    ) -> Vec<ClassifiedArtifact> {
        let mut classified: Vec<_> = artifacts
            .iter()
            .map(|artifact| classify(artifact, origin, now))
            .collect();
        classified.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
        classified
    }
}

impl SnapshotSource for Controller {
    fn snapshot(&self) -> PolicySnapshot {
        snapshot_of(&self.state())
    }
}

fn snapshot_of(state: &State) -> PolicySnapshot {
    PolicySnapshot {
        version: state.version,
        policies: state.policies.policies().clone(),
        blocked: state.blocked.clone(),
    }
}

fn load_or_default<T: DeserializeOwned + Default>(store: &Store, key: &str) -> T {
    match store.get::<T>(key) {
        Ok(Some(value)) => value,
        Ok(None) => T::default(),
        Err(e) => {
            tracing::warn!(key, error = %e, "unreadable record, using defaults");
            T::default()
        }
    }
}

fn persist<T: serde::Serialize + ?Sized>(store: &Store, key: &str, value: &T) {
    if let Err(e) = store.put(key, value) {
        tracing::warn!(key, error = %e, "failed to persist record");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelError;
    use crate::command::{ErrorCode, RequestId};
    use policy::{Capability, HISTORY_CAPACITY};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Envelope>>);

    impl Recorder {
        fn versions(&self) -> Vec<u64> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    Envelope::PolicySync(s) => Some(s.version),
                    _ => None,
                })
                .collect()
        }
    }

    impl Mailbox for Recorder {
        fn post(&self, envelope: Envelope) -> std::result::Result<(), ChannelError> {
            self.0.lock().unwrap().push(envelope);
            Ok(())
        }
    }

    fn controller() -> (Controller, Arc<Store>, Arc<Recorder>) {
        let store = Arc::new(Store::in_memory().unwrap());
        let recorder = Arc::new(Recorder::default());
        let controller =
            Controller::open(store.clone(), recorder.clone(), PresetCatalog::empty()).unwrap();
        (controller, store, recorder)
    }

    #[test]
    fn fresh_store_gets_builtin_catalog() {
        let (controller, store, _) = controller();
        assert_eq!(controller.presets().len(), 4);
        let saved: PresetCatalog = store.get(PRESETS_KEY).unwrap().unwrap();
        assert!(saved.contains("privacy"));
    }

    #[test]
    fn apply_preset_persists_and_pushes() {
        let (controller, store, recorder) = controller();
        controller.apply_preset("https://example.test", "permissive").unwrap();

        assert!(controller.resolve("https://example.test").allows(Capability::Eval));
        let saved: PolicySet = store.get(POLICIES_KEY).unwrap().unwrap();
        assert_eq!(saved.selected_preset.as_deref(), Some("permissive"));
        assert_eq!(recorder.versions(), vec![2]);
    }

    #[test]
    fn unknown_preset_changes_nothing() {
        let (controller, _, recorder) = controller();
        let response = controller.handle_request(Request {
            id: RequestId::from(1),
            command: Command::ApplyPreset {
                origin: "https://example.test".into(),
                preset: "turbo".into(),
            },
        });
        assert_eq!(response.error.unwrap().code, ErrorCode::UnknownPreset);
        assert!(recorder.versions().is_empty());
    }

    #[test]
    fn zero_minute_override_lapses_immediately() {
        let (controller, _, _) = controller();
        let now: DateTime<Utc> = "2026-05-01T08:00:00Z".parse().unwrap();
        let grant = controller
            .set_temporary_override_at("https://example.test", 0, now)
            .unwrap();
        assert_eq!(grant.expires_at, now);
        let later = now + chrono::Duration::seconds(1);
        assert!(!controller.resolve_at("https://example.test", later).is_temporary());
    }

    #[test]
    fn dashboard_edits_are_pushed() {
        let (controller, _, recorder) = controller();
        let mut doc = PolicyDocument::builtin_default();
        doc.set(Capability::Clipboard, policy::Setting::Allow);
        controller.set_override("https://notes.test", doc);
        assert!(controller.resolve("https://notes.test").allows(Capability::Clipboard));

        let mut default = PolicyDocument::builtin_default();
        default.set(Capability::Images, policy::Setting::Deny);
        controller.set_default(default);
        assert!(!controller.resolve("https://elsewhere.test").allows(Capability::Images));
        assert_eq!(recorder.versions(), vec![2, 3]);
    }

    #[test]
    fn temporary_override_window() {
        let (controller, _, _) = controller();
        let now: DateTime<Utc> = "2026-05-01T08:00:00Z".parse().unwrap();
        controller
            .set_temporary_override_at("https://other.test", 5, now)
            .unwrap();

        let inside = controller.resolve_at("https://other.test", now + chrono::Duration::minutes(5));
        assert!(inside.allows(Capability::Eval));
        let after = controller.resolve_at("https://other.test", now + chrono::Duration::minutes(6));
        assert!(!after.allows(Capability::Eval));

        assert!(controller.clear_temporary_override("https://other.test"));
        assert!(!controller.clear_temporary_override("https://other.test"));
    }

    #[test]
    fn undo_reverses_most_recent_block() {
        let (controller, _, recorder) = controller();
        controller
            .record_artifact_action(ActionKind::Block, "_ga", "https://example.test")
            .unwrap();
        controller
            .record_artifact_action(ActionKind::Block, "_fbp", "https://example.test")
            .unwrap();
        assert_eq!(controller.blocked("https://example.test"), vec!["_fbp", "_ga"]);

        let undone = controller.undo_artifact_action().unwrap();
        assert_eq!(undone.artifact_name, "_fbp");
        assert_eq!(controller.blocked("https://example.test"), vec!["_ga"]);
        assert_eq!(recorder.versions(), vec![2, 3, 4]);

        controller.undo_artifact_action();
        assert!(controller.undo_artifact_action().is_none());
        assert_eq!(recorder.versions().len(), 4);
    }

    #[test]
    fn undo_of_noop_unblock_does_not_block() {
        let (controller, _, _) = controller();
        let entry = controller
            .record_artifact_action(ActionKind::Unblock, "sid", "https://example.test")
            .unwrap();
        assert!(!entry.applied);

        controller.undo_artifact_action().unwrap();
        assert!(controller.blocked("https://example.test").is_empty());
    }

    #[test]
    fn undo_of_duplicate_block_keeps_block() {
        let (controller, _, _) = controller();
        for _ in 0..2 {
            controller
                .record_artifact_action(ActionKind::Block, "_ga", "https://example.test")
                .unwrap();
        }
        controller.undo_artifact_action().unwrap();
        assert_eq!(controller.blocked("https://example.test"), vec!["_ga"]);

        controller.undo_artifact_action().unwrap();
        assert!(controller.blocked("https://example.test").is_empty());
    }

    #[test]
    fn invalid_saved_preset_skips_only_itself() {
        let store = Arc::new(Store::in_memory().unwrap());
        let mut kiosk = PresetCatalog::builtin().get("strict").unwrap().clone();
        kiosk.id = "zz-kiosk".into();
        let broken = Preset {
            id: "aa-broken".into(),
            policy: PolicyDocument::default(),
            ..kiosk.clone()
        };
        store
            .put(PRESETS_KEY, &serde_json::json!({ "aa-broken": broken, "zz-kiosk": kiosk }))
            .unwrap();

        let controller =
            Controller::open(store, Arc::new(Recorder::default()), PresetCatalog::empty()).unwrap();
        let ids: Vec<_> = controller.presets().into_iter().map(|p| p.id).collect();
        assert!(ids.contains(&"zz-kiosk".to_string()));
        assert!(!ids.contains(&"aa-broken".to_string()));
    }

    #[test]
    fn history_stays_bounded() {
        let (controller, store, _) = controller();
        for n in 0..HISTORY_CAPACITY + 5 {
            controller
                .record_artifact_action(ActionKind::Delete, &format!("c{n}"), "https://a.test")
                .unwrap();
        }
        assert_eq!(controller.history().len(), HISTORY_CAPACITY);
        let saved: ActionHistory = store.get(HISTORY_KEY).unwrap().unwrap();
        assert_eq!(saved.len(), HISTORY_CAPACITY);
    }

    #[test]
    fn reopen_restores_state() {
        let (controller, store, _) = controller();
        controller.apply_preset("https://example.test", "strict").unwrap();
        controller
            .record_artifact_action(ActionKind::Block, "_ga", "https://example.test")
            .unwrap();
        drop(controller);

        let reopened =
            Controller::open(store, Arc::new(Recorder::default()), PresetCatalog::empty()).unwrap();
        let effective = reopened.resolve("https://example.test");
        assert_eq!(effective.dom, policy::DomMode::Readonly);
        assert!(!effective.allows(Capability::Eval));
        assert_eq!(reopened.blocked("https://example.test"), vec!["_ga"]);
        assert_eq!(reopened.history().len(), 1);
    }

    #[test]
    fn unreadable_policy_record_falls_back() {
        let store = Arc::new(Store::in_memory().unwrap());
        store.put(POLICIES_KEY, "not a policy record").unwrap();
        let controller =
            Controller::open(store, Arc::new(Recorder::default()), PresetCatalog::empty()).unwrap();
        let effective = controller.resolve("https://example.test");
        assert!(effective.allows(Capability::Fetch));
        assert!(!effective.allows(Capability::Geolocation));
    }

    #[test]
    fn snapshot_reflects_current_version() {
        let (controller, _, _) = controller();
        assert_eq!(controller.snapshot().version, 1);
        assert!(controller.ensure_origin("https://new.test"));
        assert!(!controller.ensure_origin("https://new.test"));
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.version, 2);
        assert!(snapshot.policies.origins.contains_key("https://new.test"));
    }

    #[test]
    fn classify_sorts_by_score() {
        let (controller, _, _) = controller();
        let now: DateTime<Utc> = "2026-05-01T08:00:00Z".parse().unwrap();
        let artifacts = vec![
            Artifact {
                name: "sessionid".into(),
                domain: "example.test".into(),
                expires_at: None,
                http_only: true,
                secure: true,
            },
            Artifact {
                name: "_ga".into(),
                domain: ".tracker.test".into(),
                expires_at: Some(now + chrono::Duration::days(365)),
                http_only: false,
                secure: false,
            },
        ];
        let classified = controller.classify("https://example.test", &artifacts, now);
        assert_eq!(classified[0].name, "_ga");
        assert_eq!(classified[1].name, "sessionid");
    }
}
