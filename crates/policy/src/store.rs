//! Per-origin policy storage and resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{EffectivePolicy, PolicyDocument, PresetCatalog, Result, TemporaryOverride};

/// Reserved key for the default document.
pub const DEFAULT_KEY: &str = "default";

/// The persisted policy record: the default document, one document per
/// origin that has been visited or configured, and the last applied preset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySet {
    #[serde(default = "PolicyDocument::builtin_default")]
    pub default: PolicyDocument,
    #[serde(
        rename = "_selectedPreset",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub selected_preset: Option<String>,
    #[serde(flatten)]
    pub origins: BTreeMap<String, PolicyDocument>,
}

impl Default for PolicySet {
    fn default() -> Self {
        Self {
            default: PolicyDocument::builtin_default(),
            selected_preset: None,
            origins: BTreeMap::new(),
        }
    }
}

impl PolicySet {
    /// The override for `origin` merged over the default, then resolved.
    pub fn resolve(&self, origin: &str, now: DateTime<Utc>) -> EffectivePolicy {
        match self.origins.get(&normalize_origin(origin)) {
            Some(over) => self.default.overlay(over).resolve(now),
            None => self.default.resolve(now),
        }
    }

    pub fn document(&self, origin: &str) -> Option<&PolicyDocument> {
        let key = normalize_origin(origin);
        if key == DEFAULT_KEY {
            return Some(&self.default);
        }
        self.origins.get(&key)
    }

    fn slot_mut(&mut self, origin: &str) -> &mut PolicyDocument {
        let key = normalize_origin(origin);
        if key == DEFAULT_KEY {
            return &mut self.default;
        }
        let default = &self.default;
        self.origins.entry(key).or_insert_with(|| default.clone())
    }
}

/// Lowercases and strips a trailing slash so `https://A.test/` and
/// `https://a.test` share a key.
pub fn normalize_origin(origin: &str) -> String {
    origin.trim().trim_end_matches('/').to_ascii_lowercase()
}

/// Owns the policy record and the preset catalog, and implements every
/// policy mutation.
#[derive(Debug, Clone, Default)]
pub struct PolicyStore {
    policies: PolicySet,
    presets: PresetCatalog,
}

impl PolicyStore {
    pub fn new(policies: PolicySet, presets: PresetCatalog) -> Self {
        Self { policies, presets }
    }

    /// Built-in default policy and built-in presets.
    pub fn with_builtin_presets() -> Self {
        Self::new(PolicySet::default(), PresetCatalog::builtin())
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    pub fn presets(&self) -> &PresetCatalog {
        &self.presets
    }

    pub fn resolve(&self, origin: &str, now: DateTime<Utc>) -> EffectivePolicy {
        self.policies.resolve(origin, now)
    }

    /// First-visit behaviour: give the origin its own copy of the default.
    /// Returns `true` if a document was created.
    pub fn ensure_origin(&mut self, origin: &str) -> bool {
        let existed = self.policies.document(origin).is_some();
        self.policies.slot_mut(origin);
        !existed
    }

    pub fn set_default(&mut self, document: PolicyDocument) {
        self.policies.default = document;
    }

    pub fn set_override(&mut self, origin: &str, document: PolicyDocument) {
        *self.policies.slot_mut(origin) = document;
    }

    /// Copy a preset's policy into the origin's slot, replacing whatever was
    /// there, temporary grant included.
    pub fn apply_preset(&mut self, origin: &str, preset_id: &str) -> Result<()> {
        let policy = self.presets.get(preset_id)?.policy.clone();
        *self.policies.slot_mut(origin) = policy;
        self.policies.selected_preset = Some(preset_id.to_string());
        Ok(())
    }

    /// Attach a temporary allow-all grant to the origin's document, creating
    /// the document from the default if needed.
    pub fn set_temporary_override(
        &mut self,
        origin: &str,
        minutes: u32,
        now: DateTime<Utc>,
    ) -> TemporaryOverride {
        let grant = TemporaryOverride::for_minutes(now, minutes);
        self.policies.slot_mut(origin).temporary_override = Some(grant);
        grant
    }

    /// Drop a temporary grant early. Returns whether one was attached.
    pub fn clear_temporary_override(&mut self, origin: &str) -> bool {
        match self.policies.document(origin) {
            Some(doc) if doc.temporary_override.is_some() => {
                self.policies.slot_mut(origin).temporary_override = None;
                true
            }
            _ => false,
        }
    }
}
