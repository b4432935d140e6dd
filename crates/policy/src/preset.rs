//! Named, immutable policy templates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::{Capability, DomMode, Error, PolicyDocument, Result, Setting};

/// A named template bundling display metadata with a complete policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    pub id: String,
    pub name: String,
    pub short_label: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    pub policy: PolicyDocument,
}

impl Preset {
    /// Checks that the policy sets every capability and carries no
    /// temporary grant.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Invalid("preset id is empty".to_string()));
        }
        if !self.policy.is_complete() {
            let missing: Vec<_> = Capability::ALL
                .iter()
                .filter(|cap| self.policy.setting(**cap).is_unset())
                .map(|cap| cap.as_str())
                .collect();
            return Err(Error::Invalid(format!(
                "preset '{}' leaves capabilities unset: {}",
                self.id,
                missing.join(", ")
            )));
        }
        Ok(())
    }
}

/// Registered presets keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresetCatalog {
    presets: BTreeMap<String, Preset>,
}

#[derive(Deserialize)]
struct PresetFile {
    #[serde(default, rename = "preset")]
    presets: Vec<Preset>,
}

impl PresetCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The catalog shipped with the extension.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for preset in [strict(), balanced(), permissive(), privacy()] {
            catalog.presets.insert(preset.id.clone(), preset);
        }
        catalog
    }

    /// Load custom presets from a TOML file of `[[preset]]` tables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    pub fn parse(toml: &str) -> Result<Self> {
        let file: PresetFile = toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))?;
        let mut catalog = Self::empty();
        for preset in file.presets {
            catalog.register(preset)?;
        }
        Ok(catalog)
    }

    /// Register a preset. Ids are unique; a second registration replaces
    /// the first.
    pub fn register(&mut self, preset: Preset) -> Result<()> {
        preset.validate()?;
        self.presets.insert(preset.id.clone(), preset);
        Ok(())
    }

    /// Merge another catalog into this one, validating each entry.
    pub fn extend(&mut self, other: PresetCatalog) -> Result<()> {
        for (_, preset) in other.presets {
            self.register(preset)?;
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<&Preset> {
        self.presets
            .get(id)
            .ok_or_else(|| Error::UnknownPreset(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.presets.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.values()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

impl IntoIterator for PresetCatalog {
    type Item = Preset;
    type IntoIter = std::collections::btree_map::IntoValues<String, Preset>;

    fn into_iter(self) -> Self::IntoIter {
        self.presets.into_values()
    }
}

fn preset(
    id: &str,
    name: &str,
    short_label: &str,
    description: &str,
    icon: &str,
    policy: PolicyDocument,
) -> Preset {
    Preset {
        id: id.to_string(),
        name: name.to_string(),
        short_label: short_label.to_string(),
        description: description.to_string(),
        icon: icon.to_string(),
        policy,
    }
}

fn strict() -> Preset {
    let mut policy = PolicyDocument::uniform(false);
    policy.network.fetch = Setting::Allow;
    policy.network.xhr = Setting::Allow;
    policy.session_storage = Setting::Allow;
    policy.scripts.external = Setting::Allow;
    policy.images = Setting::Allow;
    policy.styles = Setting::Allow;
    policy.dom = Some(DomMode::Readonly);
    preset(
        "strict",
        "Strict",
        "STR",
        "Blocks everything a page does not need to render.",
        "lock",
        policy,
    )
}

fn balanced() -> Preset {
    let mut policy = PolicyDocument::uniform(true);
    for cap in [
        Capability::Geolocation,
        Capability::Camera,
        Capability::Microphone,
        Capability::Clipboard,
        Capability::Notifications,
        Capability::PeerConnection,
        Capability::Eval,
        Capability::FunctionConstructor,
        Capability::MotionSensors,
    ] {
        policy.set(cap, Setting::Deny);
    }
    preset(
        "balanced",
        "Balanced",
        "BAL",
        "Allows rendering and storage, denies sensors, media and dynamic code.",
        "scale",
        policy,
    )
}

fn permissive() -> Preset {
    preset(
        "permissive",
        "Permissive",
        "ALL",
        "Allows every capability.",
        "unlock",
        PolicyDocument::uniform(true),
    )
}

fn privacy() -> Preset {
    let mut policy = balanced().policy;
    policy.network.beacon = Setting::Deny;
    policy.cookies = Setting::Deny;
    policy.indexed_db = Setting::Deny;
    policy.local_storage = Setting::Deny;
    preset(
        "privacy",
        "Privacy",
        "PRV",
        "Balanced, plus no beacons and no persistent storage or cookies.",
        "shield",
        policy,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_presets_are_complete() {
        let catalog = PresetCatalog::builtin();
        assert_eq!(catalog.len(), 4);
        for preset in catalog.iter() {
            preset.validate().unwrap();
        }
    }

    #[test]
    fn unknown_preset_is_an_error() {
        let catalog = PresetCatalog::builtin();
        assert!(matches!(catalog.get("nope"), Err(Error::UnknownPreset(id)) if id == "nope"));
    }

    #[test]
    fn incomplete_preset_is_rejected() {
        let mut catalog = PresetCatalog::empty();
        let partial = preset("half", "Half", "H", "", "", PolicyDocument::builtin_default());
        assert!(matches!(catalog.register(partial), Err(Error::Invalid(_))));
        assert!(catalog.is_empty());
    }

    #[test]
    fn strict_keeps_dom_readonly() {
        let catalog = PresetCatalog::builtin();
        let strict = catalog.get("strict").unwrap();
        assert_eq!(strict.policy.dom, Some(DomMode::Readonly));
        assert_eq!(strict.policy.eval, Setting::Deny);
    }

    #[test]
    fn parse_custom_presets() {
        let toml = r#"
[[preset]]
id = "kiosk"
name = "Kiosk"
shortLabel = "KSK"

[preset.policy]
localStorage = "allow"
sessionStorage = "allow"
indexedDB = "deny"
cookies = "allow"
dom = "full"
geolocation = "deny"
camera = "allow"
microphone = "deny"
clipboard = "deny"
notifications = "deny"
webrtc = "deny"
eval = "deny"
functionConstructor = "deny"
sensors = "deny"
images = "allow"
styles = "allow"

[preset.policy.network]
fetch = "allow"
xhr = "allow"
websocket = "deny"
beacon = "deny"

[preset.policy.scripts]
inline = "deny"
external = "allow"
"#;
        let catalog = PresetCatalog::parse(toml).unwrap();
        let kiosk = catalog.get("kiosk").unwrap();
        assert_eq!(kiosk.short_label, "KSK");
        assert_eq!(kiosk.policy.network.websocket, Setting::Deny);
        assert_eq!(kiosk.policy.scripts.inline, Setting::Deny);
        assert_eq!(kiosk.policy.camera, Setting::Allow);
    }

    #[test]
    fn parse_rejects_partial_custom_preset() {
        let toml = r#"
[[preset]]
id = "partial"
name = "Partial"
shortLabel = "P"

[preset.policy]
camera = "allow"
"#;
        assert!(matches!(PresetCatalog::parse(toml), Err(Error::Invalid(_))));
    }

    #[test]
    fn catalog_serializes_as_id_map() {
        let catalog = PresetCatalog::builtin();
        let json = serde_json::to_value(&catalog).unwrap();
        assert!(json.get("permissive").is_some());
        let back: PresetCatalog = serde_json::from_value(json).unwrap();
        assert_eq!(back, catalog);
    }
}
