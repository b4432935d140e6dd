//! Policy documents and their resolution into an effective decision table.

use chrono::{DateTime, Duration, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Capability, Error, Result};

/// Explicit tri-state value for a single capability field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Setting {
    Allow,
    Deny,
    #[default]
    Unset,
}

impl Setting {
    pub fn is_unset(&self) -> bool {
        matches!(self, Setting::Unset)
    }

    /// Returns `self` if set, otherwise `fallback`.
    pub fn or(self, fallback: Setting) -> Setting {
        if self.is_unset() { fallback } else { self }
    }

    pub fn resolve(self, fallback: bool) -> bool {
        match self {
            Setting::Allow => true,
            Setting::Deny => false,
            Setting::Unset => fallback,
        }
    }
}

impl From<bool> for Setting {
    fn from(allow: bool) -> Self {
        if allow { Setting::Allow } else { Setting::Deny }
    }
}

// Accepts "allow" / "deny" / "unset", JSON booleans, or null. Nothing else.
impl<'de> Deserialize<'de> for Setting {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Flag(bool),
            Named(String),
        }

        match Option::<Repr>::deserialize(deserializer)? {
            None => Ok(Setting::Unset),
            Some(Repr::Flag(flag)) => Ok(Setting::from(flag)),
            Some(Repr::Named(name)) => match name.as_str() {
                "allow" => Ok(Setting::Allow),
                "deny" => Ok(Setting::Deny),
                "unset" => Ok(Setting::Unset),
                other => Err(de::Error::unknown_variant(other, &["allow", "deny", "unset"])),
            },
        }
    }
}

/// DOM mutation mode, in decreasing order of permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomMode {
    #[default]
    Full,
    Readonly,
    None,
}

impl DomMode {
    /// Structural mutation is only permitted in `full`; `readonly` and `none`
    /// are enforced identically.
    pub fn allows_mutation(self) -> bool {
        matches!(self, DomMode::Full)
    }
}

/// Network sub-capabilities, each independently toggleable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkPolicy {
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub fetch: Setting,
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub xhr: Setting,
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub websocket: Setting,
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub beacon: Setting,
}

/// Script loading sub-capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptPolicy {
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub inline: Setting,
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub external: Setting,
}

/// Time-bounded "allow everything" grant attached to a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporaryOverride {
    pub expires_at: DateTime<Utc>,
}

impl TemporaryOverride {
    pub fn for_minutes(now: DateTime<Utc>, minutes: u32) -> Self {
        Self {
            expires_at: now + Duration::minutes(i64::from(minutes)),
        }
    }

    /// Expiry is checked here, at read time; expired grants are never swept.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}

/// The policy for one origin (or the default).
///
/// Every field may be absent. Absence resolves through the capability's
/// fallback, never an error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyDocument {
    pub network: NetworkPolicy,
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub local_storage: Setting,
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub session_storage: Setting,
    #[serde(rename = "indexedDB", skip_serializing_if = "Setting::is_unset")]
    pub indexed_db: Setting,
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub cookies: Setting,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dom: Option<DomMode>,
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub geolocation: Setting,
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub camera: Setting,
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub microphone: Setting,
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub clipboard: Setting,
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub notifications: Setting,
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub webrtc: Setting,
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub eval: Setting,
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub function_constructor: Setting,
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub sensors: Setting,
    pub scripts: ScriptPolicy,
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub images: Setting,
    #[serde(skip_serializing_if = "Setting::is_unset")]
    pub styles: Setting,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporary_override: Option<TemporaryOverride>,
}

impl PolicyDocument {
    /// Parse a document from TOML.
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Built-in default: infrastructural capabilities allowed explicitly,
    /// sensitive capabilities left absent so they fall back to deny.
    pub fn builtin_default() -> Self {
        let mut doc = Self::default();
        for cap in Capability::ALL {
            if cap.fallback() {
                doc.set(cap, Setting::Allow);
            }
        }
        doc
    }

    /// The fixed bundle overlaid by a live temporary override.
    pub fn allow_all() -> Self {
        let mut doc = Self::default();
        for cap in Capability::ALL {
            doc.set(cap, Setting::Allow);
        }
        doc
    }

    /// Every capability with the same explicit value; `dom` maps `false` to
    /// [`DomMode::None`].
    pub fn uniform(allow: bool) -> Self {
        let mut doc = Self::default();
        for cap in Capability::ALL {
            doc.set(cap, Setting::from(allow));
        }
        doc
    }

    /// The stored setting for a capability. `dom` is reported as `allow` in
    /// full mode and `deny` in the restricted modes.
    pub fn setting(&self, cap: Capability) -> Setting {
        match cap {
            Capability::Fetch => self.network.fetch,
            Capability::Xhr => self.network.xhr,
            Capability::WebSocket => self.network.websocket,
            Capability::Beacon => self.network.beacon,
            Capability::LocalStorage => self.local_storage,
            Capability::SessionStorage => self.session_storage,
            Capability::IndexedDb => self.indexed_db,
            Capability::Cookies => self.cookies,
            Capability::Dom => match self.dom {
                Some(mode) => Setting::from(mode.allows_mutation()),
                None => Setting::Unset,
            },
            Capability::Geolocation => self.geolocation,
            Capability::Camera => self.camera,
            Capability::Microphone => self.microphone,
            Capability::Clipboard => self.clipboard,
            Capability::Notifications => self.notifications,
            Capability::PeerConnection => self.webrtc,
            Capability::Eval => self.eval,
            Capability::FunctionConstructor => self.function_constructor,
            Capability::InlineScript => self.scripts.inline,
            Capability::ExternalScript => self.scripts.external,
            Capability::MotionSensors => self.sensors,
            Capability::Images => self.images,
            Capability::Styles => self.styles,
        }
    }

    pub fn set(&mut self, cap: Capability, value: Setting) {
        let slot = match cap {
            Capability::Fetch => &mut self.network.fetch,
            Capability::Xhr => &mut self.network.xhr,
            Capability::WebSocket => &mut self.network.websocket,
            Capability::Beacon => &mut self.network.beacon,
            Capability::LocalStorage => &mut self.local_storage,
            Capability::SessionStorage => &mut self.session_storage,
            Capability::IndexedDb => &mut self.indexed_db,
            Capability::Cookies => &mut self.cookies,
            Capability::Dom => {
                self.dom = match value {
                    Setting::Allow => Some(DomMode::Full),
                    Setting::Deny => Some(DomMode::None),
                    Setting::Unset => None,
                };
                return;
            }
            Capability::Geolocation => &mut self.geolocation,
            Capability::Camera => &mut self.camera,
            Capability::Microphone => &mut self.microphone,
            Capability::Clipboard => &mut self.clipboard,
            Capability::Notifications => &mut self.notifications,
            Capability::PeerConnection => &mut self.webrtc,
            Capability::Eval => &mut self.eval,
            Capability::FunctionConstructor => &mut self.function_constructor,
            Capability::InlineScript => &mut self.scripts.inline,
            Capability::ExternalScript => &mut self.scripts.external,
            Capability::MotionSensors => &mut self.sensors,
            Capability::Images => &mut self.images,
            Capability::Styles => &mut self.styles,
        };
        *slot = value;
    }

    /// Overlay `over` on top of `self`, field by field.
    ///
    /// Nested records are merged per field, so a partial override never
    /// disables siblings it does not mention.
    pub fn overlay(&self, over: &PolicyDocument) -> PolicyDocument {
        let mut merged = self.clone();
        for cap in Capability::ALL {
            if cap == Capability::Dom {
                continue;
            }
            merged.set(cap, over.setting(cap).or(self.setting(cap)));
        }
        merged.dom = over.dom.or(self.dom);
        merged.temporary_override = over.temporary_override.or(self.temporary_override);
        merged
    }

    /// True when no field is absent and no temporary grant is attached.
    pub fn is_complete(&self) -> bool {
        self.temporary_override.is_none()
            && Capability::ALL.iter().all(|cap| !self.setting(*cap).is_unset())
    }

    /// Resolve this (already merged) document into concrete decisions.
    pub fn resolve(&self, now: DateTime<Utc>) -> EffectivePolicy {
        let live = self.temporary_override.filter(|t| t.is_live(now));
        let doc = match live {
            Some(_) => self.overlay(&PolicyDocument::allow_all()),
            None => self.clone(),
        };

        let allowed = Capability::ALL
            .iter()
            .filter(|cap| **cap != Capability::Dom)
            .map(|cap| (*cap, doc.setting(*cap).resolve(cap.fallback())))
            .collect();

        EffectivePolicy {
            allowed,
            dom: doc.dom.unwrap_or_default(),
            temporary_until: live.map(|t| t.expires_at),
        }
    }
}

/// The fully resolved decision table actually enforced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectivePolicy {
    allowed: BTreeMap<Capability, bool>,
    pub dom: DomMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporary_until: Option<DateTime<Utc>>,
}

impl EffectivePolicy {
    pub fn allows(&self, cap: Capability) -> bool {
        match cap {
            Capability::Dom => self.dom.allows_mutation(),
            _ => self
                .allowed
                .get(&cap)
                .copied()
                .unwrap_or_else(|| cap.fallback()),
        }
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary_until.is_some()
    }
}
