//! Origin-keyed capability policy.
//!
//! Core principle: **every capability a page uses resolves to exactly one
//! allow/deny value, and an absent setting is never an error.**
//!
//! - [`PolicyDocument`] holds tri-state [`Setting`]s per capability.
//! - [`PolicyStore`] merges the default document, the origin's override and
//!   any live [`TemporaryOverride`] into an [`EffectivePolicy`].
//! - [`PresetCatalog`] holds immutable templates applied by total overwrite.
//! - [`ActionHistory`] and [`BlockedArtifacts`] track user actions against
//!   cookies.
//! - [`classifier`] scores cookies by tracking risk.

mod capability;
pub mod classifier;
mod document;
mod error;
mod history;
mod preset;
mod store;

pub use capability::{Capability, Sensitivity};
pub use classifier::{Artifact, Category, ClassifiedArtifact, RiskTier, classify};
pub use document::{
    DomMode, EffectivePolicy, NetworkPolicy, PolicyDocument, ScriptPolicy, Setting,
    TemporaryOverride,
};
pub use error::{Error, Result};
pub use history::{
    ActionHistory, ActionKind, ArtifactAction, BlockedArtifacts, HISTORY_CAPACITY,
};
pub use preset::{Preset, PresetCatalog};
pub use store::{DEFAULT_KEY, PolicySet, PolicyStore, normalize_origin};
