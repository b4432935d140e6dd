//! Capped history of user actions against stored artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::store::normalize_origin;

/// Maximum number of remembered actions.
pub const HISTORY_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Block,
    Unblock,
    Delete,
}

/// One user-initiated action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactAction {
    pub action: ActionKind,
    pub artifact_name: String,
    pub origin: String,
    pub timestamp: DateTime<Utc>,
    /// Whether the action changed the blocked list when it was recorded.
    #[serde(default)]
    pub applied: bool,
}

impl ArtifactAction {
    pub fn new(action: ActionKind, artifact_name: impl Into<String>, origin: &str) -> Self {
        Self {
            action,
            artifact_name: artifact_name.into(),
            origin: normalize_origin(origin),
            timestamp: Utc::now(),
            applied: false,
        }
    }
}

/// Append-only ring of the most recent [`HISTORY_CAPACITY`] actions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionHistory {
    entries: VecDeque<ArtifactAction>,
}

impl ActionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action, evicting the oldest entry when full.
    pub fn record(&mut self, action: ArtifactAction) {
        while self.entries.len() >= HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(action);
    }

    /// Remove and return the most recent action.
    pub fn undo_last(&mut self) -> Option<ArtifactAction> {
        self.entries.pop_back()
    }

    pub fn last(&self) -> Option<&ArtifactAction> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ArtifactAction> {
        self.entries.iter()
    }
}

/// Artifact names to purge on sight, per origin.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockedArtifacts {
    by_origin: BTreeMap<String, BTreeSet<String>>,
}

impl BlockedArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the name was not already blocked.
    pub fn block(&mut self, origin: &str, name: &str) -> bool {
        self.by_origin
            .entry(normalize_origin(origin))
            .or_default()
            .insert(name.to_string())
    }

    /// Returns `true` if the name was blocked.
    pub fn unblock(&mut self, origin: &str, name: &str) -> bool {
        let key = normalize_origin(origin);
        let Some(names) = self.by_origin.get_mut(&key) else {
            return false;
        };
        let removed = names.remove(name);
        if names.is_empty() {
            self.by_origin.remove(&key);
        }
        removed
    }

    pub fn is_blocked(&self, origin: &str, name: &str) -> bool {
        self.by_origin
            .get(&normalize_origin(origin))
            .is_some_and(|names| names.contains(name))
    }

    pub fn names(&self, origin: &str) -> Vec<String> {
        self.by_origin
            .get(&normalize_origin(origin))
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Apply an action's effect and mark whether it changed the list.
    /// `delete` has no lasting effect on the list.
    pub fn apply(&mut self, action: &mut ArtifactAction) -> bool {
        action.applied = match action.action {
            ActionKind::Block => self.block(&action.origin, &action.artifact_name),
            ActionKind::Unblock => self.unblock(&action.origin, &action.artifact_name),
            ActionKind::Delete => false,
        };
        action.applied
    }

    /// Reverse an applied action's effect. Actions that changed nothing
    /// revert to nothing; a deleted artifact cannot be restored.
    pub fn revert(&mut self, action: &ArtifactAction) -> bool {
        if !action.applied {
            return false;
        }
        match action.action {
            ActionKind::Block => self.unblock(&action.origin, &action.artifact_name),
            ActionKind::Unblock => self.block(&action.origin, &action.artifact_name),
            ActionKind::Delete => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undo_returns_most_recent() {
        let mut history = ActionHistory::new();
        history.record(ArtifactAction::new(ActionKind::Block, "_ga", "a.test"));
        history.record(ArtifactAction::new(ActionKind::Delete, "_fbp", "a.test"));

        let last = history.undo_last().unwrap();
        assert_eq!(last.artifact_name, "_fbp");
        assert_eq!(history.undo_last().unwrap().artifact_name, "_ga");
        assert!(history.undo_last().is_none());
    }

    #[test]
    fn history_is_capped() {
        let mut history = ActionHistory::new();
        for i in 0..(HISTORY_CAPACITY + 7) {
            history.record(ArtifactAction::new(ActionKind::Block, format!("c{i}"), "a.test"));
        }
        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.iter().next().unwrap().artifact_name, "c7");
        assert_eq!(history.last().unwrap().artifact_name, format!("c{}", HISTORY_CAPACITY + 6));
    }

    #[test]
    fn block_and_revert() {
        let mut blocked = BlockedArtifacts::new();
        let mut action = ArtifactAction::new(ActionKind::Block, "uid", "https://A.test");
        assert!(blocked.apply(&mut action));
        assert!(action.applied);
        assert!(blocked.is_blocked("https://a.test", "uid"));
        assert!(blocked.revert(&action));
        assert!(!blocked.is_blocked("https://a.test", "uid"));
        assert!(blocked.names("https://a.test").is_empty());
    }

    #[test]
    fn delete_has_no_list_effect() {
        let mut blocked = BlockedArtifacts::new();
        let mut action = ArtifactAction::new(ActionKind::Delete, "uid", "a.test");
        assert!(!blocked.apply(&mut action));
        assert!(!blocked.revert(&action));
        assert_eq!(blocked, BlockedArtifacts::new());
    }

    #[test]
    fn reverting_noop_unblock_leaves_list_alone() {
        let mut blocked = BlockedArtifacts::new();
        let mut action = ArtifactAction::new(ActionKind::Unblock, "sid", "a.test");
        assert!(!blocked.apply(&mut action));
        assert!(!blocked.revert(&action));
        assert!(!blocked.is_blocked("a.test", "sid"));
    }

    #[test]
    fn reverting_duplicate_block_keeps_first() {
        let mut blocked = BlockedArtifacts::new();
        let mut first = ArtifactAction::new(ActionKind::Block, "_ga", "a.test");
        let mut second = ArtifactAction::new(ActionKind::Block, "_ga", "a.test");
        assert!(blocked.apply(&mut first));
        assert!(!blocked.apply(&mut second));

        assert!(!blocked.revert(&second));
        assert!(blocked.is_blocked("a.test", "_ga"));
        assert!(blocked.revert(&first));
        assert!(!blocked.is_blocked("a.test", "_ga"));
    }

    #[test]
    fn legacy_entries_without_applied_flag_load() {
        let json = serde_json::json!([{
            "action": "block",
            "artifactName": "_ga",
            "origin": "a.test",
            "timestamp": "2026-01-01T00:00:00Z"
        }]);
        let history: ActionHistory = serde_json::from_value(json).unwrap();
        assert!(!history.last().unwrap().applied);
    }

    #[test]
    fn serialized_forms() {
        let mut history = ActionHistory::new();
        history.record(ArtifactAction::new(ActionKind::Unblock, "lang", "a.test"));
        let json = serde_json::to_value(&history).unwrap();
        assert_eq!(json[0]["action"], "unblock");
        assert_eq!(json[0]["artifactName"], "lang");

        let mut blocked = BlockedArtifacts::new();
        blocked.block("a.test", "_ga");
        assert_eq!(serde_json::to_value(&blocked).unwrap(), serde_json::json!({"a.test": ["_ga"]}));
    }
}
