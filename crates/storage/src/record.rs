//! Decision log records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of stack frames kept in a record.
pub const MAX_STACK_LINES: usize = 6;

/// Maximum length of the stored stack snippet, in characters.
pub const MAX_STACK_CHARS: usize = 600;

/// Outcome of a capability decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allowed,
    Blocked,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allowed => "allowed",
            Decision::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One enforcement decision, as reported to the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: Uuid,
    pub capability: String,
    pub decision: Decision,
    #[serde(default)]
    pub detail: serde_json::Value,
    pub origin: String,
    /// Best-effort call-site locator (script URL and line).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(capability: impl Into<String>, decision: Decision, origin: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            capability: capability.into(),
            decision,
            detail: serde_json::Value::Null,
            origin: origin.into(),
            location: None,
            stack: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    /// Attach a stack snippet, bounded by [`MAX_STACK_LINES`] and
    /// [`MAX_STACK_CHARS`].
    pub fn with_stack(mut self, stack: Option<&str>) -> Self {
        self.stack = stack.map(truncate_stack).filter(|s| !s.is_empty());
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

pub fn truncate_stack(stack: &str) -> String {
    let lines: Vec<&str> = stack
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .take(MAX_STACK_LINES)
        .collect();
    lines.join("\n").chars().take(MAX_STACK_CHARS).collect()
}
