//! Request/response types for the inbound command surface.

use policy::{
    ActionKind, Artifact, ArtifactAction, ClassifiedArtifact, EffectivePolicy, Preset,
    TemporaryOverride,
};
use serde::{Deserialize, Serialize};
use storage::LogRecord;

use crate::Error;

/// Request ID (string or number), echoed back in the response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    /// Persisted logs, newest first.
    GetLogs {
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        capability: Option<String>,
    },
    ClearLogs,
    ApplyPreset {
        origin: String,
        preset: String,
    },
    SetTemporaryOverride {
        origin: String,
        minutes: u32,
    },
    ClearTemporaryOverride {
        origin: String,
    },
    RecordArtifactAction {
        action: ActionKind,
        artifact_name: String,
        origin: String,
    },
    UndoArtifactAction,
    /// Read-only.
    ResolvePolicy {
        origin: String,
    },
    ListPresets,
    ClassifyArtifacts {
        origin: String,
        artifacts: Vec<Artifact>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    #[serde(flatten)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Reply {
    Logs(Vec<LogRecord>),
    Cleared { removed: usize },
    Done,
    Policy(EffectivePolicy),
    TemporaryOverride(TemporaryOverride),
    /// The undone action, or `null` when the history was empty.
    Action(Option<ArtifactAction>),
    Presets(Vec<Preset>),
    Classified(Vec<ClassifiedArtifact>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCode {
    UnknownPreset,
    InvalidRequest,
    Storage,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandError {
    pub code: ErrorCode,
    pub message: String,
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let code = self.code;
        let message = &self.message;
        write!(f, "[{code:?}] {message}")
    }
}

impl std::error::Error for CommandError {}

impl From<&Error> for CommandError {
    fn from(err: &Error) -> Self {
        let code = match err {
            Error::Policy(policy::Error::UnknownPreset(_)) => ErrorCode::UnknownPreset,
            Error::InvalidRequest(_) | Error::Policy(_) => ErrorCode::InvalidRequest,
            Error::Storage(_) => ErrorCode::Storage,
            _ => ErrorCode::Internal,
        };
        Self {
            code,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Reply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

impl Response {
    pub fn from_result(id: RequestId, result: crate::Result<Reply>) -> Self {
        match result {
            Ok(reply) => Self {
                id,
                result: Some(reply),
                error: None,
            },
            Err(e) => Self {
                id,
                result: None,
                error: Some(CommandError::from(&e)),
            },
        }
    }

    /// A response to a line that could not be parsed as a request.
    pub fn invalid(id: Option<RequestId>, message: impl Into<String>) -> Self {
        Self {
            id: id.unwrap_or(RequestId::Number(0)),
            result: None,
            error: Some(CommandError {
                code: ErrorCode::InvalidRequest,
                message: message.into(),
            }),
        }
    }

    pub fn into_result(self) -> Result<Option<Reply>, CommandError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_camel_case_commands() {
        let request: Request = serde_json::from_value(json!({
            "id": 7,
            "type": "recordArtifactAction",
            "action": "block",
            "artifactName": "_ga",
            "origin": "https://example.test"
        }))
        .unwrap();
        assert_eq!(request.id, RequestId::Number(7));
        assert_eq!(
            request.command,
            Command::RecordArtifactAction {
                action: ActionKind::Block,
                artifact_name: "_ga".into(),
                origin: "https://example.test".into()
            }
        );

        let logs: Request = serde_json::from_value(json!({"id": "a", "type": "getLogs"})).unwrap();
        assert_eq!(
            logs.command,
            Command::GetLogs {
                limit: None,
                capability: None
            }
        );
    }

    #[test]
    fn unknown_preset_maps_to_its_code() {
        let err = Error::Policy(policy::Error::UnknownPreset("turbo".into()));
        let response = Response::from_result(RequestId::from(1), Err(err));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["error"]["code"], "unknownPreset");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn empty_undo_serializes_null() {
        let response = Response::from_result(RequestId::from("x"), Ok(Reply::Action(None)));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["result"], json!({"type": "action", "data": null}));
        assert_eq!(response.into_result().unwrap(), Some(Reply::Action(None)));
    }
}
