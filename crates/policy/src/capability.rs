use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Capabilities a page can be granted or denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "fetch")]
    Fetch,
    #[serde(rename = "xhr")]
    Xhr,
    #[serde(rename = "websocket")]
    WebSocket,
    #[serde(rename = "beacon")]
    Beacon,
    #[serde(rename = "localStorage")]
    LocalStorage,
    #[serde(rename = "sessionStorage")]
    SessionStorage,
    #[serde(rename = "indexedDB")]
    IndexedDb,
    #[serde(rename = "cookies")]
    Cookies,
    #[serde(rename = "dom")]
    Dom,
    #[serde(rename = "geolocation")]
    Geolocation,
    #[serde(rename = "camera")]
    Camera,
    #[serde(rename = "microphone")]
    Microphone,
    #[serde(rename = "clipboard")]
    Clipboard,
    #[serde(rename = "notifications")]
    Notifications,
    #[serde(rename = "webrtc")]
    PeerConnection,
    #[serde(rename = "eval")]
    Eval,
    #[serde(rename = "functionConstructor")]
    FunctionConstructor,
    #[serde(rename = "inlineScript")]
    InlineScript,
    #[serde(rename = "externalScript")]
    ExternalScript,
    #[serde(rename = "sensors")]
    MotionSensors,
    #[serde(rename = "images")]
    Images,
    #[serde(rename = "styles")]
    Styles,
}

/// How a capability behaves when its setting is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sensitivity {
    /// Needed to render; allowed unless explicitly denied.
    Infrastructural,
    /// Privacy-relevant; denied unless explicitly allowed.
    Sensitive,
}

impl Capability {
    pub const ALL: [Capability; 22] = [
        Capability::Fetch,
        Capability::Xhr,
        Capability::WebSocket,
        Capability::Beacon,
        Capability::LocalStorage,
        Capability::SessionStorage,
        Capability::IndexedDb,
        Capability::Cookies,
        Capability::Dom,
        Capability::Geolocation,
        Capability::Camera,
        Capability::Microphone,
        Capability::Clipboard,
        Capability::Notifications,
        Capability::PeerConnection,
        Capability::Eval,
        Capability::FunctionConstructor,
        Capability::InlineScript,
        Capability::ExternalScript,
        Capability::MotionSensors,
        Capability::Images,
        Capability::Styles,
    ];

    /// Wire name, as used in log records and command payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::Fetch => "fetch",
            Capability::Xhr => "xhr",
            Capability::WebSocket => "websocket",
            Capability::Beacon => "beacon",
            Capability::LocalStorage => "localStorage",
            Capability::SessionStorage => "sessionStorage",
            Capability::IndexedDb => "indexedDB",
            Capability::Cookies => "cookies",
            Capability::Dom => "dom",
            Capability::Geolocation => "geolocation",
            Capability::Camera => "camera",
            Capability::Microphone => "microphone",
            Capability::Clipboard => "clipboard",
            Capability::Notifications => "notifications",
            Capability::PeerConnection => "webrtc",
            Capability::Eval => "eval",
            Capability::FunctionConstructor => "functionConstructor",
            Capability::InlineScript => "inlineScript",
            Capability::ExternalScript => "externalScript",
            Capability::MotionSensors => "sensors",
            Capability::Images => "images",
            Capability::Styles => "styles",
        }
    }

    pub fn sensitivity(self) -> Sensitivity {
        match self {
            Capability::Geolocation
            | Capability::Camera
            | Capability::Microphone
            | Capability::Clipboard
            | Capability::Notifications
            | Capability::PeerConnection
            | Capability::Eval
            | Capability::FunctionConstructor
            | Capability::InlineScript
            | Capability::MotionSensors => Sensitivity::Sensitive,
            _ => Sensitivity::Infrastructural,
        }
    }

    /// Value used when no document sets this capability.
    pub fn fallback(self) -> bool {
        self.sensitivity() == Sensitivity::Infrastructural
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownCapability(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for cap in Capability::ALL {
            assert_eq!(cap.as_str().parse::<Capability>().unwrap(), cap);
        }
    }

    #[test]
    fn serde_name_matches_wire_name() {
        for cap in Capability::ALL {
            let json = serde_json::to_string(&cap).unwrap();
            assert_eq!(json, format!("\"{}\"", cap.as_str()));
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert!(matches!(
            "teleport".parse::<Capability>(),
            Err(Error::UnknownCapability(_))
        ));
    }

    #[test]
    fn fallbacks_follow_sensitivity() {
        assert!(Capability::Fetch.fallback());
        assert!(Capability::Images.fallback());
        assert!(Capability::Dom.fallback());
        assert!(!Capability::Geolocation.fallback());
        assert!(!Capability::InlineScript.fallback());
        assert!(!Capability::FunctionConstructor.fallback());
    }
}
