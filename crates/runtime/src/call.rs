//! Observable parameters of a guarded call, and their sanitization.
//!
//! The adapter that intercepts host APIs hands over whatever the page passed.
//! [`CapabilityCall::from_raw`] never rejects that input: anything of the
//! wrong shape is replaced by the capability's safe default and the call is
//! flagged as sanitized.

use policy::Capability;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageArea {
    Local,
    Session,
}

/// A single attempt to use a capability.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CapabilityCall {
    Fetch { url: String, method: String, body_bytes: usize },
    Xhr { url: String, method: String },
    WebSocket { url: String },
    Beacon { url: String, body_bytes: usize },
    Storage { area: StorageArea, op: String, key: Option<String> },
    IndexedDb { database: String },
    CookieRead,
    CookieWrite { name: String },
    DomMutation { op: String },
    Geolocation { watch: bool },
    Media { audio: bool, video: bool },
    Clipboard { op: String },
    Notification,
    PeerConnection { config: Value },
    Eval { source_bytes: usize },
    FunctionConstructor { arg_count: usize },
    Script { src: Option<String> },
    MotionSensor { event: String },
    Image { url: String },
    Style { href: Option<String> },
}

/// A call together with whether its parameters had to be repaired.
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedCall {
    pub call: CapabilityCall,
    pub sanitized: bool,
}

impl From<CapabilityCall> for SanitizedCall {
    fn from(call: CapabilityCall) -> Self {
        Self {
            call,
            sanitized: false,
        }
    }
}

impl CapabilityCall {
    /// The capability this call is checked against. Media capture reports
    /// the camera when video is requested (or nothing is), the microphone
    /// otherwise.
    pub fn capability(&self) -> Capability {
        match self {
            CapabilityCall::Fetch { .. } => Capability::Fetch,
            CapabilityCall::Xhr { .. } => Capability::Xhr,
            CapabilityCall::WebSocket { .. } => Capability::WebSocket,
            CapabilityCall::Beacon { .. } => Capability::Beacon,
            CapabilityCall::Storage {
                area: StorageArea::Local,
                ..
            } => Capability::LocalStorage,
            CapabilityCall::Storage {
                area: StorageArea::Session,
                ..
            } => Capability::SessionStorage,
            CapabilityCall::IndexedDb { .. } => Capability::IndexedDb,
            CapabilityCall::CookieRead | CapabilityCall::CookieWrite { .. } => Capability::Cookies,
            CapabilityCall::DomMutation { .. } => Capability::Dom,
            CapabilityCall::Geolocation { .. } => Capability::Geolocation,
            CapabilityCall::Media { audio, video } => {
                if *video || !*audio {
                    Capability::Camera
                } else {
                    Capability::Microphone
                }
            }
            CapabilityCall::Clipboard { .. } => Capability::Clipboard,
            CapabilityCall::Notification => Capability::Notifications,
            CapabilityCall::PeerConnection { .. } => Capability::PeerConnection,
            CapabilityCall::Eval { .. } => Capability::Eval,
            CapabilityCall::FunctionConstructor { .. } => Capability::FunctionConstructor,
            CapabilityCall::Script { src: None } => Capability::InlineScript,
            CapabilityCall::Script { src: Some(_) } => Capability::ExternalScript,
            CapabilityCall::MotionSensor { .. } => Capability::MotionSensors,
            CapabilityCall::Image { .. } => Capability::Images,
            CapabilityCall::Style { .. } => Capability::Styles,
        }
    }

    /// Build a call from the raw parameters the adapter observed.
    pub fn from_raw(capability: Capability, params: &Value) -> SanitizedCall {
        let mut raw = Raw::new(params);
        let call = match capability {
            Capability::Fetch => CapabilityCall::Fetch {
                url: raw.string("url"),
                method: raw.method(),
                body_bytes: raw.count("bodyBytes"),
            },
            Capability::Xhr => CapabilityCall::Xhr {
                url: raw.string("url"),
                method: raw.method(),
            },
            Capability::WebSocket => CapabilityCall::WebSocket {
                url: raw.string("url"),
            },
            Capability::Beacon => CapabilityCall::Beacon {
                url: raw.string("url"),
                body_bytes: raw.count("bodyBytes"),
            },
            Capability::LocalStorage | Capability::SessionStorage => CapabilityCall::Storage {
                area: if capability == Capability::LocalStorage {
                    StorageArea::Local
                } else {
                    StorageArea::Session
                },
                op: raw.string_or("op", "getItem"),
                key: raw.optional_string("key"),
            },
            Capability::IndexedDb => CapabilityCall::IndexedDb {
                database: raw.string("database"),
            },
            Capability::Cookies => match raw.optional_string("cookie") {
                Some(cookie) => CapabilityCall::CookieWrite {
                    name: cookie_name(&cookie).to_string(),
                },
                None => CapabilityCall::CookieRead,
            },
            Capability::Dom => CapabilityCall::DomMutation {
                op: raw.string_or("op", "unknown"),
            },
            Capability::Geolocation => CapabilityCall::Geolocation {
                watch: raw.flag("watch"),
            },
            Capability::Camera | Capability::Microphone => raw.media(capability),
            Capability::Clipboard => CapabilityCall::Clipboard {
                op: raw.string_or("op", "read"),
            },
            Capability::Notifications => CapabilityCall::Notification,
            Capability::PeerConnection => CapabilityCall::PeerConnection {
                config: raw.whole_object(),
            },
            Capability::Eval => CapabilityCall::Eval {
                source_bytes: raw.count("sourceBytes"),
            },
            Capability::FunctionConstructor => CapabilityCall::FunctionConstructor {
                arg_count: raw.count("argCount"),
            },
            Capability::InlineScript => CapabilityCall::Script { src: None },
            Capability::ExternalScript => CapabilityCall::Script {
                src: Some(raw.string("src")),
            },
            Capability::MotionSensors => CapabilityCall::MotionSensor {
                event: raw.string_or("event", "devicemotion"),
            },
            Capability::Images => CapabilityCall::Image {
                url: raw.string("url"),
            },
            Capability::Styles => CapabilityCall::Style {
                href: raw.optional_string("href"),
            },
        };
        SanitizedCall {
            call,
            sanitized: raw.repaired,
        }
    }
}

/// `name=value; Path=/` → `name`.
pub fn cookie_name(cookie: &str) -> &str {
    cookie
        .split(';')
        .next()
        .unwrap_or_default()
        .split('=')
        .next()
        .unwrap_or_default()
        .trim()
}

/// Field reader that records every repair it makes.
struct Raw<'a> {
    params: &'a Value,
    fields: Option<&'a Map<String, Value>>,
    repaired: bool,
}

impl<'a> Raw<'a> {
    fn new(params: &'a Value) -> Self {
        let fields = params.as_object();
        // Null means "no arguments"; any other non-object is malformed.
        let repaired = fields.is_none() && !params.is_null();
        Self {
            params,
            fields,
            repaired,
        }
    }

    fn field(&self, name: &str) -> Option<&'a Value> {
        self.fields.and_then(|f| f.get(name)).filter(|v| !v.is_null())
    }

    fn optional_string(&mut self, name: &str) -> Option<String> {
        match self.field(name) {
            None => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => {
                self.repaired = true;
                Some(n.to_string())
            }
            Some(_) => {
                self.repaired = true;
                None
            }
        }
    }

    fn string(&mut self, name: &str) -> String {
        self.optional_string(name).unwrap_or_default()
    }

    fn string_or(&mut self, name: &str, default: &str) -> String {
        self.optional_string(name)
            .unwrap_or_else(|| default.to_string())
    }

    fn method(&mut self) -> String {
        self.string_or("method", "GET").to_ascii_uppercase()
    }

    fn count(&mut self, name: &str) -> usize {
        match self.field(name) {
            None => 0,
            Some(v) => match v.as_u64() {
                Some(n) => usize::try_from(n).unwrap_or(usize::MAX),
                None => {
                    self.repaired = true;
                    0
                }
            },
        }
    }

    fn flag(&mut self, name: &str) -> bool {
        match self.field(name) {
            None => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                self.repaired = true;
                false
            }
        }
    }

    /// Media constraints: each kind may be a boolean or a constraint object
    /// (meaning "requested"). With no usable constraints the capability the
    /// adapter named is treated as the one requested.
    fn media(&mut self, capability: Capability) -> CapabilityCall {
        let mut kind = |name: &str| match self.field(name) {
            None => None,
            Some(Value::Bool(b)) => Some(*b),
            Some(Value::Object(_)) => Some(true),
            Some(_) => {
                self.repaired = true;
                Some(false)
            }
        };
        let audio = kind("audio");
        let video = kind("video");
        match (audio, video) {
            (None, None) => CapabilityCall::Media {
                audio: capability == Capability::Microphone,
                video: capability == Capability::Camera,
            },
            (audio, video) => CapabilityCall::Media {
                audio: audio.unwrap_or(false),
                video: video.unwrap_or(false),
            },
        }
    }

    /// The whole argument as an object; anything else becomes `{}`.
    fn whole_object(&self) -> Value {
        match self.params {
            Value::Object(_) => self.params.clone(),
            _ => Value::Object(Map::new()),
        }
    }
}
