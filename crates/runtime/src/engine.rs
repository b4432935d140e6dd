//! Capability decisions.
//!
//! [`evaluate`] is a pure function of the effective policy, the origin's
//! blocked artifacts and the call. [`Enforcer`] wraps it for one origin:
//! it reads the [`PolicyCache`] and posts one [`LogRecord`] per decision.
//! The adapter's own internal operations check through a [`BypassScope`]
//! handed to them by [`Enforcer::internal`].

use chrono::{DateTime, Utc};
use policy::{Capability, EffectivePolicy};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use storage::{Decision, LogRecord};

use crate::cache::PolicyCache;
use crate::call::{CapabilityCall, SanitizedCall, cookie_name};
use crate::channel::{Envelope, Mailbox};
use crate::Result;

/// How a blocked call fails, in the capability's native way.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DenialSurface {
    /// Error callback with a numeric code (geolocation `PERMISSION_DENIED`).
    AsyncError { code: u16, message: String },
    /// Promise rejection with a DOM exception name.
    Reject { name: String, message: String },
    /// Synchronous exception.
    Throw { name: String, message: String },
    /// An `error` event on the element or request.
    ErrorEvent,
    /// Complete normally with this value.
    Resolve { value: Value },
    /// Silently do nothing.
    Ignore,
}

impl DenialSurface {
    fn reject(name: &str, message: &str) -> Self {
        DenialSurface::Reject {
            name: name.to_string(),
            message: message.to_string(),
        }
    }

    fn throw(name: &str, message: &str) -> Self {
        DenialSurface::Throw {
            name: name.to_string(),
            message: message.to_string(),
        }
    }

    /// The native failure for a call of this shape.
    pub fn for_call(call: &CapabilityCall) -> Self {
        match call {
            CapabilityCall::Fetch { .. } => Self::reject("TypeError", "Failed to fetch"),
            CapabilityCall::Media { .. } => Self::reject("NotAllowedError", "Permission denied"),
            CapabilityCall::Clipboard { .. } => {
                Self::reject("NotAllowedError", "Clipboard access denied")
            }
            CapabilityCall::Eval { .. } | CapabilityCall::FunctionConstructor { .. } => {
                Self::throw("EvalError", "Code generation from strings disallowed")
            }
            CapabilityCall::Storage { .. } | CapabilityCall::IndexedDb { .. } => {
                Self::throw("SecurityError", "The operation is insecure")
            }
            CapabilityCall::WebSocket { .. } | CapabilityCall::PeerConnection { .. } => {
                Self::throw("SecurityError", "Connection blocked")
            }
            CapabilityCall::Xhr { .. }
            | CapabilityCall::Script { .. }
            | CapabilityCall::Image { .. }
            | CapabilityCall::Style { .. } => DenialSurface::ErrorEvent,
            CapabilityCall::Notification => DenialSurface::Resolve {
                value: json!("denied"),
            },
            CapabilityCall::Beacon { .. } => DenialSurface::Resolve { value: json!(false) },
            CapabilityCall::CookieRead => DenialSurface::Resolve { value: json!("") },
            CapabilityCall::DomMutation { .. }
            | CapabilityCall::CookieWrite { .. }
            | CapabilityCall::MotionSensor { .. } => DenialSurface::Ignore,
            CapabilityCall::Geolocation { .. } => DenialSurface::AsyncError {
                code: 1,
                message: "User denied Geolocation".to_string(),
            },
        }
    }
}

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Reason {
    Policy,
    TemporaryOverride,
    BlockedArtifact,
    Bypass,
}

/// Where the call came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallContext {
    pub origin: String,
    pub location: Option<String>,
    pub stack: Option<String>,
}

impl CallContext {
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Self::default()
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

/// The outcome of one check.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// The capability the decision was made on. For media requests that
    /// ask for both kinds this is the first denied one.
    pub capability: Capability,
    pub decision: Decision,
    pub reason: Reason,
    /// Present exactly when the call is blocked.
    pub surface: Option<DenialSurface>,
    /// `None` only for bypassed checks.
    pub record: Option<LogRecord>,
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        self.decision.is_allowed()
    }
}

/// Decide a call. Pure: the same inputs always give the same verdict.
pub fn evaluate(
    policy: &EffectivePolicy,
    blocked: &[String],
    ctx: &CallContext,
    call: &SanitizedCall,
    now: DateTime<Utc>,
) -> Verdict {
    let (capability, allowed, reason) = decide(policy, blocked, &call.call);
    let decision = if allowed {
        Decision::Allowed
    } else {
        Decision::Blocked
    };

    let mut detail = json!({ "call": call.call, "reason": reason });
    if call.sanitized {
        detail["sanitized"] = json!(true);
    }
    let record = LogRecord::new(capability.as_str(), decision, ctx.origin.clone())
        .with_detail(detail)
        .with_location(ctx.location.clone())
        .with_stack(ctx.stack.as_deref())
        .at(now);

    Verdict {
        capability,
        decision,
        reason,
        surface: (!allowed).then(|| DenialSurface::for_call(&call.call)),
        record: Some(record),
    }
}

fn decide(
    policy: &EffectivePolicy,
    blocked: &[String],
    call: &CapabilityCall,
) -> (Capability, bool, Reason) {
    let policy_reason = if policy.is_temporary() {
        Reason::TemporaryOverride
    } else {
        Reason::Policy
    };

    match call {
        CapabilityCall::Media { audio, video } => {
            let mut wanted = Vec::with_capacity(2);
            if *video || !*audio {
                wanted.push(Capability::Camera);
            }
            if *audio {
                wanted.push(Capability::Microphone);
            }
            match wanted.iter().find(|cap| !policy.allows(**cap)) {
                Some(denied) => (*denied, false, policy_reason),
                None => (call.capability(), true, policy_reason),
            }
        }
        CapabilityCall::CookieWrite { name } if blocked.iter().any(|b| b == name) => {
            (Capability::Cookies, false, Reason::BlockedArtifact)
        }
        _ => {
            let capability = call.capability();
            (capability, policy.allows(capability), policy_reason)
        }
    }
}

/// Per-origin decision point used by the enforcement context.
pub struct Enforcer {
    origin: String,
    cache: PolicyCache,
    mailbox: Arc<dyn Mailbox>,
}

/// Bypass tag for one internal operation. Only checks made through the
/// scope skip enforcement; checks made directly on the enforcer, from any
/// thread, are decided and logged as usual.
pub struct BypassScope<'a> {
    enforcer: &'a Enforcer,
}

impl BypassScope<'_> {
    pub fn check(&self, call: CapabilityCall) -> Verdict {
        Verdict {
            capability: call.capability(),
            decision: Decision::Allowed,
            reason: Reason::Bypass,
            surface: None,
            record: None,
        }
    }

    pub fn origin(&self) -> &str {
        &self.enforcer.origin
    }
}

impl Enforcer {
    pub fn new(origin: impl Into<String>, cache: PolicyCache, mailbox: Arc<dyn Mailbox>) -> Self {
        Self {
            origin: origin.into(),
            cache,
            mailbox,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Run an internal operation. Checks it makes through the scope are
    /// allowed and unlogged; the scope ends when `f` returns.
    pub fn internal<T>(&self, f: impl FnOnce(&BypassScope<'_>) -> T) -> T {
        f(&BypassScope { enforcer: self })
    }

    pub fn check(&self, call: CapabilityCall) -> Verdict {
        self.check_at(call.into(), None, None, Utc::now())
    }

    /// Check a call reported by the adapter as an untyped capability name
    /// and raw parameters.
    pub fn check_raw(
        &self,
        capability: &str,
        params: &Value,
        location: Option<&str>,
        stack: Option<&str>,
    ) -> Result<Verdict> {
        let capability: Capability = capability.parse()?;
        let call = CapabilityCall::from_raw(capability, params);
        if call.sanitized {
            tracing::debug!(origin = %self.origin, %capability, "sanitized malformed call parameters");
        }
        Ok(self.check_at(call, location, stack, Utc::now()))
    }

    pub fn check_at(
        &self,
        call: SanitizedCall,
        location: Option<&str>,
        stack: Option<&str>,
        now: DateTime<Utc>,
    ) -> Verdict {
        let policy = self.cache.resolve(&self.origin, now);
        let blocked = match &call.call {
            CapabilityCall::CookieWrite { .. } => self.cache.blocked_names(&self.origin),
            _ => Vec::new(),
        };
        let ctx = CallContext {
            origin: self.origin.clone(),
            location: location.map(str::to_string),
            stack: stack.map(str::to_string),
        };
        let verdict = evaluate(&policy, &blocked, &ctx, &call, now);

        tracing::debug!(
            origin = %self.origin,
            capability = %verdict.capability,
            decision = %verdict.decision,
            "capability decision"
        );
        if let Some(record) = &verdict.record {
            if let Err(e) = self.mailbox.post(Envelope::Log(record.clone())) {
                tracing::debug!(error = %e, "decision log not delivered");
            }
        }
        verdict
    }

    /// Drop blocked artifacts from a `name=value; name2=value2` header.
    pub fn filter_cookie_header(&self, header: &str) -> String {
        let blocked = self.cache.blocked_names(&self.origin);
        if blocked.is_empty() {
            return header.to_string();
        }
        header
            .split(';')
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .filter(|pair| !blocked.iter().any(|b| b == cookie_name(pair)))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Artifacts present in the jar that are blocked for this origin and
    /// should be removed.
    pub fn purge_candidates<S: AsRef<str>>(&self, present: &[S]) -> Vec<String> {
        let blocked = self.cache.blocked_names(&self.origin);
        present
            .iter()
            .map(AsRef::as_ref)
            .filter(|name| blocked.iter().any(|b| b == name))
            .map(str::to_string)
            .collect()
    }
}
