//! Heuristic tracking-risk classifier for stored artifacts (cookies).
//!
//! Category is the first matching rule, in order: essential name, tracker
//! name, analytics name, ads name, then persistence. The score is additive:
//!
//! | signal                                   | points |
//! |------------------------------------------|--------|
//! | set by a third party                     | +3     |
//! | persists longer than one day             | +2     |
//! | name matches a known tracker             | +2     |
//! | `HttpOnly` (unreadable by page scripts)  | -2     |
//! | `Secure` (transport-restricted)          | -1     |
//!
//! floored at zero, then bucketed: 0-2 low, 3-5 medium, 6+ high. The result
//! is deterministic for identical inputs; accuracy is not promised.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static ESSENTIAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^(sess(ion)?(_?id)?|phpsessid|jsessionid|asp\.net_sessionid|connect\.sid|_?[cx]srf.*|auth.*|token|__(host|secure)-.*|cart.*|consent.*|cookieconsent.*|lang|locale)$",
    )
    .expect("essential pattern")
});

static TRACKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(^_fbp$|^fr$|^__qca$|^uu?id$|^muid$|^ide$|^test_cookie$|^_pin_unauth$|visitor_?id|track|pixel)",
    )
    .expect("tracker pattern")
});

static ANALYTICS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(^_ga($|_)|^_gid$|^_gat|^__utm[a-z]$|^_hj|^amplitude|^mp_|mixpanel|^_pk_|^ajs_|^_clck$|^_clsk$|analytics)",
    )
    .expect("analytics pattern")
});

static ADS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(^_gcl_|^_gads$|^__gpi$|^ads?_|^ad[sx]?id$|^_uet[sv]id$|^anj$|doubleclick|adroll|criteo)",
    )
    .expect("ads pattern")
});

/// Artifacts living longer than this count as persistent.
pub fn persistence_threshold() -> Duration {
    Duration::days(1)
}

/// A cookie-like record as observed in the jar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub name: String,
    /// Domain that set the artifact, e.g. `.example.test`.
    pub domain: String,
    /// Absent for session artifacts.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Essential,
    RememberMe,
    Analytics,
    Ads,
    Tracker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=2 => RiskTier::Low,
            3..=5 => RiskTier::Medium,
            _ => RiskTier::High,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedArtifact {
    pub name: String,
    pub category: Category,
    pub score: u32,
    pub tier: RiskTier,
    pub reasons: Vec<String>,
}

/// Classify an artifact as seen from a page on `context_origin` at `now`.
pub fn classify(artifact: &Artifact, context_origin: &str, now: DateTime<Utc>) -> ClassifiedArtifact {
    let persistent = is_persistent(artifact, now);
    let tracker_name = TRACKER.is_match(&artifact.name);

    let category = if ESSENTIAL.is_match(&artifact.name) {
        Category::Essential
    } else if tracker_name {
        Category::Tracker
    } else if ANALYTICS.is_match(&artifact.name) {
        Category::Analytics
    } else if ADS.is_match(&artifact.name) {
        Category::Ads
    } else if persistent {
        Category::RememberMe
    } else {
        Category::Essential
    };

    let mut score: i32 = 0;
    let mut reasons = Vec::new();

    if is_third_party(&artifact.domain, context_origin) {
        score += 3;
        reasons.push(format!("set by third party {}", bare_domain(&artifact.domain)));
    }
    if persistent {
        score += 2;
        reasons.push("persists longer than one day".to_string());
    }
    if tracker_name {
        score += 2;
        reasons.push("name matches a known tracker".to_string());
    }
    if artifact.http_only {
        score -= 2;
        reasons.push("not readable by page scripts".to_string());
    }
    if artifact.secure {
        score -= 1;
        reasons.push("sent over secure connections only".to_string());
    }

    let score = score.max(0) as u32;
    ClassifiedArtifact {
        name: artifact.name.clone(),
        category,
        score,
        tier: RiskTier::from_score(score),
        reasons,
    }
}

fn is_persistent(artifact: &Artifact, now: DateTime<Utc>) -> bool {
    artifact
        .expires_at
        .is_some_and(|expires| expires - now > persistence_threshold())
}

/// Cookie domain-match: the artifact is first-party when its domain equals
/// the context host or is a parent domain of it.
fn is_third_party(artifact_domain: &str, context_origin: &str) -> bool {
    let domain = bare_domain(artifact_domain);
    let host = host_of(context_origin);
    if domain.is_empty() || host.is_empty() {
        return false;
    }
    !(host == domain || host.ends_with(&format!(".{domain}")))
}

fn bare_domain(domain: &str) -> String {
    domain.trim().trim_start_matches('.').to_ascii_lowercase()
}

fn host_of(origin: &str) -> String {
    let rest = origin.split_once("://").map_or(origin, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };
    host.to_ascii_lowercase()
}
