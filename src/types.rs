//! Core data model for the sentinel
//!
//! Records use camelCase JSON; verdict tokens (`ALLOW`, `HIGH`,
//! `BLACKLIST`, ...) serialize in upper case so audit lines read the
//! same as the decision vocabulary.

use crate::http::HttpAssessment;
use crate::syscall::SyscallFinding;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Kind of source that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// DNS lookup observed on the wire
    Dns,
    /// Kernel-level syscall observed by a probe
    Syscall,
    /// HTTP API call seen by a gateway
    Http,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SourceKind::Dns => "dns",
            SourceKind::Syscall => "syscall",
            SourceKind::Http => "http",
        })
    }
}

/// A normalized security-relevant event
///
/// Built once by the normalizer and only read afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event identifier (evt-<uuid>)
    pub id: String,

    /// Source discriminant
    pub source_kind: SourceKind,

    /// Domain, request path or command line
    pub subject: String,

    /// Client address or process identity
    pub actor: String,

    /// Unix timestamp in milliseconds
    pub timestamp: u64,

    /// Source-specific attributes (query type, method, pid, ...)
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Event {
    /// Create a new event with auto-generated id and timestamp
    pub fn new(
        source_kind: SourceKind,
        subject: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("evt-{}", uuid::Uuid::new_v4()),
            source_kind,
            subject: subject.into(),
            actor: actor.into(),
            timestamp: crate::clock::now_millis(),
            attributes: HashMap::new(),
        }
    }

    /// Shorthand for a DNS lookup event
    pub fn dns(domain: impl Into<String>, client: impl Into<String>) -> Self {
        Self::new(SourceKind::Dns, domain, client)
    }

    /// Add an attribute entry
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Override the observation time
    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Look up an attribute
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Static list classification of a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    Whitelist,
    Blacklist,
    Greylist,
    Unknown,
}

/// Reputation verdict for a subject, as returned by an intel provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReputationResult {
    /// Known malicious
    pub threat: bool,

    /// Not confirmed malicious but flagged
    #[serde(default)]
    pub suspicious: bool,

    /// Threat category (e.g. "C2", "phishing")
    #[serde(default)]
    pub category: String,

    /// Provider confidence in [0, 1]
    pub confidence: f64,

    /// Feeds that contributed to the verdict
    #[serde(default)]
    pub sources: Vec<String>,

    /// Unix millis when the verdict was fetched
    #[serde(default)]
    pub fetched_at: u64,

    /// Set when the verdict is a fail-open fallback rather than a real answer
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

impl ReputationResult {
    /// Clean verdict with full confidence
    pub fn clean(fetched_at: u64) -> Self {
        Self {
            threat: false,
            suspicious: false,
            category: String::new(),
            confidence: 1.0,
            sources: Vec::new(),
            fetched_at,
            degraded: false,
        }
    }

    /// Neutral fail-open verdict used when the provider is unavailable
    pub fn degraded(fetched_at: u64) -> Self {
        Self {
            category: "unavailable".to_string(),
            confidence: 0.0,
            degraded: true,
            ..Self::clean(fetched_at)
        }
    }
}

/// DGA score and the features that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalyScore {
    /// Weighted score in [0, 1]
    pub score: f64,
    /// `score >= threshold`
    pub is_dga: bool,
    /// Shannon entropy (bits per char) of the name without its TLD
    pub entropy: f64,
    /// Character length of the name without its TLD
    pub length: usize,
    /// Digits / length
    pub digit_ratio: f64,
    /// Consonants / alphabetic chars
    pub consonant_ratio: f64,
    /// Vowels / alphabetic chars
    pub vowel_ratio: f64,
}

/// Result of a tunnel check for one (actor, subject-root) key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelReport {
    /// Any heuristic fired
    pub is_tunnel: bool,
    /// Queries in the trailing window, current one included
    pub query_count: usize,
    /// Configured per-window threshold
    pub max_allowed: usize,
    /// Label count minus two
    pub subdomain_depth: usize,
    /// Rate heuristic fired
    pub rate_exceeded: bool,
    /// Depth heuristic fired
    pub too_deep: bool,
    /// Encoding heuristic fired
    pub encoded: bool,
}

/// Final verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Allow,
    Review,
    Block,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Allow => "ALLOW",
            Action::Review => "REVIEW",
            Action::Block => "BLOCK",
        })
    }
}

/// Risk grade, ordered from least to most severe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Raise to at least `floor`; never lowers
    pub fn at_least(self, floor: RiskLevel) -> RiskLevel {
        self.max(floor)
    }

    /// Parse an upper/lower case level name
    pub fn parse(s: &str) -> Option<RiskLevel> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(RiskLevel::Low),
            "MEDIUM" => Some(RiskLevel::Medium),
            "HIGH" => Some(RiskLevel::High),
            "CRITICAL" => Some(RiskLevel::Critical),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        })
    }
}

/// Raw output of every check that ran for a decision
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reputation: Option<ReputationResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dga: Option<AnomalyScore>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<TunnelReport>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syscall: Option<SyscallFinding>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpAssessment>,
}

/// Verdict for one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Event this decision belongs to
    pub event_id: String,

    pub action: Action,

    pub risk_level: RiskLevel,

    /// One human-readable line per triggered rule
    #[serde(default)]
    pub reasons: Vec<String>,

    /// Raw check results
    #[serde(default)]
    pub component_details: ComponentDetails,

    /// Unix millis when the decision was made
    pub decided_at: u64,
}

impl Decision {
    /// Starting point: ALLOW at LOW with nothing recorded
    pub fn allow(event_id: impl Into<String>, decided_at: u64) -> Self {
        Self {
            event_id: event_id.into(),
            action: Action::Allow,
            risk_level: RiskLevel::Low,
            reasons: Vec::new(),
            component_details: ComponentDetails::default(),
            decided_at,
        }
    }

    /// Set action and risk together
    pub fn set(&mut self, action: Action, risk_level: RiskLevel) {
        self.action = action;
        self.risk_level = risk_level;
    }

    /// Append a reason line
    pub fn reason(&mut self, reason: impl Into<String>) {
        self.reasons.push(reason.into());
    }
}

/// Lifecycle state of an approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    /// Approved or rejected
    pub fn is_terminal(self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApprovalStatus::Pending => "PENDING",
            ApprovalStatus::Approved => "APPROVED",
            ApprovalStatus::Rejected => "REJECTED",
        })
    }
}

/// A REVIEW verdict awaiting a human decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingApproval {
    /// Approval identifier (apr-<uuid>)
    pub id: String,
    pub event: Event,
    pub decision: Decision,
    pub status: ApprovalStatus,
    /// Unix millis
    pub created_at: u64,
    /// Unix millis, set once on resolution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
