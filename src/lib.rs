//! # a3s-sentinel
//!
//! Zero-trust decision engine for DNS, syscall and HTTP events in the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-sentinel` turns raw security events into ALLOW / REVIEW / BLOCK
//! verdicts. Every verdict carries a risk level, the reasons behind it and
//! the component findings that produced it. REVIEW verdicts become pending
//! approvals for a human, and every decision lands in an append-only audit
//! trail.
//!
//! ## Quick Start
//!
//! ```rust
//! use a3s_sentinel::{Action, DecisionEngine, Event, SentinelConfig};
//!
//! # async fn example() -> a3s_sentinel::Result<()> {
//! let engine = DecisionEngine::from_config(&SentinelConfig::default())?;
//!
//! let decision = engine.decide(&Event::dns("malicious-domain.com", "10.0.0.5")).await;
//! assert_eq!(decision.action, Action::Block);
//! println!("{}: {:?}", decision.action, decision.reasons);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - **StaticClassifier** - case-insensitive substring allow/deny lists plus a grey heuristic
//! - **ThreatIntelCache** - TTL cache with in-flight dedup over a [`ReputationProvider`]
//! - **DgaDetector / TunnelDetector** - lexical and volumetric DNS anomalies
//! - **SyscallPolicy / HttpPolicy** - rule sets for the other event sources
//! - **DecisionEngine** - short-circuit evaluation, always returns a decision
//! - **ApprovalWorkflow** - PENDING to APPROVED or REJECTED, exactly once
//! - **AuditSink** - in-memory ring or JSON Lines file
//! - **Sentinel** - normalize, decide, approve, audit over an event stream

pub mod approval;
pub mod audit;
pub mod classifier;
pub mod clock;
pub mod config;
pub mod dga;
pub mod engine;
pub mod error;
pub mod http;
pub mod intel;
pub mod normalizer;
pub mod sentinel;
pub mod syscall;
pub mod tunnel;
pub mod types;

// Re-export core types
pub use config::{Live, SentinelConfig, ThreatEntry};
pub use error::{Result, SentinelError};
pub use types::{
    Action, AnomalyScore, ApprovalStatus, Classification, ComponentDetails, Decision, Event,
    PendingApproval, ReputationResult, RiskLevel, SourceKind, TunnelReport,
};

// Re-export components for convenience
pub use approval::{ApprovalNotice, ApprovalReply, ApprovalWorkflow};
pub use audit::{AuditEntry, AuditSink, JsonlAuditSink, MemoryAuditSink};
pub use classifier::{ListKind, StaticClassifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use dga::DgaDetector;
pub use engine::DecisionEngine;
pub use http::{HttpPolicy, IntentAnalyzer, OllamaIntentAnalyzer, RuleOnlyAnalyzer};
pub use intel::{ReputationProvider, StaticReputationProvider, ThreatIntelCache};
pub use normalizer::RawEvent;
pub use sentinel::{Outcome, Sentinel, StatsSnapshot};
pub use syscall::SyscallPolicy;
pub use tunnel::TunnelDetector;
