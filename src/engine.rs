//! Decision engine
//!
//! Sequences the checks for one event into a verdict. DNS events run the
//! full pipeline:
//!
//! 1. record into the tunnel detector (always)
//! 2. static lists: deny → BLOCK/HIGH, allow → ALLOW/LOW, both final
//! 3. reputation: threat → BLOCK/HIGH (final); suspicious raises risk to MEDIUM
//! 4. DGA: REVIEW/HIGH, evaluation continues
//! 5. tunnel: BLOCK/HIGH (final)
//! 6. otherwise ALLOW at the accumulated risk
//!
//! Syscall and HTTP events share steps 1 and 2, then go to their own rule
//! pass. Every check that ran leaves its raw output in
//! `component_details`.

use crate::classifier::{ListKind, StaticClassifier};
use crate::clock::{self, SharedClock};
use crate::config::{DgaConfig, Live, SentinelConfig};
use crate::dga::DgaDetector;
use crate::error::{Result, SentinelError};
use crate::http::{HttpPolicy, IntentAnalyzer};
use crate::intel::{ReputationProvider, StaticReputationProvider, ThreatIntelCache};
use crate::syscall::SyscallPolicy;
use crate::tunnel::TunnelDetector;
use crate::types::{Action, Classification, Decision, Event, RiskLevel, SourceKind};
use std::sync::Arc;

/// Orchestrates the classifier, detectors and rule passes
pub struct DecisionEngine {
    classifier: StaticClassifier,
    intel: ThreatIntelCache,
    dga: Live<DgaConfig>,
    tunnel: TunnelDetector,
    syscall: SyscallPolicy,
    http: HttpPolicy,
    clock: SharedClock,
}

impl DecisionEngine {
    pub fn new(
        config: &SentinelConfig,
        reputation: Arc<dyn ReputationProvider>,
        analyzer: Arc<dyn IntentAnalyzer>,
        clock: SharedClock,
    ) -> Self {
        Self {
            classifier: StaticClassifier::new(&config.classifier),
            intel: ThreatIntelCache::new(reputation, config.reputation.clone(), clock.clone()),
            dga: Live::new(config.dga.clone()),
            tunnel: TunnelDetector::new(config.tunnel.clone(), clock.clone()),
            syscall: SyscallPolicy::new(config.syscall.clone()),
            http: HttpPolicy::new(config.http.clone(), analyzer),
            clock,
        }
    }

    /// Engine with the in-process reputation provider built from the
    /// reputation lists, the analyzer the HTTP config selects, and
    /// wall-clock time
    pub fn from_config(config: &SentinelConfig) -> Result<Self> {
        config.validate()?;
        let http = HttpPolicy::from_config(config.http.clone())?;
        Ok(Self {
            classifier: StaticClassifier::new(&config.classifier),
            intel: ThreatIntelCache::new(
                Arc::new(StaticReputationProvider::from_config(&config.reputation)),
                config.reputation.clone(),
                clock::system(),
            ),
            dga: Live::new(config.dga.clone()),
            tunnel: TunnelDetector::new(config.tunnel.clone(), clock::system()),
            syscall: SyscallPolicy::new(config.syscall.clone()),
            http,
            clock: clock::system(),
        })
    }

    /// Evaluate one event
    pub async fn decide(&self, event: &Event) -> Decision {
        let mut decision = Decision::allow(&event.id, self.clock.now_millis());

        self.tunnel.record(&event.actor, &event.subject);

        let subject = match event.source_kind {
            SourceKind::Http => event.attribute("host").unwrap_or(event.subject.as_str()),
            _ => event.subject.as_str(),
        };
        if self.apply_static_lists(subject, &mut decision) {
            self.log_decision(event, &decision);
            return decision;
        }

        match event.source_kind {
            SourceKind::Dns => self.decide_dns(event, &mut decision).await,
            SourceKind::Syscall => self.decide_syscall(event, &mut decision),
            SourceKind::Http => self.decide_http(event, &mut decision).await,
        }

        self.log_decision(event, &decision);
        decision
    }

    /// Returns true when a list match decided the event
    fn apply_static_lists(&self, subject: &str, decision: &mut Decision) -> bool {
        let outcome = self.classifier.classify_detailed(subject);
        decision.component_details.classification = Some(outcome.classification);
        let entry = outcome.entry.unwrap_or_default();

        match outcome.classification {
            Classification::Blacklist => {
                decision.set(Action::Block, RiskLevel::High);
                decision.reason(format!("blacklisted: matches deny entry '{}'", entry));
                true
            }
            Classification::Whitelist => {
                decision.set(Action::Allow, RiskLevel::Low);
                decision.reason(format!("whitelisted: matches allow entry '{}'", entry));
                true
            }
            Classification::Greylist => {
                decision.reason("greylisted: short or digit-heavy name");
                false
            }
            Classification::Unknown => false,
        }
    }

    async fn decide_dns(&self, event: &Event, decision: &mut Decision) {
        let subject = event.subject.as_str();

        if self.intel.config().enabled {
            let reputation = self.intel.check(subject).await;
            decision.component_details.reputation = Some(reputation.clone());
            if reputation.threat {
                decision.set(Action::Block, RiskLevel::High);
                decision.reason(format!(
                    "reputation threat: {} (confidence {:.2})",
                    reputation.category, reputation.confidence
                ));
                return;
            }
            if reputation.suspicious {
                decision.risk_level = decision.risk_level.at_least(RiskLevel::Medium);
                decision.reason(format!("reputation suspicious: {}", reputation.category));
            }
        }

        let dga = self.dga.load();
        if dga.enabled {
            let score = DgaDetector::new(dga.threshold).detect(subject);
            if score.is_dga {
                decision.set(Action::Review, RiskLevel::High);
                decision.reason(format!(
                    "DGA-like name: score {:.1} >= {:.1}",
                    score.score, dga.threshold
                ));
            }
            decision.component_details.dga = Some(score);
        }

        if self.tunnel.config().enabled {
            let report = self.tunnel.detect_tunnel(&event.actor, subject);
            if report.is_tunnel {
                decision.set(Action::Block, RiskLevel::High);
                let mut signals = Vec::new();
                if report.rate_exceeded {
                    signals.push(format!(
                        "{} queries in window (max {})",
                        report.query_count, report.max_allowed
                    ));
                }
                if report.too_deep {
                    signals.push(format!("subdomain depth {}", report.subdomain_depth));
                }
                if report.encoded {
                    signals.push("encoded payload".to_string());
                }
                decision.reason(format!("tunneling: {}", signals.join(", ")));
            }
            decision.component_details.tunnel = Some(report);
        }
    }

    fn decide_syscall(&self, event: &Event, decision: &mut Decision) {
        let finding = self.syscall.analyze(event);
        if finding.action != Action::Allow {
            decision.set(finding.action, finding.risk_level.at_least(decision.risk_level));
            decision.reason(format!("{}: {}", finding.operation, finding.reason));
        }
        decision.component_details.syscall = Some(finding);
    }

    async fn decide_http(&self, event: &Event, decision: &mut Decision) {
        let assessment = self.http.assess(event).await;
        decision.set(assessment.action, assessment.risk_level);
        for violation in &assessment.rule.violations {
            decision.reason(violation.clone());
        }
        if assessment.action != Action::Allow {
            decision.reason(format!(
                "blended score {} (rule {}, advisory {})",
                assessment.final_score, assessment.rule.score, assessment.advisory_score
            ));
        }
        decision.component_details.http = Some(assessment);
    }

    fn log_decision(&self, event: &Event, decision: &Decision) {
        match decision.action {
            Action::Allow => tracing::debug!(
                event_id = %event.id,
                source = %event.source_kind,
                subject = %event.subject,
                risk = %decision.risk_level,
                "Event allowed"
            ),
            action => tracing::info!(
                event_id = %event.id,
                source = %event.source_kind,
                subject = %event.subject,
                actor = %event.actor,
                action = %action,
                risk = %decision.risk_level,
                reasons = ?decision.reasons,
                "Event flagged"
            ),
        }
    }

    // ─── Administrative surface ───

    /// Add a static allow/deny entry
    pub fn add_list_entry(&self, kind: ListKind, entry: &str) -> bool {
        self.classifier.add(kind, entry)
    }

    /// Remove a static allow/deny entry
    pub fn remove_list_entry(&self, kind: ListKind, entry: &str) -> bool {
        self.classifier.remove(kind, entry)
    }

    pub fn set_dga_threshold(&self, threshold: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SentinelError::Config(format!(
                "dga threshold must be within [0, 1], got {}",
                threshold
            )));
        }
        self.dga.update(|c| c.threshold = threshold);
        tracing::info!(threshold, "DGA threshold updated");
        Ok(())
    }

    pub fn set_dga_enabled(&self, enabled: bool) {
        self.dga.update(|c| c.enabled = enabled);
        tracing::info!(enabled, "DGA checks toggled");
    }

    pub fn set_tunnel_threshold(&self, max_queries: usize) -> Result<()> {
        if max_queries == 0 {
            return Err(SentinelError::Config(
                "tunnel threshold must be > 0".to_string(),
            ));
        }
        self.tunnel.set_max_queries(max_queries);
        Ok(())
    }

    pub fn set_tunnel_window(&self, window_secs: u64) -> Result<()> {
        if window_secs == 0 {
            return Err(SentinelError::Config(
                "tunnel window must be > 0".to_string(),
            ));
        }
        self.tunnel.set_window_secs(window_secs);
        Ok(())
    }

    pub fn set_tunnel_enabled(&self, enabled: bool) {
        self.tunnel.set_enabled(enabled);
    }

    pub fn set_reputation_enabled(&self, enabled: bool) {
        self.intel.set_enabled(enabled);
    }

    pub fn classifier(&self) -> &StaticClassifier {
        &self.classifier
    }

    pub fn intel(&self) -> &ThreatIntelCache {
        &self.intel
    }

    pub fn tunnel(&self) -> &TunnelDetector {
        &self.tunnel
    }

    pub fn dga_config(&self) -> Arc<DgaConfig> {
        self.dga.load()
    }
}
