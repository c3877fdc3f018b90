//! Decision engine integration tests
//!
//! End-to-end tests driving the public API with a manual clock: static
//! lists, reputation caching, DGA and tunnel detection, approvals and the
//! JSONL-audited ingestion pipeline.

use a3s_sentinel::{
    Action, ApprovalStatus, ApprovalWorkflow, AuditEntry, AuditSink, Classification,
    DecisionEngine, Event, JsonlAuditSink, ManualClock, Outcome, RawEvent, ReputationProvider,
    ReputationResult, RiskLevel, RuleOnlyAnalyzer, Sentinel, SentinelConfig, SentinelError,
    SourceKind,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

/// Counts lookups and answers clean
#[derive(Default)]
struct CountingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl ReputationProvider for CountingProvider {
    async fn lookup(&self, _subject: &str) -> a3s_sentinel::Result<ReputationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ReputationResult::clean(0))
    }

    fn name(&self) -> &str {
        "counting"
    }
}

fn test_engine(config: &SentinelConfig) -> (DecisionEngine, ManualClock, Arc<CountingProvider>) {
    let clock = ManualClock::new(1_700_000_000_000);
    let provider = Arc::new(CountingProvider::default());
    let engine = DecisionEngine::new(
        config,
        provider.clone(),
        Arc::new(RuleOnlyAnalyzer),
        Arc::new(clock.clone()),
    );
    (engine, clock, provider)
}

fn calls(provider: &CountingProvider) -> usize {
    provider.calls.load(Ordering::SeqCst)
}

// ─── Static Lists ────────────────────────────────────────────────

#[tokio::test]
async fn test_blacklisted_domain_blocks_without_reputation_lookup() {
    let (engine, _, provider) = test_engine(&SentinelConfig::default());

    let decision = engine
        .decide(&Event::dns("malicious-domain.com", "10.0.0.5"))
        .await;

    assert_eq!(decision.action, Action::Block);
    assert_eq!(decision.risk_level, RiskLevel::High);
    assert!(!decision.reasons.is_empty());
    assert!(decision.reasons[0].contains("malicious-domain.com"));
    assert!(decision.component_details.reputation.is_none());
    assert_eq!(calls(&provider), 0);
}

#[tokio::test]
async fn test_whitelisted_domain_allows_without_detectors() {
    let (engine, _, provider) = test_engine(&SentinelConfig::default());

    let decision = engine.decide(&Event::dns("api.github.com", "10.0.0.5")).await;

    assert_eq!(decision.action, Action::Allow);
    assert_eq!(decision.risk_level, RiskLevel::Low);
    assert_eq!(
        decision.component_details.classification,
        Some(Classification::Whitelist)
    );
    assert!(decision.component_details.dga.is_none());
    assert!(decision.component_details.tunnel.is_none());
    assert_eq!(calls(&provider), 0);
}

#[tokio::test]
async fn test_decision_references_its_event() {
    let (engine, clock, _) = test_engine(&SentinelConfig::default());
    let event = Event::dns("mail.example.net", "10.0.0.5");

    let decision = engine.decide(&event).await;

    assert_eq!(decision.event_id, event.id);
    assert_eq!(decision.decided_at, 1_700_000_000_000);
    clock.advance(Duration::from_secs(1));
    let later = engine.decide(&event).await;
    assert_eq!(later.decided_at, 1_700_000_001_000);
}

// ─── DGA ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_dga_names_go_to_review() {
    let mut config = SentinelConfig::default();
    config.dga.threshold = 0.5;
    let (engine, _, _) = test_engine(&config);

    let decision = engine.decide(&Event::dns("abc123def456.xyz", "10.0.0.6")).await;
    assert_eq!(decision.action, Action::Review);
    assert!(decision.component_details.dga.as_ref().unwrap().score >= 0.5);

    let (engine, _, _) = test_engine(&SentinelConfig::default());
    let decision = engine.decide(&Event::dns("x7k2q9z4w8m3.com", "10.0.0.6")).await;
    assert_eq!(decision.action, Action::Review);
    assert_eq!(decision.risk_level, RiskLevel::High);
    let dga = decision.component_details.dga.unwrap();
    assert!(dga.is_dga);
    assert!(dga.score >= 0.7);
}

#[tokio::test]
async fn test_ordinary_name_is_allowed_with_details() {
    let (engine, _, _) = test_engine(&SentinelConfig::default());

    let decision = engine.decide(&Event::dns("mail.example.net", "10.0.0.6")).await;

    assert_eq!(decision.action, Action::Allow);
    let details = &decision.component_details;
    assert_eq!(details.classification, Some(Classification::Unknown));
    assert!(details.reputation.is_some());
    assert!(!details.dga.as_ref().unwrap().is_dga);
    assert!(!details.tunnel.as_ref().unwrap().is_tunnel);
}

// ─── Tunnel ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_deep_subdomain_blocks() {
    let (engine, _, _) = test_engine(&SentinelConfig::default());

    let decision = engine
        .decide(&Event::dns("a1.b2.c3.d4.e5.f6.example.com", "10.0.0.7"))
        .await;

    assert_eq!(decision.action, Action::Block);
    assert_eq!(decision.risk_level, RiskLevel::High);
    let tunnel = decision.component_details.tunnel.unwrap();
    assert!(tunnel.too_deep);
    assert_eq!(tunnel.subdomain_depth, 6);
}

#[tokio::test]
async fn test_query_rate_trips_and_window_slides() {
    let (engine, clock, _) = test_engine(&SentinelConfig::default());
    let event = Event::dns("mail.example.net", "10.0.0.8");

    for _ in 0..50 {
        let decision = engine.decide(&event).await;
        assert_eq!(decision.action, Action::Allow);
    }

    let decision = engine.decide(&event).await;
    assert_eq!(decision.action, Action::Block);
    let tunnel = decision.component_details.tunnel.unwrap();
    assert!(tunnel.rate_exceeded);
    assert_eq!(tunnel.query_count, 51);
    assert_eq!(tunnel.max_allowed, 50);

    // another client is tracked separately
    let other = engine.decide(&Event::dns("mail.example.net", "10.0.0.9")).await;
    assert_eq!(other.action, Action::Allow);

    clock.advance(Duration::from_secs(61));
    let decision = engine.decide(&event).await;
    assert_eq!(decision.action, Action::Allow);
    assert_eq!(decision.component_details.tunnel.unwrap().query_count, 1);
}

// ─── Reputation ──────────────────────────────────────────────────

#[tokio::test]
async fn test_reputation_cached_within_ttl() {
    let (engine, clock, provider) = test_engine(&SentinelConfig::default());
    let event = Event::dns("mail.example.net", "10.0.0.10");

    engine.decide(&event).await;
    clock.advance(Duration::from_secs(3599));
    engine.decide(&event).await;
    assert_eq!(calls(&provider), 1);

    clock.advance(Duration::from_secs(1));
    engine.decide(&event).await;
    assert_eq!(calls(&provider), 2);
}

// ─── Approvals ───────────────────────────────────────────────────

#[tokio::test]
async fn test_approval_resolves_once() {
    let (engine, clock, _) = test_engine(&SentinelConfig::default());
    let approvals = ApprovalWorkflow::new(8, Arc::new(clock.clone()));

    let event = Event::dns("x7k2q9z4w8m3.com", "10.0.0.11");
    let decision = engine.decide(&event).await;
    let id = approvals.create(&event, &decision).await;

    let missing = assert_err!(approvals.resolve("apr-unknown", true, "alice", None).await);
    assert!(matches!(missing, SentinelError::ApprovalNotFound(_)));

    let approved = assert_ok!(approvals.resolve(&id, true, "alice", None).await);
    assert_eq!(approved.status, ApprovalStatus::Approved);

    let again = assert_err!(approvals.resolve(&id, false, "bob", None).await);
    assert!(matches!(
        again,
        SentinelError::ApprovalAlreadyResolved {
            status: ApprovalStatus::Approved,
            ..
        }
    ));
    assert_eq!(approvals.get(&id).await.unwrap().approver.as_deref(), Some("alice"));
}

// ─── Pipeline ────────────────────────────────────────────────────

#[tokio::test]
async fn test_pipeline_with_jsonl_audit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit/decisions.jsonl");
    let audit = Arc::new(assert_ok!(JsonlAuditSink::open(&path).await));

    let (engine, clock, _) = test_engine(&SentinelConfig::default());
    let sentinel = Sentinel::new(
        engine,
        ApprovalWorkflow::new(8, Arc::new(clock.clone())),
        audit.clone(),
    );

    let lines = [
        r#"{"source":"dns","domain":"malicious-domain.com.","client":"10.0.0.12"}"#,
        r#"{"source":"dns","domain":"x7k2q9z4w8m3.com","client":"10.0.0.12","qtype":"a"}"#,
        r#"{"source":"syscall","operation":"connect","pid":42,"comm":"python","addr":"10.1.1.1","port":5432}"#,
        r#"{"source":"http","method":"get","path":"/status","host":"status.github.com","client_ip":"10.0.0.12"}"#,
        r#"{"source":"dns","client":"10.0.0.12"}"#,
    ];

    let mut outcomes = Vec::new();
    for line in lines {
        let raw = assert_ok!(RawEvent::from_json(line));
        outcomes.push(sentinel.handle(raw).await);
    }

    let actions: Vec<_> = outcomes
        .iter()
        .map(|o| o.decision().map(|d| d.action))
        .collect();
    assert_eq!(
        actions,
        vec![
            Some(Action::Block),
            Some(Action::Review),
            Some(Action::Review),
            Some(Action::Allow),
            None,
        ]
    );

    let Outcome::Decided {
        approval_id: Some(approval_id),
        ..
    } = &outcomes[1]
    else {
        panic!("expected an approval for the DGA name");
    };
    assert_ok!(sentinel.resolve(approval_id, false, "alice", Some("unknown vendor".into())).await);
    assert_eq!(sentinel.approvals().pending_count().await, 1);

    let stats = sentinel.stats();
    assert_eq!(stats.processed, 4);
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.blocked, 1);
    assert_eq!(stats.reviewed, 2);
    assert_eq!(stats.allowed, 1);
    assert_eq!(stats.audit_failures, 0);

    // 4 decisions + 2 created + 1 resolved
    let entries = assert_ok!(audit.recent(100).await);
    assert_eq!(entries.len(), 7);
    assert!(matches!(
        &entries[0],
        AuditEntry::ApprovalResolved { status: ApprovalStatus::Rejected, reason: Some(r), .. } if r == "unknown vendor"
    ));

    let text = std::fs::read_to_string(&path).unwrap();
    let first: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(first["type"], "decision");
    assert_eq!(first["event"]["subject"], "malicious-domain.com");
    assert_eq!(first["event"]["sourceKind"], "dns");
    assert_eq!(first["decision"]["action"], "BLOCK");
}

#[tokio::test]
async fn test_normalized_syscall_event_shape() {
    let raw = assert_ok!(RawEvent::from_json(
        r#"{"source":"syscall","operation":"EXEC","pid":7,"argv":"ls -la"}"#
    ));
    let event = assert_ok!(raw.normalize());

    assert_eq!(event.source_kind, SourceKind::Syscall);
    assert_eq!(event.subject, "ls -la");
    assert_eq!(event.actor, "pid:7");
    assert_eq!(event.attribute("operation"), Some("exec"));
}
