//! Ingestion pipeline
//!
//! `Sentinel` owns the engine, the approval workflow and the audit sink.
//! Each raw event gets an explicit [`Outcome`]; failures are logged and
//! counted and never stop the stream.

use crate::approval::ApprovalWorkflow;
use crate::audit::{AuditEntry, AuditSink, JsonlAuditSink, MemoryAuditSink};
use crate::clock;
use crate::config::SentinelConfig;
use crate::engine::DecisionEngine;
use crate::error::Result;
use crate::normalizer::RawEvent;
use crate::types::{Action, Decision, PendingApproval};
use futures::{Stream, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// What happened to one raw event
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Decided {
        decision: Decision,
        #[serde(skip_serializing_if = "Option::is_none")]
        approval_id: Option<String>,
    },
    Rejected {
        reason: String,
    },
}

impl Outcome {
    pub fn decision(&self) -> Option<&Decision> {
        match self {
            Outcome::Decided { decision, .. } => Some(decision),
            Outcome::Rejected { .. } => None,
        }
    }
}

/// Running counters
#[derive(Debug, Default)]
pub struct IngestStats {
    processed: AtomicU64,
    rejected: AtomicU64,
    allowed: AtomicU64,
    reviewed: AtomicU64,
    blocked: AtomicU64,
    audit_failures: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub processed: u64,
    pub rejected: u64,
    pub allowed: u64,
    pub reviewed: u64,
    pub blocked: u64,
    pub audit_failures: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            reviewed: self.reviewed.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            audit_failures: self.audit_failures.load(Ordering::Relaxed),
        }
    }

    fn count_action(&self, action: Action) {
        let counter = match action {
            Action::Allow => &self.allowed,
            Action::Review => &self.reviewed,
            Action::Block => &self.blocked,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Engine + approvals + audit, driven event by event
pub struct Sentinel {
    engine: DecisionEngine,
    approvals: ApprovalWorkflow,
    audit: Arc<dyn AuditSink>,
    stats: IngestStats,
}

impl Sentinel {
    pub fn new(engine: DecisionEngine, approvals: ApprovalWorkflow, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            engine,
            approvals,
            audit,
            stats: IngestStats::default(),
        }
    }

    /// Build from config: wall clock, JSONL audit when a path is set,
    /// in-memory audit otherwise
    pub async fn from_config(config: &SentinelConfig) -> Result<Self> {
        let engine = DecisionEngine::from_config(config)?;
        let approvals = ApprovalWorkflow::new(config.approval.notify_capacity, clock::system());
        let audit: Arc<dyn AuditSink> = match &config.audit.path {
            Some(path) => Arc::new(JsonlAuditSink::open(path).await?),
            None => Arc::new(MemoryAuditSink::new(config.audit.memory_capacity)),
        };
        Ok(Self::new(engine, approvals, audit))
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn approvals(&self) -> &ApprovalWorkflow {
        &self.approvals
    }

    pub fn audit(&self) -> &Arc<dyn AuditSink> {
        &self.audit
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Normalize, decide, register an approval on REVIEW, audit
    pub async fn handle(&self, raw: RawEvent) -> Outcome {
        let source = raw.source_kind();
        let event = match raw.normalize() {
            Ok(event) => event,
            Err(e) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(source = %source, error = %e, "Rejected malformed event");
                return Outcome::Rejected {
                    reason: e.to_string(),
                };
            }
        };

        let decision = self.engine.decide(&event).await;
        self.stats.processed.fetch_add(1, Ordering::Relaxed);
        self.stats.count_action(decision.action);
        self.write_audit(AuditEntry::decision(&event, &decision)).await;

        let approval_id = if decision.action == Action::Review {
            let id = self.approvals.create(&event, &decision).await;
            if let Some(approval) = self.approvals.get(&id).await {
                self.write_audit(AuditEntry::approval_created(&approval)).await;
            }
            Some(id)
        } else {
            None
        };

        Outcome::Decided {
            decision,
            approval_id,
        }
    }

    /// Record an input line that could not be parsed at all
    pub fn reject_unparsed(&self, reason: &str) -> Outcome {
        self.stats.rejected.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(error = reason, "Rejected unparseable input");
        Outcome::Rejected {
            reason: reason.to_string(),
        }
    }

    /// Turn one input line into a raw event
    ///
    /// Blank lines yield `Ok(None)`. Unreadable or unparseable lines are
    /// counted as rejected and returned as the `Err` outcome.
    pub fn accept_line(
        &self,
        line: std::io::Result<String>,
    ) -> std::result::Result<Option<RawEvent>, Outcome> {
        let line = line.map_err(|e| self.reject_unparsed(&format!("unreadable input line: {}", e)))?;
        if line.trim().is_empty() {
            return Ok(None);
        }
        RawEvent::from_json(&line)
            .map(Some)
            .map_err(|e| self.reject_unparsed(&e.to_string()))
    }

    /// Resolve an approval and audit the transition
    pub async fn resolve(
        &self,
        approval_id: &str,
        approved: bool,
        approver: &str,
        reason: Option<String>,
    ) -> Result<PendingApproval> {
        let approval = self
            .approvals
            .resolve(approval_id, approved, approver, reason)
            .await?;
        self.write_audit(AuditEntry::approval_resolved(&approval)).await;
        Ok(approval)
    }

    /// Drive a stream with at most `concurrency` events in flight
    pub async fn run<S>(&self, events: S, concurrency: usize) -> StatsSnapshot
    where
        S: Stream<Item = RawEvent>,
    {
        self.run_with(events, concurrency, |_| {}).await
    }

    /// Like [`run`](Self::run), passing each outcome to `on_outcome`
    pub async fn run_with<S, F>(&self, events: S, concurrency: usize, on_outcome: F) -> StatsSnapshot
    where
        S: Stream<Item = RawEvent>,
        F: Fn(Outcome),
    {
        let on_outcome = &on_outcome;
        events
            .for_each_concurrent(concurrency.max(1), |raw| async move {
                on_outcome(self.handle(raw).await);
            })
            .await;

        let stats = self.stats();
        tracing::info!(
            processed = stats.processed,
            rejected = stats.rejected,
            blocked = stats.blocked,
            reviewed = stats.reviewed,
            "Ingestion finished"
        );
        stats
    }

    async fn write_audit(&self, entry: AuditEntry) {
        if let Err(e) = self.audit.record(entry).await {
            self.stats.audit_failures.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %e, "Audit write failed");
        }
    }
}
