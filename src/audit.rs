//! Audit trail
//!
//! Every decision and every approval transition becomes one append-only
//! [`AuditEntry`]. Sinks persist them; a failing sink is reported to the
//! caller, which logs and counts it without failing the event.

use crate::error::Result;
use crate::types::{ApprovalStatus, Decision, Event, PendingApproval};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEntry {
    #[serde(rename_all = "camelCase")]
    Decision {
        timestamp: DateTime<Utc>,
        event: Event,
        decision: Decision,
    },
    #[serde(rename_all = "camelCase")]
    ApprovalCreated {
        timestamp: DateTime<Utc>,
        approval_id: String,
        event_id: String,
    },
    #[serde(rename_all = "camelCase")]
    ApprovalResolved {
        timestamp: DateTime<Utc>,
        approval_id: String,
        status: ApprovalStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        approver: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl AuditEntry {
    pub fn decision(event: &Event, decision: &Decision) -> Self {
        AuditEntry::Decision {
            timestamp: millis_to_utc(decision.decided_at),
            event: event.clone(),
            decision: decision.clone(),
        }
    }

    pub fn approval_created(approval: &PendingApproval) -> Self {
        AuditEntry::ApprovalCreated {
            timestamp: millis_to_utc(approval.created_at),
            approval_id: approval.id.clone(),
            event_id: approval.event.id.clone(),
        }
    }

    pub fn approval_resolved(approval: &PendingApproval) -> Self {
        AuditEntry::ApprovalResolved {
            timestamp: millis_to_utc(approval.resolved_at.unwrap_or(approval.created_at)),
            approval_id: approval.id.clone(),
            status: approval.status,
            approver: approval.approver.clone(),
            reason: approval.reason.clone(),
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AuditEntry::Decision { timestamp, .. }
            | AuditEntry::ApprovalCreated { timestamp, .. }
            | AuditEntry::ApprovalResolved { timestamp, .. } => *timestamp,
        }
    }
}

fn millis_to_utc(millis: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis as i64)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Destination for audit entries
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one entry
    async fn record(&self, entry: AuditEntry) -> Result<()>;

    /// Most recent entries, newest first
    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>>;
}

/// Bounded in-memory ring; oldest entries are evicted first
#[derive(Debug)]
pub struct MemoryAuditSink {
    entries: RwLock<VecDeque<AuditEntry>>,
    capacity: usize,
    total: AtomicU64,
}

impl MemoryAuditSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            total: AtomicU64::new(0),
        }
    }

    /// Entries recorded, evicted ones included
    pub fn total_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
        self.total.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}

/// Append-only JSON Lines file
pub struct JsonlAuditSink {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JsonlAuditSink {
    /// Open (or create) the file for appending, creating parent directories
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        tracing::info!(path = %path.display(), "Audit log opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<()> {
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<AuditEntry>> {
        // Hold the writer lock so a half-written line is never read
        let _file = self.file.lock().await;
        let text = tokio::fs::read_to_string(&self.path).await?;
        let mut entries = Vec::new();
        for line in text.lines().rev().filter(|l| !l.trim().is_empty()).take(limit) {
            match serde_json::from_str(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "Skipping unreadable audit line"),
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Action, RiskLevel};

    fn decided(subject: &str) -> AuditEntry {
        let event = Event::dns(subject, "10.0.0.1");
        let mut decision = Decision::allow(&event.id, 1_700_000_000_000);
        decision.set(Action::Block, RiskLevel::High);
        AuditEntry::decision(&event, &decision)
    }

    #[tokio::test]
    async fn test_memory_sink_is_bounded_newest_first() {
        let sink = MemoryAuditSink::new(2);
        sink.record(decided("a.example")).await.unwrap();
        sink.record(decided("b.example")).await.unwrap();
        sink.record(decided("c.example")).await.unwrap();

        assert_eq!(sink.len().await, 2);
        assert_eq!(sink.total_count(), 3);

        let recent = sink.recent(10).await.unwrap();
        let subjects: Vec<_> = recent
            .iter()
            .map(|e| match e {
                AuditEntry::Decision { event, .. } => event.subject.clone(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(subjects, vec!["c.example", "b.example"]);
    }

    #[tokio::test]
    async fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/audit.jsonl");
        let sink = JsonlAuditSink::open(&path).await.unwrap();

        sink.record(decided("a.example")).await.unwrap();
        sink.record(decided("b.example")).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "decision");
        assert_eq!(first["decision"]["action"], "BLOCK");
        assert_eq!(first["timestamp"], "2023-11-14T22:13:20Z");

        let recent = sink.recent(1).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert!(matches!(&recent[0], AuditEntry::Decision { event, .. } if event.subject == "b.example"));
    }

    #[tokio::test]
    async fn test_jsonl_sink_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        JsonlAuditSink::open(&path)
            .await
            .unwrap()
            .record(decided("a.example"))
            .await
            .unwrap();
        let sink = JsonlAuditSink::open(&path).await.unwrap();
        sink.record(decided("b.example")).await.unwrap();

        assert_eq!(sink.recent(10).await.unwrap().len(), 2);
    }

    #[test]
    fn test_approval_entries() {
        let event = Event::dns("x.example", "h");
        let approval = PendingApproval {
            id: "apr-1".to_string(),
            event: event.clone(),
            decision: Decision::allow(&event.id, 0),
            status: ApprovalStatus::Approved,
            created_at: 1_000,
            resolved_at: Some(2_000),
            approver: Some("alice".to_string()),
            reason: None,
        };

        let created = AuditEntry::approval_created(&approval);
        assert_eq!(created.timestamp().timestamp_millis(), 1_000);

        let resolved = AuditEntry::approval_resolved(&approval);
        assert_eq!(resolved.timestamp().timestamp_millis(), 2_000);
        let json = serde_json::to_value(&resolved).unwrap();
        assert_eq!(json["type"], "approval_resolved");
        assert_eq!(json["approvalId"], "apr-1");
        assert_eq!(json["status"], "APPROVED");
        assert!(json.get("reason").is_none());
    }
}
