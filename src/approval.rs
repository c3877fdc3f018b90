//! Human approval workflow
//!
//! A REVIEW verdict is registered as a pending approval and resolved
//! later by an external approver. The engine never waits on a human.
//! Each approval moves PENDING → APPROVED or PENDING → REJECTED exactly
//! once; resolving twice is an error rather than an overwrite.
//!
//! Lifecycle changes are broadcast as [`ApprovalNotice`]s for chat and
//! console surfaces.

use crate::clock::SharedClock;
use crate::error::{Result, SentinelError};
use crate::types::{ApprovalStatus, Decision, Event, PendingApproval};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

/// Approval lifecycle notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "approval", rename_all = "snake_case")]
pub enum ApprovalNotice {
    Created(PendingApproval),
    Resolved(PendingApproval),
}

impl ApprovalNotice {
    pub fn approval(&self) -> &PendingApproval {
        match self {
            ApprovalNotice::Created(a) | ApprovalNotice::Resolved(a) => a,
        }
    }
}

/// A chat-style approver reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalReply {
    Approve,
    Reject,
}

impl ApprovalReply {
    /// Recognizes yes/y/approve/allow and no/n/reject/deny, with or
    /// without a leading slash
    pub fn parse(text: &str) -> Option<ApprovalReply> {
        let trimmed = text.trim().to_lowercase();
        match trimmed.trim_start_matches('/') {
            "yes" | "y" | "approve" | "allow" => Some(ApprovalReply::Approve),
            "no" | "n" | "reject" | "deny" => Some(ApprovalReply::Reject),
            _ => None,
        }
    }

    pub fn approved(self) -> bool {
        self == ApprovalReply::Approve
    }
}

/// Pending approval registry
pub struct ApprovalWorkflow {
    approvals: RwLock<HashMap<String, PendingApproval>>,
    tx: broadcast::Sender<ApprovalNotice>,
    clock: SharedClock,
}

impl ApprovalWorkflow {
    /// `capacity` is the notice buffer size
    pub fn new(capacity: usize, clock: SharedClock) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            approvals: RwLock::new(HashMap::new()),
            tx,
            clock,
        }
    }

    /// Register a REVIEW decision, returning the new approval id
    pub async fn create(&self, event: &Event, decision: &Decision) -> String {
        let id = format!("apr-{}", uuid::Uuid::new_v4());
        let approval = PendingApproval {
            id: id.clone(),
            event: event.clone(),
            decision: decision.clone(),
            status: ApprovalStatus::Pending,
            created_at: self.clock.now_millis(),
            resolved_at: None,
            approver: None,
            reason: None,
        };

        self.approvals
            .write()
            .await
            .insert(id.clone(), approval.clone());

        tracing::info!(
            approval_id = %id,
            event_id = %event.id,
            subject = %event.subject,
            "Approval requested"
        );
        let _ = self.tx.send(ApprovalNotice::Created(approval));
        id
    }

    /// Approve or reject a pending approval
    pub async fn resolve(
        &self,
        id: &str,
        approved: bool,
        approver: &str,
        reason: Option<String>,
    ) -> Result<PendingApproval> {
        let resolved = {
            let mut approvals = self.approvals.write().await;
            let approval = approvals
                .get_mut(id)
                .ok_or_else(|| SentinelError::ApprovalNotFound(id.to_string()))?;

            if approval.status.is_terminal() {
                return Err(SentinelError::ApprovalAlreadyResolved {
                    id: id.to_string(),
                    status: approval.status,
                });
            }

            approval.status = if approved {
                ApprovalStatus::Approved
            } else {
                ApprovalStatus::Rejected
            };
            approval.resolved_at = Some(self.clock.now_millis());
            approval.approver = Some(approver.to_string());
            approval.reason = reason;
            approval.clone()
        };

        tracing::info!(
            approval_id = %id,
            status = %resolved.status,
            approver = approver,
            "Approval resolved"
        );
        let _ = self.tx.send(ApprovalNotice::Resolved(resolved.clone()));
        Ok(resolved)
    }

    /// Resolve from a chat reply; `Ok(None)` when the text is not a reply
    pub async fn respond(
        &self,
        id: &str,
        text: &str,
        approver: &str,
    ) -> Result<Option<PendingApproval>> {
        match ApprovalReply::parse(text) {
            Some(reply) => self.resolve(id, reply.approved(), approver, None).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn get(&self, id: &str) -> Option<PendingApproval> {
        self.approvals.read().await.get(id).cloned()
    }

    /// Approvals oldest first, optionally filtered by status
    pub async fn list(&self, status: Option<ApprovalStatus>) -> Vec<PendingApproval> {
        let approvals = self.approvals.read().await;
        let mut items: Vec<_> = approvals
            .values()
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        items
    }

    pub async fn pending_count(&self) -> usize {
        self.approvals
            .read()
            .await
            .values()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .count()
    }

    /// Lifecycle notices; slow receivers see `Lagged`
    pub fn subscribe(&self) -> broadcast::Receiver<ApprovalNotice> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::types::{Action, RiskLevel};
    use std::sync::Arc;
    use std::time::Duration;

    fn review(event: &Event) -> Decision {
        let mut d = Decision::allow(&event.id, 0);
        d.set(Action::Review, RiskLevel::High);
        d
    }

    fn workflow(clock: &ManualClock) -> ApprovalWorkflow {
        ApprovalWorkflow::new(16, Arc::new(clock.clone()))
    }

    #[tokio::test]
    async fn test_create_and_approve() {
        let clock = ManualClock::new(1_000);
        let wf = workflow(&clock);
        let event = Event::dns("x7k2q9z4w8m3.com", "10.0.0.1");

        let id = wf.create(&event, &review(&event)).await;
        assert!(id.starts_with("apr-"));
        assert_eq!(wf.pending_count().await, 1);

        clock.advance(Duration::from_secs(5));
        let resolved = wf
            .resolve(&id, true, "alice", Some("known vendor".to_string()))
            .await
            .unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Approved);
        assert_eq!(resolved.created_at, 1_000);
        assert_eq!(resolved.resolved_at, Some(6_000));
        assert_eq!(resolved.approver.as_deref(), Some("alice"));
        assert_eq!(wf.pending_count().await, 0);
        assert_eq!(wf.get(&id).await.unwrap(), resolved);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let wf = workflow(&ManualClock::new(0));
        let err = wf.resolve("apr-missing", true, "bob", None).await.unwrap_err();
        assert!(matches!(err, SentinelError::ApprovalNotFound(ref id) if id == "apr-missing"));
    }

    #[tokio::test]
    async fn test_second_resolve_is_rejected() {
        let wf = workflow(&ManualClock::new(0));
        let event = Event::dns("x7k2q9z4w8m3.com", "10.0.0.1");
        let id = wf.create(&event, &review(&event)).await;

        wf.resolve(&id, false, "alice", None).await.unwrap();
        let err = wf.resolve(&id, true, "mallory", None).await.unwrap_err();
        assert!(matches!(
            err,
            SentinelError::ApprovalAlreadyResolved { status: ApprovalStatus::Rejected, .. }
        ));

        let stored = wf.get(&id).await.unwrap();
        assert_eq!(stored.status, ApprovalStatus::Rejected);
        assert_eq!(stored.approver.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_concurrent_resolves_single_winner() {
        let wf = Arc::new(workflow(&ManualClock::new(0)));
        let event = Event::dns("x7k2q9z4w8m3.com", "10.0.0.1");
        let id = wf.create(&event, &review(&event)).await;

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let wf = wf.clone();
                let id = id.clone();
                tokio::spawn(async move { wf.resolve(&id, i % 2 == 0, &format!("op{i}"), None).await })
            })
            .collect();

        let mut ok = 0;
        for h in handles {
            if h.await.unwrap().is_ok() {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn test_notices_and_listing() {
        let clock = ManualClock::new(0);
        let wf = workflow(&clock);
        let mut rx = wf.subscribe();

        let first = Event::dns("one.example", "h");
        let a = wf.create(&first, &review(&first)).await;
        clock.advance(Duration::from_millis(10));
        let second = Event::dns("two.example", "h");
        let b = wf.create(&second, &review(&second)).await;
        wf.resolve(&a, true, "alice", None).await.unwrap();

        assert!(matches!(rx.recv().await.unwrap(), ApprovalNotice::Created(ref p) if p.id == a));
        assert!(matches!(rx.recv().await.unwrap(), ApprovalNotice::Created(ref p) if p.id == b));
        let notice = rx.recv().await.unwrap();
        assert!(matches!(notice, ApprovalNotice::Resolved(_)));
        assert_eq!(notice.approval().status, ApprovalStatus::Approved);

        let all = wf.list(None).await;
        assert_eq!(all.iter().map(|p| p.id.clone()).collect::<Vec<_>>(), vec![a, b.clone()]);
        let pending = wf.list(Some(ApprovalStatus::Pending)).await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b);
    }

    #[tokio::test]
    async fn test_respond_with_chat_reply() {
        let wf = workflow(&ManualClock::new(0));
        let event = Event::dns("x7k2q9z4w8m3.com", "10.0.0.1");
        let id = wf.create(&event, &review(&event)).await;

        assert!(wf.respond(&id, "what is this?", "bob").await.unwrap().is_none());
        let resolved = wf.respond(&id, " /Deny ", "bob").await.unwrap().unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Rejected);
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(ApprovalReply::parse("Y"), Some(ApprovalReply::Approve));
        assert_eq!(ApprovalReply::parse("  allow "), Some(ApprovalReply::Approve));
        assert_eq!(ApprovalReply::parse("/approve"), Some(ApprovalReply::Approve));
        assert_eq!(ApprovalReply::parse("no"), Some(ApprovalReply::Reject));
        assert_eq!(ApprovalReply::parse("/reject"), Some(ApprovalReply::Reject));
        assert_eq!(ApprovalReply::parse("maybe"), None);
        assert!(ApprovalReply::Approve.approved());
        assert!(!ApprovalReply::Reject.approved());
    }
}
