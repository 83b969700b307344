use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::{ApprovalStatus, Owner, RuleAction, TaskStatus};

/// Committed governance transitions, pushed to subscribers after the write lands.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GovernanceEvent {
    // ── Sessions ───────────────────────────────────────────────
    SessionOpened {
        owner: Owner,
        session_id: Uuid,
        provider: String,
    },
    SessionClosed {
        owner: Owner,
        session_id: Uuid,
    },

    // ── Tasks ──────────────────────────────────────────────────
    TaskSubmitted {
        owner: Owner,
        task_id: Uuid,
        session_id: Uuid,
        status: TaskStatus,
    },
    TaskStatusChanged {
        owner: Owner,
        task_id: Uuid,
        status: TaskStatus,
    },

    // ── Approvals ──────────────────────────────────────────────
    ApprovalRequested {
        owner: Owner,
        approval_id: Uuid,
        task_id: Uuid,
        reason: String,
    },
    ApprovalResolved {
        owner: Owner,
        approval_id: Uuid,
        task_id: Uuid,
        status: ApprovalStatus,
    },

    // ── Ledger ─────────────────────────────────────────────────
    CostPosted {
        owner: Owner,
        amount: f64,
        daily_total: f64,
    },

    // ── Policy ─────────────────────────────────────────────────
    RuleChanged {
        rule_id: Uuid,
        version: u32,
        action: RuleAction,
        enabled: bool,
    },
}

impl GovernanceEvent {
    /// Owner the event belongs to; rule changes are global.
    pub fn owner(&self) -> Option<&str> {
        match self {
            Self::SessionOpened { owner, .. }
            | Self::SessionClosed { owner, .. }
            | Self::TaskSubmitted { owner, .. }
            | Self::TaskStatusChanged { owner, .. }
            | Self::ApprovalRequested { owner, .. }
            | Self::ApprovalResolved { owner, .. }
            | Self::CostPosted { owner, .. } => Some(owner),
            Self::RuleChanged { .. } => None,
        }
    }
}

/// A broadcast-based event bus for transition subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<GovernanceEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn publish(&self, event: GovernanceEvent) {
        // No subscribers is fine; the audit log is the durable record.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GovernanceEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
