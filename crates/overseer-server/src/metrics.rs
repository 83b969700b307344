//! Prometheus-compatible counters for the governance server.
//!
//! Request counters are bumped by the handlers; everything else is derived
//! from committed [`GovernanceEvent`]s so the numbers only move after a write
//! lands.

use overseer_core::{ApprovalStatus, EventBus, GovernanceEvent, TaskStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    http_requests_total: AtomicU64,
    http_errors_total: AtomicU64,
    sessions_opened_total: AtomicU64,
    sessions_closed_total: AtomicU64,
    tasks_submitted_total: AtomicU64,
    tasks_auto_cleared_total: AtomicU64,
    tasks_denied_total: AtomicU64,
    approvals_requested_total: AtomicU64,
    approvals_approved_total: AtomicU64,
    approvals_denied_total: AtomicU64,
    approvals_expired_total: AtomicU64,
    approvals_escalated_total: AtomicU64,
    /// USD * 1_000_000.
    cost_microdollars_total: AtomicU64,
    rule_changes_total: AtomicU64,
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                http_requests_total: AtomicU64::new(0),
                http_errors_total: AtomicU64::new(0),
                sessions_opened_total: AtomicU64::new(0),
                sessions_closed_total: AtomicU64::new(0),
                tasks_submitted_total: AtomicU64::new(0),
                tasks_auto_cleared_total: AtomicU64::new(0),
                tasks_denied_total: AtomicU64::new(0),
                approvals_requested_total: AtomicU64::new(0),
                approvals_approved_total: AtomicU64::new(0),
                approvals_denied_total: AtomicU64::new(0),
                approvals_expired_total: AtomicU64::new(0),
                approvals_escalated_total: AtomicU64::new(0),
                cost_microdollars_total: AtomicU64::new(0),
                rule_changes_total: AtomicU64::new(0),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn inc_http_requests(&self) {
        self.inner
            .http_requests_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_http_errors(&self) {
        self.inner.http_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }

    /// Fold one committed transition into the counters.
    pub fn observe(&self, event: &GovernanceEvent) {
        let m = &self.inner;
        let counter = match event {
            GovernanceEvent::SessionOpened { .. } => &m.sessions_opened_total,
            GovernanceEvent::SessionClosed { .. } => &m.sessions_closed_total,
            GovernanceEvent::TaskSubmitted { status, .. } => {
                m.tasks_submitted_total.fetch_add(1, Ordering::Relaxed);
                match status {
                    TaskStatus::Approved => &m.tasks_auto_cleared_total,
                    TaskStatus::Denied => &m.tasks_denied_total,
                    _ => return,
                }
            }
            GovernanceEvent::TaskStatusChanged { .. } => return,
            GovernanceEvent::ApprovalRequested { .. } => &m.approvals_requested_total,
            GovernanceEvent::ApprovalResolved { status, .. } => match status {
                ApprovalStatus::Approved => &m.approvals_approved_total,
                ApprovalStatus::Denied => &m.approvals_denied_total,
                ApprovalStatus::Expired => &m.approvals_expired_total,
                ApprovalStatus::Escalated => &m.approvals_escalated_total,
                ApprovalStatus::Pending => return,
            },
            GovernanceEvent::CostPosted { amount, .. } => {
                let micros = (amount * 1_000_000.0).round() as u64;
                m.cost_microdollars_total
                    .fetch_add(micros, Ordering::Relaxed);
                return;
            }
            GovernanceEvent::RuleChanged { .. } => &m.rule_changes_total,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Subscribe to the bus and feed [`Metrics::observe`] until the bus closes.
    pub fn spawn_collector(&self, events: &EventBus) -> JoinHandle<()> {
        let metrics = self.clone();
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => metrics.observe(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "metrics collector lagged, counters undercount");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Render metrics in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let m = &self.inner;
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let cost_usd = load(&m.cost_microdollars_total) as f64 / 1_000_000.0;

        let mut out = String::new();
        let mut metric = |name: &str, kind: &str, help: &str, value: String| {
            out.push_str(&format!(
                "# HELP overseer_{name} {help}\n# TYPE overseer_{name} {kind}\noverseer_{name} {value}\n\n"
            ));
        };

        metric("uptime_seconds", "gauge", "Time since the server started.", self.uptime_secs().to_string());
        metric("http_requests_total", "counter", "Total API requests served.", load(&m.http_requests_total).to_string());
        metric("http_errors_total", "counter", "Total API errors (4xx/5xx).", load(&m.http_errors_total).to_string());
        metric("sessions_opened_total", "counter", "Sessions opened.", load(&m.sessions_opened_total).to_string());
        metric("sessions_closed_total", "counter", "Sessions closed, by callers or the idle reaper.", load(&m.sessions_closed_total).to_string());
        metric("tasks_submitted_total", "counter", "Tasks submitted.", load(&m.tasks_submitted_total).to_string());
        metric("tasks_auto_cleared_total", "counter", "Tasks cleared without review.", load(&m.tasks_auto_cleared_total).to_string());
        metric("tasks_denied_total", "counter", "Tasks denied outright by a rule.", load(&m.tasks_denied_total).to_string());
        metric("approvals_requested_total", "counter", "Approval requests created.", load(&m.approvals_requested_total).to_string());
        metric("approvals_approved_total", "counter", "Approval requests approved.", load(&m.approvals_approved_total).to_string());
        metric("approvals_denied_total", "counter", "Approval requests denied.", load(&m.approvals_denied_total).to_string());
        metric("approvals_expired_total", "counter", "Approval requests expired at their deadline.", load(&m.approvals_expired_total).to_string());
        metric("approvals_escalated_total", "counter", "Escalations to a higher reviewer tier.", load(&m.approvals_escalated_total).to_string());
        metric("cost_usd_total", "counter", "Actual cost posted to the ledger in USD.", format!("{cost_usd:.6}"));
        metric("rule_changes_total", "counter", "Rule versions appended.", load(&m.rule_changes_total).to_string());
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
