//! Background reapers: approval expiry and idle-session close.
//!
//! Both run on tokio intervals independent of client traffic and call the
//! synchronous engine through `spawn_blocking`.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::GovernanceEngine;

/// Handles to the running reapers. Dropping this does not stop them; call
/// [`Reapers::shutdown`].
pub struct Reapers {
    handles: Vec<JoinHandle<()>>,
}

impl Reapers {
    pub fn shutdown(self) {
        for handle in self.handles {
            handle.abort();
        }
    }
}

/// Start the approval and idle-session reapers.
pub fn spawn_reapers(engine: &GovernanceEngine) -> Reapers {
    let every = Duration::from_secs(engine.config.read().approval.reaper_interval_secs.max(1));

    let mut handles = Vec::with_capacity(2);

    let approvals = engine.clone();
    handles.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let engine = approvals.clone();
            match tokio::task::spawn_blocking(move || engine.expire_due()).await {
                Ok(Ok(expired)) if !expired.is_empty() => {
                    info!(count = expired.len(), "expired overdue approvals");
                }
                Ok(Ok(_)) => debug!("no overdue approvals"),
                Ok(Err(e)) => warn!(error = %e, "approval reaper pass failed"),
                Err(e) => warn!(error = %e, "approval reaper task panicked"),
            }
        }
    }));

    let sessions = engine.clone();
    handles.push(tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            // Read every tick so a config reload takes effect
            let idle_secs = sessions.config.read().sessions.idle_timeout_secs;
            if idle_secs == 0 {
                continue;
            }
            let engine = sessions.clone();
            let max_idle = chrono::Duration::seconds(idle_secs as i64);
            match tokio::task::spawn_blocking(move || engine.close_idle(max_idle)).await {
                Ok(Ok(closed)) if !closed.is_empty() => {
                    info!(count = closed.len(), "closed idle sessions");
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "session reaper pass failed"),
                Err(e) => warn!(error = %e, "session reaper task panicked"),
            }
        }
    }));

    Reapers { handles }
}
