use chrono::{DateTime, Duration, Utc};
use overseer_core::{
    GovernanceError, GovernanceEvent, Owner, Result, Session, SessionId, SessionStatus,
};
use overseer_store::{AuditRecord, audit, sessions};
use serde_json::{Map, Value, json};
use tracing::info;
use uuid::Uuid;

use crate::engine::{GovernanceEngine, REAPER_ACTOR, require_non_empty};

impl GovernanceEngine {
    /// Open a session for `owner`.
    pub fn open_session(
        &self,
        owner: &str,
        domain: &str,
        provider: &str,
        metadata: Map<String, Value>,
    ) -> Result<Session> {
        let result = (|| {
            require_non_empty("owner", owner)?;
            require_non_empty("domain", domain)?;
            require_non_empty("provider", provider)?;

            let now = self.now();
            let session = Session {
                id: Uuid::new_v4(),
                owner: owner.to_string(),
                domain: domain.to_string(),
                provider: provider.to_string(),
                status: SessionStatus::Active,
                started_at: now,
                ended_at: None,
                metadata: metadata.clone(),
                last_activity_at: now,
            };
            self.store.with_tx("session.open", |tx| {
                sessions::insert(tx, &session)?;
                audit::append(
                    tx,
                    &AuditRecord::success(
                        owner,
                        owner,
                        "session.opened",
                        "session",
                        session.id,
                        json!({ "domain": domain, "provider": provider, "metadata": metadata }),
                    ),
                    now,
                )?;
                Ok(())
            })?;
            Ok(session)
        })();
        let session = self.audit_rejection(owner, "session.open", "session", "-", result)?;

        info!(%owner, session_id = %session.id, %provider, "session opened");
        self.publish(vec![GovernanceEvent::SessionOpened {
            owner: session.owner.clone(),
            session_id: session.id,
            provider: session.provider.clone(),
        }]);
        Ok(session)
    }

    /// Fetch a session. Another owner's session is indistinguishable from a missing one.
    pub fn get_session(&self, id: SessionId, owner: &str) -> Result<Session> {
        self.store
            .read("session.get", |conn| sessions::get(conn, id))?
            .filter(|s| s.owner == owner)
            .ok_or_else(|| GovernanceError::not_found("session", id))
    }

    /// Sessions for `owner`, newest first.
    pub fn list_sessions(&self, owner: &str) -> Result<Vec<Session>> {
        self.store
            .read("session.list", |conn| sessions::list_for_owner(conn, owner))
    }

    /// Close a session. Closing a closed session returns it unchanged and
    /// writes nothing.
    pub fn close_session(&self, id: SessionId, owner: &str) -> Result<Session> {
        let result = self.close_as(id, owner, owner, None).map(|(session, _)| session);
        self.audit_rejection(owner, "session.close", "session", &id.to_string(), result)
    }

    /// With `idle_cutoff`, the close only lands if no activity arrived since.
    /// The flag is true when this call did the closing.
    fn close_as(
        &self,
        id: SessionId,
        owner: &str,
        actor: &str,
        idle_cutoff: Option<DateTime<Utc>>,
    ) -> Result<(Session, bool)> {
        let now = self.now();
        let (session, closed_now) = self.store.with_tx("session.close", |tx| {
            let session = sessions::get(tx, id)?
                .filter(|s| s.owner == owner)
                .ok_or_else(|| GovernanceError::not_found("session", id))?;
            let closed = match idle_cutoff {
                Some(cutoff) => sessions::close_if_idle(tx, id, cutoff, now)?,
                None => sessions::close_if_active(tx, id, now)?,
            };
            if !closed {
                return Ok((session, false));
            }
            audit::append(
                tx,
                &AuditRecord::success(owner, actor, "session.closed", "session", id, json!({})),
                now,
            )?;
            let closed = sessions::get(tx, id)?
                .ok_or_else(|| GovernanceError::Internal(format!("session {id} vanished during close")))?;
            Ok((closed, true))
        })?;

        if closed_now {
            info!(%owner, session_id = %id, actor, "session closed");
            self.publish(vec![GovernanceEvent::SessionClosed {
                owner: owner.to_string(),
                session_id: id,
            }]);
        }
        Ok((session, closed_now))
    }

    /// Close every active session idle longer than `max_idle`. Zero disables.
    pub fn close_idle(&self, max_idle: Duration) -> Result<Vec<SessionId>> {
        if max_idle <= Duration::zero() {
            return Ok(Vec::new());
        }
        let cutoff = self.now() - max_idle;
        let idle = self
            .store
            .read("session.idle", |conn| sessions::idle_since(conn, cutoff))?;

        let mut closed = Vec::with_capacity(idle.len());
        for session in idle {
            let owner: Owner = session.owner.clone();
            match self.close_as(session.id, &owner, REAPER_ACTOR, Some(cutoff)) {
                Ok((s, true)) => closed.push(s.id),
                // Closed by its owner or touched since the scan
                Ok(_) => {}
                Err(e) => self.record_failure(
                    &owner,
                    REAPER_ACTOR,
                    "session.close",
                    "session",
                    &session.id.to_string(),
                    &e,
                ),
            }
        }
        Ok(closed)
    }
}
