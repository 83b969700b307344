use chrono::{DateTime, Utc};
use overseer_core::{Result, Session, SessionId, SessionStatus};
use rusqlite::{Connection, OptionalExtension, params};

use crate::store::{col_json_map, col_opt_ts, col_ts, col_uuid, conversion_error, sql_err, ts};

const COLUMNS: &str =
    "id, owner, domain, provider, status, metadata, started_at, ended_at, last_activity_at";

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let status_raw: String = row.get(4)?;
    let status = SessionStatus::parse(&status_raw)
        .ok_or_else(|| conversion_error(4, format!("bad session status '{status_raw}'")))?;
    Ok(Session {
        id: col_uuid(row, 0)?,
        owner: row.get(1)?,
        domain: row.get(2)?,
        provider: row.get(3)?,
        status,
        metadata: col_json_map(row, 5)?,
        started_at: col_ts(row, 6)?,
        ended_at: col_opt_ts(row, 7)?,
        last_activity_at: col_ts(row, 8)?,
    })
}

pub fn insert(conn: &Connection, session: &Session) -> Result<()> {
    conn.execute(
        "INSERT INTO sessions (id, owner, domain, provider, status, metadata, started_at, ended_at, last_activity_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            session.id.to_string(),
            session.owner,
            session.domain,
            session.provider,
            session.status.as_str(),
            serde_json::to_string(&session.metadata)?,
            ts(session.started_at),
            session.ended_at.map(ts),
            ts(session.last_activity_at),
        ],
    )
    .map_err(sql_err)?;
    Ok(())
}

pub fn get(conn: &Connection, id: SessionId) -> Result<Option<Session>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM sessions WHERE id = ?1"),
        params![id.to_string()],
        row_to_session,
    )
    .optional()
    .map_err(sql_err)
}

/// Sessions for one owner, newest first.
pub fn list_for_owner(conn: &Connection, owner: &str) -> Result<Vec<Session>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM sessions WHERE owner = ?1 ORDER BY started_at DESC, id DESC"
        ))
        .map_err(sql_err)?;
    let rows = stmt.query_map(params![owner], row_to_session).map_err(sql_err)?;
    rows.map(|r| r.map_err(sql_err)).collect()
}

/// `active -> closed`. Returns false if the session was not active.
pub fn close_if_active(conn: &Connection, id: SessionId, now: DateTime<Utc>) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE sessions SET status = 'closed', ended_at = ?1
             WHERE id = ?2 AND status = 'active'",
            params![ts(now), id.to_string()],
        )
        .map_err(sql_err)?;
    Ok(changed == 1)
}

/// Close only if the session is active and still idle since `cutoff`.
pub fn close_if_idle(
    conn: &Connection,
    id: SessionId,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE sessions SET status = 'closed', ended_at = ?1
             WHERE id = ?2 AND status = 'active' AND last_activity_at < ?3",
            params![ts(now), id.to_string(), ts(cutoff)],
        )
        .map_err(sql_err)?;
    Ok(changed == 1)
}

/// Record activity on an active session.
pub fn touch(conn: &Connection, id: SessionId, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE sessions SET last_activity_at = ?1 WHERE id = ?2 AND status = 'active'",
        params![ts(now), id.to_string()],
    )
    .map_err(sql_err)?;
    Ok(())
}

/// Active sessions with no activity since `cutoff`.
pub fn idle_since(conn: &Connection, cutoff: DateTime<Utc>) -> Result<Vec<Session>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM sessions
             WHERE status = 'active' AND last_activity_at < ?1
             ORDER BY last_activity_at ASC"
        ))
        .map_err(sql_err)?;
    let rows = stmt.query_map(params![ts(cutoff)], row_to_session).map_err(sql_err)?;
    rows.map(|r| r.map_err(sql_err)).collect()
}

