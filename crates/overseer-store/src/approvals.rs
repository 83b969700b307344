use chrono::{DateTime, Utc};
use overseer_core::{ApprovalId, ApprovalRequest, ApprovalStatus, Result};
use rusqlite::{Connection, OptionalExtension, params};

use crate::store::{col_opt_ts, col_opt_uuid, col_ts, col_uuid, conversion_error, sql_err, ts};

const COLUMNS: &str = "id, task_id, owner, status, rule_triggered, reason, tier, deadline,
                       decided_by, decided_at, created_at";

fn row_to_approval(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApprovalRequest> {
    let status_raw: String = row.get(3)?;
    let status = ApprovalStatus::parse(&status_raw)
        .ok_or_else(|| conversion_error(3, format!("bad approval status '{status_raw}'")))?;
    let tier: i64 = row.get(6)?;
    Ok(ApprovalRequest {
        id: col_uuid(row, 0)?,
        task_id: col_uuid(row, 1)?,
        owner: row.get(2)?,
        status,
        rule_triggered: col_opt_uuid(row, 4)?,
        reason: row.get(5)?,
        tier: tier as u32,
        deadline: col_ts(row, 7)?,
        decided_by: row.get(8)?,
        decided_at: col_opt_ts(row, 9)?,
        created_at: col_ts(row, 10)?,
    })
}

pub fn insert(conn: &Connection, approval: &ApprovalRequest) -> Result<()> {
    conn.execute(
        "INSERT INTO approvals (id, task_id, owner, status, rule_triggered, reason, tier, deadline,
                                decided_by, decided_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            approval.id.to_string(),
            approval.task_id.to_string(),
            approval.owner,
            approval.status.as_str(),
            approval.rule_triggered.map(|r| r.to_string()),
            approval.reason,
            approval.tier as i64,
            ts(approval.deadline),
            approval.decided_by,
            approval.decided_at.map(ts),
            ts(approval.created_at),
        ],
    )
    .map_err(sql_err)?;
    Ok(())
}

pub fn get(conn: &Connection, id: ApprovalId) -> Result<Option<ApprovalRequest>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM approvals WHERE id = ?1"),
        params![id.to_string()],
        row_to_approval,
    )
    .optional()
    .map_err(sql_err)
}

/// All requests, optionally filtered by status. Oldest deadline first.
pub fn list(conn: &Connection, status: Option<ApprovalStatus>) -> Result<Vec<ApprovalRequest>> {
    let (sql, filter) = match status {
        Some(s) => (
            format!("SELECT {COLUMNS} FROM approvals WHERE status = ?1 ORDER BY deadline ASC, id ASC"),
            Some(s.as_str()),
        ),
        None => (
            format!("SELECT {COLUMNS} FROM approvals ORDER BY deadline ASC, id ASC"),
            None,
        ),
    };
    let mut stmt = conn.prepare(&sql).map_err(sql_err)?;
    let rows = match filter {
        Some(f) => stmt.query_map(params![f], row_to_approval),
        None => stmt.query_map([], row_to_approval),
    }
    .map_err(sql_err)?;
    rows.map(|r| r.map_err(sql_err)).collect()
}

/// Close an open request before its deadline. Exactly one concurrent caller
/// gets `true`.
pub fn resolve_before_deadline(
    conn: &Connection,
    id: ApprovalId,
    to: ApprovalStatus,
    decided_by: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let now = ts(now);
    let changed = conn
        .execute(
            "UPDATE approvals SET status = ?1, decided_by = ?2, decided_at = ?3
             WHERE id = ?4 AND status IN ('pending', 'escalated') AND deadline > ?3",
            params![to.as_str(), decided_by, now, id.to_string()],
        )
        .map_err(sql_err)?;
    Ok(changed == 1)
}

/// Move an open request up one reviewer tier with a new deadline.
pub fn escalate_before_deadline(
    conn: &Connection,
    id: ApprovalId,
    new_tier: u32,
    new_deadline: DateTime<Utc>,
    decided_by: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let now = ts(now);
    let changed = conn
        .execute(
            "UPDATE approvals SET status = 'escalated', tier = ?1, deadline = ?2, decided_by = ?3
             WHERE id = ?4 AND status IN ('pending', 'escalated') AND deadline > ?5",
            params![new_tier as i64, ts(new_deadline), decided_by, id.to_string(), now],
        )
        .map_err(sql_err)?;
    Ok(changed == 1)
}

/// Expire an open request regardless of its deadline.
pub fn expire_if_open(conn: &Connection, id: ApprovalId, actor: &str, now: DateTime<Utc>) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE approvals SET status = 'expired', decided_by = ?1, decided_at = ?2
             WHERE id = ?3 AND status IN ('pending', 'escalated')",
            params![actor, ts(now), id.to_string()],
        )
        .map_err(sql_err)?;
    Ok(changed == 1)
}

/// Open requests whose deadline is at or before `now`.
pub fn overdue(conn: &Connection, now: DateTime<Utc>) -> Result<Vec<ApprovalRequest>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM approvals
             WHERE status IN ('pending', 'escalated') AND deadline <= ?1
             ORDER BY deadline ASC"
        ))
        .map_err(sql_err)?;
    let rows = stmt.query_map(params![ts(now)], row_to_approval).map_err(sql_err)?;
    rows.map(|r| r.map_err(sql_err)).collect()
}

/// Statuses of the owner's most recent `window` resolved requests.
pub fn recent_resolutions(conn: &Connection, owner: &str, window: u32) -> Result<Vec<ApprovalStatus>> {
    let mut stmt = conn
        .prepare(
            "SELECT status FROM approvals
             WHERE owner = ?1 AND status IN ('approved', 'denied', 'expired')
             ORDER BY decided_at DESC LIMIT ?2",
        )
        .map_err(sql_err)?;
    let rows = stmt
        .query_map(params![owner, window as i64], |row| {
            let raw: String = row.get(0)?;
            ApprovalStatus::parse(&raw)
                .ok_or_else(|| conversion_error(0, format!("bad approval status '{raw}'")))
        })
        .map_err(sql_err)?;
    rows.map(|r| r.map_err(sql_err)).collect()
}
