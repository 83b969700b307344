use chrono::{DateTime, Utc};
use overseer_core::{ApprovalId, Result, SessionId, Task, TaskId, TaskStatus};
use rusqlite::{Connection, OptionalExtension, params};

use crate::store::{col_json_map, col_opt_uuid, col_ts, col_uuid, conversion_error, sql_err, ts};

const COLUMNS: &str = "id, session_id, owner, task_type, domain, status, cost_estimate, actual_cost,
                       requires_approval, approval_id, failure_reason, metadata, created_at, updated_at";

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let status_raw: String = row.get(5)?;
    let status = TaskStatus::parse(&status_raw)
        .ok_or_else(|| conversion_error(5, format!("bad task status '{status_raw}'")))?;
    Ok(Task {
        id: col_uuid(row, 0)?,
        session_id: col_uuid(row, 1)?,
        owner: row.get(2)?,
        task_type: row.get(3)?,
        domain: row.get(4)?,
        status,
        cost_estimate: row.get(6)?,
        actual_cost: row.get(7)?,
        requires_approval: row.get(8)?,
        approval_id: col_opt_uuid(row, 9)?,
        failure_reason: row.get(10)?,
        metadata: col_json_map(row, 11)?,
        created_at: col_ts(row, 12)?,
        updated_at: col_ts(row, 13)?,
    })
}

pub fn insert(conn: &Connection, task: &Task) -> Result<()> {
    conn.execute(
        "INSERT INTO tasks (id, session_id, owner, task_type, domain, status, cost_estimate, actual_cost,
                            requires_approval, approval_id, failure_reason, metadata, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            task.id.to_string(),
            task.session_id.to_string(),
            task.owner,
            task.task_type,
            task.domain,
            task.status.as_str(),
            task.cost_estimate,
            task.actual_cost,
            task.requires_approval,
            task.approval_id.map(|a| a.to_string()),
            task.failure_reason,
            serde_json::to_string(&task.metadata)?,
            ts(task.created_at),
            ts(task.updated_at),
        ],
    )
    .map_err(sql_err)?;
    Ok(())
}

pub fn get(conn: &Connection, id: TaskId) -> Result<Option<Task>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM tasks WHERE id = ?1"),
        params![id.to_string()],
        row_to_task,
    )
    .optional()
    .map_err(sql_err)
}

/// Tasks in one session, newest first.
pub fn list_for_session(conn: &Connection, session_id: SessionId) -> Result<Vec<Task>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM tasks WHERE session_id = ?1 ORDER BY created_at DESC, id DESC"
        ))
        .map_err(sql_err)?;
    let rows = stmt
        .query_map(params![session_id.to_string()], row_to_task)
        .map_err(sql_err)?;
    rows.map(|r| r.map_err(sql_err)).collect()
}

pub fn link_approval(conn: &Connection, id: TaskId, approval_id: ApprovalId) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET approval_id = ?1 WHERE id = ?2",
        params![approval_id.to_string(), id.to_string()],
    )
    .map_err(sql_err)?;
    Ok(())
}

/// Conditional status change. Returns false when the task was not in `from`.
pub fn transition(
    conn: &Connection,
    id: TaskId,
    from: TaskStatus,
    to: TaskStatus,
    now: DateTime<Utc>,
) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
            params![to.as_str(), ts(now), id.to_string(), from.as_str()],
        )
        .map_err(sql_err)?;
    Ok(changed == 1)
}

/// `executing -> completed` with the actual cost.
pub fn complete(conn: &Connection, id: TaskId, actual_cost: f64, now: DateTime<Utc>) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE tasks SET status = 'completed', actual_cost = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'executing'",
            params![actual_cost, ts(now), id.to_string()],
        )
        .map_err(sql_err)?;
    Ok(changed == 1)
}

/// `executing -> failed` with a reason.
pub fn fail(conn: &Connection, id: TaskId, reason: &str, now: DateTime<Utc>) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE tasks SET status = 'failed', failure_reason = ?1, updated_at = ?2
             WHERE id = ?3 AND status = 'executing'",
            params![reason, ts(now), id.to_string()],
        )
        .map_err(sql_err)?;
    Ok(changed == 1)
}

/// Count of tasks per status, for metrics and `doctor`.
pub fn count_by_status(conn: &Connection) -> Result<Vec<(TaskStatus, u64)>> {
    let mut stmt = conn
        .prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status ORDER BY status")
        .map_err(sql_err)?;
    let rows = stmt
        .query_map([], |row| {
            let raw: String = row.get(0)?;
            let n: i64 = row.get(1)?;
            let status = TaskStatus::parse(&raw)
                .ok_or_else(|| conversion_error(0, format!("bad task status '{raw}'")))?;
            Ok((status, n as u64))
        })
        .map_err(sql_err)?;
    rows.map(|r| r.map_err(sql_err)).collect()
}
