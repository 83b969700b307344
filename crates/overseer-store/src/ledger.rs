use chrono::{DateTime, Utc};
use overseer_core::{BudgetCeiling, CostRecord, GovernanceError, Result};
use rusqlite::{Connection, OptionalExtension, params};

use crate::store::{col_ts, sql_err, ts};

/// Ledger day key: the UTC calendar date.
pub fn day_key(now: DateTime<Utc>) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// Aggregate spend for `owner` on `day`; 0 when nothing was posted.
pub fn daily_total(conn: &Connection, owner: &str, day: &str) -> Result<f64> {
    let total: Option<f64> = conn
        .query_row(
            "SELECT total_cost FROM cost_records WHERE owner = ?1 AND day = ?2",
            params![owner, day],
            |row| row.get(0),
        )
        .optional()
        .map_err(sql_err)?;
    Ok(total.unwrap_or(0.0))
}

/// Atomic increment of the day's total. Returns the new total.
pub fn post(conn: &Connection, owner: &str, amount: f64, now: DateTime<Utc>) -> Result<f64> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(GovernanceError::Validation(format!(
            "cost amount must be a non-negative number, got {amount}"
        )));
    }
    let day = day_key(now);
    conn.query_row(
        "INSERT INTO cost_records (owner, day, total_cost, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(owner, day) DO UPDATE SET total_cost = total_cost + excluded.total_cost,
                                               updated_at = excluded.updated_at
         RETURNING total_cost",
        params![owner, day, amount, ts(now)],
        |row| row.get(0),
    )
    .map_err(sql_err)
}

/// Every day row for `owner`, newest first.
pub fn history(conn: &Connection, owner: &str) -> Result<Vec<CostRecord>> {
    let mut stmt = conn
        .prepare(
            "SELECT owner, day, total_cost, updated_at FROM cost_records
             WHERE owner = ?1 ORDER BY day DESC",
        )
        .map_err(sql_err)?;
    let rows = stmt
        .query_map(params![owner], |row| {
            Ok(CostRecord {
                owner: row.get(0)?,
                day: row.get(1)?,
                total_cost: row.get(2)?,
                updated_at: col_ts(row, 3)?,
            })
        })
        .map_err(sql_err)?;
    rows.map(|r| r.map_err(sql_err)).collect()
}

/// Stored ceiling override, if any.
pub fn ceiling(conn: &Connection, owner: &str) -> Result<Option<f64>> {
    conn.query_row(
        "SELECT daily_limit FROM budget_ceilings WHERE owner = ?1",
        params![owner],
        |row| row.get(0),
    )
    .optional()
    .map_err(sql_err)
}

pub fn set_ceiling(conn: &Connection, ceiling: &BudgetCeiling, now: DateTime<Utc>) -> Result<()> {
    if !ceiling.daily_limit.is_finite() || ceiling.daily_limit < 0.0 {
        return Err(GovernanceError::Validation(format!(
            "daily limit must be a non-negative number, got {}",
            ceiling.daily_limit
        )));
    }
    conn.execute(
        "INSERT INTO budget_ceilings (owner, daily_limit, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(owner) DO UPDATE SET daily_limit = excluded.daily_limit,
                                          updated_at = excluded.updated_at",
        params![ceiling.owner, ceiling.daily_limit, ts(now)],
    )
    .map_err(sql_err)?;
    Ok(())
}
