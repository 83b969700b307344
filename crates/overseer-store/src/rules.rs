use overseer_core::{AdaptiveRule, GovernanceError, Result, RuleAction, RuleId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::store::{col_ts, col_uuid, conversion_error, is_constraint_violation, sql_err, ts};

const COLUMNS: &str =
    "id, version, condition, action, threshold, enabled, superseded, created_by, created_at";

fn row_to_rule(row: &rusqlite::Row<'_>) -> rusqlite::Result<AdaptiveRule> {
    let condition_raw: String = row.get(2)?;
    let condition = serde_json::from_str(&condition_raw)
        .map_err(|e| conversion_error(2, format!("bad rule condition: {e}")))?;
    let action_raw: String = row.get(3)?;
    let action = RuleAction::parse(&action_raw)
        .ok_or_else(|| conversion_error(3, format!("bad rule action '{action_raw}'")))?;
    let version: i64 = row.get(1)?;
    Ok(AdaptiveRule {
        id: col_uuid(row, 0)?,
        version: version as u32,
        condition,
        action,
        threshold: row.get(4)?,
        enabled: row.get(5)?,
        superseded: row.get(6)?,
        created_by: row.get(7)?,
        created_at: col_ts(row, 8)?,
    })
}

/// Insert one version row. A taken `(id, version)` is a `RuleConflict`.
pub fn insert_version(conn: &Connection, rule: &AdaptiveRule) -> Result<()> {
    let result = conn.execute(
        "INSERT INTO rules (id, version, condition, action, threshold, enabled, superseded, created_by, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            rule.id.to_string(),
            rule.version as i64,
            serde_json::to_string(&rule.condition)?,
            rule.action.as_str(),
            rule.threshold,
            rule.enabled,
            rule.superseded,
            rule.created_by,
            ts(rule.created_at),
        ],
    );
    match result {
        Ok(_) => Ok(()),
        Err(e) if is_constraint_violation(&e) => Err(GovernanceError::RuleConflict(format!(
            "rule {} version {} already exists",
            rule.id, rule.version
        ))),
        Err(e) => Err(sql_err(e)),
    }
}

/// Highest version of one rule.
pub fn head(conn: &Connection, id: RuleId) -> Result<Option<AdaptiveRule>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM rules WHERE id = ?1 ORDER BY version DESC LIMIT 1"),
        params![id.to_string()],
        row_to_rule,
    )
    .optional()
    .map_err(sql_err)
}

/// Highest version of every rule, enabled or not, ordered by rule id.
pub fn heads(conn: &Connection) -> Result<Vec<AdaptiveRule>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM rules r
             WHERE version = (SELECT MAX(version) FROM rules WHERE id = r.id)
             ORDER BY id ASC"
        ))
        .map_err(sql_err)?;
    let rows = stmt.query_map([], row_to_rule).map_err(sql_err)?;
    rows.map(|r| r.map_err(sql_err)).collect()
}

/// All versions of one rule, ascending.
pub fn history(conn: &Connection, id: RuleId) -> Result<Vec<AdaptiveRule>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {COLUMNS} FROM rules WHERE id = ?1 ORDER BY version ASC"
        ))
        .map_err(sql_err)?;
    let rows = stmt
        .query_map(params![id.to_string()], row_to_rule)
        .map_err(sql_err)?;
    rows.map(|r| r.map_err(sql_err)).collect()
}

/// Flag a version as replaced. The row's rule content is never touched.
pub fn mark_superseded(conn: &Connection, id: RuleId, version: u32) -> Result<bool> {
    let changed = conn
        .execute(
            "UPDATE rules SET superseded = 1 WHERE id = ?1 AND version = ?2 AND superseded = 0",
            params![id.to_string(), version as i64],
        )
        .map_err(sql_err)?;
    Ok(changed == 1)
}

pub fn count(conn: &Connection) -> Result<u64> {
    let n: i64 = conn
        .query_row("SELECT COUNT(*) FROM rules", [], |row| row.get(0))
        .map_err(sql_err)?;
    Ok(n as u64)
}
