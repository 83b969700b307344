use overseer_core::{AuditOutcome, GovernanceError, Result};
use overseer_engine::GovernanceEngine;

use super::{AuditAction, print_json, truncate};

pub(super) fn cmd_audit(engine: &GovernanceEngine, action: AuditAction) -> Result<()> {
    match action {
        AuditAction::Show {
            owner,
            target,
            from,
            to,
            json,
        } => {
            let entries = match target {
                Some(target) => engine
                    .audit_trail(&owner, &target)?
                    .into_iter()
                    .filter(|e| from.is_none_or(|f| e.timestamp >= f) && to.is_none_or(|t| e.timestamp <= t))
                    .collect(),
                None => engine.query_audit(&owner, from, to)?,
            };
            if json {
                return print_json(&entries);
            }
            if entries.is_empty() {
                println!("No audit entries for '{owner}'.");
                return Ok(());
            }
            println!("\x1b[1mAudit Log\x1b[0m {owner} ({} entries)", entries.len());
            println!("{}", "-".repeat(80));
            for e in &entries {
                let color = match e.outcome {
                    AuditOutcome::Failed => "\x1b[31m",
                    AuditOutcome::Success if e.action.starts_with("approval.") => "\x1b[33m",
                    AuditOutcome::Success if e.action.starts_with("rule.") => "\x1b[36m",
                    AuditOutcome::Success if e.action.starts_with("cost.") => "\x1b[35m",
                    AuditOutcome::Success => "\x1b[37m",
                };
                println!(
                    "\x1b[90m#{:<5} {}\x1b[0m  {color}{}\x1b[0m  {} {}  by {}",
                    e.seq,
                    e.timestamp.to_rfc3339(),
                    e.action,
                    e.target_type,
                    e.target_id,
                    e.actor
                );
                let payload = e.payload.to_string();
                if payload != "{}" {
                    println!("   \x1b[90m{}\x1b[0m", truncate(&payload, 120));
                }
            }
            Ok(())
        }
        AuditAction::Verify { owner } => {
            let reports = match owner {
                Some(owner) => vec![engine.verify_audit(&owner)?],
                None => engine.verify_all()?,
            };
            let mut broken = 0;
            for report in &reports {
                if report.valid {
                    println!("ok      {}  ({} entries)", report.owner, report.entries);
                } else {
                    broken += 1;
                    println!(
                        "BROKEN  {}  at seq {}: {}",
                        report.owner,
                        report.broken_at.unwrap_or_default(),
                        report.problem.as_deref().unwrap_or("unknown")
                    );
                }
            }
            if broken > 0 {
                return Err(GovernanceError::Internal(format!("{broken} audit chain(s) failed verification")));
            }
            Ok(())
        }
    }
}
