use overseer_core::{ApprovalStatus, Decision, GovernanceError, Result};
use overseer_engine::GovernanceEngine;

use super::{ApprovalsAction, print_json, truncate};

pub(super) fn cmd_approvals(
    engine: &GovernanceEngine,
    action: ApprovalsAction,
    actor: &str,
) -> Result<()> {
    match action {
        ApprovalsAction::List { status, json } => {
            let status = status
                .map(|s| {
                    ApprovalStatus::parse(&s)
                        .ok_or_else(|| GovernanceError::Validation(format!("unknown status '{s}'")))
                })
                .transpose()?;
            let approvals = engine.list_approvals(status)?;
            if json {
                return print_json(&approvals);
            }
            if approvals.is_empty() {
                println!("No approval requests.");
                return Ok(());
            }
            println!("\x1b[1mApprovals\x1b[0m ({})", approvals.len());
            println!("{}", "-".repeat(80));
            for a in &approvals {
                let color = match a.status {
                    ApprovalStatus::Pending | ApprovalStatus::Escalated => "\x1b[33m",
                    ApprovalStatus::Approved => "\x1b[32m",
                    ApprovalStatus::Denied | ApprovalStatus::Expired => "\x1b[31m",
                };
                println!(
                    "{}  {color}{:<9}\x1b[0m tier {}  owner {}  due {}",
                    a.id,
                    a.status.as_str(),
                    a.tier,
                    a.owner,
                    a.deadline.to_rfc3339()
                );
                println!("   \x1b[90mtask {}  {}\x1b[0m", a.task_id, truncate(&a.reason, 100));
            }
            Ok(())
        }
        ApprovalsAction::Approve { id } => decide(engine, id, actor, Decision::Approve),
        ApprovalsAction::Deny { id } => decide(engine, id, actor, Decision::Deny),
        ApprovalsAction::Escalate { id } => decide(engine, id, actor, Decision::Escalate),
        ApprovalsAction::Reap => {
            let expired = engine.expire_due()?;
            println!("Expired {} overdue request(s)", expired.len());
            for id in &expired {
                println!("   {id}");
            }
            let idle_secs = engine.config().sessions.idle_timeout_secs;
            let closed = engine.close_idle(chrono::Duration::seconds(idle_secs as i64))?;
            println!("Closed {} idle session(s)", closed.len());
            Ok(())
        }
    }
}

fn decide(engine: &GovernanceEngine, id: uuid::Uuid, actor: &str, decision: Decision) -> Result<()> {
    let approval = engine.decide(id, actor, decision)?;
    println!(
        "Approval {} is {} (tier {}, task {})",
        approval.id,
        approval.status.as_str(),
        approval.tier,
        approval.task_id
    );
    if approval.status == ApprovalStatus::Escalated {
        println!("   New deadline: {}", approval.deadline.to_rfc3339());
    }
    Ok(())
}
