use overseer_core::Result;
use overseer_engine::GovernanceEngine;

use super::{CostAction, print_json};

pub(super) fn cmd_cost(engine: &GovernanceEngine, action: CostAction, actor: &str) -> Result<()> {
    match action {
        CostAction::Show {
            owner,
            history,
            json,
        } => {
            let summary = engine.cost_summary(&owner)?;
            if json {
                if history {
                    return print_json(&serde_json::json!({
                        "summary": summary,
                        "history": engine.cost_history(&owner)?,
                    }));
                }
                return print_json(&summary);
            }
            println!("\x1b[1m{}\x1b[0m on {}", summary.owner, summary.day);
            println!(
                "   Spent:     ${:.2} of ${:.2} ({:?} ceiling)",
                summary.daily_cost, summary.ceiling, summary.ceiling_source
            );
            println!("   Remaining: ${:.2}", summary.remaining);
            if history {
                println!();
                for record in engine.cost_history(&owner)? {
                    println!("   {}  ${:.2}", record.day, record.total_cost);
                }
            }
            Ok(())
        }
        CostAction::SetCeiling { owner, limit } => {
            let ceiling = engine.set_ceiling(&owner, limit, actor)?;
            println!("Daily ceiling for {} set to ${:.2}", ceiling.owner, ceiling.daily_limit);
            Ok(())
        }
    }
}
