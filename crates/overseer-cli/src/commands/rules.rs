use overseer_core::{AdaptiveRule, Result};
use overseer_engine::{GovernanceEngine, RuleUpdate};

use super::{RulesAction, print_json};

pub(super) fn cmd_rules(engine: &GovernanceEngine, action: RulesAction, actor: &str) -> Result<()> {
    match action {
        RulesAction::List { json } => {
            let rules = engine.list_rules()?;
            if json {
                return print_json(&rules);
            }
            if rules.is_empty() {
                println!("No rules. Every task is cleared unless it breaks the daily ceiling.");
                return Ok(());
            }
            println!("\x1b[1mRules\x1b[0m ({})", rules.len());
            println!("{}", "-".repeat(80));
            for rule in &rules {
                print_rule(rule);
            }
            Ok(())
        }
        RulesAction::Add {
            condition,
            action,
            threshold,
        } => {
            let rule = engine.add_rule(condition.into_condition(), action, threshold, actor)?;
            println!("Added rule {} v{}", rule.id, rule.version);
            print_rule(&rule);
            Ok(())
        }
        RulesAction::Update {
            id,
            condition,
            action,
            threshold,
            clear_threshold,
            base_version,
        } => {
            let threshold = if clear_threshold {
                Some(None)
            } else {
                threshold.map(Some)
            };
            let update = RuleUpdate {
                condition: (!condition.is_empty()).then(|| condition.into_condition()),
                action,
                threshold,
                base_version,
            };
            let rule = engine.update_rule(id, update, actor)?;
            println!("Rule {} is now at v{}", rule.id, rule.version);
            print_rule(&rule);
            Ok(())
        }
        RulesAction::Disable { id } => {
            let rule = engine.disable_rule(id, actor)?;
            println!("Rule {} disabled (v{})", rule.id, rule.version);
            Ok(())
        }
        RulesAction::Enable { id } => {
            let rule = engine.enable_rule(id, actor)?;
            println!("Rule {} enabled (v{})", rule.id, rule.version);
            Ok(())
        }
        RulesAction::History { id, json } => {
            let history = engine.rule_history(id)?;
            if json {
                return print_json(&history);
            }
            for rule in &history {
                let marker = if rule.superseded { "\x1b[90m" } else { "" };
                println!(
                    "{marker}v{}  {}  by {}\x1b[0m",
                    rule.version,
                    rule.created_at.to_rfc3339(),
                    rule.created_by
                );
                print_rule(rule);
            }
            Ok(())
        }
    }
}

fn print_rule(rule: &AdaptiveRule) {
    let state = if rule.enabled {
        "\x1b[32menabled\x1b[0m"
    } else {
        "\x1b[90mdisabled\x1b[0m"
    };
    let threshold = rule
        .threshold
        .map(|t| format!("  threshold {t:.2}"))
        .unwrap_or_default();
    let condition = serde_json::to_string(&rule.condition).unwrap_or_default();
    println!(
        "{}  v{}  {:<16} {state}{threshold}",
        rule.id,
        rule.version,
        rule.action.as_str()
    );
    println!("   \x1b[90mwhen {condition}\x1b[0m");
}
