use clap::{Parser, Subcommand};
use std::path::PathBuf;

use overseer_config::{ConfigLoader, ConfigWarning, OverseerConfig, WarningSeverity};
use overseer_core::{GovernanceError, HourWindow, Result, RuleAction};
use overseer_engine::GovernanceEngine;

mod approvals;
mod audit;
mod cost;
mod rules;
mod serve;

/// Overseer — governance for autonomous browser and scraping agents
#[derive(Parser)]
#[command(name = "overseer", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to overseer.toml config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Identity recorded as the actor of operator actions
    #[arg(long, global = true, env = "OVERSEER_ACTOR", default_value = "operator")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the action API, event stream, and background reapers
    Serve {
        /// Listen address (overrides server.listen)
        #[arg(short = 'L', long)]
        listen: Option<String>,
    },
    /// Manage adaptive rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },
    /// Review and decide approval requests
    Approvals {
        #[command(subcommand)]
        action: ApprovalsAction,
    },
    /// Inspect and verify the audit log
    Audit {
        #[command(subcommand)]
        action: AuditAction,
    },
    /// Inspect spend and manage daily ceilings
    Cost {
        #[command(subcommand)]
        action: CostAction,
    },
    /// Show current configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Audit configuration and the store
    Doctor,
}

/// Condition flags shared by `rules add` and `rules update`.
#[derive(clap::Args, Default)]
struct ConditionArgs {
    /// Match this task type only
    #[arg(long)]
    task_type: Option<String>,
    /// Exact domain or `*.suffix`
    #[arg(long)]
    domain: Option<String>,
    /// UTC hour window START-END, may wrap midnight (e.g. 22-6)
    #[arg(long, value_parser = parse_hours)]
    hours: Option<HourWindow>,
    /// Match only when the recent denial rate is at least this (0.0 - 1.0)
    #[arg(long)]
    min_denial_rate: Option<f64>,
}

impl ConditionArgs {
    fn is_empty(&self) -> bool {
        self.task_type.is_none()
            && self.domain.is_none()
            && self.hours.is_none()
            && self.min_denial_rate.is_none()
    }

    fn into_condition(self) -> overseer_core::RuleCondition {
        overseer_core::RuleCondition {
            task_type: self.task_type,
            domain: self.domain,
            hours_utc: self.hours,
            min_denial_rate: self.min_denial_rate,
        }
    }
}

#[derive(Subcommand)]
enum RulesAction {
    /// List the current version of every rule
    List {
        #[arg(long)]
        json: bool,
    },
    /// Add a rule
    Add {
        #[command(flatten)]
        condition: ConditionArgs,
        /// requireApproval, allow, or deny
        #[arg(long, value_parser = parse_rule_action)]
        action: RuleAction,
        /// Cost above which a matching task needs review
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// Append a new version of a rule
    Update {
        id: uuid::Uuid,
        /// Replace the whole condition with the given flags
        #[command(flatten)]
        condition: ConditionArgs,
        #[arg(long, value_parser = parse_rule_action)]
        action: Option<RuleAction>,
        #[arg(long, conflicts_with = "clear_threshold")]
        threshold: Option<f64>,
        /// Remove the threshold
        #[arg(long)]
        clear_threshold: bool,
        /// Fail unless the rule is still at this version
        #[arg(long)]
        base_version: Option<u32>,
    },
    /// Disable a rule (appends a version)
    Disable { id: uuid::Uuid },
    /// Re-enable a rule (appends a version)
    Enable { id: uuid::Uuid },
    /// Show every version of a rule
    History {
        id: uuid::Uuid,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ApprovalsAction {
    /// List approval requests, oldest deadline first
    List {
        /// pending, escalated, approved, denied, expired
        #[arg(short, long)]
        status: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Approve a request
    Approve { id: uuid::Uuid },
    /// Deny a request
    Deny { id: uuid::Uuid },
    /// Escalate a request to the next reviewer tier
    Escalate { id: uuid::Uuid },
    /// Expire overdue requests and close idle sessions now
    Reap,
}

#[derive(Subcommand)]
enum AuditAction {
    /// Show an owner's audit entries
    Show {
        /// Chain to read (`system` holds rule changes)
        #[arg(short, long)]
        owner: String,
        /// Only entries touching this target id
        #[arg(short, long)]
        target: Option<String>,
        /// RFC 3339 lower bound
        #[arg(long)]
        from: Option<chrono::DateTime<chrono::Utc>>,
        /// RFC 3339 upper bound
        #[arg(long)]
        to: Option<chrono::DateTime<chrono::Utc>>,
        #[arg(long)]
        json: bool,
    },
    /// Recompute hash chains; exits non-zero if any is broken
    Verify {
        /// Verify one owner's chain instead of all
        #[arg(short, long)]
        owner: Option<String>,
    },
}

#[derive(Subcommand)]
enum CostAction {
    /// Today's spend against the ceiling
    Show {
        #[arg(short, long)]
        owner: String,
        /// Include every recorded day
        #[arg(long)]
        history: bool,
        #[arg(long)]
        json: bool,
    },
    /// Store a daily ceiling override for an owner
    SetCeiling {
        #[arg(short, long)]
        owner: String,
        /// Daily limit in USD
        #[arg(long)]
        limit: f64,
    },
}

fn parse_hours(s: &str) -> std::result::Result<HourWindow, String> {
    let (start, end) = s
        .split_once('-')
        .ok_or_else(|| format!("expected START-END, got `{s}`"))?;
    let start = start.trim().parse().map_err(|_| format!("bad start hour `{start}`"))?;
    let end = end.trim().parse().map_err(|_| format!("bad end hour `{end}`"))?;
    Ok(HourWindow { start, end })
}

fn parse_rule_action(s: &str) -> std::result::Result<RuleAction, String> {
    RuleAction::parse(s).ok_or_else(|| format!("expected requireApproval, allow, or deny, got `{s}`"))
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        // Load config first so we can use it for log format
        let config_loader = ConfigLoader::load(self.config.as_deref())?;
        let config = config_loader.get();

        // --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug".to_string()
        } else if self.quiet {
            "error".to_string()
        } else {
            self.log_level
                .clone()
                .unwrap_or_else(|| config.logging.level.clone())
        };
        init_tracing(&config, &log_level);

        let actor = self.actor.as_str();
        match self.command {
            Commands::Serve { listen } => serve::cmd_serve(config_loader, listen).await,
            Commands::Rules { action } => rules::cmd_rules(&open_engine(&config_loader)?, action, actor),
            Commands::Approvals { action } => {
                approvals::cmd_approvals(&open_engine(&config_loader)?, action, actor)
            }
            Commands::Audit { action } => audit::cmd_audit(&open_engine(&config_loader)?, action),
            Commands::Cost { action } => cost::cmd_cost(&open_engine(&config_loader)?, action, actor),
            Commands::Config { json } => Self::cmd_config(config, json),
            Commands::Doctor => Self::cmd_doctor(&config_loader),
        }
    }

    fn cmd_config(config: OverseerConfig, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(&config)?);
        } else {
            println!(
                "{}",
                toml::to_string_pretty(&config).map_err(|e| GovernanceError::Config(e.to_string()))?
            );
        }
        Ok(())
    }

    fn cmd_doctor(config_loader: &ConfigLoader) -> Result<()> {
        let config = config_loader.get();
        println!("Overseer Doctor — configuration and store audit");
        println!("   Config: {}", config_loader.path().display());
        println!();

        let warnings = match validate_config(&config) {
            Ok(w) => w,
            Err(e) => {
                println!("  {e}");
                return Err(e);
            }
        };

        let mut warn_count = 0;
        let mut info_count = 0;
        for w in &warnings {
            println!("  {w}");
            match w.severity {
                WarningSeverity::Warning => warn_count += 1,
                WarningSeverity::Info => info_count += 1,
                WarningSeverity::Error => {}
            }
        }

        if config.server.tokens.is_empty() {
            println!("  [warning] server.tokens: no tokens, every API call will get 401");
            warn_count += 1;
        }
        if config.server.reviewers.is_empty() {
            println!("  [info] server.reviewers: nobody can decide approvals over the API");
            info_count += 1;
        }
        if config.server.admins.is_empty() {
            println!("  [info] server.admins: rules and ceilings can only be managed from this CLI");
            info_count += 1;
        }

        let mut broken = 0;
        match GovernanceEngine::open(config_loader.shared()) {
            Ok(engine) => {
                println!("  [ok] store: {} opened", config.store.db_path.display());
                for report in engine.verify_all()? {
                    if report.valid {
                        println!("  [ok] audit chain '{}': {} entries", report.owner, report.entries);
                    } else {
                        broken += 1;
                        println!(
                            "  [error] audit chain '{}' broken at seq {}: {}",
                            report.owner,
                            report.broken_at.unwrap_or_default(),
                            report.problem.unwrap_or_default()
                        );
                    }
                }
            }
            Err(e) => {
                broken += 1;
                println!("  [error] store: {e}");
            }
        }

        println!();
        println!("  {broken} errors, {warn_count} warnings, {info_count} suggestions");
        if broken > 0 {
            return Err(GovernanceError::Internal(format!("doctor found {broken} error(s)")));
        }
        Ok(())
    }
}

/// Fatal validation problems become a `Config` error.
fn validate_config(config: &OverseerConfig) -> Result<Vec<ConfigWarning>> {
    config.validate().map_err(GovernanceError::Config)
}

fn init_tracing(config: &OverseerConfig, log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

fn open_engine(config_loader: &ConfigLoader) -> Result<GovernanceEngine> {
    GovernanceEngine::open(config_loader.shared())
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Truncate a string to `max` characters, appending "..." if truncated.
fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max).collect::<String>())
    }
}
