use overseer_core::{RuleAction, RuleCondition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Root configuration — maps to `overseer.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverseerConfig {
    pub store: StoreConfig,
    pub ledger: LedgerConfig,
    pub approval: ApprovalConfig,
    pub rules: RulesConfig,
    pub sessions: SessionsConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

// ── Store ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database.
    pub db_path: PathBuf,
    /// How long SQLite waits on a locked database before reporting busy.
    pub busy_timeout_ms: u64,
    /// Internal retries for transient conflicts before surfacing `Internal`.
    pub max_retries: u32,
    /// First retry delay; doubles on each attempt.
    pub retry_backoff_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("overseer.db"),
            busy_timeout_ms: 5_000,
            max_retries: 5,
            retry_backoff_ms: 10,
        }
    }
}

// ── Ledger ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Daily ceiling in USD for owners without an override.
    pub default_daily_ceiling: f64,
    /// Per-owner ceilings; a ceiling set through the API takes priority.
    pub owner_ceilings: HashMap<String, f64>,
    /// Relative drift between estimate and actual cost above which a warning is logged.
    pub drift_warn_ratio: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            default_daily_ceiling: 100.0,
            owner_ceilings: HashMap::new(),
            drift_warn_ratio: 0.0,
        }
    }
}

impl LedgerConfig {
    /// Config-level ceiling for an owner (database overrides are resolved by the engine).
    pub fn ceiling_for(&self, owner: &str) -> f64 {
        self.owner_ceilings
            .get(owner)
            .copied()
            .unwrap_or(self.default_daily_ceiling)
    }
}

// ── Approval ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Seconds a tier-0 request stays open before the reaper denies it.
    pub timeout_secs: u64,
    /// Each escalation multiplies the timeout by this factor (0.0 - 1.0).
    pub escalation_factor: f64,
    /// Highest reviewer tier an escalation may reach.
    pub max_escalation_tier: u32,
    /// How often the expiry reaper scans for overdue requests.
    pub reaper_interval_secs: u64,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 3_600,
            escalation_factor: 0.5,
            max_escalation_tier: 2,
            reaper_interval_secs: 15,
        }
    }
}

impl ApprovalConfig {
    /// Open window for a request at the given tier, never below one second.
    pub fn timeout_for_tier(&self, tier: u32) -> chrono::Duration {
        let secs = self.timeout_secs as f64 * self.escalation_factor.powi(tier as i32);
        let millis = (secs * 1000.0).round().max(1000.0) as i64;
        chrono::Duration::milliseconds(millis)
    }
}

// ── Rules ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// Number of most recent resolved approvals used for the denial rate.
    pub denial_window: u32,
    /// Rules inserted on first start when the rule table is empty.
    pub seed: Vec<RuleSeed>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            denial_window: 20,
            seed: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSeed {
    #[serde(default)]
    pub condition: RuleCondition,
    pub action: RuleAction,
    #[serde(default)]
    pub threshold: Option<f64>,
}

// ── Sessions ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Active sessions idle longer than this are closed by the reaper. 0 = never.
    pub idle_timeout_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 0,
        }
    }
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address.
    pub listen: String,
    /// Bearer token -> owner identity.
    pub tokens: HashMap<String, String>,
    /// Owners allowed to list and decide approval requests.
    pub reviewers: Vec<String>,
    /// Owners allowed to manage rules and ceilings.
    pub admins: Vec<String>,
    /// Enable CORS (for dashboard development).
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3710".into(),
            tokens: HashMap::new(),
            reviewers: vec![],
            admins: vec![],
            cors: false,
        }
    }
}

impl ServerConfig {
    pub fn owner_for_token(&self, token: &str) -> Option<&str> {
        self.tokens.get(token).map(String::as_str)
    }

    pub fn is_reviewer(&self, owner: &str) -> bool {
        self.reviewers.iter().any(|r| r == owner)
    }

    pub fn is_admin(&self, owner: &str) -> bool {
        self.admins.iter().any(|a| a == owner)
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            WarningSeverity::Info => "info",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Error => "error",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, " ({h})")?;
        }
        Ok(())
    }
}

impl OverseerConfig {
    /// Validate the config and return a list of warnings.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Ledger ───
        let ceilings = std::iter::once(("ledger.default_daily_ceiling".to_string(), self.ledger.default_daily_ceiling))
            .chain(
                self.ledger
                    .owner_ceilings
                    .iter()
                    .map(|(o, c)| (format!("ledger.owner_ceilings.{o}"), *c)),
            );
        for (field, value) in ceilings {
            if !value.is_finite() || value < 0.0 {
                warnings.push(ConfigWarning {
                    field,
                    message: format!("ceiling {value} must be a non-negative number"),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            } else if value == 0.0 {
                warnings.push(ConfigWarning {
                    field,
                    message: "ceiling is zero — every costed task will need approval".into(),
                    severity: WarningSeverity::Warning,
                    hint: None,
                });
            }
        }

        // ── Approval ───
        if self.approval.timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "approval.timeout_secs".into(),
                message: "timeout is 0 — approvals expire before anyone can review them".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 3600".into()),
            });
        }
        if !(self.approval.escalation_factor > 0.0 && self.approval.escalation_factor <= 1.0) {
            warnings.push(ConfigWarning {
                field: "approval.escalation_factor".into(),
                message: format!(
                    "factor {} is out of range — escalation must tighten the deadline",
                    self.approval.escalation_factor
                ),
                severity: WarningSeverity::Error,
                hint: Some("Use a value in (0.0, 1.0]".into()),
            });
        }
        if self.approval.reaper_interval_secs == 0 {
            warnings.push(ConfigWarning {
                field: "approval.reaper_interval_secs".into(),
                message: "reaper interval is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 15".into()),
            });
        } else if self.approval.reaper_interval_secs > self.approval.timeout_secs {
            warnings.push(ConfigWarning {
                field: "approval.reaper_interval_secs".into(),
                message: "reaper runs less often than requests time out".into(),
                severity: WarningSeverity::Info,
                hint: Some("Late decisions are still rejected; expiry just lands later".into()),
            });
        }

        // ── Rules ───
        if self.rules.denial_window == 0 {
            warnings.push(ConfigWarning {
                field: "rules.denial_window".into(),
                message: "denial window is 0 — minDenialRate conditions never match".into(),
                severity: WarningSeverity::Warning,
                hint: None,
            });
        }
        for (i, seed) in self.rules.seed.iter().enumerate() {
            if let Some(t) = seed.threshold {
                if !t.is_finite() || t < 0.0 {
                    warnings.push(ConfigWarning {
                        field: format!("rules.seed[{i}].threshold"),
                        message: format!("threshold {t} must be a non-negative number"),
                        severity: WarningSeverity::Error,
                        hint: None,
                    });
                }
            }
        }

        // ── Store ───
        if self.store.max_retries == 0 {
            warnings.push(ConfigWarning {
                field: "store.max_retries".into(),
                message: "no retries — lock contention surfaces immediately as Internal".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        // ── Server ───
        if self.server.tokens.is_empty() {
            warnings.push(ConfigWarning {
                field: "server.tokens".into(),
                message: "no bearer tokens configured — every API request will be rejected".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Add [server.tokens] entries mapping token = \"owner\"".into()),
            });
        }
        for owner in self.server.tokens.values() {
            if owner.is_empty() || owner == overseer_core::SYSTEM_OWNER {
                warnings.push(ConfigWarning {
                    field: "server.tokens".into(),
                    message: format!("token maps to reserved or empty owner '{owner}'"),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
        }
        if self.server.listen.starts_with("0.0.0.0") {
            warnings.push(ConfigWarning {
                field: "server.listen".into(),
                message: "listening on all interfaces".into(),
                severity: WarningSeverity::Info,
                hint: Some("Put a TLS-terminating proxy in front; tokens travel in headers".into()),
            });
        }

        // ── Logging ───
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }
        if !["pretty", "json"].contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some("Valid values: pretty, json".into()),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| w.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(errors.join("\n"));
        }
        Ok(warnings)
    }
}
