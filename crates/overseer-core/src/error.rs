use thiserror::Error;

/// Unified error type for the governance engine.
#[derive(Error, Debug)]
pub enum GovernanceError {
    // ── Caller errors ──────────────────────────────────────────
    #[error("unauthorized")]
    Unauthorized,

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("validation failed: {0}")]
    Validation(String),

    // ── Lifecycle errors ───────────────────────────────────────
    #[error("session is closed: {0}")]
    SessionClosed(String),

    #[error("task {task} is not approved for this transition (status: {status})")]
    NotApproved { task: String, status: String },

    #[error("approval {approval} already resolved (status: {status})")]
    AlreadyResolved { approval: String, status: String },

    #[error("rule conflict: {0}")]
    RuleConflict(String),

    /// Never surfaced by `submit`; the classifier turns it into a forced approval.
    #[error("budget exceeded for {owner}: used {used}, limit {limit}")]
    BudgetExceeded { owner: String, used: f64, limit: f64 },

    // ── Infrastructure errors ──────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    /// Raw persistence failure. Transient ones are retried before they escape.
    #[error("store error: {message}")]
    Store { message: String, transient: bool },

    #[error("internal error: {0}")]
    Internal(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl GovernanceError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            transient: false,
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
            transient: true,
        }
    }

    /// Stable machine-readable code carried in API error envelopes and audit payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Unauthorized",
            Self::NotFound { .. } => "NotFound",
            Self::Validation(_) => "Validation",
            Self::SessionClosed(_) => "SessionClosed",
            Self::NotApproved { .. } => "NotApproved",
            Self::AlreadyResolved { .. } => "AlreadyResolved",
            Self::RuleConflict(_) => "RuleConflict",
            Self::BudgetExceeded { .. } => "BudgetExceeded",
            Self::Config(_) => "Config",
            Self::Store { .. }
            | Self::Internal(_)
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Other(_) => "Internal",
        }
    }

    /// Whether a retry of the same operation may succeed (lock contention, lost CAS).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store { transient: true, .. })
    }

    /// Whether this is a caller-side rejection rather than an engine failure.
    pub fn is_client_error(&self) -> bool {
        !matches!(self.code(), "Internal" | "Config")
    }
}

pub type Result<T> = std::result::Result<T, GovernanceError>;
