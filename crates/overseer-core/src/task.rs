use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Known task shapes, with any provider-specific fields kept in `extensions`.
///
/// Agents submit a free-form `taskType` plus a metadata object. Known types are
/// lifted into typed variants so policy code can match on them; everything the
/// variant does not name stays in the extension map untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskKind {
    Purchase {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        amount: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        currency: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        merchant: Option<String>,
        #[serde(default)]
        extensions: Map<String, Value>,
    },
    FormSubmit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        form: Option<String>,
        #[serde(default)]
        extensions: Map<String, Value>,
    },
    AccountAction {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        account: Option<String>,
        #[serde(default)]
        extensions: Map<String, Value>,
    },
    Navigate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default)]
        extensions: Map<String, Value>,
    },
    Scrape {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        url: Option<String>,
        #[serde(default)]
        extensions: Map<String, Value>,
    },
    Custom {
        task_type: String,
        #[serde(default)]
        extensions: Map<String, Value>,
    },
}

impl TaskKind {
    /// Lift a wire `taskType` + metadata pair into a typed kind.
    ///
    /// Only well-typed fields are lifted; a field of the wrong JSON type stays
    /// in `extensions` so the provider still sees it.
    pub fn from_parts(task_type: &str, metadata: &Map<String, Value>) -> Self {
        let mut ext = metadata.clone();
        match task_type {
            "purchase" => Self::Purchase {
                amount: take_f64(&mut ext, "amount"),
                currency: take_string(&mut ext, "currency"),
                merchant: take_string(&mut ext, "merchant"),
                extensions: ext,
            },
            "form_submit" => Self::FormSubmit {
                url: take_string(&mut ext, "url"),
                form: take_string(&mut ext, "form"),
                extensions: ext,
            },
            "account_action" => Self::AccountAction {
                operation: take_string(&mut ext, "operation"),
                account: take_string(&mut ext, "account"),
                extensions: ext,
            },
            "navigate" => Self::Navigate {
                url: take_string(&mut ext, "url"),
                extensions: ext,
            },
            "scrape" => Self::Scrape {
                url: take_string(&mut ext, "url"),
                extensions: ext,
            },
            other => Self::Custom {
                task_type: other.to_string(),
                extensions: ext,
            },
        }
    }

    /// The wire `taskType` string for this kind.
    pub fn task_type(&self) -> &str {
        match self {
            Self::Purchase { .. } => "purchase",
            Self::FormSubmit { .. } => "form_submit",
            Self::AccountAction { .. } => "account_action",
            Self::Navigate { .. } => "navigate",
            Self::Scrape { .. } => "scrape",
            Self::Custom { task_type, .. } => task_type,
        }
    }

    /// Whether the task moves money, submits data, or changes an account.
    pub fn is_side_effecting(&self) -> bool {
        matches!(
            self,
            Self::Purchase { .. } | Self::FormSubmit { .. } | Self::AccountAction { .. }
        )
    }

    pub fn extensions(&self) -> &Map<String, Value> {
        match self {
            Self::Purchase { extensions, .. }
            | Self::FormSubmit { extensions, .. }
            | Self::AccountAction { extensions, .. }
            | Self::Navigate { extensions, .. }
            | Self::Scrape { extensions, .. }
            | Self::Custom { extensions, .. } => extensions,
        }
    }
}

fn take_string(ext: &mut Map<String, Value>, key: &str) -> Option<String> {
    if !ext.get(key).is_some_and(Value::is_string) {
        return None;
    }
    match ext.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn take_f64(ext: &mut Map<String, Value>, key: &str) -> Option<f64> {
    let value = ext.get(key).and_then(Value::as_f64)?;
    ext.remove(key);
    Some(value)
}
