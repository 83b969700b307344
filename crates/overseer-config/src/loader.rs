use notify::{Event as NotifyEvent, EventKind, RecursiveMode, Watcher};
use overseer_core::GovernanceError;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::schema::OverseerConfig;

/// Loads and optionally hot-reloads the Overseer configuration.
pub struct ConfigLoader {
    config: Arc<RwLock<OverseerConfig>>,
    config_path: PathBuf,
}

impl ConfigLoader {
    /// Resolve the config path: explicit path > OVERSEER_CONFIG env > ~/.overseer/overseer.toml
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("OVERSEER_CONFIG") {
            return PathBuf::from(p);
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".overseer")
            .join("overseer.toml")
    }

    /// Load the config from disk, falling back to defaults.
    pub fn load(path: Option<&Path>) -> overseer_core::Result<Self> {
        let config_path = Self::resolve_path(path);
        let config = if config_path.exists() {
            info!(?config_path, "loading configuration");
            parse_file(&config_path)?
        } else {
            warn!(?config_path, "config file not found, using defaults");
            OverseerConfig::default()
        };

        let config = Self::apply_env_overrides(config);

        match config.validate() {
            Ok(warnings) => {
                for w in &warnings {
                    warn!("{}", w);
                }
            }
            Err(e) => return Err(GovernanceError::Config(e)),
        }

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_path,
        })
    }

    /// Get a read snapshot of the current config.
    pub fn get(&self) -> OverseerConfig {
        self.config.read().clone()
    }

    /// Shared handle; the engine reads policy knobs through it on every call.
    pub fn shared(&self) -> Arc<RwLock<OverseerConfig>> {
        Arc::clone(&self.config)
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Apply env var overrides (OVERSEER_DB_PATH, OVERSEER_DAILY_CEILING, etc.)
    fn apply_env_overrides(mut config: OverseerConfig) -> OverseerConfig {
        if let Ok(v) = std::env::var("OVERSEER_DB_PATH") {
            config.store.db_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("OVERSEER_SERVER_LISTEN") {
            config.server.listen = v;
        }
        if let Ok(v) = std::env::var("OVERSEER_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("OVERSEER_DAILY_CEILING") {
            match v.parse::<f64>() {
                Ok(ceiling) => config.ledger.default_daily_ceiling = ceiling,
                Err(_) => warn!(value = %v, "ignoring unparseable OVERSEER_DAILY_CEILING"),
            }
        }
        config
    }

    /// Reload the config from disk. A config that fails validation is rejected
    /// and the current one stays in place.
    pub fn reload(&self) -> overseer_core::Result<()> {
        if !self.config_path.exists() {
            return Err(GovernanceError::Config(format!(
                "config file not found: {}",
                self.config_path.display()
            )));
        }
        let new_config = Self::apply_env_overrides(parse_file(&self.config_path)?);
        new_config.validate().map_err(GovernanceError::Config)?;
        *self.config.write() = new_config;
        info!("configuration reloaded");
        Ok(())
    }

    /// Start a background file watcher that reloads when the config file changes.
    /// The returned watcher must be kept alive for watching to continue.
    pub fn watch(&self) -> overseer_core::Result<notify::RecommendedWatcher> {
        let config = Arc::clone(&self.config);
        let path_for_event = self.config_path.clone();

        info!(config_path = ?self.config_path, "starting config file watcher");

        let mut watcher = notify::recommended_watcher(move |res: Result<NotifyEvent, notify::Error>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "file watcher error");
                    return;
                }
            };
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                return;
            }
            let is_our_file = event
                .paths
                .iter()
                .any(|p| p.file_name() == path_for_event.file_name());
            if !is_our_file {
                return;
            }

            match parse_file(&path_for_event) {
                Ok(parsed) => {
                    let parsed = ConfigLoader::apply_env_overrides(parsed);
                    if let Err(e) = parsed.validate() {
                        warn!(error = %e, "reloaded config is invalid, keeping current config");
                        return;
                    }
                    *config.write() = parsed;
                    info!("configuration hot-reloaded");
                }
                Err(e) => warn!(error = %e, "config file has errors, keeping current config"),
            }
        })
        .map_err(|e| GovernanceError::Config(format!("failed to create file watcher: {e}")))?;

        // Watch the parent directory (some editors write a temp file and rename)
        let watch_path = match self.config_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        watcher
            .watch(watch_path, RecursiveMode::NonRecursive)
            .map_err(|e| GovernanceError::Config(format!("failed to watch config directory: {e}")))?;

        Ok(watcher)
    }
}

fn parse_file(path: &Path) -> overseer_core::Result<OverseerConfig> {
    let raw = std::fs::read_to_string(path)?;
    toml::from_str::<OverseerConfig>(&raw)
        .map_err(|e| GovernanceError::Config(format!("failed to parse {}: {e}", path.display())))
}
