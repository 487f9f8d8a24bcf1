use std::path::Path;

use thiserror::Error;

mod schema;

pub use schema::{
    AssistantConfig, BoardConfig, CURRENT_CONFIG_VERSION, Config, NotificationConfig,
    ReminderConfig, ThemeMode,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Will always return config, falling back to defaults on missing/invalid files.
pub async fn load_config_from_file(config_path: &Path) -> Config {
    match tokio::fs::read_to_string(config_path).await {
        Ok(raw_config) => Config::from_raw(&raw_config),
        Err(err) => {
            if err.kind() == std::io::ErrorKind::NotFound {
                tracing::info!("No config file found, using defaults");
            } else {
                tracing::warn!("Failed to read config file: {}", err);
            }
            Config::default()
        }
    }
}

/// Saves the config to the given path
pub async fn save_config_to_file(config: &Config, config_path: &Path) -> Result<(), ConfigError> {
    let normalized = config.clone().normalized();
    let raw_config = serde_json::to_string_pretty(&normalized)?;
    tokio::fs::write(config_path, raw_config).await?;
    Ok(())
}

/// Reads `primary`, then `fallback`, ignoring blank values.
pub fn resolve_env(primary: &str, fallback: &str) -> Option<String> {
    resolve_env_with(primary, fallback, |name| std::env::var(name).ok())
}

pub(crate) fn resolve_env_with<F>(primary: &str, fallback: &str, get_env: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| {
        get_env(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };
    read(primary).or_else(|| read(fallback))
}
