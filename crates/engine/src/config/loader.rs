use std::path::{Path, PathBuf};

use rasbora_common::config::SystemConfig;

use super::validation;

/// Load and validate `system.toml` from the given config directory.
///
/// Fails loudly with clear error messages if anything is misconfigured —
/// the engine refuses to start on validation failure (§6 "Exit codes").
pub fn load_config(config_dir: &Path) -> Result<SystemConfig, ConfigError> {
    tracing::info!(config_dir = %config_dir.display(), "loading configuration");

    let system_path = config_dir.join("system.toml");
    let content = std::fs::read_to_string(&system_path).map_err(|e| ConfigError::FileRead {
        path: system_path.clone(),
        source: e,
    })?;

    let system: SystemConfig = toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: system_path.clone(),
        detail: e.to_string(),
    })?;

    validation::validate(&system)?;

    tracing::info!(
        roles = ?system.components.active,
        "configuration loaded successfully"
    );

    Ok(system)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("validation failed: {0}")]
    Validation(String),
}
