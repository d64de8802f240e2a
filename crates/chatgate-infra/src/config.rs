//! Service configuration loader for Chatgate.
//!
//! Resolution order:
//! 1. An explicit path (`--config`), which must exist.
//! 2. `{base_dir}/config.toml`
//! 3. `{base_dir}/config/config.toml`
//! 4. Built-in defaults ([`ServiceConfig::default()`]).
//!
//! A file that exists but cannot be read, parsed, or validated is an error:
//! the service refuses to start rather than run with limits nobody asked for.

use std::path::{Path, PathBuf};

use chatgate_types::config::ServiceConfig;
use chatgate_types::error::ConfigError;

/// File name looked up in each search directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// A loaded configuration and the file it came from (`None` for defaults).
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: ServiceConfig,
    pub source: Option<PathBuf>,
}

/// Candidate files checked when no explicit path is given, in order.
pub fn search_paths(base_dir: &Path) -> Vec<PathBuf> {
    vec![
        base_dir.join(CONFIG_FILE_NAME),
        base_dir.join("config").join(CONFIG_FILE_NAME),
    ]
}

/// Locate and load the service configuration.
pub async fn load_service_config(
    explicit: Option<&Path>,
    base_dir: &Path,
) -> Result<LoadedConfig, ConfigError> {
    if let Some(path) = explicit {
        return match read_if_exists(path).await? {
            Some(content) => Ok(LoadedConfig {
                config: parse_service_config(&content, path)?,
                source: Some(path.to_path_buf()),
            }),
            None => Err(ConfigError::NotFound(path.to_path_buf())),
        };
    }

    for path in search_paths(base_dir) {
        if let Some(content) = read_if_exists(&path).await? {
            tracing::debug!("Loaded configuration from {}", path.display());
            return Ok(LoadedConfig {
                config: parse_service_config(&content, &path)?,
                source: Some(path),
            });
        }
    }

    tracing::debug!(
        "No {CONFIG_FILE_NAME} found under {}, using defaults",
        base_dir.display()
    );
    Ok(LoadedConfig {
        config: ServiceConfig::default(),
        source: None,
    })
}

/// Parse and validate TOML content. `path` is only used in error messages.
pub fn parse_service_config(content: &str, path: &Path) -> Result<ServiceConfig, ConfigError> {
    let config: ServiceConfig = toml::from_str(content).map_err(|err| ConfigError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

async fn read_if_exists(path: &Path) -> Result<Option<String>, ConfigError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
