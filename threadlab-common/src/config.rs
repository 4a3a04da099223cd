//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "THREADLAB_ROOT";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "threadlab.db";

/// Logging section of the TOML config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing level when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Engine tuning section of the TOML config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Turns fetched per page when loading a container
    pub page_size: usize,
    /// Upper bound on containers resolved in parallel
    pub max_concurrent_containers: usize,
    /// Row errors/warnings kept in an import report summary
    pub report_message_limit: usize,
    /// Confidence given to annotations seeded from an imported `thread` column
    pub import_confidence: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            page_size: 500,
            max_concurrent_containers: 4,
            report_message_limit: 20,
            import_confidence: 1.0,
        }
    }
}

impl EngineSettings {
    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::Config("engine.page_size must be at least 1".to_string()));
        }
        if self.max_concurrent_containers == 0 {
            return Err(Error::Config(
                "engine.max_concurrent_containers must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.import_confidence) {
            return Err(Error::Config(format!(
                "engine.import_confidence must be within [0, 1], got {}",
                self.import_confidence
            )));
        }
        Ok(())
    }
}

/// Contents of `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<String>,
    pub logging: LoggingConfig,
    pub engine: EngineSettings,
}

/// Default configuration file path: `<config_dir>/threadlab/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("threadlab").join("config.toml"))
}

/// Load the TOML config
///
/// An explicit path must exist. Without one, the platform default is used if
/// present and built-in defaults otherwise. A file that fails to parse is
/// always an error.
pub fn load_toml_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            path.to_path_buf()
        }
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(TomlConfig::default()),
        },
    };

    let content = std::fs::read_to_string(&path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;
    config.engine.validate()?;
    Ok(config)
}

/// Write config atomically (temp file in the same directory, then rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent default (fallback)
pub fn resolve_root_folder(cli_arg: Option<&str>, toml_config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
        warn!("{} is set but empty; ignoring", ROOT_FOLDER_ENV);
    }

    if let Some(path) = &toml_config.root_folder {
        return PathBuf::from(path);
    }

    default_root_folder()
}

/// Database path inside a root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join(DATABASE_FILE)
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("threadlab"))
        .unwrap_or_else(|| PathBuf::from("./threadlab_data"))
}
