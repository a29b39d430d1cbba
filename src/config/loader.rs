//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::schema::HarnessConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Directory holding one sub-directory per environment.
pub const CONFIG_ROOT: &str = "config";

/// File name looked up inside the environment directory.
pub const CONFIG_FILE: &str = "conf.toml";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "cannot read {}: {}", path.display(), e),
            ConfigError::Parse(e) => write!(f, "parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(_, e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Validation(_) => None,
        }
    }
}

/// Pick the config file: an explicit path wins, otherwise
/// `config/<env>/conf.toml`.
pub fn resolve_config_path(explicit: Option<&Path>, env: &str) -> PathBuf {
    match explicit {
        Some(path) => path.to_path_buf(),
        None => Path::new(CONFIG_ROOT).join(env).join(CONFIG_FILE),
    }
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<HarnessConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    let config: HarnessConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}
