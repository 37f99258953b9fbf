//! Configuration file loading and parsing.
//!
//! The configuration file is YAML. It is searched in the following order:
//!
//! 1. Path specified via the `--config` CLI flag.
//! 2. Default location:
//!    - **Linux/macOS:** `~/.mcp-aggregator/config.yaml`
//!    - **Windows:** `%USERPROFILE%\.mcp-aggregator\config.yaml`
//!
//! Environment-variable substitution inside the file itself is out of
//! scope for the core and is not performed here.

pub mod duration;
mod settings;

pub use settings::{Config, InheritMode, InheritPolicy, LoggingConfig, ProxyConfig, UpstreamSpec};

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Returns the default configuration directory.
#[must_use]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|p| p.join(".mcp-aggregator"))
}

/// Returns the platform-specific default configuration file path.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("config.yaml"))
}

/// Loads and parses the configuration file.
///
/// If `path` is `None`, uses the platform-specific default location.
///
/// # Errors
///
/// Returns an error if the file cannot be found, read, parsed as YAML, or
/// fails validation.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config_path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path().ok_or_else(|| ConfigError::NotFound {
            path: PathBuf::from("<default config path>"),
        })?,
    };

    if !config_path.exists() {
        return Err(ConfigError::NotFound { path: config_path });
    }

    let contents = std::fs::read_to_string(&config_path).map_err(|e| ConfigError::ReadError {
        path: config_path.clone(),
        source: e,
    })?;

    let config: Config =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::ParseError {
            path: config_path.clone(),
            source: e,
        })?;

    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_dir_exists() {
        assert!(default_config_dir().is_some());
    }

    #[test]
    fn default_config_path_exists() {
        let path = default_config_path();
        assert!(path.is_some());
        assert!(path.unwrap().to_string_lossy().contains("config.yaml"));
    }

    #[test]
    fn load_config_missing_file_errors() {
        let path = PathBuf::from("/nonexistent/path/to/config.yaml");
        let result = load_config(Some(&path));
        assert!(matches!(result, Err(ConfigError::NotFound { .. })));
    }

    #[test]
    fn load_config_reads_and_validates_a_real_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "servers:\n  - name: echo\n    prefix: echo\n    command: /bin/echo-mcp\n"
        )
        .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].name, "echo");
    }

    #[test]
    fn load_config_rejects_malformed_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "servers: [this is not valid: yaml: at all:").unwrap();

        let result = load_config(Some(file.path()));
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }
}
