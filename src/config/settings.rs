//! Configuration structures for deserialisation.
//!
//! These structures map directly onto the YAML configuration file format
//! described in the external interfaces: a `servers` list of upstream
//! specs, a `proxy` section of advisory defaults, and an optional
//! top-level `inherit` default policy.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::config::duration::parse_duration;
use crate::error::ConfigError;

/// The effective inheritance tier selected by an `inherit.mode` string.
///
/// `none` is an alias for `tier1`; `all` is an alias for `tier1+tier2`. The
/// builder must never treat `all` as "inherit the entire parent
/// environment" — it only widens the tiered baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InheritMode {
    /// Baseline variables only.
    #[default]
    Tier1,
    /// Baseline plus the TLS/CA bundle variables.
    Tier1AndTier2,
}

impl InheritMode {
    /// Parses one of the four accepted config strings.
    ///
    /// # Errors
    ///
    /// Returns an error for any string other than `""`, `"none"`,
    /// `"tier1"`, `"all"`, or `"tier1+tier2"`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "" | "none" | "tier1" => Ok(Self::Tier1),
            "all" | "tier1+tier2" => Ok(Self::Tier1AndTier2),
            other => Err(format!("invalid inherit.mode '{other}'")),
        }
    }
}

fn deserialize_inherit_mode<'de, D>(deserializer: D) -> Result<InheritMode, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    InheritMode::parse(&raw).map_err(serde::de::Error::custom)
}

fn default_inherit_mode() -> InheritMode {
    InheritMode::Tier1
}

/// Inheritance policy for one spec or for the proxy-level default.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InheritPolicy {
    /// Which tier of baseline variables to seed.
    #[serde(
        default = "default_inherit_mode",
        deserialize_with = "deserialize_inherit_mode"
    )]
    pub mode: InheritMode,

    /// Extra variable names to add if present in the parent environment.
    #[serde(default)]
    pub extra: Vec<String>,

    /// Name prefixes; every parent variable starting with one of these is
    /// added unless denied.
    #[serde(default)]
    pub prefix: Vec<String>,

    /// Variable names to deny in addition to the implicit denylist.
    #[serde(default)]
    pub deny: Vec<String>,

    /// Whether an `extra` entry that is also denied should be added anyway.
    #[serde(default)]
    pub allow_denied_if_explicit: bool,
}

impl Default for InheritPolicy {
    fn default() -> Self {
        Self {
            mode: InheritMode::Tier1,
            extra: Vec::new(),
            prefix: Vec::new(),
            deny: Vec::new(),
            allow_denied_if_explicit: false,
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_duration(&raw).map_err(serde::de::Error::custom)
}

fn default_transport() -> String {
    "stdio".to_string()
}

/// Launch recipe and logical identity for one upstream server.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamSpec {
    /// Unique logical name; also the default tool-name prefix.
    pub name: String,

    /// Unique prefix applied to this upstream's tool names.
    pub prefix: String,

    /// Transport kind; only `"stdio"` is supported by the core.
    #[serde(default = "default_transport")]
    pub transport: String,

    /// Executable to launch.
    pub command: String,

    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides, written unconditionally into the child's
    /// environment regardless of deny lists.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Inheritance policy for this spec. Absent means the proxy-level
    /// default applies with no further narrowing.
    #[serde(default)]
    pub inherit: Option<InheritPolicy>,

    /// Per-call timeout. Defaults to 30 seconds.
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

impl UpstreamSpec {
    /// Validates one upstream spec's fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if `name`, `prefix`, or
    /// `command` is empty, or if `transport` is anything but `"stdio"`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::ValidationError {
                message: "server name cannot be empty".to_string(),
            });
        }
        if self.prefix.is_empty() {
            return Err(ConfigError::ValidationError {
                message: format!("prefix cannot be empty for server '{}'", self.name),
            });
        }
        if self.transport != "stdio" {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "unsupported transport '{}' for server '{}' (only 'stdio' is supported)",
                    self.transport, self.name
                ),
            });
        }
        if self.command.is_empty() {
            return Err(ConfigError::ValidationError {
                message: format!("command cannot be empty for server '{}'", self.name),
            });
        }
        Ok(())
    }
}

fn default_health_check_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_retries() -> u32 {
    3
}

/// Advisory proxy-level defaults. The core surfaces these to the
/// aggregator but does not act on them — only a spec's `timeout` is
/// enforced.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Advisory health-check interval.
    #[serde(
        default = "default_health_check_interval",
        deserialize_with = "deserialize_duration"
    )]
    pub health_check_interval: Duration,

    /// Advisory connection timeout.
    #[serde(
        default = "default_connection_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub connection_timeout: Duration,

    /// Advisory retry count.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            health_check_interval: default_health_check_interval(),
            connection_timeout: default_connection_timeout(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Root configuration structure, matching the YAML config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Statically configured upstreams, started at boot.
    #[serde(default)]
    pub servers: Vec<UpstreamSpec>,

    /// Advisory proxy-level defaults.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Top-level default inheritance policy.
    #[serde(default)]
    pub inherit: InheritPolicy,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any spec is malformed, or if two specs share a
    /// `name` or a `prefix`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen_names = std::collections::HashSet::new();
        let mut seen_prefixes = std::collections::HashSet::new();

        for spec in &self.servers {
            spec.validate()?;

            if !seen_names.insert(spec.name.clone()) {
                return Err(ConfigError::ValidationError {
                    message: format!("duplicate server name '{}'", spec.name),
                });
            }
            if !seen_prefixes.insert(spec.prefix.clone()) {
                return Err(ConfigError::ValidationError {
                    message: format!("duplicate server prefix '{}'", spec.prefix),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let yaml = r"
servers:
  - name: echo
    prefix: echo
    command: /usr/bin/echo-mcp
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.servers.len(), 1);
        assert_eq!(config.servers[0].name, "echo");
        assert_eq!(config.servers[0].timeout, Duration::from_secs(30));
    }

    #[test]
    fn parse_full_config() {
        let yaml = r"
servers:
  - name: echo
    prefix: echo
    transport: stdio
    command: /usr/bin/echo-mcp
    args: ['--verbose']
    env:
      FOO: bar
    inherit:
      mode: all
      extra: ['HTTP_PROXY']
      allow_denied_if_explicit: true
    timeout: 100ms
proxy:
  healthCheckInterval: 1m
  connectionTimeout: 5s
  maxRetries: 5
inherit:
  mode: tier1
logging:
  level: debug
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.servers[0].timeout, Duration::from_millis(100));
        assert_eq!(
            config.servers[0].inherit.as_ref().unwrap().mode,
            InheritMode::Tier1AndTier2
        );
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn validate_duplicate_name_fails() {
        let yaml = r"
servers:
  - name: fs
    prefix: fs1
    command: one
  - name: fs
    prefix: fs2
    command: two
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate server name"));
    }

    #[test]
    fn validate_duplicate_prefix_fails() {
        let yaml = r"
servers:
  - name: fs1
    prefix: fs
    command: one
  - name: fs2
    prefix: fs
    command: two
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate server prefix"));
    }

    #[test]
    fn rejects_unknown_transport() {
        let yaml = r"
servers:
  - name: fs
    prefix: fs
    transport: http
    command: one
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unsupported transport"));
    }

    #[test]
    fn rejects_invalid_inherit_mode() {
        let yaml = r"
servers:
  - name: fs
    prefix: fs
    command: one
    inherit:
      mode: everything
";
        let result: Result<Config, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn empty_config_is_valid() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert!(config.servers.is_empty());
        assert!(config.validate().is_ok());
    }
}
