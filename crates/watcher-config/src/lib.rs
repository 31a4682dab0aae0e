//! Shared configuration for the watcher plugin host.
//!
//! Configuration is layered with `ortho_config`: built-in defaults are
//! overridden by a TOML file (selected with `--config-path` or
//! `WATCHER_CONFIG_PATH`), then by `WATCHER_*` environment variables, and
//! finally by command-line flags. The resulting [`Config`] is consumed by the
//! host library to locate plugin artefacts, size its timeouts and pick the
//! discovery mode, and by the daemon to configure telemetry.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

mod defaults;
mod logging;
mod mode;

pub use defaults::{
    DEFAULT_BASE_PORT, DEFAULT_CALL_TIMEOUT_MS, DEFAULT_CONNECT_TIMEOUT_MS,
    DEFAULT_EXIT_TIMEOUT_MS, DEFAULT_LOG_FILTER, DEFAULT_PLUGIN_DIR, DEFAULT_PLUGIN_EXTENSION,
    default_discovery_mode, default_log_filter, default_log_filter_string, default_log_format,
    default_plugin_dir, default_plugin_extension,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use mode::{DiscoveryMode, DiscoveryModeParseError};

/// Resolved configuration for the plugin host and its daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, OrthoConfig)]
#[ortho_config(prefix = "WATCHER")]
pub struct Config {
    /// Directory scanned for plugin artefacts.
    #[serde(default = "default_plugin_dir")]
    #[ortho_config(default = default_plugin_dir())]
    pub plugin_dir: Utf8PathBuf,
    /// File extension (without the leading dot) that marks a plugin artefact.
    #[serde(default = "default_plugin_extension")]
    #[ortho_config(default = default_plugin_extension())]
    pub plugin_extension: String,
    /// Whether discovered plugins stay resident or are catalogued only.
    #[serde(default = "default_discovery_mode")]
    #[ortho_config(default = default_discovery_mode())]
    pub discovery_mode: DiscoveryMode,
    /// First port handed to a plugin control channel.
    #[serde(default = "defaults::default_base_port")]
    #[ortho_config(default = DEFAULT_BASE_PORT)]
    pub base_port: u16,
    /// Budget in milliseconds for dialling a launched plugin.
    #[serde(default = "defaults::default_connect_timeout_ms")]
    #[ortho_config(default = DEFAULT_CONNECT_TIMEOUT_MS)]
    pub connect_timeout_ms: u64,
    /// Budget in milliseconds for `Init` and `Probe` calls.
    #[serde(default = "defaults::default_call_timeout_ms")]
    #[ortho_config(default = DEFAULT_CALL_TIMEOUT_MS)]
    pub call_timeout_ms: u64,
    /// Budget in milliseconds for the cooperative `Exit` call.
    #[serde(default = "defaults::default_exit_timeout_ms")]
    #[ortho_config(default = DEFAULT_EXIT_TIMEOUT_MS)]
    pub exit_timeout_ms: u64,
    /// `tracing` filter expression applied by the binaries.
    #[serde(default = "default_log_filter_string")]
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format for structured logs.
    #[serde(default = "default_log_format")]
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            plugin_dir: default_plugin_dir(),
            plugin_extension: default_plugin_extension(),
            discovery_mode: default_discovery_mode(),
            base_port: DEFAULT_BASE_PORT,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            call_timeout_ms: DEFAULT_CALL_TIMEOUT_MS,
            exit_timeout_ms: DEFAULT_EXIT_TIMEOUT_MS,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Directory scanned for plugin artefacts.
    #[must_use]
    pub fn plugin_dir(&self) -> &Utf8Path {
        self.plugin_dir.as_path()
    }

    /// Plugin extension with any leading dot removed.
    #[must_use]
    pub fn plugin_extension(&self) -> &str {
        self.plugin_extension.trim_start_matches('.')
    }

    /// Selected discovery mode.
    #[must_use]
    pub const fn discovery_mode(&self) -> DiscoveryMode {
        self.discovery_mode
    }

    /// First port handed to a plugin control channel.
    #[must_use]
    pub const fn base_port(&self) -> u16 {
        self.base_port
    }

    /// Budget for dialling a launched plugin.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Budget for `Init` and `Probe` calls.
    #[must_use]
    pub const fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Budget for the cooperative `Exit` call.
    #[must_use]
    pub const fn exit_timeout(&self) -> Duration {
        Duration::from_millis(self.exit_timeout_ms)
    }

    /// `tracing` filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Output format for structured logs.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = Config::default();
        assert_eq!(config.plugin_dir(), Utf8Path::new("plugins"));
        assert_eq!(config.plugin_extension(), "watcher");
        assert_eq!(config.discovery_mode(), DiscoveryMode::Active);
        assert_eq!(config.base_port(), 50051);
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.call_timeout(), Duration::from_secs(3));
        assert_eq!(config.exit_timeout(), Duration::from_secs(3));
        assert_eq!(config.log_filter(), "info");
        assert_eq!(config.log_format(), LogFormat::Json);
    }

    #[test]
    fn extension_accessor_strips_leading_dot() {
        let config = Config {
            plugin_extension: String::from(".watcher"),
            ..Config::default()
        };
        assert_eq!(config.plugin_extension(), "watcher");
    }
}
