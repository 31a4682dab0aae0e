use camino::Utf8PathBuf;

use crate::logging::LogFormat;
use crate::mode::DiscoveryMode;

/// Default directory scanned for plugin artefacts.
pub const DEFAULT_PLUGIN_DIR: &str = "plugins";

/// Default file extension identifying plugin artefacts.
pub const DEFAULT_PLUGIN_EXTENSION: &str = "watcher";

/// First TCP port handed to a plugin control channel.
pub const DEFAULT_BASE_PORT: u16 = 50051;

/// Default budget for dialling a freshly launched plugin.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 3_000;

/// Default budget for `Init` and `Probe` calls.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 3_000;

/// Default budget for the cooperative `Exit` call before a plugin is killed.
pub const DEFAULT_EXIT_TIMEOUT_MS: u64 = 3_000;

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default plugin directory as an owned path.
pub fn default_plugin_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_PLUGIN_DIR)
}

/// Default plugin extension as an owned string.
pub fn default_plugin_extension() -> String {
    DEFAULT_PLUGIN_EXTENSION.to_owned()
}

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Default discovery mode.
pub fn default_discovery_mode() -> DiscoveryMode {
    DiscoveryMode::Active
}

pub(crate) const fn default_base_port() -> u16 {
    DEFAULT_BASE_PORT
}

pub(crate) const fn default_connect_timeout_ms() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_MS
}

pub(crate) const fn default_call_timeout_ms() -> u64 {
    DEFAULT_CALL_TIMEOUT_MS
}

pub(crate) const fn default_exit_timeout_ms() -> u64 {
    DEFAULT_EXIT_TIMEOUT_MS
}
