//! Domain errors raised by the plugin host.
//!
//! Every variant carries the artefact path it concerns so the discovery
//! boundary can log failures per candidate. I/O errors are wrapped in `Arc`
//! to satisfy the `result_large_err` Clippy lint.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::channel::{ChannelError, ControlCall};
use crate::extract::ExtractError;
use crate::package::PackageState;

/// Errors arising from plugin host operations.
#[derive(Debug, Error)]
pub enum HostError {
    /// The plugin directory itself could not be read. Aborts discovery.
    #[error("failed to read plugin directory '{}': {source}", directory.display())]
    DiscoveryIo {
        /// Directory that was scanned.
        directory: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The artefact could not be turned into a runnable path.
    #[error("failed to prepare plugin '{}': {source}", path.display())]
    Extraction {
        /// Artefact path.
        path: PathBuf,
        /// Extraction failure.
        #[source]
        source: ExtractError,
    },

    /// No control-channel port is left to hand out.
    #[error("no control port left for plugin '{}' (last port {last_port})", path.display())]
    PortsExhausted {
        /// Artefact path.
        path: PathBuf,
        /// Highest port that was ever allocated.
        last_port: u16,
    },

    /// The plugin executable could not be started.
    #[error("plugin '{}' failed to start: {message}", path.display())]
    Launch {
        /// Artefact path.
        path: PathBuf,
        /// Human-readable failure description.
        message: String,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The control channel to a launched plugin could not be opened.
    #[error("could not connect to plugin '{}' on port {port}: {source}", path.display())]
    Connection {
        /// Artefact path.
        path: PathBuf,
        /// Port the plugin was told to listen on.
        port: u16,
        /// Channel failure.
        #[source]
        source: ChannelError,
    },

    /// A lifecycle call failed or timed out.
    #[error("{call} call to plugin '{}' failed: {source}", path.display())]
    Lifecycle {
        /// Artefact path.
        path: PathBuf,
        /// Lifecycle call that failed.
        call: ControlCall,
        /// Channel failure.
        #[source]
        source: ChannelError,
    },

    /// The plugin answered `Probe` but reported itself unhealthy.
    #[error("plugin '{}' reported unhealthy: {detail}", path.display())]
    Unhealthy {
        /// Artefact path.
        path: PathBuf,
        /// Detail supplied by the plugin.
        detail: String,
    },

    /// The operation is not valid for the package's current state.
    #[error("cannot {operation} plugin '{}' while {state}", path.display())]
    InvalidState {
        /// Artefact path.
        path: PathBuf,
        /// Current lifecycle state.
        state: PackageState,
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// No package is registered for the path.
    #[error("plugin '{}' not found in registry", path.display())]
    NotFound {
        /// Path that was looked up.
        path: PathBuf,
    },
}

impl HostError {
    /// Short machine-readable class used in structured logs.
    #[must_use]
    pub const fn class(&self) -> &'static str {
        match self {
            Self::DiscoveryIo { .. } => "discovery_io",
            Self::Extraction { .. } => "extraction",
            Self::PortsExhausted { .. } => "ports_exhausted",
            Self::Launch { .. } => "launch",
            Self::Connection { .. } => "connection",
            Self::Lifecycle { .. } | Self::Unhealthy { .. } => "lifecycle",
            Self::InvalidState { .. } => "invalid_state",
            Self::NotFound { .. } => "not_found",
        }
    }
}
