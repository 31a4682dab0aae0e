//! Plugin host for watcher.
//!
//! The `watcher-host` crate discovers executable plugin artefacts in a
//! directory, launches each one as a child process, opens a control channel
//! to it and drives it through an init, run and shutdown lifecycle. All
//! packages live in one [`PackageRegistry`]; a failure while loading one
//! plugin never stops the others from loading, and shutdown reports every
//! plugin's teardown individually.
//!
//! # Architecture
//!
//! Discovery flows one way: the [`DiscoveryScanner`] allocates a port from
//! the [`PortAllocator`], and the [`LifecycleController`] extracts, launches,
//! connects and initialises the plugin before the package is entered into
//! service or released. Teardown flows the other way: the registry asks the
//! controller to shut each package down with a graceful `Exit` first and a
//! kill only when that fails or times out.
//!
//! Plugins speak JSON-RPC 2.0 over loopback TCP. The [`endpoint`] module
//! holds the plugin half of the protocol and backs the bundled
//! `watcher-echo-plugin` binary.
//!
//! # Example
//!
//! ```rust,no_run
//! use watcher_host::{HostParts, HostSettings, PluginHost};
//! use watcher_config::Config;
//!
//! let config = Config::default();
//! let host = PluginHost::new(HostSettings::from_config(&config), HostParts::system());
//! let summary = host.discover_configured()?;
//! assert_eq!(summary.ready + summary.failed + summary.skipped, summary.candidates);
//! let report = host.shutdown();
//! assert_eq!(report.len(), host.list_packages().len());
//! # Ok::<(), watcher_host::HostError>(())
//! ```

pub mod channel;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod extract;
pub mod host;
pub mod launcher;
pub mod lifecycle;
pub mod package;
pub mod ports;
pub mod registry;
pub mod report;

#[cfg(test)]
mod tests;

pub use self::discovery::{DiscoveryScanner, DiscoverySummary};
pub use self::error::HostError;
pub use self::extract::{ArtifactExtractor, DirectExtractor, ExtractError};
pub use self::host::{HostParts, HostSettings, PluginHost};
pub use self::launcher::{Launcher, PluginProcess, ProcessLauncher};
pub use self::lifecycle::{LifecycleController, TeardownOutcome, Timeouts};
pub use self::package::{Package, PackageState, PackageSummary};
pub use self::ports::PortAllocator;
pub use self::registry::{PackageRegistry, TeardownEntry, TeardownReport};
pub use self::report::{HostReporter, StructuredHostReporter};
