//! The plugin host façade.
//!
//! [`PluginHost`] wires one registry, one port allocator and one lifecycle
//! controller together for the lifetime of a host run. Collaborators such as
//! an HTTP façade or a terminal UI only see [`PackageSummary`] values; the
//! process and channel handles never leave the host.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;
use watcher_config::{Config, DiscoveryMode};

use crate::channel::{Connector, ProbeStatus, TcpConnector};
use crate::discovery::{DiscoveryScanner, DiscoverySummary};
use crate::error::HostError;
use crate::extract::{ArtifactExtractor, DirectExtractor};
use crate::launcher::{Launcher, ProcessLauncher};
use crate::lifecycle::{LifecycleController, Timeouts};
use crate::package::PackageSummary;
use crate::ports::PortAllocator;
use crate::registry::{PackageRegistry, TeardownReport};
use crate::report::{HostReporter, StructuredHostReporter};

/// Log target for host operations.
const HOST_TARGET: &str = "watcher_host::host";

/// Settings for one host run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSettings {
    /// Directory scanned by [`PluginHost::discover_configured`].
    pub plugin_dir: PathBuf,
    /// Extension identifying plugin artefacts, without the leading dot.
    pub extension: String,
    /// What happens to a plugin after a successful `Init`.
    pub mode: DiscoveryMode,
    /// First control-channel port handed out.
    pub base_port: u16,
    /// Dial and call budgets.
    pub timeouts: Timeouts,
}

impl HostSettings {
    /// Derives settings from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            plugin_dir: config.plugin_dir().as_std_path().to_path_buf(),
            extension: config.plugin_extension().to_owned(),
            mode: config.discovery_mode(),
            base_port: config.base_port(),
            timeouts: Timeouts::new(
                config.connect_timeout(),
                config.call_timeout(),
                config.exit_timeout(),
            ),
        }
    }
}

impl Default for HostSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Collaborators the host drives.
pub struct HostParts {
    /// Spawns plugin processes.
    pub launcher: Arc<dyn Launcher>,
    /// Opens control channels.
    pub connector: Arc<dyn Connector>,
    /// Resolves artefacts to executables.
    pub extractor: Arc<dyn ArtifactExtractor>,
    /// Receives discovery and teardown events.
    pub reporter: Arc<dyn HostReporter>,
}

impl HostParts {
    /// Child processes, loopback JSON-RPC, in-place artefacts and
    /// `tracing` events.
    #[must_use]
    pub fn system() -> Self {
        Self {
            launcher: Arc::new(ProcessLauncher),
            connector: Arc::new(TcpConnector::new()),
            extractor: Arc::new(DirectExtractor),
            reporter: Arc::new(StructuredHostReporter::new()),
        }
    }

    /// Replaces the reporter.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn HostReporter>) -> Self {
        self.reporter = reporter;
        self
    }
}

impl Default for HostParts {
    fn default() -> Self {
        Self::system()
    }
}

impl std::fmt::Debug for HostParts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostParts").finish_non_exhaustive()
    }
}

/// Discovers, runs and tears down plugins.
///
/// Dropping a host that still has live plugins shuts them down.
///
/// # Example
///
/// ```no_run
/// use watcher_host::{HostParts, HostSettings, PluginHost};
///
/// let host = PluginHost::new(HostSettings::default(), HostParts::system());
/// host.discover_configured()?;
/// let running: Vec<String> = host
///     .list_packages()
///     .into_iter()
///     .map(|package| format!("{} {}", package.name, package.version))
///     .collect();
/// let report = host.shutdown();
/// assert!(report.all_released());
/// # Ok::<(), watcher_host::HostError>(())
/// ```
pub struct PluginHost {
    settings: HostSettings,
    registry: Arc<PackageRegistry>,
    controller: Arc<LifecycleController>,
    scanner: DiscoveryScanner,
    reporter: Arc<dyn HostReporter>,
    discovery: Mutex<()>,
}

impl PluginHost {
    /// Builds a host with an empty registry.
    #[must_use]
    pub fn new(settings: HostSettings, parts: HostParts) -> Self {
        let registry = Arc::new(PackageRegistry::new());
        let ports = Arc::new(PortAllocator::new(settings.base_port));
        let controller = Arc::new(LifecycleController::new(
            parts.launcher,
            parts.connector,
            parts.extractor,
            settings.timeouts,
        ));
        let scanner = DiscoveryScanner::new(
            Arc::clone(&registry),
            ports,
            Arc::clone(&controller),
            Arc::clone(&parts.reporter),
            settings.extension.clone(),
            settings.mode,
        );
        Self {
            settings,
            registry,
            controller,
            scanner,
            reporter: parts.reporter,
            discovery: Mutex::new(()),
        }
    }

    /// Settings this host was built with.
    #[must_use]
    pub const fn settings(&self) -> &HostSettings {
        &self.settings
    }

    /// Shared handle on the registry.
    #[must_use]
    pub fn registry(&self) -> Arc<PackageRegistry> {
        Arc::clone(&self.registry)
    }

    /// Scans `directory` for plugins.
    ///
    /// Concurrent calls are serialised with each other, so ports are
    /// assigned in a predictable order, and with [`PluginHost::shutdown`].
    ///
    /// # Errors
    ///
    /// Returns [`HostError::DiscoveryIo`] if the directory cannot be read.
    pub fn discover(&self, directory: &Path) -> Result<DiscoverySummary, HostError> {
        let _scan = self
            .discovery
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        self.scanner.discover(directory)
    }

    /// Scans the configured plugin directory.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::DiscoveryIo`] if the directory cannot be read.
    pub fn discover_configured(&self) -> Result<DiscoverySummary, HostError> {
        self.discover(&self.settings.plugin_dir)
    }

    /// Metadata for every registered package, ordered by path.
    #[must_use]
    pub fn list_packages(&self) -> Vec<PackageSummary> {
        self.registry
            .all()
            .iter()
            .map(|package| package.summary())
            .collect()
    }

    /// Metadata for the package registered at `path`.
    #[must_use]
    pub fn get_package(&self, path: &Path) -> Option<PackageSummary> {
        self.registry.get(path).map(|package| package.summary())
    }

    /// Health-checks a running package.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::NotFound`] for unknown paths,
    /// [`HostError::InvalidState`] unless the package is running, and the
    /// probe failure otherwise, in which case the package has been failed
    /// and its process released.
    pub fn probe(&self, path: &Path) -> Result<ProbeStatus, HostError> {
        let package = self.registry.get(path).ok_or_else(|| HostError::NotFound {
            path: path.to_path_buf(),
        })?;
        self.controller.probe(&package)
    }

    /// Tears down every live package and reports each outcome.
    ///
    /// A scan in progress is allowed to finish first, so packages it admits
    /// are covered too. Safe to call more than once; later calls find
    /// nothing running.
    #[must_use = "the report lists packages that could not be released"]
    pub fn shutdown(&self) -> TeardownReport {
        let _scan = self
            .discovery
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let report = self.registry.close_all(&self.controller);
        for entry in report.entries() {
            self.reporter.package_torn_down(entry);
        }
        report
    }
}

impl Drop for PluginHost {
    fn drop(&mut self) {
        if self.registry.all().iter().any(|package| package.is_live()) {
            debug!(
                target: HOST_TARGET,
                "host dropped with live plugins, shutting down"
            );
            drop(self.shutdown());
        }
    }
}

impl std::fmt::Debug for PluginHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginHost")
            .field("settings", &self.settings)
            .field("packages", &self.registry.len())
            .finish_non_exhaustive()
    }
}
