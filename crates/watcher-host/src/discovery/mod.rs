//! Scanning a directory for plugin artefacts.
//!
//! The [`DiscoveryScanner`] turns every regular file carrying the plugin
//! extension into a registered [`Package`]: it allocates a port, asks the
//! lifecycle controller to launch, connect and initialise the plugin, and
//! then either enters it into service or releases it, depending on the
//! [`DiscoveryMode`]. Only an unreadable directory aborts a scan; every
//! per-candidate failure is reported and recorded on the package.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use watcher_config::DiscoveryMode;

use crate::error::HostError;
use crate::lifecycle::LifecycleController;
use crate::package::{Package, PackageState};
use crate::ports::PortAllocator;
use crate::registry::PackageRegistry;
use crate::report::HostReporter;

/// Log target for discovery operations.
const DISCOVERY_TARGET: &str = "watcher_host::discovery";

/// Counts produced by one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiscoverySummary {
    /// Files carrying the plugin extension.
    pub candidates: usize,
    /// Candidates catalogued or put into service.
    pub ready: usize,
    /// Candidates that failed at some lifecycle step.
    pub failed: usize,
    /// Candidates skipped because their package is still live.
    pub skipped: usize,
    /// Directory entries without the plugin extension, or not regular files.
    pub ignored: usize,
}

/// Walks plugin directories and catalogues what it finds.
pub struct DiscoveryScanner {
    registry: Arc<PackageRegistry>,
    ports: Arc<PortAllocator>,
    controller: Arc<LifecycleController>,
    reporter: Arc<dyn HostReporter>,
    extension: String,
    mode: DiscoveryMode,
}

impl DiscoveryScanner {
    /// Creates a scanner for files ending in `.<extension>`.
    #[must_use]
    pub fn new(
        registry: Arc<PackageRegistry>,
        ports: Arc<PortAllocator>,
        controller: Arc<LifecycleController>,
        reporter: Arc<dyn HostReporter>,
        extension: impl Into<String>,
        mode: DiscoveryMode,
    ) -> Self {
        Self {
            registry,
            ports,
            controller,
            reporter,
            extension: extension.into().trim_start_matches('.').to_owned(),
            mode,
        }
    }

    /// Extension recognised as a plugin artefact, without the leading dot.
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Mode applied after a successful `Init`.
    #[must_use]
    pub const fn mode(&self) -> DiscoveryMode {
        self.mode
    }

    /// Scans `directory` and registers one package per candidate.
    ///
    /// Candidates are visited in file-name order so port assignment is
    /// deterministic. A candidate whose registered package still holds a
    /// live process is skipped; one whose package failed, terminated or was
    /// only catalogued is tried again under a fresh port.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::DiscoveryIo`] if the directory cannot be read.
    /// Failures of individual candidates never surface here.
    pub fn discover(&self, directory: &Path) -> Result<DiscoverySummary, HostError> {
        self.reporter.discovery_started(directory);
        let mut summary = DiscoverySummary::default();

        let listing = fs::read_dir(directory).map_err(|source| HostError::DiscoveryIo {
            directory: directory.to_path_buf(),
            source: Arc::new(source),
        })?;

        let mut candidates = Vec::new();
        for item in listing {
            let entry = match item {
                Ok(entry) => entry,
                Err(error) => {
                    warn!(
                        target: DISCOVERY_TARGET,
                        directory = %directory.display(),
                        error = %error,
                        "skipping unreadable directory entry"
                    );
                    summary.ignored += 1;
                    continue;
                }
            };
            let path = entry.path();
            if self.is_candidate(&path) {
                candidates.push(path);
            } else {
                debug!(
                    target: DISCOVERY_TARGET,
                    path = %path.display(),
                    "ignoring non-plugin entry"
                );
                summary.ignored += 1;
            }
        }
        candidates.sort_unstable();

        for path in candidates {
            summary.candidates += 1;
            self.admit(path, &mut summary);
        }

        self.reporter.discovery_finished(directory, &summary);
        Ok(summary)
    }

    fn is_candidate(&self, path: &Path) -> bool {
        if path.extension() != Some(OsStr::new(&self.extension)) {
            return false;
        }
        fs::metadata(path).is_ok_and(|metadata| metadata.is_file())
    }

    fn admit(&self, path: PathBuf, summary: &mut DiscoverySummary) {
        if self
            .registry
            .get(&path)
            .is_some_and(|existing| existing.is_live())
        {
            self.reporter.candidate_skipped(&path);
            summary.skipped += 1;
            return;
        }

        let Some(port) = self.ports.next_port() else {
            let error = HostError::PortsExhausted {
                path: path.clone(),
                last_port: self.ports.last_allocated().unwrap_or(u16::MAX),
            };
            self.reporter.package_failed(&path, &error);
            summary.failed += 1;
            return;
        };

        let package = Arc::new(Package::new(path, port));
        if self.registry.insert(Arc::clone(&package)).is_some() {
            debug!(
                target: DISCOVERY_TARGET,
                path = %package.path().display(),
                port,
                "replacing stale package"
            );
        }

        match self.bring_up(&package) {
            Ok(()) => {
                let view = package.summary();
                if view.state == PackageState::Failed {
                    summary.failed += 1;
                } else {
                    summary.ready += 1;
                    self.reporter.package_ready(&view);
                }
            }
            Err(error) => {
                summary.failed += 1;
                self.reporter.package_failed(package.path(), &error);
            }
        }
    }

    fn bring_up(&self, package: &Package) -> Result<(), HostError> {
        self.controller.start(package)?;
        if self.mode.keeps_plugins_running() {
            self.controller.enter_service(package)?;
        } else {
            let outcome = self.controller.release(package);
            if !outcome.is_released() {
                warn!(
                    target: DISCOVERY_TARGET,
                    path = %package.path().display(),
                    outcome = %outcome,
                    "catalogued plugin could not be released"
                );
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DiscoveryScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveryScanner")
            .field("extension", &self.extension)
            .field("mode", &self.mode)
            .field("packages", &self.registry.len())
            .finish_non_exhaustive()
    }
}
