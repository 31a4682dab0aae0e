//! Concurrency-safe store of discovered packages.
//!
//! The [`PackageRegistry`] is the single source of truth for package state.
//! It maps artefact paths to shared [`Package`] handles behind one mutex
//! that serialises structural changes. Lifecycle work is guarded per
//! package, and summaries come from each package's published status rather
//! than its lifecycle lock, so reading the catalogue never waits on a slow
//! plugin call.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use serde::Serialize;
use tracing::{info, warn};

use crate::lifecycle::{LifecycleController, TeardownOutcome};
use crate::package::Package;

/// Log target for registry operations.
const REGISTRY_TARGET: &str = "watcher_host::registry";

/// Registry of packages keyed by artefact path.
///
/// # Example
///
/// ```
/// use std::path::{Path, PathBuf};
/// use std::sync::Arc;
/// use watcher_host::{Package, PackageRegistry};
///
/// let registry = PackageRegistry::new();
/// registry.insert(Arc::new(Package::new(PathBuf::from("plugins/a.watcher"), 50051)));
/// assert_eq!(registry.get(Path::new("plugins/a.watcher")).map(|p| p.port()), Some(50051));
/// ```
#[derive(Debug, Default)]
pub struct PackageRegistry {
    packages: Mutex<BTreeMap<PathBuf, Arc<Package>>>,
}

impl PackageRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<PathBuf, Arc<Package>>> {
        self.packages
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Stores a package under its path, returning any package it replaces.
    pub fn insert(&self, package: Arc<Package>) -> Option<Arc<Package>> {
        let path = package.path().to_path_buf();
        self.entries().insert(path, package)
    }

    /// Looks up the package registered for `path`.
    #[must_use]
    pub fn get(&self, path: &Path) -> Option<Arc<Package>> {
        self.entries().get(path).cloned()
    }

    /// Snapshot of every package, ordered by path.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Package>> {
        self.entries().values().cloned().collect()
    }

    /// Number of registered packages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Returns `true` if no package is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Tears down every registered package.
    ///
    /// Each package is torn down on its own thread so one slow plugin does
    /// not delay the others; the call returns once every teardown has
    /// completed. Packages stay registered with their final state.
    pub fn close_all(&self, controller: &LifecycleController) -> TeardownReport {
        let packages = self.all();

        let entries = thread::scope(|scope| {
            let pending: Vec<_> = packages
                .iter()
                .map(|package| {
                    let spawned = thread::Builder::new()
                        .name(format!("teardown-{}", package.port()))
                        .spawn_scoped(scope, move || controller.teardown(package));
                    match spawned {
                        Ok(handle) => (package, Pending::Running(handle)),
                        Err(error) => {
                            warn!(
                                target: REGISTRY_TARGET,
                                path = %package.path().display(),
                                error = %error,
                                "could not spawn teardown thread, tearing down inline"
                            );
                            (package, Pending::Done(controller.teardown(package)))
                        }
                    }
                })
                .collect();

            pending
                .into_iter()
                .map(|(package, teardown)| TeardownEntry {
                    path: package.path().to_path_buf(),
                    port: package.port(),
                    outcome: teardown.finish(),
                })
                .collect::<Vec<_>>()
        });

        let report = TeardownReport { entries };
        info!(
            target: REGISTRY_TARGET,
            packages = report.len(),
            forced = report.forced().count(),
            failed = report.failures().count(),
            "registry closed"
        );
        report
    }
}

enum Pending<'scope> {
    Running(thread::ScopedJoinHandle<'scope, TeardownOutcome>),
    Done(TeardownOutcome),
}

impl Pending<'_> {
    fn finish(self) -> TeardownOutcome {
        match self {
            Self::Running(handle) => handle.join().unwrap_or_else(|_| TeardownOutcome::Failed {
                message: String::from("teardown thread panicked"),
            }),
            Self::Done(outcome) => outcome,
        }
    }
}

/// Teardown result for one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TeardownEntry {
    /// Artefact path.
    pub path: PathBuf,
    /// Port the package was assigned.
    pub port: u16,
    /// How the package was released.
    pub outcome: TeardownOutcome,
}

/// Per-package results of [`PackageRegistry::close_all`].
///
/// Failures are listed individually rather than folded into one error so
/// partial success stays visible.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    entries: Vec<TeardownEntry>,
}

impl TeardownReport {
    /// All entries, ordered by path.
    #[must_use]
    pub fn entries(&self) -> &[TeardownEntry] {
        &self.entries
    }

    /// Number of packages covered.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there was nothing to tear down.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Outcome recorded for `path`.
    #[must_use]
    pub fn outcome_for(&self, path: &Path) -> Option<&TeardownOutcome> {
        self.entries
            .iter()
            .find(|entry| entry.path == path)
            .map(|entry| &entry.outcome)
    }

    /// Entries whose process had to be killed.
    pub fn forced(&self) -> impl Iterator<Item = &TeardownEntry> {
        self.entries.iter().filter(|entry| entry.outcome.was_forced())
    }

    /// Entries whose process may still be running.
    pub fn failures(&self) -> impl Iterator<Item = &TeardownEntry> {
        self.entries
            .iter()
            .filter(|entry| !entry.outcome.is_released())
    }

    /// Returns `true` if every package was released.
    #[must_use]
    pub fn all_released(&self) -> bool {
        self.failures().next().is_none()
    }
}
