//! Structured reporting of discovery and teardown events.

use std::path::Path;
use std::sync::Arc;

use crate::discovery::DiscoverySummary;
use crate::error::HostError;
use crate::package::PackageSummary;
use crate::registry::TeardownEntry;

/// Observer trait used to surface host events to telemetry sinks.
pub trait HostReporter: Send + Sync {
    /// Invoked before a directory is scanned.
    fn discovery_started(&self, directory: &Path);

    /// Invoked when a candidate is skipped because its package is still live.
    fn candidate_skipped(&self, path: &Path);

    /// Invoked when a candidate has been catalogued or put into service.
    fn package_ready(&self, summary: &PackageSummary);

    /// Invoked when a candidate fails. The scan carries on.
    fn package_failed(&self, path: &Path, error: &HostError);

    /// Invoked after a scan completes.
    fn discovery_finished(&self, directory: &Path, summary: &DiscoverySummary);

    /// Invoked once per package during shutdown.
    fn package_torn_down(&self, entry: &TeardownEntry);
}

impl<T> HostReporter for Arc<T>
where
    T: HostReporter + ?Sized,
{
    fn discovery_started(&self, directory: &Path) {
        (**self).discovery_started(directory);
    }

    fn candidate_skipped(&self, path: &Path) {
        (**self).candidate_skipped(path);
    }

    fn package_ready(&self, summary: &PackageSummary) {
        (**self).package_ready(summary);
    }

    fn package_failed(&self, path: &Path, error: &HostError) {
        (**self).package_failed(path, error);
    }

    fn discovery_finished(&self, directory: &Path, summary: &DiscoverySummary) {
        (**self).discovery_finished(directory, summary);
    }

    fn package_torn_down(&self, entry: &TeardownEntry) {
        (**self).package_torn_down(entry);
    }
}

/// Default reporter that records host events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHostReporter;

impl StructuredHostReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HostReporter for StructuredHostReporter {
    fn discovery_started(&self, directory: &Path) {
        tracing::info!(
            target: "watcher_host::report",
            event = "discovery_started",
            directory = %directory.display(),
            "scanning plugin directory"
        );
    }

    fn candidate_skipped(&self, path: &Path) {
        tracing::debug!(
            target: "watcher_host::report",
            event = "candidate_skipped",
            path = %path.display(),
            "plugin already running, skipping"
        );
    }

    fn package_ready(&self, summary: &PackageSummary) {
        tracing::info!(
            target: "watcher_host::report",
            event = "package_ready",
            path = %summary.path.display(),
            plugin = %summary.name,
            version = %summary.version,
            state = %summary.state,
            port = summary.port,
            "plugin ready"
        );
    }

    fn package_failed(&self, path: &Path, error: &HostError) {
        tracing::error!(
            target: "watcher_host::report",
            event = "package_failed",
            path = %path.display(),
            error_class = error.class(),
            error = %error,
            "plugin failed to load"
        );
    }

    fn discovery_finished(&self, directory: &Path, summary: &DiscoverySummary) {
        tracing::info!(
            target: "watcher_host::report",
            event = "discovery_finished",
            directory = %directory.display(),
            candidates = summary.candidates,
            ready = summary.ready,
            failed = summary.failed,
            skipped = summary.skipped,
            "plugin directory scanned"
        );
    }

    fn package_torn_down(&self, entry: &TeardownEntry) {
        if entry.outcome.is_released() {
            tracing::info!(
                target: "watcher_host::report",
                event = "package_torn_down",
                path = %entry.path.display(),
                port = entry.port,
                outcome = %entry.outcome,
                "plugin torn down"
            );
        } else {
            tracing::error!(
                target: "watcher_host::report",
                event = "package_torn_down",
                path = %entry.path.display(),
                port = entry.port,
                outcome = %entry.outcome,
                "plugin teardown failed"
            );
        }
    }
}
