//! Structured health reporting for daemon lifecycle events.

use std::sync::Arc;

use watcher_config::Config;
use watcher_host::{DiscoverySummary, HostError, PackageSummary, TeardownReport};

use crate::bootstrap::BootstrapError;

const HEALTH_TARGET: &str = "watcherd::health";

/// Observer trait used to surface daemon lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once the configured plugin directory has been scanned.
    fn discovery_completed(&self, summary: &DiscoverySummary);

    /// Invoked when the plugin directory could not be scanned at all.
    fn discovery_failed(&self, error: &HostError);

    /// Invoked for each catalogue entry when the daemon runs in catalog mode.
    fn catalog_entry(&self, package: &PackageSummary);

    /// Invoked when a shutdown signal has been received.
    fn shutdown_requested(&self);

    /// Invoked after every plugin has been torn down.
    fn shutdown_completed(&self, report: &TeardownReport);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn discovery_completed(&self, summary: &DiscoverySummary) {
        (**self).discovery_completed(summary);
    }

    fn discovery_failed(&self, error: &HostError) {
        (**self).discovery_failed(error);
    }

    fn catalog_entry(&self, package: &PackageSummary) {
        (**self).catalog_entry(package);
    }

    fn shutdown_requested(&self) {
        (**self).shutdown_requested();
    }

    fn shutdown_completed(&self, report: &TeardownReport) {
        (**self).shutdown_completed(report);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            plugin_dir = %config.plugin_dir(),
            extension = config.plugin_extension(),
            mode = %config.discovery_mode(),
            base_port = config.base_port(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn discovery_completed(&self, summary: &DiscoverySummary) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "discovery_completed",
            candidates = summary.candidates,
            ready = summary.ready,
            failed = summary.failed,
            skipped = summary.skipped,
            ignored = summary.ignored,
            "plugin discovery completed"
        );
    }

    fn discovery_failed(&self, error: &HostError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "discovery_failed",
            class = error.class(),
            error = %error,
            "plugin discovery failed"
        );
    }

    fn catalog_entry(&self, package: &PackageSummary) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "catalog_entry",
            path = %package.path.display(),
            name = %package.name,
            version = %package.version,
            state = %package.state,
            error = package.last_error.as_deref(),
            "catalogued plugin"
        );
    }

    fn shutdown_requested(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "shutdown_requested",
            "shutting down plugins"
        );
    }

    fn shutdown_completed(&self, report: &TeardownReport) {
        let forced = report.forced().count();
        let failed = report.failures().count();
        if failed == 0 {
            tracing::info!(
                target: HEALTH_TARGET,
                event = "shutdown_completed",
                packages = report.len(),
                forced,
                "all plugins released"
            );
        } else {
            tracing::warn!(
                target: HEALTH_TARGET,
                event = "shutdown_completed",
                packages = report.len(),
                forced,
                failed,
                "some plugins could not be released"
            );
        }
    }
}
