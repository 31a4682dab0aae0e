//! Top-level daemon run loop.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use watcher_host::{
    DiscoverySummary, HostError, HostParts, StructuredHostReporter, TeardownReport,
};

use crate::bootstrap::{BootstrapError, ConfigLoader, Daemon, SystemConfigLoader, bootstrap_with};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Errors that end a daemon run unsuccessfully.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Configuration or telemetry could not be set up.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// Termination signal handlers could not be registered.
    #[error(transparent)]
    Signals(#[from] ShutdownError),
    /// The plugin directory could not be scanned.
    #[error("plugin discovery failed: {source}")]
    Discovery {
        /// Underlying host error.
        #[source]
        source: HostError,
    },
}

/// How a successful run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// Catalog mode: plugins were inventoried and released during discovery.
    Catalogued {
        /// Discovery counters.
        summary: DiscoverySummary,
    },
    /// Active mode: plugins served until a shutdown signal arrived.
    Stopped {
        /// Discovery counters.
        summary: DiscoverySummary,
        /// Per-plugin teardown outcomes.
        report: TeardownReport,
    },
}

/// Runs the daemon with system collaborators.
///
/// # Errors
///
/// Returns a [`LaunchError`] for bootstrap failures and for a plugin
/// directory that cannot be scanned. Plugins that fail to load or to shut
/// down are logged and do not fail the run.
pub fn run_daemon() -> Result<RunOutcome, LaunchError> {
    let reporter: Arc<dyn HealthReporter> = Arc::new(StructuredHealthReporter::new());
    let parts = HostParts::system().with_reporter(Arc::new(StructuredHostReporter::new()));
    run_with(&SystemConfigLoader, reporter, parts, SystemShutdownSignal::install)
}

/// Runs the daemon using the supplied collaborators.
///
/// `install_signals` is called after bootstrap and before discovery so that
/// plugins launched during discovery are never orphaned by an early signal.
///
/// # Errors
///
/// See [`run_daemon`].
pub fn run_with<S, F>(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    parts: HostParts,
    install_signals: F,
) -> Result<RunOutcome, LaunchError>
where
    S: ShutdownSignal,
    F: FnOnce() -> Result<S, ShutdownError>,
{
    let daemon = bootstrap_with(loader, reporter, parts)?;
    let signal = install_signals().inspect_err(|install_error| {
        error!(target: PROCESS_TARGET, error = %install_error, "cannot listen for shutdown");
    })?;
    serve(&daemon, &signal)
}

/// Discovers plugins and, in active mode, keeps them running until
/// `signal` fires.
///
/// # Errors
///
/// Returns [`LaunchError::Discovery`] when the plugin directory cannot be
/// scanned.
pub fn serve(daemon: &Daemon, signal: &dyn ShutdownSignal) -> Result<RunOutcome, LaunchError> {
    let summary = daemon
        .discover()
        .map_err(|source| LaunchError::Discovery { source })?;

    if !daemon.config().discovery_mode().keeps_plugins_running() {
        daemon.report_catalog();
        return Ok(RunOutcome::Catalogued { summary });
    }

    info!(
        target: PROCESS_TARGET,
        running = summary.ready,
        "plugins running, waiting for a shutdown signal"
    );
    signal.wait();
    let report = daemon.shutdown();
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(RunOutcome::Stopped { summary, report })
}
