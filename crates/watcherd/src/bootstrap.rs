//! Daemon bootstrap orchestration.

use std::sync::Arc;

use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use watcher_config::Config;
use watcher_host::{
    DiscoverySummary, HostError, HostParts, HostSettings, PluginHost, TeardownReport,
};

use crate::health::HealthReporter;
use crate::telemetry::{self, TelemetryError, TelemetryHandle};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the daemon configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader that hands out a configuration resolved elsewhere.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps an already resolved configuration.
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
}

/// A bootstrapped daemon owning the plugin host.
pub struct Daemon {
    config: Config,
    host: PluginHost,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Daemon {
    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Accessor for the plugin host.
    #[must_use]
    pub fn host(&self) -> &PluginHost {
        &self.host
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Scans the configured plugin directory.
    ///
    /// # Errors
    ///
    /// Returns the host error when the directory itself cannot be read.
    /// Individual plugin failures are counted in the summary instead.
    pub fn discover(&self) -> Result<DiscoverySummary, HostError> {
        match self.host.discover_configured() {
            Ok(summary) => {
                self.reporter.discovery_completed(&summary);
                Ok(summary)
            }
            Err(error) => {
                self.reporter.discovery_failed(&error);
                Err(error)
            }
        }
    }

    /// Reports every registered package as a catalogue entry.
    pub fn report_catalog(&self) {
        for package in self.host.list_packages() {
            self.reporter.catalog_entry(&package);
        }
    }

    /// Tears down every plugin and reports the aggregate outcome.
    pub fn shutdown(&self) -> TeardownReport {
        self.reporter.shutdown_requested();
        let report = self.host.shutdown();
        self.reporter.shutdown_completed(&report);
        report
    }
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon")
            .field("config", &self.config)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

/// Bootstraps the daemon using the supplied collaborators.
///
/// No plugin is launched here; call [`Daemon::discover`] to scan the
/// configured directory.
///
/// # Errors
///
/// Returns a [`BootstrapError`] when configuration or telemetry cannot be
/// set up. The reporter has already been told about the failure.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    parts: HostParts,
) -> Result<Daemon, BootstrapError> {
    reporter.bootstrap_starting();

    let config = match loader.load() {
        Ok(config) => config,
        Err(source) => {
            let error = BootstrapError::Configuration { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let telemetry = match telemetry::initialise(&config) {
        Ok(handle) => handle,
        Err(source) => {
            let error = BootstrapError::Telemetry { source };
            reporter.bootstrap_failed(&error);
            return Err(error);
        }
    };

    let host = PluginHost::new(HostSettings::from_config(&config), parts);
    reporter.bootstrap_succeeded(&config);

    Ok(Daemon {
        config,
        host,
        telemetry,
        reporter,
    })
}
