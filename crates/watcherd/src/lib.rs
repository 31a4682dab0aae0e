//! Daemon hosting watcher plugins.
//!
//! `watcherd` loads the layered [`watcher_config::Config`], installs
//! structured telemetry and hands the configured plugin directory to a
//! [`watcher_host::PluginHost`]. In active mode the discovered plugins keep
//! running until the daemon receives `SIGTERM`, `SIGINT`, `SIGQUIT` or
//! `SIGHUP`, at which point every plugin is asked to exit and killed if it
//! does not. In catalog mode the daemon logs the inventory and exits.
//!
//! Every stage reports through a [`HealthReporter`], so operators see the
//! bootstrap, discovery and shutdown milestones as structured events even
//! when individual plugins misbehave.

mod bootstrap;
mod health;
mod process;
mod shutdown;
pub mod telemetry;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{LaunchError, RunOutcome, run_daemon, run_with, serve};
pub use shutdown::{ShutdownError, ShutdownSignal, SystemShutdownSignal, TERMINATION_SIGNALS};
pub use telemetry::{TelemetryError, TelemetryHandle};

#[cfg(test)]
mod tests;
