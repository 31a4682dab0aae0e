//! Test harness utilities for the daemon suites.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use watcher_config::{Config, DiscoveryMode};
use watcher_host::launcher::{Launcher, PluginProcess};
use watcher_host::{DiscoverySummary, HostError, HostParts, PackageSummary, TeardownReport};

use crate::bootstrap::{BootstrapError, ConfigLoader, StaticConfigLoader};
use crate::health::HealthReporter;
use crate::process::{LaunchError, RunOutcome, run_with};
use crate::shutdown::{ShutdownError, ShutdownSignal};

/// Scenario world shared across BDD steps.
pub struct TestWorld {
    dir: TempDir,
    plugin_dir: PathBuf,
    mode: DiscoveryMode,
    failing_loader: bool,
    pub reporter: Arc<RecordingHealthReporter>,
    pub launcher: Arc<RefusingLauncher>,
    pub signal: CountingSignal,
    outcome: Option<Result<RunOutcome, LaunchError>>,
}

impl TestWorld {
    /// Builds a world whose plugin directory exists and is empty.
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create plugin directory");
        let plugin_dir = dir.path().to_path_buf();
        Self {
            dir,
            plugin_dir,
            mode: DiscoveryMode::Active,
            failing_loader: false,
            reporter: Arc::new(RecordingHealthReporter::default()),
            launcher: Arc::new(RefusingLauncher::default()),
            signal: CountingSignal::default(),
            outcome: None,
        }
    }

    /// Installs a loader that always fails.
    pub fn use_failing_loader(&mut self) {
        self.failing_loader = true;
    }

    /// Installs a loader that succeeds with the given discovery mode.
    pub fn use_mode(&mut self, mode: DiscoveryMode) {
        self.failing_loader = false;
        self.mode = mode;
    }

    /// Creates an empty candidate file in the plugin directory.
    pub fn add_file(&self, name: &str) {
        fs::write(self.plugin_dir.join(name), b"").expect("failed to write candidate");
    }

    /// Points the configuration at a directory that does not exist.
    pub fn remove_plugin_dir(&mut self) {
        self.plugin_dir = self.dir.path().join("missing");
    }

    /// The configuration handed to the daemon by the healthy loader.
    pub fn config(&self) -> Config {
        config_for(&self.plugin_dir, self.mode)
    }

    /// Host collaborators whose launcher refuses every plugin.
    pub fn parts(&self) -> HostParts {
        HostParts {
            launcher: Arc::clone(&self.launcher) as Arc<dyn Launcher>,
            ..HostParts::system()
        }
    }

    /// Runs the daemon once.
    pub fn run(&mut self) {
        if self.outcome.is_some() {
            return;
        }
        let loader: Box<dyn ConfigLoader> = if self.failing_loader {
            Box::new(FailingConfigLoader)
        } else {
            Box::new(StaticConfigLoader::new(self.config()))
        };
        let signal = self.signal.clone();
        let result = run_with(
            &*loader,
            Arc::clone(&self.reporter) as Arc<dyn HealthReporter>,
            self.parts(),
            move || Ok::<_, ShutdownError>(signal),
        );
        self.outcome = Some(result);
    }

    /// The result of the last run.
    pub fn outcome(&self) -> &Result<RunOutcome, LaunchError> {
        self.outcome.as_ref().expect("the daemon has not run")
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds a configuration scanning `plugin_dir` with short timeouts.
pub fn config_for(plugin_dir: &Path, mode: DiscoveryMode) -> Config {
    let dir = plugin_dir
        .to_str()
        .expect("temporary path was not valid UTF-8")
        .to_owned();
    Config {
        plugin_dir: dir.into(),
        discovery_mode: mode,
        connect_timeout_ms: 100,
        call_timeout_ms: 100,
        exit_timeout_ms: 100,
        ..Config::default()
    }
}

/// Loader that intentionally fails by passing an invalid CLI argument.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("watcherd"),
            OsString::from("--base-port"),
            OsString::from("not-a-port"),
        ];
        Config::load_from_iter(args)
    }
}

/// Launcher that refuses to start anything and counts attempts.
#[derive(Default)]
pub struct RefusingLauncher {
    attempts: AtomicUsize,
}

impl RefusingLauncher {
    /// Number of launch attempts so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Launcher for RefusingLauncher {
    fn launch(&self, _runtime_path: &Path, _port: u16) -> io::Result<Box<dyn PluginProcess>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(io::Error::new(io::ErrorKind::NotFound, "no such plugin"))
    }
}

/// Shutdown signal that fires immediately and counts waits.
#[derive(Clone, Default)]
pub struct CountingSignal {
    waits: Arc<AtomicUsize>,
}

impl CountingSignal {
    /// Number of times the daemon waited for shutdown.
    pub fn waits(&self) -> usize {
        self.waits.load(Ordering::SeqCst)
    }
}

impl ShutdownSignal for CountingSignal {
    fn wait(&self) {
        self.waits.fetch_add(1, Ordering::SeqCst);
    }
}

/// Records health events for assertions.
#[derive(Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn discovery_completed(&self, summary: &DiscoverySummary) {
        self.record(HealthEvent::DiscoveryCompleted {
            ready: summary.ready,
            failed: summary.failed,
        });
    }

    fn discovery_failed(&self, error: &HostError) {
        self.record(HealthEvent::DiscoveryFailed(error.class()));
    }

    fn catalog_entry(&self, package: &PackageSummary) {
        self.record(HealthEvent::CatalogEntry(package.name.clone()));
    }

    fn shutdown_requested(&self) {
        self.record(HealthEvent::ShutdownRequested);
    }

    fn shutdown_completed(&self, report: &TeardownReport) {
        self.record(HealthEvent::ShutdownCompleted(report.len()));
    }
}

/// Structured health events tracked during tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// Bootstrap started.
    BootstrapStarting,
    /// Bootstrap completed successfully.
    BootstrapSucceeded,
    /// Bootstrap failed with an error description.
    BootstrapFailed(String),
    /// Discovery finished with these counters.
    DiscoveryCompleted {
        /// Packages catalogued or running.
        ready: usize,
        /// Packages that failed to load.
        failed: usize,
    },
    /// Discovery failed with this error class.
    DiscoveryFailed(&'static str),
    /// A catalogue entry with this plugin name.
    CatalogEntry(String),
    /// Shutdown began.
    ShutdownRequested,
    /// Shutdown finished for this many packages.
    ShutdownCompleted(usize),
}

impl HealthEvent {
    /// Snake-case name used in feature files.
    pub fn name(&self) -> &'static str {
        match self {
            Self::BootstrapStarting => "bootstrap_starting",
            Self::BootstrapSucceeded => "bootstrap_succeeded",
            Self::BootstrapFailed(_) => "bootstrap_failed",
            Self::DiscoveryCompleted { .. } => "discovery_completed",
            Self::DiscoveryFailed(_) => "discovery_failed",
            Self::CatalogEntry(_) => "catalog_entry",
            Self::ShutdownRequested => "shutdown_requested",
            Self::ShutdownCompleted(_) => "shutdown_completed",
        }
    }
}

/// Default test world fixture.
pub fn world() -> std::cell::RefCell<TestWorld> {
    std::cell::RefCell::new(TestWorld::new())
}
