//! Driving a single package through its lifecycle.
//!
//! The [`LifecycleController`] is the only component that mutates a
//! [`Package`]. Each operation holds the package lock for its whole
//! duration, so transitions on one package are strictly sequential while
//! different packages proceed independently.
//!
//! Any failure on the way up moves the package to
//! [`PackageState::Failed`] and releases whatever was acquired. Teardown
//! follows a graceful-then-forceful policy: `Exit` is issued with a bounded
//! deadline and the process is given the remainder of that budget to leave
//! on its own before it is killed.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channel::{CallContext, ChannelError, Connector, ControlCall, PluginInfo, ProbeStatus};
use crate::error::HostError;
use crate::extract::ArtifactExtractor;
use crate::launcher::{Launcher, PluginProcess, describe_spawn_error};
use crate::package::{Package, PackageRuntime, PackageState, Session};

/// Log target for lifecycle operations.
const LIFECYCLE_TARGET: &str = "watcher_host::lifecycle";

/// Interval between process status checks while waiting for an exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Minimum time a plugin gets to leave after acknowledging `Exit`.
const POST_EXIT_GRACE: Duration = Duration::from_millis(250);

/// Default budget for dialling and for each lifecycle call.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Time budgets applied by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Budget for opening the control channel, retries included.
    pub connect: Duration,
    /// Budget for `Init` and `Probe`.
    pub call: Duration,
    /// Budget for `Exit` before the process is killed.
    pub exit: Duration,
}

impl Timeouts {
    /// Creates a set of budgets.
    #[must_use]
    pub const fn new(connect: Duration, call: Duration, exit: Duration) -> Self {
        Self {
            connect,
            call,
            exit,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT, DEFAULT_TIMEOUT, DEFAULT_TIMEOUT)
    }
}

/// How a package's process and channel were released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TeardownOutcome {
    /// The plugin acknowledged `Exit` and left on its own.
    Graceful,
    /// The plugin was killed.
    Forced {
        /// Why the graceful path was abandoned.
        reason: String,
    },
    /// Nothing was running; no action was needed.
    NotRunning,
    /// The process could not be confirmed dead.
    Failed {
        /// Description of the failure.
        message: String,
    },
}

impl TeardownOutcome {
    /// Short machine-readable name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Graceful => "graceful",
            Self::Forced { .. } => "forced",
            Self::NotRunning => "not_running",
            Self::Failed { .. } => "failed",
        }
    }

    /// Returns `true` if the process was killed.
    #[must_use]
    pub const fn was_forced(&self) -> bool {
        matches!(self, Self::Forced { .. })
    }

    /// Returns `true` unless the process may have leaked.
    #[must_use]
    pub const fn is_released(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for TeardownOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forced { reason } => write!(f, "forced ({reason})"),
            Self::Failed { message } => write!(f, "failed ({message})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Drives packages through launch, connection, initialisation, service and
/// teardown.
pub struct LifecycleController {
    launcher: Arc<dyn Launcher>,
    connector: Arc<dyn Connector>,
    extractor: Arc<dyn ArtifactExtractor>,
    timeouts: Timeouts,
}

impl LifecycleController {
    /// Creates a controller from its collaborators.
    #[must_use]
    pub fn new(
        launcher: Arc<dyn Launcher>,
        connector: Arc<dyn Connector>,
        extractor: Arc<dyn ArtifactExtractor>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            launcher,
            connector,
            extractor,
            timeouts,
        }
    }

    /// Budgets applied by this controller.
    #[must_use]
    pub const fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Launches, connects and initialises a freshly discovered package.
    ///
    /// On success the package is [`PackageState::Initialized`] and holds its
    /// process and channel.
    ///
    /// # Errors
    ///
    /// Returns the first failure. The package is then
    /// [`PackageState::Failed`], its error recorded and any acquired process
    /// or channel released.
    pub fn start(&self, package: &Package) -> Result<PluginInfo, HostError> {
        let mut runtime = package.lock();
        ensure_state(package.path(), &runtime, PackageState::Discovered, "start")?;

        let outcome = self.bring_up(package, &mut runtime);
        if let Err(error) = &outcome {
            abandon(package.path(), &mut runtime, error);
        }
        outcome
    }

    fn bring_up(
        &self,
        package: &Package,
        runtime: &mut PackageRuntime,
    ) -> Result<PluginInfo, HostError> {
        let path = package.path();
        let port = package.port();

        let runtime_path =
            self.extractor
                .runtime_path(path)
                .map_err(|source| HostError::Extraction {
                    path: path.to_path_buf(),
                    source,
                })?;
        runtime.set_runtime_path(runtime_path.clone());
        runtime.transition(PackageState::Launching);

        let mut process =
            self.launcher
                .launch(&runtime_path, port)
                .map_err(|source| HostError::Launch {
                    path: path.to_path_buf(),
                    message: describe_spawn_error(&runtime_path, &source),
                    source: Arc::new(source),
                })?;

        let channel = match self.connector.connect(port, self.timeouts.connect) {
            Ok(channel) => channel,
            Err(source) => {
                discard_process(path, process.as_mut());
                return Err(HostError::Connection {
                    path: path.to_path_buf(),
                    port,
                    source,
                });
            }
        };

        let mut session = Session { process, channel };
        runtime.transition(PackageState::Connected);
        debug!(
            target: LIFECYCLE_TARGET,
            path = %path.display(),
            port,
            pid = session.process.id(),
            "plugin connected"
        );

        let context = CallContext::with_timeout(self.timeouts.call);
        let info = match session.channel.init(&context) {
            Ok(info) => info,
            Err(source) => {
                dispose(path, session);
                return Err(lifecycle_error(path, ControlCall::Init, source));
            }
        };

        runtime.attach(session);
        runtime.set_info(info.clone());
        runtime.transition(PackageState::Initialized);
        info!(
            target: LIFECYCLE_TARGET,
            path = %path.display(),
            port,
            plugin = info.name(),
            version = info.version(),
            "plugin initialised"
        );
        Ok(info)
    }

    /// Moves an initialised package into service after a healthy `Probe`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::InvalidState`] unless the package is
    /// [`PackageState::Initialized`] with a live session. A failed or
    /// unhealthy probe fails the package and releases its resources.
    pub fn enter_service(&self, package: &Package) -> Result<ProbeStatus, HostError> {
        let mut runtime = package.lock();
        ensure_state(
            package.path(),
            &runtime,
            PackageState::Initialized,
            "enter service",
        )?;

        match self.check_health(package.path(), &mut runtime) {
            Ok(status) => {
                runtime.transition(PackageState::Running);
                info!(
                    target: LIFECYCLE_TARGET,
                    path = %package.path().display(),
                    port = package.port(),
                    "plugin running"
                );
                Ok(status)
            }
            Err(error) => {
                abandon(package.path(), &mut runtime, &error);
                Err(error)
            }
        }
    }

    /// Runs `Probe` against a running package.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::InvalidState`] unless the package is
    /// [`PackageState::Running`]. A failed or unhealthy probe fails the
    /// package and releases its resources.
    pub fn probe(&self, package: &Package) -> Result<ProbeStatus, HostError> {
        let mut runtime = package.lock();
        ensure_state(package.path(), &runtime, PackageState::Running, "probe")?;

        self.check_health(package.path(), &mut runtime)
            .inspect_err(|error| abandon(package.path(), &mut runtime, error))
    }

    fn check_health(
        &self,
        path: &Path,
        runtime: &mut PackageRuntime,
    ) -> Result<ProbeStatus, HostError> {
        let state = runtime.state();
        let session = runtime
            .session_mut()
            .ok_or_else(|| HostError::InvalidState {
                path: path.to_path_buf(),
                state,
                operation: "probe",
            })?;

        let context = CallContext::with_timeout(self.timeouts.call);
        let status = session
            .channel
            .probe(&context)
            .map_err(|source| lifecycle_error(path, ControlCall::Probe, source))?;

        if !status.is_healthy() {
            return Err(HostError::Unhealthy {
                path: path.to_path_buf(),
                detail: status.detail().unwrap_or("no detail given").to_owned(),
            });
        }
        Ok(status)
    }

    /// Releases an initialised package kept only as catalogue metadata.
    ///
    /// The process and channel go through the same graceful-then-forceful
    /// policy as [`Self::teardown`], but the package keeps the
    /// [`PackageState::Initialized`] state and its metadata.
    pub fn release(&self, package: &Package) -> TeardownOutcome {
        let mut runtime = package.lock();
        if runtime.state() != PackageState::Initialized {
            return TeardownOutcome::NotRunning;
        }
        let Some(session) = runtime.detach() else {
            return TeardownOutcome::NotRunning;
        };

        let outcome = self.stop(package.path(), session);
        if !outcome.is_released() {
            runtime.set_last_error(outcome.to_string());
            runtime.transition(PackageState::Failed);
        }
        debug!(
            target: LIFECYCLE_TARGET,
            path = %package.path().display(),
            outcome = outcome.as_str(),
            "catalogued plugin released"
        );
        outcome
    }

    /// Shuts a live package down and marks it terminated.
    ///
    /// Packages without a process and channel are left untouched and
    /// reported as [`TeardownOutcome::NotRunning`].
    pub fn teardown(&self, package: &Package) -> TeardownOutcome {
        let mut runtime = package.lock();
        let Some(session) = runtime.detach() else {
            return TeardownOutcome::NotRunning;
        };
        runtime.transition(PackageState::ShuttingDown);

        let outcome = self.stop(package.path(), session);
        if let TeardownOutcome::Failed { message } = &outcome {
            runtime.set_last_error(message.clone());
            runtime.transition(PackageState::Failed);
        } else {
            runtime.transition(PackageState::Terminated);
        }
        info!(
            target: LIFECYCLE_TARGET,
            path = %package.path().display(),
            port = package.port(),
            outcome = outcome.as_str(),
            state = %runtime.state(),
            "plugin torn down"
        );
        outcome
    }

    /// Graceful-then-forceful shutdown of one session.
    fn stop(&self, path: &Path, session: Session) -> TeardownOutcome {
        let Session {
            mut process,
            mut channel,
        } = session;
        let context = CallContext::with_timeout(self.timeouts.exit);

        let exit = channel.exit(&context);
        channel.close();

        if let Err(error) = exit {
            return force(path, process.as_mut(), format!("exit call failed: {error}"));
        }

        let grace = context.remaining().unwrap_or_default().max(POST_EXIT_GRACE);
        match wait_for_exit(process.as_mut(), grace) {
            Ok(true) => {
                debug!(
                    target: LIFECYCLE_TARGET,
                    path = %path.display(),
                    "plugin exited after acknowledging exit"
                );
                TeardownOutcome::Graceful
            }
            Ok(false) => force(
                path,
                process.as_mut(),
                format!(
                    "plugin acknowledged exit but was still running after {}ms",
                    grace.as_millis()
                ),
            ),
            Err(error) => force(
                path,
                process.as_mut(),
                format!("could not observe plugin exit: {error}"),
            ),
        }
    }
}

impl fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleController")
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

fn ensure_state(
    path: &Path,
    runtime: &PackageRuntime,
    expected: PackageState,
    operation: &'static str,
) -> Result<(), HostError> {
    let state = runtime.state();
    let live = expected == PackageState::Discovered || runtime.has_session();
    if state == expected && live {
        Ok(())
    } else {
        Err(HostError::InvalidState {
            path: path.to_path_buf(),
            state,
            operation,
        })
    }
}

fn lifecycle_error(path: &Path, call: ControlCall, source: ChannelError) -> HostError {
    HostError::Lifecycle {
        path: path.to_path_buf(),
        call,
        source,
    }
}

/// Fails the package and releases anything it still holds.
fn abandon(path: &Path, runtime: &mut PackageRuntime, error: &HostError) {
    warn!(
        target: LIFECYCLE_TARGET,
        path = %path.display(),
        state = %runtime.state(),
        error_class = error.class(),
        error = %error,
        "plugin failed"
    );
    runtime.set_last_error(error.to_string());
    if let Some(session) = runtime.detach() {
        dispose(path, session);
    }
    runtime.transition(PackageState::Failed);
}

/// Closes the channel and makes sure the process is gone.
fn dispose(path: &Path, session: Session) {
    let Session {
        mut process,
        mut channel,
    } = session;
    channel.close();
    discard_process(path, process.as_mut());
}

fn discard_process(path: &Path, process: &mut dyn PluginProcess) {
    if matches!(process.has_exited(), Ok(true)) {
        return;
    }
    if let Err(error) = process.kill().and_then(|()| process.wait()) {
        warn!(
            target: LIFECYCLE_TARGET,
            path = %path.display(),
            pid = process.id(),
            error = %error,
            "failed to discard plugin process"
        );
    }
}

fn force(path: &Path, process: &mut dyn PluginProcess, reason: String) -> TeardownOutcome {
    warn!(
        target: LIFECYCLE_TARGET,
        path = %path.display(),
        pid = process.id(),
        reason = %reason,
        "killing plugin process"
    );
    match process.kill().and_then(|()| process.wait()) {
        Ok(()) => TeardownOutcome::Forced { reason },
        Err(error) => TeardownOutcome::Failed {
            message: format!("{reason}; kill failed: {error}"),
        },
    }
}

/// Polls until the process exits or `timeout` elapses.
///
/// Returns `Ok(true)` once the process has exited.
fn wait_for_exit(process: &mut dyn PluginProcess, timeout: Duration) -> io::Result<bool> {
    let start = Instant::now();
    loop {
        if process.has_exited()? {
            return Ok(true);
        }
        if start.elapsed() >= timeout {
            return Ok(false);
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}
