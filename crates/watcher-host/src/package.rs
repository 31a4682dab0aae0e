//! Catalogued plugin packages and their lifecycle state.
//!
//! A [`Package`] is created when discovery accepts a candidate artefact. Its
//! identity (path and port) never changes; everything else lives behind a
//! per-package mutex so lifecycle operations on one package run strictly one
//! after another. The process handle and control channel are held together
//! in a [`Session`], which makes it impossible to own one without the other.
//!
//! Lifecycle operations hold the package mutex across plugin calls, so the
//! runtime republishes its observable fields into a separate status snapshot
//! on every change. Summaries and liveness checks read only the snapshot.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::Serialize;

use crate::channel::{ControlChannel, PluginInfo};
use crate::launcher::PluginProcess;

/// Lifecycle state of a package.
///
/// States advance in declaration order. [`PackageState::Failed`] can be
/// entered from any non-terminal state and is terminal, as is
/// [`PackageState::Terminated`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageState {
    /// Accepted by discovery, nothing launched yet.
    Discovered,
    /// Process spawned, control channel not yet open.
    Launching,
    /// Control channel open.
    Connected,
    /// `Init` succeeded.
    Initialized,
    /// Entered into service after a successful `Probe`.
    Running,
    /// Teardown in progress.
    ShuttingDown,
    /// Process and channel released after teardown.
    Terminated,
    /// A lifecycle step failed; resources released.
    Failed,
}

impl PackageState {
    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Launching => "launching",
            Self::Connected => "connected",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::ShuttingDown => "shutting_down",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        }
    }

    /// Returns `true` for states no transition leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }

    /// Returns `true` if moving to `next` respects the state machine.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == Self::Failed || next > self
    }
}

impl fmt::Display for PackageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A launched plugin: its process and its open control channel.
pub struct Session {
    /// Exclusive handle on the plugin process.
    pub process: Box<dyn PluginProcess>,
    /// Exclusive control channel to the plugin.
    pub channel: Box<dyn ControlChannel>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("pid", &self.process.id())
            .finish_non_exhaustive()
    }
}

/// Observable fields of a package, readable without the package lock.
#[derive(Debug, Clone)]
struct PackageStatus {
    state: PackageState,
    info: Option<PluginInfo>,
    live: bool,
    last_error: Option<String>,
}

impl PackageStatus {
    const fn new() -> Self {
        Self {
            state: PackageState::Discovered,
            info: None,
            live: false,
            last_error: None,
        }
    }
}

/// Snapshot shared between a package and its runtime.
type SharedStatus = Arc<RwLock<PackageStatus>>;

/// Mutable part of a package, guarded by the package lock.
#[derive(Debug)]
pub struct PackageRuntime {
    state: PackageState,
    runtime_path: Option<PathBuf>,
    info: Option<PluginInfo>,
    session: Option<Session>,
    last_error: Option<String>,
    status: SharedStatus,
}

impl PackageRuntime {
    const fn new(status: SharedStatus) -> Self {
        Self {
            state: PackageState::Discovered,
            runtime_path: None,
            info: None,
            session: None,
            last_error: None,
            status,
        }
    }

    /// Copies the observable fields into the shared snapshot.
    fn publish(&self) {
        let mut status = self
            .status
            .write()
            .unwrap_or_else(|poison| poison.into_inner());
        status.state = self.state;
        status.info.clone_from(&self.info);
        status.live = self.session.is_some();
        status.last_error.clone_from(&self.last_error);
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> PackageState {
        self.state
    }

    /// Moves to `next`. Invalid transitions are refused and reported as
    /// `false`, leaving the state unchanged.
    pub fn transition(&mut self, next: PackageState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        self.publish();
        true
    }

    /// Executable resolved for the artefact, once known.
    #[must_use]
    pub fn runtime_path(&self) -> Option<&Path> {
        self.runtime_path.as_deref()
    }

    /// Records the executable resolved for the artefact.
    pub fn set_runtime_path(&mut self, path: PathBuf) {
        self.runtime_path = Some(path);
    }

    /// Metadata reported by `Init`, once known.
    #[must_use]
    pub const fn info(&self) -> Option<&PluginInfo> {
        self.info.as_ref()
    }

    /// Records metadata reported by `Init`.
    pub fn set_info(&mut self, info: PluginInfo) {
        self.info = Some(info);
        self.publish();
    }

    /// Whether a process and channel are currently held.
    #[must_use]
    pub const fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Mutable access to the held session.
    pub const fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    /// Stores a freshly connected session.
    pub fn attach(&mut self, session: Session) {
        self.session = Some(session);
        self.publish();
    }

    /// Removes and returns the held session.
    pub fn detach(&mut self) -> Option<Session> {
        let session = self.session.take();
        self.publish();
        session
    }

    /// Description of the most recent failure.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Records a failure description.
    pub fn set_last_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
        self.publish();
    }
}

/// One discovered plugin artefact.
#[derive(Debug)]
pub struct Package {
    path: PathBuf,
    port: u16,
    status: SharedStatus,
    runtime: Mutex<PackageRuntime>,
}

impl Package {
    /// Creates a package in the [`PackageState::Discovered`] state.
    #[must_use]
    pub fn new(path: PathBuf, port: u16) -> Self {
        let status = Arc::new(RwLock::new(PackageStatus::new()));
        Self {
            path,
            port,
            runtime: Mutex::new(PackageRuntime::new(Arc::clone(&status))),
            status,
        }
    }

    /// Artefact path; the registry key.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Control-channel port assigned to this package.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Locks the mutable part of the package.
    ///
    /// A panic while the lock was held poisons it; the runtime is recovered
    /// anyway so teardown can still release the process.
    pub fn lock(&self) -> MutexGuard<'_, PackageRuntime> {
        self.runtime
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    /// Latest published status; never waits for a lifecycle operation.
    fn status(&self) -> PackageStatus {
        self.status
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PackageState {
        self.status().state
    }

    /// Returns `true` while the package holds a process and channel.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.status().live
    }

    /// Metadata-only view of the package.
    ///
    /// Reads the published status, so it returns promptly even while a
    /// lifecycle operation is waiting on the plugin.
    #[must_use]
    pub fn summary(&self) -> PackageSummary {
        let status = self.status();
        let fallback_name = self
            .path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = status
            .info
            .as_ref()
            .and_then(|info| non_blank(info.name()))
            .unwrap_or(fallback_name);
        let version = status
            .info
            .as_ref()
            .and_then(|info| non_blank(info.version()))
            .unwrap_or_else(|| String::from(UNKNOWN_VERSION));
        PackageSummary {
            path: self.path.clone(),
            name,
            version,
            state: status.state,
            port: self.port,
            last_error: status.last_error,
        }
    }
}

/// Version reported for plugins that did not supply one.
const UNKNOWN_VERSION: &str = "unknown";

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

/// Metadata exposed to collaborators; never carries process or channel
/// handles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageSummary {
    /// Artefact path.
    pub path: PathBuf,
    /// Plugin name, falling back to the artefact's file stem.
    pub name: String,
    /// Plugin version, or `unknown`.
    pub version: String,
    /// Lifecycle state.
    pub state: PackageState,
    /// Assigned control-channel port.
    pub port: u16,
    /// Most recent failure, if any.
    pub last_error: Option<String>,
}
