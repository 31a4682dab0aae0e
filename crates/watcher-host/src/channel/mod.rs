//! Control channel between the host and a launched plugin.
//!
//! The lifecycle controller talks to plugins only through the
//! [`ControlChannel`] trait, and opens channels only through a
//! [`Connector`], so alternative transports can be substituted without
//! touching lifecycle logic. The default transport is JSON-RPC 2.0 over a
//! loopback TCP stream with `Content-Length` framing ([`TcpConnector`]).
//!
//! Every call takes a [`CallContext`] carrying a deadline. Calls that cannot
//! complete before the deadline fail with [`ChannelError::Timeout`].

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

mod error;
pub mod jsonrpc;
mod tcp;
pub mod transport;

pub use error::{ChannelError, TransportError};
pub use tcp::{TcpConnector, TcpControlChannel};
pub use transport::FramedTransport;

/// The lifecycle calls understood by every plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCall {
    /// One-time setup before the plugin does real work.
    Init,
    /// Lightweight health and run check.
    Probe,
    /// Cooperative shutdown request.
    Exit,
}

impl ControlCall {
    /// JSON-RPC method name for the call.
    #[must_use]
    pub const fn method(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Probe => "probe",
            Self::Exit => "exit",
        }
    }

    /// Resolves a JSON-RPC method name.
    #[must_use]
    pub fn from_method(method: &str) -> Option<Self> {
        match method {
            "init" => Some(Self::Init),
            "probe" => Some(Self::Probe),
            "exit" => Some(Self::Exit),
            _ => None,
        }
    }
}

impl fmt::Display for ControlCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.method())
    }
}

/// Far-future stand-in for deadlines that would overflow [`Instant`].
const DISTANT_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Instant `timeout` from now, saturating instead of overflowing.
///
/// Budgets come straight from configuration, so a value near `u64::MAX`
/// milliseconds must still yield a usable deadline.
#[must_use]
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout)
        .or_else(|| now.checked_add(DISTANT_FUTURE))
        .unwrap_or(now)
}

/// Deadline attached to a single control call.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use watcher_host::channel::CallContext;
///
/// let context = CallContext::with_timeout(Duration::from_secs(3));
/// assert!(context.remaining().is_some());
/// assert_eq!(context.timeout_ms(), 3000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    deadline: Instant,
    timeout: Duration,
}

impl CallContext {
    /// Creates a context expiring `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: deadline_after(timeout),
            timeout,
        }
    }

    /// Instant after which the call is abandoned.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Budget the context was created with.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Budget the context was created with, in whole milliseconds.
    #[must_use]
    pub fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Time left before the deadline, or `None` once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .checked_duration_since(Instant::now())
            .filter(|left| !left.is_zero())
    }

    /// Returns `true` once the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_none()
    }
}

/// Metadata a plugin reports from `Init`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginInfo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
}

impl PluginInfo {
    /// Creates a metadata record.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Plugin name as reported by the plugin.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plugin version as reported by the plugin.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Result of a `Probe` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeStatus {
    healthy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ProbeStatus {
    /// A healthy status without detail.
    #[must_use]
    pub const fn healthy() -> Self {
        Self {
            healthy: true,
            detail: None,
        }
    }

    /// An unhealthy status with an explanation.
    #[must_use]
    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            detail: Some(detail.into()),
        }
    }

    /// Whether the plugin considers itself able to serve.
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Optional free-form detail.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}

/// Typed client for the three lifecycle calls.
///
/// Implementations own their connection exclusively; the lifecycle
/// controller never shares a channel between packages.
pub trait ControlChannel: Send {
    /// Asks the plugin to perform one-time setup.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] if the call fails or the deadline passes.
    fn init(&mut self, context: &CallContext) -> Result<PluginInfo, ChannelError>;

    /// Performs a lightweight health check.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] if the call fails or the deadline passes.
    fn probe(&mut self, context: &CallContext) -> Result<ProbeStatus, ChannelError>;

    /// Asks the plugin to shut itself down.
    ///
    /// # Errors
    ///
    /// Returns a [`ChannelError`] if the call fails or the deadline passes.
    fn exit(&mut self, context: &CallContext) -> Result<(), ChannelError>;

    /// Closes the underlying connection. Idempotent.
    fn close(&mut self);
}

/// Opens control channels to freshly launched plugins.
pub trait Connector: Send + Sync {
    /// Dials the plugin listening on `port`, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Connect`] when no connection could be
    /// established within the budget.
    fn connect(&self, port: u16, timeout: Duration)
    -> Result<Box<dyn ControlChannel>, ChannelError>;
}
