//! JSON-RPC control channel over a loopback TCP stream.

use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, warn};

use self::deadline::{BoundedStream, SharedDeadline};
use super::error::{ChannelError, TransportError};
use super::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use super::transport::FramedTransport;
use super::{
    CallContext, ControlCall, ControlChannel, Connector, PluginInfo, ProbeStatus, deadline_after,
};

mod deadline;

/// Log target for channel operations.
const CHANNEL_TARGET: &str = "watcher_host::channel";

/// Delay before the second dial attempt.
const INITIAL_BACKOFF: Duration = Duration::from_millis(10);

/// Upper bound for the delay between dial attempts.
const MAX_BACKOFF: Duration = Duration::from_millis(200);

/// Upper bound for a single dial attempt.
const MAX_ATTEMPT: Duration = Duration::from_millis(500);

/// Maximum number of frames read while waiting for a matching response.
const MAX_RESPONSE_ITERATIONS: usize = 16;

/// Dials plugins on the loopback interface, retrying with backoff until the
/// plugin has bound its listener or the budget runs out.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use watcher_host::channel::{Connector, TcpConnector};
///
/// let connector = TcpConnector::new();
/// let channel = connector.connect(50051, Duration::from_secs(3));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    host: IpAddr,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpConnector {
    /// Connector dialling `127.0.0.1`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }

    /// Connector dialling a specific address.
    #[must_use]
    pub const fn with_host(host: IpAddr) -> Self {
        Self { host }
    }

    fn dial(&self, port: u16, timeout: Duration) -> Result<TcpStream, ChannelError> {
        let address = SocketAddr::new(self.host, port);
        let deadline = deadline_after(timeout);
        let mut backoff = INITIAL_BACKOFF;
        let mut attempts = 0u32;

        loop {
            attempts = attempts.saturating_add(1);
            let budget = deadline
                .saturating_duration_since(Instant::now())
                .clamp(Duration::from_millis(1), MAX_ATTEMPT);

            match TcpStream::connect_timeout(&address, budget) {
                Ok(stream) => {
                    debug!(
                        target: CHANNEL_TARGET,
                        port,
                        attempts,
                        "control channel connected"
                    );
                    return Ok(stream);
                }
                Err(error) => {
                    if deadline.saturating_duration_since(Instant::now()) <= backoff {
                        warn!(
                            target: CHANNEL_TARGET,
                            port,
                            attempts,
                            error = %error,
                            "giving up on control channel"
                        );
                        return Err(ChannelError::Connect {
                            port,
                            attempts,
                            source: Arc::new(error),
                        });
                    }
                    debug!(
                        target: CHANNEL_TARGET,
                        port,
                        attempts,
                        error = %error,
                        "plugin not accepting connections yet, retrying"
                    );
                    thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2).min(MAX_BACKOFF);
                }
            }
        }
    }
}

impl Connector for TcpConnector {
    fn connect(
        &self,
        port: u16,
        timeout: Duration,
    ) -> Result<Box<dyn ControlChannel>, ChannelError> {
        let stream = self.dial(port, timeout)?;
        Ok(Box::new(TcpControlChannel::new(stream)?))
    }
}

/// A connected control channel speaking JSON-RPC 2.0 over TCP.
///
/// Every read and write of a call is bounded by the call's deadline, however
/// slowly the peer feeds bytes. A call that fails at the transport level
/// (timeout, disconnect, garbled frame) leaves the stream in an unknown
/// position, so the channel refuses further calls with
/// [`ChannelError::Closed`].
pub struct TcpControlChannel {
    stream: TcpStream,
    deadline: SharedDeadline,
    transport: FramedTransport<BoundedStream, BoundedStream>,
    usable: bool,
    closed: bool,
}

impl TcpControlChannel {
    /// Wraps a connected stream.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Transport`] if the stream cannot be cloned
    /// into read and write halves.
    pub fn new(stream: TcpStream) -> Result<Self, ChannelError> {
        stream.set_nodelay(true).map_err(TransportError::from)?;
        let reader = stream.try_clone().map_err(TransportError::from)?;
        let writer = stream.try_clone().map_err(TransportError::from)?;
        let deadline = SharedDeadline::default();
        let transport = FramedTransport::new(
            BoundedStream::new(reader, deadline.clone()),
            BoundedStream::new(writer, deadline.clone()),
        );
        Ok(Self {
            stream,
            deadline,
            transport,
            usable: true,
            closed: false,
        })
    }

    fn call(
        &mut self,
        call: ControlCall,
        context: &CallContext,
    ) -> Result<Option<Value>, ChannelError> {
        if self.closed || !self.usable {
            return Err(ChannelError::Closed);
        }
        if context.is_expired() {
            return Err(ChannelError::Timeout {
                call,
                timeout_ms: context.timeout_ms(),
            });
        }
        self.deadline.arm(context.deadline());
        let outcome = self.exchange(call, context);
        self.deadline.disarm();
        if let Err(error) = &outcome
            && !matches!(error, ChannelError::Remote { .. })
        {
            self.usable = false;
        }
        outcome
    }

    fn exchange(
        &mut self,
        call: ControlCall,
        context: &CallContext,
    ) -> Result<Option<Value>, ChannelError> {
        let request = JsonRpcRequest::new(call.method(), None);
        let payload = serde_json::to_vec(&request)?;

        debug!(
            target: CHANNEL_TARGET,
            method = call.method(),
            id = request.id,
            timeout_ms = context.timeout_ms(),
            "sending control call"
        );

        self.transport
            .send(&payload)
            .map_err(|error| classify(call, context, error))?;

        for _ in 0..MAX_RESPONSE_ITERATIONS {
            let bytes = self
                .transport
                .receive()
                .map_err(|error| classify(call, context, error))?;
            let response: JsonRpcResponse = serde_json::from_slice(&bytes)?;

            if response.id != Some(request.id) {
                warn!(
                    target: CHANNEL_TARGET,
                    expected = request.id,
                    received = ?response.id,
                    "skipping response with non-matching ID"
                );
                continue;
            }
            if let Some(error) = response.error {
                return Err(ChannelError::Remote {
                    code: error.code,
                    message: error.message,
                });
            }
            return Ok(response.result);
        }

        Err(ChannelError::UnexpectedResponse {
            call,
            message: format!("no matching response within {MAX_RESPONSE_ITERATIONS} frames"),
        })
    }
}

fn classify(call: ControlCall, context: &CallContext, error: TransportError) -> ChannelError {
    if error.is_timeout() {
        ChannelError::Timeout {
            call,
            timeout_ms: context.timeout_ms(),
        }
    } else {
        ChannelError::Transport(error)
    }
}

impl ControlChannel for TcpControlChannel {
    fn init(&mut self, context: &CallContext) -> Result<PluginInfo, ChannelError> {
        match self.call(ControlCall::Init, context)? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(PluginInfo::default()),
        }
    }

    fn probe(&mut self, context: &CallContext) -> Result<ProbeStatus, ChannelError> {
        let value = self
            .call(ControlCall::Probe, context)?
            .ok_or_else(|| ChannelError::UnexpectedResponse {
                call: ControlCall::Probe,
                message: String::from("missing probe status"),
            })?;
        Ok(serde_json::from_value(value)?)
    }

    fn exit(&mut self, context: &CallContext) -> Result<(), ChannelError> {
        self.call(ControlCall::Exit, context).map(drop)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(error) = self.stream.shutdown(Shutdown::Both) {
            debug!(
                target: CHANNEL_TARGET,
                error = %error,
                "control channel already disconnected"
            );
        }
    }
}

impl Drop for TcpControlChannel {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for TcpControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpControlChannel")
            .field("peer", &self.stream.peer_addr().ok())
            .field("usable", &self.usable)
            .field("closed", &self.closed)
            .finish()
    }
}
