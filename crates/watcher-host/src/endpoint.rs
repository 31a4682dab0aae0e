//! Plugin side of the control protocol.
//!
//! A plugin binds a [`PluginEndpoint`] on the port it was given, then calls
//! [`PluginEndpoint::serve`] with a [`LifecycleHandler`]. The endpoint
//! answers `init`, `probe` and `exit` requests from one host connection and
//! returns once `exit` has been acknowledged or the host hangs up, so the
//! plugin process can terminate.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::channel::jsonrpc::{
    INTERNAL_ERROR, INVALID_REQUEST, JSONRPC_VERSION, JsonRpcRequest, JsonRpcResponse,
    METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::channel::{ControlCall, FramedTransport, PluginInfo, ProbeStatus, TransportError};

/// Log target for endpoint operations.
const ENDPOINT_TARGET: &str = "watcher_host::endpoint";

/// Failure reported by a [`LifecycleHandler`]; sent to the host as a
/// JSON-RPC internal error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    /// Creates a handler error with a message for the host.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Plugin behaviour behind the three lifecycle calls.
pub trait LifecycleHandler {
    /// One-time setup; returns the plugin's metadata.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] if the plugin cannot start.
    fn init(&mut self) -> Result<PluginInfo, HandlerError>;

    /// Health check.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] if the check itself cannot run.
    fn probe(&mut self) -> Result<ProbeStatus, HandlerError>;

    /// Prepares for shutdown. The endpoint stops serving once this succeeds.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] if the plugin refuses to stop.
    fn exit(&mut self) -> Result<(), HandlerError>;
}

/// Errors raised while serving the host.
#[derive(Debug, Error)]
pub enum EndpointError {
    /// The listener could not be bound.
    #[error("failed to listen on port {port}: {source}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Accepting the host connection failed.
    #[error("failed to accept host connection: {source}")]
    Accept {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Reading or writing a frame failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A response could not be encoded.
    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Why [`PluginEndpoint::serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeOutcome {
    /// The host asked the plugin to exit and the request was acknowledged.
    Exited,
    /// The host closed the connection without asking to exit.
    Disconnected,
}

/// Listener for the host's control connection.
///
/// # Example
///
/// ```no_run
/// use watcher_host::channel::{PluginInfo, ProbeStatus};
/// use watcher_host::endpoint::{HandlerError, LifecycleHandler, PluginEndpoint};
///
/// struct Disk;
///
/// impl LifecycleHandler for Disk {
///     fn init(&mut self) -> Result<PluginInfo, HandlerError> {
///         Ok(PluginInfo::new("disk", "0.1.0"))
///     }
///     fn probe(&mut self) -> Result<ProbeStatus, HandlerError> {
///         Ok(ProbeStatus::healthy())
///     }
///     fn exit(&mut self) -> Result<(), HandlerError> {
///         Ok(())
///     }
/// }
///
/// let endpoint = PluginEndpoint::bind(50051)?;
/// endpoint.serve(&mut Disk)?;
/// # Ok::<(), watcher_host::endpoint::EndpointError>(())
/// ```
#[derive(Debug)]
pub struct PluginEndpoint {
    listener: TcpListener,
}

impl PluginEndpoint {
    /// Listens on `127.0.0.1:<port>`. Port `0` picks a free port.
    ///
    /// # Errors
    ///
    /// Returns [`EndpointError::Bind`] if the port cannot be bound.
    pub fn bind(port: u16) -> Result<Self, EndpointError> {
        let address = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        let listener = TcpListener::bind(address).map_err(|source| EndpointError::Bind {
            port,
            source: Arc::new(source),
        })?;
        Ok(Self { listener })
    }

    /// Port actually bound.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported by the socket.
    pub fn local_port(&self) -> io::Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    /// Accepts one host connection and answers its requests.
    ///
    /// # Errors
    ///
    /// Returns an [`EndpointError`] if accepting fails or the connection
    /// breaks mid-frame.
    pub fn serve<H: LifecycleHandler>(self, handler: &mut H) -> Result<ServeOutcome, EndpointError> {
        let (stream, peer) = self
            .listener
            .accept()
            .map_err(|source| EndpointError::Accept {
                source: Arc::new(source),
            })?;
        debug!(target: ENDPOINT_TARGET, %peer, "host connected");
        serve_connection(&stream, handler)
    }
}

fn serve_connection<H: LifecycleHandler>(
    stream: &TcpStream,
    handler: &mut H,
) -> Result<ServeOutcome, EndpointError> {
    let reader = stream.try_clone().map_err(TransportError::from)?;
    let writer = stream.try_clone().map_err(TransportError::from)?;
    let mut transport = FramedTransport::new(reader, writer);

    loop {
        let bytes = match transport.receive() {
            Ok(bytes) => bytes,
            Err(error) if error.is_disconnect() => {
                debug!(target: ENDPOINT_TARGET, "host disconnected");
                return Ok(ServeOutcome::Disconnected);
            }
            Err(error) => return Err(error.into()),
        };

        let (response, exiting) = respond(&bytes, handler)?;
        transport.send(&serde_json::to_vec(&response)?)?;
        if exiting {
            debug!(target: ENDPOINT_TARGET, "exit acknowledged");
            return Ok(ServeOutcome::Exited);
        }
    }
}

/// Builds the response to one frame; the flag is set once `exit` succeeded.
fn respond<H: LifecycleHandler>(
    bytes: &[u8],
    handler: &mut H,
) -> Result<(JsonRpcResponse, bool), EndpointError> {
    let request: JsonRpcRequest = match serde_json::from_slice(bytes) {
        Ok(request) => request,
        Err(error) => {
            warn!(target: ENDPOINT_TARGET, error = %error, "unparseable request");
            return Ok((JsonRpcResponse::failure(None, PARSE_ERROR, error.to_string()), false));
        }
    };
    if request.jsonrpc != JSONRPC_VERSION {
        return Ok((
            JsonRpcResponse::failure(
                Some(request.id),
                INVALID_REQUEST,
                format!("unsupported protocol version '{}'", request.jsonrpc),
            ),
            false,
        ));
    }

    let Some(call) = ControlCall::from_method(&request.method) else {
        return Ok((
            JsonRpcResponse::failure(
                Some(request.id),
                METHOD_NOT_FOUND,
                format!("unknown method '{}'", request.method),
            ),
            false,
        ));
    };

    debug!(target: ENDPOINT_TARGET, method = call.method(), id = request.id, "handling call");
    let id = request.id;
    let response = match call {
        ControlCall::Init => reply(id, handler.init())?,
        ControlCall::Probe => reply(id, handler.probe())?,
        ControlCall::Exit => {
            let response = reply(id, handler.exit().map(|()| Value::Null))?;
            let exiting = response.error.is_none();
            return Ok((response, exiting));
        }
    };
    Ok((response, false))
}

fn reply<T: Serialize>(
    id: i64,
    outcome: Result<T, HandlerError>,
) -> Result<JsonRpcResponse, EndpointError> {
    Ok(match outcome {
        Ok(value) => JsonRpcResponse::success(id, serde_json::to_value(value)?),
        Err(error) => JsonRpcResponse::failure(Some(id), INTERNAL_ERROR, error.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use rstest::rstest;

    use super::*;
    use crate::channel::{CallContext, ChannelError, Connector, ControlChannel, TcpConnector};

    #[derive(Default)]
    struct Recorder {
        calls: Vec<&'static str>,
        refuse_exit: bool,
    }

    impl LifecycleHandler for Recorder {
        fn init(&mut self) -> Result<PluginInfo, HandlerError> {
            self.calls.push("init");
            Ok(PluginInfo::new("recorder", "0.3.0"))
        }

        fn probe(&mut self) -> Result<ProbeStatus, HandlerError> {
            self.calls.push("probe");
            Ok(ProbeStatus::unhealthy("warming up"))
        }

        fn exit(&mut self) -> Result<(), HandlerError> {
            self.calls.push("exit");
            if self.refuse_exit {
                return Err(HandlerError::new("busy"));
            }
            Ok(())
        }
    }

    fn spawn_endpoint(
        mut handler: Recorder,
    ) -> (u16, thread::JoinHandle<(ServeOutcome, Vec<&'static str>)>) {
        let endpoint = PluginEndpoint::bind(0).expect("bind endpoint");
        let port = endpoint.local_port().expect("local port");
        let handle = thread::spawn(move || {
            let outcome = endpoint.serve(&mut handler).expect("serve");
            (outcome, handler.calls)
        });
        (port, handle)
    }

    fn context() -> CallContext {
        CallContext::with_timeout(Duration::from_secs(2))
    }

    fn connect(port: u16) -> Box<dyn ControlChannel> {
        TcpConnector::new()
            .connect(port, Duration::from_secs(2))
            .expect("connect to endpoint")
    }

    #[rstest]
    fn serves_the_full_lifecycle() {
        let (port, handle) = spawn_endpoint(Recorder::default());
        let mut channel = connect(port);

        let info = channel.init(&context()).expect("init");
        let status = channel.probe(&context()).expect("probe");
        channel.exit(&context()).expect("exit");

        assert_eq!(info, PluginInfo::new("recorder", "0.3.0"));
        assert_eq!(status.detail(), Some("warming up"));
        let (outcome, calls) = handle.join().expect("endpoint thread");
        assert_eq!(outcome, ServeOutcome::Exited);
        assert_eq!(calls, vec!["init", "probe", "exit"]);
    }

    #[rstest]
    fn refused_exit_keeps_serving() {
        let (port, handle) = spawn_endpoint(Recorder {
            refuse_exit: true,
            ..Recorder::default()
        });
        let mut channel = connect(port);

        let error = channel.exit(&context()).expect_err("exit refused");
        assert!(matches!(
            error,
            ChannelError::Remote { code: INTERNAL_ERROR, ref message } if message == "busy"
        ));
        channel.probe(&context()).expect("still serving");
        channel.close();

        let (outcome, _) = handle.join().expect("endpoint thread");
        assert_eq!(outcome, ServeOutcome::Disconnected);
    }

    #[rstest]
    fn unknown_methods_are_rejected() {
        let mut recorder = Recorder::default();
        let request = JsonRpcRequest::with_id(7, "restart", None);
        let bytes = serde_json::to_vec(&request).expect("encode");

        let (response, exiting) = respond(&bytes, &mut recorder).expect("respond");

        assert!(!exiting);
        assert_eq!(response.id, Some(7));
        assert_eq!(response.error.map(|error| error.code), Some(METHOD_NOT_FOUND));
        assert!(recorder.calls.is_empty());
    }

    #[rstest]
    fn garbage_gets_a_parse_error() {
        let (response, exiting) =
            respond(b"{not json", &mut Recorder::default()).expect("respond");

        assert!(!exiting);
        assert_eq!(response.id, None);
        assert_eq!(response.error.map(|error| error.code), Some(PARSE_ERROR));
    }

    #[rstest]
    fn wrong_protocol_version_is_invalid() {
        let bytes = br#"{"jsonrpc":"1.0","id":3,"method":"init"}"#;

        let (response, _) = respond(bytes, &mut Recorder::default()).expect("respond");

        assert_eq!(response.error.map(|error| error.code), Some(INVALID_REQUEST));
    }

    #[test]
    fn binding_a_taken_port_fails() {
        let first = PluginEndpoint::bind(0).expect("bind");
        let port = first.local_port().expect("port");

        let error = PluginEndpoint::bind(port).expect_err("port in use");

        assert!(matches!(error, EndpointError::Bind { port: p, .. } if p == port));
    }
}
