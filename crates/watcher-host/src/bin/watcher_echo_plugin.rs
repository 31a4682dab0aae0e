//! Reference plugin for the watcher host.
//!
//! Listens on the port given as its first argument and answers the
//! lifecycle calls with fixed replies. Flags after the port make it
//! misbehave in specific ways so the host's failure handling can be
//! exercised against a real process.

use std::process::ExitCode;
use std::thread;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use watcher_host::channel::{PluginInfo, ProbeStatus};
use watcher_host::endpoint::{HandlerError, LifecycleHandler, PluginEndpoint, ServeOutcome};

const PLUGIN_TARGET: &str = "watcher_echo_plugin";

#[derive(Debug, Parser)]
#[command(name = "watcher-echo-plugin", version, about = "Reference watcher plugin")]
struct Args {
    /// Control port assigned by the host.
    port: u16,
    /// Name reported from `init`.
    #[arg(long, default_value = "echo")]
    name: String,
    /// Never answer `exit`.
    #[arg(long)]
    ignore_exit: bool,
    /// Fail `init`.
    #[arg(long)]
    fail_init: bool,
    /// Report unhealthy from `probe`.
    #[arg(long)]
    unhealthy: bool,
    /// Exit immediately without listening.
    #[arg(long)]
    no_listen: bool,
}

struct EchoHandler {
    args: Args,
}

impl LifecycleHandler for EchoHandler {
    fn init(&mut self) -> Result<PluginInfo, HandlerError> {
        if self.args.fail_init {
            return Err(HandlerError::new("init refused"));
        }
        Ok(PluginInfo::new(
            self.args.name.clone(),
            env!("CARGO_PKG_VERSION"),
        ))
    }

    fn probe(&mut self) -> Result<ProbeStatus, HandlerError> {
        if self.args.unhealthy {
            return Ok(ProbeStatus::unhealthy("configured unhealthy"));
        }
        Ok(ProbeStatus::healthy())
    }

    fn exit(&mut self) -> Result<(), HandlerError> {
        if self.args.ignore_exit {
            info!(target: PLUGIN_TARGET, "ignoring exit request");
            loop {
                thread::park();
            }
        }
        Ok(())
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.no_listen {
        info!(target: PLUGIN_TARGET, port = args.port, "exiting without listening");
        return ExitCode::SUCCESS;
    }

    let endpoint = match PluginEndpoint::bind(args.port) {
        Ok(endpoint) => endpoint,
        Err(bind_error) => {
            error!(target: PLUGIN_TARGET, error = %bind_error, "failed to listen");
            return ExitCode::FAILURE;
        }
    };

    let port = args.port;
    let mut handler = EchoHandler { args };
    match endpoint.serve(&mut handler) {
        Ok(ServeOutcome::Exited) => {
            info!(target: PLUGIN_TARGET, port, "exiting on host request");
            ExitCode::SUCCESS
        }
        Ok(ServeOutcome::Disconnected) => {
            info!(target: PLUGIN_TARGET, port, "host went away");
            ExitCode::SUCCESS
        }
        Err(serve_error) => {
            error!(target: PLUGIN_TARGET, error = %serve_error, "serving failed");
            ExitCode::FAILURE
        }
    }
}
