//! Spawning plugin executables as child processes.
//!
//! [`ProcessLauncher`] starts the plugin with its control port as the only
//! positional argument. The child's stderr is inherited so plugin
//! diagnostics reach the operator; stdin and stdout are not redirected. The
//! launcher returns as soon as the process exists: readiness is established
//! by the connector's bounded dial, not by a fixed sleep.

use std::io;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use tracing::{debug, warn};

/// Log target for process operations.
const LAUNCH_TARGET: &str = "watcher_host::launcher";

/// Exclusive handle on a running plugin process.
pub trait PluginProcess: Send {
    /// Operating system process identifier.
    fn id(&self) -> u32;

    /// Returns `true` once the process has exited, reaping it if so.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported while checking the process status.
    fn has_exited(&mut self) -> io::Result<bool>;

    /// Forcibly terminates the process.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported by the operating system.
    fn kill(&mut self) -> io::Result<()>;

    /// Blocks until the process has exited and reaps it.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported while waiting.
    fn wait(&mut self) -> io::Result<()>;
}

/// Starts plugin processes.
pub trait Launcher: Send + Sync {
    /// Spawns `runtime_path` with `port` as its first argument.
    ///
    /// # Errors
    ///
    /// Returns the spawn error when the executable is missing, not
    /// executable, or cannot be started for another reason.
    fn launch(&self, runtime_path: &Path, port: u16) -> io::Result<Box<dyn PluginProcess>>;
}

/// Describes a spawn failure for operators.
#[must_use]
pub fn describe_spawn_error(runtime_path: &Path, error: &io::Error) -> String {
    match error.kind() {
        io::ErrorKind::NotFound => format!("executable '{}' not found", runtime_path.display()),
        io::ErrorKind::PermissionDenied => {
            format!("executable '{}' is not runnable", runtime_path.display())
        }
        _ => format!("failed to start '{}'", runtime_path.display()),
    }
}

/// Launches plugins as operating-system child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(&self, runtime_path: &Path, port: u16) -> io::Result<Box<dyn PluginProcess>> {
        debug!(
            target: LAUNCH_TARGET,
            executable = %runtime_path.display(),
            port,
            "spawning plugin process"
        );

        let child = Command::new(runtime_path)
            .arg(port.to_string())
            .stderr(Stdio::inherit())
            .spawn()?;

        debug!(
            target: LAUNCH_TARGET,
            executable = %runtime_path.display(),
            pid = child.id(),
            port,
            "plugin process spawned"
        );

        Ok(Box::new(ChildProcess::new(child)))
    }
}

/// A spawned child process. Dropping an unreaped child kills it.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    reaped: bool,
}

impl ChildProcess {
    /// Wraps a spawned child.
    #[must_use]
    pub const fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }
}

impl PluginProcess for ChildProcess {
    fn id(&self) -> u32 {
        self.child.id()
    }

    fn has_exited(&mut self) -> io::Result<bool> {
        if self.reaped {
            return Ok(true);
        }
        match self.child.try_wait()? {
            Some(status) => {
                debug!(
                    target: LAUNCH_TARGET,
                    pid = self.child.id(),
                    ?status,
                    "plugin process exited"
                );
                self.reaped = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        if self.reaped {
            return Ok(());
        }
        self.child.kill()
    }

    fn wait(&mut self) -> io::Result<()> {
        if self.reaped {
            return Ok(());
        }
        let status = self.child.wait()?;
        self.reaped = true;
        debug!(
            target: LAUNCH_TARGET,
            pid = self.child.id(),
            ?status,
            "plugin process reaped"
        );
        Ok(())
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if let Err(error) = self.child.kill() {
            warn!(
                target: LAUNCH_TARGET,
                pid = self.child.id(),
                error = %error,
                "failed to kill plugin process on drop"
            );
        } else if let Err(error) = self.child.wait() {
            warn!(
                target: LAUNCH_TARGET,
                pid = self.child.id(),
                error = %error,
                "failed to reap plugin process on drop"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(io::ErrorKind::NotFound, "not found")]
    #[case(io::ErrorKind::PermissionDenied, "not runnable")]
    #[case(io::ErrorKind::Other, "failed to start")]
    fn spawn_errors_are_described(#[case] kind: io::ErrorKind, #[case] expected: &str) {
        let message = describe_spawn_error(Path::new("/opt/p.watcher"), &io::Error::from(kind));
        assert!(message.contains(expected), "{message}");
        assert!(message.contains("/opt/p.watcher"), "{message}");
    }

    #[test]
    fn launching_a_missing_executable_fails() {
        let missing = PathBuf::from("/definitely/not/here.watcher");
        let error = ProcessLauncher
            .launch(&missing, 50_051)
            .err()
            .expect("spawn should fail");
        assert_eq!(error.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn child_receives_port_and_can_be_killed() {
        let mut process = ProcessLauncher
            .launch(Path::new("/bin/sleep"), 30)
            .expect("spawn sleep");

        assert!(!process.has_exited().expect("status"));
        process.kill().expect("kill");
        process.wait().expect("wait");
        assert!(process.has_exited().expect("status after wait"));
        process.kill().expect("killing a reaped process is a no-op");
    }

    #[cfg(unix)]
    #[test]
    fn exited_child_is_detected() {
        let mut process = ProcessLauncher
            .launch(Path::new("/bin/true"), 1)
            .expect("spawn true");
        process.wait().expect("wait");
        assert!(process.has_exited().expect("status"));
    }
}
