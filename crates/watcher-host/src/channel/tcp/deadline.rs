//! Stream halves that honour the deadline of the call in flight.
//!
//! A socket timeout bounds one syscall, not a whole frame. A peer that
//! trickles a byte just inside that timeout would keep a framed read going
//! indefinitely, so [`BoundedStream`] recomputes the timeout from the shared
//! deadline before every read and write, and refuses to touch the socket
//! once the deadline has passed.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Deadline shared by the read and write halves of one channel.
///
/// Disarmed between calls, in which case I/O blocks without a timeout.
#[derive(Debug, Clone, Default)]
pub(super) struct SharedDeadline(Arc<Mutex<Option<Instant>>>);

impl SharedDeadline {
    /// Bounds every subsequent read and write by `deadline`.
    pub(super) fn arm(&self, deadline: Instant) {
        *self.slot() = Some(deadline);
    }

    pub(super) fn disarm(&self) {
        *self.slot() = None;
    }

    /// Socket timeout for the next syscall.
    ///
    /// Fails with [`io::ErrorKind::TimedOut`] once the armed deadline has
    /// passed; `Ok(None)` means no deadline is armed.
    fn remaining(&self) -> io::Result<Option<Duration>> {
        let armed = *self.slot();
        armed
            .map(|deadline| {
                deadline
                    .checked_duration_since(Instant::now())
                    .filter(|left| !left.is_zero())
                    .ok_or_else(|| {
                        io::Error::new(io::ErrorKind::TimedOut, "control call deadline passed")
                    })
            })
            .transpose()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Instant>> {
        self.0.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

/// One half of a control connection, bounded by a [`SharedDeadline`].
pub(super) struct BoundedStream {
    stream: TcpStream,
    deadline: SharedDeadline,
}

impl BoundedStream {
    pub(super) const fn new(stream: TcpStream, deadline: SharedDeadline) -> Self {
        Self { stream, deadline }
    }
}

impl Read for BoundedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.set_read_timeout(self.deadline.remaining()?)?;
        self.stream.read(buf)
    }
}

impl Write for BoundedStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.set_write_timeout(self.deadline.remaining()?)?;
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
