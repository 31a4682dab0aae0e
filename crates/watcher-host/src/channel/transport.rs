//! Stream transport with `Content-Length` header framing.
//!
//! Each message is framed as:
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <payload>
//! ```
//! Both the host and the plugin endpoint use this transport over the two
//! halves of a TCP stream.

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};

use super::error::TransportError;

/// Largest payload accepted from a peer.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Longest header line accepted, terminator included.
const MAX_HEADER_LINE_BYTES: usize = 8 * 1024;

/// Most header lines accepted before the blank separator.
const MAX_HEADER_LINES: usize = 32;

/// The one header the framing depends on.
const CONTENT_LENGTH: &str = "content-length";

/// Reads and writes `Content-Length` framed messages.
pub struct FramedTransport<R: Read, W: Write> {
    reader: BufReader<R>,
    writer: BufWriter<W>,
}

impl<R: Read, W: Write> FramedTransport<R, W> {
    /// Creates a transport from separate read and write halves.
    #[must_use]
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        }
    }

    /// Sends a framed message.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Io` if writing to the stream fails.
    pub fn send(&mut self, message: &[u8]) -> Result<(), TransportError> {
        let header = format!("Content-Length: {}\r\n\r\n", message.len());
        self.writer.write_all(header.as_bytes())?;
        self.writer.write_all(message)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Receives a framed message (blocks until complete).
    ///
    /// # Errors
    ///
    /// Returns `TransportError::MissingContentLength` if no Content-Length header is found,
    /// `TransportError::InvalidHeader` for malformed or oversized headers,
    /// `TransportError::FrameTooLarge` if the announced length exceeds
    /// [`MAX_FRAME_BYTES`], and `TransportError::Io` if reading fails.
    pub fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        let content_length = self.read_headers()?;
        if content_length > MAX_FRAME_BYTES {
            return Err(TransportError::FrameTooLarge {
                length: content_length,
                limit: MAX_FRAME_BYTES,
            });
        }
        let mut content = vec![0u8; content_length];
        self.reader.read_exact(&mut content)?;
        Ok(content)
    }

    /// Reads the header block and returns the announced payload length.
    ///
    /// Header names are matched case-insensitively and unknown headers are
    /// skipped. Both the length of each line and the number of lines are
    /// capped so a peer cannot grow the header block without bound.
    fn read_headers(&mut self) -> Result<usize, TransportError> {
        let mut content_length = None;
        for _ in 0..MAX_HEADER_LINES {
            let line = self.read_header_line()?;
            if line.is_empty() {
                return content_length.ok_or(TransportError::MissingContentLength);
            }
            let (name, value) = line
                .split_once(':')
                .ok_or(TransportError::InvalidHeader)?;
            if name.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let length = value
                    .trim()
                    .parse()
                    .map_err(|_| TransportError::InvalidHeader)?;
                content_length = Some(length);
            }
        }
        Err(TransportError::InvalidHeader)
    }

    /// Reads one header line, stripped of surrounding whitespace.
    fn read_header_line(&mut self) -> Result<String, TransportError> {
        let mut raw = Vec::new();
        let limit = u64::try_from(MAX_HEADER_LINE_BYTES).unwrap_or(u64::MAX);
        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut raw)?;
        if raw.last() != Some(&b'\n') {
            if read >= MAX_HEADER_LINE_BYTES {
                return Err(TransportError::InvalidHeader);
            }
            return Err(TransportError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed while reading headers",
            )));
        }
        let text = String::from_utf8(raw).map_err(|_| TransportError::InvalidHeader)?;
        Ok(text.trim().to_owned())
    }

    /// Returns the write half, for tests that inspect the written bytes.
    #[cfg(test)]
    fn into_writer(self) -> Option<W> {
        self.writer.into_inner().ok()
    }
}
