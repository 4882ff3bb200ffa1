//! Content-Length framing over arbitrary byte pipes.
//!
//! Every message is prefixed with a header block:
//! ```text
//! Content-Length: <length>\r\n
//! \r\n
//! <payload>
//! ```
//! Other headers are accepted and ignored.

use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};

use crate::error::FrameError;

const CONTENT_LENGTH: &str = "Content-Length:";

/// Reads framed messages from a byte source.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: Read> FrameReader<R> {
    /// Wraps a byte source.
    #[must_use]
    pub fn new(source: R) -> Self {
        Self {
            reader: BufReader::new(source),
        }
    }

    /// Reads the next message, blocking until it is complete.
    ///
    /// Returns `None` when the source ends cleanly between messages.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::MissingContentLength`] or
    /// [`FrameError::InvalidHeader`] for a malformed header block, and
    /// [`FrameError::Io`] when reading fails or the source ends mid-message.
    pub fn receive(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let Some(length) = self.read_headers()? else {
            return Ok(None);
        };
        let mut payload = vec![0_u8; length];
        self.reader.read_exact(&mut payload)?;
        Ok(Some(payload))
    }

    fn read_headers(&mut self) -> Result<Option<usize>, FrameError> {
        let mut content_length = None;
        let mut first = true;
        loop {
            let mut line = String::new();
            if self.reader.read_line(&mut line)? == 0 {
                if first {
                    return Ok(None);
                }
                return Err(FrameError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "pipe closed while reading headers",
                )));
            }
            first = false;

            let header = line.trim();
            if header.is_empty() {
                break;
            }
            if let Some(value) = header.strip_prefix(CONTENT_LENGTH) {
                let length = value
                    .trim()
                    .parse()
                    .map_err(|_| FrameError::InvalidHeader)?;
                content_length = Some(length);
            }
        }
        content_length
            .map(Some)
            .ok_or(FrameError::MissingContentLength)
    }
}

/// Writes framed messages to a byte sink.
pub struct FrameWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FrameWriter<W> {
    /// Wraps a byte sink.
    #[must_use]
    pub fn new(sink: W) -> Self {
        Self {
            writer: BufWriter::new(sink),
        }
    }

    /// Writes one message and flushes it.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Io`] when writing fails.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        let header = format!("{CONTENT_LENGTH} {}\r\n\r\n", payload.len());
        self.writer.write_all(header.as_bytes())?;
        self.writer.write_all(payload)?;
        self.writer.flush()?;
        Ok(())
    }
}
