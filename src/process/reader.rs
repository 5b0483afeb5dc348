//! Line-oriented reading of child output with timeouts

use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Result of a bounded line read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadLine {
    /// One complete line, newline (and trailing carriage return) stripped.
    Line(String),
    /// No complete line arrived in time. Partial data is kept for the next call.
    Timeout,
    /// The stream closed and everything has been returned.
    EndOfStream,
}

/// Reads lines from one output stream.
///
/// Partially received lines survive a timed-out read: the pending bytes stay in
/// the reader and are completed by the next call. A final line without a
/// trailing newline is still returned before [`ReadLine::EndOfStream`].
pub struct LineReader {
    inner: BufReader<Box<dyn AsyncRead + Send + Unpin>>,
    pending: Vec<u8>,
    eof: bool,
}

impl LineReader {
    /// Wrap any async byte source.
    pub fn new(source: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            inner: BufReader::new(Box::new(source)),
            pending: Vec::new(),
            eof: false,
        }
    }

    /// Read one line, waiting at most `timeout`.
    pub async fn read_line(&mut self, timeout: Duration) -> std::io::Result<ReadLine> {
        if self.eof {
            return Ok(ReadLine::EndOfStream);
        }

        // read_until appends to `pending` and can be resumed after cancellation
        match tokio::time::timeout(timeout, self.inner.read_until(b'\n', &mut self.pending)).await
        {
            Err(_) => Ok(ReadLine::Timeout),
            Ok(Err(e)) => Err(e),
            Ok(Ok(_)) if self.pending.ends_with(b"\n") => Ok(ReadLine::Line(self.take_line())),
            // read_until only stops short of the delimiter at end of stream
            Ok(Ok(_)) => {
                self.eof = true;
                if self.pending.is_empty() {
                    Ok(ReadLine::EndOfStream)
                } else {
                    Ok(ReadLine::Line(self.take_line()))
                }
            }
        }
    }

    /// Return whatever bytes are available, waiting for at least one.
    ///
    /// Used where output must be seen before a newline arrives, e.g. prompts.
    /// Returns `None` once the stream is closed.
    pub async fn read_available(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        if !self.pending.is_empty() {
            return Ok(Some(std::mem::take(&mut self.pending)));
        }
        if self.eof {
            return Ok(None);
        }

        let chunk = self.inner.fill_buf().await?.to_vec();
        if chunk.is_empty() {
            self.eof = true;
            return Ok(None);
        }
        self.inner.consume(chunk.len());
        Ok(Some(chunk))
    }

    fn take_line(&mut self) -> String {
        let mut raw = std::mem::take(&mut self.pending);
        if raw.ends_with(b"\n") {
            raw.pop();
        }
        if raw.ends_with(b"\r") {
            raw.pop();
        }
        String::from_utf8_lossy(&raw).into_owned()
    }
}
