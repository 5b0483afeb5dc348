//! Realtime dual-stream capture

mod event;
mod sink;

pub use event::{is_envelope, StreamEvent};
pub use sink::{ChannelSink, CollectingSink, EventSink, TracingSink};

use crate::command::{Command, Secret};
use crate::config::Timeouts;
use crate::process::{LineReader, ProcessHandle, ReadLine, StreamSelector};
use crate::registry::ActivityRegistry;
use crate::result::{Error, ProcessOutcome, Termination};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, warn, Level};

type Lines = Arc<Mutex<Vec<String>>>;

/// Runs a command to completion while forwarding each output line as it is read.
///
/// Two reader tasks drain stdout and stderr independently, so a stalled stream
/// never delays the other. Each line becomes a [`StreamEvent`] handed to the
/// sink immediately and is also collected into the [`ProcessOutcome`].
///
/// # Examples
///
/// ```no_run
/// use procpilot::{Command, StreamMultiplexer, TracingSink};
/// use std::sync::Arc;
///
/// # async fn example() {
/// let outcome = StreamMultiplexer::new()
///     .run(&Command::new("apt-get").arg("update"), None, Arc::new(TracingSink))
///     .await;
/// if !outcome.success {
///     eprintln!("{}", outcome.message.unwrap_or_default());
/// }
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct StreamMultiplexer {
    timeouts: Timeouts,
    stdout_level: Level,
    stderr_level: Level,
    registry: Option<ActivityRegistry>,
}

impl Default for StreamMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamMultiplexer {
    /// Multiplexer with default timeouts, stdout at INFO and stderr at ERROR.
    pub fn new() -> Self {
        Self {
            timeouts: Timeouts::default(),
            stdout_level: Level::INFO,
            stderr_level: Level::ERROR,
            registry: None,
        }
    }

    /// Use these timeouts.
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Levels attached to stdout and stderr events.
    pub fn levels(mut self, stdout: Level, stderr: Level) -> Self {
        self.stdout_level = stdout;
        self.stderr_level = stderr;
        self
    }

    /// Report runs to `registry` while they are in flight.
    pub fn registry(mut self, registry: ActivityRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Run `command`, forwarding every line to `sink`.
    ///
    /// When the command needs elevation and `secret` is given, the secret is
    /// written to the child's input right after spawn and the input is closed.
    /// Never fails: spawn errors and timeouts become an unsuccessful outcome
    /// with a message.
    pub async fn run(
        &self,
        command: &Command,
        secret: Option<&Secret>,
        sink: Arc<dyn EventSink>,
    ) -> ProcessOutcome {
        let (argv, elevated) = command.spawn_argv("");
        let feed_secret = elevated && secret.is_some();

        let mut handle = match ProcessHandle::spawn_argv(command, &argv, feed_secret) {
            Ok(handle) => handle,
            Err(e) => {
                let message = e.to_string();
                error!(command = %command, error = %message, "spawn failed");
                sink.emit(&StreamEvent::new(
                    StreamSelector::Stderr,
                    Level::ERROR,
                    message.clone(),
                ));
                return ProcessOutcome {
                    success: false,
                    stderr_lines: vec![message.clone()],
                    message: Some(message),
                    ..ProcessOutcome::default()
                };
            }
        };
        let _activity = self
            .registry
            .as_ref()
            .map(|r| r.begin(command.to_string(), handle.id()));

        if let (true, Some(secret)) = (feed_secret, secret) {
            let mut line = secret.expose().as_bytes().to_vec();
            line.push(b'\n');
            if let Err(e) = handle.write(&line).await {
                warn!(error = %e, "could not deliver elevation secret");
            }
            handle.close_stdin();
        }

        let stdout_lines = Lines::default();
        let stderr_lines = Lines::default();
        let mut readers = JoinSet::new();
        for (stream, level, lines) in [
            (StreamSelector::Stdout, self.stdout_level, &stdout_lines),
            (StreamSelector::Stderr, self.stderr_level, &stderr_lines),
        ] {
            if let Some(reader) = handle.take_reader(stream) {
                readers.spawn(drain(
                    stream,
                    reader,
                    level,
                    self.timeouts.line_timeout(),
                    sink.clone(),
                    lines.clone(),
                ));
            }
        }

        let (termination, failure) = self.supervise(&mut handle, &mut readers).await;

        if let Some(message) = &failure {
            error!(command = %command, "{message}");
            sink.emit(&StreamEvent::new(
                StreamSelector::Stderr,
                Level::ERROR,
                message.clone(),
            ));
        }

        let success = failure.is_none() && termination.as_ref().is_some_and(Termination::success);
        let message = failure.or_else(|| match &termination {
            Some(t) if !t.success() => Some(format!("process {t}")),
            _ => None,
        });
        debug!(command = %command, success, "run finished");

        ProcessOutcome {
            success,
            stdout_lines: take_lines(&stdout_lines),
            stderr_lines: take_lines(&stderr_lines),
            termination,
            message,
        }
    }

    /// Wait for both streams to close and the process to exit, bounding every
    /// wait. Returns the termination (if observed) and a failure message.
    async fn supervise(
        &self,
        handle: &mut ProcessHandle,
        readers: &mut JoinSet<()>,
    ) -> (Option<Termination>, Option<String>) {
        enum First {
            StreamsClosed,
            Exited(Result<Option<Termination>, Error>),
        }

        let first = tokio::select! {
            _ = join_all(readers) => First::StreamsClosed,
            status = wait_bounded(handle, self.timeouts.run_timeout()) => First::Exited(status),
        };

        let grace = self.timeouts.kill_grace_period();
        match first {
            First::StreamsClosed => match handle.wait(self.timeouts.exit_timeout()).await {
                Ok(Some(t)) => (Some(t), None),
                Ok(None) => {
                    let message = format!(
                        "process did not exit within {:?} after its output closed",
                        self.timeouts.exit_timeout()
                    );
                    let _ = handle.terminate(true, grace).await;
                    (handle.try_wait().ok().flatten(), Some(message))
                }
                Err(e) => (None, Some(e.to_string())),
            },
            First::Exited(Ok(Some(t))) => {
                let failure = self.join_readers(handle, readers).await;
                (Some(t), failure)
            }
            First::Exited(Ok(None)) => {
                let message = format!(
                    "process still running after {:?}, killed",
                    self.timeouts.run_timeout().unwrap_or_default()
                );
                let _ = handle.terminate(true, grace).await;
                let _ = self.join_readers(handle, readers).await;
                (handle.try_wait().ok().flatten(), Some(message))
            }
            First::Exited(Err(e)) => {
                let _ = handle.terminate(true, grace).await;
                readers.abort_all();
                (None, Some(e.to_string()))
            }
        }
    }

    /// Give readers the join grace period, then force-terminate and abandon them.
    async fn join_readers(
        &self,
        handle: &mut ProcessHandle,
        readers: &mut JoinSet<()>,
    ) -> Option<String> {
        let join = self.timeouts.join_timeout();
        if tokio::time::timeout(join, join_all(readers)).await.is_ok() {
            return None;
        }
        let _ = handle
            .terminate(true, self.timeouts.kill_grace_period())
            .await;
        readers.abort_all();
        Some(Error::JoinTimeout(join).to_string())
    }
}

/// Read one stream to its end, emitting and collecting every line.
async fn drain(
    stream: StreamSelector,
    mut reader: LineReader,
    level: Level,
    line_timeout: Duration,
    sink: Arc<dyn EventSink>,
    lines: Lines,
) {
    loop {
        match reader.read_line(line_timeout).await {
            Ok(ReadLine::Line(text)) => {
                sink.emit(&StreamEvent::new(stream, level, text.clone()));
                if let Ok(mut lines) = lines.lock() {
                    lines.push(text);
                }
            }
            // wakeup only, a quiet stream is not an error
            Ok(ReadLine::Timeout) => continue,
            Ok(ReadLine::EndOfStream) => break,
            Err(e) => {
                warn!(stream = stream.as_str(), error = %e, "stream read failed");
                break;
            }
        }
    }
}

async fn join_all(readers: &mut JoinSet<()>) {
    while readers.join_next().await.is_some() {}
}

async fn wait_bounded(
    handle: &mut ProcessHandle,
    bound: Option<Duration>,
) -> Result<Option<Termination>, Error> {
    match bound {
        Some(limit) => handle.wait(limit).await,
        None => handle.wait_forever().await.map(Some),
    }
}

fn take_lines(lines: &Lines) -> Vec<String> {
    lines
        .lock()
        .map(|mut lines| std::mem::take(&mut *lines))
        .unwrap_or_default()
}
