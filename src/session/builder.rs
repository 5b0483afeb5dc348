//! Session builder for configuration

use crate::command::Command;
use crate::result::Error;
use crate::session::expecter::Expecter;
use crate::session::{PipeSession, Session};
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

/// Default timeout for expect operations (in seconds)
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default maximum match window (in bytes)
const DEFAULT_MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Default delay between SIGTERM and SIGKILL (in seconds)
const DEFAULT_KILL_GRACE_SECS: u64 = 2;

/// Default PTY rows
const DEFAULT_PTY_ROWS: u16 = 24;

/// Default PTY columns
const DEFAULT_PTY_COLS: u16 = 80;

/// PTY read chunk size
const READ_CHUNK_SIZE: usize = 4096;

/// Builder for configuring and spawning sessions.
///
/// # Defaults
///
/// - Timeout: 30 seconds
/// - Max buffer size: 64 KiB
/// - ANSI stripping: disabled
/// - Kill grace period: 2 seconds
/// - PTY size: 24 rows × 80 columns
///
/// # Examples
///
/// ```no_run
/// use procpilot::{Command, Session};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let session = Session::builder()
///     .timeout(Duration::from_secs(60))
///     .strip_ansi(true)
///     .pty_size(40, 120)
///     .spawn_command(&Command::new("passwd"))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SessionBuilder {
    timeout: Option<Duration>,
    max_buffer_size: usize,
    strip_ansi: bool,
    kill_grace: Duration,
    pty_size: PtySize,
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBuilder {
    /// Create a new session builder with default configuration.
    pub fn new() -> Self {
        Self {
            timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            strip_ansi: false,
            kill_grace: Duration::from_secs(DEFAULT_KILL_GRACE_SECS),
            pty_size: PtySize {
                rows: DEFAULT_PTY_ROWS,
                cols: DEFAULT_PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            },
        }
    }

    /// Set the timeout used by [`Session::expect`] and [`Session::expect_any`].
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Disable the default timeout (wait until match or end of stream).
    pub fn no_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Set the maximum size of the unmatched window in bytes.
    ///
    /// When exceeded, the oldest third of the window is discarded. The
    /// transcript is unaffected.
    pub fn max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    /// Enable or disable ANSI escape sequence stripping before matching.
    pub fn strip_ansi(mut self, strip: bool) -> Self {
        self.strip_ansi = strip;
        self
    }

    /// Delay between SIGTERM and SIGKILL on graceful termination.
    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Set PTY (terminal) size.
    pub fn pty_size(mut self, rows: u16, cols: u16) -> Self {
        self.pty_size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        self
    }

    /// Spawn a whitespace-separated command line on a PTY.
    ///
    /// # Errors
    ///
    /// [`Error::Spawn`] for an empty command or a spawn failure,
    /// [`Error::Pty`] if the PTY cannot be created.
    pub fn spawn(self, command: &str) -> Result<Session, Error> {
        let parts: Vec<&str> = command.split_whitespace().collect();
        let (program, args) = parts
            .split_first()
            .ok_or_else(|| Error::Spawn("Empty command".to_string()))?;
        self.spawn_command(&Command::new(*program).args(args.iter().copied()))
    }

    /// Spawn a [`Command`] on a PTY, without elevation wrapping.
    pub fn spawn_command(self, command: &Command) -> Result<Session, Error> {
        self.spawn_argv(command, &command.argv())
    }

    /// Spawn an explicit argument vector on a PTY, using `command`'s working
    /// directory and environment.
    pub fn spawn_argv(self, command: &Command, argv: &[String]) -> Result<Session, Error> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Spawn("Empty command".to_string()))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        match command.cwd() {
            Some(dir) => cmd.cwd(dir),
            None => {
                if let Ok(dir) = std::env::current_dir() {
                    cmd.cwd(dir);
                }
            }
        }
        for (key, value) in command.envs() {
            cmd.env(key, value);
        }

        let pty_pair = native_pty_system()
            .openpty(self.pty_size)
            .map_err(|e| Error::Pty(e.to_string()))?;

        let child = pty_pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Spawn(format!("{program}: {e}")))?;
        // Only the child may hold the slave, otherwise EOF never arrives.
        drop(pty_pair.slave);

        let reader = pty_pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::Pty(e.to_string()))?;
        let writer = pty_pair
            .master
            .take_writer()
            .map_err(|e| Error::Pty(e.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("procpilot-pty-reader".into())
            .spawn(move || pump_pty(reader, tx))?;

        debug!(pid = ?child.process_id(), program = %program, "spawned PTY session");

        Ok(Session {
            _master: pty_pair.master,
            child,
            writer: Arc::new(Mutex::new(writer)),
            expecter: Expecter::new(rx, self.max_buffer_size, self.strip_ansi),
            timeout: self.timeout,
            kill_grace: self.kill_grace,
            termination: None,
        })
    }

    /// Spawn a [`Command`] with piped stdin/stdout/stderr instead of a PTY.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_pipes(self, command: &Command) -> Result<PipeSession, Error> {
        self.spawn_pipes_argv(command, &command.argv())
    }

    /// Spawn an explicit argument vector with piped standard streams.
    pub fn spawn_pipes_argv(
        self,
        command: &Command,
        argv: &[String],
    ) -> Result<PipeSession, Error> {
        PipeSession::spawn(
            command,
            argv,
            self.max_buffer_size,
            self.strip_ansi,
            self.kill_grace,
        )
    }
}

/// Read PTY output until EOF, forwarding each chunk.
///
/// Linux reports a closed slave as `EIO`, so any read error ends the stream.
fn pump_pty(mut reader: Box<dyn Read + Send>, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                trace!(error = %e, "PTY reader stopped");
                break;
            }
        }
    }
}
