//! Process handle over piped standard streams

mod reader;

pub use reader::{LineReader, ReadLine};

use crate::command::Command;
use crate::result::{Error, Termination};
use rustix::process::{kill_process, Pid, Signal};
use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tracing::{debug, warn};

/// Selects one of the child's output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamSelector {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

impl StreamSelector {
    /// Stream name as used in events: `stdout` or `stderr`.
    pub fn as_str(self) -> &'static str {
        match self {
            StreamSelector::Stdout => "stdout",
            StreamSelector::Stderr => "stderr",
        }
    }
}

/// Owns one child process and its pipes.
///
/// The child is killed if the handle is dropped while it is still running, so a
/// process never outlives the run that spawned it.
///
/// # Examples
///
/// ```no_run
/// use procpilot::{Command, ProcessHandle, ReadLine, StreamSelector};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut handle = ProcessHandle::spawn(&Command::new("cat"), true)?;
/// handle.write(b"ping\n").await?;
/// handle.close_stdin();
///
/// let line = handle
///     .read_line(StreamSelector::Stdout, Duration::from_secs(1))
///     .await?;
/// assert_eq!(line, ReadLine::Line("ping".into()));
///
/// let status = handle.wait(Duration::from_secs(1)).await?;
/// assert!(status.is_some_and(|s| s.success()));
/// # Ok(())
/// # }
/// ```
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    stdout: Option<LineReader>,
    stderr: Option<LineReader>,
    termination: Option<Termination>,
}

impl ProcessHandle {
    /// Spawn `command` as given (no elevation wrapping).
    ///
    /// With `with_stdin` false the child's input is `/dev/null` and only two
    /// pipes are opened.
    ///
    /// # Errors
    ///
    /// [`Error::Spawn`] if the executable is missing or the OS refuses.
    pub fn spawn(command: &Command, with_stdin: bool) -> Result<Self, Error> {
        Self::spawn_argv(command, &command.argv(), with_stdin)
    }

    /// Spawn an explicit argument vector using `command`'s directory and environment.
    pub fn spawn_argv(command: &Command, argv: &[String], with_stdin: bool) -> Result<Self, Error> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| Error::Spawn("Empty command".to_string()))?;

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args)
            .stdin(if with_stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = command.cwd() {
            cmd.current_dir(dir);
        }
        for (key, value) in command.envs() {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Spawn(format!("{program}: {e}")))?;
        let pid = child.id();
        debug!(?pid, program = %program, "spawned process");

        Ok(Self {
            stdin: child.stdin.take(),
            stdout: child.stdout.take().map(LineReader::new),
            stderr: child.stderr.take().map(LineReader::new),
            child,
            pid,
            termination: None,
        })
    }

    /// OS process id, if still known.
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Write bytes to the child's input stream.
    ///
    /// # Errors
    ///
    /// [`Error::BrokenPipe`] if the child closed its input, exited, or the input
    /// was never opened or already closed.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let stdin = self.stdin.as_mut().ok_or(Error::BrokenPipe)?;
        stdin.write_all(bytes).await.map_err(Error::from_write)?;
        stdin.flush().await.map_err(Error::from_write)
    }

    /// Close the child's input stream. No further writes are possible.
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Read one line from the selected stream, bounded by `timeout`.
    ///
    /// Returns [`ReadLine::EndOfStream`] if the stream was handed out with
    /// [`ProcessHandle::take_reader`].
    pub async fn read_line(
        &mut self,
        stream: StreamSelector,
        timeout: Duration,
    ) -> Result<ReadLine, Error> {
        let reader = match stream {
            StreamSelector::Stdout => self.stdout.as_mut(),
            StreamSelector::Stderr => self.stderr.as_mut(),
        };
        match reader {
            Some(r) => Ok(r.read_line(timeout).await?),
            None => Ok(ReadLine::EndOfStream),
        }
    }

    /// Move a stream reader out of the handle, e.g. into a concurrent task.
    pub fn take_reader(&mut self, stream: StreamSelector) -> Option<LineReader> {
        match stream {
            StreamSelector::Stdout => self.stdout.take(),
            StreamSelector::Stderr => self.stderr.take(),
        }
    }

    /// Wait for the process to terminate, at most `timeout`.
    ///
    /// Returns `Ok(None)` if it is still running at the deadline.
    pub async fn wait(&mut self, timeout: Duration) -> Result<Option<Termination>, Error> {
        if let Some(t) = &self.termination {
            return Ok(Some(t.clone()));
        }
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Err(_) => Ok(None),
            Ok(status) => {
                let termination = Termination::from(status?);
                debug!(pid = ?self.pid, %termination, "process exited");
                self.termination = Some(termination.clone());
                Ok(Some(termination))
            }
        }
    }

    /// Wait with no deadline.
    pub async fn wait_forever(&mut self) -> Result<Termination, Error> {
        if let Some(t) = &self.termination {
            return Ok(t.clone());
        }
        let termination = Termination::from(self.child.wait().await?);
        self.termination = Some(termination.clone());
        Ok(termination)
    }

    /// Non-blocking check for exit.
    pub fn try_wait(&mut self) -> Result<Option<Termination>, Error> {
        if self.termination.is_none() {
            self.termination = self.child.try_wait()?.map(Termination::from);
        }
        Ok(self.termination.clone())
    }

    /// Terminate the process.
    ///
    /// With `force` false, SIGTERM is sent first and SIGKILL follows if the
    /// process is still alive after `grace`. With `force` true, SIGKILL is sent
    /// right away. Calling this on an exited process is a no-op.
    pub async fn terminate(&mut self, force: bool, grace: Duration) -> Result<(), Error> {
        if self.try_wait()?.is_some() {
            return Ok(());
        }

        if !force {
            if let Some(pid) = self.pid {
                signal_pid(pid, Signal::TERM);
            }
            if self.wait(grace).await?.is_some() {
                return Ok(());
            }
            debug!(pid = ?self.pid, "process ignored SIGTERM, killing");
        }

        if let Err(e) = self.child.start_kill() {
            // raced with a natural exit
            if e.kind() != std::io::ErrorKind::InvalidInput {
                return Err(e.into());
            }
        }
        self.wait(grace.max(Duration::from_secs(1))).await?;
        Ok(())
    }
}

/// Send `signal` to `pid`, logging failures instead of propagating them.
pub(crate) fn signal_pid(pid: u32, signal: Signal) {
    let Some(target) = i32::try_from(pid).ok().and_then(Pid::from_raw) else {
        return;
    };
    if let Err(e) = kill_process(target, signal) {
        warn!(pid, error = %e, "failed to signal process");
    }
}
