//! Interactive sessions: PTY-backed and pipe-backed process drivers

mod builder;
mod expecter;
mod pipe;

pub use builder::SessionBuilder;
pub use pipe::PipeSession;

use crate::pattern::Pattern;
use crate::process::signal_pid;
use crate::result::{Error, MatchOutcome, Termination};
use async_trait::async_trait;
use expecter::Expecter;
use portable_pty::{Child, MasterPty};
use rustix::process::Signal;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// How often a PTY child is polled for exit.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A process that can be driven through expect/respond steps.
///
/// Implemented by the PTY [`Session`] and by [`PipeSession`]; the scenario
/// runner is generic over it.
#[async_trait]
pub trait Interact: Send {
    /// Wait until one of `patterns` matches, output ends, or `timeout` elapses.
    async fn wait_for(
        &mut self,
        patterns: &[Pattern],
        timeout: Duration,
    ) -> Result<MatchOutcome, Error>;

    /// Write raw bytes to the child.
    async fn send(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Write `line` followed by a newline.
    async fn send_line(&mut self, line: &str) -> Result<(), Error> {
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.send(&data).await
    }

    /// Wait for exit, at most `timeout`. `Ok(None)` if still running.
    async fn wait_exit(&mut self, timeout: Duration) -> Result<Option<Termination>, Error>;

    /// Terminate gracefully, or forcibly when `force` is set. No-op once exited.
    async fn terminate(&mut self, force: bool) -> Result<(), Error>;

    /// Everything read from the child so far, in read order.
    fn transcript(&self) -> &[u8];

    /// Child process id, if known.
    fn pid(&self) -> Option<u32>;
}

/// Session driving a process attached to a pseudo-terminal.
///
/// Programs that only prompt when talking to a terminal (`ssh`, `passwd`, many
/// installers) need this. A background thread pumps PTY output into a channel,
/// so a timed-out wait never loses data that arrives later.
///
/// # Examples
///
/// ```no_run
/// use procpilot::{Pattern, Session};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut session = Session::builder()
///     .timeout(Duration::from_secs(30))
///     .spawn("python3 -i")?;
///
/// session.expect(Pattern::literal(">>> ")).await?;
/// session.send_line("print('Hello')").await?;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    _master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    expecter: Expecter,
    timeout: Option<Duration>,
    kill_grace: Duration,
    termination: Option<Termination>,
}

impl Session {
    /// Create a new session builder.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Spawn a whitespace-separated command line with default options.
    ///
    /// Shorthand for `Session::builder().spawn(command)`.
    pub fn spawn(command: &str) -> Result<Self, Error> {
        SessionBuilder::new().spawn(command)
    }

    /// Wait for `pattern`, using the session's configured timeout.
    pub async fn expect(&mut self, pattern: Pattern) -> Result<MatchOutcome, Error> {
        self.expect_any(&[pattern]).await
    }

    /// Wait for any of `patterns` (first declared match wins), using the
    /// session's configured timeout.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use procpilot::{MatchOutcome, Pattern, Session};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let mut session = Session::spawn("apt-get upgrade")?;
    /// let patterns = [Pattern::literal("[Y/n]"), Pattern::literal("0 upgraded")];
    /// match session.expect_any(&patterns).await? {
    ///     MatchOutcome::Matched(m) if m.pattern_index == 0 => session.send_line("Y").await?,
    ///     MatchOutcome::Matched(_) => println!("Nothing to do"),
    ///     MatchOutcome::EndOfStream { .. } => println!("Process ended"),
    ///     MatchOutcome::Timeout { .. } => println!("No prompt"),
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn expect_any(&mut self, patterns: &[Pattern]) -> Result<MatchOutcome, Error> {
        self.expecter.expect_any(patterns, self.timeout).await
    }

    /// Send raw bytes (control characters included) to the process.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        let writer = self.writer.clone();
        let data = data.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut writer = writer.blocking_lock();
            writer.write_all(&data)?;
            writer.flush()
        })
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
        .map_err(Error::from_write)
    }

    /// Send a line to the process (appends newline).
    pub async fn send_line(&mut self, line: &str) -> Result<(), Error> {
        Interact::send_line(self, line).await
    }

    /// Check whether the process is still running.
    pub fn is_alive(&mut self) -> Result<bool, Error> {
        Ok(self.poll_exit()?.is_none())
    }

    /// Wait for the process to exit, without a deadline.
    pub async fn wait(&mut self) -> Result<Termination, Error> {
        loop {
            if let Some(t) = self.poll_exit()? {
                return Ok(t);
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    fn poll_exit(&mut self) -> Result<Option<Termination>, Error> {
        if self.termination.is_none() {
            self.termination = self.child.try_wait()?.map(Termination::from);
        }
        Ok(self.termination.clone())
    }

    async fn poll_exit_until(&mut self, timeout: Duration) -> Result<Option<Termination>, Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(t) = self.poll_exit()? {
                return Ok(Some(t));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Interact for Session {
    async fn wait_for(
        &mut self,
        patterns: &[Pattern],
        timeout: Duration,
    ) -> Result<MatchOutcome, Error> {
        self.expecter.expect_any(patterns, Some(timeout)).await
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        Session::send(self, data).await
    }

    async fn wait_exit(&mut self, timeout: Duration) -> Result<Option<Termination>, Error> {
        self.poll_exit_until(timeout).await
    }

    async fn terminate(&mut self, force: bool) -> Result<(), Error> {
        if self.poll_exit()?.is_some() {
            return Ok(());
        }

        if !force {
            if let Some(pid) = self.child.process_id() {
                signal_pid(pid, Signal::TERM);
            }
            if self.poll_exit_until(self.kill_grace).await?.is_some() {
                return Ok(());
            }
            debug!(pid = ?self.child.process_id(), "PTY child ignored SIGTERM, killing");
        }

        if let Err(e) = self.child.kill() {
            if self.poll_exit()?.is_none() {
                return Err(e.into());
            }
        }
        self.poll_exit_until(self.kill_grace.max(Duration::from_secs(1)))
            .await?;
        Ok(())
    }

    fn transcript(&self) -> &[u8] {
        self.expecter.transcript()
    }

    fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pty_echo_roundtrip() {
        let mut session = Session::builder()
            .timeout(Duration::from_secs(5))
            .spawn("cat")
            .unwrap();

        session.send_line("ping").await.unwrap();
        let outcome = session.expect(Pattern::literal("ping")).await.unwrap();
        assert!(outcome.is_match());

        session.terminate(true).await.unwrap();
        assert!(!session.is_alive().unwrap());
    }

    #[tokio::test]
    async fn test_pty_eof_after_exit() {
        let mut session = Session::builder()
            .timeout(Duration::from_secs(5))
            .spawn("echo bye")
            .unwrap();

        let outcome = session.expect(Pattern::literal("never")).await.unwrap();
        match outcome {
            MatchOutcome::EndOfStream { before } => assert!(before.contains("bye")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(session.wait().await.unwrap().success());
    }
}
