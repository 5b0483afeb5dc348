//! Session over plain pipes, built on the process handle

use crate::command::Command;
use crate::pattern::Pattern;
use crate::process::{LineReader, ProcessHandle, StreamSelector};
use crate::result::{Error, MatchOutcome, Termination};
use crate::session::expecter::Expecter;
use crate::session::Interact;
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Session driving a process through its standard streams.
///
/// stdout and stderr are merged in arrival order for matching. There is no
/// terminal, so programs that insist on a TTY for prompting will not prompt;
/// use [`crate::Session`] for those.
pub struct PipeSession {
    handle: ProcessHandle,
    expecter: Expecter,
    forwarders: Vec<JoinHandle<()>>,
    kill_grace: Duration,
}

impl PipeSession {
    pub(crate) fn spawn(
        command: &Command,
        argv: &[String],
        max_buffer_size: usize,
        strip_ansi: bool,
        kill_grace: Duration,
    ) -> Result<Self, Error> {
        let mut handle = ProcessHandle::spawn_argv(command, argv, true)?;
        let (tx, rx) = mpsc::unbounded_channel();

        let forwarders = [StreamSelector::Stdout, StreamSelector::Stderr]
            .into_iter()
            .filter_map(|stream| {
                let reader = handle.take_reader(stream)?;
                Some(tokio::spawn(forward(stream, reader, tx.clone())))
            })
            .collect();

        Ok(Self {
            handle,
            expecter: Expecter::new(rx, max_buffer_size, strip_ansi),
            forwarders,
            kill_grace,
        })
    }

    /// Close the child's input stream.
    pub fn close_stdin(&mut self) {
        self.handle.close_stdin();
    }
}

async fn forward(
    stream: StreamSelector,
    mut reader: LineReader,
    tx: mpsc::UnboundedSender<Vec<u8>>,
) {
    loop {
        match reader.read_available().await {
            Ok(Some(chunk)) => {
                if tx.send(chunk).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                trace!(stream = stream.as_str(), error = %e, "pipe reader stopped");
                break;
            }
        }
    }
}

impl Drop for PipeSession {
    fn drop(&mut self) {
        for task in &self.forwarders {
            task.abort();
        }
    }
}

#[async_trait]
impl Interact for PipeSession {
    async fn wait_for(
        &mut self,
        patterns: &[Pattern],
        timeout: Duration,
    ) -> Result<MatchOutcome, Error> {
        self.expecter.expect_any(patterns, Some(timeout)).await
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), Error> {
        self.handle.write(data).await
    }

    async fn wait_exit(&mut self, timeout: Duration) -> Result<Option<Termination>, Error> {
        self.handle.wait(timeout).await
    }

    async fn terminate(&mut self, force: bool) -> Result<(), Error> {
        self.handle.terminate(force, self.kill_grace).await
    }

    fn transcript(&self) -> &[u8] {
        self.expecter.transcript()
    }

    fn pid(&self) -> Option<u32> {
        self.handle.id()
    }
}
