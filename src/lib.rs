//! procpilot: drive sysadmin commands from plugins
//!
//! Two ways to run a command on behalf of a plugin:
//!
//! - **Scenarios**: an expect-style automaton. Wait for a prompt, answer it,
//!   wait for the next one, then require a clean exit. Answers can be masked
//!   so passwords never reach the returned transcript.
//! - **Stream multiplexing**: run a command to completion while every stdout
//!   and stderr line is forwarded to a sink the moment it is read, tagged
//!   with its stream and a log level.
//!
//! Both can prefix the command with `sudo` and feed it a password through the
//! child's input, never through the environment or the command line.
//!
//! # Scenarios
//!
//! ```rust,no_run
//! use procpilot::{Command, Scenario, ScenarioRunner, ScenarioStep, Timeouts};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), procpilot::Error> {
//!     let scenario = Scenario::new()
//!         .step(
//!             ScenarioStep::expect("Enter password:")
//!                 .respond("s3cret")
//!                 .timeout(Duration::from_secs(5)),
//!         )
//!         .mask([0]);
//!
//!     let result = ScenarioRunner::new()
//!         .timeouts(Timeouts::from_env())
//!         .run(&Command::new("/usr/local/bin/enroll"), &scenario, None)
//!         .await?;
//!
//!     if !result.success {
//!         eprintln!("{}", result.message.unwrap_or_default());
//!     }
//!     println!("{}", result.transcript);
//!     Ok(())
//! }
//! ```
//!
//! # Streaming
//!
//! ```rust,no_run
//! use procpilot::{ChannelSink, Command, Secret, StreamMultiplexer};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let (sink, mut events) = ChannelSink::new();
//! let run = tokio::spawn(async move {
//!     StreamMultiplexer::new()
//!         .run(
//!             &Command::new("apt-get").args(["install", "-y", "cups"]).elevated(true),
//!             Some(&Secret::new("admin-password")),
//!             Arc::new(sink),
//!         )
//!         .await
//! });
//!
//! while let Some(event) = events.recv().await {
//!     println!("{}", event.to_envelope());
//! }
//! let _outcome = run.await;
//! # }
//! ```
//!
//! # Lower level
//!
//! [`Session`] (PTY) and [`PipeSession`] expose the expect loop directly, and
//! [`ProcessHandle`] is a plain spawned process with line readers and bounded
//! waits.

#![warn(missing_docs)]

mod buffer;
mod command;
mod config;
mod pattern;
mod process;
mod registry;
mod result;
mod scenario;
mod session;
mod stream;

pub use command::{is_privileged, Command, Secret, ELEVATION_PROMPT};
pub use config::Timeouts;
pub use pattern::Pattern;
pub use process::{LineReader, ProcessHandle, ReadLine, StreamSelector};
pub use registry::{Activity, ActivityGuard, ActivityRegistry};
pub use result::{
    Error, MatchOutcome, MatchResult, PatternError, ProcessOutcome, ScenarioResult, Termination,
};
pub use scenario::{
    redact, Driver, Scenario, ScenarioRunner, ScenarioState, ScenarioStep, TranscriptMode,
    MASK_PLACEHOLDER,
};
pub use session::{Interact, PipeSession, Session, SessionBuilder};
pub use stream::{
    is_envelope, ChannelSink, CollectingSink, EventSink, StreamEvent, StreamMultiplexer,
    TracingSink,
};
