//! Per-run timeout configuration

use std::time::Duration;
use tracing::warn;

/// Default timeout for each scenario step (in seconds)
const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30;

/// Default wait for process exit once its output streams have closed (in seconds)
const DEFAULT_EXIT_TIMEOUT_SECS: u64 = 10;

/// Default grace period for stream readers after process exit (in seconds)
const DEFAULT_JOIN_TIMEOUT_SECS: u64 = 5;

/// Default per-line read wakeup for stream readers (in milliseconds)
const DEFAULT_LINE_TIMEOUT_MILLIS: u64 = 1000;

/// Default delay between SIGTERM and SIGKILL (in seconds)
const DEFAULT_KILL_GRACE_SECS: u64 = 2;

/// Timeouts applied to one run.
///
/// Passed explicitly to each runner; nothing is read from global state
/// except through [`Timeouts::from_env`], which the caller opts into.
///
/// # Defaults
///
/// - step: 30 seconds
/// - exit: 10 seconds
/// - join: 5 seconds
/// - line: 1 second
/// - kill grace: 2 seconds
/// - run: unbounded
///
/// # Examples
///
/// ```
/// use procpilot::Timeouts;
/// use std::time::Duration;
///
/// let timeouts = Timeouts::default()
///     .step(Duration::from_secs(5))
///     .run(Duration::from_secs(600));
/// assert_eq!(timeouts.step_timeout(), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeouts {
    step: Duration,
    exit: Duration,
    join: Duration,
    line: Duration,
    kill_grace: Duration,
    run: Option<Duration>,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            step: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
            exit: Duration::from_secs(DEFAULT_EXIT_TIMEOUT_SECS),
            join: Duration::from_secs(DEFAULT_JOIN_TIMEOUT_SECS),
            line: Duration::from_millis(DEFAULT_LINE_TIMEOUT_MILLIS),
            kill_grace: Duration::from_secs(DEFAULT_KILL_GRACE_SECS),
            run: None,
        }
    }
}

impl Timeouts {
    /// Defaults with overrides from `PROCPILOT_STEP_TIMEOUT`, `PROCPILOT_EXIT_TIMEOUT`,
    /// `PROCPILOT_JOIN_TIMEOUT` and `PROCPILOT_KILL_GRACE` (seconds, decimals allowed).
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut timeouts = Self::default();
        let slots: [(&str, &mut Duration); 4] = [
            ("PROCPILOT_STEP_TIMEOUT", &mut timeouts.step),
            ("PROCPILOT_EXIT_TIMEOUT", &mut timeouts.exit),
            ("PROCPILOT_JOIN_TIMEOUT", &mut timeouts.join),
            ("PROCPILOT_KILL_GRACE", &mut timeouts.kill_grace),
        ];
        for (key, slot) in slots {
            let Some(raw) = lookup(key) else { continue };
            match parse_seconds(&raw) {
                Some(d) => *slot = d,
                None => warn!(key, value = %raw, "ignoring invalid timeout override"),
            }
        }
        timeouts
    }

    /// Default timeout for scenario steps and the final end-of-stream wait.
    pub fn step(mut self, timeout: Duration) -> Self {
        self.step = timeout;
        self
    }

    /// How long to wait for process exit once output has closed.
    pub fn exit(mut self, timeout: Duration) -> Self {
        self.exit = timeout;
        self
    }

    /// How long to wait for stream readers after the process exited.
    pub fn join(mut self, timeout: Duration) -> Self {
        self.join = timeout;
        self
    }

    /// How often a stream reader with no complete line wakes up.
    ///
    /// This is a polling interval, not a failure bound: a quiet stream keeps
    /// being read. The run and join timeouts limit how long a run can last.
    pub fn line(mut self, timeout: Duration) -> Self {
        self.line = timeout;
        self
    }

    /// Delay between the graceful and the forced termination signal.
    pub fn kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// End-to-end bound on a whole run, scenario or multiplexer. The child is
    /// killed when it expires.
    pub fn run(mut self, timeout: Duration) -> Self {
        self.run = Some(timeout);
        self
    }

    /// Step timeout
    pub fn step_timeout(&self) -> Duration {
        self.step
    }

    /// Exit timeout
    pub fn exit_timeout(&self) -> Duration {
        self.exit
    }

    /// Join timeout
    pub fn join_timeout(&self) -> Duration {
        self.join
    }

    /// Line read wakeup interval
    pub fn line_timeout(&self) -> Duration {
        self.line
    }

    /// Kill grace period
    pub fn kill_grace_period(&self) -> Duration {
        self.kill_grace
    }

    /// End-to-end run bound, if any
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run
    }
}

fn parse_seconds(raw: &str) -> Option<Duration> {
    let secs: f64 = raw.trim().parse().ok()?;
    Duration::try_from_secs_f64(secs).ok()
}
