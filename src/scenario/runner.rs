//! Drives a spawned process through a scenario

use crate::command::{Command, Secret, ELEVATION_PROMPT};
use crate::config::Timeouts;
use crate::pattern::Pattern;
use crate::registry::ActivityRegistry;
use crate::result::{Error, MatchOutcome, MatchResult, ScenarioResult};
use crate::scenario::step::ScenarioStep;
use crate::scenario::transcript::{redact, Recorder, MASK_PLACEHOLDER};
use crate::scenario::Scenario;
use crate::session::{Interact, SessionBuilder};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// How the child's standard streams are attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Driver {
    /// A pseudo-terminal, for programs that only prompt on a terminal.
    #[default]
    Pty,
    /// Plain pipes, stdout and stderr merged for matching.
    Pipes,
}

/// Lifecycle of one scenario run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioState {
    /// Nothing spawned yet.
    Idle,
    /// Child is running, no step awaited yet.
    Spawned,
    /// Waiting for the patterns of this step.
    AwaitingStep(usize),
    /// Sending the response of this step.
    Responding(usize),
    /// All steps done, waiting for the child to close its output.
    AwaitingFinalEof,
    /// Terminal state.
    Closed {
        /// Whether the run succeeded.
        success: bool,
    },
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScenarioState::Idle => f.write_str("idle"),
            ScenarioState::Spawned => f.write_str("spawned"),
            ScenarioState::AwaitingStep(i) => write!(f, "awaiting step {i}"),
            ScenarioState::Responding(i) => write!(f, "responding to step {i}"),
            ScenarioState::AwaitingFinalEof => f.write_str("awaiting end of output"),
            ScenarioState::Closed { success: true } => f.write_str("closed (success)"),
            ScenarioState::Closed { success: false } => f.write_str("closed (failure)"),
        }
    }
}

fn transition(from: ScenarioState, to: ScenarioState) -> ScenarioState {
    debug!(from = %from, to = %to, "scenario state");
    to
}

/// Answers the elevation wrapper's prompt at most once per run.
struct Elevation<'a> {
    watch: bool,
    secret: Option<&'a Secret>,
    answered: bool,
}

impl Elevation<'_> {
    /// Patterns to wait for: `patterns` plus the elevation prompt when watched.
    fn extend(&self, patterns: &[Pattern]) -> Vec<Pattern> {
        let mut all = patterns.to_vec();
        if self.watch {
            all.push(Pattern::literal(ELEVATION_PROMPT));
        }
        all
    }

    async fn answer<I>(&mut self, session: &mut I) -> Result<(), Error>
    where
        I: Interact + ?Sized,
    {
        let secret = self.secret.ok_or(Error::ElevationSecretMissing)?;
        if self.answered {
            return Err(Error::ElevationRejected);
        }
        self.answered = true;
        debug!(secret = MASK_PLACEHOLDER, "answering elevation prompt");
        session.send_line(secret.expose()).await
    }
}

/// Runs [`Scenario`]s against commands.
///
/// Only [`Error::Spawn`] and [`Error::MalformedScenario`] are returned as
/// errors. Everything that goes wrong after spawn (a step timing out, the
/// child closing its output early, a non-zero exit) is an unsuccessful
/// [`ScenarioResult`] whose message names the step.
///
/// # Examples
///
/// ```no_run
/// use procpilot::{Command, Scenario, ScenarioRunner, ScenarioStep, Secret};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), procpilot::Error> {
/// let scenario = Scenario::new()
///     .step(ScenarioStep::expect("Enter new UNIX password:").respond("n3w"))
///     .step(ScenarioStep::expect("Retype new UNIX password:").respond("n3w"))
///     .mask([0, 1]);
///
/// let result = ScenarioRunner::new()
///     .run(
///         &Command::new("passwd").arg("backup").elevated(true),
///         &scenario,
///         Some(&Secret::new("admin-password")),
///     )
///     .await?;
/// assert!(!result.transcript.contains("n3w"));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScenarioRunner {
    timeouts: Timeouts,
    driver: Driver,
    session: SessionBuilder,
    registry: Option<ActivityRegistry>,
}

impl ScenarioRunner {
    /// Runner with default timeouts on a PTY.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use these timeouts. The step timeout is the default for steps without
    /// their own.
    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Attach the child through a PTY or pipes.
    pub fn driver(mut self, driver: Driver) -> Self {
        self.driver = driver;
        self
    }

    /// Session options (buffer size, ANSI stripping, PTY size).
    ///
    /// The builder's timeout and kill grace are ignored in favour of
    /// [`Timeouts`].
    pub fn session(mut self, session: SessionBuilder) -> Self {
        self.session = session;
        self
    }

    /// Report runs to `registry` while they are in flight.
    pub fn registry(mut self, registry: ActivityRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Spawn `command` and drive it through `scenario`.
    ///
    /// When the command is wrapped for elevation, the wrapper's prompt is
    /// watched during every step and answered with `secret`.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedScenario`] before anything is spawned, or
    /// [`Error::Spawn`] if the process cannot be started.
    pub async fn run(
        &self,
        command: &Command,
        scenario: &Scenario,
        secret: Option<&Secret>,
    ) -> Result<ScenarioResult, Error> {
        scenario.validate()?;
        let (argv, elevated) = command.spawn_argv(ELEVATION_PROMPT);
        let builder = self
            .session
            .clone()
            .kill_grace(self.timeouts.kill_grace_period());

        info!(
            command = %command,
            driver = ?self.driver,
            elevated,
            steps = scenario.steps().len(),
            "running scenario"
        );
        let result = match self.driver {
            Driver::Pty => {
                let mut session = builder.spawn_argv(command, &argv).map_err(spawn_error)?;
                self.supervise(command, &mut session, scenario, secret, elevated)
                    .await
            }
            Driver::Pipes => {
                let mut session = builder
                    .spawn_pipes_argv(command, &argv)
                    .map_err(spawn_error)?;
                self.supervise(command, &mut session, scenario, secret, elevated)
                    .await
            }
        };
        Ok(result)
    }

    /// Drive an already spawned session through `scenario`.
    ///
    /// No elevation prompt is watched; `secret` is only used for redaction.
    ///
    /// # Errors
    ///
    /// [`Error::MalformedScenario`] if the scenario is invalid.
    pub async fn drive<I>(
        &self,
        session: &mut I,
        scenario: &Scenario,
        secret: Option<&Secret>,
    ) -> Result<ScenarioResult, Error>
    where
        I: Interact + ?Sized,
    {
        scenario.validate()?;
        let elevation = Elevation {
            watch: false,
            secret,
            answered: false,
        };
        Ok(self.execute(session, scenario, elevation).await)
    }

    /// Apply the overall run bound, if any, around the state machine.
    async fn supervise<I>(
        &self,
        command: &Command,
        session: &mut I,
        scenario: &Scenario,
        secret: Option<&Secret>,
        elevated: bool,
    ) -> ScenarioResult
    where
        I: Interact + ?Sized,
    {
        let _activity = self
            .registry
            .as_ref()
            .map(|r| r.begin(command.to_string(), session.pid()));
        let elevation = Elevation {
            watch: elevated,
            secret,
            answered: false,
        };

        let Some(limit) = self.timeouts.run_timeout() else {
            return self.execute(session, scenario, elevation).await;
        };
        if let Ok(result) =
            tokio::time::timeout(limit, self.execute(session, scenario, elevation)).await
        {
            return result;
        }

        let message = format!("run exceeded {limit:?}, killed");
        error!(command = %command, "{message}");
        if let Err(e) = session.terminate(true).await {
            warn!(error = %e, "terminate failed");
        }
        let transcript = redact(
            &String::from_utf8_lossy(session.transcript()),
            &secrets(scenario, secret)
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>(),
        );
        ScenarioResult {
            success: false,
            transcript,
            termination: session.wait_exit(Duration::ZERO).await.ok().flatten(),
            failed_step: None,
            message: Some(message),
        }
    }

    /// The state machine proper: every step in order, then end of output,
    /// then exit.
    async fn execute<I>(
        &self,
        session: &mut I,
        scenario: &Scenario,
        mut elevation: Elevation<'_>,
    ) -> ScenarioResult
    where
        I: Interact + ?Sized,
    {
        let mut recorder = Recorder::new(scenario.mode(), secrets(scenario, elevation.secret));
        let mut state = transition(ScenarioState::Idle, ScenarioState::Spawned);

        for (index, step) in scenario.steps().iter().enumerate() {
            state = transition(state, ScenarioState::AwaitingStep(index));
            let timeout = step
                .timeout_override()
                .unwrap_or_else(|| self.timeouts.step_timeout());

            let waited =
                await_step(session, index, step, timeout, &mut elevation, &mut recorder).await;
            let matched = match waited {
                Ok(m) => m,
                Err(e) => return fail(session, state, recorder, Some(index), e).await,
            };
            debug!(
                step = index,
                pattern = matched.pattern_index,
                matched = %matched.matched,
                "step matched"
            );
            recorder.matched(&matched);

            if let Some(response) = step.response() {
                state = transition(state, ScenarioState::Responding(index));
                let masked = scenario.is_masked(index);
                debug!(
                    step = index,
                    response = if masked { MASK_PLACEHOLDER } else { response },
                    "sending response"
                );
                match session.send_line(response).await {
                    Ok(()) => {}
                    Err(Error::BrokenPipe) => {
                        warn!(step = index, "child closed its input before the response")
                    }
                    Err(e) => warn!(step = index, error = %e, "could not send response"),
                }
                recorder.sent(response, masked);
            }
        }

        state = transition(state, ScenarioState::AwaitingFinalEof);
        let final_wait = self.timeouts.step_timeout();
        if let Err(e) = await_eof(session, final_wait, &mut elevation, &mut recorder).await {
            return fail(session, state, recorder, None, e).await;
        }

        let termination = match session.wait_exit(self.timeouts.exit_timeout()).await {
            Ok(Some(t)) => t,
            Ok(None) => {
                let e = Error::ExitTimeout(self.timeouts.exit_timeout());
                return fail(session, state, recorder, None, e).await;
            }
            Err(e) => return fail(session, state, recorder, None, e).await,
        };

        let success = termination.success();
        transition(state, ScenarioState::Closed { success });
        info!(success, termination = %termination, "scenario finished");
        ScenarioResult {
            success,
            transcript: recorder.finish(session.transcript()),
            message: (!success).then(|| format!("process {termination}")),
            termination: Some(termination),
            failed_step: None,
        }
    }
}

/// Wait for one step, answering the elevation prompt if it shows up first.
async fn await_step<I>(
    session: &mut I,
    index: usize,
    step: &ScenarioStep,
    timeout: Duration,
    elevation: &mut Elevation<'_>,
    recorder: &mut Recorder,
) -> Result<MatchResult, Error>
where
    I: Interact + ?Sized,
{
    let patterns = elevation.extend(step.patterns());
    let started = Instant::now();
    let deadline = started + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match session.wait_for(&patterns, remaining).await? {
            MatchOutcome::Matched(m) if m.pattern_index >= step.patterns().len() => {
                recorder.matched(&m);
                elevation.answer(session).await?;
            }
            MatchOutcome::Matched(m) => return Ok(m),
            MatchOutcome::EndOfStream { before } => {
                recorder.unmatched(&before);
                return Err(Error::UnexpectedEndOfStream {
                    step: index,
                    pattern: step.describe(),
                });
            }
            MatchOutcome::Timeout { before, .. } => {
                recorder.unmatched(&before);
                return Err(Error::StepTimeout {
                    step: index,
                    elapsed: started.elapsed(),
                    pattern: step.describe(),
                });
            }
        }
    }
}

/// Wait for the child to close its output after the last step.
async fn await_eof<I>(
    session: &mut I,
    timeout: Duration,
    elevation: &mut Elevation<'_>,
    recorder: &mut Recorder,
) -> Result<(), Error>
where
    I: Interact + ?Sized,
{
    let patterns = elevation.extend(&[]);
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match session.wait_for(&patterns, remaining).await? {
            MatchOutcome::Matched(m) => {
                recorder.matched(&m);
                elevation.answer(session).await?;
            }
            MatchOutcome::EndOfStream { before } => {
                recorder.unmatched(&before);
                return Ok(());
            }
            MatchOutcome::Timeout { before, .. } => {
                recorder.unmatched(&before);
                return Err(Error::ExitTimeout(timeout));
            }
        }
    }
}

/// Terminate the child and build the failed result.
async fn fail<I>(
    session: &mut I,
    state: ScenarioState,
    recorder: Recorder,
    failed_step: Option<usize>,
    error: Error,
) -> ScenarioResult
where
    I: Interact + ?Sized,
{
    let message = error.to_string();
    error!(state = %state, "{message}");
    if let Err(e) = session.terminate(false).await {
        warn!(error = %e, "terminate failed");
    }
    let termination = session.wait_exit(Duration::ZERO).await.ok().flatten();
    transition(state, ScenarioState::Closed { success: false });

    ScenarioResult {
        success: false,
        transcript: recorder.finish(session.transcript()),
        termination,
        failed_step,
        message: Some(message),
    }
}

/// Every string that must not appear in a transcript.
fn secrets(scenario: &Scenario, secret: Option<&Secret>) -> Vec<String> {
    scenario
        .steps()
        .iter()
        .enumerate()
        .filter(|(index, _)| scenario.is_masked(*index))
        .filter_map(|(_, step)| step.response().map(str::to_string))
        .chain(secret.map(|s| s.expose().to_string()))
        .collect()
}

fn spawn_error(e: Error) -> Error {
    match e {
        Error::Spawn(_) => e,
        other => Error::Spawn(other.to_string()),
    }
}
