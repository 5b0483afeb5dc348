//! End-to-end tests for scenario runs and realtime stream capture

use procpilot::{
    is_privileged, ActivityRegistry, CollectingSink, Command, Driver, Error, Pattern, Scenario,
    ScenarioRunner, ScenarioStep, StreamMultiplexer, StreamSelector, Termination, Timeouts,
    TranscriptMode, MASK_PLACEHOLDER,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn scratch_file(tag: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("procpilot-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_file(&path);
    path
}

#[tokio::test]
async fn test_password_prompt_scenario() {
    init_tracing();
    let command = Command::shell("printf 'Enter password: '; read pw; echo OK");
    let scenario = Scenario::new().step(
        ScenarioStep::expect("Enter password:")
            .respond("secret")
            .timeout(Duration::from_secs(5)),
    );

    for driver in [Driver::Pty, Driver::Pipes] {
        let result = ScenarioRunner::new()
            .driver(driver)
            .run(&command, &scenario, None)
            .await
            .expect("run failed");

        assert!(result.success, "{driver:?}: {:?}", result.message);
        assert!(result.transcript.contains("OK"), "{driver:?}: {}", result.transcript);
        assert_eq!(result.termination, Some(Termination::Exited(0)));
    }
}

#[tokio::test]
async fn test_step_timeout_fails_within_bound() {
    init_tracing();
    let scenario = Scenario::new()
        .step(ScenarioStep::expect("never printed").timeout(Duration::from_secs(1)));

    let started = Instant::now();
    let result = ScenarioRunner::new()
        .run(&Command::new("sleep").arg("10"), &scenario, None)
        .await
        .expect("run failed");
    let elapsed = started.elapsed();

    assert!(!result.success);
    assert_eq!(result.failed_step, Some(0));
    let message = result.message.expect("failure message");
    assert!(message.contains("timeout"), "{message}");
    assert!(message.contains("Step 0"), "{message}");
    assert!(elapsed >= Duration::from_secs(1), "took {elapsed:?}");
    assert!(elapsed < Duration::from_secs(6), "took {elapsed:?}");
}

#[tokio::test]
async fn test_end_of_stream_before_steps_done() {
    let scenario = Scenario::new()
        .step(ScenarioStep::expect("first"))
        .step(ScenarioStep::expect("second").timeout(Duration::from_secs(5)));

    let result = ScenarioRunner::new()
        .driver(Driver::Pipes)
        .run(&Command::shell("echo first"), &scenario, None)
        .await
        .expect("run failed");

    assert!(!result.success);
    assert_eq!(result.failed_step, Some(1));
    assert!(result
        .message
        .expect("failure message")
        .contains("end of stream"));
}

#[tokio::test]
async fn test_response_to_closed_input_is_not_fatal() {
    let command = Command::shell("exec 0<&-; printf 'Name: '; sleep 0.3; echo done");
    let scenario = Scenario::new()
        .step(
            ScenarioStep::expect("Name:")
                .respond("ops")
                .timeout(Duration::from_secs(5)),
        )
        .step(ScenarioStep::expect("done").timeout(Duration::from_secs(5)));

    let result = ScenarioRunner::new()
        .driver(Driver::Pipes)
        .run(&command, &scenario, None)
        .await
        .expect("run failed");

    assert!(result.success, "{:?}", result.message);
    assert_eq!(result.termination, Some(Termination::Exited(0)));
}

#[tokio::test]
async fn test_masked_response_delivered_but_not_recorded() {
    let captured = scratch_file("masked");
    let command = Command::shell(format!(
        "printf 'Password: '; read pw; printf '%s' \"$pw\" > '{}'; echo stored",
        captured.display()
    ));
    let scenario = Scenario::new()
        .step(
            ScenarioStep::expect("Password:")
                .respond("hunter2-xyz")
                .timeout(Duration::from_secs(5)),
        )
        .mask([0]);

    for mode in [TranscriptMode::Full, TranscriptMode::Steps] {
        let result = ScenarioRunner::new()
            .run(&command, &scenario.clone().transcript_mode(mode), None)
            .await
            .expect("run failed");

        assert!(result.success, "{mode:?}: {:?}", result.message);
        assert!(!result.transcript.contains("hunter2-xyz"), "{mode:?}");
        assert!(result.transcript.contains(MASK_PLACEHOLDER), "{mode:?}");

        let received = std::fs::read_to_string(&captured).expect("child output file");
        assert_eq!(received, "hunter2-xyz");
        let _ = std::fs::remove_file(&captured);
    }
}

#[tokio::test]
async fn test_alternative_patterns_in_one_step() {
    let command =
        Command::shell("printf 'Overwrite existing file? [y/N] '; read a; echo \"answer=$a\"");
    let scenario = Scenario::new()
        .step(
            ScenarioStep::expect_any([
                Pattern::literal("Proceed?"),
                Pattern::regex(r"(?i)overwrite.*\[y/n\]").expect("regex"),
            ])
            .respond("y")
            .timeout(Duration::from_secs(5)),
        )
        .step(ScenarioStep::expect("answer=y").timeout(Duration::from_secs(5)));

    let result = ScenarioRunner::new()
        .driver(Driver::Pipes)
        .run(&command, &scenario, None)
        .await
        .expect("run failed");
    assert!(result.success, "{:?}", result.message);
}

#[tokio::test]
async fn test_nonzero_exit_after_steps() {
    let scenario = Scenario::new().step(ScenarioStep::expect("working"));
    let result = ScenarioRunner::new()
        .driver(Driver::Pipes)
        .run(&Command::shell("echo working; exit 3"), &scenario, None)
        .await
        .expect("run failed");

    assert!(!result.success);
    assert_eq!(result.termination, Some(Termination::Exited(3)));
    assert_eq!(result.failed_step, None);
}

#[tokio::test]
async fn test_malformed_scenario_spawns_nothing() {
    let marker = scratch_file("malformed");
    let command = Command::shell(format!("touch '{}'", marker.display()));

    let scenario = Scenario::from_json(r#"[["ok"]]"#)
        .expect("valid json")
        .step(ScenarioStep::expect(""));

    let err = ScenarioRunner::new()
        .run(&command, &scenario, None)
        .await
        .expect_err("malformed scenario must be rejected");

    assert!(matches!(err, Error::MalformedScenario { step: 1, .. }));
    assert!(!marker.exists());
}

#[tokio::test]
async fn test_spawn_error_is_returned() {
    let err = ScenarioRunner::new()
        .driver(Driver::Pipes)
        .run(
            &Command::new("/nonexistent/procpilot-missing"),
            &Scenario::new(),
            None,
        )
        .await
        .expect_err("spawn must fail");
    assert!(matches!(err, Error::Spawn(_)));
}

#[tokio::test]
async fn test_registry_tracks_run() {
    let registry = ActivityRegistry::new();
    let runner = ScenarioRunner::new()
        .driver(Driver::Pipes)
        .registry(registry.clone());

    let watcher = registry.clone();
    let check = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        watcher.active()
    });

    let result = runner
        .run(&Command::shell("sleep 1"), &Scenario::new(), None)
        .await
        .expect("run failed");
    assert!(result.success);

    let seen = check.await.expect("watcher task");
    assert_eq!(seen.len(), 1);
    assert!(seen[0].description.contains("sleep 1"));
    assert!(registry.active().is_empty());
}

#[tokio::test]
async fn test_elevated_command_runs_directly_when_privileged() {
    if !is_privileged() {
        return;
    }
    let scenario = Scenario::new().step(ScenarioStep::expect("as root"));
    let result = ScenarioRunner::new()
        .driver(Driver::Pipes)
        .run(&Command::shell("echo as root").elevated(true), &scenario, None)
        .await
        .expect("run failed");
    assert!(result.success, "{:?}", result.message);
}

#[tokio::test]
async fn test_multiplexer_echo_hello() {
    init_tracing();
    let sink = Arc::new(CollectingSink::new());
    let outcome = StreamMultiplexer::new()
        .run(&Command::new("echo").arg("hello"), None, sink.clone())
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.stdout_lines, ["hello"]);
    assert!(outcome.stderr_lines.is_empty());
    assert_eq!(sink.events().len(), 1);
}

#[tokio::test]
async fn test_multiplexer_preserves_order_with_delays() {
    let sink = Arc::new(CollectingSink::new());
    let outcome = StreamMultiplexer::new()
        .run(
            &Command::shell("echo A; sleep 0.2; echo B; sleep 0.2; echo C"),
            None,
            sink.clone(),
        )
        .await;

    assert!(outcome.success);
    assert_eq!(outcome.stdout_lines, ["A", "B", "C"]);
    assert!(outcome.stderr_lines.is_empty());

    let texts: Vec<String> = sink.events().into_iter().map(|e| e.text).collect();
    assert_eq!(texts, ["A", "B", "C"]);
}

#[tokio::test]
async fn test_multiplexer_events_arrive_before_exit() {
    let (sink, mut events) = procpilot::ChannelSink::new();
    let run = tokio::spawn(async move {
        StreamMultiplexer::new()
            .run(&Command::shell("echo early; sleep 2; echo late"), None, Arc::new(sink))
            .await
    });

    let first = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("first line should arrive while the child is still running")
        .expect("channel open");
    assert_eq!(first.text, "early");
    assert_eq!(first.stream, StreamSelector::Stdout);

    let outcome = run.await.expect("run task");
    assert!(outcome.success);
    assert_eq!(outcome.stdout_lines, ["early", "late"]);
}

#[tokio::test]
async fn test_multiplexer_envelope_passthrough() {
    let sink = Arc::new(CollectingSink::new());
    let outcome = StreamMultiplexer::new()
        .run(
            &Command::shell(r#"echo '{"level":"info","text":"nested"}'; echo plain"#),
            None,
            sink.clone(),
        )
        .await;
    assert!(outcome.success);

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert!(events[0].nested);
    assert_eq!(events[0].to_envelope(), r#"{"level":"info","text":"nested"}"#);
    assert!(!events[1].nested);
}

#[tokio::test]
async fn test_multiplexer_run_timeout_kills() {
    let started = Instant::now();
    let outcome = StreamMultiplexer::new()
        .timeouts(
            Timeouts::default()
                .run(Duration::from_millis(500))
                .kill_grace(Duration::from_millis(200)),
        )
        .run(
            &Command::new("sleep").arg("10"),
            None,
            Arc::new(CollectingSink::new()),
        )
        .await;

    assert!(!outcome.success);
    assert!(outcome.message.expect("message").contains("killed"));
    assert!(started.elapsed() < Duration::from_secs(8));
}

#[tokio::test]
async fn test_scenario_run_bound_kills() {
    let started = Instant::now();
    let scenario = Scenario::new().step(ScenarioStep::expect("ready"));
    let result = ScenarioRunner::new()
        .driver(Driver::Pipes)
        .timeouts(Timeouts::default().run(Duration::from_millis(500)))
        .run(&Command::shell("echo ready; sleep 10"), &scenario, None)
        .await
        .expect("run failed");

    assert!(!result.success);
    assert!(result.message.expect("message").contains("killed"));
    assert!(result.transcript.contains("ready"));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_multiplexer_join_timeout() {
    let started = Instant::now();
    let outcome = StreamMultiplexer::new()
        .timeouts(Timeouts::default().join(Duration::from_millis(500)))
        .run(
            &Command::shell("sleep 3 & echo hi"),
            None,
            Arc::new(CollectingSink::new()),
        )
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.stdout_lines, ["hi"]);
    let message = outcome.message.expect("message");
    assert!(message.contains("did not finish within 500ms"), "{message}");
    assert!(started.elapsed() < Duration::from_secs(3));
}

#[tokio::test]
async fn test_multiplexer_exit_timeout_after_output_closed() {
    let started = Instant::now();
    let outcome = StreamMultiplexer::new()
        .timeouts(
            Timeouts::default()
                .exit(Duration::from_millis(300))
                .kill_grace(Duration::from_millis(200)),
        )
        .run(
            &Command::shell("echo x; exec >&- 2>&-; sleep 5"),
            None,
            Arc::new(CollectingSink::new()),
        )
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.stdout_lines, ["x"]);
    let message = outcome.message.expect("message");
    assert!(message.contains("did not exit within 300ms"), "{message}");
    assert!(matches!(outcome.termination, Some(Termination::Signaled(_))));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn test_multiplexer_silent_stderr_does_not_block_stdout() {
    let (sink, mut events) = procpilot::ChannelSink::new();
    // the background sleep keeps stderr open and silent while stdout flows
    let command = Command::shell("sleep 2 >/dev/null & echo out1; sleep 0.2; echo out2");
    let run = tokio::spawn(async move {
        StreamMultiplexer::new()
            .run(&command, None, Arc::new(sink))
            .await
    });

    for expected in ["out1", "out2"] {
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("stdout line should not wait for stderr")
            .expect("channel open");
        assert_eq!(event.text, expected);
        assert_eq!(event.stream, StreamSelector::Stdout);
    }

    let outcome = run.await.expect("run task");
    assert!(outcome.success, "{:?}", outcome.message);
    assert_eq!(outcome.stdout_lines, ["out1", "out2"]);
    assert!(outcome.stderr_lines.is_empty());
}

#[tokio::test]
async fn test_scenario_from_json() -> anyhow::Result<()> {
    let scenario = Scenario::from_json(
        r#"{
            "steps": [
                ["login: ", "operator", 5],
                [[{"glob": "Pass*"}, "passphrase"], "letmein-42", 5]
            ],
            "mask": [1],
            "transcript": "steps"
        }"#,
    )?;
    let command = Command::shell(
        "printf 'login: '; read u; printf 'Password: '; read p; echo \"welcome $u\"",
    );

    let result = ScenarioRunner::new()
        .driver(Driver::Pipes)
        .run(&command, &scenario, None)
        .await?;

    assert!(result.success, "{:?}", result.message);
    assert!(result.transcript.contains("operator"));
    assert!(result.transcript.contains("welcome operator"));
    assert!(!result.transcript.contains("letmein-42"));
    Ok(())
}
