//! End-to-end sessions against fake consoles run through `sh -c`.

#![cfg(unix)]

use std::time::{Duration, Instant};

use consolebot::{
    ExitOutcome, FailureKind, IoStrategy, Pattern, Report, Script, ScriptBuilder, SessionBuilder,
    SessionState,
};

const STRATEGIES: [IoStrategy; 2] = [IoStrategy::Threaded, IoStrategy::Async];

fn fake(strategy: IoStrategy, script: &str) -> SessionBuilder {
    SessionBuilder::new("sh")
        .args(["-c", script])
        .strategy(strategy)
        .step_timeout(Duration::from_secs(5))
        .session_timeout(Duration::from_secs(15))
        .drain_grace(Duration::from_millis(200))
}

async fn run(strategy: IoStrategy, console: &str, script: &Script) -> Report {
    fake(strategy, console).run(script).await
}

/// Whether `pid` is a live (non-zombie) process.
fn is_alive(pid: u32) -> bool {
    #[cfg(target_os = "linux")]
    {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            // The state follows the parenthesised command name.
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next())
                .is_some_and(|state| state != 'Z' && state != 'X'),
            Err(_) => false,
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        std::process::Command::new("sh")
            .args(["-c", &format!("kill -0 {pid} 2>/dev/null")])
            .status()
            .is_ok_and(|status| status.success())
    }
}

async fn wait_until_dead(pid: u32) -> bool {
    for _ in 0..100 {
        if !is_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

const READY_SHUTDOWN_BYE: &str = r#"
echo ready
while read cmd; do
    if [ "$cmd" = shutdown ]; then
        echo bye
        exit 0
    fi
done
exit 1
"#;

const SAY_ECHO: &str = r#"
echo '> '
while read line; do
    case "$line" in
        "say "*) echo "You say: ${line#say }" ;;
        *) echo "Say what?" ;;
    esac
done
"#;

#[tokio::test]
async fn test_ready_shutdown_bye_passes() {
    let script = ScriptBuilder::new()
        .expect("ready")
        .send("shutdown")
        .expect("bye")
        .build();

    for strategy in STRATEGIES {
        let report = run(strategy, READY_SHUTDOWN_BYE, &script).await;
        assert!(report.passed(), "{strategy:?}: {report}");
        assert_eq!(report.state, SessionState::Exited(0));
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.exit(), Some(ExitOutcome::Code(0)));
        assert_eq!(report.transcript(), "ready\nbye\n");
        assert_eq!(report.steps.len(), 3);
        assert!(report.steps.iter().all(|s| s.is_success()));
    }
}

#[tokio::test]
async fn test_say_echo_passes() {
    let script = ScriptBuilder::new()
        .expect("> ")
        .send("say Hello")
        .expect("You say: Hello")
        .send("dance")
        .expect("Say what?")
        .build();

    for strategy in STRATEGIES {
        let report = run(strategy, SAY_ECHO, &script).await;
        assert!(report.passed(), "{strategy:?}: {report}");
        assert_eq!(report.steps[2].output, "\nYou say: Hello");
    }
}

#[tokio::test]
async fn test_missing_echo_is_step_timeout() {
    let script = ScriptBuilder::new()
        .expect("> ")
        .send("say Hello")
        .expect("You say: Hello")
        .within(Duration::from_millis(300))
        .build();
    let silent = "echo '> '; while read line; do :; done";

    for strategy in STRATEGIES {
        let started = Instant::now();
        let report = run(strategy, silent, &script).await;

        assert_eq!(
            report.state,
            SessionState::Failed(FailureKind::StepTimeout),
            "{strategy:?}: {report}"
        );
        assert!(started.elapsed() < Duration::from_secs(3));

        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.step, Some(2));
        assert_eq!(failure.pattern.as_deref(), Some("\"You say: Hello\""));
        assert_eq!(report.exit(), Some(ExitOutcome::Killed));
        assert_eq!(report.transcript(), "> \n");
        assert_eq!(report.exit_code(), 1);
    }
}

#[tokio::test]
async fn test_hung_process_is_killed() {
    let script = ScriptBuilder::new()
        .expect("never printed")
        .within(Duration::from_millis(200))
        .build();

    for strategy in STRATEGIES {
        let started = Instant::now();
        let report = run(strategy, "echo started; exec sleep 30", &script).await;

        assert_eq!(report.failure_kind(), Some(FailureKind::StepTimeout));
        assert!(started.elapsed() < Duration::from_secs(3), "{strategy:?}");

        let pid = report.process.as_ref().and_then(|p| p.pid).unwrap();
        assert!(wait_until_dead(pid).await, "{strategy:?}: pid {pid} leaked");
    }
}

#[tokio::test]
async fn test_exit_before_match_is_unexpected_eof() {
    let script = ScriptBuilder::new().expect("partial").expect("bye").build();

    for strategy in STRATEGIES {
        let started = Instant::now();
        let report = run(strategy, "echo partial output", &script).await;

        assert_eq!(
            report.state,
            SessionState::Failed(FailureKind::UnexpectedEof),
            "{strategy:?}: {report}"
        );
        // Well inside the 5s step timeout.
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(report.failure.as_ref().unwrap().step, Some(1));
        assert_eq!(report.transcript(), "partial output\n");
    }
}

#[tokio::test]
async fn test_matching_is_forward_only() {
    let console = "printf AABB; cat >/dev/null";

    let in_order = ScriptBuilder::new().expect("AA").expect("BB").build();
    let overlapping = ScriptBuilder::new()
        .expect("AA")
        .expect("AB")
        .within(Duration::from_millis(200))
        .build();

    for strategy in STRATEGIES {
        let report = run(strategy, console, &in_order).await;
        assert!(report.passed(), "{strategy:?}: {report}");

        let report = run(strategy, console, &overlapping).await;
        assert_eq!(report.failure_kind(), Some(FailureKind::StepTimeout));
        assert_eq!(report.failure.as_ref().unwrap().step, Some(1));
    }
}

#[tokio::test]
async fn test_nonzero_exit() {
    let script = ScriptBuilder::new().send("go").build();

    for strategy in STRATEGIES {
        let report = run(strategy, "read x; exit 3", &script).await;

        assert_eq!(report.state, SessionState::Exited(3), "{strategy:?}");
        assert_eq!(report.failure_kind(), Some(FailureKind::ProcessExitNonZero));
        assert!(!report.passed());
        assert_eq!(report.exit_code(), 1);
    }
}

#[tokio::test]
async fn test_session_timeout_kills() {
    let script = ScriptBuilder::new().expect("up").build();

    for strategy in STRATEGIES {
        let report = fake(strategy, "echo up; exec sleep 30")
            .session_timeout(Duration::from_millis(400))
            .run(&script)
            .await;

        assert_eq!(report.state, SessionState::Killed, "{strategy:?}: {report}");
        assert_eq!(report.failure_kind(), Some(FailureKind::SessionTimeout));
        assert_eq!(report.exit(), Some(ExitOutcome::Killed));

        let pid = report.process.as_ref().and_then(|p| p.pid).unwrap();
        assert!(wait_until_dead(pid).await);
    }
}

#[tokio::test]
async fn test_session_deadline_cuts_expect_short() {
    let script = ScriptBuilder::new().expect("never").build();

    for strategy in STRATEGIES {
        let started = Instant::now();
        let report = fake(strategy, "exec sleep 30")
            .step_timeout(Duration::from_secs(10))
            .session_timeout(Duration::from_millis(300))
            .run(&script)
            .await;

        assert_eq!(report.failure_kind(), Some(FailureKind::StepTimeout));
        assert!(started.elapsed() < Duration::from_secs(3), "{strategy:?}");
    }
}

#[tokio::test]
async fn test_executable_not_found() {
    let script = ScriptBuilder::new().expect("x").build();
    let report = SessionBuilder::new("/definitely/not/a/console")
        .run(&script)
        .await;

    assert_eq!(
        report.state,
        SessionState::Failed(FailureKind::ExecutableNotFound)
    );
    assert!(report.process.is_none());
    assert_eq!(report.exit_code(), 1);
}

#[tokio::test]
async fn test_pattern_split_across_writes() {
    let console = "printf 'You sa'; sleep 0.2; printf 'y: Hel'; sleep 0.2; printf 'lo\\n'";
    let script = ScriptBuilder::new().expect("You say: Hello").build();

    for strategy in STRATEGIES {
        let report = run(strategy, console, &script).await;
        assert!(report.passed(), "{strategy:?}: {report}");
    }
}

#[tokio::test]
async fn test_invalid_utf8_is_replaced() {
    let script = ScriptBuilder::new()
        .expect("bad \u{FFFD} byte")
        .build();

    for strategy in STRATEGIES {
        let report = run(strategy, "printf 'bad \\377 byte\\n'", &script).await;
        assert!(report.passed(), "{strategy:?}: {report}");
    }
}

#[tokio::test]
async fn test_stderr_is_merged() {
    let script = ScriptBuilder::new().expect("oops").expect("done").build();

    for strategy in STRATEGIES {
        let report = run(strategy, "echo oops >&2; sleep 0.1; echo done", &script).await;
        assert!(report.passed(), "{strategy:?}: {report}");
    }
}

#[tokio::test]
async fn test_regex_expectation() {
    let script = ScriptBuilder::new()
        .expect_regex(r"There are \d+ players")
        .unwrap()
        .build();

    for strategy in STRATEGIES {
        let report = run(strategy, "echo 'There are 12 players online'", &script).await;
        assert!(report.passed(), "{strategy:?}: {report}");
    }
}

#[tokio::test]
async fn test_hidden_input_is_masked() {
    let console = r#"echo 'Password:'; read pw; [ "$pw" = hunter2 ] && echo welcome"#;
    let script = ScriptBuilder::new()
        .expect("Password:")
        .send_hidden("hunter2")
        .expect("welcome")
        .build();

    for strategy in STRATEGIES {
        let report = run(strategy, console, &script).await;
        assert!(report.passed(), "{strategy:?}: {report}");
        assert_eq!(report.steps[1].description, "send ********");
        assert!(!format!("{report:?}").contains("hunter2"));
    }
}

#[tokio::test]
async fn test_step_by_step_session() {
    for strategy in STRATEGIES {
        let mut session = fake(strategy, SAY_ECHO).start().await.unwrap();

        session.expect(&Pattern::literal("> ")).await.unwrap();
        session.send_line("say one").await.unwrap();
        let found = session
            .expect(&Pattern::regex(r"You say: \w+").unwrap())
            .await
            .unwrap();
        assert_eq!(found.matched, "You say: one");

        let report = session.finish().await;
        assert!(report.passed(), "{strategy:?}: {report}");
    }
}

#[tokio::test]
async fn test_dropping_session_kills_child() {
    for strategy in STRATEGIES {
        let mut session = fake(strategy, "echo ready; exec sleep 30")
            .start()
            .await
            .unwrap();
        session.expect(&Pattern::literal("ready")).await.unwrap();
        let pid = session.id().unwrap();
        assert!(is_alive(pid));

        drop(session);
        assert!(wait_until_dead(pid).await, "{strategy:?}: pid {pid} leaked");
    }
}

#[tokio::test]
async fn test_long_regex_match_across_writes() {
    let console = "printf 'BEGIN '; sleep 0.1; printf '%3000s' '' | tr ' ' x; sleep 0.1; printf ' END\\n'";
    for strategy in STRATEGIES {
        let mut session = fake(strategy, console).start().await.unwrap();
        let found = session
            .expect(&Pattern::regex(r"BEGIN x+ END").unwrap())
            .await
            .unwrap();
        assert_eq!(found.matched.len(), "BEGIN ".len() + 3000 + " END".len());

        let report = session.finish().await;
        assert!(report.passed(), "{strategy:?}: {report}");
    }
}

#[tokio::test]
async fn test_send_after_exit_is_not_a_failure() {
    for strategy in STRATEGIES {
        let mut session = fake(strategy, "echo ready; exit 0").start().await.unwrap();
        session.expect(&Pattern::literal("ready")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        session.send_line("hello").await.unwrap();
        session.send_line("again").await.unwrap();
        assert_eq!(session.state(), SessionState::Running);

        let report = session.finish().await;
        assert!(report.passed(), "{strategy:?}: {report}");
        assert_eq!(report.steps.len(), 3);
    }
}

#[tokio::test]
async fn test_send_after_exit_then_expect_is_unexpected_eof() {
    for strategy in STRATEGIES {
        let mut session = fake(strategy, "echo ready; exit 0").start().await.unwrap();
        session.expect(&Pattern::literal("ready")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        session.send_line("hello").await.unwrap();

        let err = session.expect(&Pattern::literal("bye")).await.unwrap_err();
        assert_eq!(err.failure_kind(), Some(FailureKind::UnexpectedEof));

        let report = session.finish().await;
        assert_eq!(
            report.state,
            SessionState::Failed(FailureKind::UnexpectedEof),
            "{strategy:?}: {report}"
        );
        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.step, Some(2));
        assert_eq!(failure.pattern.as_deref(), Some("\"bye\""));
    }
}

#[tokio::test]
async fn test_blocked_send_is_step_timeout() {
    let script = ScriptBuilder::new()
        .expect("ready")
        .send("x".repeat(128 * 1024))
        .build();

    for strategy in STRATEGIES {
        let started = Instant::now();
        let report = fake(strategy, "echo ready; exec sleep 30")
            .step_timeout(Duration::from_millis(300))
            .run(&script)
            .await;

        assert_eq!(
            report.state,
            SessionState::Failed(FailureKind::StepTimeout),
            "{strategy:?}: {report}"
        );
        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.step, Some(1));
        assert_eq!(failure.pattern, None);
        assert!(failure.message.contains("input to be accepted"));
        assert_eq!(report.exit(), Some(ExitOutcome::Killed));
        assert!(started.elapsed() < Duration::from_secs(3), "{strategy:?}");

        let pid = report.process.as_ref().and_then(|p| p.pid).unwrap();
        assert!(wait_until_dead(pid).await, "{strategy:?}: pid {pid} leaked");
    }
}

#[tokio::test]
async fn test_kill_reaches_background_children() {
    let script = ScriptBuilder::new()
        .expect_regex(r"child \d+\n")
        .unwrap()
        .expect("never printed")
        .within(Duration::from_millis(200))
        .build();

    for strategy in STRATEGIES {
        let started = Instant::now();
        let report = run(strategy, "sleep 30 & echo \"child $!\"; wait", &script).await;
        assert_eq!(report.failure_kind(), Some(FailureKind::StepTimeout));
        assert!(started.elapsed() < Duration::from_secs(3), "{strategy:?}");

        let child: u32 = report
            .transcript()
            .trim()
            .strip_prefix("child ")
            .and_then(|pid| pid.parse().ok())
            .unwrap();
        assert!(wait_until_dead(child).await, "{strategy:?}: pid {child} leaked");
    }
}
