//! Lifecycle tests for `AgentRuntime`, driven entirely by fakes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::BufReader;
use tokio::net::TcpListener;
use uuid::Uuid;

use proctor_core::exit::AgentExitCode;
use proctor_core::options::AgentOptions;
use proctor_core::runtime::{
    AgentRuntime, DISCONNECT_GRACE_POLLS, LifecycleState, RuntimeEnv, RuntimeReport,
};
use proctor_core::transport::{HostTransportBinder, TransportKind};
use proctor_test_utils::{
    DebuggerBehavior, FakeBinder, FakeDebugger, FakeProbe, RecordingHandler, StartBehavior,
    TEST_POLL_INTERVAL, TransportLog, fake_env, write_workload,
};
use proctor_wire::{AgencyFrame, AgentFrame, read_frame, write_frame};

/// Upper bound on any single runtime in these tests.
const TEST_DEADLINE: Duration = Duration::from_secs(10);

const NO_ARGS: &[&str] = &[];

fn registration_args(extra: &[&str]) -> Vec<String> {
    let mut args = vec![
        format!("--agentId={}", Uuid::new_v4()),
        "--agencyUrl=tcp://127.0.0.1:9/Agency".to_owned(),
    ];
    args.extend(extra.iter().map(|s| (*s).to_owned()));
    args
}

async fn run(
    args: &[String],
    probe: Arc<FakeProbe>,
    debugger: Arc<FakeDebugger>,
    binder: Arc<FakeBinder>,
) -> RuntimeReport {
    let options = AgentOptions::parse(args).expect("arguments should parse");
    let runtime = AgentRuntime::new("test-agent", options, fake_env(probe, debugger, binder));
    tokio::time::timeout(TEST_DEADLINE, runtime.run())
        .await
        .expect("runtime should finish")
}

fn no_debugger() -> Arc<FakeDebugger> {
    FakeDebugger::new(DebuggerBehavior::NotImplemented)
}

// ===========================================================================
// Stop and parent death
// ===========================================================================

#[tokio::test]
async fn parent_death_during_wait_terminates_agent() {
    let probe = FakeProbe::new(true);
    let binder = FakeBinder::new(StartBehavior::Succeed);
    let options = AgentOptions::parse(registration_args(&["--pid=4321"])).unwrap();
    let runtime = AgentRuntime::new(
        "test-agent",
        options,
        fake_env(Arc::clone(&probe), no_debugger(), Arc::clone(&binder)),
    );

    let killer = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        probe.kill();
        Instant::now()
    };
    let (report, killed_at) = tokio::time::timeout(TEST_DEADLINE, async {
        tokio::join!(runtime.run(), killer)
    })
    .await
    .expect("runtime must not hang after parent death");

    assert_eq!(
        report.exit_code,
        AgentExitCode::ParentProcessTerminated.code()
    );
    // One poll interval plus scheduling slack.
    assert!(
        killed_at.elapsed() < TEST_POLL_INTERVAL * 10,
        "took {:?} to notice parent death",
        killed_at.elapsed()
    );
    assert!(report.reached(LifecycleState::ParentResolved));
    assert!(report.reached(LifecycleState::Running));
    assert!(!report.reached(LifecycleState::Stopping));
    assert_eq!(report.transitions.last(), Some(&LifecycleState::Exited));
    assert_eq!(TransportLog::count(&binder.log().shutdowns), 1);
}

#[tokio::test]
async fn stop_signal_exits_ok() {
    let binder = FakeBinder::new(StartBehavior::Succeed);
    let stop = binder.stop().clone();
    let options = AgentOptions::parse(registration_args(&[])).unwrap();
    let runtime = AgentRuntime::new(
        "test-agent",
        options,
        fake_env(FakeProbe::new(true), no_debugger(), Arc::clone(&binder)),
    );

    let stopper = async {
        tokio::time::sleep(Duration::from_millis(60)).await;
        stop.raise();
    };
    let (report, ()) = tokio::time::timeout(TEST_DEADLINE, async {
        tokio::join!(runtime.run(), stopper)
    })
    .await
    .expect("runtime should stop");

    assert_eq!(report.exit_code, AgentExitCode::Ok.code());
    assert_eq!(
        report.transitions,
        vec![
            LifecycleState::Created,
            LifecycleState::TracingInitialized,
            LifecycleState::Bound,
            LifecycleState::Running,
            LifecycleState::Stopping,
            LifecycleState::Exited,
        ]
    );
    assert!(TransportLog::count(&binder.log().waits) >= 2);
    assert_eq!(TransportLog::count(&binder.log().shutdowns), 1);
}

#[tokio::test]
async fn agent_runs_indefinitely_while_parent_lives() {
    let probe = FakeProbe::new(true);
    let binder = FakeBinder::new(StartBehavior::Succeed);
    let options = AgentOptions::parse(registration_args(&["--pid=4321"])).unwrap();
    let runtime = AgentRuntime::new(
        "test-agent",
        options,
        fake_env(Arc::clone(&probe), no_debugger(), Arc::clone(&binder)),
    );

    let outcome = tokio::time::timeout(TEST_POLL_INTERVAL * 15, runtime.run()).await;
    assert!(outcome.is_err(), "runtime should still be waiting");
    // One check in locate plus one per poll interval.
    assert!(probe.checks() >= 5, "only {} liveness checks", probe.checks());
}

#[tokio::test]
async fn no_pid_means_no_liveness_checks() {
    let probe = FakeProbe::new(false);
    let binder = FakeBinder::new(StartBehavior::Succeed);
    binder.stop().raise();

    let report = run(
        &registration_args(&[]),
        Arc::clone(&probe),
        no_debugger(),
        Arc::clone(&binder),
    )
    .await;

    assert_eq!(report.exit_code, AgentExitCode::Ok.code());
    assert_eq!(probe.checks(), 0);
    assert!(!report.reached(LifecycleState::ParentResolved));
}

// ===========================================================================
// Lost agency connection
// ===========================================================================

/// Runtime wired to a real streaming binding.
fn tcp_env(probe: Arc<FakeProbe>) -> RuntimeEnv {
    RuntimeEnv {
        probe,
        debugger: no_debugger(),
        binder: Arc::new(HostTransportBinder::new(
            TransportKind::Tcp,
            Duration::from_secs(2),
            TEST_POLL_INTERVAL,
        )),
        handler: RecordingHandler::new(),
        poll_interval: TEST_POLL_INTERVAL,
    }
}

/// Run an agent against an agency that acks the registration, calls
/// `before_close`, then closes the connection.
async fn run_against_closing_agency(
    probe: Arc<FakeProbe>,
    extra: &[&str],
    before_close: impl FnOnce(),
) -> RuntimeReport {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut args = vec![
        format!("--agentId={}", Uuid::new_v4()),
        format!("--agencyUrl=tcp://{}/Agency", listener.local_addr().unwrap()),
    ];
    args.extend(extra.iter().map(|s| (*s).to_owned()));
    let options = AgentOptions::parse(args).unwrap();
    let runtime = AgentRuntime::new("test-agent", options, tcp_env(probe));

    let agency = async move {
        let (stream, _) = listener.accept().await.expect("agent should connect");
        let (read, mut writer) = stream.into_split();
        let mut reader = BufReader::new(read);
        let register: Option<AgentFrame> = read_frame(&mut reader).await.unwrap();
        assert!(matches!(register, Some(AgentFrame::Register { .. })));
        write_frame(&mut writer, &AgencyFrame::Ack).await.unwrap();
        before_close();
    };
    let (report, ()) = tokio::time::timeout(TEST_DEADLINE, async {
        tokio::join!(runtime.run(), agency)
    })
    .await
    .expect("runtime must not hang after the agency goes away");
    report
}

#[tokio::test]
async fn agency_crash_is_parent_terminated_not_ok() {
    let probe = FakeProbe::new(true);
    let parent = Arc::clone(&probe);
    let report = run_against_closing_agency(Arc::clone(&probe), &["--pid=4321"], move || {
        parent.kill()
    })
    .await;

    assert_eq!(
        report.exit_code,
        AgentExitCode::ParentProcessTerminated.code()
    );
    assert!(report.reached(LifecycleState::Running));
    assert!(!report.reached(LifecycleState::Stopping));
}

#[tokio::test]
async fn lost_connection_without_pid_is_not_ok() {
    let probe = FakeProbe::new(true);
    let report = run_against_closing_agency(Arc::clone(&probe), NO_ARGS, || {}).await;

    assert_eq!(report.exit_code, AgentExitCode::AgencyConnectionLost.code());
    assert!(!report.reached(LifecycleState::Stopping));
    assert_eq!(probe.checks(), 0);
}

#[tokio::test]
async fn lost_connection_with_live_parent_gives_up_after_grace() {
    let probe = FakeProbe::new(true);
    let report = run_against_closing_agency(Arc::clone(&probe), &["--pid=4321"], || {}).await;

    assert_eq!(report.exit_code, AgentExitCode::AgencyConnectionLost.code());
    assert!(!report.reached(LifecycleState::Stopping));
    assert!(
        probe.checks() > DISCONNECT_GRACE_POLLS as usize,
        "only {} liveness checks",
        probe.checks()
    );
}

#[tokio::test]
async fn parent_exit_during_disconnect_grace_is_parent_terminated() {
    let probe = FakeProbe::new(true);
    let binder = FakeBinder::new(StartBehavior::Succeed);
    let options = AgentOptions::parse(registration_args(&["--pid=4321"])).unwrap();
    let mut env = fake_env(Arc::clone(&probe), no_debugger(), Arc::clone(&binder));
    // Long enough that the kill below lands inside the grace window.
    env.poll_interval = Duration::from_millis(250);
    let runtime = AgentRuntime::new("test-agent", options, env);

    let agency = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        binder.disconnected().raise();
        tokio::time::sleep(Duration::from_millis(100)).await;
        probe.kill();
    };
    let (report, ()) = tokio::time::timeout(TEST_DEADLINE, async {
        tokio::join!(runtime.run(), agency)
    })
    .await
    .expect("runtime should finish");

    assert_eq!(
        report.exit_code,
        AgentExitCode::ParentProcessTerminated.code()
    );
    assert!(!report.reached(LifecycleState::Stopping));
}

// ===========================================================================
// Transport start
// ===========================================================================

#[tokio::test]
async fn refused_start_skips_wait() {
    let binder = FakeBinder::new(StartBehavior::Refuse);
    let report = run(
        &registration_args(&[]),
        FakeProbe::new(true),
        no_debugger(),
        Arc::clone(&binder),
    )
    .await;

    assert_eq!(
        report.exit_code,
        AgentExitCode::FailedToStartRemoteAgent.code()
    );
    assert_eq!(TransportLog::count(&binder.log().starts), 1);
    assert_eq!(TransportLog::count(&binder.log().waits), 0);
    assert!(report.reached(LifecycleState::Bound));
    assert!(!report.reached(LifecycleState::Running));
}

#[tokio::test]
async fn start_error_is_unexpected_exception() {
    let binder = FakeBinder::new(StartBehavior::Error);
    let report = run(
        &registration_args(&[]),
        FakeProbe::new(true),
        no_debugger(),
        Arc::clone(&binder),
    )
    .await;

    assert_eq!(report.exit_code, AgentExitCode::UnexpectedException.code());
    assert_eq!(TransportLog::count(&binder.log().waits), 0);
}

#[tokio::test]
async fn start_panic_is_unexpected_exception() {
    let binder = FakeBinder::new(StartBehavior::Panic);
    let report = run(
        &registration_args(&[]),
        FakeProbe::new(true),
        no_debugger(),
        Arc::clone(&binder),
    )
    .await;

    assert_eq!(report.exit_code, AgentExitCode::UnexpectedException.code());
    assert!(!report.reached(LifecycleState::Running));
    assert_eq!(report.transitions.last(), Some(&LifecycleState::Exited));
}

#[tokio::test]
async fn binder_receives_identity_and_url() {
    let id = Uuid::new_v4();
    let binder = FakeBinder::new(StartBehavior::Succeed);
    binder.stop().raise();
    let args = vec![
        format!("--agentId={id}"),
        "--agencyUrl".to_owned(),
        "tcp://10.0.0.1:4000/Agency".to_owned(),
    ];

    let report = run(&args, FakeProbe::new(true), no_debugger(), Arc::clone(&binder)).await;
    assert_eq!(report.exit_code, AgentExitCode::Ok.code());

    let identity = binder.log().identity.lock().unwrap().expect("bound");
    assert_eq!(identity.agent_id, id);
    assert_eq!(identity.pid, std::process::id());
    assert_eq!(
        binder.log().agency_url.lock().unwrap().as_deref(),
        Some("tcp://10.0.0.1:4000/Agency")
    );
}

// ===========================================================================
// Parent resolution
// ===========================================================================

#[tokio::test]
async fn missing_parent_is_unable_to_locate_agency() {
    let binder = FakeBinder::new(StartBehavior::Succeed);
    let report = run(
        &registration_args(&["--pid=4321"]),
        FakeProbe::new(false),
        no_debugger(),
        Arc::clone(&binder),
    )
    .await;

    assert_eq!(report.exit_code, AgentExitCode::UnableToLocateAgency.code());
    assert_eq!(TransportLog::count(&binder.log().binds), 0);
}

#[tokio::test]
async fn non_numeric_pid_is_unable_to_locate_agency() {
    let binder = FakeBinder::new(StartBehavior::Succeed);
    let report = run(
        &registration_args(&["--pid=agency"]),
        FakeProbe::new(true),
        no_debugger(),
        Arc::clone(&binder),
    )
    .await;

    assert_eq!(report.exit_code, AgentExitCode::UnableToLocateAgency.code());
}

// ===========================================================================
// Debugger
// ===========================================================================

#[tokio::test]
async fn unsupported_debugger_is_fatal() {
    let debugger = FakeDebugger::new(DebuggerBehavior::NotImplemented);
    let binder = FakeBinder::new(StartBehavior::Succeed);
    let report = run(
        &registration_args(&["--debug-agent"]),
        FakeProbe::new(true),
        Arc::clone(&debugger),
        Arc::clone(&binder),
    )
    .await;

    assert_eq!(report.exit_code, AgentExitCode::DebuggerNotImplemented.code());
    assert_eq!(debugger.launches(), 1);
    assert!(report.reached(LifecycleState::DebuggerWait));
    assert_eq!(TransportLog::count(&binder.log().binds), 0);
}

#[tokio::test]
async fn denied_debugger_is_security_violation() {
    let report = run(
        &registration_args(&["--debug-tests"]),
        FakeProbe::new(true),
        FakeDebugger::new(DebuggerBehavior::SecurityViolation),
        FakeBinder::new(StartBehavior::Succeed),
    )
    .await;

    assert_eq!(
        report.exit_code,
        AgentExitCode::DebuggerSecurityViolation.code()
    );
}

#[tokio::test]
async fn attached_debugger_lets_startup_continue() {
    let binder = FakeBinder::new(StartBehavior::Succeed);
    binder.stop().raise();
    let debugger = FakeDebugger::new(DebuggerBehavior::Attach);

    let report = run(
        &registration_args(&["--debug-agent"]),
        FakeProbe::new(true),
        Arc::clone(&debugger),
        binder,
    )
    .await;

    assert_eq!(report.exit_code, AgentExitCode::Ok.code());
    assert_eq!(debugger.launches(), 1);
}

#[tokio::test]
async fn already_attached_debugger_is_not_relaunched() {
    let binder = FakeBinder::new(StartBehavior::Succeed);
    binder.stop().raise();
    let debugger = FakeDebugger::attached();

    let report = run(
        &registration_args(&["--debug-agent", "--debug-tests"]),
        FakeProbe::new(true),
        Arc::clone(&debugger),
        binder,
    )
    .await;

    assert_eq!(report.exit_code, AgentExitCode::Ok.code());
    assert_eq!(debugger.launches(), 0);
}

#[tokio::test]
async fn debugger_is_not_consulted_without_flags() {
    let binder = FakeBinder::new(StartBehavior::Succeed);
    binder.stop().raise();
    let debugger = FakeDebugger::new(DebuggerBehavior::NotImplemented);

    let report = run(
        &registration_args(&[]),
        FakeProbe::new(true),
        Arc::clone(&debugger),
        binder,
    )
    .await;

    assert_eq!(report.exit_code, AgentExitCode::Ok.code());
    assert_eq!(debugger.launches(), 0);
    assert!(!report.reached(LifecycleState::DebuggerWait));
}

// ===========================================================================
// Configuration failures
// ===========================================================================

#[tokio::test]
async fn registration_without_agent_id_is_invalid() {
    let binder = FakeBinder::new(StartBehavior::Succeed);
    let args = vec!["--agencyUrl=tcp://127.0.0.1:9".to_owned()];
    let report = run(&args, FakeProbe::new(true), no_debugger(), Arc::clone(&binder)).await;

    assert_eq!(report.exit_code, AgentExitCode::InvalidArguments.code());
    assert_eq!(TransportLog::count(&binder.log().binds), 0);
}

#[tokio::test]
async fn no_url_and_no_file_is_invalid() {
    let binder = FakeBinder::new(StartBehavior::Succeed);
    let args = vec!["--trace=Off".to_owned()];
    let report = run(&args, FakeProbe::new(true), no_debugger(), Arc::clone(&binder)).await;

    assert_eq!(report.exit_code, AgentExitCode::InvalidArguments.code());
    assert!(!report.reached(LifecycleState::DirectRun));
    assert_eq!(TransportLog::count(&binder.log().binds), 0);
}

#[tokio::test]
async fn bind_failure_is_invalid() {
    let binder = FakeBinder::failing();
    let report = run(
        &registration_args(&[]),
        FakeProbe::new(true),
        no_debugger(),
        Arc::clone(&binder),
    )
    .await;

    assert_eq!(report.exit_code, AgentExitCode::InvalidArguments.code());
    assert!(!report.reached(LifecycleState::Bound));
    assert_eq!(TransportLog::count(&binder.log().starts), 0);
}

// ===========================================================================
// Direct mode
// ===========================================================================

#[cfg(unix)]
#[tokio::test]
async fn direct_mode_returns_failure_count() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = write_workload(
        dir.path(),
        "w.toml",
        "direct",
        &[("ok", "true", NO_ARGS), ("bad", "false", NO_ARGS)],
    );
    let binder = FakeBinder::new(StartBehavior::Succeed);
    let args = vec![path.to_string_lossy().into_owned()];

    let report = run(&args, FakeProbe::new(true), no_debugger(), Arc::clone(&binder)).await;

    assert_eq!(report.exit_code, 1);
    assert!(report.reached(LifecycleState::DirectRun));
    assert!(!report.reached(LifecycleState::Bound));
    assert_eq!(TransportLog::count(&binder.log().binds), 0);
}

#[tokio::test]
async fn direct_mode_with_broken_workload_is_unexpected_exception() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "name = \"no tests\"\n").unwrap();
    let args = vec![path.to_string_lossy().into_owned()];

    let report = run(
        &args,
        FakeProbe::new(true),
        no_debugger(),
        FakeBinder::new(StartBehavior::Succeed),
    )
    .await;

    assert_eq!(report.exit_code, AgentExitCode::UnexpectedException.code());
}

#[cfg(unix)]
#[tokio::test]
async fn direct_mode_still_requires_live_parent() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = write_workload(dir.path(), "w.toml", "direct", &[("ok", "true", NO_ARGS)]);
    let args = vec!["--pid=4321".to_owned(), path.to_string_lossy().into_owned()];

    let report = run(
        &args,
        FakeProbe::new(false),
        no_debugger(),
        FakeBinder::new(StartBehavior::Succeed),
    )
    .await;

    assert_eq!(report.exit_code, AgentExitCode::UnableToLocateAgency.code());
}
