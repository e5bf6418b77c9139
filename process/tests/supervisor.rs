//! Supervisor behaviour against real child processes.
#![cfg(unix)]

use std::collections::HashMap;
use std::time::Duration;

use cellbook_process::{
    ExitInfo, ProcessEvent, ProcessHandle, ProcessKey, ProcessSupervisor, RunError, RunRequest,
    SpawnFailure,
};
use cellbook_types::{CellId, SessionId};

fn key(session: &str, cell: &str) -> ProcessKey {
    ProcessKey::new(SessionId::new(session), CellId::new(cell))
}

fn sh(key: ProcessKey, script: &str) -> RunRequest {
    RunRequest {
        key,
        program: "sh".into(),
        args: vec!["-c".into(), script.into()],
        cwd: std::env::temp_dir(),
        env: HashMap::new(),
    }
}

struct Collected {
    stdout: String,
    stderr: String,
    exit: ExitInfo,
    exits_seen: usize,
}

async fn collect(mut handle: ProcessHandle) -> Collected {
    tokio::time::timeout(Duration::from_secs(10), async move {
        let mut collected = Collected {
            stdout: String::new(),
            stderr: String::new(),
            exit: ExitInfo { code: None },
            exits_seen: 0,
        };
        while let Some(event) = handle.recv().await {
            match event {
                ProcessEvent::Stdout(chunk) => collected.stdout.push_str(&chunk),
                ProcessEvent::Stderr(chunk) => collected.stderr.push_str(&chunk),
                ProcessEvent::Exited(info) => {
                    collected.exit = info;
                    collected.exits_seen += 1;
                }
            }
        }
        collected
    })
    .await
    .expect("process did not finish in time")
}

#[tokio::test]
async fn streams_output_and_reports_exit_code() {
    let supervisor = ProcessSupervisor::new(16);
    let handle = supervisor
        .run(sh(
            key("s", "c"),
            "sleep 0.1; echo out; sleep 0.1; echo err 1>&2; exit 3",
        ))
        .unwrap();
    assert!(handle.pid() > 0);

    let collected = collect(handle).await;
    assert_eq!(collected.stdout, "out\n");
    assert_eq!(collected.stderr, "err\n");
    assert_eq!(collected.exit.code, Some(3));
    assert_eq!(collected.exits_seen, 1);
    assert!(!supervisor.is_running(&key("s", "c")));
}

#[tokio::test]
async fn interleaved_output_keeps_arrival_order() {
    let supervisor = ProcessSupervisor::new(16);
    let mut handle = supervisor
        .run(sh(
            key("s", "order"),
            "sleep 0.1; echo 1; sleep 0.1; echo 2 1>&2; sleep 0.1; echo 3",
        ))
        .unwrap();

    let mut order = Vec::new();
    while let Some(event) = handle.recv().await {
        match event {
            ProcessEvent::Stdout(chunk) => order.push(format!("out:{}", chunk.trim())),
            ProcessEvent::Stderr(chunk) => order.push(format!("err:{}", chunk.trim())),
            ProcessEvent::Exited(_) => order.push("exit".into()),
        }
    }
    assert_eq!(order, vec!["out:1", "err:2", "out:3", "exit"]);
}

#[tokio::test]
async fn second_run_for_same_key_is_rejected() {
    let supervisor = ProcessSupervisor::new(16);
    let first = supervisor.run(sh(key("s", "c"), "sleep 5")).unwrap();

    let second = supervisor.run(sh(key("s", "c"), "sleep 5"));
    assert!(matches!(second, Err(RunError::AlreadyRunning(_))));
    assert_eq!(supervisor.running_count(), 1);

    // A different cell in the same session is independent.
    let other = supervisor.run(sh(key("s", "other"), "sleep 5")).unwrap();
    assert_eq!(supervisor.running_count(), 2);

    assert!(supervisor.stop(&key("s", "c")));
    assert!(supervisor.stop(&key("s", "other")));
    let collected = collect(first).await;
    assert_eq!(collected.exits_seen, 1);
    assert_eq!(collected.exit.code, None);
    collect(other).await;
    assert_eq!(supervisor.running_count(), 0);
}

#[tokio::test]
async fn key_is_free_again_once_exit_is_observed() {
    let supervisor = ProcessSupervisor::new(16);
    for _ in 0..3 {
        let handle = supervisor.run(sh(key("s", "c"), "sleep 5")).unwrap();
        assert!(supervisor.is_running(&key("s", "c")));
        assert!(matches!(
            supervisor.run(sh(key("s", "c"), "sleep 5")),
            Err(RunError::AlreadyRunning(_))
        ));
        assert!(supervisor.stop(&key("s", "c")));
        let collected = collect(handle).await;
        assert_eq!(collected.exits_seen, 1);
        assert!(!supervisor.is_running(&key("s", "c")));
    }
}

#[tokio::test]
async fn stop_racing_natural_exit_reports_exit_once() {
    let supervisor = ProcessSupervisor::new(16);
    let handle = supervisor
        .run(sh(key("s", "race"), "sleep 0.2; echo done"))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(190)).await;
    supervisor.stop(&key("s", "race"));
    supervisor.stop(&key("s", "race"));

    let collected = collect(handle).await;
    assert_eq!(collected.exits_seen, 1);
    assert!(!supervisor.is_running(&key("s", "race")));
}

#[tokio::test]
async fn stop_with_nothing_running_returns_false() {
    let supervisor = ProcessSupervisor::new(16);
    assert!(!supervisor.stop(&key("s", "idle")));
}

#[tokio::test]
async fn nonexistent_executable_leaves_no_record() {
    let supervisor = ProcessSupervisor::new(16);
    let mut request = sh(key("s", "c"), "");
    request.program = "./no-such-runner".into();
    let result = supervisor.run(request);
    assert!(matches!(
        result,
        Err(RunError::Spawn(SpawnFailure::NotFound { .. }))
    ));
    assert_eq!(supervisor.running_count(), 0);
}

#[tokio::test]
async fn injected_env_reaches_child_and_secrets_do_not() {
    // SAFETY: test-local variable, set before spawning and never mutated after.
    unsafe {
        std::env::set_var("CELLBOOK_SUPERVISOR_TEST_TOKEN", "leaked");
    }
    let supervisor = ProcessSupervisor::new(16);
    let mut request = sh(
        key("s", "env"),
        "sleep 0.1; printf '%s|%s' \"$GREETING\" \"$CELLBOOK_SUPERVISOR_TEST_TOKEN\"",
    );
    request.env.insert("GREETING".into(), "hello".into());
    let collected = collect(supervisor.run(request).unwrap()).await;
    assert_eq!(collected.stdout, "hello|");
    assert!(collected.exit.success());
}

#[tokio::test]
async fn stop_session_only_touches_that_session() {
    let supervisor = ProcessSupervisor::new(16);
    let a = supervisor.run(sh(key("a", "1"), "sleep 5")).unwrap();
    let b = supervisor.run(sh(key("b", "1"), "sleep 5")).unwrap();

    assert_eq!(supervisor.stop_session(&SessionId::new("a")), 1);
    collect(a).await;
    assert!(supervisor.is_running(&key("b", "1")));

    supervisor.kill_all();
    collect(b).await;
    assert_eq!(supervisor.running_count(), 0);
}
