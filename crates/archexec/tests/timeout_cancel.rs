// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::manual_assert)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

//! Timeout and cancellation laws: the status reflects what stopped the
//! command, and the whole process group is gone afterwards.

use std::fs;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use archexec::model::{CommandRequest, CommandStatus, ConfigBuilder, RunnerConfig, StreamKind};
use archexec::runner::{CollectingObserver, Runner};

fn test_config() -> RunnerConfig {
    ConfigBuilder::new()
        .allow_command("sh")
        .allow_command("sleep")
        .lock_check(false)
        .grace_period_ms(300)
        .build()
}

fn plain(command: &str, timeout_secs: u64) -> CommandRequest {
    CommandRequest::new(command)
        .with_elevation(false)
        .with_timeout_secs(timeout_secs)
}

/// Gone, or a zombie waiting for its new parent to reap it.
fn process_is_dead(pid: u32) -> bool {
    match fs::read_to_string(format!("/proc/{pid}/stat")) {
        Err(_) => true,
        Ok(stat) => stat
            .rsplit(')')
            .next()
            .and_then(|rest| rest.split_whitespace().next())
            .is_some_and(|state| state == "Z" || state == "X"),
    }
}

fn wait_until_dead(pid: u32, budget: Duration) -> bool {
    let deadline = Instant::now() + budget;
    while Instant::now() < deadline {
        if process_is_dead(pid) {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    process_is_dead(pid)
}

fn wait_for_running(runner: &Runner) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while runner.cancel_handle().current_pid().is_none() {
        assert!(Instant::now() < deadline, "command never started");
        thread::sleep(Duration::from_millis(10));
    }
}

// =============================================================================
// Timeout
// =============================================================================

#[test]
fn timeout_terminates_and_reports() {
    let runner = Runner::new(test_config());
    let started = Instant::now();
    let result = runner.execute(plain("sleep 30", 1));
    let elapsed = started.elapsed();

    assert_eq!(result.status, CommandStatus::Timeout);
    assert_eq!(result.error_code(), Some("E_TIMEOUT"));
    assert!(result.stderr.ends_with("timeout reached after 1s"));
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(10), "took {elapsed:?}");
    assert!(result.duration_secs >= 1.0);

    let pid = result.pid.expect("pid recorded");
    assert!(wait_until_dead(pid, Duration::from_secs(2)));
}

#[test]
fn timeout_keeps_partial_output() {
    let runner = Runner::new(test_config());
    let result = runner.execute(plain("sh -c 'echo first; echo warn >&2; sleep 30'", 1));

    assert_eq!(result.status, CommandStatus::Timeout);
    assert_eq!(result.stdout, "first");
    assert_eq!(result.stderr, "warn\ntimeout reached after 1s");
}

#[test]
fn zero_timeout_means_unlimited() {
    let runner = Runner::new(test_config());
    let result = runner.execute(plain("sh -c 'sleep 1; echo done'", 0));

    assert_eq!(result.status, CommandStatus::Success);
    assert_eq!(result.stdout, "done");
}

// =============================================================================
// Cancellation
// =============================================================================

#[test]
fn cancel_while_idle_is_a_no_op() {
    let runner = Runner::new(test_config());
    assert!(!runner.cancel());
    assert!(!runner.is_running());
}

#[test]
fn cancel_stops_running_command() {
    let runner = Arc::new(Runner::new(test_config()));
    let worker = {
        let runner = Arc::clone(&runner);
        thread::spawn(move || runner.execute(plain("sleep 30", 60)))
    };

    wait_for_running(&runner);
    let cancelled_at = Instant::now();
    assert!(runner.cancel_handle().cancel());
    let result = worker.join().unwrap();

    assert_eq!(result.status, CommandStatus::Cancelled);
    assert_eq!(result.error_code(), Some("E_CANCELLED"));
    assert!(cancelled_at.elapsed() < Duration::from_secs(5));
    assert!(result.duration_secs < 30.0);
    assert!(wait_until_dead(result.pid.unwrap(), Duration::from_secs(2)));
    assert!(!runner.is_running());
}

#[test]
fn cancel_reaches_grandchildren() {
    let observer = Arc::new(CollectingObserver::new());
    let runner = Arc::new(
        Runner::builder(test_config())
            .observer(observer.clone())
            .build(),
    );
    let worker = {
        let runner = Arc::clone(&runner);
        thread::spawn(move || runner.execute(plain("sh -c 'sleep 30 & echo $!; wait'", 60)))
    };

    let deadline = Instant::now() + Duration::from_secs(10);
    let grandchild: u32 = loop {
        if let Some(line) = observer.lines(StreamKind::Stdout).first() {
            break line.trim().parse().unwrap();
        }
        assert!(Instant::now() < deadline, "grandchild pid never printed");
        thread::sleep(Duration::from_millis(10));
    };
    assert!(!process_is_dead(grandchild));

    assert!(runner.cancel());
    let result = worker.join().unwrap();

    assert_eq!(result.status, CommandStatus::Cancelled);
    assert!(wait_until_dead(grandchild, Duration::from_secs(3)));
}

#[test]
fn cancel_flag_does_not_leak_into_next_execution() {
    let runner = Arc::new(Runner::new(test_config()));
    let worker = {
        let runner = Arc::clone(&runner);
        thread::spawn(move || runner.execute(plain("sleep 30", 60)))
    };
    wait_for_running(&runner);
    runner.cancel();
    assert_eq!(worker.join().unwrap().status, CommandStatus::Cancelled);

    let next = runner.execute(plain("echo again", 10));
    assert_eq!(next.status, CommandStatus::Success);
}
