#[path = "common/mod.rs"]
mod common;

use std::{thread, time::Duration};

use botvisor::{
    config::{Config, RestartPolicy},
    error::SupervisorError,
    health::HealthState,
    supervisor::{ProcessSupervisor, Stopped},
};
use common::{bot_dir, sh_config, wait_until};

/// First run crashes with exit code 1, later runs come online and stay up.
const CRASH_ONCE_BOT: &str = "if [ -f ran ]; then\n  echo PAINEL_STATUS:BOT_ONLINE_READY\n  exec sleep 30\nfi\ntouch ran\nexit 1\n";

fn restarting(dir: &std::path::Path) -> ProcessSupervisor {
    ProcessSupervisor::new(Config {
        policy: RestartPolicy {
            auto_start: false,
            restart_on_crash: true,
        },
        ..sh_config(dir)
    })
}

#[test]
fn crash_is_restarted_exactly_once() {
    let dir = bot_dir(CRASH_ONCE_BOT);
    let supervisor = restarting(dir.path());
    supervisor.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        let status = supervisor.status().unwrap();
        status.generation == 2 && status.health == HealthState::Online
    }));

    // Give a second restart every chance to happen if the policy were wrong.
    thread::sleep(Duration::from_millis(500));

    let status = supervisor.status().unwrap();
    assert_eq!(status.generation, 2);
    assert!(status.running);

    let exit = status.last_exit.unwrap();
    assert_eq!(exit.generation, 1);
    assert_eq!(exit.exit.code, Some(1));
    assert!(!exit.expected_stop);
    assert!(exit.restarted);

    supervisor.stop().unwrap();
}

#[test]
fn requested_stop_is_never_restarted() {
    let dir = bot_dir("echo PAINEL_STATUS:BOT_ONLINE_READY\nexec sleep 30\n");
    let supervisor = restarting(dir.path());
    supervisor.start().unwrap();

    supervisor.stop().unwrap();
    thread::sleep(Duration::from_millis(600));

    let status = supervisor.status().unwrap();
    assert!(!status.running);
    assert_eq!(status.generation, 1);
    assert_eq!(status.health, HealthState::Stopped);

    let exit = status.last_exit.unwrap();
    assert!(exit.expected_stop);
    assert!(!exit.restarted);
}

#[test]
fn stop_during_backoff_cancels_the_crash_restart() {
    let dir = bot_dir("exit 1\n");
    let supervisor = ProcessSupervisor::new(Config {
        policy: RestartPolicy {
            auto_start: false,
            restart_on_crash: true,
        },
        crash_backoff: Duration::from_millis(1500),
        ..sh_config(dir.path())
    });
    supervisor.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        supervisor.status().unwrap().restart_pending
    }));

    assert_eq!(supervisor.stop().unwrap(), Stopped::RestartCancelled);
    thread::sleep(Duration::from_millis(2000));

    let status = supervisor.status().unwrap();
    assert!(!status.running);
    assert!(!status.restart_pending);
    assert_eq!(status.generation, 1);
    assert_eq!(status.message, "pending restart cancelled");
    let exit = status.last_exit.unwrap();
    assert_eq!(exit.generation, 1);
    assert!(!exit.restarted);
    assert!(matches!(supervisor.stop(), Err(SupervisorError::NotRunning)));
}

#[test]
fn manual_start_during_backoff_supersedes_the_crash_restart() {
    let dir = bot_dir(CRASH_ONCE_BOT);
    let supervisor = ProcessSupervisor::new(Config {
        policy: RestartPolicy {
            auto_start: false,
            restart_on_crash: true,
        },
        crash_backoff: Duration::from_millis(1500),
        ..sh_config(dir.path())
    });
    supervisor.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        supervisor.status().unwrap().restart_pending
    }));
    let manual = supervisor.start().unwrap();
    assert_eq!(manual.generation, 2);
    thread::sleep(Duration::from_millis(2000));

    let status = supervisor.status().unwrap();
    assert!(status.running);
    assert!(!status.restart_pending);
    assert_eq!(status.generation, 2);
    assert_eq!(status.pid, Some(manual.pid));

    supervisor.stop().unwrap();
}

#[test]
fn crash_without_policy_settles_to_stopped() {
    let dir = bot_dir("echo dying\nexit 3\n");
    let supervisor = ProcessSupervisor::new(sh_config(dir.path()));
    supervisor.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        supervisor.status().unwrap().last_exit.is_some()
    }));
    thread::sleep(Duration::from_millis(400));

    let status = supervisor.status().unwrap();
    assert!(!status.running);
    assert_eq!(status.generation, 1);
    assert_eq!(status.health, HealthState::Stopped);
    let exit = status.last_exit.unwrap();
    assert_eq!(exit.exit.code, Some(3));
    assert!(!exit.restarted);
}

#[test]
fn clean_exit_is_not_a_crash() {
    let dir = bot_dir("exit 0\n");
    let supervisor = restarting(dir.path());
    supervisor.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        supervisor.status().unwrap().last_exit.is_some()
    }));
    thread::sleep(Duration::from_millis(400));

    let status = supervisor.status().unwrap();
    assert!(!status.running);
    assert_eq!(status.generation, 1);
    assert!(!status.last_exit.unwrap().restarted);
}

#[test]
fn missing_runtime_is_reported_and_nothing_runs() {
    let dir = bot_dir("exit 0\n");
    let supervisor = ProcessSupervisor::new(Config {
        runtime: "botvisor-missing-runtime".into(),
        ..sh_config(dir.path())
    });

    assert!(matches!(
        supervisor.start(),
        Err(SupervisorError::ExecutableNotFound { runtime }) if runtime == "botvisor-missing-runtime"
    ));
    let status = supervisor.status().unwrap();
    assert!(!status.running);
    assert_eq!(status.message, "failed to start");
}

#[test]
fn missing_entry_file_crashes_and_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let supervisor = ProcessSupervisor::new(sh_config(dir.path()));
    supervisor.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        supervisor.status().unwrap().last_exit.is_some()
    }));

    let status = supervisor.status().unwrap();
    assert!(!status.running);
    assert!(!status.last_exit.unwrap().exit.success());
    assert!(!supervisor.logs(10).unwrap().is_empty());
}
