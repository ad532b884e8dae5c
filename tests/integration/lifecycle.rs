#[path = "common/mod.rs"]
mod common;

use std::{
    sync::{Arc, Barrier},
    thread,
    time::Duration,
};

use botvisor::{
    config::Config,
    error::SupervisorError,
    health::HealthState,
    supervisor::{ProcessSupervisor, Stopped},
};
use common::{bot_dir, pid_alive, sh_config, supervisor_for, wait_until};
use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};

const READY_BOT: &str = "echo booting\necho PAINEL_STATUS:BOT_ONLINE_READY\necho serving\nexec sleep 30\n";

#[test]
fn concurrent_starts_spawn_exactly_one_process() {
    let dir = bot_dir(READY_BOT);
    let supervisor = supervisor_for(dir.path());
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let supervisor = supervisor.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                supervisor.start()
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let started = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(SupervisorError::AlreadyRunning)))
        .count();

    assert_eq!(started, 1);
    assert_eq!(rejected, 7);

    let status = supervisor.status().unwrap();
    assert!(status.running);
    assert_eq!(status.generation, 1);

    supervisor.stop().unwrap();
}

#[test]
fn stop_twice_reports_not_running_and_changes_nothing() {
    let dir = bot_dir(READY_BOT);
    let supervisor = supervisor_for(dir.path());

    supervisor.start().unwrap();
    let stopped = supervisor.stop().unwrap();
    assert!(matches!(stopped, Stopped::Terminated { forced: false, .. }));

    let before = supervisor.status().unwrap();
    assert!(matches!(supervisor.stop(), Err(SupervisorError::NotRunning)));
    assert_eq!(supervisor.status().unwrap(), before);
    assert_eq!(before.health, HealthState::Stopped);
    assert_eq!(before.message, "stopped");
}

#[test]
fn start_online_stop_end_to_end() {
    let dir = bot_dir(READY_BOT);
    let supervisor = supervisor_for(dir.path());

    let started = supervisor.start().unwrap();
    assert_eq!(started.generation, 1);
    assert!(started.to_string().starts_with("start command sent"));

    assert!(wait_until(Duration::from_secs(5), || {
        supervisor
            .logs(1)
            .unwrap()
            .first()
            .is_some_and(|line| line.text == "serving")
    }));

    let status = supervisor.status().unwrap();
    assert_eq!(status.label(), "online");
    assert_eq!(status.health, HealthState::Online);
    assert_eq!(status.message, "TestBot online");
    assert_eq!(status.pid, Some(started.pid));

    supervisor.stop().unwrap();
    assert!(!pid_alive(started.pid));

    let status = supervisor.status().unwrap();
    assert_eq!(status.label(), "offline");
    assert_eq!(status.message, "stopped");
    assert_eq!(status.pid, None);

    let last = supervisor.logs(1).unwrap();
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].text, "serving");

    // Only the bot's own output is captured; lifecycle notices go to tracing.
    let texts: Vec<_> = supervisor
        .logs(100)
        .unwrap()
        .into_iter()
        .map(|line| line.text)
        .collect();
    assert_eq!(
        texts,
        vec!["booting", "PAINEL_STATUS:BOT_ONLINE_READY", "serving"]
    );
}

#[test]
fn tail_returns_last_hundred_of_many_lines() {
    let dir = bot_dir(
        "i=0\nwhile [ $i -lt 250 ]; do echo \"line $i\"; i=$((i+1)); done\nexec sleep 30\n",
    );
    let supervisor = supervisor_for(dir.path());
    supervisor.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        supervisor.logs(1000).unwrap().len() == 250
    }));

    let tail = supervisor.logs(100).unwrap();
    assert_eq!(tail.len(), 100);
    assert_eq!(tail[0].text, "line 150");
    assert_eq!(tail[99].text, "line 249");

    supervisor.stop().unwrap();
}

#[test]
fn retention_cap_keeps_newest_lines() {
    let dir = bot_dir("for i in 1 2 3 4 5 6; do echo \"n$i\"; done\nexec sleep 30\n");
    let supervisor = ProcessSupervisor::new(Config {
        log_retention: 4,
        ..sh_config(dir.path())
    });
    supervisor.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        supervisor
            .logs(1)
            .unwrap()
            .first()
            .is_some_and(|line| line.text == "n6")
    }));

    let texts: Vec<_> = supervisor
        .logs(100)
        .unwrap()
        .into_iter()
        .map(|line| line.text)
        .collect();
    assert_eq!(texts, vec!["n3", "n4", "n5", "n6"]);

    supervisor.stop().unwrap();
}

#[test]
fn stop_escalates_to_sigkill_when_term_is_ignored() {
    let dir = bot_dir("trap '' TERM\necho ready\nwhile true; do sleep 1; done\n");
    let supervisor = ProcessSupervisor::new(Config {
        stop_timeout: Duration::from_millis(500),
        ..sh_config(dir.path())
    });
    let started = supervisor.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        !supervisor.logs(1).unwrap().is_empty()
    }));

    let stopped = supervisor.stop().unwrap();
    assert!(matches!(stopped, Stopped::Terminated { forced: true, .. }));
    assert!(!pid_alive(started.pid));

    let status = supervisor.status().unwrap();
    assert!(!status.running);
    assert_eq!(status.health, HealthState::Stopped);
    let exit = status.last_exit.unwrap();
    assert!(exit.expected_stop);
    assert_eq!(exit.exit.signal, Some(9));
}

#[test]
fn status_notices_a_killed_process() {
    let dir = bot_dir(READY_BOT);
    let supervisor = supervisor_for(dir.path());
    let started = supervisor.start().unwrap();

    signal::kill(Pid::from_raw(started.pid as i32), Signal::SIGKILL).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        !supervisor.status().unwrap().running
    }));

    let status = supervisor.status().unwrap();
    assert_eq!(status.health, HealthState::Stopped);
    assert_eq!(status.label(), "offline");
    assert!(matches!(supervisor.stop(), Err(SupervisorError::NotRunning)));
}

#[test]
fn status_reports_death_while_exit_handling_is_still_pending() {
    // The background sleep keeps both pipes open after the bot dies, so the
    // readers stay blocked and exit handling cannot run.
    let dir = bot_dir("sleep 30 &
echo ready
exec sleep 30
");
    let supervisor = supervisor_for(dir.path());
    let started = supervisor.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        !supervisor.logs(1).unwrap().is_empty()
    }));
    signal::kill(Pid::from_raw(started.pid as i32), Signal::SIGKILL).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        !supervisor.status().unwrap().running
    }));

    let status = supervisor.status().unwrap();
    assert_eq!(status.health, HealthState::Stopped);
    assert_eq!(status.message, "process terminated unexpectedly");
    assert_eq!(status.pid, None);
    assert!(status.last_exit.is_none());

    // Releasing the pipes lets the exit watcher finish the run.
    let _ = signal::killpg(Pid::from_raw(started.pid as i32), Signal::SIGKILL);
    assert!(wait_until(Duration::from_secs(5), || {
        supervisor.status().unwrap().last_exit.is_some()
    }));
    assert!(!supervisor.status().unwrap().running);
}

#[test]
fn clean_exit_settles_to_stopped() {
    let dir = bot_dir("echo bye\nexit 0\n");
    let supervisor = supervisor_for(dir.path());
    supervisor.start().unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        supervisor.status().unwrap().last_exit.is_some()
    }));

    let status = supervisor.status().unwrap();
    assert!(!status.running);
    assert!(status.message.starts_with("process terminated"));
    let exit = status.last_exit.unwrap();
    assert_eq!(exit.exit.code, Some(0));
    assert!(!exit.restarted);
    assert_eq!(supervisor.logs(1).unwrap()[0].text, "bye");
}

#[test]
fn restart_replaces_the_process() {
    let dir = bot_dir(READY_BOT);
    let supervisor = supervisor_for(dir.path());
    let first = supervisor.start().unwrap();

    let second = supervisor.restart().unwrap();
    assert_eq!(second.generation, 2);
    assert_ne!(second.pid, first.pid);
    assert!(!pid_alive(first.pid));

    let status = supervisor.status().unwrap();
    assert!(status.running);
    assert_eq!(status.pid, Some(second.pid));

    supervisor.shutdown().unwrap();
    assert!(!supervisor.status().unwrap().running);
}

#[test]
fn restart_when_stopped_fails_without_starting() {
    let dir = bot_dir(READY_BOT);
    let supervisor = supervisor_for(dir.path());

    assert!(matches!(supervisor.restart(), Err(SupervisorError::NotRunning)));
    assert_eq!(supervisor.status().unwrap().generation, 0);
}
