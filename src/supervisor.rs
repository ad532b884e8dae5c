//! Supervision of the single managed bot process.
//!
//! [`ProcessSupervisor`] owns the child process, the captured output and the
//! inferred health. Everything that several threads touch lives in one
//! [`Mutex`]; no lock is held across a blocking read, a sleep or a wait.
use std::{
    fmt,
    os::unix::process::{CommandExt, ExitStatusExt},
    path::PathBuf,
    process::{Child, Command, ExitStatus, Stdio},
    sync::{Arc, Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    sys::signal::{self, Signal},
    unistd::Pid,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    constants::{
        EXIT_POLL_INTERVAL, KILL_GRACE, MSG_RESTART_CANCELLED, MSG_START_FAILED, MSG_STOPPED,
        MSG_TERMINATED, MSG_TERMINATED_UNEXPECTEDLY,
    },
    error::SupervisorError,
    health::{Health, HealthState},
    logs::{LogBuffer, LogLine, LogStream},
    reader::{LineSink, spawn_reader},
};

/// How a process ended, reduced to what the restart policy needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitInfo {
    /// Exit code if the process terminated normally.
    pub code: Option<i32>,
    /// Signal number if the process was killed by a signal.
    pub signal: Option<i32>,
}

impl ExitInfo {
    /// An exit whose status could not be collected.
    fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    /// Only a zero exit code counts as success; signals and unknown exits do not.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "signal {signal}"),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Record of the exit-handling decision for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitRecord {
    /// Run the exit belongs to.
    pub generation: u64,
    /// How the process ended.
    #[serde(flatten)]
    pub exit: ExitInfo,
    /// Whether the supervisor had requested the termination.
    pub expected_stop: bool,
    /// Whether the crash policy scheduled a new start.
    pub restarted: bool,
}

/// Successful result of [`ProcessSupervisor::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Started {
    /// PID of the new bot process.
    pub pid: u32,
    /// Run number of the new process.
    pub generation: u64,
}

impl fmt::Display for Started {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "start command sent (pid {})", self.pid)
    }
}

/// Successful result of [`ProcessSupervisor::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stopped {
    /// The bot process was terminated.
    Terminated {
        /// PID of the process that was stopped.
        pid: u32,
        /// `true` when the process ignored `SIGTERM` and had to be killed.
        forced: bool,
    },
    /// Nothing was running, but a crash restart waiting out its backoff was
    /// called off.
    RestartCancelled,
}

impl fmt::Display for Stopped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminated { pid, forced: true } => write!(
                f,
                "stop command sent; pid {pid} ignored SIGTERM and was killed"
            ),
            Self::Terminated { forced: false, .. } => write!(f, "stop command sent"),
            Self::RestartCancelled => write!(f, "{MSG_RESTART_CANCELLED}"),
        }
    }
}

/// Consistent view of the supervisor taken under a single lock acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Whether a live bot process is owned.
    pub running: bool,
    /// Inferred health.
    pub health: HealthState,
    /// Operator-facing message.
    pub message: String,
    /// PID of the owned process, if any.
    pub pid: Option<u32>,
    /// Number of the current (or last) run.
    pub generation: u64,
    /// Outcome of the most recent exit handling.
    pub last_exit: Option<ExitRecord>,
    /// A crash restart is waiting out its backoff.
    #[serde(default)]
    pub restart_pending: bool,
}

impl StatusSnapshot {
    /// Coarse label exposed to dashboards: `online`, `starting` or `offline`.
    ///
    /// A running process that has not (or no longer) shown readiness, including
    /// one in `Error`, reports `starting`.
    pub fn label(&self) -> &'static str {
        match (self.running, self.health) {
            (true, HealthState::Online) => "online",
            (true, _) => "starting",
            (false, _) => "offline",
        }
    }
}

/// The currently owned child together with the run it belongs to.
struct OwnedChild {
    generation: u64,
    pid: u32,
    child: Child,
    /// Set by whichever thread reaps the process first.
    exit: Option<ExitInfo>,
}

impl OwnedChild {
    /// Returns the exit if the process is gone, reaping it if necessary.
    fn poll_exit(&mut self) -> Option<ExitInfo> {
        if self.exit.is_none() {
            match self.child.try_wait() {
                Ok(Some(status)) => self.exit = Some(status.into()),
                Ok(None) => {}
                Err(err) => {
                    warn!("Failed to check status of bot process {}: {err}", self.pid);
                    self.exit = Some(ExitInfo::unknown());
                }
            }
        }
        self.exit
    }
}

struct State {
    running: bool,
    health: Health,
    expected_stop: bool,
    generation: u64,
    child: Option<OwnedChild>,
    logs: LogBuffer,
    last_exit: Option<ExitRecord>,
    /// Run whose crash restart is scheduled but not yet spawned.
    pending_restart: Option<u64>,
}

impl State {
    /// Returns the owned child if it belongs to `generation`.
    fn child_of(&mut self, generation: u64) -> Option<&mut OwnedChild> {
        self.child
            .as_mut()
            .filter(|owned| owned.generation == generation)
    }
}

struct Shared {
    config: Config,
    state: Mutex<State>,
}

impl LineSink for Shared {
    fn ingest(&self, generation: u64, line: LogLine) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };

        if state.running
            && state.generation == generation
            && let Some(observation) = self.config.markers.classify(line.stream, &line.text)
            && let Some(next) = state.health.apply(observation)
        {
            match next {
                HealthState::Online => info!("Bot reported ready: {}", state.health.message()),
                HealthState::Error => warn!("Bot entered error state: {}", state.health.message()),
                other => debug!("Bot health changed to {other}"),
            }
        }

        state.logs.append(line);
    }
}

/// Launches, watches and terminates the managed bot process.
///
/// Cloning is cheap and every clone drives the same process.
#[derive(Clone)]
pub struct ProcessSupervisor {
    shared: Arc<Shared>,
}

impl ProcessSupervisor {
    /// Creates a supervisor in the `Stopped` state. Nothing is spawned until
    /// [`start`](Self::start) is called.
    pub fn new(config: Config) -> Self {
        debug!("Initializing supervisor for '{}'", config.name);

        let state = State {
            running: false,
            health: Health::new(config.name.clone()),
            expected_stop: false,
            generation: 0,
            child: None,
            logs: LogBuffer::new(config.log_retention),
            last_exit: None,
            pending_restart: None,
        };

        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(state),
            }),
        }
    }

    /// Configuration the supervisor was built with.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, SupervisorError> {
        Ok(self.shared.state.lock()?)
    }

    /// Spawns the bot unless one is already running.
    ///
    /// The lock is held across the spawn itself so concurrent callers cannot
    /// both succeed.
    pub fn start(&self) -> Result<Started, SupervisorError> {
        let state = self.lock()?;
        self.start_locked(state)
    }

    /// Spawns the bot under an already held lock. The lock is released before
    /// the reader and watcher threads are started.
    fn start_locked(&self, mut state: MutexGuard<'_, State>) -> Result<Started, SupervisorError> {
        let config = &self.shared.config;

        if state.running {
            debug!("Start requested while bot is already running");
            return Err(SupervisorError::AlreadyRunning);
        }

        let program = match locate_runtime(&config.runtime) {
            Ok(program) => program,
            Err(err) => {
                error!("{err}");
                state.health.set_message(MSG_START_FAILED);
                return Err(err);
            }
        };

        let entry = config.entry_path();
        if !entry.exists() {
            warn!("Entry file {entry:?} does not exist; the runtime will likely exit at once");
        }

        info!("Starting bot '{}'", config.name);
        let mut cmd = Command::new(&program);
        cmd.arg(&config.entry)
            .args(&config.args)
            .current_dir(&config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        debug!("Executing command: {cmd:?}");

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                error!("Failed to start bot '{}': {source}", config.name);
                state.health.set_message(MSG_START_FAILED);
                return Err(SupervisorError::SpawnFailure { source });
            }
        };

        let pid = child.id();
        state.generation += 1;
        let generation = state.generation;
        state.running = true;
        state.expected_stop = false;
        state.pending_restart = None;
        state.health.mark_starting();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        state.child = Some(OwnedChild {
            generation,
            pid,
            child,
            exit: None,
        });
        drop(state);

        info!("Bot '{}' started with PID {pid} (run {generation})", config.name);

        let mut readers = Vec::with_capacity(2);
        if let Some(out) = stdout {
            readers.push(spawn_reader(
                LogStream::Stdout,
                generation,
                out,
                Arc::clone(&self.shared),
            ));
        }
        if let Some(err) = stderr {
            readers.push(spawn_reader(
                LogStream::Stderr,
                generation,
                err,
                Arc::clone(&self.shared),
            ));
        }

        let supervisor = self.clone();
        thread::spawn(move || supervisor.watch(generation, readers));

        Ok(Started { pid, generation })
    }

    /// Terminates the bot: `SIGTERM`, up to the stop timeout, then `SIGKILL`.
    ///
    /// A crash restart still waiting out its backoff is cancelled instead. On
    /// every path that gets past the `NotRunning` check the supervisor ends up
    /// `Stopped` and no longer owns the process.
    pub fn stop(&self) -> Result<Stopped, SupervisorError> {
        let timeout = self.shared.config.stop_timeout;
        let mut delivery_error = None;

        let (generation, pid) = {
            let mut state = self.lock()?;
            if !state.running {
                if let Some(crashed) = state.pending_restart.take() {
                    info!("Cancelled pending crash restart of run {crashed}");
                    state.health.mark_stopped(MSG_RESTART_CANCELLED);
                    if let Some(record) = state.last_exit.as_mut()
                        && record.generation == crashed
                    {
                        record.restarted = false;
                    }
                    return Ok(Stopped::RestartCancelled);
                }
                debug!("Stop requested while bot is not running");
                return Err(SupervisorError::NotRunning);
            }

            let generation = state.generation;
            state.expected_stop = true;
            let Some(pid) = state.child_of(generation).map(|owned| owned.pid) else {
                state.running = false;
                state.health.mark_stopped(MSG_STOPPED);
                state.expected_stop = false;
                return Err(SupervisorError::NotRunning);
            };

            info!("Stopping bot (PID {pid})");
            if let Some(owned) = state.child_of(generation)
                && owned.poll_exit().is_none()
            {
                delivery_error = signal_process_tree(pid, Signal::SIGTERM).err();
            }
            (generation, pid)
        };

        let mut forced = false;
        let mut exited = self.wait_for_exit(generation, timeout)?;
        if !exited {
            warn!("Bot did not exit within {timeout:?} after SIGTERM; sending SIGKILL");
            forced = true;
            {
                let mut state = self.lock()?;
                if let Some(owned) = state.child_of(generation)
                    && owned.poll_exit().is_none()
                    && let Err(errno) = signal_process_tree(pid, Signal::SIGKILL)
                {
                    delivery_error = Some(errno);
                }
            }
            exited = self.wait_for_exit(generation, KILL_GRACE)?;
        }

        {
            let mut state = self.lock()?;
            if let Some(owned) = state.child.take_if(|owned| owned.generation == generation) {
                let exit = owned.exit.unwrap_or_else(ExitInfo::unknown);
                debug!("Bot process {pid} finished with {exit}");
                state.last_exit = Some(ExitRecord {
                    generation,
                    exit,
                    expected_stop: true,
                    restarted: false,
                });
            }

            if state.generation == generation {
                state.running = false;
                state.expected_stop = false;
                state.health.mark_stopped(MSG_STOPPED);
            }
        }

        if !exited {
            error!("Bot process {pid} could not be terminated; releasing it anyway");
            return Err(termination_failure(pid, delivery_error));
        }

        info!("Bot stopped (PID {pid})");
        Ok(Stopped::Terminated { pid, forced })
    }

    /// Stops the bot, pauses, then starts it again. A failed stop aborts the
    /// restart without attempting a start.
    pub fn restart(&self) -> Result<Started, SupervisorError> {
        info!("Restarting bot '{}'", self.shared.config.name);
        self.stop()?;
        thread::sleep(self.shared.config.restart_delay);
        self.start()
    }

    /// Returns a consistent snapshot of the supervisor.
    ///
    /// If a process is believed to be running but has already exited, the
    /// snapshot is corrected on the spot instead of waiting for the exit watcher.
    pub fn status(&self) -> Result<StatusSnapshot, SupervisorError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        if state.running
            && let Some(owned) = state.child.as_mut()
            && let Some(exit) = owned.poll_exit()
        {
            if state.expected_stop {
                state.health.mark_stopped(MSG_STOPPED);
            } else {
                warn!("Bot process {} died unexpectedly ({exit})", owned.pid);
                state.health.mark_stopped(MSG_TERMINATED_UNEXPECTEDLY);
            }
            state.running = false;
        }

        Ok(StatusSnapshot {
            running: state.running,
            health: state.health.state(),
            message: state.health.message().to_string(),
            pid: state
                .child
                .as_ref()
                .filter(|_| state.running)
                .map(|owned| owned.pid),
            generation: state.generation,
            last_exit: state.last_exit,
            restart_pending: state.pending_restart.is_some(),
        })
    }

    /// Returns the most recent `lines` captured lines in arrival order.
    pub fn logs(&self, lines: usize) -> Result<Vec<LogLine>, SupervisorError> {
        Ok(self.lock()?.logs.tail(lines))
    }

    /// Stops the bot if it is running and cancels any pending crash restart.
    /// Used when the host process shuts down.
    pub fn shutdown(&self) -> Result<(), SupervisorError> {
        match self.stop() {
            Ok(_) | Err(SupervisorError::NotRunning) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Polls until the process of `generation` has exited or `timeout` elapses.
    ///
    /// A run that is no longer owned counts as exited: the exit watcher got to
    /// it first.
    fn wait_for_exit(
        &self,
        generation: u64,
        timeout: Duration,
    ) -> Result<bool, SupervisorError> {
        let deadline = Instant::now() + timeout;

        loop {
            {
                let mut state = self.lock()?;
                match state.child_of(generation) {
                    Some(owned) => {
                        if owned.poll_exit().is_some() {
                            return Ok(true);
                        }
                    }
                    None => return Ok(true),
                }
            }

            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }

    /// Body of the exit watcher thread started with each run.
    fn watch(&self, generation: u64, readers: Vec<thread::JoinHandle<()>>) {
        let exit = loop {
            {
                let Ok(mut state) = self.shared.state.lock() else {
                    return;
                };
                match state.child_of(generation) {
                    Some(owned) => {
                        if let Some(exit) = owned.poll_exit() {
                            break exit;
                        }
                    }
                    None => {
                        debug!("Run {generation} was finalized by stop; watcher exiting");
                        return;
                    }
                }
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        };

        for reader in readers {
            if reader.join().is_err() {
                warn!("Output reader for run {generation} panicked");
            }
        }

        self.handle_exit(generation, exit);
    }

    /// Applies the exit policy once per run.
    fn handle_exit(&self, generation: u64, exit: ExitInfo) {
        let config = &self.shared.config;

        let restart = {
            let Ok(mut state) = self.shared.state.lock() else {
                return;
            };
            if state.child.take_if(|owned| owned.generation == generation).is_none() {
                return;
            }

            let expected_stop = state.expected_stop;
            let crashed = !exit.success();
            let restart = crashed && !expected_stop && config.policy.restart_on_crash;

            if expected_stop {
                info!("Bot exited with {exit} after a requested stop");
            } else if crashed {
                warn!("Bot '{}' exited unexpectedly with {exit}", config.name);
            } else {
                info!("Bot '{}' exited normally", config.name);
            }

            state.running = false;
            match state.health.state() {
                HealthState::Online => {
                    let message = state.health.message().to_string();
                    state.health.mark_stopped(message);
                }
                HealthState::Stopped => {}
                _ => state.health.mark_stopped(MSG_TERMINATED),
            }
            if restart {
                state.pending_restart = Some(generation);
                state.health.set_message(format!(
                    "process crashed ({exit}); restarting in {:?}",
                    config.crash_backoff
                ));
            }

            state.last_exit = Some(ExitRecord {
                generation,
                exit,
                expected_stop,
                restarted: restart,
            });
            state.expected_stop = false;
            restart
        };

        if restart {
            warn!(
                "Restarting crashed bot '{}' in {:?}",
                config.name, config.crash_backoff
            );
            thread::sleep(config.crash_backoff);
            self.resume_after_crash(generation);
        }
    }

    /// Performs the crash restart scheduled for `generation`, unless a stop
    /// cancelled it or a manual start superseded it during the backoff.
    fn resume_after_crash(&self, generation: u64) {
        let Ok(mut state) = self.shared.state.lock() else {
            return;
        };
        if state.pending_restart != Some(generation) {
            debug!("Crash restart of run {generation} was cancelled or superseded");
            return;
        }
        state.pending_restart = None;

        match self.start_locked(state) {
            Ok(started) => info!("Crash restart succeeded ({started})"),
            Err(err) => error!("Crash restart failed: {err}"),
        }
    }
}

/// Resolves the runtime executable on `PATH`.
fn locate_runtime(runtime: &str) -> Result<PathBuf, SupervisorError> {
    which::which(runtime).map_err(|err| {
        debug!("Lookup of runtime '{runtime}' failed: {err}");
        SupervisorError::ExecutableNotFound {
            runtime: runtime.to_string(),
        }
    })
}

/// Sends `sig` to the bot's process group and to the bot itself.
///
/// The bot is spawned as the leader of its own group, so the group signal also
/// reaches anything it forked. Missing processes are not an error. Fails only
/// when the bot itself could not be signalled.
fn signal_process_tree(pid: u32, sig: Signal) -> Result<(), Errno> {
    let target = Pid::from_raw(pid as i32);

    let group = match signal::killpg(target, sig) {
        Ok(()) => {
            debug!("Sent {sig} to process group {pid}");
            Ok(())
        }
        Err(Errno::ESRCH) => {
            debug!("Process group {pid} already gone");
            Ok(())
        }
        Err(err) => {
            warn!("Failed to signal process group {pid} with {sig}: {err}");
            Err(err)
        }
    };

    match signal::kill(target, sig) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => group,
        Err(err) => {
            warn!("Failed to signal bot process {pid} with {sig}: {err}");
            group.and(Err(err))
        }
    }
}

/// Builds the error for a process that outlived the stop sequence, naming the
/// undelivered signal's errno when there was one.
fn termination_failure(pid: u32, delivery_error: Option<Errno>) -> SupervisorError {
    let source = match delivery_error {
        Some(errno) => std::io::Error::from(errno),
        None => std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "process did not exit after SIGKILL",
        ),
    };
    SupervisorError::TerminationFailure { pid, source }
}
