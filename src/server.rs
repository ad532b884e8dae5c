use std::{
    fs, io,
    os::unix::net::UnixListener,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    error::SupervisorError,
    ipc::{self, ControlCommand, ControlResponse},
    supervisor::ProcessSupervisor,
};

/// Errors emitted by the resident control server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Control(#[from] ipc::ControlError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Long-lived server that owns the supervisor and answers CLI commands over a
/// unix socket, one connection at a time.
pub struct ControlServer {
    supervisor: ProcessSupervisor,
    socket_path: PathBuf,
}

impl ControlServer {
    /// Creates a server for `supervisor` listening on `socket_path`.
    pub fn new(supervisor: ProcessSupervisor, socket_path: PathBuf) -> Self {
        Self {
            supervisor,
            socket_path,
        }
    }

    /// Socket the server binds to.
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Binds the socket, honours `auto_start`, then serves commands until a
    /// `Shutdown` arrives or the listener fails.
    pub fn run(&self) -> Result<(), ServerError> {
        if let Some(parent) = self.socket_path.parent() {
            fs::create_dir_all(parent)?;
        }
        ipc::cleanup_runtime(&self.socket_path)?;

        let listener = UnixListener::bind(&self.socket_path)?;
        ipc::write_server_pid(&self.socket_path, std::process::id())?;

        if self.supervisor.config().policy.auto_start {
            info!("auto_start enabled; starting bot");
            if let Err(err) = self.supervisor.start() {
                error!("Automatic start failed: {err}");
            }
        }

        info!("botvisor listening on {:?}", self.socket_path);

        let mut shutdown_requested = false;
        while !shutdown_requested {
            match listener.accept() {
                Ok((mut stream, _addr)) => match ipc::read_command(&mut stream) {
                    Ok(command) => {
                        debug!("Server received command: {:?}", command);
                        shutdown_requested = matches!(command, ControlCommand::Shutdown);
                        let response = self.handle_command(command);
                        if let Err(err) = ipc::write_response(&mut stream, &response) {
                            warn!("Failed to answer control client: {err}");
                        }
                    }
                    Err(err) => {
                        warn!("Invalid control command: {err}");
                        let _ = ipc::write_response(
                            &mut stream,
                            &ControlResponse::Error(err.to_string()),
                        );
                    }
                },
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("Control listener error: {err}");
                    shutdown_requested = true;
                }
            }
        }

        self.shutdown()
    }

    /// Stops the bot and removes the runtime files.
    pub fn shutdown(&self) -> Result<(), ServerError> {
        info!("botvisor shutting down");
        let stopped = self.supervisor.shutdown();
        ipc::cleanup_runtime(&self.socket_path)?;
        stopped?;
        Ok(())
    }

    /// Maps a command onto a supervisor operation. Supervisor failures become
    /// `success: false` responses rather than transport errors.
    pub fn handle_command(&self, command: ControlCommand) -> ControlResponse {
        match command {
            ControlCommand::Start => action(self.supervisor.start()),
            ControlCommand::Stop => action(self.supervisor.stop()),
            ControlCommand::Restart => action(self.supervisor.restart()),
            ControlCommand::Status => match self.supervisor.status() {
                Ok(snapshot) => ControlResponse::Status {
                    status: snapshot.label().to_string(),
                    message: snapshot.message.clone(),
                    detail: snapshot,
                },
                Err(err) => ControlResponse::Error(err.to_string()),
            },
            ControlCommand::Logs { lines } => match self.supervisor.logs(lines) {
                Ok(lines) => ControlResponse::Logs {
                    logs: lines.iter().map(ToString::to_string).collect(),
                },
                Err(err) => ControlResponse::Error(err.to_string()),
            },
            ControlCommand::Shutdown => match self.supervisor.shutdown() {
                Ok(()) => ControlResponse::Action {
                    success: true,
                    message: "server shutting down".into(),
                },
                Err(err) => ControlResponse::Action {
                    success: false,
                    message: err.to_string(),
                },
            },
        }
    }
}

fn action<T: std::fmt::Display>(result: Result<T, SupervisorError>) -> ControlResponse {
    match result {
        Ok(outcome) => ControlResponse::Action {
            success: true,
            message: outcome.to_string(),
        },
        Err(err) => {
            warn!("Command failed: {err}");
            ControlResponse::Action {
                success: false,
                message: err.to_string(),
            }
        }
    }
}
