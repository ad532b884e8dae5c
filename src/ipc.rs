use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::{self, BufRead, BufReader, Write},
    os::unix::net::UnixStream,
    path::{Path, PathBuf},
};
use thiserror::Error;

use crate::supervisor::StatusSnapshot;

/// Name of the PID file written next to the control socket.
const PID_FILE_NAME: &str = "botvisor.pid";

/// Directory under `$HOME` where runtime artifacts (PID/socket files) are stored.
fn runtime_dir() -> Result<PathBuf, ControlError> {
    let home = std::env::var("HOME").map_err(|_| ControlError::MissingHome)?;
    let path = PathBuf::from(home).join(".local/share/botvisor");
    fs::create_dir_all(&path)?;
    Ok(path)
}

/// Returns the default unix socket path used to reach the resident server.
pub fn default_socket_path() -> Result<PathBuf, ControlError> {
    Ok(runtime_dir()?.join("control.sock"))
}

/// Picks the socket path: an explicit override wins over the default location.
pub fn resolve_socket_path(explicit: Option<&Path>) -> Result<PathBuf, ControlError> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => default_socket_path(),
    }
}

/// Returns the path where the server PID is recorded for `socket`.
pub fn pid_path(socket: &Path) -> PathBuf {
    socket
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(PID_FILE_NAME)
}

/// Message sent from CLI invocations to the resident server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlCommand {
    Start,
    Stop,
    Restart,
    Status,
    Logs { lines: usize },
    Shutdown,
}

/// Response sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlResponse {
    /// Outcome of `Start`, `Stop`, `Restart` and `Shutdown`.
    Action { success: bool, message: String },
    /// Coarse status label, message, and the full snapshot for `--json`.
    Status {
        status: String,
        message: String,
        detail: StatusSnapshot,
    },
    /// Rendered log lines, oldest first.
    Logs { logs: Vec<String> },
    /// The request could not be served at all.
    Error(String),
}

/// Errors raised by the control channel helpers.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("control socket I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("failed to serialise control message: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("HOME environment variable not set")]
    MissingHome,
    #[error("server reported error: {0}")]
    Server(String),
    #[error("control socket not available")]
    NotAvailable,
}

/// Sends a command to the server at `socket` and waits for a response.
pub fn send_command(
    socket: &Path,
    command: &ControlCommand,
) -> Result<ControlResponse, ControlError> {
    if !socket.exists() {
        return Err(ControlError::NotAvailable);
    }

    let mut stream = match UnixStream::connect(socket) {
        Ok(stream) => stream,
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
            ) =>
        {
            return Err(ControlError::NotAvailable);
        }
        Err(err) => return Err(err.into()),
    };
    let payload = serde_json::to_vec(command)?;
    stream.write_all(&payload)?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    if response_line.trim().is_empty() {
        return Err(ControlError::NotAvailable);
    }

    let response: ControlResponse = serde_json::from_str(response_line.trim())?;
    if let ControlResponse::Error(message) = &response {
        return Err(ControlError::Server(message.clone()));
    }

    Ok(response)
}

/// Utility to read a command from a `UnixStream`. Used by the server loop.
pub fn read_command(stream: &mut UnixStream) -> Result<ControlCommand, ControlError> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;

    if line.trim().is_empty() {
        return Err(ControlError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "empty control command",
        )));
    }

    Ok(serde_json::from_str(line.trim())?)
}

/// Writes a response to the connected CLI client.
pub fn write_response(
    stream: &mut UnixStream,
    response: &ControlResponse,
) -> Result<(), ControlError> {
    let payload = serde_json::to_vec(response)?;
    stream.write_all(&payload)?;
    stream.write_all(b"\n")?;
    stream.flush()?;
    Ok(())
}

/// Persists the server PID next to `socket` for later CLI detection.
pub fn write_server_pid(socket: &Path, pid: u32) -> Result<(), ControlError> {
    fs::write(pid_path(socket), pid.to_string())?;
    Ok(())
}

/// Reads the server PID recorded for `socket`, if present.
pub fn read_server_pid(socket: &Path) -> Result<Option<u32>, ControlError> {
    let path = pid_path(socket);
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    contents
        .trim()
        .parse::<u32>()
        .map(Some)
        .map_err(|e| ControlError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
}

/// Removes the socket and the PID file recorded for it.
pub fn cleanup_runtime(socket: &Path) -> Result<(), ControlError> {
    if socket.exists() {
        let _ = fs::remove_file(socket);
    }

    let pid_path = pid_path(socket);
    if pid_path.exists() {
        let _ = fs::remove_file(pid_path);
    }

    Ok(())
}
