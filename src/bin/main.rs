use nix::{errno::Errno, sys::signal, unistd::Pid};
use std::{error::Error, path::Path};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use botvisor::{
    cli::{Cli, Commands, parse_args},
    config::load_config,
    ipc::{self, ControlCommand, ControlError, ControlResponse},
    server::ControlServer,
    supervisor::ProcessSupervisor,
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    let command = match args.command {
        Commands::Serve { config } => return serve(&config, args.socket.as_deref()),
        Commands::Start => ControlCommand::Start,
        Commands::Stop => ControlCommand::Stop,
        Commands::Restart => ControlCommand::Restart,
        Commands::Status { json } => {
            let socket = ipc::resolve_socket_path(args.socket.as_deref())?;
            return show_status(&socket, json);
        }
        Commands::Logs { lines } => ControlCommand::Logs { lines },
        Commands::Shutdown => ControlCommand::Shutdown,
    };

    let socket = ipc::resolve_socket_path(args.socket.as_deref())?;
    match send_control_command(&socket, &command)? {
        ControlResponse::Action { success, message } => {
            println!("{message}");
            if !success {
                return Err(ControlError::Server(message).into());
            }
        }
        ControlResponse::Logs { logs } => {
            for line in logs {
                println!("{line}");
            }
        }
        other => warn!("Unexpected response from server: {other:?}"),
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn serve(config_path: &str, socket_override: Option<&Path>) -> Result<(), Box<dyn Error>> {
    let config = load_config(Some(config_path))?;
    let socket = match socket_override.or(config.socket.as_deref()) {
        Some(path) => path.to_path_buf(),
        None => ipc::default_socket_path()?,
    };

    if server_running(&socket) {
        warn!("botvisor server already listening on {socket:?}; aborting duplicate serve");
        return Err(ControlError::Server("server already running".into()).into());
    }

    info!("Serving bot '{}' from {config_path}", config.name);
    let supervisor = ProcessSupervisor::new(config);
    register_signal_handler(supervisor.clone(), socket.clone())?;

    let server = ControlServer::new(supervisor, socket);
    if let Err(err) = server.run() {
        error!("Server exited with error: {err}");
        return Err(err.into());
    }

    Ok(())
}

fn show_status(socket: &Path, json: bool) -> Result<(), Box<dyn Error>> {
    match send_control_command(socket, &ControlCommand::Status)? {
        ControlResponse::Status {
            status,
            message,
            detail,
        } => {
            if json {
                println!("{}", serde_json::to_string_pretty(&detail)?);
            } else {
                println!("{status}: {message}");
                if let Some(pid) = detail.pid {
                    println!("pid: {pid}");
                }
                if let Some(exit) = detail.last_exit {
                    println!(
                        "last exit: {} (run {}, restarted: {})",
                        exit.exit, exit.generation, exit.restarted
                    );
                }
            }
        }
        other => warn!("Unexpected response from server: {other:?}"),
    }

    Ok(())
}

/// Returns `true` if the PID recorded next to `socket` belongs to a live process.
/// Stale runtime files are removed.
fn server_running(socket: &Path) -> bool {
    match ipc::read_server_pid(socket) {
        Ok(Some(pid)) => match signal::kill(Pid::from_raw(pid as i32), None) {
            Ok(()) => true,
            Err(Errno::ESRCH) => {
                let _ = ipc::cleanup_runtime(socket);
                false
            }
            Err(err) => {
                warn!("Failed to query server pid {pid}: {err}");
                false
            }
        },
        Ok(None) | Err(_) => false,
    }
}

fn send_control_command(
    socket: &Path,
    command: &ControlCommand,
) -> Result<ControlResponse, Box<dyn Error>> {
    match ipc::send_command(socket, command) {
        Ok(response) => Ok(response),
        Err(ControlError::NotAvailable) => {
            let _ = ipc::cleanup_runtime(socket);
            Err(format!("no botvisor server listening on {}", socket.display()).into())
        }
        Err(err) => Err(err.into()),
    }
}

fn register_signal_handler(
    supervisor: ProcessSupervisor,
    socket: std::path::PathBuf,
) -> Result<(), Box<dyn Error>> {
    ctrlc::set_handler(move || {
        info!("botvisor is shutting down... stopping bot");

        if let Err(err) = supervisor.shutdown() {
            error!("Failed to stop bot during shutdown: {err}");
        }
        let _ = ipc::cleanup_runtime(&socket);

        std::process::exit(0);
    })?;

    Ok(())
}
