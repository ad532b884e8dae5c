//! Error handling for botvisor.
use thiserror::Error;

/// Errors returned by [`crate::supervisor::ProcessSupervisor`] operations.
///
/// Every variant renders as a short, user-facing message; the control server
/// forwards `to_string()` verbatim as the `message` field of its responses.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// `start` was called while a bot process is already owned.
    #[error("the bot process is already running")]
    AlreadyRunning,

    /// `stop` was called while no bot process is owned.
    #[error("the bot is not running")]
    NotRunning,

    /// The configured runtime could not be resolved on `PATH`.
    #[error("runtime '{runtime}' not found on this system")]
    ExecutableNotFound {
        /// The runtime that was looked up (e.g. `node`).
        runtime: String,
    },

    /// The OS refused to create the bot process.
    #[error("failed to start the bot: {source}")]
    SpawnFailure {
        /// The underlying spawn error.
        #[source]
        source: std::io::Error,
    },

    /// Termination signals could not be delivered or the process survived `SIGKILL`.
    ///
    /// The supervisor has already released the process when this is returned.
    #[error("failed to terminate bot process {pid}: {source}")]
    TerminationFailure {
        /// PID of the process that resisted termination.
        pid: u32,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    LockPoisoned(String),
}

/// Implement the `From` trait to convert a `std::sync::PoisonError` into a `SupervisorError`.
impl<T> From<std::sync::PoisonError<T>> for SupervisorError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        SupervisorError::LockPoisoned(err.to_string())
    }
}

/// Errors raised while loading `botvisor.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading or accessing a configuration file.
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A `${VAR}` reference names a variable that is not set.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// A field holds a value outside of its accepted range or grammar.
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Configuration key that failed validation.
        field: &'static str,
        /// Human-readable reason.
        reason: String,
    },
}
