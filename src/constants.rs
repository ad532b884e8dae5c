//! Constants and default configuration values for botvisor.
//!
//! Every tunable here can be overridden from `botvisor.yaml`; the values below
//! are what an empty configuration file resolves to.

use std::time::Duration;

// ============================================================================
// Health Markers
// ============================================================================

/// Substring printed by the bot on stdout once it is connected and ready.
pub const DEFAULT_ONLINE_MARKER: &str = "PAINEL_STATUS:BOT_ONLINE_READY";

/// Substrings that indicate the bot failed to authenticate with its gateway.
pub const DEFAULT_AUTH_ERROR_MARKERS: &[&str] = &["Invalid Token", "DISALLOWED_INTENTS"];

/// Prefix prepended to every captured stderr line.
pub const STDERR_LINE_PREFIX: &str = "ERROR: ";

// ============================================================================
// Managed Process
// ============================================================================

/// Runtime resolved on `PATH` to launch the bot.
pub const DEFAULT_RUNTIME: &str = "node";

/// Entry file handed to the runtime, relative to the working directory.
pub const DEFAULT_ENTRY: &str = "index.js";

/// Display name used in status messages.
pub const DEFAULT_DISPLAY_NAME: &str = "Bot";

/// Default configuration file name looked up in the current directory.
pub const DEFAULT_CONFIG_FILE: &str = "botvisor.yaml";

// ============================================================================
// Process Management Timing
// ============================================================================

/// Maximum time to wait for the bot to exit after `SIGTERM` before `SIGKILL`.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Pause between the stop and start halves of a restart.
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Fixed delay before respawning a crashed bot.
pub const DEFAULT_CRASH_BACKOFF: Duration = Duration::from_secs(1);

/// Interval at which the exit watcher and stop loop poll the child.
pub const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to wait for the kernel to reap the child after `SIGKILL`.
pub const KILL_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// Logging and Output Constants
// ============================================================================

/// Number of lines returned by a logs request when none is specified.
pub const DEFAULT_LOG_TAIL: usize = 100;

/// Number of captured lines retained in memory.
pub const DEFAULT_LOG_RETENTION: usize = 1000;

// ============================================================================
// Status Messages
// ============================================================================

/// Message shown before the first start.
pub const MSG_STOPPED: &str = "stopped";

/// Message shown while waiting for the readiness marker.
pub const MSG_STARTING: &str = "starting...";

/// Message shown after an authentication marker was observed.
pub const MSG_AUTH_ERROR: &str = "connection error (check token/intents)";

/// Message shown after output arrived on stderr.
pub const MSG_RUNTIME_ERROR: &str = "runtime error (check logs)";

/// Message shown after the process exited on its own.
pub const MSG_TERMINATED: &str = "process terminated";

/// Message shown when a status check discovers the process already died.
pub const MSG_TERMINATED_UNEXPECTEDLY: &str = "process terminated unexpectedly";

/// Message shown when a stop called off a scheduled crash restart.
pub const MSG_RESTART_CANCELLED: &str = "pending restart cancelled";

/// Message shown when the bot could not be spawned.
pub const MSG_START_FAILED: &str = "failed to start";
