//! Configuration management for botvisor.
use regex::Regex;
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    constants::{
        DEFAULT_CONFIG_FILE, DEFAULT_CRASH_BACKOFF, DEFAULT_DISPLAY_NAME, DEFAULT_ENTRY,
        DEFAULT_LOG_RETENTION, DEFAULT_RESTART_DELAY, DEFAULT_RUNTIME,
        DEFAULT_STOP_TIMEOUT,
    },
    error::ConfigError,
    health::Markers,
};

/// Represents the structure of the configuration file. Every key is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawConfig {
    name: Option<String>,
    runtime: Option<String>,
    entry: Option<String>,
    args: Vec<String>,
    working_dir: Option<String>,
    auto_start: bool,
    restart_on_crash: bool,
    markers: Markers,
    log_retention: Option<usize>,
    stop_timeout: Option<String>,
    restart_delay: Option<String>,
    crash_backoff: Option<String>,
    socket: Option<String>,
}

/// Whether the bot is launched at boot and relaunched after crashes.
///
/// Fixed when the supervisor is constructed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Start the bot as soon as the resident server comes up.
    pub auto_start: bool,
    /// Respawn the bot after a non-zero exit that the supervisor did not request.
    pub restart_on_crash: bool,
}

/// Resolved supervisor configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Display name used in status messages.
    pub name: String,
    /// Runtime executable resolved on `PATH` (or a path to it).
    pub runtime: String,
    /// Entry file passed as the first argument to the runtime.
    pub entry: String,
    /// Extra arguments appended after the entry file.
    pub args: Vec<String>,
    /// Directory the bot is launched from.
    pub working_dir: PathBuf,
    /// Restart policy.
    pub policy: RestartPolicy,
    /// Markers used for health inference.
    pub markers: Markers,
    /// Number of captured lines kept in memory.
    pub log_retention: usize,
    /// Grace period between `SIGTERM` and `SIGKILL`.
    pub stop_timeout: Duration,
    /// Pause between stop and start during a restart.
    pub restart_delay: Duration,
    /// Delay before respawning a crashed bot.
    pub crash_backoff: Duration,
    /// Control socket override.
    pub socket: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: DEFAULT_DISPLAY_NAME.to_string(),
            runtime: DEFAULT_RUNTIME.to_string(),
            entry: DEFAULT_ENTRY.to_string(),
            args: Vec::new(),
            working_dir: PathBuf::from("."),
            policy: RestartPolicy::default(),
            markers: Markers::default(),
            log_retention: DEFAULT_LOG_RETENTION,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            restart_delay: DEFAULT_RESTART_DELAY,
            crash_backoff: DEFAULT_CRASH_BACKOFF,
            socket: None,
        }
    }
}

impl Config {
    /// Full path to the entry file.
    pub fn entry_path(&self) -> PathBuf {
        self.working_dir.join(&self.entry)
    }

    fn from_raw(raw: RawConfig, base: &Path) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let resolve = |value: &str| {
            let path = Path::new(value);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                base.join(path)
            }
        };

        let log_retention = raw.log_retention.unwrap_or(defaults.log_retention);
        if log_retention == 0 {
            return Err(ConfigError::InvalidValue {
                field: "log_retention",
                reason: "must keep at least one line".into(),
            });
        }

        let runtime = raw.runtime.unwrap_or(defaults.runtime);
        if runtime.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "runtime",
                reason: "cannot be empty".into(),
            });
        }

        Ok(Self {
            name: raw.name.unwrap_or(defaults.name),
            runtime,
            entry: raw.entry.unwrap_or(defaults.entry),
            args: raw.args,
            working_dir: raw
                .working_dir
                .as_deref()
                .map(resolve)
                .unwrap_or_else(|| base.to_path_buf()),
            policy: RestartPolicy {
                auto_start: raw.auto_start,
                restart_on_crash: raw.restart_on_crash,
            },
            markers: raw.markers,
            log_retention,
            stop_timeout: optional_duration(
                "stop_timeout",
                raw.stop_timeout,
                defaults.stop_timeout,
            )?,
            restart_delay: optional_duration(
                "restart_delay",
                raw.restart_delay,
                defaults.restart_delay,
            )?,
            crash_backoff: optional_duration(
                "crash_backoff",
                raw.crash_backoff,
                defaults.crash_backoff,
            )?,
            socket: raw.socket.as_deref().map(resolve),
        })
    }
}

fn optional_duration(
    field: &'static str,
    raw: Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match raw {
        Some(value) => parse_duration(&value).map_err(|reason| {
            ConfigError::InvalidValue { field, reason }
        }),
        None => Ok(default),
    }
}

/// Parses a user-facing duration string in the format `<number>[ms|s|m|h]`.
///
/// A bare number is read as seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let value = raw.trim();
    if value.is_empty() {
        return Err("Duration value cannot be empty".into());
    }

    let parse = |amount: &str| {
        amount
            .trim()
            .parse::<u64>()
            .map_err(|_| format!("Invalid duration value: '{raw}'"))
    };

    if let Some(stripped) = value.strip_suffix("ms") {
        return Ok(Duration::from_millis(parse(stripped)?));
    }

    let (amount_str, multiplier) = if let Some(stripped) = value.strip_suffix('s') {
        (stripped, 1)
    } else if let Some(stripped) = value.strip_suffix('m') {
        (stripped, 60)
    } else if let Some(stripped) = value.strip_suffix('h') {
        (stripped, 3600)
    } else {
        (value, 1)
    };

    Ok(Duration::from_secs(parse(amount_str)?.saturating_mul(multiplier)))
}

/// Expands `$VAR` and `${VAR}` references from the process environment.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?")
        .expect("static env var pattern is valid");

    let mut missing = None;
    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => value,
            Err(_) => {
                missing.get_or_insert_with(|| var_name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(var_name) => Err(ConfigError::MissingEnvVar(var_name)),
        None => Ok(result.into_owned()),
    }
}

/// Parses configuration from YAML text. Relative paths resolve against `base`.
pub fn parse_config(content: &str, base: &Path) -> Result<Config, ConfigError> {
    let expanded = expand_env_vars(content)?;
    let raw: Option<RawConfig> = serde_yaml::from_str(&expanded)?;
    Config::from_raw(raw.unwrap_or_default(), base)
}

/// Loads and parses the configuration file, expanding environment variables.
///
/// Without an explicit path `botvisor.yaml` in the current directory is used.
pub fn load_config(config_path: Option<&str>) -> Result<Config, ConfigError> {
    let config_path = Path::new(config_path.unwrap_or(DEFAULT_CONFIG_FILE));

    let content = fs::read_to_string(config_path).map_err(|e| {
        ConfigError::Read(std::io::Error::new(
            e.kind(),
            format!("{} ({})", e, config_path.display()),
        ))
    })?;

    let base_path = config_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    parse_config(&content, &base_path)
}
