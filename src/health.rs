//! Health inference for the managed bot.
//!
//! The bot is a black box whose only observable channel is its console output,
//! so health is derived from fixed substrings ("markers") appearing in captured
//! lines. Matching is case-sensitive and unanchored.
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

use crate::{
    constants::{
        DEFAULT_AUTH_ERROR_MARKERS, DEFAULT_ONLINE_MARKER, MSG_AUTH_ERROR,
        MSG_RUNTIME_ERROR, MSG_STARTING, MSG_STOPPED,
    },
    logs::LogStream,
};

/// Coarse lifecycle state of the bot.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HealthState {
    /// No process is owned.
    #[default]
    Stopped,
    /// A process was spawned but has not printed the readiness marker yet.
    Starting,
    /// The readiness marker was observed.
    Online,
    /// An authentication marker or stderr output was observed.
    Error,
}

impl HealthState {
    /// States that may only be held while a process is owned.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Online | Self::Error)
    }
}

/// What a single captured line says about the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The readiness marker appeared on stdout.
    Ready,
    /// An authentication or permission failure marker appeared.
    AuthFailure,
    /// Something was written to stderr.
    StderrOutput,
}

/// Marker strings used to classify output lines.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Markers {
    /// Readiness marker, only honoured on stdout.
    pub online: String,
    /// Authentication failure markers, honoured on both streams.
    pub auth_errors: Vec<String>,
}

impl Default for Markers {
    fn default() -> Self {
        Self {
            online: DEFAULT_ONLINE_MARKER.to_string(),
            auth_errors: DEFAULT_AUTH_ERROR_MARKERS
                .iter()
                .map(|marker| marker.to_string())
                .collect(),
        }
    }
}

impl Markers {
    /// Classifies a line. Lines without a recognised marker yield `None`,
    /// except stderr lines, which always count as an error observation.
    pub fn classify(&self, stream: LogStream, line: &str) -> Option<Observation> {
        match stream {
            LogStream::Stdout => {
                if !self.online.is_empty() && line.contains(self.online.as_str()) {
                    Some(Observation::Ready)
                } else if self.matches_auth_error(line) {
                    Some(Observation::AuthFailure)
                } else {
                    None
                }
            }
            LogStream::Stderr => {
                if self.matches_auth_error(line) {
                    Some(Observation::AuthFailure)
                } else {
                    Some(Observation::StderrOutput)
                }
            }
        }
    }

    fn matches_auth_error(&self, line: &str) -> bool {
        self.auth_errors
            .iter()
            .any(|marker| !marker.is_empty() && line.contains(marker.as_str()))
    }
}

/// Health state paired with the message shown to operators.
///
/// Both fields always change together so that a status read never observes a
/// state from one transition with the message of another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Health {
    state: HealthState,
    message: String,
    display_name: String,
}

impl Health {
    /// Initial health: stopped.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            state: HealthState::Stopped,
            message: MSG_STOPPED.to_string(),
            display_name: display_name.into(),
        }
    }

    /// Current state.
    pub fn state(&self) -> HealthState {
        self.state
    }

    /// Current operator-facing message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Records a successful spawn.
    pub fn mark_starting(&mut self) {
        self.state = HealthState::Starting;
        self.message = MSG_STARTING.to_string();
    }

    /// Settles into `Stopped` with the given message.
    pub fn mark_stopped(&mut self, message: impl Into<String>) {
        self.state = HealthState::Stopped;
        self.message = message.into();
    }

    /// Replaces the message without changing the state.
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    /// Applies an observation and returns the new state if it changed.
    ///
    /// Observations arriving while stopped belong to a process that is no
    /// longer owned and are ignored. `Error` has no path back to `Online`
    /// within the same run.
    pub fn apply(&mut self, observation: Observation) -> Option<HealthState> {
        if !self.state.is_live() {
            return None;
        }

        let previous = self.state;
        match observation {
            Observation::Ready => {
                if self.state == HealthState::Starting {
                    self.state = HealthState::Online;
                    self.message = format!("{} online", self.display_name);
                }
            }
            Observation::AuthFailure => {
                self.state = HealthState::Error;
                self.message = MSG_AUTH_ERROR.to_string();
            }
            Observation::StderrOutput => {
                self.state = HealthState::Error;
                self.message = MSG_RUNTIME_ERROR.to_string();
            }
        }

        (self.state != previous).then_some(self.state)
    }
}
