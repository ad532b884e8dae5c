//! Botvisor supervises a single locally hosted chat-bot process. It starts and
//! stops the bot as a child process, captures its console output into a
//! bounded in-memory log, infers health from marker strings in that output, and
//! optionally restarts the bot after a crash. A small resident server exposes
//! those operations to the CLI over a unix socket.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Default values and status messages.
pub mod constants;

/// Error handling.
pub mod error;

/// Marker-based health inference.
pub mod health;

/// IPC helpers for communicating with the resident server.
pub mod ipc;

/// Captured output buffer.
pub mod logs;

/// Output reader threads.
pub mod reader;

/// Resident control server.
pub mod server;

/// Child process supervision.
pub mod supervisor;
