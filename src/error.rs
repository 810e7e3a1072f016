//! Error types for Inbox Sentinel.

use std::time::Duration;

/// Top-level error type for the triage pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Draft error: {0}")]
    Draft(#[from] DraftError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mailbox (IMAP) errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("Failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("Authentication failed for {user}")]
    AuthFailed { user: String },

    #[error("Command {command} rejected by server: {reason}")]
    CommandRejected { command: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Message {uid} not found in {folder}")]
    NotFound { uid: u32, folder: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasoning-service errors.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("Request to {endpoint} failed: {reason}")]
    RequestFailed { endpoint: String, reason: String },

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Service returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("No usable text in service response: {0}")]
    InvalidResponse(String),

    #[error("Service returned an empty response")]
    Empty,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Draft assembly errors.
#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("Invalid address {address}: {reason}")]
    Address { address: String, reason: String },

    #[error("Could not assemble draft message: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("Thread has no messages to reply to")]
    EmptyThread,
}

/// Report rendering/writing errors.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Failed to write report to {path}: {reason}")]
    WriteFailed { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the pipeline.
pub type Result<T> = std::result::Result<T, Error>;
