use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Error surface for daemon startup, runtime and the client side of the socket.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon rejected the request: {0}")]
    Rejected(&'static str),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },

    #[error("daemon socket already in use: {socket}")]
    SocketInUse { socket: PathBuf },
}

/// Failure of one framed exchange. Always local to a single connection.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer closed the connection before a full frame was received")]
    ShortRead,

    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },

    #[error("timed out waiting for peer")]
    Timeout,

    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure to hand a summary to the mail transport.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to pipe message to {program}: {source}")]
    Write {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Rejected {
        program: PathBuf,
        status: ExitStatus,
        stderr: String,
    },

    #[error("failed to build summary message: {0}")]
    Message(#[source] lettre::error::Error),

    #[error("SMTP delivery via {server} failed: {source}")]
    Smtp {
        server: String,
        #[source]
        source: lettre::transport::smtp::Error,
    },
}

/// Invalid or unreadable daemon configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid schedule '{0}'; expected HH:MM (UTC)")]
    InvalidSchedule(String),

    #[error("no mail recipient configured; set mail.to or pass --to")]
    MissingRecipient,

    #[error("max_connections must be between 1 and {max}, got {got}")]
    MaxConnections { got: usize, max: usize },

    #[error("invalid mail address '{address}': {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: lettre::address::AddressError,
    },

    #[error("mail.smtp.server must not be empty")]
    MissingSmtpServer,

    #[error("SMTP username and password_file must be set together")]
    IncompleteCredentials,

    #[error("failed to read SMTP password file {path}: {source}")]
    PasswordRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SMTP password file {path} {reason}")]
    PasswordFile { path: PathBuf, reason: &'static str },

    #[error("invalid SMTP relay '{server}': {source}")]
    SmtpRelay {
        server: String,
        #[source]
        source: lettre::transport::smtp::Error,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
