//! Error types for the normq client.
//!
//! Every fallible operation in the library returns [`ClientResult`]. Only the
//! rejection of an explicitly supplied, non-source file is treated as a soft
//! failure (it becomes a warning line on the display); everything else is
//! propagated to the caller with `?` and ends the run.
//!
//! ```rust,ignore
//! match client::run(&config, &request, transport, &sink) {
//!     Ok(summary) => // Report summary,
//!     Err(ClientError::BrokerUnreachable { host, .. }) => // Exit with status 2,
//!     Err(e) => // Print and exit with status 1
//! }
//! ```
use std::path::PathBuf;
use thiserror::Error;

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur while scanning, dispatching or rendering
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Cannot reach broker at {host}: {reason}\nEnsure that this machine is connected to the network serving {host}")]
    BrokerUnreachable { host: String, reason: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Malformed reply {body:?}: {source}")]
    MalformedReply {
        body: String,
        source: serde_json::Error,
    },
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Invalid UTF-8 in file {path}: {source}")]
    Encoding {
        path: PathBuf,
        source: std::string::FromUtf8Error,
    },
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Configuration error: {0}")]
    ConfigLoad(#[from] config::ConfigError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Directory walk failed: {0}")]
    Walk(#[source] ignore::Error),
}

impl ClientError {
    pub fn broker_unreachable(host: impl Into<String>, reason: impl ToString) -> Self {
        Self::BrokerUnreachable {
            host: host.into(),
            reason: reason.to_string(),
        }
    }

    pub fn transport(msg: impl ToString) -> Self {
        Self::Transport(msg.to_string())
    }

    pub fn malformed_reply(raw: &[u8], source: serde_json::Error) -> Self {
        Self::MalformedReply {
            body: String::from_utf8_lossy(raw).into_owned(),
            source,
        }
    }

    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound(path.into())
    }

    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn encoding_error(path: impl Into<PathBuf>, source: std::string::FromUtf8Error) -> Self {
        Self::Encoding {
            path: path.into(),
            source,
        }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Maps an I/O error raised while reading `path` to the most specific variant
    pub fn from_io(path: &std::path::Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::file_not_found(path),
            std::io::ErrorKind::PermissionDenied => Self::permission_denied(path),
            _ => Self::Io(err),
        }
    }

    /// Whether the error means the broker could not be reached at all
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::BrokerUnreachable { .. })
    }
}
