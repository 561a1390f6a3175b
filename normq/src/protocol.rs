//! Wire payloads exchanged with the checking service.
//!
//! Requests and replies are JSON documents. A file request carries the full
//! source text; a control request carries only an action tag. Replies carry
//! any subset of `filename`, `display` and `stop`; a missing key means the
//! field does not apply to that reply.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::trace;

use crate::errors::{ClientError, ClientResult};

/// One source file ready to be checked remotely
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileTask {
    /// Absolute path of the file, echoed back by the service
    pub filename: String,
    /// Full text of the file
    pub content: String,
    /// Rule identifiers to disable for this check
    pub rules: Vec<String>,
}

impl FileTask {
    /// Reads `path` and builds the task for it
    pub fn load(path: &Path, rules: &[String]) -> ClientResult<Self> {
        trace!("Reading source file: {}", path.display());
        let bytes = std::fs::read(path).map_err(|e| ClientError::from_io(path, e))?;
        let content = String::from_utf8(bytes).map_err(|e| ClientError::encoding_error(path, e))?;

        Ok(Self {
            filename: path.to_string_lossy().into_owned(),
            content,
            rules: rules.to_vec(),
        })
    }

    pub fn path(&self) -> PathBuf {
        PathBuf::from(&self.filename)
    }
}

/// Non-file requests understood by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    /// Ask for the server version
    Version,
    /// Ask for the list of server rules
    Help,
}

/// Body of a published request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Request {
    File(FileTask),
    Control { action: ControlAction },
}

impl Request {
    pub fn to_json(&self) -> ClientResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Decoded reply body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<bool>,
}

impl ResultMessage {
    /// Decodes a raw reply; failure keeps the offending body in the error
    pub fn decode(raw: &[u8]) -> ClientResult<Self> {
        serde_json::from_slice(raw).map_err(|e| ClientError::malformed_reply(raw, e))
    }

    pub fn for_file(filename: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            filename: Some(filename.into()),
            display: Some(display.into()),
            stop: None,
        }
    }

    pub fn is_stop(&self) -> bool {
        self.stop == Some(true)
    }
}

/// A request ready for the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEnvelope {
    pub body: Vec<u8>,
    /// Session token shared by every request of a run
    pub correlation_id: String,
    /// Name of the exclusive reply queue
    pub reply_to: String,
}
