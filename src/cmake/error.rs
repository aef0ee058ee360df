//! Error types for the CMake interoperability layer
//!
//! Every fatal condition raised while driving CMake, reading its replies or
//! converting its targets ends up as a [`CMakeError`]. Lower layers (process,
//! transport, framing) keep their own error enums and are converted here.

use crate::io::process::ProcessError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CMakeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Failed to parse CMake trace at offset {position}: {snippet:?}")]
    TraceLex { position: usize, snippet: String },

    #[error("CMake: {function}() {message}\n{tline}")]
    TraceCall {
        function: String,
        message: String,
        tline: String,
    },

    #[error("Key \"{key}\" is missing from CMake server message type {kind}")]
    MissingKey { key: String, kind: String },

    #[error("Received unknown message type \"{0}\"")]
    UnknownMessageType(String),

    #[error("Received unknown reply type \"{0}\"")]
    UnknownReplyType(String),

    #[error("CMake server protocol error: {0}")]
    Protocol(String),

    #[error("CMake server query failed: {0}")]
    QueryFailed(String),

    #[error("The CMake server was already started")]
    ServerAlreadyStarted,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("CMake file API: {0}")]
    FileApi(String),

    #[error("Unable to find CMake: {0}")]
    NotFound(String),

    #[error("Failed to parse the CMake version from: {0:?}")]
    VersionParse(String),

    #[error("CMake {found} is too old, version {required} is required")]
    VersionTooOld { found: String, required: String },

    #[error("Unsupported backend for CMake subprojects: {0}")]
    UnsupportedBackend(String),

    #[error("Failed to configure the CMake subproject in {build_dir} (exit code {code:?})")]
    ConfigureFailed { build_dir: PathBuf, code: Option<i32> },

    #[error("Cycle in CMake inherits detected at target {0}")]
    Cycle(String),

    #[error("Unknown target type \"{0}\"")]
    UnknownTargetType(String),

    #[error("Invalid CMake define: {0}")]
    InvalidDefine(String),

    #[error("CMakeInterpreter was not initialized")]
    NotInitialised,

    #[error("CMakeInterpreter was not analysed")]
    NotAnalysed,
}

impl CMakeError {
    /// Build the error raised by a trace handler for an unsupported call
    pub fn trace_call(
        function: &str,
        message: impl Into<String>,
        tline: &impl std::fmt::Display,
    ) -> Self {
        CMakeError::TraceCall {
            function: function.to_string(),
            message: message.into(),
            tline: tline.to_string(),
        }
    }

    pub fn missing_key(key: &str, kind: &str) -> Self {
        CMakeError::MissingKey {
            key: key.to_string(),
            kind: kind.to_string(),
        }
    }
}

pub type CMakeResult<T> = Result<T, CMakeError>;
