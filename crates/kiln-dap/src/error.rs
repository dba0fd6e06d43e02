use thiserror::Error;

use crate::dap::codec::DapError;

/// Lifecycle transitions the controller refuses.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("a launch is already in progress")]
    LaunchInProgress,
    #[error("a debug session is already active")]
    SessionActive,
}

/// Reasons a `launch` request fails before or without a remote session.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("`program` and `isConsoleDebug` cannot be combined")]
    ConflictingTargets,
    #[error("console debugging requires `consoleCode`")]
    MissingConsoleCode,
    #[error("launch requires either `program` or `isConsoleDebug` with `consoleCode`")]
    MissingTarget,
    #[error("scope `perspective` requires `perspectiveSessionId`")]
    MissingPerspectiveSession,
    #[error("{program} is not inside a `{marker}` script library")]
    NotInScriptLibrary { program: String, marker: String },
    #[error("failed to read {program}: {source}")]
    ReadProgram {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// Arguments that do not deserialize; the message is already redacted.
    #[error("invalid arguments for launch: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Dap(#[from] DapError),
}

pub type ServerResult<T> = Result<T, ServerError>;
