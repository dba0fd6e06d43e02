use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Remote procedures exposed by the script-execution host's debug endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteMethod {
    StartSession,
    SetBreakpoints,
    StopSession,
    GetStackTrace,
    GetScopes,
    GetVariables,
    Continue,
    StepOver,
    StepInto,
    StepOut,
    Pause,
    Evaluate,
    Run,
}

impl RemoteMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteMethod::StartSession => "startSession",
            RemoteMethod::SetBreakpoints => "setBreakpoints",
            RemoteMethod::StopSession => "stopSession",
            RemoteMethod::GetStackTrace => "getStackTrace",
            RemoteMethod::GetScopes => "getScopes",
            RemoteMethod::GetVariables => "getVariables",
            RemoteMethod::Continue => "continue",
            RemoteMethod::StepOver => "stepOver",
            RemoteMethod::StepInto => "stepInto",
            RemoteMethod::StepOut => "stepOut",
            RemoteMethod::Pause => "pause",
            RemoteMethod::Evaluate => "evaluate",
            RemoteMethod::Run => "run",
        }
    }
}

impl fmt::Display for RemoteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("not connected")]
    NotConnected,

    /// The remote host answered with a failure. The message is kept verbatim.
    #[error("{message}")]
    Rejected { message: String },

    #[error("remote request {method} timed out")]
    Timeout { method: RemoteMethod },

    #[error("connection closed")]
    ConnectionClosed,

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("invalid remote reply: {message}")]
    Decode { message: String },
}

impl RemoteError {
    pub fn rejected(message: impl Into<String>) -> Self {
        RemoteError::Rejected {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for RemoteError {
    fn from(err: std::io::Error) -> Self {
        RemoteError::Transport {
            message: err.to_string(),
        }
    }
}

/// Per-breakpoint binding result reported by the remote host, either in a
/// `setBreakpoints` reply or in a `breakpoint` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteBreakpoint {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoppedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default = "StoppedEvent::default_reason")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breakpoint_ids: Vec<i64>,
}

impl StoppedEvent {
    fn default_reason() -> String {
        "pause".to_owned()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub exit_code: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminatedEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub breakpoint: RemoteBreakpoint,
}

/// Unsolicited notifications pushed by the remote host.
///
/// On the wire these are `{"event": "<name>", "params": {...}}` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "params", rename_all = "camelCase")]
pub enum RemoteEvent {
    Stopped(StoppedEvent),
    Output(OutputEvent),
    Exited(ExitedEvent),
    Terminated(TerminatedEvent),
    Breakpoint(BreakpointEvent),
}

impl RemoteEvent {
    pub fn session_id(&self) -> Option<&str> {
        match self {
            RemoteEvent::Stopped(e) => e.session_id.as_deref(),
            RemoteEvent::Output(e) => e.session_id.as_deref(),
            RemoteEvent::Exited(e) => e.session_id.as_deref(),
            RemoteEvent::Terminated(e) => e.session_id.as_deref(),
            RemoteEvent::Breakpoint(e) => e.session_id.as_deref(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RemoteEvent::Stopped(_) => "stopped",
            RemoteEvent::Output(_) => "output",
            RemoteEvent::Exited(_) => "exited",
            RemoteEvent::Terminated(_) => "terminated",
            RemoteEvent::Breakpoint(_) => "breakpoint",
        }
    }
}
