//! Typed view of inbound DAP requests.

use kiln_config::ScopeKind;
use kiln_remote::RemoteMethod;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::breakpoints::SourceBreakpoint;
use crate::dap::messages::Request;
use crate::dap::types::Source;
use crate::error::LaunchError;

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Initialize,
    Launch(LaunchArguments),
    SetBreakpoints(SetBreakpointsArguments),
    ConfigurationDone,
    Threads,
    StackTrace(StackTraceArguments),
    Scopes(ScopesArguments),
    Variables(VariablesArguments),
    Evaluate(EvaluateArguments),
    Control(Control),
    Disconnect(DisconnectArguments),
    Terminate,
    Source(SourceArguments),
    Unknown(String),
}

/// Execution-control requests, each forwarded as one remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Next,
    StepIn,
    StepOut,
    Pause,
}

impl Control {
    pub fn remote_method(self) -> RemoteMethod {
        match self {
            Control::Continue => RemoteMethod::Continue,
            Control::Next => RemoteMethod::StepOver,
            Control::StepIn => RemoteMethod::StepInto,
            Control::StepOut => RemoteMethod::StepOut,
            Control::Pause => RemoteMethod::Pause,
        }
    }

    /// Whether the debuggee resumes once the remote host accepts the request.
    pub fn resumes(self) -> bool {
        !matches!(self, Control::Pause)
    }
}

impl Command {
    /// Parse `request` into a command. Unknown command names are not an error;
    /// malformed arguments of a known command are.
    pub fn from_request(request: &Request) -> Result<Self, serde_json::Error> {
        let args = &request.arguments;
        let command = match request.command.as_str() {
            "initialize" => Command::Initialize,
            "launch" => Command::Launch(parse_args(args)?),
            "setBreakpoints" => Command::SetBreakpoints(parse_args(args)?),
            "configurationDone" => Command::ConfigurationDone,
            "threads" => Command::Threads,
            "stackTrace" => Command::StackTrace(parse_args(args)?),
            "scopes" => Command::Scopes(parse_args(args)?),
            "variables" => Command::Variables(parse_args(args)?),
            "evaluate" => Command::Evaluate(parse_args(args)?),
            "continue" => Command::Control(Control::Continue),
            "next" => Command::Control(Control::Next),
            "stepIn" => Command::Control(Control::StepIn),
            "stepOut" => Command::Control(Control::StepOut),
            "pause" => Command::Control(Control::Pause),
            "disconnect" => Command::Disconnect(parse_args(args)?),
            "terminate" => Command::Terminate,
            "source" => Command::Source(parse_args(args)?),
            other => Command::Unknown(other.to_owned()),
        };
        Ok(command)
    }
}

fn parse_args<T: DeserializeOwned>(arguments: &Value) -> Result<T, serde_json::Error> {
    match arguments {
        // Clients may omit `arguments` entirely for requests whose fields are all optional.
        Value::Null => serde_json::from_value(Value::Object(Default::default())),
        other => T::deserialize(other),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArguments {
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub is_console_debug: bool,
    #[serde(default)]
    pub console_code: Option<String>,
    #[serde(default)]
    pub stop_on_entry: bool,
    #[serde(default)]
    pub scope: Option<ScopeKind>,
    #[serde(default)]
    pub perspective_session_id: Option<String>,
    #[serde(default)]
    pub perspective_page_id: Option<String>,
    #[serde(default)]
    pub perspective_view_instance_id: Option<String>,
    #[serde(default)]
    pub perspective_component_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    Program(String),
    Console(String),
}

/// Component-scoped execution context for `perspective` launches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerspectiveContext {
    pub session_id: String,
    pub page_id: Option<String>,
    pub view_instance_id: Option<String>,
    pub component_path: Option<String>,
}

/// Launch arguments after the synchronous precondition checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub target: LaunchTarget,
    pub scope: ScopeKind,
    pub stop_on_entry: bool,
    pub perspective: Option<PerspectiveContext>,
}

impl LaunchArguments {
    pub fn validate(self, default_scope: ScopeKind) -> Result<LaunchPlan, LaunchError> {
        let program = self.program.filter(|p| !p.trim().is_empty());
        let target = match (program, self.is_console_debug) {
            (Some(_), true) => return Err(LaunchError::ConflictingTargets),
            (None, true) => match self.console_code {
                Some(code) => LaunchTarget::Console(code),
                None => return Err(LaunchError::MissingConsoleCode),
            },
            (Some(program), false) => LaunchTarget::Program(program),
            (None, false) => return Err(LaunchError::MissingTarget),
        };

        let scope = self.scope.unwrap_or(default_scope);
        let perspective = match scope {
            ScopeKind::Perspective => {
                let session_id = self
                    .perspective_session_id
                    .filter(|id| !id.is_empty())
                    .ok_or(LaunchError::MissingPerspectiveSession)?;
                Some(PerspectiveContext {
                    session_id,
                    page_id: self.perspective_page_id,
                    view_instance_id: self.perspective_view_instance_id,
                    component_path: self.perspective_component_path,
                })
            }
            ScopeKind::Designer | ScopeKind::Gateway => None,
        };

        Ok(LaunchPlan {
            target,
            scope,
            stop_on_entry: self.stop_on_entry,
            perspective,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub source: Source,
    #[serde(default)]
    pub breakpoints: Option<Vec<SourceBreakpoint>>,
    /// Deprecated line-only form, used when `breakpoints` is absent.
    #[serde(default)]
    pub lines: Option<Vec<u32>>,
}

impl SetBreakpointsArguments {
    pub fn specs(&self) -> Vec<SourceBreakpoint> {
        match (&self.breakpoints, &self.lines) {
            (Some(breakpoints), _) => breakpoints.clone(),
            (None, Some(lines)) => lines
                .iter()
                .map(|&line| SourceBreakpoint {
                    line,
                    condition: None,
                    hit_condition: None,
                })
                .collect(),
            (None, None) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    #[serde(default)]
    pub thread_id: Option<i64>,
    #[serde(default)]
    pub start_frame: Option<i64>,
    #[serde(default)]
    pub levels: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopesArguments {
    pub frame_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    pub variables_reference: i64,
    #[serde(default)]
    pub start: Option<i64>,
    #[serde(default)]
    pub count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArguments {
    pub expression: String,
    #[serde(default)]
    pub frame_id: Option<i64>,
    #[serde(default)]
    pub context: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectArguments {
    #[serde(default)]
    pub terminate_debuggee: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceArguments {
    #[serde(default)]
    pub source: Option<Source>,
    #[serde(default)]
    pub source_reference: Option<i64>,
}
