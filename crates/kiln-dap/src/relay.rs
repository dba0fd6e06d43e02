//! Remote reply shapes and their reshaping into DAP bodies.
//!
//! Frame, scope and variable reference numbers are assigned by the remote host
//! and passed through untouched so later `scopes`/`variables` requests resolve.

use kiln_remote::RemoteBreakpoint;
use serde::Deserialize;

use crate::dap::types::{EvaluateResult, Scope, Source, StackFrame, Variable};
use crate::path_map::{PathMapper, CONSOLE_SOURCE_NAME, CONSOLE_SOURCE_REFERENCE};
use crate::session::LaunchSource;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionReply {
    pub session_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SetBreakpointsReply {
    #[serde(default)]
    pub breakpoints: Vec<RemoteBreakpoint>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStackFrame {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub line: i64,
    #[serde(default)]
    pub column: Option<i64>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub module_path: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceReply {
    #[serde(default)]
    pub stack_frames: Vec<RemoteStackFrame>,
    #[serde(default)]
    pub total_frames: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteScope {
    name: String,
    variables_reference: i64,
    #[serde(default)]
    expensive: bool,
    #[serde(default)]
    named_variables: Option<i64>,
    #[serde(default)]
    indexed_variables: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScopesReply {
    #[serde(default)]
    scopes: Vec<RemoteScope>,
}

impl ScopesReply {
    pub fn into_scopes(self) -> Vec<Scope> {
        self.scopes
            .into_iter()
            .map(|scope| Scope {
                name: scope.name,
                variables_reference: scope.variables_reference,
                expensive: scope.expensive,
                named_variables: scope.named_variables,
                indexed_variables: scope.indexed_variables,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteVariable {
    name: String,
    #[serde(default)]
    value: String,
    #[serde(rename = "type", default)]
    type_: Option<String>,
    #[serde(default)]
    variables_reference: i64,
    #[serde(default)]
    named_variables: Option<i64>,
    #[serde(default)]
    indexed_variables: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VariablesReply {
    #[serde(default)]
    variables: Vec<RemoteVariable>,
}

impl VariablesReply {
    pub fn into_variables(self) -> Vec<Variable> {
        self.variables
            .into_iter()
            .map(|var| Variable {
                name: var.name,
                value: var.value,
                type_: var.type_,
                variables_reference: var.variables_reference,
                named_variables: var.named_variables,
                indexed_variables: var.indexed_variables,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateReply {
    #[serde(default)]
    result: String,
    #[serde(rename = "type", default)]
    type_: Option<String>,
    #[serde(default)]
    variables_reference: i64,
}

impl From<EvaluateReply> for EvaluateResult {
    fn from(reply: EvaluateReply) -> Self {
        EvaluateResult {
            result: reply.result,
            type_: reply.type_,
            variables_reference: reply.variables_reference,
        }
    }
}

/// Resolves the `source` of relayed stack frames for the current launch.
pub struct FrameSources<'a> {
    mapper: &'a PathMapper,
    launch: Option<&'a LaunchSource>,
}

impl<'a> FrameSources<'a> {
    pub fn new(mapper: &'a PathMapper, launch: Option<&'a LaunchSource>) -> Self {
        Self { mapper, launch }
    }

    pub fn frame(&self, frame: RemoteStackFrame) -> StackFrame {
        let source = self.source_for(&frame);
        StackFrame {
            id: frame.id,
            name: frame.name,
            line: frame.line,
            column: frame.column.unwrap_or(1),
            source,
        }
    }

    fn source_for(&self, frame: &RemoteStackFrame) -> Option<Source> {
        let module = frame.module_path.as_deref();
        if module == Some(CONSOLE_SOURCE_NAME) {
            return Some(console_source());
        }

        if let Some(path) = &frame.file_path {
            let name = module
                .map(str::to_owned)
                .or_else(|| file_name(path).map(str::to_owned));
            return Some(Source {
                name,
                path: Some(path.clone()),
                source_reference: None,
            });
        }

        match (module, self.launch) {
            (Some(module), Some(LaunchSource::File { project_root, .. })) => Some(Source {
                name: Some(module.to_owned()),
                path: Some(self.mapper.file_for_module(project_root, module)),
                source_reference: None,
            }),
            (Some(module), _) => Some(Source {
                name: Some(module.to_owned()),
                path: None,
                source_reference: None,
            }),
            (None, Some(LaunchSource::Console { .. })) => Some(console_source()),
            (None, _) => None,
        }
    }
}

pub fn console_source() -> Source {
    Source {
        name: Some(CONSOLE_SOURCE_NAME.to_owned()),
        path: None,
        source_reference: Some(CONSOLE_SOURCE_REFERENCE),
    }
}

fn file_name(path: &str) -> Option<&str> {
    path.rsplit(['/', '\\']).next().filter(|name| !name.is_empty())
}
