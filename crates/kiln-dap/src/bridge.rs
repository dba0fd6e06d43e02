//! The debug bridge: DAP commands in, remote calls out, remote events back as DAP events.
//!
//! One [`Bridge`] drives one debug session. Its state (lifecycle and breakpoint
//! store) sits behind a synchronous mutex that is never held across a remote
//! call; every remote round-trip re-reads the state once it completes.

use std::future::Future;
use std::sync::Arc;

use kiln_config::{BridgeConfig, ScopeKind};
use kiln_remote::{RemoteConnection, RemoteError, RemoteEvent, RemoteMethod};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};

use crate::breakpoints::{Breakpoint, BreakpointStore, SourceBreakpoint};
use crate::command::{
    Command, Control, EvaluateArguments, LaunchArguments, LaunchPlan, LaunchTarget,
    ScopesArguments, SetBreakpointsArguments, SourceArguments, StackTraceArguments,
    VariablesArguments,
};
use crate::dap::codec::sanitize_json_error_message;
use crate::dap::messages::{Event, OutgoingMessage, Request, Response};
use crate::dap::types::{
    Capabilities, EvaluateResult, OutputEventBody, Source, StoppedEventBody, Thread,
};
use crate::error::LaunchError;
use crate::path_map::{is_console_source, PathMapper, CONSOLE_SOURCE_NAME};
use crate::relay::{
    EvaluateReply, FrameSources, ScopesReply, SetBreakpointsReply, StackTraceReply,
    StartSessionReply, VariablesReply,
};
use crate::session::{LaunchSource, LaunchTicket, SessionController, SessionState};

/// The runtime is single-threaded; every frame and stop belongs to this thread.
pub const THREAD_ID: i64 = 1;
const THREAD_NAME: &str = "Main Thread";

const NO_SESSION: &str = "No active debug session";

/// Sequences and queues everything the bridge sends to the host.
///
/// A sequence number is assigned and the message enqueued under one lock, so
/// the writer observes strictly increasing numbers.
pub struct Outbox {
    inner: Mutex<OutboxInner>,
}

struct OutboxInner {
    next_seq: i64,
    tx: Option<mpsc::UnboundedSender<OutgoingMessage>>,
}

impl Outbox {
    pub fn new(tx: mpsc::UnboundedSender<OutgoingMessage>) -> Self {
        Self {
            inner: Mutex::new(OutboxInner {
                next_seq: 1,
                tx: Some(tx),
            }),
        }
    }

    fn send_with(&self, build: impl FnOnce(i64) -> OutgoingMessage) {
        let mut inner = self.inner.lock();
        let Some(tx) = inner.tx.clone() else {
            return;
        };
        let seq = inner.next_seq;
        inner.next_seq += 1;
        if tx.send(build(seq)).is_err() {
            inner.tx = None;
        }
    }

    pub fn respond(&self, request: &Request, body: Option<Value>) {
        self.send_with(|seq| OutgoingMessage::Response(Response::success(seq, request, body)));
    }

    pub fn respond_error(&self, request: &Request, message: impl Into<String>) {
        let message = message.into();
        self.send_with(|seq| OutgoingMessage::Response(Response::error(seq, request, message)));
    }

    pub fn event(&self, event: &str, body: Option<Value>) {
        self.send_with(|seq| OutgoingMessage::Event(Event::new(seq, event, body)));
    }

    /// Stop accepting messages; the writer drains what is queued and exits.
    pub fn close(&self) {
        self.inner.lock().tx = None;
    }
}

/// Whether the server keeps reading requests after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Keeps the bridge registered for remote events. Dropping it unregisters.
pub struct EventSubscription {
    task: JoinHandle<()>,
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Default)]
struct BridgeState {
    session: SessionController,
    breakpoints: BreakpointStore,
}

pub struct Bridge {
    remote: Arc<dyn RemoteConnection>,
    outbox: Outbox,
    mapper: PathMapper,
    default_scope: ScopeKind,
    state: Mutex<BridgeState>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartSessionParams<'a> {
    code: &'a str,
    module_path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_path: Option<&'a str>,
    scope: ScopeKind,
    stop_on_entry: bool,
    is_console: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    perspective: Option<PerspectiveParams<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PerspectiveParams<'a> {
    session_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    view_instance_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    component_path: Option<&'a str>,
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, RemoteError> {
    serde_json::from_value(value).map_err(|err| RemoteError::Decode {
        message: err.to_string(),
    })
}

fn breakpoints_body(breakpoints: &[Breakpoint]) -> Value {
    let breakpoints: Vec<_> = breakpoints.iter().map(Breakpoint::to_dap).collect();
    json!({ "breakpoints": breakpoints })
}

impl Bridge {
    pub fn new(
        remote: Arc<dyn RemoteConnection>,
        config: &BridgeConfig,
        tx: mpsc::UnboundedSender<OutgoingMessage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            remote,
            outbox: Outbox::new(tx),
            mapper: PathMapper::from_config(config),
            default_scope: config.default_scope,
            state: Mutex::new(BridgeState::default()),
        })
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Start relaying remote events to the host until the returned guard is dropped.
    pub fn subscribe_remote_events(self: &Arc<Self>) -> EventSubscription {
        let mut events = self.remote.subscribe();
        let bridge = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => bridge.on_remote_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(target: "kiln.dap", skipped, "dropped remote events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        EventSubscription { task }
    }

    /// Answer one request.
    ///
    /// Synchronous state changes happen here, in request order. Anything that waits
    /// on the remote host continues on `tasks`, so later requests are still accepted
    /// while a round-trip is in flight.
    pub async fn dispatch(
        self: &Arc<Self>,
        request: Request,
        command: Command,
        tasks: &mut JoinSet<()>,
    ) -> Flow {
        match command {
            Command::Initialize => {
                self.outbox
                    .respond(&request, Some(json!(Capabilities::bridge())));
                self.outbox.event("initialized", None);
            }
            Command::Launch(args) => {
                if let Some(launch) = self.begin_launch(&request, args) {
                    tasks.spawn(launch);
                }
            }
            Command::SetBreakpoints(args) => {
                if let Some(bind) = self.begin_set_breakpoints(&request, args) {
                    tasks.spawn(bind);
                }
            }
            Command::ConfigurationDone => {
                self.spawn_handler(tasks, |bridge| async move {
                    bridge.configuration_done(&request).await
                });
            }
            Command::Threads => {
                let threads = [Thread {
                    id: THREAD_ID,
                    name: THREAD_NAME.to_owned(),
                }];
                self.outbox
                    .respond(&request, Some(json!({ "threads": threads })));
            }
            Command::StackTrace(args) => {
                self.spawn_handler(tasks, |bridge| async move {
                    bridge.stack_trace(&request, args).await
                });
            }
            Command::Scopes(args) => {
                self.spawn_handler(tasks, |bridge| async move {
                    bridge.scopes(&request, args).await
                });
            }
            Command::Variables(args) => {
                self.spawn_handler(tasks, |bridge| async move {
                    bridge.variables(&request, args).await
                });
            }
            Command::Evaluate(args) => {
                self.spawn_handler(tasks, |bridge| async move {
                    bridge.evaluate(&request, args).await
                });
            }
            Command::Control(control) => {
                if let Some(call) = self.begin_control(&request, control) {
                    tasks.spawn(call);
                }
            }
            Command::Disconnect(_) => {
                self.end_session().await;
                self.outbox.respond(&request, None);
                return Flow::Exit;
            }
            Command::Terminate => {
                let session_id = self.reset_session();
                self.spawn_handler(tasks, |bridge| async move {
                    if let Some(session_id) = session_id {
                        bridge.stop_remote_session(&session_id).await;
                    }
                    bridge.outbox.respond(&request, None);
                    bridge.outbox.event("terminated", None);
                });
            }
            Command::Source(args) => self.source(&request, args),
            Command::Unknown(name) => {
                self.outbox
                    .respond_error(&request, format!("Unknown command: {name}"));
            }
        }
        Flow::Continue
    }

    fn spawn_handler<F, Fut>(self: &Arc<Self>, tasks: &mut JoinSet<()>, handler: F)
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tasks.spawn(handler(Arc::clone(self)));
    }

    /// Answer a request whose arguments do not deserialize.
    ///
    /// A malformed `launch` is still a failed launch: it goes through the lifecycle
    /// like any other precondition failure and ends with `terminated`.
    pub fn reject_arguments(&self, request: &Request, err: &serde_json::Error) {
        let detail = sanitize_json_error_message(&err.to_string());
        if request.command != "launch" {
            let message = format!("invalid arguments for {}: {detail}", request.command);
            self.outbox.respond_error(request, message);
            return;
        }

        let message = LaunchError::InvalidArguments(detail).to_string();
        let ticket = self.state.lock().session.begin_launch();
        match ticket {
            Ok(ticket) => self.fail_launch(request, &ticket, &message),
            Err(err) => {
                tracing::debug!(target: "kiln.dap", error = %err, "launch rejected");
                self.outbox.respond_error(request, message);
            }
        }
    }

    fn active_session_id(&self) -> Option<String> {
        self.state
            .lock()
            .session
            .active_session_id()
            .map(str::to_owned)
    }

    // --- launch ---------------------------------------------------------------------------

    /// Run the synchronous part of `launch`: lifecycle transition and argument checks.
    ///
    /// Returns the remainder (reading the program and starting the remote session) to be
    /// driven concurrently with later requests, or `None` when the request was already
    /// answered.
    fn begin_launch(
        self: &Arc<Self>,
        request: &Request,
        args: LaunchArguments,
    ) -> Option<impl Future<Output = ()> + Send + 'static> {
        let ticket = {
            let mut state = self.state.lock();
            match state.session.begin_launch() {
                Ok(ticket) => {
                    // Bindings of a previous session are meaningless to the new one.
                    state.breakpoints.unbind_all();
                    ticket
                }
                Err(err) => {
                    tracing::debug!(target: "kiln.dap", error = %err, "launch rejected");
                    self.outbox.respond_error(request, err.to_string());
                    return None;
                }
            }
        };

        let prepared = args
            .validate(self.default_scope)
            .and_then(|plan| self.prepare_target(plan));
        let (plan, source) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                self.fail_launch(request, &ticket, &err.to_string());
                return None;
            }
        };

        let bridge = Arc::clone(self);
        let request = request.clone();
        Some(async move { bridge.run_launch(request, ticket, plan, source).await })
    }

    fn prepare_target(&self, plan: LaunchPlan) -> Result<(LaunchPlan, LaunchSource), LaunchError> {
        let source = match &plan.target {
            LaunchTarget::Program(program) => {
                let not_debuggable = || LaunchError::NotInScriptLibrary {
                    program: program.clone(),
                    marker: self.mapper.source_root_marker().to_owned(),
                };
                let module_path = self.mapper.module_path(program).ok_or_else(not_debuggable)?;
                let project_root = self.mapper.project_root(program).ok_or_else(not_debuggable)?;
                LaunchSource::File {
                    program: program.clone(),
                    module_path,
                    project_root,
                }
            }
            LaunchTarget::Console(code) => LaunchSource::Console { code: code.clone() },
        };
        Ok((plan, source))
    }

    async fn run_launch(
        self: Arc<Self>,
        request: Request,
        ticket: LaunchTicket,
        plan: LaunchPlan,
        source: LaunchSource,
    ) {
        let code = match &source {
            LaunchSource::File { program, .. } => {
                match tokio::fs::read_to_string(program).await {
                    Ok(code) => code,
                    Err(err) => {
                        let err = LaunchError::ReadProgram {
                            program: program.clone(),
                            source: err,
                        };
                        self.fail_launch(&request, &ticket, &err.to_string());
                        return;
                    }
                }
            }
            LaunchSource::Console { code } => code.clone(),
        };

        let (module_path, file_path) = match &source {
            LaunchSource::File {
                program,
                module_path,
                ..
            } => (module_path.as_str(), Some(program.as_str())),
            LaunchSource::Console { .. } => (CONSOLE_SOURCE_NAME, None),
        };
        let params = StartSessionParams {
            code: &code,
            module_path,
            file_path,
            scope: plan.scope,
            stop_on_entry: plan.stop_on_entry,
            is_console: matches!(source, LaunchSource::Console { .. }),
            perspective: plan.perspective.as_ref().map(|p| PerspectiveParams {
                session_id: &p.session_id,
                page_id: p.page_id.as_deref(),
                view_instance_id: p.view_instance_id.as_deref(),
                component_path: p.component_path.as_deref(),
            }),
        };
        let params = json!(params);
        tracing::debug!(
            target: "kiln.dap",
            module_path,
            scope = plan.scope.as_str(),
            "starting remote session"
        );

        self.state.lock().session.set_source(&ticket, source.clone());

        let reply = match self
            .remote
            .send_request(RemoteMethod::StartSession, params)
            .await
        {
            Ok(value) => decode::<StartSessionReply>(value),
            Err(err) => Err(err),
        };

        let session_id = match reply {
            Ok(reply) => reply.session_id,
            Err(err) => {
                tracing::warn!(target: "kiln.dap", error = %err, "remote session failed to start");
                self.fail_launch(&request, &ticket, &err.to_string());
                return;
            }
        };

        let run_now = {
            let mut state = self.state.lock();
            if state.session.complete_launch(&ticket, session_id.clone()) {
                // Reply before waiters on the gate can take the lock.
                self.outbox.respond(&request, None);
                Some(state.session.take_configuration_done())
            } else {
                None
            }
        };

        match run_now {
            None => {
                tracing::info!(
                    target: "kiln.dap",
                    session_id = %session_id,
                    "launch finished after the bridge was reset; stopping orphaned session"
                );
                self.outbox
                    .respond_error(&request, "launch was cancelled by disconnect");
                self.stop_remote_session(&session_id).await;
            }
            Some(true) => {
                if let Err(err) = self.flush_and_run(&session_id).await {
                    tracing::warn!(target: "kiln.dap", error = %err, "failed to start script");
                    self.output("stderr", format!("Failed to start script: {err}\n"));
                }
            }
            Some(false) => {}
        }
    }

    fn fail_launch(&self, request: &Request, ticket: &LaunchTicket, message: &str) {
        let mut state = self.state.lock();
        let current = state.session.fail_launch(ticket);
        self.outbox.respond_error(request, message);
        if current {
            self.outbox.event("terminated", None);
        }
    }

    // --- configurationDone ----------------------------------------------------------------

    async fn configuration_done(&self, request: &Request) {
        let session_id = loop {
            let (gate, generation, awaits_launch) = {
                let state = self.state.lock();
                (
                    state.session.gate(),
                    state.session.generation(),
                    state.session.state() == SessionState::Launching,
                )
            };
            gate.wait().await;

            let outcome = {
                let mut state = self.state.lock();
                if awaits_launch && state.session.generation() != generation {
                    // The launch this request configured was reset away; so was the request.
                    break None;
                }
                match state.session.state() {
                    // A launch began while this request was waiting.
                    SessionState::Launching => None,
                    SessionState::Uninitialized => {
                        state.session.defer_configuration_done();
                        Some(None)
                    }
                    _ => Some(state.session.active_session_id().map(str::to_owned)),
                }
            };
            if let Some(session_id) = outcome {
                break session_id;
            }
        };

        let Some(session_id) = session_id else {
            self.outbox.respond(request, None);
            return;
        };

        match self.flush_and_run(&session_id).await {
            Ok(()) => self.outbox.respond(request, None),
            Err(err) => self.outbox.respond_error(request, err.to_string()),
        }
    }

    /// Send every staged file's set in registration order, then resume the script.
    async fn flush_and_run(&self, session_id: &str) -> Result<(), RemoteError> {
        let mut files = 0usize;
        loop {
            let next = self.state.lock().breakpoints.take_next_staged();
            let Some(file) = next else {
                break;
            };
            self.bind_file(session_id, &file.path, &file.breakpoints).await;
            files += 1;
        }
        tracing::debug!(target: "kiln.dap", files, "flushed staged breakpoints");

        self.remote
            .send_request(RemoteMethod::Run, json!({ "sessionId": session_id }))
            .await?;
        Ok(())
    }

    // --- breakpoints ----------------------------------------------------------------------

    /// Record the new set for one file. Returns the remote binding to run when a
    /// session is live, or `None` once the request is answered.
    fn begin_set_breakpoints(
        self: &Arc<Self>,
        request: &Request,
        args: SetBreakpointsArguments,
    ) -> Option<impl Future<Output = ()> + Send + 'static> {
        let Some(path) = args.source.path.clone() else {
            self.outbox
                .respond_error(request, "setBreakpoints requires `source.path`");
            return None;
        };
        let specs = args.specs();

        let session_id = {
            let mut state = self.state.lock();
            match state.session.active_session_id().map(str::to_owned) {
                Some(session_id) => {
                    state.breakpoints.replace(&path, &specs, true, None);
                    session_id
                }
                None => {
                    let staged = state.breakpoints.stage(&path, &specs);
                    self.outbox.respond(request, Some(breakpoints_body(&staged)));
                    return None;
                }
            }
        };

        let bridge = Arc::clone(self);
        let request = request.clone();
        Some(async move {
            let bound = bridge.bind_file(&session_id, &path, &specs).await;
            bridge
                .outbox
                .respond(&request, Some(breakpoints_body(&bound)));
        })
    }

    /// Send one file's set to the remote host and record the per-breakpoint outcome.
    async fn bind_file(
        &self,
        session_id: &str,
        path: &str,
        specs: &[SourceBreakpoint],
    ) -> Vec<Breakpoint> {
        let params = json!({
            "sessionId": session_id,
            "filePath": path,
            "modulePath": self.mapper.module_path(path),
            "breakpoints": specs,
        });
        let reply = match self
            .remote
            .send_request(RemoteMethod::SetBreakpoints, params)
            .await
        {
            Ok(value) => decode::<SetBreakpointsReply>(value),
            Err(err) => Err(err),
        };

        let mut state = self.state.lock();
        let recorded = match reply {
            Ok(reply) => state.breakpoints.bind(path, specs, &reply.breakpoints),
            Err(err) => {
                tracing::warn!(target: "kiln.dap", path, error = %err, "failed to bind breakpoints");
                state.breakpoints.reject(path, specs, &err.to_string())
            }
        };
        recorded.unwrap_or_else(|| {
            // The set changed while the call was in flight; report what is stored now.
            state
                .breakpoints
                .get(path)
                .map(<[Breakpoint]>::to_vec)
                .unwrap_or_default()
        })
    }

    // --- inspection -----------------------------------------------------------------------

    async fn stack_trace(&self, request: &Request, args: StackTraceArguments) {
        let empty = json!({ "stackFrames": [], "totalFrames": 0 });
        let Some(session_id) = self.active_session_id() else {
            self.outbox.respond(request, Some(empty));
            return;
        };

        let params = json!({
            "sessionId": session_id,
            "startFrame": args.start_frame.unwrap_or(0),
            "levels": args.levels.unwrap_or(0),
        });
        let reply = match self
            .remote
            .send_request(RemoteMethod::GetStackTrace, params)
            .await
        {
            Ok(value) => decode::<StackTraceReply>(value),
            Err(err) => Err(err),
        };
        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                tracing::warn!(target: "kiln.dap", error = %err, "stack trace unavailable");
                self.outbox.respond(request, Some(empty));
                return;
            }
        };

        let frames: Vec<_> = {
            let state = self.state.lock();
            let sources = FrameSources::new(&self.mapper, state.session.source());
            reply
                .stack_frames
                .into_iter()
                .map(|frame| sources.frame(frame))
                .collect()
        };
        let total = reply.total_frames.unwrap_or(frames.len() as i64);
        self.outbox.respond(
            request,
            Some(json!({ "stackFrames": frames, "totalFrames": total })),
        );
    }

    async fn scopes(&self, request: &Request, args: ScopesArguments) {
        let scopes = match self.active_session_id() {
            Some(session_id) => {
                let params = json!({ "sessionId": session_id, "frameId": args.frame_id });
                self.relay::<ScopesReply>(RemoteMethod::GetScopes, params)
                    .await
                    .map(ScopesReply::into_scopes)
                    .unwrap_or_default()
            }
            None => Vec::new(),
        };
        self.outbox.respond(request, Some(json!({ "scopes": scopes })));
    }

    async fn variables(&self, request: &Request, args: VariablesArguments) {
        let variables = match self.active_session_id() {
            Some(session_id) => {
                let params = json!({
                    "sessionId": session_id,
                    "variablesReference": args.variables_reference,
                    "start": args.start,
                    "count": args.count,
                });
                self.relay::<VariablesReply>(RemoteMethod::GetVariables, params)
                    .await
                    .map(VariablesReply::into_variables)
                    .unwrap_or_default()
            }
            None => Vec::new(),
        };
        self.outbox
            .respond(request, Some(json!({ "variables": variables })));
    }

    /// One remote round-trip whose failure degrades to an empty reply.
    async fn relay<T: DeserializeOwned>(&self, method: RemoteMethod, params: Value) -> Option<T> {
        let reply = match self.remote.send_request(method, params).await {
            Ok(value) => decode::<T>(value),
            Err(err) => Err(err),
        };
        match reply {
            Ok(reply) => Some(reply),
            Err(err) => {
                tracing::warn!(target: "kiln.dap", %method, error = %err, "remote request failed");
                None
            }
        }
    }

    async fn evaluate(&self, request: &Request, args: EvaluateArguments) {
        let Some(session_id) = self.active_session_id() else {
            self.outbox.respond_error(request, NO_SESSION);
            return;
        };

        let params = json!({
            "sessionId": session_id,
            "expression": args.expression,
            "frameId": args.frame_id,
            "context": args.context,
        });
        let reply = match self
            .remote
            .send_request(RemoteMethod::Evaluate, params)
            .await
        {
            Ok(value) => decode::<EvaluateReply>(value),
            Err(err) => Err(err),
        };
        match reply {
            Ok(reply) => {
                let result = EvaluateResult::from(reply);
                self.outbox.respond(request, Some(json!(result)));
            }
            Err(err) => {
                tracing::debug!(target: "kiln.dap", error = %err, "evaluation failed");
                self.outbox.respond_error(request, err.to_string());
            }
        }
    }

    // --- execution control ----------------------------------------------------------------

    /// Check for a session and apply the state change of `control` in request order;
    /// the remote call itself runs in the returned future.
    fn begin_control(
        self: &Arc<Self>,
        request: &Request,
        control: Control,
    ) -> Option<impl Future<Output = ()> + Send + 'static> {
        let (session_id, was_stopped) = {
            let mut state = self.state.lock();
            let Some(session_id) = state.session.active_session_id().map(str::to_owned) else {
                drop(state);
                self.outbox.respond_error(request, NO_SESSION);
                return None;
            };
            let was_stopped = state.session.state() == SessionState::Stopped;
            // Mark before sending: the remote may push the next `stopped` before it replies.
            if control.resumes() {
                state.session.mark_running();
            }
            (session_id, was_stopped)
        };

        let bridge = Arc::clone(self);
        let request = request.clone();
        Some(async move {
            bridge
                .control(&request, control, &session_id, was_stopped)
                .await
        })
    }

    async fn control(
        &self,
        request: &Request,
        control: Control,
        session_id: &str,
        was_stopped: bool,
    ) {
        let result = self
            .remote
            .send_request(control.remote_method(), json!({ "sessionId": session_id }))
            .await;
        match result {
            Ok(_) => {
                let body = (control == Control::Continue)
                    .then(|| json!({ "allThreadsContinued": true }));
                self.outbox.respond(request, body);
            }
            Err(err) => {
                if was_stopped && control.resumes() {
                    self.state.lock().session.mark_stopped();
                }
                tracing::warn!(
                    target: "kiln.dap",
                    method = %control.remote_method(),
                    error = %err,
                    "execution control failed"
                );
                self.outbox.respond_error(request, err.to_string());
            }
        }
    }

    // --- teardown -------------------------------------------------------------------------

    /// Clear all session state, then stop the remote session if one was live.
    pub async fn end_session(&self) {
        if let Some(session_id) = self.reset_session() {
            self.stop_remote_session(&session_id).await;
        }
    }

    /// Clear all session state; returns the id of the session that was live.
    fn reset_session(&self) -> Option<String> {
        let mut state = self.state.lock();
        let session_id = state.session.active_session_id().map(str::to_owned);
        state.session.reset();
        state.breakpoints.clear();
        session_id
    }

    async fn stop_remote_session(&self, session_id: &str) {
        if let Err(err) = self
            .remote
            .send_request(RemoteMethod::StopSession, json!({ "sessionId": session_id }))
            .await
        {
            tracing::debug!(target: "kiln.dap", error = %err, "ignoring stopSession failure");
        }
    }

    fn source(&self, request: &Request, args: SourceArguments) {
        let wants_console = match &args.source {
            Some(source) => is_console_source(
                source.name.as_deref(),
                source.path.as_deref(),
                source.source_reference.or(args.source_reference),
            ),
            None => is_console_source(None, None, args.source_reference),
        };
        let code = self
            .state
            .lock()
            .session
            .console_code()
            .map(str::to_owned);

        match code.filter(|_| wants_console) {
            Some(content) => self.outbox.respond(
                request,
                Some(json!({ "content": content, "mimeType": "text/x-python" })),
            ),
            None => self.outbox.respond_error(request, "source not available"),
        }
    }

    // --- remote events --------------------------------------------------------------------

    fn output(&self, category: &str, output: String) {
        let body = OutputEventBody {
            category: category.to_owned(),
            output,
        };
        self.outbox.event("output", Some(json!(body)));
    }

    fn on_remote_event(&self, event: RemoteEvent) {
        let mut state = self.state.lock();
        if !state.session.accepts_event_from(event.session_id()) {
            tracing::debug!(
                target: "kiln.dap",
                event = event.name(),
                session_id = ?event.session_id(),
                "ignoring event for another session"
            );
            return;
        }

        match event {
            RemoteEvent::Stopped(stopped) => {
                state.session.mark_stopped();
                let body = StoppedEventBody {
                    reason: stopped.reason,
                    thread_id: THREAD_ID,
                    all_threads_stopped: true,
                    description: stopped.description,
                    text: stopped.text,
                    hit_breakpoint_ids: stopped.breakpoint_ids,
                };
                self.outbox.event("stopped", Some(json!(body)));
            }
            RemoteEvent::Output(output) => {
                let category = output.category.as_deref().unwrap_or("console");
                self.output(category, output.output);
            }
            RemoteEvent::Exited(exited) => {
                state.session.mark_terminated();
                self.outbox
                    .event("exited", Some(json!({ "exitCode": exited.exit_code })));
                self.outbox.event("terminated", None);
            }
            RemoteEvent::Terminated(_) => {
                state.session.mark_terminated();
                self.outbox.event("terminated", None);
            }
            RemoteEvent::Breakpoint(update) => {
                let Some((path, breakpoint)) = state.breakpoints.update(&update.breakpoint) else {
                    return;
                };
                let mut breakpoint = breakpoint.to_dap();
                breakpoint.source = Some(Source {
                    name: None,
                    path: Some(path),
                    source_reference: None,
                });
                self.outbox.event(
                    "breakpoint",
                    Some(json!({ "reason": "changed", "breakpoint": breakpoint })),
                );
            }
        }
    }
}
