//! In-process scripted script host.
//!
//! It supports just enough behavior to exercise the debug bridge without a
//! running execution service: canned or computed replies per method, calls
//! that stay in flight until a test releases them, a call log, and pushed
//! events.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch, Notify};

use crate::{RemoteConnection, RemoteError, RemoteEvent, RemoteMethod};

type Responder = Arc<dyn Fn(&Value) -> Result<Value, RemoteError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: RemoteMethod,
    pub params: Value,
}

/// Keeps calls to one method in flight until [`MockHold::release`] is called
/// (or the hold is dropped).
pub struct MockHold {
    tx: watch::Sender<bool>,
}

impl MockHold {
    pub fn release(&self) {
        let _ = self.tx.send(true);
    }
}

impl Drop for MockHold {
    fn drop(&mut self) {
        self.release();
    }
}

#[derive(Default)]
struct State {
    calls: Vec<RecordedCall>,
    once: HashMap<RemoteMethod, VecDeque<Result<Value, RemoteError>>>,
    responders: HashMap<RemoteMethod, Responder>,
    holds: HashMap<RemoteMethod, watch::Receiver<bool>>,
}

pub struct MockRemote {
    state: Mutex<State>,
    events: broadcast::Sender<RemoteEvent>,
    call_made: Notify,
    next_session: AtomicU64,
    next_breakpoint_id: AtomicU64,
}

impl MockRemote {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            state: Mutex::new(State::default()),
            events,
            call_made: Notify::new(),
            next_session: AtomicU64::new(1),
            next_breakpoint_id: AtomicU64::new(100),
        })
    }

    /// Reply to every future call of `method` with `reply`.
    pub fn reply_with(&self, method: RemoteMethod, reply: Result<Value, RemoteError>) {
        self.respond_with(method, move |_| reply.clone());
    }

    /// Compute replies for `method` from the call's params.
    pub fn respond_with<F>(&self, method: RemoteMethod, responder: F)
    where
        F: Fn(&Value) -> Result<Value, RemoteError> + Send + Sync + 'static,
    {
        self.state
            .lock()
            .responders
            .insert(method, Arc::new(responder));
    }

    /// Reply to the next call of `method` with `reply`, then fall back to the
    /// configured or default behavior.
    pub fn reply_once(&self, method: RemoteMethod, reply: Result<Value, RemoteError>) {
        self.state
            .lock()
            .once
            .entry(method)
            .or_default()
            .push_back(reply);
    }

    pub fn hold(&self, method: RemoteMethod) -> MockHold {
        let (tx, rx) = watch::channel(false);
        self.state.lock().holds.insert(method, rx);
        MockHold { tx }
    }

    pub fn emit(&self, event: RemoteEvent) {
        let _ = self.events.send(event);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    pub fn calls_to(&self, method: RemoteMethod) -> Vec<Value> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.method == method)
            .map(|call| call.params.clone())
            .collect()
    }

    pub fn methods(&self) -> Vec<RemoteMethod> {
        self.state.lock().calls.iter().map(|call| call.method).collect()
    }

    /// Wait until at least `count` calls of `method` have been received.
    pub async fn wait_for_calls(&self, method: RemoteMethod, count: usize) {
        loop {
            let notified = self.call_made.notified();
            if self.calls_to(method).len() >= count {
                return;
            }
            notified.await;
        }
    }

    fn default_reply(&self, method: RemoteMethod, params: &Value) -> Result<Value, RemoteError> {
        match method {
            RemoteMethod::StartSession => {
                let n = self.next_session.fetch_add(1, Ordering::Relaxed);
                Ok(json!({ "sessionId": format!("session-{n}") }))
            }
            RemoteMethod::SetBreakpoints => {
                let breakpoints: Vec<Value> = params
                    .get("breakpoints")
                    .and_then(Value::as_array)
                    .map(|bps| {
                        bps.iter()
                            .map(|bp| {
                                let id = self.next_breakpoint_id.fetch_add(1, Ordering::Relaxed);
                                json!({ "id": id, "line": bp.get("line"), "verified": true })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(json!({ "breakpoints": breakpoints }))
            }
            RemoteMethod::GetStackTrace => Ok(json!({ "stackFrames": [] })),
            RemoteMethod::GetScopes => Ok(json!({ "scopes": [] })),
            RemoteMethod::GetVariables => Ok(json!({ "variables": [] })),
            RemoteMethod::Evaluate => Ok(json!({ "result": "None", "variablesReference": 0 })),
            _ => Ok(json!({})),
        }
    }
}

#[async_trait]
impl RemoteConnection for MockRemote {
    async fn send_request(
        &self,
        method: RemoteMethod,
        params: Value,
    ) -> Result<Value, RemoteError> {
        let hold = {
            let mut state = self.state.lock();
            state.calls.push(RecordedCall {
                method,
                params: params.clone(),
            });
            state.holds.get(&method).cloned()
        };
        self.call_made.notify_waiters();

        if let Some(mut hold) = hold {
            // A dropped sender counts as released.
            let _ = hold.wait_for(|released| *released).await;
        }

        let (once, responder) = {
            let mut state = self.state.lock();
            let once = state.once.get_mut(&method).and_then(VecDeque::pop_front);
            (once, state.responders.get(&method).cloned())
        };
        if let Some(reply) = once {
            return reply;
        }
        match responder {
            Some(responder) => responder(&params),
            None => self.default_reply(method, &params),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteEvent> {
        self.events.subscribe()
    }
}
