//! Lifecycle of the single debug session a bridge instance drives.
//!
//! ```text
//! Uninitialized -> Launching -> Running <-> Stopped
//!                      |            \        /
//!                      +----------> Terminated -> Launching (new session)
//! ```
//!
//! A launch is identified by a generation number. Anything that resets the
//! bridge bumps the generation, so a launch that finishes afterwards can tell
//! its result is stale.

use tokio_util::sync::CancellationToken;

use crate::error::LifecycleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Launching,
    Running,
    Stopped,
    Terminated,
}

/// Single-use signal resolved once a launch has either produced a session or failed.
///
/// Clones observe the same resolution; resolving more than once has no further effect.
#[derive(Debug, Clone, Default)]
pub struct LaunchGate {
    token: CancellationToken,
}

impl LaunchGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// A gate with nothing to wait for.
    pub fn resolved() -> Self {
        let gate = Self::new();
        gate.resolve();
        gate
    }

    pub fn resolve(&self) {
        self.token.cancel();
    }

    pub fn is_resolved(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}

/// Handle for one launch attempt, returned by [`SessionController::begin_launch`].
#[derive(Debug, Clone)]
pub struct LaunchTicket {
    generation: u64,
    gate: LaunchGate,
}

impl LaunchTicket {
    pub fn gate(&self) -> &LaunchGate {
        &self.gate
    }
}

/// What a launch runs: a script library file or inline console code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchSource {
    File {
        program: String,
        module_path: String,
        project_root: String,
    },
    Console {
        code: String,
    },
}

#[derive(Debug)]
pub struct SessionController {
    state: SessionState,
    session_id: Option<String>,
    generation: u64,
    gate: LaunchGate,
    source: Option<LaunchSource>,
    configuration_done_pending: bool,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionController {
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            session_id: None,
            generation: 0,
            gate: LaunchGate::resolved(),
            source: None,
            configuration_done_pending: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The remote session id while a session is live (running or stopped).
    pub fn active_session_id(&self) -> Option<&str> {
        match self.state {
            SessionState::Running | SessionState::Stopped => self.session_id.as_deref(),
            _ => None,
        }
    }

    /// Whether a remote event tagged with `session_id` belongs to this bridge's session.
    ///
    /// Untagged events are accepted while a session is live or being launched; the
    /// launch reply may arrive after the host already pushed its first event.
    pub fn accepts_event_from(&self, session_id: Option<&str>) -> bool {
        match (self.state, session_id) {
            (SessionState::Uninitialized | SessionState::Terminated, _) => false,
            (SessionState::Launching, _) => true,
            (_, None) => true,
            (_, Some(id)) => self.session_id.as_deref() == Some(id),
        }
    }

    /// Gate of the current (or last) launch. Already resolved when no launch is in flight.
    pub fn gate(&self) -> LaunchGate {
        self.gate.clone()
    }

    pub fn source(&self) -> Option<&LaunchSource> {
        self.source.as_ref()
    }

    /// Inline code of the current console session, if any.
    pub fn console_code(&self) -> Option<&str> {
        match &self.source {
            Some(LaunchSource::Console { code }) => Some(code),
            _ => None,
        }
    }

    /// Bumped by every launch and every reset.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn begin_launch(&mut self) -> Result<LaunchTicket, LifecycleError> {
        match self.state {
            SessionState::Launching => return Err(LifecycleError::LaunchInProgress),
            SessionState::Running | SessionState::Stopped => {
                return Err(LifecycleError::SessionActive)
            }
            SessionState::Uninitialized | SessionState::Terminated => {}
        }

        self.generation += 1;
        self.state = SessionState::Launching;
        self.session_id = None;
        self.source = None;
        self.gate = LaunchGate::new();
        tracing::debug!(target: "kiln.dap", generation = self.generation, "launch started");

        Ok(LaunchTicket {
            generation: self.generation,
            gate: self.gate.clone(),
        })
    }

    pub fn is_current(&self, ticket: &LaunchTicket) -> bool {
        ticket.generation == self.generation && self.state != SessionState::Uninitialized
    }

    /// Record what the launch is about to run. Ignored for stale tickets.
    pub fn set_source(&mut self, ticket: &LaunchTicket, source: LaunchSource) {
        if self.is_current(ticket) {
            self.source = Some(source);
        }
    }

    /// Record the remote session id and resolve the gate.
    ///
    /// Returns `false` when the ticket is stale; the caller owns the orphaned
    /// remote session in that case.
    pub fn complete_launch(&mut self, ticket: &LaunchTicket, session_id: String) -> bool {
        ticket.gate.resolve();
        if !self.is_current(ticket) {
            return false;
        }

        self.session_id = Some(session_id);
        // A pushed `stopped` or `terminated` may already have moved the state on.
        if self.state == SessionState::Launching {
            self.state = SessionState::Running;
        }
        tracing::debug!(target: "kiln.dap", state = ?self.state, "launch completed");
        true
    }

    /// Record a failed launch and resolve the gate. Returns `false` for stale tickets.
    pub fn fail_launch(&mut self, ticket: &LaunchTicket) -> bool {
        ticket.gate.resolve();
        if !self.is_current(ticket) {
            return false;
        }

        self.state = SessionState::Terminated;
        self.session_id = None;
        self.configuration_done_pending = false;
        tracing::debug!(target: "kiln.dap", "launch failed");
        true
    }

    pub fn mark_stopped(&mut self) {
        if matches!(self.state, SessionState::Launching | SessionState::Running) {
            self.state = SessionState::Stopped;
        }
    }

    pub fn mark_running(&mut self) {
        if self.state == SessionState::Stopped {
            self.state = SessionState::Running;
        }
    }

    pub fn mark_terminated(&mut self) {
        if self.state != SessionState::Uninitialized {
            self.state = SessionState::Terminated;
        }
    }

    /// Remember a `configurationDone` that arrived before any launch began.
    pub fn defer_configuration_done(&mut self) {
        self.configuration_done_pending = true;
    }

    pub fn take_configuration_done(&mut self) -> bool {
        std::mem::take(&mut self.configuration_done_pending)
    }

    /// Drop all session state. Any in-flight launch becomes stale and its waiters
    /// are released.
    pub fn reset(&mut self) {
        self.gate.resolve();
        self.generation += 1;
        self.state = SessionState::Uninitialized;
        self.session_id = None;
        self.source = None;
        self.gate = LaunchGate::resolved();
        self.configuration_done_pending = false;
    }
}
