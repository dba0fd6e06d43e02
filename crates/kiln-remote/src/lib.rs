//! Connection to the remote script-execution host.
//!
//! The debug bridge only ever sees [`RemoteConnection`]: "send a request, get a
//! reply" plus a broadcast stream of [`RemoteEvent`]s. Transport concerns
//! (framing, correlation, timeouts, connection loss) live behind it.
//!
//! - [`tcp::TcpRemote`] speaks length-prefixed JSON frames over TCP.
//! - [`Offline`] answers every call with "not connected".
//! - [`mock::MockRemote`] (feature `test-support`) is an in-process scripted
//!   host for bridge tests.

mod types;

pub mod tcp;

// The scripted host is only needed for tests and downstream integration suites.
#[cfg(any(test, feature = "test-support"))]
pub mod mock;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

pub use types::{
    BreakpointEvent, ExitedEvent, OutputEvent, RemoteBreakpoint, RemoteError, RemoteEvent,
    RemoteMethod, StoppedEvent, TerminatedEvent,
};

#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Issue one remote call and wait for its correlated reply.
    async fn send_request(&self, method: RemoteMethod, params: Value)
        -> Result<Value, RemoteError>;

    /// Register for pushed events. Dropping the receiver unregisters it.
    fn subscribe(&self) -> broadcast::Receiver<RemoteEvent>;
}

/// Stand-in for a script host that could not be reached: every call fails with
/// [`RemoteError::NotConnected`] and no events are ever pushed.
pub struct Offline {
    events: broadcast::Sender<RemoteEvent>,
}

impl Default for Offline {
    fn default() -> Self {
        let (events, _) = broadcast::channel(1);
        Self { events }
    }
}

#[async_trait]
impl RemoteConnection for Offline {
    async fn send_request(
        &self,
        method: RemoteMethod,
        _params: Value,
    ) -> Result<Value, RemoteError> {
        tracing::debug!(target: "kiln.remote", %method, "script host unavailable");
        Err(RemoteError::NotConnected)
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteEvent> {
        self.events.subscribe()
    }
}
