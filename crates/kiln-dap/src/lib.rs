//! Kiln debug adapter.
//!
//! Speaks the Debug Adapter Protocol on one side and the script-execution
//! host's remote debug protocol on the other:
//! - [`dap`]: `Content-Length` framing and message shapes.
//! - [`bridge`]: the dispatcher translating requests, remote replies and
//!   remote events.
//! - [`session`] and [`breakpoints`]: lifecycle and breakpoint state owned by
//!   the bridge.
//! - [`path_map`]: file paths to dotted module paths and back.
//! - [`server`]: the request loop over any async reader/writer pair.

pub mod breakpoints;
pub mod bridge;
pub mod command;
pub mod dap;
pub mod error;
pub mod hardening;
pub mod path_map;
pub mod relay;
pub mod server;
pub mod session;

pub use crate::bridge::{Bridge, THREAD_ID};
pub use crate::error::{LaunchError, LifecycleError, ServerError, ServerResult};
pub use crate::path_map::PathMapper;
pub use crate::session::{LaunchGate, SessionState};
