//! Runner process isolation
//!
//! Native cores run in a disposable child process (the *runner*), so a crash
//! or hang in plugin code never takes the application down. Both sides talk
//! over one loopback TCP stream carrying [`Frame`]s:
//!
//! - [`RunnerProcess`] spawns the runner and owns its lifetime
//! - [`RunnerConnection`] correlates calls with responses and routes events
//! - [`run_child`] is the runner's side: a blocking serve loop around
//!   [`retrohost_core::CoreRunner`]
//!
//! [`Frame`]: retrohost_shared::Frame

mod child;
mod connection;
mod process;

#[cfg(test)]
mod tests;

use std::time::Duration;

use retrohost_shared::{ProtocolError, WireError};
use thiserror::Error;

pub use child::{ChildArgs, is_runner_invocation, run_child};
pub use connection::RunnerConnection;
pub use process::{RunnerProcess, SpawnOptions};

/// Launch flag that selects runner mode
pub const RUNNER_FLAG: &str = "--runner";
pub const ENDPOINT_FLAG: &str = "--endpoint";
pub const TOKEN_FLAG: &str = "--token";

/// The only runner type: a libretro-style native core host
pub const RUNNER_TYPE: &str = "retro";

/// First bytes the runner writes after connecting
pub const HANDSHAKE_MAGIC: &[u8; 4] = b"RHST";

/// Upper bound on the session token length accepted in a handshake
const MAX_TOKEN_LEN: u32 = 256;

/// `[magic]["token" as u32-prefixed utf8]`
pub(crate) fn handshake_bytes(token: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(HANDSHAKE_MAGIC.len() + 4 + token.len());
    out.extend_from_slice(HANDSHAKE_MAGIC);
    out.extend_from_slice(&(token.len() as u32).to_le_bytes());
    out.extend_from_slice(token.as_bytes());
    out
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("runner transport closed")]
    TransportClosed,
    #[error("runner error: {0}")]
    Remote(String),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("unexpected {0} frame from peer")]
    UnexpectedFrame(&'static str),
    #[error("{what} timed out after {after:?}")]
    Timeout { what: &'static str, after: Duration },
    #[error("runner exited before connecting ({0})")]
    EarlyExit(String),
    #[error("failed to spawn runner: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("runner handshake failed: {0}")]
    Handshake(String),
}
