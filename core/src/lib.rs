//! Retrohost Core - native core hosting
//!
//! This crate loads libretro-style emulation cores and drives them from the
//! runner process.
//!
//! # Architecture
//!
//! - [`abi`] - C declarations of the plugin contract
//! - [`CoreHost`] - Loads a plugin, answers its callbacks, advances frames
//! - [`codec`] - Converts native frames and samples to transport payloads
//! - [`RunLoop`] - Fixed-period ticking on a dedicated thread
//! - [`CoreRunner`] - Dispatches runner calls onto the host and loop

pub mod abi;
pub mod codec;
pub mod host;
pub mod input;
pub mod runner;
pub mod runtime;
#[cfg(test)]
pub mod test_utils;

pub use codec::{PixelFormat, convert_frame};
pub use host::{CoreHost, HostConfig, HostError, HostSink, LoadError};
pub use input::ButtonStates;
pub use runner::{CoreRunner, RunnerError};
pub use runtime::{RunLoop, RunLoopConfig, RunLoopError, RunState};
