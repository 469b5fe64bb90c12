//! Retrohost Library
//!
//! The application side of Retrohost. Native cores never load into this
//! process: every session runs in a separate runner process (the same
//! executable, started with `--runner retro`). This provides:
//! - Crash isolation (a faulting core takes down only its runner)
//! - A stop that always works (the runner can be killed)
//!
//! # Modules
//!
//! - [`service`] - [`CoreService`], the facade the CLI and UI talk to
//! - [`ipc`] - runner spawning, the RPC connection and the runner's serve loop
//! - [`config`] - `config.toml` and directory resolution
//! - [`options`] - per-core option overrides

pub mod config;
pub mod ipc;
pub mod options;
pub mod service;

pub use config::Config;
pub use ipc::{RpcError, RunnerConnection, RunnerProcess, SpawnOptions};
pub use options::{OptionStore, OptionsError};
pub use service::{CoreService, ServiceError, ServiceEvent};
