//! Fixed-period run loop
//!
//! A [`RunLoop`] owns one [`CoreHost`]. While idle the host is reachable
//! directly; [`RunLoop::start`] moves it onto a dedicated thread that
//! advances one frame per tick until [`RunLoop::stop`]. Stopping waits for
//! the thread to finish its current tick and release the plugin.
//!
//! ```text
//! Idle --start--> Running --stop--> StopRequested --(thread exit)--> Stopped
//!   \------------------------stop (releases plugin)------------------/
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

use thiserror::Error;

use crate::host::{CoreHost, HostError};

mod config;
mod game_loop;

#[cfg(test)]
mod tests;

pub use config::RunLoopConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    StopRequested,
    Stopped,
}

#[derive(Debug, Error)]
pub enum RunLoopError {
    #[error("cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: RunState,
    },
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("failed to spawn run loop thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("run loop thread panicked")]
    WorkerPanicked,
    #[error("run loop thread has exited")]
    WorkerGone,
}

type Job = Box<dyn FnOnce(&mut CoreHost) + Send>;

/// Work handed to the loop thread between ticks
pub(crate) enum LoopCommand {
    Job(Job),
    Stop,
}

struct Worker {
    stop: Arc<AtomicBool>,
    commands: Sender<LoopCommand>,
    handle: JoinHandle<()>,
}

pub struct RunLoop {
    config: RunLoopConfig,
    state: RunState,
    host: Option<CoreHost>,
    worker: Option<Worker>,
    frames: Arc<AtomicU64>,
}

impl RunLoop {
    pub fn new(host: CoreHost, config: RunLoopConfig) -> Self {
        Self {
            config,
            state: RunState::Idle,
            host: Some(host),
            worker: None,
            frames: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Frames advanced since creation
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    /// The host, while idle
    pub fn host(&self) -> Option<&CoreHost> {
        self.host.as_ref()
    }

    /// Hand content to the plugin; only valid while idle
    pub fn load_game(&mut self, path: &str, data: Option<Vec<u8>>) -> Result<bool, RunLoopError> {
        let state = self.state;
        let host = self.host.as_mut().ok_or(RunLoopError::InvalidState {
            action: "load a game",
            state,
        })?;
        Ok(host.load_content(path, data)?)
    }

    /// Begin ticking on a dedicated thread
    pub fn start(&mut self) -> Result<(), RunLoopError> {
        if self.state != RunState::Idle {
            return Err(RunLoopError::InvalidState {
                action: "start",
                state: self.state,
            });
        }
        match &self.host {
            Some(host) if host.has_content() => {}
            _ => return Err(HostError::NoContent.into()),
        }
        let Some(host) = self.host.take() else {
            return Err(HostError::NoContent.into());
        };

        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let config = self.config.clone();
        let frames = self.frames.clone();
        let thread_stop = stop.clone();
        let spawned = std::thread::Builder::new()
            .name("retrohost-loop".into())
            .spawn(move || game_loop::run(host, rx, thread_stop, config, frames));

        match spawned {
            Ok(handle) => {
                self.worker = Some(Worker {
                    stop,
                    commands: tx,
                    handle,
                });
                self.state = RunState::Running;
                Ok(())
            }
            Err(e) => {
                // The closure, and the host with it, was dropped
                self.state = RunState::Stopped;
                Err(RunLoopError::Spawn(e))
            }
        }
    }

    /// Stop ticking and release the plugin. Returns once the loop thread
    /// has exited. Stopping a stopped loop is a no-op.
    pub fn stop(&mut self) -> Result<(), RunLoopError> {
        match self.state {
            RunState::Stopped => Ok(()),
            RunState::Idle => {
                self.host = None;
                self.state = RunState::Stopped;
                Ok(())
            }
            RunState::Running | RunState::StopRequested => {
                self.state = RunState::StopRequested;
                let result = match self.worker.take() {
                    Some(worker) => {
                        worker.stop.store(true, Ordering::Release);
                        // The thread may already be gone; the join below covers it
                        let _ = worker.commands.send(LoopCommand::Stop);
                        worker
                            .handle
                            .join()
                            .map_err(|_| RunLoopError::WorkerPanicked)
                    }
                    None => Ok(()),
                };
                self.state = RunState::Stopped;
                result
            }
        }
    }

    pub fn reset(&mut self) -> Result<(), RunLoopError> {
        self.execute("reset", |host| host.reset())
    }

    pub fn save_state(&mut self) -> Result<Vec<u8>, RunLoopError> {
        self.execute("save state", |host| host.save_state())
    }

    pub fn load_state(&mut self, state: Vec<u8>) -> Result<(), RunLoopError> {
        self.execute("load state", move |host| host.load_state(&state))
    }

    /// Run `f` against the host: directly while idle, between two ticks
    /// while running.
    fn execute<T, F>(&mut self, action: &'static str, f: F) -> Result<T, RunLoopError>
    where
        T: Send + 'static,
        F: FnOnce(&mut CoreHost) -> Result<T, HostError> + Send + 'static,
    {
        match (self.state, self.host.as_mut(), self.worker.as_ref()) {
            (RunState::Idle, Some(host), _) => Ok(f(host)?),
            (RunState::Running, _, Some(worker)) => {
                let (tx, rx) = mpsc::sync_channel(1);
                let job: Job = Box::new(move |host| {
                    let _ = tx.send(f(host));
                });
                worker
                    .commands
                    .send(LoopCommand::Job(job))
                    .map_err(|_| RunLoopError::WorkerGone)?;
                Ok(rx.recv().map_err(|_| RunLoopError::WorkerGone)??)
            }
            (state, _, _) => Err(RunLoopError::InvalidState { action, state }),
        }
    }
}

impl Drop for RunLoop {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "Run loop did not stop cleanly");
        }
    }
}
