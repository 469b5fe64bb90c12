//! Runner-side call handler
//!
//! [`CoreRunner`] is the single handler instance living in a runner process.
//! It maps each [`RunnerCall`] onto the ABI host and run loop and produces
//! the matching [`RunnerReply`]. Transport concerns live elsewhere; this type
//! only sees decoded calls.

use std::path::Path;
use std::sync::Arc;

use retrohost_shared::{
    CoreLoaded, GameLoaded, JoypadButton, RunnerCall, RunnerReply, UnknownButton,
    rpc::{LoadCoreArgs, LoadGameArgs, SetInputArgs, SetVariableArgs},
};
use thiserror::Error;

use crate::host::{CoreHost, CoreLibrary, HostConfig, HostContext, HostError, HostSink, LoadError};
use crate::input::ButtonStates;
use crate::runtime::{RunLoop, RunLoopConfig, RunLoopError};

/// Opens a plugin library; swapped out in tests
pub type CoreOpener = Box<dyn Fn(&Path) -> Result<CoreLibrary, LoadError> + Send>;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("no core loaded")]
    NoCore,
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error(transparent)]
    RunLoop(#[from] RunLoopError),
    #[error(transparent)]
    Input(#[from] UnknownButton),
}

struct Session {
    context: Arc<HostContext>,
    run_loop: RunLoop,
}

pub struct CoreRunner {
    sink: Arc<dyn HostSink>,
    config: RunLoopConfig,
    opener: CoreOpener,
    buttons: Arc<ButtonStates>,
    session: Option<Session>,
}

impl CoreRunner {
    pub fn new(sink: Arc<dyn HostSink>, config: RunLoopConfig) -> Self {
        Self::with_opener(sink, config, Box::new(|path: &Path| CoreLibrary::open(path)))
    }

    pub fn with_opener(sink: Arc<dyn HostSink>, config: RunLoopConfig, opener: CoreOpener) -> Self {
        Self {
            sink,
            config,
            opener,
            buttons: Arc::new(ButtonStates::new()),
            session: None,
        }
    }

    pub fn has_core(&self) -> bool {
        self.session.is_some()
    }

    /// Dispatch one call
    pub fn handle(&mut self, call: RunnerCall) -> Result<RunnerReply, RunnerError> {
        tracing::debug!(method = call.method(), "Handling runner call");
        match call {
            RunnerCall::Echo(bytes) => Ok(RunnerReply::Echo(bytes)),
            RunnerCall::LoadCore(args) => self.load_core(args).map(RunnerReply::CoreLoaded),
            RunnerCall::LoadGame(args) => self.load_game(args).map(RunnerReply::GameLoaded),
            RunnerCall::Run => {
                self.session_mut()?.run_loop.start()?;
                Ok(RunnerReply::Done)
            }
            RunnerCall::Stop => {
                self.stop()?;
                Ok(RunnerReply::Done)
            }
            RunnerCall::SetInput(args) => {
                self.set_input(args)?;
                Ok(RunnerReply::Done)
            }
            RunnerCall::SetVariable(SetVariableArgs { key, value }) => {
                let session = self.session_mut()?;
                if !session.context.set_variable(&key, &value) {
                    tracing::debug!(key, "Option set before the core declared it");
                }
                Ok(RunnerReply::Done)
            }
            RunnerCall::GetSampleRate => Ok(RunnerReply::SampleRate(
                self.session_mut()?.context.sample_rate(),
            )),
            RunnerCall::Reset => {
                self.session_mut()?.run_loop.reset()?;
                Ok(RunnerReply::Done)
            }
            RunnerCall::SaveState => Ok(RunnerReply::State(
                self.session_mut()?.run_loop.save_state()?,
            )),
            RunnerCall::LoadState(bytes) => {
                self.session_mut()?.run_loop.load_state(bytes)?;
                Ok(RunnerReply::Done)
            }
        }
    }

    fn session_mut(&mut self) -> Result<&mut Session, RunnerError> {
        self.session.as_mut().ok_or(RunnerError::NoCore)
    }

    fn load_core(&mut self, args: LoadCoreArgs) -> Result<CoreLoaded, RunnerError> {
        // A new core always replaces the old one, which must be gone first
        self.stop()?;

        let path = Path::new(&args.path);
        let config = HostConfig::new(Path::new(&args.system_dir), Path::new(&args.save_dir))?;
        let library = (self.opener)(path)?;
        let mut host = CoreHost::new(library, config, self.buttons.clone(), self.sink.clone());
        host.initialize()?;
        host.apply_overrides(args.overrides.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let loaded = CoreLoaded {
            system: host.system_info(),
            variables: host.variables(),
        };
        tracing::info!(
            core = %loaded.system.library_name,
            version = %loaded.system.library_version,
            options = loaded.variables.len(),
            "Core loaded"
        );

        self.session = Some(Session {
            context: host.context().clone(),
            run_loop: RunLoop::new(host, self.config.clone()),
        });
        Ok(loaded)
    }

    fn load_game(&mut self, args: LoadGameArgs) -> Result<GameLoaded, RunnerError> {
        let session = self.session_mut()?;
        let loaded = session.run_loop.load_game(&args.path, args.data)?;
        Ok(GameLoaded {
            loaded,
            av: session.context.av_info(),
        })
    }

    fn set_input(&mut self, args: SetInputArgs) -> Result<(), RunnerError> {
        let button: JoypadButton = args.key.parse()?;
        self.buttons.set(button, args.down);
        Ok(())
    }

    /// Stop the loop and release the plugin; a no-op without a core
    pub fn stop(&mut self) -> Result<(), RunnerError> {
        if let Some(mut session) = self.session.take() {
            session.run_loop.stop()?;
            self.buttons.release_all();
            tracing::info!(frames = session.run_loop.frames(), "Core stopped");
        }
        Ok(())
    }
}
