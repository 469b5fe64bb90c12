//! Application facade over one runner session
//!
//! [`CoreService`] is what the UI or CLI talks to. It owns at most one
//! runner process at a time, maps each operation onto a runner call, keeps
//! the per-core option overrides, and rebroadcasts runner output as
//! [`ServiceEvent`]s.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use retrohost_shared::rpc::{
    LoadCoreArgs, LoadGameArgs, METHOD_GET_SAMPLE_RATE, METHOD_LOAD_CORE, METHOD_LOAD_GAME,
    METHOD_SAVE_STATE, SetInputArgs, SetVariableArgs,
};
use retrohost_shared::{
    AudioData, AvInfo, FrameData, JoypadButton, ProtocolError, RunnerCall, RunnerReply,
    SystemInfo, UnknownButton, VariableInfo,
};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::{Config, ResolvedPaths};
use crate::ipc::{RpcError, RunnerProcess, SpawnOptions};
use crate::options::{OptionStore, OptionsError, Overrides};

/// Capacity of the event broadcast; slow subscribers skip ahead
const EVENT_CAPACITY: usize = 256;

/// Suffix of plugin file names in the cores directory
const CORE_SUFFIX: &str = "_libretro";

/// Something subscribers may want to react to
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    Frame(Arc<FrameData>),
    Audio(Arc<AudioData>),
    Log { level: String, message: String },
    DownloadProgress { core: String, percent: f32 },
    /// The runner went away, whether stopped or crashed
    SessionEnded,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("no core loaded")]
    NoCore,
    #[error("no game loaded")]
    NoGame,
    #[error("core not found: {}", .0.display())]
    CoreNotFound(PathBuf),
    #[error("core rejected content {}", .0.display())]
    ContentRejected(PathBuf),
    #[error(transparent)]
    InvalidKey(#[from] UnknownButton),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// The live runner and what it told us
struct RunnerSession {
    process: RunnerProcess,
    core: String,
    system: SystemInfo,
    variables: Vec<VariableInfo>,
    overrides: Overrides,
    av: Option<AvInfo>,
    running: bool,
}

pub struct CoreService {
    spawn: SpawnOptions,
    paths: ResolvedPaths,
    options: OptionStore,
    events: broadcast::Sender<ServiceEvent>,
    session: Option<RunnerSession>,
}

impl CoreService {
    /// A service that spawns runners from the current executable
    pub fn new(config: &Config) -> std::io::Result<Self> {
        let program = std::env::current_exe()?;
        Ok(Self::with_program(config, config.resolve_paths(), program))
    }

    pub fn with_program(config: &Config, paths: ResolvedPaths, program: PathBuf) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            spawn: SpawnOptions::new(program, &config.runner),
            options: OptionStore::new(paths.options_dir.clone()),
            paths,
            events,
            session: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    /// Forward progress from the external core downloader
    pub fn report_download_progress(&self, core: &str, percent: f32) {
        let _ = self.events.send(ServiceEvent::DownloadProgress {
            core: core.to_owned(),
            percent: percent.clamp(0.0, 100.0),
        });
    }

    pub fn paths(&self) -> &ResolvedPaths {
        &self.paths
    }

    pub fn option_store(&self) -> &OptionStore {
        &self.options
    }

    /// Plugin file for `name`: a path is taken as-is, a bare name resolves
    /// to `<cores_dir>/<name>_libretro.<dll|dylib|so>`
    pub fn core_path(&self, name: &str) -> PathBuf {
        let candidate = Path::new(name);
        if candidate.extension().is_some() || candidate.components().count() > 1 {
            return candidate.to_path_buf();
        }
        self.paths.cores_dir.join(format!(
            "{name}{CORE_SUFFIX}.{}",
            std::env::consts::DLL_EXTENSION
        ))
    }

    pub fn system_info(&self) -> Option<&SystemInfo> {
        self.session.as_ref().map(|s| &s.system)
    }

    pub fn variables(&self) -> &[VariableInfo] {
        self.session
            .as_ref()
            .map(|s| s.variables.as_slice())
            .unwrap_or_default()
    }

    pub fn av_info(&self) -> Option<AvInfo> {
        self.session.as_ref().and_then(|s| s.av)
    }

    pub fn is_running(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.running)
    }

    /// Start a runner and load a core into it, replacing any current session
    pub async fn load_core(&mut self, name: &str) -> Result<SystemInfo, ServiceError> {
        self.stop().await;

        let path = self.core_path(name);
        if !path.is_file() {
            return Err(ServiceError::CoreNotFound(path));
        }
        let core = core_name(&path);
        let overrides = self.options.load(&core)?;
        self.paths
            .ensure_dirs()
            .map_err(|source| ServiceError::Io {
                path: self.paths.system_dir.clone(),
                source,
            })?;

        let mut process = RunnerProcess::spawn(&self.spawn).await?;
        self.attach(&process);

        let call = RunnerCall::LoadCore(LoadCoreArgs {
            path: path.to_string_lossy().into_owned(),
            system_dir: self.paths.system_dir.to_string_lossy().into_owned(),
            save_dir: self.paths.save_dir.to_string_lossy().into_owned(),
            overrides: overrides
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        });
        let loaded = match process.call(call).await {
            Ok(RunnerReply::CoreLoaded(loaded)) => loaded,
            Ok(other) => {
                process.stop().await;
                return Err(unexpected(METHOD_LOAD_CORE, &other));
            }
            Err(e) => {
                process.stop().await;
                return Err(e.into());
            }
        };

        tracing::info!(
            core = %core,
            name = %loaded.system.library_name,
            version = %loaded.system.library_version,
            overrides = overrides.len(),
            "Core ready"
        );
        let system = loaded.system.clone();
        self.session = Some(RunnerSession {
            process,
            core,
            system: loaded.system,
            variables: loaded.variables,
            overrides,
            av: None,
            running: false,
        });
        Ok(system)
    }

    /// Route runner output to subscribers
    fn attach(&self, process: &RunnerProcess) {
        let connection = process.connection();

        let events = self.events.clone();
        connection.on(move |frame: FrameData| {
            let _ = events.send(ServiceEvent::Frame(Arc::new(frame)));
        });
        let events = self.events.clone();
        connection.on(move |audio: AudioData| {
            let _ = events.send(ServiceEvent::Audio(Arc::new(audio)));
        });
        let events = self.events.clone();
        connection.on_log(move |level, message| {
            let _ = events.send(ServiceEvent::Log {
                level: level.to_owned(),
                message: message.to_owned(),
            });
        });

        let events = self.events.clone();
        let closed = connection.on_close();
        tokio::spawn(async move {
            closed.await;
            let _ = events.send(ServiceEvent::SessionEnded);
        });
    }

    /// Hand a game to the loaded core.
    ///
    /// Content is read into memory unless the core wants only the path.
    pub async fn load_game(&mut self, path: &Path) -> Result<AvInfo, ServiceError> {
        let session = self.session.as_mut().ok_or(ServiceError::NoCore)?;
        let data = if session.system.need_fullpath {
            None
        } else {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|source| ServiceError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            Some(bytes)
        };

        let reply = session
            .process
            .call(RunnerCall::LoadGame(LoadGameArgs {
                path: path.to_string_lossy().into_owned(),
                data,
            }))
            .await?;
        let RunnerReply::GameLoaded(loaded) = reply else {
            return Err(unexpected(METHOD_LOAD_GAME, &reply));
        };
        if !loaded.loaded {
            return Err(ServiceError::ContentRejected(path.to_path_buf()));
        }
        session.av = Some(loaded.av);
        Ok(loaded.av)
    }

    /// Start ticking the core
    pub async fn run(&mut self) -> Result<(), ServiceError> {
        let session = self.session.as_mut().ok_or(ServiceError::NoCore)?;
        if session.av.is_none() {
            return Err(ServiceError::NoGame);
        }
        session.process.call(RunnerCall::Run).await?;
        session.running = true;
        Ok(())
    }

    /// End the session and wait for the runner to exit. Does nothing
    /// without a session.
    pub async fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.process.stop().await;
            tracing::info!(core = %session.core, "Session stopped");
        }
    }

    pub async fn send_input(&mut self, key: &str, down: bool) -> Result<(), ServiceError> {
        let button: JoypadButton = key.parse()?;
        let session = self.session.as_ref().ok_or(ServiceError::NoCore)?;
        session
            .process
            .call(RunnerCall::SetInput(SetInputArgs {
                key: button.to_string(),
                down,
            }))
            .await?;
        Ok(())
    }

    /// Change an option; the core sees it on its next query
    pub async fn set_option(&mut self, key: &str, value: &str) -> Result<(), ServiceError> {
        let session = self.session.as_mut().ok_or(ServiceError::NoCore)?;
        session
            .process
            .call(RunnerCall::SetVariable(SetVariableArgs {
                key: key.to_owned(),
                value: value.to_owned(),
            }))
            .await?;
        session.overrides.insert(key.to_owned(), value.to_owned());
        if let Some(var) = session.variables.iter_mut().find(|v| v.key == key) {
            var.value = value.to_owned();
        }
        Ok(())
    }

    /// Persist the current overrides for the loaded core
    pub fn save_options(&self) -> Result<usize, ServiceError> {
        let session = self.session.as_ref().ok_or(ServiceError::NoCore)?;
        Ok(self
            .options
            .save(&session.core, &session.overrides, &session.variables)?)
    }

    pub async fn reset(&mut self) -> Result<(), ServiceError> {
        self.require_game()?.process.call(RunnerCall::Reset).await?;
        Ok(())
    }

    pub async fn save_state(&mut self) -> Result<Vec<u8>, ServiceError> {
        match self.require_game()?.process.call(RunnerCall::SaveState).await? {
            RunnerReply::State(bytes) => Ok(bytes),
            other => Err(unexpected(METHOD_SAVE_STATE, &other)),
        }
    }

    pub async fn load_state(&mut self, state: Vec<u8>) -> Result<(), ServiceError> {
        self.require_game()?
            .process
            .call(RunnerCall::LoadState(state))
            .await?;
        Ok(())
    }

    pub async fn sample_rate(&self) -> Result<f64, ServiceError> {
        let session = self.session.as_ref().ok_or(ServiceError::NoCore)?;
        match session.process.call(RunnerCall::GetSampleRate).await? {
            RunnerReply::SampleRate(rate) => Ok(rate),
            other => Err(unexpected(METHOD_GET_SAMPLE_RATE, &other)),
        }
    }

    fn require_game(&self) -> Result<&RunnerSession, ServiceError> {
        let session = self.session.as_ref().ok_or(ServiceError::NoCore)?;
        if session.av.is_none() {
            return Err(ServiceError::NoGame);
        }
        Ok(session)
    }
}

/// Option-store name of a core: file stem without the `_libretro` suffix
pub fn core_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.strip_suffix(CORE_SUFFIX)
        .map(str::to_owned)
        .unwrap_or(stem)
}

fn unexpected(method: &'static str, reply: &RunnerReply) -> ServiceError {
    ProtocolError::UnexpectedReply {
        method,
        reply: reply.name(),
    }
    .into()
}
