//! ABI host for one native core
//!
//! [`CoreHost`] owns a loaded plugin and the callbacks it was given. The
//! lifecycle is strictly ordered:
//!
//! 1. [`CoreHost::load`] resolves every entry point (nothing is kept on failure)
//! 2. [`CoreHost::initialize`] installs callbacks and calls `retro_init`, once
//! 3. [`CoreHost::load_content`] hands the plugin a game
//! 4. [`CoreHost::run_frame`] advances one tick at a time
//!
//! Dropping the host unloads the game, deinitializes the plugin, releases the
//! callback slot and only then unloads the library.

mod callbacks;
mod context;
mod environment;
mod error;
mod library;
mod variables;


use std::ffi::{CStr, CString, c_char, c_void};
use std::path::Path;
use std::sync::Arc;

use retrohost_shared::{AvInfo, SystemInfo, VariableInfo};

pub use context::{HostConfig, HostContext, HostSink};
pub use error::{HostError, LoadError};
pub use library::{CoreApi, CoreLibrary};
pub use variables::{VariableDescriptor, VariableTable};

use crate::abi::{self, RetroGameInfo, RetroSystemAvInfo, RetroSystemInfo};
use crate::input::ButtonStates;
use context::{av_from_raw, path_to_cstring};

/// Whether some host in this process currently holds the callback slot
pub fn is_core_active() -> bool {
    callbacks::is_active()
}

/// Content handed to the plugin, kept alive for the session
struct LoadedGame {
    _path: CString,
    _data: Option<Vec<u8>>,
}

pub struct CoreHost {
    core: CoreLibrary,
    context: Arc<HostContext>,
    initialized: bool,
    game: Option<LoadedGame>,
}

impl CoreHost {
    /// Open a plugin library from disk
    pub fn load(
        path: &Path,
        config: HostConfig,
        buttons: Arc<ButtonStates>,
        sink: Arc<dyn HostSink>,
    ) -> Result<Self, LoadError> {
        let core = CoreLibrary::open(path)?;
        Ok(Self::new(core, config, buttons, sink))
    }

    pub fn new(
        core: CoreLibrary,
        config: HostConfig,
        buttons: Arc<ButtonStates>,
        sink: Arc<dyn HostSink>,
    ) -> Self {
        Self {
            core,
            context: Arc::new(HostContext::new(config, buttons, sink)),
            initialized: false,
            game: None,
        }
    }

    /// Install callbacks and initialize the plugin. Must be called exactly
    /// once, before anything else touches the plugin.
    pub fn initialize(&mut self) -> Result<(), HostError> {
        if self.initialized {
            return Err(HostError::AlreadyInitialized);
        }
        callbacks::activate(self.context.clone())?;

        let api = self.core.api();
        // SAFETY: entry points resolved with their declared signatures; the
        // callbacks stay valid until this host is dropped.
        unsafe {
            (api.set_environment)(callbacks::environment);
            (api.init)();
            (api.set_video_refresh)(callbacks::video_refresh);
            (api.set_audio_sample)(callbacks::audio_sample);
            (api.set_audio_sample_batch)(callbacks::audio_sample_batch);
            (api.set_input_poll)(callbacks::input_poll);
            (api.set_input_state)(callbacks::input_state);
        }
        self.initialized = true;
        tracing::debug!("Core initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn has_content(&self) -> bool {
        self.game.is_some()
    }

    /// Shared state the callbacks use
    pub fn context(&self) -> &Arc<HostContext> {
        &self.context
    }

    pub fn system_info(&self) -> SystemInfo {
        let mut raw = RetroSystemInfo::default();
        // SAFETY: the plugin fills a struct we own; may be called before init.
        unsafe { (self.core.api().get_system_info)(&mut raw) };

        // SAFETY: the plugin returns static NUL-terminated strings or null.
        let text = |p: *const c_char| unsafe { c_text(p) };
        SystemInfo {
            library_name: text(raw.library_name),
            library_version: text(raw.library_version),
            valid_extensions: text(raw.valid_extensions)
                .split('|')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
            need_fullpath: raw.need_fullpath,
        }
    }

    /// Apply stored option overrides
    pub fn apply_overrides<'a>(&self, overrides: impl IntoIterator<Item = (&'a str, &'a str)>) {
        for (key, value) in overrides {
            if !self.context.set_variable(key, value) {
                tracing::debug!(key, "Override stored for undeclared option");
            }
        }
    }

    pub fn variables(&self) -> Vec<VariableInfo> {
        self.context.list_variables()
    }

    /// Hand content to the plugin.
    ///
    /// Any content already loaded is unloaded first. Returns the plugin's
    /// own verdict; `Ok(false)` means the plugin rejected the content,
    /// which leaves the host usable.
    pub fn load_content(&mut self, path: &str, data: Option<Vec<u8>>) -> Result<bool, HostError> {
        if !self.initialized {
            return Err(HostError::NotInitialized);
        }
        let c_path = path_to_cstring(Path::new(path))?;
        let (data_ptr, size) = match &data {
            Some(bytes) => (bytes.as_ptr().cast::<c_void>(), bytes.len()),
            None => (std::ptr::null(), 0),
        };
        let info = RetroGameInfo {
            path: c_path.as_ptr(),
            data: data_ptr,
            size,
            meta: std::ptr::null(),
        };

        let api = *self.core.api();
        if let Some(previous) = self.game.take() {
            // SAFETY: initialized with content loaded; the old buffers are
            // released only after the plugin has let go of them.
            unsafe { (api.unload_game)() };
            drop(previous);
            tracing::debug!("Unloaded previous content");
        }

        // SAFETY: `info` and the buffers it points at outlive the call.
        let loaded = unsafe { (api.load_game)(&info) };
        if !loaded {
            tracing::warn!(path, "Core rejected content");
            return Ok(false);
        }

        let mut av = RetroSystemAvInfo::default();
        // SAFETY: the plugin fills a struct we own.
        unsafe {
            (api.get_system_av_info)(&mut av);
            (api.set_controller_port_device)(0, abi::DEVICE_JOYPAD);
        }
        self.context.set_av_info(&av);
        self.game = Some(LoadedGame {
            _path: c_path,
            _data: data,
        });

        let av = av_from_raw(&av);
        tracing::info!(
            path,
            width = av.width,
            height = av.height,
            fps = av.fps,
            sample_rate = av.sample_rate,
            "Content loaded"
        );
        Ok(true)
    }

    /// Geometry and timing; updated when the plugin re-declares them
    pub fn av_info(&self) -> AvInfo {
        self.context.av_info()
    }

    pub fn sample_rate(&self) -> f64 {
        self.context.sample_rate()
    }

    /// Advance one tick. Callbacks fire synchronously before this returns.
    pub fn run_frame(&mut self) -> Result<(), HostError> {
        self.require_content()?;
        // SAFETY: initialized with content loaded.
        unsafe { (self.core.api().run)() };
        Ok(())
    }

    pub fn reset(&mut self) -> Result<(), HostError> {
        self.require_content()?;
        // SAFETY: initialized with content loaded.
        unsafe { (self.core.api().reset)() };
        Ok(())
    }

    pub fn save_state(&mut self) -> Result<Vec<u8>, HostError> {
        self.require_content()?;
        let api = self.core.api();
        // SAFETY: initialized with content loaded; the buffer is exactly the
        // size the plugin asked for.
        unsafe {
            let size = (api.serialize_size)();
            let mut buf = vec![0u8; size];
            if !(api.serialize)(buf.as_mut_ptr().cast(), size) {
                return Err(HostError::StateRefused("save"));
            }
            Ok(buf)
        }
    }

    pub fn load_state(&mut self, state: &[u8]) -> Result<(), HostError> {
        self.require_content()?;
        // SAFETY: initialized with content loaded; the plugin only reads.
        let ok = unsafe { (self.core.api().unserialize)(state.as_ptr().cast(), state.len()) };
        if !ok {
            return Err(HostError::StateRefused("load"));
        }
        Ok(())
    }

    fn require_content(&self) -> Result<(), HostError> {
        if !self.initialized {
            return Err(HostError::NotInitialized);
        }
        if self.game.is_none() {
            return Err(HostError::NoContent);
        }
        Ok(())
    }
}

impl Drop for CoreHost {
    fn drop(&mut self) {
        let api = *self.core.api();
        let game = self.game.take();
        // SAFETY: teardown mirrors setup; callbacks stay installed until
        // the plugin has deinitialized.
        unsafe {
            if game.is_some() {
                (api.unload_game)();
            }
            if self.initialized {
                (api.deinit)();
            }
        }
        drop(game);
        if self.initialized {
            callbacks::deactivate(&self.context);
            self.initialized = false;
        }
        tracing::debug!("Core released");
    }
}

/// # Safety
/// `p` must be null or a NUL-terminated string.
unsafe fn c_text(p: *const c_char) -> String {
    if p.is_null() {
        return String::new();
    }
    // SAFETY: forwarded from the caller.
    unsafe { CStr::from_ptr(p) }.to_string_lossy().into_owned()
}
