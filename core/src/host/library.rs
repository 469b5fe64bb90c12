//! Plugin library loading and symbol resolution

use std::path::Path;

use libloading::Library;

use super::LoadError;
use crate::abi::*;

/// Every entry point the host calls, resolved up front
#[derive(Clone, Copy)]
pub struct CoreApi {
    pub init: InitFn,
    pub deinit: DeinitFn,
    pub api_version: ApiVersionFn,
    pub get_system_info: GetSystemInfoFn,
    pub get_system_av_info: GetSystemAvInfoFn,
    pub set_environment: SetEnvironmentFn,
    pub set_video_refresh: SetVideoRefreshFn,
    pub set_audio_sample: SetAudioSampleFn,
    pub set_audio_sample_batch: SetAudioSampleBatchFn,
    pub set_input_poll: SetInputPollFn,
    pub set_input_state: SetInputStateFn,
    pub set_controller_port_device: SetControllerPortDeviceFn,
    pub reset: ResetFn,
    pub run: RunFn,
    pub serialize_size: SerializeSizeFn,
    pub serialize: SerializeFn,
    pub unserialize: UnserializeFn,
    pub cheat_reset: CheatResetFn,
    pub cheat_set: CheatSetFn,
    pub load_game: LoadGameFn,
    pub unload_game: UnloadGameFn,
    pub get_region: GetRegionFn,
    pub get_memory_data: GetMemoryDataFn,
    pub get_memory_size: GetMemorySizeFn,
}

impl std::fmt::Debug for CoreApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreApi").finish_non_exhaustive()
    }
}

/// Resolve one symbol and copy the function pointer out.
///
/// # Safety
/// `T` must match the symbol's real signature.
unsafe fn symbol<T: Copy>(
    library: &Library,
    path: &Path,
    name: &'static str,
) -> Result<T, LoadError> {
    // SAFETY: forwarded to the caller.
    let sym = unsafe { library.get::<T>(name.as_bytes()) }.map_err(|source| {
        LoadError::MissingSymbol {
            path: path.to_path_buf(),
            symbol: name,
            source,
        }
    })?;
    Ok(*sym)
}

impl CoreApi {
    fn resolve(library: &Library, path: &Path) -> Result<Self, LoadError> {
        // SAFETY: each field type is the libretro declaration of that symbol.
        unsafe {
            Ok(Self {
                init: symbol(library, path, "retro_init")?,
                deinit: symbol(library, path, "retro_deinit")?,
                api_version: symbol(library, path, "retro_api_version")?,
                get_system_info: symbol(library, path, "retro_get_system_info")?,
                get_system_av_info: symbol(library, path, "retro_get_system_av_info")?,
                set_environment: symbol(library, path, "retro_set_environment")?,
                set_video_refresh: symbol(library, path, "retro_set_video_refresh")?,
                set_audio_sample: symbol(library, path, "retro_set_audio_sample")?,
                set_audio_sample_batch: symbol(library, path, "retro_set_audio_sample_batch")?,
                set_input_poll: symbol(library, path, "retro_set_input_poll")?,
                set_input_state: symbol(library, path, "retro_set_input_state")?,
                set_controller_port_device: symbol(
                    library,
                    path,
                    "retro_set_controller_port_device",
                )?,
                reset: symbol(library, path, "retro_reset")?,
                run: symbol(library, path, "retro_run")?,
                serialize_size: symbol(library, path, "retro_serialize_size")?,
                serialize: symbol(library, path, "retro_serialize")?,
                unserialize: symbol(library, path, "retro_unserialize")?,
                cheat_reset: symbol(library, path, "retro_cheat_reset")?,
                cheat_set: symbol(library, path, "retro_cheat_set")?,
                load_game: symbol(library, path, "retro_load_game")?,
                unload_game: symbol(library, path, "retro_unload_game")?,
                get_region: symbol(library, path, "retro_get_region")?,
                get_memory_data: symbol(library, path, "retro_get_memory_data")?,
                get_memory_size: symbol(library, path, "retro_get_memory_size")?,
            })
        }
    }
}

/// A plugin's entry points together with the library that backs them.
///
/// The function pointers in `api` are only valid while `_library` is alive,
/// so the library is the last field to drop.
pub struct CoreLibrary {
    api: CoreApi,
    _library: Option<Library>,
}

impl CoreLibrary {
    /// Open a shared library and resolve every required entry point.
    ///
    /// Fails without keeping anything loaded if the file is missing, any
    /// symbol is absent or the API version is not the one the host speaks.
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound(path.to_path_buf()));
        }

        // SAFETY: loading a foreign library runs its initializers; the
        // runner process exists to contain whatever that does.
        let library = unsafe { Library::new(path) }.map_err(|source| LoadError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let api = CoreApi::resolve(&library, path)?;
        let core = Self {
            api,
            _library: Some(library),
        };
        core.check_version()?;

        tracing::info!(path = %path.display(), "Loaded core library");
        Ok(core)
    }

    /// Wrap entry points that live in this binary (no library to keep alive)
    pub fn from_api(api: CoreApi) -> Result<Self, LoadError> {
        let core = Self {
            api,
            _library: None,
        };
        core.check_version()?;
        Ok(core)
    }

    pub fn api(&self) -> &CoreApi {
        &self.api
    }

    fn check_version(&self) -> Result<(), LoadError> {
        // SAFETY: resolved with the declared signature; takes no arguments.
        let found = unsafe { (self.api.api_version)() };
        if found != API_VERSION {
            return Err(LoadError::ApiVersion {
                found,
                expected: API_VERSION,
            });
        }
        Ok(())
    }
}
