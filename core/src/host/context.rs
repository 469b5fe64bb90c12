//! State the plugin reaches through its callbacks

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hashbrown::HashSet;
use retrohost_shared::{AudioData, AvInfo, FrameData, VariableInfo};

use super::HostError;
use super::variables::VariableTable;
use crate::abi::RetroSystemAvInfo;
use crate::codec::PixelFormat;
use crate::input::ButtonStates;

/// Receives converted media as the plugin produces it
pub trait HostSink: Send + Sync {
    fn frame(&self, frame: FrameData);
    fn audio(&self, audio: AudioData);
}

/// Directories handed to the plugin
#[derive(Debug, Clone)]
pub struct HostConfig {
    pub(crate) system_dir: CString,
    pub(crate) save_dir: CString,
}

impl HostConfig {
    pub fn new(system_dir: &Path, save_dir: &Path) -> Result<Self, HostError> {
        Ok(Self {
            system_dir: path_to_cstring(system_dir)?,
            save_dir: path_to_cstring(save_dir)?,
        })
    }

    pub fn system_dir(&self) -> PathBuf {
        PathBuf::from(self.system_dir.to_string_lossy().into_owned())
    }

    pub fn save_dir(&self) -> PathBuf {
        PathBuf::from(self.save_dir.to_string_lossy().into_owned())
    }
}

pub(crate) fn path_to_cstring(path: &Path) -> Result<CString, HostError> {
    let s = path.to_string_lossy();
    CString::new(s.as_bytes()).map_err(|_| HostError::InvalidPath(s.into_owned()))
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-plugin state shared between the host and its callback trampolines
pub struct HostContext {
    pub(crate) config: HostConfig,
    pixel_format: AtomicU8,
    av: Mutex<AvInfo>,
    variables: Mutex<VariableTable>,
    /// Environment commands already reported as unhandled
    unhandled: Mutex<HashSet<u32>>,
    buttons: Arc<ButtonStates>,
    sink: Arc<dyn HostSink>,
}

impl HostContext {
    pub fn new(config: HostConfig, buttons: Arc<ButtonStates>, sink: Arc<dyn HostSink>) -> Self {
        Self {
            config,
            // 0RGB1555 until the plugin declares otherwise
            pixel_format: AtomicU8::new(PixelFormat::Rgb1555.to_u8()),
            av: Mutex::new(AvInfo::default()),
            variables: Mutex::new(VariableTable::new()),
            unhandled: Mutex::new(HashSet::new()),
            buttons,
            sink,
        }
    }

    pub fn pixel_format(&self) -> PixelFormat {
        PixelFormat::from_u8(self.pixel_format.load(Ordering::Acquire))
    }

    pub(crate) fn set_pixel_format(&self, format: PixelFormat) {
        self.pixel_format.store(format.to_u8(), Ordering::Release);
    }

    pub fn av_info(&self) -> AvInfo {
        *lock(&self.av)
    }

    pub fn sample_rate(&self) -> f64 {
        lock(&self.av).sample_rate
    }

    pub(crate) fn set_av_info(&self, raw: &RetroSystemAvInfo) {
        let av = av_from_raw(raw);
        let mut current = lock(&self.av);
        if current.sample_rate != 0.0 && current.sample_rate != av.sample_rate {
            tracing::info!(
                from = current.sample_rate,
                to = av.sample_rate,
                "Core changed sample rate"
            );
        }
        *current = av;
    }

    pub(crate) fn variables(&self) -> MutexGuard<'_, VariableTable> {
        lock(&self.variables)
    }

    /// Set an option value; visible to the plugin's next lookup.
    /// Returns whether the key is currently declared.
    pub fn set_variable(&self, key: &str, value: &str) -> bool {
        self.variables().set(key, value)
    }

    pub fn variable(&self, key: &str) -> Option<String> {
        self.variables().get(key).map(str::to_owned)
    }

    pub fn list_variables(&self) -> Vec<VariableInfo> {
        self.variables().list()
    }

    /// Returns `true` the first time a command id is seen
    pub(crate) fn note_unhandled(&self, command: u32) -> bool {
        lock(&self.unhandled).insert(command)
    }

    pub fn buttons(&self) -> &Arc<ButtonStates> {
        &self.buttons
    }

    pub(crate) fn sink(&self) -> &dyn HostSink {
        self.sink.as_ref()
    }
}

pub(crate) fn av_from_raw(raw: &RetroSystemAvInfo) -> AvInfo {
    AvInfo {
        width: raw.geometry.base_width,
        height: raw.geometry.base_height,
        max_width: raw.geometry.max_width,
        max_height: raw.geometry.max_height,
        aspect_ratio: raw.geometry.aspect_ratio,
        fps: raw.timing.fps,
        sample_rate: raw.timing.sample_rate,
    }
}
