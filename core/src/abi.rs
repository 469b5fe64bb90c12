//! Plugin ABI declarations
//!
//! Mirrors the parts of the libretro C API the host speaks: the exported
//! entry points, the callback signatures the host installs, the structs
//! passed across the boundary and the environment command ids.

use std::ffi::{c_char, c_int, c_uint, c_void};

/// The only API revision accepted from `retro_api_version`
pub const API_VERSION: c_uint = 1;

// ============================================================================
// Environment commands
// ============================================================================

/// Flag OR-ed into commands that are not yet part of the stable API
pub const ENVIRONMENT_EXPERIMENTAL: c_uint = 0x10000;

pub const ENVIRONMENT_GET_SYSTEM_DIRECTORY: c_uint = 9;
pub const ENVIRONMENT_SET_PIXEL_FORMAT: c_uint = 10;
pub const ENVIRONMENT_GET_VARIABLE: c_uint = 15;
pub const ENVIRONMENT_SET_VARIABLES: c_uint = 16;
pub const ENVIRONMENT_GET_LOG_INTERFACE: c_uint = 27;
pub const ENVIRONMENT_GET_SAVE_DIRECTORY: c_uint = 31;
pub const ENVIRONMENT_SET_SYSTEM_AV_INFO: c_uint = 32;

// ============================================================================
// Pixel formats, devices, log levels
// ============================================================================

pub const PIXEL_FORMAT_0RGB1555: c_uint = 0;
pub const PIXEL_FORMAT_XRGB8888: c_uint = 1;
pub const PIXEL_FORMAT_RGB565: c_uint = 2;

pub const DEVICE_NONE: c_uint = 0;
pub const DEVICE_JOYPAD: c_uint = 1;

pub const LOG_DEBUG: c_int = 0;
pub const LOG_INFO: c_int = 1;
pub const LOG_WARN: c_int = 2;
pub const LOG_ERROR: c_int = 3;

// ============================================================================
// Structs
// ============================================================================

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RetroGameInfo {
    pub path: *const c_char,
    pub data: *const c_void,
    pub size: usize,
    pub meta: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RetroSystemInfo {
    pub library_name: *const c_char,
    pub library_version: *const c_char,
    pub valid_extensions: *const c_char,
    pub need_fullpath: bool,
    pub block_extract: bool,
}

impl Default for RetroSystemInfo {
    fn default() -> Self {
        Self {
            library_name: std::ptr::null(),
            library_version: std::ptr::null(),
            valid_extensions: std::ptr::null(),
            need_fullpath: false,
            block_extract: false,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RetroGameGeometry {
    pub base_width: c_uint,
    pub base_height: c_uint,
    pub max_width: c_uint,
    pub max_height: c_uint,
    pub aspect_ratio: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RetroSystemTiming {
    pub fps: f64,
    pub sample_rate: f64,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RetroSystemAvInfo {
    pub geometry: RetroGameGeometry,
    pub timing: RetroSystemTiming,
}

/// One entry of a `SET_VARIABLES` array, or the query of `GET_VARIABLE`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RetroVariable {
    pub key: *const c_char,
    pub value: *const c_char,
}

/// Filled in by the host on `GET_LOG_INTERFACE`
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RetroLogCallback {
    pub log: Option<LogPrintfFn>,
}

// ============================================================================
// Callback signatures (host -> plugin registration)
// ============================================================================

pub type EnvironmentFn = unsafe extern "C" fn(cmd: c_uint, data: *mut c_void) -> bool;
pub type VideoRefreshFn =
    unsafe extern "C" fn(data: *const c_void, width: c_uint, height: c_uint, pitch: usize);
pub type AudioSampleFn = unsafe extern "C" fn(left: i16, right: i16);
pub type AudioSampleBatchFn = unsafe extern "C" fn(data: *const i16, frames: usize) -> usize;
pub type InputPollFn = unsafe extern "C" fn();
pub type InputStateFn =
    unsafe extern "C" fn(port: c_uint, device: c_uint, index: c_uint, id: c_uint) -> i16;
/// Declared without varargs; only the format string is read.
pub type LogPrintfFn = unsafe extern "C" fn(level: c_int, fmt: *const c_char);

// ============================================================================
// Exported entry points (plugin)
// ============================================================================

pub type InitFn = unsafe extern "C" fn();
pub type DeinitFn = unsafe extern "C" fn();
pub type ApiVersionFn = unsafe extern "C" fn() -> c_uint;
pub type GetSystemInfoFn = unsafe extern "C" fn(info: *mut RetroSystemInfo);
pub type GetSystemAvInfoFn = unsafe extern "C" fn(info: *mut RetroSystemAvInfo);
pub type SetEnvironmentFn = unsafe extern "C" fn(cb: EnvironmentFn);
pub type SetVideoRefreshFn = unsafe extern "C" fn(cb: VideoRefreshFn);
pub type SetAudioSampleFn = unsafe extern "C" fn(cb: AudioSampleFn);
pub type SetAudioSampleBatchFn = unsafe extern "C" fn(cb: AudioSampleBatchFn);
pub type SetInputPollFn = unsafe extern "C" fn(cb: InputPollFn);
pub type SetInputStateFn = unsafe extern "C" fn(cb: InputStateFn);
pub type SetControllerPortDeviceFn = unsafe extern "C" fn(port: c_uint, device: c_uint);
pub type ResetFn = unsafe extern "C" fn();
pub type RunFn = unsafe extern "C" fn();
pub type SerializeSizeFn = unsafe extern "C" fn() -> usize;
pub type SerializeFn = unsafe extern "C" fn(data: *mut c_void, size: usize) -> bool;
pub type UnserializeFn = unsafe extern "C" fn(data: *const c_void, size: usize) -> bool;
pub type CheatResetFn = unsafe extern "C" fn();
pub type CheatSetFn = unsafe extern "C" fn(index: c_uint, enabled: bool, code: *const c_char);
pub type LoadGameFn = unsafe extern "C" fn(game: *const RetroGameInfo) -> bool;
pub type UnloadGameFn = unsafe extern "C" fn();
pub type GetRegionFn = unsafe extern "C" fn() -> c_uint;
pub type GetMemoryDataFn = unsafe extern "C" fn(id: c_uint) -> *mut c_void;
pub type GetMemorySizeFn = unsafe extern "C" fn(id: c_uint) -> usize;
