//! Shared test utilities for host, run loop and runner tests

use std::ffi::{CStr, c_char, c_uint, c_void};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use retrohost_shared::{AudioData, FrameData};

use crate::abi::*;
use crate::host::{CoreApi, CoreLibrary, HostConfig, HostSink};

// ============================================================================
// Process-wide plugin lock
// ============================================================================

static PLUGIN_LOCK: Mutex<()> = Mutex::new(());

/// Serialize tests that activate a plugin; only one may be active per
/// process. Also resets the stub core's recorded state.
pub fn plugin_lock() -> MutexGuard<'static, ()> {
    let guard = PLUGIN_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
    reset_stub();
    guard
}

// ============================================================================
// Recording sink
// ============================================================================

#[derive(Default)]
pub struct RecordingSink {
    pub frames: Mutex<Vec<FrameData>>,
    pub audio: Mutex<Vec<AudioData>>,
}

impl RecordingSink {
    pub fn frames(&self) -> Vec<FrameData> {
        self.frames.lock().unwrap().clone()
    }

    pub fn audio(&self) -> Vec<AudioData> {
        self.audio.lock().unwrap().clone()
    }
}

impl HostSink for RecordingSink {
    fn frame(&self, frame: FrameData) {
        self.frames.lock().unwrap().push(frame);
    }

    fn audio(&self, audio: AudioData) {
        self.audio.lock().unwrap().push(audio);
    }
}

pub fn test_config() -> HostConfig {
    HostConfig::new(Path::new("/tmp/retrohost-system"), Path::new("/tmp/retrohost-saves")).unwrap()
}

// ============================================================================
// Stub core
// ============================================================================

pub const STUB_WIDTH: u32 = 4;
pub const STUB_HEIGHT: u32 = 2;
/// Row pitch with 4 bytes of padding after each row
pub const STUB_PITCH: usize = STUB_WIDTH as usize * 2 + 4;
pub const STUB_FPS: f64 = 60.0;
pub const STUB_SAMPLE_RATE: f64 = 32000.0;
/// One tick worth of stereo frames at the declared rate
pub const STUB_AUDIO_FRAMES: usize = (STUB_SAMPLE_RATE / STUB_FPS) as usize;
/// RGB565 pure green
pub const STUB_COLOR: u16 = 0x07E0;
pub const STUB_OPTION_KEY: &str = "stub_palette";

struct Callbacks {
    environment: Option<EnvironmentFn>,
    video: Option<VideoRefreshFn>,
    audio_batch: Option<AudioSampleBatchFn>,
    input_poll: Option<InputPollFn>,
    input_state: Option<InputStateFn>,
}

static CALLBACKS: Mutex<Callbacks> = Mutex::new(Callbacks {
    environment: None,
    video: None,
    audio_batch: None,
    input_poll: None,
    input_state: None,
});

pub static INITS: AtomicU32 = AtomicU32::new(0);
pub static DEINITS: AtomicU32 = AtomicU32::new(0);
pub static UNLOADS: AtomicU32 = AtomicU32::new(0);
pub static RUNS: AtomicU32 = AtomicU32::new(0);
pub static RESETS: AtomicU32 = AtomicU32::new(0);
pub static LOADS: AtomicU32 = AtomicU32::new(0);
/// `UNLOADS` as seen by the most recent `retro_load_game`
pub static UNLOADS_AT_LAST_LOAD: AtomicU32 = AtomicU32::new(0);
/// Make `retro_load_game` return false
pub static REJECT_CONTENT: AtomicBool = AtomicBool::new(false);
/// START as seen by the last tick
pub static START_HELD: AtomicBool = AtomicBool::new(false);
/// Option value seen by the last tick
pub static PALETTE: Mutex<Option<String>> = Mutex::new(None);

fn reset_stub() {
    let mut cb = CALLBACKS.lock().unwrap_or_else(PoisonError::into_inner);
    *cb = Callbacks {
        environment: None,
        video: None,
        audio_batch: None,
        input_poll: None,
        input_state: None,
    };
    for counter in [
        &INITS,
        &DEINITS,
        &UNLOADS,
        &RUNS,
        &RESETS,
        &LOADS,
        &UNLOADS_AT_LAST_LOAD,
    ] {
        counter.store(0, Ordering::SeqCst);
    }
    REJECT_CONTENT.store(false, Ordering::SeqCst);
    START_HELD.store(false, Ordering::SeqCst);
    *PALETTE.lock().unwrap_or_else(PoisonError::into_inner) = None;
}

fn callbacks() -> MutexGuard<'static, Callbacks> {
    CALLBACKS.lock().unwrap_or_else(PoisonError::into_inner)
}

fn env(cmd: c_uint, data: *mut c_void) -> bool {
    let Some(f) = callbacks().environment else {
        return false;
    };
    unsafe { f(cmd, data) }
}

fn stub_av() -> RetroSystemAvInfo {
    RetroSystemAvInfo {
        geometry: RetroGameGeometry {
            base_width: STUB_WIDTH,
            base_height: STUB_HEIGHT,
            max_width: STUB_WIDTH,
            max_height: STUB_HEIGHT,
            aspect_ratio: 2.0,
        },
        timing: RetroSystemTiming {
            fps: STUB_FPS,
            sample_rate: STUB_SAMPLE_RATE,
        },
    }
}

extern "C" fn stub_api_version() -> c_uint {
    API_VERSION
}

extern "C" fn stub_bad_api_version() -> c_uint {
    API_VERSION + 1
}

extern "C" fn stub_init() {
    INITS.fetch_add(1, Ordering::SeqCst);
}

extern "C" fn stub_deinit() {
    DEINITS.fetch_add(1, Ordering::SeqCst);
}

extern "C" fn stub_get_system_info(info: *mut RetroSystemInfo) {
    unsafe {
        *info = RetroSystemInfo {
            library_name: c"Stub Core".as_ptr(),
            library_version: c"1.0".as_ptr(),
            valid_extensions: c"bin|rom".as_ptr(),
            need_fullpath: false,
            block_extract: false,
        };
    }
}

extern "C" fn stub_get_system_av_info(info: *mut RetroSystemAvInfo) {
    unsafe { *info = stub_av() };
}

extern "C" fn stub_set_environment(cb: EnvironmentFn) {
    callbacks().environment = Some(cb);

    let vars = [
        RetroVariable {
            key: c"stub_palette".as_ptr(),
            value: c"Palette; warm|cool".as_ptr(),
        },
        RetroVariable {
            key: std::ptr::null(),
            value: std::ptr::null(),
        },
    ];
    env(ENVIRONMENT_SET_VARIABLES, vars.as_ptr() as *mut c_void);

    let mut log = RetroLogCallback { log: None };
    if env(ENVIRONMENT_GET_LOG_INTERFACE, (&raw mut log).cast())
        && let Some(log) = log.log
    {
        unsafe { log(LOG_INFO, c"stub environment ready\n".as_ptr()) };
    }
}

extern "C" fn stub_set_video_refresh(cb: VideoRefreshFn) {
    callbacks().video = Some(cb);
}

extern "C" fn stub_set_audio_sample(_cb: AudioSampleFn) {}

extern "C" fn stub_set_audio_sample_batch(cb: AudioSampleBatchFn) {
    callbacks().audio_batch = Some(cb);
}

extern "C" fn stub_set_input_poll(cb: InputPollFn) {
    callbacks().input_poll = Some(cb);
}

extern "C" fn stub_set_input_state(cb: InputStateFn) {
    callbacks().input_state = Some(cb);
}

extern "C" fn stub_set_controller_port_device(_port: c_uint, _device: c_uint) {}

extern "C" fn stub_reset() {
    RESETS.fetch_add(1, Ordering::SeqCst);
}

extern "C" fn stub_run() {
    RUNS.fetch_add(1, Ordering::SeqCst);
    let (video, audio_batch, input_poll, input_state) = {
        let cb = callbacks();
        (cb.video, cb.audio_batch, cb.input_poll, cb.input_state)
    };

    unsafe {
        if let Some(poll) = input_poll {
            poll();
        }
        if let Some(state) = input_state {
            START_HELD.store(state(0, DEVICE_JOYPAD, 0, 3) != 0, Ordering::SeqCst);
        }
    }

    let mut var = RetroVariable {
        key: c"stub_palette".as_ptr(),
        value: std::ptr::null(),
    };
    if env(ENVIRONMENT_GET_VARIABLE, (&raw mut var).cast()) && !var.value.is_null() {
        let value = unsafe { CStr::from_ptr(var.value) }.to_string_lossy().into_owned();
        *PALETTE.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    let mut buf = Vec::with_capacity(STUB_PITCH * STUB_HEIGHT as usize);
    for _ in 0..STUB_HEIGHT {
        for _ in 0..STUB_WIDTH {
            buf.extend_from_slice(&STUB_COLOR.to_ne_bytes());
        }
        buf.extend_from_slice(&[0xAA; 4]);
    }
    let samples = vec![100i16; STUB_AUDIO_FRAMES * 2];

    unsafe {
        if let Some(video) = video {
            video(buf.as_ptr().cast(), STUB_WIDTH, STUB_HEIGHT, STUB_PITCH);
        }
        if let Some(batch) = audio_batch {
            batch(samples.as_ptr(), STUB_AUDIO_FRAMES);
        }
    }
}

extern "C" fn stub_serialize_size() -> usize {
    4
}

extern "C" fn stub_serialize(data: *mut c_void, size: usize) -> bool {
    if size != 4 {
        return false;
    }
    let runs = RUNS.load(Ordering::SeqCst).to_le_bytes();
    unsafe { std::ptr::copy_nonoverlapping(runs.as_ptr(), data.cast::<u8>(), 4) };
    true
}

extern "C" fn stub_unserialize(data: *const c_void, size: usize) -> bool {
    if size != 4 {
        return false;
    }
    let mut runs = [0u8; 4];
    unsafe { std::ptr::copy_nonoverlapping(data.cast::<u8>(), runs.as_mut_ptr(), 4) };
    RUNS.store(u32::from_le_bytes(runs), Ordering::SeqCst);
    true
}

extern "C" fn stub_cheat_reset() {}

extern "C" fn stub_cheat_set(_index: c_uint, _enabled: bool, _code: *const c_char) {}

extern "C" fn stub_load_game(_game: *const RetroGameInfo) -> bool {
    LOADS.fetch_add(1, Ordering::SeqCst);
    UNLOADS_AT_LAST_LOAD.store(UNLOADS.load(Ordering::SeqCst), Ordering::SeqCst);
    if REJECT_CONTENT.load(Ordering::SeqCst) {
        return false;
    }
    let mut format: c_uint = PIXEL_FORMAT_RGB565;
    env(ENVIRONMENT_SET_PIXEL_FORMAT, (&raw mut format).cast());
    let mut av = stub_av();
    env(ENVIRONMENT_SET_SYSTEM_AV_INFO, (&raw mut av).cast());
    true
}

extern "C" fn stub_unload_game() {
    UNLOADS.fetch_add(1, Ordering::SeqCst);
}

extern "C" fn stub_get_region() -> c_uint {
    0
}

extern "C" fn stub_get_memory_data(_id: c_uint) -> *mut c_void {
    std::ptr::null_mut()
}

extern "C" fn stub_get_memory_size(_id: c_uint) -> usize {
    0
}

/// Entry points of an in-binary core that declares RGB565 at 32000 Hz on
/// content load and emits one frame plus one audio batch per tick
pub fn stub_api() -> CoreApi {
    CoreApi {
        init: stub_init,
        deinit: stub_deinit,
        api_version: stub_api_version,
        get_system_info: stub_get_system_info,
        get_system_av_info: stub_get_system_av_info,
        set_environment: stub_set_environment,
        set_video_refresh: stub_set_video_refresh,
        set_audio_sample: stub_set_audio_sample,
        set_audio_sample_batch: stub_set_audio_sample_batch,
        set_input_poll: stub_set_input_poll,
        set_input_state: stub_set_input_state,
        set_controller_port_device: stub_set_controller_port_device,
        reset: stub_reset,
        run: stub_run,
        serialize_size: stub_serialize_size,
        serialize: stub_serialize,
        unserialize: stub_unserialize,
        cheat_reset: stub_cheat_reset,
        cheat_set: stub_cheat_set,
        load_game: stub_load_game,
        unload_game: stub_unload_game,
        get_region: stub_get_region,
        get_memory_data: stub_get_memory_data,
        get_memory_size: stub_get_memory_size,
    }
}

/// Stub entries reporting an API revision the host does not speak
pub fn stub_api_wrong_version() -> CoreApi {
    CoreApi {
        api_version: stub_bad_api_version,
        ..stub_api()
    }
}

pub fn stub_core() -> CoreLibrary {
    CoreLibrary::from_api(stub_api()).unwrap()
}
