//! Callback trampolines handed to the plugin
//!
//! The legacy ABI passes no user data to callbacks, so the context they
//! serve lives in a process-wide slot. Only one plugin can be active per
//! process; the runner process model guarantees that in practice.
//!
//! No panic may unwind into plugin code: every trampoline runs its body
//! under `catch_unwind` and answers with the ABI's neutral value instead.

use std::ffi::{CStr, c_char, c_int, c_uint, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, PoisonError, RwLock};

use super::HostError;
use super::context::HostContext;
use super::environment;
use crate::abi;
use crate::codec::{convert_frame, sample_batch, sample_pair};

static ACTIVE: RwLock<Option<Arc<HostContext>>> = RwLock::new(None);

/// Claim the slot for `context`
pub(crate) fn activate(context: Arc<HostContext>) -> Result<(), HostError> {
    let mut slot = ACTIVE.write().unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        return Err(HostError::AlreadyActive);
    }
    *slot = Some(context);
    Ok(())
}

/// Release the slot if `context` holds it
pub(crate) fn deactivate(context: &Arc<HostContext>) {
    let mut slot = ACTIVE.write().unwrap_or_else(PoisonError::into_inner);
    if slot.as_ref().is_some_and(|c| Arc::ptr_eq(c, context)) {
        *slot = None;
    }
}

pub(crate) fn is_active() -> bool {
    ACTIVE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .is_some()
}

fn active() -> Option<Arc<HostContext>> {
    ACTIVE.read().unwrap_or_else(PoisonError::into_inner).clone()
}

fn shielded<R>(name: &'static str, fallback: R, f: impl FnOnce() -> R) -> R {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(r) => r,
        Err(_) => {
            tracing::error!(callback = name, "Host callback panicked");
            fallback
        }
    }
}

fn with_context<R>(name: &'static str, fallback: R, f: impl FnOnce(&HostContext) -> R) -> R {
    let Some(context) = active() else {
        tracing::warn!(callback = name, "Callback invoked with no active core");
        return fallback;
    };
    shielded(name, fallback, || f(&context))
}

pub(crate) extern "C" fn environment(cmd: c_uint, data: *mut c_void) -> bool {
    with_context("environment", false, |ctx| {
        // SAFETY: the plugin passes the payload type that `cmd` documents.
        unsafe { environment::dispatch(ctx, cmd, data) }
    })
}

pub(crate) extern "C" fn video_refresh(
    data: *const c_void,
    width: c_uint,
    height: c_uint,
    pitch: usize,
) {
    with_context("video_refresh", (), |ctx| {
        // A null buffer asks to repeat the previous frame
        if data.is_null() {
            return;
        }
        let format = ctx.pixel_format();
        // A short pitch would make the slice below overrun the plugin's buffer
        if let Err(e) = format.check_pitch(width, height, pitch) {
            tracing::warn!(error = %e, "Dropped video frame");
            return;
        }
        let len = format.required_len(width, height, pitch);
        // SAFETY: the plugin guarantees `height` rows of `pitch` bytes at `data`.
        let src = unsafe { std::slice::from_raw_parts(data.cast::<u8>(), len) };
        match convert_frame(src, width, height, pitch, format) {
            Ok(frame) => ctx.sink().frame(frame),
            Err(e) => tracing::warn!(error = %e, "Dropped video frame"),
        }
    })
}

pub(crate) extern "C" fn audio_sample(left: i16, right: i16) {
    with_context("audio_sample", (), |ctx| {
        ctx.sink().audio(sample_pair(left, right, ctx.sample_rate()));
    })
}

pub(crate) extern "C" fn audio_sample_batch(data: *const i16, frames: usize) -> usize {
    with_context("audio_sample_batch", 0, |ctx| {
        if data.is_null() || frames == 0 {
            return 0;
        }
        // SAFETY: the plugin passes `frames` interleaved stereo frames.
        let samples = unsafe { std::slice::from_raw_parts(data, frames * 2) };
        ctx.sink().audio(sample_batch(samples, ctx.sample_rate()));
        frames
    })
}

pub(crate) extern "C" fn input_poll() {}

pub(crate) extern "C" fn input_state(
    port: c_uint,
    device: c_uint,
    index: c_uint,
    id: c_uint,
) -> i16 {
    with_context("input_state", 0, |ctx| {
        ctx.buttons().query(port, device, index, id)
    })
}

pub(crate) extern "C" fn log_printf(level: c_int, fmt: *const c_char) {
    shielded("log", (), || {
        if fmt.is_null() {
            return;
        }
        // SAFETY: the plugin passes a NUL-terminated format string.
        let text = unsafe { CStr::from_ptr(fmt) }.to_string_lossy();
        let text = text.trim_end_matches(['\r', '\n']);
        match level {
            abi::LOG_DEBUG => tracing::debug!(target: "retrohost::core_log", "{text}"),
            abi::LOG_WARN => tracing::warn!(target: "retrohost::core_log", "{text}"),
            abi::LOG_ERROR => tracing::error!(target: "retrohost::core_log", "{text}"),
            _ => tracing::info!(target: "retrohost::core_log", "{text}"),
        }
    })
}
