//! Environment command dispatch
//!
//! Commands outside the table below are refused with `false` and reported
//! once per distinct id.

use std::ffi::{CStr, c_char, c_uint, c_void};

use super::callbacks;
use super::context::HostContext;
use super::variables::VariableDescriptor;
use crate::abi::{self, RetroLogCallback, RetroSystemAvInfo, RetroVariable};
use crate::codec::PixelFormat;

const HANDLED: [c_uint; 7] = [
    abi::ENVIRONMENT_GET_SYSTEM_DIRECTORY,
    abi::ENVIRONMENT_GET_SAVE_DIRECTORY,
    abi::ENVIRONMENT_SET_PIXEL_FORMAT,
    abi::ENVIRONMENT_SET_SYSTEM_AV_INFO,
    abi::ENVIRONMENT_GET_LOG_INTERFACE,
    abi::ENVIRONMENT_GET_VARIABLE,
    abi::ENVIRONMENT_SET_VARIABLES,
];

/// Answer one environment request.
///
/// # Safety
/// `data` must point to the payload type documented for `cmd`, or be null.
pub(crate) unsafe fn dispatch(ctx: &HostContext, cmd: c_uint, data: *mut c_void) -> bool {
    let command = cmd & !abi::ENVIRONMENT_EXPERIMENTAL;
    if !HANDLED.contains(&command) {
        if ctx.note_unhandled(command) {
            tracing::info!(command, "Unhandled environment command");
        }
        return false;
    }
    if data.is_null() {
        tracing::debug!(command, "Environment command with null payload");
        return false;
    }

    // SAFETY (all arms): forwarded from the caller's contract on `data`.
    unsafe {
        match command {
            abi::ENVIRONMENT_GET_SYSTEM_DIRECTORY => {
                *data.cast::<*const c_char>() = ctx.config.system_dir.as_ptr();
                true
            }
            abi::ENVIRONMENT_GET_SAVE_DIRECTORY => {
                *data.cast::<*const c_char>() = ctx.config.save_dir.as_ptr();
                true
            }
            abi::ENVIRONMENT_SET_PIXEL_FORMAT => set_pixel_format(ctx, *data.cast::<c_uint>()),
            abi::ENVIRONMENT_SET_SYSTEM_AV_INFO => {
                ctx.set_av_info(&*data.cast::<RetroSystemAvInfo>());
                true
            }
            abi::ENVIRONMENT_GET_LOG_INTERFACE => {
                (*data.cast::<RetroLogCallback>()).log = Some(callbacks::log_printf);
                true
            }
            abi::ENVIRONMENT_GET_VARIABLE => get_variable(ctx, &mut *data.cast::<RetroVariable>()),
            abi::ENVIRONMENT_SET_VARIABLES => {
                set_variables(ctx, data.cast::<RetroVariable>());
                true
            }
            _ => false,
        }
    }
}

fn set_pixel_format(ctx: &HostContext, raw: c_uint) -> bool {
    match PixelFormat::from_abi(raw) {
        Some(format) => {
            tracing::debug!(?format, "Core set pixel format");
            ctx.set_pixel_format(format);
            true
        }
        None => {
            tracing::warn!(raw, "Core requested unsupported pixel format");
            false
        }
    }
}

/// # Safety
/// `var.key` must be null or a NUL-terminated string.
unsafe fn get_variable(ctx: &HostContext, var: &mut RetroVariable) -> bool {
    var.value = std::ptr::null();
    if var.key.is_null() {
        return false;
    }
    // SAFETY: checked non-null; NUL-terminated per the caller's contract.
    let key = unsafe { CStr::from_ptr(var.key) }.to_string_lossy();
    match ctx.variables().lookup_c(&key) {
        Some(value) => {
            var.value = value;
            true
        }
        None => false,
    }
}

/// # Safety
/// `vars` must point to an array terminated by an entry with a null key.
unsafe fn set_variables(ctx: &HostContext, mut vars: *const RetroVariable) {
    let mut table = ctx.variables();
    loop {
        // SAFETY: the array is terminated, so every read up to the
        // terminator is in bounds.
        let var = unsafe { &*vars };
        if var.key.is_null() {
            break;
        }
        // SAFETY: non-null entries hold NUL-terminated strings.
        let key = unsafe { CStr::from_ptr(var.key) }.to_string_lossy();
        let raw = if var.value.is_null() {
            Default::default()
        } else {
            // SAFETY: as above.
            unsafe { CStr::from_ptr(var.value) }.to_string_lossy()
        };
        table.declare(&key, VariableDescriptor::parse(&raw));
        // SAFETY: not past the terminator yet.
        vars = unsafe { vars.add(1) };
    }
    tracing::debug!(count = table.list().len(), "Core declared variables");
}
