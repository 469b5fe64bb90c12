//! Button state table
//!
//! Written by inbound input calls, read by the plugin's input-state callback
//! on the run loop thread. Each button is its own atomic, so a tick always
//! sees whole values and never waits on a writer.

use std::sync::atomic::{AtomicBool, Ordering};

use retrohost_shared::JoypadButton;
use retrohost_shared::input::BUTTON_COUNT;

use crate::abi;

#[derive(Debug, Default)]
pub struct ButtonStates {
    pressed: [AtomicBool; BUTTON_COUNT],
}

impl ButtonStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, button: JoypadButton, down: bool) {
        self.pressed[button.id() as usize].store(down, Ordering::Release);
    }

    pub fn is_pressed(&self, button: JoypadButton) -> bool {
        self.pressed[button.id() as usize].load(Ordering::Acquire)
    }

    /// Answer an input-state query. Only port 0, the joypad device and
    /// index 0 are modeled; everything else reads as released.
    pub fn query(&self, port: u32, device: u32, index: u32, id: u32) -> i16 {
        if port != 0 || device != abi::DEVICE_JOYPAD || index != 0 {
            return 0;
        }
        match JoypadButton::from_id(id) {
            Some(button) => self.is_pressed(button) as i16,
            None => 0,
        }
    }

    pub fn release_all(&self) {
        for b in &self.pressed {
            b.store(false, Ordering::Release);
        }
    }
}
