//! Shared types for the Retrohost core runner.
//!
//! Everything that crosses the process boundary between the parent service
//! and an isolated runner lives here: frame encoding, the closed set of
//! runner calls and replies, media payloads and joypad button names.

pub mod input;
pub mod media;
pub mod rpc;
pub mod wire;

pub use input::{JoypadButton, UnknownButton};
pub use media::{AudioData, FrameData};
pub use rpc::{
    AvInfo, CoreLoaded, EventPayload, GameLoaded, ProtocolError, RunnerCall, RunnerEvent,
    RunnerReply, SystemInfo, VariableInfo,
};
pub use wire::{Frame, FrameBuffer, FrameReader, ResponseStatus, WireError};
