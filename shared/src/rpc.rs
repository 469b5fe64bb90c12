//! Runner call, reply and event payloads
//!
//! The runner exposes a closed set of methods. Each [`RunnerCall`] variant
//! maps to one method name on the wire and carries its own bitcode-encoded
//! argument struct; every successful call answers with one [`RunnerReply`].

use bitcode::{Decode, Encode};
use thiserror::Error;

use crate::media::{AudioData, FrameData};
use crate::wire::Frame;

// ============================================================================
// Method names
// ============================================================================

pub const METHOD_ECHO: &str = "Echo";
pub const METHOD_LOAD_CORE: &str = "LoadCore";
pub const METHOD_LOAD_GAME: &str = "LoadGame";
pub const METHOD_RUN: &str = "Run";
pub const METHOD_STOP: &str = "Stop";
pub const METHOD_SET_INPUT: &str = "SetInput";
pub const METHOD_SET_VARIABLE: &str = "SetVariable";
pub const METHOD_GET_SAMPLE_RATE: &str = "GetSampleRate";
pub const METHOD_RESET: &str = "Reset";
pub const METHOD_SAVE_STATE: &str = "SaveState";
pub const METHOD_LOAD_STATE: &str = "LoadState";

// ============================================================================
// Calls
// ============================================================================

/// Load a plugin library into the runner
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct LoadCoreArgs {
    pub path: String,
    pub system_dir: String,
    pub save_dir: String,
    /// Stored option overrides, applied before any game is loaded
    pub overrides: Vec<(String, String)>,
}

/// Load content; `data` is passed in memory alongside the path when present
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct LoadGameArgs {
    pub path: String,
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct SetInputArgs {
    /// Joypad button name, full or short form
    pub key: String,
    pub down: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct SetVariableArgs {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
struct BytesArgs {
    bytes: Vec<u8>,
}

/// A request to the runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerCall {
    /// Returns its payload unchanged
    Echo(Vec<u8>),
    LoadCore(LoadCoreArgs),
    LoadGame(LoadGameArgs),
    Run,
    Stop,
    SetInput(SetInputArgs),
    SetVariable(SetVariableArgs),
    GetSampleRate,
    Reset,
    SaveState,
    LoadState(Vec<u8>),
}

impl RunnerCall {
    /// Method name used on the wire
    pub fn method(&self) -> &'static str {
        match self {
            Self::Echo(_) => METHOD_ECHO,
            Self::LoadCore(_) => METHOD_LOAD_CORE,
            Self::LoadGame(_) => METHOD_LOAD_GAME,
            Self::Run => METHOD_RUN,
            Self::Stop => METHOD_STOP,
            Self::SetInput(_) => METHOD_SET_INPUT,
            Self::SetVariable(_) => METHOD_SET_VARIABLE,
            Self::GetSampleRate => METHOD_GET_SAMPLE_RATE,
            Self::Reset => METHOD_RESET,
            Self::SaveState => METHOD_SAVE_STATE,
            Self::LoadState(_) => METHOD_LOAD_STATE,
        }
    }

    /// Encode the argument bytes; argument-less methods send nothing
    pub fn encode_args(&self) -> Vec<u8> {
        match self {
            Self::Echo(bytes) | Self::LoadState(bytes) => bitcode::encode(&BytesArgs {
                bytes: bytes.clone(),
            }),
            Self::LoadCore(args) => bitcode::encode(args),
            Self::LoadGame(args) => bitcode::encode(args),
            Self::SetInput(args) => bitcode::encode(args),
            Self::SetVariable(args) => bitcode::encode(args),
            Self::Run | Self::Stop | Self::GetSampleRate | Self::Reset | Self::SaveState => {
                Vec::new()
            }
        }
    }

    /// Build the Call frame for this request
    pub fn to_frame(&self, id: i32) -> Frame {
        Frame::Call {
            id,
            method: self.method().to_owned(),
            args: self.encode_args(),
        }
    }

    /// Route a method name and its argument bytes back to a call
    pub fn decode(method: &str, args: &[u8]) -> Result<Self, ProtocolError> {
        Ok(match method {
            METHOD_ECHO => Self::Echo(decode::<BytesArgs>(METHOD_ECHO, args)?.bytes),
            METHOD_LOAD_CORE => Self::LoadCore(decode(METHOD_LOAD_CORE, args)?),
            METHOD_LOAD_GAME => Self::LoadGame(decode(METHOD_LOAD_GAME, args)?),
            METHOD_RUN => Self::Run,
            METHOD_STOP => Self::Stop,
            METHOD_SET_INPUT => Self::SetInput(decode(METHOD_SET_INPUT, args)?),
            METHOD_SET_VARIABLE => Self::SetVariable(decode(METHOD_SET_VARIABLE, args)?),
            METHOD_GET_SAMPLE_RATE => Self::GetSampleRate,
            METHOD_RESET => Self::Reset,
            METHOD_SAVE_STATE => Self::SaveState,
            METHOD_LOAD_STATE => {
                Self::LoadState(decode::<BytesArgs>(METHOD_LOAD_STATE, args)?.bytes)
            }
            other => return Err(ProtocolError::UnknownMethod(other.to_owned())),
        })
    }
}

fn decode<T: for<'a> Decode<'a>>(what: &'static str, bytes: &[u8]) -> Result<T, ProtocolError> {
    bitcode::decode(bytes).map_err(|e| ProtocolError::Decode {
        what,
        message: e.to_string(),
    })
}

// ============================================================================
// Replies
// ============================================================================

/// Static description of a loaded plugin
#[derive(Debug, Clone, PartialEq, Eq, Default, Encode, Decode)]
pub struct SystemInfo {
    pub library_name: String,
    pub library_version: String,
    pub valid_extensions: Vec<String>,
    pub need_fullpath: bool,
}

/// One option declared by the plugin, with its current value
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct VariableInfo {
    pub key: String,
    pub description: String,
    pub options: Vec<String>,
    pub default_value: String,
    pub value: String,
}

/// Geometry and timing reported after content load
#[derive(Debug, Clone, Copy, PartialEq, Default, Encode, Decode)]
pub struct AvInfo {
    pub width: u32,
    pub height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub aspect_ratio: f32,
    pub fps: f64,
    pub sample_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct CoreLoaded {
    pub system: SystemInfo,
    pub variables: Vec<VariableInfo>,
}

#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub struct GameLoaded {
    /// The plugin's own success flag
    pub loaded: bool,
    pub av: AvInfo,
}

/// Successful result of a runner call
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum RunnerReply {
    Done,
    Echo(Vec<u8>),
    CoreLoaded(CoreLoaded),
    GameLoaded(GameLoaded),
    SampleRate(f64),
    State(Vec<u8>),
}

impl RunnerReply {
    pub fn encode(&self) -> Vec<u8> {
        bitcode::encode(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode("reply", bytes)
    }

    /// Short variant name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Self::Done => "Done",
            Self::Echo(_) => "Echo",
            Self::CoreLoaded(_) => "CoreLoaded",
            Self::GameLoaded(_) => "GameLoaded",
            Self::SampleRate(_) => "SampleRate",
            Self::State(_) => "State",
        }
    }
}

// ============================================================================
// Events
// ============================================================================

pub const EVENT_FRAME: &str = "OnFrame";
pub const EVENT_AUDIO: &str = "OnAudio";

/// A payload that travels as a named Event frame
pub trait EventPayload: Encode + for<'a> Decode<'a> + Sized {
    const NAME: &'static str;

    fn to_frame(&self) -> Frame {
        Frame::Event {
            name: Self::NAME.to_owned(),
            data: bitcode::encode(self),
        }
    }

    fn decode_event(data: &[u8]) -> Result<Self, ProtocolError> {
        decode(Self::NAME, data)
    }
}

impl EventPayload for FrameData {
    const NAME: &'static str = EVENT_FRAME;
}

impl EventPayload for AudioData {
    const NAME: &'static str = EVENT_AUDIO;
}

/// Any event the runner emits
#[derive(Debug, Clone, PartialEq)]
pub enum RunnerEvent {
    Frame(FrameData),
    Audio(AudioData),
}

impl RunnerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Frame(_) => EVENT_FRAME,
            Self::Audio(_) => EVENT_AUDIO,
        }
    }

    pub fn to_frame(&self) -> Frame {
        match self {
            Self::Frame(frame) => frame.to_frame(),
            Self::Audio(audio) => audio.to_frame(),
        }
    }

    /// Decode a named event; unknown names are not an error
    pub fn decode(name: &str, data: &[u8]) -> Result<Option<Self>, ProtocolError> {
        Ok(match name {
            EVENT_FRAME => Some(Self::Frame(FrameData::decode_event(data)?)),
            EVENT_AUDIO => Some(Self::Audio(AudioData::decode_event(data)?)),
            _ => None,
        })
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unknown runner method `{0}`")]
    UnknownMethod(String),
    #[error("failed to decode {what}: {message}")]
    Decode { what: &'static str, message: String },
    #[error("unexpected `{reply}` reply to {method}")]
    UnexpectedReply {
        method: &'static str,
        reply: &'static str,
    },
}
