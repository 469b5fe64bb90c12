//! Runner transport framing
//!
//! Both directions of the runner transport carry a stream of tagged frames.
//! Integers are little-endian, strings are length-prefixed UTF-8.
//!
//! # Wire Format
//!
//! ```text
//! Call     = [0][id:i32][method:str][len:i32][args...]
//! Response = [1][id:i32][status:str][len:i32][result...]
//! Event    = [2][name:str][len:i32][data...]
//! Log      = [3][level:str][message:str]
//! str      = [len:u32][utf8...]
//! ```
//!
//! Parsing is incremental: [`Frame::parse`] returns `Ok(None)` until a whole
//! frame is buffered, so the same code serves the blocking reader in the
//! runner and the async reader in the parent.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Largest accepted string or byte field (64 MiB)
pub const MAX_FIELD_LEN: usize = 64 * 1024 * 1024;

/// Frame kind tags
pub const KIND_CALL: u8 = 0;
pub const KIND_RESPONSE: u8 = 1;
pub const KIND_EVENT: u8 = 2;
pub const KIND_LOG: u8 = 3;

const READ_CHUNK: usize = 64 * 1024;

/// Outcome of a call, carried as a string on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    Success,
    Error,
}

impl ResponseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// One message on the runner transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Parent -> runner request
    Call { id: i32, method: String, args: Vec<u8> },
    /// Runner -> parent reply to exactly one call
    Response {
        id: i32,
        status: ResponseStatus,
        result: Vec<u8>,
    },
    /// Runner -> parent unsolicited notification
    Event { name: String, data: Vec<u8> },
    /// Runner -> parent log line
    Log { level: String, message: String },
}

impl Frame {
    /// Successful response carrying `result`
    pub fn success(id: i32, result: Vec<u8>) -> Self {
        Self::Response {
            id,
            status: ResponseStatus::Success,
            result,
        }
    }

    /// Error response; the result bytes are the UTF-8 error message
    pub fn error(id: i32, message: impl Into<String>) -> Self {
        Self::Response {
            id,
            status: ResponseStatus::Error,
            result: message.into().into_bytes(),
        }
    }

    pub fn kind(&self) -> u8 {
        match self {
            Self::Call { .. } => KIND_CALL,
            Self::Response { .. } => KIND_RESPONSE,
            Self::Event { .. } => KIND_EVENT,
            Self::Log { .. } => KIND_LOG,
        }
    }

    /// Serialize to a contiguous buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(self.kind());
        match self {
            Self::Call { id, method, args } => {
                out.extend_from_slice(&id.to_le_bytes());
                put_str(&mut out, method);
                put_bytes(&mut out, args);
            }
            Self::Response { id, status, result } => {
                out.extend_from_slice(&id.to_le_bytes());
                put_str(&mut out, status.as_str());
                put_bytes(&mut out, result);
            }
            Self::Event { name, data } => {
                put_str(&mut out, name);
                put_bytes(&mut out, data);
            }
            Self::Log { level, message } => {
                put_str(&mut out, level);
                put_str(&mut out, message);
            }
        }
        out
    }

    /// Write the whole frame and flush, so readers never see a partial frame
    /// held back in a buffer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.encode())?;
        writer.flush()
    }

    fn encoded_len(&self) -> usize {
        1 + match self {
            Self::Call { method, args, .. } => 4 + 4 + method.len() + 4 + args.len(),
            Self::Response { status, result, .. } => {
                4 + 4 + status.as_str().len() + 4 + result.len()
            }
            Self::Event { name, data } => 4 + name.len() + 4 + data.len(),
            Self::Log { level, message } => 4 + level.len() + 4 + message.len(),
        }
    }

    /// Try to parse one frame from the front of `buf`.
    ///
    /// Returns the frame and the number of bytes it occupied, or `Ok(None)`
    /// when `buf` does not yet hold a complete frame.
    pub fn parse(buf: &[u8]) -> Result<Option<(Frame, usize)>, WireError> {
        let mut cursor = Cursor { buf, pos: 0 };
        match cursor.frame() {
            Ok(frame) => Ok(Some((frame, cursor.pos))),
            Err(Partial::Incomplete) => Ok(None),
            Err(Partial::Invalid(e)) => Err(e),
        }
    }
}

fn put_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
    out.extend_from_slice(bytes);
}

/// Errors raised while reading frames
#[derive(Debug, Error)]
pub enum WireError {
    #[error("transport I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("unknown frame kind {0:#04x}")]
    UnknownKind(u8),
    #[error("negative length {len} in {field} field")]
    NegativeLength { field: &'static str, len: i32 },
    #[error("{field} field is {len} bytes, limit is {MAX_FIELD_LEN}")]
    FieldTooLarge { field: &'static str, len: usize },
    #[error("{0} field is not valid UTF-8")]
    InvalidUtf8(&'static str),
    #[error("unknown response status `{0}`")]
    UnknownStatus(String),
    #[error("transport closed in the middle of a frame")]
    UnexpectedEof,
}

enum Partial {
    Incomplete,
    Invalid(WireError),
}

impl From<WireError> for Partial {
    fn from(e: WireError) -> Self {
        Self::Invalid(e)
    }
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], Partial> {
        let end = self.pos.checked_add(n).ok_or(Partial::Incomplete)?;
        let slice = self.buf.get(self.pos..end).ok_or(Partial::Incomplete)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, Partial> {
        Ok(self.take(1)?[0])
    }

    fn i32(&mut self) -> Result<i32, Partial> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u32(&mut self) -> Result<u32, Partial> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn string(&mut self, field: &'static str) -> Result<String, Partial> {
        let len = self.u32()? as usize;
        if len > MAX_FIELD_LEN {
            return Err(WireError::FieldTooLarge { field, len }.into());
        }
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8(field))?;
        Ok(s.to_owned())
    }

    fn bytes(&mut self, field: &'static str) -> Result<Vec<u8>, Partial> {
        let len = self.i32()?;
        if len < 0 {
            return Err(WireError::NegativeLength { field, len }.into());
        }
        let len = len as usize;
        if len > MAX_FIELD_LEN {
            return Err(WireError::FieldTooLarge { field, len }.into());
        }
        Ok(self.take(len)?.to_vec())
    }

    fn frame(&mut self) -> Result<Frame, Partial> {
        match self.u8()? {
            KIND_CALL => {
                let id = self.i32()?;
                let method = self.string("method")?;
                let args = self.bytes("args")?;
                Ok(Frame::Call { id, method, args })
            }
            KIND_RESPONSE => {
                let id = self.i32()?;
                let status = self.string("status")?;
                let status = ResponseStatus::parse(&status)
                    .ok_or_else(|| WireError::UnknownStatus(status.clone()))?;
                let result = self.bytes("result")?;
                Ok(Frame::Response { id, status, result })
            }
            KIND_EVENT => {
                let name = self.string("event name")?;
                let data = self.bytes("event data")?;
                Ok(Frame::Event { name, data })
            }
            KIND_LOG => {
                let level = self.string("log level")?;
                let message = self.string("log message")?;
                Ok(Frame::Log { level, message })
            }
            other => Err(WireError::UnknownKind(other).into()),
        }
    }
}

/// Accumulates transport bytes and yields complete frames
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Result<Option<Frame>, WireError> {
        match Frame::parse(&self.buf)? {
            Some((frame, used)) => {
                self.buf.drain(..used);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    /// True when no partial frame is pending
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Blocking frame reader used on the runner side
pub struct FrameReader<R> {
    inner: R,
    buffer: FrameBuffer,
    chunk: Vec<u8>,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: FrameBuffer::new(),
            chunk: vec![0; READ_CHUNK],
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames.
    pub fn read_frame(&mut self) -> Result<Option<Frame>, WireError> {
        loop {
            if let Some(frame) = self.buffer.next_frame()? {
                return Ok(Some(frame));
            }
            let n = match self.inner.read(&mut self.chunk) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            if n == 0 {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(WireError::UnexpectedEof)
                };
            }
            self.buffer.extend(&self.chunk[..n]);
        }
    }
}
