//! Discord IPC framing and the handshake / SET_ACTIVITY / close exchanges.
//!
//! Every frame is `[opcode: u32 LE][length: u32 LE][length bytes of JSON]`.
//! The channel owns exactly one stream; once any call fails the channel must
//! be dropped and a fresh one discovered.

use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;

use crate::activity::{self, Activity};

/// Bound applied to connect and to every read/write on the socket
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Error code the service sends when the session it had with us is gone
/// (usually the user logged out of the client)
const SESSION_INVALID_CODE: i64 = 1000;

const HEADER_LEN: usize = 8;

/// Largest payload accepted from the peer; real replies are a few KiB
pub const MAX_FRAME_LEN: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum PresenceError {
    #[error("no Discord IPC socket found")]
    NotFound,

    #[error("IPC transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("unexpected IPC response: {0}")]
    Protocol(String),

    #[error("Discord invalidated the session: {0}")]
    SessionInvalid(Value),

    #[error("Discord rejected the handshake: {0}")]
    HandshakeRejected(Value),
}

impl PresenceError {
    /// Fatal errors stop the process; everything else is retried after rediscovery
    pub fn is_fatal(&self) -> bool {
        matches!(self, PresenceError::HandshakeRejected(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    Handshake = 0,
    Frame = 1,
    Close = 2,
    Ping = 3,
    Pong = 4,
}

impl Opcode {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Opcode::Handshake),
            1 => Some(Opcode::Frame),
            2 => Some(Opcode::Close),
            3 => Some(Opcode::Ping),
            4 => Some(Opcode::Pong),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub opcode: u32,
    pub payload: Value,
}

/// Encode header and payload into one buffer so it goes out in a single write
pub fn encode_frame(opcode: Opcode, payload: &Value) -> Result<Vec<u8>, PresenceError> {
    let body = serde_json::to_vec(payload)
        .map_err(|e| PresenceError::Protocol(format!("unserializable payload: {}", e)))?;
    let length = u32::try_from(body.len())
        .map_err(|_| PresenceError::Protocol(format!("payload too large: {} bytes", body.len())))?;

    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.extend_from_slice(&(opcode as u32).to_le_bytes());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Read exactly one frame: 8 header bytes, then exactly `length` payload bytes
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Frame, PresenceError> {
    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header)?;

    let opcode = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let length = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

    if length > MAX_FRAME_LEN {
        return Err(PresenceError::Protocol(format!(
            "frame of {} bytes exceeds the {} byte limit",
            length, MAX_FRAME_LEN
        )));
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body)?;

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    if payload.get("code").and_then(Value::as_i64) == Some(SESSION_INVALID_CODE) {
        return Err(PresenceError::SessionInvalid(payload));
    }

    Ok(Frame { opcode, payload })
}

/// Error code and message when the service refused a command
pub fn rejection(frame: &Frame) -> Option<(i64, String)> {
    let payload = &frame.payload;
    let source = if payload.get("evt").and_then(Value::as_str) == Some("ERROR") {
        payload.get("data").unwrap_or(payload)
    } else {
        payload
    };

    let code = source.get("code").and_then(Value::as_i64)?;
    let message = source
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((code, message))
}

/// `UnixStream::connect` blocks while the listener's backlog is full, so the
/// attempt runs on its own thread. A connection that completes after the
/// deadline is dropped with the thread.
fn connect_with_timeout(path: &Path, timeout: Duration) -> io::Result<UnixStream> {
    let (tx, rx) = mpsc::channel();
    let target = path.to_path_buf();
    thread::Builder::new()
        .name("ipc-connect".into())
        .spawn(move || {
            let _ = tx.send(UnixStream::connect(&target));
        })?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("connecting to {} timed out after {:?}", path.display(), timeout),
        )),
    }
}

/// An open connection to the Discord client
pub struct PresenceChannel<S> {
    stream: S,
    client_id: String,
}

impl PresenceChannel<UnixStream> {
    /// Connect to the socket at `path`, bounding every later read and write by `timeout`
    pub fn open(path: &Path, client_id: &str, timeout: Duration) -> Result<Self, PresenceError> {
        let stream = connect_with_timeout(path, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        log::debug!("Opened Discord IPC socket {}", path.display());
        Ok(Self::new(stream, client_id))
    }
}

impl<S: Read + Write> PresenceChannel<S> {
    pub fn new(stream: S, client_id: &str) -> Self {
        Self {
            stream,
            client_id: client_id.to_string(),
        }
    }

    fn write(&mut self, opcode: Opcode, payload: &Value) -> Result<(), PresenceError> {
        let buf = encode_frame(opcode, payload)?;
        self.stream.write_all(&buf)?;
        self.stream.flush()?;
        Ok(())
    }

    fn read(&mut self) -> Result<Frame, PresenceError> {
        read_frame(&mut self.stream)
    }

    pub fn handshake(&mut self) -> Result<Frame, PresenceError> {
        self.write(
            Opcode::Handshake,
            &json!({ "v": 1, "client_id": self.client_id }),
        )?;
        let frame = self.read()?;

        if frame.payload.get("cmd").and_then(Value::as_str) == Some("DISPATCH") {
            return Ok(frame);
        }
        if Opcode::from_raw(frame.opcode) == Some(Opcode::Close) {
            return Err(PresenceError::HandshakeRejected(frame.payload));
        }
        Err(PresenceError::Protocol(format!(
            "handshake answered with opcode {}: {}",
            frame.opcode, frame.payload
        )))
    }

    /// Set (or with `None`, clear) the presence. Returns the service's reply,
    /// which may be a rejection; see [`rejection`].
    pub fn send_activity(&mut self, activity: Option<&Activity>) -> Result<Frame, PresenceError> {
        let payload = json!({
            "cmd": "SET_ACTIVITY",
            "args": {
                "pid": std::process::id(),
                "activity": activity::to_payload(activity),
            },
            "nonce": uuid::Uuid::new_v4().to_string(),
        });
        self.write(Opcode::Frame, &payload)?;
        self.read()
    }

    /// Say goodbye and release the socket
    pub fn close(mut self) -> Result<Frame, PresenceError> {
        self.write(Opcode::Close, &json!({ "v": 1, "client_id": self.client_id }))?;
        self.read()
    }
}
