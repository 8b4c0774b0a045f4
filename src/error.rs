//! Crate-wide error taxonomy.
//!
//! Mirrors the numeric ranges used by the error model this engine was ported
//! from (0-99 general, 100-199 I/O, 200-299 decode, 300-399 render, 400-499
//! audio, 600-699 sync, 700-799 system). The 500-599 network range is reserved
//! but unused: this core has no network-facing component of its own.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidParam,
    WrongState,
    NotInitialized,

    IoError,
    StreamNotFound,
    DemuxError,

    DecoderNotFound,
    UnsupportedCodec,
    DecoderInitFailed,
    DecodeFailed,

    RenderContextFailed,
    InvalidRenderTarget,
    RenderContextLost,
    TextureCreateFailed,

    AudioDeviceNotFound,
    AudioDeviceInitFailed,
    AudioFormatUnsupported,
    ResampleFailed,

    SyncInconsistency,

    OutOfMemory,
    ThreadSpawnFailed,
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The engine's single error type. Per-session errors (open/seek/play) carry
/// one of these across the Player API boundary; per-frame errors (a single
/// decode or render failure) are logged and do not propagate this far.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn wrong_state(op: &str, state: impl fmt::Debug) -> Self {
        Self::new(ErrorKind::WrongState, format!("{op} not valid in state {state:?}"))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
