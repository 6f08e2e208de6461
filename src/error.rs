//! Error types for the commit log codec.
//!
//! Mirrors the split the wire-format codecs of this crate's ancestry use:
//! the low-level codec errors (`EncodeError`, `DecodeError`) are hand-rolled
//! `Display`/`Error` impls, while the higher-level errors that wrap them
//! (`CommitError`, `LogError`) are `thiserror`-derived.

use std::error::Error;
use std::fmt;

/// Errors that can occur while encoding a record into a [`crate::Buffer`].
#[derive(Debug)]
pub enum EncodeError {
    /// [`crate::Buffer::put_any`] was given a [`crate::ColumnValue`] variant
    /// that has no typed encoding (reserved for future extension).
    UnsupportedType(&'static str),
    /// A string or byte payload exceeded the 16-bit length prefix's range.
    ValueTooLarge(usize),
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnsupportedType(name) => write!(f, "unsupported column value type: {name}"),
            Self::ValueTooLarge(len) => {
                write!(f, "value of {len} bytes exceeds the 65535 byte limit")
            }
        }
    }
}

impl Error for EncodeError {}

/// Errors that can occur while decoding records out of a [`crate::Buffer`]
/// with a [`crate::Reader`].
#[derive(Debug)]
pub enum DecodeError {
    /// The record stream ended in the middle of a header or payload.
    UnexpectedEof,
    /// A string payload was not valid UTF-8.
    Utf8(std::str::Utf8Error),
    /// A varint-encoded delta used more than the 5 bytes a 32-bit value
    /// ever needs.
    VarintTooLong,
    /// `Reader::swap_string`/`swap_bytes` was given a replacement of a
    /// different length than the record it is replacing.
    LengthMismatch { expected: usize, found: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "record stream ended unexpectedly"),
            Self::Utf8(err) => write!(f, "string payload is not valid utf-8: {err}"),
            Self::VarintTooLong => write!(f, "delta varint exceeded 5 bytes"),
            Self::LengthMismatch { expected, found } => write!(
                f,
                "swap replacement is {found} bytes, record payload is {expected} bytes"
            ),
        }
    }
}

impl Error for DecodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Utf8(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::str::Utf8Error> for DecodeError {
    fn from(err: std::str::Utf8Error) -> Self {
        Self::Utf8(err)
    }
}

/// Errors from encoding/decoding a [`crate::Commit`].
#[derive(Debug, thiserror::Error)]
pub enum CommitError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A commit's buffer carried no run of records for `commit.chunk`.
    #[error("buffer {0:?} has no records for this commit's chunk")]
    ChunkMismatch(String),
}

/// Errors from appending to or iterating a [`crate::Log`].
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("commit error: {0}")]
    Commit(#[from] CommitError),
    #[error("bad log magic: {0:?}")]
    BadMagic([u8; 4]),
    #[error("unrecognized compression codec: {0}")]
    UnrecognizedCompression(String),
    #[error("range callback failed: {0}")]
    Callback(Box<dyn Error + Send + Sync>),
}
