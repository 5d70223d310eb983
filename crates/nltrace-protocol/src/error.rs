//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol data
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Fixed-width string field had no null terminator
    #[error("No null terminator within {field_size}-byte string field")]
    MissingTerminator { field_size: usize },

    /// String does not fit in its fixed-width field
    #[error("String of {len} bytes does not fit in {field_size}-byte field")]
    FieldTooSmall { len: usize, field_size: usize },

    /// String field held invalid UTF-8
    #[error("Invalid UTF-8 in string field: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// Packet payload ended before a field could be read
    #[error("Truncated payload: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    /// Packet exceeds the maximum frame size
    #[error("Packet too large: {size} bytes exceeds maximum of {max} bytes")]
    PacketTooLarge { size: usize, max: usize },

    /// Command code not known to this protocol version
    #[error("Unknown command code: {0}")]
    UnknownCommand(i32),

    /// Packet sequence number did not match the expected value
    #[error("Packet sequence mismatch: expected {expected}, received {received}")]
    SequenceMismatch { expected: i64, received: i64 },

    /// Stack frame count outside the 32-slot buffer
    #[error("Frame count {0} exceeds the 32-slot stack buffer")]
    InvalidFrameCount(u16),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
