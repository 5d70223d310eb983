//! Engine error types

use std::path::PathBuf;
use std::time::Duration;

use nltrace_protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced by the trace engine
#[derive(Error, Debug)]
pub enum EngineError {
    /// Protocol violation on the wire; fatal for the current connection
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Operation requires a live client connection
    #[error("No client is connected")]
    NotConnected,

    /// `dispatch_events` was called before a handler was registered
    #[error("No event handler has been registered")]
    NoEventHandler,

    /// A query response for an id the correlator never issued or already
    /// completed; fatal for the current connection
    #[error("Response for unknown request id {0}")]
    UnknownRequest(u64),

    /// A query's wait exceeded its deadline
    #[error("Request {id} timed out after {timeout:?}")]
    RequestTimeout { id: u64, timeout: Duration },

    /// The connection dropped while a query was outstanding
    #[error("Connection lost while awaiting request {0}")]
    ConnectionLost(u64),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Config file could not be read
    #[error("Failed to read config: {0}")]
    Read(std::io::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
