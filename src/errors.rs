//! Errors for the AIS gateway
use std::path::PathBuf;

use thiserror::Error;

/// Identifier outside the nine-digit MMSI range.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid MMSI: {0}")]
pub struct InvalidMmsi(pub String);

/// Failure to turn one radio sentence into a message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("Checksum mismatch: expected {expected:02X}, computed {computed:02X}")]
    Checksum { expected: u8, computed: u8 },

    #[error("Incomplete fragment group {group}")]
    IncompleteFragment { group: String },

    #[error("Malformed sentence: {0}")]
    Framing(String),

    #[error("Unsupported talker: {0}")]
    UnsupportedTalker(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
}

/// Failure to turn one aggregator or stream record into a message.
#[derive(Error, Debug)]
pub enum MapError {
    #[error("Record has no vessel identifier")]
    MissingIdentifier,

    #[error(transparent)]
    InvalidMmsi(#[from] InvalidMmsi),

    #[error("Malformed JSON record")]
    Json(#[from] serde_json::Error),

    #[error("Unexpected response shape: {0}")]
    UnexpectedShape(String),

    #[error("Upstream reported an error: {0}")]
    Upstream(String),
}

/// Transient network failure inside a feed adapter.
#[derive(Error, Debug)]
pub enum FeedConnectionError {
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Socket error")]
    Io(#[from] std::io::Error),

    #[error("Stream closed by peer")]
    Closed,
}

/// Malformed known-craft hint table. Fatal at startup.
#[derive(Error, Debug)]
pub enum RuleTableError {
    #[error("Could not read known craft table {path}: {origin}")]
    Read { path: PathBuf, origin: String },

    #[error("Known craft table is missing column {0}")]
    MissingColumn(&'static str),

    #[error("Known craft table row {row}: {message}")]
    InvalidRow { row: usize, message: String },
}

/// Identity cache read or write failure. Never fatal.
#[derive(Error, Debug)]
pub enum CacheIoError {
    #[error("Cache file {path} could not be accessed")]
    Io {
        path: PathBuf,
        #[source]
        origin: std::io::Error,
    },

    #[error("Cache file {path} is not valid JSON")]
    Format {
        path: PathBuf,
        #[source]
        origin: serde_json::Error,
    },
}

/// Outbound delivery failure reported by a transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport I/O error")]
    Io(#[from] std::io::Error),

    #[error("Transport channel closed")]
    Closed,
}

/// Startup and top-level failures.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Known craft table error")]
    RuleTable(#[from] RuleTableError),

    #[error("Transport error")]
    Transport(#[from] TransportError),

    #[error("Feed setup failed")]
    Feed(#[from] FeedConnectionError),

    #[error("IO error")]
    IoError(#[from] std::io::Error),
}
