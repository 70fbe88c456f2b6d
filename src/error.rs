//! Error types for gearman-client.

use thiserror::Error;

/// Main error type for all Gearman operations.
#[derive(Debug, Error)]
pub enum GearmanError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// Server address is not `host`, `host:port` or `[v6]:port`.
    #[error("Invalid job server address: {0:?}")]
    InvalidAddress(String),

    /// Packet header carries neither `\0REQ` nor `\0RES`.
    #[error("Bad packet magic: {0:02x?}")]
    BadMagic([u8; 4]),

    /// Packet type code has no known mapping.
    #[error("Unknown packet type: {0}")]
    UnknownType(u32),

    /// Fewer bytes than the header (or the declared payload) require.
    #[error("Truncated packet: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    /// Payload length exceeds the configured maximum.
    #[error("Payload size {size} exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: u32 },

    /// Payload does not split into the components its type requires.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// A task was built around a packet that is not a request.
    #[error("Task requires a request packet, got {0}")]
    NotARequest(String),

    /// Session used before `init`.
    #[error("Session {0} has not been initialized")]
    SessionNotInitialized(String),

    /// Session initialized twice.
    #[error("Session {0} can not be initialized twice")]
    SessionAlreadyInitialized(String),

    /// Session used after `close`.
    #[error("Session {0} is closed")]
    SessionClosed(String),

    /// Peer closed the stream.
    #[error("Connection to job server {0} severed")]
    ConnectionClosed(String),

    /// A bounded wait exceeded its deadline. The request stays live on the wire.
    #[error("Timed out waiting for {0}")]
    Timeout(String),

    /// No job servers are registered.
    #[error("No job servers registered")]
    NoServers,

    /// Job server was never registered.
    #[error("Job server {0} has not been registered")]
    UnknownServer(String),

    /// Client or worker no longer accepts work.
    #[error("Shut down")]
    Shutdown,

    /// Operation not valid in the current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A task reached its exception state.
    #[error("Task failed: {0}")]
    TaskFailed(String),

    /// The job server answered with an ERROR packet.
    #[error("Job server error {code}: {text}")]
    Remote { code: String, text: String },

    /// No tracked job carries this handle.
    #[error("Unknown job handle: {0}")]
    UnknownJob(String),
}

/// Result type alias using GearmanError.
pub type Result<T> = std::result::Result<T, GearmanError>;
