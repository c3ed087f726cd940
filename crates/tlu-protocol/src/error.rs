//! Error types for catalog parsing and protocol operations

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while parsing descriptor or wire text
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Descriptor entry does not match `{ "NAME", 0xNN, kind },`
    #[error("malformed descriptor entry: {0:?}")]
    MalformedEntry(String),

    /// Block comment opened but never closed
    #[error("unterminated block comment in descriptor")]
    UnterminatedComment,

    /// Register address is not a number in u8 range
    #[error("invalid register address: {0:?}")]
    InvalidAddress(String),

    /// Value-kind tag is not one of rw/ro/cmd/mux
    #[error("unknown register kind: {0:?}")]
    UnknownKind(String),

    /// Two descriptor entries share an address
    #[error("duplicate register address 0x{0:02X}")]
    DuplicateAddress(u8),

    /// Two descriptor entries share a name
    #[error("duplicate register name {0:?}")]
    DuplicateName(String),

    /// Request line does not match the wire grammar
    #[error("malformed request line: {0:?}")]
    MalformedRequest(String),
}

/// Errors surfaced by protocol client operations
#[derive(Debug, Error)]
pub enum ClientError {
    /// Name or address not present in the register catalog
    #[error("unknown register: {0}")]
    UnknownRegister(String),

    /// Name or index not present on the system bus
    #[error("unknown bus signal: {0}")]
    UnknownSignal(String),

    /// No response line arrived within the deadline (recoverable, retry allowed)
    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// Response did not correlate with the request; transport state is
    /// undefined until the caller drains or reconnects
    #[error("unexpected response {got:?} (expected {expected:?})")]
    UnexpectedReply { expected: String, got: String },

    /// Peer closed the transport
    #[error("transport closed by peer")]
    Disconnected,

    /// Bulk-configuration source is malformed or lacks the regs table
    #[error("configuration error: {0}")]
    Config(String),

    /// Capture handshake did not complete as an exact PR / P / PX sequence
    #[error("acquisition failed: {0}")]
    Acquisition(String),

    /// Descriptor parse failure
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Transport I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
