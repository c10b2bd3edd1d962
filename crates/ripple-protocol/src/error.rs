//! Protocol error type for RESP parsing.

use thiserror::Error;

/// Errors that can occur while reading the wire format.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The buffer doesn't hold a complete frame yet. The caller should
    /// read more data and retry.
    #[error("incomplete frame: need more data")]
    Incomplete,

    /// The first byte of a frame didn't match any known type prefix.
    #[error("invalid type prefix: {0:#04x}")]
    InvalidPrefix(u8),

    /// A line that should contain a decimal integer didn't.
    #[error("invalid integer encoding")]
    InvalidInteger,

    /// A bulk string or array declared a nonsensical length.
    #[error("invalid declared length: {0}")]
    InvalidLength(i64),

    /// A bulk string declared a length above the hard cap.
    #[error("bulk string too large: {0} bytes")]
    BulkTooLarge(usize),

    /// An array declared more elements than the hard cap.
    #[error("too many array elements: {0}")]
    TooManyElements(usize),

    /// Arrays nested beyond the depth cap.
    #[error("frame nesting exceeds depth limit {0}")]
    NestingTooDeep(usize),

    /// A textual frame (simple string / error) contained invalid UTF-8.
    #[error("invalid utf-8 in {0} frame")]
    InvalidUtf8(&'static str),

    /// The frame parsed fine but isn't a valid request shape.
    #[error("bad request: {0}")]
    BadRequest(String),
}
