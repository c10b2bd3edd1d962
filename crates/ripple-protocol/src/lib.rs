//! ripple-protocol: the RESP wire format.
//!
//! A request is an array of bulk byte strings; a response is any of
//! simple string, error, integer, bulk bytes, array, or null. The
//! encoding is bit-compatible with the protocol spoken by widely
//! deployed in-memory stores, so existing client libraries work
//! unmodified. Null is written in the classic `$-1\r\n` form and the
//! parser accepts both `$-1` and `*-1`.
//!
//! # quick start
//!
//! ```
//! use bytes::BytesMut;
//! use ripple_protocol::{parse_frame, Frame};
//!
//! let (frame, consumed) = parse_frame(b"+OK\r\n").unwrap().unwrap();
//! assert_eq!(frame, Frame::Simple("OK".into()));
//! assert_eq!(consumed, 5);
//!
//! let mut buf = BytesMut::new();
//! frame.serialize(&mut buf);
//! assert_eq!(&buf[..], b"+OK\r\n");
//! ```

pub mod error;
pub mod frame;
pub mod parse;

pub use error::ProtocolError;
pub use frame::{encode_command, Frame};
pub use parse::parse_frame;

use bytes::Bytes;

/// Flattens a request frame into command parts: the command name and
/// its arguments, all as raw bytes.
///
/// Requests must be an array of bulk strings (simple strings are
/// tolerated for hand-typed clients). Anything else is a protocol
/// error.
pub fn command_parts(frame: Frame) -> Result<Vec<Bytes>, ProtocolError> {
    let items = match frame {
        Frame::Array(items) => items,
        other => {
            return Err(ProtocolError::BadRequest(format!(
                "expected array request, got {}",
                other.type_label()
            )))
        }
    };

    if items.is_empty() {
        return Err(ProtocolError::BadRequest("empty command array".into()));
    }

    items
        .into_iter()
        .map(|item| match item {
            Frame::Bulk(data) => Ok(data),
            Frame::Simple(s) => Ok(Bytes::from(s.into_bytes())),
            other => Err(ProtocolError::BadRequest(format!(
                "expected bulk string argument, got {}",
                other.type_label()
            ))),
        })
        .collect()
}
