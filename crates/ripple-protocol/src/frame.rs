//! The `Frame` type and direct-to-buffer serialization.
//!
//! Frames serialize straight into a `BytesMut` with no intermediate
//! allocations; integer formatting goes through `itoa`.

use bytes::{BufMut, Bytes, BytesMut};

/// A single protocol frame, request or response side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// `+OK\r\n` — a short status line.
    Simple(String),
    /// `-ERR message\r\n` — an error line; the first token is the
    /// error code.
    Error(String),
    /// `:42\r\n`
    Integer(i64),
    /// `$5\r\nhello\r\n` — binary-safe payload.
    Bulk(Bytes),
    /// `*2\r\n...` — heterogeneous sequence of frames.
    Array(Vec<Frame>),
    /// `$-1\r\n` — the null reply.
    Null,
}

impl Frame {
    /// Serializes this frame into `dst`, including the type prefix and
    /// trailing `\r\n` delimiters.
    pub fn serialize(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                dst.put_u8(b'+');
                dst.put_slice(s.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Error(msg) => {
                dst.put_u8(b'-');
                dst.put_slice(msg.as_bytes());
                dst.put_slice(b"\r\n");
            }
            Frame::Integer(n) => {
                dst.put_u8(b':');
                put_i64(*n, dst);
                dst.put_slice(b"\r\n");
            }
            Frame::Bulk(data) => {
                dst.put_u8(b'$');
                put_i64(data.len() as i64, dst);
                dst.put_slice(b"\r\n");
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Frame::Array(items) => {
                dst.put_u8(b'*');
                put_i64(items.len() as i64, dst);
                dst.put_slice(b"\r\n");
                for item in items {
                    item.serialize(dst);
                }
            }
            Frame::Null => {
                dst.put_slice(b"$-1\r\n");
            }
        }
    }

    /// A short human label for diagnostics.
    pub fn type_label(&self) -> &'static str {
        match self {
            Frame::Simple(_) => "simple string",
            Frame::Error(_) => "error",
            Frame::Integer(_) => "integer",
            Frame::Bulk(_) => "bulk string",
            Frame::Array(_) => "array",
            Frame::Null => "null",
        }
    }
}

/// Encodes a command (name + arguments) as an array of bulk strings —
/// the canonical request encoding. Used both by clients and by the
/// engine when it hands raw command bytes to the write-ahead log.
pub fn encode_command(parts: &[Bytes]) -> Bytes {
    let mut buf = BytesMut::with_capacity(16 + parts.iter().map(|p| p.len() + 16).sum::<usize>());
    buf.put_u8(b'*');
    put_i64(parts.len() as i64, &mut buf);
    buf.put_slice(b"\r\n");
    for part in parts {
        buf.put_u8(b'$');
        put_i64(part.len() as i64, &mut buf);
        buf.put_slice(b"\r\n");
        buf.put_slice(part);
        buf.put_slice(b"\r\n");
    }
    buf.freeze()
}

fn put_i64(val: i64, dst: &mut BytesMut) {
    let mut buf = itoa::Buffer::new();
    dst.put_slice(buf.format(val).as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_of(frame: &Frame) -> Vec<u8> {
        let mut buf = BytesMut::new();
        frame.serialize(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn simple_string() {
        assert_eq!(bytes_of(&Frame::Simple("OK".into())), b"+OK\r\n");
    }

    #[test]
    fn error_line() {
        assert_eq!(
            bytes_of(&Frame::Error("WRONGTYPE wrong kind of value".into())),
            b"-WRONGTYPE wrong kind of value\r\n"
        );
    }

    #[test]
    fn integers() {
        assert_eq!(bytes_of(&Frame::Integer(0)), b":0\r\n");
        assert_eq!(bytes_of(&Frame::Integer(-7)), b":-7\r\n");
        assert_eq!(bytes_of(&Frame::Integer(i64::MAX)), b":9223372036854775807\r\n");
    }

    #[test]
    fn bulk_and_empty_bulk() {
        assert_eq!(
            bytes_of(&Frame::Bulk(Bytes::from_static(b"hello"))),
            b"$5\r\nhello\r\n"
        );
        assert_eq!(bytes_of(&Frame::Bulk(Bytes::new())), b"$0\r\n\r\n");
    }

    #[test]
    fn null_is_negative_bulk() {
        assert_eq!(bytes_of(&Frame::Null), b"$-1\r\n");
    }

    #[test]
    fn nested_array() {
        let frame = Frame::Array(vec![
            Frame::Integer(1),
            Frame::Array(vec![Frame::Bulk(Bytes::from_static(b"x"))]),
        ]);
        assert_eq!(bytes_of(&frame), b"*2\r\n:1\r\n*1\r\n$1\r\nx\r\n");
    }

    #[test]
    fn encode_command_is_bulk_array() {
        let encoded = encode_command(&[Bytes::from("SET"), Bytes::from("k"), Bytes::from("v")]);
        assert_eq!(&encoded[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
    }
}
