//! Incremental frame parser.
//!
//! Operates on a buffered byte slice; the caller reads from the socket
//! into a buffer and retries once more data arrives. A single pass
//! builds the `Frame` directly, returning `Ok(None)` while the buffer
//! is still short of a complete frame.

use std::io::Cursor;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::frame::Frame;

/// Maximum nesting depth for arrays. Guards the stack against
/// adversarial deeply nested input.
const MAX_DEPTH: usize = 32;

/// Maximum declared element count for an array.
const MAX_ARRAY_ELEMENTS: usize = 1_048_576;

/// Maximum declared bulk string length (512 MB).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Cap for the initial `Vec` allocation when parsing arrays. A declared
/// count can be huge before any element data arrives; the vec grows
/// organically past this.
const PREALLOC_CAP: usize = 1024;

/// Attempts to parse one complete frame from the front of `buf`.
///
/// Returns `Ok(Some((frame, consumed)))` when a frame was parsed —
/// the caller should advance its buffer by `consumed` bytes.
/// Returns `Ok(None)` when the buffer doesn't contain a full frame
/// yet, and `Err` when the bytes are malformed.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut cursor = Cursor::new(buf);
    match parse_at(&mut cursor, 0) {
        Ok(frame) => Ok(Some((frame, cursor.position() as usize))),
        Err(ProtocolError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

fn parse_at(cursor: &mut Cursor<&[u8]>, depth: usize) -> Result<Frame, ProtocolError> {
    match next_byte(cursor)? {
        b'+' => {
            let line = read_line(cursor)?;
            let s = std::str::from_utf8(line)
                .map_err(|_| ProtocolError::InvalidUtf8("simple string"))?;
            Ok(Frame::Simple(s.to_owned()))
        }
        b'-' => {
            let line = read_line(cursor)?;
            let s =
                std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8("error"))?;
            Ok(Frame::Error(s.to_owned()))
        }
        b':' => Ok(Frame::Integer(read_int_line(cursor)?)),
        b'$' => {
            let len = read_int_line(cursor)?;
            if len == -1 {
                return Ok(Frame::Null);
            }
            if len < 0 {
                return Err(ProtocolError::InvalidLength(len));
            }
            if len > MAX_BULK_LEN {
                return Err(ProtocolError::BulkTooLarge(len as usize));
            }
            let len = len as usize;

            let pos = cursor.position() as usize;
            let data = *cursor.get_ref();
            // payload + trailing \r\n must be present
            if data.len() - pos < len + 2 {
                return Err(ProtocolError::Incomplete);
            }
            if data[pos + len] != b'\r' || data[pos + len + 1] != b'\n' {
                return Err(ProtocolError::InvalidLength(len as i64));
            }
            let payload = Bytes::copy_from_slice(&data[pos..pos + len]);
            cursor.set_position((pos + len + 2) as u64);
            Ok(Frame::Bulk(payload))
        }
        b'*' => {
            if depth + 1 > MAX_DEPTH {
                return Err(ProtocolError::NestingTooDeep(MAX_DEPTH));
            }
            let count = read_int_line(cursor)?;
            if count == -1 {
                return Ok(Frame::Null);
            }
            if count < 0 {
                return Err(ProtocolError::InvalidLength(count));
            }
            if count as usize > MAX_ARRAY_ELEMENTS {
                return Err(ProtocolError::TooManyElements(count as usize));
            }
            let count = count as usize;
            let mut items = Vec::with_capacity(count.min(PREALLOC_CAP));
            for _ in 0..count {
                items.push(parse_at(cursor, depth + 1)?);
            }
            Ok(Frame::Array(items))
        }
        other => Err(ProtocolError::InvalidPrefix(other)),
    }
}

fn next_byte(cursor: &mut Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    let pos = cursor.position() as usize;
    let data = *cursor.get_ref();
    if pos >= data.len() {
        return Err(ProtocolError::Incomplete);
    }
    cursor.set_position((pos + 1) as u64);
    Ok(data[pos])
}

/// Returns the bytes up to the next `\r\n` and advances past it.
fn read_line<'a>(cursor: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], ProtocolError> {
    let start = cursor.position() as usize;
    let data = *cursor.get_ref();
    let mut i = start;
    while i + 1 < data.len() {
        if data[i] == b'\r' && data[i + 1] == b'\n' {
            cursor.set_position((i + 2) as u64);
            return Ok(&data[start..i]);
        }
        i += 1;
    }
    Err(ProtocolError::Incomplete)
}

fn read_int_line(cursor: &mut Cursor<&[u8]>) -> Result<i64, ProtocolError> {
    let line = read_line(cursor)?;
    if line.is_empty() {
        return Err(ProtocolError::InvalidInteger);
    }
    let (neg, digits) = match line[0] {
        b'-' => (true, &line[1..]),
        _ => (false, line),
    };
    if digits.is_empty() {
        return Err(ProtocolError::InvalidInteger);
    }
    let mut val: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ProtocolError::InvalidInteger);
        }
        val = val
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as i64))
            .ok_or(ProtocolError::InvalidInteger)?;
    }
    Ok(if neg { -val } else { val })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full(buf: &[u8]) -> Frame {
        let (frame, consumed) = parse_frame(buf).unwrap().unwrap();
        assert_eq!(consumed, buf.len(), "parser should consume the whole input");
        frame
    }

    #[test]
    fn parses_simple_string() {
        assert_eq!(full(b"+PONG\r\n"), Frame::Simple("PONG".into()));
    }

    #[test]
    fn parses_error() {
        assert_eq!(full(b"-ERR boom\r\n"), Frame::Error("ERR boom".into()));
    }

    #[test]
    fn parses_integers() {
        assert_eq!(full(b":1000\r\n"), Frame::Integer(1000));
        assert_eq!(full(b":-1\r\n"), Frame::Integer(-1));
    }

    #[test]
    fn parses_bulk() {
        assert_eq!(full(b"$5\r\nhello\r\n"), Frame::Bulk(Bytes::from("hello")));
        assert_eq!(full(b"$0\r\n\r\n"), Frame::Bulk(Bytes::new()));
    }

    #[test]
    fn bulk_is_binary_safe() {
        assert_eq!(
            full(b"$7\r\na\r\nb\x00c\r\n"),
            Frame::Bulk(Bytes::from_static(b"a\r\nb\x00c"))
        );
    }

    #[test]
    fn parses_null_in_both_spellings() {
        assert_eq!(full(b"$-1\r\n"), Frame::Null);
        assert_eq!(full(b"*-1\r\n"), Frame::Null);
    }

    #[test]
    fn parses_command_array() {
        let frame = full(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n");
        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::Bulk(Bytes::from("SET")),
                Frame::Bulk(Bytes::from("foo")),
                Frame::Bulk(Bytes::from("bar")),
            ])
        );
    }

    #[test]
    fn incomplete_returns_none() {
        assert_eq!(parse_frame(b"").unwrap(), None);
        assert_eq!(parse_frame(b"*2\r\n$3\r\nGET\r\n").unwrap(), None);
        assert_eq!(parse_frame(b"$5\r\nhel").unwrap(), None);
        assert_eq!(parse_frame(b"+OK\r").unwrap(), None);
    }

    #[test]
    fn consumed_stops_at_frame_boundary() {
        let buf = b"+OK\r\n:1\r\n";
        let (frame, consumed) = parse_frame(buf).unwrap().unwrap();
        assert_eq!(frame, Frame::Simple("OK".into()));
        assert_eq!(consumed, 5);
        let (frame, consumed) = parse_frame(&buf[5..]).unwrap().unwrap();
        assert_eq!(frame, Frame::Integer(1));
        assert_eq!(consumed, 4);
    }

    #[test]
    fn rejects_unknown_prefix() {
        assert!(matches!(
            parse_frame(b"@oops\r\n"),
            Err(ProtocolError::InvalidPrefix(b'@'))
        ));
    }

    #[test]
    fn rejects_bad_lengths() {
        assert!(matches!(
            parse_frame(b"$-2\r\n"),
            Err(ProtocolError::InvalidLength(-2))
        ));
        assert!(matches!(
            parse_frame(b"*-5\r\n"),
            Err(ProtocolError::InvalidLength(-5))
        ));
    }

    #[test]
    fn rejects_deep_nesting() {
        let mut buf = Vec::new();
        for _ in 0..40 {
            buf.extend_from_slice(b"*1\r\n");
        }
        buf.extend_from_slice(b":1\r\n");
        assert!(matches!(
            parse_frame(&buf),
            Err(ProtocolError::NestingTooDeep(_))
        ));
    }

    #[test]
    fn rejects_non_numeric_length() {
        assert!(matches!(
            parse_frame(b"$abc\r\n"),
            Err(ProtocolError::InvalidInteger)
        ));
    }

    #[test]
    fn roundtrip_through_serializer() {
        use bytes::BytesMut;
        let original = Frame::Array(vec![
            Frame::Simple("OK".into()),
            Frame::Bulk(Bytes::from("payload")),
            Frame::Integer(-42),
            Frame::Null,
        ]);
        let mut buf = BytesMut::new();
        original.serialize(&mut buf);
        assert_eq!(full(&buf), original);
    }
}
