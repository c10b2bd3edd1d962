//! Engine-response to wire-frame conversion.

use bytes::Bytes;
use ripple_core::Response;
use ripple_protocol::Frame;

use crate::worker_manager::Notification;

/// Converts an engine response into its wire frame.
pub fn response_frame(response: Response) -> Frame {
    match response {
        Response::Simple(s) => Frame::Simple(s.to_owned()),
        Response::Bulk(data) => Frame::Bulk(data),
        Response::Int(n) => Frame::Integer(n),
        Response::Null => Frame::Null,
        Response::Array(items) => {
            Frame::Array(items.into_iter().map(response_frame).collect())
        }
        Response::Error(e) => Frame::Error(e.message),
    }
}

/// The asynchronous watch-notification envelope: fingerprint, the
/// triggering change-event sequence number, and the fresh result.
pub fn notification_frame(notification: Notification) -> Frame {
    Frame::Array(vec![
        Frame::Bulk(Bytes::from(notification.fingerprint.to_string())),
        Frame::Integer(notification.seq as i64),
        response_frame(notification.result),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ripple_core::CommandError;

    #[test]
    fn responses_map_to_frames() {
        assert_eq!(response_frame(Response::ok()), Frame::Simple("OK".into()));
        assert_eq!(response_frame(Response::Int(3)), Frame::Integer(3));
        assert_eq!(response_frame(Response::Null), Frame::Null);
        assert_eq!(
            response_frame(Response::Error(CommandError::wrong_type())),
            Frame::Error(
                "WRONGTYPE Operation against a key holding the wrong kind of value".into()
            )
        );
    }

    #[test]
    fn notification_envelope_shape() {
        let frame = notification_frame(Notification {
            fingerprint: 42,
            seq: 7,
            result: Response::Bulk(Bytes::from("hello")),
        });
        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::Bulk(Bytes::from("42")),
                Frame::Integer(7),
                Frame::Bulk(Bytes::from("hello")),
            ])
        );
    }
}
