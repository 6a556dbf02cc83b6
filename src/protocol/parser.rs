//! Incremental frame parser for the backend byte stream.
//!
//! Bytes arrive from the socket in arbitrary chunks. [`StreamParser`]
//! buffers them and yields at most one [`Message`] per [`feed`] call,
//! reporting whether the buffer ran dry, emptied exactly, or still holds
//! more frames. Callers with `Excess` in hand keep feeding an empty slice
//! until the buffer drains.
//!
//! [`feed`]: StreamParser::feed

use crate::error::{Error, Result};

use super::message::Message;

/// Outcome of one [`StreamParser::feed`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// Not enough buffered bytes for a complete frame. Read more.
    Insufficient,
    /// One message decoded and the buffer is now empty.
    Sufficient(Message),
    /// One message decoded and buffered bytes remain. Feed again.
    Excess(Message),
}

/// Buffering frame parser. One per connection.
#[derive(Debug, Default)]
pub struct StreamParser {
    buf: Vec<u8>,
    // Set while the next byte is a bare 'S'/'N' SSL indicator rather
    // than a framed message.
    ssl_phase: bool,
}

impl StreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the parser for the single-byte SSL indicator the server sends
    /// in response to SSLRequest. Applies to the next byte only.
    pub fn expect_ssl_response(&mut self) {
        self.ssl_phase = true;
    }

    /// Number of buffered bytes not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append `data` and try to decode the frame at the front of the
    /// buffer. A frame that fails to decode is consumed before its error
    /// is returned, so the stream stays aligned on frame boundaries. A
    /// corrupt length word is unrecoverable.
    pub fn feed(&mut self, data: &[u8]) -> Result<Parsed> {
        self.buf.extend_from_slice(data);

        if self.ssl_phase {
            let Some(&indicator) = self.buf.first() else {
                return Ok(Parsed::Insufficient);
            };
            self.ssl_phase = false;
            self.buf.drain(..1);
            let supported = match indicator {
                b'S' => true,
                b'N' => false,
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected ssl indicator: {:?}",
                        other as char
                    )));
                }
            };
            let message = Message::SslResponse { supported };
            return if self.buf.is_empty() {
                Ok(Parsed::Sufficient(message))
            } else {
                Ok(Parsed::Excess(message))
            };
        }

        // Type byte plus Int32 length.
        if self.buf.len() < 5 {
            return Ok(Parsed::Insufficient);
        }
        let len = i32::from_be_bytes([self.buf[1], self.buf[2], self.buf[3], self.buf[4]]);
        if len < 4 {
            return Err(Error::Protocol(format!("frame length too small: {len}")));
        }
        // The length counts itself but not the type byte.
        let total = 1 + len as usize;
        if self.buf.len() < total {
            return Ok(Parsed::Insufficient);
        }

        let decoded = Message::decode(self.buf[0], &self.buf[5..total]);
        self.buf.drain(..total);
        let message = decoded?;

        if self.buf.is_empty() {
            Ok(Parsed::Sufficient(message))
        } else {
            Ok(Parsed::Excess(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::codec::MessageBuilder;
    use crate::protocol::message::ReadyForQuery;
    use crate::protocol::types::TransactionStatus;

    fn ready_for_query_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        let mut builder = MessageBuilder::new(&mut buf, b'Z');
        builder.write_u8(b'I');
        builder.finish();
        buf
    }

    fn command_complete_bytes(tag: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut builder = MessageBuilder::new(&mut buf, b'C');
        builder.write_cstr(tag);
        builder.finish();
        buf
    }

    #[test]
    fn test_whole_frame() {
        let mut parser = StreamParser::new();
        let parsed = parser.feed(&ready_for_query_bytes()).unwrap();
        assert_eq!(
            parsed,
            Parsed::Sufficient(Message::ReadyForQuery(ReadyForQuery {
                status: TransactionStatus::Idle
            }))
        );
        assert_eq!(parser.buffered(), 0);
    }

    #[test]
    fn test_split_at_every_boundary() {
        let bytes = command_complete_bytes("SELECT 3");
        let expected = {
            let mut parser = StreamParser::new();
            match parser.feed(&bytes).unwrap() {
                Parsed::Sufficient(message) => message,
                other => panic!("expected Sufficient, got {other:?}"),
            }
        };

        for split in 1..bytes.len() {
            let mut parser = StreamParser::new();
            assert_eq!(
                parser.feed(&bytes[..split]).unwrap(),
                Parsed::Insufficient,
                "split at {split}"
            );
            assert_eq!(
                parser.feed(&bytes[split..]).unwrap(),
                Parsed::Sufficient(expected.clone()),
                "split at {split}"
            );
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let bytes = ready_for_query_bytes();
        let mut parser = StreamParser::new();
        for &byte in &bytes[..bytes.len() - 1] {
            assert_eq!(parser.feed(&[byte]).unwrap(), Parsed::Insufficient);
        }
        let parsed = parser.feed(&bytes[bytes.len() - 1..]).unwrap();
        assert!(matches!(parsed, Parsed::Sufficient(_)));
    }

    #[test]
    fn test_excess_then_drain() {
        let mut bytes = command_complete_bytes("BEGIN");
        bytes.extend_from_slice(&ready_for_query_bytes());

        let mut parser = StreamParser::new();
        match parser.feed(&bytes).unwrap() {
            Parsed::Excess(Message::CommandComplete(complete)) => {
                assert_eq!(complete.tag, "BEGIN");
            }
            other => panic!("expected Excess, got {other:?}"),
        }
        match parser.feed(&[]).unwrap() {
            Parsed::Sufficient(Message::ReadyForQuery(ready)) => {
                assert_eq!(ready.status, TransactionStatus::Idle);
            }
            other => panic!("expected Sufficient, got {other:?}"),
        }
    }

    #[test]
    fn test_ssl_indicator() {
        let mut parser = StreamParser::new();
        parser.expect_ssl_response();
        assert_eq!(parser.feed(&[]).unwrap(), Parsed::Insufficient);
        assert_eq!(
            parser.feed(b"N").unwrap(),
            Parsed::Sufficient(Message::SslResponse { supported: false })
        );

        // Indicator followed by a full frame in the same chunk.
        let mut parser = StreamParser::new();
        parser.expect_ssl_response();
        let mut bytes = b"S".to_vec();
        bytes.extend_from_slice(&ready_for_query_bytes());
        assert_eq!(
            parser.feed(&bytes).unwrap(),
            Parsed::Excess(Message::SslResponse { supported: true })
        );
        assert!(matches!(parser.feed(&[]).unwrap(), Parsed::Sufficient(_)));
    }

    #[test]
    fn test_frame_length_too_small() {
        let mut parser = StreamParser::new();
        let err = parser.feed(&[b'Z', 0, 0, 0, 3]).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[test]
    fn test_unknown_type_byte_consumed() {
        let mut bytes = vec![b'~', 0, 0, 0, 4];
        bytes.extend_from_slice(&ready_for_query_bytes());

        let mut parser = StreamParser::new();
        assert!(matches!(parser.feed(&bytes), Err(Error::Protocol(_))));
        // The bad frame was consumed; the stream is still aligned.
        assert!(matches!(
            parser.feed(&[]).unwrap(),
            Parsed::Sufficient(Message::ReadyForQuery(_))
        ));
    }
}
