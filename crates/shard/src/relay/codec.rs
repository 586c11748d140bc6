//! IRC line codec.
//!
//! Inbound lines end in `\r\n`, though a bare `\n` is accepted too. A line
//! that is not UTF-8, or does not parse, is still yielded (as
//! [`Inbound::Undecodable`] or [`Inbound::Malformed`]) so the caller can log
//! it and keep reading. Outbound lines are capped at 512 bytes including the
//! terminator.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::message::{Message, ParseError};

/// Longest inbound line, terminator included, before the stream is dropped.
/// IRCv3 tags can push past RFC 2812's 512.
const MAX_INBOUND_LINE: usize = 8191;

/// Longest outbound line body; `\r\n` brings it to 512.
pub const MAX_OUTBOUND_LINE: usize = 510;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("line exceeds maximum length ({MAX_INBOUND_LINE} bytes)")]
    LineTooLong,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message(Message),
    /// Bytes that are not valid UTF-8.
    Undecodable { len: usize },
    /// Text that is not an IRC message.
    Malformed { line: String, error: ParseError },
}

#[derive(Debug, Default)]
pub struct RelayCodec;

impl Decoder for RelayCodec {
    type Item = Inbound;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(end) = src.iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_INBOUND_LINE {
                    return Err(CodecError::LineTooLong);
                }
                return Ok(None);
            };

            let mut line = src.split_to(end + 1);
            line.truncate(end);
            if line.last() == Some(&b'\r') {
                line.truncate(end - 1);
            }
            if line.is_empty() {
                continue;
            }

            let item = match std::str::from_utf8(&line) {
                Err(_) => Inbound::Undecodable { len: line.len() },
                Ok(text) => match Message::parse(text) {
                    Ok(message) => Inbound::Message(message),
                    Err(error) => Inbound::Malformed {
                        line: text.to_string(),
                        error,
                    },
                },
            };
            return Ok(Some(item));
        }
    }
}

impl Encoder<Message> for RelayCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = item.to_wire();
        // A stray line break inside a param would smuggle a second command.
        let wire = wire.split(['\r', '\n']).next().unwrap_or_default();
        let body = truncate_at_char_boundary(wire, MAX_OUTBOUND_LINE);

        dst.reserve(body.len() + 2);
        dst.put_slice(body.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}

fn truncate_at_char_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
