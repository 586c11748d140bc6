//! Line framing for the hub ↔ leaf link.
//!
//! Handshake step 0 is the raw key ([`write_key`] / [`read_key`]). After that
//! every message in both directions is one line:
//!
//!   base64( keystream-XOR( UTF-8( JSON(message) ) ) ) '\n'
//!
//! Base64 never contains a line break, so a newline is an unambiguous frame
//! boundary. A line that fails to decode is a protocol error for that one
//! message only: [`LinkReader::recv`] reports it and the next call carries on
//! with the following line. Only I/O failures end the stream.

use std::io;
use std::string::FromUtf8Error;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder, FramedRead, FramedWrite};

use crate::crypto::Cipher;
use crate::wire::KEY_LEN;

/// Longest line accepted before the connection is considered broken.
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FrameError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("frame exceeds maximum length ({MAX_FRAME_LENGTH} bytes)")]
    LineTooLong,
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("decrypted frame is not UTF-8: {0}")]
    Utf8(#[from] FromUtf8Error),
    #[error("invalid message: {0}")]
    Json(#[from] serde_json::Error),
}

impl FrameError {
    /// Malformed single message; the link itself is still usable.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Base64(_) | Self::Utf8(_) | Self::Json(_))
    }
}

// ── Codec ─────────────────────────────────────────────────────────────────────

/// Splits the byte stream on `\n`. A trailing `\r` is dropped.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Where to resume scanning for `\n` in a partially received line.
    scanned: usize,
}

impl Decoder for FrameCodec {
    type Item = BytesMut;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match src[self.scanned..].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let end = self.scanned + offset;
                self.scanned = 0;
                let mut line = src.split_to(end + 1);
                line.truncate(end);
                if line.last() == Some(&b'\r') {
                    line.truncate(end - 1);
                }
                Ok(Some(line))
            }
            None if src.len() > MAX_FRAME_LENGTH => Err(FrameError::LineTooLong),
            None => {
                self.scanned = src.len();
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        self.scanned = 0;
        if src.is_empty() {
            Ok(None)
        } else {
            // Peer closed without a final newline.
            Ok(Some(src.split()))
        }
    }
}

impl Encoder<String> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

// ── Sealing ───────────────────────────────────────────────────────────────────

/// Serialize, encrypt and base64-encode one message (no line terminator).
pub fn seal<T: Serialize>(cipher: &Cipher, message: &T) -> Result<String, FrameError> {
    let json = serde_json::to_vec(message)?;
    Ok(STANDARD.encode(cipher.encrypt(&json)))
}

/// Reverse of [`seal`].
pub fn open<T: DeserializeOwned>(cipher: &Cipher, line: &[u8]) -> Result<T, FrameError> {
    let sealed = STANDARD.decode(line.trim_ascii())?;
    let text = String::from_utf8(cipher.decrypt(&sealed))?;
    Ok(serde_json::from_str(&text)?)
}

// ── Key exchange ──────────────────────────────────────────────────────────────

/// Hub side of handshake step 0.
pub async fn write_key<W: AsyncWrite + Unpin>(writer: &mut W, cipher: &Cipher) -> io::Result<()> {
    writer.write_all(cipher.key()).await?;
    writer.flush().await
}

/// Leaf side of handshake step 0. Must run before the reader is framed.
pub async fn read_key<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<[u8; KEY_LEN]> {
    let mut key = [0u8; KEY_LEN];
    reader.read_exact(&mut key).await?;
    Ok(key)
}

// ── Link halves ───────────────────────────────────────────────────────────────

/// Receiving half of an established link.
pub struct LinkReader<R> {
    frames: FramedRead<R, FrameCodec>,
    cipher: Arc<Cipher>,
}

impl<R: AsyncRead + Unpin> LinkReader<R> {
    pub fn new(reader: R, cipher: Arc<Cipher>) -> Self {
        Self {
            frames: FramedRead::new(reader, FrameCodec::default()),
            cipher,
        }
    }

    /// Next message, `None` at end of stream.
    ///
    /// `Some(Err(e))` with `e.is_protocol()` means one bad frame was skipped;
    /// keep calling. Any other error means the link is gone.
    pub async fn recv<T: DeserializeOwned>(&mut self) -> Option<Result<T, FrameError>> {
        loop {
            let line = match self.frames.next().await? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Some(open(&self.cipher, &line));
        }
    }
}

/// Sending half of an established link.
pub struct LinkWriter<W> {
    frames: FramedWrite<W, FrameCodec>,
    cipher: Arc<Cipher>,
}

impl<W: AsyncWrite + Unpin> LinkWriter<W> {
    pub fn new(writer: W, cipher: Arc<Cipher>) -> Self {
        Self {
            frames: FramedWrite::new(writer, FrameCodec::default()),
            cipher,
        }
    }

    pub async fn send<T: Serialize>(&mut self, message: &T) -> Result<(), FrameError> {
        let line = seal(&self.cipher, message)?;
        self.frames.send(line).await
    }
}
