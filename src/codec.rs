//! Relay line codec
//!
//! Reads lines terminated by `\n` or `\r\n` and writes lines terminated by
//! `\r\n`. Lines longer than the limit are discarded and decoding carries
//! on with the next line, so an over-long line never ends the stream.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};
use tracing::warn;

/// Longest accepted line in bytes, excluding the terminator
pub const MAX_LINE_LENGTH: usize = 8192;

/// A tokio codec framing the relay's text protocol
#[derive(Debug)]
pub struct RelayCodec {
    inner: LinesCodec,
    max_length: usize,
}

impl RelayCodec {
    /// Create a codec that discards lines longer than `max_length`
    pub fn new(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
        }
    }
}

impl Default for RelayCodec {
    fn default() -> Self {
        Self::new(MAX_LINE_LENGTH)
    }
}

impl Decoder for RelayCodec {
    type Item = String;
    type Error = LinesCodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, LinesCodecError> {
        loop {
            match self.inner.decode(src) {
                // The inner codec is now discarding up to the next '\n'
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!("Discarding line longer than {} bytes", self.max_length);
                }
                other => return other,
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<String>, LinesCodecError> {
        loop {
            match self.inner.decode_eof(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!("Discarding line longer than {} bytes", self.max_length);
                }
                other => return other,
            }
        }
    }
}

impl Encoder<String> for RelayCodec {
    type Error = LinesCodecError;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), LinesCodecError> {
        dst.reserve(line.len() + 2);
        dst.put_slice(line.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
