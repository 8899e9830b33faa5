//! NDJSON codec for the CSend machine-mode stream.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so an
//! unterminated or runaway line from the child cannot exhaust memory.
//!
//! An over-long line is dropped inside the codec and counted; decoding
//! resumes at the next newline. It is never surfaced as an error, because
//! `FramedRead` ends the stream after the first decoder error.

use std::io;

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};
use tracing::warn;

/// Maximum inbound line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Line codec for the machine-mode stream.
///
/// Each `\n`-terminated UTF-8 string is one frame candidate; a trailing
/// `\r` is stripped by the inner codec.
#[derive(Debug)]
pub struct MachineCodec {
    inner: LinesCodec,
    max_length: usize,
    discarded: u64,
}

impl MachineCodec {
    /// Create a codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Create a codec with a custom line limit.
    #[must_use]
    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_length),
            max_length,
            discarded: 0,
        }
    }

    /// Over-long lines dropped so far.
    #[must_use]
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    fn decode_with<F>(&mut self, src: &mut BytesMut, mut step: F) -> io::Result<Option<String>>
    where
        F: FnMut(&mut LinesCodec, &mut BytesMut) -> Result<Option<String>, LinesCodecError>,
    {
        loop {
            match step(&mut self.inner, src) {
                Ok(line) => return Ok(line),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    // The inner codec is now discarding up to the next
                    // newline; calling it again makes progress.
                    self.discarded += 1;
                    warn!(limit = self.max_length, "over-long line discarded");
                }
                // The offending line has already been consumed.
                Err(LinesCodecError::Io(err)) if err.kind() == io::ErrorKind::InvalidData => {
                    self.discarded += 1;
                    warn!(error = %err, "non-UTF-8 line discarded");
                }
                Err(LinesCodecError::Io(err)) => return Err(err),
            }
        }
    }
}

impl Default for MachineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MachineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> io::Result<Option<String>> {
        self.decode_with(src, LinesCodec::decode)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> io::Result<Option<String>> {
        self.decode_with(src, LinesCodec::decode_eof)
    }
}

impl Encoder<String> for MachineCodec {
    type Error = io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> io::Result<()> {
        self.inner.encode(item, dst).map_err(|err| match err {
            LinesCodecError::Io(err) => err,
            LinesCodecError::MaxLineLengthExceeded => {
                io::Error::new(io::ErrorKind::InvalidInput, "line too long")
            }
        })
    }
}
