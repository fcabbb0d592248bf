//! Frame decoders that turn an arbitrarily chunked response body into whole
//! output records.
//!
//! Two framings exist in the wild and are selected by [`Framing`]:
//! - length-prefixed: `u32` big-endian payload length followed by UTF-8 JSON;
//! - newline-delimited: one JSON record per `\n`/`\r` terminated line.
//!
//! Decoders never perform I/O. The caller pushes chunks and pulls records.

use std::fmt;
use std::str::FromStr;

use bytes::{Buf as _, BufMut as _, Bytes, BytesMut};

use crate::errors::{ChatError, DecodeError};
use crate::record::OutputRecord;

/// Size of the length prefix in length-prefixed framing.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default upper bound for one frame's payload.
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// A source of output records fed with raw body chunks.
pub trait FrameSource: Send {
    /// Appends a chunk to the internal buffer without decoding it.
    fn push_chunk(&mut self, chunk: &[u8]);

    /// Decodes the next complete record, or `None` if more bytes are needed.
    fn next_record(&mut self) -> Result<Option<OutputRecord>, DecodeError>;

    /// Flushes the buffer at end of stream.
    ///
    /// Call after `next_record` has returned `None`. Returns a final record
    /// when the framing allows an unterminated trailing frame.
    fn finish(&mut self) -> Result<Option<OutputRecord>, DecodeError>;

    /// Discards any partially buffered frame.
    fn reset(&mut self);

    /// Number of bytes currently buffered.
    fn buffered_len(&self) -> usize;

    /// Pushes a chunk and decodes every record it completes.
    fn feed(&mut self, chunk: &[u8]) -> Result<Vec<OutputRecord>, DecodeError> {
        self.push_chunk(chunk);
        let mut records = Vec::new();
        while let Some(record) = self.next_record()? {
            records.push(record);
        }
        Ok(records)
    }
}

fn parse_record(payload: &[u8]) -> Result<OutputRecord, DecodeError> {
    let text = std::str::from_utf8(payload).map_err(DecodeError::invalid_utf8)?;
    serde_json::from_str(text).map_err(DecodeError::invalid_json)
}

/// Decoder for `u32` big-endian length-prefixed JSON frames.
pub struct LengthPrefixedDecoder {
    buf: BytesMut,
    max_frame_len: usize,
}

impl LengthPrefixedDecoder {
    /// Creates a decoder rejecting frames larger than `max_frame_len`.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_len,
        }
    }

    fn declared_len(&self) -> Option<usize> {
        if self.buf.len() < LENGTH_PREFIX_SIZE {
            return None;
        }
        let len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        Some(len as usize)
    }
}

impl Default for LengthPrefixedDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameSource for LengthPrefixedDecoder {
    fn push_chunk(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn next_record(&mut self) -> Result<Option<OutputRecord>, DecodeError> {
        let Some(len) = self.declared_len() else {
            return Ok(None);
        };
        if len > self.max_frame_len {
            return Err(DecodeError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            });
        }
        if self.buf.len() < LENGTH_PREFIX_SIZE + len {
            return Ok(None);
        }
        self.buf.advance(LENGTH_PREFIX_SIZE);
        let payload = self.buf.split_to(len);
        parse_record(&payload).map(Some)
    }

    fn finish(&mut self) -> Result<Option<OutputRecord>, DecodeError> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        let expected = self
            .declared_len()
            .map_or(LENGTH_PREFIX_SIZE, |len| LENGTH_PREFIX_SIZE + len);
        Err(DecodeError::Truncated {
            expected,
            buffered: self.buf.len(),
        })
    }

    fn reset(&mut self) {
        self.buf.clear();
    }

    fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

/// Encodes one payload as a length-prefixed frame.
///
/// Payloads whose length does not fit the `u32` prefix are rejected.
pub fn encode_length_prefixed(payload: &[u8]) -> Result<Bytes, DecodeError> {
    let len = prefix_len(payload.len())?;
    let mut out = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    out.put_u32(len);
    out.put_slice(payload);
    Ok(out.freeze())
}

fn prefix_len(len: usize) -> Result<u32, DecodeError> {
    u32::try_from(len).map_err(|_| DecodeError::FrameTooLarge {
        len,
        max: u32::MAX as usize,
    })
}

/// Decoder for newline-delimited JSON records.
///
/// Lines are split on raw `\n`/`\r` bytes, so a multi-byte UTF-8 sequence
/// split across chunks stays buffered until its line completes.
pub struct NewlineDelimitedDecoder {
    buf: BytesMut,
    max_frame_len: usize,
}

impl NewlineDelimitedDecoder {
    /// Creates a decoder rejecting unterminated lines longer than `max_frame_len`.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_len,
        }
    }
}

impl Default for NewlineDelimitedDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameSource for NewlineDelimitedDecoder {
    fn push_chunk(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    fn next_record(&mut self) -> Result<Option<OutputRecord>, DecodeError> {
        loop {
            let Some(pos) = self.buf.iter().position(|b| *b == b'\n' || *b == b'\r') else {
                if self.buf.len() > self.max_frame_len {
                    return Err(DecodeError::FrameTooLarge {
                        len: self.buf.len(),
                        max: self.max_frame_len,
                    });
                }
                return Ok(None);
            };
            let line = self.buf.split_to(pos);
            self.buf.advance(1);
            let line = line.trim_ascii();
            if line.is_empty() {
                continue;
            }
            return parse_record(line).map(Some);
        }
    }

    fn finish(&mut self) -> Result<Option<OutputRecord>, DecodeError> {
        let rest = self.buf.split();
        let line = rest.trim_ascii();
        if line.is_empty() {
            return Ok(None);
        }
        parse_record(line).map(Some)
    }

    fn reset(&mut self) {
        self.buf.clear();
    }

    fn buffered_len(&self) -> usize {
        self.buf.len()
    }
}

/// Framing used by the chat endpoint's response body.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// `u32` big-endian length + UTF-8 JSON payload.
    #[default]
    LengthPrefixed,
    /// One UTF-8 JSON record per line.
    NewlineDelimited,
}

impl Framing {
    /// Creates a fresh decoder for this framing.
    pub fn decoder(self, max_frame_len: usize) -> Box<dyn FrameSource> {
        match self {
            Framing::LengthPrefixed => Box::new(LengthPrefixedDecoder::new(max_frame_len)),
            Framing::NewlineDelimited => Box::new(NewlineDelimitedDecoder::new(max_frame_len)),
        }
    }

    /// Stable configuration name.
    pub fn as_str(self) -> &'static str {
        match self {
            Framing::LengthPrefixed => "length-prefixed",
            Framing::NewlineDelimited => "newline-delimited",
        }
    }
}

impl fmt::Display for Framing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Framing {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "length-prefixed" | "length_prefixed" | "binary" => Ok(Framing::LengthPrefixed),
            "newline-delimited" | "newline_delimited" | "ndjson" | "jsonl" => {
                Ok(Framing::NewlineDelimited)
            }
            other => Err(ChatError::Config(format!("unknown framing: {other}"))),
        }
    }
}
