use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::errors::LineError;

/// Longest accepted line, in bytes, excluding the terminator.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 8192;

/// One decoded unit of client input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// A complete line with the `\n` removed. Invalid UTF-8 has been dropped.
    Line(String),
    /// A line longer than the limit was skipped up to its terminator.
    Overlong { limit: usize },
}

/// Newline-delimited text codec.
///
/// Decoding never fails on content: invalid UTF-8 sequences are removed and
/// overlong lines are reported as [`Frame::Overlong`] so the stream keeps
/// going. Encoding appends `\n` to each message.
#[derive(Clone, Debug)]
pub struct LineCodec {
    max_length: usize,
    /// Offset already scanned for a newline in the current buffer.
    next_index: usize,
    discarding: bool,
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            max_length,
            next_index: 0,
            discarding: false,
        }
    }
}

/// Decode bytes as UTF-8, dropping any invalid sequences.
pub fn decode_lenient(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_owned(),
        Err(_) => bytes.utf8_chunks().map(|chunk| chunk.valid()).collect(),
    }
}

impl Decoder for LineCodec {
    type Item = Frame;
    type Error = LineError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LineError> {
        loop {
            let read_to = buf.len().min(self.max_length.saturating_add(1));
            let newline = buf[self.next_index..read_to]
                .iter()
                .position(|b| *b == b'\n')
                .map(|offset| offset + self.next_index);

            match (self.discarding, newline) {
                (true, Some(idx)) => {
                    buf.advance(idx + 1);
                    self.discarding = false;
                    self.next_index = 0;
                }
                (true, None) => {
                    buf.advance(read_to);
                    self.next_index = 0;
                    if buf.is_empty() {
                        return Ok(None);
                    }
                }
                (false, Some(idx)) => {
                    self.next_index = 0;
                    let line = buf.split_to(idx + 1);
                    return Ok(Some(Frame::Line(decode_lenient(&line[..idx]))));
                }
                (false, None) if buf.len() > self.max_length => {
                    self.discarding = true;
                    self.next_index = 0;
                    return Ok(Some(Frame::Overlong {
                        limit: self.max_length,
                    }));
                }
                (false, None) => {
                    self.next_index = read_to;
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LineError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }
        self.next_index = 0;
        if buf.is_empty() {
            return Ok(None);
        }
        if self.discarding {
            buf.clear();
            self.discarding = false;
            return Ok(None);
        }
        let rest = buf.split();
        Ok(Some(Frame::Line(decode_lenient(&rest))))
    }
}

impl Encoder<String> for LineCodec {
    type Error = LineError;

    fn encode(&mut self, line: String, buf: &mut BytesMut) -> Result<(), LineError> {
        buf.reserve(line.len() + 1);
        buf.put_slice(line.as_bytes());
        buf.put_u8(b'\n');
        Ok(())
    }
}
