//! NDJSON reassembly for the model stream.
//!
//! The backend writes one JSON object per line, but a network read can end
//! anywhere: mid-object, mid-UTF-8 sequence, or after several objects. The
//! parser keeps a byte carry-over buffer and only gives up on a segment when
//! a line terminator has been seen and the content is still not valid JSON.

use serde::Deserialize;
use tracing::warn;

use crate::error::RelayError;
use crate::models::Fragment;

/// One object of the backend's stream.
#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: Option<String>,
}

impl StreamChunk {
    fn emit(self, out: &mut Vec<Fragment>) {
        if let Some(error) = self.error {
            out.push(Fragment::Error(error));
            return;
        }

        if let Some(content) = self
            .message
            .and_then(|m| m.content)
            .filter(|c| !c.is_empty())
        {
            out.push(Fragment::Content(content));
        }

        if self.done {
            out.push(Fragment::Done);
        }
    }
}

/// Outcome of parsing one buffered segment.
enum Segment {
    Blank,
    Complete(StreamChunk),
    /// Input ended before the value did; more bytes may complete it.
    Incomplete,
    Invalid(serde_json::Error),
}

/// Logged when a complete line cuts off an unfinished object before it.
const DANGLING: &str = "unterminated object followed by a complete line";

fn parse_segment(bytes: &[u8]) -> Segment {
    let bytes = bytes.trim_ascii();
    if bytes.is_empty() {
        return Segment::Blank;
    }

    match serde_json::from_slice::<StreamChunk>(bytes) {
        Ok(chunk) => Segment::Complete(chunk),
        Err(e) if e.is_eof() => Segment::Incomplete,
        Err(e) => Segment::Invalid(e),
    }
}

/// Incremental parser turning raw reads into fragments.
#[derive(Debug, Default)]
pub struct ChunkParser {
    buffer: Vec<u8>,
    discarded: usize,
}

impl ChunkParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one read; returns every fragment it completed, in order.
    pub fn push(&mut self, read: &[u8]) -> Vec<Fragment> {
        self.buffer.extend_from_slice(read);

        let mut fragments = Vec::new();
        // Start of the pending segment. It may span several lines while the
        // object it holds is incomplete.
        let mut start = 0;
        let mut line_start = 0;

        while let Some(offset) = self.buffer[line_start..].iter().position(|&b| b == b'\n') {
            let end = line_start + offset;
            start = self.settle_line(start, line_start, end, &mut fragments);
            line_start = end + 1;
        }

        // The unterminated tail is tried eagerly so a final object without a
        // trailing newline is not held back. Failures wait for more input.
        match parse_segment(&self.buffer[start..]) {
            Segment::Complete(chunk) => {
                chunk.emit(&mut fragments);
                start = self.buffer.len();
            }
            Segment::Blank => start = self.buffer.len(),
            Segment::Incomplete if start < line_start => {
                if let Segment::Complete(chunk) = parse_segment(&self.buffer[line_start..]) {
                    self.discard(line_start - start, DANGLING);
                    chunk.emit(&mut fragments);
                    start = self.buffer.len();
                }
            }
            Segment::Incomplete | Segment::Invalid(_) => {}
        }

        self.buffer.drain(..start);
        fragments
    }

    /// Resolve the pending segment `start..end`, where `end` is a newline and
    /// `line_start` is the first byte of the line it ends. Returns the new
    /// segment start.
    fn settle_line(
        &mut self,
        start: usize,
        line_start: usize,
        end: usize,
        fragments: &mut Vec<Fragment>,
    ) -> usize {
        match parse_segment(&self.buffer[start..end]) {
            Segment::Blank => end + 1,
            Segment::Complete(chunk) => {
                chunk.emit(fragments);
                end + 1
            }
            // Lines frame the stream: a line that parses on its own ends the
            // dangling prefix before it instead of extending it.
            Segment::Incomplete if start < line_start => {
                match parse_segment(&self.buffer[line_start..end]) {
                    Segment::Complete(chunk) => {
                        self.discard(line_start - start, DANGLING);
                        chunk.emit(fragments);
                        end + 1
                    }
                    _ => start,
                }
            }
            Segment::Incomplete => start,
            Segment::Invalid(err) if start < line_start => {
                // A dangling prefix swallowed this line. Drop the prefix and
                // give the line a chance on its own.
                self.discard(line_start - start, RelayError::from(err));
                self.settle_line(line_start, line_start, end, fragments)
            }
            Segment::Invalid(err) => {
                self.discard(end - start, RelayError::from(err));
                end + 1
            }
        }
    }

    /// Flush whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Vec<Fragment> {
        let mut fragments = Vec::new();
        let rest = std::mem::take(&mut self.buffer);

        match parse_segment(&rest) {
            Segment::Blank => {}
            Segment::Complete(chunk) => chunk.emit(&mut fragments),
            Segment::Incomplete => {
                let last_line = rest
                    .iter()
                    .rposition(|&b| b == b'\n')
                    .map_or(0, |newline| newline + 1);
                match parse_segment(&rest[last_line..]) {
                    Segment::Complete(chunk) if last_line > 0 => {
                        self.discard(last_line, DANGLING);
                        chunk.emit(&mut fragments);
                    }
                    _ => {
                        self.discarded += 1;
                        warn!(bytes = rest.len(), "Stream ended inside an incomplete fragment");
                    }
                }
            }
            Segment::Invalid(err) => self.discard(rest.len(), RelayError::from(err)),
        }

        fragments
    }

    fn discard(&mut self, bytes: usize, reason: impl std::fmt::Display) {
        self.discarded += 1;
        warn!(bytes, error = %reason, "Discarding unparsable stream segment");
    }

    /// Number of segments given up on so far.
    pub const fn discarded(&self) -> usize {
        self.discarded
    }

    /// Bytes waiting for the rest of their object.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
