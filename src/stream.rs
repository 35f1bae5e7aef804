//! Incremental decoder for `text/event-stream` chat-completion bodies.
//!
//! Bytes arrive in arbitrary transport chunks. A chunk may end in the middle
//! of a UTF-8 sequence or in the middle of a `data:` line, so both the byte
//! tail and the line tail are carried into the next [`StreamDecoder::feed`].
//! The accumulated text is therefore independent of where the chunks split.

use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::error::{Result, ScribeError};
use crate::providers::StreamChunk;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// What a single `feed` call produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedOutcome {
    /// Data lines whose JSON parsed, including ones with an empty delta.
    pub parsed_lines: usize,
    /// Data lines that were dropped because their JSON was malformed.
    pub malformed_lines: usize,
    /// Whether the `[DONE]` sentinel was seen.
    pub done: bool,
}

impl FeedOutcome {
    fn merge(&mut self, other: FeedOutcome) {
        self.parsed_lines += other.parsed_lines;
        self.malformed_lines += other.malformed_lines;
        self.done |= other.done;
    }
}

#[derive(Debug, Default)]
pub struct StreamDecoder {
    utf8_tail: Vec<u8>,
    line_tail: String,
    text: String,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one transport chunk and apply every complete line in it.
    pub fn feed(&mut self, bytes: &[u8]) -> FeedOutcome {
        let decoded = self.decode_utf8(bytes);
        self.line_tail.push_str(&decoded);

        let mut outcome = FeedOutcome::default();
        while let Some(pos) = self.line_tail.find('\n') {
            let line: String = self.line_tail.drain(..=pos).collect();
            outcome.merge(self.apply_line(&line));
        }
        outcome
    }

    /// Flush whatever is left once the body has ended: a dangling partial
    /// UTF-8 sequence becomes U+FFFD and an unterminated last line is applied.
    pub fn finish(&mut self) -> FeedOutcome {
        if !self.utf8_tail.is_empty() {
            self.utf8_tail.clear();
            self.line_tail.push(char::REPLACEMENT_CHARACTER);
        }
        let line = std::mem::take(&mut self.line_tail);
        self.apply_line(&line)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    fn decode_utf8(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.utf8_tail);
        buf.extend_from_slice(bytes);

        let mut out = String::with_capacity(buf.len());
        let mut rest: &[u8] = &buf;
        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    // valid_up_to guarantees this prefix is well-formed.
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more bytes.
                            self.utf8_tail.extend_from_slice(after);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    fn apply_line(&mut self, raw: &str) -> FeedOutcome {
        let mut outcome = FeedOutcome::default();
        let line = raw.trim();
        let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
            return outcome;
        };
        let payload = payload.trim_start();
        if payload == DONE_SENTINEL {
            outcome.done = true;
            return outcome;
        }
        match serde_json::from_str::<StreamChunk>(payload) {
            Ok(chunk) => {
                self.text.push_str(chunk.delta_text());
                outcome.parsed_lines = 1;
            }
            Err(e) => {
                warn!(error = %e, line = %payload, "skipping malformed stream line");
                outcome.malformed_lines = 1;
            }
        }
        outcome
    }
}

/// Drive a [`StreamDecoder`] over a body stream until it ends.
///
/// `on_text` receives the full accumulated text after every chunk that
/// produced at least one parsed data line. A read error ends the stream with
/// [`ScribeError::StreamRead`]; malformed lines never do.
pub async fn decode_stream<S, B, E>(mut body: S, mut on_text: impl FnMut(&str)) -> Result<String>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut decoder = StreamDecoder::new();
    let mut chunks = 0usize;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| ScribeError::StreamRead(e.to_string()))?;
        chunks += 1;
        if decoder.feed(chunk.as_ref()).parsed_lines > 0 {
            on_text(decoder.text());
        }
    }

    if decoder.finish().parsed_lines > 0 {
        on_text(decoder.text());
    }

    debug!(chunks, chars = decoder.text().chars().count(), "stream finished");
    Ok(decoder.into_text())
}
