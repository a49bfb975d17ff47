//! Server-sent event framing for completion streams.
//!
//! Bytes are buffered until a full line is available, so the produced payloads
//! do not depend on how the body was chunked by the transport.

use std::pin::Pin;

use crate::core::error::ProviderError;
use crate::core::provider::ByteStream;

const DATA_PREFIX: &str = "data:";

/// Payload that marks a graceful end of the stream.
pub const DONE_SENTINEL: &str = "[DONE]";

pub type EventStream = Pin<Box<dyn futures_core::Stream<Item = Result<String, ProviderError>> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data(String),
    Done,
}

/// Incremental decoder. Feed it raw reads; it hands back complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    block: Vec<String>,
    finished: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once the sentinel has been seen; later input is ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.finished {
            return frames;
        }
        self.buffer.extend_from_slice(chunk);

        let mut consumed = 0;
        while let Some(offset) = self.buffer[consumed..].iter().position(|b| *b == b'\n') {
            let end = consumed + offset;
            let mut line = &self.buffer[consumed..end];
            consumed = end + 1;
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }

            if line.is_empty() {
                if self.flush_block(&mut frames) {
                    self.finished = true;
                    self.buffer.clear();
                    self.block.clear();
                    return frames;
                }
                continue;
            }

            let line = String::from_utf8_lossy(line);
            if let Some(data) = line.strip_prefix(DATA_PREFIX) {
                let data = data.strip_prefix(' ').unwrap_or(data);
                self.block.push(data.to_string());
            }
        }
        self.buffer.drain(..consumed);
        frames
    }

    /// Bytes and data lines still waiting for a line or block terminator.
    pub fn has_partial_event(&self) -> bool {
        !self.buffer.is_empty() || !self.block.is_empty()
    }

    /// Emits the buffered block; returns true when the sentinel was hit.
    fn flush_block(&mut self, frames: &mut Vec<Frame>) -> bool {
        for payload in self.block.drain(..) {
            if payload == DONE_SENTINEL {
                frames.push(Frame::Done);
                return true;
            }
            frames.push(Frame::Data(payload));
        }
        false
    }
}

/// Turns a response body into the sequence of event payloads it carries.
///
/// The sequence ends at the sentinel, at a clean end of the body (dropping any
/// unterminated tail), or after yielding the first read error.
pub fn event_payloads(source: ByteStream) -> EventStream {
    let stream = async_stream::stream! {
        use tokio_stream::StreamExt;

        let mut source = source;
        let mut decoder = FrameDecoder::new();

        while let Some(chunk) = source.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            for frame in decoder.push(&chunk) {
                match frame {
                    Frame::Data(payload) => yield Ok(payload),
                    Frame::Done => return,
                }
            }
        }

        if decoder.has_partial_event() {
            tracing::debug!("Discarding unterminated tail of event stream");
        }
    };

    Box::pin(stream)
}
