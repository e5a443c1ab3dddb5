use std::collections::VecDeque;
use std::marker::PhantomData;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;

const DATA_PREFIX: &str = "data: ";

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("stream transport error: {0}")]
    Transport(String),
}

/// Incremental decoder for `data: <json>` framed Server-Sent-Event bytes.
///
/// Chunk boundaries can fall anywhere inside a line; bytes are buffered
/// until a full line is available, so every splitting of the same byte
/// sequence decodes to the same frames. Lines without the `data: ` prefix
/// (blank keep-alives, comments, other SSE fields) are ignored.
#[derive(Debug, Default)]
pub struct SseFrameDecoder {
    buffer: Vec<u8>,
}

impl SseFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning the payloads of every frame it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = frame_payload(&line[..line.len() - 1]) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flush the trailing unterminated line at end of stream, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.buffer);
        frame_payload(&line)
    }
}

fn frame_payload(line: &[u8]) -> Option<String> {
    let line = match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    };
    let text = String::from_utf8_lossy(line);
    let payload = text.strip_prefix(DATA_PREFIX)?.trim();
    if payload.is_empty() {
        None
    } else {
        Some(payload.to_string())
    }
}

type ByteChunk = Result<Bytes, reqwest::Error>;

/// Typed event sequence over an SSE byte stream.
///
/// A frame whose payload is not valid JSON for `T` is counted and skipped;
/// one bad frame never aborts the stream. The sequence ends when the
/// transport does -- terminal semantics belong to the event payloads.
pub struct EventStream<T> {
    source: Pin<Box<dyn Stream<Item = ByteChunk> + Send>>,
    decoder: SseFrameDecoder,
    pending: VecDeque<String>,
    dropped_frames: u64,
    done: bool,
    _event: PhantomData<T>,
}

impl<T> std::fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("pending", &self.pending.len())
            .field("dropped_frames", &self.dropped_frames)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<T: DeserializeOwned> EventStream<T> {
    pub fn new(source: impl Stream<Item = ByteChunk> + Send + 'static) -> Self {
        Self {
            source: Box::pin(source),
            decoder: SseFrameDecoder::new(),
            pending: VecDeque::new(),
            dropped_frames: 0,
            done: false,
            _event: PhantomData,
        }
    }

    /// Next decoded event, or `None` at end of stream.
    pub async fn next_event(&mut self) -> Result<Option<T>, StreamError> {
        loop {
            while let Some(payload) = self.pending.pop_front() {
                match serde_json::from_str(&payload) {
                    Ok(event) => return Ok(Some(event)),
                    Err(e) => {
                        self.dropped_frames += 1;
                        log::warn!("dropping malformed stream frame: {} ({})", e, payload);
                    }
                }
            }
            if self.done {
                return Ok(None);
            }
            match self.source.next().await {
                Some(Ok(chunk)) => {
                    let payloads = self.decoder.push(&chunk);
                    self.pending.extend(payloads);
                }
                Some(Err(e)) => return Err(StreamError::Transport(e.to_string())),
                None => {
                    self.done = true;
                    self.pending.extend(self.decoder.finish());
                }
            }
        }
    }

    /// Frames skipped because their payload failed to decode.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }
}
