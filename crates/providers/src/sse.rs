//! SSE decoding shared by the streaming adapters.
//!
//! OpenAI-style endpoints put one complete JSON document on every `data:`
//! line, so the decoder works line by line: each finished `data:` line is a
//! payload of its own, and field lines it does not care about (`event:`,
//! `id:`, `retry:`, comments, blanks) fall through.

use shaman_domain::error::{Error, Result};
use shaman_domain::stream::{BoxStream, CompletionChunk, FinishReason};

/// Incremental decoder from raw body text to `data:` payloads.
#[derive(Default)]
pub(crate) struct SseFrameDecoder {
    /// Unterminated tail of the last chunk, carried into the next one.
    tail: String,
}

impl SseFrameDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk; returns the payload of every `data:` line the
    /// chunk completed.
    pub(crate) fn push(&mut self, chunk: &str) -> Vec<String> {
        self.tail.push_str(chunk);

        let mut payloads = Vec::new();
        while let Some(newline) = self.tail.find('\n') {
            let line: String = self.tail.drain(..=newline).collect();
            payloads.extend(data_payload(&line));
        }
        payloads
    }

    /// Treat whatever is left as a final line once the body closes.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let tail = std::mem::take(&mut self.tail);
        data_payload(&tail)
    }
}

/// The payload of a `data:` line, if that is what `line` is.
fn data_payload(line: &str) -> Option<String> {
    let line = line.trim_end_matches(['\n', '\r']);
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() {
        None
    } else {
        Some(payload.to_owned())
    }
}

/// Turn an SSE `reqwest::Response` into a chunk stream using an
/// adapter-specific payload parser.
///
/// The parser is `FnMut` so adapters can keep assembly state across
/// payloads. If the body closes without the parser having produced a
/// terminal chunk, a fallback `Finish` is appended — the stream contract
/// is finite with exactly one terminal chunk.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<CompletionChunk>>
where
    F: FnMut(&str) -> Vec<Result<CompletionChunk>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut body = response;
        let mut decoder = SseFrameDecoder::new();
        let mut finished = false;

        loop {
            let chunk = match body.chunk().await {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(Error::ProviderUnavailable(e.to_string()));
                    return;
                }
            };

            let payloads = match &chunk {
                Some(bytes) => decoder.push(&String::from_utf8_lossy(bytes)),
                None => decoder.finish().into_iter().collect(),
            };
            for payload in payloads {
                for event in parse_data(&payload) {
                    finished |= matches!(&event, Ok(CompletionChunk::Finish { .. }));
                    yield event;
                }
            }

            if chunk.is_none() {
                break;
            }
        }

        if !finished {
            yield Ok(CompletionChunk::Finish {
                reason: FinishReason::Stop,
                usage: None,
            });
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
