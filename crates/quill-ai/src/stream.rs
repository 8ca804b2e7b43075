//! Streaming decode of provider responses into text deltas
//!
//! Providers answer with server-sent events: `data: {json}` lines separated by
//! blank lines and terminated by `data: [DONE]`. Transport chunk boundaries do
//! not line up with those lines, so bytes are buffered until a newline arrives.

use std::pin::Pin;

use async_stream::stream;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::Stream;

use crate::{
    error::Result,
    providers::Transport,
    types::{SendOptions, Turn},
};

/// Raw body chunks as delivered by a transport
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>>> + Send>>;

/// Lazy sequence of text deltas
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// Carry-over buffer that turns arbitrary chunks into complete lines.
///
/// Splitting happens on raw bytes, so a multi-byte character cut in half by a
/// chunk boundary is reassembled before it is decoded.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completed, in order
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.pending[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            lines.push(String::from_utf8_lossy(&self.pending[start..end]).into_owned());
            start = end + 1;
        }
        self.pending.drain(..start);

        lines
    }

    /// Take whatever is left once the input has ended
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }

    /// Bytes held back waiting for a newline
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Classification of a single line of provider output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// An incremental text fragment
    Delta(String),
    /// The end-of-stream sentinel
    Done,
    /// Blank lines, comments, non-data fields, and frames without text
    Skip,
    /// A data frame whose payload is not valid JSON of the expected shape
    Malformed(String),
}

/// Classify one line of an event stream
pub fn parse_frame(line: &str) -> Frame {
    let line = line.trim();
    if line.is_empty() {
        return Frame::Skip;
    }

    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return Frame::Skip;
    };
    let payload = payload.trim_start();

    if payload == DONE_SENTINEL {
        return Frame::Done;
    }

    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => match chunk.into_delta() {
            Some(text) if !text.is_empty() => Frame::Delta(text),
            _ => Frame::Skip,
        },
        Err(e) => Frame::Malformed(e.to_string()),
    }
}

/// Decode a provider byte stream into text deltas.
///
/// Malformed frames are dropped. The sequence ends when the byte stream ends;
/// a transport error is yielded once and ends it early.
pub fn decode(mut chunks: ByteStream) -> TextStream {
    Box::pin(stream! {
        let mut buffer = LineBuffer::new();

        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            for line in buffer.push(&chunk) {
                if let Some(delta) = accept(&line) {
                    yield Ok(delta);
                }
            }
        }

        if let Some(line) = buffer.finish() {
            if let Some(delta) = accept(&line) {
                yield Ok(delta);
            }
        }
    })
}

fn accept(line: &str) -> Option<String> {
    match parse_frame(line) {
        Frame::Delta(text) => Some(text),
        Frame::Done => {
            tracing::trace!("end-of-stream sentinel received");
            None
        }
        Frame::Skip => None,
        Frame::Malformed(reason) => {
            tracing::debug!(%reason, "dropping malformed stream frame");
            None
        }
    }
}

/// Send `turns` through `transport` and decode the reply into text deltas
pub async fn stream_text(
    transport: &dyn Transport,
    turns: &[Turn],
    options: &SendOptions,
) -> Result<TextStream> {
    let chunks = transport.send(turns, options).await?;
    Ok(decode(chunks))
}

/// Drain a text stream into one string, stopping at the first error
pub async fn collect_text(mut deltas: TextStream) -> Result<String> {
    let mut text = String::new();
    while let Some(delta) = deltas.next().await {
        text.push_str(&delta?);
    }
    Ok(text)
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

impl StreamChunk {
    fn into_delta(self) -> Option<String> {
        self.choices.into_iter().next()?.delta.content
    }
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn chunks(parts: &[&str]) -> ByteStream {
        let owned: Vec<Result<Vec<u8>>> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        Box::pin(futures::stream::iter(owned))
    }

    async fn collect_all(stream: TextStream) -> Vec<Result<String>> {
        stream.collect().await
    }

    async fn deltas(parts: &[&str]) -> Vec<String> {
        collect_all(decode(chunks(parts)))
            .await
            .into_iter()
            .map(|d| d.unwrap())
            .collect()
    }

    #[test]
    fn test_line_buffer_holds_incomplete_line() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"data: a").is_empty());
        assert_eq!(buffer.pending_len(), 7);

        let lines = buffer.push(b"bc\n\ndata: x");
        assert_eq!(lines, vec!["data: abc".to_string(), String::new()]);
        assert_eq!(buffer.finish(), Some("data: x".to_string()));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_line_buffer_reassembles_split_utf8() {
        let bytes = "data: 你好\n".as_bytes();
        // Cut inside the first CJK character (3 bytes each)
        let (head, tail) = bytes.split_at(7);
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(head).is_empty());
        assert_eq!(buffer.push(tail), vec!["data: 你好".to_string()]);
    }

    #[test]
    fn test_parse_frame_variants() {
        assert_eq!(parse_frame(""), Frame::Skip);
        assert_eq!(parse_frame("   \r"), Frame::Skip);
        assert_eq!(parse_frame(": keep-alive"), Frame::Skip);
        assert_eq!(parse_frame("event: ping"), Frame::Skip);
        assert_eq!(parse_frame("data: [DONE]"), Frame::Done);
        assert_eq!(
            parse_frame(r#"data: {"choices":[{"delta":{"content":"Hi"}}]}"#),
            Frame::Delta("Hi".into())
        );
        assert!(matches!(parse_frame("data: {not json"), Frame::Malformed(_)));
    }

    #[test]
    fn test_parse_frame_without_text_is_skipped() {
        assert_eq!(
            parse_frame(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            Frame::Skip
        );
        assert_eq!(
            parse_frame(r#"data: {"choices":[{"delta":{"content":""}}]}"#),
            Frame::Skip
        );
        assert_eq!(parse_frame(r#"data: {"usage":{"total_tokens":3}}"#), Frame::Skip);
        assert_eq!(parse_frame(r#"data: {"choices":[]}"#), Frame::Skip);
    }

    #[test]
    fn test_parse_frame_accepts_prefix_without_space() {
        assert_eq!(
            parse_frame(r#"data:{"choices":[{"delta":{"content":"x"}}]}"#),
            Frame::Delta("x".into())
        );
    }

    #[tokio::test]
    async fn test_decode_across_chunk_boundary() {
        let out = deltas(&[
            r#"data: {"choices":[{"delta":{"content":"Hel"#,
            "lo\"}}]}\n\n",
        ])
        .await;
        assert_eq!(out, vec!["Hello".to_string()]);
    }

    #[tokio::test]
    async fn test_decode_drops_malformed_frame() {
        let out = deltas(&[
            "data: {not json\ndata: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n",
        ])
        .await;
        assert_eq!(out, vec!["ok".to_string()]);
    }

    #[tokio::test]
    async fn test_decode_preserves_frame_order() {
        let out = deltas(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n",
            "\ndata: {\"choices\":[{\"delta\":{\"content\":\"c\"}}]}\n\ndata: [DONE]\n\n",
        ])
        .await;
        assert_eq!(out, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_decode_flushes_trailing_line_at_end_of_input() {
        let out = deltas(&["data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}"]).await;
        assert_eq!(out, vec!["tail".to_string()]);
    }

    #[tokio::test]
    async fn test_decode_ends_without_sentinel() {
        let out = deltas(&["data: {\"choices\":[{\"delta\":{\"content\":\"x\"}}]}\n\n"]).await;
        assert_eq!(out, vec!["x".to_string()]);
    }

    #[tokio::test]
    async fn test_decode_empty_input() {
        assert!(deltas(&[]).await.is_empty());
    }

    #[tokio::test]
    async fn test_decode_yields_transport_error_and_stops() {
        let parts: Vec<Result<Vec<u8>>> = vec![
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"a\"}}]}\n".to_vec()),
            Err(Error::Stream("connection reset".into())),
            Ok(b"data: {\"choices\":[{\"delta\":{\"content\":\"b\"}}]}\n".to_vec()),
        ];
        let out = collect_all(decode(Box::pin(futures::stream::iter(parts)))).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), "a");
        assert!(matches!(out[1], Err(Error::Stream(_))));
    }

    #[tokio::test]
    async fn test_collect_text_concatenates() {
        let text = collect_text(decode(chunks(&[
            "data: {\"choices\":[{\"delta\":{\"content\":\"foo\"}}]}\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"bar\"}}]}\n",
        ])))
        .await
        .unwrap();
        assert_eq!(text, "foobar");
    }
}
