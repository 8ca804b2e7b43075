//! Scripted transport for tests

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use quill_ai::{ByteStream, Error, SendOptions, Transport, Turn};

/// Canned provider behaviour for one request
pub(crate) enum Reply {
    /// Stream this text as SSE frames, split into small chunks
    Text(String),
    /// Reject the request with this status
    Fail(u16),
    /// Hand back these chunks verbatim
    Raw(Vec<quill_ai::Result<Vec<u8>>>),
    /// Stream this text, then never finish
    Hang(String),
}

/// Encode `text` as an OpenAI-style event stream
pub(crate) fn sse(text: &str) -> Vec<u8> {
    let mut out = String::new();
    // Split into a few deltas so decoding is exercised
    let chars: Vec<char> = text.chars().collect();
    for piece in chars.chunks(5) {
        let piece: String = piece.iter().collect();
        let frame = serde_json::json!({"choices": [{"delta": {"content": piece}}]});
        out.push_str(&format!("data: {}\n\n", frame));
    }
    out.push_str("data: [DONE]\n\n");
    out.into_bytes()
}

fn chunked(bytes: Vec<u8>) -> Vec<quill_ai::Result<Vec<u8>>> {
    bytes.chunks(7).map(|c| Ok(c.to_vec())).collect()
}

pub(crate) struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<(Vec<Turn>, SendOptions)>>,
}

impl ScriptedTransport {
    pub(crate) fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far, in order
    pub(crate) fn requests(&self) -> Vec<(Vec<Turn>, SendOptions)> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, turns: &[Turn], options: &SendOptions) -> quill_ai::Result<ByteStream> {
        self.requests.lock().push((turns.to_vec(), options.clone()));

        let reply = self.replies.lock().pop_front();
        match reply {
            Some(Reply::Text(text)) => Ok(Box::pin(futures::stream::iter(chunked(sse(&text))))),
            Some(Reply::Fail(status)) => Err(Error::transport(status, "scripted failure")),
            Some(Reply::Raw(chunks)) => Ok(Box::pin(futures::stream::iter(chunks))),
            Some(Reply::Hang(text)) => {
                let head = futures::stream::iter(chunked(sse(&text)));
                Ok(Box::pin(head.chain(futures::stream::pending())))
            }
            None => Err(Error::transport(500, "no scripted reply left")),
        }
    }
}
