//! quill-agent: Chat runtime with compaction and durable transcripts
//!
//! This crate drives a conversation against a [`quill_ai::Transport`]:
//! estimating context cost, folding old turns into a rolling summary, streaming
//! replies, and persisting every completed turn.

pub mod chat;
pub mod compaction;
pub mod conversation;
pub mod error;
pub mod tokens;
pub mod transcript;
pub mod transport;

#[cfg(test)]
mod testing;

pub use chat::{Chat, ChatConfig, ChatEvent, ChatHandle};
pub use compaction::{CompactionConfig, CompactionOutcome, CompactionReport};
pub use conversation::Conversation;
pub use error::{Error, Result};
pub use transcript::{
    Backend, CheckpointMode, CheckpointOutcome, ConversationInfo, FsBackend, MemoryBackend,
    PersistOutcome, TranscriptStore,
};
pub use transport::{RetryConfig, RetryTransport};
