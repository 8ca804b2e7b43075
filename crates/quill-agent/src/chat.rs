//! Chat orchestration: one user turn in, one streamed reply out.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use quill_ai::{SendOptions, Transport, Turn, stream::stream_text};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    compaction::{self, CompactionConfig},
    conversation::Conversation,
    error::Result,
    tokens::estimate_turns,
    transcript::{PersistOutcome, TranscriptStore},
    transport::cancellable,
};

/// Chat configuration
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Model used for replies
    pub model: String,
    /// Maximum tokens per reply
    pub max_tokens: Option<u32>,
    /// Context compaction configuration
    pub compaction: CompactionConfig,
}

impl ChatConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: None,
            compaction: CompactionConfig::default(),
        }
    }
}

/// Events emitted while a prompt is processed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A request is about to be sent; cost of the transcript it carries
    TurnStart { estimated_tokens: u32 },

    /// Older turns were folded into the rolling summary of the committed turn
    Compacted {
        dropped_turns: usize,
        estimated_tokens_saved: u32,
    },

    /// A piece of the reply arrived
    TextDelta { delta: String },

    /// The reply completed and was committed
    TurnEnd { reply: String },

    /// The prompt failed or was cancelled
    Error { message: String },
}

impl ChatEvent {
    /// Check if this is a terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChatEvent::TurnEnd { .. } | ChatEvent::Error { .. })
    }
}

/// Cloneable handle for cancelling the reply in flight.
#[derive(Clone, Default)]
pub struct ChatHandle {
    cancel: Arc<Mutex<CancellationToken>>,
}

impl ChatHandle {
    /// Cancel the current reply. The conversation stays as it was before the prompt.
    pub fn cancel(&self) {
        self.cancel.lock().cancel();
    }

    fn reset(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        token
    }
}

/// Drives a conversation against a transport
pub struct Chat {
    config: ChatConfig,
    conversation: Conversation,
    transport: Arc<dyn Transport>,
    store: Option<TranscriptStore>,
    event_tx: broadcast::Sender<ChatEvent>,
    handle: ChatHandle,
}

impl Chat {
    /// Create a chat over a fresh conversation
    pub fn new(config: ChatConfig, transport: Arc<dyn Transport>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            config,
            conversation: Conversation::new(),
            transport,
            store: None,
            event_tx,
            handle: ChatHandle::default(),
        }
    }

    /// Persist the conversation after every completed turn
    pub fn with_store(mut self, store: TranscriptStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Continue a previously persisted conversation
    pub fn resume(&mut self, conversation: Conversation) {
        self.conversation = conversation;
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Subscribe to chat events
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.event_tx.subscribe()
    }

    pub fn handle(&self) -> ChatHandle {
        self.handle.clone()
    }

    /// Estimated cost of the current transcript
    pub fn estimate(&self) -> u32 {
        estimate_turns(&self.conversation.turns)
    }

    /// Start over with an empty conversation. Nothing stored is touched.
    pub fn clear(&mut self) {
        self.conversation = Conversation::new();
    }

    /// Persist the current conversation, `None` when no store is attached
    pub async fn save(&self) -> Result<Option<PersistOutcome>> {
        match &self.store {
            Some(store) => store.persist(&self.conversation).await.map(Some),
            None => Ok(None),
        }
    }

    /// Send `input` and stream the reply.
    ///
    /// Emits exactly one terminal event. When the provider fails or the
    /// reply is cancelled, the conversation is left as it was before the call.
    /// A failed save keeps the committed turn in memory.
    pub async fn prompt(&mut self, input: &str) -> Result<String> {
        let cancel = self.handle.reset();

        let result = match self.run_turn(input, &cancel).await {
            Ok(reply) => self.save().await.map(|_| reply),
            Err(e) => Err(e),
        };

        let event = match &result {
            Ok(reply) => ChatEvent::TurnEnd {
                reply: reply.clone(),
            },
            Err(e) => ChatEvent::Error {
                message: e.to_string(),
            },
        };
        let _ = self.event_tx.send(event);

        result
    }

    async fn run_turn(&mut self, input: &str, cancel: &CancellationToken) -> Result<String> {
        let mut candidate = self.conversation.turns.clone();
        candidate.push(Turn::user(input));

        let outcome = compaction::compact(
            &candidate,
            &self.config.compaction,
            self.transport.as_ref(),
            &self.config.model,
            cancel,
        )
        .await;
        // Reported only once the compacted transcript is committed
        let compacted = outcome.report().map(|report| ChatEvent::Compacted {
            dropped_turns: report.dropped_turns,
            estimated_tokens_saved: report.estimated_tokens_saved,
        });
        let mut turns = outcome.into_turns(&candidate);

        let _ = self.event_tx.send(ChatEvent::TurnStart {
            estimated_tokens: estimate_turns(&turns),
        });

        let options = SendOptions {
            max_tokens: self.config.max_tokens,
            ..SendOptions::new(&self.config.model)
        };
        let mut deltas =
            cancellable(cancel, stream_text(self.transport.as_ref(), &turns, &options)).await??;

        let mut reply = String::new();
        while let Some(delta) = cancellable(cancel, deltas.next()).await? {
            let delta = delta?;
            reply.push_str(&delta);
            let _ = self.event_tx.send(ChatEvent::TextDelta { delta });
        }

        tracing::debug!(
            id = %self.conversation.id,
            reply_chars = reply.chars().count(),
            "reply complete"
        );

        turns.push(Turn::assistant(reply.clone()));
        self.conversation = self.conversation.with_turns(turns);
        if let Some(event) = compacted {
            let _ = self.event_tx.send(event);
        }
        Ok(reply)
    }
}
