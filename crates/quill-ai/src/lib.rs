//! quill-ai: Chat provider transport and streaming decoder
//!
//! This crate carries a transcript to an OpenAI-compatible chat provider and
//! turns the streamed response into a lazy sequence of text deltas.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::Transport;
pub use stream::{ByteStream, TextStream};
pub use types::*;
