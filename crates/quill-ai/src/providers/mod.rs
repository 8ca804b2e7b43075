//! Chat provider implementations

pub mod openai;

use crate::{Error, Result, SendOptions, Turn, stream::ByteStream};
use async_trait::async_trait;

/// Something that can carry a transcript to a provider and hand back the raw
/// streamed response body.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the full transcript and return the response body as byte chunks.
    ///
    /// Fails with [`Error::Transport`] when the provider rejects the request.
    async fn send(&self, turns: &[Turn], options: &SendOptions) -> Result<ByteStream>;
}

/// Get an API key from a provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    std::env::var(env_var).map_err(|_| Error::InvalidApiKey)
}
