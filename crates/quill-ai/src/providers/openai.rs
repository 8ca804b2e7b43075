//! OpenAI Chat Completions API provider

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;

use crate::{
    error::{Error, Result},
    providers::Transport,
    stream::ByteStream,
    types::{SendOptions, Turn},
};

/// Default endpoint for the hosted API
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI API client
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create from environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = super::get_api_key(None, "OPENAI_API_KEY")?;
        Ok(Self::new(api_key))
    }

    /// Point the provider at an OpenAI-compatible endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Endpoint that chat requests are posted to
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_request(&self, turns: &[Turn], options: &SendOptions) -> OpenAIRequest {
        OpenAIRequest {
            model: options.model.clone(),
            messages: turns
                .iter()
                .map(|t| OpenAIMessage {
                    role: t.role.as_str(),
                    content: t.content.clone(),
                })
                .collect(),
            stream: true,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        }
    }
}

#[async_trait]
impl Transport for OpenAIProvider {
    async fn send(&self, turns: &[Turn], options: &SendOptions) -> Result<ByteStream> {
        if self.api_key.is_empty() {
            return Err(Error::InvalidApiKey);
        }

        let request = self.build_request(turns, options);
        tracing::debug!(
            model = %request.model,
            turns = request.messages.len(),
            "sending chat completion request"
        );

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::transport(status.as_u16(), text));
        }

        let body = response
            .bytes_stream()
            .map(|chunk| match chunk {
                Ok(bytes) => Ok(bytes.to_vec()),
                Err(e) => Err(Error::Stream(e.to_string())),
            });

        Ok(Box::pin(body))
    }
}

// Request types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: &'static str,
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_shape() {
        let provider = OpenAIProvider::new("sk-test");
        let turns = vec![Turn::system("be brief"), Turn::user("hi")];
        let request = provider.build_request(&turns, &SendOptions::new("gpt-4o"));
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "model": "gpt-4o",
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hi"}
                ],
                "stream": true
            })
        );
    }

    #[test]
    fn test_build_request_with_limits() {
        let provider = OpenAIProvider::new("sk-test");
        let options = SendOptions {
            model: "gpt-4o-mini".into(),
            max_tokens: Some(512),
            temperature: Some(0.5),
        };
        let json = serde_json::to_value(provider.build_request(&[], &options)).unwrap();
        assert_eq!(json["max_tokens"], 512);
        assert_eq!(json["temperature"], 0.5);
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let provider = OpenAIProvider::new("k").with_base_url("http://localhost:11434/v1/");
        assert_eq!(
            provider.completions_url(),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn test_empty_key_rejected_before_request() {
        let provider = OpenAIProvider::new("");
        let result = provider.send(&[Turn::user("hi")], &SendOptions::new("gpt-4o")).await;
        assert!(matches!(result, Err(Error::InvalidApiKey)));
    }
}
