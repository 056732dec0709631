//! OpenAI-compatible client.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;

use crate::schema::StructuredOutput;
use crate::wire::{
    ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, JsonSchemaFormat,
    ResponseFormat, WireMessage,
};
use crate::EmbedAgent;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Chat, structured-output, and embedding client for any provider speaking
/// the OpenAI wire protocol.
#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    model: String,
    embedding_model: String,
    base_url: String,
    http: reqwest::Client,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            embedding_model: "text-embedding-3-small".to_string(),
            base_url: OPENAI_API_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        debug!(model = %request.model, "chat completion request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("chat API error ({}): {}", status, error_text));
        }

        let chat: ChatResponse = response.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("no completion in response"))
    }

    /// Simple chat completion.
    pub async fn chat_completion(
        &self,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![WireMessage::system(system), WireMessage::user(user)],
            temperature: Some(0.0),
            max_tokens: Some(4096),
            response_format: None,
        };
        self.chat(&request).await
    }

    /// Type-safe structured extraction: the response is constrained to the
    /// JSON schema derived from `T` and deserialized into it.
    pub async fn extract<T: StructuredOutput>(
        &self,
        model: &str,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Result<T> {
        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![
                WireMessage::system(system_prompt),
                WireMessage::user(user_prompt),
            ],
            temperature: Some(0.0),
            max_tokens: None,
            response_format: Some(ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: "structured_response".to_string(),
                    strict: true,
                    schema: T::response_schema(),
                },
            }),
        };

        let json_str = self.chat(&request).await?;
        serde_json::from_str(&json_str)
            .map_err(|e| anyhow!("failed to deserialize structured response: {}", e))
    }

    async fn embeddings(&self, input: serde_json::Value) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input,
        };

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await?;
            return Err(anyhow!("embedding API error ({}): {}", status, error_text));
        }

        let parsed: EmbeddingResponse = response.json().await?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbedAgent for OpenAi {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embeddings(serde_json::Value::String(text.to_string()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no embedding in response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embeddings(serde_json::Value::Array(
            texts
                .iter()
                .map(|t| serde_json::Value::String(t.clone()))
                .collect(),
        ))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let ai = OpenAi::new("sk-test", "gpt-4o");
        assert_eq!(ai.model(), "gpt-4o");
        assert_eq!(ai.embedding_model, "text-embedding-3-small");
        assert_eq!(ai.base_url, OPENAI_API_URL);
    }

    #[test]
    fn builder_overrides() {
        let ai = OpenAi::new("sk-test", "gpt-4o")
            .with_embedding_model("voyage-3-large")
            .with_base_url("https://api.voyageai.com/v1");
        assert_eq!(ai.embedding_model, "voyage-3-large");
        assert_eq!(ai.base_url, "https://api.voyageai.com/v1");
    }
}
