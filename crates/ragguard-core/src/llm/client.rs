//! Chat client for OpenAI-compatible LLM services, routed through the
//! pool, breaker, retry and cache substrate

use crate::cache::{request_cache_key, CacheEngine};
use crate::config::LLMServiceConfig;
use crate::error::{RagGuardError, Result};
use crate::pool::{ConnectionPool, ResourceFactory};
use crate::resilience::GuardedCall;
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Trait for LLM service clients
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Generate chat completion
    async fn chat_completion(&self, messages: Vec<ChatMessage>) -> Result<String>;

    /// Get model name
    fn model_name(&self) -> &str;
}

/// Chat message for completion requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Opens `reqwest` sessions for a connection pool
pub struct HttpSessionFactory {
    timeout: Duration,
}

impl HttpSessionFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn from_config(config: &LLMServiceConfig) -> Self {
        Self::new(Duration::from_secs(config.timeout_secs))
    }
}

#[async_trait]
impl ResourceFactory<reqwest::Client> for HttpSessionFactory {
    async fn create(&self) -> Result<reqwest::Client> {
        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()?;
        Ok(client)
    }

    fn name(&self) -> &str {
        "http session"
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

/// OpenAI-compatible chat client
///
/// Identical requests are answered from the cache; concurrent identical
/// requests share one upstream call.
pub struct ChatClient {
    config: LLMServiceConfig,
    pool: Arc<ConnectionPool<reqwest::Client>>,
    cache: Arc<CacheEngine<String>>,
    guard: Arc<GuardedCall>,
}

impl ChatClient {
    pub fn new(
        config: LLMServiceConfig,
        pool: Arc<ConnectionPool<reqwest::Client>>,
        cache: Arc<CacheEngine<String>>,
        guard: Arc<GuardedCall>,
    ) -> Self {
        Self {
            config,
            pool,
            cache,
            guard,
        }
    }

    pub fn config(&self) -> &LLMServiceConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool<reqwest::Client>> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<CacheEngine<String>> {
        &self.cache
    }

    /// Answer a single question, mapping failures to user-facing fallback
    /// text
    pub async fn answer(&self, question: &str) -> String {
        let messages = vec![ChatMessage::user(question)];
        match self.chat_completion(messages).await {
            Ok(answer) => answer,
            Err(e) => {
                tracing::warn!("Chat completion failed: {}", e);
                e.user_message()
            }
        }
    }
}

#[async_trait]
impl LLMClient for ChatClient {
    async fn chat_completion(&self, messages: Vec<ChatMessage>) -> Result<String> {
        let request = Arc::new(ChatRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        });
        let cache_key = request_cache_key("chat", &*request)?;
        let url = format!("{}/v1/chat/completions", self.config.url.trim_end_matches('/'));
        let api_key = self.config.api_key.clone();
        let pool = self.pool.clone();
        let guard = self.guard.clone();
        let acquire_timeout = pool.config().acquire_timeout;

        let compute = move || async move {
            guard
                .call_pooled(&pool, acquire_timeout, |client: &reqwest::Client| {
                    let url = url.clone();
                    let api_key = api_key.clone();
                    let request = request.clone();
                    async move { send_chat(client, &url, api_key.as_deref(), &request).await }
                        .boxed()
                })
                .await
        };

        self.cache
            .get_or_compute(&cache_key, compute, None, true)
            .await
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

async fn send_chat(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    request: &ChatRequest,
) -> Result<String> {
    let mut req = client.post(url).json(request);
    if let Some(api_key) = api_key {
        req = req.header("Authorization", format!("Bearer {}", api_key));
    }

    let response = req.send().await?;
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = format!("LLM service error (HTTP {}): {}", status, body);
        // Client errors will not improve on retry
        return Err(if status.is_client_error() {
            RagGuardError::InvalidInput(message)
        } else {
            RagGuardError::ExternalError(message)
        });
    }

    let chat_response: ChatResponse = response.json().await?;
    chat_response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .ok_or_else(|| RagGuardError::ExternalError("No response from LLM".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_request_shape() {
        let request = ChatRequest {
            model: "m".to_string(),
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
            temperature: 0.2,
            max_tokens: 16,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["max_tokens"], 16);
    }

    #[test]
    fn test_chat_response_parsing() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"42"}}]}"#;
        let response: ChatResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.choices[0].message.content, "42");
    }

    #[tokio::test]
    async fn test_session_factory_builds_client() {
        let factory = HttpSessionFactory::new(Duration::from_secs(5));
        assert!(factory.create().await.is_ok());
        assert_eq!(factory.name(), "http session");
    }
}
