use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::LlmConfig;

/// What the backend said back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendReply {
    pub message: String,
}

/// A conversational backend that keeps its own session state.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn get_response(&self, text: &str) -> Result<BackendReply>;

    async fn reset_conversation(&self) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
///
/// The bot talks to a single conversation shared by every chat. The history
/// starts with the system prompt and grows by one user and one assistant
/// message per successful exchange.
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
    history: Mutex<Vec<ChatMessage>>,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let history = vec![ChatMessage::new("system", &config.system_prompt)];
        Self {
            client: reqwest::Client::new(),
            config,
            history: Mutex::new(history),
        }
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            max_tokens: self.config.max_tokens,
        };

        let url = format!("{}/chat/completions", self.config.effective_base_url());

        debug!("Sending request to {} ({})", url, self.config.provider);

        let mut builder = self.client.post(&url).json(&request);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", self.config.provider))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} API error ({}): {}", self.config.provider, status, error_body);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", self.config.provider))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.is_empty())
            .with_context(|| format!("No response from {}", self.config.provider))
    }

    /// Drops the oldest turns beyond the configured limit, keeping the system prompt.
    /// Turns go in user/assistant pairs so the history never opens on an answer.
    fn trim_history(&self, history: &mut Vec<ChatMessage>) {
        let turns = history.len().saturating_sub(1);
        let excess = turns.saturating_sub(self.config.max_history_messages);
        let excess = (excess + excess % 2).min(turns);
        if excess > 0 {
            history.drain(1..=excess);
        }
    }

    #[cfg(test)]
    async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }
}

#[async_trait]
impl ChatBackend for LlmClient {
    async fn get_response(&self, text: &str) -> Result<BackendReply> {
        // Held across the request so concurrent chats cannot interleave turns.
        let mut history = self.history.lock().await;
        history.push(ChatMessage::new("user", text));

        match self.chat(&history).await {
            Ok(message) => {
                history.push(ChatMessage::new("assistant", &message));
                self.trim_history(&mut history);
                Ok(BackendReply { message })
            }
            Err(e) => {
                history.pop();
                Err(e)
            }
        }
    }

    async fn reset_conversation(&self) -> Result<()> {
        let mut history = self.history.lock().await;
        history.truncate(1);
        debug!("Conversation history cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmProvider;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String, max_history_messages: usize) -> LlmConfig {
        LlmConfig {
            provider: LlmProvider::Openai,
            model: "test-model".to_string(),
            base_url,
            api_key: "test_key".to_string(),
            max_tokens: 256,
            system_prompt: "You are a test.".to_string(),
            max_history_messages,
        }
    }

    fn answer(content: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }]
        }))
    }

    #[tokio::test]
    async fn test_get_response_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer test_key"))
            .and(body_partial_json(json!({
                "model": "test-model",
                "max_tokens": 256,
                "messages": [
                    {"role": "system", "content": "You are a test."},
                    {"role": "user", "content": "Hello"}
                ]
            })))
            .respond_with(answer("Hi!"))
            .expect(1)
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(server.uri(), 40));
        let reply = client.get_response("Hello").await.unwrap();

        assert_eq!(reply.message, "Hi!");
        assert_eq!(client.history_len().await, 3);
    }

    #[tokio::test]
    async fn test_api_error_keeps_history_clean() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(server.uri(), 40));
        let err = client.get_response("Hello").await.unwrap_err();

        let msg = format!("{:#}", err);
        assert!(msg.contains("500"), "unexpected error: {msg}");
        assert!(msg.contains("upstream down"), "unexpected error: {msg}");
        assert_eq!(client.history_len().await, 1);
    }

    #[tokio::test]
    async fn test_empty_choices_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(server.uri(), 40));
        let err = client.get_response("Hello").await.unwrap_err();

        assert!(err.to_string().contains("No response"));
        assert_eq!(client.history_len().await, 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(server.uri(), 40));
        assert!(client.get_response("Hello").await.is_err());
    }

    #[tokio::test]
    async fn test_history_is_sent_on_follow_up() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "messages": [
                    {"role": "system", "content": "You are a test."},
                    {"role": "user", "content": "first"},
                    {"role": "assistant", "content": "one"},
                    {"role": "user", "content": "second"}
                ]
            })))
            .respond_with(answer("two"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(answer("one"))
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(server.uri(), 40));
        assert_eq!(client.get_response("first").await.unwrap().message, "one");
        assert_eq!(client.get_response("second").await.unwrap().message, "two");
        assert_eq!(client.history_len().await, 5);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(answer("ok"))
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(server.uri(), 4));
        for i in 0..5 {
            client.get_response(&format!("msg {i}")).await.unwrap();
        }

        let history = client.history.lock().await;
        assert_eq!(history.len(), 5);
        assert_eq!(history[0].role, "system");
        assert_eq!(history[1].content.as_deref(), Some("msg 3"));
        assert_eq!(history[3].content.as_deref(), Some("msg 4"));
    }

    #[tokio::test]
    async fn test_odd_history_cap_drops_whole_exchanges() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(answer("ok"))
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(server.uri(), 3));
        for i in 0..3 {
            client.get_response(&format!("msg {i}")).await.unwrap();
        }

        let history = client.history.lock().await;
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, "system");
        assert_eq!(history[1].role, "user");
        assert_eq!(history[1].content.as_deref(), Some("msg 2"));
        assert_eq!(history[2].role, "assistant");
    }

    #[tokio::test]
    async fn test_reset_keeps_system_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(answer("ok"))
            .mount(&server)
            .await;

        let client = LlmClient::new(test_config(server.uri(), 40));
        client.get_response("hello").await.unwrap();
        client.reset_conversation().await.unwrap();

        let history = client.history.lock().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, "system");
        assert_eq!(history[0].content.as_deref(), Some("You are a test."));
    }
}
