use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error};

use crate::constants;
use crate::conversation::{ConversationMemory, Role};

/// Failure modes of one completion call. All variants are propagated to the
/// caller; nothing here is rendered or retried.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("request to the chat endpoint failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("the chat endpoint rejected the API key: {0}")]
    Auth(String),
    #[error("the chat endpoint returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("the chat endpoint returned no completion text")]
    EmptyResponse,
}

// Structures matching the OpenAI /chat/completions endpoint.
#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize, Debug, PartialEq)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Client for the fixed completion endpoint. The endpoint and model are
/// bound at construction; the API key travels with each call.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl ChatClient {
    /// Client bound to the configured endpoint and model.
    pub fn new() -> Self {
        Self::with_endpoint(constants::OPENAI_API_BASE.clone(), constants::CHAT_MODEL.clone())
    }

    /// Client bound to an explicit endpoint, used by tests to point at a
    /// local stand-in server.
    pub fn with_endpoint(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
        }
    }

    /// Send `prompt` with the full remembered context and return the reply.
    ///
    /// One blocking request per invocation: no retries, no caching, no
    /// timeout beyond the client default.
    pub async fn respond(
        &self,
        prompt: &str,
        memory: &ConversationMemory,
        api_key: &str,
    ) -> Result<String, ChatError> {
        let payload = CompletionRequest {
            model: &self.model,
            messages: wire_messages(memory, prompt),
        };
        let url = format!("{}/chat/completions", self.base_url);

        debug!(%url, context_len = memory.len(), "Sending completion request");

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".to_string());
            error!(%status, %body, "Completion request failed");
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(ChatError::Auth(body));
            }
            return Err(ChatError::Api { status, body });
        }

        let completion = response.json::<CompletionResponse>().await?;
        let reply = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(ChatError::EmptyResponse)?;

        debug!(reply_len = reply.len(), "Received completion");
        Ok(reply.trim().to_string())
    }
}

impl Default for ChatClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Remembered turns followed by the new prompt, mapped to wire roles.
fn wire_messages<'a>(memory: &'a ConversationMemory, prompt: &'a str) -> Vec<WireMessage<'a>> {
    let mut messages: Vec<WireMessage<'a>> = memory
        .context()
        .iter()
        .map(|message| WireMessage {
            role: match message.role {
                Role::Human => "user",
                Role::Ai => "assistant",
            },
            content: &message.content,
        })
        .collect();
    messages.push(WireMessage {
        role: "user",
        content: prompt,
    });
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_messages_appends_prompt_after_full_context() {
        let mut memory = ConversationMemory::new();
        memory.record_turn("牛顿提出过哪些知名的定律？", "牛顿三大运动定律和万有引力定律。");

        let messages = wire_messages(&memory, "我上一个问题问的是？");

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[0].content, "牛顿提出过哪些知名的定律？");
        assert_eq!(messages[1].role, "assistant");
        assert_eq!(messages[2].role, "user");
        assert_eq!(messages[2].content, "我上一个问题问的是？");
    }

    #[test]
    fn wire_messages_with_empty_memory_is_just_the_prompt() {
        let memory = ConversationMemory::new();
        let messages = wire_messages(&memory, "你好");
        assert_eq!(
            messages,
            vec![WireMessage {
                role: "user",
                content: "你好"
            }]
        );
    }
}
