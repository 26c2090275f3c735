use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::constants::API_KEY_PREFIX;
use crate::conversation::ChatSession;
use crate::llm::ChatClient;

/// Local validation failures for the user-supplied API key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("no API key supplied")]
    Missing,
    #[error("API key does not start with `{API_KEY_PREFIX}`")]
    Malformed,
}

/// Check the key format before any call is attempted. Pure, no side
/// effects, never retried.
pub fn validate_api_key(api_key: &str) -> Result<(), KeyError> {
    if api_key.is_empty() {
        return Err(KeyError::Missing);
    }
    if !api_key.starts_with(API_KEY_PREFIX) {
        return Err(KeyError::Malformed);
    }
    Ok(())
}

/// Result of one submitted prompt, for the view layer to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Reply appended to history and recorded into memory.
    Replied,
    /// Blank prompt: nothing mutated, no call made.
    EmptyPrompt,
    /// No key supplied: halted before any call.
    MissingKey,
    /// Key failed the prefix check: halted before any call.
    MalformedKey,
    /// The remote call failed; the user's own message stays in history.
    RemoteFailed(String),
}

/// Run one turn against `session`.
///
/// The human message is appended before the remote call, so it survives a
/// failed call; memory only records completed exchanges.
pub async fn submit_turn(
    session: &mut ChatSession,
    client: &ChatClient,
    prompt: &str,
    api_key: &str,
) -> TurnOutcome {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return TurnOutcome::EmptyPrompt;
    }
    match validate_api_key(api_key) {
        Err(KeyError::Missing) => return TurnOutcome::MissingKey,
        Err(KeyError::Malformed) => return TurnOutcome::MalformedKey,
        Ok(()) => {}
    }

    session.push_human(prompt);

    match client.respond(prompt, &session.memory, api_key).await {
        Ok(reply) => {
            session.push_ai(&reply);
            session.memory.record_turn(prompt, &reply);
            debug!(history_len = session.messages.len(), "Turn completed");
            TurnOutcome::Replied
        }
        Err(e) => {
            warn!(error = %e, "Completion call failed; keeping user message");
            TurnOutcome::RemoteFailed(e.to_string())
        }
    }
}

/// In-process store of per-session chat state, keyed by the session cookie.
///
/// Each session sits behind its own async mutex, so a session runs at most
/// one turn at a time while sessions stay fully independent.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, Arc<AsyncMutex<ChatSession>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the session's state, seeding a fresh one on first use.
    pub fn session(&self, id: Uuid) -> Arc<AsyncMutex<ChatSession>> {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions
            .entry(id)
            .or_insert_with(|| Arc::new(AsyncMutex::new(ChatSession::new())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SEED_GREETING;
    use crate::conversation::Message;

    // A client pointed at an unroutable endpoint; tests using it must never
    // actually reach the network.
    fn offline_client() -> ChatClient {
        ChatClient::with_endpoint("http://127.0.0.1:9", "gpt-3.5-turbo")
    }

    #[test]
    fn key_validation_distinguishes_missing_from_malformed() {
        assert_eq!(validate_api_key(""), Err(KeyError::Missing));
        assert_eq!(validate_api_key("banana"), Err(KeyError::Malformed));
        assert_eq!(validate_api_key("sk-test-123"), Ok(()));
    }

    #[tokio::test]
    async fn blank_prompt_is_a_no_op() {
        let mut session = ChatSession::new();
        let outcome = submit_turn(&mut session, &offline_client(), "   ", "sk-test").await;
        assert_eq!(outcome, TurnOutcome::EmptyPrompt);
        assert_eq!(session.messages, vec![Message::ai(SEED_GREETING)]);
        assert!(session.memory.is_empty());
    }

    #[tokio::test]
    async fn missing_key_halts_before_any_mutation() {
        let mut session = ChatSession::new();
        let outcome = submit_turn(&mut session, &offline_client(), "你好", "").await;
        assert_eq!(outcome, TurnOutcome::MissingKey);
        assert_eq!(session.messages.len(), 1);
        assert!(session.memory.is_empty());
    }

    #[tokio::test]
    async fn malformed_key_halts_with_a_distinct_outcome() {
        let mut session = ChatSession::new();
        let outcome = submit_turn(&mut session, &offline_client(), "你好", "pk-nope").await;
        assert_eq!(outcome, TurnOutcome::MalformedKey);
        assert_eq!(session.messages.len(), 1);
    }

    #[tokio::test]
    async fn failed_remote_call_keeps_the_user_message() {
        let mut session = ChatSession::new();
        let outcome = submit_turn(&mut session, &offline_client(), "你好", "sk-test").await;
        assert!(matches!(outcome, TurnOutcome::RemoteFailed(_)));
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[1], Message::human("你好"));
        assert!(session.memory.is_empty());
    }

    #[test]
    fn store_hands_out_the_same_session_for_the_same_id() {
        let store = SessionStore::new();
        let id = Uuid::new_v4();
        let first = store.session(id);
        let second = store.session(id);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);

        let other = store.session(Uuid::new_v4());
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(store.len(), 2);
    }
}
