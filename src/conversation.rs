use serde::{Deserialize, Serialize};

use crate::constants::SEED_GREETING;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Ai,
}

/// One entry in the displayed chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            role: Role::Ai,
            content: content.into(),
        }
    }
}

/// Ordered buffer of completed turns, sent as context on every call.
///
/// Only turns that produced a reply are recorded, so a turn that failed
/// remotely never leaks a dangling prompt into later context. The whole
/// buffer is sent each time (no windowing).
#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    turns: Vec<Message>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed human/ai exchange.
    pub fn record_turn(&mut self, prompt: impl Into<String>, reply: impl Into<String>) {
        self.turns.push(Message::human(prompt));
        self.turns.push(Message::ai(reply));
    }

    /// Messages to send ahead of the next prompt, oldest first.
    pub fn context(&self) -> &[Message] {
        &self.turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }
}

/// All state owned by one chat session: the displayed history and the
/// context buffer. The two are only ever reset together.
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub messages: Vec<Message>,
    pub memory: ConversationMemory,
}

impl ChatSession {
    /// A fresh session showing only the seed greeting.
    pub fn new() -> Self {
        Self {
            messages: vec![Message::ai(SEED_GREETING)],
            memory: ConversationMemory::new(),
        }
    }

    /// Reset history to the seed greeting and drop all remembered context.
    pub fn clear(&mut self) {
        self.messages = vec![Message::ai(SEED_GREETING)];
        self.memory.clear();
    }

    pub fn push_human(&mut self, content: impl Into<String>) {
        self.messages.push(Message::human(content));
    }

    pub fn push_ai(&mut self, content: impl Into<String>) {
        self.messages.push(Message::ai(content));
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}
