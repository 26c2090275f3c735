// Constants, potentially overridden from the environment (or a .env file).

use std::env;

// Use lazy_static to initialize static variables safely.
lazy_static::lazy_static! {
    /// Base URL of the OpenAI-compatible API the chat client talks to.
    pub static ref OPENAI_API_BASE: String =
        env::var("OPENAI_API_BASE").unwrap_or_else(|_| "https://api.aigc369.com/v1".to_string());
    /// Model requested on every completion call.
    pub static ref CHAT_MODEL: String =
        env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());
}

/// Greeting shown before any user interaction, and restored on clear.
pub const SEED_GREETING: &str = "你好，我是你的AI助手，有什么可以帮你的吗？";

/// Required prefix of a well-formed API key.
pub const API_KEY_PREFIX: &str = "sk-";

/// Title rendered on the chat page.
pub const PAGE_TITLE: &str = "克隆ChatGPT";

/// Cookie carrying the per-session id.
pub const SESSION_COOKIE: &str = "sid";
