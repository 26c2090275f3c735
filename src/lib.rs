pub mod constants;
pub mod conversation;
pub mod llm;
pub mod session;
pub mod web_server;
