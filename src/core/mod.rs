pub mod chat_loop;
pub mod config;
pub mod conversation;
pub mod engine;
pub mod session_store;
