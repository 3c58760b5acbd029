//! LLM integration
//!
//! Provides:
//! - An HTTP session factory for pooling `reqwest` clients
//! - A chat client whose calls go through the cache, breaker, retry and pool

mod client;

pub use client::{ChatClient, ChatMessage, HttpSessionFactory, LLMClient};
