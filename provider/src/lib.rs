//! LLM provider abstraction.
//!
//! The orchestration core talks to chat-style LLMs through [`ChatProvider`].
//! Concrete network-backed clients live outside this workspace; the core only
//! depends on this trait, the process-wide [`ProviderCache`], and the
//! deterministic [`ScriptedProvider`] used for wiring and tests.

pub mod cache;
pub mod scripted;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cache::{ProviderCache, ProviderKey};
pub use scripted::ScriptedProvider;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider could not be constructed or reached at all.
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    /// The provider rejected or failed a specific request.
    #[error("provider request failed: {0}")]
    Request(String),

    /// The request exceeded its deadline.
    #[error("provider call timed out after {0:.1}s")]
    Timeout(f64),
}

/// One chat completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: None,
            prompt: prompt.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

/// One chat completion response with accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    /// Monetary cost of the call in USD.
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
}

impl ChatResponse {
    pub fn new(content: impl Into<String>, cost: f64) -> Self {
        Self {
            content: content.into(),
            cost,
            input_tokens: None,
            output_tokens: None,
        }
    }
}

/// Uniform interface to chat-style LLMs.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider name, e.g. `"anthropic"` or `"scripted"`.
    fn name(&self) -> &str;

    async fn complete(&self, request: ChatRequest) -> ProviderResult<ChatResponse>;
}

impl fmt::Debug for dyn ChatProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatProvider")
            .field("name", &self.name())
            .finish()
    }
}
