//! Deterministic in-process provider for wiring and tests.

use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{ChatProvider, ChatRequest, ChatResponse, ProviderError, ProviderResult};

enum Scripted {
    Content(String),
    Failure(String),
}

/// Provider that replays scripted responses, then echoes the prompt.
///
/// Each call pops the next scripted entry; once the script is exhausted the
/// provider answers with a deterministic echo of the request prompt. An
/// optional per-call delay simulates provider latency.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Scripted>>,
    delay: Option<Duration>,
    cost_per_call: f64,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            delay: None,
            cost_per_call: 0.0,
        }
    }

    /// Queue a successful response.
    pub fn with_response(self, content: impl Into<String>) -> Self {
        self.script
            .lock()
            .push_back(Scripted::Content(content.into()));
        self
    }

    /// Queue a failure.
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .push_back(Scripted::Failure(message.into()));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_cost(mut self, cost_per_call: f64) -> Self {
        self.cost_per_call = cost_per_call;
        self
    }

    /// Queue a response after construction (shared-provider tests).
    pub fn push_response(&self, content: impl Into<String>) {
        self.script
            .lock()
            .push_back(Scripted::Content(content.into()));
    }

    pub fn push_failure(&self, message: impl Into<String>) {
        self.script
            .lock()
            .push_back(Scripted::Failure(message.into()));
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ChatRequest) -> ProviderResult<ChatResponse> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        match next {
            Some(Scripted::Content(content)) => Ok(ChatResponse::new(content, self.cost_per_call)),
            Some(Scripted::Failure(message)) => Err(ProviderError::Request(message)),
            None => Ok(ChatResponse::new(
                format!("[{}:{}] {}", self.name, request.model, request.prompt),
                self.cost_per_call,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_then_echo() {
        let provider = ScriptedProvider::new("scripted")
            .with_response("first")
            .with_failure("second fails");

        let first = provider
            .complete(ChatRequest::new("m", "ignored"))
            .await
            .unwrap();
        assert_eq!(first.content, "first");

        let second = provider.complete(ChatRequest::new("m", "ignored")).await;
        assert!(matches!(second, Err(ProviderError::Request(_))));

        let third = provider
            .complete(ChatRequest::new("m", "echo me"))
            .await
            .unwrap();
        assert!(third.content.contains("echo me"));
    }

    #[tokio::test]
    async fn test_cost_accounting() {
        let provider = ScriptedProvider::new("scripted").with_cost(0.25);
        let response = provider
            .complete(ChatRequest::new("m", "hello"))
            .await
            .unwrap();
        assert_eq!(response.cost, 0.25);
    }
}
