//! Model backend trait and test double

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use callflow_config::LlmSettings;

use crate::prompt::Message;
use crate::LlmError;

/// A single request to the model backend.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    /// Ordered messages: system context, history, instruction
    pub messages: Vec<Message>,
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum tokens to generate
    pub max_tokens: usize,
}

impl ChatRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            temperature: 0.7,
            max_tokens: 256,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// Language model backend.
///
/// Single request/response; streaming backends adapt by buffering. Wrap the
/// backend in [`TimeoutModel`] once at construction; implementations carry
/// no timeout of their own.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError>;
}

/// Hard per-call timeout around an inner model.
///
/// Composed once where the backend is constructed, so every consumer of the
/// shared handle gets the same deadline.
pub struct TimeoutModel {
    inner: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl TimeoutModel {
    pub fn new(inner: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn from_settings(inner: Arc<dyn LanguageModel>, settings: &LlmSettings) -> Self {
        Self::new(inner, Duration::from_secs(settings.timeout_secs))
    }
}

#[async_trait]
impl LanguageModel for TimeoutModel {
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        tokio::time::timeout(self.timeout, self.inner.complete(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))?
    }
}

/// Scripted model for tests and offline runs.
///
/// Replies with queued responses in order, then falls back to a fixed
/// default. An optional artificial delay makes cancellation windows
/// observable in tests.
pub struct ScriptedModel {
    responses: Mutex<VecDeque<String>>,
    fallback: String,
    delay: Option<Duration>,
    calls: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            fallback: "I understand.".to_string(),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// A model that always answers with the same text
    pub fn always(response: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: response.into(),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Add an artificial per-call delay
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of completed calls
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Requests seen so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: ChatRequest) -> Result<String, LlmError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.calls.lock().push(request);

        let response = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(response)
    }
}
