//! Scoring backend abstraction.
//!
//! Defines the `ScoringBackend` trait: one prompt in, free-form text out.
//! Concrete HTTP adapters live in [`crate::providers`]; [`MockBackend`] serves
//! tests and dry runs.

use crate::error::LlmError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A system instruction plus the user message carrying the graded material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoringPrompt {
    pub system: String,
    pub user: String,
}

/// A text-generation service that scores a prompt.
#[async_trait]
pub trait ScoringBackend: Send + Sync {
    /// Generate a response for the prompt.
    async fn generate(&self, prompt: &ScoringPrompt) -> Result<String, LlmError>;

    /// Provider name used in logs.
    fn name(&self) -> &str;

    /// Return the model name.
    fn model_name(&self) -> &str;
}

/// A scripted backend for testing and development.
///
/// Responses are returned in the order they were queued. Once the queue is
/// empty every call fails with a connection error.
pub struct MockBackend {
    model: String,
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Create a MockBackend that answers every call with `text`.
    ///
    /// Queues multiple copies of the response so it can handle multiple calls.
    pub fn with_response(text: &str) -> Self {
        let backend = Self::new();
        for _ in 0..64 {
            backend.queue_response(text);
        }
        backend
    }

    /// Queue a response for a future `generate` call.
    pub fn queue_response(&self, text: impl Into<String>) {
        self.push(Ok(text.into()));
    }

    /// Queue a failure for a future `generate` call.
    pub fn queue_error(&self, err: LlmError) {
        self.push(Err(err));
    }

    /// Number of `generate` calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn push(&self, item: Result<String, LlmError>) {
        match self.responses.lock() {
            Ok(mut queue) => queue.push_back(item),
            Err(poisoned) => poisoned.into_inner().push_back(item),
        }
    }

    fn pop(&self) -> Option<Result<String, LlmError>> {
        match self.responses.lock() {
            Ok(mut queue) => queue.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScoringBackend for MockBackend {
    async fn generate(&self, _prompt: &ScoringPrompt) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pop().unwrap_or_else(|| {
            Err(LlmError::Connection {
                message: "mock backend has no queued responses".to_string(),
            })
        })
    }

    fn name(&self) -> &str {
        "mock"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
