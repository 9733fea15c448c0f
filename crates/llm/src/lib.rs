//! Language-model collaborators
//!
//! Two contracts are consumed by the pipeline:
//! - [`TextTransform`]: rephrase the user's QA content under a prompt template
//! - [`ImageDescriber`]: describe a photograph (scene and location)
//!
//! [`OpenAIClient`] implements both against any OpenAI-compatible chat endpoint.
//! Callers wrap each call in [`call_with_retry`] so a timeout or failure is
//! retried once before the caller degrades.

pub mod client;
pub mod prompts;

pub use client::OpenAIClient;
pub use prompts::PromptTemplate;

use async_trait::async_trait;
use magazine_common::QaMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// LLM call errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LlmError {
    #[error("API key not configured")]
    MissingApiKey,
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("API request failed with status {status}: {body}")]
    Api { status: u16, body: String },
    #[error("Failed to parse response: {0}")]
    Parse(String),
    #[error("Empty response from model")]
    EmptyResponse,
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Connection and sampling settings for the chat endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible API
    pub base_url: String,
    /// Bearer token (never serialized back out)
    #[serde(skip_serializing)]
    pub api_key: String,
    /// Model used for text transforms
    pub model: String,
    /// Model used for image descriptions
    pub vision_model: String,
    pub max_tokens: usize,
    pub temperature: f32,
    /// Per-call timeout
    pub timeout_secs: u64,
    /// Retries after the first attempt
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: std::env::var("OPENAI_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: std::env::var("OPENAI_API_KEY").unwrap_or_default(),
            model: "gpt-4o-mini".to_string(),
            vision_model: "gpt-4o".to_string(),
            max_tokens: 1500,
            temperature: 0.7,
            timeout_secs: 60,
            max_retries: 1,
        }
    }
}

impl LlmConfig {
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
        }
    }
}

/// Black-box text rephrasing under a named prompt template
#[async_trait]
pub trait TextTransform: Send + Sync {
    async fn transform(&self, template: PromptTemplate, qa: &QaMap) -> Result<String, LlmError>;
}

/// Free-text description of a photograph
#[async_trait]
pub trait ImageDescriber: Send + Sync {
    /// `mime` is the image content type, e.g. "image/jpeg"
    async fn describe(&self, image: &[u8], mime: &str) -> Result<String, LlmError>;
}

/// Timeout and retry budget for one collaborator call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 1,
        }
    }
}

/// Run `call` under the policy's timeout, retrying failed or timed-out attempts.
///
/// Returns the last error once the retries are spent.
pub async fn call_with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    mut call: F,
) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let attempts = policy.max_retries + 1;
    let mut last_error = LlmError::EmptyResponse;

    for attempt in 1..=attempts {
        match tokio::time::timeout(policy.timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                warn!("{} attempt {}/{} failed: {}", operation, attempt, attempts, e);
                last_error = e;
            }
            Err(_) => {
                warn!(
                    "{} attempt {}/{} timed out after {:?}",
                    operation, attempt, attempts, policy.timeout
                );
                last_error = LlmError::Timeout(policy.timeout);
            }
        }
    }

    Err(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_retry_succeeds_on_second_attempt() {
        let calls = AtomicU32::new(0);
        let result = call_with_retry(RetryPolicy::default(), "transform", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(LlmError::Http("connection reset".to_string()))
                } else {
                    Ok("ok")
                }
            }
        })
        .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_one_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<(), LlmError> = call_with_retry(RetryPolicy::default(), "transform", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(LlmError::EmptyResponse) }
        })
        .await;
        assert_eq!(result, Err(LlmError::EmptyResponse));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_times_out() {
        let policy = RetryPolicy {
            timeout: Duration::from_millis(50),
            max_retries: 1,
        };
        let result: Result<(), LlmError> = call_with_retry(policy, "transform", || async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(LlmError::Timeout(Duration::from_millis(50))));
        assert_eq!(
            LlmError::Timeout(Duration::from_millis(50)).to_string(),
            "Timed out after 50ms"
        );
    }

    #[test]
    fn test_default_config() {
        let config = LlmConfig::default();
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.retry_policy().max_retries, 1);
    }
}
