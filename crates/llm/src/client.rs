//! `OpenAI`-compatible chat client

use crate::prompts::IMAGE_DESCRIPTION_PROMPT;
use crate::{ImageDescriber, LlmConfig, LlmError, PromptTemplate, TextTransform};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine};
use magazine_common::QaMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// `OpenAI` API client
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    config: LlmConfig,
    http_client: reqwest::Client,
}

/// `OpenAI` Chat API request
#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: usize,
    temperature: f32,
}

/// Chat message (text or multimodal)
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    #[serde(flatten)]
    content: MessageContent,
}

/// Content of a message (either text or multimodal)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text { content: String },
    Multimodal { content: Vec<ContentPart> },
}

/// Content part for multimodal messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// Image URL with detail level
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ImageUrl {
    url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

/// `OpenAI` Chat API response
#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAIClient {
    /// Create a new client
    ///
    /// # Errors
    /// Returns an error if no API key is configured or HTTP client creation fails.
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        if config.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    #[must_use]
    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    /// Send a system + user chat completion and return the first choice's text
    ///
    /// # Errors
    /// Returns an error if the API request fails or response parsing fails.
    pub async fn chat_completion(&self, model: &str, system: &str, user: &str) -> Result<String, LlmError> {
        let request = ChatRequest {
            model: model.to_string(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: MessageContent::Text {
                        content: system.to_string(),
                    },
                },
                Message {
                    role: "user".to_string(),
                    content: MessageContent::Text {
                        content: user.to_string(),
                    },
                },
            ],
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        self.send(&request).await
    }

    /// Ask the vision model about one image
    ///
    /// # Errors
    /// Returns an error if the API request fails or response parsing fails.
    pub async fn vision_completion(&self, prompt: &str, image: &[u8], mime: &str) -> Result<String, LlmError> {
        let image_base64 = general_purpose::STANDARD.encode(image);
        let request = ChatRequest {
            model: self.config.vision_model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: MessageContent::Multimodal {
                    content: vec![
                        ContentPart::Text {
                            text: prompt.to_string(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: format!("data:{mime};base64,{image_base64}"),
                                detail: Some("low".to_string()),
                            },
                        },
                    ],
                },
            }],
            max_tokens: 300,
            temperature: 0.0,
        };

        self.send(&request).await
    }

    async fn send(&self, request: &ChatRequest) -> Result<String, LlmError> {
        debug!("Chat completion request: model={}", request.model);

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.config.base_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(Duration::from_secs(self.config.timeout_secs))
                } else {
                    LlmError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| LlmError::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: response_text,
            });
        }

        parse_chat_response(&response_text)
    }
}

fn parse_chat_response(body: &str) -> Result<String, LlmError> {
    let chat_response: ChatResponse =
        serde_json::from_str(body).map_err(|e| LlmError::Parse(e.to_string()))?;

    chat_response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or(LlmError::EmptyResponse)
}

#[async_trait]
impl TextTransform for OpenAIClient {
    async fn transform(&self, template: PromptTemplate, qa: &QaMap) -> Result<String, LlmError> {
        self.chat_completion(&self.config.model, template.system_prompt(), &template.render(qa))
            .await
    }
}

#[async_trait]
impl ImageDescriber for OpenAIClient {
    async fn describe(&self, image: &[u8], mime: &str) -> Result<String, LlmError> {
        self.vision_completion(IMAGE_DESCRIPTION_PROMPT, image, mime).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key() {
        let config = LlmConfig {
            api_key: String::new(),
            ..LlmConfig::default()
        };
        assert_eq!(OpenAIClient::new(config).unwrap_err(), LlmError::MissingApiKey);
    }

    #[test]
    fn test_parse_chat_response() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Q: Hi\nA: Hello"}}]}"#;
        assert_eq!(parse_chat_response(body).unwrap(), "Q: Hi\nA: Hello");

        let empty = r#"{"choices":[{"message":{"role":"assistant","content":"  "}}]}"#;
        assert_eq!(parse_chat_response(empty), Err(LlmError::EmptyResponse));

        let none = r#"{"choices":[]}"#;
        assert_eq!(parse_chat_response(none), Err(LlmError::EmptyResponse));

        assert!(matches!(parse_chat_response("not json"), Err(LlmError::Parse(_))));
    }

    #[test]
    fn test_multimodal_message_serialization() {
        let message = Message {
            role: "user".to_string(),
            content: MessageContent::Multimodal {
                content: vec![
                    ContentPart::Text {
                        text: "describe".to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: "data:image/png;base64,AA==".to_string(),
                            detail: None,
                        },
                    },
                ],
            },
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][1]["type"], "image_url");
        assert!(json["content"][1]["image_url"].get("detail").is_none());
    }

    #[tokio::test]
    #[ignore] // Requires OPENAI_API_KEY and network access
    async fn test_live_transform() {
        let client = OpenAIClient::new(LlmConfig::default()).unwrap();
        let qa = QaMap::Unstructured("We hiked to the lake at sunrise.".to_string());
        let text = client.transform(PromptTemplate::Essay, &qa).await.unwrap();
        assert!(!text.is_empty());
    }
}
