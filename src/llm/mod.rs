//! 언어 모델 완성(completion) 클라이언트
//!
//! `complete(messages, max_tokens, temperature) -> text` 계약만 노출합니다.
//! 실패는 할당량 초과와 일시 장애를 구분한 [`ServiceError`]로 돌려줍니다.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Service, ServiceError};
use crate::gemini::GeminiClient;

/// 기본 생성 모델
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// 대화 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// 생성 옵션
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionOptions {
    pub const fn new(max_tokens: u32, temperature: f32) -> Self {
        Self {
            max_tokens,
            temperature,
        }
    }
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self::new(1000, 0.3)
    }
}

// ============================================================================
// CompletionProvider Trait
// ============================================================================

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<String, ServiceError>;

    fn name(&self) -> &str;
}

// ============================================================================
// Gemini Completion
// ============================================================================

/// Gemini `generateContent` 구현체
#[derive(Debug, Clone)]
pub struct GeminiCompletion {
    client: GeminiClient,
    model: String,
}

impl GeminiCompletion {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_model(api_key, DEFAULT_MODEL)
    }

    pub fn with_model(api_key: String, model: &str) -> Result<Self> {
        Ok(Self {
            client: GeminiClient::new(api_key, Duration::from_secs(120))?,
            model: format!("models/{}", model.trim_start_matches("models/")),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(crate::gemini::get_api_key()?)
    }

    /// 메시지 목록을 Gemini 요청으로 변환
    ///
    /// system 메시지는 `systemInstruction`으로 합치고, assistant는 `model` 역할이 됩니다.
    fn build_request(messages: &[ChatMessage], options: CompletionOptions) -> GenerateRequest {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();

        let contents = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| Content {
                role: Some(
                    match m.role {
                        Role::Assistant => "model",
                        _ => "user",
                    }
                    .to_string(),
                ),
                parts: vec![Part {
                    text: m.content.clone(),
                }],
            })
            .collect();

        GenerateRequest {
            system_instruction: (!system.is_empty()).then(|| Content {
                role: None,
                parts: vec![Part {
                    text: system.join("\n\n"),
                }],
            }),
            contents,
            generation_config: GenerationConfig {
                temperature: options.temperature,
                max_output_tokens: options.max_tokens,
            },
        }
    }
}

#[async_trait]
impl CompletionProvider for GeminiCompletion {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<String, ServiceError> {
        let request = Self::build_request(messages, options);
        let body = self
            .client
            .post(Service::LanguageModel, &self.model, "generateContent", &request)
            .await?;

        let response: GenerateResponse = serde_json::from_str(&body).map_err(|e| {
            ServiceError::failed(Service::LanguageModel, format!("invalid response: {}", e))
        })?;

        let text = response
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ServiceError::failed(
                Service::LanguageModel,
                "empty completion",
            ));
        }

        Ok(text.trim().to_string())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Serialize)]
struct GenerateRequest {
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_request_moves_system_to_instruction() {
        let messages = vec![
            ChatMessage::system("계약서 내용만 근거로 답하세요."),
            ChatMessage::user("제2조가 뭐야?"),
            ChatMessage::assistant("제2조는 근로시간입니다."),
        ];
        let request = GeminiCompletion::build_request(&messages, CompletionOptions::default());
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(
            json["systemInstruction"]["parts"][0]["text"],
            "계약서 내용만 근거로 답하세요."
        );
        assert_eq!(json["contents"].as_array().unwrap().len(), 2);
        assert_eq!(json["contents"][1]["role"], "model");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 1000);
    }

    #[test]
    fn test_build_request_without_system() {
        let request = GeminiCompletion::build_request(
            &[ChatMessage::user("hi")],
            CompletionOptions::new(50, 0.0),
        );
        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn test_model_name_normalized() {
        let llm = GeminiCompletion::with_model("fake".to_string(), "models/gemini-pro").unwrap();
        assert_eq!(llm.name(), "models/gemini-pro");
        assert_eq!(
            crate::gemini::endpoint(llm.name(), "generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:generateContent"
        );
    }
}
