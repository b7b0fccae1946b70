//! 에러 분류 체계
//!
//! 파이프라인 경계에서 사용자에게 노출되는 에러는 모두 [`RagError`]로 수렴합니다.
//! 각 에러는 기계 판별용 [`ErrorCode`]와 언어별 안내 문구를 가집니다.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::language::Language;

// ============================================================================
// External Services
// ============================================================================

/// 외부 서비스 구분
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Service {
    Embedding,
    LanguageModel,
    VectorStore,
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Service::Embedding => "embedding service",
            Service::LanguageModel => "language model",
            Service::VectorStore => "vector store",
        };
        f.write_str(name)
    }
}

/// 외부 서비스 호출 실패
///
/// 할당량 초과(재시도 금지)와 일시적 장애(1회 재시도 가능)를 구분합니다.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("{service} quota exceeded: {message}")]
    QuotaExceeded { service: Service, message: String },

    #[error("{service} temporarily unavailable: {message}")]
    Transient { service: Service, message: String },

    #[error("{service} request failed: {message}")]
    Failed { service: Service, message: String },
}

impl ServiceError {
    pub fn quota(service: Service, message: impl Into<String>) -> Self {
        Self::QuotaExceeded {
            service,
            message: message.into(),
        }
    }

    pub fn transient(service: Service, message: impl Into<String>) -> Self {
        Self::Transient {
            service,
            message: message.into(),
        }
    }

    pub fn failed(service: Service, message: impl Into<String>) -> Self {
        Self::Failed {
            service,
            message: message.into(),
        }
    }

    pub fn is_quota(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

// ============================================================================
// Pipeline Errors
// ============================================================================

/// 파이프라인 에러
#[derive(Debug, Error)]
pub enum RagError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("text extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("session data expired or missing: {0}")]
    StorageIntegrity(String),

    #[error("document not found: {0}")]
    DocumentNotFound(String),

    #[error("storage error: {0}")]
    Storage(String),
}

pub type RagResult<T> = std::result::Result<T, RagError>;

impl RagError {
    /// anyhow 에러를 저장소 에러로 변환 (원인 체인 포함)
    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{:#}", err))
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            RagError::UnsupportedFormat(_) => ErrorCode::UnsupportedFormat,
            RagError::ExtractionFailed(_) => ErrorCode::ExtractionFailed,
            RagError::InvalidInput(_) => ErrorCode::InvalidInput,
            RagError::Service(ServiceError::QuotaExceeded { .. }) => ErrorCode::QuotaExceeded,
            RagError::Service(_) => ErrorCode::ServiceUnavailable,
            RagError::StorageIntegrity(_) => ErrorCode::SessionExpired,
            RagError::DocumentNotFound(_) => ErrorCode::NotFound,
            RagError::Storage(_) => ErrorCode::Internal,
        }
    }

    /// 사용자에게 보여줄 안내 문구 (내부 상세는 포함하지 않음)
    pub fn user_message(&self, language: Language) -> String {
        language.messages().for_code(self.code()).to_string()
    }
}

/// 기계 판별용 에러 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidInput,
    UnsupportedFormat,
    ExtractionFailed,
    QuotaExceeded,
    ServiceUnavailable,
    SessionExpired,
    NotFound,
    Internal,
}

impl ErrorCode {
    /// 4xx 계열 (입력 문제, 재시도 무의미)
    pub fn is_client_error(self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidInput
                | ErrorCode::UnsupportedFormat
                | ErrorCode::ExtractionFailed
                | ErrorCode::SessionExpired
                | ErrorCode::NotFound
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "invalid_input",
            ErrorCode::UnsupportedFormat => "unsupported_format",
            ErrorCode::ExtractionFailed => "extraction_failed",
            ErrorCode::QuotaExceeded => "quota_exceeded",
            ErrorCode::ServiceUnavailable => "service_unavailable",
            ErrorCode::SessionExpired => "session_expired",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_and_transient_codes_differ() {
        let quota: RagError = ServiceError::quota(Service::LanguageModel, "429").into();
        let transient: RagError = ServiceError::transient(Service::LanguageModel, "timeout").into();

        assert_eq!(quota.code(), ErrorCode::QuotaExceeded);
        assert_eq!(transient.code(), ErrorCode::ServiceUnavailable);
        assert_ne!(
            quota.user_message(Language::Korean),
            transient.user_message(Language::Korean)
        );
    }

    #[test]
    fn test_user_message_hides_internal_detail() {
        let err = RagError::Storage("SQLITE_BUSY at /home/user/.legal-rag/legal.db".to_string());
        let message = err.user_message(Language::English);
        assert!(!message.contains("SQLITE_BUSY"));
        assert_eq!(err.code(), ErrorCode::Internal);
    }

    #[test]
    fn test_error_code_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorCode::SessionExpired).unwrap();
        assert_eq!(json, "\"session_expired\"");
        assert!(ErrorCode::SessionExpired.is_client_error());
        assert!(!ErrorCode::QuotaExceeded.is_client_error());
    }
}
