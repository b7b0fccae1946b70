//! Gemini API 공통 HTTP 계층
//!
//! 임베딩과 언어 모델 호출이 같은 API 키, 같은 속도 제한기, 같은 재시도 규칙을 공유합니다.
//!
//! 재시도 규칙:
//! - 429: 지수 백오프로 최대 3회 재시도 후 [`ServiceError::QuotaExceeded`]
//! - 네트워크 오류, 5xx: 1회 재시도 후 [`ServiceError::Transient`]
//! - 그 밖의 4xx: 즉시 [`ServiceError::Failed`]

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Service, ServiceError};

/// Gemini REST API 기본 주소
///
/// 모델 식별자가 `models/` 로 시작하므로 여기에는 붙이지 않습니다.
pub const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Rate Limiter 설정 (Gemini 무료 티어: 60 RPM)
const RATE_LIMIT_RPM: u32 = 60;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
/// 호출 간 최소 딜레이
const MIN_DELAY_MS: u64 = 1000;
/// 429 에러 시 최대 재시도 횟수
const MAX_QUOTA_RETRIES: u32 = 3;
/// 일시적 장애 재시도 횟수
const MAX_TRANSIENT_RETRIES: u32 = 1;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

// ============================================================================
// API Key Management
// ============================================================================

/// API 키 로드 (환경변수에서)
///
/// 우선순위:
/// 1. `GEMINI_API_KEY`
/// 2. `GOOGLE_AI_API_KEY`
pub fn get_api_key() -> Result<String> {
    for name in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
        if let Ok(key) = std::env::var(name) {
            if !key.is_empty() {
                tracing::debug!("Using API key from {}", name);
                return Ok(key);
            }
        }
    }

    anyhow::bail!(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable.\n\
         Get your API key at: https://aistudio.google.com/app/apikey"
    )
}

/// API 키 존재 여부 확인
pub fn has_api_key() -> bool {
    get_api_key().is_ok()
}

// ============================================================================
// Rate Limiter
// ============================================================================

/// 슬라이딩 윈도우 + 최소 간격 속도 제한기
#[derive(Debug)]
struct RateLimiter {
    requests: Vec<Instant>,
    max_requests: u32,
    window: Duration,
    min_delay: Duration,
    last_request: Option<Instant>,
}

impl RateLimiter {
    fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            requests: Vec::new(),
            max_requests,
            window,
            min_delay: Duration::from_millis(MIN_DELAY_MS),
            last_request: None,
        }
    }

    /// 요청 가능할 때까지 대기
    async fn acquire(&mut self) {
        // 1. 최소 딜레이 (버스트 방지)
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }

        // 2. 윈도우 밖의 오래된 요청 제거
        let now = Instant::now();
        self.requests.retain(|&t| now.duration_since(t) < self.window);

        // 3. 윈도우가 가득 찼으면 가장 오래된 요청이 빠질 때까지 대기
        if self.requests.len() >= self.max_requests as usize {
            if let Some(&oldest) = self.requests.first() {
                let wait_time = self.window.saturating_sub(now.duration_since(oldest));
                if !wait_time.is_zero() {
                    tracing::debug!("Rate limit reached, waiting {:?}", wait_time);
                    tokio::time::sleep(wait_time).await;
                }
                let now = Instant::now();
                self.requests.retain(|&t| now.duration_since(t) < self.window);
            }
        }

        // 4. 현재 요청 기록
        let now = Instant::now();
        self.requests.push(now);
        self.last_request = Some(now);
    }
}

// ============================================================================
// GeminiClient
// ============================================================================

/// Gemini API 에러 응답
#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

/// 속도 제한과 재시도를 갖춘 Gemini HTTP 클라이언트
///
/// 복제해도 속도 제한기는 공유됩니다.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    client: reqwest::Client,
    rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl GeminiClient {
    pub fn new(api_key: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
                RATE_LIMIT_RPM,
                RATE_LIMIT_WINDOW,
            ))),
        })
    }

    pub fn from_env(timeout: Duration) -> Result<Self> {
        Self::new(get_api_key()?, timeout)
    }

    /// [`endpoint`] 로 JSON POST 후 응답 본문 반환
    pub async fn post<B: Serialize + ?Sized>(
        &self,
        service: Service,
        model: &str,
        method: &str,
        body: &B,
    ) -> Result<String, ServiceError> {
        let url = endpoint(model, method);
        let mut quota_attempts = 0;
        let mut transient_attempts = 0;

        loop {
            {
                let mut limiter = self.rate_limiter.lock().await;
                limiter.acquire().await;
            }

            // API 키는 URL이 아닌 헤더로 전송
            let response = match self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .json(body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    if transient_attempts < MAX_TRANSIENT_RETRIES {
                        transient_attempts += 1;
                        tracing::warn!("{} request failed, retrying once: {}", service, e);
                        tokio::time::sleep(Duration::from_millis(INITIAL_BACKOFF_MS)).await;
                        continue;
                    }
                    return Err(ServiceError::transient(service, e.to_string()));
                }
            };

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| ServiceError::transient(service, e.to_string()))?;

            if status.is_success() {
                return Ok(text);
            }

            let detail = error_detail(status, &text);

            if status.as_u16() == 429 {
                if quota_attempts < MAX_QUOTA_RETRIES {
                    let backoff =
                        Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(quota_attempts));
                    quota_attempts += 1;
                    tracing::warn!(
                        "{} rate limit hit (429), backing off {:?} (attempt {}/{})",
                        service,
                        backoff,
                        quota_attempts,
                        MAX_QUOTA_RETRIES
                    );
                    tokio::time::sleep(backoff).await;
                    continue;
                }
                return Err(ServiceError::quota(service, detail));
            }

            if status.is_server_error() {
                if transient_attempts < MAX_TRANSIENT_RETRIES {
                    transient_attempts += 1;
                    tracing::warn!("{} returned {}, retrying once", service, status);
                    tokio::time::sleep(Duration::from_millis(INITIAL_BACKOFF_MS)).await;
                    continue;
                }
                return Err(ServiceError::transient(service, detail));
            }

            return Err(ServiceError::failed(service, detail));
        }
    }
}

/// `{GEMINI_API_BASE}/models/{model}:{method}`
///
/// `model` 은 `models/` 접두어가 있든 없든 같은 주소가 됩니다.
pub fn endpoint(model: &str, method: &str) -> String {
    format!(
        "{}/models/{}:{}",
        GEMINI_API_BASE,
        model.trim_start_matches("models/"),
        method
    )
}

/// 에러 응답 본문에서 사람이 읽을 메시지 추출
fn error_detail(status: reqwest::StatusCode, body: &str) -> String {
    match serde_json::from_str::<GeminiError>(body) {
        Ok(error) => format!("{} ({}): {}", status, error.error.status, error.error.message),
        Err(_) => format!("{}: {}", status, body.chars().take(200).collect::<String>()),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_has_single_models_segment() {
        assert_eq!(
            endpoint("models/gemini-embedding-001", "embedContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:embedContent"
        );
        assert_eq!(
            endpoint("models/gemini-2.0-flash", "generateContent"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert_eq!(
            endpoint("gemini-2.0-flash", "generateContent"),
            endpoint("models/gemini-2.0-flash", "generateContent")
        );
    }

    #[test]
    fn test_error_detail_parses_gemini_error() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded","status":"RESOURCE_EXHAUSTED"}}"#;
        let detail = error_detail(reqwest::StatusCode::TOO_MANY_REQUESTS, body);
        assert!(detail.contains("RESOURCE_EXHAUSTED"));
        assert!(detail.contains("Quota exceeded"));
    }

    #[test]
    fn test_error_detail_truncates_raw_body() {
        let body = "x".repeat(1000);
        let detail = error_detail(reqwest::StatusCode::BAD_GATEWAY, &body);
        assert!(detail.len() < 300);
    }

    #[tokio::test]
    async fn test_rate_limiter_enforces_window() {
        let mut limiter = RateLimiter::new(2, Duration::from_millis(50));
        limiter.min_delay = Duration::ZERO;

        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
