//! 임베딩 모듈 - Gemini API를 통한 텍스트 벡터화
//!
//! 청크 색인과 질문 검색 양쪽에서 호출됩니다.
//! 문서 청크는 `batchEmbedContents`로 최대 100개씩 묶어 보내고,
//! 배치 사이에 잠시 쉬어 속도 제한을 지킵니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = GeminiEmbedding::from_env()?;
//! let report = embed_in_batches(&embedder, &texts, 100, Duration::from_millis(500)).await;
//! ```

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::MAX_EMBED_BATCH;
use crate::error::{Service, ServiceError};
use crate::gemini::GeminiClient;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 문서 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError>;

    /// 검색 질의 임베딩 (기본 구현: 문서 임베딩과 동일)
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        self.embed(text).await
    }

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Google Gemini Embedding
// ============================================================================

const EMBEDDING_MODEL: &str = "models/gemini-embedding-001";

/// 기본 임베딩 차원
pub const DEFAULT_DIMENSION: usize = 768;

/// Gemini 임베딩 구현체
///
/// source: https://ai.google.dev/gemini-api/docs/embeddings
#[derive(Debug, Clone)]
pub struct GeminiEmbedding {
    client: GeminiClient,
    dimension: usize,
}

impl GeminiEmbedding {
    pub fn new(api_key: String) -> Result<Self> {
        Self::with_dimension(api_key, DEFAULT_DIMENSION)
    }

    /// 차원을 지정하여 생성 (768, 1536, 3072 중 선택)
    pub fn with_dimension(api_key: String, dimension: usize) -> Result<Self> {
        if ![768, 1536, 3072].contains(&dimension) {
            anyhow::bail!(
                "Invalid dimension: {}. Must be 768, 1536, or 3072",
                dimension
            );
        }

        Ok(Self {
            client: GeminiClient::new(api_key, Duration::from_secs(30))?,
            dimension,
        })
    }

    /// 환경변수에서 API 키를 읽어 생성
    pub fn from_env() -> Result<Self> {
        Self::new(crate::gemini::get_api_key()?)
    }

    fn request(&self, text: &str, task: TaskType) -> EmbedRequest {
        EmbedRequest {
            model: EMBEDDING_MODEL.to_string(),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type: task,
            output_dimensionality: Some(self.dimension),
        }
    }

    async fn embed_one(&self, text: &str, task: TaskType) -> Result<Vec<f32>, ServiceError> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let body = self
            .client
            .post(Service::Embedding, EMBEDDING_MODEL, "embedContent", &self.request(text, task))
            .await?;

        let response: EmbedResponse = serde_json::from_str(&body).map_err(|e| {
            ServiceError::failed(Service::Embedding, format!("invalid response: {}", e))
        })?;
        Ok(response.embedding.values)
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
enum TaskType {
    RetrievalDocument,
    RetrievalQuery,
}

/// Gemini API 요청 본문
#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: TaskType,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct BatchEmbedRequest {
    requests: Vec<EmbedRequest>,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        self.embed_one(text, TaskType::RetrievalDocument).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        self.embed_one(text, TaskType::RetrievalQuery).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        if texts.len() > MAX_EMBED_BATCH {
            return Err(ServiceError::failed(
                Service::Embedding,
                format!("batch of {} exceeds limit {}", texts.len(), MAX_EMBED_BATCH),
            ));
        }

        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|t| self.request(t, TaskType::RetrievalDocument))
                .collect(),
        };

        let body = self
            .client
            .post(Service::Embedding, EMBEDDING_MODEL, "batchEmbedContents", &request)
            .await?;

        let response: BatchEmbedResponse = serde_json::from_str(&body).map_err(|e| {
            ServiceError::failed(Service::Embedding, format!("invalid batch response: {}", e))
        })?;

        if response.embeddings.len() != texts.len() {
            return Err(ServiceError::failed(
                Service::Embedding,
                format!(
                    "expected {} embeddings, got {}",
                    texts.len(),
                    response.embeddings.len()
                ),
            ));
        }

        Ok(response.embeddings.into_iter().map(|e| e.values).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "gemini-embedding-001"
    }
}

// ============================================================================
// Batched Indexing
// ============================================================================

/// 배치 임베딩 결과
///
/// `vectors[i]`는 `texts[i]`의 임베딩이며, 실패한 배치의 항목은 `None`입니다.
#[derive(Debug, Default)]
pub struct EmbeddingReport {
    pub vectors: Vec<Option<Vec<f32>>>,
    pub failed_batches: usize,
    /// 중단을 일으킨 마지막 에러
    pub last_error: Option<ServiceError>,
}

impl EmbeddingReport {
    pub fn embedded_count(&self) -> usize {
        self.vectors.iter().filter(|v| v.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.failed_batches == 0 && self.vectors.iter().all(Option::is_some)
    }
}

/// 텍스트를 배치로 나눠 임베딩
///
/// 한 배치가 실패해도 나머지는 계속 진행합니다.
/// 할당량 초과가 나면 이후 배치는 보내지 않습니다.
pub async fn embed_in_batches(
    embedder: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
    pause: Duration,
) -> EmbeddingReport {
    let batch_size = batch_size.clamp(1, MAX_EMBED_BATCH);
    let total_batches = texts.len().div_ceil(batch_size);
    let mut report = EmbeddingReport {
        vectors: Vec::with_capacity(texts.len()),
        ..Default::default()
    };

    for (i, batch) in texts.chunks(batch_size).enumerate() {
        if i > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        tracing::debug!("Embedding batch {}/{} ({} texts)", i + 1, total_batches, batch.len());

        match embedder.embed_batch(batch).await {
            Ok(vectors) => report.vectors.extend(vectors.into_iter().map(Some)),
            Err(e) => {
                tracing::warn!("Embedding batch {}/{} failed: {}", i + 1, total_batches, e);
                report.failed_batches += 1;
                report.vectors.extend(std::iter::repeat_with(|| None).take(batch.len()));

                let stop = e.is_quota();
                report.last_error = Some(e);
                if stop {
                    let remaining = texts.len() - report.vectors.len();
                    report.failed_batches += total_batches - (i + 1);
                    report
                        .vectors
                        .extend(std::iter::repeat_with(|| None).take(remaining));
                    break;
                }
            }
        }
    }

    tracing::info!(
        "Embedded {}/{} texts ({} failed batches)",
        report.embedded_count(),
        texts.len(),
        report.failed_batches
    );
    report
}

/// 임베딩 프로바이더 생성 (Gemini API)
pub fn create_embedder() -> Result<GeminiEmbedding> {
    if !crate::gemini::has_api_key() {
        anyhow::bail!(
            "GEMINI_API_KEY or GOOGLE_AI_API_KEY not set.\n\
             Set: export GEMINI_API_KEY=your-api-key\n\
             Get your API key at: https://aistudio.google.com/app/apikey"
        );
    }

    let embedder = GeminiEmbedding::from_env()?;
    tracing::info!(
        "Using Gemini API embedding (dimension: {})",
        embedder.dimension()
    );
    Ok(embedder)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingEmbedder, StubEmbedder};

    #[test]
    fn test_invalid_dimension() {
        let result = GeminiEmbedding::with_dimension("fake_key".to_string(), 999);
        assert!(result
            .err()
            .map(|e| e.to_string().contains("Invalid dimension"))
            .unwrap_or(false));
    }

    #[test]
    fn test_valid_dimensions() {
        for dim in [768, 1536, 3072] {
            assert!(GeminiEmbedding::with_dimension("fake_key".to_string(), dim).is_ok());
        }
    }

    #[test]
    fn test_embedding_endpoint() {
        assert_eq!(
            crate::gemini::endpoint(EMBEDDING_MODEL, "batchEmbedContents"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:batchEmbedContents"
        );
    }

    #[test]
    fn test_task_type_serialization() {
        let json = serde_json::to_string(&TaskType::RetrievalQuery).unwrap();
        assert_eq!(json, "\"RETRIEVAL_QUERY\"");
    }

    #[tokio::test]
    async fn test_embed_in_batches_splits_requests() {
        let embedder = StubEmbedder::new(8);
        let texts: Vec<String> = (0..25).map(|i| format!("조항 {}", i)).collect();

        let report = embed_in_batches(&embedder, &texts, 10, Duration::ZERO).await;

        assert!(report.is_complete());
        assert_eq!(report.vectors.len(), 25);
        assert_eq!(embedder.batch_calls(), 3);
    }

    #[tokio::test]
    async fn test_partial_batch_failure_is_tolerated() {
        // 두 번째 배치만 실패
        let embedder = FailingEmbedder::transient_on_batch(8, 1);
        let texts: Vec<String> = (0..6).map(|i| format!("text {}", i)).collect();

        let report = embed_in_batches(&embedder, &texts, 2, Duration::ZERO).await;

        assert_eq!(report.vectors.len(), 6);
        assert_eq!(report.failed_batches, 1);
        assert_eq!(report.embedded_count(), 4);
        assert!(report.vectors[2].is_none() && report.vectors[3].is_none());
    }

    #[tokio::test]
    async fn test_quota_stops_remaining_batches() {
        let embedder = FailingEmbedder::quota_on_batch(8, 0);
        let texts: Vec<String> = (0..6).map(|i| format!("text {}", i)).collect();

        let report = embed_in_batches(&embedder, &texts, 2, Duration::ZERO).await;

        assert_eq!(report.vectors.len(), 6);
        assert_eq!(report.embedded_count(), 0);
        assert_eq!(report.failed_batches, 3);
        assert_eq!(embedder.batch_calls(), 1);
        assert!(report.last_error.map(|e| e.is_quota()).unwrap_or(false));
    }
}
