//! 테스트용 결정적 프로바이더
//!
//! 네트워크 없이 파이프라인 전체를 돌리기 위한 임베딩/완성/저장소 대역입니다.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::EmbeddingProvider;
use crate::error::{Service, ServiceError};
use crate::knowledge::{EphemeralIndex, StorageBackend, StorageMode, VectorHit, VectorRecord};
use crate::llm::{ChatMessage, CompletionOptions, CompletionProvider, Role};

// ============================================================================
// Embedding
// ============================================================================

/// 문자 해시 기반 벡터 (정규화됨)
pub fn hash_vector(text: &str, dimension: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dimension];
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        let bucket = (c as usize).wrapping_mul(31) % dimension;
        v[bucket] += 1.0;
    }

    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

/// 같은 텍스트에 항상 같은 벡터를 주는 임베더
pub struct StubEmbedder {
    dimension: usize,
    batch_calls: AtomicUsize,
    single_calls: AtomicUsize,
}

impl StubEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            batch_calls: AtomicUsize::new(0),
            single_calls: AtomicUsize::new(0),
        }
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    /// embed / embed_query 호출 수
    pub fn single_calls(&self) -> usize {
        self.single_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for StubEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        Ok(hash_vector(text, self.dimension))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| hash_vector(t, self.dimension)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "stub"
    }
}

/// n번째 배치(0부터)에서 실패하는 임베더
pub struct FailingEmbedder {
    dimension: usize,
    fail_on: usize,
    quota: bool,
    batch_calls: AtomicUsize,
}

impl FailingEmbedder {
    pub fn transient_on_batch(dimension: usize, fail_on: usize) -> Self {
        Self {
            dimension,
            fail_on,
            quota: false,
            batch_calls: AtomicUsize::new(0),
        }
    }

    pub fn quota_on_batch(dimension: usize, fail_on: usize) -> Self {
        Self {
            quota: true,
            ..Self::transient_on_batch(dimension, fail_on)
        }
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        Ok(hash_vector(text, self.dimension))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        let n = self.batch_calls.fetch_add(1, Ordering::SeqCst);
        if n == self.fail_on {
            return Err(if self.quota {
                ServiceError::quota(Service::Embedding, "quota exhausted")
            } else {
                ServiceError::transient(Service::Embedding, "connection reset")
            });
        }
        Ok(texts.iter().map(|t| hash_vector(t, self.dimension)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "failing"
    }
}

// ============================================================================
// Completion
// ============================================================================

/// 준비된 응답을 순서대로 돌려주고, 다 쓰면 마지막 응답을 반복
pub struct ScriptedCompletion {
    responses: Vec<String>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedCompletion {
    pub fn new<S: Into<String>>(responses: impl IntoIterator<Item = S>) -> Self {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 호출마다 마지막 user 메시지
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompletion {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _options: CompletionOptions,
    ) -> Result<String, ServiceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(user) = messages.iter().rev().find(|m| m.role == Role::User) {
            if let Ok(mut prompts) = self.prompts.lock() {
                prompts.push(user.content.clone());
            }
        }

        self.responses
            .get(n)
            .or_else(|| self.responses.last())
            .cloned()
            .ok_or_else(|| ServiceError::failed(Service::LanguageModel, "no scripted response"))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// 항상 실패하는 언어 모델
pub struct UnavailableCompletion {
    quota: bool,
    calls: AtomicUsize,
}

impl UnavailableCompletion {
    pub fn quota() -> Self {
        Self {
            quota: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn transient() -> Self {
        Self {
            quota: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for UnavailableCompletion {
    async fn complete(
        &self,
        _messages: &[ChatMessage],
        _options: CompletionOptions,
    ) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(if self.quota {
            ServiceError::quota(Service::LanguageModel, "quota exhausted")
        } else {
            ServiceError::transient(Service::LanguageModel, "timed out")
        })
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

// ============================================================================
// Storage
// ============================================================================

/// 검색 호출 수를 세는 저장소 (선택적으로 항상 실패)
pub struct CountingBackend {
    inner: EphemeralIndex,
    searches: AtomicUsize,
    fail: bool,
}

impl CountingBackend {
    pub fn new(inner: EphemeralIndex) -> Self {
        Self {
            inner,
            searches: AtomicUsize::new(0),
            fail: false,
        }
    }

    pub fn failing(inner: EphemeralIndex) -> Self {
        Self {
            fail: true,
            ..Self::new(inner)
        }
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageBackend for CountingBackend {
    fn mode(&self) -> StorageMode {
        self.inner.mode()
    }

    async fn add(&mut self, records: Vec<VectorRecord>) -> Result<usize> {
        self.inner.add(records).await
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<VectorHit>> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("vector index unreachable");
        }
        self.inner.search(query, limit).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}
