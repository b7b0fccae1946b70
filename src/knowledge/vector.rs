//! 벡터 저장소 트레이트 및 유틸리티
//!
//! 문서의 벡터는 요청 시작 시 한 번 고른 두 저장소 중 정확히 한 곳에만 있습니다.
//! - [`EphemeralIndex`](super::EphemeralIndex): 익명 세션 전용, 세션 토큰에 직렬화
//! - [`PartitionedStore`](super::PartitionedStore): 가입 사용자, LanceDB의 (user_id, session_id) 파티션

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::chunker::{Chunk, ChunkKind};
use crate::error::RagError;

// ============================================================================
// Types
// ============================================================================

/// 저장 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    Ephemeral,
    Persistent,
}

impl StorageMode {
    pub fn as_str(self) -> &'static str {
        match self {
            StorageMode::Ephemeral => "ephemeral",
            StorageMode::Persistent => "persistent",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "persistent" => StorageMode::Persistent,
            _ => StorageMode::Ephemeral,
        }
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 벡터 엔트리 (저장용)
///
/// `chunk_index`가 청크와 임베딩 순서를 잇는 유일한 연결입니다.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub chunk_index: usize,
    pub kind: ChunkKind,
    pub article_num: Option<u32>,
    pub article_title: Option<String>,
    /// 조항 접두어 포함 텍스트
    pub text: String,
    pub embedding: Vec<f32>,
}

impl VectorRecord {
    pub fn new(chunk: &Chunk, embedding: Vec<f32>) -> Self {
        Self {
            chunk_index: chunk.index,
            kind: chunk.kind,
            article_num: chunk.article_num,
            article_title: chunk.article_title.clone(),
            text: chunk.text(),
            embedding,
        }
    }
}

/// 검색 결과
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub chunk_index: usize,
    /// 코사인 유사도 (-1.0 ~ 1.0)
    pub similarity: f32,
}

/// 세션 구분자 (UUID로 검증됨)
///
/// LanceDB 필터 문자열에 그대로 들어가므로 UUID 형식만 허용합니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for SessionId {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| RagError::InvalidInput(format!("invalid session id: {}", s)))
    }
}

impl TryFrom<String> for SessionId {
    type Error = RagError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

// ============================================================================
// StorageBackend Trait
// ============================================================================

/// 벡터 저장소의 공통 인터페이스
///
/// 한 요청 안에서 한 번 선택되어 파이프라인 아래로 전달됩니다.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn mode(&self) -> StorageMode;

    /// 벡터 추가, 추가된 개수 반환
    async fn add(&mut self, records: Vec<VectorRecord>) -> Result<usize>;

    /// 유사도 내림차순 상위 `limit`개
    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<VectorHit>>;

    async fn count(&self) -> Result<usize>;
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위이며, 길이가 다르거나 영벡터면 0.0입니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c) - 0.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) - -1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }

    #[test]
    fn test_session_id_validation() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);

        // 필터 주입 시도는 거부
        assert!("x' OR '1'='1".parse::<SessionId>().is_err());
    }

    #[test]
    fn test_session_id_serde() {
        let id = SessionId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
        assert!(serde_json::from_str::<SessionId>("\"not-a-uuid\"").is_err());
    }

    #[test]
    fn test_storage_mode_parse() {
        assert_eq!(StorageMode::parse("persistent"), StorageMode::Persistent);
        assert_eq!(StorageMode::parse("ephemeral"), StorageMode::Ephemeral);
    }
}
