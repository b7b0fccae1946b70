//! 익명 세션용 임시 벡터 색인
//!
//! 평면(brute-force) 코사인 검색입니다. 한 문서의 청크 수는 수십~수백 개라
//! ANN 구조 없이도 충분합니다. 통째로 직렬화되어 세션 토큰에 실립니다.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::vector::{cosine_similarity, StorageBackend, StorageMode, VectorHit, VectorRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IndexEntry {
    chunk_index: usize,
    embedding: Vec<f32>,
}

/// 임시 벡터 색인
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EphemeralIndex {
    dimension: Option<usize>,
    entries: Vec<IndexEntry>,
}

impl EphemeralIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 레코드로 바로 생성
    pub fn build(records: Vec<VectorRecord>) -> Result<Self> {
        let mut index = Self::new();
        index.insert(records)?;
        Ok(index)
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 바이트 문자열로 직렬화
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize ephemeral index")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("Failed to deserialize ephemeral index")
    }

    fn insert(&mut self, records: Vec<VectorRecord>) -> Result<usize> {
        let count = records.len();

        for record in records {
            match self.dimension {
                Some(dim) if dim != record.embedding.len() => anyhow::bail!(
                    "Embedding dimension mismatch: index has {}, chunk {} has {}",
                    dim,
                    record.chunk_index,
                    record.embedding.len()
                ),
                Some(_) => {}
                None => self.dimension = Some(record.embedding.len()),
            }

            // 같은 청크는 덮어씀
            self.entries.retain(|e| e.chunk_index != record.chunk_index);
            self.entries.push(IndexEntry {
                chunk_index: record.chunk_index,
                embedding: record.embedding,
            });
        }

        Ok(count)
    }

    fn nearest(&self, query: &[f32], limit: usize) -> Vec<VectorHit> {
        let mut hits: Vec<VectorHit> = self
            .entries
            .iter()
            .map(|e| VectorHit {
                chunk_index: e.chunk_index,
                similarity: cosine_similarity(query, &e.embedding),
            })
            .collect();

        // 동점이면 청크 순서
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        hits.truncate(limit);
        hits
    }
}

#[async_trait]
impl StorageBackend for EphemeralIndex {
    fn mode(&self) -> StorageMode {
        StorageMode::Ephemeral
    }

    async fn add(&mut self, records: Vec<VectorRecord>) -> Result<usize> {
        self.insert(records)
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<VectorHit>> {
        if let Some(dim) = self.dimension {
            if dim != query.len() {
                anyhow::bail!(
                    "Query dimension {} does not match index dimension {}",
                    query.len(),
                    dim
                );
            }
        }
        Ok(self.nearest(query, limit))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.len())
    }
}

// ============================================================================
// Tests
// ============================================================================
