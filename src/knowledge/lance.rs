//! LanceDB 영속 벡터 저장소
//!
//! 가입 사용자의 벡터를 한 테이블에 모으고, 모든 읽기/쓰기를
//! (user_id, session_id) 필터로 파티션합니다. 파티션 밖의 행은 절대 반환하지 않습니다.
//!
//! 교체 쓰기는 새 행을 먼저 추가한 뒤 이전 `write_id`의 행을 지우므로,
//! 추가가 실패해도 기존 파티션 내용은 그대로 남습니다.
//! ref: https://lancedb.github.io/lancedb/

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int32Array, Int64Array, RecordBatch,
    RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;
use uuid::Uuid;

use super::chunker::ChunkKind;
use super::vector::{SessionId, StorageBackend, StorageMode, VectorHit, VectorRecord};

/// 벡터 테이블 이름
const TABLE_NAME: &str = "legal_documents";

// ============================================================================
// Types
// ============================================================================

/// 파티션 키
///
/// 두 값 모두 타입으로 검증되므로 필터 문자열에 안전하게 들어갑니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartitionKey {
    pub user_id: i64,
    pub session_id: SessionId,
}

impl PartitionKey {
    pub fn new(user_id: i64, session_id: SessionId) -> Self {
        Self {
            user_id,
            session_id,
        }
    }

    fn filter(&self) -> String {
        format!(
            "user_id = {} AND session_id = '{}'",
            self.user_id, self.session_id
        )
    }

    fn filter_with_article(&self, article: Option<u32>) -> String {
        match article {
            Some(n) => format!("{} AND article_num = {}", self.filter(), n),
            None => self.filter(),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user={} session={}", self.user_id, self.session_id)
    }
}

/// scroll로 읽은 저장 레코드 (임베딩 제외)
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub document_id: String,
    pub chunk_index: usize,
    pub kind: ChunkKind,
    pub article_num: Option<u32>,
    pub article_title: Option<String>,
    pub text: String,
}

// ============================================================================
// PersistentStore
// ============================================================================

/// LanceDB 벡터 저장소
#[derive(Clone)]
pub struct PersistentStore {
    db: Connection,
}

impl PersistentStore {
    /// LanceDB 저장소 열기
    ///
    /// # Arguments
    /// * `path` - .lance 디렉토리 경로
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self { db })
    }

    /// 한 파티션에 묶인 저장소 핸들
    pub fn partition(&self, key: PartitionKey, document_id: impl Into<String>) -> PartitionedStore {
        PartitionedStore {
            store: self.clone(),
            key,
            document_id: document_id.into(),
        }
    }

    /// 테이블 스키마 (임베딩 차원은 들어오는 데이터에서 결정)
    fn create_schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("user_id", DataType::Int64, false),
            Field::new("session_id", DataType::Utf8, false),
            Field::new("document_id", DataType::Utf8, false),
            Field::new("write_id", DataType::Utf8, false),
            Field::new("chunk_index", DataType::Int32, false),
            Field::new("article_num", DataType::Int32, true),
            Field::new("article_title", DataType::Utf8, true),
            Field::new("kind", DataType::Utf8, false),
            Field::new("chunk_text", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    /// 레코드들을 Arrow RecordBatch로 변환
    fn records_to_batch(
        key: &PartitionKey,
        document_id: &str,
        write_id: &str,
        records: &[VectorRecord],
    ) -> Result<RecordBatch> {
        let first = records
            .first()
            .ok_or_else(|| anyhow::anyhow!("Cannot create batch from empty records"))?;
        let dimension = first.embedding.len();

        if let Some(bad) = records.iter().find(|r| r.embedding.len() != dimension) {
            anyhow::bail!(
                "Embedding dimension mismatch: chunk {} has {}, expected {}",
                bad.chunk_index,
                bad.embedding.len(),
                dimension
            );
        }

        let dimension = i32::try_from(dimension).context("Embedding dimension too large")?;
        let session = key.session_id.to_string();

        let user_ids: Vec<i64> = vec![key.user_id; records.len()];
        let session_ids: Vec<&str> = vec![session.as_str(); records.len()];
        let document_ids: Vec<&str> = vec![document_id; records.len()];
        let write_ids: Vec<&str> = vec![write_id; records.len()];
        let chunk_indices: Vec<i32> = records.iter().map(|r| r.chunk_index as i32).collect();
        let article_nums: Vec<Option<i32>> = records
            .iter()
            .map(|r| r.article_num.map(|n| n as i32))
            .collect();
        let article_titles: Vec<Option<&str>> =
            records.iter().map(|r| r.article_title.as_deref()).collect();
        let kinds: Vec<&str> = records.iter().map(|r| r.kind.as_str()).collect();
        let texts: Vec<&str> = records.iter().map(|r| r.text.as_str()).collect();

        let embeddings_flat: Vec<f32> = records
            .iter()
            .flat_map(|r| r.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Arc::new(Self::create_schema(dimension)),
            vec![
                Arc::new(Int64Array::from(user_ids)),
                Arc::new(StringArray::from(session_ids)),
                Arc::new(StringArray::from(document_ids)),
                Arc::new(StringArray::from(write_ids)),
                Arc::new(Int32Array::from(chunk_indices)),
                Arc::new(Int32Array::from(article_nums)),
                Arc::new(StringArray::from(article_titles)),
                Arc::new(StringArray::from(kinds)),
                Arc::new(StringArray::from(texts)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    /// 테이블 존재 여부 확인
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.contains(&TABLE_NAME.to_string()))
            .unwrap_or(false)
    }

    async fn open_table(&self) -> Result<Option<lancedb::table::Table>> {
        if !self.table_exists().await {
            return Ok(None);
        }

        self.db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .map(Some)
            .context("Failed to open vector table")
    }

    /// 파티션 내용을 통째로 교체
    ///
    /// 1. 새 `write_id`로 행 추가
    /// 2. 같은 파티션의 다른 `write_id` 행 삭제
    pub async fn upsert(
        &self,
        key: &PartitionKey,
        document_id: &str,
        records: &[VectorRecord],
    ) -> Result<usize> {
        if records.is_empty() {
            self.delete_partition(key).await?;
            return Ok(0);
        }

        let write_id = Uuid::new_v4().to_string();
        let batch = Self::records_to_batch(key, document_id, &write_id, records)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        match self.open_table().await? {
            Some(table) => {
                table
                    .add(batches)
                    .execute()
                    .await
                    .context("Failed to add vectors to table")?;
            }
            None => {
                self.db
                    .create_table(TABLE_NAME, batches)
                    .execute()
                    .await
                    .context("Failed to create table")?;
            }
        }

        self.delete_stale(key, &write_id).await?;

        tracing::debug!(
            "Upserted {} vectors for user {} session {}",
            records.len(),
            key.user_id,
            key.session_id
        );
        Ok(records.len())
    }

    /// 파티션 안에서만 코사인 검색
    pub async fn search(
        &self,
        key: &PartitionKey,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<VectorHit>> {
        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };

        let stream = table
            .vector_search(query.to_vec())
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .only_if(key.filter())
            .limit(limit)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = stream.try_collect().await?;
        let mut hits = Vec::new();

        for batch in batches {
            let chunk_indices = int32_column(&batch, "chunk_index")?;

            // _distance 컬럼 (LanceDB가 자동 추가)
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                hits.push(VectorHit {
                    chunk_index: chunk_indices.value(i) as usize,
                    // 코사인 거리 = 1 - 코사인 유사도
                    similarity: 1.0 - distances.value(i),
                });
            }
        }

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(hits)
    }

    /// 파티션의 모든 레코드 (청크 순서), 조항 번호로 좁힐 수 있음
    pub async fn scroll(&self, key: &PartitionKey, article: Option<u32>) -> Result<Vec<StoredRecord>> {
        let Some(table) = self.open_table().await? else {
            return Ok(vec![]);
        };

        let filter = key.filter_with_article(article);
        let total = table
            .count_rows(Some(filter.clone()))
            .await
            .context("Failed to count partition rows")?;
        if total == 0 {
            return Ok(vec![]);
        }

        let stream = table
            .query()
            .only_if(filter)
            .limit(total)
            .execute()
            .await
            .context("Failed to scroll partition")?;

        let batches: Vec<RecordBatch> = stream.try_collect().await?;
        let mut records = Vec::with_capacity(total);

        for batch in batches {
            let document_ids = string_column(&batch, "document_id")?;
            let chunk_indices = int32_column(&batch, "chunk_index")?;
            let article_nums = int32_column(&batch, "article_num")?;
            let article_titles = string_column(&batch, "article_title")?;
            let kinds = string_column(&batch, "kind")?;
            let texts = string_column(&batch, "chunk_text")?;

            for i in 0..batch.num_rows() {
                records.push(StoredRecord {
                    document_id: document_ids.value(i).to_string(),
                    chunk_index: chunk_indices.value(i) as usize,
                    kind: ChunkKind::parse(kinds.value(i)),
                    article_num: (!article_nums.is_null(i)).then(|| article_nums.value(i) as u32),
                    article_title: (!article_titles.is_null(i))
                        .then(|| article_titles.value(i).to_string()),
                    text: texts.value(i).to_string(),
                });
            }
        }

        records.sort_by_key(|r| r.chunk_index);
        Ok(records)
    }

    /// 파티션 삭제, 삭제된 행 수 반환
    pub async fn delete_partition(&self, key: &PartitionKey) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        let filter = key.filter();
        let before = table
            .count_rows(Some(filter.clone()))
            .await
            .context("Failed to count partition rows")?;

        if before > 0 {
            table
                .delete(&filter)
                .await
                .context("Failed to delete vectors")?;
        }
        Ok(before)
    }

    /// 파티션에서 `write_id`가 아닌 행 삭제
    async fn delete_stale(&self, key: &PartitionKey, write_id: &str) -> Result<()> {
        let Some(table) = self.open_table().await? else {
            return Ok(());
        };

        table
            .delete(&format!("{} AND write_id != '{}'", key.filter(), write_id))
            .await
            .context("Failed to delete stale vectors")?;
        Ok(())
    }

    /// 파티션 행 수 (`None`이면 전체)
    pub async fn count(&self, key: Option<&PartitionKey>) -> Result<usize> {
        let Some(table) = self.open_table().await? else {
            return Ok(0);
        };

        table
            .count_rows(key.map(PartitionKey::filter))
            .await
            .context("Failed to count rows")
    }
}

fn int32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int32Array> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<Int32Array>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| anyhow::anyhow!("Missing {} column", name))
}

// ============================================================================
// PartitionedStore
// ============================================================================

/// 한 (user_id, session_id) 파티션에 묶인 [`StorageBackend`]
#[derive(Clone)]
pub struct PartitionedStore {
    store: PersistentStore,
    key: PartitionKey,
    document_id: String,
}

impl PartitionedStore {
    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    pub async fn scroll(&self, article: Option<u32>) -> Result<Vec<StoredRecord>> {
        self.store.scroll(&self.key, article).await
    }

    pub async fn delete(&self) -> Result<usize> {
        self.store.delete_partition(&self.key).await
    }
}

#[async_trait]
impl StorageBackend for PartitionedStore {
    fn mode(&self) -> StorageMode {
        StorageMode::Persistent
    }

    async fn add(&mut self, records: Vec<VectorRecord>) -> Result<usize> {
        self.store
            .upsert(&self.key, &self.document_id, &records)
            .await
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<VectorHit>> {
        self.store.search(&self.key, query, limit).await
    }

    async fn count(&self) -> Result<usize> {
        self.store.count(Some(&self.key)).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::{ArticleChunker, Chunker};
    use crate::testing::hash_vector;
    use tempfile::TempDir;

    const DIM: usize = 16;
    const CONTRACT: &str = "제1조 (목적) 근로조건을 정한다.\n제2조 (근로시간) 1일 8시간으로 한다.\n\
                            제3조 (임금) 월 300만원을 지급한다.\n";

    fn records() -> Vec<VectorRecord> {
        ArticleChunker::with_defaults()
            .chunk(CONTRACT)
            .iter()
            .map(|c| VectorRecord::new(c, hash_vector(&c.embedding_text(), DIM)))
            .collect()
    }

    async fn open(temp_dir: &TempDir) -> PersistentStore {
        PersistentStore::open(&temp_dir.path().join("vectors.lance"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_scroll() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;
        let key = PartitionKey::new(1, SessionId::new());

        assert_eq!(store.count(None).await.unwrap(), 0);
        assert_eq!(store.upsert(&key, "doc-1", &records()).await.unwrap(), 3);

        let scrolled = store.scroll(&key, None).await.unwrap();
        assert_eq!(scrolled.len(), 3);
        assert_eq!(scrolled[1].article_num, Some(2));
        assert_eq!(scrolled[1].article_title.as_deref(), Some("근로시간"));
        assert_eq!(scrolled[1].document_id, "doc-1");

        let article = store.scroll(&key, Some(3)).await.unwrap();
        assert_eq!(article.len(), 1);
        assert_eq!(article[0].chunk_index, 2);
    }

    #[tokio::test]
    async fn test_upsert_replaces_partition() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;
        let key = PartitionKey::new(1, SessionId::new());

        store.upsert(&key, "doc-1", &records()).await.unwrap();
        store.upsert(&key, "doc-1", &records()[..1]).await.unwrap();

        assert_eq!(store.count(Some(&key)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_upsert_keeps_previous_rows() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;
        let key = PartitionKey::new(1, SessionId::new());
        store.upsert(&key, "doc-1", &records()).await.unwrap();

        let mut broken = records();
        broken[2].embedding.truncate(DIM / 2);
        assert!(store.upsert(&key, "doc-1", &broken).await.is_err());

        let scrolled = store.scroll(&key, None).await.unwrap();
        assert_eq!(scrolled.len(), 3);
        assert_eq!(scrolled[2].article_num, Some(3));
    }

    #[tokio::test]
    async fn test_partition_isolation() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;

        // 같은 내용을 두 사용자가 색인
        let alice = PartitionKey::new(1, SessionId::new());
        let bob = PartitionKey::new(2, SessionId::new());
        store.upsert(&alice, "doc-a", &records()).await.unwrap();
        store.upsert(&bob, "doc-b", &records()).await.unwrap();
        assert_eq!(store.count(None).await.unwrap(), 6);

        let query = records()[1].embedding.clone();
        let partition = store.partition(alice, "doc-a");
        let hits = partition.search(&query, 10).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk_index, 1);
        assert!(hits[0].similarity > 0.99);

        // 같은 사용자, 다른 세션도 분리됨
        let other_session = PartitionKey::new(1, SessionId::new());
        assert!(store.search(&other_session, &query, 10).await.unwrap().is_empty());

        assert!(store
            .scroll(&alice, None)
            .await
            .unwrap()
            .iter()
            .all(|r| r.document_id == "doc-a"));
    }

    #[tokio::test]
    async fn test_delete_partition() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;
        let alice = PartitionKey::new(1, SessionId::new());
        let bob = PartitionKey::new(2, SessionId::new());
        store.upsert(&alice, "doc-a", &records()).await.unwrap();
        store.upsert(&bob, "doc-b", &records()).await.unwrap();

        assert_eq!(store.delete_partition(&alice).await.unwrap(), 3);
        assert_eq!(store.count(Some(&alice)).await.unwrap(), 0);
        assert_eq!(store.count(Some(&bob)).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_partitioned_backend_add() {
        let temp_dir = TempDir::new().unwrap();
        let store = open(&temp_dir).await;
        let mut backend = store.partition(PartitionKey::new(7, SessionId::new()), "doc-7");

        assert_eq!(backend.mode(), StorageMode::Persistent);
        assert_eq!(backend.add(records()).await.unwrap(), 3);
        assert_eq!(backend.count().await.unwrap(), 3);
        assert_eq!(backend.scroll(None).await.unwrap().len(), 3);
    }
}
