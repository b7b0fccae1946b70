//! 요청 단위 계약서 파이프라인
//!
//! 업로드 → 분석 → 질의응답 → 기록 조회/삭제를 묶습니다.
//! 저장소는 요청 시작 시 소유자 종류에 따라 한 번 정해집니다.
//! - 익명: 임시 색인 + 청크 + 대화 기록을 세션 토큰 하나에 담아 돌려줌
//! - 가입 사용자: SQLite 문서 행 + LanceDB `(user_id, session_id)` 파티션

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::analysis::{AnswerOutcome, DocumentAnalysis, Generator};
use crate::config::RagConfig;
use crate::embedding::{embed_in_batches, EmbeddingProvider};
use crate::error::{ErrorCode, RagError, RagResult};
use crate::extractor;
use crate::knowledge::{
    classify, ArticleChunker, Chunk, ChunkConfig, Chunker, Classification, DocumentRecord,
    DocumentStore, EphemeralIndex, HistoryMessage, KeywordIndex, NewDocument, PartitionKey,
    PartitionedStore, PersistentStore, RetrievalContext, RetrievalOutcome, Retriever, SessionId,
    SourceRef, StorageBackend, StorageMode, VectorRecord,
};
use crate::language::Language;
use crate::llm::CompletionProvider;

// ============================================================================
// Request / Response Types
// ============================================================================

/// 요청 주체
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    Anonymous,
    User(i64),
}

/// 업로드된 파일
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    /// 로컬 파일 읽기
    pub async fn from_path(path: &Path) -> RagResult<Self> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RagError::InvalidInput(format!("cannot read {:?}: {}", path, e)))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        Ok(Self::new(filename, bytes))
    }

    pub fn extension(&self) -> &str {
        Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
    }

    /// 확장자를 뺀 파일 이름
    pub fn title(&self) -> String {
        Path::new(&self.filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .unwrap_or("계약서")
            .to_string()
    }
}

/// 처리된 문서를 가리키는 핸들
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentRef {
    /// 익명 세션 토큰
    Session(String),
    Stored { owner_id: i64, document_id: String },
}

/// 업로드 처리 결과
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub document: DocumentRef,
    pub title: String,
    pub classification: Classification,
    pub chunk_count: usize,
    /// 임베딩에 성공한 청크 수
    pub vector_count: usize,
    pub storage_mode: StorageMode,
}

/// 질문 요청
#[derive(Debug, Clone)]
pub struct AskRequest {
    pub question: String,
    pub document: DocumentRef,
    pub language: Language,
}

/// 질문 응답 (경계 객체)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AskResponse {
    Answer {
        answer: String,
        provenance: Vec<SourceRef>,
        /// 익명 세션의 갱신된 토큰 (대화 기록 포함)
        #[serde(skip_serializing_if = "Option::is_none")]
        session_token: Option<String>,
    },
    Error {
        error: String,
        code: ErrorCode,
    },
}

impl AskResponse {
    pub fn error(err: &RagError, language: Language) -> Self {
        AskResponse::Error {
            error: err.user_message(language),
            code: err.code(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, AskResponse::Error { .. })
    }
}

// ============================================================================
// Anonymous Session
// ============================================================================

/// 익명 사용자의 문서 상태 전체 (클라이언트 측 토큰으로 왕복)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnonymousSession {
    pub title: String,
    pub content: String,
    pub chunks: Vec<Chunk>,
    pub classification: Classification,
    pub index: EphemeralIndex,
    pub history: Vec<HistoryMessage>,
}

impl AnonymousSession {
    pub fn to_token(&self) -> RagResult<String> {
        let json = serde_json::to_vec(self)
            .context("Failed to encode session")
            .map_err(RagError::storage)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// 토큰 복원 (손상/만료된 토큰은 재업로드 안내 대상)
    pub fn from_token(token: &str) -> RagResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| RagError::StorageIntegrity(format!("session token is not base64: {}", e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| RagError::StorageIntegrity(format!("session token is corrupt: {}", e)))
    }
}

/// 요청 동안 불러온 문서
enum LoadedDocument {
    Session(AnonymousSession),
    Stored {
        record: DocumentRecord,
        chunks: Vec<Chunk>,
        classification: Classification,
        partition: PartitionedStore,
    },
}

impl LoadedDocument {
    fn content(&self) -> &str {
        match self {
            LoadedDocument::Session(session) => &session.content,
            LoadedDocument::Stored { record, .. } => &record.content,
        }
    }

    fn chunks(&self) -> &[Chunk] {
        match self {
            LoadedDocument::Session(session) => &session.chunks,
            LoadedDocument::Stored { chunks, .. } => chunks,
        }
    }

    fn classification(&self) -> &Classification {
        match self {
            LoadedDocument::Session(session) => &session.classification,
            LoadedDocument::Stored { classification, .. } => classification,
        }
    }

    fn backend(&self) -> &dyn StorageBackend {
        match self {
            LoadedDocument::Session(session) => &session.index,
            LoadedDocument::Stored { partition, .. } => partition,
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

/// 가입 사용자 저장소 (SQLite 문서/대화 + LanceDB 벡터)
///
/// 언어 모델 없이 조회/삭제만 할 때도 단독으로 씁니다.
pub struct Storage {
    documents: DocumentStore,
    vectors: PersistentStore,
}

impl Storage {
    pub fn new(documents: DocumentStore, vectors: PersistentStore) -> Self {
        Self { documents, vectors }
    }

    /// 설정의 데이터 디렉토리에서 열기
    pub async fn open(config: &RagConfig) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", config.data_dir))?;

        let documents = DocumentStore::open(&config.database_path())?;
        let vectors = PersistentStore::open(&config.vector_path()).await?;
        Ok(Self::new(documents, vectors))
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub fn vectors(&self) -> &PersistentStore {
        &self.vectors
    }

    fn owned_document(&self, owner_id: i64, document_id: &str) -> RagResult<DocumentRecord> {
        self.documents
            .get_owned_document(owner_id, document_id)
            .map_err(RagError::storage)?
            .ok_or_else(|| RagError::DocumentNotFound(document_id.to_string()))
    }

    /// 사용자의 문서 목록 (최신순)
    pub fn list(&self, owner_id: i64, limit: usize) -> RagResult<Vec<DocumentRecord>> {
        self.documents
            .list_documents(owner_id, limit)
            .map_err(RagError::storage)
    }

    /// 저장된 문서의 대화 기록 (오래된 순)
    pub fn history(&self, owner_id: i64, document_id: &str) -> RagResult<Vec<HistoryMessage>> {
        self.owned_document(owner_id, document_id)?;
        self.documents
            .messages(document_id)
            .map_err(RagError::storage)
    }

    /// 문서 삭제 (SQLite 행 + 벡터 파티션), 지운 벡터 수 반환
    pub async fn delete_document(&self, owner_id: i64, document_id: &str) -> RagResult<usize> {
        let record = self.owned_document(owner_id, document_id)?;

        let removed = self
            .vectors
            .delete_partition(&PartitionKey::new(record.owner_id, record.session_id))
            .await
            .map_err(RagError::storage)?;
        self.documents
            .delete_document(owner_id, document_id)
            .map_err(RagError::storage)?;

        tracing::info!("Deleted document {} ({} vectors)", document_id, removed);
        Ok(removed)
    }
}

// ============================================================================
// LegalAssistant
// ============================================================================

/// 계약서 분석/질의응답 파이프라인
pub struct LegalAssistant {
    config: RagConfig,
    retriever: Retriever,
    generator: Generator,
    embedder: Arc<dyn EmbeddingProvider>,
    storage: Storage,
}

impl LegalAssistant {
    pub fn new(
        config: RagConfig,
        llm: Arc<dyn CompletionProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        storage: Storage,
    ) -> anyhow::Result<Self> {
        let retriever = Retriever::new(config.clone())?;
        let generator = Generator::new(llm, config.clone());

        Ok(Self {
            config,
            retriever,
            generator,
            embedder,
            storage,
        })
    }

    /// 설정의 데이터 디렉토리에서 저장소를 열어 생성
    pub async fn open(
        config: RagConfig,
        llm: Arc<dyn CompletionProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> anyhow::Result<Self> {
        let storage = Storage::open(&config).await?;
        Self::new(config, llm, embedder, storage)
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    // ------------------------------------------------------------------------
    // Upload
    // ------------------------------------------------------------------------

    /// 추출 → 청킹 → 분류 → 임베딩 → 저장
    pub async fn process_upload(&self, upload: Upload, owner: Owner) -> RagResult<ProcessedDocument> {
        let title = upload.title();
        tracing::info!("Processing upload: {} ({} bytes)", upload.filename, upload.bytes.len());

        // 1. 텍스트 추출 (CPU 바운드)
        let extension = upload.extension().to_string();
        let bytes = upload.bytes;
        let content = tokio::task::spawn_blocking(move || extractor::extract(&bytes, &extension))
            .await
            .map_err(|e| RagError::ExtractionFailed(format!("extraction task failed: {}", e)))??;

        // 2. 청킹
        let chunks = ArticleChunker::new(ChunkConfig::new(self.config.chunk_size)).chunk(&content);
        if chunks.is_empty() {
            return Err(RagError::ExtractionFailed("document has no content".to_string()));
        }
        let article_count = chunks.iter().filter(|c| c.article_num.is_some()).count();
        tracing::info!("Chunked into {} chunks ({} from articles)", chunks.len(), article_count);

        // 3. 분류
        let classification = classify(&content);
        match classification.best() {
            Some(best) => tracing::info!(
                "Detected contract type: {} ({} terms)",
                best.contract_type,
                best.score
            ),
            None => tracing::info!("Contract type not detected"),
        }

        // 4. 임베딩 (실패한 배치는 건너뜀)
        let texts: Vec<String> = chunks.iter().map(Chunk::embedding_text).collect();
        let report = embed_in_batches(
            self.embedder.as_ref(),
            &texts,
            self.config.embed_batch_size,
            self.config.embed_batch_pause(),
        )
        .await;
        if !report.is_complete() {
            tracing::warn!(
                "Only {}/{} chunks embedded, lexical retrieval still available",
                report.embedded_count(),
                chunks.len()
            );
        }
        let records: Vec<VectorRecord> = chunks
            .iter()
            .zip(report.vectors)
            .filter_map(|(chunk, vector)| vector.map(|v| VectorRecord::new(chunk, v)))
            .collect();
        let vector_count = records.len();

        // 5. 저장
        let (document, storage_mode) = match owner {
            Owner::Anonymous => {
                let index = EphemeralIndex::build(records).map_err(RagError::storage)?;
                let session = AnonymousSession {
                    title: title.clone(),
                    content,
                    chunks: chunks.clone(),
                    classification: classification.clone(),
                    index,
                    history: Vec::new(),
                };
                (DocumentRef::Session(session.to_token()?), StorageMode::Ephemeral)
            }
            Owner::User(user_id) => {
                let document_id = self
                    .store_persistent(user_id, &title, content, &chunks, &classification, records)
                    .await?;
                (
                    DocumentRef::Stored {
                        owner_id: user_id,
                        document_id,
                    },
                    StorageMode::Persistent,
                )
            }
        };

        Ok(ProcessedDocument {
            document,
            title,
            classification,
            chunk_count: chunks.len(),
            vector_count,
            storage_mode,
        })
    }

    /// SQLite 행 + LanceDB 파티션 저장 후 파티션 레코드 수 확인
    async fn store_persistent(
        &self,
        user_id: i64,
        title: &str,
        content: String,
        chunks: &[Chunk],
        classification: &Classification,
        records: Vec<VectorRecord>,
    ) -> RagResult<String> {
        let session_id = SessionId::new();
        let expected = records.len();
        let best = classification.best();

        let document_id = self
            .storage
            .documents
            .add_document(
                NewDocument {
                    owner_id: user_id,
                    session_id,
                    title: title.to_string(),
                    content,
                    contract_type: best.map(|b| b.contract_type.clone()),
                    confidence: best.map(|b| f64::from(b.percentage)),
                    vector_indexed: expected,
                },
                chunks,
            )
            .map_err(RagError::storage)?;

        if expected == 0 {
            return Ok(document_id);
        }

        let mut partition = self
            .storage
            .vectors
            .partition(PartitionKey::new(user_id, session_id), document_id.clone());

        let stored = match partition.add(records).await {
            Ok(_) => partition.scroll(None).await.map(|r| r.len()),
            Err(e) => Err(e),
        };

        match stored {
            Ok(count) if count == expected => {
                tracing::info!("Verified {} vectors in partition {}", count, partition.key());
                Ok(document_id)
            }
            Ok(count) => {
                self.rollback(user_id, &document_id, &partition).await;
                Err(RagError::Storage(format!(
                    "vector partition holds {} records, expected {}",
                    count, expected
                )))
            }
            Err(e) => {
                self.rollback(user_id, &document_id, &partition).await;
                Err(RagError::storage(e))
            }
        }
    }

    async fn rollback(&self, user_id: i64, document_id: &str, partition: &PartitionedStore) {
        tracing::warn!("Rolling back document {}", document_id);
        if let Err(e) = partition.delete().await {
            tracing::warn!("Failed to delete vector partition: {:#}", e);
        }
        if let Err(e) = self.storage.documents.delete_document(user_id, document_id) {
            tracing::warn!("Failed to delete document row: {:#}", e);
        }
    }

    // ------------------------------------------------------------------------
    // Load
    // ------------------------------------------------------------------------

    fn load(&self, document: &DocumentRef) -> RagResult<LoadedDocument> {
        match document {
            DocumentRef::Session(token) => Ok(LoadedDocument::Session(AnonymousSession::from_token(
                token,
            )?)),
            DocumentRef::Stored {
                owner_id,
                document_id,
            } => {
                let record = self.storage.owned_document(*owner_id, document_id)?;
                let chunks = self
                    .storage
                    .documents
                    .get_chunks(document_id)
                    .map_err(RagError::storage)?;
                let classification = classify(&record.content);
                let partition = self.storage.vectors.partition(
                    PartitionKey::new(record.owner_id, record.session_id),
                    record.id.clone(),
                );

                Ok(LoadedDocument::Stored {
                    record,
                    chunks,
                    classification,
                    partition,
                })
            }
        }
    }

    // ------------------------------------------------------------------------
    // Analysis
    // ------------------------------------------------------------------------

    /// 요약 + 위험 분석
    pub async fn analyze(
        &self,
        document: &DocumentRef,
        language: Language,
    ) -> RagResult<DocumentAnalysis> {
        let loaded = self.load(document)?;
        Ok(self
            .generator
            .analyze(loaded.content(), loaded.classification(), language)
            .await)
    }

    // ------------------------------------------------------------------------
    // Q&A
    // ------------------------------------------------------------------------

    /// 질문 처리 (에러도 응답 객체로 돌려줌)
    pub async fn ask(&self, request: AskRequest) -> AskResponse {
        let language = request.language;
        match self.try_ask(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Question failed ({}): {}", e.code(), e);
                AskResponse::error(&e, language)
            }
        }
    }

    async fn try_ask(&self, request: AskRequest) -> RagResult<AskResponse> {
        let question = request.question.trim();
        if question.is_empty() {
            return Err(RagError::InvalidInput("question is empty".to_string()));
        }
        let language = request.language;
        let messages = language.messages();

        let mut loaded = self.load(&request.document)?;

        // 1. 검색
        let keyword_index = KeywordIndex::build(
            loaded.chunks(),
            loaded.classification(),
            &self.config.weights,
        );
        let ctx = RetrievalContext {
            chunks: loaded.chunks(),
            classification: loaded.classification(),
            keyword_index: &keyword_index,
            backend: loaded.backend(),
            embedder: Some(self.embedder.as_ref()),
        };
        let outcome = self.retriever.retrieve(question, &ctx).await;

        // 2. 답변
        let (answer, provenance) = match outcome {
            RetrievalOutcome::Rejected(_) => (messages.off_topic.to_string(), Vec::new()),
            RetrievalOutcome::NoMatch => (messages.no_results.to_string(), Vec::new()),
            RetrievalOutcome::Matches(results) => {
                let chunks = loaded.chunks();
                let matched: Vec<(&Chunk, SourceRef)> = results
                    .iter()
                    .filter_map(|result| {
                        chunks
                            .iter()
                            .find(|c| c.index == result.chunk_index)
                            .map(|chunk| (chunk, SourceRef::new(result, chunk)))
                    })
                    .collect();
                let context: Vec<&Chunk> = matched.iter().map(|(chunk, _)| *chunk).collect();

                let generated = self.generator.answer(question, &context, language).await;
                let provenance = match generated.outcome {
                    AnswerOutcome::Generated => matched.into_iter().map(|(_, s)| s).collect(),
                    AnswerOutcome::Unavailable { .. } => Vec::new(),
                };
                (generated.text, provenance)
            }
        };

        // 3. 대화 기록
        let user_message = HistoryMessage::user(question);
        let assistant_message = HistoryMessage::assistant(answer.clone(), provenance.clone());

        let session_token = match &mut loaded {
            LoadedDocument::Session(session) => {
                session.history.push(user_message);
                session.history.push(assistant_message);
                Some(session.to_token()?)
            }
            LoadedDocument::Stored { record, .. } => {
                for message in [&user_message, &assistant_message] {
                    self.storage
                        .documents
                        .append_message(&record.id, record.owner_id, message)
                        .map_err(RagError::storage)?;
                }
                None
            }
        };

        Ok(AskResponse::Answer {
            answer,
            provenance,
            session_token,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
