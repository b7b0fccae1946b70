//! Knowledge 모듈 - 계약서 RAG 지식 계층
//!
//! - Chunker: 조항 경계 우선 분할
//! - Classifier: 계약 유형 감지
//! - KeywordIndex: 의미 그룹 역색인
//! - RelevanceGate / Retriever: 질문 필터와 다단계 검색
//! - EphemeralIndex / PersistentStore: 익명/가입 사용자용 벡터 저장소
//! - DocumentStore: SQLite 문서·대화 저장

mod chunker;
mod classifier;
mod ephemeral;
mod keyword_index;
mod lance;
mod relevance;
mod retriever;
mod store;
mod vector;

// Re-exports
pub use chunker::{ArticleChunker, Chunk, ChunkConfig, ChunkKind, Chunker, PREAMBLE_LABEL};
pub use classifier::{
    classify, contract_type, Classification, ContractType, TypeScore, CONTRACT_TYPES,
};
pub use ephemeral::EphemeralIndex;
pub use keyword_index::{groups_for_query, KeywordGroup, KeywordIndex, KeywordMatch};
pub use lance::{PartitionKey, PartitionedStore, PersistentStore, StoredRecord};
pub use relevance::{
    article_references, AcceptReason, RejectReason, RelevanceDecision, RelevanceGate,
    LEGAL_KEYWORDS,
};
pub use retriever::{
    RetrievalContext, RetrievalMethod, RetrievalOutcome, RetrievalResult, Retriever, SourceRef,
};
pub use store::{content_hash, DocumentRecord, DocumentStore, HistoryMessage, NewDocument, StoreStats};
pub use vector::{
    cosine_similarity, SessionId, StorageBackend, StorageMode, VectorHit, VectorRecord,
};
