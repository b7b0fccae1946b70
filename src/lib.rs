//! legal-rag - 한국어 계약서 분석 RAG 시스템
//!
//! 조항 경계 청킹 + 다단계 검색(조항 번호 → 키워드 → 벡터) 위에서
//! 계약서 요약, 위험 분석, 문서 근거 질의응답을 제공합니다.
//! 익명 사용자는 세션 토큰의 임시 색인, 가입 사용자는 LanceDB 파티션을 씁니다.

pub mod analysis;
pub mod assistant;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod gemini;
pub mod knowledge;
pub mod language;
pub mod llm;

#[cfg(test)]
pub mod testing;

// Re-exports
pub use analysis::{AnalysisQuality, DocumentAnalysis, GeneratedAnswer, Generator};
pub use assistant::{
    AnonymousSession, AskRequest, AskResponse, DocumentRef, LegalAssistant, Owner,
    ProcessedDocument, Storage, Upload,
};
pub use config::RagConfig;
pub use embedding::{create_embedder, EmbeddingProvider, GeminiEmbedding};
pub use error::{ErrorCode, RagError, RagResult, ServiceError};
pub use gemini::{get_api_key, has_api_key};
pub use knowledge::{
    classify, ArticleChunker, Chunk, ChunkConfig, Chunker, Classification, DocumentStore,
    EphemeralIndex, PersistentStore, RetrievalMethod, RetrievalOutcome, Retriever, SourceRef,
    StorageBackend, StorageMode,
};
pub use language::Language;
pub use llm::{ChatMessage, CompletionProvider, GeminiCompletion};
