//! Document Store - rusqlite 기반 문서/대화 저장소
//!
//! 가입 사용자의 문서 메타데이터, 청크, 채팅 세션과 메시지를 저장합니다.
//! 문서를 지우면 청크와 대화가 함께 지워집니다 (ON DELETE CASCADE).
//! 저장 위치: ~/.legal-rag/legal.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::chunker::{Chunk, ChunkKind};
use super::retriever::SourceRef;
use super::vector::{SessionId, StorageMode};
use crate::llm::Role;

// ============================================================================
// Types
// ============================================================================

/// 저장된 문서
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub owner_id: i64,
    pub session_id: SessionId,
    pub title: String,
    pub content: String,
    /// 추출 텍스트의 SHA-256 (hex)
    pub content_hash: String,
    pub contract_type: Option<String>,
    /// 분류 일치율 (%)
    pub confidence: Option<f64>,
    pub chunk_count: usize,
    pub storage_mode: StorageMode,
    /// 임베딩까지 끝난 청크 수
    pub vector_indexed: usize,
    pub created_at: DateTime<Utc>,
}

/// 새 문서 입력용 구조체
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub owner_id: i64,
    pub session_id: SessionId,
    pub title: String,
    pub content: String,
    pub contract_type: Option<String>,
    pub confidence: Option<f64>,
    pub vector_indexed: usize,
}

/// 대화 메시지 (근거 청크 포함)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provenance: Vec<SourceRef>,
    pub created_at: DateTime<Utc>,
}

impl HistoryMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            provenance: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, provenance: Vec<SourceRef>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            provenance,
            created_at: Utc::now(),
        }
    }
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub message_count: usize,
    pub total_content_bytes: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// DocumentStore
// ============================================================================

const DOCUMENT_COLUMNS: &str = "id, owner_id, session_id, title, content, content_hash, \
     contract_type, confidence, chunk_count, storage_mode, vector_indexed, created_at";

/// 문서 저장소
pub struct DocumentStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl DocumentStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        // CASCADE 삭제에 필요
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("Failed to enable foreign keys")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                owner_id INTEGER NOT NULL,
                session_id TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                contract_type TEXT,
                confidence REAL,
                chunk_count INTEGER NOT NULL DEFAULT 0,
                storage_mode TEXT NOT NULL,
                vector_indexed INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner_id);

            CREATE TABLE IF NOT EXISTS chunks (
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                kind TEXT NOT NULL,
                article_num INTEGER,
                article_title TEXT,
                label TEXT NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (document_id, chunk_index)
            );

            CREATE TABLE IF NOT EXISTS chat_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                document_id TEXT NOT NULL UNIQUE REFERENCES documents(id) ON DELETE CASCADE,
                owner_id INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS chat_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                provenance TEXT,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create tables")?;

        tracing::debug!("Document store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 문서와 청크를 한 트랜잭션으로 저장, 새 문서 ID 반환
    pub fn add_document(&self, doc: NewDocument, chunks: &[Chunk]) -> Result<String> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        tx.execute(
            "INSERT INTO documents (id, owner_id, session_id, title, content, content_hash,
                contract_type, confidence, chunk_count, storage_mode, vector_indexed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                id,
                doc.owner_id,
                doc.session_id.to_string(),
                doc.title,
                doc.content,
                content_hash(&doc.content),
                doc.contract_type,
                doc.confidence,
                chunks.len() as i64,
                StorageMode::Persistent.as_str(),
                doc.vector_indexed as i64,
                now,
            ],
        )
        .context("Failed to insert document")?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (document_id, chunk_index, kind, article_num, article_title, label, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for chunk in chunks {
                stmt.execute(params![
                    id,
                    chunk.index as i64,
                    chunk.kind.as_str(),
                    chunk.article_num,
                    chunk.article_title,
                    chunk.label,
                    chunk.body,
                ])
                .context("Failed to insert chunk")?;
            }
        }

        tx.commit().context("Failed to commit document")?;
        tracing::info!("Added document: {} ({} chunks, id={})", doc.title, chunks.len(), id);

        Ok(id)
    }

    /// ID로 문서 조회
    pub fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let conn = self.lock()?;

        let sql = format!("SELECT {} FROM documents WHERE id = ?1", DOCUMENT_COLUMNS);
        conn.query_row(&sql, params![id], row_to_document)
            .optional()
            .context("Failed to query document")
    }

    /// 소유자가 맞을 때만 문서 조회
    pub fn get_owned_document(&self, owner_id: i64, id: &str) -> Result<Option<DocumentRecord>> {
        Ok(self
            .get_document(id)?
            .filter(|doc| doc.owner_id == owner_id))
    }

    /// 문서의 청크 (순서대로)
    pub fn get_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT chunk_index, kind, article_num, article_title, label, body FROM chunks
             WHERE document_id = ?1
             ORDER BY chunk_index",
        )?;

        let chunks = stmt
            .query_map(params![document_id], |row| {
                Ok(Chunk {
                    index: row.get::<_, i64>(0)? as usize,
                    kind: ChunkKind::parse(&row.get::<_, String>(1)?),
                    article_num: row.get(2)?,
                    article_title: row.get(3)?,
                    label: row.get(4)?,
                    body: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read chunks")?;

        Ok(chunks)
    }

    /// 사용자의 문서 목록 (최신순)
    pub fn list_documents(&self, owner_id: i64, limit: usize) -> Result<Vec<DocumentRecord>> {
        let conn = self.lock()?;

        let sql = format!(
            "SELECT {} FROM documents WHERE owner_id = ?1 ORDER BY created_at DESC LIMIT ?2",
            DOCUMENT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let docs = stmt
            .query_map(params![owner_id, limit as i64], row_to_document)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(docs)
    }

    /// 문서 삭제 (청크, 대화 포함)
    pub fn delete_document(&self, owner_id: i64, id: &str) -> Result<bool> {
        let conn = self.lock()?;

        let rows = conn.execute(
            "DELETE FROM documents WHERE id = ?1 AND owner_id = ?2",
            params![id, owner_id],
        )?;

        Ok(rows > 0)
    }

    /// 메시지 추가 (채팅 세션은 첫 메시지 때 생성)
    pub fn append_message(&self, document_id: &str, owner_id: i64, message: &HistoryMessage) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "INSERT OR IGNORE INTO chat_sessions (document_id, owner_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![document_id, owner_id, Utc::now().to_rfc3339()],
        )
        .context("Failed to create chat session")?;

        let session_id: i64 = conn
            .query_row(
                "SELECT id FROM chat_sessions WHERE document_id = ?1",
                params![document_id],
                |row| row.get(0),
            )
            .context("Failed to find chat session")?;

        let provenance = if message.provenance.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&message.provenance).context("Failed to encode provenance")?)
        };

        conn.execute(
            "INSERT INTO chat_messages (session_id, role, content, provenance, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id,
                role_str(message.role),
                message.content,
                provenance,
                message.created_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert chat message")?;

        Ok(())
    }

    /// 문서의 대화 기록 (오래된 순)
    pub fn messages(&self, document_id: &str) -> Result<Vec<HistoryMessage>> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT m.role, m.content, m.provenance, m.created_at
             FROM chat_messages m
             JOIN chat_sessions s ON s.id = m.session_id
             WHERE s.document_id = ?1
             ORDER BY m.id",
        )?;

        let rows = stmt
            .query_map(params![document_id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read chat messages")?;

        rows.into_iter()
            .map(|(role, content, provenance, created_at)| {
                let provenance = match provenance {
                    Some(json) => serde_json::from_str(&json).context("Corrupt provenance")?,
                    None => Vec::new(),
                };
                Ok(HistoryMessage {
                    role: parse_role(&role),
                    content,
                    provenance,
                    created_at: parse_datetime(created_at),
                })
            })
            .collect()
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;

        let count = |sql: &str| -> i64 { conn.query_row(sql, [], |row| row.get(0)).unwrap_or(0) };

        Ok(StoreStats {
            document_count: count("SELECT COUNT(*) FROM documents") as usize,
            chunk_count: count("SELECT COUNT(*) FROM chunks") as usize,
            message_count: count("SELECT COUNT(*) FROM chat_messages") as usize,
            total_content_bytes: count("SELECT COALESCE(SUM(LENGTH(content)), 0) FROM documents")
                as usize,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 지문 (SHA-256 hex)
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

fn row_to_document(row: &Row<'_>) -> rusqlite::Result<DocumentRecord> {
    let session: String = row.get(2)?;
    let session_id = session.parse::<SessionId>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(DocumentRecord {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        session_id,
        title: row.get(3)?,
        content: row.get(4)?,
        content_hash: row.get(5)?,
        contract_type: row.get(6)?,
        confidence: row.get(7)?,
        chunk_count: row.get::<_, i64>(8)? as usize,
        storage_mode: StorageMode::parse(&row.get::<_, String>(9)?),
        vector_indexed: row.get::<_, i64>(10)? as usize,
        created_at: parse_datetime(row.get::<_, String>(11)?),
    })
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn parse_role(s: &str) -> Role {
    match s {
        "assistant" => Role::Assistant,
        "system" => Role::System,
        _ => Role::User,
    }
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
