//! CLI 모듈
//!
//! legal-rag CLI 명령어 정의 및 구현

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::assistant::{
    AskRequest, AskResponse, DocumentRef, LegalAssistant, Owner, Storage, Upload,
};
use crate::config::RagConfig;
use crate::embedding::create_embedder;
use crate::gemini::has_api_key;
use crate::knowledge::{HistoryMessage, SourceRef, StorageMode};
use crate::language::Language;
use crate::llm::{GeminiCompletion, Role};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "legal-rag")]
#[command(version, about = "계약서 분석 및 조항 기반 질의응답", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 계약서 업로드 후 요약/위험 분석
    Analyze {
        /// 계약서 파일 (txt, pdf, docx)
        file: PathBuf,

        /// 사용자 ID (지정하면 영구 저장, 없으면 익명 세션)
        #[arg(short, long)]
        user: Option<i64>,

        /// 결과 언어 (ko, en, ja, zh, es)
        #[arg(short, long, default_value = "ko")]
        lang: Language,

        /// 익명 세션 토큰을 저장할 파일
        #[arg(long)]
        session_out: Option<PathBuf>,

        /// 업로드만 하고 분석은 건너뛰기
        #[arg(long)]
        skip_analysis: bool,
    },

    /// 계약서에 질문
    Ask {
        /// 질문
        question: String,

        /// 사용자 ID (저장된 문서 질문 시)
        #[arg(short, long)]
        user: Option<i64>,

        /// 저장된 문서 ID
        #[arg(short, long)]
        document: Option<String>,

        /// 익명 세션 토큰 파일 (질문 후 갱신됨)
        #[arg(short, long)]
        session: Option<PathBuf>,

        /// 답변 언어
        #[arg(short, long, default_value = "ko")]
        lang: Language,

        /// 응답 객체를 JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 문서의 대화 기록
    History {
        #[arg(short, long)]
        user: i64,

        #[arg(short, long)]
        document: String,
    },

    /// 저장된 문서 목록
    List {
        #[arg(short, long)]
        user: i64,

        /// 결과 개수 제한
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// 문서 삭제 (대화 기록과 벡터 포함)
    Delete {
        #[arg(short, long)]
        user: i64,

        #[arg(short, long)]
        document: String,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = RagConfig::from_env().context("설정 로드 실패")?;

    match cli.command {
        Commands::Analyze {
            file,
            user,
            lang,
            session_out,
            skip_analysis,
        } => cmd_analyze(config, &file, user, lang, session_out, skip_analysis).await,
        Commands::Ask {
            question,
            user,
            document,
            session,
            lang,
            json,
        } => cmd_ask(config, question, user, document, session, lang, json).await,
        Commands::History { user, document } => cmd_history(&config, user, &document).await,
        Commands::List { user, limit } => cmd_list(&config, user, limit).await,
        Commands::Delete { user, document } => cmd_delete(&config, user, &document).await,
        Commands::Status => cmd_status(&config).await,
    }
}

/// API 키 확인 후 파이프라인 생성
async fn open_assistant(config: RagConfig) -> Result<LegalAssistant> {
    if !has_api_key() {
        bail!(
            "API 키가 설정되지 않았습니다.\n\n\
             설정 방법:\n  \
             export GEMINI_API_KEY=your-api-key\n  \
             또는\n  \
             export GOOGLE_AI_API_KEY=your-api-key\n\n\
             API 키 발급: https://aistudio.google.com/app/apikey"
        );
    }

    let llm = Arc::new(GeminiCompletion::from_env().context("언어 모델 클라이언트 생성 실패")?);
    let embedder = Arc::new(create_embedder().context("임베딩 클라이언트 생성 실패")?);

    LegalAssistant::open(config, llm, embedder)
        .await
        .context("파이프라인 초기화 실패")
}

// ============================================================================
// Command Implementations
// ============================================================================

/// 분석 명령어 (analyze)
///
/// 계약서를 업로드하고 요약과 위험 분석을 출력합니다.
async fn cmd_analyze(
    config: RagConfig,
    file: &Path,
    user: Option<i64>,
    lang: Language,
    session_out: Option<PathBuf>,
    skip_analysis: bool,
) -> Result<()> {
    let assistant = open_assistant(config).await?;

    println!("[*] 문서 처리 중: {}", file.display());

    let upload = Upload::from_path(file).await?;
    let owner = user.map_or(Owner::Anonymous, Owner::User);
    let processed = assistant
        .process_upload(upload, owner)
        .await
        .with_context(|| format!("문서 처리 실패: {}", file.display()))?;

    match processed.classification.best() {
        Some(best) => {
            println!(
                "[OK] 계약 유형: {} (용어 {}개 일치, {:.1}%)",
                best.contract_type, best.score, best.percentage
            );
            if let Some(description) = processed.classification.description() {
                println!("     {}", description);
            }
            println!("     일치 용어: {}", best.matched_terms.join(", "));
        }
        None => println!("[!] 계약 유형을 판별하지 못했습니다"),
    }
    println!(
        "     청크: {} | 벡터: {} | 저장: {}",
        processed.chunk_count, processed.vector_count, processed.storage_mode
    );

    match &processed.document {
        DocumentRef::Stored { document_id, .. } => {
            println!("[OK] 문서 ID: {}", document_id);
        }
        DocumentRef::Session(token) => match session_out {
            Some(ref path) => {
                tokio::fs::write(path, token)
                    .await
                    .with_context(|| format!("세션 토큰 저장 실패: {}", path.display()))?;
                println!("[OK] 세션 토큰 저장: {}", path.display());
            }
            None => println!("[!] 익명 세션입니다. 질문하려면 --session-out으로 토큰을 저장하세요."),
        },
    }

    if skip_analysis {
        return Ok(());
    }

    println!("\n[*] 분석 중 ({})...\n", lang.native_name());
    let analysis = assistant.analyze(&processed.document, lang).await?;

    println!("{}\n", analysis.summary);
    println!("{}\n", analysis.risk_analysis);

    if analysis.translation_failed {
        println!("[!] 번역에 실패해 한국어 결과를 표시합니다");
    }
    if analysis.is_degraded() {
        println!(
            "[!] 일부 결과는 템플릿으로 생성되었습니다 (요약: {}, 위험 분석: {})",
            analysis.summary_quality.as_str(),
            analysis.risk_quality.as_str()
        );
    }

    Ok(())
}

/// 질문 명령어 (ask)
async fn cmd_ask(
    config: RagConfig,
    question: String,
    user: Option<i64>,
    document: Option<String>,
    session: Option<PathBuf>,
    lang: Language,
    json: bool,
) -> Result<()> {
    let document = match (user, document, &session) {
        (Some(owner_id), Some(document_id), None) => DocumentRef::Stored {
            owner_id,
            document_id,
        },
        (None, None, Some(path)) => {
            let token = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("세션 토큰 읽기 실패: {}", path.display()))?;
            DocumentRef::Session(token)
        }
        _ => bail!("--user와 --document 또는 --session 중 하나를 지정해야 합니다"),
    };

    let assistant = open_assistant(config).await?;
    let response = assistant
        .ask(AskRequest {
            question,
            document,
            language: lang,
        })
        .await;

    // 갱신된 세션 토큰 저장
    if let (Some(path), AskResponse::Answer {
        session_token: Some(token),
        ..
    }) = (&session, &response)
    {
        tokio::fs::write(path, token)
            .await
            .with_context(|| format!("세션 토큰 저장 실패: {}", path.display()))?;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
        return Ok(());
    }

    match response {
        AskResponse::Answer {
            answer, provenance, ..
        } => {
            println!("{}\n", answer);
            print_provenance(&provenance);
        }
        AskResponse::Error { error, code } => {
            println!("[!] {} ({})", error, code);
            if !code.is_client_error() {
                println!("    잠시 후 다시 시도해주세요.");
            }
        }
    }

    Ok(())
}

/// 기록 명령어 (history)
async fn cmd_history(config: &RagConfig, user: i64, document: &str) -> Result<()> {
    let storage = Storage::open(config).await.context("저장소 열기 실패")?;
    let messages = storage.history(user, document)?;

    if messages.is_empty() {
        println!("[!] 대화 기록이 없습니다.");
        return Ok(());
    }

    println!("[OK] 대화 기록 ({} 건):\n", messages.len());
    for message in &messages {
        print_message(message);
    }

    Ok(())
}

/// 목록 명령어 (list)
///
/// 사용자의 저장된 문서 목록을 조회합니다.
async fn cmd_list(config: &RagConfig, user: i64, limit: usize) -> Result<()> {
    let storage = Storage::open(config).await.context("저장소 열기 실패")?;
    let docs = storage.list(user, limit)?;

    if docs.is_empty() {
        println!("[!] 저장된 문서가 없습니다.");
        return Ok(());
    }

    println!("[OK] 저장된 문서 ({} 건):\n", docs.len());

    for doc in docs {
        let contract_type = doc.contract_type.as_deref().unwrap_or("-");

        println!("  {} [{}] {}", doc.id, contract_type, truncate_text(&doc.title, 40));
        println!(
            "        {} | {} chars | {} chunks ({} vectors)",
            doc.created_at.format("%Y-%m-%d %H:%M"),
            doc.content.chars().count(),
            doc.chunk_count,
            doc.vector_indexed
        );
        println!();
    }

    Ok(())
}

/// 삭제 명령어 (delete)
async fn cmd_delete(config: &RagConfig, user: i64, document: &str) -> Result<()> {
    let storage = Storage::open(config).await.context("저장소 열기 실패")?;
    let removed = storage.delete_document(user, document).await?;

    println!("[OK] 문서 {} 삭제됨 (벡터 {}개)", document, removed);
    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(config: &RagConfig) -> Result<()> {
    println!("legal-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();

    println!("[*] 데이터 디렉토리: {}", config.data_dir.display());

    if has_api_key() {
        println!("[OK] API 키: 설정됨");
    } else {
        println!("[!] API 키: 미설정");
        println!("    설정: export GEMINI_API_KEY=your-key");
    }

    let storage = match Storage::open(config).await {
        Ok(storage) => storage,
        Err(e) => {
            println!("[!] 저장소 열기 실패: {}", e);
            return Ok(());
        }
    };

    match storage.documents().stats() {
        Ok(stats) => {
            println!("[OK] 저장된 문서: {} 건", stats.document_count);
            println!("     청크: {} | 대화 메시지: {}", stats.chunk_count, stats.message_count);
            println!("     총 콘텐츠: {}", format_bytes(stats.total_content_bytes));
        }
        Err(e) => println!("[!] 통계 조회 실패: {}", e),
    }

    match storage.vectors().count(None).await {
        Ok(count) => println!("[OK] 벡터 인덱스 ({}): {} 청크", StorageMode::Persistent, count),
        Err(e) => tracing::debug!("Vector count failed: {}", e),
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn print_provenance(provenance: &[SourceRef]) {
    if provenance.is_empty() {
        return;
    }

    println!("근거 조항:");
    for source in provenance {
        println!(
            "  - {} [{}] (점수: {:.1})",
            source.label, source.method, source.score
        );
    }
}

fn print_message(message: &HistoryMessage) {
    let role = match message.role {
        Role::User => "Q",
        Role::Assistant => "A",
        Role::System => "S",
    };

    println!(
        "[{}] {} {}",
        message.created_at.format("%Y-%m-%d %H:%M"),
        role,
        truncate_text(&message.content, 200)
    );
    for source in &message.provenance {
        println!("      - {} [{}]", source.label, source.method.label());
    }
}

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("hello", 10), "hello");
        assert_eq!(truncate_text("hello world", 5), "hello...");
        assert_eq!(truncate_text("제1조\n목적", 20), "제1조 목적");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(1048576), "1.00 MB");
    }

    #[test]
    fn test_truncate_unicode() {
        assert_eq!(truncate_text("근로계약서 제2조", 5), "근로계약서...");
    }

    #[test]
    fn test_parse_ask_command() {
        let cli = Cli::try_parse_from([
            "legal-rag", "ask", "제2조가 뭐야?", "--session", "token.txt", "--lang", "en",
        ])
        .unwrap();

        match cli.command {
            Commands::Ask {
                question,
                session,
                lang,
                ..
            } => {
                assert_eq!(question, "제2조가 뭐야?");
                assert_eq!(session, Some(PathBuf::from("token.txt")));
                assert_eq!(lang, Language::English);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_language() {
        assert!(Cli::try_parse_from(["legal-rag", "analyze", "a.txt", "--lang", "xx"]).is_err());
    }
}
