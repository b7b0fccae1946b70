//! 파이프라인 설정
//!
//! 청크 크기, 검색 점수 가중치, 관련성 게이트 패턴 등 모든 튜닝 값을 모읍니다.
//! 가중치와 패턴은 경험적으로 정한 기본값이므로 환경변수로 덮어쓸 수 있습니다.
//!
//! ## 환경변수
//! - `LEGAL_RAG_DATA_DIR`: 데이터 디렉토리 (기본 `~/.legal-rag/`)
//! - `LEGAL_RAG_CHUNK_SIZE`: 질의응답용 청크 크기 (문자 수)
//! - `LEGAL_RAG_SUMMARY_CHUNK_SIZE`: 요약용 청크 크기
//! - `LEGAL_RAG_TOP_K`: 최종 검색 결과 수
//! - `LEGAL_RAG_VECTOR_THRESHOLD`: 벡터 유사도 하한
//! - `LEGAL_RAG_EMBED_BATCH`: 임베딩 배치 크기 (최대 100)
//! - `LEGAL_RAG_OFF_TOPIC_PATTERNS`: 추가 주제 이탈 패턴 (`;` 구분)

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// 임베딩 API 한 번에 보낼 수 있는 최대 텍스트 수
pub const MAX_EMBED_BATCH: usize = 100;

// ============================================================================
// Data Directory
// ============================================================================

/// 기본 데이터 디렉토리 (~/.legal-rag/)
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".legal-rag")
}

// ============================================================================
// Score Weights
// ============================================================================

/// 검색 단계별 점수 가중치
///
/// 구조적 일치(조항 번호) > 정확한 키워드 > 계약 유형 특화어 > 키워드 그룹 > 벡터 순으로
/// 우선하도록 계층을 둡니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub article: f32,
    pub exact_base: f32,
    pub exact_per_occurrence: f32,
    pub specialized: f32,
    pub keyword_group_bonus: f32,
    pub vector_scale: f32,
    /// 키워드 인덱스: 조항 제목 1회 등장당 점수
    pub title_occurrence: u32,
    /// 키워드 인덱스: 본문 1회 등장당 점수
    pub body_occurrence: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            article: 100.0,
            exact_base: 80.0,
            exact_per_occurrence: 2.0,
            specialized: 70.0,
            keyword_group_bonus: 30.0,
            vector_scale: 20.0,
            title_occurrence: 15,
            body_occurrence: 3,
        }
    }
}

// ============================================================================
// Relevance Gate
// ============================================================================

/// 관련성 게이트 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevanceConfig {
    /// 이 글자 수 미만(공백 제외)의 질문은 거부
    pub min_query_chars: usize,
    /// 문서에 실제로 등장해야 하는 질문 단어 수
    pub min_document_words: usize,
    /// 주제 이탈 정규식 (대소문자 무시)
    pub off_topic_patterns: Vec<String>,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            min_query_chars: 2,
            min_document_words: 2,
            off_topic_patterns: default_off_topic_patterns(),
        }
    }
}

/// 기본 주제 이탈 패턴
///
/// 한 글자 단어(비, 눈)나 법률 용어와 겹치는 단어(시간, 날짜)는 넣지 않습니다.
/// "근로시간", "계약 날짜" 같은 정상 질문이 걸리기 때문입니다.
pub fn default_off_topic_patterns() -> Vec<String> {
    [
        r"날씨|기온|미세먼지|일기\s*예보|weather|forecast",
        r"뉴스|스포츠|축구|야구|농구|연예인|아이돌|\bnews\b|\bsports?\b",
        r"요리|레시피|맛집|음식\s*추천|recipe|restaurant",
        r"영화|드라마|음악|노래|예능|\bmovies?\b|\bmusic\b|\bsongs?\b",
        r"게임|롤\s|배그|\bgames?\b|\bgaming\b",
        r"정치|대통령|선거|국회의원|election|president",
        r"여행|관광|휴가지|호텔\s*추천|\btravel\b|vacation",
        r"다이어트|운동\s*방법|헬스장|병원\s*추천|\bdiet\b|\bworkout\b",
        r"숙제|시험\s*공부|수능|homework",
        r"컴퓨터\s*추천|노트북\s*추천|스마트폰\s*추천|프로그래밍|코딩",
        r"수학\s*문제|방정식|미적분|\bmath\b|equation",
        r"역사\s*(?:인물|사건)|조선\s*시대|세계\s*대전",
        r"너는\s*누구|당신은\s*누구|(?:ai|인공지능)\s*(?:야|니|이야|입니까)|who\s+are\s+you",
        r"^\s*(?:안녕|안녕하세요|하이|헬로|hello|hi|hey|반가워)[\s!.?~]*$",
        r"^\s*(?:고마워|감사합니다|감사해요|thanks?|thank\s+you)[\s!.?~]*$",
        r"^\s*(?:네|예|응|아니|아니요|ok|okay|yes|no)[\s!.?~]*$",
        r"몇\s*시야|지금\s*몇\s*시|오늘\s*며칠|무슨\s*요일|what\s+time\s+is\s+it",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

// ============================================================================
// Quality Gate
// ============================================================================

/// 위험 분석 품질 게이트 임계값
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityThresholds {
    /// 최소 길이 (문자 수)
    pub min_length: usize,
    /// 최소 `**` 강조 표시 수
    pub min_bold_markers: usize,
    /// 통과에 필요한 항목 비율
    pub pass_ratio: f32,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_length: 500,
            min_bold_markers: 8,
            pass_ratio: 0.7,
        }
    }
}

// ============================================================================
// RagConfig
// ============================================================================

/// 파이프라인 전체 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagConfig {
    pub data_dir: PathBuf,
    /// 질의응답용 청크 크기 (문자 수)
    pub chunk_size: usize,
    /// 요약 map 단계용 청크 크기
    pub summary_chunk_size: usize,
    pub top_k: usize,
    pub weights: ScoreWeights,
    /// 정확 키워드 단계: 단어당 유지할 결과 수
    pub exact_matches_per_keyword: usize,
    /// 정확 키워드 단계: 전체 유지할 결과 수
    pub exact_matches_total: usize,
    /// 이 유사도 이하의 벡터 결과는 버림
    pub vector_similarity_threshold: f32,
    /// 어휘 기반 결과가 이 수 미만일 때만 벡터 검색 실행
    pub vector_fallback_below: usize,
    pub embed_batch_size: usize,
    pub embed_batch_pause_ms: u64,
    /// 요약 reduce 단계에서 한 번에 합칠 요약 수
    pub summary_fan_in: usize,
    pub quality: QualityThresholds,
    pub relevance: RelevanceConfig,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            chunk_size: 1000,
            summary_chunk_size: 2000,
            top_k: 3,
            weights: ScoreWeights::default(),
            exact_matches_per_keyword: 3,
            exact_matches_total: 5,
            vector_similarity_threshold: 0.5,
            vector_fallback_below: 2,
            embed_batch_size: MAX_EMBED_BATCH,
            embed_batch_pause_ms: 500,
            summary_fan_in: 10,
            quality: QualityThresholds::default(),
            relevance: RelevanceConfig::default(),
        }
    }
}

impl RagConfig {
    /// 기본값에 `LEGAL_RAG_*` 환경변수를 덮어쓴 설정
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(dir) = env_string("LEGAL_RAG_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(size) = env_parse("LEGAL_RAG_CHUNK_SIZE")? {
            config.chunk_size = size;
        }
        if let Some(size) = env_parse("LEGAL_RAG_SUMMARY_CHUNK_SIZE")? {
            config.summary_chunk_size = size;
        }
        if let Some(top_k) = env_parse("LEGAL_RAG_TOP_K")? {
            config.top_k = top_k;
        }
        if let Some(threshold) = env_parse("LEGAL_RAG_VECTOR_THRESHOLD")? {
            config.vector_similarity_threshold = threshold;
        }
        if let Some(batch) = env_parse("LEGAL_RAG_EMBED_BATCH")? {
            config.embed_batch_size = batch;
        }
        if let Some(patterns) = env_string("LEGAL_RAG_OFF_TOPIC_PATTERNS") {
            config.relevance.off_topic_patterns.extend(
                patterns
                    .split(';')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string),
            );
        }

        config.validate()?;
        Ok(config)
    }

    /// 값 범위 검증
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 || self.summary_chunk_size == 0 {
            anyhow::bail!("chunk size must be greater than zero");
        }
        if self.top_k == 0 {
            anyhow::bail!("top_k must be greater than zero");
        }
        if self.embed_batch_size == 0 || self.embed_batch_size > MAX_EMBED_BATCH {
            anyhow::bail!(
                "embedding batch size must be between 1 and {}, got {}",
                MAX_EMBED_BATCH,
                self.embed_batch_size
            );
        }
        if self.summary_fan_in < 2 {
            anyhow::bail!("summary fan-in must be at least 2");
        }
        if !(0.0..=1.0).contains(&self.vector_similarity_threshold) {
            anyhow::bail!(
                "vector similarity threshold must be within 0.0..=1.0, got {}",
                self.vector_similarity_threshold
            );
        }
        Ok(())
    }

    pub fn embed_batch_pause(&self) -> Duration {
        Duration::from_millis(self.embed_batch_pause_ms)
    }

    /// SQLite 문서 DB 경로
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("legal.db")
    }

    /// LanceDB 디렉토리 경로
    pub fn vector_path(&self) -> PathBuf {
        self.data_dir.join("vectors.lance")
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_string(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Invalid value for {}: {}", name, raw))
        })
        .transpose()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_keep_tier_order() {
        let w = ScoreWeights::default();
        assert!(w.article > w.exact_base);
        assert!(w.exact_base > w.specialized);
        assert_eq!(w.title_occurrence, 15);
        assert_eq!(w.body_occurrence, 3);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.top_k, 3);
        assert!(config.database_path().ends_with("legal.db"));
        assert!(config.vector_path().ends_with("vectors.lance"));
    }

    #[test]
    fn test_validate_rejects_oversized_batch() {
        let config = RagConfig {
            embed_batch_size: 101,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_patterns_compile() {
        for pattern in default_off_topic_patterns() {
            assert!(regex::Regex::new(&pattern).is_ok(), "bad pattern: {}", pattern);
        }
    }
}
