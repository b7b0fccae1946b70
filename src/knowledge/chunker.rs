//! 조항 인식 청킹
//!
//! 계약서를 "제N조" / "Article N" 경계에서 먼저 자르고, 여전히 큰 조각은
//! 문단 → 줄 → 문장 → 공백 → 글자 단위 순으로 재귀 분할합니다.
//!
//! 청크 본문은 원문의 연속 구간을 그대로 잘라낸 것이므로, 모든 청크의 `body`를
//! 이어 붙이면 원문과 정확히 같아집니다. 조항 정보는 본문이 아니라 [`Chunk::text`]가
//! 붙이는 접두어로만 들어갑니다.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 조항 표시가 없는 구간의 라벨
pub const PREAMBLE_LABEL: &str = "서문";

/// 줄 시작의 조항 머리 (제1조, 제 12 조 (목적), Article 5 (Termination))
static ARTICLE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?mi)^[ \t]*(?:제\s*(\d+)\s*조|article\s+(\d+))[ \t]*(?:[(（【\[]([^)）】\]\n]+)[)）】\]])?",
    )
    .expect("Invalid regex")
});

/// 재귀 분할 구분자 (우선순위 순)
static SEPARATORS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\n[ \t]*\n\s*",          // 문단
        r"\n",                     // 줄
        r#"[.!?。][\)\]'"]*\s+"#, // 문장
        r"\s+",                    // 공백
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid regex"))
    .collect()
});

// ============================================================================
// Chunk
// ============================================================================

/// 청크 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// 조항에서 나온 청크
    Article,
    /// 조항 표시가 없는 구간(서문 등)
    Paragraph,
}

impl ChunkKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChunkKind::Article => "article",
            ChunkKind::Paragraph => "paragraph",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "article" {
            ChunkKind::Article
        } else {
            ChunkKind::Paragraph
        }
    }
}

/// 검색 단위 청크
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// 문서 내 순번 (0부터, 임베딩 순서와 동일)
    pub index: usize,
    pub kind: ChunkKind,
    pub article_num: Option<u32>,
    pub article_title: Option<String>,
    /// "제3조 (해지)" 또는 "서문"
    pub label: String,
    /// 원문 구간 (접두어 없음)
    pub body: String,
}

impl Chunk {
    /// 조항 접두어를 붙인 독립 해석 가능한 텍스트
    pub fn text(&self) -> String {
        format!("참고 조항: {}\n\n내용:\n{}", self.label, self.body.trim())
    }

    /// 임베딩용 텍스트
    ///
    /// 조항 라벨을 반복해 제목어가 유사도에 더 크게 반영되게 합니다.
    pub fn embedding_text(&self) -> String {
        format!(
            "{} {} {} {}",
            self.label,
            self.label,
            self.label,
            self.body.trim()
        )
    }

    /// 크기 제한 판정에 쓰는 길이 (앞뒤 공백 제외 글자 수)
    pub fn body_len(&self) -> usize {
        measure(&self.body)
    }
}

// ============================================================================
// Chunk Configuration
// ============================================================================

/// 청킹 설정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// 청크 본문 최대 글자 수
    pub target_size: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self::for_qa()
    }
}

impl ChunkConfig {
    pub fn new(target_size: usize) -> Self {
        Self {
            target_size: target_size.max(1),
        }
    }

    /// 질의응답 검색용
    pub fn for_qa() -> Self {
        Self::new(1000)
    }

    /// 요약 map 단계용 (큰 청크)
    pub fn for_summary() -> Self {
        Self::new(2000)
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    fn chunk(&self, text: &str) -> Vec<Chunk>;

    fn name(&self) -> &'static str;
}

// ============================================================================
// ArticleChunker
// ============================================================================

/// 조항 경계 우선 청커
pub struct ArticleChunker {
    config: ChunkConfig,
}

/// 조항 분할 결과 구간
#[derive(Debug)]
struct Segment {
    range: Range<usize>,
    article_num: Option<u32>,
    article_title: Option<String>,
}

impl Segment {
    fn label(&self) -> String {
        match (self.article_num, &self.article_title) {
            (Some(n), Some(title)) => format!("제{}조 ({})", n, title),
            (Some(n), None) => format!("제{}조", n),
            (None, _) => PREAMBLE_LABEL.to_string(),
        }
    }

    fn kind(&self) -> ChunkKind {
        if self.article_num.is_some() {
            ChunkKind::Article
        } else {
            ChunkKind::Paragraph
        }
    }
}

impl ArticleChunker {
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }

    pub fn config(&self) -> ChunkConfig {
        self.config
    }

    /// 조항 머리 위치로 구간 분할
    ///
    /// 공백뿐인 서문은 첫 조항에 붙입니다.
    fn split_articles(text: &str) -> Vec<Segment> {
        let headers: Vec<(usize, u32, Option<String>)> = ARTICLE_HEADER
            .captures_iter(text)
            .filter_map(|caps| {
                let start = caps.get(0)?.start();
                let num = caps
                    .get(1)
                    .or_else(|| caps.get(2))
                    .and_then(|m| m.as_str().parse::<u32>().ok())?;
                let title = caps
                    .get(3)
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|t| !t.is_empty());
                Some((start, num, title))
            })
            .collect();

        if headers.is_empty() {
            return vec![Segment {
                range: 0..text.len(),
                article_num: None,
                article_title: None,
            }];
        }

        let mut segments = Vec::with_capacity(headers.len() + 1);
        let first_start = headers[0].0;
        let preamble_is_blank = text[..first_start].trim().is_empty();

        if !preamble_is_blank {
            segments.push(Segment {
                range: 0..first_start,
                article_num: None,
                article_title: None,
            });
        }

        for (i, (start, num, title)) in headers.iter().enumerate() {
            let start = if i == 0 && preamble_is_blank { 0 } else { *start };
            let end = headers.get(i + 1).map(|h| h.0).unwrap_or(text.len());
            segments.push(Segment {
                range: start..end,
                article_num: Some(*num),
                article_title: title.clone(),
            });
        }

        segments
    }
}

impl Chunker for ArticleChunker {
    fn chunk(&self, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return vec![];
        }

        // 1. 조항 경계로 구간 분할
        let segments = Self::split_articles(text);

        // 2. 구간별 크기 분할
        let mut chunks: Vec<Chunk> = Vec::new();
        for segment in &segments {
            let label = segment.label();
            let base = segment.range.start;
            let segment_text = &text[segment.range.clone()];

            for piece in split_to_size(segment_text, self.config.target_size, 0) {
                let body = &text[base + piece.start..base + piece.end];

                // 3. 공백뿐인 조각은 앞 청크에 붙임
                if body.trim().is_empty() {
                    if let Some(last) = chunks.last_mut() {
                        last.body.push_str(body);
                        continue;
                    }
                }

                chunks.push(Chunk {
                    index: chunks.len(),
                    kind: segment.kind(),
                    article_num: segment.article_num,
                    article_title: segment.article_title.clone(),
                    label: label.clone(),
                    body: body.to_string(),
                });
            }
        }

        tracing::debug!(
            "Chunked {} chars into {} chunks ({} segments)",
            text.chars().count(),
            chunks.len(),
            segments.len()
        );

        chunks
    }

    fn name(&self) -> &'static str {
        "ArticleChunker"
    }
}

// ============================================================================
// Recursive Size Split
// ============================================================================

/// 앞뒤 공백을 제외한 글자 수
fn measure(s: &str) -> usize {
    s.trim().chars().count()
}

/// `text`를 `max` 이하 조각들의 연속 범위로 분할
///
/// 반환 범위들은 빈틈 없이 `0..text.len()`을 덮습니다.
fn split_to_size(text: &str, max: usize, level: usize) -> Vec<Range<usize>> {
    if measure(text) <= max {
        return vec![0..text.len()];
    }

    let Some(separator) = SEPARATORS.get(level) else {
        return hard_cut(text, max);
    };

    let pieces = split_inclusive(text, separator);
    if pieces.len() <= 1 {
        return split_to_size(text, max, level + 1);
    }

    // 큰 조각은 다음 구분자로 더 쪼갠 뒤 이웃끼리 다시 채워 넣음
    let mut units: Vec<Range<usize>> = Vec::with_capacity(pieces.len());
    for piece in pieces {
        let piece_text = &text[piece.clone()];
        if measure(piece_text) > max {
            units.extend(
                split_to_size(piece_text, max, level + 1)
                    .into_iter()
                    .map(|r| piece.start + r.start..piece.start + r.end),
            );
        } else {
            units.push(piece);
        }
    }

    pack(text, units, max)
}

/// 구분자 매치 끝에서 자르기 (구분자는 앞 조각에 포함)
fn split_inclusive(text: &str, separator: &Regex) -> Vec<Range<usize>> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for m in separator.find_iter(text) {
        if m.end() > last {
            pieces.push(last..m.end());
            last = m.end();
        }
    }
    if last < text.len() {
        pieces.push(last..text.len());
    }
    pieces
}

/// 인접 조각을 `max`를 넘지 않는 한 탐욕적으로 합침
fn pack(text: &str, units: Vec<Range<usize>>, max: usize) -> Vec<Range<usize>> {
    let mut packed = Vec::new();
    let mut current: Option<Range<usize>> = None;

    for unit in units {
        current = match current {
            None => Some(unit),
            Some(cur) => {
                if measure(&text[cur.start..unit.end]) <= max {
                    Some(cur.start..unit.end)
                } else {
                    packed.push(cur);
                    Some(unit)
                }
            }
        };
    }

    if let Some(cur) = current {
        packed.push(cur);
    }
    packed
}

/// 글자 경계에서 `max`자씩 강제 절단
fn hard_cut(text: &str, max: usize) -> Vec<Range<usize>> {
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .step_by(max.max(1))
        .chain(std::iter::once(text.len()))
        .collect();

    boundaries
        .windows(2)
        .filter(|w| w[0] < w[1])
        .map(|w| w[0]..w[1])
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
