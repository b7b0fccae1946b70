//! 관련성 게이트
//!
//! 검색을 시작하기 전에 문서와 무관한 질문을 걸러냅니다.
//! 보안 경계가 아니라 휴리스틱 방화벽이므로, 애매하면 통과시키는 쪽으로 기웁니다.
//!
//! 판정 순서:
//! 1. 빈 질문 / 너무 짧음 / 기호뿐 → 거부
//! 2. 조항 번호 언급 → 통과 (최우선)
//! 3. 주제 이탈 패턴 → 거부
//! 4. 법률·계약 키워드 → 통과
//! 5. 문서에 실제로 있는 질문 단어가 기준 이상 → 통과
//! 6. 그 외 → 거부

use std::fmt;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::config::RelevanceConfig;

/// 질문 속 조항 번호 패턴
///
/// 두 번째 캡처가 비어 있지 않으면 금액("10조원", "10조 원")이므로 버립니다.
static ARTICLE_REFERENCE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"제\s*(\d+)\s*조()",
        r"(\d+)\s*조(\s*원)?",
        r"조항\s*(\d+)()",
        r"(?i)article\s*(\d+)()",
        r"(?i)section\s*(\d+)()",
        r"(?i)clause\s*(\d+)()",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("Invalid regex"))
    .collect()
});

/// 계약·법률 도메인 키워드 (두 글자 이상만)
pub static LEGAL_KEYWORDS: &[&str] = &[
    "계약", "조항", "계약서", "협약", "약정", "협정", "약관",
    "당사자", "발주자", "수급인", "임대인", "임차인",
    "의무", "책임", "권리", "권한", "이행", "준수", "완수",
    "위반", "위배", "불이행", "미이행", "어김",
    "대금", "비용", "요금", "수수료", "보증금", "계약금", "잔금",
    "위약금", "연체료", "지체상금", "손해배상", "배상", "보상",
    "급여", "임금", "월급", "보수", "수당", "퇴직금",
    "근로", "근무", "휴가", "휴일", "수습", "임대", "임차", "차임",
    "매매", "용역", "도급", "위탁", "위임",
    "기간", "기한", "일자", "시점", "완료", "종료", "만료",
    "연장", "갱신", "연기", "지연",
    "해지", "해제", "변경", "수정", "파기",
    "통지", "고지", "신고", "승인", "합의", "동의",
    "조건", "절차", "범위", "특약",
    "명시", "규정", "정함",
    "법적", "법률", "소송", "분쟁", "중재", "판결",
    "관할", "준거법", "효력", "무효",
    "납품", "인도", "검수", "하자", "보증", "담보",
    "면책", "귀책", "과실", "고의",
    "contract", "clause", "agreement", "terminat", "liabilit", "obligation",
    "breach", "penalt", "damages", "payment", "deposit", "party", "parties",
];

/// 질문 단어 끝에서 떼어볼 조사 (긴 것부터)
const TRAILING_PARTICLES: &[&str] = &[
    "에서", "에게", "까지", "부터", "으로", "은", "는", "이", "가", "을", "를", "의", "에",
    "와", "과", "도", "로",
];

// ============================================================================
// Decision
// ============================================================================

/// 통과 사유
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AcceptReason {
    ArticleReference(Vec<u32>),
    LegalKeyword(String),
    DocumentWords(Vec<String>),
}

/// 거부 사유
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RejectReason {
    Empty,
    TooShort,
    Meaningless,
    OffTopic(String),
    LowRelevance { document_words: usize },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::Empty => f.write_str("empty question"),
            RejectReason::TooShort => f.write_str("question too short"),
            RejectReason::Meaningless => f.write_str("question has no meaningful characters"),
            RejectReason::OffTopic(pattern) => write!(f, "off-topic pattern: {}", pattern),
            RejectReason::LowRelevance { document_words } => write!(
                f,
                "no legal keyword and only {} question words found in document",
                document_words
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RelevanceDecision {
    Accept(AcceptReason),
    Reject(RejectReason),
}

impl RelevanceDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, RelevanceDecision::Accept(_))
    }
}

// ============================================================================
// RelevanceGate
// ============================================================================

/// 관련성 게이트
#[derive(Debug, Clone)]
pub struct RelevanceGate {
    off_topic: Vec<Regex>,
    min_query_chars: usize,
    min_document_words: usize,
}

impl RelevanceGate {
    /// 설정의 패턴을 대소문자 무시로 컴파일
    pub fn new(config: &RelevanceConfig) -> Result<Self> {
        let off_topic = config
            .off_topic_patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .with_context(|| format!("Invalid off-topic pattern: {}", p))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            off_topic,
            min_query_chars: config.min_query_chars,
            min_document_words: config.min_document_words,
        })
    }

    /// 질문 판정
    ///
    /// `document_lower`는 문서 전체 텍스트를 소문자로 바꾼 것입니다.
    pub fn check(&self, query: &str, document_lower: &str) -> RelevanceDecision {
        let trimmed = query.trim();

        // 1. 퇴화 입력
        if trimmed.is_empty() {
            return RelevanceDecision::Reject(RejectReason::Empty);
        }
        if trimmed.chars().filter(|c| !c.is_whitespace()).count() < self.min_query_chars {
            return RelevanceDecision::Reject(RejectReason::TooShort);
        }
        if is_meaningless(trimmed) {
            return RelevanceDecision::Reject(RejectReason::Meaningless);
        }

        // 2. 조항 번호
        let articles = article_references(trimmed);
        if !articles.is_empty() {
            return RelevanceDecision::Accept(AcceptReason::ArticleReference(articles));
        }

        // 3. 주제 이탈
        let lowered = trimmed.to_lowercase();
        if let Some(pattern) = self.off_topic.iter().find(|re| re.is_match(&lowered)) {
            tracing::debug!("Off-topic pattern matched: {}", pattern.as_str());
            return RelevanceDecision::Reject(RejectReason::OffTopic(pattern.as_str().to_string()));
        }

        // 4. 법률 키워드
        if let Some(keyword) = LEGAL_KEYWORDS.iter().find(|kw| lowered.contains(*kw)) {
            return RelevanceDecision::Accept(AcceptReason::LegalKeyword(keyword.to_string()));
        }

        // 5. 문서 등장 단어
        let found: Vec<String> = query_words(&lowered)
            .iter()
            .filter_map(|w| found_in_document(w, document_lower))
            .collect();

        if found.len() >= self.min_document_words {
            return RelevanceDecision::Accept(AcceptReason::DocumentWords(found));
        }

        RelevanceDecision::Reject(RejectReason::LowRelevance {
            document_words: found.len(),
        })
    }
}

/// 질문에 언급된 조항 번호 (중복 제거, 등장 순)
pub fn article_references(query: &str) -> Vec<u32> {
    let mut numbers: Vec<(usize, u32)> = Vec::new();

    for re in ARTICLE_REFERENCE.iter() {
        for caps in re.captures_iter(query) {
            if caps.get(2).map(|m| !m.as_str().is_empty()).unwrap_or(false) {
                continue;
            }
            if let Some(m) = caps.get(1) {
                if let Ok(n) = m.as_str().parse::<u32>() {
                    numbers.push((m.start(), n));
                }
            }
        }
    }

    numbers.sort_by_key(|(pos, _)| *pos);
    let mut seen = Vec::new();
    for (_, n) in numbers {
        if !seen.contains(&n) {
            seen.push(n);
        }
    }
    seen
}

/// 두 글자 이상, 앞뒤 기호를 뗀 질문 단어
pub(crate) fn query_words(lowered: &str) -> Vec<String> {
    lowered
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| w.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

/// 조사를 붙인 채로, 또는 떼고 문서에서 찾은 형태
fn found_in_document(word: &str, document_lower: &str) -> Option<String> {
    if document_lower.contains(word) {
        return Some(word.to_string());
    }

    strip_particle(word)
        .filter(|stem| document_lower.contains(*stem))
        .map(str::to_string)
}

/// 끝의 조사를 뗀 어간 (두 글자 이상 남을 때만)
pub(crate) fn strip_particle(word: &str) -> Option<&str> {
    TRAILING_PARTICLES
        .iter()
        .filter_map(|p| word.strip_suffix(p))
        .find(|stem| stem.chars().count() >= 2)
}

/// 기호, 자음·모음만으로 된 질문 ("???", "ㅋㅋ")
fn is_meaningless(query: &str) -> bool {
    query.chars().all(|c| {
        c.is_whitespace()
            || c.is_ascii_punctuation()
            || matches!(c, '\u{3131}'..='\u{318E}' | '…' | '~' | '·')
    })
}

// ============================================================================
// Tests
// ============================================================================
