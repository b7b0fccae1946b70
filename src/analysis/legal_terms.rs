//! 계약서 위험 신호, 핵심 정보, 용어 풀이
//!
//! 프롬프트 재료와 템플릿 폴백에 쓰이는 정규식 기반 추출기입니다.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::knowledge::Classification;

static LIABILITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"손해배상|배상책임|배상의무|손실보상|피해보상|손해|배상").expect("Invalid regex")
});

static TERMINATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"해지|해제|종료|중단|파기|취소|철회").expect("Invalid regex"));

static OBLIGATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"의무|책임|이행|준수|완수|수행|실행").expect("Invalid regex"));

static PENALTY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"위약금|연체료|지체상금|벌금|과태료|제재|처벌|징계").expect("Invalid regex")
});

static FINANCIAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"대금|비용|요금|수수료|보증금|위약금|연체료|지체상금|계약금|잔금")
        .expect("Invalid regex")
});

static PERIOD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"기간|기한|일자|날짜|시점|시기|완료|종료|만료").expect("Invalid regex")
});

const GENERAL_KEYWORDS: &[&str] = &["계약", "당사자", "의무", "권리", "책임", "조건", "기준", "방법"];

/// 어려운 법률 용어와 쉬운 풀이
pub static GLOSSARY: &[(&str, &str)] = &[
    ("해지", "계약을 중간에 끝내는 것"),
    ("위반", "약속이나 규정을 어기는 것"),
    ("배상", "손해를 보상해주는 것"),
    ("이행", "약속한 것을 실제로 지키는 것"),
    ("귀책사유", "잘못의 원인이 되는 이유"),
    ("임대인", "집이나 건물을 빌려주는 사람"),
    ("임차인", "집이나 건물을 빌리는 사람"),
    ("보증금", "계약을 보장하기 위해 미리 맡기는 돈"),
    ("연체료", "정해진 기한을 넘겨서 내는 벌금"),
    ("원상복구", "원래 상태로 되돌리는 것"),
];

/// 위험 분석 템플릿에 나열할 최대 키워드 수
const TEMPLATE_KEYWORDS: usize = 5;

// ============================================================================
// Risk Signals
// ============================================================================

/// 위험 관련 용어 (등장 순, 중복 제거)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RiskSignals {
    pub liability: Vec<String>,
    pub termination: Vec<String>,
    pub obligation: Vec<String>,
    pub penalty: Vec<String>,
}

impl RiskSignals {
    pub fn extract(text: &str) -> Self {
        Self {
            liability: unique_matches(&LIABILITY, text),
            termination: unique_matches(&TERMINATION, text),
            obligation: unique_matches(&OBLIGATION, text),
            penalty: unique_matches(&PENALTY, text),
        }
    }

    /// 손해배상 + 해지 + 제재 용어
    pub fn risk_keywords(&self) -> Vec<&str> {
        self.liability
            .iter()
            .chain(&self.termination)
            .chain(&self.penalty)
            .map(String::as_str)
            .collect()
    }

    /// 템플릿용 상위 키워드 문자열
    pub fn headline(&self) -> String {
        let keywords = self.risk_keywords();
        if keywords.is_empty() {
            "일반적인 계약 위험".to_string()
        } else {
            keywords
                .into_iter()
                .take(TEMPLATE_KEYWORDS)
                .collect::<Vec<_>>()
                .join(", ")
        }
    }
}

// ============================================================================
// Key Contract Info
// ============================================================================

/// 요약 프롬프트에 넣을 핵심 정보
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KeyContractInfo {
    pub contract_type: Option<String>,
    pub keywords: Vec<String>,
    pub financial_terms: Vec<String>,
    pub period_terms: Vec<String>,
}

impl KeyContractInfo {
    pub fn extract(text: &str, classification: &Classification) -> Self {
        Self {
            contract_type: classification.contract_type().map(str::to_string),
            keywords: GENERAL_KEYWORDS
                .iter()
                .filter(|kw| text.contains(*kw))
                .map(|kw| kw.to_string())
                .collect(),
            financial_terms: unique_matches(&FINANCIAL, text),
            period_terms: unique_matches(&PERIOD, text),
        }
    }
}

// ============================================================================
// Glossary
// ============================================================================

/// 텍스트에 나온 용어의 풀이 섹션 (없으면 `None`)
///
/// 긴 용어부터 나열합니다.
pub fn glossary_section(text: &str) -> Option<String> {
    let mut found: Vec<&(&str, &str)> = GLOSSARY
        .iter()
        .filter(|(term, _)| text.contains(term))
        .collect();

    if found.is_empty() {
        return None;
    }

    found.sort_by_key(|(term, _)| std::cmp::Reverse(term.chars().count()));
    let lines: Vec<String> = found
        .iter()
        .map(|(term, explanation)| format!("**{}**: {}", term, explanation))
        .collect();

    Some(format!("\n\n## 어려운 용어 설명\n{}", lines.join("\n")))
}

fn unique_matches(re: &Regex, text: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for m in re.find_iter(text) {
        if !seen.iter().any(|s| s == m.as_str()) {
            seen.push(m.as_str().to_string());
        }
    }
    seen
}

// ============================================================================
// Tests
// ============================================================================
