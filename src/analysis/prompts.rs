//! 언어 모델 프롬프트와 템플릿 폴백
//!
//! 모든 분석 프롬프트는 한국어로 작성하고, 번역은 완성된 결과에만 적용합니다.

use crate::language::Language;
use crate::llm::{ChatMessage, CompletionOptions};

use super::legal_terms::{KeyContractInfo, RiskSignals};

/// 요약 프롬프트에 넣을 최대 원문 길이 (문자 수)
pub const SUMMARY_INPUT_CHARS: usize = 7000;
/// 위험 분석 프롬프트에 넣을 최대 원문 길이
pub const RISK_INPUT_CHARS: usize = 8000;

pub const ANSWER_OPTIONS: CompletionOptions = CompletionOptions::new(1000, 0.03);
pub const STRICT_ANSWER_OPTIONS: CompletionOptions = CompletionOptions::new(800, 0.01);
pub const SUMMARY_OPTIONS: CompletionOptions = CompletionOptions::new(1200, 0.1);
pub const RISK_OPTIONS: CompletionOptions = CompletionOptions::new(1500, 0.05);
pub const TRANSLATION_OPTIONS: CompletionOptions = CompletionOptions::new(2000, 0.1);

const ANALYST_ROLE: &str = "당신은 한국 계약서를 분석하는 법률 문서 전문가입니다. \
    반드시 주어진 문서 내용만 근거로 한국어로 작성합니다.";

/// 번역 대상 콘텐츠 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Summary,
    RiskAnalysis,
    Answer,
}

impl ContentKind {
    fn description(self) -> &'static str {
        match self {
            ContentKind::Summary => "contract summary",
            ContentKind::RiskAnalysis => "contract risk analysis",
            ContentKind::Answer => "answer about a contract",
        }
    }
}

/// 문자 경계를 지키며 앞부분만 자름
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ============================================================================
// Q&A
// ============================================================================

pub fn answer_messages(question: &str, context: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "당신은 업로드된 계약서 내용만으로 답변하는 도우미입니다.\n\
             규칙:\n\
             1. 아래 [계약서 내용]에 있는 정보만 사용합니다.\n\
             2. 일반 법률 지식이나 추측으로 답하지 않습니다.\n\
             3. 답변에 근거가 된 조항 번호(예: 제2조)를 밝힙니다.\n\
             4. 문서에 없는 내용이면 \"계약서에서 해당 내용을 찾을 수 없습니다\"라고 답합니다.",
        ),
        ChatMessage::user(format!(
            "[계약서 내용]\n{}\n\n[질문]\n{}\n\n계약서 내용만 근거로 답변하세요.",
            context, question
        )),
    ]
}

/// 근거 확인에 실패한 답변을 다시 생성할 때 쓰는 엄격한 프롬프트
pub fn strict_answer_messages(question: &str, context: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(
            "당신은 계약서 인용만으로 답변합니다. \
             '일반적으로', '보통', '법률상' 같은 일반론 표현은 금지합니다.\n\
             답변 형식:\n\
             계약서 제N조에 따르면 \"(원문 인용)\"으로 규정되어 있습니다.\n\
             문서에 없으면 \"계약서에서 해당 내용을 찾을 수 없습니다\"라고만 답합니다.",
        ),
        ChatMessage::user(format!(
            "[계약서 내용]\n{}\n\n[질문]\n{}\n\n반드시 계약서 원문을 인용해 답변하세요.",
            context, question
        )),
    ]
}

// ============================================================================
// Summary
// ============================================================================

/// 문서 전체를 한 번에 구조화 요약 (청크가 하나뿐일 때)
pub fn summary_messages(text: &str, info: &KeyContractInfo) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(ANALYST_ROLE),
        ChatMessage::user(format!(
            "{}\n\n[계약서]\n{}\n\n{}",
            key_info_block(info),
            truncate_chars(text, SUMMARY_INPUT_CHARS),
            SUMMARY_STRUCTURE
        )),
    ]
}

/// map 단계: 청크 하나 요약
pub fn chunk_summary_messages(chunk: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(ANALYST_ROLE),
        ChatMessage::user(format!(
            "다음 계약서 일부의 핵심 내용을 조항 번호와 함께 5문장 이내로 요약하세요.\n\n{}",
            chunk
        )),
    ]
}

/// reduce 단계: 부분 요약 여러 개를 하나로 합침
pub fn combine_summary_messages(summaries: &[String], info: &KeyContractInfo) -> Vec<ChatMessage> {
    let numbered: Vec<String> = summaries
        .iter()
        .enumerate()
        .map(|(i, s)| format!("[부분 요약 {}]\n{}", i + 1, s))
        .collect();

    vec![
        ChatMessage::system(ANALYST_ROLE),
        ChatMessage::user(format!(
            "{}\n\n{}\n\n위 부분 요약들을 중복 없이 하나로 합치세요.\n{}",
            key_info_block(info),
            numbered.join("\n\n"),
            SUMMARY_STRUCTURE
        )),
    ]
}

const SUMMARY_STRUCTURE: &str = "다음 구조로 작성하세요.\n\
    ## 1. 계약 개요\n\
    ## 2. 당사자와 역할\n\
    ## 3. 주요 권리와 의무\n\
    ## 4. 금전 조건과 기간\n\
    ## 5. 유의할 조항";

fn key_info_block(info: &KeyContractInfo) -> String {
    format!(
        "[핵심 정보]\n- 계약 유형: {}\n- 주요 용어: {}\n- 금전 관련: {}\n- 기간 관련: {}",
        info.contract_type.as_deref().unwrap_or("미분류"),
        join_or_none(&info.keywords),
        join_or_none(&info.financial_terms),
        join_or_none(&info.period_terms)
    )
}

fn join_or_none(terms: &[String]) -> String {
    if terms.is_empty() {
        "없음".to_string()
    } else {
        terms.join(", ")
    }
}

// ============================================================================
// Risk Analysis
// ============================================================================

pub fn risk_messages(text: &str, signals: &RiskSignals) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(ANALYST_ROLE),
        ChatMessage::user(format!(
            "{}\n\n[계약서]\n{}\n\n{}",
            risk_signal_block(signals),
            truncate_chars(text, RISK_INPUT_CHARS),
            RISK_STRUCTURE
        )),
    ]
}

/// 품질 검사 실패 후 재시도용 프롬프트 (형식 예시 포함)
pub fn strict_risk_messages(text: &str, signals: &RiskSignals) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!(
            "{} 형식을 지키지 않은 답변은 거부됩니다.",
            ANALYST_ROLE
        )),
        ChatMessage::user(format!(
            "{}\n\n[계약서]\n{}\n\n{}\n\n\
             반드시 지킬 것:\n\
             - 각 범주마다 근거 조항을 \"제N조\" 형식으로 인용\n\
             - 핵심 표현은 **굵게** 표시 (최소 8곳)\n\
             - 각 범주 끝에 구체적인 대응 방안 (\"~을 확인하세요\", \"~을 권장합니다\")\n\n\
             예시:\n\
             ### 1. 손해배상 위험\n\
             **위험 수준: 높음**\n\
             제5조에 따르면 **계약 위반 시 전액 배상** 의무가 있습니다.\n\
             **대응 방안**: 배상 한도 설정을 협의할 것을 권장합니다.",
            risk_signal_block(signals),
            truncate_chars(text, RISK_INPUT_CHARS),
            RISK_STRUCTURE
        )),
    ]
}

const RISK_STRUCTURE: &str = "다음 5개 범주로 위험을 분석하세요.\n\
    ### 1. 손해배상 위험\n\
    ### 2. 해지 위험\n\
    ### 3. 의무 불이행 위험\n\
    ### 4. 금전적 위험\n\
    ### 5. 법적 위험\n\
    범주마다 위험 수준, 근거 조항, 대응 방안을 적으세요.";

fn risk_signal_block(signals: &RiskSignals) -> String {
    format!(
        "[위험 신호]\n- 손해배상: {}\n- 해지: {}\n- 의무: {}\n- 제재: {}",
        join_or_none(&signals.liability),
        join_or_none(&signals.termination),
        join_or_none(&signals.obligation),
        join_or_none(&signals.penalty)
    )
}

// ============================================================================
// Translation
// ============================================================================

pub fn translation_messages(text: &str, target: Language, kind: ContentKind) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(format!(
            "You are a professional legal translator. Translate the Korean {} into {} ({}). \
             Keep the Markdown structure, article numbers and bold markers. \
             Keep legal terms precise. Output only the translation.",
            kind.description(),
            target.native_name(),
            target.code()
        )),
        ChatMessage::user(text.to_string()),
    ]
}

// ============================================================================
// Template Fallbacks
// ============================================================================

/// 모든 요약 호출이 실패했을 때의 요약
pub fn summary_template(info: &KeyContractInfo) -> String {
    format!(
        "## 1. 계약 개요\n**계약 유형**: {}\n\n\
         ## 2. 주요 용어\n{}\n\n\
         ## 3. 금전 조건\n{}\n\n\
         ## 4. 기간 조건\n{}\n\n\
         ## 5. 안내\n계약서 원문을 직접 확인하시고, 중요한 결정 전 전문가 상담을 권장합니다.",
        info.contract_type.as_deref().unwrap_or("미분류"),
        join_or_none(&info.keywords),
        join_or_none(&info.financial_terms),
        join_or_none(&info.period_terms)
    )
}

/// 품질 검사를 두 번 통과하지 못했을 때의 위험 분석
pub fn risk_template(signals: &RiskSignals) -> String {
    format!(
        "## 위험 분석\n\
         **주요 위험 요소**: {}\n\n\
         ### 1. 손해배상 위험\n손해배상 범위와 한도를 확인하세요.\n\n\
         ### 2. 해지 위험\n해지 사유와 통지 기간을 확인하세요.\n\n\
         ### 3. 의무 불이행 위험\n각 당사자의 의무와 이행 기한을 확인하세요.\n\n\
         ### 4. 금전적 위험\n위약금, 연체료 등 금전 조건을 확인하세요.\n\n\
         ### 5. 법적 위험\n분쟁 해결 방법과 관할을 확인하고 전문가 검토를 권장합니다.",
        signals.headline()
    )
}

// ============================================================================
// Tests
// ============================================================================
