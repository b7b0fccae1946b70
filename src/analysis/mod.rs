//! Analysis 모듈 - 답변 생성과 문서 분석
//!
//! - 질의응답: 문서 근거 확인 → 1회 엄격 재생성 → 용어 풀이/번역
//! - 문서 분석: 한국어로 요약(map-reduce)과 위험 분석을 끝낸 뒤 결과를 통째로 번역
//! - 위험 분석 품질 게이트: 생성 → 엄격 재시도 → 템플릿

mod legal_terms;
mod prompts;
mod quality;

use std::sync::Arc;

use serde::Serialize;

use crate::config::RagConfig;
use crate::error::{ErrorCode, ServiceError};
use crate::knowledge::{ArticleChunker, Chunk, ChunkConfig, Chunker, Classification};
use crate::language::Language;
use crate::llm::{ChatMessage, CompletionOptions, CompletionProvider};

pub use legal_terms::{glossary_section, KeyContractInfo, RiskSignals, GLOSSARY};
pub use prompts::{truncate_chars, ContentKind};
pub use quality::{check_risk_analysis, is_grounded_answer, QualityReport};

use prompts::{
    ANSWER_OPTIONS, RISK_OPTIONS, STRICT_ANSWER_OPTIONS, SUMMARY_OPTIONS, TRANSLATION_OPTIONS,
};

// ============================================================================
// Types
// ============================================================================

/// 답변 생성 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnswerOutcome {
    Generated,
    /// 언어 모델 응답을 얻지 못해 안내 문구로 대체
    Unavailable { code: ErrorCode },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneratedAnswer {
    pub text: String,
    pub outcome: AnswerOutcome,
    /// 문서 인용 표현 검사 통과 여부
    pub grounded: bool,
    /// 번역 실패로 한국어 답변을 돌려줌
    pub translation_failed: bool,
}

impl GeneratedAnswer {
    fn unavailable(err: &ServiceError, language: Language) -> Self {
        tracing::warn!("Answer generation failed: {}", err);
        let messages = language.messages();
        let (text, code) = if err.is_quota() {
            (messages.quota_exceeded, ErrorCode::QuotaExceeded)
        } else {
            (messages.answer_unavailable, ErrorCode::ServiceUnavailable)
        };

        Self {
            text: text.to_string(),
            outcome: AnswerOutcome::Unavailable { code },
            grounded: false,
            translation_failed: false,
        }
    }
}

/// 분석 결과가 어떤 경로로 만들어졌는지
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisQuality {
    /// 첫 생성이 품질 검사 통과
    Generated,
    /// 엄격한 프롬프트로 재시도해 통과
    Retried,
    /// 템플릿 폴백 (품질 저하)
    Template,
}

impl AnalysisQuality {
    pub fn is_degraded(self) -> bool {
        self == AnalysisQuality::Template
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisQuality::Generated => "generated",
            AnalysisQuality::Retried => "retried",
            AnalysisQuality::Template => "template",
        }
    }
}

/// 문서 분석 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentAnalysis {
    /// 결과 텍스트의 실제 언어 (번역 실패 시 원문 언어)
    pub language: Language,
    pub summary: String,
    pub summary_quality: AnalysisQuality,
    pub risk_analysis: String,
    pub risk_quality: AnalysisQuality,
    pub translation_failed: bool,
}

impl DocumentAnalysis {
    pub fn is_degraded(&self) -> bool {
        self.summary_quality.is_degraded() || self.risk_quality.is_degraded()
    }
}

// ============================================================================
// Generator
// ============================================================================

/// 답변/분석 생성기
pub struct Generator {
    llm: Arc<dyn CompletionProvider>,
    config: RagConfig,
}

impl Generator {
    pub fn new(llm: Arc<dyn CompletionProvider>, config: RagConfig) -> Self {
        Self { llm, config }
    }

    // ------------------------------------------------------------------------
    // Q&A
    // ------------------------------------------------------------------------

    /// 검색된 청크만 근거로 답변
    ///
    /// 언어 모델이 응답하지 않으면 에러 대신 안내 문구를 돌려줍니다.
    pub async fn answer(
        &self,
        question: &str,
        context: &[&Chunk],
        language: Language,
    ) -> GeneratedAnswer {
        let context_text = context
            .iter()
            .map(|chunk| chunk.text())
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        // 1. 생성
        let mut text = match self
            .complete(&prompts::answer_messages(question, &context_text), ANSWER_OPTIONS)
            .await
        {
            Ok(text) => text,
            Err(e) => return GeneratedAnswer::unavailable(&e, language),
        };

        // 2. 근거 확인, 실패 시 1회 엄격 재생성
        let mut grounded = is_grounded_answer(&text);
        if !grounded {
            tracing::info!("Answer failed grounding check, regenerating with citation-only prompt");
            match self
                .complete(
                    &prompts::strict_answer_messages(question, &context_text),
                    STRICT_ANSWER_OPTIONS,
                )
                .await
            {
                Ok(retry) => {
                    grounded = is_grounded_answer(&retry);
                    text = retry;
                }
                Err(e) => tracing::warn!("Strict answer regeneration failed: {}", e),
            }
        }

        // 3. 번역 또는 용어 풀이
        let mut translation_failed = false;
        if !language.is_source() {
            match self.translate(&text, language, ContentKind::Answer).await {
                Ok(translated) => text = translated,
                Err(e) => {
                    tracing::warn!("Answer translation to {} failed: {}", language, e);
                    translation_failed = true;
                }
            }
        }
        if language.is_source() || translation_failed {
            if let Some(glossary) = glossary_section(&text) {
                text.push_str(&glossary);
            }
        }

        GeneratedAnswer {
            text,
            outcome: AnswerOutcome::Generated,
            grounded,
            translation_failed,
        }
    }

    /// 완성된 한국어 결과를 목표 언어로 번역
    pub async fn translate(
        &self,
        text: &str,
        target: Language,
        kind: ContentKind,
    ) -> Result<String, ServiceError> {
        if target.is_source() {
            return Ok(text.to_string());
        }
        tracing::debug!("Translating {:?} to {}", kind, target);
        self.complete(
            &prompts::translation_messages(text, target, kind),
            TRANSLATION_OPTIONS,
        )
        .await
    }

    // ------------------------------------------------------------------------
    // Document Analysis
    // ------------------------------------------------------------------------

    /// 요약 + 위험 분석 (원문 언어로 분석 후 번역)
    pub async fn analyze(
        &self,
        text: &str,
        classification: &Classification,
        language: Language,
    ) -> DocumentAnalysis {
        // 1. 원문 언어 분석
        let info = KeyContractInfo::extract(text, classification);
        let (summary, summary_quality) = self.summarize(text, &info).await;
        let (risk_analysis, risk_quality) = self.analyze_risks(text).await;

        tracing::info!(
            "Analysis complete (summary: {}, risk: {})",
            summary_quality.as_str(),
            risk_quality.as_str()
        );

        let mut analysis = DocumentAnalysis {
            language: Language::SOURCE,
            summary,
            summary_quality,
            risk_analysis,
            risk_quality,
            translation_failed: false,
        };

        // 2. 완성된 결과 번역
        if !language.is_source() {
            let summary = self
                .translate(&analysis.summary, language, ContentKind::Summary)
                .await;
            let risk = self
                .translate(&analysis.risk_analysis, language, ContentKind::RiskAnalysis)
                .await;

            match (summary, risk) {
                (Ok(summary), Ok(risk)) => {
                    analysis.summary = summary;
                    analysis.risk_analysis = risk;
                    analysis.language = language;
                }
                (Err(e), _) | (_, Err(e)) => {
                    tracing::warn!("Analysis translation to {} failed: {}", language, e);
                    analysis.translation_failed = true;
                }
            }
        }

        // 3. 품질 저하 안내
        let notice = analysis.language.messages().degraded_analysis;
        if summary_quality.is_degraded() {
            analysis.summary = format!("{}\n\n> {}", analysis.summary, notice);
        }
        if risk_quality.is_degraded() {
            analysis.risk_analysis = format!("{}\n\n> {}", analysis.risk_analysis, notice);
        }

        analysis
    }

    /// map-reduce 요약
    async fn summarize(&self, text: &str, info: &KeyContractInfo) -> (String, AnalysisQuality) {
        let parts = summary_parts(text, self.config.summary_chunk_size);

        // 한 조각이면 바로 구조화 요약
        if parts.len() <= 1 {
            return match self
                .complete(&prompts::summary_messages(text, info), SUMMARY_OPTIONS)
                .await
            {
                Ok(summary) => (summary, AnalysisQuality::Generated),
                Err(e) => {
                    tracing::warn!("Summary generation failed, using template: {}", e);
                    (prompts::summary_template(info), AnalysisQuality::Template)
                }
            };
        }

        // map
        tracing::info!("Summarizing {} parts", parts.len());
        let mut partials = Vec::with_capacity(parts.len());
        for (i, part) in parts.iter().enumerate() {
            match self
                .complete(&prompts::chunk_summary_messages(part), SUMMARY_OPTIONS)
                .await
            {
                Ok(summary) => partials.push(summary),
                Err(e) => tracing::warn!("Summary of part {}/{} failed: {}", i + 1, parts.len(), e),
            }
        }

        if partials.is_empty() {
            tracing::warn!("Every part summary failed, using template");
            return (prompts::summary_template(info), AnalysisQuality::Template);
        }

        // reduce: 최소 1회 합쳐서 구조화된 최종 요약을 만듦
        let mut level = partials;
        loop {
            level = self.combine_round(&level, info).await;
            if level.len() <= 1 {
                break;
            }
        }

        match level.pop() {
            Some(summary) => (summary, AnalysisQuality::Generated),
            None => (prompts::summary_template(info), AnalysisQuality::Template),
        }
    }

    /// reduce 한 단계: fan-in 개씩 묶어 합침
    async fn combine_round(&self, summaries: &[String], info: &KeyContractInfo) -> Vec<String> {
        let fan_in = self.config.summary_fan_in.max(2);
        let mut next = Vec::with_capacity(summaries.len().div_ceil(fan_in));

        for group in summaries.chunks(fan_in) {
            match self
                .complete(&prompts::combine_summary_messages(group, info), SUMMARY_OPTIONS)
                .await
            {
                Ok(combined) => next.push(combined),
                Err(e) => {
                    tracing::warn!("Summary combine failed, concatenating group: {}", e);
                    next.push(group.join("\n\n"));
                }
            }
        }

        tracing::debug!("Reduced {} summaries to {}", summaries.len(), next.len());
        next
    }

    /// 품질 게이트를 거친 위험 분석
    async fn analyze_risks(&self, text: &str) -> (String, AnalysisQuality) {
        let signals = RiskSignals::extract(text);
        let thresholds = &self.config.quality;

        // 1. 기본 프롬프트
        match self
            .complete(&prompts::risk_messages(text, &signals), RISK_OPTIONS)
            .await
        {
            Ok(analysis) => {
                let report = check_risk_analysis(&analysis, thresholds);
                if report.passes(thresholds) {
                    return (analysis, AnalysisQuality::Generated);
                }
                tracing::info!(
                    "Risk analysis failed quality check ({}/5), retrying with stricter prompt",
                    report.passed_checks()
                );
            }
            Err(e) if e.is_quota() => {
                tracing::warn!("Risk analysis skipped, using template: {}", e);
                return (prompts::risk_template(&signals), AnalysisQuality::Template);
            }
            Err(e) => tracing::warn!("Risk analysis failed, retrying: {}", e),
        }

        // 2. 엄격한 재시도
        match self
            .complete(&prompts::strict_risk_messages(text, &signals), RISK_OPTIONS)
            .await
        {
            Ok(analysis) => {
                let report = check_risk_analysis(&analysis, thresholds);
                if report.passes(thresholds) {
                    return (analysis, AnalysisQuality::Retried);
                }
                tracing::warn!(
                    "Retried risk analysis failed quality check ({}/5), using template",
                    report.passed_checks()
                );
            }
            Err(e) => tracing::warn!("Risk analysis retry failed, using template: {}", e),
        }

        // 3. 템플릿
        (prompts::risk_template(&signals), AnalysisQuality::Template)
    }

    /// 빈 응답도 실패로 취급하는 완성 호출
    async fn complete(
        &self,
        messages: &[ChatMessage],
        options: CompletionOptions,
    ) -> Result<String, ServiceError> {
        let text = self.llm.complete(messages, options).await?;
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(ServiceError::failed(
                crate::error::Service::LanguageModel,
                "empty completion",
            ));
        }
        Ok(trimmed.to_string())
    }
}

/// 요약 map 단계 입력: 조항 청크를 `max_chars` 이하로 이어 붙인 조각들
fn summary_parts(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let chunks = ArticleChunker::new(ChunkConfig::new(max_chars)).chunk(text);
    let mut parts: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for chunk in &chunks {
        let piece = chunk.body.as_str();
        let len = piece.chars().count();
        if current_len > 0 && current_len + len > max_chars {
            parts.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push_str(piece);
        current_len += len;
    }
    if current_len > 0 {
        parts.push(current);
    }
    parts
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::classify;
    use crate::testing::{ScriptedCompletion, UnavailableCompletion};

    const EMPLOYMENT: &str = "근로계약서\n\
        제1조 (계약기간) 계약기간은 2024년 1월 1일부터 1년으로 한다.\n\
        제2조 (근로시간) 근로시간은 1일 8시간, 주 40시간으로 하며 휴게시간은 1시간이다.\n\
        제3조 (임금) 임금은 월 300만원으로 하고 퇴직금은 법령에 따른다. 위반 시 손해배상 책임을 진다.";

    fn rich_risk_analysis() -> String {
        let mut text = String::from(
            "### 1. 손해배상 위험\n**위험 수준: 중간** 제3조에 따라 **손해배상 책임**이 있습니다.\n\
             ### 2. 해지 위험\n**해지 조항 없음**\n\
             ### 3. 의무 불이행 위험\n**근로시간 준수** 의무 (제2조)\n\
             ### 4. 금전적 위험\n**임금 300만원**, **퇴직금** 확인\n\
             ### 5. 법적 위험\n**관할 법원** 검토를 권장합니다.\n",
        );
        while text.chars().count() < 500 {
            text.push_str("계약 조건을 꼼꼼히 확인하시기 바랍니다. ");
        }
        text
    }

    fn generator(llm: Arc<dyn CompletionProvider>) -> Generator {
        Generator::new(llm, RagConfig::default())
    }

    fn article_chunk(num: u32, body: &str) -> Chunk {
        Chunk {
            index: num as usize,
            kind: crate::knowledge::ChunkKind::Article,
            article_num: Some(num),
            article_title: None,
            label: format!("제{}조", num),
            body: body.to_string(),
        }
    }

    #[tokio::test]
    async fn test_answer_grounded_first_try() {
        let llm = Arc::new(ScriptedCompletion::new([
            "계약서 제2조에 따르면 근로시간은 1일 8시간입니다.",
        ]));
        let gen = generator(llm.clone());
        let chunk = article_chunk(2, "제2조 (근로시간) 근로시간은 1일 8시간으로 한다.");

        let answer = gen.answer("제2조가 뭐야?", &[&chunk], Language::Korean).await;

        assert_eq!(answer.outcome, AnswerOutcome::Generated);
        assert!(answer.grounded);
        assert!(answer.text.starts_with("계약서 제2조에 따르면"));
        assert_eq!(llm.calls(), 1);
        assert!(llm.prompts()[0].contains("근로시간은 1일 8시간으로 한다"));
    }

    #[tokio::test]
    async fn test_answer_regenerates_when_ungrounded() {
        let llm = Arc::new(ScriptedCompletion::new([
            "일반적으로 근로시간은 법률상 주 40시간이며 보통 그렇습니다.",
            "계약서 제2조에 따르면 \"1일 8시간\"으로 규정되어 있습니다.",
        ]));
        let gen = generator(llm.clone());
        let chunk = article_chunk(2, "제2조 (근로시간) 근로시간은 1일 8시간으로 한다.");

        let answer = gen.answer("근로시간은?", &[&chunk], Language::Korean).await;

        assert!(answer.grounded);
        assert!(answer.text.contains("규정되어"));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_answer_appends_glossary_for_korean() {
        let llm = Arc::new(ScriptedCompletion::new([
            "계약서 제4조에 따르면 임차인은 계약을 해지할 수 있습니다.",
        ]));
        let gen = generator(llm);
        let chunk = article_chunk(4, "제4조 (해지) 임차인은 계약을 해지할 수 있다.");

        let answer = gen.answer("해지할 수 있나요?", &[&chunk], Language::Korean).await;

        assert!(answer.text.contains("## 어려운 용어 설명"));
        assert!(answer.text.contains("**임차인**"));
    }

    #[tokio::test]
    async fn test_answer_translated_without_glossary() {
        let llm = Arc::new(ScriptedCompletion::new([
            "계약서 제4조에 따르면 임차인은 계약을 해지할 수 있습니다.",
            "According to Article 4 of the contract, the tenant may terminate.",
        ]));
        let gen = generator(llm.clone());
        let chunk = article_chunk(4, "제4조 (해지) 임차인은 계약을 해지할 수 있다.");

        let answer = gen.answer("Can I terminate?", &[&chunk], Language::English).await;

        assert_eq!(
            answer.text,
            "According to Article 4 of the contract, the tenant may terminate."
        );
        assert!(!answer.translation_failed);
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_answer_unavailable_is_localized() {
        let gen = generator(Arc::new(UnavailableCompletion::transient()));
        let chunk = article_chunk(2, "제2조 (근로시간) 1일 8시간");

        let answer = gen.answer("제2조?", &[&chunk], Language::English).await;
        assert_eq!(answer.text, Language::English.messages().answer_unavailable);
        assert_eq!(
            answer.outcome,
            AnswerOutcome::Unavailable {
                code: ErrorCode::ServiceUnavailable
            }
        );

        let gen = generator(Arc::new(UnavailableCompletion::quota()));
        let answer = gen.answer("제2조?", &[&chunk], Language::Korean).await;
        assert_eq!(answer.text, Language::Korean.messages().quota_exceeded);
    }

    #[tokio::test]
    async fn test_analyze_generated() {
        // 요약 1회 + 위험 분석 1회
        let llm = Arc::new(ScriptedCompletion::new([
            "## 1. 계약 개요\n1년 근로계약".to_string(),
            rich_risk_analysis(),
        ]));
        let gen = generator(llm.clone());

        let analysis = gen
            .analyze(EMPLOYMENT, &classify(EMPLOYMENT), Language::Korean)
            .await;

        assert_eq!(analysis.summary_quality, AnalysisQuality::Generated);
        assert_eq!(analysis.risk_quality, AnalysisQuality::Generated);
        assert!(!analysis.is_degraded());
        assert_eq!(llm.calls(), 2);
        assert!(llm.prompts()[0].contains("근로계약서"));
    }

    #[tokio::test]
    async fn test_risk_quality_ladder_falls_back_to_template() {
        // 요약, 위험 분석, 재시도 모두 짧은 응답
        let llm = Arc::new(ScriptedCompletion::new(["짧은 분석"]));
        let gen = generator(llm.clone());

        let analysis = gen
            .analyze(EMPLOYMENT, &classify(EMPLOYMENT), Language::Korean)
            .await;

        assert_eq!(analysis.risk_quality, AnalysisQuality::Template);
        assert!(analysis.is_degraded());
        assert!(analysis.risk_analysis.contains("**주요 위험 요소**: 손해배상"));
        assert!(analysis
            .risk_analysis
            .ends_with(Language::Korean.messages().degraded_analysis));
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn test_risk_retry_succeeds() {
        let llm = Arc::new(ScriptedCompletion::new([
            "요약".to_string(),
            "짧은 분석".to_string(),
            rich_risk_analysis(),
        ]));
        let gen = generator(llm.clone());

        let analysis = gen
            .analyze(EMPLOYMENT, &classify(EMPLOYMENT), Language::Korean)
            .await;

        assert_eq!(analysis.risk_quality, AnalysisQuality::Retried);
        assert!(llm.prompts()[2].contains("예시"));
    }

    #[tokio::test]
    async fn test_analyze_without_model_uses_templates() {
        let llm = Arc::new(UnavailableCompletion::quota());
        let gen = generator(llm.clone());

        let analysis = gen
            .analyze(EMPLOYMENT, &classify(EMPLOYMENT), Language::Korean)
            .await;

        assert_eq!(analysis.summary_quality, AnalysisQuality::Template);
        assert_eq!(analysis.risk_quality, AnalysisQuality::Template);
        assert!(analysis.summary.contains("근로계약서"));
        // 할당량 초과면 위험 분석 재시도 안 함
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn test_analyze_translates_finished_result() {
        let llm = Arc::new(ScriptedCompletion::new([
            "요약".to_string(),
            rich_risk_analysis(),
            "Summary".to_string(),
            "Risk analysis".to_string(),
        ]));
        let gen = generator(llm.clone());

        let analysis = gen
            .analyze(EMPLOYMENT, &classify(EMPLOYMENT), Language::English)
            .await;

        assert_eq!(analysis.language, Language::English);
        assert_eq!(analysis.summary, "Summary");
        assert_eq!(analysis.risk_analysis, "Risk analysis");
        // 번역 입력은 완성된 한국어 결과
        assert_eq!(llm.prompts()[2], "요약");
    }

    #[tokio::test]
    async fn test_map_reduce_summary() {
        let config = RagConfig {
            summary_chunk_size: 80,
            summary_fan_in: 2,
            ..Default::default()
        };
        let llm = Arc::new(ScriptedCompletion::new(["부분 요약"]));
        let gen = Generator::new(llm.clone(), config);

        let info = KeyContractInfo::default();
        let (summary, quality) = gen.summarize(EMPLOYMENT, &info).await;

        let parts = summary_parts(EMPLOYMENT, 80);
        assert!(parts.len() >= 3);
        assert_eq!(parts.concat(), EMPLOYMENT);
        assert_eq!(summary, "부분 요약");
        assert_eq!(quality, AnalysisQuality::Generated);
        // map 호출 수 + reduce 호출 수
        assert!(llm.calls() > parts.len());
    }
}
