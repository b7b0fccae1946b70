//! 생성 결과 품질 검사
//!
//! - 위험 분석: 길이, 강조 표시, 조항 인용, 실행 조언, 범주 포괄 5개 항목
//! - 질의응답: 문서 인용 표현 대 일반론 표현 비교

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::config::QualityThresholds;

static ARTICLE_CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"제\s*\d+\s*조|조항").expect("Invalid regex"));

const ADVICE_MARKERS: &[&str] = &["권장", "권고", "확인", "검토", "협의", "주의", "필요", "대응"];

/// 위험 분석 5개 범주의 대표어
const CATEGORY_MARKERS: &[&str] = &["손해배상", "해지", "의무", "금전", "법적"];

/// 범주 포괄 항목 통과에 필요한 범주 수
const MIN_CATEGORIES: usize = 3;

const DOCUMENT_INDICATORS: &[&str] = &[
    "제", "조", "항", "계약서", "조항", "명시", "규정", "정함", "따르면", "의하면", "기재",
    "포함", "내용", "문서",
];

const GENERAL_INDICATORS: &[&str] = &[
    "일반적으로",
    "보통",
    "대개",
    "통상",
    "법률에서",
    "법적으로",
    "일반적인",
    "통상적인",
    "법률상",
    "일반론",
];

// ============================================================================
// Risk Analysis Quality
// ============================================================================

/// 위험 분석 품질 검사 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QualityReport {
    pub long_enough: bool,
    pub structured: bool,
    pub cites_articles: bool,
    pub gives_advice: bool,
    pub covers_categories: bool,
}

impl QualityReport {
    const CHECKS: usize = 5;

    pub fn passed_checks(&self) -> usize {
        [
            self.long_enough,
            self.structured,
            self.cites_articles,
            self.gives_advice,
            self.covers_categories,
        ]
        .into_iter()
        .filter(|passed| *passed)
        .count()
    }

    pub fn ratio(&self) -> f32 {
        self.passed_checks() as f32 / Self::CHECKS as f32
    }

    pub fn passes(&self, thresholds: &QualityThresholds) -> bool {
        self.ratio() >= thresholds.pass_ratio
    }
}

/// 위험 분석 텍스트 검사
pub fn check_risk_analysis(text: &str, thresholds: &QualityThresholds) -> QualityReport {
    let categories = CATEGORY_MARKERS
        .iter()
        .filter(|marker| text.contains(*marker))
        .count();

    QualityReport {
        long_enough: text.chars().count() >= thresholds.min_length,
        structured: text.matches("**").count() >= thresholds.min_bold_markers,
        cites_articles: ARTICLE_CITATION.is_match(text),
        gives_advice: ADVICE_MARKERS.iter().any(|marker| text.contains(marker)),
        covers_categories: categories >= MIN_CATEGORIES,
    }
}

// ============================================================================
// Answer Grounding
// ============================================================================

/// 답변이 문서에 근거했는지 판정
///
/// 문서 인용 표현이 2개 이상이고 일반론 표현이 1개 이하이면 통과.
pub fn is_grounded_answer(answer: &str) -> bool {
    let document = DOCUMENT_INDICATORS
        .iter()
        .filter(|indicator| answer.contains(*indicator))
        .count();
    let general = GENERAL_INDICATORS
        .iter()
        .filter(|indicator| answer.contains(*indicator))
        .count();

    document >= 2 && general <= 1
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn rich_analysis() -> String {
        let mut text = String::from(
            "## 위험 분석\n\
             **손해배상 위험**: 제5조에 따라 위반 시 **전액 배상** 의무가 있습니다.\n\
             **해지 위험**: 제7조는 **일방 해지**를 허용합니다.\n\
             **의무 불이행 위험**: **기한 내 이행**이 필요합니다.\n\
             **금전적 위험**: **연체료 월 2%** 조항을 확인하세요.\n\
             **법적 위험**: 분쟁 시 **관할 법원** 검토를 권장합니다.\n",
        );
        while text.chars().count() < 500 {
            text.push_str("계약 조건을 꼼꼼히 검토하시기 바랍니다. ");
        }
        text
    }

    #[test]
    fn test_rich_analysis_passes() {
        let thresholds = QualityThresholds::default();
        let report = check_risk_analysis(&rich_analysis(), &thresholds);

        assert_eq!(report.passed_checks(), 5);
        assert!(report.passes(&thresholds));
    }

    #[test]
    fn test_short_analysis_fails() {
        let thresholds = QualityThresholds::default();
        let report = check_risk_analysis("위험이 좀 있습니다.", &thresholds);

        assert!(!report.long_enough);
        assert!(!report.structured);
        assert!(!report.passes(&thresholds));
    }

    #[test]
    fn test_pass_ratio_boundary() {
        // 길이만 부족: 4/5 = 0.8 통과
        let thresholds = QualityThresholds {
            min_length: 10_000,
            ..Default::default()
        };
        let report = check_risk_analysis(&rich_analysis(), &thresholds);
        assert_eq!(report.passed_checks(), 4);
        assert!(report.passes(&thresholds));

        // 길이와 강조 부족: 3/5 = 0.6 실패
        let thresholds = QualityThresholds {
            min_length: 10_000,
            min_bold_markers: 100,
            ..Default::default()
        };
        assert!(!check_risk_analysis(&rich_analysis(), &thresholds).passes(&thresholds));
    }

    #[test]
    fn test_grounded_answer() {
        assert!(is_grounded_answer(
            "계약서 제2조에 따르면 근로시간은 1일 8시간으로 명시되어 있습니다."
        ));
        assert!(!is_grounded_answer(
            "일반적으로 근로시간은 법률상 주 40시간이며 보통 그렇게 운영됩니다."
        ));
    }
}
