//! 키워드 그룹 역색인
//!
//! 의미 그룹(해지, 책임, 지급 등)과 감지된 계약 유형의 특화 용어를 청크에 매핑합니다.
//! 문서 처리 때 한 번 만들고 이후에는 읽기만 합니다.

use serde::{Deserialize, Serialize};

use super::chunker::Chunk;
use super::classifier::Classification;
use crate::config::ScoreWeights;

/// 모든 계약서에 공통인 의미 그룹
pub static UNIVERSAL_GROUPS: &[(&str, &[&str])] = &[
    ("해지_종료", &["해지", "해제", "종료", "중단", "파기"]),
    ("의무_책임", &["의무", "책임", "이행", "준수"]),
    ("권리_자격", &["권리", "권한", "자격"]),
    ("계약_약정", &["계약", "협약", "약정"]),
    ("위반_어김", &["위반", "위배", "어김"]),
    ("손해_배상", &["손해", "배상", "피해", "손실"]),
    ("지급_결제", &["지급", "지불", "납부", "결제"]),
    ("기간_기한", &["기간", "기한", "일자", "날짜"]),
    ("사유_이유", &["사유", "이유", "원인", "근거"]),
    ("위험_주의", &["위험", "주의", "경고", "위험요소"]),
];

/// 질문에서 그룹을 고르는 트리거 어휘
///
/// 색인 어휘와 다르게 구어 표현(끝내, 돈)까지 포함합니다.
pub static QUERY_GROUP_TRIGGERS: &[(&str, &[&str])] = &[
    ("해지_종료", &["해지", "해제", "종료", "중단", "끝내", "파기"]),
    ("의무_책임", &["의무", "책임", "이행", "준수", "완수"]),
    ("손해_배상", &["손해", "배상", "피해", "보상", "변상"]),
    ("지급_결제", &["지급", "지불", "납부", "결제", "돈", "비용", "대금"]),
    ("기간_기한", &["기간", "기한", "일자", "날짜", "시점", "시기"]),
];

/// 특화 그룹 이름 접두어
pub const SPECIALIZED_PREFIX: &str = "특화_";

// ============================================================================
// Types
// ============================================================================

/// 그룹 내 청크 일치 기록
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordMatch {
    pub chunk_index: usize,
    pub score: u32,
    pub matched_terms: Vec<String>,
    pub label: String,
}

/// 키워드 그룹과 점수순 일치 목록
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordGroup {
    pub name: String,
    pub terms: Vec<String>,
    /// 점수 내림차순
    pub matches: Vec<KeywordMatch>,
}

/// 문서 단위 키워드 색인
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeywordIndex {
    groups: Vec<KeywordGroup>,
}

impl KeywordIndex {
    /// 청크와 분류 결과로 색인 생성
    ///
    /// 점수: 조항 라벨 1회 등장당 `title_occurrence`, 본문 1회당 `body_occurrence`.
    /// 점수 합이 0인 그룹은 넣지 않습니다.
    pub fn build(chunks: &[Chunk], classification: &Classification, weights: &ScoreWeights) -> Self {
        let lowered: Vec<(String, String)> = chunks
            .iter()
            .map(|c| (c.label.to_lowercase(), c.body.to_lowercase()))
            .collect();

        let groups: Vec<KeywordGroup> = all_group_definitions(classification)
            .into_iter()
            .filter_map(|(name, terms)| {
                let mut matches: Vec<KeywordMatch> = chunks
                    .iter()
                    .zip(&lowered)
                    .filter_map(|(chunk, (title, body))| {
                        score_chunk(title, body, &terms, weights).map(|(score, matched)| {
                            KeywordMatch {
                                chunk_index: chunk.index,
                                score,
                                matched_terms: matched,
                                label: chunk.label.clone(),
                            }
                        })
                    })
                    .collect();

                if matches.is_empty() {
                    return None;
                }

                matches.sort_by(|a, b| b.score.cmp(&a.score));
                Some(KeywordGroup {
                    name,
                    terms,
                    matches,
                })
            })
            .collect();

        tracing::debug!("Built keyword index with {} non-empty groups", groups.len());
        Self { groups }
    }

    pub fn get(&self, name: &str) -> Option<&KeywordGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// 그룹의 최고 점수 청크
    pub fn top(&self, name: &str) -> Option<&KeywordMatch> {
        self.get(name).and_then(|g| g.matches.first())
    }

    pub fn groups(&self) -> &[KeywordGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// 질문이 건드리는 그룹 이름 목록 (트리거 표 순서)
pub fn groups_for_query(query: &str) -> Vec<&'static str> {
    QUERY_GROUP_TRIGGERS
        .iter()
        .filter(|(_, triggers)| triggers.iter().any(|t| query.contains(t)))
        .map(|(name, _)| *name)
        .collect()
}

/// 공통 그룹 + 감지된 유형의 일치 용어로 만든 특화 그룹
fn all_group_definitions(classification: &Classification) -> Vec<(String, Vec<String>)> {
    let mut defs: Vec<(String, Vec<String>)> = UNIVERSAL_GROUPS
        .iter()
        .map(|(name, terms)| {
            (
                name.to_string(),
                terms.iter().map(|t| t.to_string()).collect(),
            )
        })
        .collect();

    for term in classification.matched_terms() {
        defs.push((
            format!("{}{}", SPECIALIZED_PREFIX, term),
            expand_synonyms(term),
        ));
    }

    defs
}

/// 특화 용어 동의어 확장
fn expand_synonyms(term: &str) -> Vec<String> {
    let mut terms = vec![term.to_string()];

    if term.contains("계약") {
        terms.extend(["계약서", "약정서", "협약서"].map(String::from));
    }
    if term.contains("기간") {
        terms.extend(["기한", "일정", "날짜"].map(String::from));
    }
    if term.contains('금') && term != "금지" {
        terms.extend(["대금", "비용", "요금"].map(String::from));
    }

    terms
}

fn score_chunk(
    title: &str,
    body: &str,
    terms: &[String],
    weights: &ScoreWeights,
) -> Option<(u32, Vec<String>)> {
    let mut score = 0u32;
    let mut matched = Vec::new();

    for term in terms {
        let needle = term.to_lowercase();
        let in_title = title.matches(needle.as_str()).count() as u32;
        let in_body = body.matches(needle.as_str()).count() as u32;

        if in_title + in_body > 0 {
            score += in_title * weights.title_occurrence + in_body * weights.body_occurrence;
            matched.push(term.clone());
        }
    }

    (score > 0).then_some((score, matched))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::chunker::{ArticleChunker, Chunker};
    use crate::knowledge::classifier::classify;

    const LEASE: &str = "제1조 (목적) 임대인과 임차인은 아래 부동산에 관하여 계약을 체결한다.\n\
        제2조 (보증금) 임차인은 보증금을 계약 시 지급한다.\n\
        제3조 (해지) 임차인이 차임을 2회 연체하면 임대인은 계약을 해지할 수 있다. 해지 시 원상복구한다.\n";

    fn build() -> (Vec<Chunk>, KeywordIndex) {
        let chunks = ArticleChunker::with_defaults().chunk(LEASE);
        let classification = classify(LEASE);
        let index = KeywordIndex::build(&chunks, &classification, &ScoreWeights::default());
        (chunks, index)
    }

    #[test]
    fn test_title_outweighs_body() {
        let (_, index) = build();
        let top = index.top("해지_종료").unwrap();

        // 제3조: 라벨 1회(15) + 본문 3회(머리줄 포함, 9)
        assert_eq!(top.chunk_index, 2);
        assert_eq!(top.score, 24);
        assert_eq!(top.label, "제3조 (해지)");
    }

    #[test]
    fn test_empty_groups_omitted() {
        let (_, index) = build();
        assert!(index.get("위험_주의").is_none());
        assert!(index.get("계약_약정").is_some());
    }

    #[test]
    fn test_matches_sorted_descending() {
        let (_, index) = build();
        for group in index.groups() {
            assert!(group.matches.windows(2).all(|w| w[0].score >= w[1].score));
        }
    }

    #[test]
    fn test_specialized_groups_from_matched_terms() {
        let (_, index) = build();
        let group = index.get("특화_보증금").unwrap();

        // "금" 포함 용어는 대금/비용/요금으로 확장
        assert!(group.terms.contains(&"대금".to_string()));
        assert_eq!(group.matches[0].chunk_index, 1);
    }

    #[test]
    fn test_expand_synonyms() {
        assert_eq!(expand_synonyms("금지"), vec!["금지"]);
        assert!(expand_synonyms("계약기간").contains(&"약정서".to_string()));
        assert!(expand_synonyms("계약기간").contains(&"일정".to_string()));
    }

    #[test]
    fn test_groups_for_query() {
        assert_eq!(groups_for_query("계약을 끝내고 싶어요"), vec!["해지_종료"]);
        assert_eq!(groups_for_query("돈은 언제 지급하나요"), vec!["지급_결제"]);
        assert!(groups_for_query("근무 장소").is_empty());
    }

    #[test]
    fn test_unknown_classification_has_only_universal_groups() {
        let chunks = ArticleChunker::with_defaults().chunk("제1조 (책임) 책임을 진다.");
        let index = KeywordIndex::build(&chunks, &Classification::Unknown, &ScoreWeights::default());
        assert!(index
            .groups()
            .iter()
            .all(|g| !g.name.starts_with(SPECIALIZED_PREFIX)));
    }
}
