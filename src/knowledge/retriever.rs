//! 검색 오케스트레이터
//!
//! 질문 하나에 대해 고정된 우선순위로 단계를 실행하고 결과를 합칩니다.
//!
//! 1. 관련성 게이트 (거부 시 어떤 검색도 하지 않음)
//! 2. 조항 번호 직접 매칭 (찾으면 그 조항만 반환)
//! 3. 정확 키워드 매칭
//! 4. 계약 유형 특화어 매칭
//! 5. 키워드 그룹 매칭
//! 6. 벡터 유사도 (앞 단계 결과가 부족할 때만)
//!
//! 병합: 청크별 최고 점수만 남기고, 점수 내림차순으로 `top_k`개.

use std::collections::HashMap;
use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::chunker::Chunk;
use super::classifier::Classification;
use super::keyword_index::{groups_for_query, KeywordIndex};
use super::relevance::{
    article_references, query_words, strip_particle, RejectReason, RelevanceDecision,
    RelevanceGate,
};
use super::vector::StorageBackend;
use crate::config::RagConfig;
use crate::embedding::EmbeddingProvider;

/// 정확 매칭에서 뺄 질문 단어
static STOPWORDS: &[&str] = &[
    "그게", "그건", "뭐야", "뭔가", "어떤", "어디", "언제", "왜",
    "그리고", "그런데", "하지만", "그러나", "또는", "아니면",
    "이것", "그것", "저것", "이거", "그거", "저거",
    "무엇", "어느", "누구", "어떻게", "얼마나",
    "의", "가", "이", "을", "를", "에", "에서", "로", "으로",
    "은", "는", "과", "와", "도", "라", "라서",
];

/// 단어 바로 뒤에 붙으면 같은 단어의 활용으로 보는 조사 글자
const PARTICLE_CHARS: &str = "은는이가을를의에서로부터까지와과도나며으로써에게";

// ============================================================================
// Types
// ============================================================================

/// 결과를 만든 검색 방식
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum RetrievalMethod {
    ArticleMatch { article: u32 },
    ExactKeyword { keyword: String, count: usize },
    Specialized { term: String },
    KeywordGroup { group: String },
    Vector { similarity: f32 },
}

impl RetrievalMethod {
    pub fn label(&self) -> &'static str {
        match self {
            RetrievalMethod::ArticleMatch { .. } => "article-match",
            RetrievalMethod::ExactKeyword { .. } => "exact-keyword",
            RetrievalMethod::Specialized { .. } => "specialized",
            RetrievalMethod::KeywordGroup { .. } => "keyword-group",
            RetrievalMethod::Vector { .. } => "vector",
        }
    }
}

impl fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetrievalMethod::ArticleMatch { article } => write!(f, "article-match(제{}조)", article),
            RetrievalMethod::ExactKeyword { keyword, count } => {
                write!(f, "exact-keyword({}:{})", keyword, count)
            }
            RetrievalMethod::Specialized { term } => write!(f, "specialized({})", term),
            RetrievalMethod::KeywordGroup { group } => write!(f, "keyword-group({})", group),
            RetrievalMethod::Vector { similarity } => write!(f, "vector({:.3})", similarity),
        }
    }
}

/// 검색 결과 한 건 (질의 동안만 존재)
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalResult {
    pub chunk_index: usize,
    pub score: f32,
    pub method: RetrievalMethod,
}

/// 답변 근거 기록 (대화 기록에 저장)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub chunk_index: usize,
    pub label: String,
    #[serde(flatten)]
    pub method: RetrievalMethod,
    pub score: f32,
}

impl SourceRef {
    pub fn new(result: &RetrievalResult, chunk: &Chunk) -> Self {
        Self {
            chunk_index: result.chunk_index,
            label: chunk.label.clone(),
            method: result.method.clone(),
            score: result.score,
        }
    }
}

/// 검색 결과
#[derive(Debug, Clone, PartialEq)]
pub enum RetrievalOutcome {
    /// 관련성 게이트에서 거부
    Rejected(RejectReason),
    /// 게이트는 통과했지만 어떤 단계도 결과 없음
    NoMatch,
    /// 점수 내림차순
    Matches(Vec<RetrievalResult>),
}

impl RetrievalOutcome {
    pub fn results(&self) -> &[RetrievalResult] {
        match self {
            RetrievalOutcome::Matches(results) => results,
            _ => &[],
        }
    }
}

/// 한 문서에 대한 검색 재료 (요청 단위로 빌림)
pub struct RetrievalContext<'a> {
    pub chunks: &'a [Chunk],
    pub classification: &'a Classification,
    pub keyword_index: &'a KeywordIndex,
    pub backend: &'a dyn StorageBackend,
    /// 없으면 벡터 단계를 건너뜀
    pub embedder: Option<&'a dyn EmbeddingProvider>,
}

// ============================================================================
// Retriever
// ============================================================================

/// 검색 오케스트레이터
#[derive(Debug, Clone)]
pub struct Retriever {
    config: RagConfig,
    gate: RelevanceGate,
}

impl Retriever {
    pub fn new(config: RagConfig) -> Result<Self> {
        let gate = RelevanceGate::new(&config.relevance)?;
        Ok(Self { config, gate })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub fn gate(&self) -> &RelevanceGate {
        &self.gate
    }

    /// 질문에 맞는 청크 검색
    pub async fn retrieve(&self, query: &str, ctx: &RetrievalContext<'_>) -> RetrievalOutcome {
        // 1. 관련성 게이트
        let document_lower = document_text_lower(ctx.chunks);
        match self.gate.check(query, &document_lower) {
            RelevanceDecision::Reject(reason) => {
                tracing::info!("Question rejected by relevance gate: {}", reason);
                return RetrievalOutcome::Rejected(reason);
            }
            RelevanceDecision::Accept(reason) => {
                tracing::debug!("Question accepted: {:?}", reason);
            }
        }

        // 2. 조항 번호 직접 매칭
        let article_hits = self.article_matches(query, ctx.chunks);
        if !article_hits.is_empty() {
            tracing::info!("Article match: {} chunks", article_hits.len());
            return RetrievalOutcome::Matches(article_hits);
        }

        let mut candidates = Vec::new();

        // 3. 정확 키워드
        let exact = self.exact_keyword_matches(query, ctx.chunks);
        tracing::debug!("Exact keyword matches: {}", exact.len());
        candidates.extend(exact);

        // 4. 계약 유형 특화어
        let specialized = self.specialized_matches(query, ctx);
        tracing::debug!("Specialized matches: {}", specialized.len());
        candidates.extend(specialized);

        // 5. 키워드 그룹
        let grouped = self.keyword_group_matches(query, ctx.keyword_index);
        tracing::debug!("Keyword group matches: {}", grouped.len());
        candidates.extend(grouped);

        // 6. 벡터 (결과가 부족할 때만)
        if candidates.len() < self.config.vector_fallback_below {
            candidates.extend(self.vector_matches(query, ctx).await);
        } else {
            tracing::debug!("Skipping vector search ({} lexical matches)", candidates.len());
        }

        let merged = merge(candidates, self.config.top_k);
        if merged.is_empty() {
            tracing::info!("No chunks matched question");
            RetrievalOutcome::NoMatch
        } else {
            tracing::info!("Retrieved {} chunks", merged.len());
            RetrievalOutcome::Matches(merged)
        }
    }

    /// 언급된 조항의 모든 청크 (top_k 무시)
    ///
    /// 점수 보너스는 조항 언급 순서와 청크 순서를 유지하도록 뒤로 갈수록 작아집니다.
    fn article_matches(&self, query: &str, chunks: &[Chunk]) -> Vec<RetrievalResult> {
        let matched: Vec<(u32, usize)> = article_references(query)
            .into_iter()
            .flat_map(|n| {
                chunks
                    .iter()
                    .filter(move |c| c.article_num == Some(n))
                    .map(move |c| (n, c.index))
            })
            .collect();

        let total = matched.len();
        matched
            .into_iter()
            .enumerate()
            .map(|(pos, (article, chunk_index))| RetrievalResult {
                chunk_index,
                score: self.config.weights.article + (total - pos) as f32,
                method: RetrievalMethod::ArticleMatch { article },
            })
            .collect()
    }

    fn exact_keyword_matches(&self, query: &str, chunks: &[Chunk]) -> Vec<RetrievalResult> {
        let weights = &self.config.weights;
        let mut all: Vec<(usize, RetrievalResult)> = Vec::new();

        for word in query_words(&query.to_lowercase()) {
            if STOPWORDS.contains(&word.as_str()) {
                continue;
            }

            let mut per_word: Vec<(usize, usize)> = chunks
                .iter()
                .map(|c| (c.index, occurrence_count(&c.body.to_lowercase(), &word)))
                .filter(|(_, count)| *count > 0)
                .collect();

            // 활용형 그대로 없으면 조사를 떼고 다시
            if per_word.is_empty() {
                if let Some(stem) = strip_particle(&word) {
                    per_word = chunks
                        .iter()
                        .map(|c| (c.index, occurrence_count(&c.body.to_lowercase(), stem)))
                        .filter(|(_, count)| *count > 0)
                        .collect();
                }
            }

            per_word.sort_by(|a, b| b.1.cmp(&a.1));
            for (chunk_index, count) in per_word
                .into_iter()
                .take(self.config.exact_matches_per_keyword)
            {
                all.push((
                    count,
                    RetrievalResult {
                        chunk_index,
                        score: weights.exact_base + weights.exact_per_occurrence * count as f32,
                        method: RetrievalMethod::ExactKeyword {
                            keyword: word.clone(),
                            count,
                        },
                    },
                ));
            }
        }

        all.sort_by(|a, b| b.0.cmp(&a.0));
        all.into_iter()
            .take(self.config.exact_matches_total)
            .map(|(_, result)| result)
            .collect()
    }

    fn specialized_matches(&self, query: &str, ctx: &RetrievalContext<'_>) -> Vec<RetrievalResult> {
        let query_lower = query.to_lowercase();

        ctx.classification
            .type_terms()
            .iter()
            .filter(|term| query_lower.contains(*term))
            .flat_map(|term| {
                ctx.chunks
                    .iter()
                    .filter(move |c| c.body.contains(term))
                    .map(move |c| RetrievalResult {
                        chunk_index: c.index,
                        score: self.config.weights.specialized,
                        method: RetrievalMethod::Specialized {
                            term: term.to_string(),
                        },
                    })
            })
            .collect()
    }

    fn keyword_group_matches(&self, query: &str, index: &KeywordIndex) -> Vec<RetrievalResult> {
        groups_for_query(&query.to_lowercase())
            .into_iter()
            .filter_map(|group| {
                index.top(group).map(|m| RetrievalResult {
                    chunk_index: m.chunk_index,
                    score: m.score as f32 + self.config.weights.keyword_group_bonus,
                    method: RetrievalMethod::KeywordGroup {
                        group: group.to_string(),
                    },
                })
            })
            .collect()
    }

    /// 벡터 검색 (실패하면 빈 결과로 강등)
    async fn vector_matches(&self, query: &str, ctx: &RetrievalContext<'_>) -> Vec<RetrievalResult> {
        let Some(embedder) = ctx.embedder else {
            tracing::debug!("No embedder available, skipping vector search");
            return vec![];
        };

        let query_vector = match embedder.embed_query(query).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("Query embedding failed, continuing without vector search: {}", e);
                return vec![];
            }
        };

        let hits = match ctx.backend.search(&query_vector, self.config.top_k).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(
                    "Vector search failed ({}), continuing without it: {:#}",
                    ctx.backend.mode(),
                    e
                );
                return vec![];
            }
        };

        let threshold = self.config.vector_similarity_threshold;
        let results: Vec<RetrievalResult> = hits
            .into_iter()
            .filter(|h| h.similarity > threshold && h.chunk_index < ctx.chunks.len())
            .map(|h| RetrievalResult {
                chunk_index: h.chunk_index,
                score: h.similarity * self.config.weights.vector_scale,
                method: RetrievalMethod::Vector {
                    similarity: h.similarity,
                },
            })
            .collect();

        tracing::debug!("Vector matches above {}: {}", threshold, results.len());
        results
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn document_text_lower(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .map(|c| c.body.to_lowercase())
        .collect::<Vec<_>>()
        .join("\n")
}

/// 정확 등장 수 + 조사가 바로 붙은 등장 수
fn occurrence_count(haystack: &str, word: &str) -> usize {
    let mut exact = 0;
    let mut inflected = 0;

    for (pos, _) in haystack.match_indices(word) {
        exact += 1;
        let next = haystack[pos + word.len()..].chars().next();
        if next.map(|c| PARTICLE_CHARS.contains(c)).unwrap_or(false) {
            inflected += 1;
        }
    }

    exact + inflected
}

/// 청크별 최고 점수만 남기고 정렬 후 자르기
fn merge(candidates: Vec<RetrievalResult>, top_k: usize) -> Vec<RetrievalResult> {
    let mut best: HashMap<usize, RetrievalResult> = HashMap::new();

    for candidate in candidates {
        match best.get(&candidate.chunk_index) {
            Some(existing) if existing.score >= candidate.score => {}
            _ => {
                best.insert(candidate.chunk_index, candidate);
            }
        }
    }

    let mut merged: Vec<RetrievalResult> = best.into_values().collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_index.cmp(&b.chunk_index))
    });
    merged.truncate(top_k);
    merged
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScoreWeights;
    use crate::knowledge::chunker::{ArticleChunker, Chunker};
    use crate::knowledge::classifier::classify;
    use crate::knowledge::ephemeral::EphemeralIndex;
    use crate::knowledge::vector::VectorRecord;
    use crate::testing::{hash_vector, CountingBackend, FailingEmbedder, StubEmbedder};

    const DIM: usize = 32;

    const CONTRACT: &str = "근로계약서\n\
        제1조 (목적) 본 계약은 사용자와 근로자 사이의 근로조건을 정한다.\n\
        제2조 (근로시간) 근로시간은 1일 8시간, 주 40시간으로 한다. 휴게시간은 1시간이다.\n\
        제3조 (임금) 임금은 월 300만원으로 하며 매월 25일에 지급한다.\n\
        제4조 (해지) 근로자가 계약을 위반하면 사용자는 계약을 해지할 수 있다.\n\
        제5조 (퇴직금) 1년 이상 근무한 근로자에게 퇴직금을 지급한다.\n";

    struct Fixture {
        chunks: Vec<Chunk>,
        classification: Classification,
        index: KeywordIndex,
        backend: CountingBackend,
    }

    fn fixture(failing_backend: bool) -> Fixture {
        let chunks = ArticleChunker::with_defaults().chunk(CONTRACT);
        let classification = classify(CONTRACT);
        let index = KeywordIndex::build(&chunks, &classification, &ScoreWeights::default());
        let records = chunks
            .iter()
            .map(|c| VectorRecord::new(c, hash_vector(&c.embedding_text(), DIM)))
            .collect();
        let ephemeral = EphemeralIndex::build(records).unwrap();
        let backend = if failing_backend {
            CountingBackend::failing(ephemeral)
        } else {
            CountingBackend::new(ephemeral)
        };
        Fixture {
            chunks,
            classification,
            index,
            backend,
        }
    }

    fn context<'a>(f: &'a Fixture, embedder: Option<&'a dyn EmbeddingProvider>) -> RetrievalContext<'a> {
        RetrievalContext {
            chunks: &f.chunks,
            classification: &f.classification,
            keyword_index: &f.index,
            backend: &f.backend,
            embedder,
        }
    }

    fn retriever() -> Retriever {
        Retriever::new(RagConfig::default()).unwrap()
    }

    fn article_of(f: &Fixture, result: &RetrievalResult) -> Option<u32> {
        f.chunks[result.chunk_index].article_num
    }

    #[tokio::test]
    async fn test_off_topic_makes_no_retrieval_calls() {
        let f = fixture(false);
        let embedder = StubEmbedder::new(DIM);

        let outcome = retriever()
            .retrieve("What's the weather today?", &context(&f, Some(&embedder)))
            .await;

        assert!(matches!(outcome, RetrievalOutcome::Rejected(RejectReason::OffTopic(_))));
        assert_eq!(f.backend.searches(), 0);
        assert_eq!(embedder.single_calls(), 0);
    }

    #[tokio::test]
    async fn test_article_match_returns_only_that_article() {
        let f = fixture(false);
        let embedder = StubEmbedder::new(DIM);

        let outcome = retriever()
            .retrieve("제2조가 뭐야?", &context(&f, Some(&embedder)))
            .await;

        let results = outcome.results();
        assert_eq!(results.len(), 1);
        assert_eq!(article_of(&f, &results[0]), Some(2));
        assert_eq!(results[0].method, RetrievalMethod::ArticleMatch { article: 2 });
        assert_eq!(results[0].method.label(), "article-match");
        assert_eq!(f.backend.searches(), 0);
    }

    #[tokio::test]
    async fn test_article_match_english_reference() {
        let f = fixture(false);
        let outcome = retriever()
            .retrieve("Explain Article 5", &context(&f, None))
            .await;

        let results = outcome.results();
        assert_eq!(results.len(), 1);
        assert_eq!(article_of(&f, &results[0]), Some(5));
    }

    #[tokio::test]
    async fn test_multiple_articles_keep_mention_order() {
        let f = fixture(false);
        let outcome = retriever()
            .retrieve("제4조와 제2조를 비교해줘", &context(&f, None))
            .await;

        let articles: Vec<_> = outcome
            .results()
            .iter()
            .map(|r| article_of(&f, r))
            .collect();
        assert_eq!(articles, vec![Some(4), Some(2)]);
        assert!(outcome.results()[0].score > outcome.results()[1].score);
    }

    #[tokio::test]
    async fn test_missing_article_falls_through() {
        let f = fixture(false);
        let outcome = retriever()
            .retrieve("제9조 퇴직금 규정", &context(&f, None))
            .await;

        let results = outcome.results();
        assert!(!results.is_empty());
        assert_eq!(article_of(&f, &results[0]), Some(5));
        assert!(results
            .iter()
            .all(|r| r.method.label() != "article-match"));
    }

    #[tokio::test]
    async fn test_exact_keyword_scoring() {
        let f = fixture(false);
        let outcome = retriever()
            .retrieve("퇴직금 조건", &context(&f, None))
            .await;

        let top = &outcome.results()[0];
        assert_eq!(article_of(&f, top), Some(5));
        // 본문에 "퇴직금" 2회, 그중 조사가 붙은 것 1회("퇴직금을")
        assert_eq!(
            top.method,
            RetrievalMethod::ExactKeyword {
                keyword: "퇴직금".to_string(),
                count: 3
            }
        );
        assert_eq!(top.score, 86.0);
    }

    #[tokio::test]
    async fn test_results_truncated_to_top_k() {
        let f = fixture(false);
        let outcome = retriever()
            .retrieve("근로자 계약 해지 임금", &context(&f, None))
            .await;

        let results = outcome.results();
        assert_eq!(results.len(), 3);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));

        let mut indices: Vec<_> = results.iter().map(|r| r.chunk_index).collect();
        indices.dedup();
        assert_eq!(indices.len(), 3);
    }

    #[tokio::test]
    async fn test_vector_fallback_only_when_few_results() {
        let f = fixture(false);
        let embedder = StubEmbedder::new(DIM);

        // 어휘 일치가 많으면 벡터 검색 생략
        retriever()
            .retrieve("근로자 계약 해지 임금", &context(&f, Some(&embedder)))
            .await;
        assert_eq!(f.backend.searches(), 0);

        // 어휘 일치가 없으면 벡터 검색 실행
        retriever()
            .retrieve("손해배상 청구 가능?", &context(&f, Some(&embedder)))
            .await;
        assert_eq!(f.backend.searches(), 1);
        assert_eq!(embedder.single_calls(), 1);
    }

    #[tokio::test]
    async fn test_vector_backend_failure_degrades() {
        let f = fixture(true);
        let embedder = FailingEmbedder::transient_on_batch(DIM, 0);

        let outcome = retriever()
            .retrieve("손해배상 청구 가능?", &context(&f, Some(&embedder)))
            .await;

        assert_eq!(f.backend.searches(), 1);
        assert_eq!(outcome, RetrievalOutcome::NoMatch);
    }

    #[test]
    fn test_merge_keeps_highest_score() {
        let merged = merge(
            vec![
                RetrievalResult {
                    chunk_index: 1,
                    score: 70.0,
                    method: RetrievalMethod::Specialized { term: "임금".into() },
                },
                RetrievalResult {
                    chunk_index: 1,
                    score: 84.0,
                    method: RetrievalMethod::ExactKeyword {
                        keyword: "임금".into(),
                        count: 2,
                    },
                },
                RetrievalResult {
                    chunk_index: 0,
                    score: 10.0,
                    method: RetrievalMethod::Vector { similarity: 0.5 },
                },
            ],
            3,
        );

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].chunk_index, 1);
        assert_eq!(merged[0].score, 84.0);
    }

    #[test]
    fn test_occurrence_count() {
        assert_eq!(occurrence_count("임금은 임금", "임금"), 3);
        assert_eq!(occurrence_count("근로시간", "임금"), 0);
    }

    #[test]
    fn test_source_ref_serialization() {
        let source = SourceRef {
            chunk_index: 1,
            label: "제2조 (근로시간)".to_string(),
            method: RetrievalMethod::ArticleMatch { article: 2 },
            score: 101.0,
        };
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["method"], "article-match");
        assert_eq!(json["article"], 2);
    }
}
