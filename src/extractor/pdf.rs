//! PDF 텍스트 추출
//!
//! pdf-extract 크레이트로 메모리의 PDF에서 텍스트를 뽑고,
//! 페이지 구분을 문단 경계로 바꿔 하나의 문자열로 합칩니다.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

/// "--- Page 3 ---" 류의 페이지 구분 줄
static PAGE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$").expect("Invalid regex")
});

/// 단독으로 선 쪽번호 ("- 3 -", "3 / 12")
static PAGE_NUMBER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:-\s*\d+\s*-|\d+\s*/\s*\d+)[ \t]*$").expect("Invalid regex")
});

/// PDF 바이트에서 텍스트 추출
///
/// 텍스트가 없으면(스캔 문서) 빈 문자열을 돌려주고, 판단은 호출자에게 맡깁니다.
pub fn extract_text_from_pdf(bytes: &[u8]) -> Result<String> {
    // pdf-extract는 손상된 입력에서 패닉을 일으키기도 함
    let text = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
        .map_err(|_| anyhow::anyhow!("PDF parser panicked on malformed input"))?
        .context("Failed to extract text from PDF")?;

    if text.trim().is_empty() {
        tracing::warn!("No text extracted from PDF. It might be a scanned document.");
        return Ok(String::new());
    }

    let pages = split_pdf_pages(&text);
    tracing::debug!("PDF split into {} pages", pages.len());

    Ok(pages
        .iter()
        .map(|page| PAGE_NUMBER_LINE.replace_all(page, "").trim().to_string())
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n"))
}

/// PDF 텍스트를 페이지별로 분리
fn split_pdf_pages(text: &str) -> Vec<String> {
    // 폼피드 문자 (\x0c)
    let pages: Vec<String> = text
        .split('\x0c')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if pages.len() > 1 {
        return pages;
    }

    // 페이지 구분자 패턴 (일부 PDF에서 사용)
    if PAGE_MARKER.is_match(text) {
        let pages: Vec<String> = PAGE_MARKER
            .split(text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if pages.len() > 1 {
            return pages;
        }
    }

    vec![text.trim().to_string()]
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pdf_pages_with_formfeed() {
        let text = "제1조 (목적)\x0c제2조 (기간)\x0c제3조 (해지)";
        let pages = split_pdf_pages(text);
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[1], "제2조 (기간)");
    }

    #[test]
    fn test_split_pdf_pages_with_marker() {
        let text = "첫 페이지\n--- Page 2 ---\n둘째 페이지";
        let pages = split_pdf_pages(text);
        assert_eq!(pages, vec!["첫 페이지", "둘째 페이지"]);
    }

    #[test]
    fn test_split_pdf_pages_no_separator() {
        let pages = split_pdf_pages("Just some text without page breaks");
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn test_page_number_lines_removed() {
        let cleaned = PAGE_NUMBER_LINE.replace_all("본문\n- 3 -\n계속\n4 / 12\n", "");
        assert!(!cleaned.contains("- 3 -"));
        assert!(!cleaned.contains("4 / 12"));
        assert!(cleaned.contains("계속"));
    }

    #[test]
    fn test_invalid_pdf_errors() {
        assert!(extract_text_from_pdf(b"not a pdf").is_err());
    }
}
