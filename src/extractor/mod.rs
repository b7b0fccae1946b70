//! 텍스트 추출 모듈
//!
//! 업로드된 파일 바이트에서 평문을 뽑아냅니다.
//! - TXT: UTF-8 디코딩
//! - PDF: pdf-extract
//! - DOCX: zip + quick-xml (word/document.xml)
//!
//! 구형 바이너리 `.doc`, `.hwp` 등은 [`RagError::UnsupportedFormat`]으로 거부합니다.

pub mod docx;
pub mod pdf;

use std::fmt;

use crate::error::{RagError, RagResult};

// ============================================================================
// File Type
// ============================================================================

/// 지원 파일 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Text,
    Pdf,
    Docx,
}

impl FileType {
    /// 확장자로 형식 판별 (점 유무, 대소문자 무시)
    pub fn from_extension(ext: &str) -> RagResult<Self> {
        match ext.trim().trim_start_matches('.').to_lowercase().as_str() {
            "txt" | "text" | "md" => Ok(FileType::Text),
            "pdf" => Ok(FileType::Pdf),
            "docx" => Ok(FileType::Docx),
            "" => Err(RagError::UnsupportedFormat("missing file extension".to_string())),
            other => Err(RagError::UnsupportedFormat(format!(".{}", other))),
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FileType::Text => "TXT",
            FileType::Pdf => "PDF",
            FileType::Docx => "DOCX",
        })
    }
}

// ============================================================================
// Extraction
// ============================================================================

/// 파일 바이트에서 텍스트 추출
///
/// 추출 결과가 비어 있으면(스캔 PDF 등) [`RagError::ExtractionFailed`]입니다.
pub fn extract(bytes: &[u8], extension: &str) -> RagResult<String> {
    let file_type = FileType::from_extension(extension)?;

    let raw = match file_type {
        FileType::Text => decode_text(bytes)?,
        FileType::Pdf => pdf::extract_text_from_pdf(bytes)
            .map_err(|e| RagError::ExtractionFailed(format!("{:#}", e)))?,
        FileType::Docx => docx::extract_text_from_docx(bytes)
            .map_err(|e| RagError::ExtractionFailed(format!("{:#}", e)))?,
    };

    let text = normalize_text(&raw);
    if text.trim().is_empty() {
        return Err(RagError::ExtractionFailed(format!(
            "no text found in {} file",
            file_type
        )));
    }

    tracing::debug!("Extracted {} chars from {} file", text.chars().count(), file_type);
    Ok(text)
}

/// UTF-8 텍스트 디코딩 (BOM 제거)
fn decode_text(bytes: &[u8]) -> RagResult<String> {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    String::from_utf8(bytes.to_vec())
        .map_err(|_| RagError::ExtractionFailed("text file is not valid UTF-8".to_string()))
}

/// 줄바꿈 통일 및 제어 문자 제거
///
/// 폼피드는 문단 경계로 바꿔 청킹 시 분할 지점이 되게 합니다.
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\x0c', "\n\n")
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t'))
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_type_from_extension() {
        assert_eq!(FileType::from_extension("PDF").unwrap(), FileType::Pdf);
        assert_eq!(FileType::from_extension(".docx").unwrap(), FileType::Docx);
        assert_eq!(FileType::from_extension("txt").unwrap(), FileType::Text);
    }

    #[test]
    fn test_legacy_doc_is_unsupported() {
        let err = extract(b"binary", "doc").unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));

        let err = FileType::from_extension("").unwrap_err();
        assert!(matches!(err, RagError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_extract_text_strips_bom_and_crlf() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("제1조 (목적)\r\n본 계약은".as_bytes());

        let text = extract(&bytes, "txt").unwrap();
        assert_eq!(text, "제1조 (목적)\n본 계약은");
    }

    #[test]
    fn test_invalid_utf8_fails_extraction() {
        let err = extract(&[0xff, 0xfe, 0x00, 0x41], "txt").unwrap_err();
        assert!(matches!(err, RagError::ExtractionFailed(_)));
    }

    #[test]
    fn test_blank_text_fails_extraction() {
        let err = extract(b"   \n\n ", "txt").unwrap_err();
        assert!(matches!(err, RagError::ExtractionFailed(_)));
    }

    #[test]
    fn test_corrupt_pdf_fails_extraction() {
        let err = extract(b"%PDF-1.4 garbage", "pdf").unwrap_err();
        assert!(matches!(err, RagError::ExtractionFailed(_)));
    }

    #[test]
    fn test_normalize_text_formfeed() {
        assert_eq!(normalize_text("a\x0cb\x07c"), "a\n\nbc");
    }
}
