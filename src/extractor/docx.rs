//! DOCX 텍스트 추출
//!
//! DOCX는 zip 컨테이너이며 본문은 `word/document.xml`의 `<w:t>` 요소에 있습니다.
//! 문단(`</w:p>`)과 줄바꿈(`<w:br/>`)은 개행으로, `<w:tab/>`은 탭으로 옮겨
//! 조항 경계가 유지되도록 합니다.

use std::io::{Cursor, Read};

use anyhow::{Context, Result};
use quick_xml::events::Event;

/// 압축 해제 후 document.xml 최대 크기
const MAX_DOCUMENT_XML_BYTES: u64 = 50 * 1024 * 1024;

const DOCUMENT_XML: &str = "word/document.xml";

/// DOCX 바이트에서 텍스트 추출
pub fn extract_text_from_docx(bytes: &[u8]) -> Result<String> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("Not a valid DOCX (zip) file")?;

    let entry = archive
        .by_name(DOCUMENT_XML)
        .with_context(|| format!("{} not found", DOCUMENT_XML))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_DOCUMENT_XML_BYTES)
        .read_to_end(&mut xml)
        .context("Failed to read document.xml")?;

    if xml.len() as u64 >= MAX_DOCUMENT_XML_BYTES {
        anyhow::bail!("{} exceeds size limit", DOCUMENT_XML);
    }

    paragraphs_from_xml(&xml)
}

/// document.xml을 문단 단위 텍스트로 변환
fn paragraphs_from_xml(xml: &[u8]) -> Result<String> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    // <w:tabs> 안의 <w:tab>은 탭 정지 위치 정의라 본문이 아님
    let mut in_tab_stops = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = e.local_name();
                if name.as_ref() == b"tabs" {
                    in_tab_stops = true;
                } else if name.as_ref() == b"t" {
                    if let Ok(Event::Text(te)) = reader.read_event_into(&mut buf) {
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"br" | b"cr" => out.push('\n'),
                b"tab" if !in_tab_stops => out.push('\t'),
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"p" => out.push('\n'),
                b"tabs" => in_tab_stops = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Malformed document.xml at position {}: {}",
                    reader.buffer_position(),
                    e
                ))
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn build_docx(document_xml: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file(DOCUMENT_XML, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(document_xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main">
  <w:body>
    <w:p><w:pPr><w:tabs><w:tab w:val="left" w:pos="720"/></w:tabs></w:pPr>
      <w:r><w:t>제1조 (목적)</w:t></w:r></w:p>
    <w:p><w:r><w:t xml:space="preserve">본 계약은 </w:t></w:r><w:r><w:t>근로조건을 정한다.</w:t></w:r></w:p>
    <w:p><w:r><w:t>제2조</w:t><w:tab/><w:t>(근로시간)</w:t><w:br/><w:t>1일 8시간 &amp; 주 40시간</w:t></w:r></w:p>
  </w:body>
</w:document>"#;

    #[test]
    fn test_extract_paragraphs() {
        let text = extract_text_from_docx(&build_docx(SAMPLE)).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "제1조 (목적)");
        assert_eq!(lines[1], "본 계약은 근로조건을 정한다.");
        assert_eq!(lines[2], "제2조\t(근로시간)");
        assert_eq!(lines[3], "1일 8시간 & 주 40시간");
    }

    #[test]
    fn test_invalid_zip_returns_error() {
        assert!(extract_text_from_docx(b"not a zip").is_err());
    }

    #[test]
    fn test_missing_document_xml() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("word/styles.xml", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"<styles/>").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let err = extract_text_from_docx(&bytes).unwrap_err();
        assert!(err.to_string().contains("document.xml"));
    }
}
