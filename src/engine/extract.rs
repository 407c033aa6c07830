// ── Content Extraction ──────────────────────────────────────────────────────
// Content-type-dispatched text extraction for the document pipeline.
// HTML extraction follows the `scraper` selector-cache pattern used
// throughout the pack's page extractor; PDF and Word extraction are
// single-shot since there is no selector tree to cache.

use crate::atoms::error::{EngineError, EngineResult};
use scraper::{Html, Selector};
use std::sync::OnceLock;

/// Extracts plain text from raw file bytes, dispatching on `content_type`.
/// Returns an error for PDFs/documents that yield no non-whitespace text —
/// there is no OCR fallback.
pub fn extract_text(content_type: &str, bytes: &[u8]) -> EngineResult<String> {
    let text = match content_type {
        "application/pdf" => extract_pdf(bytes)?,
        "text/html" | "application/xhtml+xml" => extract_html(bytes)?,
        "application/msword" | "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => extract_docx(bytes)?,
        _ => extract_plain(bytes)?,
    };

    if text.trim().is_empty() {
        return Err(EngineError::invalid(format!("no extractable text in a {content_type} document")));
    }
    Ok(text)
}

fn extract_pdf(bytes: &[u8]) -> EngineResult<String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| EngineError::invalid(format!("pdf extraction failed: {e}")))
}

fn extract_docx(bytes: &[u8]) -> EngineResult<String> {
    let docx = docx_rs::read_docx(bytes).map_err(|e| EngineError::invalid(format!("docx extraction failed: {e}")))?;
    let mut out = String::new();
    for child in docx.document.children {
        if let docx_rs::DocumentChild::Paragraph(p) = child {
            for run_child in p.children {
                if let docx_rs::ParagraphChild::Run(run) = run_child {
                    for rc in run.children {
                        if let docx_rs::RunChild::Text(t) = rc {
                            out.push_str(&t.text);
                        }
                    }
                }
            }
            out.push('\n');
        }
    }
    Ok(out)
}

fn extract_html(bytes: &[u8]) -> EngineResult<String> {
    let raw = String::from_utf8_lossy(bytes);
    let document = Html::parse_document(&raw);
    static BODY: OnceLock<Selector> = OnceLock::new();
    let selector = BODY.get_or_init(|| Selector::parse("body").unwrap());
    let text = document
        .select(selector)
        .next()
        .map(|body| body.text().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();
    Ok(text.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn extract_plain(bytes: &[u8]) -> EngineResult<String> {
    String::from_utf8(bytes.to_vec()).map_err(|e| EngineError::invalid(format!("not valid utf-8 text: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_roundtrips() {
        let text = extract_text("text/plain", b"hello world").unwrap();
        assert_eq!(text, "hello world");
    }

    #[test]
    fn html_strips_tags_and_collapses_whitespace() {
        let html = b"<html><body><h1>Title</h1>\n<p>Some   text.</p></body></html>";
        let text = extract_text("text/html", html).unwrap();
        assert_eq!(text, "Title Some text.");
    }

    #[test]
    fn empty_text_document_is_rejected() {
        assert!(extract_text("text/plain", b"   \n\t  ").is_err());
    }

    #[test]
    fn non_utf8_plain_text_is_rejected() {
        assert!(extract_text("text/plain", &[0xff, 0xfe, 0x00]).is_err());
    }
}
