// Single-page fetch and HTML-to-markdown rendering for the crawl engine.
// Follows the selector-cache pattern in `engine::extract::extract_html`,
// generalized from one `body` selector to the handful needed to render a
// readable document plus its outbound links.

use crate::atoms::error::{EngineError, EngineResult};
use reqwest::Client;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use std::time::Duration;

pub struct FetchedPage {
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub content_markdown: String,
    pub links: Vec<String>,
    pub http_status_code: i32,
}

fn title_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("title").unwrap())
}

fn description_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse(r#"meta[name="description"]"#).unwrap())
}

fn link_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("a[href]").unwrap())
}

fn content_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("h1, h2, h3, h4, h5, h6, p, li").unwrap())
}

/// Fetches `url` and renders its body to a markdown-ish document. Returns an
/// error only on transport failure or a non-success HTTP status; an empty
/// or unparseable body yields a `FetchedPage` with empty content rather than
/// an error, matching the crawl loop's per-page failed/skip distinction.
pub async fn fetch_page(http: &Client, url: &str) -> EngineResult<FetchedPage> {
    let response = http
        .get(url)
        .timeout(Duration::from_secs(20))
        .send()
        .await
        .map_err(|e| EngineError::upstream("crawl_fetch", format!("request to {url} failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(EngineError::upstream("crawl_fetch", format!("{url} returned status {status}")));
    }
    let http_status_code = status.as_u16() as i32;

    let body = response
        .text()
        .await
        .map_err(|e| EngineError::upstream("crawl_fetch", format!("failed to read response body from {url}: {e}")))?;

    Ok(render_page(&body, http_status_code))
}

/// Pure rendering step, split out from `fetch_page` so it can be exercised
/// directly against fixed HTML in tests.
pub fn render_page(html: &str, http_status_code: i32) -> FetchedPage {
    let document = Html::parse_document(html);

    let title = document
        .select(title_selector())
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty());

    let meta_description = document
        .select(description_selector())
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let mut links: Vec<String> = document
        .select(link_selector())
        .filter_map(|el| el.value().attr("href"))
        .map(|s| s.to_string())
        .collect();
    links.sort();
    links.dedup();

    let mut blocks = Vec::new();
    for el in document.select(content_selector()) {
        let text = el.text().collect::<String>().trim().to_string();
        if text.is_empty() {
            continue;
        }
        let name = el.value().name();
        let line = match name {
            "h1" => format!("# {text}"),
            "h2" => format!("## {text}"),
            "h3" => format!("### {text}"),
            "h4" => format!("#### {text}"),
            "h5" => format!("##### {text}"),
            "h6" => format!("###### {text}"),
            "li" => format!("- {text}"),
            _ => text,
        };
        blocks.push(line);
    }
    let content_markdown = blocks.join("\n\n");

    FetchedPage { title, meta_description, content_markdown, links, http_status_code }
}

pub fn url_hash(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.as_bytes()))
}

pub fn content_hash(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_headings_paragraphs_and_list_items() {
        let html = r#"
            <html><head><title> My Page </title>
            <meta name="description" content="a test page">
            </head><body>
            <h1>Welcome</h1>
            <p>First paragraph.</p>
            <ul><li>one</li><li>two</li></ul>
            <a href="/a">A</a>
            <a href="https://other.com/b">B</a>
            </body></html>
        "#;
        let page = render_page(html, 200);
        assert_eq!(page.title.as_deref(), Some("My Page"));
        assert_eq!(page.meta_description.as_deref(), Some("a test page"));
        assert!(page.content_markdown.contains("# Welcome"));
        assert!(page.content_markdown.contains("First paragraph."));
        assert!(page.content_markdown.contains("- one"));
        assert_eq!(page.links, vec!["/a".to_string(), "https://other.com/b".to_string()]);
    }

    #[test]
    fn empty_body_yields_empty_content_not_an_error() {
        let page = render_page("<html><body></body></html>", 200);
        assert!(page.content_markdown.is_empty());
        assert!(page.links.is_empty());
    }

    #[test]
    fn hashes_are_stable_and_distinguish_inputs() {
        assert_eq!(url_hash("https://example.com/a"), url_hash("https://example.com/a"));
        assert_ne!(url_hash("https://example.com/a"), url_hash("https://example.com/b"));
        assert_ne!(content_hash("one"), content_hash("two"));
    }
}
