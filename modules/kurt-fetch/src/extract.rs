//! Local HTML → markdown extraction via readability.

use std::sync::LazyLock;

use regex::Regex;
use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};

use crate::error::{FetchError, Result};

static TITLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("valid regex"));
static META_DESC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta\s+[^>]*name=["']description["'][^>]*content=["']([^"']*)["']"#)
        .expect("valid regex")
});
static META_DESC_REV_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<meta\s+[^>]*content=["']([^"']*)["'][^>]*name=["']description["']"#)
        .expect("valid regex")
});
static MARKDOWN_IMAGE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[[^\]]*\]\(([^)]*)\)").expect("valid regex"));

/// Metadata pulled from the raw HTML alongside the extracted content.
#[derive(Debug, Clone, Default)]
pub struct ExtractedMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
}

impl ExtractedMetadata {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "title": self.title,
            "description": self.description,
        })
    }
}

/// Convert raw HTML into clean markdown using Readability extraction.
/// Returns an error when nothing extractable is found.
pub fn extract_html(html: &str, url: &str) -> Result<(String, ExtractedMetadata)> {
    let parsed_url = url::Url::parse(url).ok();
    let config = TransformConfig {
        readability: true,
        main_content: true,
        return_format: ReturnFormat::Markdown,
        filter_images: false,
        filter_svg: true,
        clean_html: true,
    };
    let input = TransformInput {
        url: parsed_url.as_ref(),
        content: html.as_bytes(),
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };

    let markdown = transform_content_input(input, &config);
    if markdown.trim().is_empty() {
        return Err(FetchError::EmptyContent(url.to_string()));
    }

    let markdown = dedup_consecutive_images(&markdown);
    Ok((markdown, extract_metadata(html)))
}

pub fn extract_metadata(html: &str) -> ExtractedMetadata {
    let title = TITLE_RE
        .captures(html)
        .map(|c| collapse_whitespace(&c[1]))
        .filter(|t| !t.is_empty());
    let description = META_DESC_RE
        .captures(html)
        .or_else(|| META_DESC_REV_RE.captures(html))
        .map(|c| collapse_whitespace(&c[1]))
        .filter(|d| !d.is_empty());
    ExtractedMetadata { title, description }
}

/// Collapse runs of the same markdown image appearing on consecutive lines.
/// Some publishers emit the same hero image once per srcset variant.
pub fn dedup_consecutive_images(markdown: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut last_image_src: Option<String> = None;

    for line in markdown.lines() {
        let image_src = MARKDOWN_IMAGE_RE
            .captures(line.trim())
            .map(|c| c[1].to_string());
        match (&image_src, &last_image_src) {
            (Some(src), Some(prev)) if src == prev && is_image_only_line(line) => {
                continue;
            }
            _ => {}
        }
        if is_image_only_line(line) {
            last_image_src = image_src;
        } else if !line.trim().is_empty() {
            last_image_src = None;
        }
        out.push(line);
    }

    out.join("\n")
}

fn is_image_only_line(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty()
        && MARKDOWN_IMAGE_RE
            .find(trimmed)
            .map(|m| m.start() == 0 && m.end() == trimmed.len())
            .unwrap_or(false)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_from_html() {
        let html = r#"<html><head><title> My  Page </title>
            <meta name="description" content="A useful page"></head><body></body></html>"#;
        let meta = extract_metadata(html);
        assert_eq!(meta.title.as_deref(), Some("My Page"));
        assert_eq!(meta.description.as_deref(), Some("A useful page"));
    }

    #[test]
    fn metadata_missing_is_none() {
        let meta = extract_metadata("<html><body>nothing</body></html>");
        assert!(meta.title.is_none());
        assert!(meta.description.is_none());
    }

    #[test]
    fn dedup_drops_consecutive_duplicate_images() {
        let markdown = "![hero](img.png)\n![hero](img.png)\n![hero](img.png)\nText";
        assert_eq!(dedup_consecutive_images(markdown), "![hero](img.png)\nText");
    }

    #[test]
    fn dedup_keeps_distinct_images() {
        let markdown = "![a](a.png)\n![b](b.png)";
        assert_eq!(dedup_consecutive_images(markdown), markdown);
    }

    #[test]
    fn dedup_keeps_repeat_after_text_break() {
        let markdown = "![a](a.png)\nSome text\n![a](a.png)";
        assert_eq!(dedup_consecutive_images(markdown), markdown);
    }
}
