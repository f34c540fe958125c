//! File-based content store.
//!
//! Content lives under a configured sources directory as UTF-8 markdown.
//! URL-backed documents get human-readable paths derived from the URL;
//! everything else falls back to a hash-sharded path. Writes are atomic
//! (temp file + rename) so readers never see partial files.

use std::io::Write;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};

use crate::error::{FetchError, Result};

/// Characters allowed in URL-derived path segments.
const SAFE_CHARS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_/.";

#[derive(Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative path for a document's content.
    pub fn content_path(&self, document_id: &str, source_url: Option<&str>) -> String {
        generate_content_path(document_id, source_url)
    }

    /// Write content atomically; returns the relative path.
    pub fn save(
        &self,
        document_id: &str,
        content: &str,
        source_url: Option<&str>,
    ) -> Result<String> {
        let relative = generate_content_path(document_id, source_url);
        let full = self.root.join(&relative);

        let parent = full
            .parent()
            .ok_or_else(|| FetchError::ContentStore(format!("no parent for {relative}")))?;
        std::fs::create_dir_all(parent)
            .map_err(|e| FetchError::ContentStore(format!("mkdir {}: {e}", parent.display())))?;

        // Temp file in the target directory so the rename stays on one
        // filesystem.
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| FetchError::ContentStore(format!("tempfile: {e}")))?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| FetchError::ContentStore(format!("write: {e}")))?;
        tmp.persist(&full)
            .map_err(|e| FetchError::ContentStore(format!("rename: {e}")))?;

        Ok(relative)
    }

    /// Load content by relative path. None when the file does not exist.
    pub fn load(&self, relative_path: &str) -> Result<Option<String>> {
        let full = self.root.join(relative_path);
        if !full.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&full)
            .map(Some)
            .map_err(|e| FetchError::ContentStore(format!("read {}: {e}", full.display())))
    }

    pub fn exists(&self, relative_path: &str) -> bool {
        self.root.join(relative_path).exists()
    }
}

/// Generate a relative storage path for document content.
///
/// With a URL: `<host>/<sanitized-path>.md`. Without: hash-sharded
/// `<md5[0..2]>/<md5[2..4]>/<safe-id>.md`.
pub fn generate_content_path(document_id: &str, source_url: Option<&str>) -> String {
    if let Some(url) = source_url {
        if let Some(path) = url_to_path(url) {
            return path;
        }
    }

    let mut hasher = Md5::new();
    hasher.update(document_id.as_bytes());
    let hash = hex::encode(hasher.finalize());

    let mut safe_id: String = document_id
        .chars()
        .map(|c| if matches!(c, '/' | ':' | '?') { '_' } else { c })
        .collect();
    // Keep the last 100 chars; the tail is usually the unique part.
    if safe_id.chars().count() > 100 {
        let chars: Vec<char> = safe_id.chars().collect();
        safe_id = chars[chars.len() - 100..].iter().collect();
    }

    format!("{}/{}/{safe_id}.md", &hash[0..2], &hash[2..4])
}

/// Convert a URL to a filesystem-safe relative path. The URL is split
/// textually (not through a normalizing parser) so sanitization sees the
/// characters the author wrote.
fn url_to_path(url: &str) -> Option<String> {
    let rest = url.split("://").nth(1)?;
    // Query and fragment never participate in the path.
    let rest = rest.split(['?', '#']).next().unwrap_or(rest);

    let mut parts = rest.splitn(2, '/');
    let domain = match parts.next() {
        Some(host) if !host.is_empty() => host.to_string(),
        _ => "unknown".to_string(),
    };
    let mut path = parts.next().unwrap_or("").trim_matches('/').to_string();

    // Root URL → index.md
    if path.is_empty() {
        path = "index".to_string();
    }

    // Drop the HTML extension; .md is appended below.
    for ext in [".html", ".htm"] {
        if let Some(stripped) = path.strip_suffix(ext) {
            path = stripped.to_string();
            break;
        }
    }

    // Replace disallowed characters, collapse repeats, trim segment edges.
    let mut sanitized: String = path
        .chars()
        .map(|c| if SAFE_CHARS.contains(c) { c } else { '_' })
        .collect();
    while sanitized.contains("__") {
        sanitized = sanitized.replace("__", "_");
    }
    let sanitized = sanitized
        .split('/')
        .map(|segment| segment.trim_matches('_'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/");

    let sanitized = if sanitized.is_empty() {
        "index".to_string()
    } else {
        sanitized
    };

    Some(format!("{domain}/{sanitized}.md"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_url_path() {
        assert_eq!(
            generate_content_path("doc1", Some("https://example.com/blog/post")),
            "example.com/blog/post.md"
        );
    }

    #[test]
    fn root_url_is_index() {
        assert_eq!(
            generate_content_path("doc1", Some("https://example.com/")),
            "example.com/index.md"
        );
        assert_eq!(
            generate_content_path("doc1", Some("https://example.com")),
            "example.com/index.md"
        );
    }

    #[test]
    fn subdomain_preserved() {
        assert_eq!(
            generate_content_path("doc1", Some("https://sub.domain.com/a/b/c")),
            "sub.domain.com/a/b/c.md"
        );
    }

    #[test]
    fn query_string_dropped() {
        assert_eq!(
            generate_content_path("doc1", Some("https://example.com/page?q=1&x=2")),
            "example.com/page.md"
        );
    }

    #[test]
    fn html_extension_stripped() {
        assert_eq!(
            generate_content_path("doc1", Some("https://example.com/page.html")),
            "example.com/page.md"
        );
        assert_eq!(
            generate_content_path("doc1", Some("https://example.com/page.htm")),
            "example.com/page.md"
        );
    }

    #[test]
    fn disallowed_chars_replaced_and_collapsed() {
        assert_eq!(
            generate_content_path("doc1", Some("https://example.com/a b@@c")),
            "example.com/a_b_c.md"
        );
    }

    #[test]
    fn trailing_underscores_trimmed_per_segment() {
        assert_eq!(
            generate_content_path("doc1", Some("https://example.com/post!/next!")),
            "example.com/post/next.md"
        );
    }

    #[test]
    fn hash_sharded_fallback_shape() {
        let path = generate_content_path("my-doc-id", None);
        let parts: Vec<&str> = path.split('/').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), 2);
        assert_eq!(parts[1].len(), 2);
        assert_eq!(parts[2], "my-doc-id.md");
    }

    #[test]
    fn hash_sharded_sanitizes_and_truncates() {
        let long_id = format!("scheme://{}?q", "x".repeat(200));
        let path = generate_content_path(&long_id, None);
        let file = path.split('/').next_back().unwrap();
        // 100 chars + ".md"
        assert_eq!(file.chars().count(), 103);
        assert!(!file.contains(':'));
        assert!(!file.contains('?'));
        assert!(!file.contains("//"));
    }

    #[test]
    fn hash_sharded_is_deterministic() {
        assert_eq!(
            generate_content_path("same-id", None),
            generate_content_path("same-id", None)
        );
        assert_ne!(
            generate_content_path("id-a", None),
            generate_content_path("id-b", None)
        );
    }

    #[test]
    fn save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        let path = store
            .save("doc1", "# Hello 世界\n", Some("https://example.com/a"))
            .unwrap();
        assert_eq!(path, "example.com/a.md");
        assert_eq!(store.load(&path).unwrap().unwrap(), "# Hello 世界\n");
        assert!(store.exists(&path));
        assert!(!store.exists("example.com/missing.md"));
    }

    #[test]
    fn save_overwrites_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::new(dir.path());
        store.save("doc1", "v1", Some("https://example.com/a")).unwrap();
        let path = store.save("doc1", "v2", Some("https://example.com/a")).unwrap();
        assert_eq!(store.load(&path).unwrap().unwrap(), "v2");
    }
}
