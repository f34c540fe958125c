//! Document discovery (the map workflow): sitemaps, focused crawling,
//! local folders, and CMS listings. Every discovered document lands in the
//! documents table plus a landing_discovery row.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use kurt_store::{DocumentStore, StagingStore};

use crate::cms::CmsRegistry;
use crate::content_store::ContentStore;
use crate::error::{FetchError, Result};

static SITEMAP_LOC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<loc>\s*(.*?)\s*</loc>").expect("valid regex"));
static SITEMAP_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<sitemap>").expect("valid regex"));
static HREF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)href=["']([^"'#]+)["']"#).expect("valid regex")
});

/// Summary of a discovery run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryOutcome {
    pub discovered: usize,
    pub created: usize,
    pub existing: usize,
    pub errors: Vec<String>,
}

pub struct Discovery {
    documents: DocumentStore,
    staging: StagingStore,
    content_store: ContentStore,
    cms: CmsRegistry,
    client: reqwest::Client,
}

impl Discovery {
    pub fn new(
        documents: DocumentStore,
        staging: StagingStore,
        content_store: ContentStore,
        cms: CmsRegistry,
    ) -> Self {
        Self {
            documents,
            staging,
            content_store,
            cms,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .user_agent("kurt/0.1")
                .build()
                .expect("client builds"),
        }
    }

    /// Discover URLs for a site: sitemap first, focused crawl as fallback.
    pub async fn map_url(
        &self,
        base_url: &str,
        include: &[String],
        exclude: &[String],
        limit: Option<usize>,
        workflow_id: &str,
    ) -> Result<DiscoveryOutcome> {
        let (urls, method) = match self.discover_sitemap_urls(base_url).await {
            Ok(urls) => (urls, "sitemap"),
            Err(e) => {
                info!(base_url, error = %e, "no sitemap, falling back to crawl");
                let urls = self
                    .crawl_website(base_url, limit.unwrap_or(100))
                    .await?;
                (urls, "crawl")
            }
        };

        let mut urls = apply_patterns(urls, include, exclude);
        if let Some(limit) = limit {
            urls.truncate(limit);
        }

        self.record_urls(&urls, "url", method, workflow_id).await
    }

    /// Discover markdown files in a local folder.
    pub async fn map_folder(
        &self,
        folder: &Path,
        include: &[String],
        exclude: &[String],
        workflow_id: &str,
    ) -> Result<DiscoveryOutcome> {
        let mut outcome = DiscoveryOutcome::default();
        let mut files = vec![];
        collect_markdown_files(folder, &mut files)?;

        let relative_matches = |file: &Path, patterns: &[String]| -> bool {
            let relative = file
                .strip_prefix(folder)
                .unwrap_or(file)
                .to_string_lossy()
                .to_string();
            patterns.iter().any(|p| glob_match(p, &relative))
        };

        for file in files {
            if !include.is_empty() && !relative_matches(&file, include) {
                continue;
            }
            if relative_matches(&file, exclude) {
                continue;
            }

            match self.add_folder_file(&file, workflow_id).await {
                Ok(created) => {
                    outcome.discovered += 1;
                    if created {
                        outcome.created += 1;
                    } else {
                        outcome.existing += 1;
                    }
                }
                Err(e) => {
                    warn!(file = %file.display(), error = %e, "folder discovery failed");
                    outcome.errors.push(format!("{}: {e}", file.display()));
                }
            }
        }
        Ok(outcome)
    }

    /// Discover documents from a CMS instance.
    pub async fn map_cms(
        &self,
        platform: &str,
        instance: &str,
        limit: Option<usize>,
        workflow_id: &str,
    ) -> Result<DiscoveryOutcome> {
        let client = self.cms.get(platform, instance)?;
        let mut listed = client.list_documents().await?;
        if let Some(limit) = limit {
            listed.truncate(limit);
        }

        let mut outcome = DiscoveryOutcome::default();
        for doc in listed {
            let source_url = format!("cms://{platform}/{instance}/{}", doc.cms_id);
            let (row, created) = self
                .documents
                .create_or_get(&source_url, "cms", doc.title.as_deref())
                .await?;
            self.staging
                .record_discovery(workflow_id, &row.id, "cms")
                .await?;
            outcome.discovered += 1;
            if created {
                outcome.created += 1;
            } else {
                outcome.existing += 1;
            }
        }
        Ok(outcome)
    }

    async fn record_urls(
        &self,
        urls: &[String],
        source_type: &str,
        method: &str,
        workflow_id: &str,
    ) -> Result<DiscoveryOutcome> {
        let mut outcome = DiscoveryOutcome::default();
        for url in urls {
            let (row, created) = self
                .documents
                .create_or_get(url, source_type, None)
                .await?;
            self.staging
                .record_discovery(workflow_id, &row.id, method)
                .await?;
            outcome.discovered += 1;
            if created {
                outcome.created += 1;
            } else {
                outcome.existing += 1;
            }
        }
        info!(
            discovered = outcome.discovered,
            created = outcome.created,
            method,
            "discovery recorded"
        );
        Ok(outcome)
    }

    /// Find URLs via sitemap.xml: robots.txt `Sitemap:` lines first, then
    /// the conventional locations. Sitemap indexes recurse one level.
    pub async fn discover_sitemap_urls(&self, base_url: &str) -> Result<Vec<String>> {
        let base = origin_of(base_url);

        let mut sitemap_urls: Vec<String> = vec![];
        if let Ok(response) = self.client.get(format!("{base}/robots.txt")).send().await {
            if response.status().is_success() {
                if let Ok(text) = response.text().await {
                    for line in text.lines() {
                        let trimmed = line.trim();
                        if trimmed.to_lowercase().starts_with("sitemap:") {
                            let url = trimmed["sitemap:".len()..].trim();
                            if !url.is_empty() {
                                sitemap_urls.push(url.to_string());
                            }
                        }
                    }
                }
            }
        }
        for path in ["/sitemap.xml", "/sitemap_index.xml", "/sitemap-index.xml"] {
            let candidate = format!("{base}{path}");
            if !sitemap_urls.contains(&candidate) {
                sitemap_urls.push(candidate);
            }
        }

        for sitemap_url in &sitemap_urls {
            match self.fetch_sitemap(sitemap_url).await {
                Ok(urls) if !urls.is_empty() => return Ok(urls),
                Ok(_) => continue,
                Err(e) => {
                    debug!(sitemap_url, error = %e, "sitemap fetch failed");
                    continue;
                }
            }
        }

        Err(FetchError::Discovery(format!("No sitemap found for {base_url}")))
    }

    async fn fetch_sitemap(&self, sitemap_url: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .get(sitemap_url)
            .send()
            .await
            .map_err(|e| FetchError::Download(e.to_string()))?;
        if !response.status().is_success() {
            return Err(FetchError::Download(format!(
                "HTTP {} from {sitemap_url}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Download(e.to_string()))?;

        let locs: Vec<String> = SITEMAP_LOC_RE
            .captures_iter(&body)
            .map(|c| c[1].trim().to_string())
            .collect();

        // Sitemap index: every <loc> is itself a sitemap.
        if SITEMAP_TAG_RE.is_match(&body) {
            let mut urls = vec![];
            for child in locs {
                if let Ok(response) = self.client.get(&child).send().await {
                    if response.status().is_success() {
                        if let Ok(child_body) = response.text().await {
                            urls.extend(
                                SITEMAP_LOC_RE
                                    .captures_iter(&child_body)
                                    .map(|c| c[1].trim().to_string()),
                            );
                        }
                    }
                }
            }
            return Ok(urls);
        }

        Ok(locs)
    }

    /// Same-domain breadth-first crawl used when no sitemap exists.
    pub async fn crawl_website(&self, homepage: &str, max_pages: usize) -> Result<Vec<String>> {
        let domain = domain_of(homepage);
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: Vec<String> = vec![homepage.to_string()];
        let mut discovered: Vec<String> = vec![];

        while let Some(url) = queue.pop() {
            if discovered.len() >= max_pages {
                break;
            }
            if !seen.insert(url.clone()) {
                continue;
            }

            let Ok(response) = self.client.get(&url).send().await else { continue };
            if !response.status().is_success() {
                continue;
            }
            let Ok(body) = response.text().await else { continue };
            discovered.push(url.clone());

            for capture in HREF_RE.captures_iter(&body) {
                let href = capture[1].trim();
                let absolute = resolve_href(&url, href);
                let Some(absolute) = absolute else { continue };
                if domain_of(&absolute) == domain && !seen.contains(&absolute) {
                    queue.push(absolute);
                }
            }
        }

        info!(pages = discovered.len(), "crawl discovered");
        Ok(discovered)
    }

    async fn add_folder_file(&self, file: &Path, workflow_id: &str) -> Result<bool> {
        let content = std::fs::read_to_string(file)
            .map_err(|e| FetchError::Download(format!("read {}: {e}", file.display())))?;
        let hash = kurt_common::text::content_hash(&content);

        // Same content already ingested (possibly under another path).
        if let Some(existing) = self.documents.find_by_content_hash(&hash).await? {
            self.staging
                .record_discovery(workflow_id, &existing.id, "folder")
                .await?;
            return Ok(false);
        }

        let title = extract_markdown_title(&content, file);
        let source_url = format!("file://{}", file.canonicalize().unwrap_or_else(|_| file.to_path_buf()).display());
        let (row, created) = self
            .documents
            .create_or_get(&source_url, "file", Some(&title))
            .await?;

        // Content is already local: copy it into the store and mark the
        // document fetched right away.
        let content_path = self.content_store.save(&row.id, &content, None)?;
        self.documents
            .update_fetch_result(&row.id, &content_path, &hash)
            .await?;
        self.staging
            .record_discovery(workflow_id, &row.id, "folder")
            .await?;

        Ok(created)
    }
}

fn origin_of(url: &str) -> String {
    let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
    match url[scheme_end..].find('/') {
        Some(path_start) => url[..scheme_end + path_start].to_string(),
        None => url.to_string(),
    }
}

fn domain_of(url: &str) -> String {
    url.split("://")
        .nth(1)
        .unwrap_or(url)
        .split('/')
        .next()
        .unwrap_or("")
        .to_lowercase()
}

fn resolve_href(page_url: &str, href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    if href.starts_with("mailto:") || href.starts_with("javascript:") || href.starts_with("tel:") {
        return None;
    }
    if let Some(path) = href.strip_prefix('/') {
        return Some(format!("{}/{path}", origin_of(page_url)));
    }
    // Relative href: resolve against the page's directory.
    let base = page_url.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(page_url);
    Some(format!("{base}/{href}"))
}

fn collect_markdown_files(dir: &Path, out: &mut Vec<std::path::PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| FetchError::Discovery(format!("read dir {}: {e}", dir.display())))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_markdown_files(&path, out)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("md") {
            out.push(path);
        }
    }
    out.sort();
    Ok(())
}

fn extract_markdown_title(content: &str, file: &Path) -> String {
    for line in content.lines() {
        if let Some(heading) = line.strip_prefix("# ") {
            return heading.trim().to_string();
        }
    }
    file.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Untitled")
        .replace(['-', '_'], " ")
}

fn apply_patterns(urls: Vec<String>, include: &[String], exclude: &[String]) -> Vec<String> {
    urls.into_iter()
        .filter(|url| include.is_empty() || include.iter().any(|p| glob_match(p, url)))
        .filter(|url| !exclude.iter().any(|p| glob_match(p, url)))
        .collect()
}

/// Minimal glob: `*` matches any run of characters.
pub fn glob_match(pattern: &str, value: &str) -> bool {
    let mut regex = String::from("^");
    for c in pattern.chars() {
        match c {
            '*' => regex.push_str(".*"),
            c if "\\.+?^$()[]{}|".contains(c) => {
                regex.push('\\');
                regex.push(c);
            }
            c => regex.push(c),
        }
    }
    regex.push('$');
    Regex::new(&regex).map(|re| re.is_match(value)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_matches() {
        assert!(glob_match("*/blog/*", "https://example.com/blog/post"));
        assert!(!glob_match("*/docs/*", "https://example.com/blog/post"));
        assert!(glob_match("*.md", "notes/readme.md"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exact-not"));
    }

    #[test]
    fn origin_and_domain_extraction() {
        assert_eq!(origin_of("https://example.com/a/b"), "https://example.com");
        assert_eq!(origin_of("https://example.com"), "https://example.com");
        assert_eq!(domain_of("https://Sub.Example.com/x"), "sub.example.com");
    }

    #[test]
    fn href_resolution() {
        assert_eq!(
            resolve_href("https://example.com/blog/post", "/about").as_deref(),
            Some("https://example.com/about")
        );
        assert_eq!(
            resolve_href("https://example.com/blog/post", "next").as_deref(),
            Some("https://example.com/blog/next")
        );
        assert_eq!(
            resolve_href("https://example.com/", "https://other.com/x").as_deref(),
            Some("https://other.com/x")
        );
        assert!(resolve_href("https://example.com/", "mailto:x@y.com").is_none());
    }

    #[test]
    fn pattern_filters_apply_in_order() {
        let urls = vec![
            "https://example.com/blog/a".to_string(),
            "https://example.com/blog/drafts/b".to_string(),
            "https://example.com/docs/c".to_string(),
        ];
        let filtered = apply_patterns(
            urls,
            &["*/blog/*".to_string()],
            &["*drafts*".to_string()],
        );
        assert_eq!(filtered, vec!["https://example.com/blog/a".to_string()]);
    }

    #[test]
    fn markdown_title_extraction() {
        assert_eq!(
            extract_markdown_title("# My Title\nbody", Path::new("x.md")),
            "My Title"
        );
        assert_eq!(
            extract_markdown_title("no heading", Path::new("some-file_name.md")),
            "some file name"
        );
    }
}
