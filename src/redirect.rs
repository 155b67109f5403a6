use crate::{FetchedPage, ResolveError};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::LazyLock;
use tracing::{debug, info};

const MAX_HOPS: usize = 5;

static URL_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"/video/(\d+)").expect("video path pattern"),
        Regex::new(r"aweme_id=(\d+)").expect("aweme query pattern"),
        Regex::new(r"/share/video/(\d+)").expect("share path pattern"),
    ]
});

static HTML_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r#""awemeId":"(\d+)""#).expect("awemeId marker"),
        Regex::new(r#""aweme_id":"?(\d+)"?"#).expect("aweme_id marker"),
        Regex::new(r#""itemId":"(\d+)""#).expect("itemId marker"),
    ]
});

static NEXT_VIDEO_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(https://www\.douyin\.com/video/[^\s"<]+)"#).expect("canonical link")
});

/// Where the redirect chain landed, plus the identifier pulled out of it.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub identifier: String,
    pub resolved_url: String,
}

/// Anything that can fetch a page and report the URL it landed on. The HTTP
/// fetcher implements this; tests substitute canned chains.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage, ResolveError>;
}

#[async_trait]
impl PageSource for crate::Fetcher {
    async fn fetch_page(&self, url: &str) -> Result<FetchedPage, ResolveError> {
        crate::Fetcher::fetch_page(self, url).await
    }
}

/// Expands short share links by walking the redirect chain until a content
/// identifier falls out of a URL or the page markup.
pub struct RedirectResolver {
    source: Arc<dyn PageSource>,
}

impl RedirectResolver {
    pub fn new(source: Arc<dyn PageSource>) -> Self {
        Self { source }
    }

    /// Follow up to [`MAX_HOPS`] pages. Each hop tries the landing URL, the
    /// current URL and the HTML body for an identifier, then falls through to
    /// an embedded canonical video link for the next hop. Revisiting a URL
    /// terminates the walk.
    pub async fn resolve(&self, input_url: &str) -> Result<ResolvedTarget, ResolveError> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut current_url = input_url.to_string();

        for hop in 0..MAX_HOPS {
            if !visited.insert(current_url.clone()) {
                debug!(url = %current_url, "Redirect chain revisited a URL");
                break;
            }

            debug!(step = hop + 1, url = %current_url, "Resolving redirect step");
            let page = self.source.fetch_page(&current_url).await?;

            let identifier = extract_id_from_url(&page.final_url)
                .or_else(|| extract_id_from_url(&current_url))
                .or_else(|| extract_id_from_html(&page.body));

            if let Some(identifier) = identifier {
                info!(identifier = %identifier, "Resolved content identifier");
                return Ok(ResolvedTarget {
                    identifier,
                    resolved_url: page.final_url,
                });
            }

            match extract_next_video_link(&page.body) {
                Some(next) => current_url = next,
                None => break,
            }
        }

        Err(ResolveError::UnresolvableLink)
    }
}

pub(crate) fn extract_id_from_url(url: &str) -> Option<String> {
    URL_ID_PATTERNS
        .iter()
        .find_map(|p| p.captures(url))
        .map(|c| c[1].to_string())
}

pub(crate) fn extract_id_from_html(html: &str) -> Option<String> {
    HTML_ID_PATTERNS
        .iter()
        .find_map(|p| p.captures(html))
        .map(|c| c[1].to_string())
}

fn extract_next_video_link(html: &str) -> Option<String> {
    NEXT_VIDEO_LINK.captures(html).map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedPages {
        pages: HashMap<String, FetchedPage>,
        fetches: AtomicUsize,
    }

    impl CannedPages {
        fn new(pages: Vec<(&str, &str, &str)>) -> Self {
            let pages = pages
                .into_iter()
                .map(|(url, final_url, body)| {
                    (
                        url.to_string(),
                        FetchedPage {
                            final_url: final_url.to_string(),
                            body: body.to_string(),
                        },
                    )
                })
                .collect();
            Self {
                pages,
                fetches: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PageSource for CannedPages {
        async fn fetch_page(&self, url: &str) -> Result<FetchedPage, ResolveError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| ResolveError::FetchError(format!("no canned page for {url}")))
        }
    }

    #[test]
    fn url_patterns_pull_digits() {
        assert_eq!(
            extract_id_from_url("https://www.douyin.com/video/7412345678901234567").as_deref(),
            Some("7412345678901234567")
        );
        assert_eq!(
            extract_id_from_url("https://host/x?aweme_id=42").as_deref(),
            Some("42")
        );
        assert_eq!(
            extract_id_from_url("https://www.iesdouyin.com/share/video/987/").as_deref(),
            Some("987")
        );
        assert_eq!(extract_id_from_url("https://v.douyin.com/AbC/"), None);
    }

    #[test]
    fn html_markers_pull_digits() {
        assert_eq!(
            extract_id_from_html(r#"{"awemeId":"123"}"#).as_deref(),
            Some("123")
        );
        assert_eq!(
            extract_id_from_html(r#"{"aweme_id":456}"#).as_deref(),
            Some("456")
        );
        assert_eq!(
            extract_id_from_html(r#"{"itemId":"789"}"#).as_deref(),
            Some("789")
        );
        assert_eq!(extract_id_from_html("<html></html>"), None);
    }

    #[tokio::test]
    async fn short_link_resolves_through_embedded_canonical_link() {
        let source = Arc::new(CannedPages::new(vec![
            (
                "https://v.douyin.com/short",
                "https://v.douyin.com/short",
                r#"<a href="https://www.douyin.com/video/111222333">go</a>"#,
            ),
            (
                "https://www.douyin.com/video/111222333",
                "https://www.douyin.com/video/111222333",
                "<html></html>",
            ),
        ]));
        let resolver = RedirectResolver::new(source);

        let target = resolver.resolve("https://v.douyin.com/short").await.unwrap();
        assert_eq!(target.identifier, "111222333");
    }

    #[tokio::test]
    async fn identifier_found_on_third_distinct_url() {
        let source = Arc::new(CannedPages::new(vec![
            (
                "https://v.douyin.com/AbC",
                "https://v.douyin.com/AbC",
                r#"go to https://www.douyin.com/video/modalSlug first"#,
            ),
            (
                "https://www.douyin.com/video/modalSlug",
                "https://www.douyin.com/video/modalSlug",
                r#"canonical: https://www.douyin.com/video/777888999"#,
            ),
            (
                "https://www.douyin.com/video/777888999",
                "https://www.douyin.com/video/777888999",
                "<html></html>",
            ),
        ]));
        let pages = source.clone();
        let resolver = RedirectResolver::new(source);

        let target = resolver.resolve("https://v.douyin.com/AbC").await.unwrap();
        assert_eq!(target.identifier, "777888999");
        assert_eq!(pages.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn revisit_of_first_url_terminates_unresolvable() {
        // a -> b -> a: the walk must stop at the revisit, not spin to the
        // hop bound.
        let source = Arc::new(CannedPages::new(vec![
            (
                "https://www.douyin.com/video/slugA",
                "https://www.douyin.com/video/slugA",
                r#"next https://www.douyin.com/video/slugB"#,
            ),
            (
                "https://www.douyin.com/video/slugB",
                "https://www.douyin.com/video/slugB",
                r#"back https://www.douyin.com/video/slugA"#,
            ),
        ]));
        let pages = source.clone();
        let resolver = RedirectResolver::new(source);

        let err = resolver
            .resolve("https://www.douyin.com/video/slugA")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::UnresolvableLink));
        assert_eq!(pages.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dead_end_page_terminates_unresolvable() {
        let source = Arc::new(CannedPages::new(vec![(
            "https://start.example/a",
            "https://start.example/a",
            "no markers here",
        )]));
        let pages = source.clone();
        let resolver = RedirectResolver::new(source);

        let err = resolver.resolve("https://start.example/a").await.unwrap_err();
        assert!(matches!(err, ResolveError::UnresolvableLink));
        assert_eq!(pages.fetches.load(Ordering::SeqCst), 1);
    }
}
