use crate::cascade::{ExtractContext, ExtractionStrategy, StrategyMiss};
use crate::redirect::PageSource;
use crate::upstream::ScrapedVideo;
use crate::{Fetcher, RawUpstreamPayload, ResolverConfig};
use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use std::sync::Arc;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        // Reel formats first
        Regex::new(r"facebook\.com/reel/([a-zA-Z0-9_-]+)").expect("reel"),
        Regex::new(r"facebook\.com/[^/]+/reels/([a-zA-Z0-9_-]+)").expect("user reels"),
        // Watch formats
        Regex::new(r"(?:facebook\.com/watch/\?v=|facebook\.com/.*/videos/)([0-9]+)").expect("watch"),
        Regex::new(r"facebook\.com/.*[?&]v=([0-9]+)").expect("v param"),
        // Short domain
        Regex::new(r"fb\.watch/([a-zA-Z0-9_-]+)").expect("fb.watch"),
        // Mobile variants
        Regex::new(r"m\.facebook\.com/reel/([a-zA-Z0-9_-]+)").expect("mobile reel"),
        Regex::new(r"m\.facebook\.com/watch/\?v=([0-9]+)").expect("mobile watch"),
    ]
});

static PLAYABLE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r#""video_src":"([^"]+)""#).expect("video_src"),
        Regex::new(r#""hd_src":"([^"]+)""#).expect("hd_src"),
        Regex::new(r#""sd_src":"([^"]+)""#).expect("sd_src"),
        Regex::new(r#"video_src_no_ratelimit":"([^"]+)""#).expect("no ratelimit"),
        Regex::new(r#""playable_url":"([^"]+)""#).expect("playable_url"),
        Regex::new(r#""playable_url_quality_hd":"([^"]+)""#).expect("playable hd"),
        Regex::new(r#""browser_native_hd_url":"([^"]+)""#).expect("native hd"),
        Regex::new(r#""browser_native_sd_url":"([^"]+)""#).expect("native sd"),
        Regex::new(r#""video":\s*\{[^}]*"url":\s*"([^"]+)""#).expect("video url"),
        Regex::new(r#""source":\s*"([^"]+\.mp4[^"]*)""#).expect("source mp4"),
        Regex::new(r#""videoUrl":\s*"([^"]+)""#).expect("videoUrl"),
        Regex::new(r#""contentUrl":\s*"([^"]+\.mp4[^"]*)""#).expect("contentUrl"),
        Regex::new(r#"<meta\s+property="og:video:url"\s+content="([^"]+)""#).expect("og video url"),
        Regex::new(r#"<meta\s+property="og:video"\s+content="([^"]+)""#).expect("og video"),
        Regex::new(r#""@type":\s*"VideoObject"[^}]*"contentUrl":\s*"([^"]+)""#).expect("json-ld"),
    ]
});

static TITLE_FALLBACKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"<title>([^<]+)</title>").expect("title tag"),
        Regex::new(r#""name":"([^"]+)""#).expect("name field"),
    ]
});
static AUTHOR_FALLBACKS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r#""author":"([^"]+)""#).expect("author field"),
        Regex::new(r#""ownerName":"([^"]+)""#).expect("owner field"),
    ]
});
static THUMBNAIL_FALLBACK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""thumbnail":"([^"]+)""#).expect("thumbnail field"));

pub fn is_share_link(url: &str) -> bool {
    url.contains("/share/r/") || url.contains("/share/v/")
}

/// Identifier from the URL shape, or a pseudo-identifier derived from the
/// trailing path segment when the URL is still recognizably Facebook.
///
/// The pseudo-id can collide across distinct videos sharing a trailing token;
/// cache identity stays keyed by normalized URL as well, so colliding ids do
/// not merge cache rows.
pub fn facebook_identifier(url: &str) -> Option<String> {
    for pattern in ID_PATTERNS.iter() {
        if let Some(captures) = pattern.captures(url) {
            return Some(captures[1].to_string());
        }
    }

    if is_share_link(url) || url.contains("facebook.com") || url.contains("fb.watch") {
        let derived: String = url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        if derived.is_empty() {
            return Some("unknown".to_string());
        }
        return Some(derived);
    }

    None
}

/// Follow a share link through its redirects. When the landing URL still has
/// no extractable id, probe the HTML for a playable-URL marker to confirm a
/// video page before adopting it. Failure keeps the original URL.
pub async fn resolve_share_link(
    source: &dyn PageSource,
    share_url: &str,
    tag: &str,
) -> Option<String> {
    match source.fetch_page(share_url).await {
        Ok(page) => {
            debug!(tag, final_url = %page.final_url, "Share link resolved");
            if facebook_identifier(&page.final_url)
                .filter(|id| id != "unknown")
                .is_none()
            {
                let confirmed = PLAYABLE_PATTERNS
                    .iter()
                    .take(5)
                    .any(|p| p.is_match(&page.body));
                if confirmed {
                    info!(tag, "Share landing confirmed as a video page");
                }
            }
            Some(page.final_url)
        }
        Err(e) => {
            warn!(tag, error = %e, "Share link resolution failed, keeping original URL");
            None
        }
    }
}

/// Unescape the JSON/HTML escaping Facebook applies to embedded URLs.
pub(crate) fn decode_escapes(url: &str) -> String {
    let decoded = url
        .replace("\\u002F", "/")
        .replace("\\u003D", "=")
        .replace("\\u0026", "&")
        .replace("\\/", "/")
        .replace("\\\"", "\"")
        .replace("&amp;", "&");
    decoded.strip_prefix('\\').unwrap_or(&decoded).to_string()
}

fn find_playable_url(html: &str) -> Option<String> {
    PLAYABLE_PATTERNS
        .iter()
        .find_map(|p| p.captures(html))
        .map(|c| decode_escapes(&c[1]))
}

fn og_content(document: &Html, property: &str) -> Option<String> {
    let selector = Selector::parse(&format!("meta[property='{property}']")).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
}

/// Best-effort secondary pass: title, author and thumbnail from Open Graph
/// tags, regex fallbacks where the tags are absent.
fn scrape_metadata(html: &str) -> (Option<String>, Option<String>, Option<String>) {
    let document = Html::parse_document(html);

    let title = og_content(&document, "og:title").or_else(|| {
        TITLE_FALLBACKS
            .iter()
            .find_map(|p| p.captures(html))
            .map(|c| c[1].trim().to_string())
    });
    let author = AUTHOR_FALLBACKS
        .iter()
        .find_map(|p| p.captures(html))
        .map(|c| c[1].to_string())
        .or_else(|| og_content(&document, "og:site_name"));
    let thumbnail = THUMBNAIL_FALLBACK
        .captures(html)
        .map(|c| decode_escapes(&c[1]))
        .or_else(|| og_content(&document, "og:image"));

    (title, author, thumbnail)
}

/// Configurable third-party resolver tier. An empty service list means the
/// tier is skipped outright.
pub struct ThirdPartyServicesStrategy {
    config: Arc<ResolverConfig>,
    fetcher: Arc<Fetcher>,
}

impl ThirdPartyServicesStrategy {
    pub fn new(config: Arc<ResolverConfig>, fetcher: Arc<Fetcher>) -> Self {
        Self { config, fetcher }
    }

    fn video_from_service_json(value: &serde_json::Value) -> Option<ScrapedVideo> {
        let direct = value
            .get("url")
            .or_else(|| value.get("download_url"))
            .or_else(|| value.get("video_url"))
            .and_then(|v| v.as_str());
        if let Some(url) = direct {
            return Some(ScrapedVideo {
                media_url: url.to_string(),
                title: value.get("title").and_then(|v| v.as_str()).map(Into::into),
                author: value.get("author").and_then(|v| v.as_str()).map(Into::into),
                thumbnail: value
                    .get("thumbnail")
                    .and_then(|v| v.as_str())
                    .map(Into::into),
                duration_seconds: value.get("duration").and_then(|v| v.as_u64()),
            });
        }

        // savefrom-style wrapper: { status: "success", data: [...] | {...} }
        if value.get("status").and_then(|v| v.as_str()) == Some("success") {
            let info = match value.get("data") {
                Some(serde_json::Value::Array(items)) => items.first(),
                Some(other) => Some(other),
                None => None,
            }?;
            let url = info.get("url").and_then(|v| v.as_str())?;
            return Some(ScrapedVideo {
                media_url: url.to_string(),
                title: info.get("title").and_then(|v| v.as_str()).map(Into::into),
                author: info.get("author").and_then(|v| v.as_str()).map(Into::into),
                thumbnail: info
                    .get("thumbnail")
                    .and_then(|v| v.as_str())
                    .map(Into::into),
                duration_seconds: info.get("duration").and_then(|v| v.as_u64()),
            });
        }

        None
    }
}

#[async_trait]
impl ExtractionStrategy for ThirdPartyServicesStrategy {
    fn name(&self) -> &'static str {
        "facebook-resolver-services"
    }

    async fn attempt(&self, ctx: &ExtractContext) -> Result<RawUpstreamPayload, StrategyMiss> {
        if self.config.facebook_services.is_empty() {
            return Err(StrategyMiss::Skipped);
        }

        let encoded = percent_encoding::utf8_percent_encode(
            &ctx.resolved_url,
            percent_encoding::NON_ALPHANUMERIC,
        )
        .to_string();

        let mut last_miss = StrategyMiss::Skipped;
        for (index, template) in self.config.facebook_services.iter().enumerate() {
            let service_url = template.replace("{url}", &encoded);
            debug!(tag = %ctx.tag, service = index + 1, "Trying resolver service");

            let miss = match self.fetcher.get_text(&service_url).await {
                Ok((status, _)) if !(200..300).contains(&status) => StrategyMiss::Http(status),
                Ok((_, body)) => match serde_json::from_str::<serde_json::Value>(&body) {
                    Ok(value) => match Self::video_from_service_json(&value) {
                        Some(video) => return Ok(RawUpstreamPayload::Scraped(video)),
                        None => StrategyMiss::MissingField("url"),
                    },
                    Err(_) => StrategyMiss::InvalidJson,
                },
                Err(e) => StrategyMiss::Unavailable(e.to_string()),
            };

            warn!(tag = %ctx.tag, service = index + 1, miss = %miss, "Resolver service missed");
            last_miss = miss;
        }

        Err(last_miss)
    }
}

/// Direct page scrape: the ordered playable-URL pattern list against the raw
/// HTML, then the metadata pass.
pub struct PageScrapeStrategy {
    fetcher: Arc<Fetcher>,
}

impl PageScrapeStrategy {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ExtractionStrategy for PageScrapeStrategy {
    fn name(&self) -> &'static str {
        "facebook-page-scrape"
    }

    async fn attempt(&self, ctx: &ExtractContext) -> Result<RawUpstreamPayload, StrategyMiss> {
        debug!(tag = %ctx.tag, url = %ctx.resolved_url, "Scraping page directly");

        let (status, html) = self
            .fetcher
            .get_text(&ctx.resolved_url)
            .await
            .map_err(|e| StrategyMiss::Unavailable(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(StrategyMiss::Http(status));
        }

        match find_playable_url(&html) {
            Some(media_url) => {
                let (title, author, thumbnail) = scrape_metadata(&html);
                info!(tag = %ctx.tag, "Direct scrape found a playable URL");
                Ok(RawUpstreamPayload::Scraped(ScrapedVideo {
                    media_url,
                    title,
                    author,
                    thumbnail,
                    duration_seconds: None,
                }))
            }
            None => Err(StrategyMiss::Unavailable(
                "no playable URL in page; likely private or login-required".to_string(),
            )),
        }
    }
}

/// Ordered Facebook cascade: configured resolver services, then the direct
/// page scrape.
pub fn facebook_strategies(
    config: Arc<ResolverConfig>,
    desktop_fetcher: Arc<Fetcher>,
) -> Vec<Box<dyn ExtractionStrategy>> {
    vec![
        Box::new(ThirdPartyServicesStrategy::new(
            config,
            desktop_fetcher.clone(),
        )),
        Box::new(PageScrapeStrategy::new(desktop_fetcher)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reel_and_watch_shapes_yield_ids() {
        assert_eq!(
            facebook_identifier("https://www.facebook.com/reel/123abc_x").as_deref(),
            Some("123abc_x")
        );
        assert_eq!(
            facebook_identifier("https://www.facebook.com/someone/reels/987").as_deref(),
            Some("987")
        );
        assert_eq!(
            facebook_identifier("https://www.facebook.com/watch/?v=555000").as_deref(),
            Some("555000")
        );
        assert_eq!(
            facebook_identifier("https://www.facebook.com/page/videos/42424242").as_deref(),
            Some("42424242")
        );
        assert_eq!(
            facebook_identifier("https://fb.watch/aBc-123/").as_deref(),
            Some("aBc-123")
        );
        assert_eq!(
            facebook_identifier("https://m.facebook.com/watch/?v=777").as_deref(),
            Some("777")
        );
    }

    #[test]
    fn share_link_degrades_to_trailing_segment() {
        assert_eq!(
            facebook_identifier("https://www.facebook.com/share/r/AbC9-xY/").as_deref(),
            Some("AbC9xY")
        );
    }

    #[test]
    fn foreign_domains_yield_nothing() {
        assert_eq!(facebook_identifier("https://example.com/video/1"), None);
    }

    #[test]
    fn playable_patterns_are_ordered() {
        let html = r#"{"sd_src":"https:\/\/cdn.example\/sd.mp4","hd_src":"https:\/\/cdn.example\/hd.mp4"}"#;
        // hd_src appears later in the text but earlier patterns win by list
        // order, not text order: video_src misses, hd_src is checked next.
        assert_eq!(
            find_playable_url(html).as_deref(),
            Some("https://cdn.example/hd.mp4")
        );
    }

    #[test]
    fn escape_decoding_handles_facebook_sequences() {
        assert_eq!(
            decode_escapes(r"https://cdn.example/v.mp4?a=1&b=2"),
            "https://cdn.example/v.mp4?a=1&b=2"
        );
        assert_eq!(decode_escapes(r"https:\/\/cdn.example\/x.mp4"), "https://cdn.example/x.mp4");
        assert_eq!(decode_escapes("a&amp;b"), "a&b");
    }

    #[test]
    fn og_meta_feeds_metadata_pass() {
        let html = r#"<html><head>
            <meta property="og:title" content="Một video hay" />
            <meta property="og:image" content="https://cdn.example/thumb.jpg" />
            <meta property="og:site_name" content="Trang Video" />
            </head><body></body></html>"#;
        let (title, author, thumbnail) = scrape_metadata(html);
        assert_eq!(title.as_deref(), Some("Một video hay"));
        assert_eq!(author.as_deref(), Some("Trang Video"));
        assert_eq!(thumbnail.as_deref(), Some("https://cdn.example/thumb.jpg"));
    }
}
