use crate::cascade::{ExtractContext, ExtractionStrategy, StrategyMiss};
use crate::upstream::{AwemeDetail, PlayAddr, AwemeAuthor, AwemeVideo, TikwmEnvelope};
use crate::{Fetcher, RawUpstreamPayload, ResolverConfig};
use async_trait::async_trait;
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::LazyLock;
use tracing::{debug, warn};

#[derive(Debug, Default, Deserialize)]
struct DetailEnvelope {
    #[serde(default)]
    aweme_detail: Option<AwemeDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct LegacyEnvelope {
    #[serde(default)]
    item_list: Option<Vec<AwemeDetail>>,
}

static INIT_PROPS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)window\.__INIT_PROPS__\s*=\s*(\{.+?\});\s*</script>").expect("init props")
});
static SIGI_STATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)window\.SIGI_STATE\s*=\s*(\{.+?\});\s*</script>").expect("sigi state")
});
static RENDER_DATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<script[^>]*id=["']RENDER_DATA["'][^>]*>(.+?)</script>"#)
        .expect("render data")
});
static URI_COMPONENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"decodeURIComponent\("([^"]+)"\)"#).expect("uri component"));

static RAW_PLAY_ADDR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)"play_addr"\s*:\s*\{[^}]*"url_list"\s*:\s*\["([^"]+)""#).expect("play addr")
});
static RAW_DESC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)"desc"\s*:\s*"([^"]+)""#).expect("desc"));
static RAW_NICKNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)"nickname"\s*:\s*"([^"]+)""#).expect("nickname"));

/// Official pipeline: the two detail API hosts, then a direct HTML scrape of
/// the canonical video page, then the legacy iteminfo endpoint.
pub struct DetailApiStrategy {
    config: Arc<ResolverConfig>,
    fetcher: Arc<Fetcher>,
}

impl DetailApiStrategy {
    pub fn new(config: Arc<ResolverConfig>, fetcher: Arc<Fetcher>) -> Self {
        Self { config, fetcher }
    }

    async fn try_detail_endpoints(
        &self,
        ctx: &ExtractContext,
        cookie_header: &str,
    ) -> Result<AwemeDetail, StrategyMiss> {
        let mut last_miss = StrategyMiss::Unavailable("no detail endpoint configured".to_string());

        for endpoint in &self.config.douyin_detail_endpoints {
            let url = format!("{endpoint}{}", ctx.identifier);
            debug!(tag = %ctx.tag, endpoint = %endpoint, "Calling detail endpoint");

            let miss = match self.fetcher.get_text_with_cookies(&url, cookie_header).await {
                Ok((status, _)) if !(200..300).contains(&status) => StrategyMiss::Http(status),
                Ok((_, body)) if body.trim().is_empty() => StrategyMiss::EmptyBody,
                Ok((_, body)) => match serde_json::from_str::<DetailEnvelope>(&body) {
                    Ok(envelope) => match envelope.aweme_detail {
                        Some(detail) => return Ok(detail),
                        None => StrategyMiss::MissingField("aweme_detail"),
                    },
                    Err(_) => StrategyMiss::InvalidJson,
                },
                Err(e) => StrategyMiss::Unavailable(e.to_string()),
            };

            warn!(tag = %ctx.tag, endpoint = %endpoint, miss = %miss, "Detail endpoint missed");
            last_miss = miss;
        }

        Err(last_miss)
    }

    async fn try_html_scrape(&self, ctx: &ExtractContext, cookie_header: &str) -> Option<AwemeDetail> {
        let url = format!("{}{}", self.config.douyin_video_page, ctx.identifier);
        debug!(tag = %ctx.tag, "Fetching video page HTML");

        let (status, html) = match self.fetcher.get_text_with_cookies(&url, cookie_header).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(tag = %ctx.tag, error = %e, "Video page fetch failed");
                return None;
            }
        };
        if !(200..300).contains(&status) {
            warn!(tag = %ctx.tag, status, "Video page returned non-success status");
            return None;
        }

        extract_detail_from_html(&html, &ctx.identifier)
    }

    async fn try_legacy_endpoint(
        &self,
        ctx: &ExtractContext,
        cookie_header: &str,
    ) -> Option<AwemeDetail> {
        let url = format!("{}{}", self.config.douyin_legacy_endpoint, ctx.identifier);
        debug!(tag = %ctx.tag, "Calling legacy iteminfo endpoint");

        let (status, body) = match self.fetcher.get_text_with_cookies(&url, cookie_header).await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(tag = %ctx.tag, error = %e, "Legacy endpoint fetch failed");
                return None;
            }
        };
        if !(200..300).contains(&status) || body.trim().is_empty() {
            return None;
        }

        let envelope: LegacyEnvelope = match serde_json::from_str(&body) {
            Ok(envelope) => envelope,
            Err(_) => {
                warn!(tag = %ctx.tag, "Legacy endpoint returned invalid JSON");
                return None;
            }
        };
        envelope.item_list.and_then(|mut items| {
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        })
    }
}

#[async_trait]
impl ExtractionStrategy for DetailApiStrategy {
    fn name(&self) -> &'static str {
        "douyin-official-api"
    }

    async fn attempt(&self, ctx: &ExtractContext) -> Result<RawUpstreamPayload, StrategyMiss> {
        let cookie_header = ctx.cookie_header.clone().unwrap_or_default();

        let endpoint_miss = match self.try_detail_endpoints(ctx, &cookie_header).await {
            Ok(detail) => return Ok(RawUpstreamPayload::Aweme(detail)),
            Err(miss) => miss,
        };

        if let Some(detail) = self.try_html_scrape(ctx, &cookie_header).await {
            return Ok(RawUpstreamPayload::Aweme(detail));
        }

        if let Some(detail) = self.try_legacy_endpoint(ctx, &cookie_header).await {
            return Ok(RawUpstreamPayload::Aweme(detail));
        }

        Err(endpoint_miss)
    }
}

/// tikwm mirror: Douyin's last tier and TikTok's only one. The mirror accepts
/// raw share links, short forms included.
pub struct TikwmStrategy {
    config: Arc<ResolverConfig>,
    fetcher: Arc<Fetcher>,
}

impl TikwmStrategy {
    pub fn new(config: Arc<ResolverConfig>, fetcher: Arc<Fetcher>) -> Self {
        Self { config, fetcher }
    }
}

#[async_trait]
impl ExtractionStrategy for TikwmStrategy {
    fn name(&self) -> &'static str {
        "tikwm-mirror"
    }

    async fn attempt(&self, ctx: &ExtractContext) -> Result<RawUpstreamPayload, StrategyMiss> {
        debug!(tag = %ctx.tag, url = %ctx.original_url, "Calling tikwm mirror");

        let form = [("url", ctx.original_url.as_str()), ("hd", "1")];
        let (status, body) = self
            .fetcher
            .post_form(&self.config.tikwm_endpoint, &form)
            .await
            .map_err(|e| StrategyMiss::Unavailable(e.to_string()))?;

        if !(200..300).contains(&status) {
            return Err(StrategyMiss::Http(status));
        }
        if body.trim().is_empty() {
            return Err(StrategyMiss::EmptyBody);
        }

        let envelope: TikwmEnvelope =
            serde_json::from_str(&body).map_err(|_| StrategyMiss::InvalidJson)?;

        if envelope.code != Some(0) {
            let detail = envelope
                .msg
                .unwrap_or_else(|| "mirror rejected the link".to_string());
            return Err(StrategyMiss::Unavailable(detail));
        }

        match envelope.data {
            Some(data) => Ok(RawUpstreamPayload::Tikwm(data)),
            None => Err(StrategyMiss::MissingField("data")),
        }
    }
}

/// Headless browser tier, between the official path and the mirror.
#[cfg(feature = "browser")]
pub struct BrowserProbeStrategy {
    config: Arc<ResolverConfig>,
}

#[cfg(feature = "browser")]
impl BrowserProbeStrategy {
    pub fn new(config: Arc<ResolverConfig>) -> Self {
        Self { config }
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl ExtractionStrategy for BrowserProbeStrategy {
    fn name(&self) -> &'static str {
        "douyin-browser-probe"
    }

    async fn attempt(&self, ctx: &ExtractContext) -> Result<RawUpstreamPayload, StrategyMiss> {
        let probe = crate::browser::BrowserProbe::new(self.config.clone());
        match probe.probe(&ctx.resolved_url, &ctx.tag).await {
            Ok(Some(detail)) => Ok(RawUpstreamPayload::Aweme(detail)),
            Ok(None) => Err(StrategyMiss::Unavailable(
                "browser probe intercepted nothing".to_string(),
            )),
            Err(e) => Err(StrategyMiss::Unavailable(e.to_string())),
        }
    }
}

/// Ordered Douyin cascade: official path, browser probe, mirror.
pub fn douyin_strategies(
    config: Arc<ResolverConfig>,
    douyin_fetcher: Arc<Fetcher>,
    mirror_fetcher: Arc<Fetcher>,
) -> Vec<Box<dyn ExtractionStrategy>> {
    let mut strategies: Vec<Box<dyn ExtractionStrategy>> = vec![Box::new(DetailApiStrategy::new(
        config.clone(),
        douyin_fetcher,
    ))];
    #[cfg(feature = "browser")]
    strategies.push(Box::new(BrowserProbeStrategy::new(config.clone())));
    strategies.push(Box::new(TikwmStrategy::new(config, mirror_fetcher)));
    strategies
}

/// Pull an aweme detail out of raw page HTML, trying the embedded state
/// markers in their historical order and a raw regex pull as the last resort.
pub(crate) fn extract_detail_from_html(html: &str, identifier: &str) -> Option<AwemeDetail> {
    if let Some(detail) = extract_from_init_props(html) {
        return Some(detail);
    }
    if let Some(detail) = extract_from_sigi_state(html) {
        return Some(detail);
    }
    if let Some(detail) = extract_from_render_data(html) {
        return Some(detail);
    }
    extract_raw_from_markup(html, identifier)
}

fn extract_from_init_props(html: &str) -> Option<AwemeDetail> {
    let raw = INIT_PROPS.captures(html)?.get(1)?.as_str();
    let parsed: Value = serde_json::from_str(raw).ok()?;

    let candidates = [
        parsed.pointer("/detail/awemeDetail"),
        parsed.pointer("/aweme/detail/awemeDetail"),
        parsed.pointer("/~1video~1:id/awemeDetail"),
    ];
    let result = candidates
        .into_iter()
        .flatten()
        .find_map(detail_from_value);
    result
}

fn extract_from_sigi_state(html: &str) -> Option<AwemeDetail> {
    let raw = SIGI_STATE.captures(html)?.get(1)?.as_str();
    let parsed: Value = serde_json::from_str(raw).ok()?;
    let aweme = parsed.get("Aweme")?;

    if let Some(item) = aweme.pointer("/detail/itemList/0") {
        if let Some(detail) = detail_from_value(item) {
            return Some(detail);
        }
    }
    if let Some(detail) = aweme.get("detail").filter(|d| d.get("aweme_id").is_some()) {
        if let Some(detail) = detail_from_value(detail) {
            return Some(detail);
        }
    }
    if let Some(detail) = aweme.get("awemeDetail").and_then(detail_from_value) {
        return Some(detail);
    }
    aweme.pointer("/itemList/0").and_then(detail_from_value)
}

fn extract_from_render_data(html: &str) -> Option<AwemeDetail> {
    let raw = RENDER_DATA.captures(html)?.get(1)?.as_str();

    let parsed: Value = if let Some(encoded) = URI_COMPONENT.captures(raw) {
        let decoded = percent_decode_str(encoded.get(1)?.as_str())
            .decode_utf8()
            .ok()?;
        serde_json::from_str(&decoded).ok()?
    } else {
        serde_json::from_str(raw).ok()?
    };

    let entry = parsed.get("/video/:id")?;
    entry
        .pointer("/aweme/detail/awemeDetail")
        .or_else(|| entry.pointer("/aweme/awemeDetail"))
        .and_then(detail_from_value)
}

/// Last resort: pull a play address and the visible text fields straight out
/// of the markup.
fn extract_raw_from_markup(html: &str, identifier: &str) -> Option<AwemeDetail> {
    let play_url = RAW_PLAY_ADDR.captures(html)?.get(1)?.as_str().to_string();
    let desc = RAW_DESC
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let nickname = RAW_NICKNAME
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    Some(AwemeDetail {
        aweme_id: Some(identifier.to_string()),
        desc,
        author: nickname.map(|nickname| AwemeAuthor {
            nickname: Some(nickname),
            avatar_thumb: None,
        }),
        video: Some(AwemeVideo {
            play_addr: Some(PlayAddr {
                url_list: Some(vec![play_url]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn detail_from_value(value: &Value) -> Option<AwemeDetail> {
    if !value.is_object() {
        return None;
    }
    // A detail without an id or video block is a decoy shell, not content.
    if value.get("aweme_id").is_none() && value.get("video").is_none() {
        return None;
    }
    serde_json::from_value(value.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_props_marker_wins() {
        let html = r#"<script>window.__INIT_PROPS__ = {"detail":{"awemeDetail":{"aweme_id":"42","desc":"hi"}}};</script>"#;
        let detail = extract_detail_from_html(html, "42").unwrap();
        assert_eq!(detail.aweme_id.as_deref(), Some("42"));
        assert_eq!(detail.desc.as_deref(), Some("hi"));
    }

    #[test]
    fn sigi_state_item_list_entry() {
        let html = r#"<script>window.SIGI_STATE = {"Aweme":{"detail":{"itemList":[{"aweme_id":"7","desc":"x"}]}}};</script>"#;
        let detail = extract_detail_from_html(html, "7").unwrap();
        assert_eq!(detail.aweme_id.as_deref(), Some("7"));
    }

    #[test]
    fn render_data_with_uri_component_wrapper() {
        // {"/video/:id":{"aweme":{"awemeDetail":{"aweme_id":"9"}}}}
        let encoded = "%7B%22%2Fvideo%2F%3Aid%22%3A%7B%22aweme%22%3A%7B%22awemeDetail%22%3A%7B%22aweme_id%22%3A%229%22%7D%7D%7D%7D";
        let html = format!(
            r#"<script id="RENDER_DATA" type="application/json">decodeURIComponent("{encoded}")</script>"#
        );
        let detail = extract_detail_from_html(&html, "9").unwrap();
        assert_eq!(detail.aweme_id.as_deref(), Some("9"));
    }

    #[test]
    fn raw_markup_pull_is_last_resort() {
        let html = r#"<html>"play_addr":{"uri":"x","url_list":["https://v.example/play.mp4"]} "desc":"mô tả" "nickname":"tác giả"</html>"#;
        let detail = extract_detail_from_html(html, "123").unwrap();
        assert_eq!(detail.aweme_id.as_deref(), Some("123"));
        assert_eq!(detail.desc.as_deref(), Some("mô tả"));
        let video = detail.video.unwrap();
        assert_eq!(
            video.play_addr.unwrap().url_list.unwrap()[0],
            "https://v.example/play.mp4"
        );
    }

    #[test]
    fn shell_objects_are_rejected() {
        let html = r#"<script>window.__INIT_PROPS__ = {"detail":{"awemeDetail":{"routeProps":true}}};</script>"#;
        assert!(extract_detail_from_html(html, "1").is_none());
    }
}
