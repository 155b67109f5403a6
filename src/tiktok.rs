use crate::cascade::ExtractionStrategy;
use crate::douyin::TikwmStrategy;
use crate::{Fetcher, ResolverConfig};
use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;

static VIDEO_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/video/(\d+)").expect("tiktok video pattern"));

/// TikTok needs no redirect expansion: the mirror accepts short links
/// (`vm.tiktok.com`, `vt.tiktok.com`) as-is. A numeric id from the URL is
/// used when present; otherwise the mirror's own `aweme_id` fills it in.
pub fn extract_video_id(url: &str) -> Option<String> {
    if let Some(captures) = VIDEO_PATH.captures(url) {
        return Some(captures[1].to_string());
    }
    if crate::is_short_share_link(url) {
        // Short form carries no id; the mirror expands it itself.
        return None;
    }
    None
}

/// Single-tier cascade: the public mirror alone covers this platform.
pub fn tiktok_strategies(
    config: Arc<ResolverConfig>,
    mirror_fetcher: Arc<Fetcher>,
) -> Vec<Box<dyn ExtractionStrategy>> {
    vec![Box::new(TikwmStrategy::new(config, mirror_fetcher))]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_profile_url_yields_id() {
        assert_eq!(
            extract_video_id("https://www.tiktok.com/@user/video/7301234567890123456").as_deref(),
            Some("7301234567890123456")
        );
    }

    #[test]
    fn short_links_yield_nothing() {
        assert_eq!(extract_video_id("https://vm.tiktok.com/ZM123abc/"), None);
        assert_eq!(extract_video_id("https://vt.tiktok.com/xyz/"), None);
    }
}
