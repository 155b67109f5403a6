use crate::Platform;
use std::time::Duration;

const MOBILE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_2 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.2 Mobile/15E148 Safari/604.1";
const DESKTOP_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_3_1) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/129.0.0.0 Safari/537.36";

/// Everything the pipeline treats as an ambient constant upstream of code:
/// endpoint hosts, user agents, allow-lists, timeouts. Built once at startup
/// and injected; components never reach for globals.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub mobile_user_agent: String,
    pub desktop_user_agent: String,
    pub accept_language: String,

    /// Official detail API hosts, tried in order.
    pub douyin_detail_endpoints: Vec<String>,
    pub douyin_legacy_endpoint: String,
    pub douyin_video_page: String,
    pub douyin_referer: String,
    pub ttwid_endpoint: String,
    pub tikwm_endpoint: String,
    pub tikwm_referer: String,

    /// Third-party Facebook resolver templates (`{url}` placeholder). Empty
    /// means the tier is skipped entirely.
    pub facebook_services: Vec<String>,

    pub page_timeout: Duration,
    pub mirror_timeout: Duration,
    pub scrape_timeout: Duration,
    pub browser_navigation_timeout: Duration,
    pub browser_marker_timeout: Duration,
    /// Fixed-interval polls for an intercepted payload after navigation.
    pub browser_poll_steps: u32,
    pub browser_poll_interval: Duration,

    douyin_download_suffixes: Vec<String>,
    tiktok_download_suffixes: Vec<String>,
    facebook_download_suffixes: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            mobile_user_agent: MOBILE_UA.to_string(),
            desktop_user_agent: DESKTOP_UA.to_string(),
            accept_language: "vi-VN,vi;q=0.9,en;q=0.8".to_string(),
            douyin_detail_endpoints: vec![
                "https://www.iesdouyin.com/aweme/v1/web/aweme/detail/?aweme_id=".to_string(),
                "https://www.douyin.com/aweme/v1/web/aweme/detail/?aweme_id=".to_string(),
            ],
            douyin_legacy_endpoint:
                "https://www.iesdouyin.com/web/api/v2/aweme/iteminfo/?item_ids=".to_string(),
            douyin_video_page: "https://www.douyin.com/video/".to_string(),
            douyin_referer: "https://www.douyin.com/".to_string(),
            ttwid_endpoint: "https://ttwid.bytedance.com/ttwid/union/register/".to_string(),
            tikwm_endpoint: "https://www.tikwm.com/api/".to_string(),
            tikwm_referer: "https://www.tikwm.com/".to_string(),
            facebook_services: Vec::new(),
            page_timeout: Duration::from_secs(15),
            mirror_timeout: Duration::from_secs(20),
            scrape_timeout: Duration::from_secs(30),
            browser_navigation_timeout: Duration::from_secs(90),
            browser_marker_timeout: Duration::from_secs(45),
            browser_poll_steps: 10,
            browser_poll_interval: Duration::from_secs(1),
            douyin_download_suffixes: [
                ".snssdk.com",
                ".pstatp.com",
                ".bytecdn.cn",
                ".douyin.com",
                ".douyinvod.com",
                ".ixigua.com",
                ".zjcdn.com",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            tiktok_download_suffixes: [".tiktokcdn.com", ".tiktokv.com", ".tikwm.com", ".tiktok.com"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            facebook_download_suffixes: [".fbcdn.net", ".facebook.com", ".fb.com"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn download_suffixes(&self, platform: Platform) -> &[String] {
        match platform {
            Platform::Douyin => &self.douyin_download_suffixes,
            Platform::Tiktok => &self.tiktok_download_suffixes,
            Platform::Facebook => &self.facebook_download_suffixes,
        }
    }

    pub fn referer_for(&self, platform: Platform) -> &str {
        match platform {
            Platform::Douyin => "https://www.douyin.com/",
            Platform::Tiktok => "https://www.tiktok.com/",
            Platform::Facebook => "https://www.facebook.com/",
        }
    }

    pub fn with_facebook_services(mut self, services: Vec<String>) -> Self {
        self.facebook_services = services;
        self
    }

    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    pub fn with_accept_language(mut self, lang: impl Into<String>) -> Self {
        self.accept_language = lang.into();
        self
    }

    pub fn with_detail_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.douyin_detail_endpoints = endpoints;
        self
    }
}
