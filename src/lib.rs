mod cache;
mod cascade;
mod config;
mod download;
mod error;
mod fetcher;
mod identity;
mod normalize;
mod record;
mod redirect;
mod service;
mod upstream;

mod douyin;
mod facebook;
mod tiktok;

#[cfg(feature = "browser")]
mod browser;
#[cfg(feature = "logging")]
mod logging;

pub use cache::{CacheEntry, CacheGateway, CacheStats, MemoryStore, StoreError, VideoStore};
pub use cascade::{run_cascade, ExtractContext, ExtractionStrategy, StrategyMiss};
pub use config::ResolverConfig;
pub use download::{prepare_download, DownloadStream};
pub use error::ResolveError;
pub use fetcher::{FetchedPage, Fetcher};
pub use identity::IdentityCookies;
pub use normalize::{cache_key, normalize_input};
pub use record::build_record;
pub use redirect::{PageSource, RedirectResolver, ResolvedTarget};
pub use service::{
    HistoryData, Resolution, ResolveResponse, ResolveService, ResolveServiceConfig,
    MAX_CONCURRENT_RESOLUTIONS,
};
pub use upstream::{
    AwemeAuthor, AwemeDetail, AwemeMusic, AwemeVideo, BitRateVariant, PlayAddr,
    RawUpstreamPayload, ScrapedVideo, TikwmAuthor, TikwmData, TikwmEnvelope, TikwmMusicInfo,
    UrlList,
};

#[cfg(feature = "browser")]
pub use browser::BrowserProbe;
#[cfg(feature = "logging")]
pub use logging::{log_record_card, setup_logging, LogConfig};

/// Platforms the resolver understands. The value doubles as the path segment
/// of the download-proxy route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Douyin,
    Tiktok,
    Facebook,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Douyin => "douyin",
            Platform::Tiktok => "tiktok",
            Platform::Facebook => "facebook",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical analysis result for one video, independent of which extraction
/// strategy produced it. Serialized field names match the JSON contract of the
/// request boundary.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRecord {
    pub video_id: String,
    pub description: String,
    pub author: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub music: Option<String>,
    pub duration_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate_kbps: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    pub direct_media_url: String,
    pub proxy_download_path: String,
    pub platform: Platform,
}

pub fn is_short_share_link(url: &str) -> bool {
    url.contains("v.douyin.com")
        || url.contains("vm.tiktok.com")
        || url.contains("vt.tiktok.com")
        || url.contains("fb.watch")
}
