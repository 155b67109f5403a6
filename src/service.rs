use crate::cache::{CacheGateway, CacheStats, MemoryStore, VideoStore};
use crate::cascade::{run_cascade, ExtractContext, ExtractionStrategy};
use crate::douyin::douyin_strategies;
use crate::facebook::{self, facebook_strategies};
use crate::redirect::{PageSource, RedirectResolver};
use crate::tiktok::{self, tiktok_strategies};
use crate::{
    build_record, normalize_input, prepare_download, CacheEntry, DownloadStream, Fetcher,
    IdentityCookies, MediaRecord, Platform, ResolveError, ResolverConfig,
};
use rand::Rng;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument};

pub const MAX_CONCURRENT_RESOLUTIONS: usize = 64;

/// Outcome of one resolve call.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub record: MediaRecord,
    pub cached: bool,
}

/// JSON envelope of the request boundary: `{ success, data, cached }` on
/// success, `{ success, message }` plus a non-2xx status on failure.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<MediaRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip)]
    status: u16,
}

impl ResolveResponse {
    pub fn from_result(result: &Result<Resolution, ResolveError>) -> Self {
        match result {
            Ok(resolution) => Self {
                success: true,
                data: Some(resolution.record.clone()),
                cached: Some(resolution.cached),
                message: None,
                status: 200,
            },
            Err(error) => Self {
                success: false,
                data: None,
                cached: None,
                message: Some(error.user_message()),
                status: error.status_code(),
            },
        }
    }

    pub fn http_status(&self) -> u16 {
        self.status
    }
}

/// Envelope of the history surface.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryData {
    pub history: Vec<CacheEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<CacheStats>,
}

/// Construction-time knobs. Every collaborator can be swapped out; tests
/// inject stub stores, page sources and strategies.
pub struct ResolveServiceConfig {
    pub resolver: ResolverConfig,
    pub max_concurrent_requests: usize,
    pub store: Option<Arc<dyn VideoStore>>,
    pub page_source: Option<Arc<dyn PageSource>>,
    pub douyin_strategies: Option<Vec<Box<dyn ExtractionStrategy>>>,
    pub tiktok_strategies: Option<Vec<Box<dyn ExtractionStrategy>>>,
    pub facebook_strategies: Option<Vec<Box<dyn ExtractionStrategy>>>,
}

impl Default for ResolveServiceConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolveServiceConfig {
    pub fn new() -> Self {
        Self {
            resolver: ResolverConfig::default(),
            max_concurrent_requests: MAX_CONCURRENT_RESOLUTIONS,
            store: None,
            page_source: None,
            douyin_strategies: None,
            tiktok_strategies: None,
            facebook_strategies: None,
        }
    }

    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn VideoStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_page_source(mut self, source: Arc<dyn PageSource>) -> Self {
        self.page_source = Some(source);
        self
    }

    pub fn with_strategies(
        mut self,
        platform: Platform,
        strategies: Vec<Box<dyn ExtractionStrategy>>,
    ) -> Self {
        match platform {
            Platform::Douyin => self.douyin_strategies = Some(strategies),
            Platform::Tiktok => self.tiktok_strategies = Some(strategies),
            Platform::Facebook => self.facebook_strategies = Some(strategies),
        }
        self
    }

    pub fn with_max_concurrent_requests(mut self, max: usize) -> Self {
        self.max_concurrent_requests = max;
        self
    }
}

/// The resolution pipeline: normalize, cache lookup, identifier resolution,
/// cascade, normalization, cache upsert. One instance serves all platforms.
#[derive(Clone)]
pub struct ResolveService {
    config: Arc<ResolverConfig>,
    douyin_fetcher: Arc<Fetcher>,
    desktop_fetcher: Arc<Fetcher>,
    redirect: Arc<RedirectResolver>,
    share_source: Arc<dyn PageSource>,
    cache: CacheGateway,
    douyin: Arc<Vec<Box<dyn ExtractionStrategy>>>,
    tiktok: Arc<Vec<Box<dyn ExtractionStrategy>>>,
    facebook: Arc<Vec<Box<dyn ExtractionStrategy>>>,
    semaphore: Arc<Semaphore>,
}

impl Default for ResolveService {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolveService {
    pub fn new() -> Self {
        Self::new_with_config(ResolveServiceConfig::new())
    }

    pub fn new_with_config(service_config: ResolveServiceConfig) -> Self {
        let config = Arc::new(service_config.resolver);
        let douyin_fetcher = Arc::new(Fetcher::new_douyin_client(&config));
        let desktop_fetcher = Arc::new(Fetcher::new_desktop_client(&config));
        let mirror_fetcher = Arc::new(Fetcher::new_mirror_client(&config));

        let redirect_source: Arc<dyn PageSource> = service_config
            .page_source
            .clone()
            .unwrap_or_else(|| douyin_fetcher.clone() as Arc<dyn PageSource>);
        let share_source: Arc<dyn PageSource> = service_config
            .page_source
            .unwrap_or_else(|| desktop_fetcher.clone() as Arc<dyn PageSource>);

        let store: Arc<dyn VideoStore> = service_config
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));

        let douyin = Arc::new(service_config.douyin_strategies.unwrap_or_else(|| {
            douyin_strategies(config.clone(), douyin_fetcher.clone(), mirror_fetcher.clone())
        }));
        let tiktok = Arc::new(
            service_config
                .tiktok_strategies
                .unwrap_or_else(|| tiktok_strategies(config.clone(), mirror_fetcher.clone())),
        );
        let facebook = Arc::new(service_config.facebook_strategies.unwrap_or_else(|| {
            facebook_strategies(config.clone(), desktop_fetcher.clone())
        }));

        debug!("ResolveService initialized");
        Self {
            redirect: Arc::new(RedirectResolver::new(redirect_source)),
            share_source,
            cache: CacheGateway::new(store),
            douyin,
            tiktok,
            facebook,
            semaphore: Arc::new(Semaphore::new(service_config.max_concurrent_requests)),
            config,
            douyin_fetcher,
            desktop_fetcher,
        }
    }

    /// Resolve one share link to a media record, serving from cache when the
    /// normalized URL has been seen before.
    #[instrument(level = "debug", skip(self))]
    pub async fn resolve(
        &self,
        platform: Platform,
        raw_url: &str,
    ) -> Result<Resolution, ResolveError> {
        let tag = request_tag();

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| ResolveError::FetchError("resolver is shutting down".to_string()))?;

        let url = normalize_input(raw_url)?;
        info!(tag = %tag, platform = %platform, url = %url, "Received resolve request");

        if let Some(record) = self.cache.lookup(&url, platform).await {
            info!(tag = %tag, "Cache hit");
            return Ok(Resolution {
                record,
                cached: true,
            });
        }
        debug!(tag = %tag, "Cache miss, analyzing");

        let ctx = self.build_context(platform, &url, &tag).await?;
        let strategies = self.strategies_for(platform);
        let payload = run_cascade(strategies, &ctx).await?;
        let record = build_record(payload, &ctx.identifier, platform)?;

        self.cache.upsert(&url, platform, &record).await;
        info!(tag = %tag, video_id = %record.video_id, "Resolved and cached");

        Ok(Resolution {
            record,
            cached: false,
        })
    }

    async fn build_context(
        &self,
        platform: Platform,
        url: &str,
        tag: &str,
    ) -> Result<ExtractContext, ResolveError> {
        match platform {
            Platform::Douyin => {
                let target = self.redirect.resolve(url).await?;
                info!(tag, identifier = %target.identifier, "Resolved aweme id");
                let cookies = IdentityCookies::compose(&self.config, &self.douyin_fetcher).await;
                Ok(ExtractContext {
                    platform,
                    identifier: target.identifier,
                    resolved_url: target.resolved_url,
                    original_url: url.to_string(),
                    cookie_header: Some(cookies.header_value()),
                    tag: tag.to_string(),
                })
            }
            Platform::Tiktok => {
                // The mirror accepts short links; the id is best-effort here
                // and the mirror payload fills it in when absent.
                let identifier =
                    tiktok::extract_video_id(url).unwrap_or_else(|| "unknown".to_string());
                Ok(ExtractContext {
                    platform,
                    identifier,
                    resolved_url: url.to_string(),
                    original_url: url.to_string(),
                    cookie_header: None,
                    tag: tag.to_string(),
                })
            }
            Platform::Facebook => {
                let mut resolved_url = url.to_string();
                if facebook::is_share_link(url) {
                    debug!(tag, "Share link detected, resolving");
                    if let Some(landed) =
                        facebook::resolve_share_link(self.share_source.as_ref(), url, tag).await
                    {
                        resolved_url = landed;
                    }
                }
                let identifier = facebook::facebook_identifier(&resolved_url)
                    .ok_or(ResolveError::UnresolvableLink)?;
                info!(tag, identifier = %identifier, "Facebook identifier ready");
                Ok(ExtractContext {
                    platform,
                    identifier,
                    resolved_url,
                    original_url: url.to_string(),
                    cookie_header: None,
                    tag: tag.to_string(),
                })
            }
        }
    }

    fn strategies_for(&self, platform: Platform) -> &[Box<dyn ExtractionStrategy>] {
        match platform {
            Platform::Douyin => &self.douyin,
            Platform::Tiktok => &self.tiktok,
            Platform::Facebook => &self.facebook,
        }
    }

    /// Download-proxy pass-through with allow-list validation.
    pub async fn download(
        &self,
        platform: Platform,
        source: Option<&str>,
        filename: Option<&str>,
    ) -> Result<DownloadStream, ResolveError> {
        let fetcher = match platform {
            Platform::Douyin => &self.douyin_fetcher,
            _ => &self.desktop_fetcher,
        };
        prepare_download(fetcher, &self.config, platform, source, filename).await
    }

    pub async fn history(
        &self,
        limit: usize,
        include_stats: bool,
    ) -> Result<HistoryData, ResolveError> {
        let history = self.cache.history(limit).await?;
        let stats = if include_stats {
            Some(self.cache.stats().await?)
        } else {
            None
        };
        Ok(HistoryData { history, stats })
    }

    pub async fn delete_entry(&self, id: &str) -> Result<bool, ResolveError> {
        self.cache.delete_by_id(id).await
    }
}

/// Short correlation tag woven through one request's log lines.
fn request_tag() -> String {
    let bytes: [u8; 3] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
