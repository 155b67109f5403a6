use crate::{Platform, RawUpstreamPayload, ResolveError};
use async_trait::async_trait;
use tracing::{info, warn};

/// Why one strategy declined to produce a payload. Misses are recovered
/// locally by the cascade runner and never surface to callers directly.
#[derive(Debug, Clone)]
pub enum StrategyMiss {
    Http(u16),
    EmptyBody,
    InvalidJson,
    MissingField(&'static str),
    NoPlayableUrl,
    Unavailable(String),
    /// The tier is configured off (e.g. an empty third-party service list).
    Skipped,
}

impl StrategyMiss {
    /// Misses that describe the payload itself beat transport-level ones when
    /// choosing the message for the terminal error.
    fn specificity(&self) -> u8 {
        match self {
            StrategyMiss::MissingField(_) | StrategyMiss::NoPlayableUrl => 2,
            StrategyMiss::InvalidJson | StrategyMiss::EmptyBody => 1,
            _ => 0,
        }
    }
}

impl std::fmt::Display for StrategyMiss {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyMiss::Http(status) => write!(f, "HTTP {status}"),
            StrategyMiss::EmptyBody => write!(f, "empty response body"),
            StrategyMiss::InvalidJson => write!(f, "invalid JSON response"),
            StrategyMiss::MissingField(field) => write!(f, "missing field {field}"),
            StrategyMiss::NoPlayableUrl => write!(f, "no playable URL in response"),
            StrategyMiss::Unavailable(detail) => write!(f, "{detail}"),
            StrategyMiss::Skipped => write!(f, "tier disabled"),
        }
    }
}

/// Everything a strategy is allowed to see. Strategies share nothing else;
/// an earlier attempt leaves no state behind for later ones.
#[derive(Debug, Clone)]
pub struct ExtractContext {
    pub platform: Platform,
    pub identifier: String,
    pub resolved_url: String,
    pub original_url: String,
    pub cookie_header: Option<String>,
    /// Per-request correlation tag carried through the logs.
    pub tag: String,
}

/// One tier of a platform's extraction cascade.
#[async_trait]
pub trait ExtractionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, ctx: &ExtractContext) -> Result<RawUpstreamPayload, StrategyMiss>;
}

/// Try strategies strictly in order; the first payload wins and later (and
/// costlier) tiers are never touched. Exhaustion surfaces the most specific
/// miss observed, earliest tier winning ties.
pub async fn run_cascade(
    strategies: &[Box<dyn ExtractionStrategy>],
    ctx: &ExtractContext,
) -> Result<RawUpstreamPayload, ResolveError> {
    let mut best_miss: Option<StrategyMiss> = None;

    for strategy in strategies {
        match strategy.attempt(ctx).await {
            Ok(payload) => {
                info!(
                    tag = %ctx.tag,
                    strategy = strategy.name(),
                    identifier = %ctx.identifier,
                    "Extraction strategy succeeded"
                );
                return Ok(payload);
            }
            Err(miss) => {
                warn!(
                    tag = %ctx.tag,
                    strategy = strategy.name(),
                    miss = %miss,
                    "Extraction strategy missed, advancing"
                );
                let keep = match &best_miss {
                    Some(current) => miss.specificity() > current.specificity(),
                    None => !matches!(miss, StrategyMiss::Skipped),
                };
                if keep {
                    best_miss = Some(miss);
                }
            }
        }
    }

    let message = terminal_message(ctx.platform, best_miss.as_ref());
    Err(ResolveError::AllStrategiesExhausted {
        platform: ctx.platform,
        message,
    })
}

fn terminal_message(platform: Platform, miss: Option<&StrategyMiss>) -> String {
    match (platform, miss) {
        (Platform::Douyin, Some(StrategyMiss::MissingField(_))) => {
            "Không tìm thấy thông tin chi tiết video.".to_string()
        }
        (Platform::Douyin, Some(StrategyMiss::NoPlayableUrl)) => {
            "Không lấy được link phát video.".to_string()
        }
        (Platform::Douyin, _) => "Douyin tạm thời không phản hồi. Thử lại sau nhé.".to_string(),
        (Platform::Tiktok, Some(StrategyMiss::NoPlayableUrl)) => {
            "TikWM không trả về link video.".to_string()
        }
        (Platform::Tiktok, _) => "Không thể xử lý video TikTok. Thử lại sau nhé.".to_string(),
        (Platform::Facebook, Some(StrategyMiss::Unavailable(detail)))
            if detail.contains("login") =>
        {
            "Video có thể là riêng tư hoặc yêu cầu đăng nhập. Vui lòng thử với link video công khai."
                .to_string()
        }
        (Platform::Facebook, _) => {
            "Không thể lấy thông tin video từ Facebook. Thử lại sau nhé.".to_string()
        }
    }
}
