use crate::Platform;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("No http(s) URL found in input")]
    NoUrlFound,

    #[error("Failed to parse URL: {0}")]
    UrlParseError(#[from] url::ParseError),

    #[error("Redirect chain exhausted without an identifier")]
    UnresolvableLink,

    #[error("Failed to fetch content: {0}")]
    FetchError(String),

    #[error("Every extraction strategy for {platform} missed: {message}")]
    AllStrategiesExhausted { platform: Platform, message: String },

    #[error("No playable media URL in upstream payload")]
    NoPlayableUrl,

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Missing source parameter")]
    MissingSource,

    #[error("Source host not allow-listed: {0}")]
    ForbiddenSource(String),

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Browser probe error: {0}")]
    BrowserError(String),
}

impl ResolveError {
    pub fn log(&self) {
        match self {
            ResolveError::NoUrlFound => {
                warn!("No URL found in request input");
            }
            ResolveError::UrlParseError(e) => {
                warn!(error = %e, "URL parsing failed");
            }
            ResolveError::UnresolvableLink => {
                warn!("Redirect resolution exhausted without an identifier");
            }
            ResolveError::FetchError(e) => {
                error!(error = %e, "Content fetch failed");
            }
            ResolveError::AllStrategiesExhausted { platform, message } => {
                error!(platform = %platform, detail = %message, "Extraction cascade exhausted");
            }
            ResolveError::NoPlayableUrl => {
                error!("Upstream payload carried no playable URL");
            }
            ResolveError::CacheError(e) => {
                warn!(error = %e, "Cache operation failed");
            }
            ResolveError::MissingSource => {
                warn!("Download request without source parameter");
            }
            ResolveError::ForbiddenSource(host) => {
                warn!(host = %host, "Download source rejected by allow-list");
            }
            ResolveError::UpstreamUnreachable(e) => {
                error!(error = %e, "Upstream media fetch failed");
            }
            ResolveError::BrowserError(e) => {
                warn!(error = %e, "Browser probe failed");
            }
        }
    }

    /// HTTP status the serving layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            ResolveError::NoUrlFound
            | ResolveError::UrlParseError(_)
            | ResolveError::UnresolvableLink
            | ResolveError::MissingSource
            | ResolveError::ForbiddenSource(_) => 400,
            ResolveError::UpstreamUnreachable(_) => 502,
            _ => 500,
        }
    }

    /// Localized message for the response body. Internal detail stays in the
    /// logs; upstream errors are never echoed back verbatim.
    pub fn user_message(&self) -> String {
        match self {
            ResolveError::NoUrlFound => "Bạn chưa cung cấp link video.".to_string(),
            ResolveError::UrlParseError(_) => "Link video không hợp lệ.".to_string(),
            ResolveError::UnresolvableLink => {
                "Không thể nhận diện video từ link này. Hãy đảm bảo link hợp lệ.".to_string()
            }
            ResolveError::AllStrategiesExhausted { message, .. } => message.clone(),
            ResolveError::NoPlayableUrl => "Không lấy được link phát video.".to_string(),
            ResolveError::MissingSource => "Thiếu link nguồn video.".to_string(),
            ResolveError::ForbiddenSource(_) => "Nguồn video không hợp lệ.".to_string(),
            ResolveError::UpstreamUnreachable(_) => "Không thể tải video từ nguồn.".to_string(),
            ResolveError::CacheError(_) => "Không thể truy cập lịch sử video.".to_string(),
            _ => "Không thể xử lý link video này.".to_string(),
        }
    }
}
