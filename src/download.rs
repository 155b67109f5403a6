use crate::{Fetcher, Platform, ResolveError, ResolverConfig};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use percent_encoding::percent_decode_str;
use tracing::{debug, warn};
use url::Url;

/// An upstream media response ready to stream through unchanged.
pub struct DownloadStream {
    pub content_type: String,
    pub content_length: Option<u64>,
    /// Sanitized name for the Content-Disposition attachment header.
    pub filename: String,
    stream: BoxStream<'static, Result<Bytes, ResolveError>>,
}

impl std::fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadStream")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .field("filename", &self.filename)
            .field("stream", &"<stream>")
            .finish()
    }
}

impl DownloadStream {
    pub fn into_byte_stream(self) -> BoxStream<'static, Result<Bytes, ResolveError>> {
        self.stream
    }
}

/// Validate a download-proxy request and open the upstream stream. The source
/// host must end with an allow-listed suffix for the platform; nothing is
/// fetched otherwise.
pub async fn prepare_download(
    fetcher: &Fetcher,
    config: &ResolverConfig,
    platform: Platform,
    source: Option<&str>,
    filename: Option<&str>,
) -> Result<DownloadStream, ResolveError> {
    let source = source.filter(|s| !s.is_empty()).ok_or(ResolveError::MissingSource)?;

    let decoded = percent_decode_str(source)
        .decode_utf8()
        .map_err(|_| ResolveError::ForbiddenSource(source.to_string()))?
        .to_string();

    let parsed =
        Url::parse(&decoded).map_err(|_| ResolveError::ForbiddenSource(decoded.clone()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ResolveError::ForbiddenSource(decoded.clone()))?;

    if !host_allowed(host, config.download_suffixes(platform)) {
        return Err(ResolveError::ForbiddenSource(host.to_string()));
    }

    debug!(host, platform = %platform, "Streaming upstream media");
    let response = fetcher
        .get_raw(parsed.as_str(), config.referer_for(platform))
        .await
        .map_err(|e| ResolveError::UpstreamUnreachable(e.to_string()))?;

    if !response.status().is_success() {
        warn!(status = %response.status(), "Upstream media fetch returned non-success");
        return Err(ResolveError::UpstreamUnreachable(format!(
            "HTTP {}",
            response.status()
        )));
    }

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("video/mp4")
        .to_string();
    let content_length = response.content_length();

    let stream = response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| ResolveError::UpstreamUnreachable(e.to_string())))
        .boxed();

    let default_name = format!("{platform}-video.mp4");
    Ok(DownloadStream {
        content_type,
        content_length,
        filename: sanitize_filename(filename.unwrap_or(&default_name)),
        stream,
    })
}

fn host_allowed(host: &str, suffixes: &[String]) -> bool {
    suffixes
        .iter()
        .any(|suffix| host.ends_with(suffix.trim_start_matches('.')))
}

pub(crate) fn sanitize_filename(input: &str) -> String {
    input
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_keeps_only_safe_characters() {
        assert_eq!(sanitize_filename("video 01/!.mp4"), "video_01__.mp4");
        assert_eq!(sanitize_filename("7412345.mp4"), "7412345.mp4");
    }

    #[test]
    fn host_suffix_matching() {
        let suffixes: Vec<String> =
            vec![".douyinvod.com".to_string(), ".zjcdn.com".to_string()];
        assert!(host_allowed("v3-dy.douyinvod.com", &suffixes));
        assert!(host_allowed("cdn.zjcdn.com", &suffixes));
        assert!(!host_allowed("evil.example.com", &suffixes));
        // Suffix match, not substring match in the middle of the host.
        assert!(!host_allowed("douyinvod.com.evil.example", &suffixes));
    }

    #[tokio::test]
    async fn missing_source_is_rejected_without_fetch() {
        let config = ResolverConfig::default();
        let fetcher = Fetcher::new_douyin_client(&config);
        let err = prepare_download(&fetcher, &config, Platform::Douyin, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::MissingSource));
    }

    #[tokio::test]
    async fn foreign_host_is_rejected_without_fetch() {
        let config = ResolverConfig::default();
        let fetcher = Fetcher::new_douyin_client(&config);
        let err = prepare_download(
            &fetcher,
            &config,
            Platform::Douyin,
            Some("https%3A%2F%2Fevil.example.com%2Fv.mp4"),
            Some("v.mp4"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ResolveError::ForbiddenSource(_)));
    }

    #[tokio::test]
    async fn malformed_source_is_rejected() {
        let config = ResolverConfig::default();
        let fetcher = Fetcher::new_douyin_client(&config);
        let err = prepare_download(&fetcher, &config, Platform::Douyin, Some("not a url"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::ForbiddenSource(_)));
    }
}
