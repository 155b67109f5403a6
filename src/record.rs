use crate::upstream::{AwemeDetail, BitRateVariant, ScrapedVideo, TikwmData};
use crate::{MediaRecord, Platform, RawUpstreamPayload, ResolveError};
use chrono::{SecondsFormat, TimeZone, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use std::sync::LazyLock;

/// Matches encodeURIComponent: everything but alphanumerics and `-_.!~*'()`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

static WATERMARK_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"watermark=\d").expect("watermark param"));
static RATIO_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ratio=\d+p").expect("ratio hint"));

/// Map whatever payload won the cascade onto the canonical record.
pub fn build_record(
    payload: RawUpstreamPayload,
    identifier: &str,
    platform: Platform,
) -> Result<MediaRecord, ResolveError> {
    match payload {
        RawUpstreamPayload::Aweme(detail) => from_aweme(detail, identifier, platform),
        RawUpstreamPayload::Tikwm(data) => from_tikwm(data, identifier, platform),
        RawUpstreamPayload::Scraped(video) => Ok(from_scraped(video, identifier, platform)),
    }
}

fn from_aweme(
    detail: AwemeDetail,
    identifier: &str,
    platform: Platform,
) -> Result<MediaRecord, ResolveError> {
    let video = detail.video.ok_or(ResolveError::NoPlayableUrl)?;

    let mut variants: Vec<BitRateVariant> = video.bit_rate.clone().unwrap_or_default();
    // Stable sort on the bitrate alone keeps upstream order for ties, so the
    // first occurrence wins.
    variants.sort_by(|a, b| b.bit_rate.unwrap_or(0).cmp(&a.bit_rate.unwrap_or(0)));
    let best = variants.first();

    let candidate = best
        .and_then(|v| v.play_addr.as_ref())
        .and_then(|addr| addr.url_list.as_ref())
        .and_then(|list| list.first())
        .or_else(|| {
            video
                .play_addr
                .as_ref()
                .and_then(|addr| addr.url_list.as_ref())
                .and_then(|list| list.first())
        })
        .or_else(|| {
            video
                .download_addr
                .as_ref()
                .and_then(|addr| addr.url_list.as_ref())
                .and_then(|list| list.first())
        })
        .ok_or(ResolveError::NoPlayableUrl)?;

    let direct_media_url = sanitize_media_url(candidate);

    let video_id = detail
        .aweme_id
        .unwrap_or_else(|| identifier.to_string());

    let resolution = best.and_then(|v| {
        let addr = v.play_addr.as_ref()?;
        Some(format!("{}×{}", addr.width?, addr.height?))
    });

    let size_bytes = best
        .and_then(|v| v.play_addr.as_ref())
        .and_then(|addr| addr.data_size)
        .or_else(|| video.download_addr.as_ref().and_then(|a| a.data_size))
        .or_else(|| video.play_addr.as_ref().and_then(|a| a.data_size));

    Ok(MediaRecord {
        description: detail.desc.unwrap_or_default(),
        author: detail
            .author
            .as_ref()
            .and_then(|a| a.nickname.clone())
            .unwrap_or_else(|| unknown_author(platform).to_string()),
        avatar: detail
            .author
            .as_ref()
            .and_then(|a| a.avatar_thumb.as_ref())
            .and_then(|t| t.first())
            .map(Into::into),
        cover: video
            .origin_cover
            .as_ref()
            .and_then(|c| c.first())
            .or_else(|| video.cover.as_ref().and_then(|c| c.first()))
            .or_else(|| video.dynamic_cover.as_ref().and_then(|c| c.first()))
            .map(Into::into),
        music: detail.music.and_then(|m| m.title),
        // Platform-native milliseconds, rounded to whole seconds.
        duration_seconds: ((video.duration.unwrap_or(0) as f64) / 1000.0).round() as u64,
        resolution,
        bitrate_kbps: best
            .and_then(|v| v.bit_rate)
            .map(|rate| ((rate as f64) / 1000.0).round() as u64),
        size_bytes,
        published_at: detail.create_time.and_then(iso8601_from_epoch),
        proxy_download_path: proxy_download_path(platform, &direct_media_url, &video_id),
        direct_media_url,
        video_id,
        platform,
    })
}

fn from_tikwm(
    data: TikwmData,
    identifier: &str,
    platform: Platform,
) -> Result<MediaRecord, ResolveError> {
    let media_url = data
        .hdplay
        .clone()
        .or_else(|| data.play.clone())
        .ok_or(ResolveError::NoPlayableUrl)?;

    let video_id = data
        .aweme_id
        .clone()
        .unwrap_or_else(|| identifier.to_string());

    let duration = data.duration.unwrap_or(0.0);
    let bitrate = data.bitrate.unwrap_or(0.0);
    let size_bytes = data.size.or_else(|| {
        data.size_mb
            .map(|mb| (mb * 1024.0 * 1024.0).round() as u64)
    });

    Ok(MediaRecord {
        video_id: video_id.clone(),
        description: data.title.clone().unwrap_or_default(),
        author: data
            .author
            .as_ref()
            .and_then(|a| a.nickname())
            .unwrap_or(unknown_author(platform))
            .to_string(),
        avatar: data.author.as_ref().and_then(|a| a.avatar()).map(Into::into),
        cover: data.cover.clone().or_else(|| data.origin_cover.clone()),
        music: data
            .music_info
            .as_ref()
            .and_then(|m| m.title.clone())
            .or_else(|| data.music.clone()),
        duration_seconds: if duration.is_finite() && duration > 0.0 {
            duration.round() as u64
        } else {
            0
        },
        resolution: data.video_resolution.clone().or_else(|| data.ratio.clone()),
        bitrate_kbps: if bitrate.is_finite() && bitrate > 0.0 {
            Some((bitrate / 1000.0).round() as u64)
        } else {
            None
        },
        size_bytes,
        published_at: data.create_time.and_then(iso8601_from_epoch),
        proxy_download_path: proxy_download_path(platform, &media_url, &video_id),
        direct_media_url: media_url,
        platform,
    })
}

fn from_scraped(video: ScrapedVideo, identifier: &str, platform: Platform) -> MediaRecord {
    let video_id = identifier.to_string();
    MediaRecord {
        description: video.title.clone().unwrap_or_default(),
        author: video
            .author
            .clone()
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| unknown_author(platform).to_string()),
        avatar: video.thumbnail.clone(),
        cover: video.thumbnail,
        music: None,
        duration_seconds: video.duration_seconds.unwrap_or(0),
        resolution: None,
        bitrate_kbps: None,
        size_bytes: None,
        published_at: None,
        proxy_download_path: proxy_download_path(platform, &video.media_url, &video_id),
        direct_media_url: video.media_url,
        video_id,
        platform,
    }
}

/// Rewrite a CDN URL to the unwatermarked variant: https forced, `playwm`
/// path token replaced, `watermark=0` forced, high-resolution hint appended
/// when none is present.
pub(crate) fn sanitize_media_url(url: &str) -> String {
    let mut sanitized = if let Some(rest) = url.strip_prefix("http://") {
        format!("https://{rest}")
    } else {
        url.to_string()
    };

    if sanitized.contains("playwm") {
        sanitized = sanitized.replace("playwm", "play");
    }

    if sanitized.contains("watermark=") {
        sanitized = WATERMARK_PARAM
            .replace_all(&sanitized, "watermark=0")
            .into_owned();
    } else {
        let separator = if sanitized.contains('?') { '&' } else { '?' };
        sanitized.push(separator);
        sanitized.push_str("watermark=0");
    }

    if !RATIO_HINT.is_match(&sanitized) {
        sanitized.push_str("&ratio=1080p");
    }

    sanitized
}

fn proxy_download_path(platform: Platform, media_url: &str, video_id: &str) -> String {
    format!(
        "/api/{}/download?source={}&filename={}.mp4",
        platform,
        utf8_percent_encode(media_url, COMPONENT),
        video_id
    )
}

fn iso8601_from_epoch(epoch_seconds: i64) -> Option<String> {
    Utc.timestamp_opt(epoch_seconds, 0)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn unknown_author(platform: Platform) -> &'static str {
    match platform {
        Platform::Facebook => "Unknown",
        _ => "Không rõ",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::{AwemeVideo, PlayAddr};

    fn variant(bit_rate: u64, url: &str) -> BitRateVariant {
        BitRateVariant {
            bit_rate: Some(bit_rate),
            gear_name: None,
            play_addr: Some(PlayAddr {
                url_list: Some(vec![url.to_string()]),
                data_size: Some(1000),
                width: Some(1080),
                height: Some(1920),
            }),
        }
    }

    #[test]
    fn highest_bitrate_variant_wins() {
        let detail = AwemeDetail {
            aweme_id: Some("1".to_string()),
            video: Some(AwemeVideo {
                bit_rate: Some(vec![
                    variant(300_000, "https://cdn/low.mp4"),
                    variant(500_000, "https://cdn/high.mp4"),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let record = build_record(RawUpstreamPayload::Aweme(detail), "1", Platform::Douyin).unwrap();
        assert!(record.direct_media_url.starts_with("https://cdn/high.mp4"));
        assert_eq!(record.bitrate_kbps, Some(500));
    }

    #[test]
    fn equal_bitrates_keep_first_occurrence() {
        let detail = AwemeDetail {
            video: Some(AwemeVideo {
                bit_rate: Some(vec![
                    variant(400_000, "https://cdn/first.mp4"),
                    variant(400_000, "https://cdn/second.mp4"),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let record =
            build_record(RawUpstreamPayload::Aweme(detail), "9", Platform::Douyin).unwrap();
        assert!(record.direct_media_url.starts_with("https://cdn/first.mp4"));
    }

    #[test]
    fn candidate_url_falls_back_to_play_then_download_addr() {
        let detail = AwemeDetail {
            video: Some(AwemeVideo {
                download_addr: Some(PlayAddr {
                    url_list: Some(vec!["http://cdn/dl.mp4".to_string()]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let record =
            build_record(RawUpstreamPayload::Aweme(detail), "2", Platform::Douyin).unwrap();
        assert!(record.direct_media_url.starts_with("https://cdn/dl.mp4"));
    }

    #[test]
    fn missing_urls_fail_with_no_playable() {
        let detail = AwemeDetail {
            video: Some(AwemeVideo::default()),
            ..Default::default()
        };
        let err =
            build_record(RawUpstreamPayload::Aweme(detail), "3", Platform::Douyin).unwrap_err();
        assert!(matches!(err, ResolveError::NoPlayableUrl));

        let bare = AwemeDetail::default();
        let err = build_record(RawUpstreamPayload::Aweme(bare), "3", Platform::Douyin).unwrap_err();
        assert!(matches!(err, ResolveError::NoPlayableUrl));
    }

    #[test]
    fn watermark_rewriting() {
        assert_eq!(
            sanitize_media_url("http://cdn.example/playwm/video?watermark=1&x=2"),
            "https://cdn.example/play/video?watermark=0&x=2&ratio=1080p"
        );
        assert_eq!(
            sanitize_media_url("https://cdn.example/play/video"),
            "https://cdn.example/play/video?watermark=0&ratio=1080p"
        );
        assert_eq!(
            sanitize_media_url("https://cdn.example/v?ratio=720p"),
            "https://cdn.example/v?ratio=720p&watermark=0"
        );
    }

    #[test]
    fn duration_rounds_from_milliseconds() {
        let detail = AwemeDetail {
            video: Some(AwemeVideo {
                duration: Some(15_499),
                play_addr: Some(PlayAddr {
                    url_list: Some(vec!["https://cdn/a.mp4".to_string()]),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        let record =
            build_record(RawUpstreamPayload::Aweme(detail), "4", Platform::Douyin).unwrap();
        assert_eq!(record.duration_seconds, 15);
    }

    #[test]
    fn publish_epoch_becomes_iso8601() {
        assert_eq!(
            iso8601_from_epoch(1_700_000_000).as_deref(),
            Some("2023-11-14T22:13:20.000Z")
        );
    }

    #[test]
    fn proxy_path_encodes_source() {
        let path = proxy_download_path(Platform::Douyin, "https://cdn/a.mp4?x=1&y=2", "77");
        assert_eq!(
            path,
            "/api/douyin/download?source=https%3A%2F%2Fcdn%2Fa.mp4%3Fx%3D1%26y%3D2&filename=77.mp4"
        );
    }

    #[test]
    fn tikwm_payload_maps_and_prefers_hd() {
        let data = TikwmData {
            aweme_id: Some("88".to_string()),
            title: Some("clip".to_string()),
            hdplay: Some("https://mirror/hd.mp4".to_string()),
            play: Some("https://mirror/sd.mp4".to_string()),
            duration: Some(12.0),
            bitrate: Some(512_000.0),
            size_mb: Some(2.0),
            ..Default::default()
        };
        let record =
            build_record(RawUpstreamPayload::Tikwm(data), "fallback", Platform::Tiktok).unwrap();
        assert_eq!(record.video_id, "88");
        assert_eq!(record.direct_media_url, "https://mirror/hd.mp4");
        assert_eq!(record.duration_seconds, 12);
        assert_eq!(record.bitrate_kbps, Some(512));
        assert_eq!(record.size_bytes, Some(2 * 1024 * 1024));
        assert_eq!(record.author, "Không rõ");
    }

    #[test]
    fn scraped_payload_uses_identifier_and_sentinel() {
        let video = ScrapedVideo {
            media_url: "https://cdn.fb/v.mp4".to_string(),
            title: Some("bài đăng".to_string()),
            author: None,
            thumbnail: Some("https://cdn.fb/t.jpg".to_string()),
            duration_seconds: None,
        };
        let record = build_record(
            RawUpstreamPayload::Scraped(video),
            "abc123",
            Platform::Facebook,
        )
        .unwrap();
        assert_eq!(record.video_id, "abc123");
        assert_eq!(record.author, "Unknown");
        assert_eq!(
            record.proxy_download_path,
            format!(
                "/api/facebook/download?source={}&filename=abc123.mp4",
                "https%3A%2F%2Fcdn.fb%2Fv.mp4"
            )
        );
    }
}
