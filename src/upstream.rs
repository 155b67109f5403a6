use serde::Deserialize;

/// One payload from whichever extraction strategy won, tagged by shape.
/// Never persisted; the result normalizer consumes it immediately.
#[derive(Debug, Clone)]
pub enum RawUpstreamPayload {
    Aweme(AwemeDetail),
    Tikwm(TikwmData),
    Scraped(ScrapedVideo),
}

/// The official detail object shared by the Douyin endpoints, the embedded
/// page state and the browser probe. Every field is optional at the boundary;
/// downstream code only ever sees this strict record, never loose JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AwemeDetail {
    #[serde(default)]
    pub aweme_id: Option<String>,
    #[serde(default)]
    pub desc: Option<String>,
    #[serde(default)]
    pub create_time: Option<i64>,
    #[serde(default)]
    pub author: Option<AwemeAuthor>,
    #[serde(default)]
    pub music: Option<AwemeMusic>,
    #[serde(default)]
    pub video: Option<AwemeVideo>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AwemeAuthor {
    #[serde(default)]
    pub nickname: Option<String>,
    #[serde(default)]
    pub avatar_thumb: Option<UrlList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AwemeMusic {
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AwemeVideo {
    /// Milliseconds on this platform.
    #[serde(default)]
    pub duration: Option<u64>,
    #[serde(default)]
    pub bit_rate: Option<Vec<BitRateVariant>>,
    #[serde(default)]
    pub play_addr: Option<PlayAddr>,
    #[serde(default)]
    pub download_addr: Option<PlayAddr>,
    #[serde(default)]
    pub cover: Option<UrlList>,
    #[serde(default)]
    pub origin_cover: Option<UrlList>,
    #[serde(default)]
    pub dynamic_cover: Option<UrlList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BitRateVariant {
    #[serde(default)]
    pub bit_rate: Option<u64>,
    #[serde(default)]
    pub gear_name: Option<String>,
    #[serde(default)]
    pub play_addr: Option<PlayAddr>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayAddr {
    #[serde(default)]
    pub url_list: Option<Vec<String>>,
    #[serde(default)]
    pub data_size: Option<u64>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UrlList {
    #[serde(default)]
    pub url_list: Option<Vec<String>>,
}

impl UrlList {
    pub fn first(&self) -> Option<&str> {
        self.url_list.as_ref()?.first().map(String::as_str)
    }
}

/// Response wrapper of the tikwm mirror API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TikwmEnvelope {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: Option<TikwmData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TikwmData {
    #[serde(default)]
    pub aweme_id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub cover: Option<String>,
    #[serde(default)]
    pub origin_cover: Option<String>,
    /// Seconds on the mirror, unlike the official payload.
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub bitrate: Option<f64>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub size_mb: Option<f64>,
    #[serde(default)]
    pub video_resolution: Option<String>,
    #[serde(default)]
    pub ratio: Option<String>,
    #[serde(default)]
    pub create_time: Option<i64>,
    #[serde(default)]
    pub hdplay: Option<String>,
    #[serde(default)]
    pub play: Option<String>,
    #[serde(default)]
    pub music: Option<String>,
    #[serde(default)]
    pub music_info: Option<TikwmMusicInfo>,
    #[serde(default)]
    pub author: Option<TikwmAuthor>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TikwmMusicInfo {
    #[serde(default)]
    pub title: Option<String>,
}

/// The mirror serves the author either as a bare nickname string or as an
/// object with nickname and avatar.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TikwmAuthor {
    Name(String),
    Profile {
        #[serde(default)]
        nickname: Option<String>,
        #[serde(default)]
        avatar: Option<String>,
    },
}

impl TikwmAuthor {
    pub fn nickname(&self) -> Option<&str> {
        match self {
            TikwmAuthor::Name(name) => Some(name.as_str()),
            TikwmAuthor::Profile { nickname, .. } => nickname.as_deref(),
        }
    }

    pub fn avatar(&self) -> Option<&str> {
        match self {
            TikwmAuthor::Name(_) => None,
            TikwmAuthor::Profile { avatar, .. } => avatar.as_deref(),
        }
    }
}

/// What a raw HTML scrape yields when no structured payload is available.
#[derive(Debug, Clone, Default)]
pub struct ScrapedVideo {
    pub media_url: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub thumbnail: Option<String>,
    pub duration_seconds: Option<u64>,
}
