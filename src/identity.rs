use crate::{Fetcher, ResolverConfig};
use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Anti-bot session identity attached to every official-API and HTML-scrape
/// request. The msToken and web id are synthesized locally; the ttwid is a
/// server-issued tracking cookie fetched best-effort.
#[derive(Debug, Clone)]
pub struct IdentityCookies {
    pub ms_token: String,
    pub web_id: String,
    pub ttwid: Option<String>,
}

impl IdentityCookies {
    /// Compose a cookie header. The ttwid registration call may fail or time
    /// out; the pipeline proceeds without it.
    pub async fn compose(config: &ResolverConfig, fetcher: &Fetcher) -> Self {
        let ms_token = random_hex(16);
        let web_id = random_web_id();
        let ttwid = fetch_ttwid(config, fetcher).await;

        debug!(has_ttwid = ttwid.is_some(), "Composed identity cookies");
        Self {
            ms_token,
            web_id,
            ttwid,
        }
    }

    /// Render the `Cookie` header value. The web id feeds both the primary
    /// and v2 cookie fields.
    pub fn header_value(&self) -> String {
        let mut parts = vec![
            format!("msToken={}", self.ms_token),
            format!("tt_webid={}", self.web_id),
            format!("tt_webid_v2={}", self.web_id),
        ];
        if let Some(ttwid) = &self.ttwid {
            parts.push(format!("ttwid={}", ttwid));
        }
        parts.join("; ")
    }
}

fn random_hex(bytes: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..bytes).map(|_| format!("{:02x}", rng.gen::<u8>())).collect()
}

fn random_web_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix: u32 = rand::thread_rng().gen_range(0..100_000);
    format!("{millis}{suffix}")
}

async fn fetch_ttwid(config: &ResolverConfig, fetcher: &Fetcher) -> Option<String> {
    let body = serde_json::json!({
        "region": "en",
        "aid": 1459,
        "needFid": false,
        "service": "www.douyin.com",
        "migrate_info": { "ticket": "", "source": "node" },
        "cbUrlProtocol": "https",
        "union": true,
    });

    match fetcher.post_json_raw(&config.ttwid_endpoint, &body).await {
        Ok(response) => {
            let set_cookie = response
                .headers()
                .get("set-cookie")
                .and_then(|v| v.to_str().ok())?;
            set_cookie
                .split(';')
                .find_map(|part| part.trim().strip_prefix("ttwid="))
                .map(|v| v.to_string())
        }
        Err(e) => {
            warn!(error = %e, "ttwid registration failed, continuing without it");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_contains_both_webid_fields() {
        let cookies = IdentityCookies {
            ms_token: "aabbcc".to_string(),
            web_id: "1234".to_string(),
            ttwid: None,
        };
        let header = cookies.header_value();
        assert!(header.contains("msToken=aabbcc"));
        assert!(header.contains("tt_webid=1234"));
        assert!(header.contains("tt_webid_v2=1234"));
        assert!(!header.contains("ttwid="));
    }

    #[test]
    fn header_appends_ttwid_when_present() {
        let cookies = IdentityCookies {
            ms_token: "aa".to_string(),
            web_id: "1".to_string(),
            ttwid: Some("xyz".to_string()),
        };
        assert!(cookies.header_value().ends_with("ttwid=xyz"));
    }

    #[test]
    fn random_hex_has_expected_width() {
        let token = random_hex(16);
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
