use crate::{ResolveError, ResolverConfig};
use reqwest::header::HeaderMap;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, instrument};

/// A fetched page together with the URL the redirect chain landed on.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub final_url: String,
    pub body: String,
}

#[derive(Clone)]
pub struct Fetcher {
    client: Client,
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new_douyin_client(&ResolverConfig::default())
    }
}

impl Fetcher {
    /// Client for the Douyin share pages and official APIs: mobile user agent,
    /// platform referer and the accept-language the upstream expects.
    pub fn new_douyin_client(config: &ResolverConfig) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(referer) = config.douyin_referer.parse() {
            headers.insert("Referer", referer);
        }
        if let Ok(lang) = config.accept_language.parse() {
            headers.insert("Accept-Language", lang);
        }

        Self::build(
            &config.mobile_user_agent,
            config.page_timeout,
            headers,
            "douyin",
        )
    }

    /// Desktop-profile client used for Facebook page scrapes.
    pub fn new_desktop_client(config: &ResolverConfig) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(accept) =
            "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8".parse()
        {
            headers.insert("Accept", accept);
        }
        if let Ok(lang) = "en-US,en;q=0.9".parse() {
            headers.insert("Accept-Language", lang);
        }

        Self::build(
            &config.desktop_user_agent,
            config.scrape_timeout,
            headers,
            "desktop",
        )
    }

    /// Client for the tikwm mirror API.
    pub fn new_mirror_client(config: &ResolverConfig) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(referer) = config.tikwm_referer.parse() {
            headers.insert("Referer", referer);
        }
        if let Ok(accept) = "application/json".parse() {
            headers.insert("Accept", accept);
        }

        Self::build(
            &config.mobile_user_agent,
            config.mirror_timeout,
            headers,
            "mirror",
        )
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn build(user_agent: &str, timeout: Duration, headers: HeaderMap, label: &str) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(10))
            .pool_max_idle_per_host(10)
            .build()
            .unwrap_or_else(|e| {
                error!(error = %e, client = label, "Failed to create HTTP client");
                panic!("Failed to initialize HTTP client: {}", e);
            });
        debug!(client = label, "Fetcher initialized");
        Fetcher { client }
    }

    /// GET a page following redirects, returning both the landing URL and the
    /// body. Short-link expansion reads the landing URL.
    #[instrument(level = "debug", skip(self), err)]
    pub async fn fetch_page(&self, url: &str) -> Result<FetchedPage, ResolveError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolveError::FetchError(e.to_string()))?;

        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| ResolveError::FetchError(e.to_string()))?;

        debug!(final_url = %final_url, content_length = body.len(), "Fetched page");
        Ok(FetchedPage { final_url, body })
    }

    /// GET raw text with an extra cookie header, surfacing the HTTP status so
    /// callers can treat non-2xx as a tier miss.
    pub async fn get_text_with_cookies(
        &self,
        url: &str,
        cookie_header: &str,
    ) -> Result<(u16, String), ResolveError> {
        let response = self
            .client
            .get(url)
            .header("Cookie", cookie_header)
            .send()
            .await
            .map_err(|e| ResolveError::FetchError(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ResolveError::FetchError(e.to_string()))?;
        Ok((status, body))
    }

    pub async fn get_text(&self, url: &str) -> Result<(u16, String), ResolveError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ResolveError::FetchError(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ResolveError::FetchError(e.to_string()))?;
        Ok((status, body))
    }

    /// POST a urlencoded form, returning status and body text.
    pub async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<(u16, String), ResolveError> {
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| ResolveError::FetchError(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ResolveError::FetchError(e.to_string()))?;
        Ok((status, body))
    }

    /// POST a JSON body and hand back the raw response for header inspection.
    pub async fn post_json_raw(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, ResolveError> {
        self.client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| ResolveError::FetchError(e.to_string()))
    }

    /// Plain GET returning the response for streaming pass-through.
    pub async fn get_raw(
        &self,
        url: &str,
        referer: &str,
    ) -> Result<reqwest::Response, ResolveError> {
        self.client
            .get(url)
            .header("Referer", referer)
            .send()
            .await
            .map_err(|e| ResolveError::FetchError(e.to_string()))
    }
}
