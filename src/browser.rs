use crate::upstream::AwemeDetail;
use crate::{ResolveError, ResolverConfig};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventResponseReceived, GetResponseBodyParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// API path fragments whose responses carry a detail payload.
const API_MARKERS: [&str; 3] = ["/aweme/detail", "/aweme/iteminfo", "/aweme/v1/"];

/// Masks the most common automation fingerprints before any page script runs.
const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => false });
Object.defineProperty(navigator, 'platform', { get: () => 'MacIntel' });
Object.defineProperty(navigator, 'languages', { get: () => ['vi-VN', 'vi'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
window.chrome = { runtime: {} };
"#;

/// True once any of the known state carriers is present in the document.
const MARKER_CHECK: &str = r#"
(() => Boolean(
    window.__INIT_PROPS__ ||
    window.SIGI_STATE ||
    document.querySelector("script[id='RENDER_DATA']") ||
    document.querySelector('script[type="application/json"]') ||
    document.body.innerText.includes('aweme_id')
))()
"#;

/// The in-page extraction program: a fixed, data-only walk over the known
/// globals, script tags and raw markup, in order. Runs in the document
/// context and hands back plain JSON; nothing else crosses the boundary.
const EXTRACTION_PROGRAM: &str = r#"
(() => {
    const fromInitProps = () => {
        const props = window.__INIT_PROPS__ || null;
        if (!props) return null;
        return (props['/video/:id'] && props['/video/:id'].awemeDetail)
            || (props.detail && props.detail.awemeDetail)
            || null;
    };

    const fromSigiState = () => {
        const sigi = window.SIGI_STATE || null;
        const aweme = sigi && sigi.Aweme;
        if (!aweme) return null;
        if (aweme.detail && Array.isArray(aweme.detail.itemList) && aweme.detail.itemList.length) {
            return aweme.detail.itemList[0];
        }
        if (aweme.detail && aweme.detail.aweme_id) return aweme.detail;
        if (aweme.awemeDetail) return aweme.awemeDetail;
        if (Array.isArray(aweme.itemList) && aweme.itemList.length) return aweme.itemList[0];
        return null;
    };

    const pickEntry = (parsed) => {
        const entry = parsed && parsed['/video/:id'];
        if (!entry || !entry.aweme) return null;
        return (entry.aweme.detail && entry.aweme.detail.awemeDetail)
            || entry.aweme.awemeDetail
            || null;
    };

    const fromRenderData = () => {
        const script = document.getElementById('RENDER_DATA');
        if (!script || !script.textContent) return null;
        const wrapped = script.textContent.match(/decodeURIComponent\("([^"]+)"\)/);
        try {
            if (wrapped && wrapped[1]) {
                return pickEntry(JSON.parse(decodeURIComponent(wrapped[1])));
            }
            return pickEntry(JSON.parse(script.textContent));
        } catch (e) {
            return null;
        }
    };

    const fromJsonScripts = () => {
        const scripts = document.querySelectorAll('script[type="application/json"]');
        for (const script of scripts) {
            try {
                const found = pickEntry(JSON.parse(script.textContent || '{}'));
                if (found) return found;
            } catch (e) { /* next script */ }
        }
        return null;
    };

    const fromRawText = () => {
        const idMatch = document.body.innerText.match(/"aweme_id"\s*:\s*"(\d+)"/);
        if (!idMatch) return null;
        const urlMatch = document.documentElement.innerHTML.match(
            /"play_addr"\s*:\s*\{[^}]*"url_list"\s*:\s*\["([^"]+)"/i
        );
        if (!urlMatch) return null;
        return {
            aweme_id: idMatch[1],
            video: { play_addr: { url_list: [urlMatch[1]] } }
        };
    };

    return fromInitProps()
        || fromSigiState()
        || fromRenderData()
        || fromJsonScripts()
        || fromRawText()
        || null;
})()
"#;

/// Drives a real browser against the share page when the plain HTTP tiers
/// cannot get past the bot wall. Intercepted API responses win over DOM
/// scraping; both missing yields `Ok(None)`, not an error.
pub struct BrowserProbe {
    config: Arc<ResolverConfig>,
}

impl BrowserProbe {
    pub fn new(config: Arc<ResolverConfig>) -> Self {
        Self { config }
    }

    pub async fn probe(&self, url: &str, tag: &str) -> Result<Option<AwemeDetail>, ResolveError> {
        debug!(tag, url, "Launching headless browser probe");

        let browser_config = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg("--disable-blink-features=AutomationControlled")
            .build()
            .map_err(ResolveError::BrowserError)?;

        let (mut browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ResolveError::BrowserError(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        // The browser must come down on every exit path, so the actual work
        // happens in a helper and its result is only inspected afterwards.
        let outcome = self.run(&browser, url, tag).await;

        if let Err(e) = browser.close().await {
            warn!(tag, error = %e, "Browser close failed");
        }
        handler_task.abort();

        outcome
    }

    async fn run(
        &self,
        browser: &Browser,
        url: &str,
        tag: &str,
    ) -> Result<Option<AwemeDetail>, ResolveError> {
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ResolveError::BrowserError(e.to_string()))?;

        self.prepare_page(&page).await?;

        let captured: Arc<Mutex<Option<AwemeDetail>>> = Arc::new(Mutex::new(None));
        let listener = self.spawn_interceptor(&page, captured.clone(), tag).await?;

        let navigation =
            tokio::time::timeout(self.config.browser_navigation_timeout, page.goto(url)).await;
        match navigation {
            Ok(Ok(_)) => debug!(tag, "Navigation settled"),
            Ok(Err(e)) => warn!(tag, error = %e, "Navigation error, probing anyway"),
            Err(_) => warn!(tag, "Navigation timed out, probing anyway"),
        }

        // The page may fire its API calls late; poll before touching the DOM.
        for step in 0..self.config.browser_poll_steps {
            tokio::time::sleep(self.config.browser_poll_interval).await;
            if let Some(detail) = captured.lock().await.take() {
                info!(tag, step = step + 1, "Using intercepted API payload");
                listener.abort();
                return Ok(Some(detail));
            }
        }

        self.wait_for_markers(&page, tag).await;

        let evaluated = self.evaluate_extraction(&page, tag).await;
        listener.abort();

        // A response may still have landed while the DOM was being read.
        if let Some(detail) = captured.lock().await.take() {
            info!(tag, "Using late intercepted API payload");
            return Ok(Some(detail));
        }

        Ok(evaluated)
    }

    async fn prepare_page(&self, page: &Page) -> Result<(), ResolveError> {
        page.execute(
            SetUserAgentOverrideParams::builder()
                .user_agent(&self.config.desktop_user_agent)
                .accept_language(&self.config.accept_language)
                .build()
                .map_err(ResolveError::BrowserError)?,
        )
        .await
        .map_err(|e| ResolveError::BrowserError(e.to_string()))?;

        page.execute(SetDeviceMetricsOverrideParams::new(1280, 720, 1.0, false))
            .await
            .map_err(|e| ResolveError::BrowserError(e.to_string()))?;

        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH_SCRIPT))
            .await
            .map_err(|e| ResolveError::BrowserError(e.to_string()))?;

        page.execute(EnableParams::default())
            .await
            .map_err(|e| ResolveError::BrowserError(e.to_string()))?;

        Ok(())
    }

    /// First 200-status response on a detail-shaped API path wins; later
    /// matches never overwrite it.
    async fn spawn_interceptor(
        &self,
        page: &Page,
        captured: Arc<Mutex<Option<AwemeDetail>>>,
        tag: &str,
    ) -> Result<tokio::task::JoinHandle<()>, ResolveError> {
        let mut events = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| ResolveError::BrowserError(e.to_string()))?;

        let page = page.clone();
        let tag = tag.to_string();
        Ok(tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let response_url = event.response.url.as_str();
                if !API_MARKERS.iter().any(|m| response_url.contains(m)) {
                    continue;
                }
                if event.response.status != 200 {
                    continue;
                }
                if captured.lock().await.is_some() {
                    continue;
                }

                let params = GetResponseBodyParams::new(event.request_id.clone());
                let body = match page.execute(params).await {
                    Ok(body) if !body.base64_encoded => body.body.clone(),
                    _ => continue,
                };

                if let Some(detail) = parse_intercepted_body(&body) {
                    let mut slot = captured.lock().await;
                    if slot.is_none() {
                        debug!(tag = %tag, url = %response_url, "Intercepted API response");
                        *slot = Some(detail);
                    }
                }
            }
        }))
    }

    /// Wait for any known state carrier to show up. Expiry is tolerated; the
    /// extraction program runs regardless.
    async fn wait_for_markers(&self, page: &Page, tag: &str) {
        let deadline = tokio::time::Instant::now() + self.config.browser_marker_timeout;
        loop {
            match page.evaluate(MARKER_CHECK).await {
                Ok(result) => {
                    if result.into_value::<bool>().unwrap_or(false) {
                        return;
                    }
                }
                Err(e) => {
                    warn!(tag, error = %e, "Marker check evaluation failed");
                    return;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(tag, "Timed out waiting for page markers, extracting anyway");
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        }
    }

    async fn evaluate_extraction(&self, page: &Page, tag: &str) -> Option<AwemeDetail> {
        let result = match page.evaluate(EXTRACTION_PROGRAM).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tag, error = %e, "Extraction program failed");
                return None;
            }
        };

        let value: Value = result.into_value().ok()?;
        detail_from_loose_value(value, tag)
    }
}

fn parse_intercepted_body(body: &str) -> Option<AwemeDetail> {
    if body.trim().is_empty() {
        return None;
    }
    let parsed: Value = serde_json::from_str(body).ok()?;

    if let Some(detail) = parsed.get("aweme_detail") {
        if detail.is_object() {
            return serde_json::from_value(detail.clone()).ok();
        }
    }
    let first = parsed.pointer("/item_list/0")?;
    if first.is_object() {
        return serde_json::from_value(first.clone()).ok();
    }
    None
}

fn detail_from_loose_value(value: Value, tag: &str) -> Option<AwemeDetail> {
    if value.is_null() || !value.is_object() {
        return None;
    }
    if value.get("aweme_id").is_none() && value.get("video").is_none() {
        return None;
    }
    match serde_json::from_value::<AwemeDetail>(value) {
        Ok(detail) => {
            info!(tag, "In-page extraction produced a detail payload");
            Some(detail)
        }
        Err(e) => {
            warn!(tag, error = %e, "In-page payload did not decode");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intercepted_detail_body_parses() {
        let body = r#"{"aweme_detail":{"aweme_id":"11","desc":"d"}}"#;
        let detail = parse_intercepted_body(body).unwrap();
        assert_eq!(detail.aweme_id.as_deref(), Some("11"));
    }

    #[test]
    fn intercepted_item_list_body_parses() {
        let body = r#"{"item_list":[{"aweme_id":"22"}]}"#;
        let detail = parse_intercepted_body(body).unwrap();
        assert_eq!(detail.aweme_id.as_deref(), Some("22"));
    }

    #[test]
    fn empty_and_junk_bodies_yield_nothing() {
        assert!(parse_intercepted_body("").is_none());
        assert!(parse_intercepted_body("<html>").is_none());
        assert!(parse_intercepted_body(r#"{"status_code":0}"#).is_none());
    }

    #[test]
    fn loose_values_need_id_or_video() {
        assert!(detail_from_loose_value(Value::Null, "t").is_none());
        assert!(detail_from_loose_value(serde_json::json!({"x": 1}), "t").is_none());
        assert!(
            detail_from_loose_value(serde_json::json!({"aweme_id": "1"}), "t").is_some()
        );
    }
}
