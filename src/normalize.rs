use crate::ResolveError;
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

static URL_IN_TEXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)https?://[^\s]+").expect("url pattern"));

/// Pull a fetchable https URL out of free-form pasted text. Share sheets wrap
/// the link in marketing copy, so the first http(s) run wins.
pub fn normalize_input(input: &str) -> Result<String, ResolveError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ResolveError::NoUrlFound);
    }

    let candidate = URL_IN_TEXT
        .find(trimmed)
        .map(|m| m.as_str())
        .ok_or(ResolveError::NoUrlFound)?;

    if let Some(rest) = candidate.strip_prefix("http://") {
        Ok(format!("https://{rest}"))
    } else {
        Ok(candidate.to_string())
    }
}

/// Canonical cache-key form of a URL: https scheme, query and fragment
/// stripped, single trailing slash removed, lower-cased. Parse failures fall
/// back to a string-level strip; key derivation must never raise.
pub fn cache_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            let _ = parsed.set_scheme("https");
            let mut normalized = parsed.to_string();
            if normalized.ends_with('/') {
                normalized.pop();
            }
            normalized.to_lowercase()
        }
        Err(_) => {
            let stripped = url.split(['?', '#']).next().unwrap_or(url);
            stripped.trim_end_matches('/').to_lowercase()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_url_from_pasted_text() {
        let input = "Xem video này! https://v.douyin.com/ABC123/ nhé";
        assert_eq!(normalize_input(input).unwrap(), "https://v.douyin.com/ABC123/");
    }

    #[test]
    fn forces_https_scheme() {
        assert_eq!(
            normalize_input("http://www.douyin.com/video/123").unwrap(),
            "https://www.douyin.com/video/123"
        );
    }

    #[test]
    fn rejects_input_without_url() {
        assert!(matches!(normalize_input("no link here"), Err(ResolveError::NoUrlFound)));
        assert!(matches!(normalize_input("   "), Err(ResolveError::NoUrlFound)));
        assert!(matches!(normalize_input("ftp://example.com/x"), Err(ResolveError::NoUrlFound)));
    }

    #[test]
    fn cache_key_ignores_volatile_parts() {
        let base = cache_key("https://www.douyin.com/video/123");
        assert_eq!(cache_key("https://www.douyin.com/video/123?utm_source=share"), base);
        assert_eq!(cache_key("https://www.douyin.com/video/123#comment"), base);
        assert_eq!(cache_key("https://www.douyin.com/video/123/"), base);
        assert_eq!(cache_key("HTTPS://WWW.DOUYIN.COM/video/123"), base);
        assert_eq!(cache_key("http://www.douyin.com/video/123"), base);
    }

    #[test]
    fn cache_key_survives_malformed_input() {
        assert_eq!(cache_key("not a url?x=1#y/"), "not a url");
    }
}
