use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use url::Url;

use crate::error::ExtractError;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A cookie copied out of the browser context. The copy is a one-shot
/// snapshot; it is never refreshed once the plain HTTP client owns it.
#[derive(Debug, Clone)]
pub struct BridgedCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
}

/// Finds the session cookie among the cookies visible to the browser
/// context: exact name match first, case-insensitive fallback second,
/// first non-empty value wins.
pub fn bridge_cookie(cookies: &[BridgedCookie], name: &str) -> Result<String, ExtractError> {
    if let Some(cookie) = cookies.iter().find(|c| c.name == name && !c.value.is_empty()) {
        return Ok(cookie.value.clone());
    }

    let lowered = name.to_lowercase();
    if let Some(cookie) = cookies
        .iter()
        .find(|c| c.name.to_lowercase() == lowered && !c.value.is_empty())
    {
        return Ok(cookie.value.clone());
    }

    Err(ExtractError::MissingCredential {
        name: name.to_owned(),
    })
}

/// Header set for one authenticated API call. Recomputed per call: the
/// referer differs between the detail page and the viewer page, and the
/// origin is derived from it.
pub fn api_headers(
    cookie_name: &str,
    bridged_cookie: &str,
    referer: &str,
    accept_language: &str,
) -> anyhow::Result<HeaderMap> {
    let referer_url = Url::parse(referer).with_context(|| format!("parse referer: {referer}"))?;
    if !referer_url.has_host() {
        anyhow::bail!("referer must have a host: {referer}");
    }
    let origin = referer_url.origin().ascii_serialization();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_str(accept_language).context("accept-language header value")?,
    );
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded; charset=UTF-8"),
    );
    headers.insert(
        header::ORIGIN,
        HeaderValue::from_str(&origin).context("origin header value")?,
    );
    headers.insert(
        header::REFERER,
        HeaderValue::from_str(referer).context("referer header value")?,
    );
    headers.insert(
        HeaderName::from_static("x-requested-with"),
        HeaderValue::from_static("XMLHttpRequest"),
    );

    let session_header = HeaderName::from_lowercase(cookie_name.to_lowercase().as_bytes())
        .with_context(|| format!("session header name from cookie: {cookie_name}"))?;
    headers.insert(
        session_header,
        HeaderValue::from_str(bridged_cookie).context("session header value")?,
    );

    Ok(headers)
}

/// Plain HTTP client owning a private copy of the browser session's
/// cookies. Built once after discovery completes; a session expiring
/// mid-download is a fatal condition, not a refresh trigger.
pub fn bridged_client(cookies: &[BridgedCookie]) -> anyhow::Result<reqwest::Client> {
    let jar = reqwest::cookie::Jar::default();
    for cookie in cookies {
        if cookie.name.is_empty() || cookie.domain.is_empty() {
            continue;
        }
        let domain = cookie.domain.trim_start_matches('.');
        let scope = format!("https://{domain}/");
        let Ok(scope_url) = Url::parse(&scope) else {
            tracing::debug!(domain = %cookie.domain, "skipping cookie with unusable domain");
            continue;
        };
        let path = if cookie.path.is_empty() {
            "/"
        } else {
            cookie.path.as_str()
        };
        jar.add_cookie_str(
            &format!(
                "{}={}; Domain={}; Path={}",
                cookie.name, cookie.value, cookie.domain, path
            ),
            &scope_url,
        );
    }

    reqwest::Client::builder()
        .cookie_provider(Arc::new(jar))
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(60))
        .build()
        .context("build bridged http client")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, value: &str) -> BridgedCookie {
        BridgedCookie {
            name: name.to_owned(),
            value: value.to_owned(),
            domain: "example.com".to_owned(),
            path: "/".to_owned(),
        }
    }

    #[test]
    fn bridge_cookie_prefers_exact_name() {
        let cookies = vec![cookie("botureadkernel", "lower"), cookie("BotuReadKernel", "exact")];
        let value = bridge_cookie(&cookies, "BotuReadKernel").expect("cookie");
        assert_eq!(value, "exact");
    }

    #[test]
    fn bridge_cookie_falls_back_to_case_insensitive_match() {
        let cookies = vec![cookie("other", "x"), cookie("BOTUREADKERNEL", "fallback")];
        let value = bridge_cookie(&cookies, "BotuReadKernel").expect("cookie");
        assert_eq!(value, "fallback");
    }

    #[test]
    fn bridge_cookie_skips_empty_values() {
        let cookies = vec![cookie("BotuReadKernel", ""), cookie("botureadkernel", "nonempty")];
        let value = bridge_cookie(&cookies, "BotuReadKernel").expect("cookie");
        assert_eq!(value, "nonempty");
    }

    #[test]
    fn bridge_cookie_fails_without_a_match() {
        let cookies = vec![cookie("unrelated", "x")];
        let err = bridge_cookie(&cookies, "BotuReadKernel").expect_err("no cookie");
        assert!(matches!(err, ExtractError::MissingCredential { ref name } if name == "BotuReadKernel"));
    }

    #[test]
    fn api_headers_bind_the_session_cookie() {
        let headers = api_headers(
            "BotuReadKernel",
            "secret",
            "https://example.com/jc/reader/ABC",
            "zh-CN,zh;q=0.9",
        )
        .expect("headers");

        assert_eq!(headers.get("botureadkernel").map(|v| v.as_bytes()), Some(&b"secret"[..]));
        assert_eq!(
            headers.get(header::ORIGIN).map(|v| v.as_bytes()),
            Some(&b"https://example.com"[..])
        );
        assert_eq!(
            headers.get(header::REFERER).map(|v| v.as_bytes()),
            Some(&b"https://example.com/jc/reader/ABC"[..])
        );
        assert_eq!(
            headers.get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
            Some(&b"application/x-www-form-urlencoded; charset=UTF-8"[..])
        );
    }

    #[test]
    fn api_headers_keep_a_non_default_port_in_the_origin() {
        let headers = api_headers(
            "BotuReadKernel",
            "secret",
            "http://127.0.0.1:8443/viewer/X",
            "en",
        )
        .expect("headers");

        assert_eq!(
            headers.get(header::ORIGIN).map(|v| v.as_bytes()),
            Some(&b"http://127.0.0.1:8443"[..])
        );
    }
}
