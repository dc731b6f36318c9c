use std::fmt;
use std::pin::Pin;
use std::time::Instant;

use bytes::Bytes;
use futures::stream::{self, Stream};
use url::Url;

use crate::error::{NetError, NetworkError};
use crate::request::{HttpHeaders, Method, ReferrerPolicy};

/// HTTP response status code categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    /// 1xx - Informational
    Informational,
    /// 2xx - Success
    Success,
    /// 3xx - Redirection
    Redirection,
    /// 4xx - Client Error
    ClientError,
    /// 5xx - Server Error
    ServerError,
    /// Unknown status code
    Unknown,
}

impl StatusCategory {
    pub fn from_status(status: u16) -> Self {
        match status {
            100..=199 => StatusCategory::Informational,
            200..=299 => StatusCategory::Success,
            300..=399 => StatusCategory::Redirection,
            400..=499 => StatusCategory::ClientError,
            500..=599 => StatusCategory::ServerError,
            _ => StatusCategory::Unknown,
        }
    }
}

/// Response metadata relayed ahead of the body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub status_text: String,
    pub headers: HttpHeaders,
    /// Bytes read off the wire for the head; zero for fabricated heads
    pub encoded_data_length: i64,
}

impl ResponseHead {
    pub fn new(status: u16, status_text: &str) -> Self {
        Self {
            status,
            status_text: status_text.to_string(),
            headers: HttpHeaders::new(),
            encoded_data_length: 0,
        }
    }

    /// Head of a redirect the interception layer fabricates itself
    pub fn synthetic_redirect(status: u16, location: &Url) -> Self {
        let mut head = Self::new(status, "Internal Redirect");
        head.headers.set("Location", location.as_str());
        head.headers.set("Non-Authoritative-Reason", "WebRequest API");
        head
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.set(name, value);
        self
    }

    /// The raw status line, e.g. `HTTP/1.1 307 Internal Redirect`
    pub fn status_line(&self) -> String {
        format!("HTTP/1.1 {} {}", self.status, self.status_text)
    }

    pub fn status_category(&self) -> StatusCategory {
        StatusCategory::from_status(self.status)
    }

    pub fn is_redirection(&self) -> bool {
        self.status_category() == StatusCategory::Redirection
    }

    pub fn location(&self) -> Option<&str> {
        self.headers.get("Location")
    }

    pub fn referrer_policy_header(&self) -> Option<&str> {
        self.headers.get("Referrer-Policy")
    }
}

/// Streamed response body, passed through without inspection
pub struct ResponseBody {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, NetworkError>> + Send>>,
}

impl ResponseBody {
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, NetworkError>> + Send + 'static,
    {
        Self { inner: Box::pin(stream) }
    }

    /// A body made of a single chunk
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self::new(stream::once(async move { Ok(bytes) }))
    }

    pub fn into_stream(self) -> Pin<Box<dyn Stream<Item = Result<Bytes, NetworkError>> + Send>> {
        self.inner
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseBody { .. }")
    }
}

/// Everything a redirect changes on the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectInfo {
    pub status_code: u16,
    pub new_method: Method,
    pub new_url: Url,
    pub new_site_for_cookies: Option<Url>,
    pub new_referrer: Option<Url>,
    pub new_referrer_policy: ReferrerPolicy,
}

/// Inputs of a redirect computation, taken from the request being redirected
#[derive(Debug, Clone, Copy)]
pub struct RedirectSource<'a> {
    pub method: &'a Method,
    pub url: &'a Url,
    pub site_for_cookies: Option<&'a Url>,
    /// Whether the first-party URL follows the request across redirects
    pub update_first_party_url_on_redirect: bool,
    pub referrer_policy: ReferrerPolicy,
    pub referrer: Option<&'a Url>,
}

impl RedirectInfo {
    /// Computes the redirected request for a `status` redirect to `new_url`.
    ///
    /// 303 turns any non-HEAD request into a GET; 301 and 302 do the same
    /// for POST. A `Referrer-Policy` header on the redirect response
    /// replaces the request's policy before the new referrer is computed.
    pub fn compute(
        source: RedirectSource<'_>,
        status: u16,
        new_url: Url,
        referrer_policy_header: Option<&str>,
    ) -> Self {
        let new_method = match (status, source.method) {
            (303, method) if *method != Method::HEAD => Method::GET,
            (301 | 302, Method::POST) => Method::GET,
            (_, method) => method.clone(),
        };

        let new_site_for_cookies = if source.update_first_party_url_on_redirect {
            Some(new_url.clone())
        } else {
            source.site_for_cookies.cloned()
        };

        let new_referrer_policy = referrer_policy_header
            .and_then(ReferrerPolicy::from_header)
            .unwrap_or(source.referrer_policy);

        let new_referrer = source
            .referrer
            .and_then(|referrer| new_referrer_policy.compute_referrer(referrer, &new_url));

        Self {
            status_code: status,
            new_method,
            new_url,
            new_site_for_cookies,
            new_referrer,
            new_referrer_policy,
        }
    }
}

/// Final status of a load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionStatus {
    pub error_code: NetError,
    pub encoded_data_length: i64,
    pub encoded_body_length: i64,
    pub decoded_body_length: i64,
    pub completion_time: Instant,
}

impl CompletionStatus {
    pub fn new(error_code: NetError) -> Self {
        Self {
            error_code,
            encoded_data_length: 0,
            encoded_body_length: 0,
            decoded_body_length: 0,
            completion_time: Instant::now(),
        }
    }

    pub fn ok() -> Self {
        Self::new(NetError::Ok)
    }

    pub fn is_ok(&self) -> bool {
        self.error_code.is_ok()
    }
}

impl From<NetError> for CompletionStatus {
    fn from(error_code: NetError) -> Self {
        Self::new(error_code)
    }
}

impl From<&NetworkError> for CompletionStatus {
    fn from(error: &NetworkError) -> Self {
        Self::new(error.net_error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn source<'a>(method: &'a Method, from: &'a Url, referrer: Option<&'a Url>) -> RedirectSource<'a> {
        RedirectSource {
            method,
            url: from,
            site_for_cookies: None,
            update_first_party_url_on_redirect: false,
            referrer_policy: ReferrerPolicy::StrictOriginWhenCrossOrigin,
            referrer,
        }
    }

    #[test]
    fn test_synthetic_redirect_head() {
        let head = ResponseHead::synthetic_redirect(307, &url("https://example.com/clean"));
        assert_eq!(head.status_line(), "HTTP/1.1 307 Internal Redirect");
        assert_eq!(head.location(), Some("https://example.com/clean"));
        assert_eq!(head.headers.get("non-authoritative-reason"), Some("WebRequest API"));
        assert_eq!(head.encoded_data_length, 0);
        assert!(head.is_redirection());
    }

    #[test]
    fn test_redirect_method_changes() {
        let from = url("https://a.com/form");
        let to = url("https://a.com/done");

        let see_other = RedirectInfo::compute(source(&Method::PUT, &from, None), 303, to.clone(), None);
        assert_eq!(see_other.new_method, Method::GET);

        let head = RedirectInfo::compute(source(&Method::HEAD, &from, None), 303, to.clone(), None);
        assert_eq!(head.new_method, Method::HEAD);

        let found = RedirectInfo::compute(source(&Method::POST, &from, None), 302, to.clone(), None);
        assert_eq!(found.new_method, Method::GET);

        let temporary = RedirectInfo::compute(source(&Method::POST, &from, None), 307, to, None);
        assert_eq!(temporary.new_method, Method::POST);
    }

    #[test]
    fn test_redirect_referrer_and_site_for_cookies() {
        let from = url("https://a.com/page");
        let referrer = url("https://a.com/page?secret=1");
        let mut redirect = source(&Method::GET, &from, Some(&referrer));
        redirect.update_first_party_url_on_redirect = true;

        let info = RedirectInfo::compute(redirect, 302, url("https://b.com/x"), None);
        assert_eq!(info.new_referrer.unwrap().as_str(), "https://a.com/");
        assert_eq!(info.new_site_for_cookies.unwrap().as_str(), "https://b.com/x");

        let info = RedirectInfo::compute(redirect, 302, url("https://b.com/x"), Some("no-referrer"));
        assert_eq!(info.new_referrer, None);
        assert_eq!(info.new_referrer_policy, ReferrerPolicy::NoReferrer);
    }

    #[tokio::test]
    async fn test_body_passthrough() {
        let body = ResponseBody::from_bytes(Bytes::from_static(b"hello"));
        let chunks: Vec<_> = body.into_stream().collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap(), &Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_completion_from_error() {
        let status = CompletionStatus::from(&NetworkError::ClientDisconnected);
        assert_eq!(status.error_code, NetError::Aborted);
        assert!(CompletionStatus::ok().is_ok());
    }
}
