use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use bulwark_shields::site;
use url::{Origin, Url};

use crate::error::NetworkError;

/// Common HTTP methods
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    POST,
    PUT,
    DELETE,
    HEAD,
    OPTIONS,
    CONNECT,
    TRACE,
    PATCH,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::GET => write!(f, "GET"),
            Method::POST => write!(f, "POST"),
            Method::PUT => write!(f, "PUT"),
            Method::DELETE => write!(f, "DELETE"),
            Method::HEAD => write!(f, "HEAD"),
            Method::OPTIONS => write!(f, "OPTIONS"),
            Method::CONNECT => write!(f, "CONNECT"),
            Method::TRACE => write!(f, "TRACE"),
            Method::PATCH => write!(f, "PATCH"),
        }
    }
}

impl FromStr for Method {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "DELETE" => Ok(Method::DELETE),
            "HEAD" => Ok(Method::HEAD),
            "OPTIONS" => Ok(Method::OPTIONS),
            "CONNECT" => Ok(Method::CONNECT),
            "TRACE" => Ok(Method::TRACE),
            "PATCH" => Ok(Method::PATCH),
            other => Err(NetworkError::InvalidMethod(other.to_string())),
        }
    }
}

/// What a request loads, as reported by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    Font,
    SubResource,
    Object,
    Media,
    Worker,
    Prefetch,
    Favicon,
    Xhr,
    Ping,
    ServiceWorker,
    CspReport,
    PluginResource,
    NavigationPreload,
    /// The type could not be determined
    Unknown,
}

impl ResourceType {
    /// Frame navigations are governed by the navigation layer, not by the
    /// loader proxy
    pub fn is_frame(self) -> bool {
        matches!(self, ResourceType::MainFrame | ResourceType::SubFrame)
    }
}

impl Default for ResourceType {
    fn default() -> Self {
        ResourceType::Unknown
    }
}

/// Referrer policies, as in the Fetch specification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferrerPolicy {
    NoReferrerWhenDowngrade,
    NoReferrer,
    Origin,
    OriginWhenCrossOrigin,
    SameOrigin,
    StrictOrigin,
    StrictOriginWhenCrossOrigin,
    UnsafeUrl,
}

impl Default for ReferrerPolicy {
    fn default() -> Self {
        ReferrerPolicy::NoReferrerWhenDowngrade
    }
}

impl ReferrerPolicy {
    /// Parses a `Referrer-Policy` header value; the last recognized token
    /// wins
    pub fn from_header(value: &str) -> Option<Self> {
        value
            .split(',')
            .filter_map(|token| match token.trim().to_ascii_lowercase().as_str() {
                "no-referrer-when-downgrade" => Some(ReferrerPolicy::NoReferrerWhenDowngrade),
                "no-referrer" => Some(ReferrerPolicy::NoReferrer),
                "origin" => Some(ReferrerPolicy::Origin),
                "origin-when-cross-origin" => Some(ReferrerPolicy::OriginWhenCrossOrigin),
                "same-origin" => Some(ReferrerPolicy::SameOrigin),
                "strict-origin" => Some(ReferrerPolicy::StrictOrigin),
                "strict-origin-when-cross-origin" => Some(ReferrerPolicy::StrictOriginWhenCrossOrigin),
                "unsafe-url" => Some(ReferrerPolicy::UnsafeUrl),
                _ => None,
            })
            .last()
    }

    /// The referrer to send from `referrer` to `destination` under this
    /// policy
    pub fn compute_referrer(self, referrer: &Url, destination: &Url) -> Option<Url> {
        if !site::is_http_or_https(referrer) {
            return None;
        }
        let downgrade = referrer.scheme() == "https" && destination.scheme() != "https";
        let same_origin = site::same_origin(referrer, destination);
        let full = || strip_for_referrer(referrer);
        let origin = || site::origin_url(referrer);

        match self {
            ReferrerPolicy::NoReferrer => None,
            ReferrerPolicy::UnsafeUrl => full(),
            ReferrerPolicy::NoReferrerWhenDowngrade => {
                if downgrade {
                    None
                } else {
                    full()
                }
            }
            ReferrerPolicy::Origin => origin(),
            ReferrerPolicy::OriginWhenCrossOrigin => {
                if same_origin {
                    full()
                } else {
                    origin()
                }
            }
            ReferrerPolicy::SameOrigin => {
                if same_origin {
                    full()
                } else {
                    None
                }
            }
            ReferrerPolicy::StrictOrigin => {
                if downgrade {
                    None
                } else {
                    origin()
                }
            }
            ReferrerPolicy::StrictOriginWhenCrossOrigin => {
                if downgrade {
                    None
                } else if same_origin {
                    full()
                } else {
                    origin()
                }
            }
        }
    }
}

/// Referrers never carry credentials or a fragment
fn strip_for_referrer(url: &Url) -> Option<Url> {
    let mut stripped = url.clone();
    stripped.set_fragment(None);
    stripped.set_username("").ok()?;
    stripped.set_password(None).ok()?;
    Some(stripped)
}

/// Loader priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequestPriority {
    Throttled,
    Idle,
    Lowest,
    Low,
    Medium,
    Highest,
}

impl Default for RequestPriority {
    fn default() -> Self {
        RequestPriority::Lowest
    }
}

pub const REFERER: &str = "Referer";

/// Ordered header list with case-insensitive names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpHeaders {
    entries: Vec<(String, String)>,
}

impl HttpHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replaces the value if the header exists, keeping its position
    pub fn set(&mut self, name: &str, value: &str) {
        match self.entries.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.entries.push((name.to_string(), value.to_string())),
        }
    }

    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// Sets every header of `other` on `self`
    pub fn merge_from(&mut self, other: &HttpHeaders) {
        for (name, value) in other.iter() {
            self.set(name, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A request as seen by the loader layer
#[derive(Debug, Clone)]
pub struct ResourceRequest {
    pub method: Method,
    pub url: Url,
    /// Origin of the document that started the request; `None` for
    /// browser-initiated loads
    pub request_initiator: Option<Origin>,
    pub referrer: Option<Url>,
    pub referrer_policy: ReferrerPolicy,
    pub resource_type: ResourceType,
    pub headers: HttpHeaders,
    pub cors_exempt_headers: HttpHeaders,
    pub body: Option<Bytes>,
    pub site_for_cookies: Option<Url>,
    pub update_first_party_url_on_redirect: bool,
    pub priority: RequestPriority,
}

impl ResourceRequest {
    /// Create a new request with the specified method and URL
    pub fn new(method: Method, url: &str) -> Result<Self, NetworkError> {
        let url = Url::parse(url).map_err(NetworkError::UrlError)?;
        Ok(Self {
            method,
            url,
            request_initiator: None,
            referrer: None,
            referrer_policy: ReferrerPolicy::default(),
            resource_type: ResourceType::SubResource,
            headers: HttpHeaders::new(),
            cors_exempt_headers: HttpHeaders::new(),
            body: None,
            site_for_cookies: None,
            update_first_party_url_on_redirect: false,
            priority: RequestPriority::default(),
        })
    }

    /// Set the initiator origin from a URL
    pub fn with_initiator(mut self, initiator: &str) -> Result<Self, NetworkError> {
        self.request_initiator = Some(Url::parse(initiator)?.origin());
        Ok(self)
    }

    pub fn with_referrer(mut self, referrer: &str) -> Result<Self, NetworkError> {
        self.referrer = Some(Url::parse(referrer)?);
        Ok(self)
    }

    pub fn with_referrer_policy(mut self, policy: ReferrerPolicy) -> Self {
        self.referrer_policy = policy;
        self
    }

    pub fn with_resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = resource_type;
        self
    }

    /// Add a header to the request
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Set the request body
    pub fn with_body<T: AsRef<[u8]>>(mut self, body: T) -> Self {
        self.body = Some(Bytes::copy_from_slice(body.as_ref()));
        self
    }

    pub fn with_site_for_cookies(mut self, site: &str) -> Result<Self, NetworkError> {
        self.site_for_cookies = Some(Url::parse(site)?);
        Ok(self)
    }

    /// The initiator as a URL, if it is a tuple origin
    pub fn initiator_url(&self) -> Option<Url> {
        self.request_initiator
            .as_ref()
            .filter(|origin| origin.is_tuple())
            .and_then(|origin| Url::parse(&origin.ascii_serialization()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_request_creation() {
        let request = ResourceRequest::new(Method::GET, "https://example.com")
            .unwrap()
            .with_initiator("https://example.net/page")
            .unwrap();
        assert_eq!(request.method, Method::GET);
        assert_eq!(request.url.as_str(), "https://example.com/");
        assert_eq!(request.initiator_url().unwrap().as_str(), "https://example.net/");
    }

    #[test]
    fn test_invalid_url() {
        assert!(matches!(
            ResourceRequest::new(Method::GET, "not a url"),
            Err(NetworkError::UrlError(_))
        ));
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("get".parse::<Method>().unwrap(), Method::GET);
        assert_eq!(Method::POST.to_string(), "POST");
        assert!("BREW".parse::<Method>().is_err());
    }

    #[test]
    fn test_headers_case_insensitive() {
        let mut headers = HttpHeaders::new();
        headers.set("Accept", "text/html");
        headers.set("accept", "*/*");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("ACCEPT"), Some("*/*"));

        let mut other = HttpHeaders::new();
        other.set("X-Test", "1");
        headers.merge_from(&other);
        headers.remove("accept");
        assert_eq!(headers.iter().collect::<Vec<_>>(), vec![("X-Test", "1")]);
    }

    #[test]
    fn test_referrer_policies() {
        let referrer = url("https://user:pw@a.com/page?q=1#frag");
        let same = url("https://a.com/other");
        let cross = url("https://b.com/");
        let insecure = url("http://b.com/");

        assert_eq!(
            ReferrerPolicy::StrictOriginWhenCrossOrigin.compute_referrer(&referrer, &same).unwrap().as_str(),
            "https://a.com/page?q=1"
        );
        assert_eq!(
            ReferrerPolicy::StrictOriginWhenCrossOrigin.compute_referrer(&referrer, &cross).unwrap().as_str(),
            "https://a.com/"
        );
        assert_eq!(ReferrerPolicy::StrictOriginWhenCrossOrigin.compute_referrer(&referrer, &insecure), None);
        assert_eq!(ReferrerPolicy::NoReferrerWhenDowngrade.compute_referrer(&referrer, &insecure), None);
        assert_eq!(ReferrerPolicy::NoReferrer.compute_referrer(&referrer, &same), None);
        assert_eq!(ReferrerPolicy::SameOrigin.compute_referrer(&referrer, &cross), None);
    }

    #[test]
    fn test_referrer_policy_header() {
        assert_eq!(
            ReferrerPolicy::from_header("no-referrer, strict-origin"),
            Some(ReferrerPolicy::StrictOrigin)
        );
        assert_eq!(ReferrerPolicy::from_header("bogus"), None);
    }
}
