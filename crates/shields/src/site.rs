//! Origin and site comparisons used by the shields policies.
//!
//! "Site" here means the registrable domain (eTLD+1) as computed from the
//! public suffix list, private registries included.

use url::{Host, Url};

/// Returns true for `http` and `https` URLs.
pub fn is_http_or_https(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

/// Whether the URL's host is `domain` or a subdomain of it.
///
/// The comparison is ASCII case-insensitive and ignores a trailing dot on
/// either side. IP hosts only match themselves.
pub fn domain_is(url: &Url, domain: &str) -> bool {
    let host = match url.host() {
        Some(Host::Domain(host)) => host,
        Some(_) => return url.host_str().map_or(false, |h| h == domain),
        None => return false,
    };
    host_matches_domain(host, domain)
}

/// Host-string form of [`domain_is`].
pub fn host_matches_domain(host: &str, domain: &str) -> bool {
    let host = host.trim_end_matches('.');
    let domain = domain.trim_end_matches('.');
    if domain.is_empty() || host.len() < domain.len() {
        return false;
    }
    if host.eq_ignore_ascii_case(domain) {
        return true;
    }
    let split = host.len() - domain.len();
    split > 0
        && host.as_bytes()[split - 1] == b'.'
        && host.is_char_boundary(split)
        && host[split..].eq_ignore_ascii_case(domain)
}

/// The registrable domain of a host, or `None` for IP addresses, single
/// label hosts and bare public suffixes.
pub fn registrable_domain(host: &str) -> Option<String> {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.parse::<std::net::IpAddr>().is_ok() {
        return None;
    }
    psl::domain_str(&host).map(str::to_string)
}

/// The registrable domain of a URL's host.
pub fn registrable_domain_of(url: &Url) -> Option<String> {
    match url.host() {
        Some(Host::Domain(host)) => registrable_domain(host),
        _ => None,
    }
}

/// Same-site check: both URLs share a registrable domain, or, when either
/// has none, both have the identical non-empty host.
pub fn same_domain_or_host(a: &Url, b: &Url) -> bool {
    let (host_a, host_b) = match (a.host_str(), b.host_str()) {
        (Some(x), Some(y)) if !x.is_empty() && !y.is_empty() => (x, y),
        _ => return false,
    };
    match (registrable_domain_of(a), registrable_domain_of(b)) {
        (Some(x), Some(y)) => x == y,
        _ => host_a.eq_ignore_ascii_case(host_b),
    }
}

/// Tuple-origin equality. Opaque origins are never same-origin with
/// anything.
pub fn same_origin(a: &Url, b: &Url) -> bool {
    let (origin_a, origin_b) = (a.origin(), b.origin());
    origin_a.is_tuple() && origin_a == origin_b
}

/// The origin of `url` as a URL (`scheme://host[:port]/`), or `None` when
/// the origin is opaque.
pub fn origin_url(url: &Url) -> Option<Url> {
    let origin = url.origin();
    if !origin.is_tuple() {
        return None;
    }
    Url::parse(&origin.ascii_serialization()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_domain_is() {
        assert!(domain_is(&url("https://www.instagram.com/"), "instagram.com"));
        assert!(domain_is(&url("https://instagram.com/"), "instagram.com"));
        assert!(domain_is(&url("https://INSTAGRAM.com./"), "instagram.com"));
        assert!(!domain_is(&url("https://notinstagram.com/"), "instagram.com"));
        assert!(!domain_is(&url("https://example.com/"), "instagram.com"));
        assert!(!domain_is(&url("data:text/plain,hi"), "instagram.com"));
    }

    #[test]
    fn test_registrable_domain() {
        assert_eq!(registrable_domain("www.example.com").as_deref(), Some("example.com"));
        assert_eq!(registrable_domain("a.b.example.co.uk").as_deref(), Some("example.co.uk"));
        assert_eq!(registrable_domain("127.0.0.1"), None);
    }

    #[test]
    fn test_same_site() {
        assert!(same_domain_or_host(
            &url("https://sub.example.com/path"),
            &url("https://example.com/?fbclid=1")
        ));
        assert!(!same_domain_or_host(
            &url("https://example.net"),
            &url("https://example.com/")
        ));
        assert!(same_domain_or_host(
            &url("http://127.0.0.1:8080/"),
            &url("https://127.0.0.1/")
        ));
    }

    #[test]
    fn test_origin_url() {
        assert_eq!(
            origin_url(&url("https://hello.brianbondy.com/about?x=1")).unwrap().as_str(),
            "https://hello.brianbondy.com/"
        );
        assert_eq!(
            origin_url(&url("http://example.com:8080/a")).unwrap().as_str(),
            "http://example.com:8080/"
        );
        assert!(origin_url(&url("data:text/plain,hi")).is_none());
    }

    #[test]
    fn test_same_origin() {
        assert!(same_origin(&url("https://a.com/x"), &url("https://a.com/y")));
        assert!(!same_origin(&url("https://a.com/x"), &url("http://a.com/x")));
        assert!(!same_origin(&url("data:text/plain,a"), &url("data:text/plain,a")));
    }
}
