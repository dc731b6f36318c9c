//! Referrer capping for subresource loads under maximum privacy.
//!
//! Cross-origin subresource requests get the referrer truncated to its
//! origin, the same result as a `strict-origin-when-cross-origin` policy at
//! the origin boundary. More restrictive page policies are applied by the
//! loader before this runs, so the cap never loosens anything.

use url::Url;

use crate::settings::PolicyLevel;
use crate::site;

/// Outcome of a referrer rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewrittenReferrer {
    /// Send only the origin of the original referrer.
    Truncated(Url),
    /// Send no referrer at all (secure referrer to an insecure target, or a
    /// referrer without a tuple origin).
    Cleared,
}

impl RewrittenReferrer {
    /// The referrer to put on the request, `None` meaning no header.
    pub fn into_url(self) -> Option<Url> {
        match self {
            Self::Truncated(url) => Some(url),
            Self::Cleared => None,
        }
    }

    pub fn as_url(&self) -> Option<&Url> {
        match self {
            Self::Truncated(url) => Some(url),
            Self::Cleared => None,
        }
    }
}

/// Whether two URLs are same-origin. Also keeps an HTTPS referrer from
/// being considered for an HTTP destination on the same host.
pub fn is_same_origin_navigation(referrer: &Url, target: &Url) -> bool {
    site::same_origin(referrer, target)
}

/// Decides whether the referrer for a request to `target_url` must change.
///
/// Returns `None` when the referrer is kept as is.
pub fn maybe_rewrite_referrer(
    current_referrer: Option<&Url>,
    target_url: &Url,
    policy_level: PolicyLevel,
    exempt_domains: &[String],
) -> Option<RewrittenReferrer> {
    if !policy_level.is_maximum_privacy() {
        return None;
    }

    let referrer = current_referrer?;

    if is_same_origin_navigation(referrer, target_url) {
        return None;
    }

    if exempt_domains
        .iter()
        .any(|domain| site::domain_is(referrer, domain))
    {
        return None;
    }

    Some(sanitize_for_request(target_url, referrer))
}

/// Applies `strict-origin-when-cross-origin` to the origin of `referrer`
/// for a cross-origin request to `target_url`.
fn sanitize_for_request(target_url: &Url, referrer: &Url) -> RewrittenReferrer {
    if !site::is_http_or_https(target_url) || !site::is_http_or_https(referrer) {
        return RewrittenReferrer::Cleared;
    }
    if referrer.scheme() == "https" && target_url.scheme() == "http" {
        return RewrittenReferrer::Cleared;
    }
    match site::origin_url(referrer) {
        Some(origin) => {
            log::debug!("Capping referrer {} to {} for {}", referrer, origin, target_url);
            RewrittenReferrer::Truncated(origin)
        }
        None => RewrittenReferrer::Cleared,
    }
}
