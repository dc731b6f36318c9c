//! Removal of click-attribution and marketing parameters from URL queries.
//!
//! The query string is handled as raw text: it is split on `&`, each segment
//! is inspected without percent-decoding, and the surviving segments are
//! joined back untouched. Parsing the query with a form-urlencoded parser
//! would normalize it and break URLs that rely on unusual encodings.

use std::collections::HashMap;
use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

use crate::site;

/// Parameters removed wherever they appear.
pub const SIMPLE_QUERY_TRACKERS: &[&str] = &[
    "fbclid",
    "gclid",
    "msclkid",
    "mc_eid",
    "dclid",
    "oly_anon_id",
    "oly_enc_id",
    "_openstat",
    "vero_conv",
    "vero_id",
    "wickedid",
    "yclid",
    "__s",
    "rb_clickid",
    "s_cid",
    "ml_subscriber",
    "ml_subscriber_hash",
    "twclid",
    "gbraid",
    "wbraid",
    "_hsenc",
    "__hssc",
    "__hstc",
    "__hsfp",
    "hsCtaTracking",
    "oft_id",
    "oft_k",
    "oft_lk",
    "oft_d",
    "oft_c",
    "oft_ck",
    "oft_ids",
    "oft_sk",
    "ss_email_id",
    "bsft_uid",
    "bsft_clkid",
    "guce_referrer",
    "guce_referrer_sig",
    "vgo_ee",
];

/// Parameters removed only on the given domain and its subdomains.
pub const SCOPED_QUERY_TRACKERS: &[(&str, &str)] = &[
    ("igshid", "instagram.com"),
    ("ref_src", "twitter.com"),
    ("ref_url", "twitter.com"),
];

/// Parameters removed unless the full URL matches the pattern.
pub const CONDITIONAL_QUERY_TRACKERS: &[(&str, &str)] =
    &[("mkt_tok", "([uU]nsubscribe|emailWebview)")];

lazy_static! {
    static ref SIMPLE: HashSet<&'static str> = SIMPLE_QUERY_TRACKERS.iter().copied().collect();
    static ref SCOPED: HashMap<&'static str, &'static str> =
        SCOPED_QUERY_TRACKERS.iter().copied().collect();
    static ref CONDITIONAL: HashMap<&'static str, Regex> = CONDITIONAL_QUERY_TRACKERS
        .iter()
        .map(|(key, pattern)| (*key, Regex::new(pattern).expect("static tracker pattern")))
        .collect();
}

/// Coarse classification of a removed parameter, used for per-tab counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackingQueryType {
    Utm,
    Fbclid,
    Gclid,
    Dclid,
    Twclid,
    Igshid,
    MktTok,
    Etc,
}

impl TrackingQueryType {
    pub fn from_key(key: &str) -> Self {
        match key {
            "utm_source" => Self::Utm,
            "fbclid" => Self::Fbclid,
            "gclid" => Self::Gclid,
            "dclid" => Self::Dclid,
            "twclid" => Self::Twclid,
            "igshid" => Self::Igshid,
            "mkt_tok" => Self::MktTok,
            _ => Self::Etc,
        }
    }
}

/// A URL with tracking parameters removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilteredUrl {
    /// The rewritten URL; only the query differs from the input.
    pub url: Url,
    /// Keys of the removed segments, in query order.
    pub removed: Vec<String>,
}

fn is_tracker(key: &str, url: &Url) -> bool {
    if SIMPLE.contains(key) {
        return true;
    }
    if let Some(domain) = SCOPED.get(key) {
        if site::domain_is(url, domain) {
            return true;
        }
    }
    match CONDITIONAL.get(key) {
        Some(keep_pattern) => !keep_pattern.is_match(url.as_str()),
        None => false,
    }
}

/// Strips tracking segments from `query`, the raw query of `url`.
///
/// Returns the cleaned query when at least one segment was removed, and
/// appends the removed keys to `removed`. A segment is only a candidate when
/// splitting it on `=` yields at least two non-empty pieces; the first one
/// is the key.
pub fn strip_query_parameters(query: &str, url: &Url, removed: &mut Vec<String>) -> Option<String> {
    let mut kept: Vec<&str> = Vec::new();
    let mut disallowed = 0usize;

    for segment in query.split('&') {
        let mut pieces = segment.split('=').filter(|piece| !piece.is_empty());
        let key = pieces.next().unwrap_or("");
        let has_value = pieces.next().is_some();

        if has_value && is_tracker(key, url) {
            disallowed += 1;
            removed.push(key.to_string());
        } else {
            kept.push(segment);
        }
    }

    if disallowed > 0 {
        Some(kept.join("&"))
    } else {
        None
    }
}

/// Removes tracking parameters from `url`, leaving every other component
/// untouched. Returns `None` when nothing was removed.
pub fn apply_query_filter(url: &Url) -> Option<FilteredUrl> {
    let query = url.query()?;
    let mut removed = Vec::new();
    let clean_query = strip_query_parameters(query, url, &mut removed)?;
    if clean_query.len() >= query.len() {
        return None;
    }

    let mut cleaned = url.clone();
    if clean_query.is_empty() {
        cleaned.set_query(None);
    } else {
        cleaned.set_query(Some(&clean_query));
    }
    log::debug!("Stripped query trackers {:?} from {}", removed, url);
    Some(FilteredUrl { url: cleaned, removed })
}
