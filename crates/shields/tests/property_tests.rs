//! Property tests for the query filter.

use bulwark_shields::apply_query_filter;
use proptest::prelude::*;
use url::Url;

const TRACKERS: &[&str] = &["fbclid", "gclid", "msclkid", "__s", "twclid", "mkt_tok", "igshid"];
const ORDINARY: &[&str] = &["q", "page", "id", "lang", "fbcid", "ref", "utm"];
const MIXED: &[&str] = &[
    "fbclid", "gclid", "msclkid", "__s", "twclid", "mkt_tok", "igshid", "q", "page", "id", "lang", "fbcid", "ref",
    "utm",
];

// Strategy: one query segment, possibly malformed
fn arb_segment(keys: &'static [&'static str]) -> impl Strategy<Value = String> {
    (prop::sample::select(keys), "[a-z0-9]{0,6}", prop::bool::ANY).prop_map(|(key, value, with_eq)| {
        if with_eq {
            format!("{}={}", key, value)
        } else {
            key.to_string()
        }
    })
}

fn arb_query(keys: &'static [&'static str]) -> impl Strategy<Value = String> {
    prop::collection::vec(arb_segment(keys), 0..8).prop_map(|segments| segments.join("&"))
}

fn url_with(query: &str) -> Url {
    Url::parse(&format!("https://example.com/path?{}", query)).unwrap()
}

proptest! {
    /// Property: a cleaned URL has nothing left to clean
    #[test]
    fn proptest_filter_is_idempotent(query in arb_query(MIXED)) {
        if let Some(filtered) = apply_query_filter(&url_with(&query)) {
            prop_assert!(apply_query_filter(&filtered.url).is_none());
        }
    }

    /// Property: queries without trackers are never rewritten
    #[test]
    fn proptest_ordinary_queries_untouched(query in arb_query(ORDINARY)) {
        prop_assert!(apply_query_filter(&url_with(&query)).is_none());
    }

    /// Property: only tracker keys are removed and the rest keeps its order
    #[test]
    fn proptest_removes_only_trackers(query in arb_query(MIXED)) {
        let url = url_with(&query);
        if let Some(filtered) = apply_query_filter(&url) {
            prop_assert!(!filtered.removed.is_empty());
            for key in &filtered.removed {
                prop_assert!(TRACKERS.contains(&key.as_str()));
            }
            let kept = filtered.url.query().unwrap_or("");
            prop_assert!(kept.len() < query.len());
            let mut remaining = query.split('&');
            for segment in kept.split('&').filter(|s| !s.is_empty()) {
                prop_assert!(remaining.any(|original| original == segment));
            }
            prop_assert_eq!(filtered.url.path(), url.path());
        }
    }

    /// Property: arbitrary printable queries never panic
    #[test]
    fn proptest_arbitrary_query_never_panics(query in "[ -~]{0,40}") {
        if let Ok(url) = Url::parse(&format!("https://example.com/?{}", query)) {
            if let Some(filtered) = apply_query_filter(&url) {
                let before = url.query().unwrap_or("").len();
                let after = filtered.url.query().unwrap_or("").len();
                prop_assert!(after < before);
            }
        }
    }
}
