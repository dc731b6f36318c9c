#![no_main]

use arbitrary::Arbitrary;
use bulwark_shields::{maybe_rewrite_referrer, PolicyLevel, RewrittenReferrer};
use libfuzzer_sys::fuzz_target;
use url::Url;

#[derive(Debug, Arbitrary)]
struct Input {
    referrer: String,
    target: String,
    block: bool,
    exempt: Vec<String>,
}

fuzz_target!(|input: Input| {
    let (Ok(referrer), Ok(target)) = (Url::parse(&input.referrer), Url::parse(&input.target)) else {
        return;
    };
    let level = if input.block { PolicyLevel::Block } else { PolicyLevel::Ask };

    match maybe_rewrite_referrer(Some(&referrer), &target, level, &input.exempt) {
        // A truncated referrer never carries a path, query or credentials
        Some(RewrittenReferrer::Truncated(url)) => {
            assert_eq!(url.path(), "/");
            assert!(url.query().is_none());
            assert!(url.username().is_empty());
        }
        Some(RewrittenReferrer::Cleared) | None => {}
    }
});
