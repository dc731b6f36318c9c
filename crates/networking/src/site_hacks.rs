//! The before-request decision pipeline.
//!
//! Runs the referrer cap and the query filter against a fresh hop context
//! and stores their results in it. Nothing here touches the request itself.

use bulwark_shields::{
    apply_query_filter, maybe_rewrite_referrer, site, PolicyLevel, RewrittenReferrer, ShieldsConfig,
};
use url::Url;

use crate::context::RequestContext;
use crate::request::{Method, REFERER};
use crate::telemetry::TrackerReportSink;

/// Caps the referrer of cross-origin subresource loads on maximum-privacy
/// pages. Returns true when a rewrite was recorded.
///
/// The `Referer` header edit is recorded too, so a loader that is already
/// bound learns of the cap when it follows a redirect.
pub fn apply_potential_referrer_block(ctx: &mut RequestContext, config: &ShieldsConfig) -> bool {
    if ctx.referrers_allowed {
        return false;
    }
    if ctx
        .tab_origin
        .as_ref()
        .map_or(false, |origin| config.is_extension_scheme(origin))
    {
        return false;
    }
    // Frame navigations are handled by the navigation layer
    if ctx.resource_type.is_frame() {
        return false;
    }

    let Some(rewritten) = maybe_rewrite_referrer(
        ctx.referrer.as_ref(),
        &ctx.request_url,
        PolicyLevel::Block,
        &config.referrer_exempt_domains,
    ) else {
        return false;
    };

    let cleared = rewritten == RewrittenReferrer::Cleared;
    if !ctx.record_referrer(rewritten) {
        return false;
    }
    if cleared {
        ctx.remove_header(REFERER);
    } else {
        ctx.set_header(REFERER);
    }
    true
}

/// Runs the query filter if this hop is in scope for it. Returns true when
/// a cleaned URL was recorded.
pub fn apply_potential_query_string_filter(ctx: &mut RequestContext) -> bool {
    if !ctx.tracking_blocker_enabled {
        return false;
    }
    if ctx.method != Method::GET {
        return false;
    }

    match &ctx.lineage.redirect_source {
        Some(source) => {
            // Redirects we triggered are already clean
            if ctx.lineage.internal_redirect {
                return false;
            }
            if site::same_domain_or_host(source, &ctx.request_url) {
                return false;
            }
        }
        None => {
            if let Some(initiator) = &ctx.initiator_url {
                if site::same_domain_or_host(initiator, &ctx.request_url) {
                    return false;
                }
            }
        }
    }

    match apply_query_filter(&ctx.request_url) {
        Some(filtered) => ctx.record_filtered_url(filtered),
        None => false,
    }
}

/// Runs the whole pipeline for one hop. Returns the URL to redirect the
/// caller to, if the query filter cleaned the request URL.
pub fn on_before_url_request(
    ctx: &mut RequestContext,
    config: &ShieldsConfig,
    reports: &dyn TrackerReportSink,
) -> Option<Url> {
    apply_potential_referrer_block(ctx, config);

    if config.is_internal_scheme(&ctx.request_url) {
        return None;
    }
    if config.is_query_filter_exempt(&ctx.request_url) {
        return None;
    }
    if ctx.request_url.query().is_none() {
        return None;
    }

    apply_potential_query_string_filter(ctx);

    let new_url = ctx.rewritten_url().filter(|url| **url != ctx.request_url)?.clone();
    reports.url_params_blocked(ctx.frame_id, ctx.removed_trackers());
    Some(new_url)
}
