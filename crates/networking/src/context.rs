//! Per-hop interception state.
//!
//! A [`RequestContext`] is built from the request at the start of every hop
//! and thrown away at the end of it. Only the redirect lineage survives from
//! one hop to the next, and it is passed in explicitly.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use bulwark_shields::settings::{self, SettingsStore};
use bulwark_shields::{site, FilteredUrl, RewrittenReferrer};
use url::Url;

use crate::request::{Method, ReferrerPolicy, ResourceRequest, ResourceType};
use crate::telemetry::TrackerReportSink;
use crate::ProxyConfig;

/// Registry-unique request identifier
pub type RequestId = u64;

/// Identifies the frame a factory serves; 0 for loads without a frame
pub type FrameId = i32;

/// Finds the page a frame currently shows
pub trait FrameLookup: Send + Sync {
    fn last_committed_url(&self, frame_id: FrameId) -> Option<Url>;
}

/// A [`FrameLookup`] that knows no frames
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFrames;

impl FrameLookup for NoFrames {
    fn last_committed_url(&self, _frame_id: FrameId) -> Option<Url> {
        None
    }
}

/// Collaborators shared by every request of one registry
#[derive(Clone)]
pub struct InterceptionEnv {
    pub config: Arc<ProxyConfig>,
    pub settings: Arc<dyn SettingsStore>,
    pub frames: Arc<dyn FrameLookup>,
    pub reports: Arc<dyn TrackerReportSink>,
}

impl InterceptionEnv {
    pub fn new(
        config: ProxyConfig,
        settings: Arc<dyn SettingsStore>,
        frames: Arc<dyn FrameLookup>,
        reports: Arc<dyn TrackerReportSink>,
    ) -> Self {
        Self { config: Arc::new(config), settings, frames, reports }
    }
}

impl fmt::Debug for InterceptionEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionEnv")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// How the current hop was reached
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedirectLineage {
    /// The hop was produced by a redirect the proxy fabricated itself
    pub internal_redirect: bool,
    /// The URL a genuine redirect came from; `None` for direct loads and
    /// internal redirects
    pub redirect_source: Option<Url>,
}

/// Interception state of one hop
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub frame_id: FrameId,
    pub method: Method,
    pub request_url: Url,
    pub initiator_url: Option<Url>,
    pub tab_origin: Option<Url>,
    pub referrer: Option<Url>,
    pub referrer_policy: ReferrerPolicy,
    pub resource_type: ResourceType,
    pub lineage: RedirectLineage,
    pub tracking_blocker_enabled: bool,
    pub referrers_allowed: bool,

    rewritten_url: Option<Url>,
    rewritten_referrer: Option<RewrittenReferrer>,
    removed_trackers: Vec<String>,
    headers_to_remove: BTreeSet<String>,
    headers_to_set: BTreeSet<String>,
}

impl RequestContext {
    /// Builds the context of a new hop of `request`.
    ///
    /// The tab origin is taken from `previous` when known, otherwise looked
    /// up. Policy is resolved fresh for every hop; when it cannot be
    /// resolved the hop runs unfiltered.
    pub fn build(
        request: &ResourceRequest,
        frame_id: FrameId,
        request_id: RequestId,
        env: &InterceptionEnv,
        lineage: RedirectLineage,
        previous: Option<&RequestContext>,
    ) -> Self {
        let tab_origin = previous
            .and_then(|ctx| ctx.tab_origin.clone())
            .or_else(|| {
                env.frames
                    .last_committed_url(frame_id)
                    .and_then(|url| tab_origin_of(&url))
            });

        let (tracking_blocker_enabled, referrers_allowed) = match &tab_origin {
            Some(origin) => resolve_policy(env.settings.as_ref(), origin),
            None => (false, true),
        };

        Self {
            request_id,
            frame_id,
            method: request.method.clone(),
            request_url: request.url.clone(),
            initiator_url: request.initiator_url(),
            tab_origin,
            referrer: request.referrer.clone(),
            referrer_policy: request.referrer_policy,
            resource_type: request.resource_type,
            lineage,
            tracking_blocker_enabled,
            referrers_allowed,
            rewritten_url: None,
            rewritten_referrer: None,
            removed_trackers: Vec::new(),
            headers_to_remove: BTreeSet::new(),
            headers_to_set: BTreeSet::new(),
        }
    }

    /// Records the query filter's result. Only the first result of a hop is
    /// kept.
    pub fn record_filtered_url(&mut self, filtered: FilteredUrl) -> bool {
        if self.rewritten_url.is_some() {
            return false;
        }
        self.rewritten_url = Some(filtered.url);
        self.removed_trackers = filtered.removed;
        true
    }

    /// Records the referrer rewrite. Only the first result of a hop is kept.
    pub fn record_referrer(&mut self, referrer: RewrittenReferrer) -> bool {
        if self.rewritten_referrer.is_some() {
            return false;
        }
        self.rewritten_referrer = Some(referrer);
        true
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers_to_remove.insert(name.to_string());
    }

    pub fn set_header(&mut self, name: &str) {
        self.headers_to_set.insert(name.to_string());
    }

    pub fn rewritten_url(&self) -> Option<&Url> {
        self.rewritten_url.as_ref()
    }

    pub fn rewritten_referrer(&self) -> Option<&RewrittenReferrer> {
        self.rewritten_referrer.as_ref()
    }

    pub fn removed_trackers(&self) -> &[String] {
        &self.removed_trackers
    }

    pub fn headers_to_remove(&self) -> &BTreeSet<String> {
        &self.headers_to_remove
    }

    pub fn headers_to_set(&self) -> &BTreeSet<String> {
        &self.headers_to_set
    }
}

/// The origin of a page URL. Hosted non-web schemes such as extension pages
/// keep `scheme://host/` even though their origin is opaque.
fn tab_origin_of(url: &Url) -> Option<Url> {
    site::origin_url(url).or_else(|| {
        let host = url.host_str()?;
        Url::parse(&format!("{}://{}/", url.scheme(), host)).ok()
    })
}

/// `(tracking_blocker_enabled, referrers_allowed)` for pages on `tab_origin`
fn resolve_policy(store: &dyn SettingsStore, tab_origin: &Url) -> (bool, bool) {
    let enabled = settings::tracking_blocker_enabled(store, tab_origin);
    let max_level = settings::is_tracking_blocker_max_level(store, tab_origin);
    match (enabled, max_level) {
        (Ok(enabled), Ok(max_level)) => (enabled, !max_level),
        (Err(e), _) | (_, Err(e)) => {
            log::warn!("Shields policy for {} unavailable, not filtering: {}", tab_origin, e);
            (false, true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::NoopSink;
    use bulwark_shields::{InMemorySettings, PolicyLevel, SettingsPattern, ShieldsError, ShieldsResult};
    use std::collections::HashMap;

    struct Frames(HashMap<FrameId, Url>);

    impl FrameLookup for Frames {
        fn last_committed_url(&self, frame_id: FrameId) -> Option<Url> {
            self.0.get(&frame_id).cloned()
        }
    }

    struct BrokenSettings;

    impl SettingsStore for BrokenSettings {
        fn get(&self, _pattern: &SettingsPattern) -> ShieldsResult<Option<PolicyLevel>> {
            Err(ShieldsError::SettingsUnavailable("store offline".to_string()))
        }

        fn set(&self, _pattern: SettingsPattern, _level: Option<PolicyLevel>) -> ShieldsResult<()> {
            Err(ShieldsError::SettingsUnavailable("store offline".to_string()))
        }
    }

    fn env(settings: Arc<dyn SettingsStore>) -> InterceptionEnv {
        let mut frames = HashMap::new();
        frames.insert(3, Url::parse("https://news.example.com/story?id=4").unwrap());
        InterceptionEnv::new(ProxyConfig::default(), settings, Arc::new(Frames(frames)), Arc::new(NoopSink))
    }

    fn request() -> ResourceRequest {
        ResourceRequest::new(Method::GET, "https://cdn.example.net/a.js?fbclid=1")
            .unwrap()
            .with_initiator("https://news.example.com/")
            .unwrap()
            .with_referrer("https://news.example.com/story?id=4")
            .unwrap()
    }

    #[test]
    fn test_build_resolves_tab_origin_and_policy() {
        let ctx = RequestContext::build(
            &request(),
            3,
            11,
            &env(Arc::new(InMemorySettings::with_default(PolicyLevel::Block))),
            RedirectLineage::default(),
            None,
        );
        assert_eq!(ctx.request_id, 11);
        assert_eq!(ctx.tab_origin.as_ref().unwrap().as_str(), "https://news.example.com/");
        assert_eq!(ctx.initiator_url.as_ref().unwrap().as_str(), "https://news.example.com/");
        assert!(ctx.tracking_blocker_enabled);
        assert!(!ctx.referrers_allowed);
    }

    #[test]
    fn test_unknown_frame_is_permissive() {
        let ctx = RequestContext::build(
            &request(),
            99,
            1,
            &env(Arc::new(InMemorySettings::with_default(PolicyLevel::Block))),
            RedirectLineage::default(),
            None,
        );
        assert_eq!(ctx.tab_origin, None);
        assert!(!ctx.tracking_blocker_enabled);
        assert!(ctx.referrers_allowed);
    }

    #[test_log::test]
    fn test_settings_failure_is_permissive() {
        let ctx = RequestContext::build(&request(), 3, 1, &env(Arc::new(BrokenSettings)), RedirectLineage::default(), None);
        assert!(!ctx.tracking_blocker_enabled);
        assert!(ctx.referrers_allowed);
    }

    #[test]
    fn test_lineage_and_tab_origin_carry_forward() {
        let env = env(Arc::new(InMemorySettings::new()));
        let first = RequestContext::build(&request(), 3, 1, &env, RedirectLineage::default(), None);
        let lineage = RedirectLineage {
            internal_redirect: false,
            redirect_source: Some(first.request_url.clone()),
        };
        let mut moved = request();
        moved.url = Url::parse("https://cdn.example.org/b.js").unwrap();
        // A frame id the lookup does not know still keeps the tab origin
        let second = RequestContext::build(&moved, 42, 1, &env, lineage.clone(), Some(&first));
        assert_eq!(second.lineage, lineage);
        assert_eq!(second.tab_origin, first.tab_origin);
    }

    #[test]
    fn test_outputs_are_write_once() {
        let env = env(Arc::new(InMemorySettings::new()));
        let mut ctx = RequestContext::build(&request(), 3, 1, &env, RedirectLineage::default(), None);
        let first = FilteredUrl {
            url: Url::parse("https://cdn.example.net/a.js").unwrap(),
            removed: vec!["fbclid".to_string()],
        };
        let second = FilteredUrl {
            url: Url::parse("https://other.example/").unwrap(),
            removed: vec![],
        };
        assert!(ctx.record_filtered_url(first));
        assert!(!ctx.record_filtered_url(second));
        assert_eq!(ctx.rewritten_url().unwrap().as_str(), "https://cdn.example.net/a.js");
        assert_eq!(ctx.removed_trackers(), ["fbclid".to_string()]);

        assert!(ctx.record_referrer(RewrittenReferrer::Cleared));
        assert!(!ctx.record_referrer(RewrittenReferrer::Cleared));

        ctx.remove_header("X-Client-Data");
        ctx.set_header("Referer");
        assert!(ctx.headers_to_remove().contains("X-Client-Data"));
        assert!(ctx.headers_to_set().contains("Referer"));
    }
}
