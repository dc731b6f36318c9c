//! Per-tab record of what the shields removed, for the UI layer.

use std::collections::{BTreeMap, BTreeSet};

use url::Url;

use crate::query_filter::TrackingQueryType;
use crate::settings::SettingsPattern;

/// Change notifications for whoever renders shields state.
pub trait ShieldsObserver: Send + Sync {
    fn on_resources_changed(&self);

    fn on_tracking_blocker_enabled_changed(&self) {}
}

/// Blocked URL parameters for one tab.
#[derive(Default)]
pub struct ShieldsData {
    current_site: Option<Url>,
    blocked_url_params: BTreeSet<String>,
    blocked_by_type: BTreeMap<TrackingQueryType, usize>,
    keep_blocked_url_params_record: bool,
    observers: Vec<Box<dyn ShieldsObserver>>,
}

impl std::fmt::Debug for ShieldsData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShieldsData")
            .field("current_site", &self.current_site)
            .field("blocked_url_params", &self.blocked_url_params)
            .field("blocked_by_type", &self.blocked_by_type)
            .field("keep_blocked_url_params_record", &self.keep_blocked_url_params_record)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ShieldsData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&mut self, observer: Box<dyn ShieldsObserver>) {
        self.observers.push(observer);
    }

    /// Records parameters stripped from a request in this tab.
    ///
    /// The record survives the next committed navigation, which is usually
    /// the one the stripping redirected.
    pub fn handle_url_params_blocked(&mut self, params: &[String]) {
        for param in params {
            *self
                .blocked_by_type
                .entry(TrackingQueryType::from_key(param))
                .or_insert(0) += 1;
            self.blocked_url_params.insert(param.clone());
        }
        self.keep_blocked_url_params_record = true;
        self.notify_resources_changed();
    }

    /// Navigation bookkeeping; clears the record on a committed
    /// cross-document main-frame navigation.
    pub fn did_finish_navigation(
        &mut self,
        url: &Url,
        is_main_frame: bool,
        has_committed: bool,
        is_same_document: bool,
    ) {
        if !(is_main_frame && has_committed && !is_same_document) {
            return;
        }
        self.current_site = Some(url.clone());
        self.clear_all_resources_list();
    }

    pub fn clear_all_resources_list(&mut self) {
        if !self.keep_blocked_url_params_record {
            self.blocked_url_params.clear();
            self.blocked_by_type.clear();
        }
        self.keep_blocked_url_params_record = false;
        self.notify_resources_changed();
    }

    /// Forwards a settings change if it applies to the current site.
    pub fn on_settings_changed(&self, pattern: &SettingsPattern) {
        let applies = self
            .current_site
            .as_ref()
            .map_or(false, |site| pattern.matches(site));
        if applies {
            for observer in &self.observers {
                observer.on_tracking_blocker_enabled_changed();
            }
        }
    }

    pub fn current_site(&self) -> Option<&Url> {
        self.current_site.as_ref()
    }

    pub fn blocked_trackers_list(&self) -> Vec<String> {
        self.blocked_url_params.iter().cloned().collect()
    }

    pub fn blocked_trackers_count(&self) -> usize {
        self.blocked_url_params.len()
    }

    pub fn blocked_count_for(&self, kind: TrackingQueryType) -> usize {
        self.blocked_by_type.get(&kind).copied().unwrap_or(0)
    }

    fn notify_resources_changed(&self) {
        for observer in &self.observers {
            observer.on_resources_changed();
        }
    }
}
