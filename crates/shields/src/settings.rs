//! Tracking blocker settings.
//!
//! Settings live in an external key/value store addressed by host pattern.
//! This module defines that contract, the policy levels it stores, and the
//! helpers the interception layer uses to turn a lookup into decisions.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ShieldsError, ShieldsResult};
use crate::site;

/// Per-site tracking blocker policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyLevel {
    /// Blocker disabled for the site
    Allow,
    /// Default protection: query filtering on
    Ask,
    /// Maximum privacy: query filtering plus referrer capping
    Block,
}

impl PolicyLevel {
    pub fn tracking_blocker_enabled(self) -> bool {
        self != PolicyLevel::Allow
    }

    pub fn is_maximum_privacy(self) -> bool {
        self == PolicyLevel::Block
    }
}

impl Default for PolicyLevel {
    fn default() -> Self {
        PolicyLevel::Ask
    }
}

/// User-facing control choices, mapped onto stored [`PolicyLevel`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlType {
    Allow,
    Block,
    BlockThirdParty,
    Default,
}

impl ControlType {
    pub fn policy_level(self) -> PolicyLevel {
        match self {
            ControlType::Allow => PolicyLevel::Allow,
            ControlType::Block => PolicyLevel::Block,
            ControlType::BlockThirdParty | ControlType::Default => PolicyLevel::Ask,
        }
    }
}

/// Key of a settings rule: `*://host/*` or the wildcard default.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SettingsPattern {
    Wildcard,
    Host(String),
}

impl SettingsPattern {
    /// Pattern addressing `url`'s host; `None` addresses the default rule.
    pub fn from_url(url: Option<&Url>) -> ShieldsResult<Self> {
        let url = match url {
            Some(url) => url,
            None => return Ok(SettingsPattern::Wildcard),
        };
        match url.host_str() {
            Some(host) if !host.is_empty() => Ok(SettingsPattern::Host(host.to_ascii_lowercase())),
            _ => Err(ShieldsError::InvalidPattern { url: url.to_string() }),
        }
    }

    pub fn matches(&self, url: &Url) -> bool {
        match self {
            SettingsPattern::Wildcard => true,
            SettingsPattern::Host(host) => url
                .host_str()
                .map_or(false, |h| h.eq_ignore_ascii_case(host)),
        }
    }
}

impl fmt::Display for SettingsPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsPattern::Wildcard => write!(f, "*"),
            SettingsPattern::Host(host) => write!(f, "*://{}/*", host),
        }
    }
}

/// Contract of the persistent settings store.
pub trait SettingsStore: Send + Sync {
    /// The rule stored for exactly this pattern.
    fn get(&self, pattern: &SettingsPattern) -> ShieldsResult<Option<PolicyLevel>>;

    /// Stores a rule; `None` removes it.
    fn set(&self, pattern: SettingsPattern, level: Option<PolicyLevel>) -> ShieldsResult<()>;
}

/// In-process settings store.
#[derive(Debug, Default)]
pub struct InMemorySettings {
    rules: RwLock<HashMap<SettingsPattern, PolicyLevel>>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the given default rule.
    pub fn with_default(level: PolicyLevel) -> Self {
        let settings = Self::new();
        settings.rules.write().insert(SettingsPattern::Wildcard, level);
        settings
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

impl SettingsStore for InMemorySettings {
    fn get(&self, pattern: &SettingsPattern) -> ShieldsResult<Option<PolicyLevel>> {
        Ok(self.rules.read().get(pattern).copied())
    }

    fn set(&self, pattern: SettingsPattern, level: Option<PolicyLevel>) -> ShieldsResult<()> {
        let mut rules = self.rules.write();
        match level {
            Some(level) => {
                rules.insert(pattern, level);
            }
            None => {
                rules.remove(&pattern);
            }
        }
        Ok(())
    }
}

fn ensure_http_or_https(url: Option<&Url>) -> ShieldsResult<()> {
    match url {
        Some(url) if !site::is_http_or_https(url) => Err(ShieldsError::UnsupportedScheme {
            scheme: url.scheme().to_string(),
        }),
        _ => Ok(()),
    }
}

/// Effective policy for `url`: host rule, then default rule, then `Ask`.
pub fn tracking_blocker_policy(store: &dyn SettingsStore, url: &Url) -> ShieldsResult<PolicyLevel> {
    if let Ok(pattern) = SettingsPattern::from_url(Some(url)) {
        if let Some(level) = store.get(&pattern)? {
            return Ok(level);
        }
    }
    Ok(store.get(&SettingsPattern::Wildcard)?.unwrap_or_default())
}

/// Stores `control` for `url`'s host, or as the default when `url` is
/// `None`.
pub fn set_tracking_blocker_control_type(
    store: &dyn SettingsStore,
    control: ControlType,
    url: Option<&Url>,
) -> ShieldsResult<()> {
    ensure_http_or_https(url)?;
    let pattern = SettingsPattern::from_url(url)?;
    log::debug!("Setting tracking blocker {} to {:?}", pattern, control);
    store.set(pattern, Some(control.policy_level()))
}

/// Removes the rule for `url`'s host so the default applies again.
pub fn reset_tracking_blocker(store: &dyn SettingsStore, url: Option<&Url>) -> ShieldsResult<()> {
    ensure_http_or_https(url)?;
    store.set(SettingsPattern::from_url(url)?, None)
}

/// Whether query filtering applies to pages on `url`. Never for non-HTTP(S)
/// pages.
pub fn tracking_blocker_enabled(store: &dyn SettingsStore, url: &Url) -> ShieldsResult<bool> {
    if !site::is_http_or_https(url) {
        return Ok(false);
    }
    Ok(tracking_blocker_policy(store, url)?.tracking_blocker_enabled())
}

/// Whether `url` runs at maximum privacy (referrer capping on).
pub fn is_tracking_blocker_max_level(store: &dyn SettingsStore, url: &Url) -> ShieldsResult<bool> {
    if !site::is_http_or_https(url) {
        return Ok(false);
    }
    Ok(tracking_blocker_policy(store, url)?.is_maximum_privacy())
}
