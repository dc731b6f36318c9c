//! Bulwark networking
//!
//! The request interception layer. Callers bind to an
//! [`InterceptingLoaderFactory`] instead of the real network factory; every
//! load started through it runs as an [`InFlightRequest`] that strips
//! tracking query parameters (by redirecting the caller to the clean URL),
//! caps cross-origin referrers and otherwise relays traffic untouched.

pub mod context;
pub mod error;
pub mod factory;
pub mod in_flight;
pub mod loader;
pub mod registry;
pub mod request;
pub mod response;
pub mod site_hacks;
pub mod telemetry;

use bulwark_shields::ShieldsConfig;
use serde::{Deserialize, Serialize};

/// Re-export common types for easier usage
pub use context::{FrameId, FrameLookup, InterceptionEnv, NoFrames, RedirectLineage, RequestContext, RequestId};
pub use error::{NetError, NetworkError};
pub use factory::{FactoryEvent, FactoryHandle, FactoryStatus, InterceptingLoaderFactory, ProxyId, UpstreamNotifier};
pub use in_flight::{InFlightRequest, RequestState};
pub use loader::{
    ChannelClient, ClientMessage, FollowRedirectParams, LoaderHandle, RequestKey, UpstreamClient, UpstreamLoader,
    UpstreamLoaderFactory, UrlLoaderClient,
};
pub use registry::{ProxyBinding, RequestRegistry, ScopedRegistries};
pub use request::{HttpHeaders, Method, ReferrerPolicy, RequestPriority, ResourceRequest, ResourceType, REFERER};
pub use response::{CompletionStatus, RedirectInfo, ResponseBody, ResponseHead};
pub use telemetry::{FrameShieldsData, NoopSink, TrackerReportSink};

/// Status code of the redirects the proxy fabricates
pub const INTERNAL_REDIRECT_STATUS: u16 = 307;

/// Central interception configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// When false every request is relayed untouched
    pub enabled: bool,
    /// Status code used for internal redirects
    pub synthetic_redirect_status: u16,
    pub shields: ShieldsConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            synthetic_redirect_status: INTERNAL_REDIRECT_STATUS,
            shields: ShieldsConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, NetworkError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// The status must be a redirect the caller will follow with the same
    /// method.
    pub fn validate(&self) -> Result<(), NetworkError> {
        if !matches!(self.synthetic_redirect_status, 307 | 308) {
            return Err(bulwark_shields::ShieldsError::InvalidConfiguration(format!(
                "synthetic redirect status {} must be 307 or 308",
                self.synthetic_redirect_status
            ))
            .into());
        }
        self.shields.validate()?;
        Ok(())
    }
}
