//! Bulwark Shields
//!
//! Pure privacy policies applied by the interception layer: tracking query
//! parameter removal, referrer capping, and the settings and per-tab records
//! those decisions depend on. Nothing in this crate performs I/O.

pub mod config;
pub mod error;
pub mod query_filter;
pub mod referrer;
pub mod settings;
pub mod shields_data;
pub mod site;

pub use config::ShieldsConfig;
pub use error::{ShieldsError, ShieldsResult};
pub use query_filter::{apply_query_filter, FilteredUrl, TrackingQueryType};
pub use referrer::{maybe_rewrite_referrer, RewrittenReferrer};
pub use settings::{
    ControlType, InMemorySettings, PolicyLevel, SettingsPattern, SettingsStore,
};
pub use shields_data::{ShieldsData, ShieldsObserver};
