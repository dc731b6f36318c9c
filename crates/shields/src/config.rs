use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ShieldsError, ShieldsResult};
use crate::site;

/// Shields configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldsConfig {
    /// Referrers on these domains (and subdomains) are never capped
    pub referrer_exempt_domains: Vec<String>,
    /// Requests to these domains (and subdomains) are never query-filtered
    pub query_filter_exempt_domains: Vec<String>,
    /// Request schemes that are never query-filtered
    pub internal_schemes: Vec<String>,
    /// Tab origin schemes for which referrers are left alone
    pub extension_schemes: Vec<String>,
}

impl Default for ShieldsConfig {
    fn default() -> Self {
        Self {
            referrer_exempt_domains: Vec::new(),
            query_filter_exempt_domains: Vec::new(),
            internal_schemes: vec!["chrome".to_string(), "chrome-extension".to_string()],
            extension_schemes: vec!["chrome-extension".to_string()],
        }
    }
}

impl ShieldsConfig {
    /// Parse a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> ShieldsResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ShieldsError::InvalidConfiguration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects empty domain and scheme entries.
    pub fn validate(&self) -> ShieldsResult<()> {
        let domains = self
            .referrer_exempt_domains
            .iter()
            .chain(self.query_filter_exempt_domains.iter());
        for domain in domains {
            if domain.trim_end_matches('.').is_empty() {
                return Err(ShieldsError::InvalidConfiguration(
                    "empty exempt domain".to_string(),
                ));
            }
        }
        if self
            .internal_schemes
            .iter()
            .chain(self.extension_schemes.iter())
            .any(|scheme| scheme.is_empty())
        {
            return Err(ShieldsError::InvalidConfiguration("empty scheme".to_string()));
        }
        Ok(())
    }

    pub fn is_internal_scheme(&self, url: &Url) -> bool {
        self.internal_schemes.iter().any(|s| s == url.scheme())
    }

    pub fn is_extension_scheme(&self, url: &Url) -> bool {
        self.extension_schemes.iter().any(|s| s == url.scheme())
    }

    pub fn is_query_filter_exempt(&self, url: &Url) -> bool {
        self.query_filter_exempt_domains
            .iter()
            .any(|domain| site::domain_is(url, domain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_partial_json() {
        let config =
            ShieldsConfig::from_json_str(r#"{"referrer_exempt_domains": ["portal.example"]}"#).unwrap();
        assert_eq!(config.referrer_exempt_domains, vec!["portal.example"]);
        assert_eq!(config.internal_schemes, ShieldsConfig::default().internal_schemes);
    }

    #[test]
    fn test_invalid_config() {
        assert!(ShieldsConfig::from_json_str(r#"{"query_filter_exempt_domains": [""]}"#).is_err());
        assert!(ShieldsConfig::from_json_str("not json").is_err());
    }

    #[test]
    fn test_scheme_checks() {
        let config = ShieldsConfig::default();
        assert!(config.is_internal_scheme(&Url::parse("chrome://settings").unwrap()));
        assert!(!config.is_internal_scheme(&Url::parse("https://example.com").unwrap()));
        assert!(config.is_extension_scheme(&Url::parse("chrome-extension://abc/").unwrap()));
    }
}
