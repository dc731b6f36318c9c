//! Shields specific errors for the Bulwark interception layer.

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ShieldsError {
    #[error("Invalid shields configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid content settings pattern for {url}")]
    InvalidPattern { url: String },

    #[error("Unsupported URL scheme for shields settings: {scheme}")]
    UnsupportedScheme { scheme: String },

    #[error("Settings store unavailable: {0}")]
    SettingsUnavailable(String),
}

pub type ShieldsResult<T> = Result<T, ShieldsError>;
