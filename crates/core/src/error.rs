//! Error types for the coalescing engine

use thiserror::Error;

/// Errors raised while configuring or constructing a coalescer
///
/// Nothing in the notify/emit path returns these; failures there are
/// logged and absorbed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("coalescer must be created inside a tokio runtime")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
