use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Unable to parse config: {0}")]
    Parse(String),
    #[error("Missing required field '{field}' for collection {collection}")]
    MissingField {
        collection: String,
        field: &'static str,
    },
    #[error("Invalid override '{0}': {1}")]
    InvalidOverride(String, String),
    #[error("Invalid datetime '{0}': {1}")]
    InvalidDatetime(String, String),
    #[error("Invalid system setting {0}: {1}")]
    InvalidSetting(&'static str, String),
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider {0} is not registered")]
    Unregistered(String),
    #[error("Provider {0} is misconfigured: {1}")]
    Misconfigured(String, String),
    #[error("{0} is not authorized, check the credentials it requires")]
    Unauthorized(String),
    #[error("Catalog search on {provider} failed for collection {collection}: {source}")]
    Search {
        provider: String,
        collection: String,
        source: anyhow::Error,
    },
    #[error("Unable to sign {0}: {1}")]
    Signing(String, String),
}
