//! Element 84 Earth Search.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use toml::Table;

use super::{kwarg_str, Provider, StacProvider};
use crate::catalog::{AssetDescriptor, CatalogItem, SearchQuery};
use crate::error::ProviderError;
use crate::fetch::Download;

const CLIENT_URL: &str = "https://earth-search.aws.element84.com/v1";
const DEFAULT_REGION: &str = "us-west-2";

#[derive(Debug, PartialEq)]
pub struct S3Object {
    pub bucket: String,
    pub key: String,
}

impl S3Object {
    /// Parses an `s3://bucket/key` href.
    pub fn from_href(href: &str) -> Result<Self> {
        static PATTERN: OnceLock<Regex> = OnceLock::new();
        let re = PATTERN.get_or_init(|| {
            Regex::new(r"^s3://(?<bucket>[^/]+)/(?<key>.+)$")
                .expect("Regex pattern should always compile")
        });

        let captures = re
            .captures(href)
            .ok_or(anyhow!("No regex matches found for: {}", href))?;
        let (_, [bucket, key]) = captures.extract();

        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    pub fn https_url(&self, region: &str) -> String {
        format!("https://{}.s3.{}.amazonaws.com/{}", self.bucket, region, self.key)
    }
}

/// Earth Search items are public; some assets are published as `s3://`
/// hrefs, which are rewritten to their HTTPS endpoint.
pub struct Element84 {
    stac: StacProvider,
    region: String,
}

impl Element84 {
    pub fn from_kwargs(kwargs: &Table) -> Result<Self, ProviderError> {
        let url = kwarg_str(kwargs, "client_url").unwrap_or(CLIENT_URL);
        let region = kwarg_str(kwargs, "region").unwrap_or(DEFAULT_REGION);
        Ok(Self {
            stac: StacProvider::new(url, "Element 84 Earth Search (ELEMENT84)")?,
            region: region.to_string(),
        })
    }
}

#[async_trait]
impl Provider for Element84 {
    fn description(&self) -> &str {
        self.stac.description()
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<CatalogItem>> {
        self.stac.search(query).await
    }

    async fn resolve_download(&self, asset: &AssetDescriptor) -> Result<Download> {
        if asset.href.starts_with("s3://") {
            let url = S3Object::from_href(&asset.href)?.https_url(&self.region);
            return Ok(Download::new(url));
        }
        Ok(Download::new(&asset.href))
    }
}
