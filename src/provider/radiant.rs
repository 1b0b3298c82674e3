//! Radiant MLHub, a STAC API of training datasets keyed by an API key.
use anyhow::Result;
use async_trait::async_trait;
use std::env;
use toml::Table;
use tracing::warn;
use url::Url;

use super::{kwarg_str, Provider, StacProvider};
use crate::catalog::{AssetDescriptor, CatalogItem, SearchQuery};
use crate::error::ProviderError;
use crate::fetch::Download;

const CLIENT_URL: &str = "https://api.radiant.earth/mlhub/v1";
const API_KEY_ENV: &str = "MLHUB_API_KEY";
const KEY_PARAM: &str = "key";

/// Every request, searches and downloads alike, carries the API key as a
/// `key` query parameter. The key comes from `kwargs.api_key` or
/// `MLHUB_API_KEY`.
pub struct RadiantMlHub {
    stac: StacProvider,
    api_host: Option<String>,
    api_key: Option<String>,
}

impl RadiantMlHub {
    pub fn from_kwargs(kwargs: &Table) -> Result<Self, ProviderError> {
        let url = kwarg_str(kwargs, "client_url").unwrap_or(CLIENT_URL);
        let api_key = kwarg_str(kwargs, "api_key")
            .map(str::to_string)
            .or_else(|| env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()));

        let mut stac = StacProvider::new(url, "Radiant ML Hub (RADIANT)")?;
        if let Some(key) = &api_key {
            stac = stac.with_query_param(KEY_PARAM, key);
        }
        let api_host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string));
        Ok(Self {
            stac,
            api_host,
            api_key,
        })
    }

    /// Adds the API key to hrefs served by the MLHub API itself. Assets
    /// hosted elsewhere are left alone.
    fn keyed_url(&self, href: &str) -> String {
        let (Some(key), Ok(mut url)) = (&self.api_key, Url::parse(href)) else {
            return href.to_string();
        };
        if url.host_str() != self.api_host.as_deref() || url.query_pairs().any(|(k, _)| k == KEY_PARAM)
        {
            return href.to_string();
        }
        url.query_pairs_mut().append_pair(KEY_PARAM, key);
        url.to_string()
    }
}

#[async_trait]
impl Provider for RadiantMlHub {
    fn description(&self) -> &str {
        self.stac.description()
    }

    async fn check_authorization(&self) -> Result<bool> {
        let Some(key) = &self.api_key else {
            warn!("No Radiant MLHub API key, set kwargs.api_key or {API_KEY_ENV}");
            return Ok(false);
        };
        let response = self
            .stac
            .client()
            .get(self.stac.search_url().clone())
            .query(&[(KEY_PARAM, key.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(status = %response.status(), "Radiant MLHub rejected the API key");
            return Ok(false);
        }
        Ok(true)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<CatalogItem>> {
        self.stac.search(query).await
    }

    async fn resolve_download(&self, asset: &AssetDescriptor) -> Result<Download> {
        Ok(Download::new(self.keyed_url(&asset.href)))
    }
}
