//! Microsoft Planetary Computer.
use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use toml::Table;
use url::Url;

use super::{kwarg_str, Provider, StacProvider};
use crate::catalog::{AssetDescriptor, CatalogItem, SearchQuery};
use crate::error::ProviderError;
use crate::fetch::Download;

const CLIENT_URL: &str = "https://planetarycomputer.microsoft.com/api/stac/v1";
const SIGN_URL: &str = "https://planetarycomputer.microsoft.com/api/sas/v1/sign";

#[derive(Deserialize)]
struct SignedHref {
    href: String,
}

/// Blob storage hrefs must be signed with a short lived SAS token before
/// they can be downloaded.
pub struct PlanetaryComputer {
    stac: StacProvider,
    sign_url: String,
}

impl PlanetaryComputer {
    pub fn from_kwargs(kwargs: &Table) -> Result<Self, ProviderError> {
        let url = kwarg_str(kwargs, "client_url").unwrap_or(CLIENT_URL);
        Ok(Self {
            stac: StacProvider::new(url, "Microsoft Planetary Computer (MPC)")?,
            sign_url: kwarg_str(kwargs, "sign_url").unwrap_or(SIGN_URL).to_string(),
        })
    }
}

/// Only Azure blob hrefs need signing.
fn needs_signing(href: &str) -> bool {
    Url::parse(href)
        .ok()
        .and_then(|url| url.host_str().map(|h| h.ends_with(".blob.core.windows.net")))
        .unwrap_or(false)
}

#[async_trait]
impl Provider for PlanetaryComputer {
    fn description(&self) -> &str {
        self.stac.description()
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<CatalogItem>> {
        self.stac.search(query).await
    }

    async fn resolve_download(&self, asset: &AssetDescriptor) -> Result<Download> {
        if !needs_signing(&asset.href) {
            return Ok(Download::new(&asset.href));
        }
        let response = self
            .stac
            .client()
            .get(&self.sign_url)
            .query(&[("href", asset.href.as_str())])
            .send()
            .await?;
        let signed: SignedHref = response
            .error_for_status()
            .map_err(|e| ProviderError::Signing(asset.href.clone(), e.to_string()))?
            .json()
            .await?;
        Ok(Download::new(signed.href))
    }
}
