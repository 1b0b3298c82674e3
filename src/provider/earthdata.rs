//! NASA Earthdata, through the CMR-STAC endpoints of its data centers.
use anyhow::Result;
use async_trait::async_trait;
use std::env;
use toml::Table;
use tracing::warn;

use super::{kwarg_str, Provider, StacProvider};
use crate::catalog::{AssetDescriptor, CatalogItem, SearchQuery};
use crate::error::ProviderError;
use crate::fetch::Download;

const CMR_STAC: &str = "https://cmr.earthdata.nasa.gov/stac";
const TOKENS_URL: &str = "https://urs.earthdata.nasa.gov/api/users/tokens";
const TOKEN_ENV: &str = "EARTHDATA_TOKEN";

pub const SUBPROVIDERS: &[&str] = &[
    "NSIDC_ECS",
    "LPCLOUD",
    "PODAAC",
    "ORNL_CLOUD",
    "GES_DISC",
    "ASF",
];

/// Downloads are authorized with an Earthdata Login bearer token, taken from
/// `kwargs.token` or the `EARTHDATA_TOKEN` environment variable.
pub struct EarthData {
    stac: StacProvider,
    token: Option<String>,
}

impl EarthData {
    /// Needs either `client_url` or one of [`SUBPROVIDERS`] as
    /// `subprovider_id`.
    pub fn from_kwargs(kwargs: &Table) -> Result<Self, ProviderError> {
        let misconfigured = |why: String| ProviderError::Misconfigured("EARTHDATA".to_string(), why);

        let url = match (
            kwarg_str(kwargs, "client_url"),
            kwarg_str(kwargs, "subprovider_id"),
        ) {
            (Some(url), _) => url.to_string(),
            (None, Some(id)) if SUBPROVIDERS.contains(&id) => format!("{CMR_STAC}/{id}"),
            (None, Some(id)) => {
                return Err(misconfigured(format!(
                    "unknown subprovider_id {id}, use one of {}",
                    SUBPROVIDERS.join(", ")
                )))
            }
            (None, None) => {
                return Err(misconfigured(
                    "either kwargs.client_url or kwargs.subprovider_id is required".to_string(),
                ))
            }
        };

        Ok(Self {
            stac: StacProvider::new(&url, format!("EarthData Provider ({url})"))?,
            token: kwarg_str(kwargs, "token")
                .map(str::to_string)
                .or_else(|| env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty())),
        })
    }
}

#[async_trait]
impl Provider for EarthData {
    fn description(&self) -> &str {
        self.stac.description()
    }

    async fn check_authorization(&self) -> Result<bool> {
        let mut request = self.stac.client().get(TOKENS_URL);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            warn!(
                status = %response.status(),
                "Earthdata login rejected the request, set {TOKEN_ENV}"
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<CatalogItem>> {
        self.stac.search(query).await
    }

    async fn resolve_download(&self, asset: &AssetDescriptor) -> Result<Download> {
        Ok(Download::new(&asset.href).with_bearer_token(self.token.clone()))
    }
}
