//! Catalog providers and the registry that builds them.
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use toml::Table;

use crate::catalog::{AssetDescriptor, CatalogItem, SearchQuery};
use crate::fetch::Download;

pub mod earthdata;
pub mod element84;
pub mod planetary_computer;
pub mod radiant;
mod registry;
pub mod stac;

pub use earthdata::EarthData;
pub use element84::Element84;
pub use planetary_computer::PlanetaryComputer;
pub use radiant::RadiantMlHub;
pub use registry::{instance_id, kwargs_hash, Constructor, ProviderRegistry, ProviderStore};
pub use stac::StacProvider;

/// Providers a config can name.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProviderKey {
    /// Microsoft Planetary Computer
    Mpc,
    /// NASA Earthdata CMR-STAC
    Earthdata,
    /// Element 84 Earth Search
    Element84,
    /// Radiant MLHub
    Radiant,
    /// Any STAC API given its `client_url`
    Stac,
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = match self {
            Self::Mpc => "MPC",
            Self::Earthdata => "EARTHDATA",
            Self::Element84 => "ELEMENT84",
            Self::Radiant => "RADIANT",
            Self::Stac => "STAC",
        };
        f.write_str(key)
    }
}

/// What the extraction engine needs from a catalog.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Human readable name, also used to tag the assets it returns.
    fn description(&self) -> &str;

    async fn check_authorization(&self) -> Result<bool> {
        Ok(true)
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<CatalogItem>>;

    /// Where to fetch the asset's bytes from, with any credentials the
    /// host needs. Safe to call repeatedly.
    async fn resolve_download(&self, asset: &AssetDescriptor) -> Result<Download> {
        Ok(Download::new(&asset.href))
    }
}

/// String kwarg, treating an empty string as absent.
pub(crate) fn kwarg_str<'a>(kwargs: &'a Table, key: &str) -> Option<&'a str> {
    kwargs
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
}
