//! Types exchanged with catalog adapters.
//!
//! A provider turns its native records into [`CatalogItem`]s; the extraction
//! engine never looks at provider-specific JSON.
use serde::{Deserialize, Serialize};
use stac::{Asset, Item};

use crate::region::Region;

/// Provider cap used when a collection asks for `max_items < 0`.
pub const PROVIDER_MAX_ITEMS: usize = 10_000;

/// Describes one asset as published by a catalog. Also serves as the opaque
/// handle a provider later resolves into a download URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub href: String,
    pub declared_size_bytes: Option<u64>,
    pub media_type: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

impl AssetDescriptor {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            declared_size_bytes: None,
            media_type: None,
            title: None,
            description: None,
        }
    }

    pub fn with_size(mut self, bytes: u64) -> Self {
        self.declared_size_bytes = Some(bytes);
        self
    }

    pub fn from_stac(asset: &Asset) -> Self {
        Self {
            href: asset.href.to_owned(),
            declared_size_bytes: extract_file_size(asset),
            media_type: asset.r#type.clone(),
            title: asset.title.clone(),
            description: asset.description.clone(),
        }
    }
}

fn extract_file_size(asset: &Asset) -> Option<u64> {
    let size = asset.additional_fields.get("file:size")?;
    // Some catalogs publish the size as a string
    size.as_u64()
        .or_else(|| size.as_str().and_then(|s| s.trim().parse().ok()))
}

/// A catalog record exposing one or more downloadable assets, in the order
/// the catalog listed them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogItem {
    pub id: String,
    pub collection_id: String,
    pub assets: Vec<(String, AssetDescriptor)>,
}

impl CatalogItem {
    pub fn new(id: impl Into<String>, collection_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            collection_id: collection_id.into(),
            assets: Vec::new(),
        }
    }

    pub fn with_asset(mut self, name: impl Into<String>, descriptor: AssetDescriptor) -> Self {
        self.assets.push((name.into(), descriptor));
        self
    }

    pub fn asset(&self, name: &str) -> Option<&AssetDescriptor> {
        self.assets
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, descriptor)| descriptor)
    }

    pub fn asset_names(&self) -> impl Iterator<Item = &str> {
        self.assets.iter().map(|(name, _)| name.as_str())
    }

    /// Converts a STAC item, falling back to `default_collection` when the
    /// item does not name its collection.
    pub fn from_stac(item: &Item, default_collection: &str) -> Self {
        let collection_id = item
            .collection
            .clone()
            .unwrap_or_else(|| default_collection.to_string());
        let assets = item
            .assets
            .iter()
            .map(|(name, asset)| (name.clone(), AssetDescriptor::from_stac(asset)))
            .collect();
        Self {
            id: item.id.to_owned(),
            collection_id,
            assets,
        }
    }
}

/// Parameters of one catalog search.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub region: Option<Region>,
    pub datetime: String,
    pub collection: String,
    pub max_items: i64,
}

impl SearchQuery {
    /// Number of items to collect, applying the provider cap for negative
    /// requests.
    pub fn item_limit(&self, provider_cap: usize) -> usize {
        if self.max_items < 0 {
            provider_cap
        } else {
            (self.max_items as usize).min(provider_cap)
        }
    }
}
