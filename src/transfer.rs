//! Moving the bytes of one asset: the seam between the engine and the
//! provider that knows how to reach them.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::asset::ExtractAsset;
use crate::fetch::Fetcher;
use crate::provider::Provider;

#[async_trait]
pub trait Transfer: Send + Sync {
    /// Size in bytes advertised for the asset, if any.
    async fn content_length(&self, asset: &ExtractAsset) -> Result<Option<u64>>;

    /// Downloads the asset to its output file.
    async fn download(&self, asset: &ExtractAsset) -> Result<()>;
}

/// Resolves the download URL through the asset's provider, then fetches it.
pub struct ProviderTransfer {
    provider: Arc<dyn Provider>,
    fetcher: Arc<dyn Fetcher>,
}

impl ProviderTransfer {
    pub fn new(provider: Arc<dyn Provider>, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { provider, fetcher }
    }
}

#[async_trait]
impl Transfer for ProviderTransfer {
    async fn content_length(&self, asset: &ExtractAsset) -> Result<Option<u64>> {
        let download = self.provider.resolve_download(&asset.descriptor).await?;
        self.fetcher.content_length(&download).await
    }

    async fn download(&self, asset: &ExtractAsset) -> Result<()> {
        let download = self.provider.resolve_download(&asset.descriptor).await?;
        debug!(
            asset = %asset.id(),
            url = %download.url,
            authorized = download.bearer_token.is_some(),
            outfile = %asset.outfile.display(),
            "downloading"
        );
        let bytes = self.fetcher.fetch_to_file(&download, &asset.outfile).await?;
        debug!(asset = %asset.id(), bytes, "downloaded");
        Ok(())
    }
}

/// Transfers keyed by provider instance id.
#[derive(Clone, Default)]
pub struct Transfers {
    by_provider: HashMap<String, Arc<dyn Transfer>>,
}

impl Transfers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, provider_id: impl Into<String>, transfer: Arc<dyn Transfer>) {
        self.by_provider.insert(provider_id.into(), transfer);
    }

    pub fn for_asset(&self, asset: &ExtractAsset) -> Result<Arc<dyn Transfer>> {
        self.by_provider.get(&asset.provider_id).cloned().ok_or_else(|| {
            anyhow!(
                "No transfer registered for provider {} ({})",
                asset.provider_name,
                asset.provider_id
            )
        })
    }
}
