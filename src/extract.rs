//! Runs one extraction: search every configured collection, size and
//! reconcile the assets found, then hand the missing ones to the download
//! pool.
use anyhow::{anyhow, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::asset::{asset_outfile, AssetCollection, CollectionSummary, ExtractAsset};
use crate::catalog::{CatalogItem, SearchQuery};
use crate::config::{CollectionSpec, Config};
use crate::error::ProviderError;
use crate::fetch::Fetcher;
use crate::pool::{DownloadPool, Job};
use crate::provider::{instance_id, ProviderStore};
use crate::reconcile::reconcile_existing;
use crate::region::RegionCache;
use crate::run::RunArtifacts;
use crate::sizing::resolve_unknown_sizes;
use crate::transfer::{ProviderTransfer, Transfers};

/// How long the orchestrator waits on the completed channel before checking
/// whether the pool has drained.
pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionPhase {
    Preparing,
    SizingAssets,
    Reconciling,
    DryRunStop,
    Downloading,
    Finalizing,
}

impl fmt::Display for ExtractionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug)]
pub struct RunReport {
    /// True when nothing failed, always true for a dry run.
    pub success: bool,
    /// Summary logged before any download traffic.
    pub summary: CollectionSummary,
    /// Every asset discovered, with its final state.
    pub assets: AssetCollection,
    pub completed: AssetCollection,
    pub failed: AssetCollection,
    pub failed_log: Option<PathBuf>,
}

pub struct Extractor {
    config: Config,
    store: ProviderStore,
    fetcher: Arc<dyn Fetcher>,
    artifacts: RunArtifacts,
    poll_interval: Duration,
    phase: ExtractionPhase,
}

impl Extractor {
    pub fn new(
        config: Config,
        store: ProviderStore,
        fetcher: Arc<dyn Fetcher>,
        artifacts: RunArtifacts,
    ) -> Self {
        Self {
            config,
            store,
            fetcher,
            artifacts,
            poll_interval: POLL_INTERVAL,
            phase: ExtractionPhase::Preparing,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn phase(&self) -> ExtractionPhase {
        self.phase
    }

    fn enter(&mut self, phase: ExtractionPhase) {
        debug!(from = %self.phase, to = %phase, "extraction phase");
        self.phase = phase;
    }

    pub async fn run(&mut self) -> Result<RunReport> {
        self.enter(ExtractionPhase::Preparing);
        let (mut assets, transfers) = self.prepare().await?;

        let system = self.config.system.clone();
        if system.query_asset_sizes {
            self.enter(ExtractionPhase::SizingAssets);
            let unknown = assets.num_assets_with_unknown_size();
            if unknown > 0 {
                info!("Querying the size of {unknown} assets");
                let resolved = resolve_unknown_sizes(
                    assets.iter_mut(),
                    &transfers,
                    system.max_concurrent_extractions,
                )
                .await;
                debug!(resolved, unknown, "size queries finished");
            }
        }

        self.enter(ExtractionPhase::Reconciling);
        let stats = reconcile_existing(&mut assets, system.remove_existing_if_wrong_size)?;
        debug!(?stats, "reconciled existing files");

        let summary = assets.summary();
        for asset in assets.iter() {
            debug!("{asset}");
        }
        info!("Extraction summary:\n{summary}");

        if system.dry_run {
            self.enter(ExtractionPhase::DryRunStop);
            info!("Dry run, skipping downloads");
            return Ok(RunReport {
                success: true,
                summary,
                assets,
                completed: AssetCollection::new(),
                failed: AssetCollection::new(),
                failed_log: None,
            });
        }

        self.enter(ExtractionPhase::Downloading);
        let (completed, failures) = self.download(&assets, &transfers).await?;
        // Every pending asset comes back exactly once, completed or failed
        let mut finished = assets
            .iter()
            .filter(|a| a.downloaded)
            .cloned()
            .collect::<AssetCollection>();
        finished += completed.clone();
        finished += failures
            .iter()
            .map(|(asset, _)| asset.clone())
            .collect::<AssetCollection>();
        assets = finished;

        self.enter(ExtractionPhase::Finalizing);
        let failed_log = self.artifacts.write_failed(&failures)?;
        let failed: AssetCollection = failures.into_iter().map(|(asset, _)| asset).collect();
        let success = failed.is_empty();
        if success {
            info!("All assets successfully extracted");
        } else {
            warn!(
                "Some assets were not extracted, see logs ({} failed)",
                failed.len()
            );
        }

        Ok(RunReport {
            success,
            summary,
            assets,
            completed,
            failed,
            failed_log,
        })
    }

    /// Searches every configured collection and expands the items found into
    /// assets. A failed search aborts the run.
    async fn prepare(&mut self) -> Result<(AssetCollection, Transfers)> {
        let mut assets = AssetCollection::new();
        let mut transfers = Transfers::new();
        let mut regions = RegionCache::new();

        for provider_config in &self.config.providers {
            let provider = self
                .store
                .get(provider_config.id, &provider_config.kwargs)
                .await?;
            let provider_name = provider.description().to_string();
            let provider_id = instance_id(provider_config.id, &provider_config.kwargs);
            transfers.insert(
                provider_id.clone(),
                Arc::new(ProviderTransfer::new(provider.clone(), self.fetcher.clone())),
            );

            for collection in self.config.collections_for(provider_config)? {
                let region = collection
                    .aoi_file
                    .as_deref()
                    .map(|path| regions.get_or_load(path))
                    .transpose()?;
                let query = SearchQuery {
                    region,
                    datetime: collection.datetime.clone(),
                    collection: collection.id.clone(),
                    max_items: collection.max_items,
                };

                info!("Querying {} for collection {}", provider_name, collection.id);
                let items = provider
                    .search(&query)
                    .await
                    .map_err(|source| ProviderError::Search {
                        provider: provider_name.clone(),
                        collection: collection.id.clone(),
                        source,
                    })?;
                info!("Found {} items in {}", items.len(), collection.id);

                for item in &items {
                    assets += assets_from_item(item, &collection, &provider_name)
                        .into_iter()
                        .map(|asset| asset.with_provider_id(&provider_id))
                        .collect::<AssetCollection>();
                }
            }
        }
        Ok((assets, transfers))
    }

    /// Runs the download pool over every asset not yet on disk.
    async fn download(
        &self,
        assets: &AssetCollection,
        transfers: &Transfers,
    ) -> Result<(AssetCollection, Vec<(ExtractAsset, String)>)> {
        let pending: Vec<ExtractAsset> = assets.iter().filter(|a| !a.downloaded).cloned().collect();
        if pending.is_empty() {
            info!("Nothing to download");
            return Ok((AssetCollection::new(), vec![]));
        }

        let system = &self.config.system;
        let total = pending.len();
        let total_mb = assets.total_undownloaded_size();
        info!(
            "Downloading {total} assets ({total_mb} MB) with {} workers",
            system.max_concurrent_extractions
        );

        let mut pool = DownloadPool::start(
            system.max_concurrent_extractions,
            system.max_download_attempts,
            total,
        );
        for asset in pending {
            let transfer = transfers.for_asset(&asset)?;
            pool.submit(Job::new(asset, transfer))
                .await
                .map_err(|_| anyhow!("Download queue closed before every asset was submitted"))?;
        }

        let mut progress = Progress::new(total, total_mb);
        let mut completed = AssetCollection::new();
        while !pool.is_drained() {
            if let Some(job) = pool.next_completed(self.poll_interval).await {
                progress.record(&job.asset);
                completed.add_asset(job.asset.item_id.clone(), job.asset);
            } else {
                debug!(unfinished = pool.unfinished(), "waiting on downloads");
            }
        }

        let outcome = pool.finish().await;
        for job in outcome.completed {
            progress.record(&job.asset);
            completed.add_asset(job.asset.item_id.clone(), job.asset);
        }
        let failures = outcome
            .failed
            .into_iter()
            .map(|failed| (failed.job.asset, failed.error))
            .collect();
        Ok((completed, failures))
    }
}

struct Progress {
    done: usize,
    done_mb: u64,
    total: usize,
    total_mb: u64,
}

impl Progress {
    fn new(total: usize, total_mb: u64) -> Self {
        Self {
            done: 0,
            done_mb: 0,
            total,
            total_mb,
        }
    }

    fn record(&mut self, asset: &ExtractAsset) {
        self.done += 1;
        if !asset.filesize_unknown() {
            self.done_mb += asset.filesize_mb as u64;
        }
        info!(
            "Extracted {} ({}/{} assets, {}/{} MB)",
            asset.id(),
            self.done,
            self.total,
            self.done_mb,
            self.total_mb
        );
    }
}

/// Assets of `item` selected by the collection's asset list. Requested names
/// the item lacks are skipped with a warning.
pub fn assets_from_item(
    item: &CatalogItem,
    collection: &CollectionSpec,
    provider_name: &str,
) -> AssetCollection {
    let names: Vec<String> = if collection.wants_all_assets() {
        item.asset_names().map(str::to_string).collect()
    } else {
        collection.assets.clone()
    };

    let mut assets = AssetCollection::new();
    for name in &names {
        let Some(descriptor) = item.asset(name) else {
            warn!("Asset {} not found in item {}, skipping", name, item.id);
            continue;
        };
        let outfile = asset_outfile(&collection.outdir, &collection.id, &item.id, &descriptor.href);
        assets.add_asset(
            item.id.clone(),
            ExtractAsset::new(
                &item.id,
                name,
                descriptor.clone(),
                outfile,
                provider_name,
                &collection.id,
            ),
        );
    }
    assets
}
