//! Decides which assets already sit on disk before any download starts.
use std::fs;
use std::io;
use tracing::{debug, info, warn};

use crate::asset::{AssetCollection, ExtractAsset, BYTES_PER_MB};

/// Allowed gap in MB between the on-disk and the expected size, absorbing
/// rounding of sizes published in decimal megabytes.
pub const SIZE_TOLERANCE_MB: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// Nothing on disk.
    Missing,
    /// A file exists but the expected size is unknown; taken as complete.
    Unverified,
    /// A file exists with the expected size.
    Matches,
    /// A file of the wrong size was deleted.
    Removed,
    /// A file of the wrong size was left for the download to overwrite.
    Stale,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub missing: usize,
    pub skipped: usize,
    pub removed: usize,
    pub stale: usize,
}

/// Checks the output file of one asset and updates its `downloaded` flag.
pub fn reconcile_asset(
    asset: &mut ExtractAsset,
    remove_if_wrong_size: bool,
) -> io::Result<Reconciliation> {
    let on_disk = match fs::metadata(&asset.outfile) {
        Ok(meta) if meta.is_file() => meta.len(),
        Ok(_) => return Ok(Reconciliation::Missing),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Reconciliation::Missing),
        Err(e) => return Err(e),
    };

    if asset.filesize_unknown() {
        debug!(outfile = %asset.outfile.display(), "exists with unknown expected size, skipping");
        asset.downloaded = true;
        return Ok(Reconciliation::Unverified);
    }

    let on_disk_mb = (on_disk / BYTES_PER_MB) as i64;
    if (on_disk_mb - asset.filesize_mb).abs() <= SIZE_TOLERANCE_MB {
        debug!(outfile = %asset.outfile.display(), "exists, skipping");
        asset.downloaded = true;
        return Ok(Reconciliation::Matches);
    }

    asset.downloaded = false;
    if remove_if_wrong_size {
        info!(
            "Removing {} because it is {}MB instead of {}MB",
            asset.outfile.display(),
            on_disk_mb,
            asset.filesize_mb
        );
        fs::remove_file(&asset.outfile)?;
        Ok(Reconciliation::Removed)
    } else {
        warn!(
            "{} is {}MB instead of {}MB but remove_existing_if_wrong_size is not set, \
             it will be overwritten by the download",
            asset.outfile.display(),
            on_disk_mb,
            asset.filesize_mb
        );
        Ok(Reconciliation::Stale)
    }
}

/// Reconciles every asset of the collection against the filesystem.
pub fn reconcile_existing(
    assets: &mut AssetCollection,
    remove_if_wrong_size: bool,
) -> io::Result<ReconcileStats> {
    let mut stats = ReconcileStats::default();
    for asset in assets.iter_mut() {
        match reconcile_asset(asset, remove_if_wrong_size)? {
            Reconciliation::Missing => stats.missing += 1,
            Reconciliation::Unverified | Reconciliation::Matches => stats.skipped += 1,
            Reconciliation::Removed => stats.removed += 1,
            Reconciliation::Stale => stats.stale += 1,
        }
    }
    if stats.removed > 0 {
        info!(
            "Removed {} files that may not be fully downloaded or corrupt",
            stats.removed
        );
    }
    Ok(stats)
}
