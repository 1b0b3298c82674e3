//! Size resolution for assets whose catalog entry omits `file:size`.
use futures_util::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::asset::{ExtractAsset, BYTES_PER_MB};
use crate::transfer::Transfers;

/// Probes every asset of unknown size with at most `limit` requests in
/// flight. Failures leave the size unknown. Returns how many sizes became
/// known.
pub async fn resolve_unknown_sizes<'a, I>(assets: I, transfers: &Transfers, limit: usize) -> usize
where
    I: IntoIterator<Item = &'a mut ExtractAsset>,
{
    let unknown = assets
        .into_iter()
        .filter(|a| a.filesize_unknown())
        .collect::<Vec<_>>();

    stream::iter(unknown)
        .map(move |asset| async move {
            probe(asset, transfers).await;
            !asset.filesize_unknown()
        })
        .buffer_unordered(limit.max(1))
        .filter(|resolved| std::future::ready(*resolved))
        .count()
        .await
}

async fn probe(asset: &mut ExtractAsset, transfers: &Transfers) {
    let length = match transfers.for_asset(asset) {
        Ok(transfer) => transfer.content_length(asset).await,
        Err(err) => Err(err),
    };
    match length {
        Ok(Some(bytes)) => {
            asset.filesize_mb = (bytes / BYTES_PER_MB) as i64;
            debug!(asset = %asset.id(), size_mb = asset.filesize_mb, "resolved size");
        }
        Ok(None) => asset.set_unknown_size(),
        Err(err) => {
            warn!(asset = %asset.id(), "Error getting size: {err:#}");
            asset.set_unknown_size();
        }
    }
}
