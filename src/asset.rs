//! Assets selected for extraction and the collections that group them.
use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::ops::{Add, AddAssign};
use std::path::{Path, PathBuf};
use url::Url;

use crate::catalog::AssetDescriptor;

pub const BYTES_PER_MB: u64 = 1_048_576;

/// Sentinel for a size nobody has been able to determine.
pub const UNKNOWN_SIZE: i64 = -1;

/// Basenames longer than this are replaced with a hash of the name.
pub const MAX_BASENAME_LEN: usize = 100;

/// Megabytes for a size published by a catalog, rounded to the nearest MB.
pub fn declared_size_mb(bytes: Option<u64>) -> i64 {
    match bytes {
        Some(b) => ((b + BYTES_PER_MB / 2) / BYTES_PER_MB) as i64,
        None => UNKNOWN_SIZE,
    }
}

/// One downloadable asset of a catalog item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractAsset {
    pub item_id: String,
    pub asset_name: String,
    pub media_type: String,
    /// Handle the provider resolves into a download URL.
    pub descriptor: AssetDescriptor,
    pub outfile: PathBuf,
    /// Size in MB; zero or negative when unknown.
    pub filesize_mb: i64,
    pub downloaded: bool,
    pub download_attempts: u32,
    pub provider_name: String,
    /// Instance of the provider that found the asset. Providers of the same
    /// kind built from different kwargs share a name but not an id.
    pub provider_id: String,
    pub collection_name: String,
}

impl ExtractAsset {
    pub fn new(
        item_id: &str,
        asset_name: &str,
        descriptor: AssetDescriptor,
        outfile: PathBuf,
        provider_name: &str,
        collection_name: &str,
    ) -> Self {
        let media_type = descriptor
            .media_type
            .clone()
            .unwrap_or_else(|| "???".to_string());
        Self {
            item_id: item_id.to_string(),
            asset_name: asset_name.to_string(),
            media_type,
            filesize_mb: declared_size_mb(descriptor.declared_size_bytes),
            descriptor,
            outfile,
            downloaded: false,
            download_attempts: 0,
            provider_name: provider_name.to_string(),
            provider_id: provider_name.to_string(),
            collection_name: collection_name.to_string(),
        }
    }

    pub fn with_provider_id(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = provider_id.into();
        self
    }

    pub fn id(&self) -> String {
        format!("{}_{}", self.item_id, self.asset_name)
    }

    pub fn key(&self) -> (&str, &str) {
        (&self.item_id, &self.asset_name)
    }

    pub fn filesize_unknown(&self) -> bool {
        self.filesize_mb <= 0
    }

    pub fn set_unknown_size(&mut self) {
        self.filesize_mb = UNKNOWN_SIZE;
    }

    fn type_description(&self) -> String {
        let mut desc = self.descriptor.title.clone().unwrap_or_default();
        if let Some(description) = &self.descriptor.description {
            desc.push_str(&format!(" ({description})"));
        }
        desc
    }
}

impl fmt::Display for ExtractAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} / {}] {} -> {} ({} MB, {} attempts)",
            self.id(),
            self.provider_name,
            self.collection_name,
            self.descriptor.href,
            self.outfile.display(),
            self.filesize_mb,
            self.download_attempts
        )
    }
}

/// Output location of an asset: `<outdir>/<collection>/<item>/<basename>`.
pub fn asset_outfile(outdir: &Path, collection: &str, item_id: &str, href: &str) -> PathBuf {
    outdir
        .join(collection)
        .join(item_id)
        .join(safe_basename(&href_basename(href)))
}

fn href_basename(href: &str) -> String {
    let path = match Url::parse(href) {
        Ok(url) => url.path().to_string(),
        Err(_) => href.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("asset")
        .to_string()
}

fn safe_basename(name: &str) -> String {
    if name.len() <= MAX_BASENAME_LEN {
        return name.to_string();
    }
    let digest = hex::encode(Sha256::digest(name.as_bytes()));
    match Path::new(name).extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.len() <= 10 => format!("{digest}.{ext}"),
        _ => digest,
    }
}

/// Assets grouped by the id of the item that exposes them.
///
/// Keys keep their discovery order so summaries are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetCollection {
    assets: IndexMap<String, Vec<ExtractAsset>>,
}

impl AssetCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends to the list for `item_id`. Assets sharing a name are all kept.
    pub fn add_asset(&mut self, item_id: impl Into<String>, asset: ExtractAsset) {
        self.assets.entry(item_id.into()).or_default().push(asset);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExtractAsset> {
        self.assets.values().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ExtractAsset> {
        self.assets.values_mut().flatten()
    }

    pub fn items(&self) -> impl Iterator<Item = (&str, &[ExtractAsset])> {
        self.assets
            .iter()
            .map(|(id, assets)| (id.as_str(), assets.as_slice()))
    }

    pub fn num_items(&self) -> usize {
        self.assets.len()
    }

    pub fn len(&self) -> usize {
        self.assets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_assets_with_unknown_size(&self) -> usize {
        self.iter().filter(|a| a.filesize_unknown()).count()
    }

    pub fn num_assets_to_download(&self) -> usize {
        self.iter().filter(|a| !a.downloaded).count()
    }

    pub fn num_assets_downloaded(&self) -> usize {
        self.iter().filter(|a| a.downloaded).count()
    }

    /// Total size in MB of the assets whose size is known.
    pub fn total_size(&self) -> u64 {
        self.iter()
            .filter(|a| !a.filesize_unknown())
            .map(|a| a.filesize_mb as u64)
            .sum()
    }

    pub fn total_undownloaded_size(&self) -> u64 {
        self.iter()
            .filter(|a| !a.filesize_unknown() && !a.downloaded)
            .map(|a| a.filesize_mb as u64)
            .sum()
    }

    /// Distinct (provider, collection) pairs present.
    pub fn provider_collections(&self) -> BTreeSet<(String, String)> {
        self.iter()
            .map(|a| (a.provider_name.clone(), a.collection_name.clone()))
            .collect()
    }

    pub fn summary(&self) -> CollectionSummary {
        let mut asset_types = IndexMap::new();
        let mut sources: BTreeMap<(String, String), SourceStats> = BTreeMap::new();
        for asset in self.iter() {
            asset_types.insert(asset.asset_name.clone(), asset.type_description());
            let stats = sources
                .entry((asset.provider_name.clone(), asset.collection_name.clone()))
                .or_default();
            stats.assets += 1;
            if asset.filesize_unknown() {
                stats.unknown_size += 1;
            } else {
                stats.size_mb += asset.filesize_mb as u64;
            }
            if !asset.downloaded {
                stats.to_download += 1;
            }
        }

        CollectionSummary {
            num_items: self.num_items(),
            num_assets: self.len(),
            num_to_download: self.num_assets_to_download(),
            num_downloaded: self.num_assets_downloaded(),
            num_unknown_size: self.num_assets_with_unknown_size(),
            total_size_mb: self.total_size(),
            undownloaded_size_mb: self.total_undownloaded_size(),
            asset_types,
            sources,
        }
    }
}

impl AddAssign for AssetCollection {
    fn add_assign(&mut self, other: Self) {
        for (item_id, assets) in other.assets {
            self.assets.entry(item_id).or_default().extend(assets);
        }
    }
}

impl Add for AssetCollection {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self += other;
        self
    }
}

impl IntoIterator for AssetCollection {
    type Item = ExtractAsset;
    type IntoIter = std::iter::Flatten<indexmap::map::IntoValues<String, Vec<ExtractAsset>>>;

    fn into_iter(self) -> Self::IntoIter {
        self.assets.into_values().flatten()
    }
}

impl FromIterator<ExtractAsset> for AssetCollection {
    fn from_iter<I: IntoIterator<Item = ExtractAsset>>(iter: I) -> Self {
        let mut collection = Self::new();
        for asset in iter {
            collection.add_asset(asset.item_id.clone(), asset);
        }
        collection
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub assets: usize,
    pub to_download: usize,
    pub unknown_size: usize,
    pub size_mb: u64,
}

/// Aggregate view of an [`AssetCollection`], printed before downloading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSummary {
    pub num_items: usize,
    pub num_assets: usize,
    pub num_to_download: usize,
    pub num_downloaded: usize,
    pub num_unknown_size: usize,
    pub total_size_mb: u64,
    pub undownloaded_size_mb: u64,
    /// Asset name -> title and description.
    pub asset_types: IndexMap<String, String>,
    /// (provider, collection) -> stats.
    pub sources: BTreeMap<(String, String), SourceStats>,
}

impl fmt::Display for CollectionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Asset types:")?;
        for (name, desc) in &self.asset_types {
            writeln!(f, "  key={name}; description=\"{desc}\"")?;
        }
        writeln!(f, "Sources:")?;
        for ((provider, collection), stats) in &self.sources {
            writeln!(
                f,
                "  {provider} / {collection}: {} assets, {} to download, {} MB, {} unknown size",
                stats.assets, stats.to_download, stats.size_mb, stats.unknown_size
            )?;
        }
        writeln!(
            f,
            "Assets: {} across {} items ({} already downloaded, {} to download)",
            self.num_assets, self.num_items, self.num_downloaded, self.num_to_download
        )?;
        writeln!(f, "Total asset size: {} MB", self.total_size_mb)?;
        write!(f, "Total undownloaded asset size: {} MB", self.undownloaded_size_mb)?;
        if self.num_unknown_size > 0 {
            write!(f, "\nNumber of assets with unknown size: {}", self.num_unknown_size)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn mock_asset(item_id: &str, name: &str, size_mb: i64) -> ExtractAsset {
        let href = format!("https://example.com/{item_id}/{name}.tif");
        let mut asset = ExtractAsset::new(
            item_id,
            name,
            AssetDescriptor::new(href.clone()),
            asset_outfile(Path::new("/tmp/out"), "sentinel-2-l2a", item_id, &href),
            "Mock Provider",
            "sentinel-2-l2a",
        );
        asset.filesize_mb = size_mb;
        asset
    }

    fn mock_collection(prefix: &str, items: usize, per_item: usize) -> AssetCollection {
        let mut collection = AssetCollection::new();
        for i in 0..items {
            let item_id = format!("{prefix}{i}");
            for j in 0..per_item {
                collection.add_asset(&item_id, mock_asset(&item_id, &format!("B{j}"), 10));
            }
        }
        collection
    }

    #[test]
    fn test_declared_size_mb() {
        assert_eq!(declared_size_mb(None), UNKNOWN_SIZE);
        assert_eq!(declared_size_mb(Some(120 * BYTES_PER_MB)), 120);
        assert_eq!(declared_size_mb(Some(120 * BYTES_PER_MB + BYTES_PER_MB / 2)), 121);
        assert_eq!(declared_size_mb(Some(1000)), 0);
    }

    #[test]
    fn test_filesize_unknown() {
        assert!(mock_asset("a", "red", -1).filesize_unknown());
        assert!(mock_asset("a", "red", 0).filesize_unknown());
        assert!(!mock_asset("a", "red", 1).filesize_unknown());
    }

    #[test]
    fn test_add_asset_keeps_duplicate_names() {
        let mut collection = AssetCollection::new();
        collection.add_asset("itemA", mock_asset("itemA", "red", 5));
        collection.add_asset("itemA", mock_asset("itemA", "red", 5));
        assert_eq!(collection.num_items(), 1);
        assert_eq!(collection.len(), 2);
    }

    #[test]
    fn test_merge_disjoint() {
        for (a, b) in [(0, 0), (0, 3), (2, 0), (4, 5)] {
            let merged = mock_collection("a", a, 2) + mock_collection("b", b, 2);
            assert_eq!(merged.iter().count(), 2 * (a + b));
        }
    }

    #[test]
    fn test_merge_colliding_keys_keeps_everything() {
        let left = mock_collection("x", 3, 2);
        let right = mock_collection("x", 2, 3);
        let merged = left + right;
        assert_eq!(merged.num_items(), 3);
        assert_eq!(merged.len(), 12);
    }

    #[test]
    fn test_merge_is_associative() {
        let a = || mock_collection("x", 2, 1);
        let b = || mock_collection("y", 1, 2);
        let c = || mock_collection("x", 3, 1);
        let left = (a() + b()) + c();
        let right = a() + (b() + c());
        let ids = |c: &AssetCollection| c.iter().map(ExtractAsset::id).collect::<Vec<_>>();
        assert_eq!(ids(&left), ids(&right));
    }

    #[test]
    fn test_aggregates() {
        let mut collection = AssetCollection::new();
        collection.add_asset("i1", mock_asset("i1", "red", 10));
        collection.add_asset("i1", mock_asset("i1", "blue", -1));
        let mut green = mock_asset("i2", "green", 20);
        green.downloaded = true;
        collection.add_asset("i2", green);

        assert_eq!(collection.num_assets_with_unknown_size(), 1);
        assert_eq!(collection.num_assets_to_download(), 2);
        assert_eq!(collection.num_assets_downloaded(), 1);
        assert_eq!(collection.total_size(), 30);
        assert_eq!(collection.total_undownloaded_size(), 10);
        assert!(collection.total_size() > collection.total_undownloaded_size());
    }

    #[test]
    fn test_sizes_equal_when_nothing_downloaded() {
        let collection = mock_collection("z", 3, 3);
        assert_eq!(collection.total_size(), collection.total_undownloaded_size());
        assert_eq!(collection.total_size(), 90);
    }

    #[test]
    fn test_summary_breakdown() {
        let mut collection = mock_collection("a", 2, 2);
        let mut other = mock_asset("b0", "red", -1);
        other.provider_name = "Other".to_string();
        collection.add_asset("b0", other);

        let summary = collection.summary();
        assert_eq!(summary.num_assets, 5);
        assert_eq!(summary.num_unknown_size, 1);
        assert_eq!(summary.sources.len(), 2);
        assert_eq!(collection.provider_collections().len(), 2);
        let text = summary.to_string();
        assert!(text.contains("Total asset size: 40 MB"));
        assert!(text.contains("Number of assets with unknown size: 1"));
    }

    #[test]
    fn test_outfile_layout() {
        let out = asset_outfile(
            Path::new("/data"),
            "landsat-c2-l2",
            "LC09_001",
            "https://host/path/LC09_B4.TIF?st=2024&sig=abc",
        );
        assert_eq!(out, PathBuf::from("/data/landsat-c2-l2/LC09_001/LC09_B4.TIF"));
    }

    #[test]
    fn test_long_basename_is_hashed() {
        let long = format!("{}.nc", "x".repeat(150));
        let out = asset_outfile(Path::new("/d"), "c", "i", &format!("https://h/{long}"));
        let name = out.file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), 64 + 3);
        assert!(name.ends_with(".nc"));
    }
}
