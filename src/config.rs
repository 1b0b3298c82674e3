//! Extraction config: TOML file, collection defaults and dotted-key overrides.
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use toml::{Table, Value};

use crate::datetime::validate_datetime_range;
use crate::error::ConfigError;
use crate::provider::ProviderKey;

/// Asset list entry meaning "every asset the item exposes".
pub const ALL_ASSETS: &str = "all";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SystemConfig {
    pub log_outdir: PathBuf,
    pub log_level: String,
    /// Discover and size assets but download nothing.
    pub dry_run: bool,
    /// Number of download workers, also the size-probe concurrency.
    pub max_concurrent_extractions: usize,
    pub max_download_attempts: u32,
    pub remove_existing_if_wrong_size: bool,
    /// Probe the download URL of assets whose size the catalog omits.
    pub query_asset_sizes: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_outdir: PathBuf::from("./logs"),
            log_level: "info".to_string(),
            dry_run: false,
            max_concurrent_extractions: 10,
            max_download_attempts: 3,
            remove_existing_if_wrong_size: false,
            query_asset_sizes: true,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CollectionConfig {
    pub id: Option<String>,
    pub assets: Option<Vec<String>>,
    pub outdir: Option<PathBuf>,
    pub datetime: Option<String>,
    pub aoi_file: Option<PathBuf>,
    pub max_items: Option<i64>,
}

impl CollectionConfig {
    /// Fills every unset field from `defaults` and checks the result is
    /// complete.
    pub fn merged(&self, defaults: &CollectionConfig) -> Result<CollectionSpec, ConfigError> {
        let id = self
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or(ConfigError::MissingField {
                collection: "<unnamed>".to_string(),
                field: "id",
            })?;
        let missing = |field| ConfigError::MissingField {
            collection: id.clone(),
            field,
        };

        let assets = self
            .assets
            .clone()
            .filter(|a| !a.is_empty())
            .or_else(|| defaults.assets.clone().filter(|a| !a.is_empty()))
            .unwrap_or_else(|| vec![ALL_ASSETS.to_string()]);
        let outdir = self
            .outdir
            .clone()
            .or_else(|| defaults.outdir.clone())
            .ok_or_else(|| missing("outdir"))?;
        let datetime = self
            .datetime
            .clone()
            .filter(|d| !d.is_empty())
            .or_else(|| defaults.datetime.clone())
            .ok_or_else(|| missing("datetime"))?;
        let aoi_file = self.aoi_file.clone().or_else(|| defaults.aoi_file.clone());
        let max_items = self
            .max_items
            .filter(|&m| m != -1)
            .or(defaults.max_items)
            .unwrap_or(-1);

        Ok(CollectionSpec {
            id,
            assets,
            outdir,
            datetime,
            aoi_file,
            max_items,
        })
    }
}

/// A collection with all defaults applied.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct CollectionSpec {
    pub id: String,
    pub assets: Vec<String>,
    pub outdir: PathBuf,
    pub datetime: String,
    pub aoi_file: Option<PathBuf>,
    pub max_items: i64,
}

impl CollectionSpec {
    pub fn wants_all_assets(&self) -> bool {
        self.assets.len() == 1 && self.assets[0] == ALL_ASSETS
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub id: ProviderKey,
    #[serde(default)]
    pub kwargs: Table,
    #[serde(default)]
    pub collections: Vec<CollectionConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub default_collection: CollectionConfig,
    pub providers: Vec<ProviderConfig>,
    pub system: SystemConfig,
}

impl Config {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load(path, &[])
    }

    /// Reads `path`, applies `section.key=value` overrides and validates.
    pub fn load<P: AsRef<Path>>(path: P, overrides: &[String]) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content, overrides)
    }

    pub fn from_toml(content: &str, overrides: &[String]) -> Result<Self, ConfigError> {
        let table: Table = content
            .parse()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;
        let mut root = Value::Table(table);
        for raw in overrides {
            apply_override(&mut root, raw)?;
        }
        let config: Self = root
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.system.max_concurrent_extractions == 0 {
            return Err(ConfigError::InvalidSetting(
                "max_concurrent_extractions",
                "at least one worker is required".to_string(),
            ));
        }
        if self.system.max_download_attempts == 0 {
            return Err(ConfigError::InvalidSetting(
                "max_download_attempts",
                "at least one attempt is required".to_string(),
            ));
        }
        for provider in &self.providers {
            for collection in self.collections_for(provider)? {
                validate_datetime_range(&collection.datetime)?;
            }
        }
        Ok(())
    }

    pub fn collections_for(
        &self,
        provider: &ProviderConfig,
    ) -> Result<Vec<CollectionSpec>, ConfigError> {
        provider
            .collections
            .iter()
            .map(|c| c.merged(&self.default_collection))
            .collect()
    }

    /// Ids of every configured collection, across providers.
    pub fn collection_ids(&self) -> Vec<String> {
        self.providers
            .iter()
            .flat_map(|p| p.collections.iter())
            .filter_map(|c| c.id.clone())
            .collect()
    }
}

fn override_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][\w-]*(\.[\w-]+)*$").expect("Regex pattern should always compile")
    })
}

/// Applies one `dotted.key=value` override to a raw config tree. Numeric
/// segments index into arrays.
pub fn apply_override(root: &mut Value, raw: &str) -> Result<(), ConfigError> {
    let invalid = |why: String| ConfigError::InvalidOverride(raw.to_string(), why);

    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| invalid("expected section.key=value".to_string()))?;
    let key = key.trim();
    if !override_key_pattern().is_match(key) {
        return Err(invalid(format!("'{key}' is not a dotted key")));
    }
    let path = key.split('.').collect::<Vec<_>>();
    set_path(root, &path, parse_override_value(value.trim())).map_err(invalid)
}

fn parse_override_value(raw: &str) -> Value {
    let parsed = format!("v = {raw}")
        .parse::<Table>()
        .ok()
        .and_then(|mut t| t.remove("v"));
    match parsed {
        // Dates stay strings, every datetime in the schema is a STAC range
        Some(Value::Datetime(_)) | None => Value::String(raw.to_string()),
        Some(value) => value,
    }
}

fn set_path(node: &mut Value, path: &[&str], value: Value) -> Result<(), String> {
    let (head, rest) = path.split_first().ok_or("empty key")?;
    match node {
        Value::Table(table) => {
            if rest.is_empty() {
                table.insert(head.to_string(), value);
                return Ok(());
            }
            let child = table
                .entry(head.to_string())
                .or_insert(Value::Table(Table::new()));
            set_path(child, rest, value)
        }
        Value::Array(array) => {
            let index: usize = head
                .parse()
                .map_err(|_| format!("'{head}' is not an array index"))?;
            let len = array.len();
            let child = array
                .get_mut(index)
                .ok_or_else(|| format!("index {index} out of range for {len} elements"))?;
            if rest.is_empty() {
                *child = value;
                return Ok(());
            }
            set_path(child, rest, value)
        }
        _ => Err(format!("cannot set '{head}' inside a scalar value")),
    }
}
