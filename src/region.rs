//! Areas of interest loaded from GeoJSON files.
//!
//! Spatial filtering itself happens in the catalog; a [`Region`] is only the
//! geometry handed to a search as its `intersects` parameter.
use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A GeoJSON geometry object.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    geometry: Value,
}

impl Region {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Unable to read area of interest {}", path.display()))?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("{} is not valid GeoJSON", path.display()))?;
        Self::from_geojson(value)
    }

    /// Accepts a bare geometry, a Feature or a FeatureCollection. Several
    /// features are combined into a single geometry.
    pub fn from_geojson(value: Value) -> Result<Self> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(anyhow!("GeoJSON object has no type"))?;

        let geometry = match kind {
            "Feature" => value
                .get("geometry")
                .cloned()
                .filter(|g| !g.is_null())
                .ok_or(anyhow!("Feature has no geometry"))?,
            "FeatureCollection" => {
                let geometries = value
                    .get("features")
                    .and_then(Value::as_array)
                    .ok_or(anyhow!("FeatureCollection has no features"))?
                    .iter()
                    .filter_map(|f| f.get("geometry").filter(|g| !g.is_null()).cloned())
                    .collect::<Vec<_>>();
                combine(geometries)?
            }
            _ => value,
        };
        Ok(Self { geometry })
    }

    pub fn geometry(&self) -> &Value {
        &self.geometry
    }
}

fn combine(mut geometries: Vec<Value>) -> Result<Value> {
    if geometries.is_empty() {
        return Err(anyhow!("FeatureCollection has no geometries"));
    }
    if geometries.len() == 1 {
        return Ok(geometries.remove(0));
    }

    let polygonal = geometries.iter().all(|g| {
        matches!(
            (g.get("type").and_then(Value::as_str), g.get("coordinates")),
            (Some("Polygon"), Some(_)) | (Some("MultiPolygon"), Some(Value::Array(_)))
        )
    });
    if !polygonal {
        return Ok(json!({"type": "GeometryCollection", "geometries": geometries}));
    }

    let mut polygons = vec![];
    for mut geometry in geometries {
        let is_multi = geometry["type"] == "MultiPolygon";
        match geometry["coordinates"].take() {
            Value::Array(parts) if is_multi => polygons.extend(parts),
            coordinates => polygons.push(coordinates),
        }
    }
    Ok(json!({"type": "MultiPolygon", "coordinates": polygons}))
}

/// Regions parsed during one run, keyed by file path so each file is read
/// once.
#[derive(Debug, Default)]
pub struct RegionCache {
    regions: HashMap<PathBuf, Region>,
}

impl RegionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(&mut self, path: &Path) -> Result<Region> {
        if let Some(region) = self.regions.get(path) {
            return Ok(region.clone());
        }
        debug!(path = %path.display(), "loading area of interest");
        let region = Region::read(path)?;
        self.regions.insert(path.to_path_buf(), region.clone());
        Ok(region)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
