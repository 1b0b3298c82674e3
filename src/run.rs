//! Files a run leaves behind in the log directory.
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fmt::Display;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct RunArtifacts {
    log_outdir: PathBuf,
    run_id: String,
}

impl RunArtifacts {
    /// The run id is the sorted collection ids joined with `-`, followed by
    /// the start time to the minute.
    pub fn new(log_outdir: impl Into<PathBuf>, collection_ids: &[String], now: DateTime<Local>) -> Self {
        let mut ids: Vec<String> = collection_ids.iter().map(|id| sanitize(id)).collect();
        ids.sort();
        ids.dedup();
        let prefix = if ids.is_empty() {
            "extract".to_string()
        } else {
            ids.join("-")
        };
        Self {
            log_outdir: log_outdir.into(),
            run_id: format!("{prefix}_{}", now.format("%Y-%m-%d-%H-%M")),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log_outdir(&self) -> &Path {
        &self.log_outdir
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_outdir.join(format!("{}.log", self.run_id))
    }

    pub fn config_snapshot_path(&self) -> PathBuf {
        self.log_outdir.join(format!("{}_cfg.toml", self.run_id))
    }

    pub fn failed_log_path(&self) -> PathBuf {
        self.log_outdir.join(format!("{}_failed.log", self.run_id))
    }

    pub fn create_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.log_outdir)
            .with_context(|| format!("Unable to create {}", self.log_outdir.display()))
    }

    /// Snapshot of the effective config, overrides included.
    pub fn write_config(&self, config: &Config) -> Result<PathBuf> {
        let path = self.config_snapshot_path();
        config
            .write(&path)
            .with_context(|| format!("Unable to write {}", path.display()))?;
        Ok(path)
    }

    /// One `<asset> <<error>>` line per failure. Nothing is written when
    /// there were no failures.
    pub fn write_failed<A, E>(&self, failures: &[(A, E)]) -> Result<Option<PathBuf>>
    where
        A: Display,
        E: Display,
    {
        if failures.is_empty() {
            return Ok(None);
        }
        let path = self.failed_log_path();
        let file = File::create(&path)
            .with_context(|| format!("Unable to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        for (asset, error) in failures {
            writeln!(writer, "{asset} <{error}>")?;
        }
        writer.flush()?;
        Ok(Some(path))
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
