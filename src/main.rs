use anyhow::Result;
use chrono::Local;
use clap::Parser;
use slow_stac::config::Config;
use slow_stac::extract::Extractor;
use slow_stac::fetch::HttpFetcher;
use slow_stac::logging;
use slow_stac::provider::ProviderStore;
use slow_stac::run::RunArtifacts;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Extract assets of STAC catalogs into local files.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Extraction config (TOML)
    #[arg(short, long)]
    config: PathBuf,

    /// Config overrides such as `system.dry_run=true`
    overrides: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let config = Config::load(&args.config, &args.overrides)?;

    let artifacts = RunArtifacts::new(
        config.system.log_outdir.clone(),
        &config.collection_ids(),
        Local::now(),
    );
    artifacts.create_dir()?;
    logging::init(&config.system, &artifacts.log_path())?;
    info!("Starting run {}", artifacts.run_id());
    let snapshot = artifacts.write_config(&config)?;
    info!("Config written to {}", snapshot.display());

    let fetcher = Arc::new(HttpFetcher::new()?);
    let mut extractor = Extractor::new(config, ProviderStore::default(), fetcher, artifacts);
    match extractor.run().await {
        Ok(report) if report.success => Ok(ExitCode::SUCCESS),
        Ok(_) => Ok(ExitCode::FAILURE),
        Err(e) => {
            error!("Extraction aborted during {}: {e:#}", extractor.phase());
            Err(e)
        }
    }
}
