use chrono::Local;
use clap::Parser;
use log::{error, info, warn};

use member_sweep::config::Cli;
use member_sweep::process::CrawlOrchestrator;
use member_sweep::record::RunMetadata;
use member_sweep::sink::{FileSink, PersistenceSink, PostgresStore, RelationalSink};
use member_sweep::upload::DropboxUploader;
use member_sweep::webdriver::ChromeLauncher;
use member_sweep::{info_time, logger, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Local::now();
    logger::init();

    let config = Cli::parse().into_config()?;
    info!("Starting the Skool member sweep...");

    let store = PostgresStore::new(&config.store.database_url);
    match store.probe().await {
        Ok(()) => info!("Connected to Postgres."),
        Err(err) => warn!("Postgres isn't reachable right now ({err}). Pages will still be written to the CSV."),
    }
    if config.store.prepare_table {
        if let Err(err) = store.ensure_table(&config.store.table).await {
            warn!("Couldn't prepare table `{}`: {err}", config.store.table);
        }
    }

    let file = FileSink::create(&config.output_path)?;
    let metadata = RunMetadata {
        script: config.script_name.clone(),
        output_file: config.output_path.display().to_string(),
    };
    let relational = RelationalSink::new(store, &config.store.table, metadata, config.pacing);
    let launcher = ChromeLauncher::new(&config.webdriver_url, config.headless)?;

    let mut orchestrator =
        CrawlOrchestrator::new(&config, launcher, PersistenceSink::new(file, relational));
    let run = orchestrator.run().await;
    match &run {
        Ok(summary) => info!(
            "Sweep finished: {:?}, {} recoveries, {} recycles.",
            summary.outcome, summary.recoveries, summary.recycles
        ),
        Err(err) => error!("Sweep stopped: {err}"),
    }

    match &config.dropbox {
        // A header-only file isn't worth shipping.
        _ if orchestrator.pages_flushed() == 0 => {
            info!("No page was saved. Dropbox upload skipped.")
        }
        Some(credentials) => {
            let uploader = DropboxUploader::new(credentials.clone());
            if let Err(err) = uploader.upload(&config.output_path).await {
                error!("Dropbox upload failed: {err}");
            }
        }
        None => info!("Dropbox upload skipped."),
    }

    info_time!(start_time, "Full program time:");
    run.map(|_| ())
}
