mod cli;
mod logging;
mod registry;
mod settings;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use photocache_core::{InvalidationPolicy, MaxAge, NeverStale};
use photocache_engine::{
    ensure_dir, AcquisitionCache, AlwaysOnline, ReqwestTransport, Scheduler, SelectorPageParser,
    ShutdownOutcome, TickReport, TransferQueue,
};
use photocache_logging::cache_info;
use url::Url;

use crate::cli::{Cli, Command};
use crate::registry::FileRegistry;
use crate::settings::{config_path, AppSettings, CONFIG_ENV};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("photocache error: {:#}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let path = config_path(cli.config, std::env::var(CONFIG_ENV).ok());
    let settings = AppSettings::load(&path)?;
    logging::initialize(&settings.log_destination, settings.log_level());
    cache_info!("Using settings {:?}", path);

    let cache = build_cache(&settings)?;
    match cli.command {
        Command::Run => run_scheduler(cache, &settings).await?,
        Command::Tick => {
            let report = cache.run_tick().await?;
            print_report(&report);
        }
        Command::Status => print_status(&cache),
        Command::Show { key } => print_entry(&cache, &key)?,
        Command::Retry => {
            let count = cache.queue().retry_failed()?;
            println!("{count} failed transfer(s) queued for retry");
        }
        Command::Reset { key } => {
            if !cache.reset_key(&key)? {
                bail!("{key} is not tracked or not in Error");
            }
            println!("{key} reset to New");
        }
        Command::Remove { key } => {
            if !cache.remove_key(&key)? {
                bail!("{key} is not tracked");
            }
            println!("{key} removed");
        }
        Command::Clear => {
            let count = cache.remove_all()?;
            println!("{count} entr(ies) removed");
        }
    }
    Ok(())
}

fn build_cache(settings: &AppSettings) -> Result<Arc<AcquisitionCache>> {
    let config = settings.engine_config();
    ensure_dir(&config.queue.root_dir)
        .with_context(|| format!("cannot use data directory {:?}", config.queue.root_dir))?;

    let transport = ReqwestTransport::new(config.fetch.clone()).context("cannot build HTTP client")?;
    let queue = TransferQueue::load(config.queue, Arc::new(transport), Arc::new(AlwaysOnline))
        .context("cannot load transfer queue")?;

    let base_url = settings
        .base_url
        .as_deref()
        .map(Url::parse)
        .transpose()
        .context("invalid base_url")?;
    let parser = SelectorPageParser::new(&settings.selectors, base_url)?;

    let invalidation: Arc<dyn InvalidationPolicy> = match settings.max_age_days {
        Some(days) => Arc::new(MaxAge(chrono::Duration::days(days))),
        None => Arc::new(NeverStale),
    };

    let cache = AcquisitionCache::load(
        config.cache,
        Arc::new(queue),
        Arc::new(FileRegistry::new(settings.registry_file.clone())),
        Arc::new(parser),
        Arc::new(settings.urls.clone()),
    )
    .context("cannot load cache state")?
    .with_invalidation(invalidation);
    Ok(Arc::new(cache))
}

async fn run_scheduler(cache: Arc<AcquisitionCache>, settings: &AppSettings) -> Result<()> {
    let scheduler = Arc::new(Scheduler::new(cache, settings.engine_config().scheduler));
    let handle = scheduler.spawn();
    tokio::signal::ctrl_c()
        .await
        .context("failed waiting for shutdown signal")?;
    cache_info!("Shutdown requested");
    match handle.shutdown().await {
        ShutdownOutcome::Clean => println!("stopped"),
        ShutdownOutcome::TimedOut => println!("stopped; the running tick was abandoned"),
    }
    Ok(())
}

fn print_report(report: &TickReport) {
    println!(
        "tick {}: {} discovered, {} advanced, {} failed, {} pending",
        report.tick, report.discovered, report.advanced, report.failed, report.pending
    );
    let drain = &report.drain;
    match drain.skipped {
        Some(reason) => println!("transfers skipped: {reason:?}"),
        None => println!(
            "transfers: {} attempted, {} succeeded, {} failed",
            drain.attempted, drain.succeeded, drain.failed
        ),
    }
}

fn print_status(cache: &AcquisitionCache) {
    let entries = cache.entries();
    if entries.is_empty() {
        println!("no entries");
        return;
    }
    for (key, entry) in &entries {
        let expected = entry
            .expected_sub_item_count
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string());
        print!(
            "{key:<24} {:<40} {}/{expected}",
            entry.state.to_string(),
            entry.sub_items.len()
        );
        match &entry.last_error {
            Some(err) => println!("  {err}"),
            None => println!(),
        }
    }
    let overview = cache.overview();
    println!("{} entr(ies), {} pending", overview.total, overview.pending());
}

fn print_entry(cache: &AcquisitionCache, key: &str) -> Result<()> {
    let Some(entry) = cache.entry(key) else {
        bail!("{key} is not tracked");
    };
    println!("{key} ({}) is {}", entry.remote_id, entry.state);
    if let Some(summary) = cache.summary_fields(key) {
        println!("  title:       {}", summary.title);
        println!("  subtitle:    {}", summary.subtitle);
        println!("  description: {}", summary.description);
    }
    if let Some(hash) = &entry.content_hash {
        println!("  hash:        {hash}");
    }
    for item in cache.sub_items_for_key(key) {
        println!(
            "  - {} [{}] by {} -> {}",
            item.label.as_deref().unwrap_or("-"),
            item.source_url,
            item.author.as_deref().unwrap_or("unknown"),
            item.local_file_ref.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}
