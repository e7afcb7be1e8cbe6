//! `niord` command-line entry point.
//!
//! # Responsibility
//! - Load configuration and logging before any store access.
//! - Map subcommands onto `niord_core` operations and print results.

mod cli;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use log::info;
use niord_core::config::NiordConfig;
use niord_core::db::open_db;
use niord_core::light::{describe_light, parse_light_character};
use niord_core::search::{IndexActor, IndexQuery, MessageIndex};
use niord_core::service::schedule_service::{now_ms, run_scheduled_checks, SchedulerRunner};
use niord_core::SqliteMessageRepository;
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    start_logging(&config)?;

    match cli.command {
        Commands::Light { text, describe } => {
            let model = parse_light_character(&text)
                .with_context(|| format!("cannot parse light character `{text}`"))?;
            println!("{model}");
            if describe {
                println!("{}", describe_light(&model));
            }
        }
        Commands::Search { query, lang, limit } => {
            let mut index = open_index(&config)?;
            catch_up(&config, &mut index)?;

            let mut request = IndexQuery::new(query);
            request.lang = lang;
            request.max_hits = limit;
            let hits = index.search(&request).context("search failed")?;
            for hit in &hits {
                println!("{}\t{:.4}", hit.message_id, hit.score);
            }
            info!("event=cli_search module=cli status=ok hits={}", hits.len());
        }
        Commands::Reindex { recreate } => {
            let mut index = open_index(&config)?;
            let count = if recreate {
                let store = open_db(&config.database_path)
                    .with_context(|| format!("cannot open {}", config.database_path.display()))?;
                let repo = SqliteMessageRepository::try_new(&store)?;
                index.recreate_index(&repo, config.index.batch_size)?
            } else {
                catch_up(&config, &mut index)?
            };
            println!("indexed {count} messages");
        }
        Commands::Schedule => {
            let store = open_db(&config.database_path)
                .with_context(|| format!("cannot open {}", config.database_path.display()))?;
            let now = now_ms();
            let (expired, published) = run_scheduled_checks(&store, now)?;
            println!(
                "expired {}/{} (failed {}), published {}/{} (failed {})",
                expired.transitioned,
                expired.examined,
                expired.failed,
                published.transitioned,
                published.examined,
                published.failed
            );
        }
        Commands::Run => {
            let index = open_index(&config)?;
            let index_store = open_db(&config.database_path)?;
            let schedule_store = open_db(&config.database_path)?;

            let _actor = IndexActor::spawn(index, index_store, config.index.clone())?;
            let _scheduler = SchedulerRunner::spawn(schedule_store, config.schedule.clone())?;
            info!("event=cli_run module=cli status=ok");
            loop {
                std::thread::park();
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<NiordConfig> {
    match path {
        Some(path) => NiordConfig::from_file(path)
            .with_context(|| format!("cannot load config {}", path.display())),
        None => Ok(NiordConfig::default()),
    }
}

fn start_logging(config: &NiordConfig) -> Result<()> {
    let level = config.logging.level.as_str();
    let result = match config.logging.dir.as_deref() {
        Some(dir) => {
            let dir = dir
                .to_str()
                .ok_or_else(|| anyhow!("log directory is not valid UTF-8"))?;
            niord_core::init_logging(level, dir)
        }
        None => niord_core::init_stderr_logging(level),
    };
    result.map_err(|err| anyhow!(err))
}

fn open_index(config: &NiordConfig) -> Result<MessageIndex> {
    let index = match config.index_path.as_deref() {
        Some(path) => MessageIndex::open(path, &config.index)
            .with_context(|| format!("cannot open index {}", path.display()))?,
        None => MessageIndex::open_in_memory(&config.index)?,
    };
    Ok(index)
}

/// Runs incremental updates until the index has seen every change.
fn catch_up(config: &NiordConfig, index: &mut MessageIndex) -> Result<usize> {
    let store = open_db(&config.database_path)
        .with_context(|| format!("cannot open {}", config.database_path.display()))?;
    let repo = SqliteMessageRepository::try_new(&store)?;
    let mut total = 0;
    loop {
        // Skipped documents still count as fetched; a failed batch fetches 0.
        let outcome = index.update_index_outcome(&repo, config.index.batch_size);
        total += outcome.processed();
        if outcome.fetched < config.index.batch_size as usize {
            break;
        }
    }
    Ok(total)
}
