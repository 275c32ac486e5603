//! FilmFlux: similar-movie recommendations with cached poster enrichment.
//!
//! # Commands
//!
//! - `recommend <TITLE>`: rank the closest titles and attach a poster to each
//! - `titles`: list (or filter) the selectable catalog titles
//! - `reset-cache`: drop every cached poster URL
//! - `set-api-key <KEY>`: store the metadata service key in the OS keyring

mod app_context;
mod asset_cache;
mod catalog;
mod config;
mod config_persistence;
mod credentials;
mod poster_enrichment;
mod protocol;
mod recommendation_engine;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::{debug, info};

use app_context::AppContext;
use catalog::Catalog;
use protocol::{AssetSource, RecommendError, RecommendedItem};

/// Similar-movie recommendations with poster enrichment
#[derive(Parser)]
#[command(name = "filmflux")]
#[command(version = "0.1.0")]
#[command(about = "Recommend movies similar to a selected title")]
#[command(propagate_version = true)]
struct Cli {
    /// Config file (defaults to <config dir>/filmflux/filmflux.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only show warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recommend titles similar to TITLE
    Recommend {
        /// Exact catalog title of the selected movie
        title: String,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// List catalog titles
    Titles {
        /// Case-insensitive substring filter
        #[arg(long)]
        filter: Option<String>,
    },
    /// Delete every cached poster URL
    ResetCache,
    /// Store the metadata service API key in the OS keyring
    SetApiKey {
        key: String,
    },
}

fn log_level(verbose: u8, quiet: bool) -> log::LevelFilter {
    if quiet {
        return log::LevelFilter::Warn;
    }
    match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

fn render_recommendations(selected: &str, items: &[RecommendedItem]) -> String {
    let mut out = format!("Recommended Movies for '{selected}'\n");
    for (rank, item) in items.iter().enumerate() {
        out.push_str(&format!(
            "{:>2}. {} [{:.3}]\n    {} ({})\n",
            rank + 1,
            item.title,
            item.score,
            item.asset_url,
            item.source.label()
        ));
    }
    let placeholders = items
        .iter()
        .filter(|item| matches!(item.source, AssetSource::Placeholder(_)))
        .count();
    if placeholders > 0 {
        out.push_str(&format!(
            "{placeholders} of {} posters fell back to the placeholder image\n",
            items.len()
        ));
    }
    out
}

fn load_config(config_path: &Path) -> config::Config {
    if let Err(err) = config_persistence::ensure_config_file(config_path) {
        log::warn!(
            "Could not create config file {}: {}",
            config_path.display(),
            err
        );
    }
    config_persistence::load_config_file(config_path)
}

fn run_recommend(
    config_path: &Path,
    title: &str,
    json: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = load_config(config_path);
    let context = AppContext::bootstrap(config, config_path)?;
    let engine = context.recommendation_engine();

    let result = engine.recommend(title);
    match context.asset_cache.len() {
        Ok(entries) => debug!("Poster cache holds {} entries after request", entries),
        Err(err) => debug!("Poster cache size unavailable after request: {}", err),
    }
    match result {
        Ok(items) if json => {
            println!("{}", serde_json::to_string_pretty(&items)?);
            Ok(ExitCode::SUCCESS)
        }
        Ok(items) if items.is_empty() => {
            eprintln!("No recommendations found for the selected movie.");
            Ok(ExitCode::FAILURE)
        }
        Ok(items) => {
            print!("{}", render_recommendations(title, &items));
            Ok(ExitCode::SUCCESS)
        }
        Err(RecommendError::ItemNotFound { .. }) => {
            eprintln!("Selected movie not found in the database.");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn run_titles(
    config_path: &Path,
    filter: Option<&str>,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = load_config(config_path);
    let catalog_path =
        app_context::resolve_data_path(config_path.parent(), &config.data.catalog_path);
    let catalog = Catalog::load(&catalog_path)?;
    for item in catalog.search(filter.unwrap_or_default()) {
        println!("{:>6}  {}", item.index, item.title);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_reset_cache(config_path: &Path) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let config = load_config(config_path);
    let cache = app_context::open_asset_cache(&config)?;
    let removed = cache.clear()?;
    info!("Cleared {} cached poster URLs", removed);
    println!("Removed {removed} cached posters.");
    Ok(ExitCode::SUCCESS)
}

fn run_set_api_key(key: &str) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let key = key.trim();
    if key.is_empty() {
        eprintln!("API key must not be empty.");
        return Ok(ExitCode::FAILURE);
    }
    credentials::store_api_key(key)?;
    println!("API key stored in the OS keyring.");
    Ok(ExitCode::SUCCESS)
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut clog = colog::default_builder();
    clog.filter(None, log_level(cli.verbose, cli.quiet));
    clog.init();

    std::panic::set_hook(Box::new(|panic_info| {
        let current_thread = std::thread::current();
        let thread_name = current_thread.name().unwrap_or("unnamed");
        log::error!("panic in thread '{}': {}", thread_name, panic_info);
    }));

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(config_persistence::default_config_path);
    debug!("Using config file {}", config_path.display());

    match cli.command {
        Commands::Recommend { title, json } => run_recommend(&config_path, &title, json),
        Commands::Titles { filter } => run_titles(&config_path, filter.as_deref()),
        Commands::ResetCache => run_reset_cache(&config_path),
        Commands::SetApiKey { key } => run_set_api_key(&key),
    }
}
