//! Catalog Harvester main entry point
//!
//! This is the command-line interface for the phased catalog harvester.

use catalog_harvester::config::{load_config_with_hash, Config};
use catalog_harvester::crawler::{HttpSessionProvider, RetryingFetcher, SelectorParser, Stage};
use catalog_harvester::egress;
use catalog_harvester::{run_full_pipeline, run_stage_only};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Catalog Harvester: a phased catalog crawler behind Tor
///
/// Harvests categories, subcategories, listings and item details from a
/// catalog site into a per-run workspace, routing every request through a
/// managed Tor (or Nym) egress.
#[derive(Parser, Debug)]
#[command(name = "catalog-harvester")]
#[command(version = "1.0.0")]
#[command(about = "A phased catalog crawler behind Tor", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Run a single stage (1-4) instead of the full pipeline
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=4))]
    stage: Option<u8>,

    /// Existing run to operate on
    #[arg(long, value_name = "RUN_ID")]
    run: Option<String>,

    /// Validate config and show what would be harvested without fetching
    #[arg(long, conflicts_with_all = ["stats", "rotate_identity", "stage"])]
    dry_run: bool,

    /// Show statistics of a run and exit
    #[arg(long, requires = "run", conflicts_with_all = ["dry_run", "rotate_identity", "stage"])]
    stats: bool,

    /// Ask a running egress for a new circuit and exit
    #[arg(long, conflicts_with_all = ["dry_run", "stats", "stage"])]
    rotate_identity: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let config = match load_config_with_hash(&cli.config) {
        Ok((cfg, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            cfg
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let succeeded = if cli.dry_run {
        handle_dry_run(&config)
    } else if cli.stats {
        report(handle_stats(&config, cli.run.as_deref().unwrap_or_default()))
    } else if cli.rotate_identity {
        report(handle_rotate_identity(&config).await)
    } else {
        handle_harvest(config, cli.stage, cli.run.as_deref()).await
    };

    if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("catalog_harvester=info,warn"),
            1 => EnvFilter::new("catalog_harvester=debug,info"),
            2 => EnvFilter::new("catalog_harvester=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

fn report(result: anyhow::Result<()>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            tracing::error!("{:#}", e);
            false
        }
    }
}

/// Handles the --dry-run mode: validates config and shows the planned run
fn handle_dry_run(config: &Config) -> bool {
    println!("=== Catalog Harvester Dry Run ===\n");

    println!("Crawler Configuration:");
    println!("  Base URL: {}", config.crawler.base_url);
    println!("  Pool size: {}", config.crawler.pool_size);
    println!("  Max attempts: {}", config.crawler.max_attempts);
    println!("  Attempt timeout: {}s", config.crawler.attempt_timeout_secs);
    println!("  Item batch size: {}", config.crawler.item_batch_size);
    println!("  Fetch item details: {}", config.crawler.fetch_item_details);
    println!(
        "  Paginate categories: {}",
        config.crawler.paginate_categories
    );

    println!("\nEgress ({}):", config.egress.kind);
    println!("  Binary: {} {}", config.egress.binary, config.egress.args.join(" "));
    println!("  Proxy: {}", config.egress.proxy_endpoint());
    println!(
        "  Control: {}:{}",
        config.egress.host, config.egress.control_port
    );

    println!("\nStorage:");
    println!("  Output directory: {}", config.storage.output_dir);
    println!("  Busy timeout: {}ms", config.storage.busy_timeout_ms);
    println!("  Insert attempts: {}", config.storage.insert_attempts);

    if let Err(e) = SelectorParser::new(&config.selectors, &config.crawler.base_url) {
        println!("\n✗ {}", e);
        return false;
    }

    println!("\n✓ Configuration is valid");
    let last = if config.crawler.fetch_item_details { 4 } else { 3 };
    println!("✓ Would run stages 1-{} then merge", last);

    true
}

/// Handles the --rotate-identity mode, then reports the new exit address
/// when an `ip-check-url` is configured
async fn handle_rotate_identity(config: &Config) -> anyhow::Result<()> {
    egress::rotate_identity(&config.egress).await?;

    if let Some(check_url) = &config.egress.ip_check_url {
        let proxy = config.egress.proxy_endpoint();
        match egress::exit_address(&proxy, check_url).await {
            Ok(address) => tracing::info!(%address, "Egress exit address"),
            Err(e) => tracing::warn!(error = %e, "Egress exit address unknown"),
        }
    }

    Ok(())
}

/// Handles the --stats mode: shows statistics from a run's store
fn handle_stats(config: &Config, run: &str) -> anyhow::Result<()> {
    use catalog_harvester::output::{load_statistics, print_statistics};
    use catalog_harvester::storage::open_storage;
    use catalog_harvester::workspace::{RunId, RunWorkspace};

    let base = PathBuf::from(&config.storage.output_dir);
    let workspace = RunWorkspace::open(&base, &RunId::parse(run)?)?;

    println!("Store: {}\n", workspace.store_path().display());

    let storage = open_storage(
        &workspace.store_path(),
        Duration::from_millis(config.storage.busy_timeout_ms),
    )?;
    let stats = load_statistics(&workspace, &storage)?;
    print_statistics(&stats);

    Ok(())
}

/// Handles the harvest itself, full pipeline or a single stage
async fn handle_harvest(config: Config, stage: Option<u8>, run: Option<&str>) -> bool {
    let parser = match SelectorParser::new(&config.selectors, &config.crawler.base_url) {
        Ok(parser) => Arc::new(parser),
        Err(e) => {
            tracing::error!("Invalid selectors: {}", e);
            return false;
        }
    };

    let fetcher = Arc::new(RetryingFetcher::new(
        HttpSessionProvider::new(&config.session),
        Duration::from_secs(config.crawler.attempt_timeout_secs),
        config.session.challenge_markers.clone(),
    ));
    let mut egress = egress::from_config(&config.egress);

    match stage.and_then(Stage::from_number) {
        Some(stage) => {
            tracing::info!("Running stage {} ({})", stage.number(), stage);
            run_stage_only(config, stage, run, egress.as_mut(), fetcher, parser).await
        }
        None => {
            if run.is_some() {
                tracing::warn!("--run is ignored without --stage; starting a new run");
            }
            run_full_pipeline(config, egress.as_mut(), fetcher, parser).await
        }
    }
}
