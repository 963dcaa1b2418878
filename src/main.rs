use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};

use meteo_etl::catalog::StationCatalog;
use meteo_etl::config::Config;
use meteo_etl::extract::HttpExtractor;
use meteo_etl::load::{Loader, SqliteStore};
use meteo_etl::pipeline::Pipeline;
use meteo_etl::types::{CancelFlag, RunReport};

#[derive(Parser)]
#[command(name = "meteo_etl")]
#[command(about = "Toulouse Métropole weather data ETL")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one extract-transform-load pass
    Run {
        /// Station identifiers to process (comma-separated). Default: all known stations
        #[arg(long)]
        stations: Option<String>,
        /// Maximum records to fetch per station
        #[arg(long, default_value_t = 100)]
        limit: usize,
        /// Override the SQLite database path
        #[arg(long)]
        db: Option<String>,
    },
    /// List the known stations sorted by identifier
    ListStations,
}

fn print_report(report: &RunReport) {
    println!("\n📊 Pipeline run: {:?}", report.state);
    println!("   Fetched:    {}", report.fetched);
    println!("   Accepted:   {}", report.accepted);
    println!("   Rejected:   {}", report.rejected);
    println!("   Duplicates: {}", report.duplicates);
    println!("   Stored new: {}", report.stored_new);
    println!("   Skipped (already stored): {}", report.stored_skipped);
    println!("   Stations processed: {}", report.stations_processed);
    if !report.unresolved.is_empty() {
        println!("   ⚠ Unresolved stations: {}", report.unresolved.join(", "));
    }
    for (reason, count) in &report.rejections {
        println!("   ⚠ Rejected ({reason}): {count}");
    }
    if !report.failures.is_empty() {
        println!("\n⚠️  Failures:");
        for failure in &report.failures {
            match &failure.station_id {
                Some(id) => println!("   - [{}] station {}: {}", failure.stage, id, failure.message),
                None => println!("   - [{}] {}", failure.stage, failure.message),
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    meteo_etl::logging::init_logging();

    let cli = Cli::parse();
    let mut config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Run {
            stations,
            limit,
            db,
        } => {
            if let Some(db) = db {
                config.loader.db_path = db;
            }
            let requested: Vec<String> = stations
                .map(|s| s.split(',').map(|id| id.trim().to_string()).collect())
                .unwrap_or_default();

            let extractor = HttpExtractor::new(config.upstream.clone())?;
            info!("fetching station catalog");
            let catalog = StationCatalog::from_descriptors(extractor.list_stations().await?);
            let store = Arc::new(SqliteStore::open(&config.loader.db_path)?);
            let loader = Loader::new(store, config.loader.batch_size);
            let mut pipeline =
                Pipeline::new(catalog, Arc::new(extractor), config.transform, loader);

            let report = pipeline.run(&requested, limit, &CancelFlag::new()).await;
            print_report(&report);
            if !report.success {
                error!("run finished with failures");
                std::process::exit(1);
            }
        }
        Commands::ListStations => {
            let extractor = HttpExtractor::new(config.upstream.clone())?;
            let catalog = StationCatalog::from_descriptors(extractor.list_stations().await?);
            println!("{} known stations:\n", catalog.len());
            for station in catalog.all_sorted() {
                let commune = station
                    .metadata
                    .get("commune")
                    .map(|c| format!(" ({c})"))
                    .unwrap_or_default();
                println!("  {}  {}{}", station.id, station.name, commune);
            }
        }
    }
    Ok(())
}
