mod capture;
mod challenge;
mod listing;
mod merge;
mod parser;
mod progress;
mod resolver;
mod session;

use std::path::PathBuf;
use std::time::Instant;

use clap::{Parser, Subcommand};

const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";

#[derive(Parser)]
#[command(name = "metro_scraper", about = "Metrograph showtimes + Letterboxd ratings scraper")]
struct Cli {
    /// Directory for cached pages, raw files, and checkpoints
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the listing + events pages and write the raw films/events files
    Fetch {
        /// Use the locally cached page HTML instead of hitting the site
        #[arg(long)]
        cached: bool,
    },
    /// Resolve ratings for unprocessed catalog films via the review site
    Resolve {
        /// Max films to attempt this run (default: all unprocessed)
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// WebDriver endpoint to drive the browser through
        #[arg(long, default_value = DEFAULT_WEBDRIVER_URL)]
        webdriver_url: String,
    },
    /// Join resolved ratings with event data into the final table
    Merge,
    /// Fetch + resolve + merge in one pipeline
    Run {
        /// Max films to attempt this run
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// WebDriver endpoint to drive the browser through
        #[arg(long, default_value = DEFAULT_WEBDRIVER_URL)]
        webdriver_url: String,
        /// Use the locally cached page HTML instead of hitting the site
        #[arg(long)]
        cached: bool,
    },
    /// Show pipeline statistics
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let data_dir = cli.data_dir;

    let result = match cli.command {
        Commands::Fetch { cached } => {
            let films = listing::fetch_films(&data_dir, cached).await?;
            let events = listing::fetch_events(&data_dir, cached).await?;
            println!("Fetched {} films and {} events", films.len(), events.len());
            Ok(())
        }
        Commands::Resolve {
            limit,
            webdriver_url,
        } => {
            let films = listing::load_films(&data_dir)?;
            let stats =
                resolver::resolve_ratings(&webdriver_url, &data_dir, films, limit).await?;
            println!(
                "Done: {} attempted ({} resolved, {} skipped).",
                stats.total, stats.resolved, stats.skipped
            );
            Ok(())
        }
        Commands::Merge => {
            let rows = merge::run(&data_dir)?;
            println!("Merged table written: {} films", rows);
            Ok(())
        }
        Commands::Run {
            limit,
            webdriver_url,
            cached,
        } => {
            // Phase 1: Fetch
            let films = listing::fetch_films(&data_dir, cached).await?;
            let events = listing::fetch_events(&data_dir, cached).await?;
            println!("Fetched {} films and {} events", films.len(), events.len());

            // Phase 2: Resolve
            let t_resolve = Instant::now();
            let stats =
                resolver::resolve_ratings(&webdriver_url, &data_dir, films, limit).await?;
            println!(
                "Resolved {} films ({} ok, {} skipped) in {:.1}s",
                stats.total,
                stats.resolved,
                stats.skipped,
                t_resolve.elapsed().as_secs_f64()
            );

            // Phase 3: Merge
            let rows = merge::run(&data_dir)?;
            println!("Merged table written: {} films", rows);
            Ok(())
        }
        Commands::Stats => {
            let films = listing::load_films(&data_dir).map(|f| f.len()).unwrap_or(0);
            let events = listing::load_events(&data_dir).map(|e| e.len()).unwrap_or(0);
            let (done, skipped) = progress::stream_counts(&data_dir)?;
            println!("Catalog:   {}", films);
            println!("Events:    {}", events);
            println!("Resolved:  {}", done);
            println!("Skipped:   {}", skipped);
            println!("Remaining: {}", films.saturating_sub(done + skipped));
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
