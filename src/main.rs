//! # Origin Crawler CLI (`ocrawl`)
//!
//! ## Usage
//!
//! ```bash
//! ocrawl --config ./config/ocrawl.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ocrawl init` | Create the SQLite database and run schema migrations |
//! | `ocrawl origins` | List tracked origins with dead score and cursor |
//! | `ocrawl add-origin <id>` | Register a new origin after probing it once |
//! | `ocrawl crawl` | Run one crawl cycle over every tracked origin |
//!
//! Channel credentials are read from `CHANNEL_API_ID`, `CHANNEL_API_HASH`
//! and `CHANNEL_PHONE_NUMBER` (a `.env` file is honoured).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use origin_crawler::config::{load_config, Config};
use origin_crawler::{crawl, migrate, origins, register};

/// Origin Crawler: incremental crawler for messaging-channel origins.
#[derive(Parser)]
#[command(
    name = "ocrawl",
    about = "Origin Crawler: incremental crawler for messaging-channel origins",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ocrawl.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// List tracked origins with dead score, cursor and last snapshot time.
    Origins,

    /// Register a new origin to track.
    ///
    /// The identifier is a channel username or a numeric channel id
    /// (`-` followed by 13 digits). The origin is probed once and stored
    /// with an initial metadata snapshot.
    AddOrigin {
        /// Channel username or numeric channel id.
        #[arg(allow_hyphen_values = true)]
        identifier: String,
    },

    /// Run one crawl cycle.
    ///
    /// Probes every tracked origin, refreshes stale snapshots, ingests new
    /// supported files and hands them to the analyzer.
    Crawl {
        /// Only crawl the origin registered under this identifier.
        #[arg(long, allow_hyphen_values = true)]
        origin: Option<String>,
    },
}

fn init_logging(config: &Config) {
    let default_filter = format!(
        "origin_crawler={},ocrawl={}",
        config.crawl.log_level.to_lowercase(),
        config.crawl.log_level.to_lowercase()
    );

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    init_logging(&config);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&config).await?;
            println!("database initialized: {}", config.db.path.display());
        }
        Commands::Origins => {
            origins::list_origins(&config).await?;
        }
        Commands::AddOrigin { identifier } => {
            register::run_add_origin(&config, &identifier).await?;
        }
        Commands::Crawl { origin } => {
            crawl::run_crawl(&config, origin).await?;
        }
    }

    Ok(())
}
