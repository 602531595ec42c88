use anyhow::Result;
use clap::Parser;
use setlist_bootstrap::Config;
use std::path::PathBuf;

mod commands;

#[derive(Debug, Parser)]
#[command(name = "setlist", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the database (default: ~/.local/share/setlist/catalog.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Populate the local catalog from the published archive
    ///
    /// Checks whether the local database already holds a complete import of
    /// the requested archive. If it does, nothing is downloaded. Otherwise
    /// the archive is downloaded (resuming a previous partial download when
    /// possible), verified against its SHA-256, extracted, and imported:
    ///
    /// - Shows are written first
    /// - Venues are derived from the imported shows
    /// - Recordings are attached to their shows
    /// - A completion marker is written last
    ///
    /// An interrupted run never writes a completion marker for the new
    /// archive, so the next run starts over. Press Ctrl-C to cancel.
    ///
    /// The archive location defaults to `catalog_url`, `catalog_sha256` and
    /// `catalog_size` from the config file.
    Bootstrap {
        /// Archive URL (http, https, or a local path)
        #[arg(long)]
        url: Option<String>,

        /// Expected SHA-256 of the archive, hex encoded
        #[arg(long)]
        sha256: Option<String>,

        /// Expected archive size in bytes
        #[arg(long)]
        size: Option<u64>,

        /// Re-import even when the local catalog is complete
        #[arg(long)]
        force: bool,

        /// Print progress events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Show catalog status
    Status,
    /// Show one show and its recordings
    Show {
        /// Show identifier, e.g. gd1977-05-08
        key: String,
    },
    /// List venues by number of shows
    Venues {
        /// Maximum number of venues to list
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, clap::Subcommand)]
enum ConfigAction {
    /// Create the config file with defaults
    Init,
    /// Show the effective configuration
    Show,
    /// Print a config value, or the whole file
    Get { key: Option<String> },
    /// Set a config value
    Set { key: String, value: String },
    /// Print the config file path
    Path,
    /// Print an example config file
    Example,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Bootstrap {
            url,
            sha256,
            size,
            force,
            json,
        } => {
            let config = load_config(cli.db)?;
            let args = commands::BootstrapArgs {
                url,
                sha256,
                size,
                force,
                json,
            };
            commands::run_bootstrap(&config, args).await?;
        }
        Commands::Status => {
            let config = load_config(cli.db)?;
            commands::show_status(&config.database_path)?;
        }
        Commands::Show { key } => {
            let config = load_config(cli.db)?;
            commands::show_show(&config.database_path, &key)?;
        }
        Commands::Venues { limit } => {
            let config = load_config(cli.db)?;
            commands::list_venues(&config.database_path, limit)?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Init => commands::config::init_config()?,
            ConfigAction::Show => commands::config::show_config()?,
            ConfigAction::Get { key } => commands::config::get_config(key)?,
            ConfigAction::Set { key, value } => commands::config::set_config(&key, &value)?,
            ConfigAction::Path => commands::config::show_path(),
            ConfigAction::Example => commands::config::show_example(),
        },
    }

    Ok(())
}

/// `--db` overrides whatever the config file and environment say.
fn load_config(db: Option<PathBuf>) -> Result<Config> {
    match db {
        Some(db) => Config::load_with_db_path(db),
        None => Config::load(),
    }
}
