use anyhow::{Context, Result};
use confyg::{env, Confygery};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::archive::CatalogArchiveRef;

/// Configuration for setlist.
///
/// Configuration is loaded from multiple sources with the following priority:
/// 1. CLI arguments (highest priority)
/// 2. Environment variables (SETLIST_* prefix)
/// 3. Config file (~/.config/setlist/config.toml)
/// 4. Built-in defaults (lowest priority)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the SQLite catalog database.
    ///
    /// Can be set via:
    /// - CLI: --db /path/to/db
    /// - ENV: SETLIST_DATABASE_PATH
    /// - Config: database_path = "/path/to/db"
    /// - Default: ~/.local/share/setlist/catalog.db
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,

    /// Directory for downloads and extracted catalog files.
    ///
    /// Default: ~/.cache/setlist/staging
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    /// Where to download the catalog archive from.
    pub catalog_url: Option<String>,

    /// Expected SHA-256 of the catalog archive (hex).
    pub catalog_sha256: Option<String>,

    /// Expected archive size in bytes, if published.
    pub catalog_size: Option<u64>,

    /// How many malformed records each catalog file set may contain before
    /// the import is abandoned.
    #[serde(default = "default_parse_tolerance")]
    pub parse_tolerance: usize,

    /// Retries for transient download failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// First backoff delay between download retries, in milliseconds.
    #[serde(default = "default_retry_min_delay_ms")]
    pub retry_min_delay_ms: u64,

    /// Optional cap on bytes written to staging.
    pub max_staging_bytes: Option<u64>,

    /// Capacity of the progress channel.
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
            staging_dir: default_staging_dir(),
            catalog_url: None,
            catalog_sha256: None,
            catalog_size: None,
            parse_tolerance: default_parse_tolerance(),
            max_retries: default_max_retries(),
            retry_min_delay_ms: default_retry_min_delay_ms(),
            max_staging_bytes: None,
            progress_buffer: default_progress_buffer(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Searches for config file at: ~/.config/setlist/config.toml
    /// Reads environment variables with SETLIST_ prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        let config_path = config_file_path();

        let mut builder = Confygery::new().context("Failed to create config builder")?;

        if config_path.exists() {
            let path_str = config_path
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("Config path contains invalid UTF-8"))?;
            builder
                .add_file(path_str)
                .context("Failed to load config file")?;
        }

        let env_opts = env::Options::with_top_level("setlist");
        builder
            .add_env(env_opts)
            .context("Failed to load environment variables")?;

        let config: Self = builder.build().context("Failed to build configuration")?;

        Ok(config)
    }

    /// Load configuration with custom database path.
    ///
    /// This is used when the --db CLI flag is provided.
    pub fn load_with_db_path(db_path: PathBuf) -> Result<Self> {
        let mut config = Self::load()?;
        config.database_path = db_path;
        Ok(config)
    }

    /// The configured archive reference, when both URL and hash are set.
    pub fn archive_ref(&self) -> Option<CatalogArchiveRef> {
        let url = self.catalog_url.as_deref()?;
        let sha256 = self.catalog_sha256.as_deref()?;
        let archive = CatalogArchiveRef::new(url, sha256);
        Some(match self.catalog_size {
            Some(size) => archive.with_expected_size(size),
            None => archive,
        })
    }
}

/// Get the default database path.
///
/// Returns: ~/.local/share/setlist/catalog.db (or platform equivalent)
fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("setlist")
        .join("catalog.db")
}

fn default_staging_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("setlist")
        .join("staging")
}

const fn default_parse_tolerance() -> usize {
    100
}

const fn default_max_retries() -> usize {
    3
}

const fn default_retry_min_delay_ms() -> u64 {
    500
}

const fn default_progress_buffer() -> usize {
    64
}

/// Get the config file path.
///
/// Returns:
/// - Linux: ~/.config/setlist/config.toml
/// - macOS: ~/Library/Application Support/setlist/config.toml
/// - Windows: %APPDATA%\setlist\config.toml
pub fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("setlist")
        .join("config.toml")
}

/// Get the example config file content.
pub fn example_config() -> &'static str {
    r#"# Setlist Configuration File
#
# Configuration is loaded from multiple sources with the following priority:
# 1. CLI arguments (highest priority)
# 2. Environment variables (SETLIST_* prefix)
# 3. This config file
# 4. Built-in defaults (lowest priority)

# Catalog archive to bootstrap from
#
# Can also be set via:
# - CLI: setlist bootstrap --url ... --sha256 ... --size ...
# - Environment: SETLIST_CATALOG_URL, SETLIST_CATALOG_SHA256, SETLIST_CATALOG_SIZE
#catalog_url = "https://example.org/catalog/setlist-catalog.zip"
#catalog_sha256 = "<hex digest>"
#catalog_size = 0

# Path to the SQLite database
#
# Can also be set via:
# - CLI: setlist --db /custom/path.db status
# - Environment: SETLIST_DATABASE_PATH=/custom/path.db
#
# Default: Platform-specific data directory
#database_path = "/path/to/custom/catalog.db"

# Staging directory for downloads and extracted files
#
# Default: Platform-specific cache directory
#staging_dir = "/path/to/staging"

# Malformed records tolerated per catalog file set before giving up
parse_tolerance = 100

# Download retry policy for transient network errors
max_retries = 3
retry_min_delay_ms = 500

# Optional cap on staging disk usage, in bytes
#max_staging_bytes = 1073741824

# Progress events buffered for the subscriber
progress_buffer = 64
"#
}

/// Create default config file if it doesn't exist.
///
/// Returns true if a new file was created, false if it already existed.
pub fn ensure_config_file() -> Result<bool> {
    let config_path = config_file_path();

    if config_path.exists() {
        return Ok(false);
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    std::fs::write(&config_path, example_config()).context("Failed to write config file")?;

    Ok(true)
}
