use anyhow::{Context, Result};
use setlist_bootstrap::{config, Config};
use toml_edit::{value, DocumentMut};

const STRING_KEYS: &[&str] = &["database_path", "staging_dir", "catalog_url", "catalog_sha256"];
const INTEGER_KEYS: &[&str] = &[
    "catalog_size",
    "parse_tolerance",
    "max_retries",
    "retry_min_delay_ms",
    "max_staging_bytes",
    "progress_buffer",
];

/// Show the current effective configuration.
pub fn show_config() -> Result<()> {
    let config = Config::load()?;

    println!("Current Configuration");
    println!("=====================\n");

    println!("Config file: {}", config::config_file_path().display());

    let exists = config::config_file_path().exists();
    println!("File exists: {}\n", if exists { "yes" } else { "no (using defaults)" });

    println!("Settings:");
    println!("  database_path: {}", config.database_path.display());
    println!("  staging_dir: {}", config.staging_dir.display());
    println!("  catalog_url: {}", config.catalog_url.as_deref().unwrap_or("<not set>"));
    println!("  catalog_sha256: {}", config.catalog_sha256.as_deref().unwrap_or("<not set>"));
    println!("  catalog_size: {}", display_opt(config.catalog_size));
    println!("  parse_tolerance: {}", config.parse_tolerance);
    println!("  max_retries: {}", config.max_retries);
    println!("  retry_min_delay_ms: {}", config.retry_min_delay_ms);
    println!("  max_staging_bytes: {}", display_opt(config.max_staging_bytes));
    println!("  progress_buffer: {}", config.progress_buffer);

    println!("\nPriority: CLI args > ENV vars (SETLIST_*) > Config file > Defaults");

    Ok(())
}

fn display_opt(value: Option<u64>) -> String {
    value.map_or_else(|| String::from("<not set>"), |v| v.to_string())
}

/// Get a specific config value, or print the whole file.
pub fn get_config(key: Option<String>) -> Result<()> {
    let Some(key) = key else {
        let config_path = config::config_file_path();
        if config_path.exists() {
            let contents =
                std::fs::read_to_string(&config_path).context("Failed to read config file")?;
            print!("{}", contents);
        } else {
            println!("Config file does not exist: {}", config_path.display());
            println!("\nRun 'setlist config init' to create it.");
        }
        return Ok(());
    };

    let config = Config::load()?;
    let rendered = match key.as_str() {
        "database_path" => config.database_path.display().to_string(),
        "staging_dir" => config.staging_dir.display().to_string(),
        "catalog_url" => config.catalog_url.unwrap_or_else(|| String::from("<not set>")),
        "catalog_sha256" => config.catalog_sha256.unwrap_or_else(|| String::from("<not set>")),
        "catalog_size" => display_opt(config.catalog_size),
        "parse_tolerance" => config.parse_tolerance.to_string(),
        "max_retries" => config.max_retries.to_string(),
        "retry_min_delay_ms" => config.retry_min_delay_ms.to_string(),
        "max_staging_bytes" => display_opt(config.max_staging_bytes),
        "progress_buffer" => config.progress_buffer.to_string(),
        _ => anyhow::bail!("{}", unknown_key(&key)),
    };
    println!("{rendered}");

    Ok(())
}

/// Set a config value, preserving the rest of the file.
pub fn set_config(key: &str, new_value: &str) -> Result<()> {
    let config_path = config::config_file_path();
    config::ensure_config_file()?;

    let contents = std::fs::read_to_string(&config_path).context("Failed to read config file")?;
    let updated = set_in_document(&contents, key, new_value)?;
    std::fs::write(&config_path, updated).context("Failed to write config file")?;

    println!("✓ Updated {} = {}", key, new_value);
    println!("  in {}", config_path.display());

    Ok(())
}

fn set_in_document(contents: &str, key: &str, new_value: &str) -> Result<String> {
    let mut doc: DocumentMut = contents.parse().context("Config file is not valid TOML")?;

    if STRING_KEYS.contains(&key) {
        doc[key] = value(new_value);
    } else if INTEGER_KEYS.contains(&key) {
        let number: i64 = new_value
            .parse()
            .with_context(|| format!("{key} must be a non-negative integer"))?;
        anyhow::ensure!(number >= 0, "{key} must be a non-negative integer");
        doc[key] = value(number);
    } else {
        anyhow::bail!("{}", unknown_key(key));
    }

    Ok(doc.to_string())
}

fn unknown_key(key: &str) -> String {
    format!(
        "Unknown config key: {}\n\nValid keys: {}",
        key,
        STRING_KEYS
            .iter()
            .chain(INTEGER_KEYS)
            .copied()
            .collect::<Vec<_>>()
            .join(", ")
    )
}

/// Show the config file path.
pub fn show_path() {
    println!("{}", config::config_file_path().display());
}

/// Show example configuration.
pub fn show_example() {
    print!("{}", config::example_config());
}

/// Initialize config file with defaults.
pub fn init_config() -> Result<()> {
    let created = config::ensure_config_file()?;
    let config_path = config::config_file_path();

    if created {
        println!("✓ Created config file: {}", config_path.display());
        println!("\nEdit this file to configure setlist.");
    } else {
        println!("Config file already exists: {}", config_path.display());
    }

    Ok(())
}
