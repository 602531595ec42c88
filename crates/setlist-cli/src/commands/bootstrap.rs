use anyhow::{Context, Result};
use setlist_bootstrap::{
    source_for_url, BootstrapOptions, BootstrapPhase, BootstrapProgress, Bootstrapper,
    CatalogArchiveRef, Config,
};

/// Archive overrides from the command line.
#[derive(Debug, Default)]
pub struct BootstrapArgs {
    pub url: Option<String>,
    pub sha256: Option<String>,
    pub size: Option<u64>,
    pub force: bool,
    pub json: bool,
}

/// Run a bootstrap and print its progress until it finishes.
pub async fn run_bootstrap(config: &Config, args: BootstrapArgs) -> Result<()> {
    let archive = resolve_archive(config, &args)?;
    let source = source_for_url(&archive.url)?;
    let options = BootstrapOptions::from_config(config).with_force(args.force);

    if !args.json {
        println!("\n🎸 Setlist Catalog Bootstrap\n");
        println!("  Archive: {}", archive.url);
        println!("  Database: {}", options.database_path.display());
        println!();
    }

    let mut run = Bootstrapper::new(options, source).start(archive)?;

    let cancel = run.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received, cancelling bootstrap");
            cancel.cancel();
        }
    });

    while let Some(event) = run.progress().recv().await {
        if args.json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }
    }

    let summary = run.wait().await?;
    if !args.json {
        if summary.used_local {
            println!("\n✓ Local catalog is already complete");
        } else {
            println!("\n✓ Catalog bootstrap complete!");
        }
        println!("\nNext steps:");
        println!("  - Run 'setlist status' to see the catalog");
        println!("  - Run 'setlist venues' to list the busiest venues");
    }

    Ok(())
}

/// Command-line values win over the config file, field by field.
fn resolve_archive(config: &Config, args: &BootstrapArgs) -> Result<CatalogArchiveRef> {
    let merged = Config {
        catalog_url: args.url.clone().or_else(|| config.catalog_url.clone()),
        catalog_sha256: args.sha256.clone().or_else(|| config.catalog_sha256.clone()),
        catalog_size: args.size.or(config.catalog_size),
        ..config.clone()
    };
    merged.archive_ref().context(
        "No catalog archive. Pass --url and --sha256, or set catalog_url and catalog_sha256 \
         in the config file",
    )
}

fn print_event(event: &BootstrapProgress) {
    match (&event.phase, event.fraction) {
        (BootstrapPhase::Completed(summary), _) => {
            println!("  ✓ [completed]");
            if !summary.used_local {
                println!("    Shows imported: {}", summary.shows_imported);
                println!("    Recordings imported: {}", summary.recordings_imported);
                println!("    Venues computed: {}", summary.venues_computed);
                if summary.records_skipped > 0 {
                    println!("    Malformed records skipped: {}", summary.records_skipped);
                }
                if summary.orphan_recordings > 0 {
                    println!(
                        "    Recordings without a show: {}",
                        summary.orphan_recordings
                    );
                }
            }
        }
        (BootstrapPhase::Error(failure), _) => {
            eprintln!("  ✗ [{}] FAILED ({}): {}", failure.phase, failure.kind, failure.detail);
        }
        (BootstrapPhase::UsingLocal { marker }, _) => {
            println!("  ✓ [using_local] catalog {} is current", marker.content_hash);
        }
        (phase, None) if event.detail.is_none() => {
            println!("  ⏳ [{}] Starting...", phase.kind());
        }
        (phase, None) => {
            log::debug!("{} {}", phase.kind(), event.detail.as_deref().unwrap_or(""));
        }
        (phase, Some(fraction)) => {
            let detail = event.detail.as_deref().unwrap_or("");
            log::debug!("{} {:.0}% {detail}", phase.kind(), fraction * 100.0);
            if is_milestone(fraction) {
                println!("    {:>3.0}% {detail}", fraction * 100.0);
            }
        }
    }
}

/// Only every tenth percent is printed; finer updates go to the debug log.
fn is_milestone(fraction: f32) -> bool {
    let percent = (fraction * 100.0).round();
    percent >= 100.0 || percent % 10.0 == 0.0
}
