//! azurite-store: runs the blob storage engine with periodic GC.

use clap::Parser;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use azurite_store::{Args, Config, StorageService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Parse command-line arguments
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug {
        Level::DEBUG
    } else if args.silent {
        Level::ERROR
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    // Create configuration from arguments
    let config = Config::from(args);

    let service = StorageService::open(config).await?;
    service.spawn_background_tasks();

    let config = service.config();
    let location = match (&config.location, config.in_memory) {
        (Some(location), false) => location.display().to_string(),
        _ => "memory".to_string(),
    };
    let destinations = config
        .destinations
        .iter()
        .map(|d| format!("  {} -> {} (max {} writers)", d.id, d.path.display(), d.max_concurrency))
        .collect::<Vec<_>>()
        .join("\n");

    println!(
        r#"
Azurite blob storage engine is running

Workspace: {}
Extent destinations:
{}
GC every {}s, safety window {}ms

Press Ctrl+C to stop.
"#,
        location,
        if destinations.is_empty() { "  memory".to_string() } else { destinations },
        config.gc_interval.as_secs(),
        config.safety_window.as_millis()
    );

    tokio::signal::ctrl_c().await?;
    service.close().await?;
    Ok(())
}
