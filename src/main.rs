//! Placeholder Uploadr - upload files into placeholder nodes of a document
//!
//! Feeds files through the upload command, waits for every upload to settle
//! and prints the resulting document.

use clap::Parser;
use placeholder_uploadr::document::InMemoryDocument;
use placeholder_uploadr::{config::Config, metrics, telemetry, FileHandle, UploadSession};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Placeholder Uploadr - upload lifecycle engine demo
#[derive(Parser, Debug)]
#[command(name = "placeholder-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    metrics: bool,

    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(&args.config)?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    // Initialize logging
    telemetry::init_subscriber(&config.logging)?;
    info!("Starting Placeholder Uploadr v{}", placeholder_uploadr::VERSION);
    info!("Loaded configuration from {:?}", args.config);

    let document = Arc::new(InMemoryDocument::with_paragraphs(["foo bar"]));
    let session = UploadSession::new(config, document.clone())?;

    let files: Vec<FileHandle> = args.files.iter().map(FileHandle::from_path).collect();
    let started = session.handle_files(files, 0)?;
    info!(uploads = started.len(), "Uploads started");

    session.wait_until_settled().await;

    println!("{}", document.to_markup());
    if args.metrics {
        print!("{}", metrics::gather_text());
    }

    session.close();
    Ok(())
}
