//! Entry point for the mirp CLI.

use anyhow::Result;
use tracing_subscriber::fmt::time::SystemTime;

use mirp::{Cli, Extractor};

#[tokio::main]
async fn main() -> Result<()> {
    println!("MIRP: Minecraft Resource Pack Indexer");

    let cli = Cli::parse_args();
    init_logging();

    let extractor = Extractor::new(cli.tag.clone()).with_max_jobs(cli.jobs);
    let summary = extractor
        .list_and_extract_zip_contents(&cli.zip_path(), &cli.extract_dir())
        .await?;

    println!("\n{summary}");
    Ok(())
}

/// Log lines go to stderr next to the progress bar; stdout carries only the
/// banner and the summary.
fn init_logging() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_timer(SystemTime)
        .with_target(false)
        .with_max_level(tracing::Level::INFO)
        .init();
}
