use anyhow::{bail, Result};
use clap::Parser;
use logsieve::session::{Event, Session, Speed};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "logsieve", version, about = "Streaming log normalization and query")]
struct Cli {
    /// Log file to ingest
    input: PathBuf,

    /// Ingestion speed preset
    #[arg(long, value_enum, default_value = "fast")]
    speed: Speed,

    /// Override the preset window size, in KiB
    #[arg(long = "chunk-size-kb")]
    chunk_size_kb: Option<usize>,

    /// Override the preset inter-window delay, in milliseconds
    #[arg(long = "delay-ms")]
    delay_ms: Option<u64>,

    /// Query to run once ingestion finishes (structured or free text)
    #[arg(long, short = 'q')]
    query: Option<String>,

    /// Suppress progress output on stderr
    #[arg(long, default_value_t = false)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let (chunk_size, delay_ms) = cli.speed.preset();
    let chunk_size = cli.chunk_size_kb.map(|kb| kb * 1024).unwrap_or(chunk_size);
    let delay_ms = cli.delay_ms.unwrap_or(delay_ms);

    let (session, mut events) = Session::spawn();
    if !session.start(cli.input.clone(), chunk_size, delay_ms).await {
        bail!("session worker is not running");
    }

    while let Some(event) = events.recv().await {
        match event {
            Event::Progress(p) => {
                if !cli.quiet {
                    eprintln!(
                        "  {:>5.1}% ({} / {} bytes)",
                        p.percent, p.processed_bytes, p.total_bytes
                    );
                }
            }
            Event::Batch(batch) => {
                tracing::debug!(
                    entries = batch.entries.len(),
                    first = batch.first_position,
                    "batch received"
                );
            }
            Event::Summary(summary) => {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            }
            Event::Done => break,
            Event::Error { message } => bail!("{message}"),
            // Search events only appear after a Search request.
            _ => {}
        }
    }

    if let Some(query) = cli.query {
        if !session.search(query).await {
            bail!("session worker is not running");
        }
        while let Some(event) = events.recv().await {
            match event {
                Event::SearchStart { query } => {
                    if !cli.quiet {
                        eprintln!("searching: {query}");
                    }
                }
                Event::SearchResult(result) => {
                    if !cli.quiet {
                        eprintln!(
                            "{} matches in {} ms (index: {})",
                            result.positions.len(),
                            result.evaluation_time_ms,
                            result.used_index
                        );
                    }
                    for entry in &result.entries {
                        println!("{}", serde_json::to_string(entry)?);
                    }
                    break;
                }
                Event::SearchError { message, .. } => bail!("invalid query: {message}"),
                _ => {}
            }
        }
    }

    Ok(())
}
