use crate::normalize::{self, NormalizedEntry};
use crate::session::{Batch, Event, Progress, WorkerState};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc::UnboundedSender;

/// Records per batch event.
const BATCH_SIZE: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("read error: {0}")]
    Read(#[from] std::io::Error),
    #[error("event channel closed")]
    ChannelClosed,
}

struct BatchBuilder {
    entries: Vec<NormalizedEntry>,
    raw_count: usize,
    malformed_count: usize,
    first_position: usize,
}

impl BatchBuilder {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            raw_count: 0,
            malformed_count: 0,
            first_position: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.raw_count == 0
    }
}

/// Stream a log file through the pipeline in fixed-size byte windows.
///
/// Every raw line, blank ones and the trailing unterminated fragment
/// included, is counted into exactly one batch, so the raw counts across
/// all batch events sum to the total line count. Lines are split in the
/// byte domain; a line fragment at a window boundary waits for the next
/// window.
pub async fn run(
    path: &Path,
    chunk_size_bytes: usize,
    delay_ms: u64,
    state: &mut WorkerState,
    events: &UnboundedSender<Event>,
) -> Result<(), IngestError> {
    let mut file = File::open(path).await.map_err(|source| IngestError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let total_bytes = file.metadata().await?.len();

    let mut buf = vec![0u8; chunk_size_bytes.max(1)];
    let mut pending: Vec<u8> = Vec::new();
    let mut processed_bytes: u64 = 0;
    let mut batch_start: u64 = 0;
    let mut batch = BatchBuilder::new();

    tracing::info!(path = %path.display(), total_bytes, chunk_size_bytes, "ingest start");

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        processed_bytes += n as u64;
        pending.extend_from_slice(&buf[..n]);

        // Drain complete lines; a trailing fragment stays pending.
        while let Some(nl) = pending.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = pending.drain(..=nl).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            process_line(&line, state, &mut batch);
            // The batch keeps accumulating across windows until it fills.
            if batch.entries.len() >= BATCH_SIZE {
                flush(&mut batch, state, events, batch_start, processed_bytes)?;
                batch_start = processed_bytes;
            }
        }

        send(events, Event::Progress(progress(processed_bytes, total_bytes)))?;

        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    // File did not end with a newline: the remainder is still a line.
    if !pending.is_empty() {
        let mut line = std::mem::take(&mut pending);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        process_line(&line, state, &mut batch);
    }
    flush(&mut batch, state, events, batch_start, processed_bytes)?;

    send(events, Event::Progress(progress(total_bytes, total_bytes)))?;
    send(events, Event::Summary(state.aggregator.snapshot()))?;
    send(events, Event::Done)?;

    tracing::info!(
        records = state.records.len(),
        lines = state.aggregator.snapshot().total_lines,
        "ingest done"
    );
    Ok(())
}

fn process_line(line: &[u8], state: &mut WorkerState, batch: &mut BatchBuilder) {
    state.aggregator.note_line();
    batch.raw_count += 1;

    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }

    let record = if trimmed.starts_with('{') || trimmed.starts_with('[') {
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(value) => normalize::parse_json_candidate(value),
            Err(_) => {
                state.aggregator.note_malformed();
                batch.malformed_count += 1;
                normalize::parse_text_line(trimmed)
            }
        }
    } else {
        normalize::parse_text_line(trimmed)
    };

    state.aggregator.observe(&record.entry);
    if batch.entries.is_empty() {
        batch.first_position = state.records.len();
    }
    batch.entries.push(record.entry.clone());
    state.records.push(record);
}

fn flush(
    batch: &mut BatchBuilder,
    state: &mut WorkerState,
    events: &UnboundedSender<Event>,
    start_offset: u64,
    end_offset: u64,
) -> Result<(), IngestError> {
    if batch.is_empty() {
        return Ok(());
    }
    let base = state.indexer.len();
    state.indexer.add_batch(&state.records[base..], base);

    let done = std::mem::replace(batch, BatchBuilder::new());
    tracing::debug!(
        entries = done.entries.len(),
        raw = done.raw_count,
        malformed = done.malformed_count,
        "batch"
    );
    send(
        events,
        Event::Batch(Batch {
            entries: done.entries,
            raw_count: done.raw_count,
            malformed_count: done.malformed_count,
            chunk_start_offset: start_offset,
            chunk_end_offset: end_offset,
            first_position: done.first_position,
        }),
    )
}

fn progress(processed: u64, total: u64) -> Progress {
    let percent = if total == 0 {
        100.0
    } else {
        (processed as f64 / total as f64) * 100.0
    };
    Progress {
        processed_bytes: processed,
        total_bytes: total,
        percent,
    }
}

fn send(events: &UnboundedSender<Event>, event: Event) -> Result<(), IngestError> {
    events.send(event).map_err(|_| IngestError::ChannelClosed)
}
