use crate::aggregate::{Aggregator, ParseSummary};
use crate::index::FieldIndexer;
use crate::ingest;
use crate::normalize::{NormalizedEntry, ParsedRecord};
use crate::query_eval::{self, RegexCache};
use crate::query_parser;
use crate::text_search;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Requests accepted by a parse session.
#[derive(Debug)]
pub enum Request {
    Start {
        path: PathBuf,
        chunk_size_bytes: usize,
        delay_ms: u64,
    },
    Search {
        query: String,
    },
}

/// Everything the session emits, tagged for JSON consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Event {
    Progress(Progress),
    Batch(Batch),
    Summary(ParseSummary),
    Done,
    Error { message: String },
    SearchStart { query: String },
    SearchResult(SearchResult),
    SearchError { query: String, message: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub processed_bytes: u64,
    pub total_bytes: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub entries: Vec<NormalizedEntry>,
    /// Raw lines consumed for this batch, blank lines included.
    pub raw_count: usize,
    pub malformed_count: usize,
    pub chunk_start_offset: u64,
    pub chunk_end_offset: u64,
    /// Store position of `entries[0]`.
    pub first_position: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub query: String,
    pub positions: Vec<usize>,
    pub entries: Vec<NormalizedEntry>,
    pub evaluation_time_ms: u64,
    pub used_index: bool,
}

/// Ingestion speed presets, expressed as a window size and inter-window
/// delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Speed {
    Slow,
    Normal,
    Fast,
}

impl Speed {
    /// (chunk_size_bytes, delay_ms)
    pub fn preset(&self) -> (usize, u64) {
        match self {
            Speed::Slow => (256 * 1024, 300),
            Speed::Normal => (512 * 1024, 100),
            Speed::Fast => (2 * 1024 * 1024, 0),
        }
    }
}

/// The single authoritative store behind a session. The worker task owns
/// it; requests and events are the only way in or out.
#[derive(Default)]
pub struct WorkerState {
    pub records: Vec<ParsedRecord>,
    pub indexer: FieldIndexer,
    pub aggregator: Aggregator,
    pub regex_cache: RegexCache,
}

impl WorkerState {
    fn reset(&mut self) {
        self.records.clear();
        self.indexer.clear();
        self.aggregator = Aggregator::new();
    }
}

/// Handle to a background parse session. Dropping it aborts the worker;
/// cancellation is coarse: drop the session and spawn a fresh one.
pub struct Session {
    requests: mpsc::Sender<Request>,
    handle: JoinHandle<()>,
}

impl Session {
    pub fn spawn() -> (Session, mpsc::UnboundedReceiver<Event>) {
        let (req_tx, req_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(worker_loop(req_rx, event_tx));
        (
            Session {
                requests: req_tx,
                handle,
            },
            event_rx,
        )
    }

    /// Queue a parse. Returns false when the worker is gone.
    pub async fn start(&self, path: PathBuf, chunk_size_bytes: usize, delay_ms: u64) -> bool {
        self.requests
            .send(Request::Start {
                path,
                chunk_size_bytes,
                delay_ms,
            })
            .await
            .is_ok()
    }

    /// Queue a search against whatever has been ingested so far.
    pub async fn search(&self, query: impl Into<String>) -> bool {
        self.requests
            .send(Request::Search {
                query: query.into(),
            })
            .await
            .is_ok()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn worker_loop(
    mut requests: mpsc::Receiver<Request>,
    events: mpsc::UnboundedSender<Event>,
) {
    let mut state = WorkerState::default();
    while let Some(request) = requests.recv().await {
        match request {
            Request::Start {
                path,
                chunk_size_bytes,
                delay_ms,
            } => {
                // A new parse replaces everything from the previous one.
                state.reset();
                if let Err(err) =
                    ingest::run(&path, chunk_size_bytes, delay_ms, &mut state, &events).await
                {
                    tracing::warn!(error = %err, "ingest failed");
                    if events
                        .send(Event::Error {
                            message: err.to_string(),
                        })
                        .is_err()
                    {
                        return;
                    }
                }
            }
            Request::Search { query } => {
                if handle_search(&query, &mut state, &events).is_err() {
                    return;
                }
            }
        }
    }
}

fn handle_search(
    query: &str,
    state: &mut WorkerState,
    events: &mpsc::UnboundedSender<Event>,
) -> Result<(), ()> {
    let query = query.trim();
    send(
        events,
        Event::SearchStart {
            query: query.to_string(),
        },
    )?;

    // Empty query selects everything in store order.
    if query.is_empty() {
        let positions: Vec<usize> = (0..state.records.len()).collect();
        return send(events, result(query, positions, state, 0, false));
    }

    let parsed = query_parser::parse(query);
    if parsed.is_legacy_text_search {
        tracing::debug!(%query, "text search");
        let started = Instant::now();
        let positions = text_search::search(&state.records, query);
        let elapsed = started.elapsed().as_millis() as u64;
        return send(events, result(query, positions, state, elapsed, false));
    }

    if !parsed.errors.is_empty() || parsed.ast.is_none() {
        let message = if parsed.errors.is_empty() {
            "query could not be parsed".to_string()
        } else {
            parsed
                .errors
                .iter()
                .map(|e| format!("{} at {}", e.message, e.position))
                .collect::<Vec<_>>()
                .join("; ")
        };
        tracing::debug!(%query, %message, "query rejected");
        return send(
            events,
            Event::SearchError {
                query: query.to_string(),
                message,
            },
        );
    }

    let Some(ast) = parsed.ast.as_ref() else {
        return Ok(());
    };
    tracing::debug!(%query, ast = %ast, "structured search");
    let eval = query_eval::evaluate(
        ast,
        &state.records,
        Some(&state.indexer),
        &mut state.regex_cache,
    );
    send(
        events,
        result(
            query,
            eval.matched,
            state,
            eval.evaluation_time_ms,
            eval.used_index,
        ),
    )
}

fn result(
    query: &str,
    positions: Vec<usize>,
    state: &WorkerState,
    evaluation_time_ms: u64,
    used_index: bool,
) -> Event {
    let entries = positions
        .iter()
        .map(|&p| state.records[p].entry.clone())
        .collect();
    Event::SearchResult(SearchResult {
        query: query.to_string(),
        positions,
        entries,
        evaluation_time_ms,
        used_index,
    })
}

fn send(events: &mpsc::UnboundedSender<Event>, event: Event) -> Result<(), ()> {
    events.send(event).map_err(|_| ())
}
