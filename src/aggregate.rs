use crate::formats::SourceKind;
use crate::normalize::{Environment, LogLevel, NormalizedEntry};
use ahash::AHashMap;
use serde::Serialize;

pub const TIMELINE_BUCKET_MS: i64 = 60_000;
const TIMELINE_TOP_PEAKS: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LevelCounts {
    pub trace: usize,
    pub debug: usize,
    pub info: usize,
    pub warn: usize,
    pub error: usize,
    pub fatal: usize,
    pub unknown: usize,
}

impl LevelCounts {
    fn bump(&mut self, level: LogLevel) {
        match level {
            LogLevel::Trace => self.trace += 1,
            LogLevel::Debug => self.debug += 1,
            LogLevel::Info => self.info += 1,
            LogLevel::Warn => self.warn += 1,
            LogLevel::Error => self.error += 1,
            LogLevel::Fatal => self.fatal += 1,
            LogLevel::Unknown => self.unknown += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.trace + self.debug + self.info + self.warn + self.error + self.fatal + self.unknown
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnvironmentCounts {
    pub dev: usize,
    pub staging: usize,
    pub prod: usize,
    pub unknown: usize,
}

impl EnvironmentCounts {
    fn bump(&mut self, env: Environment) {
        match env {
            Environment::Dev => self.dev += 1,
            Environment::Staging => self.staging += 1,
            Environment::Prod => self.prod += 1,
            Environment::Unknown => self.unknown += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KindCounts {
    pub pino: usize,
    pub winston: usize,
    pub loki: usize,
    pub promtail: usize,
    pub docker: usize,
    #[serde(rename = "unknown-json")]
    pub unknown_json: usize,
    pub text: usize,
}

impl KindCounts {
    fn bump(&mut self, kind: SourceKind) {
        match kind {
            SourceKind::Pino => self.pino += 1,
            SourceKind::Winston => self.winston += 1,
            SourceKind::Loki => self.loki += 1,
            SourceKind::Promtail => self.promtail += 1,
            SourceKind::Docker => self.docker += 1,
            SourceKind::UnknownJson => self.unknown_json += 1,
            SourceKind::Text => self.text += 1,
        }
    }
}

/// One minute of error/fatal activity. `bucket_end_ms` is exclusive.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineBucket {
    pub bucket_start_ms: i64,
    pub bucket_end_ms: i64,
    pub error_count: usize,
    pub fatal_count: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFatalTimeline {
    pub bucket_size_ms: i64,
    /// Buckets in ascending start order; empty minutes are not materialized.
    pub buckets: Vec<TimelineBucket>,
    /// Indices into `buckets` of the busiest minutes, highest total first.
    pub top_peak_bucket_indices: Vec<usize>,
    /// Includes records without a timestamp.
    pub total_error_count: usize,
    pub total_fatal_count: usize,
    pub no_timestamp_error_count: usize,
    pub no_timestamp_fatal_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParseSummary {
    pub total_lines: usize,
    pub malformed_count: usize,
    pub counts: KindCounts,
    pub level_summary: LevelCounts,
    pub environment_summary: EnvironmentCounts,
    pub error_fatal_timeline: ErrorFatalTimeline,
}

/// Incremental counters over everything normalized so far. `snapshot` can
/// be taken at any point during ingestion.
#[derive(Default)]
pub struct Aggregator {
    total_lines: usize,
    malformed: usize,
    kinds: KindCounts,
    levels: LevelCounts,
    environments: EnvironmentCounts,
    buckets: AHashMap<i64, (usize, usize)>,
    no_ts_errors: usize,
    no_ts_fatals: usize,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_line(&mut self) {
        self.total_lines += 1;
    }

    pub fn note_malformed(&mut self) {
        self.malformed += 1;
    }

    pub fn observe(&mut self, entry: &NormalizedEntry) {
        self.kinds.bump(entry.kind);
        self.levels.bump(entry.level);
        self.environments.bump(entry.environment);

        let severity = entry.level;
        if severity != LogLevel::Error && severity != LogLevel::Fatal {
            return;
        }
        match entry.timestamp {
            Some(ts) => {
                let start = ts.div_euclid(TIMELINE_BUCKET_MS) * TIMELINE_BUCKET_MS;
                let slot = self.buckets.entry(start).or_default();
                match severity {
                    LogLevel::Error => slot.0 += 1,
                    _ => slot.1 += 1,
                }
            }
            None => match severity {
                LogLevel::Error => self.no_ts_errors += 1,
                _ => self.no_ts_fatals += 1,
            },
        }
    }

    pub fn snapshot(&self) -> ParseSummary {
        let mut buckets: Vec<TimelineBucket> = self
            .buckets
            .iter()
            .map(|(&start, &(errors, fatals))| TimelineBucket {
                bucket_start_ms: start,
                bucket_end_ms: start + TIMELINE_BUCKET_MS,
                error_count: errors,
                fatal_count: fatals,
                total: errors + fatals,
            })
            .collect();
        buckets.sort_unstable_by_key(|b| b.bucket_start_ms);

        let mut peak_order: Vec<usize> = (0..buckets.len())
            .filter(|&i| buckets[i].total > 0)
            .collect();
        peak_order.sort_by(|&a, &b| buckets[b].total.cmp(&buckets[a].total).then(a.cmp(&b)));
        peak_order.truncate(TIMELINE_TOP_PEAKS);

        let bucketed_errors: usize = buckets.iter().map(|b| b.error_count).sum();
        let bucketed_fatals: usize = buckets.iter().map(|b| b.fatal_count).sum();

        ParseSummary {
            total_lines: self.total_lines,
            malformed_count: self.malformed,
            counts: self.kinds.clone(),
            level_summary: self.levels.clone(),
            environment_summary: self.environments.clone(),
            error_fatal_timeline: ErrorFatalTimeline {
                bucket_size_ms: TIMELINE_BUCKET_MS,
                buckets,
                top_peak_bucket_indices: peak_order,
                total_error_count: bucketed_errors + self.no_ts_errors,
                total_fatal_count: bucketed_fatals + self.no_ts_fatals,
                no_timestamp_error_count: self.no_ts_errors,
                no_timestamp_fatal_count: self.no_ts_fatals,
            },
        }
    }
}
