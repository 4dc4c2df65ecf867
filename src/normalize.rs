use crate::formats::{self, SourceKind};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Normalized severity, shared by every source format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
    Unknown,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
            LogLevel::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Staging,
    Prod,
    Unknown,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Staging => "staging",
            Environment::Prod => "prod",
            Environment::Unknown => "unknown",
        }
    }

    fn from_exact(s: &str) -> Option<Environment> {
        match s {
            "dev" => Some(Environment::Dev),
            "staging" => Some(Environment::Staging),
            "prod" => Some(Environment::Prod),
            _ => None,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP request/response fields lifted out of pino `req`/`res` groups or
/// winston metadata.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct HttpFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl HttpFields {
    fn is_empty(&self) -> bool {
        self.method.is_none()
            && self.url.is_none()
            && self.status_code.is_none()
            && self.response_time_ms.is_none()
            && self.request_id.is_none()
    }
}

/// The canonical record every raw line normalizes into. `kind` is assigned
/// exactly once at normalization time; all other fields degrade to
/// empty/absent/unknown rather than failing.
#[derive(Debug, Clone, serde::Serialize)]
pub struct NormalizedEntry {
    pub kind: SourceKind,
    pub level: LogLevel,
    pub message: String,
    /// Epoch milliseconds, absent when no timestamp could be resolved.
    pub timestamp: Option<i64>,
    pub environment: Environment,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpFields>,
    /// Generic metadata bag, populated for unknown-json records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Map<String, Value>>,
    /// Original decoded value, retained for fallback field lookup.
    pub raw: Value,
}

/// A normalized entry paired with its precomputed lowercase search blob,
/// used by the legacy free-text scan.
#[derive(Debug, Clone)]
pub struct ParsedRecord {
    pub entry: NormalizedEntry,
    pub search_text: String,
}

/// Classify and normalize a decoded JSON candidate. Total: always yields a
/// best-effort record.
pub fn parse_json_candidate(value: Value) -> ParsedRecord {
    let kind = formats::detect(&value);
    let entry = normalize_json(kind, value);
    let search_text = search_text(&entry);
    ParsedRecord { entry, search_text }
}

/// Wrap a non-JSON line as a text record.
pub fn parse_text_line(line: &str) -> ParsedRecord {
    let entry = normalize_text(line.trim());
    let search_text = search_text(&entry);
    ParsedRecord { entry, search_text }
}

fn normalize_json(kind: SourceKind, value: Value) -> NormalizedEntry {
    let mut entry = NormalizedEntry {
        kind,
        level: LogLevel::Unknown,
        message: String::new(),
        timestamp: None,
        environment: Environment::Unknown,
        hostname: None,
        http: None,
        meta: None,
        raw: value,
    };

    match kind {
        SourceKind::Pino => normalize_pino(&mut entry),
        SourceKind::Winston => normalize_winston(&mut entry),
        SourceKind::Loki => normalize_loki(&mut entry),
        SourceKind::Docker => normalize_docker(&mut entry),
        SourceKind::Promtail => normalize_promtail(&mut entry),
        SourceKind::UnknownJson | SourceKind::Text => normalize_unknown_json(&mut entry),
    }
    entry
}

fn normalize_text(line: &str) -> NormalizedEntry {
    NormalizedEntry {
        kind: SourceKind::Text,
        level: detect_level_in_text(line),
        message: line.to_string(),
        timestamp: None,
        environment: env_from_message(line),
        hostname: None,
        http: None,
        meta: None,
        raw: serde_json::json!({ "line": line }),
    }
}

fn normalize_pino(entry: &mut NormalizedEntry) {
    let Some(map) = entry.raw.as_object() else { return };
    entry.level = map
        .get("level")
        .and_then(Value::as_i64)
        .map(pino_level)
        .unwrap_or(LogLevel::Unknown);
    entry.message = str_of(&map, "msg");
    entry.timestamp = map.get("time").and_then(Value::as_i64);
    entry.hostname = map.get("hostname").and_then(Value::as_str).map(str::to_string);
    entry.environment = detect_environment(&map);

    let req = map.get("req").and_then(Value::as_object);
    let res = map.get("res").and_then(Value::as_object);
    if req.is_some() || res.is_some() {
        let http = HttpFields {
            method: req.and_then(|r| r.get("method")).and_then(Value::as_str).map(str::to_string),
            url: req.and_then(|r| r.get("url")).and_then(Value::as_str).map(str::to_string),
            status_code: res.and_then(|r| r.get("statusCode")).and_then(Value::as_i64),
            response_time_ms: res.and_then(|r| r.get("responseTimeMs")).and_then(Value::as_f64),
            request_id: req.and_then(|r| r.get("id")).and_then(Value::as_str).map(str::to_string),
        };
        if !http.is_empty() {
            entry.http = Some(http);
        }
    }
}

fn normalize_winston(entry: &mut NormalizedEntry) {
    let Some(map) = entry.raw.as_object() else { return };
    entry.level = winston_level(map.get("level").and_then(Value::as_str).unwrap_or(""));
    entry.message = str_of(&map, "message");
    entry.timestamp = map
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(parse_iso_millis);
    entry.environment = detect_environment(&map);

    if let Some(meta) = map.get("meta").and_then(Value::as_object) {
        let request_id = meta.get("requestId").and_then(Value::as_str).map(str::to_string);
        if request_id.is_some() {
            entry.http = Some(HttpFields {
                request_id,
                ..HttpFields::default()
            });
        }
    }
}

fn normalize_loki(entry: &mut NormalizedEntry) {
    let Some(map) = entry.raw.as_object() else { return };
    entry.message = str_of(&map, "line");
    entry.timestamp = map.get("ts").and_then(Value::as_str).and_then(parse_iso_millis);
    entry.environment = map
        .get("labels")
        .and_then(Value::as_object)
        .and_then(|l| l.get("environment"))
        .and_then(Value::as_str)
        .and_then(Environment::from_exact)
        .unwrap_or(Environment::Unknown);
    entry.level = detect_level_in_text(&entry.message);
}

fn normalize_docker(entry: &mut NormalizedEntry) {
    let Some(map) = entry.raw.as_object() else { return };
    entry.message = str_of(&map, "log");
    entry.timestamp = map.get("time").and_then(Value::as_str).and_then(parse_iso_millis);
    entry.level = detect_level_in_text(&entry.message);
    entry.environment = match detect_environment(&map) {
        Environment::Unknown => env_from_message(&entry.message),
        env => env,
    };
}

fn normalize_promtail(entry: &mut NormalizedEntry) {
    let Some(map) = entry.raw.as_object() else { return };
    entry.message = str_of(&map, "message");
    entry.timestamp = map.get("ts").and_then(Value::as_str).and_then(parse_iso_millis);
    entry.level = match map.get("level").and_then(Value::as_str) {
        Some("debug") => LogLevel::Debug,
        Some("info") => LogLevel::Info,
        Some("warn") => LogLevel::Warn,
        Some("error") => LogLevel::Error,
        _ => LogLevel::Unknown,
    };
    entry.environment = detect_environment(&map);
}

fn normalize_unknown_json(entry: &mut NormalizedEntry) {
    let map = entry.raw.as_object().cloned().unwrap_or_default();
    entry.message = generic_message(&map, &entry.raw);
    entry.timestamp = generic_timestamp(&map);
    entry.level = generic_level(&map);
    entry.environment = detect_environment(&map);
    if !map.is_empty() {
        entry.meta = Some(map);
    }
}

fn str_of(map: &Map<String, Value>, key: &str) -> String {
    map.get(key).and_then(Value::as_str).unwrap_or("").to_string()
}

// Level mapping tables

fn pino_level(level: i64) -> LogLevel {
    match level {
        10 => LogLevel::Trace,
        20 => LogLevel::Debug,
        30 => LogLevel::Info,
        40 => LogLevel::Warn,
        50 => LogLevel::Error,
        60 => LogLevel::Fatal,
        _ => LogLevel::Unknown,
    }
}

fn winston_level(level: &str) -> LogLevel {
    match level {
        "silly" | "verbose" | "debug" => LogLevel::Debug,
        "info" => LogLevel::Info,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        _ => LogLevel::Unknown,
    }
}

/// Best-effort level detection over free text. Ordered substring checks;
/// first match wins.
pub fn detect_level_in_text(text: &str) -> LogLevel {
    let lower = text.to_lowercase();
    if lower.contains("error") || lower.contains("err") {
        LogLevel::Error
    } else if lower.contains("warn") {
        LogLevel::Warn
    } else if lower.contains("info") {
        LogLevel::Info
    } else if lower.contains("debug") {
        LogLevel::Debug
    } else if lower.contains("trace") {
        LogLevel::Trace
    } else if lower.contains("fatal") || lower.contains("panic") {
        LogLevel::Fatal
    } else {
        LogLevel::Unknown
    }
}

fn generic_level(map: &Map<String, Value>) -> LogLevel {
    for key in ["level", "severity", "log_level"] {
        if let Some(s) = map.get(key).and_then(Value::as_str) {
            return winston_level(s);
        }
    }
    LogLevel::Unknown
}

// Environment resolution

/// Fixed cascade: hostname substring, loki-style labels, metadata bag,
/// then generic environment fields. All comparisons case-insensitive.
fn detect_environment(map: &Map<String, Value>) -> Environment {
    if let Some(host) = map.get("hostname").and_then(Value::as_str) {
        if let Some(env) = env_from_substring(host) {
            return env;
        }
    }

    if let Some(labels) = map.get("labels").and_then(Value::as_object) {
        if let Some(env) = labels
            .get("environment")
            .and_then(Value::as_str)
            .and_then(Environment::from_exact)
        {
            return env;
        }
    }

    if let Some(meta) = map.get("meta").and_then(Value::as_object) {
        if let Some(env) = meta
            .get("environment")
            .and_then(Value::as_str)
            .and_then(Environment::from_exact)
        {
            return env;
        }
    }

    for key in ["environment", "env", "NODE_ENV"] {
        if let Some(s) = map.get(key).and_then(Value::as_str) {
            if let Some(env) = env_from_substring(s) {
                return env;
            }
        }
    }

    Environment::Unknown
}

fn env_from_substring(s: &str) -> Option<Environment> {
    let lower = s.to_lowercase();
    if lower.contains("prod") {
        Some(Environment::Prod)
    } else if lower.contains("staging") {
        Some(Environment::Staging)
    } else if lower.contains("dev") {
        Some(Environment::Dev)
    } else {
        None
    }
}

static RE_ENV_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\benv=(dev|staging|prod)\b").unwrap());

fn env_from_message(message: &str) -> Environment {
    RE_ENV_TAG
        .captures(message)
        .and_then(|c| Environment::from_exact(&c[1].to_lowercase()))
        .unwrap_or(Environment::Unknown)
}

// Generic field extraction for unknown-json

fn generic_message(map: &Map<String, Value>, raw: &Value) -> String {
    for key in ["message", "msg", "text", "line", "log"] {
        if let Some(s) = map.get(key).and_then(Value::as_str) {
            return s.to_string();
        }
    }
    let rendered = serde_json::to_string(raw).unwrap_or_default();
    truncate_chars(rendered, 200)
}

fn generic_timestamp(map: &Map<String, Value>) -> Option<i64> {
    for key in ["timestamp", "ts", "time", "date"] {
        match map.get(key) {
            Some(Value::Number(n)) => {
                let v = n.as_f64()?;
                // > 1e10 is already milliseconds, > 1e9 is seconds.
                if v > 1e10 {
                    return Some(v as i64);
                }
                if v > 1e9 {
                    return Some((v * 1000.0) as i64);
                }
                return Some(v as i64);
            }
            Some(Value::String(s)) => return parse_iso_millis(s),
            _ => continue,
        }
    }
    None
}

fn truncate_chars(s: String, max: usize) -> String {
    if s.chars().count() <= max {
        s
    } else {
        s.chars().take(max).collect()
    }
}

// Timestamp parsing

const NAIVE_FMTS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

const OFFSET_FMTS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f%:z", "%Y-%m-%d %H:%M:%S%:z"];

/// Parse an ISO-8601-ish timestamp string into epoch milliseconds. Returns
/// None instead of failing on unparseable input.
pub fn parse_iso_millis(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc).timestamp_millis());
    }
    for f in OFFSET_FMTS {
        if let Ok(dt) = DateTime::parse_from_str(s, f) {
            return Some(dt.with_timezone(&Utc).timestamp_millis());
        }
    }
    for f in NAIVE_FMTS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, f) {
            return Some(Utc.from_utc_datetime(&ndt).timestamp_millis());
        }
    }
    None
}

fn millis_to_rfc3339(ms: i64) -> Option<String> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

// Search text blob

fn push_raw_str(parts: &mut Vec<String>, map: &Map<String, Value>, key: &str) {
    if let Some(s) = map.get(key).and_then(Value::as_str) {
        if !s.is_empty() {
            parts.push(s.to_string());
        }
    }
}

/// Concatenation of all textual facets, normalized level/environment tags,
/// and timestamp string variants. Lowercased once so the legacy scan never
/// re-normalizes per query.
fn search_text(entry: &NormalizedEntry) -> String {
    let map = entry.raw.as_object();
    let empty = Map::new();
    let map = map.unwrap_or(&empty);

    let mut parts: Vec<String> = vec![entry.kind.as_str().to_string()];

    match entry.kind {
        SourceKind::Pino => {
            push_raw_str(&mut parts, map, "msg");
            push_raw_str(&mut parts, map, "hostname");
            if let Some(pid) = map.get("pid").and_then(Value::as_i64) {
                parts.push(pid.to_string());
            }
            push_raw_str(&mut parts, map, "name");
        }
        SourceKind::Winston => {
            push_raw_str(&mut parts, map, "message");
            push_raw_str(&mut parts, map, "level");
            if let Some(meta) = map.get("meta").and_then(Value::as_object) {
                push_raw_str(&mut parts, meta, "requestId");
                if let Some(uid) = meta.get("userId") {
                    parts.push(scalar_string(uid));
                }
            }
        }
        SourceKind::Loki => {
            push_raw_str(&mut parts, map, "line");
            if let Some(labels) = map.get("labels").and_then(Value::as_object) {
                push_raw_str(&mut parts, labels, "job");
                push_raw_str(&mut parts, labels, "level");
            }
        }
        SourceKind::Promtail => {
            push_raw_str(&mut parts, map, "message");
            push_raw_str(&mut parts, map, "level");
        }
        SourceKind::Docker => {
            push_raw_str(&mut parts, map, "log");
            push_raw_str(&mut parts, map, "stream");
        }
        SourceKind::Text => {
            push_raw_str(&mut parts, map, "line");
        }
        SourceKind::UnknownJson => {
            parts.push(serde_json::to_string(&entry.raw).unwrap_or_default());
        }
    }

    // Timestamp variants: the raw source string plus a canonical RFC3339
    // rendering, so time-ish substrings are searchable either way.
    match entry.kind {
        SourceKind::Pino => {
            if let Some(ms) = entry.timestamp {
                parts.push(ms.to_string());
                if let Some(iso) = millis_to_rfc3339(ms) {
                    parts.push(iso);
                }
            }
        }
        SourceKind::Winston => push_ts_variants(&mut parts, map, "timestamp"),
        SourceKind::Loki | SourceKind::Promtail => push_ts_variants(&mut parts, map, "ts"),
        SourceKind::Docker => push_ts_variants(&mut parts, map, "time"),
        _ => {}
    }

    if let Some(src) = source_tag(entry.kind, map) {
        if !src.is_empty() {
            parts.push(src);
        }
    }

    if entry.level != LogLevel::Unknown {
        parts.push(entry.level.as_str().to_string());
        parts.push(format!("level:{}", entry.level));
    }
    if entry.environment != Environment::Unknown {
        parts.push(entry.environment.as_str().to_string());
        parts.push(format!("env:{}", entry.environment));
    }

    parts.join(" | ").to_lowercase()
}

fn push_ts_variants(parts: &mut Vec<String>, map: &Map<String, Value>, key: &str) {
    if let Some(ts) = map.get(key).and_then(Value::as_str) {
        parts.push(ts.to_string());
        if let Some(ms) = parse_iso_millis(ts) {
            if let Some(iso) = millis_to_rfc3339(ms) {
                parts.push(iso);
            }
        }
    }
}

fn scalar_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Source attribution the way the record table renders it, folded into the
/// search blob so it is findable by text search.
fn source_tag(kind: SourceKind, map: &Map<String, Value>) -> Option<String> {
    match kind {
        SourceKind::Pino => {
            let pid = map.get("pid").and_then(Value::as_i64).map(|p| p.to_string());
            let host = map.get("hostname").and_then(Value::as_str);
            let name = map.get("name").and_then(Value::as_str);
            let mut out = pid.unwrap_or_default();
            if let Some(h) = host {
                out.push('@');
                out.push_str(h);
            }
            if let Some(n) = name {
                out.push_str(&format!(" ({n})"));
            }
            Some(out.trim().to_lowercase())
        }
        SourceKind::Winston => {
            let meta = map.get("meta").and_then(Value::as_object)?;
            for key in ["requestId", "userId", "traceId"] {
                if let Some(v) = meta.get(key) {
                    let s = scalar_string(v);
                    if !s.is_empty() {
                        return Some(s.to_lowercase());
                    }
                }
            }
            None
        }
        SourceKind::Loki => map
            .get("labels")
            .and_then(Value::as_object)
            .and_then(|l| l.get("job"))
            .and_then(Value::as_str)
            .map(str::to_lowercase),
        SourceKind::Docker => map.get("stream").and_then(Value::as_str).map(str::to_lowercase),
        _ => None,
    }
}
