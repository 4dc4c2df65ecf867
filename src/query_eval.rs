use crate::index::{is_stopword, FieldIndexer};
use crate::normalize::{parse_iso_millis, ParsedRecord};
use crate::query_ast::{AstNode, BinaryOp, CompareOp, FunctionArg, FunctionOp, LiteralValue};
use ahash::AHashSet;
use itertools::Itertools;
use lru::LruCache;
use regex::{Regex, RegexBuilder};
use std::fmt;
use std::num::NonZeroUsize;
use std::time::Instant;

const REGEX_CACHE_CAPACITY: usize = 64;

/// Compiled-regex cache keyed by `pattern\u{0}flags`. Patterns that fail to
/// compile are cached as None so a bad pattern costs one compile attempt.
pub struct RegexCache {
    cache: LruCache<String, Option<Regex>>,
}

impl Default for RegexCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RegexCache {
    pub fn new() -> Self {
        Self {
            cache: LruCache::new(NonZeroUsize::new(REGEX_CACHE_CAPACITY).unwrap()),
        }
    }

    pub fn get(&mut self, pattern: &str, flags: &str) -> Option<&Regex> {
        let key = format!("{pattern}\u{0}{flags}");
        self.cache
            .get_or_insert(key, || {
                RegexBuilder::new(pattern)
                    .case_insensitive(flags.contains('i'))
                    .multi_line(flags.contains('m'))
                    .dot_matches_new_line(flags.contains('s'))
                    .build()
                    .ok()
            })
            .as_ref()
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EvalResult {
    /// Matching record positions, ascending, no duplicates.
    pub matched: Vec<usize>,
    pub used_index: bool,
    pub evaluation_time_ms: u64,
}

/// Evaluate a query AST over the record store. Every sub-expression yields
/// a sorted ascending position list; set operations preserve that.
pub fn evaluate(
    ast: &AstNode,
    records: &[ParsedRecord],
    indexer: Option<&FieldIndexer>,
    regexes: &mut RegexCache,
) -> EvalResult {
    let started = Instant::now();
    let mut used_index = false;
    let matched = eval_node(ast, records, indexer, regexes, &mut used_index);
    EvalResult {
        matched,
        used_index,
        evaluation_time_ms: started.elapsed().as_millis() as u64,
    }
}

fn eval_node(
    node: &AstNode,
    records: &[ParsedRecord],
    indexer: Option<&FieldIndexer>,
    regexes: &mut RegexCache,
    used_index: &mut bool,
) -> Vec<usize> {
    match node {
        AstNode::Binary { op, left, right } => {
            let l = eval_node(left, records, indexer, regexes, used_index);
            let r = eval_node(right, records, indexer, regexes, used_index);
            match op {
                BinaryOp::And => intersect(l, r),
                BinaryOp::Or => union(l, r),
            }
        }
        AstNode::Not { inner } => {
            let hits = eval_node(inner, records, indexer, regexes, used_index);
            complement(&hits, records.len())
        }
        AstNode::Compare { op, field, value } => {
            if let Some(positions) = indexed_compare(op, field, value, indexer) {
                *used_index = true;
                return positions;
            }
            scan_compare(op, field, value, records)
        }
        AstNode::Call { func, field, arg } => {
            if let Some(positions) = indexed_call(*func, field, arg, records, indexer) {
                *used_index = true;
                return positions;
            }
            scan_call(*func, field, arg, records, regexes)
        }
    }
}

// Set operations over sorted position lists

fn intersect(a: Vec<usize>, b: Vec<usize>) -> Vec<usize> {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let set: AHashSet<usize> = small.into_iter().collect();
    large.into_iter().filter(|p| set.contains(p)).collect()
}

fn union(a: Vec<usize>, b: Vec<usize>) -> Vec<usize> {
    a.into_iter().merge(b).dedup().collect()
}

fn complement(hits: &[usize], len: usize) -> Vec<usize> {
    let set: AHashSet<usize> = hits.iter().copied().collect();
    (0..len).filter(|p| !set.contains(p)).collect()
}

// Index shortcuts

fn indexed_compare(
    op: &CompareOp,
    field: &str,
    value: &LiteralValue,
    indexer: Option<&FieldIndexer>,
) -> Option<Vec<usize>> {
    let indexer = indexer?;

    // Timestamp comes first: an ISO string literal is a range bound here,
    // not a categorical key.
    if field == "timestamp" {
        let ms = match value {
            LiteralValue::Str(s) => parse_iso_millis(s)?,
            LiteralValue::Num(n) => *n as i64,
            LiteralValue::Bool(_) => return None,
        };
        let (start, end) = match op {
            CompareOp::Eq => (ms, ms),
            CompareOp::Gt => (ms.checked_add(1)?, i64::MAX),
            CompareOp::Ge => (ms, i64::MAX),
            CompareOp::Lt => (i64::MIN, ms.checked_sub(1)?),
            CompareOp::Le => (i64::MIN, ms),
            CompareOp::Ne => return None,
        };
        let mut positions = indexer.timestamp_range(start, end);
        positions.sort_unstable();
        return Some(positions);
    }

    if *op == CompareOp::Eq {
        if let LiteralValue::Str(s) = value {
            let key = s.to_lowercase();
            let postings = match field {
                "level" => indexer.by_level(&key),
                "environment" => indexer.by_environment(&key),
                "kind" => indexer.by_kind(&key),
                _ => return None,
            };
            return Some(postings.map(<[usize]>::to_vec).unwrap_or_default());
        }
    }

    None
}

/// `contains(message, word)` over a single indexable token narrows the scan
/// to the keyword posting list. Postings are a candidate superset, so every
/// hit is re-verified against the message.
fn indexed_call(
    func: FunctionOp,
    field: &str,
    arg: &FunctionArg,
    records: &[ParsedRecord],
    indexer: Option<&FieldIndexer>,
) -> Option<Vec<usize>> {
    let indexer = indexer?;
    if func != FunctionOp::Contains || field != "message" {
        return None;
    }
    let FunctionArg::Literal(LiteralValue::Str(word)) = arg else {
        return None;
    };
    let needle = word.to_lowercase();
    if needle.len() < 3 || needle.contains(char::is_whitespace) || is_stopword(&needle) {
        return None;
    }
    let postings = indexer.by_keyword(&needle)?;
    Some(
        postings
            .iter()
            .copied()
            .filter(|&p| records[p].entry.message.to_lowercase().contains(&needle))
            .collect(),
    )
}

// Linear scan

fn scan_compare(
    op: &CompareOp,
    field: &str,
    value: &LiteralValue,
    records: &[ParsedRecord],
) -> Vec<usize> {
    let mut out = Vec::new();
    for (p, rec) in records.iter().enumerate() {
        // A record missing the field never matches, not even for `!=`.
        let matched = extract_field(rec, field)
            .map(|actual| compare_values(op, &actual, value))
            .unwrap_or(false);
        if matched {
            out.push(p);
        }
    }
    out
}

fn scan_call(
    func: FunctionOp,
    field: &str,
    arg: &FunctionArg,
    records: &[ParsedRecord],
    regexes: &mut RegexCache,
) -> Vec<usize> {
    let mut out = Vec::new();
    for (p, rec) in records.iter().enumerate() {
        let Some(actual) = extract_field(rec, field) else {
            continue;
        };
        if apply_function(func, &actual.to_string(), arg, regexes) {
            out.push(p);
        }
    }
    out
}

/// A field value pulled out of a record for comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Str(s) => f.write_str(s),
            FieldValue::Num(n) => write!(f, "{n}"),
            FieldValue::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Lookup paths tried, in order, for common short field names that live in
/// different places depending on the source format.
fn field_alias_paths(field: &str) -> Option<&'static [&'static str]> {
    Some(match field {
        "statusCode" => &["http.statusCode", "res.statusCode", "meta.statusCode", "statusCode"],
        "responseTime" => &[
            "http.responseTimeMs",
            "res.responseTimeMs",
            "meta.responseTimeMs",
            "responseTime",
        ],
        "requestId" => &["meta.requestId", "req.id", "requestId"],
        "userId" => &["meta.userId", "userId"],
        "traceId" => &["meta.traceId", "traceId"],
        "spanId" => &["meta.spanId", "spanId"],
        "job" => &["labels.job", "job"],
        "instance" => &["labels.instance", "instance"],
        "app" => &["labels.app", "app"],
        "stream" => &["stream"],
        "pid" => &["pid"],
        "name" => &["name"],
        _ => return None,
    })
}

pub fn extract_field(rec: &ParsedRecord, field: &str) -> Option<FieldValue> {
    let entry = &rec.entry;
    match field {
        "message" => return Some(FieldValue::Str(entry.message.clone())),
        "level" => return Some(FieldValue::Str(entry.level.as_str().to_string())),
        "kind" | "source" => return Some(FieldValue::Str(entry.kind.as_str().to_string())),
        "environment" | "env" => {
            return Some(FieldValue::Str(entry.environment.as_str().to_string()))
        }
        "timestamp" => return entry.timestamp.map(|ts| FieldValue::Num(ts as f64)),
        "hostname" => {
            if let Some(host) = &entry.hostname {
                return Some(FieldValue::Str(host.clone()));
            }
        }
        _ => {}
    }

    if let Some(paths) = field_alias_paths(field) {
        for path in paths {
            if let Some(v) = lookup_path(rec, path) {
                return Some(v);
            }
        }
        return None;
    }

    lookup_path(rec, field)
}

fn lookup_path(rec: &ParsedRecord, path: &str) -> Option<FieldValue> {
    if let Some(http_field) = path.strip_prefix("http.") {
        let http = rec.entry.http.as_ref()?;
        return match http_field {
            "method" => http.method.clone().map(FieldValue::Str),
            "url" => http.url.clone().map(FieldValue::Str),
            "statusCode" => http.status_code.map(|c| FieldValue::Num(c as f64)),
            "responseTimeMs" => http.response_time_ms.map(FieldValue::Num),
            "requestId" => http.request_id.clone().map(FieldValue::Str),
            _ => None,
        };
    }

    let mut current = &rec.entry.raw;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    match current {
        serde_json::Value::String(s) => Some(FieldValue::Str(s.clone())),
        serde_json::Value::Number(n) => n.as_f64().map(FieldValue::Num),
        serde_json::Value::Bool(b) => Some(FieldValue::Bool(*b)),
        _ => None,
    }
}

/// Numeric comparison when both sides coerce to f64, otherwise
/// case-insensitive string comparison.
fn compare_values(op: &CompareOp, actual: &FieldValue, expected: &LiteralValue) -> bool {
    let actual_num = match actual {
        FieldValue::Num(n) => Some(*n),
        FieldValue::Str(s) => s.trim().parse::<f64>().ok(),
        FieldValue::Bool(_) => None,
    };
    let expected_num = match expected {
        LiteralValue::Num(n) => Some(*n),
        LiteralValue::Str(s) => s.trim().parse::<f64>().ok(),
        LiteralValue::Bool(_) => None,
    };

    if let (Some(a), Some(b)) = (actual_num, expected_num) {
        return match op {
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
            CompareOp::Gt => a > b,
            CompareOp::Lt => a < b,
            CompareOp::Ge => a >= b,
            CompareOp::Le => a <= b,
        };
    }

    let a = actual.to_string().to_lowercase();
    let b = match expected {
        LiteralValue::Str(s) => s.to_lowercase(),
        LiteralValue::Num(n) => n.to_string(),
        LiteralValue::Bool(v) => v.to_string(),
    };
    match op {
        CompareOp::Eq => a == b,
        CompareOp::Ne => a != b,
        CompareOp::Gt => a > b,
        CompareOp::Lt => a < b,
        CompareOp::Ge => a >= b,
        CompareOp::Le => a <= b,
    }
}

fn apply_function(
    func: FunctionOp,
    actual: &str,
    arg: &FunctionArg,
    regexes: &mut RegexCache,
) -> bool {
    match arg {
        FunctionArg::Regex(r) => {
            // Any function with a regex argument means "does it match".
            regexes
                .get(&r.pattern, &r.flags)
                .map(|re| re.is_match(actual))
                .unwrap_or(false)
        }
        FunctionArg::Literal(lit) => {
            let raw = match lit {
                LiteralValue::Str(s) => s.clone(),
                LiteralValue::Num(n) => n.to_string(),
                LiteralValue::Bool(b) => b.to_string(),
            };
            // A string argument to matches() is a regex pattern, compiled
            // exactly as written against the unlowered value.
            if func == FunctionOp::Matches {
                return regexes
                    .get(&raw, "")
                    .map(|re| re.is_match(actual))
                    .unwrap_or(false);
            }
            let needle = raw.to_lowercase();
            let haystack = actual.to_lowercase();
            match func {
                FunctionOp::StartsWith => haystack.starts_with(&needle),
                FunctionOp::EndsWith => haystack.ends_with(&needle),
                _ => haystack.contains(&needle),
            }
        }
    }
}
