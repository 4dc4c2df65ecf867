use crate::normalize::ParsedRecord;
use ahash::AHashMap;
use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Words too common to earn an inverted-index posting.
pub static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "a", "an",
        "as", "by", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do",
        "does", "did", "will", "would", "could", "should", "may", "might", "must", "can",
        "this", "that", "these", "those", "it", "its", "from",
    ]
    .into_iter()
    .collect()
});

pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(word)
}

/// Inverted indexes over the record store. Postings are record positions,
/// always kept in ascending order; `timestamps` is sorted by value.
#[derive(Default)]
pub struct FieldIndexer {
    by_level: AHashMap<String, Vec<usize>>,
    by_environment: AHashMap<String, Vec<usize>>,
    by_kind: AHashMap<String, Vec<usize>>,
    keywords: AHashMap<String, Vec<usize>>,
    timestamps: Vec<(i64, usize)>,
    indexed: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct IndexStats {
    pub indexed_records: usize,
    pub level_terms: usize,
    pub environment_terms: usize,
    pub kind_terms: usize,
    pub keyword_terms: usize,
    pub timestamped_records: usize,
    /// Rough posting-list footprint in bytes.
    pub approx_memory_bytes: usize,
}

impl FieldIndexer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Rebuild every index from scratch.
    pub fn build(&mut self, records: &[ParsedRecord]) {
        self.clear();
        for (pos, rec) in records.iter().enumerate() {
            self.index_record(rec, pos);
        }
        self.timestamps.sort_unstable();
        self.indexed = records.len();
    }

    /// Index a freshly appended batch. `base` is the store position of
    /// `batch[0]`. Postings stay sorted because positions only grow; the
    /// timestamp array takes a sort-then-merge of the new slice.
    pub fn add_batch(&mut self, batch: &[ParsedRecord], base: usize) {
        debug_assert_eq!(base, self.indexed);
        let ts_start = self.timestamps.len();
        for (i, rec) in batch.iter().enumerate() {
            self.index_record(rec, base + i);
        }
        self.timestamps[ts_start..].sort_unstable();
        if ts_start > 0 && self.timestamps.len() > ts_start {
            merge_sorted_tail(&mut self.timestamps, ts_start);
        }
        self.indexed = base + batch.len();
    }

    fn index_record(&mut self, rec: &ParsedRecord, pos: usize) {
        let entry = &rec.entry;
        self.by_level
            .entry(entry.level.as_str().to_string())
            .or_default()
            .push(pos);
        self.by_environment
            .entry(entry.environment.as_str().to_string())
            .or_default()
            .push(pos);
        self.by_kind
            .entry(entry.kind.as_str().to_string())
            .or_default()
            .push(pos);
        if let Some(ts) = entry.timestamp {
            self.timestamps.push((ts, pos));
        }
        for word in message_keywords(&entry.message) {
            self.keywords.entry(word).or_default().push(pos);
        }
    }

    pub fn by_level(&self, level: &str) -> Option<&[usize]> {
        self.by_level.get(level).map(Vec::as_slice)
    }

    pub fn by_environment(&self, env: &str) -> Option<&[usize]> {
        self.by_environment.get(env).map(Vec::as_slice)
    }

    pub fn by_kind(&self, kind: &str) -> Option<&[usize]> {
        self.by_kind.get(kind).map(Vec::as_slice)
    }

    /// Posting list for a keyword. A hit is a candidate superset: the word
    /// indexing dedups and caps per message, so callers re-verify matches.
    pub fn by_keyword(&self, word: &str) -> Option<&[usize]> {
        self.keywords.get(word).map(Vec::as_slice)
    }

    /// Positions of records with `start <= ts <= end`, in timestamp order.
    pub fn timestamp_range(&self, start: i64, end: i64) -> Vec<usize> {
        if start > end {
            return Vec::new();
        }
        let lo = self.timestamps.partition_point(|&(ts, _)| ts < start);
        self.timestamps[lo..]
            .iter()
            .take_while(|&&(ts, _)| ts <= end)
            .map(|&(_, pos)| pos)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.indexed
    }

    pub fn is_empty(&self) -> bool {
        self.indexed == 0
    }

    pub fn stats(&self) -> IndexStats {
        let postings: usize = self
            .by_level
            .values()
            .chain(self.by_environment.values())
            .chain(self.by_kind.values())
            .chain(self.keywords.values())
            .map(Vec::len)
            .sum();
        IndexStats {
            indexed_records: self.indexed,
            level_terms: self.by_level.len(),
            environment_terms: self.by_environment.len(),
            kind_terms: self.by_kind.len(),
            keyword_terms: self.keywords.len(),
            timestamped_records: self.timestamps.len(),
            approx_memory_bytes: postings * std::mem::size_of::<usize>()
                + self.timestamps.len() * std::mem::size_of::<(i64, usize)>(),
        }
    }
}

/// Up to ten distinct lowercase words of length >= 3 from a message,
/// stopwords excluded.
fn message_keywords(message: &str) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for word in message.to_lowercase().split_whitespace() {
        let word = word.trim_matches(|c: char| !c.is_alphanumeric());
        if word.len() < 3 || is_stopword(word) {
            continue;
        }
        if seen.insert(word.to_string()) {
            out.push(word.to_string());
            if out.len() == 10 {
                break;
            }
        }
    }
    out
}

/// Two-pointer merge of a sorted vector whose tail (from `split`) is itself
/// sorted but may interleave with the head.
fn merge_sorted_tail(v: &mut Vec<(i64, usize)>, split: usize) {
    if v[split..].is_empty() || v[split - 1] <= v[split] {
        return;
    }
    let tail: Vec<(i64, usize)> = v.split_off(split);
    let head: Vec<(i64, usize)> = std::mem::take(v);
    v.reserve(head.len() + tail.len());
    let (mut i, mut j) = (0, 0);
    while i < head.len() && j < tail.len() {
        if head[i] <= tail[j] {
            v.push(head[i]);
            i += 1;
        } else {
            v.push(tail[j]);
            j += 1;
        }
    }
    v.extend_from_slice(&head[i..]);
    v.extend_from_slice(&tail[j..]);
}
