use crate::normalize::{Environment, LogLevel, ParsedRecord};
use once_cell::sync::Lazy;
use regex::Regex;

/// Suffixes stripped during naive stemming, longest first.
const STEM_SUFFIXES: [&str; 7] = ["ing", "ly", "ed", "ies", "ied", "s", "es"];

const SEPARATORS: &[char] = &[
    '-', '_', '.', ',', ';', ':', '/', '\\', '|', '(', ')', '[', ']', '{', '}', '<', '>', '"',
    '\'',
];

static RE_PHRASE: Lazy<Regex> = Lazy::new(|| Regex::new(r#""([^"]*)""#).unwrap());

/// A tokenized free-text query: quoted phrases kept whole, every remaining
/// word stemmed. The reserved word `unknown` is lifted out as a flag.
#[derive(Debug, Clone)]
pub struct TextQuery {
    pub phrases: Vec<String>,
    pub tokens: Vec<String>,
    pub unknown_requested: bool,
}

impl TextQuery {
    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty() && self.tokens.is_empty() && !self.unknown_requested
    }

    fn has_search_terms(&self) -> bool {
        !self.phrases.is_empty() || !self.tokens.is_empty()
    }
}

pub fn tokenize(query: &str) -> TextQuery {
    let lower = query.trim().to_lowercase();

    let mut phrases = Vec::new();
    let mut rest = lower.clone();
    for cap in RE_PHRASE.captures_iter(&lower) {
        let phrase = cap[1].trim().to_string();
        if !phrase.is_empty() {
            phrases.push(phrase);
        }
    }
    if !phrases.is_empty() {
        rest = RE_PHRASE.replace_all(&lower, " ").into_owned();
    }

    let mut tokens = Vec::new();
    for piece in rest.split_whitespace() {
        for word in piece.split(SEPARATORS) {
            if !word.is_empty() {
                tokens.push(stem(word));
            }
        }
    }

    let unknown_requested = tokens.iter().any(|t| t == "unknown");
    tokens.retain(|t| t != "unknown");

    TextQuery {
        phrases,
        tokens,
        unknown_requested,
    }
}

fn stem(word: &str) -> String {
    for suffix in STEM_SUFFIXES {
        if word.len() > suffix.len() + 1 && word.ends_with(suffix) {
            return word[..word.len() - suffix.len()].to_string();
        }
    }
    word.to_string()
}

/// Positional distance capped at one: same-length words tolerate a single
/// substitution, a length-one difference counts every shifted position.
fn fuzzy_match(a: &str, b: &str) -> bool {
    let ac: Vec<char> = a.chars().collect();
    let bc: Vec<char> = b.chars().collect();
    if ac.len().abs_diff(bc.len()) > 1 {
        return false;
    }
    let mut distance = 0;
    for i in 0..ac.len().max(bc.len()) {
        if ac.get(i) != bc.get(i) {
            distance += 1;
            if distance > 1 {
                return false;
            }
        }
    }
    true
}

fn text_words(text: &str) -> Vec<&str> {
    text.split(|c: char| c.is_whitespace() || SEPARATORS.contains(&c))
        .filter(|w| !w.is_empty())
        .collect()
}

/// A record matches only when every phrase is a substring and every token
/// is found, by substring or by fuzzy comparison against the text's words.
pub fn is_match(text: &str, query: &TextQuery) -> bool {
    for phrase in &query.phrases {
        if !text.contains(phrase.as_str()) {
            return false;
        }
    }

    let mut words: Option<Vec<&str>> = None;
    for token in &query.tokens {
        if text.contains(token.as_str()) {
            continue;
        }
        let words = words.get_or_insert_with(|| text_words(text));
        let near = words
            .iter()
            .any(|w| w.chars().count() >= 3 && fuzzy_match(w, token));
        if !near {
            return false;
        }
    }
    true
}

fn count_occurrences(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack.match_indices(needle).count()
}

fn has_whole_word(haystack: &str, needle: &str) -> bool {
    let bytes = haystack.as_bytes();
    for (start, _) in haystack.match_indices(needle) {
        let end = start + needle.len();
        let before_ok = start == 0 || !is_word_byte(bytes[start - 1]);
        let after_ok = end == bytes.len() || !is_word_byte(bytes[end]);
        if before_ok && after_ok {
            return true;
        }
    }
    false
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Relevance of an already-matched record: phrase hits weigh heaviest, then
/// per-occurrence and whole-word bonuses, then a leading-position bonus.
pub fn score(text: &str, query: &TextQuery) -> u32 {
    let mut score = 0u32;

    for phrase in &query.phrases {
        if text.contains(phrase.as_str()) {
            score += 100;
        }
    }

    for token in &query.tokens {
        score += count_occurrences(text, token) as u32 * 10;
        if has_whole_word(text, token) {
            score += 20;
        }
        if text.starts_with(token.as_str()) {
            score += 15;
        }
    }

    score
}

fn unknown_score(rec: &ParsedRecord) -> Option<u32> {
    let level_unknown = rec.entry.level == LogLevel::Unknown;
    let env_unknown = rec.entry.environment == Environment::Unknown;
    if !level_unknown && !env_unknown && !rec.search_text.contains("unknown") {
        return None;
    }
    let mut score = 30;
    if level_unknown {
        score += 10;
    }
    if env_unknown {
        score += 10;
    }
    Some(score)
}

/// Rank records against a free-text query. A query with no usable terms
/// selects everything in store order; otherwise matches come back in
/// descending score order with ties keeping store order.
pub fn search(records: &[ParsedRecord], query: &str) -> Vec<usize> {
    let query = tokenize(query);
    if query.is_empty() {
        return (0..records.len()).collect();
    }

    let mut scored: Vec<(u32, usize)> = Vec::new();
    for (p, rec) in records.iter().enumerate() {
        if query.has_search_terms() && is_match(&rec.search_text, &query) {
            scored.push((score(&rec.search_text, &query), p));
            continue;
        }
        if query.unknown_requested {
            if let Some(s) = unknown_score(rec) {
                scored.push((s, p));
            }
        }
    }
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
    scored.into_iter().map(|(_, p)| p).collect()
}
