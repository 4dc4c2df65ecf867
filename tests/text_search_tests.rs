use logsieve::normalize::{parse_json_candidate, parse_text_line, ParsedRecord};
use logsieve::text_search::{is_match, score, search, tokenize};

fn records() -> Vec<ParsedRecord> {
    vec![
        parse_text_line("connection refused by upstream"),
        parse_text_line("INFO connection established"),
        parse_text_line("retrying connection to database"),
        parse_text_line("totally unrelated words here"),
        parse_json_candidate(serde_json::json!({
            "level": 50,
            "time": 1_700_000_000_123u64,
            "msg": "connection refused twice: connection dropped",
            "pid": 9,
            "hostname": "db-prod-2",
            "name": "gateway",
        })),
    ]
}

#[test]
fn tokenizer_extracts_phrases_and_stemmed_tokens() {
    let q = tokenize("\"connection refused\" retrying db-prod");
    assert_eq!(q.phrases, vec!["connection refused"]);
    // Separator split plus stemming: "retrying" becomes "retry".
    assert_eq!(q.tokens, vec!["retry", "db", "prod"]);
    assert!(!q.unknown_requested);
}

#[test]
fn unknown_is_lifted_out_of_the_token_list() {
    let q = tokenize("unknown timeout");
    assert!(q.unknown_requested);
    assert_eq!(q.tokens, vec!["timeout"]);
}

#[test]
fn every_phrase_must_be_present() {
    let records = records();
    let q = tokenize("\"connection refused\"");
    assert!(is_match(&records[0].search_text, &q));
    assert!(!is_match(&records[1].search_text, &q));
}

#[test]
fn every_token_must_match() {
    let records = vec![
        parse_text_line("disk full on node-7"),
        parse_text_line("disk error on node-3"),
    ];
    // Record 0 has "disk" but not "error", so only record 1 qualifies.
    assert_eq!(search(&records, "disk error"), vec![1]);
}

#[test]
fn mixed_phrase_and_token_requirements_combine_with_and() {
    let records = records();
    // The phrase matches records 0 and 4, the token only record 2 and 4's
    // hostname; the conjunction leaves record 4.
    let hits = search(&records, "\"connection refused\" db");
    assert_eq!(hits, vec![4]);
}

#[test]
fn repeated_occurrences_score_higher() {
    let records = records();
    let q = tokenize("connection");
    assert!(score(&records[4].search_text, &q) > score(&records[0].search_text, &q));
}

#[test]
fn fuzzy_matching_tolerates_one_positional_error() {
    let records = records();
    // One substitution inside the word.
    assert_eq!(search(&records[..1], "sonnection"), vec![0]);
    // One trailing character dropped.
    assert_eq!(search(&records[..1], "connectio"), vec![0]);
    // Heavy mangling does not match.
    assert!(search(&records[..1], "cnxn").is_empty());
}

#[test]
fn partial_word_matches_by_substring() {
    let records = records();
    let hits = search(&records, "establ");
    assert_eq!(hits, vec![1]);
}

#[test]
fn unknown_token_targets_unknown_facets() {
    let records = vec![
        parse_text_line("something odd happened"),
        parse_text_line("ERROR something odd happened env=prod"),
    ];
    // Record 0 has unknown level and environment; record 1 has neither and
    // never says "unknown".
    assert_eq!(search(&records, "unknown"), vec![0]);
}

#[test]
fn unknown_combines_with_ordinary_tokens() {
    let records = vec![
        parse_text_line("ERROR disk failure env=prod"),
        parse_text_line("something odd happened"),
    ];
    // "disk" matches record 0 by token; record 1 joins via the unknown flag.
    let hits = search(&records, "unknown disk");
    assert!(hits.contains(&0));
    assert!(hits.contains(&1));
}

#[test]
fn search_ranks_by_score_descending() {
    let records = records();
    let hits = search(&records, "connection");
    assert_eq!(hits.first(), Some(&4), "double occurrence ranks first");
    assert!(hits.contains(&0));
    assert!(hits.contains(&1));
    assert!(hits.contains(&2));
    assert!(!hits.contains(&3));
}

#[test]
fn ties_keep_store_order() {
    let records = vec![
        parse_text_line("alpha beta"),
        parse_text_line("alpha gamma"),
    ];
    assert_eq!(search(&records, "alpha"), vec![0, 1]);
}

#[test]
fn token_free_query_selects_everything() {
    let records = records();
    let everything: Vec<usize> = (0..records.len()).collect();
    assert_eq!(search(&records, "   "), everything);
    assert_eq!(search(&records, "::"), everything);
}
