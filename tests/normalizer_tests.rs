use chrono::{TimeZone, Utc};
use logsieve::formats::{detect, SourceKind};
use logsieve::normalize::{
    parse_iso_millis, parse_json_candidate, parse_text_line, Environment, LogLevel,
};

fn json(s: &str) -> serde_json::Value {
    serde_json::from_str(s).expect("fixture should be valid json")
}

#[test]
fn detects_pino_by_shape() {
    let v = json(
        r#"{"level":30,"time":1700000000123,"msg":"ready","pid":321,"hostname":"api-01","name":"svc"}"#,
    );
    assert_eq!(detect(&v), SourceKind::Pino);
}

#[test]
fn pino_requires_known_numeric_level() {
    let v = json(
        r#"{"level":35,"time":1700000000123,"msg":"ready","pid":321,"hostname":"api-01","name":"svc"}"#,
    );
    assert_eq!(detect(&v), SourceKind::UnknownJson);
}

#[test]
fn detects_docker_before_promtail_and_winston() {
    let v = json(r#"{"log":"started","stream":"stdout","time":"2024-01-15T10:30:00Z"}"#);
    assert_eq!(detect(&v), SourceKind::Docker);
}

#[test]
fn string_ts_field_disambiguates_promtail_from_winston() {
    let promtail = json(
        r#"{"ts":"2024-01-15T10:30:00Z","level":"info","message":"hello"}"#,
    );
    assert_eq!(detect(&promtail), SourceKind::Promtail);

    let winston = json(
        r#"{"timestamp":"2024-01-15T10:30:00Z","level":"verbose","message":"hello"}"#,
    );
    assert_eq!(detect(&winston), SourceKind::Winston);

    // Both ts and timestamp present: the ts string wins and winston loses.
    let ambiguous = json(
        r#"{"ts":"2024-01-15T10:30:00Z","timestamp":"2024-01-15T10:30:00Z","level":"info","message":"hello"}"#,
    );
    assert_eq!(detect(&ambiguous), SourceKind::Promtail);
}

#[test]
fn detects_loki_by_labels_object() {
    let v = json(r#"{"ts":"2024-01-15T10:30:00Z","labels":{"job":"nginx"},"line":"GET /"}"#);
    assert_eq!(detect(&v), SourceKind::Loki);
}

#[test]
fn unmatched_object_is_unknown_json() {
    let v = json(r#"{"foo":1,"bar":"two"}"#);
    assert_eq!(detect(&v), SourceKind::UnknownJson);
}

#[test]
fn pino_levels_map_to_named_levels() {
    let cases = [
        (10, LogLevel::Trace),
        (20, LogLevel::Debug),
        (30, LogLevel::Info),
        (40, LogLevel::Warn),
        (50, LogLevel::Error),
        (60, LogLevel::Fatal),
    ];
    for (num, expected) in cases {
        let rec = parse_json_candidate(json(&format!(
            r#"{{"level":{num},"time":1700000000123,"msg":"m","pid":1,"hostname":"h","name":"n"}}"#
        )));
        assert_eq!(rec.entry.level, expected, "pino level {num}");
    }
}

#[test]
fn pino_timestamp_is_epoch_millis_verbatim() {
    let rec = parse_json_candidate(json(
        r#"{"level":30,"time":1700000000123,"msg":"m","pid":1,"hostname":"h","name":"n"}"#,
    ));
    assert_eq!(rec.entry.timestamp, Some(1700000000123));
}

#[test]
fn pino_http_fields_come_from_req_and_res() {
    let rec = parse_json_candidate(json(
        r#"{"level":30,"time":1,"msg":"handled","pid":1,"hostname":"h","name":"n",
            "req":{"method":"GET","url":"/api/users","id":"req-9"},
            "res":{"statusCode":502,"responseTimeMs":12.5}}"#,
    ));
    let http = rec.entry.http.expect("http fields");
    assert_eq!(http.method.as_deref(), Some("GET"));
    assert_eq!(http.url.as_deref(), Some("/api/users"));
    assert_eq!(http.status_code, Some(502));
    assert_eq!(http.response_time_ms, Some(12.5));
    assert_eq!(http.request_id.as_deref(), Some("req-9"));
}

#[test]
fn winston_silly_and_verbose_normalize_to_debug() {
    for lvl in ["silly", "verbose", "debug"] {
        let rec = parse_json_candidate(json(&format!(
            r#"{{"timestamp":"2024-01-15T10:30:00Z","level":"{lvl}","message":"m"}}"#
        )));
        assert_eq!(rec.entry.level, LogLevel::Debug, "winston {lvl}");
    }
}

#[test]
fn winston_timestamp_parses_to_millis() {
    let rec = parse_json_candidate(json(
        r#"{"timestamp":"2024-01-15T10:30:00.250Z","level":"info","message":"m"}"#,
    ));
    let expected = Utc
        .with_ymd_and_hms(2024, 1, 15, 10, 30, 0)
        .unwrap()
        .timestamp_millis()
        + 250;
    assert_eq!(rec.entry.timestamp, Some(expected));
}

#[test]
fn loki_level_is_detected_from_line_text() {
    let rec = parse_json_candidate(json(
        r#"{"ts":"2024-01-15T10:30:00Z","labels":{"job":"nginx"},"line":"upstream error: connection refused"}"#,
    ));
    assert_eq!(rec.entry.kind, SourceKind::Loki);
    assert_eq!(rec.entry.level, LogLevel::Error);
}

#[test]
fn loki_environment_comes_from_labels_only() {
    let rec = parse_json_candidate(json(
        r#"{"ts":"2024-01-15T10:30:00Z","labels":{"environment":"staging"},"line":"ok"}"#,
    ));
    assert_eq!(rec.entry.environment, Environment::Staging);

    // A non-exact label value does not resolve.
    let rec = parse_json_candidate(json(
        r#"{"ts":"2024-01-15T10:30:00Z","labels":{"environment":"production"},"line":"ok"}"#,
    ));
    assert_eq!(rec.entry.environment, Environment::Unknown);
}

#[test]
fn hostname_substring_wins_the_environment_cascade() {
    let rec = parse_json_candidate(json(
        r#"{"level":30,"time":1,"msg":"m","pid":1,"hostname":"api-prod-01","name":"n","env":"dev"}"#,
    ));
    assert_eq!(rec.entry.environment, Environment::Prod);
}

#[test]
fn generic_environment_fields_match_by_substring() {
    let rec = parse_json_candidate(json(r#"{"foo":1,"NODE_ENV":"development"}"#));
    assert_eq!(rec.entry.environment, Environment::Dev);
}

#[test]
fn docker_env_tag_in_message_is_a_fallback() {
    let rec = parse_json_candidate(json(
        r#"{"log":"request served env=staging in 4ms","stream":"stdout","time":"2024-01-15T10:30:00Z"}"#,
    ));
    assert_eq!(rec.entry.kind, SourceKind::Docker);
    assert_eq!(rec.entry.environment, Environment::Staging);
}

#[test]
fn text_line_detects_level_and_env_tag() {
    let rec = parse_text_line("2024-01-15 WARNING disk almost full env=prod");
    assert_eq!(rec.entry.kind, SourceKind::Text);
    assert_eq!(rec.entry.level, LogLevel::Warn);
    assert_eq!(rec.entry.environment, Environment::Prod);
    assert!(rec.entry.timestamp.is_none());
}

#[test]
fn unknown_json_numeric_timestamps_scale_by_magnitude() {
    // epoch seconds
    let rec = parse_json_candidate(json(r#"{"ts":1700000000,"detail":"x"}"#));
    assert_eq!(rec.entry.timestamp, Some(1_700_000_000_000));
    // already milliseconds
    let rec = parse_json_candidate(json(r#"{"ts":1700000000123,"detail":"x"}"#));
    assert_eq!(rec.entry.timestamp, Some(1_700_000_000_123));
}

#[test]
fn unknown_json_message_falls_back_to_truncated_raw() {
    let filler = "x".repeat(300);
    let rec = parse_json_candidate(json(&format!(r#"{{"data":"{filler}"}}"#)));
    assert_eq!(rec.entry.kind, SourceKind::UnknownJson);
    assert_eq!(rec.entry.message.chars().count(), 200);
}

#[test]
fn unknown_json_prefers_known_message_keys() {
    let rec = parse_json_candidate(json(r#"{"text":"hello there","other":1}"#));
    assert_eq!(rec.entry.message, "hello there");
}

#[test]
fn iso_parsing_accepts_space_separated_and_naive_forms() {
    let expected = Utc
        .with_ymd_and_hms(2024, 1, 1, 12, 0, 0)
        .unwrap()
        .timestamp_millis();
    assert_eq!(parse_iso_millis("2024-01-01T12:00:00Z"), Some(expected));
    assert_eq!(parse_iso_millis("2024-01-01 12:00:00"), Some(expected));
    assert_eq!(parse_iso_millis("2024/01/01 12:00:00"), Some(expected));
    assert_eq!(parse_iso_millis("2024-01-01 13:00:00+01:00"), Some(expected));
    assert_eq!(parse_iso_millis("not a time"), None);
}

#[test]
fn search_text_is_lowercase_and_carries_facets() {
    let rec = parse_json_candidate(json(
        r#"{"level":50,"time":1700000000123,"msg":"DB Timeout","pid":7,"hostname":"API-prod-3","name":"orders"}"#,
    ));
    let text = &rec.search_text;
    assert!(text.contains("db timeout"));
    assert!(text.contains("level:error"));
    assert!(text.contains("env:prod"));
    assert!(text.contains("7@api-prod-3 (orders)"));
    assert_eq!(text, &text.to_lowercase());
}

#[test]
fn search_text_includes_rfc3339_variant_of_timestamp() {
    let rec = parse_json_candidate(json(
        r#"{"ts":"2024-01-15 10:30:00","level":"info","message":"tick"}"#,
    ));
    assert!(rec.search_text.contains("2024-01-15 10:30:00"));
    assert!(rec.search_text.contains("2024-01-15t10:30:00"));
}
