use serde_json::{Map, Value};

/// Source format of a parsed log line. Detection happens once per line and
/// the assigned kind never changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Pino,
    Winston,
    Loki,
    Promtail,
    Docker,
    #[serde(rename = "unknown-json")]
    UnknownJson,
    Text,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Pino => "pino",
            SourceKind::Winston => "winston",
            SourceKind::Loki => "loki",
            SourceKind::Promtail => "promtail",
            SourceKind::Docker => "docker",
            SourceKind::UnknownJson => "unknown-json",
            SourceKind::Text => "text",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a decoded JSON value. The predicates form a fixed priority
/// chain; the first structural match wins, and anything that matches
/// nothing is `unknown-json`.
pub fn detect(value: &Value) -> SourceKind {
    if is_pino(value) {
        SourceKind::Pino
    } else if is_docker(value) {
        SourceKind::Docker
    } else if is_promtail(value) {
        SourceKind::Promtail
    } else if is_winston(value) {
        SourceKind::Winston
    } else if is_loki(value) {
        SourceKind::Loki
    } else {
        SourceKind::UnknownJson
    }
}

fn obj(value: &Value) -> Option<&Map<String, Value>> {
    value.as_object()
}

fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key).and_then(Value::as_str)
}

pub fn is_pino(value: &Value) -> bool {
    let Some(map) = obj(value) else { return false };
    let level_ok = matches!(
        map.get("level").and_then(Value::as_i64),
        Some(10 | 20 | 30 | 40 | 50 | 60)
    );
    map.get("time").map(Value::is_number).unwrap_or(false)
        && level_ok
        && str_field(map, "msg").is_some()
        && map.get("pid").map(Value::is_number).unwrap_or(false)
        && str_field(map, "hostname").is_some()
        && str_field(map, "name").is_some()
}

pub fn is_docker(value: &Value) -> bool {
    let Some(map) = obj(value) else { return false };
    str_field(map, "log").is_some()
        && str_field(map, "time").is_some()
        && matches!(str_field(map, "stream"), Some("stdout" | "stderr"))
}

pub fn is_promtail(value: &Value) -> bool {
    let Some(map) = obj(value) else { return false };
    str_field(map, "ts").is_some()
        && str_field(map, "message").is_some()
        && matches!(
            str_field(map, "level"),
            Some("debug" | "info" | "warn" | "error")
        )
}

pub fn is_winston(value: &Value) -> bool {
    let Some(map) = obj(value) else { return false };
    // A string `ts` field disambiguates promtail-shaped lines from winston.
    if str_field(map, "ts").is_some() {
        return false;
    }
    str_field(map, "timestamp").is_some()
        && str_field(map, "message").is_some()
        && matches!(
            str_field(map, "level"),
            Some("silly" | "debug" | "verbose" | "info" | "warn" | "error")
        )
}

pub fn is_loki(value: &Value) -> bool {
    let Some(map) = obj(value) else { return false };
    str_field(map, "ts").is_some()
        && map.get("labels").map(Value::is_object).unwrap_or(false)
        && str_field(map, "line").is_some()
}
