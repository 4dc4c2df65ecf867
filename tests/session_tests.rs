use logsieve::session::{Event, Session};
use std::io::Write;
use std::time::Duration;

fn fixture_file() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    let content = concat!(
        r#"{"level":50,"time":1700000000123,"msg":"database timeout","pid":1,"hostname":"api-prod-1","name":"svc"}"#, "\n",
        r#"{"level":30,"time":1700000001123,"msg":"request served","pid":1,"hostname":"api-prod-1","name":"svc"}"#, "\n",
        "plain text line\n",
    );
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

async fn recv(events: &mut tokio::sync::mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event within timeout")
        .expect("channel open")
}

async fn drain_until_done(events: &mut tokio::sync::mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
    let mut seen = Vec::new();
    loop {
        let ev = recv(events).await;
        let done = matches!(ev, Event::Done);
        seen.push(ev);
        if done {
            return seen;
        }
    }
}

#[tokio::test]
async fn parse_then_search_over_the_channel() {
    let file = fixture_file();
    let (session, mut events) = Session::spawn();
    assert!(session.start(file.path().to_path_buf(), 1 << 20, 0).await);

    let seen = drain_until_done(&mut events).await;
    let summary = seen
        .iter()
        .find_map(|e| match e {
            Event::Summary(s) => Some(s),
            _ => None,
        })
        .expect("summary before done");
    assert_eq!(summary.total_lines, 3);
    assert_eq!(summary.counts.pino, 2);
    assert_eq!(summary.counts.text, 1);

    assert!(session.search("level = error").await);
    let Event::SearchStart { query } = recv(&mut events).await else {
        panic!("expected search-start");
    };
    assert_eq!(query, "level = error");

    let Event::SearchResult(result) = recv(&mut events).await else {
        panic!("expected search-result");
    };
    assert_eq!(result.positions, vec![0]);
    assert_eq!(result.entries.len(), 1);
    assert_eq!(result.entries[0].message, "database timeout");
    assert!(result.used_index);
}

#[tokio::test]
async fn free_text_search_returns_ranked_positions() {
    let file = fixture_file();
    let (session, mut events) = Session::spawn();
    session.start(file.path().to_path_buf(), 1 << 20, 0).await;
    drain_until_done(&mut events).await;

    session.search("timeout").await;
    let _start = recv(&mut events).await;
    let Event::SearchResult(result) = recv(&mut events).await else {
        panic!("expected search-result");
    };
    assert_eq!(result.positions, vec![0]);
    assert!(!result.used_index);
}

#[tokio::test]
async fn empty_query_selects_everything() {
    let file = fixture_file();
    let (session, mut events) = Session::spawn();
    session.start(file.path().to_path_buf(), 1 << 20, 0).await;
    drain_until_done(&mut events).await;

    session.search("   ").await;
    let _start = recv(&mut events).await;
    let Event::SearchResult(result) = recv(&mut events).await else {
        panic!("expected search-result");
    };
    assert_eq!(result.positions, vec![0, 1, 2]);
}

#[tokio::test]
async fn invalid_structured_query_reports_search_error() {
    let file = fixture_file();
    let (session, mut events) = Session::spawn();
    session.start(file.path().to_path_buf(), 1 << 20, 0).await;
    drain_until_done(&mut events).await;

    session.search("level =").await;
    let _start = recv(&mut events).await;
    let Event::SearchError { query, message } = recv(&mut events).await else {
        panic!("expected search-error");
    };
    assert_eq!(query, "level =");
    assert!(!message.is_empty());
}

#[tokio::test]
async fn restart_replaces_previous_store() {
    let file = fixture_file();
    let (session, mut events) = Session::spawn();
    session.start(file.path().to_path_buf(), 1 << 20, 0).await;
    drain_until_done(&mut events).await;

    let mut small = tempfile::NamedTempFile::new().unwrap();
    small.write_all(b"only line\n").unwrap();
    small.flush().unwrap();

    session.start(small.path().to_path_buf(), 1 << 20, 0).await;
    let seen = drain_until_done(&mut events).await;
    let summary = seen
        .iter()
        .find_map(|e| match e {
            Event::Summary(s) => Some(s),
            _ => None,
        })
        .expect("summary");
    assert_eq!(summary.total_lines, 1);

    session.search("").await;
    let _start = recv(&mut events).await;
    let Event::SearchResult(result) = recv(&mut events).await else {
        panic!("expected search-result");
    };
    assert_eq!(result.positions, vec![0]);
}

#[tokio::test]
async fn start_failure_emits_error_event_and_worker_survives() {
    let (session, mut events) = Session::spawn();
    session
        .start("/nonexistent/logsieve-test.log".into(), 1024, 0)
        .await;
    let ev = recv(&mut events).await;
    assert!(matches!(ev, Event::Error { .. }));

    // The worker keeps serving requests after a failed parse.
    let file = fixture_file();
    session.start(file.path().to_path_buf(), 1 << 20, 0).await;
    let seen = drain_until_done(&mut events).await;
    assert!(seen.iter().any(|e| matches!(e, Event::Summary(_))));
}

#[tokio::test]
async fn dropping_the_session_stops_the_worker() {
    let (session, mut events) = Session::spawn();
    drop(session);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(events.recv().await.is_none());
}

#[test]
fn events_serialize_with_type_tags() {
    let ev = Event::SearchStart {
        query: "level = error".into(),
    };
    let json = serde_json::to_value(&ev).unwrap();
    assert_eq!(json["type"], "search-start");
    assert_eq!(json["query"], "level = error");

    let done = serde_json::to_value(Event::Done).unwrap();
    assert_eq!(done["type"], "done");
}
