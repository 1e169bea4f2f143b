// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{Duration, TimeZone, Utc};
use mockito::{Matcher, Server};
use oplog::clock::{ManualClock, SharedClock};
use oplog::config::{BrokerConfig, Config, FileConfig, SearchConfig};
use oplog::entry::{Fields, Level};
use oplog::event::{JobEvent, JobOutcome, ModelEvent, ModelEventKind, QueryEvent, RequestEvent};
use oplog::recorder::Recorder;
use oplog::sinks::OnError;
use oplog::transaction::NoTransactions;
use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

fn clock() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 12, 14, 0, 0).unwrap())
}

fn file_config(directory: &Path) -> FileConfig {
    FileConfig {
        directory: directory.to_path_buf(),
        name: "oplog".to_string(),
        retention_days: 7,
    }
}

fn read_docs(path: &Path) -> Vec<Value> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn updated_user(id: &str) -> ModelEvent {
    ModelEvent {
        kind: ModelEventKind::Updated,
        model_type: "App\\Models\\User".to_string(),
        primary_key: Some(id.to_string()),
        connection_name: "mysql".to_string(),
        table: "users".to_string(),
        previous_attributes: Some(json!({"name": "Y"}).as_object().unwrap().clone()),
        after_attributes: Some(json!({"name": "X"}).as_object().unwrap().clone()),
    }
}

#[test]
fn request_is_shipped_to_every_sink_at_the_boundary() {
    // One bulk request and one broker request per channel.
    let mut search = Server::new();
    let database_bulk = search
        .mock("POST", "/_bulk")
        .match_header("content-type", "application/x-ndjson")
        .match_body(Matcher::Regex(
            r#""message":"App\\\\Models\\\\User updated""#.to_string(),
        ))
        .with_status(200)
        .with_body(r#"{"errors":false,"items":[{"index":{"status":201}}]}"#)
        .expect(1)
        .create();
    let http_bulk = search
        .mock("POST", "/_bulk")
        .match_body(Matcher::Regex(r#""message":"PUT /users/42 200""#.to_string()))
        .with_status(200)
        .with_body(r#"{"errors":false,"items":[{"index":{"status":201}}]}"#)
        .expect(1)
        .create();

    let mut broker = Server::new();
    let topic = broker
        .mock("POST", "/topics/app")
        .match_header("content-type", "application/vnd.kafka.json.v2+json")
        .with_status(200)
        .expect(2)
        .create();

    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        search: Some(SearchConfig {
            url: search.url(),
            default_index: "app-logs".to_string(),
            api_key: None,
        }),
        broker: Some(BrokerConfig {
            url: broker.url(),
            topic: "app".to_string(),
        }),
        file: Some(file_config(dir.path())),
        on_error: OnError::Propagate,
        max_retries: 1,
        ..Config::default()
    };
    let clock = clock();
    let shared: SharedClock = Arc::new(clock.clone());
    let mut recorder = Recorder::from_config(&config, Box::new(NoTransactions), shared);

    recorder.record_query(&QueryEvent::new(
        "UPDATE users SET name=? WHERE id=?",
        vec![json!("X"), json!(42)],
        3.0,
        "mysql",
    ));
    clock.advance(Duration::milliseconds(2));
    recorder.record_model_event(&updated_user("42"));
    recorder.record_request(&RequestEvent {
        method: "PUT".to_string(),
        path: "/users/42".to_string(),
        route: None,
        status: 200,
        duration_ms: 18.0,
        ip: None,
        user_id: Some("7".to_string()),
    });

    let report = recorder.end_request();

    database_bulk.assert();
    http_bulk.assert();
    topic.assert();
    assert_eq!(report.entries, 2);
    assert_eq!(report.batch_failures, 0);
    assert_eq!(report.fallback_entries, 0);

    let docs = read_docs(&dir.path().join("oplog-2024-06-12.jsonl"));
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[0]["channel"], "database");
    assert_eq!(docs[0]["context"]["query"], "UPDATE users SET name=? WHERE id=?");
    assert_eq!(docs[0]["context"]["previous_value"], json!({"name": "Y"}));
    assert_eq!(docs[0]["context"]["after_value"], json!({"name": "X"}));
    assert_eq!(docs[1]["channel"], "http");
    assert_eq!(docs[1]["context"]["user_id"], "7");
}

#[test]
fn failing_search_cluster_does_not_block_file_delivery() {
    let mut search = Server::new();
    let bulk = search
        .mock("POST", "/_bulk")
        .with_status(503)
        .expect_at_least(1)
        .create();

    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        search: Some(SearchConfig {
            url: search.url(),
            default_index: "logs".to_string(),
            api_key: None,
        }),
        file: Some(file_config(dir.path())),
        max_retries: 2,
        retry_backoff_base_ms: 1,
        ..Config::default()
    };
    let mut recorder =
        Recorder::from_config(&config, Box::new(NoTransactions), Arc::new(clock()));

    recorder.record_job(&JobEvent {
        job: "SendInvoice".to_string(),
        queue: "mail".to_string(),
        connection: "redis".to_string(),
        outcome: JobOutcome::Processed,
        attempts: 1,
        duration_ms: 250.0,
        error: None,
    });
    let report = recorder.end_job();

    bulk.assert();
    assert_eq!(report.write_failures, 0, "swallowed by default");
    let docs = read_docs(&dir.path().join("oplog-2024-06-12.jsonl"));
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["message"], "Job SendInvoice processed");
    assert_eq!(docs[0]["channel"], "jobs");
}

#[test]
fn entries_with_an_index_field_are_routed_to_that_index() {
    let mut search = Server::new();
    let audit = search
        .mock("POST", "/_bulk")
        .match_body(Matcher::Regex(r#"\{"_index":"audit"\}"#.to_string()))
        .with_status(200)
        .with_body(r#"{"errors":false}"#)
        .expect(1)
        .create();

    let config = Config {
        search: Some(SearchConfig {
            url: search.url(),
            default_index: "logs".to_string(),
            api_key: None,
        }),
        ..Config::default()
    };
    let mut recorder =
        Recorder::from_config(&config, Box::new(NoTransactions), Arc::new(clock()));

    let mut fields = Fields::new();
    fields.insert("index".to_string(), json!("audit"));
    recorder.log("security", Level::Notice, "password changed", fields);
    recorder.end_request();

    audit.assert();
}

#[test]
fn transaction_ids_group_writes_and_reset_at_the_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        file: Some(file_config(dir.path())),
        ..Config::default()
    };
    let level = Arc::new(AtomicU32::new(1));
    let source_level = Arc::clone(&level);
    let mut recorder = Recorder::from_config(
        &config,
        Box::new(move |_: &str| -> anyhow::Result<u32> {
            Ok(source_level.load(Ordering::SeqCst))
        }),
        Arc::new(clock()),
    );

    for id in ["1", "2"] {
        recorder.record_query(&QueryEvent::new(
            "update users set name = ? where id = ?",
            vec![json!("X"), json!(id.parse::<u32>().unwrap())],
            1.0,
            "mysql",
        ));
        recorder.record_model_event(&updated_user(id));
    }
    recorder.end_request();

    recorder.record_query(&QueryEvent::new(
        "delete from users where id = ?",
        vec![json!(3)],
        1.0,
        "mysql",
    ));
    recorder.end_request();

    let docs = read_docs(&dir.path().join("oplog-2024-06-12.jsonl"));
    assert_eq!(docs.len(), 3);
    let first = docs[0]["context"]["transaction_id"].as_str().unwrap();
    assert!(first.starts_with("txn-"));
    assert_eq!(docs[1]["context"]["transaction_id"], first);
    assert_ne!(docs[2]["context"]["transaction_id"], first);
}

#[test]
fn write_without_lifecycle_event_is_logged_after_the_window() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        file: Some(file_config(dir.path())),
        ..Config::default()
    };
    let clock = clock();
    let mut recorder =
        Recorder::from_config(&config, Box::new(NoTransactions), Arc::new(clock.clone()));

    recorder.record_query(&QueryEvent::new(
        "insert into audit_trail (action) values (?)",
        vec![json!("login")],
        1.0,
        "mysql",
    ));
    clock.advance(Duration::seconds(6));
    recorder.record_query(&QueryEvent::new("select 1", vec![], 0.2, "mysql"));
    assert_eq!(recorder.pending_queries(), 0);
    assert_eq!(recorder.buffered(), 1);

    recorder.end_request();
    let docs = read_docs(&dir.path().join("oplog-2024-06-12.jsonl"));
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["context"]["query_type"], "insert");
    assert!(docs[0]["context"].get("previous_value").is_none());
    assert!(docs[0]["context"].get("after_value").is_none());
}

#[test]
fn file_retention_runs_once_per_day_across_writes() {
    let dir = tempfile::tempdir().unwrap();
    let expired = dir.path().join("oplog-2024-06-01.jsonl");
    let recent = dir.path().join("oplog-2024-06-10.jsonl");
    fs::write(&expired, "{}\n").unwrap();
    fs::write(&recent, "{}\n").unwrap();

    let config = Config {
        file: Some(file_config(dir.path())),
        ..Config::default()
    };
    let clock = clock();
    let mut recorder =
        Recorder::from_config(&config, Box::new(NoTransactions), Arc::new(clock.clone()));

    recorder.log("database", Level::Info, "first", Fields::new());
    recorder.end_request();
    assert!(!expired.exists());
    assert!(recent.exists());
    assert_eq!(
        fs::read_to_string(dir.path().join(".oplog-last-prune")).unwrap(),
        "2024-06-12"
    );

    let late = dir.path().join("oplog-2024-05-01.jsonl");
    fs::write(&late, "{}\n").unwrap();
    recorder.log("database", Level::Info, "second", Fields::new());
    recorder.end_request();
    assert!(late.exists(), "already swept today");

    clock.advance(Duration::days(1));
    recorder.log("database", Level::Info, "third", Fields::new());
    recorder.end_request();
    assert!(!late.exists());
}
