//! Integration tests: scripted fetcher → collector → JSONL store on disk.
//!
//! Each test works in its own temp directory and drives `Collector` end to end
//! through `MockFetcher`, then inspects the store file directly.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use harvest_common::{FetchError, Identity, Query, RawUnit, Record};
use harvest_core::testing::{record, unit, MockFetcher};
use harvest_core::{
    CollectSettings, Collector, IdentityIndex, OutputStore, PaginationConfig, QueryJob,
    QueryOutcome, StopReason,
};

fn settings() -> CollectSettings {
    CollectSettings::builder()
        .pagination(
            PaginationConfig::builder()
                .step_delay(Duration::ZERO)
                .retry_delay(Duration::ZERO)
                .build(),
        )
        .query_delay(Duration::ZERO)
        .build()
}

fn ts(i: usize) -> String {
    format!("2025-02-01T12:{:02}:{:02}.000Z", i / 60, i % 60)
}

fn post(i: usize) -> RawUnit {
    unit(&format!("user{i}"), &ts(i), &format!("post number {i}"))
}

fn posts(range: std::ops::Range<usize>) -> Vec<RawUnit> {
    range.map(post).collect()
}

fn stored(path: &Path) -> Vec<Record> {
    OutputStore::open(path)
        .unwrap()
        .iter()
        .unwrap()
        .filter_map(Result::ok)
        .collect()
}

fn stored_texts(path: &Path) -> Vec<String> {
    stored(path).into_iter().map(|r| r.content).collect()
}

#[tokio::test]
async fn first_seen_order_without_rerendered_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scenario.jsonl");
    let a = unit("user1", "2025-01-01T00:00:01.000Z", "A");
    let b = unit("user2", "2025-01-01T00:00:02.000Z", "B");
    let c = unit("user3", "2025-01-01T00:00:03.000Z", "C");
    let fetcher = MockFetcher::new().on_query("q", vec![vec![a.clone(), b], vec![a, c]]);
    let mut collector = Collector::new(fetcher, settings());

    let report = collector.collect(&Query::new("q", "Scenario"), &path, 10).await;

    assert_eq!(report.added, 3);
    assert_eq!(report.duplicates, 0);
    assert_eq!(stored_texts(&path), vec!["A", "B", "C"]);
    assert_eq!(
        stored(&path)[0],
        record("user1", "2025-01-01T00:00:01.000Z", "A")
    );
}

#[tokio::test]
async fn second_run_adds_nothing_and_leaves_store_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q.jsonl");
    let script = vec![posts(0..4), posts(2..7)];
    let query = Query::new("q", "Q");

    let mut collector = Collector::new(MockFetcher::new().on_query("q", script), settings());
    let first = collector.collect(&query, &path, 50).await;
    let after_first = std::fs::read(&path).unwrap();

    let second = collector.collect(&query, &path, 50).await;
    let after_second = std::fs::read(&path).unwrap();

    assert_eq!(first.added, 7);
    assert_eq!(second.added, 0);
    assert_eq!(second.previously_stored, 7);
    assert_eq!(second.duplicates, 7);
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn identities_in_store_are_unique() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q.jsonl");
    // Same author and time re-rendered with different text and a new id.
    let mut edited = post(1);
    edited.text = Some("post number 1 (edited)".into());
    edited.source_id = Some("other".into());
    let fetcher = MockFetcher::new().on_query("q", vec![posts(0..3), vec![edited, post(3)]]);
    let mut collector = Collector::new(fetcher, settings());

    let report = collector.collect(&Query::new("q", "Q"), &path, 50).await;

    let records = stored(&path);
    let identities: HashSet<Identity> = records.iter().map(|r| r.identity.clone()).collect();
    assert_eq!(identities.len(), records.len());
    assert_eq!(report.added, 4);
    assert_eq!(report.duplicates, 1);
}

#[tokio::test]
async fn restart_after_any_prefix_recovers_exactly_that_prefix() {
    for n in 0..=4 {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("q.jsonl");

        // A run that died after its nth successful append, mid-way through the next line.
        {
            let mut store = OutputStore::open(&path).unwrap();
            for i in 0..n {
                let r = record(&format!("user{i}"), &ts(i), &format!("post number {i}"));
                store.append(&r).unwrap();
            }
        }
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        std::io::Write::write_all(&mut file, br#"{"username":"@user9","timest"#).unwrap();
        drop(file);

        let store = OutputStore::open(&path).unwrap();
        let (index, stats) = IdentityIndex::load(&store).unwrap();
        assert_eq!(index.len(), n, "prefix of {n}");
        assert_eq!(stats.corrupt_lines, 1);
        drop(store);

        let fetcher = MockFetcher::new().on_query("q", vec![posts(0..6)]);
        let mut collector = Collector::new(fetcher, settings());
        let report = collector.collect(&Query::new("q", "Q"), &path, 50).await;

        assert_eq!(report.previously_stored, n);
        assert_eq!(report.duplicates, n);
        assert_eq!(report.added, 6 - n);
        let expected: Vec<String> = (0..6).map(|i| format!("post number {i}")).collect();
        assert_eq!(stored_texts(&path), expected);
    }
}

#[tokio::test]
async fn one_corrupt_line_among_valid_lines_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q.jsonl");
    let mut lines: Vec<String> = (0..5)
        .map(|i| serde_json::to_string(&record(&format!("user{i}"), &ts(i), "x")).unwrap())
        .collect();
    lines.insert(3, "{\"username\": oops".to_string());
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();

    let store = OutputStore::open(&path).unwrap();
    let (index, stats) = IdentityIndex::load(&store).unwrap();
    assert_eq!(index.len(), 5);
    assert_eq!(stats.corrupt_lines, 1);
    drop(store);

    let fetcher = MockFetcher::new().on_query("q", vec![posts(4..6)]);
    let mut collector = Collector::new(fetcher, settings());
    let report = collector.collect(&Query::new("q", "Q"), &path, 50).await;
    assert_eq!(report.previously_stored, 5);
    assert_eq!(report.added, 1);
}

#[tokio::test]
async fn stops_at_max_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q.jsonl");
    let script = (0..20).map(|i| posts(i * 3..i * 3 + 3)).collect();
    let mut collector = Collector::new(MockFetcher::new().on_query("q", script), settings());

    let report = collector.collect(&Query::new("q", "Q"), &path, 7).await;

    assert_eq!(report.added, 7);
    assert_eq!(stored(&path).len(), 7);
    assert_eq!(
        report.outcome,
        QueryOutcome::Completed {
            stop_reason: StopReason::MaxRecords,
            steps: 3
        }
    );
}

#[tokio::test]
async fn stops_at_max_advance_steps() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q.jsonl");
    let script = (0..20).map(|i| posts(i * 3..i * 3 + 3)).collect();
    let mut settings = settings();
    settings.pagination.max_advance_steps = 4;
    let mut collector = Collector::new(MockFetcher::new().on_query("q", script), settings);

    let report = collector.collect(&Query::new("q", "Q"), &path, 100).await;

    assert_eq!(report.added, 12);
    assert_eq!(collector.fetcher().advance_calls(), 4);
    assert_eq!(
        report.outcome,
        QueryOutcome::Completed {
            stop_reason: StopReason::MaxAdvanceSteps,
            steps: 4
        }
    );
}

#[tokio::test]
async fn failed_expansion_still_stores_truncated_text() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q.jsonl");
    let mut long = unit("writer", "2025-01-01T00:00:00.000Z", "It was the best of times…");
    long.truncated = true;
    let mut expandable = unit("poet", "2025-01-01T00:00:05.000Z", "Shall I compare…");
    expandable.truncated = true;
    let fetcher = MockFetcher::new()
        .on_query("q", vec![vec![long.clone(), expandable.clone()]])
        .on_expand(&long, Err(FetchError::Transient("show more vanished".into())))
        .on_expand(&expandable, Ok("Shall I compare thee to a summer's day?".into()));
    let mut collector = Collector::new(fetcher, settings());

    let report = collector.collect(&Query::new("q", "Q"), &path, 10).await;

    assert_eq!(report.added, 2);
    assert_eq!(
        stored_texts(&path),
        vec![
            "It was the best of times…",
            "Shall I compare thee to a summer's day?"
        ]
    );
    assert_eq!(collector.fetcher().expand_calls(), 2);
}

#[tokio::test]
async fn unidentifiable_units_are_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q.jsonl");
    let no_time = RawUnit {
        timestamp: None,
        ..post(1)
    };
    let fetcher = MockFetcher::new().on_query("q", vec![vec![post(0), no_time, post(2)]]);
    let mut collector = Collector::new(fetcher, settings());

    let report = collector.collect(&Query::new("q", "Q"), &path, 10).await;

    assert_eq!(report.added, 2);
    assert_eq!(report.unidentifiable, 1);
    assert!(!report.is_failed());
}

#[tokio::test]
async fn transient_fetch_failures_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q.jsonl");
    let steps = vec![
        Ok(posts(0..3)),
        Err(FetchError::Transient("timeout".into())),
        Err(FetchError::Transient("timeout".into())),
        Ok(posts(3..6)),
    ];
    let mut collector =
        Collector::new(MockFetcher::new().on_query_steps("q", steps), settings());

    let report = collector.collect(&Query::new("q", "Q"), &path, 50).await;

    assert_eq!(report.added, 6);
    assert_eq!(
        report.outcome,
        QueryOutcome::Completed {
            stop_reason: StopReason::EndOfResults,
            steps: 4
        }
    );
}

#[tokio::test]
async fn transient_navigation_failure_is_retried() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q.jsonl");
    let fetcher = MockFetcher::new()
        .on_query("q", vec![posts(0..3)])
        .fail_navigation_times("q", FetchError::Transient("connection reset".into()), 2);
    let mut collector = Collector::new(fetcher, settings());

    let report = collector.collect(&Query::new("q", "Q"), &path, 50).await;

    assert_eq!(report.added, 3);
    assert!(!report.is_failed());
    assert_eq!(collector.fetcher().navigations().len(), 3);
}

#[tokio::test]
async fn persistent_navigation_failure_fails_only_after_retries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q.jsonl");
    let fetcher = MockFetcher::new()
        .on_query("q", vec![posts(0..3)])
        .fail_navigation("q", FetchError::Transient("connection reset".into()));
    let mut collector = Collector::new(fetcher, settings());

    let report = collector.collect(&Query::new("q", "Q"), &path, 50).await;

    assert!(report.is_failed());
    assert_eq!(report.added, 0);
    // Default budget: one attempt plus three retries.
    assert_eq!(collector.fetcher().navigations().len(), 4);
}

#[tokio::test]
async fn failing_query_does_not_stop_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = MockFetcher::new()
        .fail_navigation("broken", FetchError::Fatal("login wall".into()))
        .on_query_steps(
            "fatal midway",
            vec![Ok(posts(0..2)), Err(FetchError::Fatal("session expired".into()))],
        )
        .on_query("healthy", vec![posts(10..13)]);
    let jobs: Vec<QueryJob> = ["broken", "fatal midway", "healthy"]
        .into_iter()
        .map(|q| QueryJob {
            query: Query::new(q, q),
            store_path: dir.path().join(format!("{}.jsonl", q.replace(' ', "_"))),
            max_records: 50,
        })
        .collect();
    let mut collector = Collector::new(fetcher, settings());

    let summary = collector.collect_all(&jobs).await;

    assert_eq!(summary.reports.len(), 3);
    assert!(summary.reports[0].is_failed());
    assert!(summary.reports[1].is_failed());
    assert_eq!(summary.reports[1].added, 2);
    assert!(!summary.reports[2].is_failed());
    assert_eq!(summary.reports[2].added, 3);
    assert_eq!(summary.total_added(), 5);
    assert_eq!(summary.failed(), 2);
    // Records appended before the failure are kept.
    assert_eq!(stored(&dir.path().join("fatal_midway.jsonl")).len(), 2);
    assert_eq!(
        collector.fetcher().navigations(),
        ["broken", "fatal midway", "healthy"]
    );
}

#[tokio::test]
async fn unopenable_store_fails_only_its_query() {
    let dir = tempfile::tempdir().unwrap();
    let blocked = dir.path().join("blocked.jsonl");
    std::fs::create_dir(&blocked).unwrap();
    let fetcher = MockFetcher::new()
        .on_query("a", vec![posts(0..2)])
        .on_query("b", vec![posts(0..2)]);
    let jobs = vec![
        QueryJob {
            query: Query::new("a", "A"),
            store_path: blocked,
            max_records: 10,
        },
        QueryJob {
            query: Query::new("b", "B"),
            store_path: dir.path().join("b.jsonl"),
            max_records: 10,
        },
    ];
    let mut collector = Collector::new(fetcher, settings());

    let summary = collector.collect_all(&jobs).await;

    assert!(summary.reports[0].is_failed());
    assert_eq!(summary.reports[1].added, 2);
    // The failed query never reached the fetcher.
    assert_eq!(collector.fetcher().navigations(), ["b"]);
}

#[tokio::test]
async fn zero_max_records_does_not_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q.jsonl");
    let fetcher = MockFetcher::new().on_query("q", vec![posts(0..3)]);
    let mut collector = Collector::new(fetcher, settings());

    let report = collector.collect(&Query::new("q", "Q"), &path, 0).await;

    assert_eq!(report.added, 0);
    assert!(collector.fetcher().navigations().is_empty());
    assert!(path.exists());
}

#[tokio::test]
async fn date_bounds_reach_the_fetcher() {
    let dir = tempfile::tempdir().unwrap();
    let mut query = Query::new("rust", "Rust");
    query.since = NaiveDate::from_ymd_opt(2025, 1, 1);
    query.until = NaiveDate::from_ymd_opt(2025, 2, 1);
    let expression = "rust since:2025-01-01 until:2025-02-01";
    let fetcher = MockFetcher::new().on_query(expression, vec![posts(0..1)]);
    let mut collector = Collector::new(fetcher, settings());

    let report = collector
        .collect(&query, &dir.path().join("Rust.jsonl"), 10)
        .await;

    assert_eq!(report.added, 1);
    assert_eq!(collector.fetcher().navigations(), [expression]);
}

#[tokio::test]
async fn open_and_close_reach_the_fetcher() {
    let mut collector = Collector::new(MockFetcher::new(), settings());
    collector.open().await.unwrap();
    collector.close().await.unwrap();
    let fetcher = collector.into_inner();
    assert_eq!(fetcher.opened(), 1);
    assert_eq!(fetcher.closed(), 1);
}
