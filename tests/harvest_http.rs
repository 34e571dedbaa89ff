use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use httptest::matchers::{all_of, contains, key, not, request, url_decoded};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use rand::{rngs::StdRng, SeedableRng};
use secrecy::SecretString;
use serde_json::json;
use tempfile::tempdir;

use geo_harvest_lib::{
    AppError, Fetcher, HttpSearchClient, HttpUsageClient, Interval, JoinedRecord, OutputLog,
    RequestPacer, RetryPolicy, SamplingMode, Scheduler, TargetPolicy, UsageSource,
};

fn base_url(server: &Server) -> String {
    format!("http://{}", server.addr())
}

fn token() -> SecretString {
    SecretString::from("test-token".to_string())
}

fn interval() -> Interval {
    let start = Utc.with_ymd_and_hms(2021, 11, 7, 12, 0, 0).unwrap();
    Interval::new(start, start + Duration::seconds(300)).unwrap()
}

fn page_body(post_ids: &[&str], next_token: Option<&str>) -> serde_json::Value {
    let data: Vec<_> = post_ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "text": format!("post {id}"),
                "author_id": "u1",
                "created_at": "2021-11-07T12:01:00.000Z",
                "geo": { "place_id": "p1" },
                "public_metrics": { "like_count": 1 }
            })
        })
        .collect();
    json!({
        "data": data,
        "includes": {
            "users": [{ "id": "u1", "username": "alice", "location": "Austin" }],
            "places": [{ "id": "p1", "full_name": "Austin, TX", "name": "Austin" }]
        },
        "meta": { "result_count": post_ids.len(), "next_token": next_token }
    })
}

fn fetcher(server: &Server) -> Fetcher {
    let search = HttpSearchClient::new(base_url(server), token()).unwrap();
    Fetcher::new(
        Arc::new(search),
        Arc::new(RequestPacer::new(StdDuration::ZERO)),
    )
}

#[tokio::test]
async fn usage_reads_are_idempotent() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/2/usage/tweets"),
            request::headers(contains(("authorization", "Bearer test-token"))),
        ])
        .times(2)
        .respond_with(json_encoded(json!({
            "data": { "project_usage": "1250", "project_cap": "10000000", "cap_reset_day": 12 }
        }))),
    );

    let client = HttpUsageClient::new(base_url(&server), token()).unwrap();
    let first = client.get_usage().await.unwrap();
    let second = client.get_usage().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.consumed, 1250);
    assert_eq!(first.remaining(), 10_000_000 - 1250);
}

#[tokio::test]
async fn usage_failure_is_surfaced() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/2/usage/tweets"))
            .respond_with(status_code(401).body("unauthorized")),
    );

    let client = HttpUsageClient::new(base_url(&server), token()).unwrap();
    let err = client.get_usage().await.unwrap_err();
    assert!(matches!(err, AppError::BudgetQuery(_)));
}

#[tokio::test]
async fn paginates_and_writes_joined_records() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/2/tweets/search/all"),
            request::query(url_decoded(contains(("start_time", "2021-11-07T12:00:00.000Z")))),
            request::query(url_decoded(contains(("end_time", "2021-11-07T12:05:00.000Z")))),
            request::query(url_decoded(contains(("max_results", "500")))),
            request::query(url_decoded(not(contains(key("next_token"))))),
        ])
        .respond_with(json_encoded(page_body(&["1", "2"], Some("page-2")))),
    );
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/2/tweets/search/all"),
            request::query(url_decoded(contains(("next_token", "page-2")))),
        ])
        .respond_with(json_encoded(page_body(&["3"], None))),
    );

    let batch = fetcher(&server).fetch(interval()).await.unwrap();
    assert_eq!(batch.pages, 2);
    assert_eq!(batch.records.len(), 3);
    assert!(batch.issues.is_empty());

    let dir = tempdir().unwrap();
    let path = dir.path().join("tweets.json");
    OutputLog::open_append(&path)
        .unwrap()
        .append(&batch.records)
        .unwrap();
    let contents = std::fs::read_to_string(&path).unwrap();
    let parsed: Vec<JoinedRecord> = contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(parsed, batch.records);
    assert_eq!(parsed[2].post.id, "3");
    assert_eq!(parsed[0].place.full_name.as_deref(), Some("Austin, TX"));
}

#[tokio::test]
async fn server_errors_are_retried_then_returned() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/2/tweets/search/all"))
            .times(2)
            .respond_with(status_code(503).body("over capacity")),
    );

    let fetcher = fetcher(&server);
    let fetcher = &fetcher;
    let policy = RetryPolicy::new(StdDuration::from_millis(1), 2);
    let err = policy
        .run(move || fetcher.fetch(interval()))
        .await
        .unwrap_err();
    match err {
        AppError::Api { status, message } => {
            assert_eq!(status, 503);
            assert_eq!(message, "over capacity");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn scheduler_runs_against_live_endpoints() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/2/usage/tweets"))
            .times(2)
            .respond_with(json_encoded(json!({
                "data": { "project_usage": 10, "project_cap": 1000 }
            }))),
    );
    server.expect(
        Expectation::matching(request::method_path("GET", "/2/tweets/search/all"))
            .times(2)
            .respond_with(json_encoded(page_body(&["1", "2"], None))),
    );

    let dir = tempdir().unwrap();
    let path = dir.path().join("tweets.json");
    let usage = HttpUsageClient::new(base_url(&server), token()).unwrap();
    let mode = SamplingMode::Uniform {
        transitions: vec![NaiveDate::from_ymd_opt(2020, 11, 1).unwrap()],
        duration: Duration::seconds(300),
    };
    let mut scheduler = Scheduler::new(
        mode,
        fetcher(&server),
        RetryPolicy::new(StdDuration::from_millis(1), 3),
        Arc::new(usage),
        OutputLog::open_append(&path).unwrap(),
    )
    .with_target(TargetPolicy::Fixed(4), 0)
    .with_rng(StdRng::seed_from_u64(9));

    let report = scheduler.run().await.unwrap();
    drop(scheduler);
    assert_eq!(report.fetched, 4);
    assert_eq!(report.intervals, 2);
    assert_eq!(report.usage_start.remaining(), 990);

    let contents = std::fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), 4);
}
