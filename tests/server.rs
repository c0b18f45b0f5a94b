//! HTTP trigger server behaviour with a stubbed sync runner.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Notify;

use knowledge_sync::scheduler::run_scheduled;
use knowledge_sync::server::{router, AppState, SyncRunner};
use knowledge_sync::sync_cmd::{RunSummary, SourceOutcome, SyncTarget};
use knowledge_sync_core::{SourceType, SyncReport};

fn summary_for(target: SyncTarget) -> RunSummary {
    let now = Utc::now();
    RunSummary {
        started_at: now,
        finished_at: now,
        success: true,
        sources: target
            .source_types()
            .into_iter()
            .map(|st| {
                let mut report = SyncReport::new(st, now);
                report.created = 2;
                SourceOutcome {
                    source: format!("stub:{}", st),
                    source_type: st,
                    report: Some(report),
                    error: None,
                }
            })
            .collect(),
    }
}

#[derive(Default)]
struct StubRunner {
    gate: Option<Arc<Notify>>,
    fail: bool,
    runs: AtomicUsize,
}

#[async_trait]
impl SyncRunner for StubRunner {
    async fn run(&self, target: SyncTarget) -> anyhow::Result<RunSummary> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.runs.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("DIFY_API_KEY environment variable not set");
        }
        Ok(summary_for(target))
    }
}

async fn start(runner: Arc<StubRunner>) -> String {
    start_with_state(runner).await.0
}

async fn start_with_state(runner: Arc<StubRunner>) -> (String, AppState) {
    let state = AppState::new(runner);
    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), state)
}

async fn wait_until_running(base: &str) {
    for _ in 0..200 {
        if get_json(&format!("{}/status", base)).await["running"] == true {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run never started");
}

async fn get_json(url: &str) -> Value {
    reqwest::get(url).await.unwrap().json().await.unwrap()
}

#[tokio::test]
async fn health_and_index() {
    let base = start(Arc::new(StubRunner::default())).await;

    let health = get_json(&format!("{}/health", base)).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["service"], "knowledge-sync");

    let index = get_json(&format!("{}/", base)).await;
    assert!(index["endpoints"]["POST /sync"].is_string());
}

#[tokio::test]
async fn status_before_first_run() {
    let base = start(Arc::new(StubRunner::default())).await;
    let status = get_json(&format!("{}/status", base)).await;
    assert_eq!(status["status"], "never_run");
    assert_eq!(status["running"], false);
}

#[tokio::test]
async fn synchronous_sync_returns_summary_and_records_it() {
    let base = start(Arc::new(StubRunner::default())).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/sync", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["sources"].as_array().unwrap().len(), 2);
    assert_eq!(body["sources"][0]["report"]["created"], 2);

    let response = client
        .post(format!("{}/sync", base))
        .json(&json!({ "source": "page" }))
        .send()
        .await
        .unwrap();
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["sources"].as_array().unwrap().len(), 1);
    assert_eq!(body["sources"][0]["source_type"], "page");

    let status = get_json(&format!("{}/status", base)).await;
    assert_eq!(status["last_run"]["status"], "success");
    assert_eq!(status["last_run"]["target"], "page");
}

#[tokio::test]
async fn unknown_source_is_a_bad_request() {
    let runner = Arc::new(StubRunner::default());
    let base = start(runner.clone()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/sync", base))
        .json(&json!({ "source": "wiki" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert_eq!(runner.runs.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn second_trigger_while_running_is_rejected() {
    let gate = Arc::new(Notify::new());
    let runner = Arc::new(StubRunner {
        gate: Some(gate.clone()),
        ..StubRunner::default()
    });
    let base = start(runner.clone()).await;
    let client = reqwest::Client::new();

    let started = client
        .post(format!("{}/sync", base))
        .json(&json!({ "async": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(started.status(), 202);
    let body: Value = started.json().await.unwrap();
    assert_eq!(body["status"], "started");

    let busy = client
        .post(format!("{}/sync", base))
        .json(&json!({ "source": "issue" }))
        .send()
        .await
        .unwrap();
    assert_eq!(busy.status(), 409);
    let body: Value = busy.json().await.unwrap();
    assert_eq!(body["error"]["code"], "busy");
    assert_eq!(get_json(&format!("{}/status", base)).await["running"], true);

    gate.notify_one();

    let mut last_run = Value::Null;
    for _ in 0..200 {
        let status = get_json(&format!("{}/status", base)).await;
        if !status["last_run"].is_null() {
            last_run = status["last_run"].clone();
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(last_run["status"], "success");
    assert_eq!(last_run["target"], "all");
    assert_eq!(last_run["trigger"], "http");
    assert_eq!(runner.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn scheduled_run_and_http_trigger_never_overlap() {
    let gate = Arc::new(Notify::new());
    let runner = Arc::new(StubRunner {
        gate: Some(gate.clone()),
        ..StubRunner::default()
    });
    let (base, state) = start_with_state(runner.clone()).await;
    let client = reqwest::Client::new();

    // A scheduled run holds the lock: the HTTP trigger is turned away.
    let scheduled = tokio::spawn({
        let state = state.clone();
        async move { run_scheduled(&state).await }
    });
    wait_until_running(&base).await;
    let busy = client
        .post(format!("{}/sync", base))
        .send()
        .await
        .unwrap();
    assert_eq!(busy.status(), 409);

    gate.notify_one();
    let record = scheduled.await.unwrap().expect("scheduled run should have run");
    assert_eq!(record.status, "success");
    assert_eq!(record.trigger, "schedule");

    let status = get_json(&format!("{}/status", base)).await;
    assert_eq!(status["running"], false);
    assert_eq!(status["last_run"]["trigger"], "schedule");
    assert_eq!(status["last_run"]["target"], "all");

    // An HTTP run holds the lock: the scheduled tick is skipped.
    let started = client
        .post(format!("{}/sync", base))
        .json(&json!({ "async": true, "source": "issue" }))
        .send()
        .await
        .unwrap();
    assert_eq!(started.status(), 202);
    wait_until_running(&base).await;
    assert!(run_scheduled(&state).await.is_none());

    gate.notify_one();
    let mut last_run = Value::Null;
    for _ in 0..200 {
        let status = get_json(&format!("{}/status", base)).await;
        if status["last_run"]["trigger"] == "http" {
            last_run = status["last_run"].clone();
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(last_run["target"], "issue");
    assert_eq!(runner.runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn runner_error_is_reported() {
    let base = start(Arc::new(StubRunner {
        fail: true,
        ..StubRunner::default()
    }))
    .await;

    let response = reqwest::Client::new()
        .post(format!("{}/sync", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "sync_failed");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("DIFY_API_KEY"));

    let status = get_json(&format!("{}/status", base)).await;
    assert_eq!(status["last_run"]["status"], "failed");
}
