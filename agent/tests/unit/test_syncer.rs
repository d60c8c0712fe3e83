//! Task syncer tests against an in-process base

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use deployd::app::state::{DaemonMode, DaemonState};
use deployd::authn::token_provider::AgentTokenProvider;
use deployd::filesys::file::File;
use deployd::http::client::HttpClient;
use deployd::models::task::{TaskResult, TaskResultStatus};
use deployd::storage::instance::{FileInstanceStore, Instance};
use deployd::storage::task_results::{FileTaskResultStore, TaskResultStore};
use deployd::sync::executor::TaskExecutor;
use deployd::sync::syncer::{Options, SyncOutcome, TaskSyncer};
use deployd::utils::CooldownOptions;

use crate::fakes::{spawn_base, FakeBase};

struct Fixture {
    _dir: tempfile::TempDir,
    base: Arc<FakeBase>,
    daemon: Arc<DaemonState>,
    instances: Arc<FileInstanceStore>,
    results: Arc<FileTaskResultStore>,
    syncer: TaskSyncer,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let base = Arc::new(FakeBase::default());
    let url = spawn_base(base.clone()).await;

    let daemon = Arc::new(DaemonState::new());
    let instances = Arc::new(FileInstanceStore::new(File::new(dir.path().join("instance.json"))));
    instances
        .save(&Instance {
            id: "inst-1".to_string(),
            bootstrap_token: "bootstrap".to_string(),
            issuer: None,
            audience: None,
            base_url: None,
            registered_at: Utc::now(),
        })
        .await
        .unwrap();
    let results = Arc::new(
        FileTaskResultStore::open(File::new(dir.path().join("task_results.json")))
            .await
            .unwrap(),
    );

    let http_client = Arc::new(HttpClient::new(&url).unwrap());
    let token_provider = Arc::new(AgentTokenProvider::new(
        http_client.clone(),
        CooldownOptions::default(),
    ));
    let router = Router::new().route("/echo", get(|| async { Json(json!({ "pong": true })) }));
    let executor = Arc::new(TaskExecutor::new(router, daemon.clone()));

    let syncer = TaskSyncer::new(
        Options {
            version: "1.2.3".to_string(),
            ..Default::default()
        },
        daemon.clone(),
        instances.clone(),
        results.clone(),
        http_client,
        token_provider,
        executor,
    );

    Fixture {
        _dir: dir,
        base,
        daemon,
        instances,
        results,
        syncer,
    }
}

fn completed_tasks(report: &Value) -> Value {
    report["completed_tasks"].clone()
}

#[tokio::test]
async fn test_failed_report_keeps_results_unsent() {
    let fx = fixture().await;
    let cancel = CancellationToken::new();
    fx.results
        .save_results(&[TaskResult::done("r-1", json!({ "ok": 1 }))])
        .await
        .unwrap();

    fx.base.fail_status.store(true, Ordering::SeqCst);
    assert!(fx.syncer.sync_once(&cancel).await.is_err());
    assert_eq!(fx.results.list_unsent().await.unwrap().len(), 1);
    assert_eq!(fx.daemon.sync_state().err_streak, 1);

    fx.base.fail_status.store(false, Ordering::SeqCst);
    let outcome = fx.syncer.sync_once(&cancel).await.unwrap();
    assert_eq!(
        outcome,
        SyncOutcome::Synced {
            acknowledged: 1,
            executed: 0
        }
    );
    assert!(fx.results.list_unsent().await.unwrap().is_empty());
    assert_eq!(fx.daemon.sync_state().err_streak, 0);
    assert!(fx.daemon.sync_state().last_synced_at.is_some());

    // The retried report carried the same result, byte for byte
    let reports = fx.base.reports();
    assert_eq!(reports.len(), 2);
    assert_eq!(completed_tasks(&reports[0]), completed_tasks(&reports[1]));
    assert_eq!(
        completed_tasks(&reports[1]),
        json!([{ "id": "r-1", "status": "done", "result": { "ok": 1 } }])
    );
}

#[tokio::test]
async fn test_task_results_are_acknowledged_next_cycle() {
    let fx = fixture().await;
    let cancel = CancellationToken::new();
    fx.base.queue_task(json!({ "id": "t-1", "type": "echo:get", "payload": null, "status": "pending" }));
    fx.base.queue_task(json!({ "id": "t-2", "type": "broken", "payload": {}, "status": "pending" }));

    let first = fx.syncer.sync_once(&cancel).await.unwrap();
    assert_eq!(
        first,
        SyncOutcome::Synced {
            acknowledged: 0,
            executed: 2
        }
    );
    let unsent = fx.results.list_unsent().await.unwrap();
    assert_eq!(unsent.len(), 2);
    assert_eq!(unsent[0].status, TaskResultStatus::Done);
    assert_eq!(unsent[0].result, json!({ "pong": true }));
    assert_eq!(unsent[1].status, TaskResultStatus::Failed);

    let second = fx.syncer.sync_once(&cancel).await.unwrap();
    assert_eq!(
        second,
        SyncOutcome::Synced {
            acknowledged: 2,
            executed: 0
        }
    );
    assert!(fx.results.list_unsent().await.unwrap().is_empty());

    let reports = fx.base.reports();
    assert_eq!(completed_tasks(&reports[0]), json!([]));
    let ids: Vec<&str> = reports[1]["completed_tasks"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["t-1", "t-2"]);
    assert_eq!(reports[1]["version"], "1.2.3");
    assert!(reports[1]["system"]["hostname"].is_string());
    assert_eq!(
        fx.base.auth_headers.lock().unwrap()[0],
        "Bearer agent-token"
    );
}

#[tokio::test]
async fn test_skips_when_updating_or_unregistered() {
    let fx = fixture().await;
    let cancel = CancellationToken::new();

    fx.daemon.set_mode(DaemonMode::Updating);
    assert_eq!(
        fx.syncer.sync_once(&cancel).await.unwrap(),
        SyncOutcome::Skipped("updating")
    );
    fx.daemon.set_mode(DaemonMode::Running);

    fx.instances
        .save(&Instance {
            id: "inst-1".to_string(),
            bootstrap_token: String::new(),
            issuer: None,
            audience: None,
            base_url: None,
            registered_at: Utc::now(),
        })
        .await
        .unwrap();
    assert_eq!(
        fx.syncer.sync_once(&cancel).await.unwrap(),
        SyncOutcome::Skipped("not registered")
    );
    assert!(fx.base.reports().is_empty());
}
