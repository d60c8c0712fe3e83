//! Deployment worker tests

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use deployd::deploy::worker::{Options, Worker};
use deployd::filesys::file::File;
use deployd::models::deployment::{Deployment, DeploymentStatus};
use deployd::storage::deployments::{DeploymentStore, FileDeploymentStore};
use deployd::storage::services::{FileServiceStore, ServiceStore};

use crate::fakes::{blueprint, wait_terminal, FakePipeline};

struct Fixture {
    _dir: tempfile::TempDir,
    deployments: Arc<FileDeploymentStore>,
    services: Arc<FileServiceStore>,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let deployments = Arc::new(
        FileDeploymentStore::open(File::new(dir.path().join("deployments.json")))
            .await
            .unwrap(),
    );
    let services = Arc::new(
        FileServiceStore::open(File::new(dir.path().join("services.json")))
            .await
            .unwrap(),
    );
    Fixture {
        _dir: dir,
        deployments,
        services,
    }
}

async fn pending(store: &FileDeploymentStore, id: &str) {
    let deployment = Deployment::new(id.to_string(), "u-1".to_string(), blueprint(&format!("app {}", id)));
    store.create_deployment(&deployment).await.unwrap();
}

fn worker(fx: &Fixture, max_concurrent: usize, pipeline: Arc<FakePipeline>) -> Arc<Worker> {
    Arc::new(Worker::new(
        &Options {
            max_concurrent,
            ..Default::default()
        },
        fx.deployments.clone(),
        fx.services.clone(),
        pipeline,
    ))
}

#[tokio::test]
async fn test_concurrency_never_exceeds_cap() {
    let fx = fixture().await;
    let pipeline = Arc::new(FakePipeline {
        delay: Duration::from_millis(50),
        ..Default::default()
    });
    let worker = worker(&fx, 2, pipeline.clone());
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(worker.clone().start(cancel.clone()));

    let ids: Vec<String> = (0..6).map(|i| format!("d-{}", i)).collect();
    for id in &ids {
        pending(&fx.deployments, id).await;
        worker.submit(id).await.unwrap();
    }

    for id in &ids {
        assert_eq!(
            wait_terminal(fx.deployments.as_ref(), id).await,
            DeploymentStatus::Completed
        );
    }
    assert_eq!(pipeline.runs.load(Ordering::SeqCst), 6);
    assert!(pipeline.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(fx.services.list_services().await.unwrap().len(), 6);

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_duplicate_submission_runs_once() {
    let fx = fixture().await;
    let gate = CancellationToken::new();
    let pipeline = Arc::new(FakePipeline {
        gate: Some(gate.clone()),
        ..Default::default()
    });
    let worker = worker(&fx, 2, pipeline.clone());
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(worker.clone().start(cancel.clone()));

    pending(&fx.deployments, "d-1").await;
    worker.submit("d-1").await.unwrap();
    worker.submit("d-1").await.unwrap();

    // Let the dispatch loop drain both submissions
    tokio::time::timeout(Duration::from_secs(5), async {
        while worker.queued_count() > 0 || pipeline.runs.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert!(worker.is_running("d-1"));
    assert_eq!(worker.active_count(), 1);

    gate.cancel();
    assert_eq!(
        wait_terminal(fx.deployments.as_ref(), "d-1").await,
        DeploymentStatus::Completed
    );
    tokio::time::timeout(Duration::from_secs(5), async {
        while worker.is_running("d-1") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(pipeline.runs.load(Ordering::SeqCst), 1);
    assert_eq!(worker.available_slots(), 2);

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_pipeline_error_marks_failed() {
    let fx = fixture().await;
    let pipeline = Arc::new(FakePipeline {
        fail: true,
        ..Default::default()
    });
    let worker = worker(&fx, 1, pipeline);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(worker.clone().start(cancel.clone()));

    pending(&fx.deployments, "d-bad").await;
    worker.submit("d-bad").await.unwrap();

    assert_eq!(
        wait_terminal(fx.deployments.as_ref(), "d-bad").await,
        DeploymentStatus::Failed
    );
    assert!(fx.services.list_services().await.unwrap().is_empty());

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_terminal_deployment_is_not_rerun() {
    let fx = fixture().await;
    let pipeline = Arc::new(FakePipeline::default());
    let worker = worker(&fx, 1, pipeline.clone());
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(worker.clone().start(cancel.clone()));

    pending(&fx.deployments, "d-done").await;
    worker.submit("d-done").await.unwrap();
    wait_terminal(fx.deployments.as_ref(), "d-done").await;

    worker.submit("d-done").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pipeline.runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        fx.deployments.get_deployment("d-done").await.unwrap().status,
        DeploymentStatus::Completed
    );

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_start_returns_on_cancel_and_submit_then_fails() {
    let fx = fixture().await;
    let worker = worker(&fx, 1, Arc::new(FakePipeline::default()));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(worker.clone().start(cancel.clone()));

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // The receiver is gone with the dispatch loop
    assert!(worker.submit("late").await.is_err());
    // A second start is rejected
    assert!(worker.clone().start(CancellationToken::new()).await.is_err());
}
