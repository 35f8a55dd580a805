//! Integration tests for the task lifecycle bridge.
//!
//! These tests verify approval, review, continuation and the worker loop
//! against the in-memory store and a scripted model.

mod common;

use async_trait::async_trait;
use common::{final_text, project, tool_call, ScriptedProvider};
use drover_agent::{HttpRequest, HttpResponse, HttpTransport, HubClient};
use drover_core::{
    ConfigUpdate, DroverConfig, DroverError, OperatingMode, Result, TaskState, TaskSubmission,
};
use drover_orchestrator::{HubBridge, InMemoryTaskStore};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn submission(title: &str) -> TaskSubmission {
    TaskSubmission {
        title: title.to_string(),
        ..Default::default()
    }
}

fn bridge_in(mode: OperatingMode, provider: Arc<ScriptedProvider>) -> (TempDir, HubBridge) {
    let (dir, mut config) = project();
    config.mode = mode;
    (dir, bridge_with(config, provider))
}

fn bridge_with(config: DroverConfig, provider: Arc<ScriptedProvider>) -> HubBridge {
    HubBridge::new(config, Arc::new(InMemoryTaskStore::new()), provider)
}

#[tokio::test]
async fn test_semi_mode_requires_approval_and_review() {
    let provider = Arc::new(ScriptedProvider::new(vec![Ok(final_text("Done."))]));
    let (_dir, bridge) = bridge_in(OperatingMode::Semi, provider);

    let task = bridge.submit(submission("Fix login")).await.unwrap();
    assert_eq!(task.state, TaskState::PendingApproval);

    // Nothing runs before approval
    assert!(bridge.run_next().await.unwrap().is_none());

    let approved = bridge.approve(&task.id).await.unwrap();
    assert_eq!(approved.state, TaskState::Active);

    let err = bridge.approve(&task.id).await.unwrap_err();
    assert!(matches!(err, DroverError::InvalidTransition { .. }));

    let report = bridge.run_next().await.unwrap().unwrap();
    assert!(!report.paused);

    // Semi mode reviews every run, even a finished one
    let record = bridge.record(&task.id).await.unwrap();
    assert_eq!(record.state, TaskState::PendingReview);
    assert_eq!(record.attempts, 1);

    let review = bridge.review(&task.id).await.unwrap();
    assert_eq!(review.report.summary, "Done.");
    assert!(!review.can_continue);

    let confirmation = bridge.confirm(&task.id).await.unwrap();
    assert_eq!(confirmation.task.state, TaskState::Completed);
    assert!(confirmation.notification.is_none());

    let status = bridge.status().await.unwrap();
    assert!(status.pending_review.is_empty());
    assert_eq!(status.history.len(), 1);
    assert!(!status.running);
}

#[tokio::test]
async fn test_auto_mode_completes_without_review() {
    let provider = Arc::new(ScriptedProvider::new(vec![Ok(final_text("All good."))]));
    let (_dir, bridge) = bridge_in(OperatingMode::Auto, provider);

    let task = bridge.submit(submission("Tidy docs")).await.unwrap();
    assert_eq!(task.state, TaskState::Active);

    bridge.run_next().await.unwrap().unwrap();
    let record = bridge.record(&task.id).await.unwrap();
    assert_eq!(record.state, TaskState::Completed);
    assert_eq!(record.report.unwrap().summary, "All good.");

    let err = bridge.review(&task.id).await.unwrap_err();
    assert!(matches!(err, DroverError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_paused_run_goes_to_review_and_continues() {
    let provider = Arc::new(ScriptedProvider::new(vec![Ok(tool_call(
        "w",
        "write_file",
        json!({"path": "src/cache.rs", "content": "pub struct Cache;\n"}),
    ))]));
    let (_dir, bridge) = bridge_in(OperatingMode::Auto, provider.clone());
    bridge
        .update_config(ConfigUpdate {
            max_iterations: Some(2),
            wind_down_buffer: Some(1),
            ..Default::default()
        })
        .await
        .unwrap();

    let task = bridge.submit(submission("Add a cache")).await.unwrap();
    let report = bridge.run_next().await.unwrap().unwrap();
    assert!(report.paused);
    assert_eq!(report.iterations, 2);

    // Paused runs are reviewed even in auto mode
    let review = bridge.review(&task.id).await.unwrap();
    assert_eq!(review.state, TaskState::PendingReview);
    assert!(review.can_continue);

    let next = bridge.continue_task(&task.id).await.unwrap();
    assert_ne!(next.id, task.id);
    assert_eq!(next.title, "Add a cache (continued)");
    assert_eq!(next.state, TaskState::Active);

    let original = bridge.record(&task.id).await.unwrap();
    assert_eq!(original.state, TaskState::Completed);

    let continued = bridge.record(&next.id).await.unwrap();
    assert_eq!(continued.task.continuation_of.as_deref(), Some(task.id.as_str()));
    let context = continued.task.continuation.unwrap();
    assert_eq!(context.files_in_progress, vec!["src/cache.rs".to_string()]);

    // The continuation's first prompt carries the paused state
    bridge.run_next().await.unwrap().unwrap();
    let requests = provider.requests();
    let opening = requests[2].messages[0].text();
    assert!(opening.contains("CONTINUING PAUSED WORK"));
    assert!(opening.contains("src/cache.rs"));
}

#[tokio::test]
async fn test_continue_requires_paused_report() {
    let provider = Arc::new(ScriptedProvider::new(vec![Ok(final_text("Done."))]));
    let (_dir, bridge) = bridge_in(OperatingMode::Semi, provider);

    let task = bridge.submit(submission("Small fix")).await.unwrap();
    assert!(matches!(
        bridge.continue_task(&task.id).await.unwrap_err(),
        DroverError::InvalidTransition { .. }
    ));

    bridge.approve(&task.id).await.unwrap();
    bridge.run_next().await.unwrap();
    assert!(matches!(
        bridge.continue_task(&task.id).await.unwrap_err(),
        DroverError::InvalidTransition { .. }
    ));
    // The failed attempt left the task where it was
    assert_eq!(
        bridge.record(&task.id).await.unwrap().state,
        TaskState::PendingReview
    );
}

#[tokio::test]
async fn test_rejections() {
    let provider = Arc::new(ScriptedProvider::new(vec![Ok(final_text("Done."))]));
    let (_dir, bridge) = bridge_in(OperatingMode::Semi, provider);

    let first = bridge.submit(submission("Unwanted")).await.unwrap();
    let rejected = bridge
        .reject(&first.id, Some("out of scope".into()))
        .await
        .unwrap();
    assert_eq!(rejected.state, TaskState::Rejected);
    assert!(matches!(
        bridge.reject(&first.id, None).await.unwrap_err(),
        DroverError::InvalidTransition { .. }
    ));
    assert_eq!(
        bridge.record(&first.id).await.unwrap().rejection_reason.as_deref(),
        Some("out of scope")
    );

    let second = bridge.submit(submission("Try it")).await.unwrap();
    bridge.approve(&second.id).await.unwrap();
    bridge.run_next().await.unwrap();
    bridge
        .reject_review(&second.id, Some("wrong approach".into()))
        .await
        .unwrap();
    let record = bridge.record(&second.id).await.unwrap();
    assert_eq!(record.state, TaskState::Rejected);
    assert_eq!(record.attempts, 0);

    assert!(matches!(
        bridge.approve("no-such-task").await.unwrap_err(),
        DroverError::TaskNotFound(_)
    ));
}

#[tokio::test]
async fn test_submission_and_config_validation() {
    let (_dir, bridge) = bridge_in(OperatingMode::Semi, Arc::new(ScriptedProvider::endless()));

    assert!(matches!(
        bridge.submit(submission("   ")).await.unwrap_err(),
        DroverError::InvalidRequest(_)
    ));

    let before = bridge.settings().await;
    let err = bridge
        .update_config(ConfigUpdate {
            max_iterations: Some(12),
            wind_down_buffer: Some(20),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DroverError::InvalidRequest(_)));
    assert_eq!(bridge.settings().await, before);

    bridge.set_mode(OperatingMode::Auto).await;
    let task = bridge.submit(submission("Now automatic")).await.unwrap();
    assert_eq!(task.state, TaskState::Active);
}

#[tokio::test]
async fn test_run_that_cannot_start_is_rejected_not_retried() {
    let provider = Arc::new(ScriptedProvider::new(vec![Ok(final_text("unreachable"))]));
    let (dir, bridge) = bridge_in(OperatingMode::Auto, provider);

    let task = bridge.submit(submission("Orphaned")).await.unwrap();
    std::fs::remove_dir_all(dir.path()).unwrap();

    assert!(bridge.run_next().await.is_err());

    let record = bridge.record(&task.id).await.unwrap();
    assert_eq!(record.state, TaskState::Rejected);
    assert_eq!(record.attempts, 0);
    assert!(record
        .rejection_reason
        .as_deref()
        .is_some_and(|r| r.starts_with("run failed")));

    // Nothing left to pick up
    assert!(bridge.run_next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_history_is_bounded_and_most_recent_first() {
    let provider = Arc::new(ScriptedProvider::new(vec![
        Ok(final_text("one")),
        Ok(final_text("two")),
        Ok(final_text("three")),
    ]));
    let (_dir, mut config) = project();
    config.mode = OperatingMode::Auto;
    config.history_limit = 2;
    let bridge = bridge_with(config, provider);

    for title in ["a", "b", "c"] {
        bridge.submit(submission(title)).await.unwrap();
        bridge.run_next().await.unwrap().unwrap();
    }

    let status = bridge.status().await.unwrap();
    let summaries: Vec<&str> = status.history.iter().map(|r| r.summary.as_str()).collect();
    assert_eq!(summaries, vec!["three", "two"]);
}

#[tokio::test]
async fn test_worker_runs_submitted_tasks_until_stopped() {
    let provider = Arc::new(ScriptedProvider::new(vec![Ok(final_text("Worker did it."))]));
    let (_dir, bridge) = bridge_in(OperatingMode::Auto, provider);
    let bridge = Arc::new(bridge);

    let handle = bridge.spawn_worker();
    let task = bridge.submit(submission("Background job")).await.unwrap();

    let mut state = TaskState::Active;
    for _ in 0..200 {
        state = bridge.record(&task.id).await.unwrap().state;
        if state == TaskState::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state, TaskState::Completed);
    assert!(bridge.status().await.unwrap().worker_active);

    bridge.stop();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(!bridge.status().await.unwrap().worker_active);
}

/// Hub stand-in: offers one task and accepts every post
#[derive(Default)]
struct FakeHub {
    sent: Mutex<Vec<HttpRequest>>,
}

#[async_trait]
impl HttpTransport for FakeHub {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let reply = if request.url.ends_with("/tasks/available") {
            HttpResponse::new(200, r#"{"tasks":[{"id":"hub-1","title":"Hub task"}]}"#)
        } else {
            HttpResponse::new(200, "{}")
        };
        self.sent.lock().unwrap().push(request);
        Ok(reply)
    }
}

#[tokio::test]
async fn test_hub_tasks_are_claimed_and_released_on_rejection() {
    let transport = Arc::new(FakeHub::default());
    let (_dir, mut config) = project();
    config.hub.url = Some("https://hub.example.com".into());
    config.agent_id = "worker-7".into();
    let hub = HubClient::from_config_with(&config, transport.clone()).unwrap();
    let bridge = bridge_with(config, Arc::new(ScriptedProvider::endless())).with_hub(hub);

    assert_eq!(bridge.poll_hub().await.unwrap(), 1);
    // Already known, so not claimed twice
    assert_eq!(bridge.poll_hub().await.unwrap(), 0);

    let record = bridge.record("hub-1").await.unwrap();
    assert!(record.hub_claimed);
    assert_eq!(record.state, TaskState::PendingApproval);

    bridge.reject("hub-1", Some("not for me".into())).await.unwrap();

    let sent = transport.sent.lock().unwrap();
    let urls: Vec<&str> = sent.iter().map(|r| r.url.as_str()).collect();
    assert!(urls.contains(&"https://hub.example.com/tasks/hub-1/claim"));
    let release = sent
        .iter()
        .find(|r| r.url.ends_with("/tasks/hub-1/release"))
        .unwrap();
    let body = release.body.as_ref().unwrap();
    assert_eq!(body["chargeAttempt"], false);
    assert_eq!(body["reason"], "not for me");
    assert_eq!(body["agentId"], "worker-7");
    drop(sent);

    let status = bridge.status().await.unwrap();
    assert!(status.cache.unwrap().misses >= 1);
}
