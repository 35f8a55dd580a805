//! Task lifecycle and hub bridge
//!
//! Lifecycle:
//! ```text
//! PendingApproval --approve--> Active --run--> PendingReview --confirm--> Completed
//!        |                        \--run (auto, not paused)-----------> Completed
//!        \--reject--> Rejected       PendingReview --reject_review--> Rejected
//!                                    PendingReview --continue--> Completed (new task submitted)
//! ```
//!
//! Every state change goes through one lifecycle lock, so a check and the
//! write that follows it cannot interleave with another transition.

use drover_agent::{CacheStats, HubClient, ModelProvider, ProgressSink};
use drover_core::{
    CompletionReport, ConfigUpdate, Delivery, DroverConfig, DroverError, OperatingMode, Result,
    RuntimeSettings, Task, TaskId, TaskRecord, TaskState, TaskSubmission, TaskSummary,
};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::activity::ActivityLogger;
use crate::executor::{tool_executor_for, StopSignal, TaskExecutor};
use crate::phase::Budget;
use crate::store::TaskStore;

/// Idle wait between worker checks when nothing wakes it
const WORKER_IDLE: Duration = Duration::from_secs(5);

/// What a reviewer sees for a finished run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewReport {
    pub task: Task,
    pub state: TaskState,
    pub attempts: u32,
    pub report: CompletionReport,
    /// A paused run can be continued as a new task
    pub can_continue: bool,
}

/// Result of confirming a reviewed task
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub task: TaskSummary,
    /// Hub notification outcome; absent when no hub is configured
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Delivery<()>>,
}

/// Snapshot for the status surface
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    pub agent_id: String,
    pub mode: OperatingMode,
    /// A task is executing right now
    pub running: bool,
    pub worker_active: bool,
    pub active: Vec<TaskSummary>,
    pub pending_approval: Vec<TaskSummary>,
    pub pending_review: Vec<TaskSummary>,
    pub config: RuntimeSettings,
    /// Most recent first
    pub history: Vec<CompletionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
}

fn expect_state(record: &TaskRecord, allowed: &[TaskState], action: &str) -> Result<()> {
    if allowed.contains(&record.state) {
        Ok(())
    } else {
        Err(DroverError::InvalidTransition {
            task_id: record.task.id.clone(),
            state: record.state.to_string(),
            action: action.to_string(),
        })
    }
}

/// Owns the task registry, the runtime settings and the worker loop
pub struct HubBridge {
    config: Arc<DroverConfig>,
    store: Arc<dyn TaskStore>,
    provider: Arc<dyn ModelProvider>,
    hub: Option<Arc<HubClient>>,
    project_context: Option<String>,
    mode: RwLock<OperatingMode>,
    settings: RwLock<RuntimeSettings>,
    history: RwLock<VecDeque<CompletionReport>>,
    lifecycle: Mutex<()>,
    running: Mutex<HashSet<TaskId>>,
    permits: Semaphore,
    stop: StopSignal,
    wake: Notify,
    worker_active: AtomicBool,
}

impl HubBridge {
    pub fn new(
        config: DroverConfig,
        store: Arc<dyn TaskStore>,
        provider: Arc<dyn ModelProvider>,
    ) -> Self {
        let settings = RuntimeSettings::from(&config);
        Self {
            mode: RwLock::new(config.mode),
            settings: RwLock::new(settings),
            history: RwLock::new(VecDeque::with_capacity(config.history_limit)),
            permits: Semaphore::new(config.concurrency.max(1)),
            config: Arc::new(config),
            store,
            provider,
            hub: None,
            project_context: None,
            lifecycle: Mutex::new(()),
            running: Mutex::new(HashSet::new()),
            stop: StopSignal::new(),
            wake: Notify::new(),
            worker_active: AtomicBool::new(false),
        }
    }

    pub fn with_hub(mut self, hub: HubClient) -> Self {
        self.hub = Some(Arc::new(hub));
        self
    }

    /// Project context injected into every task's system prompt
    pub fn with_project_context(mut self, context: Option<String>) -> Self {
        self.project_context = context;
        self
    }

    pub fn config(&self) -> &DroverConfig {
        &self.config
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub async fn mode(&self) -> OperatingMode {
        *self.mode.read().await
    }

    pub async fn settings(&self) -> RuntimeSettings {
        self.settings.read().await.clone()
    }

    /// Accept a new task from the submission surface
    pub async fn submit(&self, submission: TaskSubmission) -> Result<TaskSummary> {
        if submission.title.trim().is_empty() {
            return Err(DroverError::InvalidRequest("title must not be empty".into()));
        }
        self.enqueue(submission.into_task(), false).await
    }

    async fn enqueue(&self, task: Task, hub_claimed: bool) -> Result<TaskSummary> {
        let state = match self.mode().await {
            OperatingMode::Auto => TaskState::Active,
            OperatingMode::Semi => TaskState::PendingApproval,
        };
        let mut record = TaskRecord::new(task, state);
        record.hub_claimed = hub_claimed;
        let summary = record.summary();
        self.store.insert(record).await?;

        info!("Task {} submitted ({}): {}", summary.id, state, summary.title);
        if state == TaskState::Active {
            self.wake.notify_one();
        }
        Ok(summary)
    }

    pub async fn record(&self, id: &str) -> Result<TaskRecord> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| DroverError::TaskNotFound(id.to_string()))
    }

    pub async fn approve(&self, id: &str) -> Result<TaskSummary> {
        let _guard = self.lifecycle.lock().await;
        let mut record = self.record(id).await?;
        expect_state(&record, &[TaskState::PendingApproval], "approve")?;

        record.set_state(TaskState::Active);
        self.store.update(record.clone()).await?;
        info!("Task {} approved", id);
        self.wake.notify_one();
        Ok(record.summary())
    }

    pub async fn reject(&self, id: &str, reason: Option<String>) -> Result<TaskSummary> {
        let record = {
            let _guard = self.lifecycle.lock().await;
            let mut record = self.record(id).await?;
            expect_state(&record, &[TaskState::PendingApproval], "reject")?;

            record.set_state(TaskState::Rejected);
            record.rejection_reason = reason;
            self.store.update(record.clone()).await?;
            record
        };
        info!("Task {} rejected before running", id);
        self.release_to_hub(&record).await;
        Ok(record.summary())
    }

    pub async fn review(&self, id: &str) -> Result<ReviewReport> {
        let record = self.record(id).await?;
        expect_state(&record, &[TaskState::PendingReview], "review")?;
        let report = record.report.clone().ok_or_else(|| DroverError::InvalidTransition {
            task_id: id.to_string(),
            state: record.state.to_string(),
            action: "review".into(),
        })?;

        Ok(ReviewReport {
            can_continue: report.paused && report.continuation_context.is_some(),
            task: record.task,
            state: record.state,
            attempts: record.attempts,
            report,
        })
    }

    /// Accept a reviewed run and notify the hub
    pub async fn confirm(&self, id: &str) -> Result<Confirmation> {
        let record = {
            let _guard = self.lifecycle.lock().await;
            let mut record = self.record(id).await?;
            expect_state(&record, &[TaskState::PendingReview], "confirm")?;

            record.set_state(TaskState::Completed);
            self.store.update(record.clone()).await?;
            record
        };
        info!("Task {} confirmed", id);

        let notification = match &record.report {
            Some(report) => self.notify_completed(report).await,
            None => None,
        };
        Ok(Confirmation {
            task: record.summary(),
            notification,
        })
    }

    /// Turn down a reviewed run
    ///
    /// The failed attempt is not charged: the local counter is rolled back
    /// and a hub-claimed task is released with `chargeAttempt: false`.
    pub async fn reject_review(&self, id: &str, reason: Option<String>) -> Result<TaskSummary> {
        let record = {
            let _guard = self.lifecycle.lock().await;
            let mut record = self.record(id).await?;
            expect_state(&record, &[TaskState::PendingReview], "reject review of")?;

            record.set_state(TaskState::Rejected);
            record.rejection_reason = reason;
            record.attempts = record.attempts.saturating_sub(1);
            self.store.update(record.clone()).await?;
            record
        };
        info!("Review of task {} rejected", id);
        self.release_to_hub(&record).await;
        Ok(record.summary())
    }

    /// Submit a new task that picks up a paused run
    ///
    /// The original is completed as superseded.
    pub async fn continue_task(&self, id: &str) -> Result<TaskSummary> {
        let task = {
            let _guard = self.lifecycle.lock().await;
            let mut record = self.record(id).await?;
            expect_state(&record, &[TaskState::PendingReview], "continue")?;

            let context = record
                .report
                .as_ref()
                .filter(|r| r.paused)
                .and_then(|r| r.continuation_context.clone())
                .ok_or_else(|| DroverError::InvalidTransition {
                    task_id: id.to_string(),
                    state: "finished without a pause".into(),
                    action: "continue".into(),
                })?;

            let original = &record.task;
            let task = Task::new(format!("{} (continued)", original.title))
                .with_description(original.description.clone())
                .with_priority(original.priority)
                .with_acceptance_criteria(original.acceptance_criteria.clone())
                .continuing(id, context);

            record.set_state(TaskState::Completed);
            self.store.update(record).await?;
            task
        };

        info!("Task {} continued as {}", id, task.id);
        self.enqueue(task, false).await
    }

    pub async fn set_mode(&self, mode: OperatingMode) {
        let mut current = self.mode.write().await;
        if *current != mode {
            info!("Operating mode changed: {} -> {}", *current, mode);
        }
        *current = mode;
    }

    /// Apply a runtime config update; rejected updates change nothing
    pub async fn update_config(&self, update: ConfigUpdate) -> Result<RuntimeSettings> {
        let mut settings = self.settings.write().await;
        let next = settings.apply(update)?;
        info!(
            "Runtime settings updated: {} rounds, wind-down {}",
            next.max_iterations, next.wind_down_buffer
        );
        *settings = next.clone();
        Ok(next)
    }

    pub async fn status(&self) -> Result<BridgeStatus> {
        let records = self.store.list().await?;
        let in_state = |state: TaskState| -> Vec<TaskSummary> {
            records
                .iter()
                .filter(|r| r.state == state)
                .map(TaskRecord::summary)
                .collect()
        };

        Ok(BridgeStatus {
            agent_id: self.config.agent_id.clone(),
            mode: self.mode().await,
            running: !self.running.lock().await.is_empty(),
            worker_active: self.worker_active.load(Ordering::SeqCst),
            active: in_state(TaskState::Active),
            pending_approval: in_state(TaskState::PendingApproval),
            pending_review: in_state(TaskState::PendingReview),
            config: self.settings().await,
            history: self.history.read().await.iter().rev().cloned().collect(),
            cache: self.hub.as_ref().map(|hub| hub.stats()),
        })
    }

    /// Run the next active task, if any, to completion or pause
    pub async fn run_next(&self) -> Result<Option<CompletionReport>> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| DroverError::Other(e.to_string()))?;

        let Some(record) = self.claim_next_active().await? else {
            return Ok(None);
        };
        let id = record.task.id.clone();

        let result = self.execute(&record).await;
        self.running.lock().await.remove(&id);
        if let Err(e) = &result {
            self.fail_run(&id, e).await;
        }
        result.map(Some)
    }

    // A run that errors out never reaches `finish_run`; without this the task
    // would stay Active and be picked up again on every wake.
    async fn fail_run(&self, id: &str, error: &DroverError) {
        let record = {
            let _guard = self.lifecycle.lock().await;
            let mut record = match self.record(id).await {
                Ok(record) if record.state == TaskState::Active => record,
                Ok(_) => return,
                Err(e) => {
                    warn!("Could not record failure of task {}: {}", id, e);
                    return;
                }
            };
            record.set_state(TaskState::Rejected);
            record.rejection_reason = Some(format!("run failed: {}", error));
            record.attempts = record.attempts.saturating_sub(1);
            if let Err(e) = self.store.update(record.clone()).await {
                warn!("Could not record failure of task {}: {}", id, e);
                return;
            }
            record
        };
        warn!("Task {} failed to run: {}", id, error);
        self.release_to_hub(&record).await;
    }

    async fn claim_next_active(&self) -> Result<Option<TaskRecord>> {
        let _guard = self.lifecycle.lock().await;
        let mut running = self.running.lock().await;

        let mut candidates: Vec<TaskRecord> = self
            .store
            .list_in_state(TaskState::Active)
            .await?
            .into_iter()
            .filter(|r| !running.contains(&r.task.id))
            .collect();
        candidates.sort_by(|a, b| {
            a.task
                .priority
                .cmp(&b.task.priority)
                .then_with(|| a.submitted_at.cmp(&b.submitted_at))
        });

        let Some(mut record) = candidates.into_iter().next() else {
            return Ok(None);
        };
        record.attempts += 1;
        self.store.update(record.clone()).await?;
        running.insert(record.task.id.clone());
        Ok(Some(record))
    }

    async fn execute(&self, record: &TaskRecord) -> Result<CompletionReport> {
        let settings = self.settings().await;
        let tools = tool_executor_for(&self.config, &settings)?;
        let budget = Budget::from_settings(&self.config, &settings);

        let mut executor = TaskExecutor::new(self.provider.clone(), tools, budget)
            .with_max_tokens(self.config.max_tokens)
            .with_project_context(self.project_context.clone())
            .with_stop_signal(self.stop.clone());
        if let Some(hub) = &self.hub {
            executor = executor.with_sink(hub.clone());
        }
        if self.config.activity_log {
            executor = executor
                .with_activity_logger(ActivityLogger::new(self.config.project_root.join(".drover")));
        }

        info!(
            "Running task {} (attempt {}): {}",
            record.task.id, record.attempts, record.task.title
        );
        let report = executor.run(&record.task).await;
        self.finish_run(&record.task.id, &report).await?;
        Ok(report)
    }

    async fn finish_run(&self, id: &str, report: &CompletionReport) -> Result<()> {
        let mode = self.mode().await;
        let state = {
            let _guard = self.lifecycle.lock().await;
            let mut record = self.record(id).await?;
            let state = if report.paused || mode == OperatingMode::Semi {
                TaskState::PendingReview
            } else {
                TaskState::Completed
            };
            record.report = Some(report.clone());
            record.set_state(state);
            self.store.update(record).await?;
            state
        };

        {
            let mut history = self.history.write().await;
            history.push_back(report.clone());
            while history.len() > self.config.history_limit {
                history.pop_front();
            }
        }

        info!("Task {} is now {}", id, state);
        if state == TaskState::Completed {
            self.notify_completed(report).await;
        }
        Ok(())
    }

    async fn notify_completed(&self, report: &CompletionReport) -> Option<Delivery<()>> {
        let hub = self.hub.as_ref()?;
        let delivery = hub.completed(report).await;
        if let Some(error) = delivery.error() {
            warn!("Report for task {} kept locally: {}", report.task_id, error);
        }
        Some(delivery)
    }

    async fn release_to_hub(&self, record: &TaskRecord) {
        if !record.hub_claimed {
            return;
        }
        if let Some(hub) = &self.hub {
            let delivery = hub
                .release(&record.task.id, record.rejection_reason.as_deref(), false)
                .await;
            if let Some(error) = delivery.error() {
                warn!("Could not release task {} to the hub: {}", record.task.id, error);
            }
        }
    }

    /// Claim offered hub tasks; returns how many were taken
    pub async fn poll_hub(&self) -> Result<usize> {
        let Some(hub) = &self.hub else {
            return Ok(0);
        };
        let offered = match hub.available_tasks().await {
            Delivery::Delivered(tasks) => tasks,
            Delivery::Local { error, .. } => {
                debug!("Hub poll skipped: {}", error);
                return Ok(0);
            }
        };

        let mut claimed = 0;
        for task in offered {
            if self.store.contains(&task.id).await? {
                continue;
            }
            let id = task.id.clone();
            match hub.claim(&id).await {
                Delivery::Delivered(_) => {
                    self.enqueue(task, true).await?;
                    claimed += 1;
                }
                Delivery::Local { error, .. } => debug!("Claim of {} failed: {}", id, error),
            }
        }
        if claimed > 0 {
            info!("Claimed {} task(s) from the hub", claimed);
        }
        Ok(claimed)
    }

    /// Process active tasks until stopped
    pub async fn run_worker(self: Arc<Self>) {
        self.worker_active.store(true, Ordering::SeqCst);
        info!("Worker started for agent {}", self.config.agent_id);

        let poll_every = Duration::from_secs(self.config.hub.poll_interval_secs);
        let polling = self.hub.is_some() && !poll_every.is_zero();
        let idle = if polling {
            poll_every.min(WORKER_IDLE)
        } else {
            WORKER_IDLE
        };
        let mut last_poll: Option<Instant> = None;

        while !self.stop.is_stopped() {
            if polling && last_poll.map_or(true, |at| at.elapsed() >= poll_every) {
                last_poll = Some(Instant::now());
                if let Err(e) = self.poll_hub().await {
                    warn!("Hub poll failed: {}", e);
                }
            }

            match self.run_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!("Worker could not run task: {}", e),
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(idle) => {}
            }
        }

        self.worker_active.store(false, Ordering::SeqCst);
        info!("Worker stopped");
    }

    /// Start the worker loop on the runtime, clearing any earlier stop
    pub fn spawn_worker(self: &Arc<Self>) -> JoinHandle<()> {
        self.stop.reset();
        tokio::spawn(Arc::clone(self).run_worker())
    }

    /// Stop the worker after the current round
    pub fn stop(&self) {
        info!("Stop requested");
        self.stop.stop();
        self.wake.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::StopReason;
    use std::collections::BTreeMap;

    fn record(state: TaskState) -> TaskRecord {
        TaskRecord::new(Task::new("Fix login"), state)
    }

    #[test]
    fn test_expect_state() {
        let active = record(TaskState::Active);
        assert!(expect_state(&active, &[TaskState::Active], "run").is_ok());

        let err = expect_state(&active, &[TaskState::PendingApproval], "approve").unwrap_err();
        match err {
            DroverError::InvalidTransition { state, action, .. } => {
                assert_eq!(state, "active");
                assert_eq!(action, "approve");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = BridgeStatus {
            agent_id: "drover".into(),
            mode: OperatingMode::Semi,
            running: false,
            worker_active: true,
            active: vec![],
            pending_approval: vec![record(TaskState::PendingApproval).summary()],
            pending_review: vec![],
            config: RuntimeSettings::from(&DroverConfig::default()),
            history: vec![CompletionReport {
                task_id: "t1".into(),
                iterations: 2,
                files_changed: BTreeMap::new(),
                test_results: vec![],
                change_log: vec![],
                summary: "done".into(),
                paused: false,
                continuation_context: None,
                stop_reason: StopReason::Finished,
                finished_at: chrono::Utc::now(),
            }],
            cache: None,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["mode"], "semi");
        assert_eq!(json["workerActive"], true);
        assert_eq!(json["pendingApproval"][0]["state"], "pending_approval");
        assert_eq!(json["config"]["maxIterations"], 30);
        assert!(json.get("cache").is_none());
    }
}
