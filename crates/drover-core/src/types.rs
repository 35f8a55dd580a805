//! Core type definitions for Drover task execution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Task identifier (UUID v4 string)
pub type TaskId = String;

/// Maximum characters kept for edit snippets in [`FileChange::Edited`]
pub const SNIPPET_CHARS: usize = 200;

/// Number of change-log entries carried into a [`ContinuationContext`]
pub const CONTINUATION_LOG_TAIL: usize = 10;

/// Task priority levels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical = 0,
    High = 1,
    #[default]
    Medium = 2,
    Low = 3,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "critical"),
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "critical" | "0" => Ok(Self::Critical),
            "high" | "1" => Ok(Self::High),
            "medium" | "2" => Ok(Self::Medium),
            "low" | "3" => Ok(Self::Low),
            _ => Err(format!("Invalid priority: {}", s)),
        }
    }
}

/// A unit of work handed to the executor
///
/// Immutable once accepted into the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    /// Task this one continues, if it picks up paused work
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_of: Option<TaskId>,
    /// Carried-forward state from the paused run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation: Option<ContinuationContext>,
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: title.into(),
            description: String::new(),
            priority: Priority::default(),
            acceptance_criteria: Vec::new(),
            continuation_of: None,
            continuation: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_acceptance_criteria(mut self, criteria: Vec<String>) -> Self {
        self.acceptance_criteria = criteria;
        self
    }

    /// Mark this task as the continuation of a paused one
    pub fn continuing(mut self, previous: impl Into<TaskId>, context: ContinuationContext) -> Self {
        self.continuation_of = Some(previous.into());
        self.continuation = Some(context);
        self
    }

    pub fn is_continuation(&self) -> bool {
        self.continuation_of.is_some()
    }
}

/// Submission payload for a new task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSubmission {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub acceptance_criteria: Option<Vec<String>>,
}

impl TaskSubmission {
    /// Turn the submission into a task with a fresh id
    pub fn into_task(self) -> Task {
        Task::new(self.title.trim())
            .with_description(self.description.unwrap_or_default())
            .with_priority(self.priority.unwrap_or_default())
            .with_acceptance_criteria(self.acceptance_criteria.unwrap_or_default())
    }
}

/// Lifecycle state of a task in the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    PendingApproval,
    Active,
    PendingReview,
    Completed,
    Rejected,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Rejected)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PendingApproval => write!(f, "pending_approval"),
            Self::Active => write!(f, "active"),
            Self::PendingReview => write!(f, "pending_review"),
            Self::Completed => write!(f, "completed"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Phase of the agent loop for a single task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Exploring,
    Implementing,
    Verifying,
    Summarizing,
    Completed,
    Paused,
}

impl LoopPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopPhase::Completed | LoopPhase::Paused)
    }
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exploring => write!(f, "exploring"),
            Self::Implementing => write!(f, "implementing"),
            Self::Verifying => write!(f, "verifying"),
            Self::Summarizing => write!(f, "summarizing"),
            Self::Completed => write!(f, "completed"),
            Self::Paused => write!(f, "paused"),
        }
    }
}

/// What happened to a file during a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FileChange {
    Written {
        size: usize,
    },
    #[serde(rename_all = "camelCase")]
    Edited {
        old_snippet: String,
        new_snippet: String,
    },
}

impl FileChange {
    pub fn edited(old: &str, new: &str) -> Self {
        FileChange::Edited {
            old_snippet: truncate_chars(old, SNIPPET_CHARS),
            new_snippet: truncate_chars(new, SNIPPET_CHARS),
        }
    }
}

/// Relative path -> change, ordered for stable reports
pub type FilesChanged = BTreeMap<String, FileChange>;

/// Outcome of a verification command (test/lint/build)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub command: String,
    pub exit_code: i32,
    pub output: String,
    pub passed: bool,
}

/// State carried from a paused run into its continuation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuationContext {
    pub remaining_work: String,
    pub files_in_progress: Vec<String>,
    pub last_change_log: Vec<String>,
}

impl ContinuationContext {
    pub fn is_empty(&self) -> bool {
        self.remaining_work.trim().is_empty()
            && self.files_in_progress.is_empty()
            && self.last_change_log.is_empty()
    }
}

/// Why a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Model produced a final message before the budget ran out
    Finished,
    /// Model answered the final-round pause-report demand
    PauseReport,
    /// Budget exhausted with no terminal message
    BudgetExhausted,
    /// Stop signal observed between rounds
    Stopped,
    /// Model transport failed
    ModelError,
}

/// Terminal artifact of one task execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionReport {
    pub task_id: TaskId,
    pub iterations: usize,
    pub files_changed: FilesChanged,
    pub test_results: Vec<TestResult>,
    pub change_log: Vec<String>,
    pub summary: String,
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_context: Option<ContinuationContext>,
    pub stop_reason: StopReason,
    pub finished_at: DateTime<Utc>,
}

impl CompletionReport {
    /// Whether every recorded verification command passed
    pub fn tests_passed(&self) -> bool {
        self.test_results.iter().all(|t| t.passed)
    }
}

/// Periodic progress notification payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub task_id: TaskId,
    pub iteration: usize,
    pub max_iterations: usize,
    pub phase: LoopPhase,
    pub recent_changes: Vec<String>,
    pub files_changed: usize,
}

/// Registry row for one task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub task: Task,
    pub state: TaskState,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<CompletionReport>,
    /// Runs that consumed budget for this task
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    /// Claimed from the hub, so rejection hands it back there
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hub_claimed: bool,
}

impl TaskRecord {
    pub fn new(task: Task, state: TaskState) -> Self {
        let now = Utc::now();
        Self {
            task,
            state,
            submitted_at: now,
            updated_at: now,
            report: None,
            attempts: 0,
            rejection_reason: None,
            hub_claimed: false,
        }
    }

    /// Move to a new state and bump the timestamp
    pub fn set_state(&mut self, state: TaskState) {
        self.state = state;
        self.updated_at = Utc::now();
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            id: self.task.id.clone(),
            title: self.task.title.clone(),
            priority: self.task.priority,
            state: self.state,
            updated_at: self.updated_at,
            paused: self.report.as_ref().map(|r| r.paused),
        }
    }
}

/// Compact task view for status listings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub id: TaskId,
    pub title: String,
    pub priority: Priority,
    pub state: TaskState,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,
}

/// Truncate to at most `max` characters, appending an ellipsis when cut
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::High < Priority::Medium);
        assert!(Priority::Medium < Priority::Low);
        assert_eq!("HIGH".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_submission_defaults() {
        let task = TaskSubmission {
            title: "  Add login page ".to_string(),
            ..Default::default()
        }
        .into_task();

        assert_eq!(task.title, "Add login page");
        assert_eq!(task.priority, Priority::Medium);
        assert!(task.acceptance_criteria.is_empty());
        assert!(!task.is_continuation());
        assert_eq!(task.id.len(), 36);
    }

    #[test]
    fn test_task_wire_format_is_camel_case() {
        let task = Task::new("t").with_acceptance_criteria(vec!["tests pass".into()]);
        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("acceptanceCriteria").is_some());
        assert!(json.get("continuationOf").is_none());
    }

    #[test]
    fn test_file_change_serialization() {
        let written = serde_json::to_value(FileChange::Written { size: 12 }).unwrap();
        assert_eq!(written["action"], "written");
        assert_eq!(written["size"], 12);

        let edited = serde_json::to_value(FileChange::edited("a", "b")).unwrap();
        assert_eq!(edited["action"], "edited");
        assert_eq!(edited["oldSnippet"], "a");
        assert_eq!(edited["newSnippet"], "b");
    }

    #[test]
    fn test_edit_snippets_are_truncated() {
        let long = "x".repeat(500);
        match FileChange::edited(&long, "y") {
            FileChange::Edited { old_snippet, .. } => {
                assert_eq!(old_snippet.chars().count(), SNIPPET_CHARS + 3);
                assert!(old_snippet.ends_with("..."));
            }
            other => panic!("unexpected change: {:?}", other),
        }
    }

    #[test]
    fn test_continuation_context_empty() {
        assert!(ContinuationContext::default().is_empty());
        let ctx = ContinuationContext {
            remaining_work: "finish tests".into(),
            ..Default::default()
        };
        assert!(!ctx.is_empty());
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Rejected.is_terminal());
        assert!(!TaskState::PendingReview.is_terminal());
        assert!(LoopPhase::Paused.is_terminal());
        assert!(!LoopPhase::Verifying.is_terminal());
    }
}
