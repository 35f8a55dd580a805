//! Human-readable run log in `.drover/activity.md`
//!
//! Every write is fail-open: a log that cannot be written never affects
//! the task.

use chrono::Utc;
use drover_core::degrade::deliver_or_degrade;
use drover_core::{truncate_chars, CompletionReport, Result, Task};
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Summary characters kept in the log
const SUMMARY_PREVIEW_CHARS: usize = 500;

#[derive(Debug, Clone)]
pub struct ActivityLogger {
    output_path: PathBuf,
}

impl ActivityLogger {
    /// Log into `<drover_dir>/activity.md`
    pub fn new(drover_dir: impl AsRef<Path>) -> Self {
        Self {
            output_path: drover_dir.as_ref().join("activity.md"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.output_path
    }

    pub async fn log_task_start(&self, task: &Task, max_rounds: usize) {
        let content = format!(
            "## Task: {}\n**Id**: {}\n**Started**: {}\n**Max rounds**: {}\n\n",
            task.title,
            task.id,
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            max_rounds
        );
        deliver_or_degrade("activity_log::task_start", self.append(&content)).await;
    }

    pub async fn log_round(&self, round: usize, max_rounds: usize, entries: &[String]) {
        let mut content = format!("### Round {}/{}\n", round, max_rounds);
        if entries.is_empty() {
            content.push_str("- (no tool calls)\n");
        }
        for entry in entries {
            content.push_str(&format!("- {}\n", entry));
        }
        content.push('\n');
        deliver_or_degrade("activity_log::round", self.append(&content)).await;
    }

    pub async fn log_task_complete(&self, report: &CompletionReport) {
        let status = if report.paused { "PAUSED" } else { "COMPLETED" };
        let mut content = format!(
            "### {} after {} rounds ({:?})\n**Finished**: {}\n**Files changed**: {}\n",
            status,
            report.iterations,
            report.stop_reason,
            report.finished_at.format("%Y-%m-%d %H:%M:%S UTC"),
            report.files_changed.len()
        );
        if !report.test_results.is_empty() {
            let passed = report.test_results.iter().filter(|t| t.passed).count();
            content.push_str(&format!(
                "**Verification**: {}/{} passed\n",
                passed,
                report.test_results.len()
            ));
        }
        content.push_str(&format!(
            "\n{}\n\n---\n\n",
            truncate_chars(report.summary.trim(), SUMMARY_PREVIEW_CHARS)
        ));
        deliver_or_degrade("activity_log::task_complete", self.append(&content)).await;
    }

    async fn append(&self, content: &str) -> Result<()> {
        if let Some(parent) = self.output_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
