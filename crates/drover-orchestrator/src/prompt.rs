//! Prompt builder for agent runs
//!
//! The system prompt carries the budget plan and working rules; the first
//! user message carries the task itself (and any carried-forward state when
//! the task continues paused work).

use drover_core::Task;

use crate::phase::Budget;

/// Build the system instructions for a task run
pub fn build_system_prompt(budget: &Budget, project_context: Option<&str>) -> String {
    let mut prompt = String::new();

    prompt.push_str("You are an autonomous coding agent working inside a single project directory.\n");
    prompt.push_str("You act only through the provided tools. All paths are relative to the project root.\n\n");

    prompt.push_str("## BUDGET\n\n");
    prompt.push_str(&format!(
        "You have at most {} rounds. A round is one response from you; every tool call in a response runs in that round.\n",
        budget.max_rounds
    ));
    prompt.push_str(&format!(
        "- Explore: about {} rounds reading the code that matters. Do not read the whole tree.\n",
        budget.exploration_rounds
    ));
    prompt.push_str(&format!(
        "- Implement: about {} rounds making focused changes. Prefer edit_file over rewriting whole files.\n",
        budget.implementation_rounds()
    ));
    prompt.push_str(&format!(
        "- Verify: keep about {} rounds to run the relevant tests, linters or builds and fix what they report.\n",
        budget.verification_rounds()
    ));
    prompt.push_str("Batch independent tool calls into the same round.\n\n");

    prompt.push_str("## RULES\n\n");
    prompt.push_str("- Dependency directories, version control metadata, secrets and lockfiles are off limits.\n");
    prompt.push_str("- run_command accepts only allow-listed commands and no shell operators (; && || | > < ` $().\n");
    prompt.push_str("- A non-zero exit code is information, not a failure of the tool. Read the output and react.\n");
    prompt.push_str("- edit_file needs old_string to match exactly once. Include surrounding lines when it does not.\n");
    prompt.push_str("- Do not declare the same exported symbol twice; such edits are reverted.\n\n");

    prompt.push_str("## FINISHING\n\n");
    prompt.push_str("When the task is done, reply WITHOUT any tool calls. That reply is your final summary:\n");
    prompt.push_str("what changed (files), how it was verified, and anything left for a human to check.\n");

    if let Some(context) = project_context.map(str::trim).filter(|c| !c.is_empty()) {
        prompt.push_str("\n## PROJECT CONTEXT\n\n");
        prompt.push_str(context);
        prompt.push('\n');
    }

    prompt
}

/// Build the opening user message for a task
pub fn build_task_message(task: &Task) -> String {
    let mut message = String::new();

    message.push_str(&format!("# TASK: {}\n\n", task.title));
    message.push_str(&format!("**Priority:** {}\n\n", task.priority));

    if !task.description.trim().is_empty() {
        message.push_str(task.description.trim());
        message.push_str("\n\n");
    }

    if !task.acceptance_criteria.is_empty() {
        message.push_str("## ACCEPTANCE CRITERIA\n\n");
        for criterion in &task.acceptance_criteria {
            message.push_str(&format!("- [ ] {}\n", criterion));
        }
        message.push('\n');
    }

    if let Some(context) = &task.continuation {
        message.push_str("## CONTINUING PAUSED WORK\n\n");
        if let Some(prev) = &task.continuation_of {
            message.push_str(&format!("This task picks up where task {} paused.\n\n", prev));
        }
        if !context.remaining_work.trim().is_empty() {
            message.push_str("**Remaining work:**\n");
            message.push_str(context.remaining_work.trim());
            message.push_str("\n\n");
        }
        if !context.files_in_progress.is_empty() {
            message.push_str("**Files in progress:**\n");
            for file in &context.files_in_progress {
                message.push_str(&format!("- {}\n", file));
            }
            message.push('\n');
        }
        if !context.last_change_log.is_empty() {
            message.push_str("**Last changes:**\n");
            for entry in &context.last_change_log {
                message.push_str(&format!("- {}\n", entry));
            }
            message.push('\n');
        }
        message.push_str("Re-read the files in progress before editing them.\n\n");
    }

    message.push_str("Start by exploring the relevant parts of the project.\n");
    message
}

/// Injected when the remaining rounds reach the wind-down buffer
pub fn wind_down_message(rounds_left: usize) -> String {
    format!(
        "[BUDGET] {} rounds remain, including this one. Stop starting new work. \
         Finish or revert any half-done edit, run the most relevant verification once, \
         then reply without tool calls to give your final summary.",
        rounds_left
    )
}

/// Injected on the final round
pub fn pause_report_message() -> String {
    "[FINAL ROUND] This is your last round and no tool calls will run after it. \
     Reply WITHOUT tool calls with a pause report using exactly these sections:\n\
     ## Completed\nwhat is done and verified\n\
     ## Remaining\nwhat is still left to do\n\
     ## Next steps\nconcrete steps, with file paths, for whoever continues this task"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_core::{ContinuationContext, Priority};

    fn budget() -> Budget {
        Budget {
            max_rounds: 30,
            wind_down_buffer: 3,
            exploration_rounds: 3,
            progress_every: 5,
        }
    }

    #[test]
    fn test_system_prompt_budget_plan() {
        let prompt = build_system_prompt(&budget(), None);
        assert!(prompt.contains("at most 30 rounds"));
        assert!(prompt.contains("about 3 rounds reading"));
        assert!(prompt.contains("about 6 rounds to run"));
        assert!(!prompt.contains("PROJECT CONTEXT"));
    }

    #[test]
    fn test_system_prompt_includes_context() {
        let prompt = build_system_prompt(&budget(), Some("Use tabs, not spaces."));
        assert!(prompt.contains("## PROJECT CONTEXT"));
        assert!(prompt.contains("Use tabs, not spaces."));
    }

    #[test]
    fn test_task_message() {
        let task = Task::new("Add retries")
            .with_description("Retry failed uploads.")
            .with_priority(Priority::High)
            .with_acceptance_criteria(vec!["3 attempts max".into()]);
        let message = build_task_message(&task);
        assert!(message.starts_with("# TASK: Add retries"));
        assert!(message.contains("**Priority:** high"));
        assert!(message.contains("- [ ] 3 attempts max"));
        assert!(!message.contains("CONTINUING"));
    }

    #[test]
    fn test_continuation_message() {
        let task = Task::new("Add retries (continued)").continuing(
            "t-1",
            ContinuationContext {
                remaining_work: "Wire the config flag".into(),
                files_in_progress: vec!["src/upload.rs".into()],
                last_change_log: vec!["[4] edited src/upload.rs".into()],
            },
        );
        let message = build_task_message(&task);
        assert!(message.contains("where task t-1 paused"));
        assert!(message.contains("Wire the config flag"));
        assert!(message.contains("- src/upload.rs"));
        assert!(message.contains("[4] edited src/upload.rs"));
    }

    #[test]
    fn test_injection_texts() {
        assert!(wind_down_message(2).starts_with("[BUDGET] 2 rounds remain"));
        let pause = pause_report_message();
        assert!(pause.contains("## Remaining"));
        assert!(pause.contains("## Next steps"));
    }
}
