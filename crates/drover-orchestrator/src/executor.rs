//! Task executor - the budgeted agent loop
//!
//! Each round sends the whole conversation plus the tool definitions to the
//! model. A reply without tool calls ends the task; otherwise every tool call
//! runs in order and its JSON result goes back into the conversation.
//!
//! Budget handling is delegated to [`crate::phase::transition`]; this module
//! only carries out the actions it returns.

use drover_agent::{
    is_verification_command, result_to_json, tool_definitions, CommandPolicy, ContentBlock,
    Message, ModelProvider, ModelRequest, NullSink, PathSandbox, ProgressSink, Role, ToolCall,
    ToolExecutor, ToolLimits, ToolOutput, ToolUse,
};
use drover_core::{
    truncate_chars, CompletionReport, ContinuationContext, DroverConfig, DroverError, FileChange,
    FilesChanged, ProgressUpdate, Result, RuntimeSettings, StopReason, Task, TestResult,
    CONTINUATION_LOG_TAIL,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::activity::ActivityLogger;
use crate::phase::{transition, Action, Budget, Event, LoopState};
use crate::prompt::{
    build_system_prompt, build_task_message, pause_report_message, wind_down_message,
};

/// Error text kept in change-log entries
const ERROR_PREVIEW_CHARS: usize = 200;
/// Command output kept per test result
const TEST_OUTPUT_CHARS: usize = 2000;
/// Entries sent with each progress notification
const PROGRESS_RECENT_CHANGES: usize = 5;

/// Cooperative stop flag, checked between rounds
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Build the tool executor for one run from startup config and current settings
pub fn tool_executor_for(config: &DroverConfig, settings: &RuntimeSettings) -> Result<ToolExecutor> {
    let sandbox = PathSandbox::new(&config.project_root, &config.sandbox.blocked_paths)
        .map_err(|e| DroverError::Config(e.to_string()))?
        .with_additional_blocked(&settings.additional_blocked_paths);
    let policy = CommandPolicy::new(&config.sandbox.allowed_commands)
        .with_additional(&settings.additional_allowed_commands);
    let limits = ToolLimits {
        max_file_bytes: settings.max_file_bytes,
        command_timeout: Duration::from_secs(settings.command_timeout_secs),
        max_output_bytes: config.sandbox.max_output_bytes,
        max_search_matches: config.sandbox.max_search_matches,
    };
    Ok(ToolExecutor::new(sandbox, policy, limits))
}

impl Budget {
    /// Budget for one run
    pub fn from_settings(config: &DroverConfig, settings: &RuntimeSettings) -> Self {
        Self {
            max_rounds: settings.max_iterations,
            wind_down_buffer: settings.wind_down_buffer,
            exploration_rounds: config.budget.exploration_rounds,
            progress_every: config.budget.progress_every,
        }
    }
}

/// What one run has done so far
#[derive(Debug, Default)]
struct RunRecord {
    change_log: Vec<String>,
    files_changed: FilesChanged,
    test_results: Vec<TestResult>,
    summary: Option<String>,
    failure: Option<String>,
}

impl RunRecord {
    fn log(&mut self, round: usize, entry: impl AsRef<str>) {
        self.change_log.push(format!("[{}] {}", round, entry.as_ref()));
    }

    fn recent(&self, count: usize) -> Vec<String> {
        let start = self.change_log.len().saturating_sub(count);
        self.change_log[start..].to_vec()
    }
}

/// Runs one task through the agent loop
pub struct TaskExecutor {
    provider: Arc<dyn ModelProvider>,
    tools: ToolExecutor,
    sink: Arc<dyn ProgressSink>,
    budget: Budget,
    max_tokens: usize,
    project_context: Option<String>,
    activity_logger: Option<ActivityLogger>,
    stop: StopSignal,
}

impl TaskExecutor {
    pub fn new(provider: Arc<dyn ModelProvider>, tools: ToolExecutor, budget: Budget) -> Self {
        Self {
            provider,
            tools,
            sink: Arc::new(NullSink),
            budget,
            max_tokens: 8192,
            project_context: None,
            activity_logger: None,
            stop: StopSignal::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_project_context(mut self, context: Option<String>) -> Self {
        self.project_context = context;
        self
    }

    /// Enable activity logging to `<drover_dir>/activity.md`
    pub fn with_activity_logger(mut self, logger: ActivityLogger) -> Self {
        self.activity_logger = Some(logger);
        self
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    /// Run the loop on a task
    ///
    /// Never fails: model errors, stops and budget exhaustion all resolve to
    /// a paused report.
    pub async fn run(&self, task: &Task) -> CompletionReport {
        info!(
            "Starting task {} ({}) with {} rounds",
            task.id, task.title, self.budget.max_rounds
        );
        if let Some(logger) = &self.activity_logger {
            logger.log_task_start(task, self.budget.max_rounds).await;
        }

        let system = build_system_prompt(&self.budget, self.project_context.as_deref());
        let tools = tool_definitions();
        let mut messages = vec![Message::user_text(build_task_message(task))];
        let mut record = RunRecord::default();
        let mut state = LoopState::new(self.budget);
        let mut finish: Option<(StopReason, bool)> = None;
        let mut rounds = 0;

        for round in 1..=self.budget.max_rounds {
            if self.stop.is_stopped() {
                info!("Stop requested, ending task {} after round {}", task.id, rounds);
                let (next, actions) = transition(state, Event::StopRequested);
                state = next;
                finish = self.apply(task, &state, actions, rounds, &mut record, &mut messages).await;
                break;
            }

            rounds = round;
            info!("=== Round {} of {} ===", round, self.budget.max_rounds);
            let (next, actions) = transition(state, Event::RoundStarted { round });
            state = next;
            self.apply(task, &state, actions, round, &mut record, &mut messages)
                .await;

            let request = ModelRequest {
                system: system.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
                max_tokens: self.max_tokens,
            };

            let response = match self.provider.complete(request).await {
                Ok(response) => response,
                Err(e) => {
                    error!("Model {} failed in round {}: {}", self.provider.name(), round, e);
                    let message = truncate_chars(&e.to_string(), ERROR_PREVIEW_CHARS);
                    record.failure = Some(message.clone());
                    let (next, actions) = transition(state, Event::ModelFailed { message });
                    state = next;
                    finish = self.apply(task, &state, actions, round, &mut record, &mut messages).await;
                    break;
                }
            };

            if let Some(usage) = response.usage {
                debug!(
                    "Round {} usage: {} in / {} out",
                    round, usage.input_tokens, usage.output_tokens
                );
            }

            if response.is_terminal() {
                let text = response.text_content();
                info!("Model finished in round {} ({} chars)", round, text.len());
                record.summary = Some(text);
                messages.push(response.into_message());
                if let Some(logger) = &self.activity_logger {
                    logger.log_round(round, self.budget.max_rounds, &[]).await;
                }
                let (next, actions) = transition(state, Event::TerminalMessage);
                state = next;
                finish = self.apply(task, &state, actions, round, &mut record, &mut messages).await;
                break;
            }

            let uses = response.tool_uses();
            messages.push(response.into_message());

            let log_start = record.change_log.len();
            let mut results = Vec::with_capacity(uses.len());
            let mut wrote_files = false;
            let mut ran_verification = false;
            for tool_use in &uses {
                let (block, wrote, verified) = self.execute_tool(round, tool_use, &mut record).await;
                wrote_files |= wrote;
                ran_verification |= verified;
                results.push(block);
            }
            messages.push(Message::tool_results(results));

            if let Some(logger) = &self.activity_logger {
                logger
                    .log_round(round, self.budget.max_rounds, &record.change_log[log_start..])
                    .await;
            }

            let (next, actions) = transition(
                state,
                Event::ToolsExecuted {
                    wrote_files,
                    ran_verification,
                },
            );
            state = next;
            self.apply(task, &state, actions, round, &mut record, &mut messages)
                .await;
        }

        if finish.is_none() {
            warn!(
                "Task {} used all {} rounds without a final message",
                task.id, self.budget.max_rounds
            );
            let (exhausted, actions) = transition(state, Event::BudgetExhausted);
            finish = self
                .apply(task, &exhausted, actions, rounds, &mut record, &mut messages)
                .await;
        }

        let (stop_reason, paused) = finish.unwrap_or((StopReason::BudgetExhausted, true));
        let report = build_report(task, rounds, record, stop_reason, paused);

        info!(
            "Task {} {} after {} rounds ({} files changed)",
            task.id,
            if report.paused { "paused" } else { "completed" },
            report.iterations,
            report.files_changed.len()
        );
        if let Some(logger) = &self.activity_logger {
            logger.log_task_complete(&report).await;
        }
        report
    }

    /// Carry out transition actions; returns the stop decision if one was made
    async fn apply(
        &self,
        task: &Task,
        state: &LoopState,
        actions: Vec<Action>,
        round: usize,
        record: &mut RunRecord,
        messages: &mut Vec<Message>,
    ) -> Option<(StopReason, bool)> {
        let mut finish = None;
        for action in actions {
            match action {
                Action::InjectWindDown { rounds_left } => {
                    info!("Injecting wind-down notice ({} rounds left)", rounds_left);
                    inject(messages, wind_down_message(rounds_left));
                }
                Action::DemandPauseReport => {
                    info!("Final round: demanding pause report");
                    inject(messages, pause_report_message());
                }
                Action::EmitProgress => self.emit_progress(task, state, round, record).await,
                Action::SynthesizeSummary => {
                    let summary = synthesize_summary(record, record.failure.as_deref());
                    record.summary = Some(summary);
                }
                Action::LogActivity { message } => {
                    warn!("Task {}: {}", task.id, message);
                    record.log(round, truncate_chars(&message, ERROR_PREVIEW_CHARS));
                }
                Action::Finish { reason, paused } => finish = Some((reason, paused)),
            }
        }
        finish
    }

    async fn emit_progress(&self, task: &Task, state: &LoopState, round: usize, record: &RunRecord) {
        let update = ProgressUpdate {
            task_id: task.id.clone(),
            iteration: round,
            max_iterations: self.budget.max_rounds,
            phase: state.phase,
            recent_changes: record.recent(PROGRESS_RECENT_CHANGES),
            files_changed: record.files_changed.len(),
        };
        if let Some(error) = self.sink.progress(&update).await.error() {
            debug!("Progress for round {} not delivered: {}", round, error);
        }
    }

    /// Run one tool call; returns the result block and whether it wrote files
    /// or ran verification
    async fn execute_tool(
        &self,
        round: usize,
        tool_use: &ToolUse,
        record: &mut RunRecord,
    ) -> (ContentBlock, bool, bool) {
        let call = ToolCall::from_parts(&tool_use.name, tool_use.input.clone());
        let result = match &call {
            Ok(call) => {
                debug!("Executing {}", call.describe());
                self.tools.execute(call).await
            }
            Err(e) => Err(e.clone()),
        };

        let description = match &call {
            Ok(call) => call.describe(),
            Err(_) => format!("called {}", tool_use.name),
        };
        let mut wrote = false;
        let mut verified = false;

        match (&call, &result) {
            (_, Err(e)) => {
                debug!("Tool {} failed: {}", tool_use.name, e);
                record.log(
                    round,
                    format!(
                        "{} failed: {}",
                        description,
                        truncate_chars(&e.to_string(), ERROR_PREVIEW_CHARS)
                    ),
                );
            }
            (_, Ok(ToolOutput::Written { path, bytes, .. })) => {
                wrote = true;
                record
                    .files_changed
                    .insert(path.clone(), FileChange::Written { size: *bytes });
                record.log(round, description);
            }
            (
                Ok(ToolCall::EditFile {
                    old_string,
                    new_string,
                    ..
                }),
                Ok(ToolOutput::Edited { path, warning, .. }),
            ) => {
                wrote = true;
                record
                    .files_changed
                    .insert(path.clone(), FileChange::edited(old_string, new_string));
                match warning {
                    Some(warning) => record.log(round, format!("{} (warning: {})", description, warning)),
                    None => record.log(round, description),
                }
            }
            (
                _,
                Ok(ToolOutput::CommandRun {
                    command,
                    exit_code,
                    output,
                    ..
                }),
            ) => {
                if is_verification_command(command) {
                    verified = true;
                    record.test_results.push(TestResult {
                        command: command.clone(),
                        exit_code: *exit_code,
                        output: truncate_chars(output, TEST_OUTPUT_CHARS),
                        passed: *exit_code == 0,
                    });
                }
                record.log(round, format!("{} (exit {})", description, exit_code));
            }
            (_, Ok(_)) => record.log(round, description),
        }

        let block = ContentBlock::ToolResult {
            tool_use_id: tool_use.id.clone(),
            content: result_to_json(&result).to_string(),
            is_error: result.is_err(),
        };
        (block, wrote, verified)
    }
}

/// Add a synthetic instruction to the conversation
///
/// Appended to the pending user turn when there is one, so roles keep
/// alternating.
fn inject(messages: &mut Vec<Message>, text: String) {
    match messages.last_mut() {
        Some(last) if last.role == Role::User => last.content.push(ContentBlock::Text { text }),
        _ => messages.push(Message::user_text(text)),
    }
}

/// Summary built from the change log when the model gave none
fn synthesize_summary(record: &RunRecord, failure: Option<&str>) -> String {
    let mut summary = String::new();
    match failure {
        Some(error) => summary.push_str(&format!(
            "Run paused: the model request failed ({}). Work done so far is preserved.\n\n",
            error
        )),
        None => summary.push_str("Run paused before the model gave a final summary.\n\n"),
    }

    if record.files_changed.is_empty() {
        summary.push_str("No files were changed.\n");
    } else {
        summary.push_str("Files changed:\n");
        for (path, change) in &record.files_changed {
            let action = match change {
                FileChange::Written { .. } => "written",
                FileChange::Edited { .. } => "edited",
            };
            summary.push_str(&format!("- {} ({})\n", path, action));
        }
    }

    let failed = record.test_results.iter().filter(|t| !t.passed).count();
    if !record.test_results.is_empty() {
        summary.push_str(&format!(
            "\nVerification: {} of {} runs passed.\n",
            record.test_results.len() - failed,
            record.test_results.len()
        ));
    }

    let recent = record.recent(CONTINUATION_LOG_TAIL);
    if !recent.is_empty() {
        summary.push_str("\nLast changes:\n");
        for entry in recent {
            summary.push_str(&format!("- {}\n", entry));
        }
    }
    summary
}

/// Pull the "## Remaining" section out of a pause report
fn remaining_section(summary: &str) -> Option<String> {
    let start = summary.find("## Remaining")?;
    let body = &summary[start + "## Remaining".len()..];
    let end = body.find("\n## ").unwrap_or(body.len());
    let section = body[..end].trim();
    (!section.is_empty()).then(|| section.to_string())
}

fn build_report(
    task: &Task,
    rounds: usize,
    record: RunRecord,
    stop_reason: StopReason,
    paused: bool,
) -> CompletionReport {
    let summary = record
        .summary
        .clone()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| synthesize_summary(&record, record.failure.as_deref()));

    let continuation_context = paused.then(|| ContinuationContext {
        remaining_work: remaining_section(&summary).unwrap_or_else(|| summary.clone()),
        files_in_progress: record.files_changed.keys().cloned().collect(),
        last_change_log: record.recent(CONTINUATION_LOG_TAIL),
    });

    CompletionReport {
        task_id: task.id.clone(),
        iterations: rounds,
        files_changed: record.files_changed,
        test_results: record.test_results,
        change_log: record.change_log,
        summary,
        paused,
        continuation_context,
        stop_reason,
        finished_at: chrono::Utc::now(),
    }
}
