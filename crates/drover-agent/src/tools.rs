//! Tool registry and executor
//!
//! Six fixed tools. Inputs are parsed into [`ToolCall`] at the boundary and
//! every failure comes back as a [`ToolError`] value; nothing here panics or
//! propagates across the tool boundary.

use ignore::WalkBuilder;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::exports;
use crate::sandbox::{CommandPolicy, PathSandbox, SandboxError};
use drover_core::{truncate_chars, SNIPPET_CHARS};

/// Registered tool names, in schema order
pub const TOOL_NAMES: &[&str] = &[
    "read_file",
    "write_file",
    "edit_file",
    "list_directory",
    "search_files",
    "run_command",
];

/// Tokens that mark a command as a test/lint/build runner
const VERIFICATION_TOKENS: &[&str] = &[
    "test",
    "lint",
    "build",
    "check",
    "typecheck",
    "clippy",
    "tsc",
    "eslint",
    "vitest",
    "pytest",
    "ruff",
    "mypy",
    "vet",
];

/// A validated tool invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "input", rename_all = "snake_case")]
pub enum ToolCall {
    ReadFile {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line_start: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line_end: Option<usize>,
    },
    WriteFile {
        path: String,
        content: String,
    },
    EditFile {
        path: String,
        old_string: String,
        new_string: String,
    },
    ListDirectory {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    SearchFiles {
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_glob: Option<String>,
    },
    RunCommand {
        command: String,
    },
}

impl ToolCall {
    /// Build a call from a model-supplied name and JSON input
    pub fn from_parts(name: &str, input: Value) -> Result<Self, ToolError> {
        if !TOOL_NAMES.contains(&name) {
            return Err(ToolError::UnknownTool(name.to_string()));
        }
        let input = if input.is_null() { json!({}) } else { input };

        serde_json::from_value(json!({ "name": name, "input": input })).map_err(|e| {
            ToolError::InvalidInput {
                tool: name.to_string(),
                message: e.to_string(),
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::ReadFile { .. } => "read_file",
            ToolCall::WriteFile { .. } => "write_file",
            ToolCall::EditFile { .. } => "edit_file",
            ToolCall::ListDirectory { .. } => "list_directory",
            ToolCall::SearchFiles { .. } => "search_files",
            ToolCall::RunCommand { .. } => "run_command",
        }
    }

    /// Short human-readable description for change logs
    pub fn describe(&self) -> String {
        match self {
            ToolCall::ReadFile { path, .. } => format!("read {}", path),
            ToolCall::WriteFile { path, content } => {
                format!("wrote {} ({} bytes)", path, content.len())
            }
            ToolCall::EditFile { path, .. } => format!("edited {}", path),
            ToolCall::ListDirectory { path } => {
                format!("listed {}", path.as_deref().unwrap_or("."))
            }
            ToolCall::SearchFiles { pattern, .. } => format!("searched for /{}/", pattern),
            ToolCall::RunCommand { command } => format!("ran `{}`", command),
        }
    }
}

/// One search hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub path: String,
    pub line: usize,
    pub text: String,
}

/// Successful tool result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    FileContent {
        path: String,
        content: String,
        total_lines: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        line_start: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        line_end: Option<usize>,
    },
    Written {
        path: String,
        bytes: usize,
        created: bool,
    },
    Edited {
        path: String,
        backup: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
    },
    Listing {
        path: String,
        entries: Vec<String>,
    },
    Matches {
        pattern: String,
        matches: Vec<SearchMatch>,
        truncated: bool,
    },
    CommandRun {
        command: String,
        exit_code: i32,
        output: String,
        truncated: bool,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid input for {tool}: {message}")]
    InvalidInput { tool: String, message: String },

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("not a file: {0}")]
    NotAFile(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("file {path} is {size} bytes, over the {limit} byte limit")]
    FileTooLarge { path: String, size: u64, limit: u64 },

    #[error("content is {size} bytes, over the {limit} byte limit")]
    ContentTooLarge { size: u64, limit: u64 },

    #[error("old_string must not be empty")]
    EmptyOldString,

    #[error("old_string not found in {path}{hint}")]
    OldStringNotFound { path: String, hint: String },

    #[error("old_string occurs {count} times in {path} (lines {lines}); include more surrounding context so it matches exactly once")]
    AmbiguousEdit {
        path: String,
        count: usize,
        lines: String,
    },

    #[error("edit reverted: it introduced duplicate exported declaration(s) {symbols} in {path}")]
    DuplicateExport { path: String, symbols: String },

    #[error("invalid regex: {0}")]
    InvalidRegex(String),

    #[error("invalid file glob: {0}")]
    InvalidGlob(String),

    #[error("command timed out after {secs}s: {command}")]
    Timeout { command: String, secs: u64 },

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },
}

impl ToolError {
    fn io(path: &str, e: impl std::fmt::Display) -> Self {
        ToolError::Io {
            path: path.to_string(),
            message: e.to_string(),
        }
    }
}

/// Resource ceilings for tool execution
#[derive(Debug, Clone)]
pub struct ToolLimits {
    pub max_file_bytes: u64,
    pub command_timeout: Duration,
    pub max_output_bytes: usize,
    pub max_search_matches: usize,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 512 * 1024,
            command_timeout: Duration::from_secs(120),
            max_output_bytes: 20_000,
            max_search_matches: 50,
        }
    }
}

/// JSON shape sent back to the model: the output object or `{error}`
pub fn result_to_json(result: &Result<ToolOutput, ToolError>) -> Value {
    match result {
        Ok(output) => serde_json::to_value(output).unwrap_or_else(|e| json!({ "error": e.to_string() })),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

/// Whether a command runs tests, lints, builds or type checks
pub fn is_verification_command(command: &str) -> bool {
    command.split_whitespace().any(|token| {
        let token = token.trim_start_matches('-');
        VERIFICATION_TOKENS
            .iter()
            .any(|v| token == *v || token.starts_with(&format!("{}:", v)))
    })
}

/// Executes tool calls inside a sandboxed project root
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    sandbox: PathSandbox,
    policy: CommandPolicy,
    limits: ToolLimits,
}

impl ToolExecutor {
    pub fn new(sandbox: PathSandbox, policy: CommandPolicy, limits: ToolLimits) -> Self {
        Self {
            sandbox,
            policy,
            limits,
        }
    }

    pub fn sandbox(&self) -> &PathSandbox {
        &self.sandbox
    }

    pub fn limits(&self) -> &ToolLimits {
        &self.limits
    }

    /// Run one tool call
    pub async fn execute(&self, call: &ToolCall) -> Result<ToolOutput, ToolError> {
        debug!(tool = call.name(), "Executing tool");

        let result = match call {
            ToolCall::ReadFile {
                path,
                line_start,
                line_end,
            } => self.read_file(path, *line_start, *line_end).await,
            ToolCall::WriteFile { path, content } => self.write_file(path, content).await,
            ToolCall::EditFile {
                path,
                old_string,
                new_string,
            } => self.edit_file(path, old_string, new_string).await,
            ToolCall::ListDirectory { path } => {
                self.list_directory(path.as_deref().unwrap_or("")).await
            }
            ToolCall::SearchFiles {
                pattern,
                path,
                file_glob,
            } => {
                self.search_files(pattern, path.as_deref(), file_glob.as_deref())
                    .await
            }
            ToolCall::RunCommand { command } => self.run_command(command).await,
        };

        if let Err(ref e) = result {
            debug!(tool = call.name(), "Tool failed: {}", e);
        }
        result
    }

    async fn read_file(
        &self,
        path: &str,
        line_start: Option<usize>,
        line_end: Option<usize>,
    ) -> Result<ToolOutput, ToolError> {
        let resolved = self.sandbox.resolve(path)?;
        let meta = tokio::fs::metadata(&resolved)
            .await
            .map_err(|_| ToolError::NotFound(path.to_string()))?;
        if !meta.is_file() {
            return Err(ToolError::NotAFile(path.to_string()));
        }
        if meta.len() > self.limits.max_file_bytes {
            return Err(ToolError::FileTooLarge {
                path: path.to_string(),
                size: meta.len(),
                limit: self.limits.max_file_bytes,
            });
        }

        let content = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::io(path, e))?;
        let total_lines = content.lines().count();

        if line_start.is_none() && line_end.is_none() {
            return Ok(ToolOutput::FileContent {
                path: self.sandbox.relative(&resolved),
                content,
                total_lines,
                line_start: None,
                line_end: None,
            });
        }

        let start = line_start.unwrap_or(1).max(1);
        let end = line_end.unwrap_or(total_lines).min(total_lines);
        if start > end && total_lines > 0 {
            return Err(ToolError::InvalidInput {
                tool: "read_file".to_string(),
                message: format!(
                    "line range {}-{} is empty (file has {} lines)",
                    start, end, total_lines
                ),
            });
        }

        let slice: Vec<&str> = content
            .lines()
            .skip(start - 1)
            .take(end.saturating_sub(start - 1))
            .collect();

        Ok(ToolOutput::FileContent {
            path: self.sandbox.relative(&resolved),
            content: slice.join("\n"),
            total_lines,
            line_start: Some(start),
            line_end: Some(end),
        })
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<ToolOutput, ToolError> {
        let resolved = self.sandbox.resolve(path)?;
        let size = content.len() as u64;
        if size > self.limits.max_file_bytes {
            return Err(ToolError::ContentTooLarge {
                size,
                limit: self.limits.max_file_bytes,
            });
        }
        if resolved.is_dir() {
            return Err(ToolError::NotAFile(path.to_string()));
        }

        let created = !resolved.exists();
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::io(path, e))?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| ToolError::io(path, e))?;

        debug!(
            "{} file: {}",
            if created { "Created" } else { "Overwrote" },
            resolved.display()
        );

        Ok(ToolOutput::Written {
            path: self.sandbox.relative(&resolved),
            bytes: content.len(),
            created,
        })
    }

    async fn edit_file(
        &self,
        path: &str,
        old_string: &str,
        new_string: &str,
    ) -> Result<ToolOutput, ToolError> {
        let resolved = self.sandbox.resolve(path)?;
        if old_string.is_empty() {
            return Err(ToolError::EmptyOldString);
        }
        if !resolved.is_file() {
            return Err(ToolError::NotFound(path.to_string()));
        }

        let original = tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| ToolError::io(path, e))?;

        let offsets: Vec<usize> = original.match_indices(old_string).map(|(i, _)| i).collect();
        match offsets.len() {
            0 => {
                return Err(ToolError::OldStringNotFound {
                    path: path.to_string(),
                    hint: nearby_hint(&original, old_string),
                })
            }
            1 => {}
            count => {
                let lines = offsets
                    .iter()
                    .map(|&i| line_of_offset(&original, i).to_string())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(ToolError::AmbiguousEdit {
                    path: path.to_string(),
                    count,
                    lines,
                });
            }
        }

        let updated = original.replacen(old_string, new_string, 1);
        if updated.len() as u64 > self.limits.max_file_bytes {
            return Err(ToolError::ContentTooLarge {
                size: updated.len() as u64,
                limit: self.limits.max_file_bytes,
            });
        }

        let backup = backup_path(&resolved);
        tokio::fs::write(&backup, &original)
            .await
            .map_err(|e| ToolError::io(path, e))?;
        tokio::fs::write(&resolved, &updated)
            .await
            .map_err(|e| ToolError::io(path, e))?;

        if exports::is_checked_source(&resolved) {
            let introduced = exports::introduced_duplicates(&resolved, &original, &updated);
            if !introduced.is_empty() {
                warn!(
                    "Reverting edit to {}: duplicate exports {:?}",
                    resolved.display(),
                    introduced
                );
                tokio::fs::write(&resolved, &original)
                    .await
                    .map_err(|e| ToolError::io(path, e))?;
                return Err(ToolError::DuplicateExport {
                    path: path.to_string(),
                    symbols: introduced.join(", "),
                });
            }
        }

        let warning = if updated.len() * 2 < original.len() {
            Some(format!(
                "file shrank from {} to {} bytes (more than 50%); check that nothing was removed by accident",
                original.len(),
                updated.len()
            ))
        } else {
            None
        };

        Ok(ToolOutput::Edited {
            path: self.sandbox.relative(&resolved),
            backup: self.sandbox.relative(&backup),
            warning,
        })
    }

    async fn list_directory(&self, path: &str) -> Result<ToolOutput, ToolError> {
        let resolved = self.sandbox.resolve(path)?;
        if !resolved.exists() {
            return Err(ToolError::NotFound(display_path(path)));
        }
        if !resolved.is_dir() {
            return Err(ToolError::NotADirectory(display_path(path)));
        }

        let mut reader = tokio::fs::read_dir(&resolved)
            .await
            .map_err(|e| ToolError::io(path, e))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| ToolError::io(path, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if self.sandbox.is_blocked_name(&name) {
                continue;
            }
            let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
            entries.push(if is_dir { format!("{}/", name) } else { name });
        }
        entries.sort();

        Ok(ToolOutput::Listing {
            path: self.sandbox.relative(&resolved),
            entries,
        })
    }

    async fn search_files(
        &self,
        pattern: &str,
        path: Option<&str>,
        file_glob: Option<&str>,
    ) -> Result<ToolOutput, ToolError> {
        let regex = Regex::new(pattern).map_err(|e| ToolError::InvalidRegex(e.to_string()))?;
        let glob = file_glob
            .map(glob::Pattern::new)
            .transpose()
            .map_err(|e| ToolError::InvalidGlob(e.to_string()))?;
        let base = self.sandbox.resolve(path.unwrap_or(""))?;
        if !base.exists() {
            return Err(ToolError::NotFound(display_path(path.unwrap_or(""))));
        }

        let sandbox = self.sandbox.clone();
        let max_matches = self.limits.max_search_matches;
        let max_file_bytes = self.limits.max_file_bytes;
        let pattern_owned = pattern.to_string();

        tokio::task::spawn_blocking(move || {
            let filter_sandbox = sandbox.clone();
            let walker = WalkBuilder::new(&base)
                .hidden(false)
                .filter_entry(move |entry| {
                    !filter_sandbox.is_blocked_name(&entry.file_name().to_string_lossy())
                })
                .build();

            let mut matches = Vec::new();
            let mut truncated = false;

            'walk: for entry in walker.flatten() {
                if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                    continue;
                }
                let file = entry.path();
                let rel = sandbox.relative(file);
                if let Some(glob) = &glob {
                    let name = file
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    if !glob.matches(&name) && !glob.matches(&rel) {
                        continue;
                    }
                }
                if entry.metadata().map(|m| m.len() > max_file_bytes).unwrap_or(true) {
                    continue;
                }
                let Ok(content) = std::fs::read_to_string(file) else {
                    continue;
                };

                for (idx, line) in content.lines().enumerate() {
                    if regex.is_match(line) {
                        if matches.len() >= max_matches {
                            truncated = true;
                            break 'walk;
                        }
                        matches.push(SearchMatch {
                            path: rel.clone(),
                            line: idx + 1,
                            text: truncate_chars(line.trim(), SNIPPET_CHARS),
                        });
                    }
                }
            }

            ToolOutput::Matches {
                pattern: pattern_owned,
                matches,
                truncated,
            }
        })
        .await
        .map_err(|e| ToolError::io(path.unwrap_or("."), e))
    }

    async fn run_command(&self, command: &str) -> Result<ToolOutput, ToolError> {
        let command = self.policy.check(command)?;
        self.sandbox.check_command_args(&command)?;
        let timeout = self.limits.command_timeout;
        let max_output = self.limits.max_output_bytes;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(self.sandbox.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::io(&command, e))?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let run = async move {
            let (out, err) = tokio::join!(
                read_capped(stdout, max_output),
                read_capped(stderr, max_output)
            );
            let (out, out_overflow) = out?;
            let (err, err_overflow) = err?;
            let overflowed = out_overflow || err_overflow;
            if overflowed {
                // Nobody reads the rest
                let _ = child.start_kill();
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((out, err, overflowed, status))
        };

        // Dropping the future on timeout drops the child, which kills it
        let (stdout, stderr, overflowed, status) = match tokio::time::timeout(timeout, run).await
        {
            Ok(result) => result.map_err(|e| ToolError::io(&command, e))?,
            Err(_) => {
                return Err(ToolError::Timeout {
                    command,
                    secs: timeout.as_secs(),
                })
            }
        };

        let mut combined = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr);
        if !stderr.trim().is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }
        let (mut output_text, mut truncated) = cap_output(combined, max_output);
        if overflowed && !truncated {
            output_text.push_str(&format!("\n... [output truncated at {} bytes]", max_output));
            truncated = true;
        }
        if overflowed {
            warn!("Command output exceeded {} bytes; stopped: {}", max_output, command);
        }

        Ok(ToolOutput::CommandRun {
            command,
            exit_code: status.code().unwrap_or(-1),
            output: output_text,
            truncated,
        })
    }
}

fn display_path(path: &str) -> String {
    if path.trim().is_empty() {
        ".".to_string()
    } else {
        path.to_string()
    }
}

fn backup_path(path: &Path) -> std::path::PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".bak");
    path.with_file_name(name)
}

fn line_of_offset(content: &str, offset: usize) -> usize {
    content[..offset].matches('\n').count() + 1
}

// Point at lines resembling the first line of the missing text
fn nearby_hint(content: &str, old_string: &str) -> String {
    let needle = old_string
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("");
    if needle.is_empty() {
        return String::new();
    }

    let lines: Vec<String> = content
        .lines()
        .enumerate()
        .filter(|(_, line)| line.contains(needle))
        .take(3)
        .map(|(i, _)| (i + 1).to_string())
        .collect();

    if lines.is_empty() {
        String::new()
    } else {
        format!(
            "; similar text on line(s) {} (check whitespace and indentation)",
            lines.join(", ")
        )
    }
}

/// Read at most `max` bytes from a child pipe; the flag reports whether more
/// was available. The pipe is dropped on return, so a writer still producing
/// output gets EPIPE instead of filling memory.
async fn read_capped<R: AsyncRead + Unpin>(
    pipe: Option<R>,
    max: usize,
) -> std::io::Result<(Vec<u8>, bool)> {
    let Some(pipe) = pipe else {
        return Ok((Vec::new(), false));
    };
    let mut buf = Vec::new();
    pipe.take(max as u64 + 1).read_to_end(&mut buf).await?;
    let overflowed = buf.len() > max;
    buf.truncate(max);
    Ok((buf, overflowed))
}

fn cap_output(mut text: String, max_bytes: usize) -> (String, bool) {
    if text.len() <= max_bytes {
        return (text, false);
    }
    let mut cut = max_bytes;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let total = text.len();
    text.truncate(cut);
    text.push_str(&format!("\n... [output truncated: {} of {} bytes shown]", cut, total));
    (text, true)
}
