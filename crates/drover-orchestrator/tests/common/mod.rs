//! Shared fixtures: a scripted model and a recording progress sink

#![allow(dead_code)]

use async_trait::async_trait;
use drover_agent::{ContentBlock, ModelProvider, ModelRequest, ModelResponse, ProgressSink};
use drover_core::{CompletionReport, Delivery, DroverConfig, ProgressUpdate, Result};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tempfile::TempDir;

/// Replays queued responses, then repeats a fallback response
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<ModelResponse>>>,
    fallback: ModelResponse,
    requests: Mutex<Vec<ModelRequest>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<ModelResponse>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: tool_call("fallback", "list_directory", json!({})),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// A model that never stops calling tools
    pub fn endless() -> Self {
        Self::new(vec![])
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        match self.script.lock().unwrap().pop_front() {
            Some(response) => response,
            None => {
                let mut response = self.fallback.clone();
                // Distinct ids per round
                if let Some(ContentBlock::ToolUse { id, .. }) = response.content.first_mut() {
                    *id = format!("fallback-{}", call);
                }
                Ok(response)
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn tool_call(id: &str, name: &str, input: Value) -> ModelResponse {
    ModelResponse {
        content: vec![ContentBlock::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input,
        }],
        usage: None,
    }
}

pub fn final_text(text: &str) -> ModelResponse {
    ModelResponse::text(text)
}

/// Text of the last user message in a request
pub fn last_user_text(request: &ModelRequest) -> String {
    request
        .messages
        .last()
        .map(|m| m.text())
        .unwrap_or_default()
}

/// All text in a request's conversation
pub fn conversation_text(request: &ModelRequest) -> String {
    request
        .messages
        .iter()
        .map(|m| m.text())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Default)]
pub struct RecordingSink {
    pub progress: Mutex<Vec<ProgressUpdate>>,
    pub completed: Mutex<Vec<CompletionReport>>,
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn progress(&self, update: &ProgressUpdate) -> Delivery<()> {
        self.progress.lock().unwrap().push(update.clone());
        Delivery::Delivered(())
    }

    async fn completed(&self, report: &CompletionReport) -> Delivery<()> {
        self.completed.lock().unwrap().push(report.clone());
        Delivery::Delivered(())
    }
}

/// Config rooted in a fresh temp directory
pub fn project() -> (TempDir, DroverConfig) {
    let dir = TempDir::new().unwrap();
    let mut config = DroverConfig::default();
    config.project_root = dir.path().to_path_buf();
    (dir, config)
}
