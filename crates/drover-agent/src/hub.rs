//! Coordinating hub client
//!
//! Every call degrades to [`Delivery::Local`] on failure; a lost progress
//! notification never fails a task.

use async_trait::async_trait;
use drover_core::degrade::deliver_or_degrade;
use drover_core::{CompletionReport, Delivery, DroverConfig, DroverError, ProgressUpdate, Task};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::cached_client::{CachePolicy, CacheStats, CachedClient, RequestOptions};
use crate::transport::{HttpTransport, ReqwestTransport};

/// Where the loop sends progress and final reports
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn progress(&self, update: &ProgressUpdate) -> Delivery<()>;

    async fn completed(&self, report: &CompletionReport) -> Delivery<()>;
}

/// Sink that accepts everything and sends nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn progress(&self, _update: &ProgressUpdate) -> Delivery<()> {
        Delivery::Delivered(())
    }

    async fn completed(&self, _report: &CompletionReport) -> Delivery<()> {
        Delivery::Delivered(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AvailableTasks {
    Wrapped { tasks: Vec<Task> },
    Bare(Vec<Task>),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseBody<'a> {
    agent_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    /// Whether the failed attempt counts against the task's budget
    charge_attempt: bool,
}

/// Client for the hub's agent protocol
#[derive(Debug, Clone)]
pub struct HubClient {
    client: Arc<CachedClient>,
    agent_id: String,
}

impl HubClient {
    pub fn new(client: Arc<CachedClient>, agent_id: impl Into<String>) -> Self {
        Self {
            client,
            agent_id: agent_id.into(),
        }
    }

    /// Build from configuration; `None` when no hub URL is set
    pub fn from_config(config: &DroverConfig) -> Option<Self> {
        Self::from_config_with(config, Arc::new(ReqwestTransport::new()))
    }

    pub fn from_config_with(
        config: &DroverConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Option<Self> {
        let url = config.hub.url.as_ref()?;
        let mut client = CachedClient::new(url.clone(), transport, CachePolicy::from(&config.cache));
        if let Some(token) = &config.hub.token {
            client = client.with_bearer_token(token.clone());
        }
        Some(Self::new(Arc::new(client), config.agent_id.clone()))
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn stats(&self) -> CacheStats {
        self.client.stats()
    }

    pub fn cached_client(&self) -> &Arc<CachedClient> {
        &self.client
    }

    pub async fn report_progress(&self, update: &ProgressUpdate) -> Delivery<Value> {
        let path = format!("/agents/{}/progress", self.agent_id);
        let body = json!(update);
        deliver_or_degrade("hub_progress", async {
            self.client
                .cached_request(&path, RequestOptions::post(body))
                .await
        })
        .await
    }

    pub async fn submit_report(&self, report: &CompletionReport) -> Delivery<Value> {
        let path = format!("/agents/{}/reports", self.agent_id);
        let body = json!(report);
        deliver_or_degrade("hub_report", async {
            self.client
                .cached_request(&path, RequestOptions::post(body))
                .await
        })
        .await
    }

    /// Tasks the hub offers this agent
    ///
    /// Always revalidated, so polling sees new offers immediately.
    pub async fn available_tasks(&self) -> Delivery<Vec<Task>> {
        let path = format!("/agents/{}/tasks/available", self.agent_id);
        deliver_or_degrade("hub_available_tasks", async {
            let data = self
                .client
                .cached_request(
                    &path,
                    RequestOptions {
                        ttl: Some(Duration::ZERO),
                        ..Default::default()
                    },
                )
                .await?;
            let parsed: AvailableTasks = serde_json::from_value(data)?;
            Ok::<_, DroverError>(match parsed {
                AvailableTasks::Wrapped { tasks } | AvailableTasks::Bare(tasks) => tasks,
            })
        })
        .await
    }

    pub async fn claim(&self, task_id: &str) -> Delivery<Value> {
        let path = format!("/tasks/{}/claim", task_id);
        let body = json!({ "agentId": self.agent_id });
        deliver_or_degrade("hub_claim", async {
            self.client
                .cached_request(&path, RequestOptions::post(body))
                .await
        })
        .await
    }

    /// Hand a task back to the pool
    pub async fn release(
        &self,
        task_id: &str,
        reason: Option<&str>,
        charge_attempt: bool,
    ) -> Delivery<Value> {
        let path = format!("/tasks/{}/release", task_id);
        let body = json!(ReleaseBody {
            agent_id: &self.agent_id,
            reason,
            charge_attempt,
        });
        deliver_or_degrade("hub_release", async {
            self.client
                .cached_request(&path, RequestOptions::post(body))
                .await
        })
        .await
    }
}

#[async_trait]
impl ProgressSink for HubClient {
    async fn progress(&self, update: &ProgressUpdate) -> Delivery<()> {
        match self.report_progress(update).await {
            Delivery::Delivered(_) => Delivery::Delivered(()),
            Delivery::Local { error, local } => Delivery::Local { error, local },
        }
    }

    async fn completed(&self, report: &CompletionReport) -> Delivery<()> {
        match self.submit_report(report).await {
            Delivery::Delivered(_) => Delivery::Delivered(()),
            Delivery::Local { error, local } => Delivery::Local { error, local },
        }
    }
}
