//! # drover-orchestrator
//!
//! Agent loop and task lifecycle for Drover.
//!
//! This crate provides:
//! - Phase state machine with budget wind-down and pause reports
//! - Prompt construction
//! - Task executor (model round trips and tool execution)
//! - Task store and the lifecycle bridge (approval, review, continuation)
//! - Worker loop with optional hub polling

mod activity;
mod bridge;
mod executor;
mod phase;
mod prompt;
mod store;

pub use activity::ActivityLogger;
pub use bridge::{BridgeStatus, Confirmation, HubBridge, ReviewReport};
pub use executor::{tool_executor_for, StopSignal, TaskExecutor};
pub use phase::{transition, Action, Budget, Event, LoopState};
pub use prompt::{build_system_prompt, build_task_message, pause_report_message, wind_down_message};
pub use store::{InMemoryTaskStore, TaskStore};
