//! # drover-core
//!
//! Core types for the Drover autonomous task executor.
//!
//! Drover takes a task description, drives a tool-use conversation with a
//! language model inside a sandboxed project directory, and produces a
//! structured completion (or pause) report.
//!
//! ## Contents
//!
//! - Unified error type ([`DroverError`]) and [`Result`] alias
//! - One immutable [`DroverConfig`] built at startup, plus the runtime-tunable
//!   [`RuntimeSettings`] subset
//! - Task, report and lifecycle data model
//! - [`degrade`] helpers for calls that must fail open

pub mod config;
pub mod degrade;
mod error;
mod types;

pub use config::{ConfigUpdate, DroverConfig, OperatingMode, RuntimeSettings};
pub use degrade::Delivery;
pub use error::{DroverError, Result};
pub use types::*;
