//! # drover-server
//!
//! JSON HTTP surface for submitting, approving and reviewing Drover tasks.
//! Every endpoint has typed request and response bodies; failures come back
//! as `{error}` with 400, 404 or 409.

pub mod api;
mod error;
mod server;

pub use error::ApiError;
pub use server::{router, serve, SharedBridge};
