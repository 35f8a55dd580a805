//! # drover-agent
//!
//! Everything the agent loop touches outside its own state:
//!
//! - [`PathSandbox`] and [`CommandPolicy`] guarding the project directory
//! - The six tools ([`ToolCall`], [`ToolExecutor`]) and their schemas
//! - The conversation model and [`ModelProvider`] seam, with an Anthropic
//!   implementation
//! - [`CachedClient`], an HTTP client with TTL caching, ETag revalidation
//!   and rate-limit backoff
//! - [`HubClient`], the coordinator protocol built on it

pub mod anthropic;
pub mod cached_client;
mod exports;
pub mod hub;
pub mod provider;
pub mod sandbox;
pub mod schema;
pub mod tools;
pub mod transport;

pub use anthropic::AnthropicProvider;
pub use cached_client::{CacheEntry, CachePolicy, CacheStats, CachedClient, RateLimitState, RequestOptions};
pub use hub::{HubClient, NullSink, ProgressSink};
pub use provider::{ContentBlock, Message, ModelProvider, ModelRequest, ModelResponse, Role, ToolUse, Usage};
pub use sandbox::{CommandPolicy, PathSandbox, SandboxError};
pub use schema::{tool_definitions, ToolDefinition};
pub use tools::{
    is_verification_command, result_to_json, SearchMatch, ToolCall, ToolError, ToolExecutor,
    ToolLimits, ToolOutput,
};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, Method, ReqwestTransport};
