//! Configuration management for Drover
//!
//! One immutable [`DroverConfig`] is built at startup from, in increasing
//! precedence: built-in defaults, `.drover/config.toml` in the project root,
//! and `DROVER_*` environment variables. It is passed down explicitly.
//!
//! The handful of knobs that may change while the process runs live in
//! [`RuntimeSettings`], updated only through a validated [`ConfigUpdate`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{DroverError, Result};

/// Upper bound accepted for `max_iterations` updates
pub const MAX_ITERATION_CEILING: usize = 200;
/// Upper bound accepted for `max_file_bytes` updates (10 MiB)
pub const MAX_FILE_BYTES_CEILING: u64 = 10 * 1024 * 1024;
/// Upper bound accepted for `command_timeout_secs` updates
pub const MAX_COMMAND_TIMEOUT_SECS: u64 = 600;

/// Whether submitted tasks need a human approval before running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    Auto,
    #[default]
    Semi,
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatingMode::Auto => write!(f, "auto"),
            OperatingMode::Semi => write!(f, "semi"),
        }
    }
}

impl std::str::FromStr for OperatingMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(OperatingMode::Auto),
            "semi" => Ok(OperatingMode::Semi),
            _ => Err(format!("Invalid mode: {}. Use auto or semi.", s)),
        }
    }
}

/// Process-wide Drover configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DroverConfig {
    /// Directory every tool is sandboxed to
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,

    /// Identity used with the coordinating hub
    #[serde(default = "default_agent_id")]
    pub agent_id: String,

    #[serde(default)]
    pub mode: OperatingMode,

    /// Model identifier sent to the provider
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Maximum simultaneously running tasks
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Completion reports kept in the history ring
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Finished (completed or rejected) task records kept in the store
    #[serde(default = "default_retained_tasks")]
    pub retained_tasks: usize,

    /// Optional project-context document injected into every task
    #[serde(default)]
    pub context_file: Option<PathBuf>,

    #[serde(default = "default_context_char_budget")]
    pub context_char_budget: usize,

    /// Write `.drover/activity.md`
    #[serde(default)]
    pub activity_log: bool,

    /// Browser origins allowed to call the HTTP API; none by default
    #[serde(default)]
    pub cors_origins: Vec<String>,

    #[serde(default)]
    pub budget: LoopBudget,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub hub: HubConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

/// Iteration budget for the agent loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopBudget {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Rounds before the ceiling at which the model is told to wrap up
    #[serde(default = "default_wind_down_buffer")]
    pub wind_down_buffer: usize,

    /// Rounds suggested for reading before writing
    #[serde(default = "default_exploration_rounds")]
    pub exploration_rounds: usize,

    /// Emit a progress notification every N rounds (and always on round 1)
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
}

/// Tool sandbox limits and lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default = "default_blocked_paths")]
    pub blocked_paths: Vec<String>,

    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,

    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    #[serde(default = "default_max_search_matches")]
    pub max_search_matches: usize,
}

/// Coordinating hub connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default)]
    pub token: Option<String>,

    /// Seconds between claim polls; 0 disables polling
    #[serde(default)]
    pub poll_interval_secs: u64,
}

/// Cached request client tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Remaining quota below which calls wait for the reset
    #[serde(default = "default_rate_limit_floor")]
    pub rate_limit_floor: u64,

    #[serde(default = "default_max_rate_limit_wait_secs")]
    pub max_rate_limit_wait_secs: u64,

    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    #[serde(default = "default_tree_ttl_ms")]
    pub tree_ttl_ms: u64,

    #[serde(default = "default_ref_ttl_ms")]
    pub ref_ttl_ms: u64,

    #[serde(default = "default_content_ttl_ms")]
    pub content_ttl_ms: u64,

    #[serde(default = "default_default_ttl_ms")]
    pub default_ttl_ms: u64,
}

// Default value providers
fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_agent_id() -> String {
    "drover".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_max_tokens() -> usize {
    8192
}

fn default_concurrency() -> usize {
    1
}

fn default_history_limit() -> usize {
    20
}

fn default_retained_tasks() -> usize {
    200
}

fn default_context_char_budget() -> usize {
    4000
}

fn default_max_iterations() -> usize {
    30
}

fn default_wind_down_buffer() -> usize {
    3
}

fn default_exploration_rounds() -> usize {
    3
}

fn default_progress_every() -> usize {
    5
}

fn default_blocked_paths() -> Vec<String> {
    [
        ".git",
        ".jj",
        ".hg",
        "node_modules",
        "target",
        ".env",
        ".env.local",
        ".secrets",
        "Cargo.lock",
        "package-lock.json",
        "yarn.lock",
        "pnpm-lock.yaml",
        ".drover",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_allowed_commands() -> Vec<String> {
    [
        "cargo test",
        "cargo check",
        "cargo build",
        "cargo clippy",
        "cargo fmt",
        "npm test",
        "npm run lint",
        "npm run build",
        "npm run typecheck",
        "npx tsc",
        "npx eslint",
        "npx vitest",
        "pytest",
        "ruff",
        "mypy",
        "go test",
        "go build",
        "go vet",
        "make test",
        "ls",
        "cat",
        "head",
        "tail",
        "wc",
        "grep",
        "find",
        "pwd",
        "git status",
        "git diff",
        "git log",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_bytes() -> u64 {
    512 * 1024
}

fn default_command_timeout_secs() -> u64 {
    120
}

fn default_max_output_bytes() -> usize {
    20_000
}

fn default_max_search_matches() -> usize {
    50
}

fn default_cache_max_entries() -> usize {
    500
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_max_attempts() -> u32 {
    3
}

fn default_rate_limit_floor() -> u64 {
    10
}

fn default_max_rate_limit_wait_secs() -> u64 {
    60
}

fn default_base_backoff_ms() -> u64 {
    1000
}

fn default_tree_ttl_ms() -> u64 {
    10 * 60 * 1000
}

fn default_ref_ttl_ms() -> u64 {
    30 * 1000
}

fn default_content_ttl_ms() -> u64 {
    5 * 60 * 1000
}

fn default_default_ttl_ms() -> u64 {
    60 * 1000
}

impl DroverConfig {
    /// Load `.drover/config.toml` (if present) and apply `DROVER_*` overrides
    pub fn load(project_root: &Path) -> Result<Self> {
        let mut config = Self::load_file_or_default(project_root)?;
        config.project_root = project_root.to_path_buf();
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load the config file only, without environment overrides
    pub fn load_file_or_default(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".drover/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)
                .map_err(|e| DroverError::Config(format!("Failed to parse config file: {}", e)))
        } else {
            Ok(Self::default())
        }
    }

    /// Write the default configuration to `.drover/config.toml`
    pub fn write_default(project_root: &Path) -> Result<()> {
        let config_dir = project_root.join(".drover");
        std::fs::create_dir_all(&config_dir)?;

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| DroverError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(config_dir.join("config.toml"), content)?;
        Ok(())
    }

    /// Apply environment overrides through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(root) = get("DROVER_PROJECT_ROOT") {
            self.project_root = PathBuf::from(root);
        }
        if let Some(v) = get("DROVER_MAX_ITERATIONS") {
            self.budget.max_iterations = parse_env("DROVER_MAX_ITERATIONS", &v)?;
        }
        if let Some(v) = get("DROVER_WIND_DOWN") {
            self.budget.wind_down_buffer = parse_env("DROVER_WIND_DOWN", &v)?;
        }
        if let Some(v) = get("DROVER_PROGRESS_EVERY") {
            self.budget.progress_every = parse_env("DROVER_PROGRESS_EVERY", &v)?;
        }
        if let Some(v) = get("DROVER_MODE") {
            self.mode = v.parse().map_err(DroverError::Config)?;
        }
        if let Some(v) = get("DROVER_MODEL") {
            self.model = v.trim().to_string();
        }
        if let Some(v) = get("DROVER_MAX_TOKENS") {
            self.max_tokens = parse_env("DROVER_MAX_TOKENS", &v)?;
        }
        if let Some(v) = get("DROVER_CONCURRENCY") {
            self.concurrency = parse_env("DROVER_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("DROVER_AGENT_ID") {
            self.agent_id = v.trim().to_string();
        }
        if let Some(v) = get("DROVER_HUB_URL") {
            self.hub.url = Some(v.trim().trim_end_matches('/').to_string());
        }
        if let Some(v) = get("DROVER_HUB_TOKEN") {
            self.hub.token = Some(v);
        }
        if let Some(v) = get("DROVER_CONTEXT_FILE") {
            self.context_file = Some(PathBuf::from(v));
        }

        Ok(())
    }

    /// Copy safe to print: secrets replaced with a placeholder
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.hub.token.is_some() {
            copy.hub.token = Some("<redacted>".to_string());
        }
        copy
    }

    /// Reject configurations the loop cannot honor
    pub fn validate(&self) -> Result<()> {
        if self.budget.max_iterations == 0 {
            return Err(DroverError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.budget.wind_down_buffer >= self.budget.max_iterations {
            return Err(DroverError::Config(format!(
                "wind_down_buffer ({}) must be below max_iterations ({})",
                self.budget.wind_down_buffer, self.budget.max_iterations
            )));
        }
        if self.concurrency == 0 {
            return Err(DroverError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Read the project-context document, truncated to the character budget
    pub fn load_project_context(&self) -> Option<String> {
        let path = self.context_file.as_ref()?;
        let path = if path.is_absolute() {
            path.clone()
        } else {
            self.project_root.join(path)
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content.chars().take(self.context_char_budget).collect()),
            Err(e) => {
                tracing::warn!("Could not read context file {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn hub_enabled(&self) -> bool {
        self.hub.url.is_some()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| DroverError::Config(format!("{} has invalid value: {}", key, value)))
}

impl Default for DroverConfig {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            agent_id: default_agent_id(),
            mode: OperatingMode::default(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            concurrency: default_concurrency(),
            history_limit: default_history_limit(),
            retained_tasks: default_retained_tasks(),
            context_file: None,
            context_char_budget: default_context_char_budget(),
            activity_log: false,
            cors_origins: Vec::new(),
            budget: LoopBudget::default(),
            sandbox: SandboxConfig::default(),
            hub: HubConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for LoopBudget {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            wind_down_buffer: default_wind_down_buffer(),
            exploration_rounds: default_exploration_rounds(),
            progress_every: default_progress_every(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            blocked_paths: default_blocked_paths(),
            allowed_commands: default_allowed_commands(),
            max_file_bytes: default_max_file_bytes(),
            command_timeout_secs: default_command_timeout_secs(),
            max_output_bytes: default_max_output_bytes(),
            max_search_matches: default_max_search_matches(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_max_entries(),
            request_timeout_secs: default_request_timeout_secs(),
            max_attempts: default_max_attempts(),
            rate_limit_floor: default_rate_limit_floor(),
            max_rate_limit_wait_secs: default_max_rate_limit_wait_secs(),
            base_backoff_ms: default_base_backoff_ms(),
            tree_ttl_ms: default_tree_ttl_ms(),
            ref_ttl_ms: default_ref_ttl_ms(),
            content_ttl_ms: default_content_ttl_ms(),
            default_ttl_ms: default_default_ttl_ms(),
        }
    }
}

/// Knobs that can change while the process runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSettings {
    pub max_iterations: usize,
    pub wind_down_buffer: usize,
    pub max_file_bytes: u64,
    pub command_timeout_secs: u64,
    pub additional_allowed_commands: Vec<String>,
    pub additional_blocked_paths: Vec<String>,
}

impl From<&DroverConfig> for RuntimeSettings {
    fn from(config: &DroverConfig) -> Self {
        Self {
            max_iterations: config.budget.max_iterations,
            wind_down_buffer: config.budget.wind_down_buffer,
            max_file_bytes: config.sandbox.max_file_bytes,
            command_timeout_secs: config.sandbox.command_timeout_secs,
            additional_allowed_commands: Vec::new(),
            additional_blocked_paths: Vec::new(),
        }
    }
}

/// Partial update to [`RuntimeSettings`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    #[serde(default)]
    pub max_iterations: Option<usize>,
    #[serde(default)]
    pub wind_down_buffer: Option<usize>,
    #[serde(default)]
    pub max_file_bytes: Option<u64>,
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    #[serde(default)]
    pub additional_allowed_commands: Option<Vec<String>>,
    #[serde(default)]
    pub additional_blocked_paths: Option<Vec<String>>,
}

impl RuntimeSettings {
    /// Apply an update atomically: either every field is accepted or none is
    pub fn apply(&self, update: ConfigUpdate) -> Result<RuntimeSettings> {
        let mut next = self.clone();

        if let Some(max) = update.max_iterations {
            if max == 0 || max > MAX_ITERATION_CEILING {
                return Err(DroverError::InvalidRequest(format!(
                    "maxIterations must be between 1 and {}",
                    MAX_ITERATION_CEILING
                )));
            }
            next.max_iterations = max;
        }
        match update.wind_down_buffer {
            Some(buffer) => next.wind_down_buffer = buffer,
            // Lowering only the ceiling pulls the buffer down with it
            None if update.max_iterations.is_some() => {
                next.wind_down_buffer = next.wind_down_buffer.min(next.max_iterations - 1);
            }
            None => {}
        }
        if next.wind_down_buffer >= next.max_iterations {
            return Err(DroverError::InvalidRequest(format!(
                "windDownBuffer ({}) must be below maxIterations ({})",
                next.wind_down_buffer, next.max_iterations
            )));
        }
        if let Some(bytes) = update.max_file_bytes {
            if bytes == 0 || bytes > MAX_FILE_BYTES_CEILING {
                return Err(DroverError::InvalidRequest(format!(
                    "maxFileBytes must be between 1 and {}",
                    MAX_FILE_BYTES_CEILING
                )));
            }
            next.max_file_bytes = bytes;
        }
        if let Some(secs) = update.command_timeout_secs {
            if secs == 0 || secs > MAX_COMMAND_TIMEOUT_SECS {
                return Err(DroverError::InvalidRequest(format!(
                    "commandTimeoutSecs must be between 1 and {}",
                    MAX_COMMAND_TIMEOUT_SECS
                )));
            }
            next.command_timeout_secs = secs;
        }
        if let Some(commands) = update.additional_allowed_commands {
            next.additional_allowed_commands = clean_list(commands);
        }
        if let Some(paths) = update.additional_blocked_paths {
            next.additional_blocked_paths = clean_list(paths);
        }

        Ok(next)
    }
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_redacted_hides_hub_token() {
        let mut config = DroverConfig::default();
        assert!(config.redacted().hub.token.is_none());

        config.hub.url = Some("https://hub.example".into());
        config.hub.token = Some("s3cret-token".into());
        let shown = config.redacted();
        assert_eq!(shown.hub.token.as_deref(), Some("<redacted>"));
        assert_eq!(shown.hub.url, config.hub.url);

        let rendered = toml::to_string_pretty(&shown).unwrap();
        assert!(!rendered.contains("s3cret-token"));
        assert_eq!(config.hub.token.as_deref(), Some("s3cret-token"));
    }

    #[test]
    fn test_defaults() {
        let config = DroverConfig::default();
        assert_eq!(config.budget.max_iterations, 30);
        assert_eq!(config.budget.wind_down_buffer, 3);
        assert_eq!(config.mode, OperatingMode::Semi);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.cache.max_entries, 500);
        assert!(config.sandbox.blocked_paths.contains(&"node_modules".to_string()));
        assert!(config.sandbox.blocked_paths.contains(&".drover".to_string()));
        assert!(config.sandbox.allowed_commands.contains(&"cargo test".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            ("DROVER_MAX_ITERATIONS", "12"),
            ("DROVER_WIND_DOWN", "2"),
            ("DROVER_MODE", "AUTO"),
            ("DROVER_MODEL", "claude-haiku"),
            ("DROVER_HUB_URL", "https://hub.example.com/"),
        ]);
        let mut config = DroverConfig::default();
        config.apply_env(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(config.budget.max_iterations, 12);
        assert_eq!(config.budget.wind_down_buffer, 2);
        assert_eq!(config.mode, OperatingMode::Auto);
        assert_eq!(config.model, "claude-haiku");
        assert_eq!(config.hub.url.as_deref(), Some("https://hub.example.com"));
        assert!(config.hub_enabled());
    }

    #[test]
    fn test_env_invalid_number_is_error() {
        let vars = env(&[("DROVER_MAX_ITERATIONS", "lots")]);
        let mut config = DroverConfig::default();
        let err = config.apply_env(|k| vars.get(k).cloned()).unwrap_err();
        assert!(err.to_string().contains("DROVER_MAX_ITERATIONS"));
    }

    #[test]
    fn test_validate_rejects_buffer_at_ceiling() {
        let mut config = DroverConfig::default();
        config.budget.max_iterations = 3;
        config.budget.wind_down_buffer = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join(".drover")).unwrap();
        std::fs::write(
            dir.path().join(".drover/config.toml"),
            "mode = \"auto\"\n[budget]\nmax_iterations = 8\n",
        )
        .unwrap();

        let config = DroverConfig::load_file_or_default(dir.path()).unwrap();
        assert_eq!(config.mode, OperatingMode::Auto);
        assert_eq!(config.budget.max_iterations, 8);
        assert_eq!(config.budget.wind_down_buffer, 3);
    }

    #[test]
    fn test_write_default_round_trips() {
        let dir = TempDir::new().unwrap();
        DroverConfig::write_default(dir.path()).unwrap();
        let config = DroverConfig::load_file_or_default(dir.path()).unwrap();
        assert_eq!(config.sandbox, SandboxConfig::default());
    }

    #[test]
    fn test_project_context_truncated() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("CONTEXT.md"), "a".repeat(10_000)).unwrap();

        let config = DroverConfig {
            project_root: dir.path().to_path_buf(),
            context_file: Some(PathBuf::from("CONTEXT.md")),
            ..Default::default()
        };
        let context = config.load_project_context().unwrap();
        assert_eq!(context.chars().count(), 4000);
    }

    #[test]
    fn test_runtime_settings_update() {
        let settings = RuntimeSettings::from(&DroverConfig::default());
        let next = settings
            .apply(ConfigUpdate {
                max_iterations: Some(10),
                wind_down_buffer: Some(2),
                additional_allowed_commands: Some(vec![" just test ".into(), "".into()]),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(next.max_iterations, 10);
        assert_eq!(next.wind_down_buffer, 2);
        assert_eq!(next.additional_allowed_commands, vec!["just test".to_string()]);
    }

    #[test]
    fn test_lowering_ceiling_alone_clamps_buffer() {
        let settings = RuntimeSettings::from(&DroverConfig::default());
        assert_eq!(settings.wind_down_buffer, 3);

        let next = settings
            .apply(ConfigUpdate {
                max_iterations: Some(3),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(next.max_iterations, 3);
        assert_eq!(next.wind_down_buffer, 2);

        let single = settings
            .apply(ConfigUpdate {
                max_iterations: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(single.wind_down_buffer, 0);

        // A larger ceiling leaves the buffer alone
        let wider = settings
            .apply(ConfigUpdate {
                max_iterations: Some(50),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(wider.wind_down_buffer, 3);
    }

    #[test]
    fn test_runtime_settings_rejects_invalid_update() {
        let settings = RuntimeSettings::from(&DroverConfig::default());
        assert!(settings
            .apply(ConfigUpdate {
                max_iterations: Some(0),
                ..Default::default()
            })
            .is_err());
        assert!(settings
            .apply(ConfigUpdate {
                max_iterations: Some(4),
                wind_down_buffer: Some(4),
                ..Default::default()
            })
            .is_err());
        assert!(settings
            .apply(ConfigUpdate {
                command_timeout_secs: Some(MAX_COMMAND_TIMEOUT_SECS + 1),
                ..Default::default()
            })
            .is_err());
    }
}
