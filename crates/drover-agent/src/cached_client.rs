//! Cached request client with ETag revalidation and rate-limit backoff
//!
//! GET responses are cached per `METHOD::URL` with a TTL picked from the
//! request path. Expired entries are revalidated with `If-None-Match`; a 304
//! refreshes the entry in place. Rate-limit headers from every response feed
//! a shared [`RateLimitState`] consulted before each attempt.

use chrono::{DateTime, Utc};
use drover_core::config::CacheConfig;
use drover_core::{truncate_chars, DroverError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method};

/// Tuning for [`CachedClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    pub max_entries: usize,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub rate_limit_floor: u64,
    pub max_rate_limit_wait: Duration,
    pub base_backoff: Duration,
    pub tree_ttl: Duration,
    pub ref_ttl: Duration,
    pub content_ttl: Duration,
    pub default_ttl: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for CachePolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            max_entries: config.max_entries,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            max_attempts: config.max_attempts.max(1),
            rate_limit_floor: config.rate_limit_floor,
            max_rate_limit_wait: Duration::from_secs(config.max_rate_limit_wait_secs),
            base_backoff: Duration::from_millis(config.base_backoff_ms.max(1)),
            tree_ttl: Duration::from_millis(config.tree_ttl_ms),
            ref_ttl: Duration::from_millis(config.ref_ttl_ms),
            content_ttl: Duration::from_millis(config.content_ttl_ms),
            default_ttl: Duration::from_millis(config.default_ttl_ms),
        }
    }
}

impl CachePolicy {
    /// TTL for a request path, by resource shape
    pub fn ttl_for(&self, path: &str) -> Duration {
        let path = path.split('?').next().unwrap_or(path);
        if path.contains("/git/trees/") {
            self.tree_ttl
        } else if path.contains("/git/ref/") || path.contains("/git/refs/") {
            self.ref_ttl
        } else if path.contains("/contents/") {
            self.content_ttl
        } else {
            self.default_ttl
        }
    }

    /// Backoff before retry number `attempt` (1-based): `base * 2^(attempt-1)`
    /// plus jitter strictly below `base`, so successive waits strictly grow
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base_ms = (self.base_backoff.as_millis() as u64).max(1);
        let exp = base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(20));
        let jitter = rand::thread_rng().gen_range(0..base_ms);
        Duration::from_millis(exp.saturating_add(jitter))
    }
}

/// One cached GET response
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub data: Value,
    pub etag: Option<String>,
    pub cached_at: Instant,
    pub ttl: Duration,
    pub hits: u64,
    seq: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.cached_at) >= self.ttl
    }
}

/// Most recent rate-limit headers seen
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitState {
    pub remaining: Option<u64>,
    pub limit: Option<u64>,
    /// Unix seconds at which the quota resets
    pub reset_epoch: Option<u64>,
    pub last_checked: Option<DateTime<Utc>>,
}

impl RateLimitState {
    fn update_from(&mut self, response: &HttpResponse) {
        let parse = |name: &str| response.header(name).and_then(|v| v.trim().parse::<u64>().ok());
        let remaining = parse("x-ratelimit-remaining");
        let limit = parse("x-ratelimit-limit");
        let reset = parse("x-ratelimit-reset");

        if remaining.is_none() && limit.is_none() && reset.is_none() {
            return;
        }
        if remaining.is_some() {
            self.remaining = remaining;
        }
        if limit.is_some() {
            self.limit = limit;
        }
        if reset.is_some() {
            self.reset_epoch = reset;
        }
        self.last_checked = Some(Utc::now());
    }

    /// How long to wait before the next call, if quota is below `floor`
    pub fn required_wait(&self, floor: u64, max_wait: Duration, now_epoch: u64) -> Option<Duration> {
        let remaining = self.remaining?;
        let reset = self.reset_epoch?;
        if remaining >= floor || reset <= now_epoch {
            return None;
        }
        Some(Duration::from_secs(reset - now_epoch).min(max_wait))
    }
}

/// Counters exposed on the status surface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub revalidations: u64,
    pub evictions: u64,
    pub retry_waits: u64,
    pub rate_limit_waits: u64,
    pub rate_limit: RateLimitState,
}

/// Per-call options
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Option<Method>,
    pub body: Option<Value>,
    pub headers: Vec<(String, String)>,
    pub ttl: Option<Duration>,
}

impl RequestOptions {
    pub fn post(body: Value) -> Self {
        Self {
            method: Some(Method::Post),
            body: Some(body),
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
struct CacheMap {
    entries: HashMap<String, CacheEntry>,
    next_seq: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    revalidations: AtomicU64,
    evictions: AtomicU64,
    retry_waits: AtomicU64,
    rate_limit_waits: AtomicU64,
}

/// HTTP client with TTL caching, conditional requests and rate-limit backoff
pub struct CachedClient {
    base_url: String,
    default_headers: Vec<(String, String)>,
    transport: Arc<dyn HttpTransport>,
    policy: CachePolicy,
    cache: Mutex<CacheMap>,
    rate_limit: Mutex<RateLimitState>,
    counters: Counters,
}

impl std::fmt::Debug for CachedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedClient")
            .field("base_url", &self.base_url)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

// A poisoned lock only means another request panicked mid-update; the map
// itself is still usable.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now_epoch() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

fn is_rate_limit_response(response: &HttpResponse) -> bool {
    if response.status != 403 && response.status != 429 {
        return false;
    }
    if response.status == 429 {
        return true;
    }
    let body = response.body.to_lowercase();
    body.contains("rate limit")
        || body.contains("rate-limit")
        || body.contains("ratelimit")
        || response.header("x-ratelimit-remaining") == Some("0")
}

impl CachedClient {
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn HttpTransport>,
        policy: CachePolicy,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_headers: Vec::new(),
            transport,
            policy,
            cache: Mutex::new(CacheMap::default()),
            rate_limit: Mutex::new(RateLimitState::default()),
            counters: Counters::default(),
        }
    }

    /// Send `Authorization: Bearer <token>` with every request
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.default_headers
            .push(("authorization".to_string(), format!("Bearer {}", token.into())));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.push((name.into(), value.into()));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Cache key for a request
    pub fn cache_key(&self, method: Method, path: &str) -> String {
        format!("{}::{}", method, self.url_for(path))
    }

    /// Snapshot of a cache entry
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        lock(&self.cache).entries.get(key).cloned()
    }

    pub fn rate_limit_state(&self) -> RateLimitState {
        lock(&self.rate_limit).clone()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: lock(&self.cache).entries.len(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            revalidations: self.counters.revalidations.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            retry_waits: self.counters.retry_waits.load(Ordering::Relaxed),
            rate_limit_waits: self.counters.rate_limit_waits.load(Ordering::Relaxed),
            rate_limit: self.rate_limit_state(),
        }
    }

    pub fn clear(&self) {
        lock(&self.cache).entries.clear();
    }

    /// Request `path`, serving fresh GETs from cache
    pub async fn cached_request(&self, path: &str, options: RequestOptions) -> Result<Value> {
        let method = options.method.unwrap_or(Method::Get);
        let url = self.url_for(path);
        let key = format!("{}::{}", method, url);
        let is_get = method == Method::Get;

        let mut etag = None;
        if is_get {
            let mut cache = lock(&self.cache);
            if let Some(entry) = cache.entries.get_mut(&key) {
                if !entry.is_expired(Instant::now()) {
                    entry.hits += 1;
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    debug!("Cache hit: {}", key);
                    return Ok(entry.data.clone());
                }
                etag = entry.etag.clone();
            }
        }

        let mut request = HttpRequest::new(method, url);
        request.headers.extend(self.default_headers.iter().cloned());
        request.headers.extend(options.headers);
        request.body = options.body;
        if let Some(tag) = &etag {
            request = request.header("if-none-match", tag.clone());
        }

        let response = self.send_with_retry(request).await?;

        if response.status == 304 && is_get {
            let mut cache = lock(&self.cache);
            if let Some(entry) = cache.entries.get_mut(&key) {
                entry.cached_at = Instant::now();
                entry.hits += 1;
                self.counters.revalidations.fetch_add(1, Ordering::Relaxed);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Revalidated: {}", key);
                return Ok(entry.data.clone());
            }
            return Err(DroverError::Http {
                status: 304,
                body: "not modified, but no cached entry to serve".to_string(),
            });
        }

        let data = if response.body.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&response.body)?
        };

        if is_get {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            let ttl = options.ttl.unwrap_or_else(|| self.policy.ttl_for(path));
            self.insert(key, data.clone(), response.header("etag").map(str::to_string), ttl);
        }

        Ok(data)
    }

    fn insert(&self, key: String, data: Value, etag: Option<String>, ttl: Duration) {
        let mut cache = lock(&self.cache);
        let seq = cache.next_seq;
        cache.next_seq += 1;
        cache.entries.insert(
            key,
            CacheEntry {
                data,
                etag,
                cached_at: Instant::now(),
                ttl,
                hits: 0,
                seq,
            },
        );

        if cache.entries.len() > self.policy.max_entries {
            let evicted = Self::sweep_locked(&mut cache, self.policy.max_entries);
            self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    // Expired entries go first, then the oldest by (cached_at, seq)
    fn sweep_locked(cache: &mut CacheMap, max_entries: usize) -> u64 {
        let now = Instant::now();
        let before = cache.entries.len();
        cache.entries.retain(|_, e| !e.is_expired(now));

        if cache.entries.len() > max_entries {
            let mut by_age: Vec<(Instant, u64, String)> = cache
                .entries
                .iter()
                .map(|(k, e)| (e.cached_at, e.seq, k.clone()))
                .collect();
            by_age.sort();
            let excess = cache.entries.len() - max_entries;
            for (_, _, key) in by_age.into_iter().take(excess) {
                cache.entries.remove(&key);
            }
        }

        (before - cache.entries.len()) as u64
    }

    /// Drop expired entries and enforce the cap; returns the number removed
    pub fn sweep(&self) -> u64 {
        let evicted = Self::sweep_locked(&mut lock(&self.cache), self.policy.max_entries);
        if evicted > 0 {
            self.counters.evictions.fetch_add(evicted, Ordering::Relaxed);
            debug!("Cache sweep removed {} entries", evicted);
        }
        evicted
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the handle is aborted
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                client.sweep();
            }
        })
    }

    async fn wait_for_rate_limit(&self) {
        let wait = lock(&self.rate_limit).required_wait(
            self.policy.rate_limit_floor,
            self.policy.max_rate_limit_wait,
            now_epoch(),
        );
        if let Some(wait) = wait {
            self.counters.rate_limit_waits.fetch_add(1, Ordering::Relaxed);
            warn!("Rate limit nearly exhausted, waiting {:?} for reset", wait);
            tokio::time::sleep(wait).await;
        }
    }

    async fn send_with_retry(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.wait_for_rate_limit().await;

            let response = tokio::time::timeout(
                self.policy.request_timeout,
                self.transport.send(request.clone()),
            )
            .await
            .map_err(|_| {
                DroverError::Network(format!(
                    "{} {} timed out after {:?}",
                    request.method, request.url, self.policy.request_timeout
                ))
            })??;

            lock(&self.rate_limit).update_from(&response);

            if is_rate_limit_response(&response) {
                let last_error = format!(
                    "HTTP {}: {}",
                    response.status,
                    truncate_chars(response.body.trim(), 200)
                );
                if attempt >= self.policy.max_attempts {
                    return Err(DroverError::RateLimited {
                        attempts: attempt,
                        last_error,
                    });
                }

                let delay = self.policy.backoff_delay(attempt);
                self.counters.retry_waits.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Rate limited on {} (attempt {}/{}), backing off {:?}",
                    request.url, attempt, self.policy.max_attempts, delay
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if response.is_success() || response.status == 304 {
                return Ok(response);
            }

            return Err(DroverError::Http {
                status: response.status,
                body: truncate_chars(response.body.trim(), 500),
            });
        }
    }

    /// Resolve a branch to its commit sha
    pub async fn resolve_ref(&self, repo: &str, branch: &str) -> Result<String> {
        let data = self
            .cached_request(
                &format!("/repos/{}/git/ref/heads/{}", repo, branch),
                RequestOptions::default(),
            )
            .await?;
        string_at(&data, &["object", "sha"], "ref object sha")
    }

    /// Resolve a commit to its tree sha
    pub async fn resolve_commit_tree(&self, repo: &str, commit_sha: &str) -> Result<String> {
        let data = self
            .cached_request(
                &format!("/repos/{}/git/commits/{}", repo, commit_sha),
                RequestOptions::default(),
            )
            .await?;
        string_at(&data, &["tree", "sha"], "commit tree sha")
    }

    pub async fn fetch_tree(&self, repo: &str, tree_sha: &str, recursive: bool) -> Result<Value> {
        let mut path = format!("/repos/{}/git/trees/{}", repo, tree_sha);
        if recursive {
            path.push_str("?recursive=1");
        }
        self.cached_request(&path, RequestOptions::default()).await
    }

    /// ref → commit → tree for a branch
    pub async fn fetch_branch_tree(&self, repo: &str, branch: &str) -> Result<Value> {
        let commit = self.resolve_ref(repo, branch).await?;
        let tree = self.resolve_commit_tree(repo, &commit).await?;
        self.fetch_tree(repo, &tree, true).await
    }
}

fn string_at(data: &Value, path: &[&str], what: &str) -> Result<String> {
    let mut cursor = data;
    for segment in path {
        cursor = &cursor[*segment];
    }
    cursor
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| DroverError::Other(format!("Response is missing {}", what)))
}
