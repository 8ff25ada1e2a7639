//! Scope-keyed token cache with TTL and background pruning.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// TTL applied when the token endpoint omits `expires_in`.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(300);

/// How often the background pruner evicts expired tokens.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

/// Cache key: case-folded service plus the sorted scope set.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TokenKey {
    service: String,
    scope: String,
}

impl TokenKey {
    /// Normalize a `(service, scopes)` pair into a cache key.
    pub fn new(service: Option<&str>, scopes: &[String]) -> Self {
        let mut sorted = scopes.to_vec();
        sorted.sort();
        Self {
            service: service.unwrap_or("").trim().to_ascii_lowercase(),
            scope: sorted.join(" "),
        }
    }
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Shared token cache. Two concurrent misses for the same key may both
/// fetch; both writes are permitted and the later one wins.
#[derive(Default)]
pub struct TokenCache {
    entries: RwLock<HashMap<TokenKey, CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an unexpired token.
    pub fn get(&self, key: &TokenKey) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(key)
            .filter(|token| token.expires_at > Instant::now())
            .map(|token| token.value.clone())
    }

    /// Store a token with the given TTL.
    pub fn insert(&self, key: TokenKey, value: String, ttl: Duration) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key,
            CachedToken {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Evict every expired entry, returning how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, token| token.expires_at > now);
        before - entries.len()
    }

    /// Number of entries, expired or not. Mostly useful in tests.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawn the background eviction task. The task wakes every `interval`
/// and stops when `shutdown` is cancelled; cancellation is idempotent.
pub fn spawn_pruner(
    cache: std::sync::Arc<TokenCache>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let pruned = cache.prune_expired();
                    if pruned > 0 {
                        tracing::debug!(pruned, "expired upstream tokens evicted");
                    }
                }
            }
        }
    })
}
