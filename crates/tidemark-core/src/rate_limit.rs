//! Sliding-window admission control for outbound calls.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Stale keys are swept once every this many checks.
const CLEANUP_INTERVAL: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Rate limit exceeded; retry in {retry_after_secs}s")]
pub struct RateLimited {
    pub retry_after_secs: u64,
}

impl From<RateLimited> for crate::remote::RemoteError {
    fn from(value: RateLimited) -> Self {
        Self::RateLimited {
            retry_after_secs: value.retry_after_secs,
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    state: Arc<Mutex<LimiterState>>,
    config: Arc<RateLimitConfig>,
    metrics: Arc<RateLimitMetrics>,
}

#[derive(Default)]
struct LimiterState {
    windows: HashMap<String, VecDeque<Instant>>,
    per_method: BTreeMap<String, MethodCounts>,
}

#[derive(Default)]
struct RateLimitMetrics {
    allowed: AtomicU64,
    limited: AtomicU64,
    checks: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MethodCounts {
    pub allowed: u64,
    pub limited: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub allowed: u64,
    pub limited: u64,
    pub per_method: BTreeMap<String, MethodCounts>,
    pub tracked_keys: usize,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(LimiterState::default())),
            config: Arc::new(config),
            metrics: Arc::new(RateLimitMetrics::default()),
        }
    }

    /// Check and record one call. The check and the record happen under one lock.
    pub async fn check(&self, method: &str, endpoint: &str) -> Result<(), RateLimited> {
        let method = method.to_ascii_uppercase();
        let limit = self.config.limit_for(&method);
        let key = format!("{method} {endpoint}");
        let now = Instant::now();

        let mut guard = self.state.lock().await;
        if self.metrics.checks.fetch_add(1, Ordering::Relaxed) % CLEANUP_INTERVAL == CLEANUP_INTERVAL - 1 {
            let horizon = self.config.longest_window();
            guard
                .windows
                .retain(|_, calls| calls.back().is_some_and(|last| now.duration_since(*last) < horizon));
        }

        let state = &mut *guard;
        let calls = state.windows.entry(key).or_default();
        while calls
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= limit.window)
        {
            calls.pop_front();
        }

        let counts = state.per_method.entry(method.clone()).or_default();
        if calls.len() >= limit.max_calls {
            let retry_after = calls
                .front()
                .map_or(limit.window, |oldest| {
                    limit.window.saturating_sub(now.duration_since(*oldest))
                });
            let retry_after_secs = retry_after.as_secs().max(1);
            counts.limited += 1;
            self.metrics.limited.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                method = %method,
                endpoint,
                retry_after_secs,
                "Rate limit exceeded"
            );
            return Err(RateLimited { retry_after_secs });
        }

        calls.push_back(now);
        counts.allowed += 1;
        self.metrics.allowed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Calls left in the current window for one endpoint.
    pub async fn remaining(&self, method: &str, endpoint: &str) -> usize {
        let method = method.to_ascii_uppercase();
        let limit = self.config.limit_for(&method);
        let key = format!("{method} {endpoint}");
        let now = Instant::now();
        let guard = self.state.lock().await;
        let used = guard.windows.get(&key).map_or(0, |calls| {
            calls
                .iter()
                .filter(|at| now.duration_since(**at) < limit.window)
                .count()
        });
        limit.max_calls.saturating_sub(used)
    }

    pub async fn metrics_snapshot(&self) -> RateLimitMetricsSnapshot {
        let guard = self.state.lock().await;
        RateLimitMetricsSnapshot {
            allowed: self.metrics.allowed.load(Ordering::Relaxed),
            limited: self.metrics.limited.load(Ordering::Relaxed),
            per_method: guard.per_method.clone(),
            tracked_keys: guard.windows.len(),
        }
    }

    /// Forget all windows. Metrics are kept.
    pub async fn reset(&self) {
        self.state.lock().await.windows.clear();
    }
}
