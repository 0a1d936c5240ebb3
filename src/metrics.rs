// Transport counters
// Diagnostic only: nothing here feeds back into request handling

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Latency ring buffer capacity
const LATENCY_CAPACITY: usize = 1024;

/// Rate-limit headers from the most recent successful response
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStatus {
    pub limit: u64,
    pub remaining: u64,
    pub reset: i64,
    pub observed_at: DateTime<Utc>,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub total_errors: u64,
    pub renewals_succeeded: u64,
    pub renewals_failed: u64,
    pub auth_replays: u64,
    pub rate_limited_replays: u64,
    pub errors_by_type: Vec<(String, u64)>,
    pub latency_p50_ms: f64,
    pub latency_p95_ms: f64,
    pub last_rate_limit: Option<RateLimitStatus>,
}

pub struct TransportMetrics {
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    renewals_succeeded: AtomicU64,
    renewals_failed: AtomicU64,
    auth_replays: AtomicU64,
    rate_limited_replays: AtomicU64,
    errors_by_type: DashMap<String, AtomicU64>,
    latency_samples: Mutex<VecDeque<f64>>,
    last_rate_limit: Mutex<Option<RateLimitStatus>>,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            renewals_succeeded: AtomicU64::new(0),
            renewals_failed: AtomicU64::new(0),
            auth_replays: AtomicU64::new(0),
            rate_limited_replays: AtomicU64::new(0),
            errors_by_type: DashMap::new(),
            latency_samples: Mutex::new(VecDeque::with_capacity(LATENCY_CAPACITY)),
            last_rate_limit: Mutex::new(None),
        }
    }

    /// Record one attempt on the wire (replays count separately)
    pub fn record_request(&self, latency_ms: f64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut samples) = self.latency_samples.lock() {
            if samples.len() >= LATENCY_CAPACITY {
                samples.pop_front();
            }
            samples.push_back(latency_ms);
        }
    }

    pub fn record_error(&self, error_type: &str) {
        self.total_errors.fetch_add(1, Ordering::Relaxed);

        self.errors_by_type
            .entry(error_type.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_renewal(&self, success: bool) {
        if success {
            self.renewals_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.renewals_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_auth_replay(&self) {
        self.auth_replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited_replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit_status(&self, limit: u64, remaining: u64, reset: i64) {
        if let Ok(mut last) = self.last_rate_limit.lock() {
            *last = Some(RateLimitStatus {
                limit,
                remaining,
                reset,
                observed_at: Utc::now(),
            });
        }
    }

    /// Number of renewal calls made, successful or not
    pub fn renewals(&self) -> u64 {
        self.renewals_succeeded.load(Ordering::Relaxed) + self.renewals_failed.load(Ordering::Relaxed)
    }

    pub fn last_rate_limit(&self) -> Option<RateLimitStatus> {
        self.last_rate_limit.lock().ok().and_then(|last| last.clone())
    }

    /// Latency percentiles (p50, p95)
    pub fn latency_percentiles(&self) -> (f64, f64) {
        let samples = match self.latency_samples.lock() {
            Ok(s) => s,
            Err(_) => return (0.0, 0.0),
        };

        if samples.is_empty() {
            return (0.0, 0.0);
        }

        let mut latencies: Vec<f64> = samples.iter().copied().collect();
        latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let len = latencies.len();
        let p50 = latencies[((len as f64 * 0.50) as usize).min(len - 1)];
        let p95 = latencies[((len as f64 * 0.95) as usize).min(len - 1)];
        (p50, p95)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut errors_by_type: Vec<(String, u64)> = self
            .errors_by_type
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();
        errors_by_type.sort();

        let (latency_p50_ms, latency_p95_ms) = self.latency_percentiles();

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            renewals_succeeded: self.renewals_succeeded.load(Ordering::Relaxed),
            renewals_failed: self.renewals_failed.load(Ordering::Relaxed),
            auth_replays: self.auth_replays.load(Ordering::Relaxed),
            rate_limited_replays: self.rate_limited_replays.load(Ordering::Relaxed),
            errors_by_type,
            latency_p50_ms,
            latency_p95_ms,
            last_rate_limit: self.last_rate_limit(),
        }
    }
}

impl Default for TransportMetrics {
    fn default() -> Self {
        Self::new()
    }
}
