//! Per-provider health tracking
//!
//! Health is derived from a rolling window of recent invocation outcomes.
//! The healthy flag is recomputed on every observation and stored in an
//! atomic, so readers never take a lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Number of recent observations considered for the error rate
const OBSERVATION_WINDOW: usize = 20;

/// Error rate above which a provider is marked unhealthy
const ERROR_RATE_THRESHOLD: f64 = 0.5;

/// Smoothing factor for the latency EWMA
const LATENCY_EWMA_ALPHA: f64 = 0.2;

/// Point-in-time provider status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub name: String,
    pub healthy: bool,
    pub weight: f64,
    pub request_count: u64,
    pub error_count: u64,
    pub avg_latency_ms: f64,
    pub last_used: Option<DateTime<Utc>>,
}

/// Rolling health state for one provider
pub(crate) struct HealthTracker {
    window: Mutex<VecDeque<bool>>,
    healthy: AtomicBool,
    transport_ok: AtomicBool,
    request_count: AtomicU64,
    error_count: AtomicU64,
    avg_latency_ms: Mutex<f64>,
    last_used: Mutex<Option<DateTime<Utc>>>,
}

impl HealthTracker {
    pub(crate) fn new() -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(OBSERVATION_WINDOW)),
            healthy: AtomicBool::new(true),
            transport_ok: AtomicBool::new(true),
            request_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            avg_latency_ms: Mutex::new(0.0),
            last_used: Mutex::new(None),
        }
    }

    /// Record a successful invocation.
    pub(crate) fn record_success(&self, latency_ms: u64) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        self.push_observation(true);

        {
            let mut avg = self.avg_latency_ms.lock().unwrap();
            if self.request_count.load(Ordering::Relaxed) == 1 {
                *avg = latency_ms as f64;
            } else {
                *avg = *avg * (1.0 - LATENCY_EWMA_ALPHA) + latency_ms as f64 * LATENCY_EWMA_ALPHA;
            }
        }

        *self.last_used.lock().unwrap() = Some(Utc::now());
        self.reevaluate();
    }

    /// Record a failed invocation (after retries were exhausted).
    pub(crate) fn record_failure(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        self.push_observation(false);
        self.reevaluate();
    }

    /// Record the outcome of a background transport check.
    pub(crate) fn record_transport(&self, ok: bool) {
        self.transport_ok.store(ok, Ordering::Relaxed);
        self.reevaluate();
    }

    fn push_observation(&self, success: bool) {
        let mut window = self.window.lock().unwrap();
        if window.len() == OBSERVATION_WINDOW {
            window.pop_front();
        }
        window.push_back(success);
    }

    /// Fraction of failures in the observation window.
    pub(crate) fn error_rate(&self) -> f64 {
        let window = self.window.lock().unwrap();
        if window.is_empty() {
            return 0.0;
        }
        let failures = window.iter().filter(|ok| !**ok).count();
        failures as f64 / window.len() as f64
    }

    fn reevaluate(&self) {
        let no_observations = self.window.lock().unwrap().is_empty();
        let healthy = if no_observations {
            // No invocations yet: trust the last transport check
            self.transport_ok.load(Ordering::Relaxed)
        } else {
            self.error_rate() <= ERROR_RATE_THRESHOLD
        };
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    /// Lock-free health read.
    pub(crate) fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub(crate) fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub(crate) fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Snapshot the current status.
    pub(crate) fn status(&self, name: &str, weight: f64) -> ProviderStatus {
        ProviderStatus {
            name: name.to_string(),
            healthy: self.is_healthy(),
            weight,
            request_count: self.request_count(),
            error_count: self.error_count(),
            avg_latency_ms: *self.avg_latency_ms.lock().unwrap(),
            last_used: *self.last_used.lock().unwrap(),
        }
    }
}
