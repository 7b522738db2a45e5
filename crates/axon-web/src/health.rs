//! Service health counters.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Errors tolerated before the service reports itself degraded.
pub const DEGRADED_AFTER_ERRORS: u64 = 5;

/// Lock-free request and error counters.  Clones share the counters.
#[derive(Debug, Clone)]
pub struct HealthManager {
    inner: Arc<Counters>,
}

#[derive(Debug)]
struct Counters {
    started: Instant,
    requests: AtomicU64,
    errors: AtomicU64,
    /// Milliseconds since the epoch; zero before the first request.
    last_request_ms: AtomicI64,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub last_request: Option<DateTime<Utc>>,
    pub request_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub agent_count: usize,
}

impl Default for HealthManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthManager {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Counters {
                started: Instant::now(),
                requests: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                last_request_ms: AtomicI64::new(0),
            }),
        }
    }

    pub fn record_request(&self) {
        self.inner.requests.fetch_add(1, Ordering::Relaxed);
        self.inner
            .last_request_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.inner.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self, agent_count: usize) -> HealthReport {
        let requests = self.inner.requests.load(Ordering::Relaxed);
        let errors = self.inner.errors.load(Ordering::Relaxed);
        let last_ms = self.inner.last_request_ms.load(Ordering::Relaxed);

        HealthReport {
            status: if errors < DEGRADED_AFTER_ERRORS {
                "healthy"
            } else {
                "degraded"
            },
            uptime_seconds: self.inner.started.elapsed().as_secs(),
            last_request: (last_ms > 0)
                .then(|| DateTime::from_timestamp_millis(last_ms))
                .flatten(),
            request_count: requests,
            error_count: errors,
            error_rate: if requests == 0 {
                0.0
            } else {
                errors as f64 / requests as f64
            },
            agent_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_manager_is_healthy() {
        let report = HealthManager::new().report(0);
        assert_eq!(report.status, "healthy");
        assert_eq!(report.request_count, 0);
        assert!(report.last_request.is_none());
        assert_eq!(report.error_rate, 0.0);
    }

    #[test]
    fn degrades_after_threshold() {
        let health = HealthManager::new();
        for _ in 0..10 {
            health.record_request();
        }
        for _ in 0..DEGRADED_AFTER_ERRORS - 1 {
            health.record_error();
        }
        assert_eq!(health.report(2).status, "healthy");

        health.record_error();
        let report = health.report(2);
        assert_eq!(report.status, "degraded");
        assert_eq!(report.error_count, DEGRADED_AFTER_ERRORS);
        assert!((report.error_rate - 0.5).abs() < f64::EPSILON);
        assert!(report.last_request.is_some());
        assert_eq!(report.agent_count, 2);
    }
}
