//! Counters for the translation workflow.
//!
//! Polling failures never reach an end user, so these counters and the
//! logs are the only place they show up.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SyncMetrics {
    /// Jobs accepted by the provider
    submissions: AtomicU64,

    /// Submissions the provider refused or never answered
    submission_failures: AtomicU64,

    /// Status checks issued by the poll scheduler
    status_checks: AtomicU64,

    /// Provider calls that failed with a transport error or rejection
    provider_failures: AtomicU64,

    /// Webhook notifications received
    callbacks_received: AtomicU64,

    /// Results written onto a post
    completions_applied: AtomicU64,

    /// Completions that found the request already completed
    duplicate_completions: AtomicU64,

    /// Requests that ended in `Failed`
    requests_failed: AtomicU64,
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submission(&self) {
        self.submissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submission_failure(&self) {
        self.submission_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_status_check(&self) {
        self.status_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_provider_failure(&self) {
        self.provider_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_callback(&self) {
        self.callbacks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completion(&self) {
        self.completions_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_completion(&self) {
        self.duplicate_completions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed_request(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status_checks(&self) -> u64 {
        self.status_checks.load(Ordering::Relaxed)
    }

    pub fn completions_applied(&self) -> u64 {
        self.completions_applied.load(Ordering::Relaxed)
    }

    pub fn duplicate_completions(&self) -> u64 {
        self.duplicate_completions.load(Ordering::Relaxed)
    }

    pub fn requests_failed(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }

    pub fn report(&self) -> MetricsReport {
        let submissions = self.submissions.load(Ordering::Relaxed);
        let completions = self.completions_applied();
        let completion_rate = if submissions > 0 {
            (completions as f64 / submissions as f64) * 100.0
        } else {
            0.0
        };

        MetricsReport {
            submissions,
            submission_failures: self.submission_failures.load(Ordering::Relaxed),
            status_checks: self.status_checks(),
            provider_failures: self.provider_failures.load(Ordering::Relaxed),
            callbacks_received: self.callbacks_received.load(Ordering::Relaxed),
            completions_applied: completions,
            duplicate_completions: self.duplicate_completions(),
            requests_failed: self.requests_failed(),
            completion_rate,
        }
    }
}

/// Point-in-time snapshot of the workflow counters
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub submissions: u64,
    pub submission_failures: u64,
    pub status_checks: u64,
    pub provider_failures: u64,
    pub callbacks_received: u64,
    pub completions_applied: u64,
    pub duplicate_completions: u64,
    pub requests_failed: u64,

    /// Completions as a percentage of submissions (0-100)
    pub completion_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_empty() {
        let report = SyncMetrics::new().report();

        assert_eq!(report.submissions, 0);
        assert_eq!(report.completions_applied, 0);
        assert_eq!(report.completion_rate, 0.0);
    }

    #[test]
    fn test_report_completion_rate() {
        let metrics = SyncMetrics::new();

        // 4 submissions, 3 completions = 75%
        for _ in 0..4 {
            metrics.record_submission();
        }
        for _ in 0..3 {
            metrics.record_completion();
        }
        metrics.record_failed_request();

        let report = metrics.report();
        assert_eq!(report.submissions, 4);
        assert_eq!(report.completions_applied, 3);
        assert_eq!(report.requests_failed, 1);
        assert_eq!(report.completion_rate, 75.0);
    }

    #[test]
    fn test_counters_are_independent() {
        let metrics = SyncMetrics::new();

        metrics.record_status_check();
        metrics.record_status_check();
        metrics.record_duplicate_completion();
        metrics.record_callback();

        let report = metrics.report();
        assert_eq!(report.status_checks, 2);
        assert_eq!(report.duplicate_completions, 1);
        assert_eq!(report.callbacks_received, 1);
        assert_eq!(report.provider_failures, 0);
    }

    #[test]
    fn test_report_serializes() {
        let metrics = SyncMetrics::new();
        metrics.record_submission();

        let json = serde_json::to_value(metrics.report()).unwrap();
        assert_eq!(json["submissions"], 1);
        assert!(json.get("completion_rate").is_some());
    }
}
