//! Gateway metrics
//!
//! Atomic counters exported in Prometheus text format. Recording never
//! allocates or locks.

use crate::ratelimit::Dimension;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// How a proxied request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The backend answered successfully
    Proxied,
    /// No route matched
    NotFound,
    RateLimited(Dimension),
    Unauthorized,
    /// The request was rejected before dispatch (e.g. missing content type)
    ClientError,
    /// The backend answered with an error or could not be reached
    BackendError,
    /// Rate store or context failures
    Internal,
}

pub struct Metrics {
    start_time: Instant,

    pub total_requests: AtomicU64,
    pub requests_proxied: AtomicU64,
    pub requests_not_found: AtomicU64,
    pub rate_limited_client_ip: AtomicU64,
    pub rate_limited_user: AtomicU64,
    pub requests_unauthorized: AtomicU64,
    pub requests_client_errors: AtomicU64,
    pub backend_errors: AtomicU64,
    pub internal_errors: AtomicU64,

    /// Request latency buckets
    pub latency_under_1ms: AtomicU64,
    pub latency_under_10ms: AtomicU64,
    pub latency_under_100ms: AtomicU64,
    pub latency_under_1s: AtomicU64,
    pub latency_over_1s: AtomicU64,
    pub latency_sum_micros: AtomicU64,

    pub registered_routes: AtomicUsize,
    pub discovery_cycles: AtomicU64,
    pub discovery_failures: AtomicU64,
    pub manifest_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            requests_proxied: AtomicU64::new(0),
            requests_not_found: AtomicU64::new(0),
            rate_limited_client_ip: AtomicU64::new(0),
            rate_limited_user: AtomicU64::new(0),
            requests_unauthorized: AtomicU64::new(0),
            requests_client_errors: AtomicU64::new(0),
            backend_errors: AtomicU64::new(0),
            internal_errors: AtomicU64::new(0),
            latency_under_1ms: AtomicU64::new(0),
            latency_under_10ms: AtomicU64::new(0),
            latency_under_100ms: AtomicU64::new(0),
            latency_under_1s: AtomicU64::new(0),
            latency_over_1s: AtomicU64::new(0),
            latency_sum_micros: AtomicU64::new(0),
            registered_routes: AtomicUsize::new(0),
            discovery_cycles: AtomicU64::new(0),
            discovery_failures: AtomicU64::new(0),
            manifest_failures: AtomicU64::new(0),
        }
    }

    /// Record a finished request and its latency
    pub fn record_request(&self, outcome: Outcome, latency: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let counter = match outcome {
            Outcome::Proxied => &self.requests_proxied,
            Outcome::NotFound => &self.requests_not_found,
            Outcome::RateLimited(Dimension::ClientIp) => &self.rate_limited_client_ip,
            Outcome::RateLimited(Dimension::User) => &self.rate_limited_user,
            Outcome::Unauthorized => &self.requests_unauthorized,
            Outcome::ClientError => &self.requests_client_errors,
            Outcome::BackendError => &self.backend_errors,
            Outcome::Internal => &self.internal_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let latency_us = latency.as_micros().min(u64::MAX as u128) as u64;
        match latency_us {
            0..=999 => self.latency_under_1ms.fetch_add(1, Ordering::Relaxed),
            1000..=9999 => self.latency_under_10ms.fetch_add(1, Ordering::Relaxed),
            10000..=99999 => self.latency_under_100ms.fetch_add(1, Ordering::Relaxed),
            100000..=999999 => self.latency_under_1s.fetch_add(1, Ordering::Relaxed),
            _ => self.latency_over_1s.fetch_add(1, Ordering::Relaxed),
        };
        self.latency_sum_micros
            .fetch_add(latency_us, Ordering::Relaxed);
    }

    pub fn set_registered_routes(&self, count: usize) {
        self.registered_routes.store(count, Ordering::Relaxed);
    }

    /// Record a discovery cycle and the manifests it failed to fetch
    pub fn record_cycle(&self, manifest_failures: usize) {
        self.discovery_cycles.fetch_add(1, Ordering::Relaxed);
        self.manifest_failures
            .fetch_add(manifest_failures as u64, Ordering::Relaxed);
    }

    pub fn record_discovery_failure(&self) {
        self.discovery_cycles.fetch_add(1, Ordering::Relaxed);
        self.discovery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::with_capacity(2048);

        gauge(
            &mut output,
            "routecrab_uptime_seconds",
            "Time since gateway start in seconds",
            self.uptime_seconds(),
        );
        counter(
            &mut output,
            "routecrab_requests_total",
            "Total number of requests handled",
            self.total_requests.load(Ordering::Relaxed),
        );

        output.push_str("# HELP routecrab_requests_by_outcome Requests by outcome\n");
        output.push_str("# TYPE routecrab_requests_by_outcome counter\n");
        for (label, value) in [
            ("proxied", &self.requests_proxied),
            ("not_found", &self.requests_not_found),
            ("unauthorized", &self.requests_unauthorized),
            ("client_error", &self.requests_client_errors),
            ("backend_error", &self.backend_errors),
            ("internal_error", &self.internal_errors),
        ] {
            let _ = writeln!(
                output,
                "routecrab_requests_by_outcome{{outcome=\"{label}\"}} {}",
                value.load(Ordering::Relaxed)
            );
        }
        output.push('\n');

        output.push_str("# HELP routecrab_rate_limited_total Requests refused by rate limits\n");
        output.push_str("# TYPE routecrab_rate_limited_total counter\n");
        for (dimension, value) in [
            (Dimension::ClientIp, &self.rate_limited_client_ip),
            (Dimension::User, &self.rate_limited_user),
        ] {
            let _ = writeln!(
                output,
                "routecrab_rate_limited_total{{dimension=\"{dimension}\"}} {}",
                value.load(Ordering::Relaxed)
            );
        }
        output.push('\n');

        let under_1ms = self.latency_under_1ms.load(Ordering::Relaxed);
        let under_10ms = under_1ms + self.latency_under_10ms.load(Ordering::Relaxed);
        let under_100ms = under_10ms + self.latency_under_100ms.load(Ordering::Relaxed);
        let under_1s = under_100ms + self.latency_under_1s.load(Ordering::Relaxed);
        let total = under_1s + self.latency_over_1s.load(Ordering::Relaxed);

        output.push_str("# HELP routecrab_request_duration_seconds Request latency distribution\n");
        output.push_str("# TYPE routecrab_request_duration_seconds histogram\n");
        for (le, value) in [
            ("0.001", under_1ms),
            ("0.01", under_10ms),
            ("0.1", under_100ms),
            ("1", under_1s),
            ("+Inf", total),
        ] {
            let _ = writeln!(
                output,
                "routecrab_request_duration_seconds_bucket{{le=\"{le}\"}} {value}"
            );
        }
        let latency_sum_seconds =
            self.latency_sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let _ = writeln!(
            output,
            "routecrab_request_duration_seconds_sum {latency_sum_seconds:.6}"
        );
        let _ = writeln!(output, "routecrab_request_duration_seconds_count {total}\n");

        gauge(
            &mut output,
            "routecrab_registered_routes",
            "Routes currently registered",
            self.registered_routes.load(Ordering::Relaxed) as u64,
        );
        counter(
            &mut output,
            "routecrab_discovery_cycles_total",
            "Discovery cycles run",
            self.discovery_cycles.load(Ordering::Relaxed),
        );
        counter(
            &mut output,
            "routecrab_discovery_failures_total",
            "Discovery cycles that could not list backends",
            self.discovery_failures.load(Ordering::Relaxed),
        );
        counter(
            &mut output,
            "routecrab_manifest_failures_total",
            "Backend manifests that could not be fetched",
            self.manifest_failures.load(Ordering::Relaxed),
        );

        output
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn counter(output: &mut String, name: &str, help: &str, value: u64) {
    let _ = write!(
        output,
        "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n\n"
    );
}

fn gauge(output: &mut String, name: &str, help: &str, value: u64) {
    let _ = write!(
        output,
        "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n\n"
    );
}
