//! Envelope request metrics in Prometheus exposition format (`/metrics`).
//!
//! Each gateway owns its own registry, so several gateways in one process
//! never share counters.

use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

use crate::error::Result;

/// Request latency buckets, in seconds.
const LATENCY_BUCKETS: [f64; 8] = [0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Counters and latency histogram for envelope intake.
pub struct GatewayMetrics {
    registry: Registry,
    requests: IntCounterVec,
    latency: Histogram,
}

impl GatewayMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests = IntCounterVec::new(
            Opts::new("odin_requests_total", "Envelope requests by response status"),
            &["status"],
        )?;
        let latency = Histogram::with_opts(
            HistogramOpts::new("odin_request_latency_seconds", "Envelope request latency")
                .buckets(LATENCY_BUCKETS.to_vec()),
        )?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            registry,
            requests,
            latency,
        })
    }

    /// Record one finished request.
    pub fn observe(&self, status: u16, elapsed: Duration) {
        self.requests
            .with_label_values(&[status.to_string().as_str()])
            .inc();
        self.latency.observe(elapsed.as_secs_f64());
    }

    /// Requests recorded with `status`.
    pub fn requests_with_status(&self, status: u16) -> u64 {
        self.requests
            .with_label_values(&[status.to_string().as_str()])
            .get()
    }

    /// Text exposition of every metric.
    pub fn render(&self) -> Result<String> {
        Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
    }
}
