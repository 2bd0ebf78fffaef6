//! Prometheus metrics registry for the load probe service.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and pass it
//! to the probe invoker, the admission loop and the HTTP middleware.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format
//! (`text/plain; version=0.0.4`).

use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};

/// All application-level Prometheus metrics.
pub struct AppMetrics {
    /// Total number of probe calls made through the invoker.
    pub probe_calls_total: Counter,
    /// Probe calls that fell back to the default, labelled by reason.
    pub probe_fallbacks_total: CounterVec,
    /// Capacity reported by the most recent probe evaluation.
    pub probe_capacity: Gauge,
    /// HTTP request count, labelled by method, path, and status code.
    pub http_requests_total: CounterVec,
    /// HTTP request latency histogram in seconds.
    pub http_request_duration: Histogram,
    /// The registry that owns all of the above metrics.
    pub registry: Registry,
}

impl AppMetrics {
    /// Create and register all metrics. Returns an error if any metric
    /// name is invalid or duplicated.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let probe_calls_total = Counter::with_opts(Opts::new(
            "load_probe_calls_total",
            "Total load probe calls",
        ))?;

        let probe_fallbacks_total = CounterVec::new(
            Opts::new(
                "load_probe_fallbacks_total",
                "Load probe calls that returned the default capacity",
            ),
            &["reason"],
        )?;

        let probe_capacity = Gauge::with_opts(Opts::new(
            "load_probe_capacity",
            "Capacity reported by the latest load probe evaluation",
        ))?;

        let http_requests_total = CounterVec::new(
            Opts::new(
                "load_probe_http_requests_total",
                "HTTP requests by method, path, and status",
            ),
            &["method", "path", "status"],
        )?;

        let http_request_duration = Histogram::with_opts(
            HistogramOpts::new(
                "load_probe_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;

        registry.register(Box::new(probe_calls_total.clone()))?;
        registry.register(Box::new(probe_fallbacks_total.clone()))?;
        registry.register(Box::new(probe_capacity.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            probe_calls_total,
            probe_fallbacks_total,
            probe_capacity,
            http_requests_total,
            http_request_duration,
            registry,
        })
    }

    /// Render all metrics as Prometheus text format (for the `/metrics` endpoint).
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_metrics_register_without_error() {
        let metrics = AppMetrics::new();
        assert!(metrics.is_ok(), "AppMetrics::new() failed: {:?}", metrics.err());
    }

    #[test]
    fn render_includes_probe_metrics_after_increment() {
        let metrics = AppMetrics::new().unwrap();
        metrics.probe_calls_total.inc();
        metrics
            .probe_fallbacks_total
            .with_label_values(&["execution"])
            .inc();
        let output = metrics.render().unwrap();
        assert!(output.contains("load_probe_calls_total"));
        assert!(output.contains("reason=\"execution\""));
    }

    #[test]
    fn capacity_gauge_holds_latest_value() {
        let metrics = AppMetrics::new().unwrap();
        metrics.probe_capacity.set(10.0);
        metrics.probe_capacity.set(3.0);
        assert!((metrics.probe_capacity.get() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn http_counter_is_labelled() {
        let metrics = AppMetrics::new().unwrap();
        metrics
            .http_requests_total
            .with_label_values(&["GET", "/probes", "200"])
            .inc_by(2.0);
        let value = metrics
            .http_requests_total
            .with_label_values(&["GET", "/probes", "200"])
            .get();
        assert!((value - 2.0).abs() < f64::EPSILON);
    }
}
