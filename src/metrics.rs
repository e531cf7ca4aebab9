//! Prometheus metrics for the HTTP surface and the monitor cycle

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,

    pub http_requests_total: IntCounter,
    pub http_requests_in_flight: IntGauge,
    pub http_request_duration_seconds: Histogram,

    pub monitor_cycles_total: IntCounter,
    pub monitor_cycle_failures_total: IntCounter,
    pub monitor_cycle_duration_seconds: Histogram,
    pub opposite_signals_detected_total: IntCounter,
    pub notification_failures_total: IntCounter,
    pub followed_signals_active: IntGauge,

    pub database_connected: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total =
            IntCounter::with_opts(Opts::new("http_requests_total", "Total HTTP requests"))?;
        let http_requests_in_flight = IntGauge::with_opts(Opts::new(
            "http_requests_in_flight",
            "HTTP requests currently being served",
        ))?;
        let http_request_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
        ))?;

        let monitor_cycles_total = IntCounter::with_opts(Opts::new(
            "monitor_cycles_total",
            "Monitor cycles run",
        ))?;
        let monitor_cycle_failures_total = IntCounter::with_opts(Opts::new(
            "monitor_cycle_failures_total",
            "Monitor cycles that ended in retry or failure",
        ))?;
        let monitor_cycle_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "monitor_cycle_duration_seconds",
                "Monitor cycle duration in seconds",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        )?;
        let opposite_signals_detected_total = IntCounter::with_opts(Opts::new(
            "opposite_signals_detected_total",
            "Opposite signals latched on followed positions",
        ))?;
        let notification_failures_total = IntCounter::with_opts(Opts::new(
            "notification_failures_total",
            "Alerts that failed or timed out on delivery",
        ))?;
        let followed_signals_active = IntGauge::with_opts(Opts::new(
            "followed_signals_active",
            "Active followed signals at the last cycle",
        ))?;

        let database_connected = Gauge::with_opts(Opts::new(
            "database_connected",
            "1 when the PostgreSQL store is connected",
        ))?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_requests_in_flight.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(monitor_cycles_total.clone()))?;
        registry.register(Box::new(monitor_cycle_failures_total.clone()))?;
        registry.register(Box::new(monitor_cycle_duration_seconds.clone()))?;
        registry.register(Box::new(opposite_signals_detected_total.clone()))?;
        registry.register(Box::new(notification_failures_total.clone()))?;
        registry.register(Box::new(followed_signals_active.clone()))?;
        registry.register(Box::new(database_connected.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_requests_in_flight,
            http_request_duration_seconds,
            monitor_cycles_total,
            monitor_cycle_failures_total,
            monitor_cycle_duration_seconds,
            opposite_signals_detected_total,
            notification_failures_total,
            followed_signals_active,
            database_connected,
        })
    }

    /// Text exposition format
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
