//! Prometheus exposition of probe results.
//!
//! Every scrape gets its own registry, so nothing is registered process-wide.

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use thiserror::Error;

use crate::probe::{MetricSink, ProbeResult};

const NAMESPACE: &str = "uptime";
const IS_UP_METRIC: &str = "is_up";
const LATENCY_METRIC: &str = "latency_seconds";
const LABELS: [&str; 2] = ["endpoint_name", "endpoint_address"];

/// Metrics error types.
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("exposition is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Collects one round of results as Prometheus gauges.
pub struct PrometheusSink {
    registry: Registry,
    is_up: GaugeVec,
    latency: GaugeVec,
}

impl PrometheusSink {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let is_up = GaugeVec::new(
            Opts::new(IS_UP_METRIC, "Is it up?").namespace(NAMESPACE),
            &LABELS,
        )?;
        let latency = GaugeVec::new(
            Opts::new(LATENCY_METRIC, "Measured latency on last scrape").namespace(NAMESPACE),
            &LABELS,
        )?;

        registry.register(Box::new(is_up.clone()))?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            registry,
            is_up,
            latency,
        })
    }

    /// Content type of [`PrometheusSink::render`]'s output.
    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }

    /// Render everything recorded so far in the text exposition format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl MetricSink for PrometheusSink {
    fn record(&mut self, result: &ProbeResult) {
        let labels = [result.endpoint_name.as_str(), result.endpoint_address.as_str()];
        self.is_up
            .with_label_values(&labels)
            .set(if result.is_up { 1.0 } else { 0.0 });
        self.latency
            .with_label_values(&labels)
            .set(result.latency_seconds);
    }
}
