//! Probe module for endpoint health checks.
//!
//! One scrape round issues a request to every configured endpoint concurrently,
//! waits for all of them, and hands one result per endpoint to a metric sink.

mod http;
mod status;
mod tls;

pub use http::*;
pub use status::*;
pub use tls::*;

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;

use crate::config::{ConfigError, Configuration, EndpointSpec};

/// Per-endpoint transport failures. None of these abort a round.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("invalid request: {0}")]
    Request(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("network error: {0}")]
    Network(String),
}

/// Render an error with its whole source chain.
pub(crate) fn report(mut err: &(dyn std::error::Error + 'static)) -> String {
    let mut s = format!("{}", err);
    while let Some(src) = err.source() {
        let _ = write!(s, ": {}", src);
        err = src;
    }
    s
}

/// An endpoint paired with its prepared TLS material.
#[derive(Debug, Clone)]
pub struct PreparedEndpoint {
    pub spec: EndpointSpec,
    pub tls: TlsBundle,
}

impl PreparedEndpoint {
    pub fn prepare(spec: EndpointSpec) -> Result<Self, ConfigError> {
        let tls = tls::prepare(&spec.name, &spec.tls)?;
        Ok(Self { spec, tls })
    }
}

/// Prepare every endpoint, failing on the first bad one.
pub fn prepare_all(specs: &[EndpointSpec]) -> Result<Vec<PreparedEndpoint>, ConfigError> {
    specs.iter().cloned().map(PreparedEndpoint::prepare).collect()
}

/// Outcome of probing one endpoint in one round.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub endpoint_name: String,
    pub endpoint_address: String,
    pub is_up: bool,
    /// Seconds from the start of the round until this result was produced.
    pub latency_seconds: f64,
    /// `None` when no response was received.
    pub status_code: Option<u16>,
}

/// Receives the results of a round.
pub trait MetricSink: Send {
    fn record(&mut self, result: &ProbeResult);
}

impl MetricSink for Vec<ProbeResult> {
    fn record(&mut self, result: &ProbeResult) {
        self.push(result.clone());
    }
}

/// Receives free-text diagnostics for per-endpoint failures.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, endpoint: &str, message: &str);
}

/// Reports failures through `tracing`.
#[derive(Debug, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, endpoint: &str, message: &str) {
        tracing::warn!(endpoint, "Probe failed: {}", message);
    }
}

/// Everything a round needs, replaced as a whole on reload.
#[derive(Debug, Default)]
pub struct EndpointSnapshot {
    pub endpoints: Vec<PreparedEndpoint>,
    pub max_concurrency: Option<usize>,
}

impl EndpointSnapshot {
    /// Prepare TLS material for every endpoint in the configuration.
    pub fn from_configuration(config: &Configuration) -> Result<Self, ConfigError> {
        Ok(Self {
            endpoints: prepare_all(&config.endpoints)?,
            max_concurrency: config.max_concurrency,
        })
    }
}

/// Atomically swappable, read-only endpoint list.
#[derive(Clone, Default)]
pub struct EndpointSet {
    current: Arc<RwLock<Arc<EndpointSnapshot>>>,
}

impl EndpointSet {
    pub fn new(snapshot: EndpointSnapshot) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    /// The list in effect right now. Later replacements do not affect it.
    pub async fn snapshot(&self) -> Arc<EndpointSnapshot> {
        self.current.read().await.clone()
    }

    pub async fn replace(&self, snapshot: EndpointSnapshot) {
        let mut current = self.current.write().await;
        *current = Arc::new(snapshot);
    }
}

/// How a round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    /// All endpoints reported; holds the number of results recorded.
    Completed(usize),
    /// The round was stopped and in-flight requests were aborted.
    Cancelled,
}

/// The probe engine.
pub struct Prober {
    endpoints: EndpointSet,
    reporter: Arc<dyn ErrorReporter>,
}

impl Prober {
    pub fn new(endpoints: EndpointSet, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            endpoints,
            reporter,
        }
    }

    #[cfg(test)]
    pub fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    /// Run one round against the current endpoint list.
    ///
    /// Returns the number of results recorded, which equals the number of endpoints.
    pub async fn probe(&self, sink: &mut dyn MetricSink) -> usize {
        let snapshot = self.endpoints.snapshot().await;
        probe_round(snapshot, sink, self.reporter.clone()).await
    }

    /// Run one round, aborting every in-flight request if `stop` fires first.
    pub async fn probe_until(
        &self,
        sink: &mut dyn MetricSink,
        mut stop: broadcast::Receiver<()>,
    ) -> RoundOutcome {
        let stopped = async move {
            match stop.recv().await {
                Ok(()) | Err(RecvError::Lagged(_)) => {}
                // Nobody can stop us any more.
                Err(RecvError::Closed) => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            _ = stopped => {
                tracing::info!("Probe round cancelled");
                RoundOutcome::Cancelled
            }
            count = self.probe(sink) => RoundOutcome::Completed(count),
        }
    }
}

/// Probe every endpoint in `snapshot` concurrently and wait for all of them.
///
/// Results reach `sink` in completion order. Dropping the returned future aborts
/// all outstanding requests.
pub async fn probe_round(
    snapshot: Arc<EndpointSnapshot>,
    sink: &mut dyn MetricSink,
    reporter: Arc<dyn ErrorReporter>,
) -> usize {
    let round_start = Instant::now();
    let limit = snapshot
        .max_concurrency
        .map(|permits| Arc::new(Semaphore::new(permits)));

    let mut tasks = JoinSet::new();
    let mut task_endpoints = HashMap::with_capacity(snapshot.endpoints.len());

    for index in 0..snapshot.endpoints.len() {
        let snapshot = snapshot.clone();
        let reporter = reporter.clone();
        let limit = limit.clone();

        let handle = tasks.spawn(async move {
            // Held until the request finishes
            let _permit = match limit {
                Some(semaphore) => semaphore.acquire_owned().await.ok(),
                None => None,
            };

            let endpoint = &snapshot.endpoints[index];
            let status = match run_http_probe(endpoint).await {
                Ok(code) => Some(code),
                Err(e) => {
                    reporter.report(&endpoint.spec.name, &e.to_string());
                    None
                }
            };

            finish(endpoint, status, round_start)
        });
        task_endpoints.insert(handle.id(), index);
    }

    let mut recorded = 0;
    while let Some(joined) = tasks.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(e) => {
                // A panicked task still owes its endpoint a result.
                let Some(&index) = task_endpoints.get(&e.id()) else {
                    tracing::error!("Probe task failed: {}", e);
                    continue;
                };
                let endpoint = &snapshot.endpoints[index];
                reporter.report(&endpoint.spec.name, &format!("probe task failed: {}", e));
                finish(endpoint, None, round_start)
            }
        };

        tracing::debug!(
            endpoint = %result.endpoint_name,
            status = ?result.status_code,
            is_up = result.is_up,
            latency = result.latency_seconds,
            "Probe finished"
        );
        sink.record(&result);
        recorded += 1;
    }

    recorded
}

fn finish(endpoint: &PreparedEndpoint, status: Option<u16>, round_start: Instant) -> ProbeResult {
    let spec = &endpoint.spec;
    ProbeResult {
        endpoint_name: spec.name.clone(),
        endpoint_address: spec.address.clone(),
        is_up: is_up(status, &spec.success_pattern, spec.inverse_status),
        latency_seconds: round_start.elapsed().as_secs_f64(),
        status_code: status,
    }
}
