//! Uptime Exporter - HTTP endpoint health probe
//!
//! Probes every configured endpoint on each metrics scrape and exposes the
//! results for Prometheus.

mod config;
mod metrics;
mod probe;
mod web;

use config::{ConfigError, Configuration, ServerConfig};
use probe::{EndpointSet, EndpointSnapshot, Prober, TracingReporter};
use web::Server;

use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("uptime_exporter=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Using endpoint file {}", cfg.config_file.display());

    // Any unusable endpoint aborts startup
    let snapshot = match load_endpoints(&cfg.config_file) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::error!("Startup aborted: {}", e);
            return Err(e.into());
        }
    };
    tracing::info!("Loaded {} endpoints", snapshot.endpoints.len());

    let endpoints = EndpointSet::new(snapshot);
    let prober = Arc::new(Prober::new(endpoints.clone(), Arc::new(TracingReporter)));

    #[cfg(unix)]
    tokio::spawn(reload_on_hangup(cfg.config_file.clone(), endpoints));

    // Start web server
    let server = Server::new(cfg, prober);
    server.start().await?;

    Ok(())
}

/// Read the endpoint file and prepare every endpoint's TLS material.
fn load_endpoints(path: &Path) -> Result<EndpointSnapshot, ConfigError> {
    let config = Configuration::from_file(path)?;
    EndpointSnapshot::from_configuration(&config)
}

/// Rebuild the endpoint list from disk on every SIGHUP.
///
/// A failed reload keeps the previous list in service.
#[cfg(unix)]
async fn reload_on_hangup(path: std::path::PathBuf, endpoints: EndpointSet) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("Failed to install SIGHUP handler, reload disabled: {}", e);
            return;
        }
    };

    while hangups.recv().await.is_some() {
        let _ = reload(&path, &endpoints).await;
    }
}

/// Replace the endpoint list with a freshly prepared one from `path`.
///
/// On error nothing is swapped and the previous list stays in service.
async fn reload(path: &Path, endpoints: &EndpointSet) -> Result<usize, ConfigError> {
    tracing::info!("Reloading endpoints from {}", path.display());
    match load_endpoints(path) {
        Ok(snapshot) => {
            let count = snapshot.endpoints.len();
            endpoints.replace(snapshot).await;
            tracing::info!("Reloaded {} endpoints", count);
            Ok(count)
        }
        Err(e) => {
            tracing::error!("Reload failed, keeping previous endpoints: {}", e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_endpoints() {
        let mut tmp = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        write!(
            tmp,
            "max_concurrency: 2\nendpoints:\n  - name: api\n    address: http://localhost/\n"
        )
        .unwrap();

        let snapshot = load_endpoints(tmp.path()).unwrap();
        assert_eq!(snapshot.endpoints.len(), 1);
        assert_eq!(snapshot.max_concurrency, Some(2));
        assert_eq!(snapshot.endpoints[0].spec.name, "api");
    }

    #[test]
    fn test_load_endpoints_rejects_bad_ca() {
        let mut ca = tempfile::NamedTempFile::new().unwrap();
        write!(ca, "-----BEGIN CERTIFICATE-----\n%%%\n-----END CERTIFICATE-----\n").unwrap();

        let mut tmp = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        write!(
            tmp,
            "endpoints:\n  - name: ok\n    address: http://localhost/\n  - name: api\n    address: https://localhost/\n    tls_configuration:\n      certificate_authority_path: {}\n",
            ca.path().display()
        )
        .unwrap();

        let err = load_endpoints(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Tls { ref endpoint, .. } if endpoint == "api"));
    }

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        write!(tmp, "{}", contents).unwrap();
        tmp
    }

    async fn endpoint_names(endpoints: &EndpointSet) -> Vec<String> {
        endpoints
            .snapshot()
            .await
            .endpoints
            .iter()
            .map(|e| e.spec.name.clone())
            .collect()
    }

    #[tokio::test]
    async fn test_reload_swaps_in_new_list() {
        let initial = write_config("endpoints:\n  - name: old\n    address: http://localhost/\n");
        let endpoints = EndpointSet::new(load_endpoints(initial.path()).unwrap());

        let updated = write_config(
            "endpoints:\n  - name: new-a\n    address: http://localhost/a\n  - name: new-b\n    address: http://localhost/b\n",
        );
        assert_eq!(reload(updated.path(), &endpoints).await.unwrap(), 2);
        assert_eq!(endpoint_names(&endpoints).await, vec!["new-a", "new-b"]);
    }

    #[tokio::test]
    async fn test_failed_reload_keeps_previous_list() {
        let initial = write_config("endpoints:\n  - name: old\n    address: http://localhost/\n");
        let endpoints = EndpointSet::new(load_endpoints(initial.path()).unwrap());

        let mut ca = tempfile::NamedTempFile::new().unwrap();
        write!(ca, "not a certificate\n").unwrap();
        let broken = write_config(&format!(
            "endpoints:\n  - name: fine\n    address: http://localhost/\n  - name: api\n    address: https://localhost/\n    tls_configuration:\n      certificate_authority_path: {}\n",
            ca.path().display()
        ));

        let err = reload(broken.path(), &endpoints).await.unwrap_err();
        assert!(matches!(err, ConfigError::Tls { .. }));
        assert_eq!(endpoint_names(&endpoints).await, vec!["old"]);

        let missing = reload(Path::new("/nonexistent/uptime.yml"), &endpoints).await;
        assert!(matches!(missing, Err(ConfigError::Read { .. })));
        assert_eq!(endpoint_names(&endpoints).await, vec!["old"]);
    }
}
