//! HTTP probe implementation.

use std::time::Duration;

use reqwest::Method;

use super::{report, PreparedEndpoint, ProbeError};

impl ProbeError {
    fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout(timeout)
        } else if err.is_builder() {
            ProbeError::Request(report(&err))
        } else if err.is_connect() {
            ProbeError::Connect(report(&err))
        } else {
            ProbeError::Network(report(&err))
        }
    }
}

/// Issue the endpoint's request once and return the response status.
///
/// The client lives only for this request, with the endpoint's timeout and TLS
/// bundle. The response body is never read.
pub async fn run_http_probe(endpoint: &PreparedEndpoint) -> Result<u16, ProbeError> {
    let spec = &endpoint.spec;
    let timeout = spec.timeout();

    let method = Method::from_bytes(spec.method.as_bytes())
        .map_err(|e| ProbeError::Request(format!("invalid method {:?}: {}", spec.method, e)))?;

    let client = endpoint
        .tls
        .apply(reqwest::Client::builder().timeout(timeout))
        .build()
        .map_err(|e| ProbeError::Request(report(&e)))?;

    let response = client
        .request(method, &spec.address)
        .send()
        .await
        .map_err(|e| ProbeError::from_reqwest(e, timeout))?;

    Ok(response.status().as_u16())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointSpec;

    #[tokio::test]
    async fn test_http_probe_invalid_url() {
        let endpoint =
            PreparedEndpoint::prepare(EndpointSpec::new("broken", "not a url")).unwrap();
        let result = run_http_probe(&endpoint).await;
        assert!(matches!(result, Err(ProbeError::Request(_))));
    }

    #[tokio::test]
    async fn test_http_probe_connection_refused() {
        let endpoint =
            PreparedEndpoint::prepare(EndpointSpec::new("closed", "http://127.0.0.1:1/")).unwrap();
        let result = run_http_probe(&endpoint).await;
        assert!(matches!(result, Err(ProbeError::Connect(_))));
    }
}
