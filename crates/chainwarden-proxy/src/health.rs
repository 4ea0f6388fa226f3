//! Proxy liveness probe.

use std::time::Duration;

use reqwest::{Client, StatusCode};

use crate::error::{ProxyError, Result};

/// Request timeout for health and CA requests.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds the client used to talk to the proxy's meta endpoints.
///
/// The proxy serves its meta API with a certificate signed by its own CA,
/// which may not be trusted yet.
pub fn meta_client() -> Result<Client> {
    Ok(Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(PROBE_TIMEOUT)
        .build()?)
}

/// Single GET of `<base_url>/ping`, expecting a 200 whose body contains `pong`.
pub async fn ping(client: &Client, base_url: &str) -> Result<()> {
    let url = format!("{}/ping", base_url.trim_end_matches('/'));
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| ProxyError::Unhealthy(format!("{url}: {e}")))?;

    let status = response.status();
    if status != StatusCode::OK {
        return Err(ProxyError::Unhealthy(format!("{url}: status {status}")));
    }

    let body = response
        .text()
        .await
        .map_err(|e| ProxyError::Unhealthy(format!("{url}: {e}")))?;
    if !body.contains("pong") {
        return Err(ProxyError::Unhealthy(format!(
            "{url}: expected 'pong', got {body:?}"
        )));
    }

    Ok(())
}
