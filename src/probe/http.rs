//! HTTP probe implementation.

use std::time::Duration;
use tokio::time::Instant;

use super::ProbeError;

/// Build the client shared by all HTTP probes.
///
/// Redirects are not followed so each probe issues exactly one request.
/// Proxy environment variables are ignored; probes always go direct.
pub fn build_http_client() -> Result<reqwest::Client, ProbeError> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .map_err(|e| ProbeError::Network(e.to_string()))
}

/// Run an HTTP GET probe against the given URL.
///
/// Any response counts as success regardless of status code. The body is
/// never read.
pub async fn run_http_probe(
    client: &reqwest::Client,
    address: &str,
    timeout: Duration,
) -> Result<Duration, ProbeError> {
    let url = reqwest::Url::parse(address)
        .map_err(|e| ProbeError::InvalidAddress(format!("{}: {}", address, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ProbeError::InvalidAddress(format!(
            "unsupported scheme: {}",
            url.scheme()
        )));
    }

    let start = Instant::now();

    let response = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                ProbeError::RequestTimeout
            } else {
                ProbeError::Network(e.to_string())
            }
        })?;

    let elapsed = start.elapsed();
    drop(response);

    Ok(elapsed)
}
