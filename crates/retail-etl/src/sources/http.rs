//! Retried HTTP GET shared by the API, object-store and document readers

use crate::retry::{AttemptError, Retried, RetryPolicy};
use reqwest::{Client, StatusCode};
use retail_common::{EtlError, Result};
use std::time::Duration;

/// Default timeout for a single request in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub(crate) fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| EtlError::Config(format!("failed to build HTTP client: {}", e)))
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// One GET request, classified for retrying
async fn get_once(
    client: &Client,
    url: &str,
    query: &[(String, String)],
    header: Option<(&str, &str)>,
) -> std::result::Result<Vec<u8>, AttemptError> {
    let mut request = client.get(url).query(query);
    if let Some((name, value)) = header {
        request = request.header(name, value);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_builder() {
            AttemptError::Fatal(EtlError::source_unavailable(url, e))
        } else {
            AttemptError::transient(e)
        }
    })?;

    let status = response.status();
    if is_transient_status(status) {
        return Err(AttemptError::transient(format!("HTTP {}", status)));
    }
    if !status.is_success() {
        return Err(AttemptError::Fatal(EtlError::source_unavailable(
            url,
            format!("HTTP {}", status),
        )));
    }

    let bytes = response.bytes().await.map_err(AttemptError::transient)?;
    Ok(bytes.to_vec())
}

/// GET `url` through the retry policy and return the body
pub(crate) async fn get_bytes(
    client: &Client,
    policy: &RetryPolicy,
    url: &str,
    query: &[(String, String)],
    header: Option<(&str, &str)>,
) -> Result<Retried<Vec<u8>>> {
    policy
        .run(url, |_| get_once(client, url, query, header))
        .await
}

/// GET `url` and decode the body as JSON
pub(crate) async fn get_json(
    client: &Client,
    policy: &RetryPolicy,
    url: &str,
    query: &[(String, String)],
    header: Option<(&str, &str)>,
) -> Result<Retried<serde_json::Value>> {
    let Retried { value, retries } = get_bytes(client, policy, url, query, header).await?;
    let json = serde_json::from_slice(&value)
        .map_err(|e| EtlError::decode(format!("{}: invalid JSON: {}", url, e)))?;
    Ok(Retried {
        value: json,
        retries,
    })
}

/// Join a base URL and a path with exactly one slash
pub(crate) fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
