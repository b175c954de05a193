// Shared HTTP client configuration for the backend adapters.

use crate::error::{Error, Result};
use std::time::Duration;

/// Request timeout for ordinary API calls. Probes carry their own, shorter
/// timeouts.
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

pub(crate) fn new_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("coectl/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(Error::from)
}

/// Turn a non-2xx response into an error carrying the URL and status.
pub(crate) fn expect_success(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(Error::UnexpectedStatus {
            url: response.url().to_string(),
            status: status.as_u16(),
        })
    }
}
