// Rackspace-style identity service shared by the two Carina backends.

use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::json;

/// Identity endpoint used when no override is supplied.
pub(crate) const DEFAULT_AUTH_ENDPOINT: &str = "https://identity.api.rackspacecloud.com/v2.0";

/// A ready-to-use authenticated connection to a Carina-style API.
#[derive(Debug, Clone)]
pub(crate) struct CarinaTransport {
    pub endpoint: String,
    pub token: String,
    pub username: String,
}

#[derive(Deserialize)]
struct AccessResponse {
    access: Access,
}

#[derive(Deserialize)]
struct Access {
    token: AccessToken,
}

#[derive(Deserialize)]
struct AccessToken {
    id: String,
}

/// Trade a username and API key for a bearer token.
pub(crate) async fn apikey_login(
    http: &reqwest::Client,
    auth_endpoint: &str,
    backend: &'static str,
    username: &str,
    api_key: &str,
) -> Result<String> {
    let url = format!("{}/tokens", auth_endpoint.trim_end_matches('/'));
    let body = json!({
        "auth": {
            "RAX-KSKEY:apiKeyCredentials": {
                "username": username,
                "apiKey": api_key,
            }
        }
    });

    let response = http
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|err| Error::AuthenticationFailed {
            backend,
            message: err.to_string(),
        })?;

    if !response.status().is_success() {
        return Err(Error::AuthenticationFailed {
            backend,
            message: format!("the identity service at {url} responded {}", response.status()),
        });
    }

    let access: AccessResponse =
        response
            .json()
            .await
            .map_err(|err| Error::AuthenticationFailed {
                backend,
                message: format!("unable to read the identity response: {err}"),
            })?;

    Ok(access.access.token.id)
}
