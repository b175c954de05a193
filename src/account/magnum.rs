// OpenStack Identity (keystone) v3 authentication for the Magnum backend.

use crate::account::endpoint_hash;
use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

/// Timeout for the cheap token-validity probe; a full request timeout would
/// make a dead identity service stall every command.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

const CATALOG_SERVICE_TYPES: [&str; 2] = ["container-infra", "container-orchestration"];

/// Credentials accepted by OpenStack Identity, plus the token and
/// catalog-resolved endpoint picked up by authenticating.
#[derive(Debug, Clone, Default)]
pub struct MagnumAccount {
    pub auth_endpoint: String,
    /// Data-plane URL supplied by the user. Used for requests when present,
    /// but never cached; a future run without the override must still
    /// resolve through the catalog.
    pub endpoint_override: Option<String>,
    pub username: String,
    pub password: String,
    pub project: Option<String>,
    pub domain: Option<String>,
    pub region: Option<String>,
    pub(crate) token: Option<String>,
    /// Endpoint resolved from the service catalog.
    pub(crate) endpoint: Option<String>,
}

/// An authenticated connection to a Magnum API.
#[derive(Debug, Clone)]
pub(crate) struct MagnumTransport {
    pub token: String,
    pub endpoint: String,
}

impl MagnumAccount {
    /// Unique account id, e.g. magnum-[auth endpoint hash]-[username].
    pub fn id(&self) -> String {
        format!(
            "magnum-{}-{}",
            endpoint_hash(&self.auth_endpoint),
            self.username
        )
    }

    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(Error::Config("--username is required".to_string()));
        }
        if self.password.is_empty() {
            return Err(Error::Config("--password is required".to_string()));
        }
        if self.auth_endpoint.is_empty() {
            return Err(Error::Config("--auth-endpoint is required".to_string()));
        }
        Ok(())
    }

    /// Prefix for the account's downloaded credentials, derived from the
    /// endpoint actually used to reach the data plane.
    pub fn cluster_prefix(&self) -> Result<String> {
        let endpoint = self
            .endpoint_override
            .as_deref()
            .or(self.endpoint.as_deref())
            .ok_or_else(|| {
                Error::Config(
                    "cannot derive the cluster credentials prefix before authenticating".to_string(),
                )
            })?;
        Ok(format!(
            "magnum-{}-{}",
            endpoint_hash(endpoint),
            self.username
        ))
    }

    pub fn build_cache(&self) -> BTreeMap<String, String> {
        let mut entry = BTreeMap::new();
        if let Some(token) = &self.token {
            entry.insert("token".to_string(), token.clone());
        }
        if let Some(endpoint) = &self.endpoint {
            entry.insert("endpoint".to_string(), endpoint.clone());
        }
        entry
    }

    pub fn apply_cache(&mut self, entry: &BTreeMap<String, String>) {
        if let Some(token) = entry.get("token").filter(|t| !t.is_empty()) {
            self.token = Some(token.clone());
        }
        if let Some(endpoint) = entry.get("endpoint").filter(|e| !e.is_empty()) {
            self.endpoint = Some(endpoint.clone());
        }
    }

    /// Produce an authenticated transport, preferring the cached token when
    /// a quick probe shows it is still valid.
    pub(crate) async fn authenticate(&mut self, http: &reqwest::Client) -> Result<MagnumTransport> {
        if let (Some(token), Some(endpoint)) = (self.token.clone(), self.endpoint.clone()) {
            tracing::debug!("[magnum] attempting to authenticate with a cached token for {endpoint}");
            if self.probe_token(http, &token).await {
                tracing::debug!("[magnum] authentication successful");
                // Reuse the cached catalog endpoint verbatim; no re-discovery.
                let data_plane = self.endpoint_override.clone().unwrap_or(endpoint);
                return Ok(MagnumTransport {
                    token,
                    endpoint: data_plane,
                });
            }

            // An expired cache is an expected steady-state condition, not an
            // error the user should see.
            tracing::debug!("[magnum] discarding expired cached token and endpoint");
            self.token = None;
            self.endpoint = None;
        }

        tracing::debug!("[magnum] attempting to authenticate with a password");
        let transport = self.full_login(http).await?;
        tracing::debug!("[magnum] authentication successful");
        Ok(transport)
    }

    async fn probe_token(&self, http: &reqwest::Client, token: &str) -> bool {
        let url = format!("{}/auth/tokens", self.auth_endpoint.trim_end_matches('/'));
        let result = http
            .head(&url)
            .header("X-Auth-Token", token)
            .header("X-Subject-Token", token)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Password login against keystone. Captures the issued token and the
    /// catalog-resolved endpoint for future caching.
    pub(crate) async fn full_login(&mut self, http: &reqwest::Client) -> Result<MagnumTransport> {
        let url = format!("{}/auth/tokens", self.auth_endpoint.trim_end_matches('/'));

        let response = http
            .post(&url)
            .json(&self.auth_request_body())
            .send()
            .await
            .map_err(|err| Error::AuthenticationFailed {
                backend: "magnum",
                message: err.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(Error::AuthenticationFailed {
                backend: "magnum",
                message: format!("the identity service at {url} responded {}", response.status()),
            });
        }

        let token = response
            .headers()
            .get("x-subject-token")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::AuthenticationFailed {
                backend: "magnum",
                message: "the identity response is missing the X-Subject-Token header".to_string(),
            })?;

        let body: TokenResponse =
            response
                .json()
                .await
                .map_err(|err| Error::AuthenticationFailed {
                    backend: "magnum",
                    message: format!("unable to read the identity response: {err}"),
                })?;

        let endpoint = resolve_endpoint(&body.token.catalog, self.region.as_deref())?;

        self.token = Some(token.clone());
        // Cache what the catalog said, not the override.
        self.endpoint = Some(endpoint.clone());

        let data_plane = self.endpoint_override.clone().unwrap_or(endpoint);
        Ok(MagnumTransport {
            token,
            endpoint: data_plane,
        })
    }

    fn auth_request_body(&self) -> serde_json::Value {
        let domain = self.domain.as_deref().unwrap_or("Default");
        let mut auth = json!({
            "identity": {
                "methods": ["password"],
                "password": {
                    "user": {
                        "name": self.username,
                        "domain": {"name": domain},
                        "password": self.password,
                    }
                }
            }
        });

        if let Some(project) = &self.project {
            auth["scope"] = json!({
                "project": {
                    "name": project,
                    "domain": {"name": domain},
                }
            });
        }

        json!({ "auth": auth })
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    token: TokenBody,
}

#[derive(Deserialize)]
struct TokenBody {
    #[serde(default)]
    catalog: Vec<CatalogEntry>,
}

#[derive(Deserialize)]
struct CatalogEntry {
    #[serde(rename = "type")]
    service_type: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Deserialize)]
struct CatalogEndpoint {
    interface: String,
    #[serde(default)]
    region: Option<String>,
    url: String,
}

fn resolve_endpoint(catalog: &[CatalogEntry], region: Option<&str>) -> Result<String> {
    for entry in catalog {
        if !CATALOG_SERVICE_TYPES.contains(&entry.service_type.as_str()) {
            continue;
        }
        for endpoint in &entry.endpoints {
            if endpoint.interface != "public" {
                continue;
            }
            if let Some(wanted) = region {
                if endpoint.region.as_deref() != Some(wanted) {
                    continue;
                }
            }
            return Ok(endpoint.url.clone());
        }
    }

    Err(Error::AuthenticationFailed {
        backend: "magnum",
        message: match region {
            Some(region) => format!(
                "the service catalog has no public container-infra endpoint in region {region}"
            ),
            None => "the service catalog has no public container-infra endpoint".to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<CatalogEntry> {
        serde_json::from_value(json!([
            {
                "type": "identity",
                "endpoints": [{"interface": "public", "region": "RegionOne", "url": "https://keystone.example.com/v3"}]
            },
            {
                "type": "container-infra",
                "endpoints": [
                    {"interface": "admin", "region": "RegionOne", "url": "https://magnum-admin.example.com/v1"},
                    {"interface": "public", "region": "RegionOne", "url": "https://magnum.example.com/v1"},
                    {"interface": "public", "region": "RegionTwo", "url": "https://magnum2.example.com/v1"}
                ]
            }
        ]))
        .unwrap()
    }

    #[test]
    fn test_resolve_endpoint_honors_region() {
        let endpoint = resolve_endpoint(&catalog(), Some("RegionTwo")).unwrap();
        assert_eq!(endpoint, "https://magnum2.example.com/v1");
    }

    #[test]
    fn test_resolve_endpoint_defaults_to_first_public() {
        let endpoint = resolve_endpoint(&catalog(), None).unwrap();
        assert_eq!(endpoint, "https://magnum.example.com/v1");
    }

    #[test]
    fn test_resolve_endpoint_missing_service_is_an_auth_error() {
        let err = resolve_endpoint(&catalog(), Some("RegionNine")).unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed { backend: "magnum", .. }));
    }

    #[test]
    fn test_id_ignores_dynamic_fields() {
        let mut account = MagnumAccount {
            auth_endpoint: "https://keystone.example.com/v3".to_string(),
            username: "bob".to_string(),
            password: "hunter2".to_string(),
            ..Default::default()
        };
        let before = account.id();

        account.token = Some("token".to_string());
        account.endpoint = Some("https://magnum.example.com/v1".to_string());

        assert_eq!(before, account.id());
    }

    #[test]
    fn test_cache_round_trip_restores_token_and_endpoint() {
        let authenticated = MagnumAccount {
            auth_endpoint: "https://keystone.example.com/v3".to_string(),
            username: "bob".to_string(),
            password: "hunter2".to_string(),
            token: Some("token".to_string()),
            endpoint: Some("https://magnum.example.com/v1".to_string()),
            ..Default::default()
        };

        let mut fresh = MagnumAccount {
            token: None,
            endpoint: None,
            ..authenticated.clone()
        };
        fresh.apply_cache(&authenticated.build_cache());

        assert_eq!(fresh.token, authenticated.token);
        assert_eq!(fresh.endpoint, authenticated.endpoint);
    }
}
