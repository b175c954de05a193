// Rackspace Identity authentication for the Carina make-coe backend.

use crate::account::identity::{self, CarinaTransport};
use crate::account::endpoint_hash;
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::time::Duration;

const DEFAULT_ENDPOINT: &str = "https://api.getcarina.com";
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Credentials accepted by Rackspace Identity for make-coe.
#[derive(Debug, Clone, Default)]
pub struct MakeCoeAccount {
    pub auth_endpoint: Option<String>,
    /// Custom API endpoint; production users never set this.
    pub endpoint: Option<String>,
    pub username: String,
    pub api_key: String,
    pub(crate) token: Option<String>,
}

impl MakeCoeAccount {
    /// Unique account id, e.g. make-coe[-custom endpoint hash]-[username].
    pub fn id(&self) -> String {
        match &self.endpoint {
            None => format!("make-coe-{}", self.username),
            Some(endpoint) => format!("make-coe-{}-{}", endpoint_hash(endpoint), self.username),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(Error::Config("--username is required".to_string()));
        }
        if self.api_key.is_empty() {
            return Err(Error::Config("--api-key is required".to_string()));
        }
        Ok(())
    }

    pub(crate) fn effective_endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }

    fn effective_auth_endpoint(&self) -> &str {
        self.auth_endpoint
            .as_deref()
            .unwrap_or(identity::DEFAULT_AUTH_ENDPOINT)
    }

    pub fn build_cache(&self) -> BTreeMap<String, String> {
        let mut entry = BTreeMap::new();
        if let Some(token) = &self.token {
            entry.insert("token".to_string(), token.clone());
            if let Some(endpoint) = &self.endpoint {
                entry.insert("endpoint".to_string(), endpoint.clone());
            }
        }
        entry
    }

    pub fn apply_cache(&mut self, entry: &BTreeMap<String, String>) {
        if let Some(token) = entry.get("token").filter(|t| !t.is_empty()) {
            self.token = Some(token.clone());
        }

        // Don't let a cached value nuke the endpoint specified by the user.
        if self.endpoint.is_none() {
            if let Some(endpoint) = entry.get("endpoint").filter(|e| !e.is_empty()) {
                self.endpoint = Some(endpoint.clone());
            }
        }
    }

    pub(crate) async fn authenticate(&mut self, http: &reqwest::Client) -> Result<CarinaTransport> {
        if let Some(token) = self.token.clone() {
            tracing::debug!("[make-coe] attempting to authenticate with a cached token");
            if self.probe_token(http, &token).await {
                tracing::debug!("[make-coe] authentication successful");
                return Ok(CarinaTransport {
                    endpoint: self.effective_endpoint().to_string(),
                    token,
                    username: self.username.clone(),
                });
            }

            tracing::debug!("[make-coe] discarding expired cached token");
            self.token = None;
        }

        tracing::debug!("[make-coe] attempting to authenticate with an API key");
        let token = identity::apikey_login(
            http,
            self.effective_auth_endpoint(),
            "make-coe",
            &self.username,
            &self.api_key,
        )
        .await?;
        tracing::debug!("[make-coe] authentication successful");

        self.token = Some(token.clone());
        Ok(CarinaTransport {
            endpoint: self.effective_endpoint().to_string(),
            token,
            username: self.username.clone(),
        })
    }

    /// Cheap request that tells us whether a cached token is still accepted.
    async fn probe_token(&self, http: &reqwest::Client, token: &str) -> bool {
        let url = format!(
            "{}/clusters/{}",
            self.effective_endpoint().trim_end_matches('/'),
            self.username
        );
        let result = http
            .head(&url)
            .header("Accept", "application/json")
            .header("X-Auth-Token", token)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await;

        match result {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
