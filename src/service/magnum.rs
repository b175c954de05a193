// Adapter between the uniform cluster API and the OpenStack COE API
// (Magnum).

use crate::account::magnum::{MagnumAccount, MagnumTransport};
use crate::credentials::CredentialsBundle;
use crate::error::{Error, Result};
use crate::models::{Cluster, ClusterTemplate, Quotas};
use crate::service::{http, resolve_cluster, ClusterService};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

const BACKEND: &str = "magnum";
const POLLING_INTERVAL: Duration = Duration::from_secs(10);

pub struct MagnumService<'a> {
    account: &'a mut MagnumAccount,
    http: reqwest::Client,
    transport: Option<MagnumTransport>,
}

#[derive(Debug, Clone, Deserialize)]
struct MagnumCluster {
    uuid: String,
    name: String,
    status: String,
    #[serde(default)]
    status_reason: Option<String>,
    #[serde(default)]
    node_count: i64,
    #[serde(default)]
    master_count: i64,
    #[serde(default)]
    cluster_template_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MagnumTemplate {
    #[serde(default)]
    uuid: String,
    name: String,
    coe: String,
    #[serde(default)]
    server_type: String,
}

#[derive(Deserialize)]
struct ClustersEnvelope {
    clusters: Vec<MagnumCluster>,
}

#[derive(Deserialize)]
struct TemplatesEnvelope {
    clustertemplates: Vec<MagnumTemplate>,
}

#[derive(Deserialize)]
struct CreatedCluster {
    uuid: String,
}

#[derive(Deserialize)]
struct CredentialsEnvelope {
    files: BTreeMap<String, String>,
}

impl MagnumCluster {
    fn into_cluster(self) -> Cluster {
        Cluster {
            id: self.uuid,
            name: self.name,
            // Masters and workers are reported separately.
            nodes: format!("{}/{}", self.master_count, self.node_count),
            status: self.status,
            status_details: self.status_reason,
            template: self.cluster_template_id.map(|id| ClusterTemplate {
                name: id,
                coe: String::new(),
                host_type: String::new(),
            }),
        }
    }
}

fn deleted_cluster(name: &str) -> Cluster {
    Cluster {
        id: String::new(),
        name: name.to_string(),
        nodes: String::new(),
        status: "DELETE_COMPLETE".to_string(),
        status_details: None,
        template: None,
    }
}

impl<'a> MagnumService<'a> {
    pub fn new(account: &'a mut MagnumAccount) -> Result<Self> {
        Ok(Self {
            account,
            http: http::new_client()?,
            transport: None,
        })
    }

    async fn transport(&mut self) -> Result<MagnumTransport> {
        if let Some(transport) = &self.transport {
            return Ok(transport.clone());
        }
        let fresh = self.account.authenticate(&self.http).await?;
        self.transport = Some(fresh.clone());
        Ok(fresh)
    }

    /// Send a request, transparently repeating the login once when the token
    /// ages out mid-session.
    async fn send(
        &mut self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let transport = self.transport().await?;
        let response = self
            .build_request(&transport, method.clone(), path, body.clone())
            .send()
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::debug!("[magnum] token rejected mid-session, re-authenticating");
        let fresh = self.account.full_login(&self.http).await?;
        self.transport = Some(fresh.clone());

        Ok(self
            .build_request(&fresh, method, path, body)
            .send()
            .await?)
    }

    fn build_request(
        &self,
        transport: &MagnumTransport,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> reqwest::RequestBuilder {
        let url = format!("{}{path}", transport.endpoint.trim_end_matches('/'));
        let mut request = self
            .http
            .request(method, &url)
            .header("Accept", "application/json")
            .header("X-Auth-Token", &transport.token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        request
    }

    async fn list_clusters_inner(&mut self) -> Result<Vec<Cluster>> {
        let response = self.send(Method::GET, "/clusters", None).await?;
        let envelope: ClustersEnvelope = http::expect_success(response)?.json().await?;
        Ok(envelope
            .clusters
            .into_iter()
            .map(MagnumCluster::into_cluster)
            .collect())
    }

    async fn fetch_raw(&mut self, id: &str) -> Result<MagnumCluster> {
        let response = self.send(Method::GET, &format!("/clusters/{id}"), None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::ClusterNotFound(id.to_string()));
        }
        Ok(http::expect_success(response)?.json().await?)
    }

    async fn get_cluster_inner(&mut self, id_or_name: &str) -> Result<Cluster> {
        tracing::debug!("[magnum] Retrieving cluster ({id_or_name})");
        match self.fetch_raw(id_or_name).await {
            Ok(raw) => Ok(raw.into_cluster()),
            Err(err) if err.is_not_found() => {
                let clusters = self.list_clusters_inner().await?;
                resolve_cluster(&clusters, id_or_name)
            }
            Err(err) => Err(err),
        }
    }

    async fn lookup_template(&mut self, name: &str) -> Result<MagnumTemplate> {
        let response = self.send(Method::GET, "/clustertemplates", None).await?;
        let envelope: TemplatesEnvelope = http::expect_success(response)?.json().await?;

        let lowered = name.to_lowercase();
        envelope
            .clustertemplates
            .into_iter()
            .find(|t| t.name.to_lowercase() == lowered || t.uuid == name)
            .ok_or_else(|| Error::TemplateNotFound(name.to_string()))
    }
}

#[async_trait]
impl ClusterService for MagnumService<'_> {
    async fn get_quotas(&mut self) -> Result<Quotas> {
        Err(Error::NotSupported {
            backend: BACKEND,
            operation: "quotas",
        })
    }

    async fn create_cluster(&mut self, name: &str, template: &str, nodes: i64) -> Result<Cluster> {
        let result: Result<Cluster> = async {
            let template = self.lookup_template(template).await?;
            tracing::debug!(
                "[magnum] Creating a {nodes}-node {} cluster named {name}",
                template.coe
            );

            let body = json!({
                "name": name,
                "cluster_template_id": template.uuid,
                "node_count": nodes,
            });
            let response = self.send(Method::POST, "/clusters", Some(body)).await?;
            let created: CreatedCluster = http::expect_success(response)?.json().await?;

            let raw = self.fetch_raw(&created.uuid).await?;
            Ok(raw.into_cluster())
        }
        .await;
        result.map_err(|err| err.wrap(BACKEND, "create cluster"))
    }

    async fn list_clusters(&mut self) -> Result<Vec<Cluster>> {
        tracing::debug!("[magnum] Listing clusters");
        self.list_clusters_inner()
            .await
            .map_err(|err| err.wrap(BACKEND, "list clusters"))
    }

    async fn list_cluster_templates(&mut self) -> Result<Vec<ClusterTemplate>> {
        tracing::debug!("[magnum] Listing cluster templates");
        let result: Result<Vec<ClusterTemplate>> = async {
            let response = self.send(Method::GET, "/clustertemplates", None).await?;
            let envelope: TemplatesEnvelope = http::expect_success(response)?.json().await?;
            Ok(envelope
                .clustertemplates
                .into_iter()
                .map(|t| ClusterTemplate {
                    name: t.name,
                    coe: t.coe,
                    host_type: t.server_type,
                })
                .collect())
        }
        .await;
        result.map_err(|err| err.wrap(BACKEND, "list cluster templates"))
    }

    async fn get_cluster(&mut self, id_or_name: &str) -> Result<Cluster> {
        self.get_cluster_inner(id_or_name)
            .await
            .map_err(|err| err.wrap(BACKEND, format!("retrieve cluster ({id_or_name})")))
    }

    async fn get_cluster_credentials(&mut self, id_or_name: &str) -> Result<CredentialsBundle> {
        let result: Result<CredentialsBundle> = async {
            let cluster = self.get_cluster_inner(id_or_name).await?;
            tracing::debug!("[magnum] Retrieving cluster credentials ({})", cluster.name);
            let response = self
                .send(
                    Method::GET,
                    &format!("/clusters/{}/credentials", cluster.id),
                    None,
                )
                .await?;
            let envelope: CredentialsEnvelope = http::expect_success(response)?.json().await?;
            Ok(CredentialsBundle::from_text_files(envelope.files))
        }
        .await;
        result.map_err(|err| err.wrap(BACKEND, "retrieve the cluster credentials"))
    }

    async fn rebuild_cluster(&mut self, _id_or_name: &str) -> Result<Cluster> {
        Err(Error::NotSupported {
            backend: BACKEND,
            operation: "rebuild",
        })
    }

    async fn delete_cluster(&mut self, id_or_name: &str) -> Result<Cluster> {
        let resolved = match self.get_cluster_inner(id_or_name).await {
            Ok(cluster) => cluster,
            Err(err) if err.is_not_found() => {
                tracing::warn!("Could not find the cluster ({id_or_name}) to delete");
                return Ok(deleted_cluster(id_or_name));
            }
            Err(err) => {
                return Err(err.wrap(BACKEND, format!("delete cluster ({id_or_name})")))
            }
        };

        tracing::debug!("[magnum] Deleting cluster ({})", resolved.name);
        let result: Result<Cluster> = async {
            let response = self
                .send(Method::DELETE, &format!("/clusters/{}", resolved.id), None)
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                tracing::warn!("Could not find the cluster ({id_or_name}) to delete");
                return Ok(deleted_cluster(id_or_name));
            }
            http::expect_success(response)?;

            // The delete is asynchronous; report the transition we started.
            let mut cluster = resolved.clone();
            cluster.status = "DELETE_IN_PROGRESS".to_string();
            Ok(cluster)
        }
        .await;
        result.map_err(|err| err.wrap(BACKEND, format!("delete cluster ({id_or_name})")))
    }

    async fn grow_cluster(&mut self, id_or_name: &str, nodes: i64) -> Result<Cluster> {
        let result: Result<Cluster> = async {
            let current = self.get_cluster_inner(id_or_name).await?;
            let raw = self.fetch_raw(&current.id).await?;
            let target = raw.node_count + nodes;
            tracing::debug!(
                "[magnum] Growing cluster ({}) to {target} worker nodes",
                current.name
            );

            let body = json!([
                {"op": "replace", "path": "/node_count", "value": target}
            ]);
            let response = self
                .send(Method::PATCH, &format!("/clusters/{}", current.id), Some(body))
                .await?;
            http::expect_success(response)?;

            let raw = self.fetch_raw(&current.id).await?;
            Ok(raw.into_cluster())
        }
        .await;
        result.map_err(|err| err.wrap(BACKEND, format!("grow cluster ({id_or_name})")))
    }

    async fn set_auto_scale(&mut self, _id_or_name: &str, _enabled: bool) -> Result<Cluster> {
        Err(Error::NotSupported {
            backend: BACKEND,
            operation: "autoscaling",
        })
    }

    fn is_cluster_settled(&self, status: &str) -> bool {
        !status.to_uppercase().ends_with("_IN_PROGRESS")
    }

    fn is_cluster_gone(&self, status: &str) -> bool {
        status.to_uppercase() == "DELETE_COMPLETE"
    }

    fn is_cluster_failed(&self, status: &str) -> bool {
        let status = status.to_uppercase();
        status.ends_with("FAILED") || status == "ERROR"
    }

    fn polling_interval(&self) -> Duration {
        POLLING_INTERVAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn bind() -> (tokio::net::TcpListener, String) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, format!("http://{addr}"))
    }

    fn serve(listener: tokio::net::TcpListener, app: Router) {
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
    }

    fn account(base: &str) -> MagnumAccount {
        MagnumAccount {
            auth_endpoint: base.to_string(),
            username: "bob".to_string(),
            password: "hunter2".to_string(),
            region: Some("RegionOne".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_login_uses_the_override_but_caches_the_catalog_endpoint() {
        let (listener, base) = bind().await;
        let app = Router::new()
            .route(
                "/auth/tokens",
                post(|| async {
                    (
                        [("X-Subject-Token", "issued-token")],
                        Json(json!({"token": {"catalog": [{
                            "type": "container-infra",
                            "endpoints": [{"interface": "public", "region": "RegionOne", "url": "https://magnum.example.com/v1"}]
                        }]}})),
                    )
                }),
            )
            .route("/v1/clusters", get(|| async { Json(json!({"clusters": []})) }));
        serve(listener, app);

        let mut account = account(&base);
        account.endpoint_override = Some(format!("{base}/v1"));
        let mut service = MagnumService::new(&mut account).unwrap();

        let clusters = service.list_clusters().await.unwrap();
        assert!(clusters.is_empty());
        drop(service);

        assert_eq!(account.token.as_deref(), Some("issued-token"));
        // The catalog endpoint gets cached, never the override.
        let snapshot = account.build_cache();
        assert_eq!(
            snapshot.get("endpoint").map(String::as_str),
            Some("https://magnum.example.com/v1")
        );
    }

    #[derive(Clone)]
    struct RetryState {
        logins: Arc<AtomicUsize>,
        lists: Arc<AtomicUsize>,
        endpoint: String,
    }

    async fn issue_token(State(state): State<RetryState>) -> Response {
        state.logins.fetch_add(1, Ordering::SeqCst);
        (
            [("X-Subject-Token", "fresh-token")],
            Json(json!({"token": {"catalog": [{
                "type": "container-infra",
                "endpoints": [{"interface": "public", "region": "RegionOne", "url": state.endpoint}]
            }]}})),
        )
            .into_response()
    }

    async fn list_clusters(State(state): State<RetryState>, headers: HeaderMap) -> Response {
        state.lists.fetch_add(1, Ordering::SeqCst);
        let token = headers
            .get("x-auth-token")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        if token == "fresh-token" {
            Json(json!({"clusters": []})).into_response()
        } else {
            StatusCode::UNAUTHORIZED.into_response()
        }
    }

    #[tokio::test]
    async fn test_mid_session_401_triggers_one_relogin_and_retry() {
        let (listener, base) = bind().await;
        let state = RetryState {
            logins: Arc::new(AtomicUsize::new(0)),
            lists: Arc::new(AtomicUsize::new(0)),
            endpoint: format!("{base}/v1"),
        };
        let app = Router::new()
            .route("/auth/tokens", post(issue_token))
            .route("/v1/clusters", get(list_clusters))
            .with_state(state.clone());
        serve(listener, app);

        let mut account = account(&base);
        let mut service = MagnumService::new(&mut account).unwrap();
        // A transport built earlier in a long session whose token has since
        // expired.
        service.transport = Some(MagnumTransport {
            token: "expired-token".to_string(),
            endpoint: format!("{base}/v1"),
        });

        let clusters = ClusterService::list_clusters(&mut service).await.unwrap();
        assert!(clusters.is_empty());

        assert_eq!(state.logins.load(Ordering::SeqCst), 1);
        // One rejected call plus one retried call.
        assert_eq!(state.lists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_predicates_follow_the_magnum_vocabulary() {
        let mut account = account("http://127.0.0.1:1");
        let service = MagnumService::new(&mut account).unwrap();

        assert!(!service.is_cluster_settled("CREATE_IN_PROGRESS"));
        assert!(!service.is_cluster_settled("delete_in_progress"));
        assert!(service.is_cluster_settled("CREATE_COMPLETE"));
        assert!(service.is_cluster_gone("DELETE_COMPLETE"));
        assert!(service.is_cluster_failed("CREATE_FAILED"));
        assert!(service.is_cluster_failed("ERROR"));
        assert!(!service.is_cluster_failed("UPDATE_COMPLETE"));
    }

    #[tokio::test]
    async fn test_quotas_and_rebuild_are_rejected_without_touching_the_network() {
        let mut account = account("http://127.0.0.1:1");
        let mut service = MagnumService::new(&mut account).unwrap();

        assert!(matches!(
            service.get_quotas().await.unwrap_err(),
            Error::NotSupported { .. }
        ));
        assert!(matches!(
            service.rebuild_cluster("web").await.unwrap_err(),
            Error::NotSupported { .. }
        ));
    }
}
