// Adapter between the uniform cluster API and Carina (make-coe).

use crate::account::identity::CarinaTransport;
use crate::account::MakeCoeAccount;
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

const BACKEND: &str = "make-coe";
const POLLING_INTERVAL: Duration = Duration::from_secs(5);

// Carina's service limits are fixed, not queryable.
const MAX_CLUSTERS: i64 = 3;
const MAX_NODES_PER_CLUSTER: i64 = 1;

pub struct MakeCoeService<'a> {
    account: &'a mut MakeCoeAccount,
    http: reqwest::Client,
    transport: Option<CarinaTransport>,
    cluster_types: Option<Vec<CoeClusterType>>,
}

#[derive(Debug, Clone, Deserialize)]
struct CoeCluster {
    id: String,
    name: String,
    status: String,
    #[serde(default)]
    status_details: Option<String>,
    #[serde(default)]
    node_count: i64,
    #[serde(default)]
    cluster_type: Option<CoeClusterType>,
}

#[derive(Debug, Clone, Deserialize)]
struct CoeClusterType {
    id: i64,
    name: String,
    coe: String,
    host_type: String,
}

#[derive(Deserialize)]
struct ClustersEnvelope {
    clusters: Vec<CoeCluster>,
}

#[derive(Deserialize)]
struct ClusterTypesEnvelope {
    cluster_types: Vec<CoeClusterType>,
}

#[derive(Deserialize)]
struct CredentialsEnvelope {
    files: BTreeMap<String, String>,
}

impl CoeCluster {
    fn into_cluster(self) -> Cluster {
        Cluster {
            id: self.id,
            name: self.name,
            nodes: self.node_count.to_string(),
            status: self.status,
            status_details: self.status_details,
            template: self.cluster_type.map(|t| ClusterTemplate {
                name: t.name,
                coe: t.coe,
                host_type: t.host_type,
            }),
        }
    }
}

fn deleted_cluster(name: &str) -> Cluster {
    Cluster {
        id: String::new(),
        name: name.to_string(),
        nodes: String::new(),
        status: "deleted".to_string(),
        status_details: None,
        template: None,
    }
}

impl<'a> MakeCoeService<'a> {
    pub fn new(account: &'a mut MakeCoeAccount) -> Result<Self> {
        Ok(Self {
            account,
            http: http::new_client()?,
            transport: None,
            cluster_types: None,
        })
    }

    async fn transport(&mut self) -> Result<CarinaTransport> {
        if let Some(transport) = &self.transport {
            return Ok(transport.clone());
        }
        let fresh = self.account.authenticate(&self.http).await?;
        self.transport = Some(fresh.clone());
        Ok(fresh)
    }

    async fn send(
        &mut self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        let transport = self.transport().await?;
        let url = format!("{}{path}", transport.endpoint.trim_end_matches('/'));
        let mut request = self
            .http
            .request(method, &url)
            .header("Accept", "application/json")
            .header("X-Auth-Token", &transport.token);
        if let Some(body) = body {
            request = request.json(&body);
        }
        Ok(request.send().await?)
    }

    async fn list_clusters_inner(&mut self) -> Result<Vec<Cluster>> {
        let response = self.send(Method::GET, "/clusters", None).await?;
        let envelope: ClustersEnvelope = http::expect_success(response)?.json().await?;
        Ok(envelope
            .clusters
            .into_iter()
            .map(CoeCluster::into_cluster)
            .collect())
    }

    async fn get_cluster_inner(&mut self, id_or_name: &str) -> Result<Cluster> {
        tracing::debug!("[make-coe] Retrieving cluster ({id_or_name})");
        let response = self
            .send(Method::GET, &format!("/clusters/{id_or_name}"), None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            // Not an id; look the argument up across the listing instead.
            let clusters = self.list_clusters_inner().await?;
            return resolve_cluster(&clusters, id_or_name);
        }
        let raw: CoeCluster = http::expect_success(response)?.json().await?;
        Ok(raw.into_cluster())
    }

    async fn cluster_types(&mut self) -> Result<Vec<CoeClusterType>> {
        if let Some(types) = &self.cluster_types {
            return Ok(types.clone());
        }

        tracing::debug!("[make-coe] Listing cluster types");
        let response = self.send(Method::GET, "/cluster_types", None).await?;
        let envelope: ClusterTypesEnvelope = http::expect_success(response)?.json().await?;
        self.cluster_types = Some(envelope.cluster_types.clone());
        Ok(envelope.cluster_types)
    }

    async fn lookup_cluster_type(&mut self, name: &str) -> Result<CoeClusterType> {
        let lowered = name.to_lowercase();
        self.cluster_types()
            .await?
            .into_iter()
            .find(|t| t.name.to_lowercase() == lowered)
            .ok_or_else(|| Error::TemplateNotFound(name.to_string()))
    }
}

#[async_trait]
impl ClusterService for MakeCoeService<'_> {
    async fn get_quotas(&mut self) -> Result<Quotas> {
        Ok(Quotas {
            max_clusters: MAX_CLUSTERS,
            max_nodes_per_cluster: MAX_NODES_PER_CLUSTER,
        })
    }

    async fn create_cluster(&mut self, name: &str, template: &str, nodes: i64) -> Result<Cluster> {
        let result: Result<Cluster> = async {
            let cluster_type = self.lookup_cluster_type(template).await?;
            tracing::debug!(
                "[make-coe] Creating a {nodes}-node {} cluster hosted on {} named {name}",
                cluster_type.coe,
                cluster_type.host_type
            );

            let body = json!({
                "name": name,
                "cluster_type_id": cluster_type.id,
                "node_count": nodes,
            });
            let response = self.send(Method::POST, "/clusters", Some(body)).await?;
            let raw: CoeCluster = http::expect_success(response)?.json().await?;
            Ok(raw.into_cluster())
        }
        .await;
        result.map_err(|err| err.wrap(BACKEND, "create cluster"))
    }

    async fn list_clusters(&mut self) -> Result<Vec<Cluster>> {
        tracing::debug!("[make-coe] Listing clusters");
        self.list_clusters_inner()
            .await
            .map_err(|err| err.wrap(BACKEND, "list clusters"))
    }

    async fn list_cluster_templates(&mut self) -> Result<Vec<ClusterTemplate>> {
        let types = self
            .cluster_types()
            .await
            .map_err(|err| err.wrap(BACKEND, "list cluster templates"))?;
        Ok(types
            .into_iter()
            .map(|t| ClusterTemplate {
                name: t.name,
                coe: t.coe,
                host_type: t.host_type,
            })
            .collect())
    }

    async fn get_cluster(&mut self, id_or_name: &str) -> Result<Cluster> {
        self.get_cluster_inner(id_or_name)
            .await
            .map_err(|err| err.wrap(BACKEND, format!("retrieve cluster ({id_or_name})")))
    }

    async fn get_cluster_credentials(&mut self, id_or_name: &str) -> Result<CredentialsBundle> {
        let result: Result<CredentialsBundle> = async {
            let cluster = self.get_cluster_inner(id_or_name).await?;
            tracing::debug!("[make-coe] Retrieving cluster credentials ({})", cluster.name);
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

    async fn rebuild_cluster(&mut self, id_or_name: &str) -> Result<Cluster> {
        let result: Result<Cluster> = async {
            let cluster = self.get_cluster_inner(id_or_name).await?;
            tracing::debug!("[make-coe] Rebuilding cluster ({})", cluster.name);
            let response = self
                .send(
                    Method::POST,
                    &format!("/clusters/{}/rebuild", cluster.id),
                    None,
                )
                .await?;
            let raw: CoeCluster = http::expect_success(response)?.json().await?;
            Ok(raw.into_cluster())
        }
        .await;
        result.map_err(|err| err.wrap(BACKEND, format!("rebuild cluster ({id_or_name})")))
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

        tracing::debug!("[make-coe] Deleting cluster ({})", resolved.name);
        let result: Result<Cluster> = async {
            let response = self
                .send(Method::DELETE, &format!("/clusters/{}", resolved.id), None)
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                // Some deletes finish fast enough to race us.
                tracing::warn!("Could not find the cluster ({id_or_name}) to delete");
                return Ok(deleted_cluster(id_or_name));
            }
            let raw: CoeCluster = http::expect_success(response)?.json().await?;
            Ok(raw.into_cluster())
        }
        .await;
        result.map_err(|err| err.wrap(BACKEND, format!("delete cluster ({id_or_name})")))
    }

    async fn grow_cluster(&mut self, id_or_name: &str, nodes: i64) -> Result<Cluster> {
        let result: Result<Cluster> = async {
            let cluster = self.get_cluster_inner(id_or_name).await?;
            tracing::debug!(
                "[make-coe] Growing cluster ({}) by {nodes} nodes",
                cluster.name
            );
            let response = self
                .send(
                    Method::POST,
                    &format!("/clusters/{}/grow", cluster.id),
                    Some(json!({ "nodes": nodes })),
                )
                .await?;
            let raw: CoeCluster = http::expect_success(response)?.json().await?;
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
        !matches!(
            status.to_lowercase().as_str(),
            "new" | "building" | "growing" | "rebuilding" | "deleting" | "hardening"
        )
    }

    fn is_cluster_gone(&self, status: &str) -> bool {
        status.to_lowercase() == "deleted"
    }

    fn is_cluster_failed(&self, status: &str) -> bool {
        status.to_lowercase() == "error"
    }

    fn polling_interval(&self) -> Duration {
        POLLING_INTERVAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::{delete, get, post};
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn spawn_backend(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn account(base: &str, token: Option<&str>) -> MakeCoeAccount {
        MakeCoeAccount {
            auth_endpoint: Some(base.to_string()),
            endpoint: Some(base.to_string()),
            username: "bob".to_string(),
            api_key: "abc123".to_string(),
            token: token.map(str::to_string),
        }
    }

    fn cluster_json(id: &str, name: &str, status: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": name,
            "status": status,
            "node_count": 1,
        })
    }

    #[tokio::test]
    async fn test_stale_cached_token_falls_back_to_full_login() {
        let logins = Arc::new(AtomicUsize::new(0));
        let counted = logins.clone();
        let app = Router::new()
            // The probe target; rejects the stale token.
            .route("/clusters/bob", get(|| async { StatusCode::UNAUTHORIZED }))
            .route(
                "/tokens",
                post(move || {
                    counted.fetch_add(1, Ordering::SeqCst);
                    async { Json(json!({"access": {"token": {"id": "fresh"}}})) }
                }),
            )
            .route("/clusters", get(|| async { Json(json!({"clusters": []})) }));
        let base = spawn_backend(app).await;

        let mut account = account(&base, Some("stale"));
        let mut service = MakeCoeService::new(&mut account).unwrap();

        let clusters = service.list_clusters().await.unwrap();
        assert!(clusters.is_empty());
        drop(service);

        assert_eq!(logins.load(Ordering::SeqCst), 1);
        assert_eq!(account.token.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn test_valid_cached_token_skips_the_full_login() {
        let logins = Arc::new(AtomicUsize::new(0));
        let counted = logins.clone();
        let app = Router::new()
            .route("/clusters/bob", get(|| async { StatusCode::OK }))
            .route(
                "/tokens",
                post(move || {
                    counted.fetch_add(1, Ordering::SeqCst);
                    async { Json(json!({"access": {"token": {"id": "fresh"}}})) }
                }),
            )
            .route("/clusters", get(|| async { Json(json!({"clusters": []})) }));
        let base = spawn_backend(app).await;

        let mut account = account(&base, Some("cached"));
        let mut service = MakeCoeService::new(&mut account).unwrap();

        service.list_clusters().await.unwrap();
        drop(service);

        assert_eq!(logins.load(Ordering::SeqCst), 0);
        assert_eq!(account.token.as_deref(), Some("cached"));
    }

    #[tokio::test]
    async fn test_get_cluster_with_ambiguous_name_lists_candidates() {
        let app = Router::new()
            .route("/clusters/bob", get(|| async { StatusCode::OK }))
            .route("/clusters/foo", get(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/clusters",
                get(|| async {
                    Json(json!({"clusters": [
                        cluster_json("11111111", "foo-1", "active"),
                        cluster_json("22222222", "foo-2", "active"),
                    ]}))
                }),
            );
        let base = spawn_backend(app).await;

        let mut account = account(&base, Some("cached"));
        let mut service = MakeCoeService::new(&mut account).unwrap();

        let err = service.get_cluster("foo").await.unwrap_err();
        match err.root_cause() {
            Error::AmbiguousCluster { candidates, .. } => {
                assert_eq!(
                    candidates,
                    &vec!["foo-1".to_string(), "foo-2".to_string()]
                );
            }
            other => panic!("expected an ambiguous-match error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_delete_tolerates_a_cluster_that_is_already_gone() {
        let app = Router::new()
            .route("/clusters/bob", get(|| async { StatusCode::OK }))
            .route(
                "/clusters/web",
                get(|| async { Json(cluster_json("33333333", "web", "active")) }),
            )
            .route(
                "/clusters/33333333",
                delete(|| async { StatusCode::NOT_FOUND }),
            );
        let base = spawn_backend(app).await;

        let mut account = account(&base, Some("cached"));
        let mut service = MakeCoeService::new(&mut account).unwrap();

        let cluster = service.delete_cluster("web").await.unwrap();
        assert_eq!(cluster.status, "deleted");
        assert!(service.is_cluster_gone(&cluster.status));
    }

    #[tokio::test]
    async fn test_create_with_unknown_template_fails_before_creating() {
        let app = Router::new()
            .route("/clusters/bob", get(|| async { StatusCode::OK }))
            .route(
                "/cluster_types",
                get(|| async {
                    Json(json!({"cluster_types": [
                        {"id": 1, "name": "Kubernetes 1.4.5 on LXC", "coe": "kubernetes", "host_type": "lxc"},
                    ]}))
                }),
            );
        let base = spawn_backend(app).await;

        let mut account = account(&base, Some("cached"));
        let mut service = MakeCoeService::new(&mut account).unwrap();

        let err = service.create_cluster("web", "Swarm on VM", 1).await.unwrap_err();
        assert!(matches!(
            err.root_cause(),
            Error::TemplateNotFound(name) if name == "Swarm on VM"
        ));
    }

    #[tokio::test]
    async fn test_template_lookup_is_case_insensitive() {
        let app = Router::new()
            .route("/clusters/bob", get(|| async { StatusCode::OK }))
            .route(
                "/cluster_types",
                get(|| async {
                    Json(json!({"cluster_types": [
                        {"id": 7, "name": "Kubernetes 1.4.5 on LXC", "coe": "kubernetes", "host_type": "lxc"},
                    ]}))
                }),
            );
        let base = spawn_backend(app).await;

        let mut account = account(&base, Some("cached"));
        let mut service = MakeCoeService::new(&mut account).unwrap();

        let found = service
            .lookup_cluster_type("kubernetes 1.4.5 on lxc")
            .await
            .unwrap();
        assert_eq!(found.id, 7);
    }

    #[tokio::test]
    async fn test_autoscale_is_rejected_without_touching_the_network() {
        // No routes at all: any request would fail the test with a
        // connection error instead of the fixed unsupported error.
        let mut account = account("http://127.0.0.1:1", None);
        let mut service = MakeCoeService::new(&mut account).unwrap();

        let err = service.set_auto_scale("web", true).await.unwrap_err();
        assert!(matches!(err, Error::NotSupported { .. }));
    }
}
