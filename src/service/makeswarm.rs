// Adapter between the uniform cluster API and Carina (make-swarm).

use crate::account::identity::CarinaTransport;
use crate::account::MakeSwarmAccount;
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

const BACKEND: &str = "make-swarm";
const POLLING_INTERVAL: Duration = Duration::from_secs(10);

const STATUS_NEW: &str = "new";
const STATUS_BUILDING: &str = "building";
const STATUS_REBUILDING: &str = "rebuilding-swarm";
const STATUS_GROWING: &str = "growing";

pub struct MakeSwarmService<'a> {
    account: &'a mut MakeSwarmAccount,
    http: reqwest::Client,
    transport: Option<CarinaTransport>,
}

/// Wire format of a make-swarm cluster. Clusters are addressed by name;
/// there is no separate id.
#[derive(Debug, Clone, Deserialize)]
struct SwarmCluster {
    cluster_name: String,
    #[serde(default)]
    flavor: String,
    #[serde(default)]
    nodes: i64,
    #[serde(default)]
    status: String,
}

#[derive(Deserialize)]
struct SwarmQuotas {
    max_clusters: i64,
    max_nodes_per_cluster: i64,
}

#[derive(Deserialize)]
struct CredentialsEnvelope {
    files: BTreeMap<String, String>,
}

impl SwarmCluster {
    fn into_cluster(self) -> Cluster {
        let template = ClusterTemplate {
            name: self.flavor,
            coe: "swarm".to_string(),
            host_type: "lxc".to_string(),
        };
        Cluster {
            id: self.cluster_name.clone(),
            name: self.cluster_name,
            nodes: self.nodes.to_string(),
            status: self.status,
            status_details: None,
            template: Some(template),
        }
    }
}

fn deleted_cluster(name: &str) -> Cluster {
    Cluster {
        id: name.to_string(),
        name: name.to_string(),
        nodes: String::new(),
        status: "deleted".to_string(),
        status_details: None,
        template: None,
    }
}

impl<'a> MakeSwarmService<'a> {
    pub fn new(account: &'a mut MakeSwarmAccount) -> Result<Self> {
        Ok(Self {
            account,
            http: http::new_client()?,
            transport: None,
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
        let url = format!(
            "{}/clusters/{}{path}",
            transport.endpoint.trim_end_matches('/'),
            transport.username
        );
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
        let response = self.send(Method::GET, "", None).await?;
        let clusters: Vec<SwarmCluster> = http::expect_success(response)?.json().await?;
        Ok(clusters
            .into_iter()
            .map(SwarmCluster::into_cluster)
            .collect())
    }

    async fn get_cluster_inner(&mut self, name: &str) -> Result<Cluster> {
        tracing::debug!("[make-swarm] Retrieving cluster ({name})");
        let response = self.send(Method::GET, &format!("/{name}"), None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            // No exact name match; try a fuzzy lookup across the listing.
            let clusters = self.list_clusters_inner().await?;
            return resolve_cluster(&clusters, name);
        }
        let raw: SwarmCluster = http::expect_success(response)?.json().await?;
        Ok(raw.into_cluster())
    }
}

#[async_trait]
impl ClusterService for MakeSwarmService<'_> {
    async fn get_quotas(&mut self) -> Result<Quotas> {
        tracing::debug!("[make-swarm] Retrieving account quotas");
        let result: Result<Quotas> = async {
            let transport = self.transport().await?;
            let url = format!(
                "{}/quotas/{}",
                transport.endpoint.trim_end_matches('/'),
                transport.username
            );
            let response = self
                .http
                .get(&url)
                .header("Accept", "application/json")
                .header("X-Auth-Token", &transport.token)
                .send()
                .await?;
            let quotas: SwarmQuotas = http::expect_success(response)?.json().await?;
            Ok(Quotas {
                max_clusters: quotas.max_clusters,
                max_nodes_per_cluster: quotas.max_nodes_per_cluster,
            })
        }
        .await;
        result.map_err(|err| err.wrap(BACKEND, "retrieve the account quotas"))
    }

    async fn create_cluster(&mut self, name: &str, template: &str, nodes: i64) -> Result<Cluster> {
        if !template.is_empty() {
            tracing::warn!(
                "make-swarm does not support cluster templates, ignoring {template}"
            );
        }

        tracing::debug!("[make-swarm] Creating {nodes}-node cluster ({name})");
        let body = json!({
            "cluster_name": name,
            "nodes": nodes,
            "autoscale": false,
        });
        let result: Result<Cluster> = async {
            let response = self.send(Method::POST, "", Some(body)).await?;
            let raw: SwarmCluster = http::expect_success(response)?.json().await?;
            Ok(raw.into_cluster())
        }
        .await;
        result.map_err(|err| err.wrap(BACKEND, "create the cluster"))
    }

    async fn list_clusters(&mut self) -> Result<Vec<Cluster>> {
        tracing::debug!("[make-swarm] Listing clusters");
        self.list_clusters_inner()
            .await
            .map_err(|err| err.wrap(BACKEND, "list clusters"))
    }

    async fn list_cluster_templates(&mut self) -> Result<Vec<ClusterTemplate>> {
        // make-swarm has no template concept.
        Ok(Vec::new())
    }

    async fn get_cluster(&mut self, id_or_name: &str) -> Result<Cluster> {
        self.get_cluster_inner(id_or_name)
            .await
            .map_err(|err| err.wrap(BACKEND, format!("retrieve cluster ({id_or_name})")))
    }

    async fn get_cluster_credentials(&mut self, id_or_name: &str) -> Result<CredentialsBundle> {
        let result: Result<CredentialsBundle> = async {
            let cluster = self.get_cluster_inner(id_or_name).await?;
            tracing::debug!(
                "[make-swarm] Retrieving cluster credentials ({})",
                cluster.name
            );
            let response = self
                .send(
                    Method::GET,
                    &format!("/{}/credentials", cluster.name),
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
            tracing::debug!("[make-swarm] Rebuilding cluster ({})", cluster.name);
            let response = self
                .send(Method::POST, &format!("/{}/rebuild", cluster.name), None)
                .await?;
            let raw: SwarmCluster = http::expect_success(response)?.json().await?;
            Ok(raw.into_cluster())
        }
        .await;
        result.map_err(|err| err.wrap(BACKEND, format!("rebuild cluster ({id_or_name})")))
    }

    async fn delete_cluster(&mut self, id_or_name: &str) -> Result<Cluster> {
        tracing::debug!("[make-swarm] Deleting cluster ({id_or_name})");
        let result: Result<Cluster> = async {
            let response = self
                .send(Method::DELETE, &format!("/{id_or_name}"), None)
                .await?;
            if response.status() == StatusCode::NOT_FOUND {
                tracing::warn!("Could not find the cluster ({id_or_name}) to delete");
                return Ok(deleted_cluster(id_or_name));
            }
            let raw: SwarmCluster = http::expect_success(response)?.json().await?;
            Ok(raw.into_cluster())
        }
        .await;
        result.map_err(|err| err.wrap(BACKEND, format!("delete cluster ({id_or_name})")))
    }

    async fn grow_cluster(&mut self, id_or_name: &str, nodes: i64) -> Result<Cluster> {
        let result: Result<Cluster> = async {
            let cluster = self.get_cluster_inner(id_or_name).await?;
            tracing::debug!(
                "[make-swarm] Growing cluster ({}) by {nodes} nodes",
                cluster.name
            );
            let response = self
                .send(
                    Method::POST,
                    &format!("/{}/grow", cluster.name),
                    Some(json!({ "nodes": nodes })),
                )
                .await?;
            let raw: SwarmCluster = http::expect_success(response)?.json().await?;
            Ok(raw.into_cluster())
        }
        .await;
        result.map_err(|err| err.wrap(BACKEND, format!("grow cluster ({id_or_name})")))
    }

    async fn set_auto_scale(&mut self, id_or_name: &str, enabled: bool) -> Result<Cluster> {
        let result: Result<Cluster> = async {
            let cluster = self.get_cluster_inner(id_or_name).await?;
            tracing::debug!(
                "[make-swarm] Changing the autoscale setting on the cluster ({}) to {enabled}",
                cluster.name
            );
            let response = self
                .send(
                    Method::PUT,
                    &format!("/{}/autoscale", cluster.name),
                    Some(json!({ "autoscale": enabled })),
                )
                .await?;
            let raw: SwarmCluster = http::expect_success(response)?.json().await?;
            Ok(raw.into_cluster())
        }
        .await;
        result.map_err(|err| {
            err.wrap(BACKEND, format!("change the cluster's autoscale setting ({id_or_name})"))
        })
    }

    fn is_cluster_settled(&self, status: &str) -> bool {
        // Transitions past "new" and "building" are assumed to be settled
        // states.
        !matches!(
            status.to_lowercase().as_str(),
            STATUS_NEW | STATUS_BUILDING | STATUS_REBUILDING | STATUS_GROWING
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
