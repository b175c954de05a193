// The uniform cluster API implemented by every backend adapter.

pub(crate) mod http;
pub mod magnum;
pub mod makecoe;
pub mod makeswarm;
pub mod poll;

use crate::account::Account;
use crate::credentials::CredentialsBundle;
use crate::error::{Error, Result};
use crate::models::{Cluster, ClusterTemplate, Quotas};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub use magnum::MagnumService;
pub use makecoe::MakeCoeService;
pub use makeswarm::MakeSwarmService;

/// Common interface over the three cluster APIs (magnum, make-swarm and
/// make-coe).
///
/// Every network-calling method authenticates lazily, once per adapter
/// instance. The `is_cluster_*` predicates classify each backend's own status
/// vocabulary so the polling waiters never guess at string conventions.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterService {
    /// Retrieve the quotas set for the account.
    async fn get_quotas(&mut self) -> Result<Quotas>;

    /// Create a new cluster. Backends without a template concept ignore
    /// `template` with a warning.
    async fn create_cluster(&mut self, name: &str, template: &str, nodes: i64) -> Result<Cluster>;

    /// Retrieve all clusters.
    async fn list_clusters(&mut self) -> Result<Vec<Cluster>>;

    /// Retrieve the templates available for creating a cluster. Backends
    /// without templates return an empty list.
    async fn list_cluster_templates(&mut self) -> Result<Vec<ClusterTemplate>>;

    /// Retrieve a cluster by its id or name (if unique).
    async fn get_cluster(&mut self, id_or_name: &str) -> Result<Cluster>;

    /// Retrieve the TLS certificates and configuration scripts for a cluster.
    async fn get_cluster_credentials(&mut self, id_or_name: &str) -> Result<CredentialsBundle>;

    /// Destroy and recreate a cluster.
    async fn rebuild_cluster(&mut self, id_or_name: &str) -> Result<Cluster>;

    /// Permanently delete a cluster. A cluster that is already gone counts
    /// as deleted, not as an error.
    async fn delete_cluster(&mut self, id_or_name: &str) -> Result<Cluster>;

    /// Add nodes to a cluster.
    async fn grow_cluster(&mut self, id_or_name: &str, nodes: i64) -> Result<Cluster>;

    /// Enable or disable autoscaling on a cluster.
    async fn set_auto_scale(&mut self, id_or_name: &str, enabled: bool) -> Result<Cluster>;

    /// True when `status` is terminal for a create/grow/rebuild operation.
    fn is_cluster_settled(&self, status: &str) -> bool;

    /// True when `status` means the cluster is gone.
    fn is_cluster_gone(&self, status: &str) -> bool;

    /// True when `status` reports a permanently failed operation.
    fn is_cluster_failed(&self, status: &str) -> bool;

    /// Pause between status polls.
    fn polling_interval(&self) -> Duration {
        poll::DEFAULT_POLLING_INTERVAL
    }

    /// Poll the cluster until the prior operation completes, fails, or the
    /// wait is cancelled.
    async fn wait_until_cluster_is_active(
        &mut self,
        cluster: Cluster,
        cancel: &CancellationToken,
    ) -> Result<Cluster> {
        poll::wait_until_cluster_is_active(self, cluster, cancel).await
    }

    /// Poll the cluster until it is gone, the delete fails, or the wait is
    /// cancelled.
    async fn wait_until_cluster_is_deleted(
        &mut self,
        cluster: Cluster,
        cancel: &CancellationToken,
    ) -> Result<()> {
        poll::wait_until_cluster_is_deleted(self, cluster, cancel).await
    }
}

/// The closed set of backend adapters. The factory below is the only place
/// that maps a cloud tag to an implementation, so adding a backend is a
/// compile-enforced change here.
pub enum ServiceKind<'a> {
    Magnum(MagnumService<'a>),
    MakeSwarm(MakeSwarmService<'a>),
    MakeCoe(MakeCoeService<'a>),
}

impl<'a> ServiceKind<'a> {
    pub fn inner(&mut self) -> &mut (dyn ClusterService + Send) {
        match self {
            ServiceKind::Magnum(service) => service,
            ServiceKind::MakeSwarm(service) => service,
            ServiceKind::MakeCoe(service) => service,
        }
    }
}

/// Build the adapter matching the account's backend.
pub fn for_account(account: &mut Account) -> Result<ServiceKind<'_>> {
    Ok(match account {
        Account::Magnum(account) => ServiceKind::Magnum(MagnumService::new(account)?),
        Account::MakeSwarm(account) => ServiceKind::MakeSwarm(MakeSwarmService::new(account)?),
        Account::MakeCoe(account) => ServiceKind::MakeCoe(MakeCoeService::new(account)?),
    })
}

/// Resolve a user-supplied id or name against a listing.
///
/// An exact id match wins, then a unique exact name, then a unique prefix of
/// either. Several matches is an error naming every candidate; the client
/// must disambiguate, we never pick one.
pub(crate) fn resolve_cluster(clusters: &[Cluster], id_or_name: &str) -> Result<Cluster> {
    if let Some(found) = clusters.iter().find(|c| c.id == id_or_name) {
        return Ok(found.clone());
    }

    let named: Vec<&Cluster> = clusters.iter().filter(|c| c.name == id_or_name).collect();
    if named.len() == 1 {
        return Ok(named[0].clone());
    }

    let matches: Vec<&Cluster> = if named.is_empty() {
        clusters
            .iter()
            .filter(|c| c.id.starts_with(id_or_name) || c.name.starts_with(id_or_name))
            .collect()
    } else {
        named
    };

    match matches.len() {
        0 => Err(Error::ClusterNotFound(id_or_name.to_string())),
        1 => Ok(matches[0].clone()),
        _ => Err(Error::AmbiguousCluster {
            name: id_or_name.to_string(),
            candidates: matches.iter().map(|c| c.name.clone()).collect(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster(id: &str, name: &str) -> Cluster {
        Cluster {
            id: id.to_string(),
            name: name.to_string(),
            nodes: "1".to_string(),
            status: "active".to_string(),
            status_details: None,
            template: None,
        }
    }

    #[test]
    fn test_resolve_prefers_exact_id() {
        let clusters = vec![cluster("foo", "one"), cluster("bar", "foo")];
        let found = resolve_cluster(&clusters, "foo").unwrap();
        assert_eq!(found.name, "one");
    }

    #[test]
    fn test_resolve_falls_back_to_unique_prefix() {
        let clusters = vec![cluster("aaa1", "web"), cluster("bbb2", "db")];
        let found = resolve_cluster(&clusters, "we").unwrap();
        assert_eq!(found.name, "web");
    }

    #[test]
    fn test_resolve_ambiguous_prefix_names_all_candidates() {
        let clusters = vec![cluster("id1", "foo-1"), cluster("id2", "foo-2")];
        let err = resolve_cluster(&clusters, "foo").unwrap_err();
        match err {
            Error::AmbiguousCluster { name, candidates } => {
                assert_eq!(name, "foo");
                assert_eq!(candidates, vec!["foo-1".to_string(), "foo-2".to_string()]);
            }
            other => panic!("expected an ambiguous-match error, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_unknown_is_not_found() {
        let err = resolve_cluster(&[cluster("id1", "web")], "missing").unwrap_err();
        assert!(err.is_not_found());
    }
}
