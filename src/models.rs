use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// The cloud backends a cluster can be hosted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudType {
    Magnum,
    MakeSwarm,
    MakeCoe,
}

impl CloudType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudType::Magnum => "magnum",
            CloudType::MakeSwarm => "make-swarm",
            CloudType::MakeCoe => "make-coe",
        }
    }
}

impl fmt::Display for CloudType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CloudType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "magnum" => Ok(CloudType::Magnum),
            "make-swarm" => Ok(CloudType::MakeSwarm),
            "make-coe" => Ok(CloudType::MakeCoe),
            other => Err(Error::Config(format!(
                "Invalid cloud type: {other} (expected magnum, make-swarm or make-coe)"
            ))),
        }
    }
}

/// A cluster as reported by a backend.
///
/// Status strings use each backend's own vocabulary; the polling waiters
/// classify them through the backend's `ClusterService` predicates instead of
/// assuming a shared convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub id: String,
    pub name: String,
    /// Node count, as text. Magnum reports "masters/workers" composites.
    pub nodes: String,
    pub status: String,
    pub status_details: Option<String>,
    pub template: Option<ClusterTemplate>,
}

impl Cluster {
    /// The identifier to use when re-fetching the cluster; some backends only
    /// address clusters by name.
    pub fn id_or_name(&self) -> &str {
        if self.id.is_empty() {
            &self.name
        } else {
            &self.id
        }
    }
}

/// A template/flavor a cluster can be created from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTemplate {
    pub name: String,
    /// Container orchestration engine, e.g. kubernetes or swarm.
    pub coe: String,
    /// Underlying host type of the nodes, e.g. lxc or vm.
    pub host_type: String,
}

/// Account-level limits reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quotas {
    pub max_clusters: i64,
    pub max_nodes_per_cluster: i64,
}
