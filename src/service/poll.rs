// Fixed-interval polling used to wait out asynchronous backend operations.
//
// The backends expose no push notifications, so the waiters sleep, re-fetch
// and re-classify until the backend's own predicates report a terminal
// state. Fetch errors propagate immediately; a failed status ends the wait
// with an error instead of polling forever. The loops impose no deadline of
// their own; callers bound them through the cancellation token.

use super::ClusterService;
use crate::error::{Error, Result};
use crate::models::Cluster;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub(crate) const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(10);

pub(crate) async fn wait_until_cluster_is_active<S>(
    service: &mut S,
    cluster: Cluster,
    cancel: &CancellationToken,
) -> Result<Cluster>
where
    S: ClusterService + ?Sized,
{
    if service.is_cluster_failed(&cluster.status) {
        return Err(failed(&cluster));
    }
    if service.is_cluster_settled(&cluster.status) {
        return Ok(cluster);
    }

    let id = cluster.id_or_name().to_string();
    loop {
        sleep_or_cancelled(service.polling_interval(), cancel).await?;

        let current = service.get_cluster(&id).await?;
        if service.is_cluster_failed(&current.status) {
            return Err(failed(&current));
        }
        if service.is_cluster_settled(&current.status) {
            return Ok(current);
        }

        tracing::debug!(
            "Waiting until cluster ({}) is active, currently in {}",
            current.name,
            current.status
        );
    }
}

pub(crate) async fn wait_until_cluster_is_deleted<S>(
    service: &mut S,
    cluster: Cluster,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: ClusterService + ?Sized,
{
    if service.is_cluster_gone(&cluster.status) {
        return Ok(());
    }

    let id = cluster.id_or_name().to_string();
    loop {
        sleep_or_cancelled(service.polling_interval(), cancel).await?;

        let current = match service.get_cluster(&id).await {
            Ok(current) => current,
            // The cluster finished deleting between the delete call and this
            // poll.
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        };

        if service.is_cluster_failed(&current.status) {
            return Err(Error::DeleteFailed(current.name));
        }
        if service.is_cluster_gone(&current.status) {
            return Ok(());
        }

        tracing::debug!(
            "Waiting until cluster ({}) is deleted, currently in {}",
            current.name,
            current.status
        );
    }
}

async fn sleep_or_cancelled(interval: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::WaitCancelled),
        _ = tokio::time::sleep(interval) => Ok(()),
    }
}

fn failed(cluster: &Cluster) -> Error {
    Error::ClusterFailed {
        name: cluster.name.clone(),
        status: cluster.status.clone(),
        details: cluster.status_details.clone(),
    }
}
