// The single entry point used by the CLI: picks the right adapter for an
// account, applies the credential cache around every call, and composes
// credential download with bundle verification.

use crate::account::Account;
use crate::cache::CredentialCache;
use crate::credentials::{self, CredentialsBundle};
use crate::error::{Error, Result};
use crate::models::{Cluster, ClusterTemplate, Quotas};
use crate::paths;
use crate::service;
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

pub struct Client {
    cache: CredentialCache,
}

impl Client {
    /// Build a client. Failing to initialize the cache disables it with a
    /// warning; caching is an optimization, never a requirement.
    pub fn new(cache_enabled: bool) -> Self {
        let cache = if cache_enabled {
            match paths::cache_file().and_then(CredentialCache::load) {
                Ok(cache) => cache,
                Err(err) => {
                    tracing::warn!("The cache has been disabled due to the following error: {err}");
                    CredentialCache::disabled()
                }
            }
        } else {
            CredentialCache::disabled()
        };

        Self { cache }
    }

    pub fn with_cache(cache: CredentialCache) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &CredentialCache {
        &self.cache
    }

    pub async fn get_quotas(&self, account: &mut Account) -> Result<Quotas> {
        self.prepare(account)?;
        let result = {
            let mut service = service::for_account(account)?;
            service.inner().get_quotas().await
        };
        self.persist(account);
        result
    }

    pub async fn create_cluster(
        &self,
        account: &mut Account,
        name: &str,
        template: &str,
        nodes: i64,
        wait: bool,
        cancel: &CancellationToken,
    ) -> Result<Cluster> {
        if nodes < 1 {
            return Err(Error::Config("--nodes must be at least 1".to_string()));
        }

        self.prepare(account)?;
        let result = {
            let mut service = service::for_account(account)?;
            let service = service.inner();
            let created = service.create_cluster(name, template, nodes).await;
            match created {
                Ok(cluster) if wait => service.wait_until_cluster_is_active(cluster, cancel).await,
                other => other,
            }
        };
        self.persist(account);
        result
    }

    pub async fn list_clusters(&self, account: &mut Account) -> Result<Vec<Cluster>> {
        self.prepare(account)?;
        let result = {
            let mut service = service::for_account(account)?;
            service.inner().list_clusters().await
        };
        self.persist(account);
        result
    }

    pub async fn list_cluster_templates(
        &self,
        account: &mut Account,
    ) -> Result<Vec<ClusterTemplate>> {
        self.prepare(account)?;
        let result = {
            let mut service = service::for_account(account)?;
            service.inner().list_cluster_templates().await
        };
        self.persist(account);
        result
    }

    pub async fn get_cluster(
        &self,
        account: &mut Account,
        name: &str,
        wait: bool,
        cancel: &CancellationToken,
    ) -> Result<Cluster> {
        self.prepare(account)?;
        let result = {
            let mut service = service::for_account(account)?;
            let service = service.inner();
            let fetched = service.get_cluster(name).await;
            match fetched {
                Ok(cluster) if wait => service.wait_until_cluster_is_active(cluster, cancel).await,
                other => other,
            }
        };
        self.persist(account);
        result
    }

    pub async fn grow_cluster(
        &self,
        account: &mut Account,
        name: &str,
        nodes: i64,
        wait: bool,
        cancel: &CancellationToken,
    ) -> Result<Cluster> {
        if nodes < 1 {
            return Err(Error::Config("--nodes must be at least 1".to_string()));
        }

        self.prepare(account)?;
        let result = {
            let mut service = service::for_account(account)?;
            let service = service.inner();
            let grown = service.grow_cluster(name, nodes).await;
            match grown {
                Ok(cluster) if wait => service.wait_until_cluster_is_active(cluster, cancel).await,
                other => other,
            }
        };
        self.persist(account);
        result
    }

    pub async fn rebuild_cluster(
        &self,
        account: &mut Account,
        name: &str,
        wait: bool,
        cancel: &CancellationToken,
    ) -> Result<Cluster> {
        self.prepare(account)?;
        let result = {
            let mut service = service::for_account(account)?;
            let service = service.inner();
            let rebuilt = service.rebuild_cluster(name).await;
            match rebuilt {
                Ok(cluster) if wait => service.wait_until_cluster_is_active(cluster, cancel).await,
                other => other,
            }
        };
        self.persist(account);
        result
    }

    pub async fn set_auto_scale(
        &self,
        account: &mut Account,
        name: &str,
        enabled: bool,
    ) -> Result<Cluster> {
        self.prepare(account)?;
        let result = {
            let mut service = service::for_account(account)?;
            service.inner().set_auto_scale(name, enabled).await
        };
        self.persist(account);
        result
    }

    pub async fn delete_cluster(
        &self,
        account: &mut Account,
        name: &str,
        wait: bool,
        cancel: &CancellationToken,
    ) -> Result<Cluster> {
        self.prepare(account)?;
        let result = {
            let mut service = service::for_account(account)?;
            let service = service.inner();
            let deleted = service.delete_cluster(name).await;
            match deleted {
                Ok(cluster) if wait => service
                    .wait_until_cluster_is_deleted(cluster.clone(), cancel)
                    .await
                    .map(|()| cluster),
                other => other,
            }
        };
        self.persist(account);

        if result.is_ok() {
            if let Err(err) = self.delete_cluster_credentials(account, name, None) {
                tracing::warn!("Unable to remove the downloaded credentials for {name}: {err}");
            }
        }

        result
    }

    /// Download the TLS certificates and configuration scripts for a cluster
    /// and write them to the credentials directory.
    pub async fn download_cluster_credentials(
        &self,
        account: &mut Account,
        name: &str,
        custom_path: Option<&Path>,
    ) -> Result<PathBuf> {
        self.prepare(account)?;
        let result = {
            let mut service = service::for_account(account)?;
            service.inner().get_cluster_credentials(name).await
        };
        self.persist(account);
        let bundle = result?;

        let prefix = account.cluster_prefix()?;
        let dir = paths::cluster_credentials_dir(&prefix, name, custom_path)?;
        bundle.save(&dir)?;
        Ok(dir)
    }

    /// The shell command that loads a cluster's credentials, re-downloading
    /// the bundle when files are missing or it no longer verifies.
    pub async fn get_source_command(
        &self,
        account: &mut Account,
        shell: &str,
        name: &str,
        custom_path: Option<&Path>,
    ) -> Result<String> {
        self.prepare(account)?;

        let mut existing = account
            .cluster_prefix()
            .and_then(|prefix| paths::cluster_credentials_dir(&prefix, name, custom_path))
            .ok();
        if let Some(dir) = &existing {
            if !bundle_is_usable(dir, shell).await {
                existing = None;
            }
        }

        let dir = match existing {
            Some(dir) => dir,
            // Re-download when the bundle is missing files or fails
            // verification.
            None => {
                self.download_cluster_credentials(account, name, custom_path)
                    .await?
            }
        };

        let script = script_for_shell(&dir, shell)?;
        Ok(source_help(&script, shell))
    }

    /// Remove a cluster's downloaded credentials, refusing to delete
    /// anything that does not look like a credentials directory.
    pub fn delete_cluster_credentials(
        &self,
        account: &Account,
        name: &str,
        custom_path: Option<&Path>,
    ) -> Result<()> {
        let prefix = account.cluster_prefix()?;
        let dir = paths::cluster_credentials_dir(&prefix, name, custom_path)?;

        let display = dir.to_string_lossy();
        if display.is_empty() || display == "." || display == "/" {
            return Err(Error::Config(
                "Path to the cluster credentials is empty, the current directory, or a root path; not deleting".to_string(),
            ));
        }

        if !dir.exists() {
            // The credentials were never downloaded.
            return Ok(());
        }

        if !dir.join(credentials::CA_FILE).exists() {
            return Err(Error::Config(format!(
                "Path to the cluster credentials exists but {} is missing; not deleting",
                credentials::CA_FILE
            )));
        }

        fs::remove_dir_all(&dir)?;
        Ok(())
    }

    fn prepare(&self, account: &mut Account) -> Result<()> {
        account.validate()?;
        tracing::debug!(
            "Using {} account {}",
            account.cloud_type(),
            account.id()
        );
        self.cache.apply(account);
        Ok(())
    }

    /// Saving the cache must never fail an operation that already succeeded.
    fn persist(&self, account: &Account) {
        if let Err(err) = self.cache.save_account(account) {
            tracing::warn!("Unable to save the credential cache: {err}");
        }
    }
}

async fn bundle_is_usable(dir: &Path, shell: &str) -> bool {
    let Ok(script) = script_for_shell(dir, shell) else {
        return false;
    };
    if !script.exists() {
        return false;
    }
    match CredentialsBundle::load(dir) {
        Ok(bundle) => bundle.verify().await.is_ok(),
        Err(_) => false,
    }
}

/// Identify the connection-script flavor (docker or kubectl) by the bash
/// script present in the bundle, then pick the file for the user's shell.
fn script_for_shell(dir: &Path, shell: &str) -> Result<PathBuf> {
    let prefix = credential_script_prefix(dir)?;
    let file = match shell {
        "bash" | "sh" | "zsh" => format!("{prefix}.env"),
        "fish" => format!("{prefix}.fish"),
        "powershell" | "pwsh" => format!("{prefix}.ps1"),
        "cmd" => format!("{prefix}.cmd"),
        other => {
            return Err(Error::Config(format!(
                "Invalid shell: {other}. Allowed values: bash, fish, powershell, cmd"
            )))
        }
    };
    Ok(dir.join(file))
}

fn credential_script_prefix(dir: &Path) -> Result<String> {
    let mut prefixes = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            if let Some(name) = name.to_str() {
                if let Some(prefix) = name.strip_suffix(".env") {
                    prefixes.push(prefix.to_string());
                }
            }
        }
    }

    match prefixes.len() {
        0 => Err(Error::InvalidBundle(format!(
            "could not find the bash script (*.env) in {}",
            dir.display()
        ))),
        1 => Ok(prefixes.remove(0)),
        _ => Err(Error::InvalidBundle(format!(
            "multiple bash scripts (*.env) found in {}",
            dir.display()
        ))),
    }
}

fn source_help(script: &Path, shell: &str) -> String {
    let command = match shell {
        "powershell" | "pwsh" => format!(". \"{}\"", script.display()),
        "cmd" => format!("call \"{}\"", script.display()),
        _ => format!("source \"{}\"", script.display()),
    };
    format!("# Run the command below to load the cluster credentials into your shell\n{command}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::MakeCoeAccount;
    use tempfile::TempDir;

    fn account() -> Account {
        Account::MakeCoe(MakeCoeAccount {
            username: "abc".to_string(),
            api_key: "key".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_delete_credentials_refuses_a_directory_without_a_ca() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("random.txt"), "keep me").unwrap();

        let client = Client::with_cache(CredentialCache::disabled());
        let err = client
            .delete_cluster_credentials(&account(), "web", Some(dir.path()))
            .unwrap_err();
        assert!(err.to_string().contains("not deleting"));
        assert!(dir.path().join("random.txt").exists());
    }

    #[test]
    fn test_delete_credentials_removes_a_real_bundle_directory() {
        let dir = TempDir::new().unwrap();
        let bundle_dir = dir.path().join("web");
        fs::create_dir_all(&bundle_dir).unwrap();
        fs::write(bundle_dir.join("ca.pem"), "ca").unwrap();

        let client = Client::with_cache(CredentialCache::disabled());
        client
            .delete_cluster_credentials(&account(), "web", Some(&bundle_dir))
            .unwrap();
        assert!(!bundle_dir.exists());
    }

    #[test]
    fn test_delete_credentials_of_a_never_downloaded_bundle_is_fine() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("never-downloaded");

        let client = Client::with_cache(CredentialCache::disabled());
        client
            .delete_cluster_credentials(&account(), "web", Some(&missing))
            .unwrap();
    }

    #[test]
    fn test_script_for_shell_follows_the_bundle_prefix() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("docker.env"), "DOCKER_HOST=tcp://h:1\n").unwrap();
        fs::write(dir.path().join("docker.fish"), "set -x DOCKER_HOST tcp://h:1\n").unwrap();

        let script = script_for_shell(dir.path(), "fish").unwrap();
        assert!(script.ends_with("docker.fish"));

        let err = script_for_shell(dir.path(), "tcsh").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_source_help_matches_the_shell() {
        let script = Path::new("/tmp/creds/docker.env");
        assert!(source_help(script, "bash").contains("source \"/tmp/creds/docker.env\""));
        assert!(source_help(Path::new("/tmp/creds/docker.ps1"), "powershell").contains(". \""));
        assert!(source_help(Path::new("/tmp/creds/docker.cmd"), "cmd").contains("call \""));
    }
}
