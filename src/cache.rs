// On-disk credential cache.
//
// Keeps bearer tokens, resolved endpoints and the last update-check
// timestamp across CLI invocations. Multiple short-lived processes may share
// the file, so every mutation re-reads the file right before writing it
// back; the worst a race can cost is one overwritten token, never a torn
// file. There is no cross-process lock.

use crate::account::Account;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CacheContents {
    #[serde(rename = "last-check", default, skip_serializing_if = "Option::is_none")]
    last_check: Option<DateTime<Utc>>,
    #[serde(default)]
    accounts: BTreeMap<String, BTreeMap<String, String>>,
}

/// Process-wide cache handle. A disabled cache supports the same contract
/// with every operation a no-op, so callers never branch on whether caching
/// is on.
pub struct CredentialCache {
    path: Option<PathBuf>,
    contents: Mutex<CacheContents>,
}

impl CredentialCache {
    /// Load the cache at `path`. A missing file is an empty cache; an
    /// unparseable file is logged and treated as empty so a corrupted cache
    /// can never block the CLI.
    pub fn load(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = read_contents(&path)?;
        Ok(Self {
            path: Some(path),
            contents: Mutex::new(contents),
        })
    }

    /// A cache with no backing file.
    pub fn disabled() -> Self {
        Self {
            path: None,
            contents: Mutex::new(CacheContents::default()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.path.is_some()
    }

    pub fn last_update_check(&self) -> Option<DateTime<Utc>> {
        self.contents.lock().unwrap().last_check
    }

    /// Record when we last checked for a newer release.
    pub fn save_last_update_check(&self, timestamp: DateTime<Utc>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut contents = self.contents.lock().unwrap();
        reload(path, &mut contents);
        contents.last_check = Some(timestamp);
        write_contents(path, &contents)
    }

    /// Persist the account's token/endpoint snapshot under its id. A no-op
    /// for accounts that never authenticated.
    pub fn save_account(&self, account: &Account) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let snapshot = account.build_cache();
        if snapshot.is_empty() {
            return Ok(());
        }

        let mut contents = self.contents.lock().unwrap();
        reload(path, &mut contents);
        contents.accounts.insert(account.id(), snapshot);
        write_contents(path, &contents)
    }

    /// Hydrate an account's dynamic fields from its cache entry, if any.
    pub fn apply(&self, account: &mut Account) {
        if self.path.is_none() {
            return;
        }

        let contents = self.contents.lock().unwrap();
        if let Some(entry) = contents.accounts.get(&account.id()) {
            tracing::debug!("Applying cached credentials for {}", account.id());
            account.apply_cache(entry);
        }
    }
}

/// Re-read the file so a concurrent process's update is not lost by this
/// write. The caller holds the mutex.
fn reload(path: &Path, contents: &mut CacheContents) {
    match read_contents(path) {
        Ok(fresh) => *contents = fresh,
        // Keep the in-memory state; the next write replaces the bad file.
        Err(err) => tracing::warn!("Unable to re-read cache file {}: {err}", path.display()),
    }
}

fn read_contents(path: &Path) -> Result<CacheContents> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(CacheContents::default());
        }
        Err(err) => return Err(err.into()),
    };

    match serde_json::from_str(&raw) {
        Ok(contents) => Ok(contents),
        Err(err) => {
            tracing::warn!(
                "Ignoring unreadable cache file {}, starting over: {err}",
                path.display()
            );
            Ok(CacheContents::default())
        }
    }
}

fn write_contents(path: &Path, contents: &CacheContents) -> Result<()> {
    let raw = serde_json::to_string_pretty(contents)?;
    fs::write(path, raw)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::MakeCoeAccount;
    use tempfile::TempDir;

    fn account_with_token(token: Option<&str>) -> Account {
        Account::MakeCoe(MakeCoeAccount {
            username: "abc".to_string(),
            api_key: "key".to_string(),
            token: token.map(str::to_string),
            ..Default::default()
        })
    }

    #[test]
    fn test_load_missing_file_is_empty_cache() {
        let dir = TempDir::new().unwrap();
        let cache = CredentialCache::load(dir.path().join("cache.json")).unwrap();

        assert!(cache.is_enabled());
        assert_eq!(cache.last_update_check(), None);
    }

    #[test]
    fn test_malformed_cache_starts_over_and_saves_still_work() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{not json!").unwrap();

        let cache = CredentialCache::load(path.clone()).unwrap();
        assert_eq!(cache.last_update_check(), None);

        cache.save_account(&account_with_token(Some("t1"))).unwrap();

        let reloaded = CredentialCache::load(path).unwrap();
        let mut account = account_with_token(None);
        reloaded.apply(&mut account);
        match account {
            Account::MakeCoe(account) => assert_eq!(account.token.as_deref(), Some("t1")),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_save_account_replaces_existing_entry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(
            &path,
            r#"{"accounts":{"make-coe-abc":{"token":"t1"}}}"#,
        )
        .unwrap();

        let cache = CredentialCache::load(path.clone()).unwrap();
        cache.save_account(&account_with_token(Some("t2"))).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let contents: CacheContents = serde_json::from_str(&raw).unwrap();
        assert_eq!(contents.accounts["make-coe-abc"]["token"], "t2");
    }

    #[test]
    fn test_mutations_reload_before_writing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");

        // Two processes with independently loaded caches.
        let first = CredentialCache::load(path.clone()).unwrap();
        let second = CredentialCache::load(path.clone()).unwrap();

        first.save_account(&account_with_token(Some("t1"))).unwrap();
        let now = Utc::now();
        second.save_last_update_check(now).unwrap();

        // The second write must not have lost the first one's token.
        let reloaded = CredentialCache::load(path).unwrap();
        assert_eq!(reloaded.last_update_check(), Some(now));
        let mut account = account_with_token(None);
        reloaded.apply(&mut account);
        match account {
            Account::MakeCoe(account) => assert_eq!(account.token.as_deref(), Some("t1")),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_unauthenticated_account_is_not_saved() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.json");

        let cache = CredentialCache::load(path.clone()).unwrap();
        cache.save_account(&account_with_token(None)).unwrap();

        assert!(!path.exists());
    }

    #[test]
    fn test_disabled_cache_is_a_no_op() {
        let cache = CredentialCache::disabled();
        assert!(!cache.is_enabled());

        cache.save_account(&account_with_token(Some("t1"))).unwrap();
        cache.save_last_update_check(Utc::now()).unwrap();

        let mut account = account_with_token(None);
        cache.apply(&mut account);
        match account {
            Account::MakeCoe(account) => assert_eq!(account.token, None),
            _ => unreachable!(),
        }
    }
}
