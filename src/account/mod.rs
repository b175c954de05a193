// Accounts: one credential set per cloud backend.
//
// An account's dynamic fields (token, resolved endpoint) are populated either
// by cache hydration or by a live authentication, and only ever persisted
// through the cache snapshot built by `build_cache`.

pub(crate) mod identity;
pub mod magnum;
pub mod makecoe;
pub mod makeswarm;

use crate::error::Result;
use crate::models::CloudType;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;

pub use magnum::MagnumAccount;
pub use makecoe::MakeCoeAccount;
pub use makeswarm::MakeSwarmAccount;

/// A credential set bound to exactly one backend.
#[derive(Debug, Clone)]
pub enum Account {
    Magnum(MagnumAccount),
    MakeSwarm(MakeSwarmAccount),
    MakeCoe(MakeCoeAccount),
}

impl Account {
    pub fn cloud_type(&self) -> CloudType {
        match self {
            Account::Magnum(_) => CloudType::Magnum,
            Account::MakeSwarm(_) => CloudType::MakeSwarm,
            Account::MakeCoe(_) => CloudType::MakeCoe,
        }
    }

    /// A stable identifier for the account, derived from the static login
    /// fields only. Cache lookups depend on this staying the same across
    /// re-authentication.
    pub fn id(&self) -> String {
        match self {
            Account::Magnum(account) => account.id(),
            Account::MakeSwarm(account) => account.id(),
            Account::MakeCoe(account) => account.id(),
        }
    }

    /// Check that the static fields required to log in are present.
    pub fn validate(&self) -> Result<()> {
        match self {
            Account::Magnum(account) => account.validate(),
            Account::MakeSwarm(account) => account.validate(),
            Account::MakeCoe(account) => account.validate(),
        }
    }

    /// The set of dynamic data to persist in the cache. Empty when the
    /// account has never authenticated.
    pub fn build_cache(&self) -> BTreeMap<String, String> {
        match self {
            Account::Magnum(account) => account.build_cache(),
            Account::MakeSwarm(account) => account.build_cache(),
            Account::MakeCoe(account) => account.build_cache(),
        }
    }

    /// Rehydrate the dynamic fields from a cache entry. A user-supplied
    /// endpoint override is never clobbered by a cached value.
    pub fn apply_cache(&mut self, entry: &BTreeMap<String, String>) {
        match self {
            Account::Magnum(account) => account.apply_cache(entry),
            Account::MakeSwarm(account) => account.apply_cache(entry),
            Account::MakeCoe(account) => account.apply_cache(entry),
        }
    }

    /// A unique directory-name prefix for the account's downloaded cluster
    /// credentials.
    pub fn cluster_prefix(&self) -> Result<String> {
        match self {
            Account::Magnum(account) => account.cluster_prefix(),
            Account::MakeSwarm(account) => Ok(account.id()),
            Account::MakeCoe(account) => Ok(account.id()),
        }
    }
}

/// Short hex digest used to mix custom endpoints into account IDs without
/// storing the URL itself in a file name.
pub(crate) fn endpoint_hash(endpoint: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(endpoint.as_bytes());
    let digest = hasher.finalize();
    digest[..4].iter().map(|b| format!("{b:02x}")).collect()
}
