// Filesystem locations for the cache and downloaded credentials.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Overrides the directory that stores cluster tokens and credentials.
const HOME_ENV_VAR: &str = "COECTL_HOME";

const XDG_DATA_HOME_ENV_VAR: &str = "XDG_DATA_HOME";
const DOT_DIR: &str = ".coectl";
const NON_DOT_DIR: &str = "coectl";
const CLUSTERS_DIR_NAME: &str = "clusters";

/// The base data directory, e.g. ~/.coectl.
pub fn base_dir() -> Result<PathBuf> {
    if let Ok(home) = std::env::var(HOME_ENV_VAR) {
        if !home.is_empty() {
            return Ok(PathBuf::from(home));
        }
    }

    if let Ok(xdg) = std::env::var(XDG_DATA_HOME_ENV_VAR) {
        if !xdg.is_empty() {
            return Ok(PathBuf::from(xdg).join(NON_DOT_DIR));
        }
    }

    let home = dirs::home_dir().ok_or_else(|| {
        Error::Config(format!(
            "Unable to default {HOME_ENV_VAR} to ~/{DOT_DIR}. Set the {HOME_ENV_VAR} environment variable"
        ))
    })?;
    Ok(home.join(DOT_DIR))
}

/// Location of the on-disk credential cache.
pub fn cache_file() -> Result<PathBuf> {
    Ok(base_dir()?.join("cache.json"))
}

/// Directory holding a single cluster's downloaded credentials.
///
/// The account prefix keeps clusters with the same name on different
/// clouds/accounts from colliding.
pub fn cluster_credentials_dir(
    account_prefix: &str,
    cluster_name: &str,
    custom_path: Option<&Path>,
) -> Result<PathBuf> {
    if let Some(custom) = custom_path {
        return Ok(custom.to_path_buf());
    }

    Ok(base_dir()?
        .join(CLUSTERS_DIR_NAME)
        .join(account_prefix)
        .join(cluster_name))
}
