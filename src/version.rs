// Release update check, throttled through the cache's last-check timestamp.
// Failures only ever warn; an unreachable release feed must not break a
// command.

use crate::cache::CredentialCache;
use crate::error::Result;
use crate::service::http;
use chrono::{Duration, Utc};
use serde::Deserialize;

const RELEASES_URL: &str = "https://api.github.com/repos/coectl/coectl/releases/latest";
const CHECK_INTERVAL_HOURS: i64 = 24;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Deserialize)]
struct Release {
    tag_name: String,
}

/// Check the release feed for a newer version at most once a day.
pub async fn check_for_updates(cache: &CredentialCache) {
    if !cache.is_enabled() {
        return;
    }

    let now = Utc::now();
    if let Some(last) = cache.last_update_check() {
        if now - last < Duration::hours(CHECK_INTERVAL_HOURS) {
            return;
        }
    }

    tracing::debug!("Checking for newer releases of coectl...");
    match latest_release().await {
        Ok(latest) => {
            tracing::debug!("Latest: {latest}");
            if is_newer(&latest, VERSION) {
                tracing::warn!(
                    "A newer version of coectl is available: {latest} (currently {VERSION})"
                );
            }
        }
        Err(err) => {
            tracing::warn!("Unable to fetch information about the latest release: {err}");
        }
    }

    if let Err(err) = cache.save_last_update_check(now) {
        tracing::warn!("Unable to record the update check: {err}");
    }
}

async fn latest_release() -> Result<String> {
    let client = http::new_client()?;
    let response = client.get(RELEASES_URL).send().await?;
    let release: Release = http::expect_success(response)?.json().await?;
    Ok(release.tag_name)
}

/// Lenient semver comparison: unparseable tags are never "newer".
fn is_newer(tag: &str, current: &str) -> bool {
    match (parse_semver(tag), parse_semver(current)) {
        (Some(tag), Some(current)) => tag > current,
        _ => false,
    }
}

fn parse_semver(version: &str) -> Option<(u64, u64, u64)> {
    let version = version.trim_start_matches('v');
    // Ignore any pre-release/build suffix.
    let version = version
        .split_once(['-', '+'])
        .map(|(core, _)| core)
        .unwrap_or(version);

    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next().unwrap_or("0").parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_semver_accepts_common_tag_shapes() {
        assert_eq!(parse_semver("v1.2.3"), Some((1, 2, 3)));
        assert_eq!(parse_semver("0.1.0"), Some((0, 1, 0)));
        assert_eq!(parse_semver("2.0"), Some((2, 0, 0)));
        assert_eq!(parse_semver("1.2.3-rc.1"), Some((1, 2, 3)));
        assert_eq!(parse_semver("banana"), None);
    }

    #[test]
    fn test_is_newer_compares_numerically() {
        assert!(is_newer("v0.2.0", "0.1.9"));
        assert!(is_newer("v1.0.0", "0.9.9"));
        assert!(!is_newer("v0.1.0", "0.1.0"));
        assert!(!is_newer("garbage", "0.1.0"));
    }
}
