//! Release resolution against the GitHub API.
//!
//! One check answers three questions: is there a newer tag, which asset
//! fits this platform, and which credential (if any) should the download
//! use. Private repositories answer 404 to unauthenticated or badly
//! authenticated requests, so a 404 there triggers a single credential
//! refresh and retry before the check degrades to "nothing this run".

use crate::config;
use crate::credentials;
use crate::platform;
use crate::prompt;
use crate::version;
use anyhow::{Context, Result};
use reqwest::StatusCode;
use serde::Deserialize;

pub const GITHUB_API_BASE: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub id: u64,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseResponse {
    pub tag_name: String,
    pub assets: Vec<ReleaseAsset>,
}

/// A release that differs from the running build.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRelease {
    pub version_tag: String,
    /// None when the release has no asset for the running platform;
    /// callers treat that as "no update", not a failure.
    pub download_url: Option<String>,
    /// Token to attach to the asset download request.
    pub token: Option<String>,
}

/// Outcome of one latest-release check.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    UpToDate,
    /// Private repository and no working credential; skipped, not failed.
    NoCredential,
    UpdateAvailable(ResolvedRelease),
}

#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("no releases found for {repo}")]
    NoReleases { repo: String },
    #[error("release query for {repo} failed with status {status}")]
    RequestFailed { repo: String, status: StatusCode },
}

/// Credential-refresh retry state: one refresh, one retry, never a loop.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Attempt {
    First,
    Retried,
}

pub struct ReleaseResolver {
    repo: String,
    api_base: String,
    private_repo: bool,
    refreshed_token: Option<String>,
}

impl ReleaseResolver {
    /// Resolver against the real GitHub API, unless UPKEEP_API_BASE points
    /// somewhere else.
    pub fn new(repo: &str, private_repo: bool) -> ReleaseResolver {
        let api_base = std::env::var("UPKEEP_API_BASE")
            .unwrap_or_else(|_| GITHUB_API_BASE.to_string());
        ReleaseResolver::with_api_base(repo, private_repo, &api_base)
    }

    pub fn with_api_base(repo: &str, private_repo: bool, api_base: &str) -> ReleaseResolver {
        ReleaseResolver {
            repo: repo.to_string(),
            api_base: api_base.trim_end_matches('/').to_string(),
            private_repo,
            refreshed_token: None,
        }
    }

    /// A credential obtained during the last `resolve`, handed over once so
    /// the caller can cache it. Set even when the retried query failed.
    pub fn take_refreshed_token(&mut self) -> Option<String> {
        self.refreshed_token.take()
    }

    fn latest_release_url(&self) -> String {
        format!("{}/repos/{}/releases/latest", self.api_base, self.repo)
    }

    fn asset_url(&self, asset_id: u64) -> String {
        format!(
            "{}/repos/{}/releases/assets/{}",
            self.api_base, self.repo, asset_id
        )
    }

    /// Queries the latest release and decides whether it is an update for
    /// `build_version`.
    pub async fn resolve(
        &mut self,
        build_version: &str,
        cached_token: Option<&str>,
    ) -> Result<CheckOutcome> {
        let client = reqwest::Client::new();
        let mut token: Option<String> = cached_token.map(str::to_string);
        self.refreshed_token = None;
        let mut attempt = Attempt::First;

        let release = loop {
            let mut request = client
                .get(self.latest_release_url())
                .header("User-Agent", config::APP_NAME);
            if let Some(token) = token.as_deref() {
                request = request.bearer_auth(token);
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("Could not query releases for {}", self.repo))?;
            let status = response.status();

            if status == StatusCode::NOT_FOUND && self.private_repo {
                match attempt {
                    Attempt::First => match refresh_token(token.as_deref())? {
                        Some(next) => {
                            tracing::debug!("Retrying release query with a fresh credential");
                            self.refreshed_token = Some(next.clone());
                            token = Some(next);
                            attempt = Attempt::Retried;
                            continue;
                        }
                        None => {
                            tracing::warn!(
                                "Skipping update check for {}, no usable credential",
                                self.repo
                            );
                            return Ok(CheckOutcome::NoCredential);
                        }
                    },
                    Attempt::Retried => {
                        tracing::warn!(
                            "Release query for {} still not found after a credential refresh",
                            self.repo
                        );
                        return Ok(CheckOutcome::NoCredential);
                    }
                }
            }

            if status == StatusCode::NOT_FOUND {
                return Err(ReleaseError::NoReleases {
                    repo: self.repo.clone(),
                }
                .into());
            }
            if !status.is_success() {
                return Err(ReleaseError::RequestFailed {
                    repo: self.repo.clone(),
                    status,
                }
                .into());
            }

            break response
                .json::<ReleaseResponse>()
                .await
                .context("Could not parse release metadata")?;
        };

        Ok(self.evaluate(release, build_version, token, &platform::asset_suffix()))
    }

    /// Decides what a release response means for the running build:
    /// same tag is up to date; otherwise the first asset ending in the
    /// platform suffix is the one to fetch.
    fn evaluate(
        &self,
        release: ReleaseResponse,
        build_version: &str,
        token: Option<String>,
        asset_suffix: &str,
    ) -> CheckOutcome {
        if version::equals(&release.tag_name, build_version) {
            return CheckOutcome::UpToDate;
        }

        let download_url = release
            .assets
            .iter()
            .find(|asset| asset.name.ends_with(asset_suffix))
            .map(|asset| self.asset_url(asset.id));

        if download_url.is_none() {
            tracing::warn!(
                "Release {} has no asset matching *{}",
                release.tag_name,
                asset_suffix
            );
        }

        CheckOutcome::UpdateAvailable(ResolvedRelease {
            version_tag: release.tag_name,
            download_url,
            token,
        })
    }
}

/// Finds a replacement credential after a 404: netrc first, then an
/// interactive prompt. A netrc token identical to the one that just failed
/// is not offered again, and unattended runs never prompt.
fn refresh_token(failed: Option<&str>) -> Result<Option<String>> {
    if let Some(found) = credentials::find_github_token() {
        if Some(found.as_str()) != failed {
            tracing::debug!("Using GitHub token from netrc");
            return Ok(Some(found));
        }
    }

    if !prompt::user_attended() {
        return Ok(None);
    }

    prompt::read_token("GitHub access token for release checks")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> ReleaseResolver {
        ReleaseResolver::with_api_base("owner/repo", true, "https://api.github.com")
    }

    fn release(tag: &str, assets: Vec<(&str, u64)>) -> ReleaseResponse {
        ReleaseResponse {
            tag_name: tag.to_string(),
            assets: assets
                .into_iter()
                .map(|(name, id)| ReleaseAsset {
                    name: name.to_string(),
                    id,
                })
                .collect(),
        }
    }

    #[test]
    fn test_release_urls() {
        let resolver = resolver();
        assert_eq!(
            resolver.latest_release_url(),
            "https://api.github.com/repos/owner/repo/releases/latest"
        );
        assert_eq!(
            resolver.asset_url(9983),
            "https://api.github.com/repos/owner/repo/releases/assets/9983"
        );
    }

    #[test]
    fn test_api_base_override_and_trailing_slash() {
        let resolver = ReleaseResolver::with_api_base("owner/repo", false, "http://localhost:8080/");
        assert_eq!(
            resolver.latest_release_url(),
            "http://localhost:8080/repos/owner/repo/releases/latest"
        );
    }

    #[test]
    fn test_equal_tags_are_up_to_date_regardless_of_assets() {
        let outcome = resolver().evaluate(
            release("v1.2.3", vec![("tool_linux_amd64.tar.gz", 1)]),
            "1.2.3",
            None,
            "linux_amd64.tar.gz",
        );
        assert_eq!(outcome, CheckOutcome::UpToDate);
    }

    #[test]
    fn test_selects_first_matching_platform_asset() {
        let outcome = resolver().evaluate(
            release(
                "v2.0.0",
                vec![
                    ("tool_linux_amd64.tar.gz", 11),
                    ("tool_windows_amd64.tar.gz", 12),
                ],
            ),
            "v1.0.0",
            None,
            "linux_amd64.tar.gz",
        );

        match outcome {
            CheckOutcome::UpdateAvailable(release) => {
                assert_eq!(release.version_tag, "v2.0.0");
                assert_eq!(
                    release.download_url.as_deref(),
                    Some("https://api.github.com/repos/owner/repo/releases/assets/11")
                );
            }
            other => panic!("Expected an update, got {:?}", other),
        }
    }

    #[test]
    fn test_no_matching_asset_yields_no_download_url() {
        let outcome = resolver().evaluate(
            release("v2.0.0", vec![("tool_windows_amd64.tar.gz", 12)]),
            "v1.0.0",
            None,
            "linux_amd64.tar.gz",
        );

        match outcome {
            CheckOutcome::UpdateAvailable(release) => {
                assert_eq!(release.version_tag, "v2.0.0");
                assert_eq!(release.download_url, None);
            }
            other => panic!("Expected an update, got {:?}", other),
        }
    }

    #[test]
    fn test_token_is_carried_into_the_release() {
        let outcome = resolver().evaluate(
            release("v2.0.0", vec![("tool_linux_amd64.tar.gz", 3)]),
            "v1.0.0",
            Some("secret".to_string()),
            "linux_amd64.tar.gz",
        );

        match outcome {
            CheckOutcome::UpdateAvailable(release) => {
                assert_eq!(release.token.as_deref(), Some("secret"));
            }
            other => panic!("Expected an update, got {:?}", other),
        }
    }

    #[test]
    fn test_tag_prefix_differences_do_not_trigger_updates() {
        let outcome = resolver().evaluate(
            release("v0.4.2", vec![("tool_linux_amd64.tar.gz", 1)]),
            "0.4.2",
            None,
            "linux_amd64.tar.gz",
        );
        assert_eq!(outcome, CheckOutcome::UpToDate);
    }
}
