//! The self-update loop: opt-in configuration, a 24 hour check debounce,
//! release resolution, download, and atomic self-replacement followed by
//! an in-place restart of the original command.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::config::{ConfigDir, APP_NAME};
use crate::download;
use crate::install::StagedExecutable;
use crate::prompt;
use crate::release::{CheckOutcome, ReleaseResolver, ResolvedRelease};

const STATE_FILE: &str = "autoupdate";
const CHECK_INTERVAL_SECS: i64 = 24 * 60 * 60;

/// Persisted auto-update state (`autoupdate.json` in the config dir).
/// Field names are fixed by state files written by earlier releases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdaterState {
    pub auto_update: Option<bool>,
    pub last_update_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_token: Option<String>,
}

pub struct AutoUpdater {
    config: ConfigDir,
    resolver: ReleaseResolver,
    state: UpdaterState,
    build_version: String,
}

impl AutoUpdater {
    pub fn new(
        config: ConfigDir,
        resolver: ReleaseResolver,
        build_version: &str,
    ) -> Result<AutoUpdater> {
        let state = config.load(STATE_FILE)?;
        Ok(AutoUpdater {
            config,
            resolver,
            state,
            build_version: build_version.to_string(),
        })
    }

    fn save(&self) -> Result<()> {
        self.config.save(STATE_FILE, &self.state)
    }

    pub fn auto_update_enabled(&self) -> Option<bool> {
        self.state.auto_update
    }

    pub fn set_auto_update(&mut self, enabled: bool) -> Result<()> {
        self.state.auto_update = Some(enabled);
        self.save()
    }

    /// First-run opt-in. Without a terminal the question is deferred to a
    /// later attended run and auto-updating stays off for this one.
    pub fn ensure_configured(&mut self) -> Result<bool> {
        if let Some(enabled) = self.state.auto_update {
            return Ok(enabled);
        }

        if !prompt::user_attended() {
            tracing::debug!("Not attended, deferring the auto-update question");
            return Ok(false);
        }

        println!("Automatic updating has not been configured, would you like to enable it? (only checks for updates every 24 hours)");
        let enabled = prompt::confirm_default("Auto update?", true)?;
        self.set_auto_update(enabled)?;

        let argv0 = env::args().next().unwrap_or_else(|| APP_NAME.to_string());
        if enabled {
            println!(
                "You can disable this later by running '{} config autoupdate false'",
                argv0
            );
        } else {
            println!(
                "You can enable this later by running '{} config autoupdate true'",
                argv0
            );
        }

        Ok(enabled)
    }

    /// Checks for a newer release. Unforced checks are debounced to one per
    /// 24 hours, and the check time is persisted before the query so a
    /// crashing check cannot turn into a hot loop.
    pub async fn check_for_update(&mut self, force: bool) -> Result<Option<ResolvedRelease>> {
        let now = Utc::now().timestamp();
        if !force {
            if let Some(last) = self.state.last_update_time {
                if last > now - CHECK_INTERVAL_SECS {
                    tracing::debug!("Skipping update check, last was {}s ago", now - last);
                    return Ok(None);
                }
            }
        }

        println!("Checking for updates...");
        self.state.last_update_time = Some(now);
        self.save()?;

        let build_version = self.build_version.clone();
        let cached_token = self.state.github_token.clone();
        let outcome = self
            .resolver
            .resolve(&build_version, cached_token.as_deref())
            .await;

        // Keep a freshly obtained credential even when the query failed.
        if let Some(token) = self.resolver.take_refreshed_token() {
            self.state.github_token = Some(token);
            self.save()?;
        }

        match outcome? {
            CheckOutcome::UpToDate => {
                tracing::debug!("Build {} is current", self.build_version);
                Ok(None)
            }
            CheckOutcome::NoCredential => Ok(None),
            CheckOutcome::UpdateAvailable(release) => {
                if release.download_url.is_none() {
                    tracing::debug!(
                        "Release {} has nothing for this platform",
                        release.version_tag
                    );
                    return Ok(None);
                }
                Ok(Some(release))
            }
        }
    }

    /// Update hook run before a wrapped command. Never propagates trouble
    /// to the command itself; a failed check is retried after the next
    /// debounce window.
    pub async fn auto_update(&mut self) {
        let enabled = match self.ensure_configured() {
            Ok(enabled) => enabled,
            Err(err) => {
                tracing::warn!("Auto-update configuration failed: {:#}", err);
                return;
            }
        };
        if !enabled {
            return;
        }

        let release = match self.check_for_update(false).await {
            Ok(Some(release)) => release,
            Ok(None) => return,
            Err(err) => {
                tracing::warn!("Update check failed: {:#}", err);
                return;
            }
        };

        if self.build_version == "dev" {
            tracing::info!(
                "Version {} is available, not auto-updating a dev build",
                release.version_tag
            );
            return;
        }

        println!("Updating to {}", release.version_tag);
        if let Err(err) = self.apply(&release).await {
            tracing::warn!(
                "Could not apply update {}: {:#}",
                release.version_tag,
                err
            );
            return;
        }

        println!("Complete, restarting command...");
        restart_current_command();
    }

    /// Explicitly requested update. Check failures are surfaced; a failed
    /// apply is reported but leaves the current binary in place.
    pub async fn update(&mut self) -> Result<()> {
        let release = match self.check_for_update(true).await? {
            Some(release) => release,
            None => {
                println!("No updates found");
                return Ok(());
            }
        };

        println!("Updating to {}", release.version_tag);
        if let Err(err) = self.apply(&release).await {
            println!("Error performing self-update:");
            println!("{:#}", err);
        }

        Ok(())
    }

    async fn apply(&self, release: &ResolvedRelease) -> Result<()> {
        let url = release.download_url.as_deref().ok_or_else(|| {
            anyhow!("release {} has no downloadable asset", release.version_tag)
        })?;

        let this_exe = env::current_exe().context("Could not resolve current executable")?;
        let entry_name = this_exe
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("current executable has no file name"))?;

        let scratch = tempfile::tempdir().context("Could not create download directory")?;
        let archive_path = scratch.path().join(format!("{}.tar.gz", APP_NAME));
        download::download_asset(url, release.token.as_deref(), &archive_path).await?;

        let mut staged = StagedExecutable::for_destination(&this_exe)?;
        if staged.needs_elevation() {
            tracing::debug!("Replacing {} will need elevated privileges", this_exe.display());
        }
        download::extract_executable(&archive_path, &entry_name, staged.file_mut())?;
        staged.set_executable()?;
        staged.replace_current_exe()
    }
}

/// Replaces this process with a fresh invocation of the just-installed
/// binary, so the user's command continues under the new version.
fn restart_current_command() -> ! {
    let args: Vec<String> = env::args().skip(1).collect();
    let exe = env::current_exe().unwrap_or_else(|_| PathBuf::from(APP_NAME));

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        let err = std::process::Command::new(&exe).args(&args).exec();
        tracing::error!("Could not restart {}: {}", exe.display(), err);
        std::process::abort();
    }
    #[cfg(not(unix))]
    {
        match std::process::Command::new(&exe).args(&args).status() {
            Ok(status) => std::process::exit(status.code().unwrap_or(0)),
            Err(err) => {
                tracing::error!("Could not restart {}: {}", exe.display(), err);
                std::process::abort();
            }
        }
    }
}
