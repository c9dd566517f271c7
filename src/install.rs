//! Staging and installation of executables.
//!
//! New binaries are written to a temporary file next to their destination
//! so the final move is an atomic rename on the same filesystem. When the
//! destination directory is not writable the staging falls back to the
//! system temp dir and the move is delegated to an elevated self-invocation.

use anyhow::{anyhow, Context, Result};
use std::env;
use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile};

use crate::config::APP_NAME;
use crate::elevate::{call_elevated, ElevatedAction};

/// A new executable staged on disk, not yet moved into place.
pub struct StagedExecutable {
    temp: NamedTempFile,
    needs_elevation: bool,
}

impl StagedExecutable {
    /// Stages a temp file for the given destination, preferring the
    /// destination's own directory so the final rename stays atomic.
    pub fn for_destination(destination: &Path) -> Result<StagedExecutable> {
        let base = destination
            .file_name()
            .unwrap_or_else(|| OsStr::new(APP_NAME));
        let parent = match destination.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        match Builder::new().prefix(base).tempfile_in(&parent) {
            Ok(temp) => Ok(StagedExecutable {
                temp,
                needs_elevation: false,
            }),
            Err(err) => {
                tracing::debug!(
                    "Cannot stage in {}: {}. Staging in temp dir, installation will be elevated",
                    parent.display(),
                    err
                );
                let temp = Builder::new()
                    .prefix(base)
                    .tempfile_in(env::temp_dir())
                    .context("Could not create staging file")?;
                Ok(StagedExecutable {
                    temp,
                    needs_elevation: true,
                })
            }
        }
    }

    pub fn needs_elevation(&self) -> bool {
        self.needs_elevation
    }

    pub fn file_mut(&mut self) -> &mut File {
        self.temp.as_file_mut()
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Marks the staged file executable through its open handle.
    pub fn set_executable(&self) -> Result<()> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            self.temp
                .as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o755))
                .context("Could not mark staged file executable")?;
        }
        Ok(())
    }

    /// Moves the staged file onto the running executable.
    pub fn replace_current_exe(self) -> Result<()> {
        let this_exe = env::current_exe().context("Could not resolve current executable")?;

        if self.needs_elevation {
            let (_file, kept) = self.temp.keep().map_err(|e| e.error)?;
            return call_elevated(&ElevatedAction::ReplaceExecutable {
                new_executable: kept.to_string_lossy().into_owned(),
            });
        }

        self.temp
            .persist(&this_exe)
            .map_err(|e| e.error)
            .with_context(|| format!("Could not replace {}", this_exe.display()))?;
        Ok(())
    }

    /// Moves the staged file to an arbitrary destination.
    pub fn install_at(self, destination: &Path) -> Result<()> {
        if self.needs_elevation {
            let (_file, kept) = self.temp.keep().map_err(|e| e.error)?;
            return call_elevated(&ElevatedAction::InstallExecutable {
                source: kept.to_string_lossy().into_owned(),
                destination: destination.to_string_lossy().into_owned(),
            });
        }

        self.temp
            .persist(destination)
            .map_err(|e| e.error)
            .with_context(|| format!("Could not install to {}", destination.display()))?;
        Ok(())
    }
}

/// Copies the running binary to a new location, elevating when the
/// destination is not writable.
pub fn install_current_exe(destination: &Path) -> Result<()> {
    let this_exe = env::current_exe().context("Could not resolve current executable")?;
    let resolved = resolve_destination(destination);

    if resolved == this_exe {
        return Err(anyhow!(
            "{} is already installed at {}",
            APP_NAME,
            resolved.display()
        ));
    }

    let mut staged = StagedExecutable::for_destination(&resolved)?;
    tracing::debug!("Staged copy at {}", staged.path().display());
    let mut source = File::open(&this_exe)
        .with_context(|| format!("Could not open {}", this_exe.display()))?;
    io::copy(&mut source, staged.file_mut()).context("Could not copy executable")?;
    staged.set_executable()?;
    staged.install_at(&resolved)?;

    println!("Installed {} to {}", APP_NAME, resolved.display());
    Ok(())
}

/// Appends the binary name when the destination is an existing directory.
pub fn resolve_destination(destination: &Path) -> PathBuf {
    if destination.is_dir() {
        return destination.join(format!("{}{}", APP_NAME, env::consts::EXE_SUFFIX));
    }
    destination.to_path_buf()
}
