use crate::config;
use anyhow::{anyhow, Result};
use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::StatusCode;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use tar::Archive;

/// Downloads a release asset to `local_path`, streaming with a progress
/// bar. The asset endpoint only serves the binary payload when asked for
/// octet-stream, and anything but a plain 200 means the asset is not
/// actually downloadable (bad token, wrong id, expired link).
pub async fn download_asset(url: &str, token: Option<&str>, local_path: &Path) -> Result<()> {
    tracing::info!(
        "Downloading {}...",
        local_path.file_name().unwrap().to_string_lossy()
    );

    let client = reqwest::Client::new();
    let mut request = client
        .get(url)
        .header("User-Agent", config::APP_NAME)
        .header("Accept", "application/octet-stream");
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let response = request.send().await?;
    if response.status() != StatusCode::OK {
        return Err(anyhow!(
            "Update download returned status {}",
            response.status()
        ));
    }

    let total_size = response.content_length().unwrap_or(0);

    let filename = local_path.file_name().unwrap().to_string_lossy().to_string();
    let pb = ProgressBar::new(total_size);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap()
            .progress_chars("#>-")
    );
    pb.set_message(format!("Downloading {}", filename));

    let mut file = File::create(local_path)?;
    let mut downloaded = 0u64;
    let mut stream = response.bytes_stream();

    use futures_util::StreamExt;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)?;
        downloaded += chunk.len() as u64;
        pb.set_position(downloaded);
    }

    pb.finish_with_message("Download complete");
    Ok(())
}

/// Streams the archive entry whose file name is `entry_name` into `dest`.
/// The release payload carries exactly one interesting file (the platform
/// binary, named like the installed executable), so the scan stops at the
/// first match and nothing else is materialized. Reaching the end of the
/// archive without a match means the asset was built wrong.
pub fn extract_executable(archive_path: &Path, entry_name: &str, dest: &mut File) -> Result<()> {
    let file = File::open(archive_path)?;
    let decoder = GzDecoder::new(file);
    let mut archive = Archive::new(decoder);

    for entry in archive.entries()? {
        let mut entry = entry?;

        if !entry.header().entry_type().is_file() {
            continue;
        }

        let is_match = {
            let path = entry.path()?;
            path.file_name() == Some(std::ffi::OsStr::new(entry_name))
        };

        if is_match {
            io::copy(&mut entry, dest)?;
            tracing::debug!("Extracted {} from {}", entry_name, archive_path.display());
            return Ok(());
        }
    }

    Err(anyhow!(
        "Update asset does not contain the expected binary '{}'",
        entry_name
    ))
}
