//! Platform identification for release asset selection.
//!
//! Release assets are published with Go-toolchain platform names
//! (`linux`/`darwin`/`windows`, `amd64`/`arm64`), so the running platform
//! is mapped into that vocabulary before matching asset names.

pub fn release_os() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    }
}

pub fn release_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

/// The `{os}_{arch}` identifier the publishing pipeline bakes into asset
/// names.
pub fn identifier() -> String {
    format!("{}_{}", release_os(), release_arch())
}

/// Full asset name suffix for the running platform.
pub fn asset_suffix() -> String {
    format!("{}.tar.gz", identifier())
}
