//! Version tag comparison.
//!
//! Release tags and build versions only ever need an equality check: any
//! difference between the latest tag and the running build means an update
//! exists. No semver ordering is performed.

/// Strips a single leading `v` when it prefixes an ASCII digit, so a
/// release tag like `v1.2.3` compares equal to a build version like
/// `1.2.3`. Anything else (including names like `version2`) is left alone.
pub fn normalize(version: &str) -> &str {
    let re = regex::Regex::new(r"^v[0-9]").unwrap();
    if re.is_match(version) {
        return &version[1..];
    }

    version
}

/// Whether two version identifiers name the same release.
pub fn equals(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}
