//! Output path derivation for protected objects

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const PROTECTED_SUFFIX: &str = ".tdf";

/// What to do when an explicit protect output lacks the `.tdf` suffix
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SuffixPolicy {
    /// Append `.tdf`
    #[default]
    AutoAppend,
    /// Reject the path
    Require,
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    path.as_os_str()
        .to_str()
        .map_or(false, |s| s.ends_with(suffix))
}

fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// `input` with `.tdf` appended; unchanged if it already ends with it
pub fn protected_path(input: &Path) -> PathBuf {
    if has_suffix(input, PROTECTED_SUFFIX) {
        input.to_path_buf()
    } else {
        append_suffix(input, PROTECTED_SUFFIX)
    }
}

/// Strip the first matching suffix from `input`
pub fn unprotected_path(input: &Path, suffixes: &[&str]) -> Result<PathBuf, ConfigError> {
    let missing = || ConfigError::MissingSuffix {
        path: input.to_path_buf(),
        suffixes: suffixes.iter().map(|s| s.to_string()).collect(),
    };
    let name = input.as_os_str().to_str().ok_or_else(missing)?;

    suffixes
        .iter()
        .filter(|suffix| !suffix.is_empty())
        .find_map(|suffix| name.strip_suffix(suffix))
        .filter(|stem| !stem.is_empty())
        .map(PathBuf::from)
        .ok_or_else(missing)
}

/// Validate a caller-chosen protect destination
pub fn resolve_protect_output(explicit: &Path, policy: SuffixPolicy) -> Result<PathBuf, ConfigError> {
    if explicit.as_os_str().is_empty() {
        return Err(ConfigError::MissingOutputPath);
    }
    if has_suffix(explicit, PROTECTED_SUFFIX) {
        return Ok(explicit.to_path_buf());
    }
    match policy {
        SuffixPolicy::AutoAppend => Ok(append_suffix(explicit, PROTECTED_SUFFIX)),
        SuffixPolicy::Require => Err(ConfigError::WrongOutputExtension {
            path: explicit.to_path_buf(),
            suffix: PROTECTED_SUFFIX.to_string(),
        }),
    }
}
