//! Input set resolution
//!
//! Every selector either yields the complete, sorted list of plain files or
//! fails as a whole. A partial listing is never returned.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::naming::PROTECTED_SUFFIX;

#[derive(Debug, Error)]
pub enum EnumerationError {
    #[error("invalid glob pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("glob match could not be read: {0}")]
    Glob(#[from] glob::GlobError),

    #[error("walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("could not list {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("enumeration task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Which way the batch transforms; narrows the enumerated set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Skip objects that are already protected
    Protect,
    /// Keep only objects carrying the protected suffix
    Unprotect,
}

impl Direction {
    fn accepts(self, path: &Path) -> bool {
        let protected = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(PROTECTED_SUFFIX));
        match self {
            Direction::Protect => !protected,
            Direction::Unprotect => protected,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Protect => "protect",
            Direction::Unprotect => "unprotect",
        }
    }
}

/// Where the objects of a batch come from
#[derive(Debug, Clone)]
pub enum ObjectSelector {
    /// Plain files directly inside a directory; subdirectories are skipped
    Directory(PathBuf),
    /// Shell-style glob pattern
    Glob(String),
    /// Recursive walk keeping files whose extension is listed
    Extensions {
        root: PathBuf,
        extensions: Vec<String>,
    },
    /// Explicit list, taken as given
    Paths(Vec<PathBuf>),
}

impl ObjectSelector {
    /// Resolve the selector into a sorted list of input paths
    pub fn enumerate(&self, direction: Direction) -> Result<Vec<PathBuf>, EnumerationError> {
        let mut paths = match self {
            ObjectSelector::Directory(root) => list_directory(root)?,
            ObjectSelector::Glob(pattern) => list_glob(pattern)?,
            ObjectSelector::Extensions { root, extensions } => walk_extensions(root, extensions)?,
            ObjectSelector::Paths(paths) => paths.clone(),
        };

        // Explicit lists are the caller's choice and are not filtered
        if !matches!(self, ObjectSelector::Paths(_)) {
            paths.retain(|p| direction.accepts(p));
        }
        paths.sort();

        debug!(count = paths.len(), direction = direction.as_str(), "enumerated objects");
        Ok(paths)
    }
}

fn list_directory(root: &Path) -> Result<Vec<PathBuf>, EnumerationError> {
    let io_err = |source| EnumerationError::Io {
        path: root.to_path_buf(),
        source,
    };
    if !root.is_dir() {
        return Err(EnumerationError::NotADirectory(root.to_path_buf()));
    }

    let mut paths = Vec::new();
    for entry in fs::read_dir(root).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if is_plain_file(&path)? {
            paths.push(path);
        }
    }
    Ok(paths)
}

/// Symlinks are judged by their target; a dangling link is an error
fn is_plain_file(path: &Path) -> Result<bool, EnumerationError> {
    fs::metadata(path)
        .map(|meta| meta.is_file())
        .map_err(|source| EnumerationError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn list_glob(pattern: &str) -> Result<Vec<PathBuf>, EnumerationError> {
    let matches = glob::glob(pattern).map_err(|source| EnumerationError::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in matches {
        let path = entry?;
        if is_plain_file(&path)? {
            paths.push(path);
        }
    }
    Ok(paths)
}

fn walk_extensions(root: &Path, extensions: &[String]) -> Result<Vec<PathBuf>, EnumerationError> {
    let wanted: Vec<&str> = extensions
        .iter()
        .map(|e| e.strip_prefix('.').unwrap_or(e))
        .collect();

    let mut paths = Vec::new();
    // Following links makes dangling links and cycles surface as errors
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matched = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |ext| wanted.contains(&ext));
        if matched {
            paths.push(entry.into_path());
        }
    }
    Ok(paths)
}
