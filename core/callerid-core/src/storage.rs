//! Storage configuration and path management.
//!
//! All files live under one root. On device the host passes the shared
//! container both the app and the directory provider can read (for example an
//! iOS app group); the CLI defaults to `~/.callerid`. Tests use
//! `StorageConfig::with_root(temp_dir)` for isolation.

use std::io::Write;
use std::path::{Path, PathBuf};

use fs_err as fs;
use tempfile::NamedTempFile;

use crate::error::{CallerIdError, Result};

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory for all caller-ID data (default: ~/.callerid)
    root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(std::env::temp_dir);
        Self {
            root: home.join(".callerid"),
        }
    }
}

impl StorageConfig {
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to call_directory.json (raw phone-book payload shared with the provider).
    pub fn phone_book_file(&self) -> PathBuf {
        self.root.join("call_directory.json")
    }

    /// Path to directory-status.json (last applied count and time).
    pub fn directory_status_file(&self) -> PathBuf {
        self.root.join("directory-status.json")
    }

    /// Path to config.json (timing and normalization tunables).
    pub fn config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|source| CallerIdError::Io {
            context: format!("Failed to create storage root {}", self.root.display()),
            source,
        })
    }
}

/// Writes `contents` to `path` via a sibling temp file and rename, so a
/// concurrent reader sees either the old file or the new one, never a mix.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| CallerIdError::StorageRootNotFound(path.to_path_buf()))?;
    fs::create_dir_all(parent).map_err(|source| CallerIdError::Io {
        context: format!("Failed to create {}", parent.display()),
        source,
    })?;

    let io_err = |context: &str, source: std::io::Error| CallerIdError::Io {
        context: format!("{} {}", context, path.display()),
        source,
    };

    let mut temp_file =
        NamedTempFile::new_in(parent).map_err(|e| io_err("Temp file error for", e))?;
    temp_file
        .write_all(contents)
        .map_err(|e| io_err("Failed to write temp file for", e))?;
    temp_file
        .flush()
        .map_err(|e| io_err("Failed to flush temp file for", e))?;
    temp_file
        .persist(path)
        .map_err(|e| io_err("Failed to commit", e.error))?;
    Ok(())
}
