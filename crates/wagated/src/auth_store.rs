//! Credential directory guard.
//!
//! The worker persists its login in `<dir>/session-<client_id>`. A crash
//! mid-write can leave that directory empty, after which the worker hangs
//! instead of showing a fresh QR code, so the bundle is checked before each
//! attempt and removed when implausible.
//!
//! All functions here are blocking and must be called from
//! `spawn_blocking`. Individual entry failures are counted and logged,
//! never returned; only creating the directory itself can fail.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Filesystem errors are logged and counted

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AuthConfig;

/// Failure to create the credential directory.
#[derive(Debug, Error)]
#[error("failed to create credential directory {}: {source}", path.display())]
pub struct AuthStoreError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Outcome of [`AuthStore::purge`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeReport {
    pub removed: usize,
    pub failed: usize,
}

/// Outcome of [`AuthStore::prepare`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrepareReport {
    /// The credential directory did not exist.
    pub created: bool,
    /// The restart marker was present.
    pub restart_triggered: bool,
    /// An implausible session bundle was removed.
    pub session_removed: bool,
    /// Set when a full purge ran.
    pub purge: Option<PurgeReport>,
}

/// Guard over the on-disk credential bundle.
#[derive(Debug, Clone)]
pub struct AuthStore {
    dir: PathBuf,
    session_dir: PathBuf,
    min_session_entries: usize,
    keep_file: String,
    restart_marker: PathBuf,
    qr_file: PathBuf,
}

impl AuthStore {
    pub fn new(config: &AuthConfig) -> Self {
        let dir = config.dir.clone();
        Self {
            session_dir: dir.join(format!("session-{}", config.client_id)),
            restart_marker: dir.join(&config.restart_marker),
            qr_file: dir.join(&config.qr_file),
            min_session_entries: config.min_session_entries,
            keep_file: config.keep_file.clone(),
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    /// Creates the credential directory if missing. Returns true if created.
    ///
    /// # Errors
    ///
    /// Returns [`AuthStoreError`] if the directory cannot be created.
    pub fn ensure_dir(&self) -> Result<bool, AuthStoreError> {
        if self.dir.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(&self.dir).map_err(|e| AuthStoreError {
            path: self.dir.clone(),
            source: e,
        })?;
        info!(dir = %self.dir.display(), "Created credential directory");
        Ok(true)
    }

    /// Makes the directory safe for a new attempt.
    ///
    /// Runs a full purge when `force_purge` is set or the restart marker
    /// exists; otherwise removes the session bundle only if it has fewer
    /// than the minimum number of entries.
    ///
    /// # Errors
    ///
    /// Returns [`AuthStoreError`] if the directory cannot be created.
    pub fn prepare(&self, force_purge: bool) -> Result<PrepareReport, AuthStoreError> {
        let mut report = PrepareReport {
            created: self.ensure_dir()?,
            ..Default::default()
        };

        report.restart_triggered = self.restart_marker.exists();
        if report.restart_triggered {
            info!(marker = %self.restart_marker.display(), "Restart marker found, purging credentials");
        }

        if force_purge || report.restart_triggered {
            report.purge = Some(self.purge());
            // The purge also removes the marker; make sure it is gone.
            if self.restart_marker.exists() {
                remove_entry(&self.restart_marker);
            }
            return Ok(report);
        }

        report.session_removed = self.remove_implausible_session();
        Ok(report)
    }

    /// Removes everything in the directory except the keep-file.
    pub fn purge(&self) -> PurgeReport {
        let mut report = PurgeReport::default();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return report,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Cannot list credential directory");
                report.failed += 1;
                return report;
            }
        };

        for entry in entries.flatten() {
            if entry.file_name().to_string_lossy() == self.keep_file {
                continue;
            }
            if remove_entry(&entry.path()) {
                report.removed += 1;
            } else {
                report.failed += 1;
            }
        }

        info!(
            dir = %self.dir.display(),
            removed = report.removed,
            failed = report.failed,
            "Credential directory purged"
        );
        report
    }

    /// Removes the session bundle when it is not a directory or has too
    /// few entries. Returns true if something was removed.
    fn remove_implausible_session(&self) -> bool {
        let metadata = match fs::symlink_metadata(&self.session_dir) {
            Ok(metadata) => metadata,
            Err(_) => return false,
        };

        let entries = if metadata.is_dir() {
            match fs::read_dir(&self.session_dir) {
                Ok(entries) => entries.flatten().count(),
                Err(e) => {
                    warn!(dir = %self.session_dir.display(), error = %e, "Cannot list session bundle");
                    return false;
                }
            }
        } else {
            0
        };

        if entries >= self.min_session_entries {
            debug!(entries, "Session bundle looks plausible");
            return false;
        }

        warn!(
            dir = %self.session_dir.display(),
            entries,
            min = self.min_session_entries,
            "Removing implausible session bundle"
        );
        remove_entry(&self.session_dir)
    }

    // ========================================================================
    // Login Challenge
    // ========================================================================

    /// Persists the latest QR payload for `GET /qr` and operators.
    pub fn write_qr(&self, code: &str) {
        match fs::write(&self.qr_file, code) {
            Ok(()) => info!(path = %self.qr_file.display(), "QR code saved"),
            Err(e) => warn!(path = %self.qr_file.display(), error = %e, "Failed to save QR code"),
        }
    }

    /// Removes the saved QR payload, if any.
    pub fn clear_qr(&self) {
        match fs::remove_file(&self.qr_file) {
            Ok(()) => info!("Cleared saved QR code"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "Failed to clear saved QR code"),
        }
    }

    /// Returns the saved QR payload, if any.
    pub fn read_qr(&self) -> Option<String> {
        fs::read_to_string(&self.qr_file)
            .ok()
            .filter(|code| !code.trim().is_empty())
    }

    pub fn has_qr(&self) -> bool {
        self.qr_file.is_file()
    }
}

/// Removes a file or directory tree, logging failures. Returns success.
fn remove_entry(path: &Path) -> bool {
    let result = match fs::symlink_metadata(path) {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) => Err(e),
    };
    match result {
        Ok(()) => {
            debug!(path = %path.display(), "Removed");
            true
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to remove credential entry");
            false
        }
    }
}
