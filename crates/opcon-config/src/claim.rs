//! Advisory-lock claims over filesystem-backed datagram socket paths.
//!
//! A claim proves exclusive ownership of a socket path: the owner holds a
//! non-blocking exclusive lock on a sibling lock file for its whole lifetime.
//! A lock that can be taken by someone else therefore marks an abandoned
//! path from a crashed owner, which the orphan scan reclaims before new
//! claims are attempted.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::runtime::{LOCK_SUFFIX, lock_path_for, socket_path};

const CLAIM_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::claim");

/// Exclusive ownership of a socket path and its lock file.
///
/// Dropping the claim removes both files; the advisory lock is released when
/// the held file handle closes. A crash skips this cleanup deliberately: the
/// still-present lock file is what the next process's orphan scan feeds on.
#[derive(Debug)]
pub struct PathClaim {
    name: String,
    socket_path: PathBuf,
    lock_path: PathBuf,
    _lock: File,
}

impl PathClaim {
    /// Claims a server socket path derived from `base`.
    ///
    /// Reclaims orphaned paths in `dir` first, then tries `base` itself and
    /// numbered alternates (`base-1`, `base-2`, …) up to `attempts`
    /// candidates.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimError::Exhausted`] when every candidate is held by a
    /// live owner, or an IO variant when the directory cannot be used.
    pub fn acquire(dir: &Path, base: &str, attempts: usize) -> Result<Self, ClaimError> {
        reclaim_orphans(dir)?;
        let mut first_conflict = true;
        for attempt in 0..attempts {
            let candidate = if attempt == 0 {
                base.to_owned()
            } else {
                format!("{base}-{attempt}")
            };
            if let Some(claim) = Self::try_candidate(dir, &candidate)? {
                return Ok(claim);
            }
            if first_conflict {
                warn!(
                    target: CLAIM_TARGET,
                    base,
                    candidate,
                    "endpoint name in use; probing alternates"
                );
                first_conflict = false;
            }
        }
        Err(ClaimError::Exhausted {
            base: base.to_owned(),
            attempts,
        })
    }

    /// Claims a uniquely named client endpoint derived from `base`.
    ///
    /// Candidates start with `base-<pid>` and continue with random suffixes,
    /// so many connections inside one process coexist.
    ///
    /// # Errors
    ///
    /// As [`PathClaim::acquire`].
    pub fn acquire_ephemeral(dir: &Path, base: &str, attempts: usize) -> Result<Self, ClaimError> {
        reclaim_orphans(dir)?;
        let pid = std::process::id();
        let mut rng = rand::thread_rng();
        for attempt in 0..attempts {
            let candidate = if attempt == 0 {
                format!("{base}-{pid}")
            } else {
                format!("{base}-{pid}-{:04x}", rng.r#gen::<u16>())
            };
            if let Some(claim) = Self::try_candidate(dir, &candidate)? {
                return Ok(claim);
            }
        }
        Err(ClaimError::Exhausted {
            base: base.to_owned(),
            attempts,
        })
    }

    /// Attempts one candidate name; `Ok(None)` means a live owner holds it.
    fn try_candidate(dir: &Path, name: &str) -> Result<Option<Self>, ClaimError> {
        let socket = socket_path(dir, name);
        let lock = lock_path_for(&socket);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock)
            .map_err(|source| ClaimError::LockCreate {
                path: lock.clone(),
                source,
            })?;
        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                debug!(
                    target: CLAIM_TARGET,
                    candidate = name,
                    "candidate held by a live owner"
                );
                return Ok(None);
            }
            Err(source) => {
                return Err(ClaimError::Lock { path: lock, source });
            }
        }
        // The lock is ours, so any socket left at this path is stale.
        if let Err(source) = fs::remove_file(&socket)
            && source.kind() != io::ErrorKind::NotFound
        {
            return Err(ClaimError::Cleanup {
                path: socket,
                source,
            });
        }
        info!(
            target: CLAIM_TARGET,
            candidate = name,
            socket = %socket.display(),
            "claimed endpoint path"
        );
        Ok(Some(Self {
            name: name.to_owned(),
            socket_path: socket,
            lock_path: lock,
            _lock: file,
        }))
    }

    /// The claimed candidate name (base plus any disambiguator).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path the owner should bind its datagram socket to.
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for PathClaim {
    fn drop(&mut self) {
        for path in [&self.socket_path, &self.lock_path] {
            match fs::remove_file(path) {
                Err(error) if error.kind() != io::ErrorKind::NotFound => {
                    warn!(
                        target: CLAIM_TARGET,
                        file = %path.display(),
                        error = %error,
                        "failed to remove claim artefact"
                    );
                }
                _ => {}
            }
        }
    }
}

/// Scans `dir` for abandoned lock files and removes them with their sockets.
///
/// A lock file whose exclusive lock can be taken has no live owner; both the
/// lock and its socket path are deleted. Returns the number of paths
/// reclaimed. A missing directory reclaims nothing.
///
/// # Errors
///
/// Returns [`ClaimError::Scan`] when the directory exists but cannot be read.
pub fn reclaim_orphans(dir: &Path) -> Result<usize, ClaimError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(source) => {
            return Err(ClaimError::Scan {
                path: dir.to_path_buf(),
                source,
            });
        }
    };
    let mut reclaimed = 0;
    for entry in entries {
        let Ok(entry) = entry else { continue };
        let lock_path = entry.path();
        if !lock_path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.ends_with(LOCK_SUFFIX))
        {
            continue;
        }
        let Ok(file) = File::options().write(true).open(&lock_path) else {
            continue;
        };
        if file.try_lock_exclusive().is_err() {
            // A live owner still holds it.
            continue;
        }
        let socket = lock_path.with_extension("");
        for stale in [&socket, &lock_path] {
            if let Err(error) = fs::remove_file(stale)
                && error.kind() != io::ErrorKind::NotFound
            {
                warn!(
                    target: CLAIM_TARGET,
                    file = %stale.display(),
                    error = %error,
                    "failed to remove orphaned file"
                );
            }
        }
        info!(
            target: CLAIM_TARGET,
            socket = %socket.display(),
            "reclaimed abandoned endpoint"
        );
        reclaimed += 1;
    }
    Ok(reclaimed)
}

/// Errors surfaced while claiming or reclaiming endpoint paths.
#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    /// Every candidate name was held by a live owner.
    #[error("no free endpoint name derived from '{base}' after {attempts} attempts")]
    Exhausted {
        /// Base name the candidates derived from.
        base: String,
        /// Number of candidates tried.
        attempts: usize,
    },
    /// The lock file could not be created.
    #[error("failed to create lock file '{path}': {source}")]
    LockCreate {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Taking the advisory lock failed for a reason other than contention.
    #[error("failed to lock '{path}': {source}")]
    Lock {
        /// Lock file path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Removing a stale artefact failed.
    #[error("failed to remove stale file '{path}': {source}")]
    Cleanup {
        /// Path of the artefact that could not be removed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The runtime directory could not be scanned.
    #[error("failed to scan runtime directory '{path}': {source}")]
    Scan {
        /// Directory being scanned.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
