//! Derives the runtime directory holding local datagram sockets and locks.
//!
//! Servers and clients must agree on this layout: a server claims
//! `<runtime>/<name>.sock` plus its lock file, and a client targets the same
//! path when told to reach a named local endpoint.

use std::env;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[cfg(unix)]
use dirs::runtime_dir as user_runtime_dir;
#[cfg(unix)]
use libc::geteuid;

/// Suffix appended to a socket path to form its advisory lock file.
pub(crate) const LOCK_SUFFIX: &str = ".lock";

/// Returns the directory housing local console sockets and lock files.
///
/// Prefers the user runtime directory (`$XDG_RUNTIME_DIR/opcon`), falling
/// back to a uid-namespaced directory under the system temp dir so unrelated
/// users never share a socket namespace.
///
/// # Errors
///
/// Currently infallible on supported platforms; the `Result` keeps the
/// signature stable should derivation grow failure modes.
pub fn runtime_dir() -> Result<PathBuf, RuntimeDirError> {
    #[cfg(unix)]
    {
        if let Some(mut dir) = user_runtime_dir() {
            dir.push("opcon");
            return Ok(dir);
        }
        let mut dir = env::temp_dir();
        dir.push("opcon");
        dir.push(format!("uid-{}", unsafe { geteuid() }));
        Ok(dir)
    }

    #[cfg(not(unix))]
    {
        let mut dir = env::temp_dir();
        dir.push("opcon");
        Ok(dir)
    }
}

/// Returns the socket path for a named local endpoint within `dir`.
#[must_use]
pub fn socket_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.sock"))
}

/// Returns the lock-file path guarding `socket`.
#[must_use]
pub fn lock_path_for(socket: &Path) -> PathBuf {
    let mut lock = socket.as_os_str().to_owned();
    lock.push(LOCK_SUFFIX);
    PathBuf::from(lock)
}

/// Errors raised while deriving the runtime directory.
#[derive(Debug, Error)]
pub enum RuntimeDirError {
    /// No candidate directory was available.
    #[error("no runtime directory could be derived")]
    Unavailable,
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "tests use expect for clarity")]

    use super::*;

    #[test]
    fn socket_and_lock_paths_share_a_stem() {
        let dir = PathBuf::from("/run/user/1000/opcon");
        let socket = socket_path(&dir, "trace-server");
        assert!(socket.ends_with("trace-server.sock"));
        let lock = lock_path_for(&socket);
        assert!(lock.to_string_lossy().ends_with("trace-server.sock.lock"));
    }

    #[test]
    fn runtime_dir_is_namespaced_under_opcon() {
        let dir = runtime_dir().expect("derive runtime dir");
        assert!(dir.to_string_lossy().contains("opcon"));
    }
}
