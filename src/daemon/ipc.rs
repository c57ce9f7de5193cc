//! Socket and PID file locations, process probing

use directories::BaseDirs;
use std::path::{Path, PathBuf};

use crate::errors::{AppError, AppResult, ErrorContextExt};

const SOCKET_NAME: &str = "daemon.sock";

/// Resolve the daemon socket path.
///
/// An explicitly configured path wins. Otherwise the socket lives in
/// `base_dir` when given, else in the per-user runtime directory.
pub fn create_socket_path(configured: Option<&Path>, base_dir: Option<&Path>) -> AppResult<PathBuf> {
    if let Some(path) = configured {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).in_file_operation(parent, "create socket directory")?;
        }
        return Ok(path.to_path_buf());
    }

    let base_path = match base_dir {
        Some(dir) => dir.to_path_buf(),
        None => {
            let base_dirs = BaseDirs::new()
                .ok_or_else(|| AppError::config("Failed to get base directories"))?;
            base_dirs
                .runtime_dir()
                .unwrap_or_else(|| base_dirs.cache_dir())
                .join("volume-manager")
        }
    };

    std::fs::create_dir_all(&base_path).in_file_operation(&base_path, "create socket directory")?;
    Ok(base_path.join(SOCKET_NAME))
}

/// PID file kept next to the socket
pub fn pid_file_path(socket_path: &Path) -> PathBuf {
    socket_path.with_extension("pid")
}

pub fn is_process_running(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }
    // Signal 0 only checks that the process exists and can be signalled
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_path_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("run").join("vm.sock");

        assert_eq!(create_socket_path(Some(&explicit), None).unwrap(), explicit);
        assert!(dir.path().join("run").is_dir());

        let in_base = create_socket_path(None, Some(dir.path())).unwrap();
        assert_eq!(in_base, dir.path().join("daemon.sock"));
        assert_eq!(pid_file_path(&in_base), dir.path().join("daemon.pid"));
    }

    #[test]
    fn test_process_probe() {
        assert!(is_process_running(std::process::id()));
        assert!(!is_process_running(0));
        assert!(!is_process_running(u32::MAX));
    }
}
