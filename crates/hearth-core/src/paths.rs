//! Centralized path utilities
//!
//! All application paths in one place for consistency

use std::path::{Component, Path, PathBuf};

/// Name of the per-user config directory under $HOME
pub const CONFIG_DIR_NAME: &str = ".hearth";

/// Name of the per-workspace data directory
pub const DATA_DIR_NAME: &str = ".hearth";

/// Get the hearth config directory (~/.hearth)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Get the global config file (~/.hearth/hearth.json)
pub fn global_config_path() -> PathBuf {
    config_dir().join("hearth.json")
}

/// Get the logs directory (~/.hearth/logs)
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}

/// Default control-plane address for the current user.
///
/// A socket path under the temp dir on POSIX, a named pipe on Windows.
pub fn default_socket_address() -> String {
    #[cfg(unix)]
    {
        // SAFETY: getuid has no preconditions and cannot fail
        let uid = unsafe { libc::getuid() };
        std::env::temp_dir()
            .join(format!("hearth-{}.sock", uid))
            .to_string_lossy()
            .into_owned()
    }
    #[cfg(windows)]
    {
        let user = std::env::var("USERNAME").unwrap_or_else(|_| "default".to_string());
        format!(r"\\.\pipe\hearth-{}", user)
    }
}

/// Canonicalize a workspace path, falling back to lexical cleaning when the
/// path does not exist yet.
pub fn canonical_workspace_path(path: &Path) -> PathBuf {
    match std::fs::canonicalize(path) {
        Ok(p) => p,
        Err(_) => {
            let absolute = if path.is_absolute() {
                path.to_path_buf()
            } else {
                std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("/"))
                    .join(path)
            };
            clean(&absolute)
        }
    }
}

fn clean(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
