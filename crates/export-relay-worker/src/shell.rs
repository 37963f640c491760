//! Shell detection and executable lookup.

use std::{
    ffi::OsStr,
    path::{Path, PathBuf},
};

/// Returns the shell program and its command flag for the current platform.
///
/// - Windows: `("cmd", "/C")`
/// - Unix-like: the `$SHELL` if it is a known shell, else `("/bin/sh", "-c")`
#[must_use]
pub fn get_shell_command() -> (String, &'static str) {
    if cfg!(windows) {
        ("cmd".into(), "/C")
    } else {
        UnixShell::current_shell().get_shell_command()
    }
}

/// Resolve an executable by name.
///
/// Absolute paths are accepted if they point at a file; anything else is
/// looked up on `PATH`.
pub async fn resolve_executable_path(executable: &str) -> Option<PathBuf> {
    if executable.trim().is_empty() {
        return None;
    }

    let path = Path::new(executable);
    if path.is_absolute() {
        return path.is_file().then(|| path.to_path_buf());
    }

    let executable = executable.to_string();
    tokio::task::spawn_blocking(move || which::which(executable))
        .await
        .ok()
        .and_then(Result::ok)
}

/// Unix shell types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnixShell {
    Bash(PathBuf),
    Sh(PathBuf),
    Other(PathBuf),
}

impl UnixShell {
    /// Get the shell path.
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Bash(p) | Self::Sh(p) | Self::Other(p) => p,
        }
    }

    /// Get the current shell from `$SHELL`, restricted to POSIX-compatible ones.
    #[must_use]
    pub fn current_shell() -> Self {
        std::env::var("SHELL")
            .ok()
            .and_then(|shell| Self::from_path(Path::new(&shell)))
            .filter(|shell| !matches!(shell, Self::Other(_)))
            .unwrap_or_else(|| Self::Sh(PathBuf::from("/bin/sh")))
    }

    /// Create from a path.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        if !(path.is_absolute() && path.is_file()) {
            return None;
        }
        let path_buf = path.to_path_buf();
        Some(match path.file_name().and_then(OsStr::to_str) {
            Some("bash") => Self::Bash(path_buf),
            Some("sh") => Self::Sh(path_buf),
            _ => Self::Other(path_buf),
        })
    }

    /// Get shell command tuple.
    #[must_use]
    pub fn get_shell_command(&self) -> (String, &'static str) {
        (self.path().to_string_lossy().into_owned(), "-c")
    }
}
