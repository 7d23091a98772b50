//! Per-user directories and crash-safe file replacement.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "liveticker";

/// Which XDG base directory a file belongs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BaseDir {
    /// User-edited settings (`$XDG_CONFIG_HOME`, `~/.config`).
    Config,
    /// Data the process rewrites on its own (`$XDG_STATE_HOME`, `~/.local/state`).
    State,
}

impl BaseDir {
    fn env_var(self) -> &'static str {
        match self {
            BaseDir::Config => "XDG_CONFIG_HOME",
            BaseDir::State => "XDG_STATE_HOME",
        }
    }

    fn under_home(self) -> &'static [&'static str] {
        match self {
            BaseDir::Config => &[".config"],
            BaseDir::State => &[".local", "state"],
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("cannot locate the {var} directory: neither {var} nor HOME is set")]
pub struct DirError {
    var: &'static str,
}

/// `<base>/liveticker`. Empty variables count as unset.
pub(crate) fn app_dir(base: BaseDir) -> Result<PathBuf, DirError> {
    resolve_app_dir(base, |name| std::env::var_os(name))
}

fn resolve_app_dir(
    base: BaseDir,
    lookup: impl Fn(&str) -> Option<OsString>,
) -> Result<PathBuf, DirError> {
    let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty()).map(PathBuf::from);
    let root = match non_empty(base.env_var()) {
        Some(dir) => dir,
        None => {
            let home = non_empty("HOME").ok_or(DirError {
                var: base.env_var(),
            })?;
            base.under_home().iter().fold(home, |dir, part| dir.join(part))
        }
    };
    Ok(root.join(APP_DIR))
}

/// Write `contents` next to `path`, then rename over it. Readers see the old
/// file or the new one, never a partial write.
pub(crate) fn replace_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)
}

/// Remove `path` if it exists.
pub(crate) fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        res => res,
    }
}
