use std::{
    env, fs,
    path::{Path, PathBuf},
};

/// Errors for resolving the runtime home directory
#[derive(Debug, thiserror::Error)]
pub enum HomeDirError {
    #[error("{0} environment variable is not set")]
    EnvMissing(&'static str),
    #[error("home_dir must be an absolute path (after ~ expansion): {0}")]
    AbsoluteRequired(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(target_os = "windows")]
const USER_HOME_VARS: &[&str] = &["USERPROFILE", "HOME"];
#[cfg(not(target_os = "windows"))]
const USER_HOME_VARS: &[&str] = &["HOME"];

#[cfg(target_os = "windows")]
const DEFAULT_BASE_VAR: &str = "APPDATA";
#[cfg(not(target_os = "windows"))]
const DEFAULT_BASE_VAR: &str = "HOME";

fn user_home() -> Result<PathBuf, HomeDirError> {
    USER_HOME_VARS
        .iter()
        .find_map(|v| env::var_os(v))
        .map(PathBuf::from)
        .ok_or(HomeDirError::EnvMissing(USER_HOME_VARS[0]))
}

/// Expand a leading `~`, `~/` or `~\` against `home`.
fn expand_tilde(
    raw: &str,
    home: impl FnOnce() -> Result<PathBuf, HomeDirError>,
) -> Result<PathBuf, HomeDirError> {
    let Some(rest) = raw.strip_prefix('~') else {
        return Ok(PathBuf::from(raw));
    };
    let rest = rest.trim_start_matches(['/', '\\']);
    let home = home()?;
    Ok(if rest.is_empty() { home } else { home.join(rest) })
}

/// Resolve the runtime home directory.
///
/// A configured value may start with `~` and must be absolute once expanded.
/// Without one, `<base>/<default_subdir>` is used, where `<base>` is `%APPDATA%`
/// on Windows and `$HOME` elsewhere. With `create`, the directory is created
/// when missing.
pub fn resolve_home_dir(
    config_home: Option<String>,
    default_subdir: &str,
    create: bool,
) -> Result<PathBuf, HomeDirError> {
    let path = match config_home {
        Some(raw) => {
            let expanded = expand_tilde(&raw, user_home)?;
            if !expanded.is_absolute() {
                return Err(HomeDirError::AbsoluteRequired(
                    expanded.to_string_lossy().into_owned(),
                ));
            }
            expanded
        }
        None => {
            let base = env::var_os(DEFAULT_BASE_VAR)
                .ok_or(HomeDirError::EnvMissing(DEFAULT_BASE_VAR))?;
            Path::new(&base).join(default_subdir)
        }
    };

    if create {
        fs::create_dir_all(&path)?;
    }
    Ok(path)
}
