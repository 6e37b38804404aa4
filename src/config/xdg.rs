//! Where keyrx-client keeps its files.
//!
//! `$XDG_CONFIG_HOME` is honoured on every platform when it is set and
//! non-empty. Without it, Linux and the BSDs use `~/.config` and macOS uses
//! `~/Library/Application Support`. Either way the client gets its own
//! `keyrx-client` subdirectory.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "keyrx-client";
const CONFIG_FILE: &str = "config.toml";

/// `<config base>/keyrx-client`.
pub fn config_dir() -> PathBuf {
    config_base().join(APP_DIR)
}

/// `<config base>/keyrx-client/config.toml`, whether or not it exists.
pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE)
}

fn config_base() -> PathBuf {
    non_empty_env("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(native_config_base)
}

// An empty value counts as unset, as XDG prescribes.
fn non_empty_env(key: &str) -> Option<OsString> {
    std::env::var_os(key).filter(|value| !value.is_empty())
}

#[cfg(target_os = "macos")]
fn native_config_base() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| home().join("Library/Application Support"))
}

#[cfg(not(target_os = "macos"))]
fn native_config_base() -> PathBuf {
    home().join(".config")
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Resolves `~` and `~/...` against the home directory.
///
/// `~user` forms are not supported and pass through unchanged.
pub fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some("") => home(),
        Some(rest) if rest.starts_with('/') => home().join(rest.trim_start_matches('/')),
        _ => PathBuf::from(path),
    }
}

/// `create_dir_all`, then restrict the leaf to its owner on unix.
pub fn create_private_dir(path: &Path) -> std::io::Result<()> {
    fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

/// Makes sure [`config_dir`] exists and hands it back.
pub fn ensure_config_dir() -> std::io::Result<PathBuf> {
    let dir = config_dir();
    create_private_dir(&dir)?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    /// Overrides one variable for the guard's lifetime.
    struct EnvGuard {
        key: &'static str,
        saved: Option<OsString>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let saved = std::env::var_os(key);
            match value {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
            Self { key, saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match self.saved.take() {
                Some(value) => std::env::set_var(self.key, value),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    #[serial]
    fn test_xdg_config_home_wins() {
        let _env = EnvGuard::set("XDG_CONFIG_HOME", Some("/custom/config"));
        assert_eq!(
            config_path(),
            PathBuf::from("/custom/config/keyrx-client/config.toml")
        );
    }

    #[test]
    #[serial]
    fn test_unset_xdg_falls_back_to_native_base() {
        let _env = EnvGuard::set("XDG_CONFIG_HOME", None);
        assert_eq!(config_dir(), native_config_base().join("keyrx-client"));
    }

    #[test]
    #[serial]
    fn test_empty_xdg_counts_as_unset() {
        let _env = EnvGuard::set("XDG_CONFIG_HOME", Some(""));
        assert_eq!(config_dir(), native_config_base().join("keyrx-client"));
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    #[serial]
    fn test_native_base_is_dot_config() {
        let _env = EnvGuard::set("XDG_CONFIG_HOME", None);
        let home = dirs::home_dir().expect("home directory");
        assert_eq!(config_dir(), home.join(".config/keyrx-client"));
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().expect("home directory");
        assert_eq!(expand_tilde("~"), home);
        assert_eq!(expand_tilde("~/keyrx.toml"), home.join("keyrx.toml"));
        assert_eq!(expand_tilde("/etc/keyrx.toml"), PathBuf::from("/etc/keyrx.toml"));
        assert_eq!(expand_tilde("conf/keyrx.toml"), PathBuf::from("conf/keyrx.toml"));
        assert_eq!(expand_tilde("~user/x"), PathBuf::from("~user/x"));
    }

    #[cfg(unix)]
    #[test]
    fn test_create_private_dir_nests_and_restricts() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = tempfile::tempdir().expect("temp dir");
        let leaf = tmp.path().join("a/b/private");
        create_private_dir(&leaf).expect("create dir");
        assert!(leaf.is_dir());
        let mode = fs::metadata(&leaf).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    #[serial]
    fn test_ensure_config_dir_under_xdg() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let _env = EnvGuard::set("XDG_CONFIG_HOME", Some(tmp.path().to_str().expect("utf8 path")));
        let dir = ensure_config_dir().expect("config dir");
        assert_eq!(dir, tmp.path().join("keyrx-client"));
        assert!(dir.is_dir());
    }
}
