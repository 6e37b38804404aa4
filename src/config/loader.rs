//! Reading `config.toml` into [`Config`].
//!
//! An explicit path must exist. The per-user file is optional: when it is
//! missing the built-in defaults apply. Syntax and type errors carry the
//! 1-based line and column where `toml` gave up.

use std::fs;
use std::io;
use std::path::Path;

use crate::config::error::ConfigError;
use crate::config::schema::Config;
use crate::config::xdg;

/// Entry points for turning a file on disk into a [`Config`].
pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the file given on the command line, or the per-user file.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        match path {
            Some(path) => Self::load_file(path),
            None => Self::load_user_file(),
        }
    }

    /// Reads and parses `path`. A missing file is [`ConfigError::NotFound`].
    pub fn load_file(path: &Path) -> Result<Config, ConfigError> {
        let text = read(path)?;
        parse(&text, path)
    }

    /// Reads [`xdg::config_path`], falling back to defaults when absent.
    pub fn load_user_file() -> Result<Config, ConfigError> {
        let path = xdg::config_path();
        match Self::load_file(&path) {
            Err(ConfigError::NotFound { .. }) => {
                tracing::debug!(path = %path.display(), "no user config, built-in defaults apply");
                Ok(Config::default())
            }
            loaded => loaded,
        }
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ConfigError::NotFound {
            path: path.to_path_buf(),
        },
        _ => ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        },
    })
}

fn parse(text: &str, path: &Path) -> Result<Config, ConfigError> {
    toml::from_str(text).map_err(|e| {
        // (0, 0) when toml reports no location
        let (line, column) = e
            .span()
            .map_or((0, 0), |span| line_col(text, span.start));
        ConfigError::ParseError {
            path: path.to_path_buf(),
            line,
            column,
            message: e.message().to_string(),
        }
    })
}

/// 1-based line and byte column of `offset` within `text`.
fn line_col(text: &str, offset: usize) -> (usize, usize) {
    let before = &text[..offset.min(text.len())];
    let line_start = before.rfind('\n').map_or(0, |newline| newline + 1);
    let line = before.bytes().filter(|&b| b == b'\n').count() + 1;
    (line, before.len() - line_start + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::LogLevel;
    use serial_test::serial;
    use std::path::PathBuf;

    fn with_config_home<F: FnOnce()>(dir: &Path, f: F) {
        let saved = std::env::var_os("XDG_CONFIG_HOME");
        std::env::set_var("XDG_CONFIG_HOME", dir);
        f();
        match saved {
            Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
    }

    // -----------------------------------------------------------------------
    // line_col
    // -----------------------------------------------------------------------

    #[test]
    fn line_col_counts_from_one() {
        let text = "[rpc]\ntimeout = 1\n";
        assert_eq!(line_col(text, 0), (1, 1));
        assert_eq!(line_col(text, 3), (1, 4));
        assert_eq!(line_col(text, 6), (2, 1));
        assert_eq!(line_col(text, 16), (2, 11));
    }

    #[test]
    fn line_col_clamps_past_the_end() {
        assert_eq!(line_col("a\nb", 99), (2, 2));
    }

    // -----------------------------------------------------------------------
    // parse
    // -----------------------------------------------------------------------

    #[test]
    fn parse_partial_config_fills_defaults() {
        let text = "[rpc]\ndefault_timeout = \"10s\"\n";
        let config = parse(text, Path::new("partial.toml")).expect("partial config should parse");
        assert_eq!(config.rpc.default_timeout, "10s");
        assert_eq!(config.invalidation.restart_delay, "2s");
        assert_eq!(config.connection.reconnect.max_attempts, 10);
    }

    #[test]
    fn parse_empty_text_is_default() {
        let config = parse("", Path::new("empty.toml")).expect("empty text parses");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn parse_syntax_error_points_past_header() {
        let path = PathBuf::from("bad.toml");
        let err = parse("[rpc]\ndefault_timeout = \ninvalid", &path).expect_err("should fail");
        match err {
            ConfigError::ParseError {
                path: p,
                line,
                column,
                message,
            } => {
                assert_eq!(p, path);
                assert!(line > 1, "error should point past the section header");
                assert!(column > 0);
                assert!(!message.is_empty());
            }
            other => panic!("expected ParseError, got: {other:?}"),
        }
    }

    #[test]
    fn parse_wrong_type_reports_its_line() {
        let err = parse("[connection.reconnect]\nmax_attempts = \"many\"\n", Path::new("typed.toml"))
            .expect_err("string is not a u32");
        assert!(matches!(err, ConfigError::ParseError { line: 2, .. }));
    }

    // -----------------------------------------------------------------------
    // load_file
    // -----------------------------------------------------------------------

    #[test]
    fn load_file_reads_level() {
        let dir = tempfile::tempdir().expect("temp dir");
        let file = dir.path().join("config.toml");
        fs::write(&file, "[logging]\nlevel = \"trace\"\n").expect("write config");
        let config = ConfigLoader::load_file(&file).expect("should load");
        assert_eq!(config.logging.level, LogLevel::Trace);
    }

    #[test]
    fn load_file_missing_is_not_found() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");
        match ConfigLoader::load_file(&path).expect_err("should fail") {
            ConfigError::NotFound { path: p } => assert_eq!(p, path),
            other => panic!("expected NotFound, got: {other:?}"),
        }
    }

    #[test]
    fn load_file_on_directory_is_read_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        match ConfigLoader::load_file(dir.path()).expect_err("should fail") {
            ConfigError::ReadError { path, .. } => assert_eq!(path, dir.path()),
            other => panic!("expected ReadError, got: {other:?}"),
        }
    }

    // -----------------------------------------------------------------------
    // load_user_file
    // -----------------------------------------------------------------------

    #[test]
    #[serial]
    fn load_user_file_absent_gives_defaults() {
        let dir = tempfile::tempdir().expect("temp dir");
        with_config_home(dir.path(), || {
            let config = ConfigLoader::load_user_file().expect("defaults");
            assert_eq!(config, Config::default());
        });
    }

    #[test]
    #[serial]
    fn load_without_path_reads_user_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let app_dir = dir.path().join("keyrx-client");
        fs::create_dir_all(&app_dir).expect("create config dir");
        fs::write(app_dir.join("config.toml"), "[logging]\nlevel = \"warn\"\n")
            .expect("write config");
        with_config_home(dir.path(), || {
            let config = ConfigLoader::load(None).expect("should load");
            assert_eq!(config.logging.level, LogLevel::Warn);
        });
    }

    #[test]
    #[serial]
    fn load_user_file_surfaces_parse_errors() {
        let dir = tempfile::tempdir().expect("temp dir");
        let app_dir = dir.path().join("keyrx-client");
        fs::create_dir_all(&app_dir).expect("create config dir");
        fs::write(app_dir.join("config.toml"), "[logging\n").expect("write config");
        with_config_home(dir.path(), || {
            let err = ConfigLoader::load_user_file().expect_err("broken file is not skipped");
            assert!(matches!(err, ConfigError::ParseError { .. }), "got: {err:?}");
        });
    }
}
